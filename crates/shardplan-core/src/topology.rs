//! Static description of the device fleet a plan targets.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{
    CROSS_NODE_BANDWIDTH, DDR_CAP_DEFAULT, DEFAULT_BATCH_SIZE, HBM_CAP_DEFAULT,
    INTRA_NODE_BANDWIDTH,
};
use crate::error::{Error, Result};
use crate::storage::Storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputeDevice {
    Cpu,
    Cuda,
    Mtia,
}

impl ComputeDevice {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComputeDevice::Cpu => "cpu",
            ComputeDevice::Cuda => "cuda",
            ComputeDevice::Mtia => "mtia",
        }
    }

    /// Devices with their own fast memory tier.
    pub fn is_accelerator(&self) -> bool {
        !matches!(self, ComputeDevice::Cpu)
    }
}

impl fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ComputeDevice {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cpu" => Ok(ComputeDevice::Cpu),
            "cuda" => Ok(ComputeDevice::Cuda),
            "mtia" => Ok(ComputeDevice::Mtia),
            other => Err(Error::Config(format!("unknown compute device '{other}'"))),
        }
    }
}

/// Capacity of one rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceHardware {
    pub rank: usize,
    pub storage: Storage,
}

/// Immutable fleet description. Build with `Topology::new` and the `with_*`
/// methods; every method re-checks the invariants it touches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    world_size: usize,
    local_world_size: usize,
    compute_device: ComputeDevice,
    devices: Vec<DeviceHardware>,
    /// GB/s between ranks on the same host.
    intra_host_bw: f64,
    /// GB/s between ranks on different hosts.
    inter_host_bw: f64,
    /// Per-rank batch size.
    batch_size: u64,
}

impl Topology {
    /// A single-host fleet with default capacities and bandwidths.
    pub fn new(world_size: usize, compute_device: ComputeDevice) -> Result<Self> {
        if world_size == 0 {
            return Err(Error::Topology("world_size must be positive".into()));
        }
        let hbm = if compute_device.is_accelerator() {
            HBM_CAP_DEFAULT
        } else {
            0
        };
        let devices = (0..world_size)
            .map(|rank| DeviceHardware {
                rank,
                storage: Storage::new(hbm, DDR_CAP_DEFAULT),
            })
            .collect();
        Ok(Self {
            world_size,
            local_world_size: world_size,
            compute_device,
            devices,
            intra_host_bw: INTRA_NODE_BANDWIDTH,
            inter_host_bw: CROSS_NODE_BANDWIDTH,
            batch_size: DEFAULT_BATCH_SIZE,
        })
    }

    pub fn with_local_world_size(mut self, local_world_size: usize) -> Result<Self> {
        self.local_world_size = local_world_size;
        self.validate()?;
        Ok(self)
    }

    /// Set the fast-tier capacity of every device.
    pub fn with_hbm_cap(mut self, bytes: u64) -> Self {
        for d in &mut self.devices {
            d.storage.hbm = bytes;
        }
        self
    }

    /// Set the slow-tier capacity of every device.
    pub fn with_ddr_cap(mut self, bytes: u64) -> Self {
        for d in &mut self.devices {
            d.storage.ddr = bytes;
        }
        self
    }

    /// Override the capacity of one rank (heterogeneous fleets).
    pub fn with_device_capacity(mut self, rank: usize, storage: Storage) -> Result<Self> {
        let world_size = self.world_size;
        let device = self.devices.get_mut(rank).ok_or_else(|| {
            Error::Topology(format!("rank {rank} out of range for world_size {world_size}"))
        })?;
        device.storage = storage;
        Ok(self)
    }

    pub fn with_bandwidths(mut self, intra_host_bw: f64, inter_host_bw: f64) -> Result<Self> {
        self.intra_host_bw = intra_host_bw;
        self.inter_host_bw = inter_host_bw;
        self.validate()?;
        Ok(self)
    }

    pub fn with_batch_size(mut self, batch_size: u64) -> Result<Self> {
        self.batch_size = batch_size;
        self.validate()?;
        Ok(self)
    }

    /// Check every invariant. Deserialized topologies must pass this before use.
    pub fn validate(&self) -> Result<()> {
        if self.world_size == 0 {
            return Err(Error::Topology("world_size must be positive".into()));
        }
        if self.local_world_size == 0 || self.world_size % self.local_world_size != 0 {
            return Err(Error::Topology(format!(
                "world_size {} is not divisible by local_world_size {}",
                self.world_size, self.local_world_size
            )));
        }
        if self.devices.len() != self.world_size {
            return Err(Error::Topology(format!(
                "expected {} devices, found {}",
                self.world_size,
                self.devices.len()
            )));
        }
        for bw in [self.intra_host_bw, self.inter_host_bw] {
            if !(bw.is_finite() && bw > 0.0) {
                return Err(Error::Topology(format!("bandwidth must be positive, got {bw}")));
            }
        }
        if self.batch_size == 0 {
            return Err(Error::Topology("batch_size must be positive".into()));
        }
        Ok(())
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    pub fn local_world_size(&self) -> usize {
        self.local_world_size
    }

    pub fn compute_device(&self) -> ComputeDevice {
        self.compute_device
    }

    pub fn devices(&self) -> &[DeviceHardware] {
        &self.devices
    }

    pub fn intra_host_bw(&self) -> f64 {
        self.intra_host_bw
    }

    pub fn inter_host_bw(&self) -> f64 {
        self.inter_host_bw
    }

    pub fn batch_size(&self) -> u64 {
        self.batch_size
    }

    pub fn num_hosts(&self) -> usize {
        self.world_size / self.local_world_size
    }

    pub fn host_of(&self, rank: usize) -> usize {
        rank / self.local_world_size
    }

    pub fn ranks_of_host(&self, host: usize) -> Range<usize> {
        let start = host * self.local_world_size;
        start..start + self.local_world_size
    }

    /// Whether a world-wide collective has to cross host boundaries.
    pub fn spans_hosts(&self) -> bool {
        self.world_size > self.local_world_size
    }

    /// Bandwidth for a collective across the whole world.
    pub fn comms_bw(&self) -> f64 {
        if self.spans_hosts() {
            self.inter_host_bw
        } else {
            self.intra_host_bw
        }
    }

    pub fn capacities(&self) -> Vec<Storage> {
        self.devices.iter().map(|d| d.storage).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_device_kind() {
        let cuda = Topology::new(2, ComputeDevice::Cuda).unwrap();
        assert_eq!(cuda.devices()[1].storage.hbm, HBM_CAP_DEFAULT);
        let cpu = Topology::new(2, ComputeDevice::Cpu).unwrap();
        assert_eq!(cpu.devices()[0].storage.hbm, 0);
        assert_eq!(cpu.devices()[0].storage.ddr, DDR_CAP_DEFAULT);
    }

    #[test]
    fn test_world_size_must_divide() {
        let t = Topology::new(6, ComputeDevice::Cuda).unwrap();
        assert!(t.clone().with_local_world_size(4).is_err());
        let t = t.with_local_world_size(3).unwrap();
        assert_eq!(t.num_hosts(), 2);
        assert_eq!(t.host_of(4), 1);
        assert_eq!(t.ranks_of_host(1), 3..6);
        assert!(t.spans_hosts());
        assert_eq!(t.comms_bw(), CROSS_NODE_BANDWIDTH);
    }

    #[test]
    fn test_rejects_bad_inputs() {
        assert!(Topology::new(0, ComputeDevice::Cpu).is_err());
        let t = Topology::new(2, ComputeDevice::Cpu).unwrap();
        assert!(t.clone().with_batch_size(0).is_err());
        assert!(t.clone().with_bandwidths(0.0, 1.0).is_err());
        assert!(t.with_device_capacity(2, Storage::zero()).is_err());
    }
}
