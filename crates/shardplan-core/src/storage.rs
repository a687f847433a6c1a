//! Byte and time cost vectors attached to shards.
//!
//! `Storage` is exact integer bytes per memory tier. `Perf` is a modeled
//! per-iteration time in milliseconds, used only for ranking.

use std::fmt;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

/// Memory tiers a device exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    /// Fast device-local memory.
    Hbm,
    /// Slow host / unified memory.
    Ddr,
}

impl MemoryTier {
    pub const ALL: [MemoryTier; 2] = [MemoryTier::Hbm, MemoryTier::Ddr];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryTier::Hbm => "hbm",
            MemoryTier::Ddr => "ddr",
        }
    }
}

impl fmt::Display for MemoryTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Storage {
    pub hbm: u64,
    pub ddr: u64,
}

impl Storage {
    pub const fn new(hbm: u64, ddr: u64) -> Self {
        Self { hbm, ddr }
    }

    pub const fn zero() -> Self {
        Self { hbm: 0, ddr: 0 }
    }

    pub fn is_zero(&self) -> bool {
        self.hbm == 0 && self.ddr == 0
    }

    pub fn get(&self, tier: MemoryTier) -> u64 {
        match tier {
            MemoryTier::Hbm => self.hbm,
            MemoryTier::Ddr => self.ddr,
        }
    }

    /// Sum over both tiers. Widened so it can never overflow.
    pub fn total(&self) -> u128 {
        self.hbm as u128 + self.ddr as u128
    }

    /// True when every tier of `self` fits into the matching tier of `capacity`.
    pub fn fits_in(&self, capacity: &Storage) -> bool {
        self.hbm <= capacity.hbm && self.ddr <= capacity.ddr
    }

    pub fn checked_add(self, other: Storage) -> Option<Storage> {
        Some(Storage {
            hbm: self.hbm.checked_add(other.hbm)?,
            ddr: self.ddr.checked_add(other.ddr)?,
        })
    }

    pub fn checked_sub(self, other: Storage) -> Option<Storage> {
        Some(Storage {
            hbm: self.hbm.checked_sub(other.hbm)?,
            ddr: self.ddr.checked_sub(other.ddr)?,
        })
    }

    pub fn saturating_sub(self, other: Storage) -> Storage {
        Storage {
            hbm: self.hbm.saturating_sub(other.hbm),
            ddr: self.ddr.saturating_sub(other.ddr),
        }
    }

    /// Tiers where `self` exceeds `available`, as `(tier, excess_bytes)`.
    pub fn excess_over(&self, available: &Storage) -> Vec<(MemoryTier, u64)> {
        MemoryTier::ALL
            .iter()
            .filter_map(|&tier| {
                let need = self.get(tier);
                let have = available.get(tier);
                (need > have).then(|| (tier, need - have))
            })
            .collect()
    }
}

/// Saturates at `u64::MAX` per tier; use `checked_add` where overflow must
/// be reported.
impl Add for Storage {
    type Output = Storage;

    fn add(self, rhs: Storage) -> Storage {
        Storage {
            hbm: self.hbm.saturating_add(rhs.hbm),
            ddr: self.ddr.saturating_add(rhs.ddr),
        }
    }
}

impl AddAssign for Storage {
    fn add_assign(&mut self, rhs: Storage) {
        *self = *self + rhs;
    }
}

impl std::iter::Sum for Storage {
    fn sum<I: Iterator<Item = Storage>>(iter: I) -> Storage {
        iter.fold(Storage::zero(), |acc, s| acc + s)
    }
}

impl fmt::Display for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Storage(hbm = {} B, ddr = {} B)", self.hbm, self.ddr)
    }
}

/// Modeled per-iteration cost, in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Perf {
    pub fwd_compute: f64,
    pub fwd_comms: f64,
    pub bwd_compute: f64,
    pub bwd_comms: f64,
}

impl Perf {
    pub const fn zero() -> Self {
        Self {
            fwd_compute: 0.0,
            fwd_comms: 0.0,
            bwd_compute: 0.0,
            bwd_comms: 0.0,
        }
    }

    pub fn total(&self) -> f64 {
        self.fwd_compute + self.fwd_comms + self.bwd_compute + self.bwd_comms
    }
}

impl Add for Perf {
    type Output = Perf;

    fn add(self, rhs: Perf) -> Perf {
        Perf {
            fwd_compute: self.fwd_compute + rhs.fwd_compute,
            fwd_comms: self.fwd_comms + rhs.fwd_comms,
            bwd_compute: self.bwd_compute + rhs.bwd_compute,
            bwd_comms: self.bwd_comms + rhs.bwd_comms,
        }
    }
}

impl AddAssign for Perf {
    fn add_assign(&mut self, rhs: Perf) {
        *self = *self + rhs;
    }
}

impl fmt::Display for Perf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Perf(total = {:.4} ms, fwd = {:.4}+{:.4}, bwd = {:.4}+{:.4})",
            self.total(),
            self.fwd_compute,
            self.fwd_comms,
            self.bwd_compute,
            self.bwd_comms
        )
    }
}
