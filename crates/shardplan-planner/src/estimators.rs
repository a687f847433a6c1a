//! Per-shard cost models.
//!
//! `EmbeddingStorageEstimator` fills exact byte counts per memory tier.
//! `EmbeddingPerfEstimator` fills a modeled per-iteration time. Both are pure
//! functions of the option, the topology, and the config.

use shardplan_core::config::PlannerConfig;
use shardplan_core::constants::{
    BIGINT_DTYPE, BWD_COMPUTE_MULTIPLIER, OPTIMIZER_DTYPE, OUTPUT_DTYPE, QUANT_ROW_OVERHEAD,
};
use shardplan_core::error::{Error, Result};
use shardplan_core::option::{Shard, ShardingOption};
use shardplan_core::sharding::{EmbeddingComputeKernel, ShardingType};
use shardplan_core::storage::{Perf, Storage};
use shardplan_core::topology::Topology;

use crate::utils::prod;

/// Annotates shards of candidate options in place.
pub trait ShardEstimator {
    fn estimate_option(&self, option: &mut ShardingOption) -> Result<()>;

    fn estimate(&self, options: &mut [ShardingOption]) -> Result<()> {
        for option in options {
            self.estimate_option(option)?;
        }
        Ok(())
    }
}

pub struct EmbeddingStorageEstimator<'a> {
    topology: &'a Topology,
    config: &'a PlannerConfig,
}

impl<'a> EmbeddingStorageEstimator<'a> {
    pub fn new(topology: &'a Topology, config: &'a PlannerConfig) -> Self {
        Self { topology, config }
    }

    fn shard_storage(&self, option: &ShardingOption, shard: &Shard) -> Result<Storage> {
        if shard.is_empty() {
            return Ok(Storage::zero());
        }
        let rows = shard.rows() as u128;
        let elements = rows * shard.cols() as u128;
        let kernel = option.compute_kernel;

        let mut bytes = (elements * option.data_type.bits() as u128).div_ceil(8);
        if kernel == EmbeddingComputeKernel::Quant {
            bytes += rows * QUANT_ROW_OVERHEAD as u128;
        }
        if kernel.is_fused() && !self.config.is_inference {
            bytes += self.config.optimizer_buffers as u128 * elements * OPTIMIZER_DTYPE as u128;
        }
        let total = u64::try_from(bytes).map_err(|_| Error::InvalidTable {
            table: option.name.clone(),
            reason: format!("shard of {} elements overflows the byte counter", elements),
        })?;

        if !self.topology.compute_device().is_accelerator() {
            return Ok(Storage::new(0, total));
        }
        Ok(match kernel {
            EmbeddingComputeKernel::BatchedFusedUvm => Storage::new(0, total),
            EmbeddingComputeKernel::BatchedFusedUvmCaching => {
                let ratio = option.caching_ratio.unwrap_or(self.config.caching_ratio);
                let cached_rows = (rows as f64 * ratio).ceil().min(rows as f64) as u128;
                // Exact integer split; hbm + ddr == total.
                let hbm = (total as u128 * cached_rows).div_ceil(rows) as u64;
                Storage::new(hbm, total - hbm)
            }
            _ => Storage::new(total, 0),
        })
    }
}

impl ShardEstimator for EmbeddingStorageEstimator<'_> {
    fn estimate_option(&self, option: &mut ShardingOption) -> Result<()> {
        for i in 0..option.shards.len() {
            let storage = self.shard_storage(option, &option.shards[i])?;
            option.shards[i].storage = storage;
        }
        Ok(())
    }
}

pub struct EmbeddingPerfEstimator<'a> {
    topology: &'a Topology,
    config: &'a PlannerConfig,
}

impl<'a> EmbeddingPerfEstimator<'a> {
    pub fn new(topology: &'a Topology, config: &'a PlannerConfig) -> Self {
        Self { topology, config }
    }

    fn shard_perf(&self, option: &ShardingOption, shard: &Shard) -> Result<Perf> {
        if shard.is_empty() {
            return Ok(Perf::zero());
        }
        let topo = self.topology;
        let device = topo.compute_device();
        let kernel = option.compute_kernel;
        let ratio = option.caching_ratio.unwrap_or(self.config.caching_ratio);
        let kernel_bw = self.config.kernel_bw(device, kernel, ratio).ok_or_else(|| {
            Error::Invariant(format!("no lookup bandwidth for {kernel} on {device}"))
        })?;

        let b = topo.batch_size() as f64;
        let w = topo.world_size() as f64;
        let l = topo.local_world_size() as f64;
        let pf = option.pooling_factor_sum();
        let elem = option.data_type.bits() as f64 / 8.0;
        let cols = shard.cols() as f64;
        let row_frac = shard.rows() as f64 / option.num_embeddings().max(1) as f64;
        let comms_bw = topo.comms_bw();

        // (input ids, output activations) exchanged per shard.
        let traffic = |ids: f64| {
            let output = if option.is_pooled {
                b * w * cols * OUTPUT_DTYPE
            } else {
                ids * cols * OUTPUT_DTYPE
            };
            (ids * BIGINT_DTYPE, output)
        };

        let (ids, fwd_comms, bwd_comms) = match option.sharding_type {
            ShardingType::DataParallel => {
                let ids = b * pf;
                let replica = prod(shard.sizes) as f64 * elem;
                let allreduce = if topo.world_size() > 1 {
                    transfer_ms(replica * 2.0 * (w - 1.0) / w, comms_bw)
                } else {
                    0.0
                };
                (ids, 0.0, allreduce)
            }
            ShardingType::TableWise | ShardingType::ColumnWise | ShardingType::TableColumnWise => {
                let ids = b * w * pf;
                let (input, output) = traffic(ids);
                (
                    ids,
                    transfer_ms(input + output, comms_bw),
                    transfer_ms(output, comms_bw),
                )
            }
            ShardingType::RowWise => {
                let ids = b * w * pf * row_frac;
                let (input, output) = traffic(ids);
                (
                    ids,
                    transfer_ms(input + output, comms_bw),
                    transfer_ms(output, comms_bw),
                )
            }
            ShardingType::TableRowWise => {
                let ids = b * w * pf * row_frac;
                let (input, output) = traffic(ids);
                let intra = topo.intra_host_bw();
                let cross = if topo.spans_hosts() {
                    topo.inter_host_bw()
                } else {
                    intra
                };
                let cross_host = transfer_ms(output / l, cross);
                (
                    ids,
                    transfer_ms(input + output, intra) + cross_host,
                    transfer_ms(output, intra) + cross_host,
                )
            }
        };

        let fwd_compute = transfer_ms(ids * cols * elem, kernel_bw);
        let mut perf = Perf {
            fwd_compute,
            fwd_comms,
            bwd_compute: fwd_compute * BWD_COMPUTE_MULTIPLIER,
            bwd_comms,
        };
        if self.config.is_inference {
            perf.bwd_compute = 0.0;
            perf.bwd_comms = 0.0;
        }
        Ok(perf)
    }
}

impl ShardEstimator for EmbeddingPerfEstimator<'_> {
    fn estimate_option(&self, option: &mut ShardingOption) -> Result<()> {
        for i in 0..option.shards.len() {
            let perf = self.shard_perf(option, &option.shards[i])?;
            option.shards[i].perf = perf;
        }
        Ok(())
    }
}

/// Milliseconds to move `bytes` at `gbps` GB/s.
fn transfer_ms(bytes: f64, gbps: f64) -> f64 {
    if bytes <= 0.0 {
        0.0
    } else if gbps > 0.0 {
        bytes / (gbps * 1024.0 * 1024.0 * 1024.0 / 1000.0)
    } else {
        f64::INFINITY
    }
}
