//! Optional post-search pass that grows UVM cache ratios.
//!
//! For every table on `BatchedFusedUvmCaching`, binary-search the largest
//! cached percentage (from its current ratio up to 100) that still partitions.
//! Each probe re-estimates the table and re-partitions the whole plan.

use shardplan_core::config::PlannerConfig;
use shardplan_core::error::{Error, Result};
use shardplan_core::option::ShardingOption;
use shardplan_core::sharding::EmbeddingComputeKernel;
use shardplan_core::topology::Topology;

use crate::estimators::{EmbeddingPerfEstimator, EmbeddingStorageEstimator, ShardEstimator};
use crate::partitioner::{GreedyPartitioner, PartitionError};
use crate::utils::BinarySearchPredicate;

pub struct CacheScaleup<'a> {
    topology: &'a Topology,
    config: &'a PlannerConfig,
}

impl<'a> CacheScaleup<'a> {
    pub fn new(topology: &'a Topology, config: &'a PlannerConfig) -> Self {
        Self { topology, config }
    }

    /// Returns `plan` unchanged when no caching table can grow.
    pub fn run(&self, plan: Vec<ShardingOption>) -> Result<Vec<ShardingOption>> {
        let storage = EmbeddingStorageEstimator::new(self.topology, self.config);
        let perf = EmbeddingPerfEstimator::new(self.topology, self.config);
        let partitioner = GreedyPartitioner::new(self.topology);

        let mut current = plan;
        for i in 0..current.len() {
            if current[i].compute_kernel != EmbeddingComputeKernel::BatchedFusedUvmCaching {
                continue;
            }
            let start_ratio = current[i].caching_ratio.unwrap_or(self.config.caching_ratio);
            let start = (start_ratio * 100.0).round() as i64;
            let mut search = BinarySearchPredicate::new(start, 100, 1);
            let mut accepted: Option<Vec<ShardingOption>> = None;
            let mut prior = true;

            while let Some(pct) = search.next(prior) {
                let mut candidate = current.clone();
                candidate[i].caching_ratio = Some(pct as f64 / 100.0);
                storage.estimate_option(&mut candidate[i])?;
                perf.estimate_option(&mut candidate[i])?;
                prior = match partitioner.partition(&candidate) {
                    Ok(outcome) => {
                        accepted = Some(outcome.options);
                        true
                    }
                    Err(PartitionError::Infeasible(_)) => false,
                    Err(PartitionError::Ledger(e)) => return Err(Error::Invariant(e.to_string())),
                };
            }

            if let (Some(options), Some(pct)) = (accepted, search.best()) {
                tracing::debug!(table = %options[i].name, from = start, to = pct, "uvm cache scaled up");
                current = options;
            }
        }
        Ok(current)
    }
}
