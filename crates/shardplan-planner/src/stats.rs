//! Per-rank summary of a finished plan.

use std::fmt;

use serde::{Deserialize, Serialize};
use shardplan_core::option::ShardingOption;
use shardplan_core::storage::Storage;
use shardplan_core::topology::Topology;

use crate::utils::{bytes_to_gb, find_imbalance_tables, storage_repr_in_gb, ImbalanceTarget};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankStats {
    pub rank: usize,
    pub used: Storage,
    pub capacity: Storage,
    pub perf: f64,
    pub num_shards: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStats {
    pub ranks: Vec<RankStats>,
    pub max_perf: f64,
    pub mean_perf: f64,
    /// Tables sitting on the slowest rank(s), heaviest first.
    pub imbalance_tables: Vec<String>,
}

impl PlanStats {
    /// Build from placed options. Empty shards are not counted.
    pub fn from_options(options: &[ShardingOption], topology: &Topology) -> Self {
        let mut ranks: Vec<RankStats> = topology
            .devices()
            .iter()
            .map(|d| RankStats {
                rank: d.rank,
                used: Storage::zero(),
                capacity: d.storage,
                perf: 0.0,
                num_shards: 0,
            })
            .collect();
        for shard in options.iter().flat_map(|o| &o.shards) {
            let Some(stats) = shard.rank.and_then(|r| ranks.get_mut(r)) else {
                continue;
            };
            stats.used += shard.storage;
            stats.perf += shard.perf.total();
            if !shard.is_empty() {
                stats.num_shards += 1;
            }
        }

        let max_perf = ranks.iter().map(|r| r.perf).fold(0.0, f64::max);
        let mean_perf = if ranks.is_empty() {
            0.0
        } else {
            ranks.iter().map(|r| r.perf).sum::<f64>() / ranks.len() as f64
        };
        let imbalance_tables = find_imbalance_tables(options, ImbalanceTarget::Perf)
            .into_iter()
            .map(|o| o.name.clone())
            .collect();

        Self {
            ranks,
            max_perf,
            mean_perf,
            imbalance_tables,
        }
    }

    pub fn balance(&self) -> f64 {
        if self.mean_perf > 0.0 {
            self.max_perf / self.mean_perf
        } else {
            1.0
        }
    }

    pub fn total_used(&self) -> Storage {
        self.ranks.iter().map(|r| r.used).sum()
    }

    pub fn log(&self) {
        tracing::info!(
            ranks = self.ranks.len(),
            max_perf_ms = self.max_perf,
            balance = self.balance(),
            hbm_gb = bytes_to_gb(self.total_used().hbm),
            ddr_gb = bytes_to_gb(self.total_used().ddr),
            "sharding plan"
        );
        for line in self.to_string().lines() {
            tracing::info!("{line}");
        }
    }
}

impl fmt::Display for PlanStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>5} | {:>10} | {:>6} | storage", "rank", "perf (ms)", "shards")?;
        for r in &self.ranks {
            writeln!(
                f,
                "{:>5} | {:>10.4} | {:>6} | {} of {}",
                r.rank,
                r.perf,
                r.num_shards,
                storage_repr_in_gb(Some(&r.used)),
                storage_repr_in_gb(Some(&r.capacity))
            )?;
        }
        write!(
            f,
            "max {:.4} ms, mean {:.4} ms, balance {:.3}",
            self.max_perf,
            self.mean_perf,
            self.balance()
        )?;
        if !self.imbalance_tables.is_empty() {
            write!(f, ", hot tables: {}", self.imbalance_tables.join(", "))?;
        }
        Ok(())
    }
}
