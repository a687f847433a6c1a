//! Final planner output consumed by the sharding / execution layer.
//!
//! Shape contract: for every partitioned parameter the `sharding_spec`
//! entries are contiguous, non-overlapping, and tile the table exactly.
//! Data-parallel parameters list one full-size replica per rank.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hash::{fingerprint, Hash256};
use crate::sharding::{EmbeddingComputeKernel, ShardingType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardMetadata {
    pub shard_offsets: [u64; 2],
    pub shard_sizes: [u64; 2],
    /// e.g. `rank:2/cuda:2`
    pub placement: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSharding {
    pub sharding_type: ShardingType,
    pub compute_kernel: EmbeddingComputeKernel,
    /// Rank of every shard, in `sharding_spec` order.
    pub ranks: Vec<usize>,
    pub sharding_spec: Vec<ShardMetadata>,
}

impl ParameterSharding {
    /// Whether the non-empty shards tile a `[rows, cols]` table exactly once.
    pub fn tiles(&self, shape: [u64; 2]) -> bool {
        let blocks: Vec<&ShardMetadata> = self
            .sharding_spec
            .iter()
            .filter(|m| m.shard_sizes[0] > 0 && m.shard_sizes[1] > 0)
            .collect();

        let in_bounds = blocks.iter().all(|m| {
            m.shard_offsets[0] + m.shard_sizes[0] <= shape[0]
                && m.shard_offsets[1] + m.shard_sizes[1] <= shape[1]
        });
        if !in_bounds {
            return false;
        }

        let area: u128 = blocks
            .iter()
            .map(|m| m.shard_sizes[0] as u128 * m.shard_sizes[1] as u128)
            .sum();
        if area != shape[0] as u128 * shape[1] as u128 {
            return false;
        }

        // Equal area plus no pairwise overlap means exact coverage.
        for (i, a) in blocks.iter().enumerate() {
            for b in &blocks[i + 1..] {
                if overlaps(a, b) {
                    return false;
                }
            }
        }
        true
    }
}

fn overlaps(a: &ShardMetadata, b: &ShardMetadata) -> bool {
    (0..2).all(|d| {
        let a_end = a.shard_offsets[d] + a.shard_sizes[d];
        let b_end = b.shard_offsets[d] + b.shard_sizes[d];
        a.shard_offsets[d] < b_end && b.shard_offsets[d] < a_end
    })
}

/// Table name → sharding, for one module.
pub type ModuleShardingPlan = BTreeMap<String, ParameterSharding>;

/// Module path → per-table sharding. Ordered maps keep serialization stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardingPlan {
    pub plan: BTreeMap<String, ModuleShardingPlan>,
}

impl ShardingPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no parameter is planned.
    pub fn is_empty(&self) -> bool {
        self.plan.values().all(|m| m.is_empty())
    }

    pub fn num_parameters(&self) -> usize {
        self.plan.values().map(|m| m.len()).sum()
    }

    pub fn get_plan_for_module(&self, module_path: &str) -> Option<&ModuleShardingPlan> {
        self.plan.get(module_path)
    }

    pub fn parameter(&self, module_path: &str, table: &str) -> Option<&ParameterSharding> {
        self.plan.get(module_path)?.get(table)
    }

    pub fn iter_parameters(&self) -> impl Iterator<Item = (&str, &str, &ParameterSharding)> {
        self.plan.iter().flat_map(|(module, params)| {
            params
                .iter()
                .map(move |(name, ps)| (module.as_str(), name.as_str(), ps))
        })
    }

    /// Add one parameter; a table may only be planned once per module.
    pub fn insert(
        &mut self,
        module_path: &str,
        table: &str,
        sharding: ParameterSharding,
    ) -> Result<()> {
        let module = self.plan.entry(module_path.to_string()).or_default();
        if module.contains_key(table) {
            return Err(Error::DuplicateTable(table.to_string()));
        }
        module.insert(table.to_string(), sharding);
        Ok(())
    }

    /// Fold another plan into this one (used by heterogeneous planning).
    pub fn merge(&mut self, other: ShardingPlan) -> Result<()> {
        for (module, params) in other.plan {
            for (table, sharding) in params {
                self.insert(&module, &table, sharding)?;
            }
        }
        Ok(())
    }

    /// Stable content hash; identical plans have identical fingerprints.
    pub fn fingerprint(&self) -> Result<Hash256> {
        fingerprint(self)
    }
}

impl fmt::Display for ShardingPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (module, table, ps) in self.iter_parameters() {
            let path = if module.is_empty() {
                table.to_string()
            } else {
                format!("{module}.{table}")
            };
            writeln!(
                f,
                "{path}: {} / {} on ranks {:?}",
                ps.sharding_type, ps.compute_kernel, ps.ranks
            )?;
        }
        Ok(())
    }
}
