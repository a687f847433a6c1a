//! Candidate generation: every admissible (sharding type, kernel) pair of every
//! table, with its shard layout. Costs are filled in later by the estimators.

use std::collections::BTreeSet;

use shardplan_core::config::PlannerConfig;
use shardplan_core::constraints::{ConstraintMap, ParameterConstraints};
use shardplan_core::error::{Error, Result};
use shardplan_core::option::{Shard, ShardingOption};
use shardplan_core::sharding::{EmbeddingComputeKernel, ShardingType};
use shardplan_core::table::EmbeddingTable;
use shardplan_core::topology::Topology;

use crate::sharders::Sharder;

pub struct EmbeddingEnumerator<'a> {
    topology: &'a Topology,
    config: &'a PlannerConfig,
    constraints: &'a ConstraintMap,
}

impl<'a> EmbeddingEnumerator<'a> {
    pub fn new(
        topology: &'a Topology,
        config: &'a PlannerConfig,
        constraints: &'a ConstraintMap,
    ) -> Self {
        Self {
            topology,
            config,
            constraints,
        }
    }

    /// One option list per table, in table order.
    ///
    /// Fails with `NoFeasibleSharding` as soon as a table has no option left
    /// after intersecting sharder support, constraints, and the topology.
    pub fn enumerate(
        &self,
        tables: &[EmbeddingTable],
        sharders: &[&dyn Sharder],
    ) -> Result<Vec<Vec<ShardingOption>>> {
        let claims: Vec<BTreeSet<String>> = sharders
            .iter()
            .map(|s| s.shardable_parameters(tables).into_iter().collect())
            .collect();

        let mut out = Vec::with_capacity(tables.len());
        for table in tables {
            let claimed_by = sharders
                .iter()
                .zip(&claims)
                .filter(|(_, names)| names.contains(&table.name))
                .map(|(s, _)| *s);
            let options = self.enumerate_table(table, claimed_by)?;
            tracing::debug!(table = %table.name, options = options.len(), "enumerated");
            out.push(options);
        }
        Ok(out)
    }

    fn enumerate_table<'s>(
        &self,
        table: &EmbeddingTable,
        sharders: impl Iterator<Item = &'s dyn Sharder>,
    ) -> Result<Vec<ShardingOption>> {
        let default_constraints = ParameterConstraints::default();
        let constraints = self
            .constraints
            .get(&table.name)
            .unwrap_or(&default_constraints);
        let device = self.topology.compute_device();
        let min_partition = constraints.min_partition.unwrap_or(self.config.min_cw_dim);
        let pooling_factors = constraints
            .pooling_factors
            .clone()
            .unwrap_or_else(|| vec![self.config.default_pooling_factor; table.num_features()]);

        let mut pairs: Vec<(ShardingType, EmbeddingComputeKernel)> = Vec::new();
        for sharder in sharders {
            for sharding_type in sharder.sharding_types(device) {
                if !constraints.allows_sharding_type(sharding_type)
                    || !self.admissible(table, sharding_type, min_partition)
                {
                    continue;
                }
                for kernel in sharder.compute_kernels(sharding_type, device) {
                    let caching_ratio = self.caching_ratio(constraints, kernel);
                    if !constraints.allows_compute_kernel(kernel)
                        || self
                            .config
                            .kernel_bw(device, kernel, caching_ratio.unwrap_or(0.0))
                            .is_none()
                        || pairs.contains(&(sharding_type, kernel))
                    {
                        continue;
                    }
                    pairs.push((sharding_type, kernel));
                }
            }
        }

        if pairs.is_empty() {
            return Err(Error::NoFeasibleSharding {
                table: table.name.clone(),
                reason: format!(
                    "no sharding type and compute kernel on {device} satisfies the sharders and constraints"
                ),
            });
        }

        let shape = [table.num_embeddings, table.embedding_dim];
        Ok(pairs
            .into_iter()
            .map(|(sharding_type, compute_kernel)| ShardingOption {
                name: table.name.clone(),
                tensor_shape: shape,
                data_type: table.data_type,
                is_pooled: table.is_pooled(),
                sharding_type,
                compute_kernel,
                partition_by: sharding_type.partition_by(),
                pooling_factors: pooling_factors.clone(),
                caching_ratio: self.caching_ratio(constraints, compute_kernel),
                shards: calculate_shard_sizes_and_offsets(
                    sharding_type,
                    shape,
                    self.topology.world_size(),
                    self.topology.local_world_size(),
                    min_partition,
                )
                .into_iter()
                .map(|(offsets, sizes)| Shard::new(offsets, sizes))
                .collect(),
            })
            .collect())
    }

    fn admissible(&self, table: &EmbeddingTable, t: ShardingType, min_partition: u64) -> bool {
        match t {
            ShardingType::ColumnWise | ShardingType::TableColumnWise => {
                table.embedding_dim >= min_partition
            }
            _ => true,
        }
    }

    fn caching_ratio(
        &self,
        constraints: &ParameterConstraints,
        kernel: EmbeddingComputeKernel,
    ) -> Option<f64> {
        (kernel == EmbeddingComputeKernel::BatchedFusedUvmCaching)
            .then(|| constraints.caching_ratio.unwrap_or(self.config.caching_ratio))
    }
}

/// `(offsets, sizes)` of every shard of a `[rows, cols]` table.
pub fn calculate_shard_sizes_and_offsets(
    sharding_type: ShardingType,
    shape: [u64; 2],
    world_size: usize,
    local_world_size: usize,
    min_partition: u64,
) -> Vec<([u64; 2], [u64; 2])> {
    let [rows, cols] = shape;
    match sharding_type {
        ShardingType::DataParallel => vec![([0, 0], shape); world_size],
        ShardingType::TableWise => vec![([0, 0], shape)],
        ShardingType::RowWise => row_blocks(rows, world_size as u64)
            .into_iter()
            .map(|(off, len)| ([off, 0], [len, cols]))
            .collect(),
        ShardingType::TableRowWise => row_blocks(rows, local_world_size as u64)
            .into_iter()
            .map(|(off, len)| ([off, 0], [len, cols]))
            .collect(),
        ShardingType::ColumnWise | ShardingType::TableColumnWise => {
            column_blocks(cols, min_partition)
                .into_iter()
                .map(|(off, len)| ([0, off], [rows, len]))
                .collect()
        }
    }
}

/// Ceil-division blocks; trailing blocks may be short or empty.
fn row_blocks(rows: u64, parts: u64) -> Vec<(u64, u64)> {
    let parts = parts.max(1);
    let block = rows.div_ceil(parts);
    (0..parts)
        .map(|i| {
            let start = (i * block).min(rows);
            (start, block.min(rows - start))
        })
        .collect()
}

/// `width`-wide blocks with the remainder folded into the last one.
fn column_blocks(cols: u64, width: u64) -> Vec<(u64, u64)> {
    let width = width.max(1);
    let n = (cols / width).max(1);
    (0..n)
        .map(|i| {
            let start = i * width;
            let len = if i + 1 == n { cols - start } else { width };
            (start, len)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sharders::{EmbeddingBagCollectionSharder, QuantEmbeddingBagCollectionSharder};
    use shardplan_core::topology::ComputeDevice;

    #[test]
    fn test_row_wise_uneven_split() {
        let shards = calculate_shard_sizes_and_offsets(ShardingType::RowWise, [17, 4], 2, 2, 32);
        assert_eq!(shards, vec![([0, 0], [9, 4]), ([9, 0], [8, 4])]);
    }

    #[test]
    fn test_row_wise_keeps_empty_trailing_blocks() {
        let shards = calculate_shard_sizes_and_offsets(ShardingType::RowWise, [5, 4], 4, 4, 32);
        let sizes: Vec<u64> = shards.iter().map(|(_, s)| s[0]).collect();
        assert_eq!(sizes, vec![2, 2, 1, 0]);
        assert_eq!(shards[3].0, [5, 0]);
    }

    #[test]
    fn test_table_row_wise_splits_over_host() {
        let shards =
            calculate_shard_sizes_and_offsets(ShardingType::TableRowWise, [100, 8], 8, 4, 32);
        assert_eq!(shards.len(), 4);
        assert!(shards.iter().all(|(_, s)| s[0] == 25));
    }

    #[test]
    fn test_column_blocks_fold_remainder() {
        let shards = calculate_shard_sizes_and_offsets(ShardingType::ColumnWise, [10, 100], 4, 4, 32);
        assert_eq!(
            shards,
            vec![([0, 0], [10, 32]), ([0, 32], [10, 32]), ([0, 64], [10, 36])]
        );
    }

    #[test]
    fn test_data_parallel_replicates() {
        let shards = calculate_shard_sizes_and_offsets(ShardingType::DataParallel, [10, 4], 3, 3, 32);
        assert_eq!(shards.len(), 3);
        assert!(shards.iter().all(|s| *s == ([0, 0], [10, 4])));
    }

    #[test]
    fn test_enumerate_respects_constraints_and_dim() {
        let topology = Topology::new(2, ComputeDevice::Cuda).unwrap();
        let config = PlannerConfig::default();
        let mut constraints = ConstraintMap::new();
        constraints.insert(
            "narrow".into(),
            ParameterConstraints::default()
                .with_compute_kernels([EmbeddingComputeKernel::BatchedFusedUvmCaching])
                .with_caching_ratio(0.5),
        );
        let tables = vec![
            EmbeddingTable::new("wide", 100, 64, ["a"]),
            EmbeddingTable::new("narrow", 100, 16, ["b", "c"]),
        ];
        let sharder = EmbeddingBagCollectionSharder::new();
        let sharders: Vec<&dyn Sharder> = vec![&sharder];
        let options = EmbeddingEnumerator::new(&topology, &config, &constraints)
            .enumerate(&tables, &sharders)
            .unwrap();

        // 2 data-parallel kernels + 5 partitioned types x 6 kernels
        assert_eq!(options[0].len(), 2 + 5 * 6);
        assert!(options[0].iter().all(|o| o.caching_ratio.is_none()
            || o.compute_kernel == EmbeddingComputeKernel::BatchedFusedUvmCaching));

        // Column-wise types drop out below the minimum width; data-parallel
        // has no caching kernel.
        let narrow = &options[1];
        assert_eq!(narrow.len(), 3);
        assert!(narrow.iter().all(|o| o.caching_ratio == Some(0.5)));
        assert!(narrow.iter().all(|o| o.pooling_factors == vec![1.0, 1.0]));
        assert!(!narrow
            .iter()
            .any(|o| o.sharding_type == ShardingType::ColumnWise));
    }

    #[test]
    fn test_enumerate_without_options_fails() {
        let topology = Topology::new(2, ComputeDevice::Cpu).unwrap();
        let config = PlannerConfig::default();
        let mut constraints = ConstraintMap::new();
        constraints.insert(
            "t".into(),
            ParameterConstraints::default().with_sharding_types([ShardingType::RowWise]),
        );
        let tables = vec![EmbeddingTable::new("t", 100, 8, ["a"])];
        let sharder = EmbeddingBagCollectionSharder::new();
        let sharders: Vec<&dyn Sharder> = vec![&sharder];
        let err = EmbeddingEnumerator::new(&topology, &config, &constraints)
            .enumerate(&tables, &sharders)
            .unwrap_err();
        assert!(matches!(err, Error::NoFeasibleSharding { ref table, .. } if table == "t"));
    }

    #[test]
    fn test_duplicate_pairs_across_sharders_collapse() {
        let topology = Topology::new(1, ComputeDevice::Cpu).unwrap();
        let config = PlannerConfig::default();
        let constraints = ConstraintMap::new();
        let tables = vec![EmbeddingTable::new("t", 10, 8, ["a"])];
        let a = EmbeddingBagCollectionSharder::new();
        let b = EmbeddingBagCollectionSharder::for_module("other");
        let q = QuantEmbeddingBagCollectionSharder::new();
        let sharders: Vec<&dyn Sharder> = vec![&a, &b, &q];
        let options = EmbeddingEnumerator::new(&topology, &config, &constraints)
            .enumerate(&tables, &sharders)
            .unwrap();
        // cpu: dp x 2 kernels + tw x 4 kernels; column-wise needs dim >= 32
        assert_eq!(options[0].len(), 6);
    }
}
