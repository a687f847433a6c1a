//! Hand-written sharding plans.
//!
//! Used when a deployment pins layouts explicitly (for example an inference
//! fleet split between CPU and GPU hosts) instead of running the search.

use std::collections::BTreeMap;

use shardplan_core::error::{Error, Result};
use shardplan_core::plan::{ModuleShardingPlan, ParameterSharding, ShardMetadata};
use shardplan_core::sharding::{EmbeddingComputeKernel, ShardingType};
use shardplan_core::table::EmbeddingTable;
use shardplan_core::topology::Topology;

use crate::enumerator::calculate_shard_sizes_and_offsets;
use crate::utils::placement;

#[derive(Debug, Clone, PartialEq)]
pub enum ManualLayout {
    DataParallel,
    TableWise { rank: usize },
    /// Explicit per-rank row counts, or an even ceil-division split.
    RowWise { sizes: Option<Vec<u64>> },
    ColumnWise { ranks: Vec<usize> },
    TableRowWise { host: usize },
    TableColumnWise { ranks: Vec<usize> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ManualSharding {
    pub layout: ManualLayout,
    pub compute_kernel: Option<EmbeddingComputeKernel>,
}

impl ManualSharding {
    fn of(layout: ManualLayout) -> Self {
        Self {
            layout,
            compute_kernel: None,
        }
    }

    pub fn data_parallel() -> Self {
        Self::of(ManualLayout::DataParallel)
    }

    pub fn table_wise(rank: usize) -> Self {
        Self::of(ManualLayout::TableWise { rank })
    }

    pub fn row_wise(sizes: Option<Vec<u64>>) -> Self {
        Self::of(ManualLayout::RowWise { sizes })
    }

    pub fn column_wise(ranks: Vec<usize>) -> Self {
        Self::of(ManualLayout::ColumnWise { ranks })
    }

    pub fn table_row_wise(host: usize) -> Self {
        Self::of(ManualLayout::TableRowWise { host })
    }

    pub fn table_column_wise(ranks: Vec<usize>) -> Self {
        Self::of(ManualLayout::TableColumnWise { ranks })
    }

    pub fn with_compute_kernel(mut self, kernel: EmbeddingComputeKernel) -> Self {
        self.compute_kernel = Some(kernel);
        self
    }

    pub fn sharding_type(&self) -> ShardingType {
        match self.layout {
            ManualLayout::DataParallel => ShardingType::DataParallel,
            ManualLayout::TableWise { .. } => ShardingType::TableWise,
            ManualLayout::RowWise { .. } => ShardingType::RowWise,
            ManualLayout::ColumnWise { .. } => ShardingType::ColumnWise,
            ManualLayout::TableRowWise { .. } => ShardingType::TableRowWise,
            ManualLayout::TableColumnWise { .. } => ShardingType::TableColumnWise,
        }
    }

    fn kernel_for(&self, table: &EmbeddingTable) -> EmbeddingComputeKernel {
        self.compute_kernel.unwrap_or(if table.data_type.is_integer() {
            EmbeddingComputeKernel::Quant
        } else if self.sharding_type() == ShardingType::DataParallel {
            EmbeddingComputeKernel::Dense
        } else {
            EmbeddingComputeKernel::BatchedFused
        })
    }

    /// Concrete shard layout of `table` on `topology`.
    pub fn build(&self, table: &EmbeddingTable, topology: &Topology) -> Result<ParameterSharding> {
        table.validate()?;
        let invalid = |reason: String| Error::Config(format!("table '{}': {reason}", table.name));
        let world = topology.world_size();
        let local = topology.local_world_size();
        let shape = [table.num_embeddings, table.embedding_dim];
        let check_rank = |rank: usize| {
            if rank < world {
                Ok(rank)
            } else {
                Err(invalid(format!("rank {rank} outside world_size {world}")))
            }
        };

        let blocks: Vec<([u64; 2], [u64; 2], usize)> = match &self.layout {
            ManualLayout::DataParallel => (0..world).map(|r| ([0, 0], shape, r)).collect(),
            ManualLayout::TableWise { rank } => vec![([0, 0], shape, check_rank(*rank)?)],
            ManualLayout::RowWise { sizes: None } => {
                calculate_shard_sizes_and_offsets(ShardingType::RowWise, shape, world, local, 1)
                    .into_iter()
                    .zip(0..world)
                    .map(|((o, s), r)| (o, s, r))
                    .collect()
            }
            ManualLayout::RowWise { sizes: Some(sizes) } => {
                if sizes.len() != world {
                    return Err(invalid(format!(
                        "{} row sizes given for world_size {world}",
                        sizes.len()
                    )));
                }
                let total: u128 = sizes.iter().map(|&r| r as u128).sum();
                if total != table.num_embeddings as u128 {
                    return Err(invalid(format!(
                        "row sizes sum to {total}, table has {} rows",
                        table.num_embeddings
                    )));
                }
                let mut offset = 0;
                sizes
                    .iter()
                    .enumerate()
                    .map(|(rank, &rows)| {
                        let block = ([offset, 0], [rows, shape[1]], rank);
                        offset += rows;
                        block
                    })
                    .collect()
            }
            ManualLayout::ColumnWise { ranks } | ManualLayout::TableColumnWise { ranks } => {
                if ranks.is_empty() || ranks.len() as u64 > shape[1] {
                    return Err(invalid(format!(
                        "cannot split {} columns over {} ranks",
                        shape[1],
                        ranks.len()
                    )));
                }
                if let ManualLayout::TableColumnWise { .. } = self.layout {
                    let host = topology.host_of(ranks[0]);
                    if ranks.iter().any(|&r| topology.host_of(r) != host) {
                        return Err(invalid("table-column-wise ranks span hosts".into()));
                    }
                }
                let n = ranks.len() as u64;
                let (base, extra) = (shape[1] / n, shape[1] % n);
                let mut offset = 0;
                let mut out = Vec::with_capacity(ranks.len());
                for (i, &rank) in ranks.iter().enumerate() {
                    let cols = base + u64::from((i as u64) < extra);
                    out.push(([0, offset], [shape[0], cols], check_rank(rank)?));
                    offset += cols;
                }
                out
            }
            ManualLayout::TableRowWise { host } => {
                if *host >= topology.num_hosts() {
                    return Err(invalid(format!(
                        "host {host} outside {} hosts",
                        topology.num_hosts()
                    )));
                }
                calculate_shard_sizes_and_offsets(ShardingType::TableRowWise, shape, world, local, 1)
                    .into_iter()
                    .zip(topology.ranks_of_host(*host))
                    .map(|((o, s), r)| (o, s, r))
                    .collect()
            }
        };

        let device = topology.compute_device();
        let sharding = ParameterSharding {
            sharding_type: self.sharding_type(),
            compute_kernel: self.kernel_for(table),
            ranks: blocks.iter().map(|b| b.2).collect(),
            sharding_spec: blocks
                .iter()
                .map(|&(offsets, sizes, rank)| ShardMetadata {
                    shard_offsets: offsets,
                    shard_sizes: sizes,
                    placement: placement(device, rank, local),
                })
                .collect(),
        };
        if sharding.sharding_type.is_partitioned() && !sharding.tiles(shape) {
            return Err(Error::Invariant(format!(
                "manual layout for '{}' does not tile the table",
                table.name
            )));
        }
        Ok(sharding)
    }
}

/// Build a module plan from explicit per-table layouts. Tables without an
/// entry are left out; entries for undeclared tables are rejected.
pub fn construct_module_sharding_plan(
    tables: &[EmbeddingTable],
    per_param: &BTreeMap<String, ManualSharding>,
    topology: &Topology,
) -> Result<ModuleShardingPlan> {
    topology.validate()?;
    if let Some(unknown) = per_param
        .keys()
        .find(|name| !tables.iter().any(|t| &t.name == *name))
    {
        return Err(Error::UnknownConstraintTable(unknown.clone()));
    }
    let mut plan = ModuleShardingPlan::new();
    for table in tables {
        if let Some(manual) = per_param.get(&table.name) {
            if plan.insert(table.name.clone(), manual.build(table, topology)?).is_some() {
                return Err(Error::DuplicateTable(table.name.clone()));
            }
        }
    }
    Ok(plan)
}
