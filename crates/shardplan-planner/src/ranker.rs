//! Orders each table's estimated options from cheapest to most expensive.
//!
//! `GreedyProposer` consumes a `RankStack` with `bulk_pop` and `pop`.
//! Callers may prune or re-add options with `remove` and `bulk_push` before
//! handing the stack to the search.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use shardplan_core::option::ShardingOption;

/// Ranking key: total perf, then table name, sharding type, kernel.
pub fn rank_order(a: &ShardingOption, b: &ShardingOption) -> Ordering {
    a.total_perf()
        .total_cmp(&b.total_perf())
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.sharding_type.as_str().cmp(b.sharding_type.as_str()))
        .then_with(|| a.compute_kernel.as_str().cmp(b.compute_kernel.as_str()))
}

/// Per-table stacks with the cheapest remaining option on top.
#[derive(Debug, Clone, Default)]
pub struct RankStack {
    /// Table order as given to the ranker.
    tables: Vec<String>,
    index: BTreeMap<String, usize>,
    /// Sorted most expensive first so `Vec::pop` yields the cheapest.
    stacks: Vec<Vec<ShardingOption>>,
}

impl RankStack {
    /// Cheapest remaining option of every non-empty table, in table order.
    pub fn bulk_pop(&mut self) -> Vec<ShardingOption> {
        self.stacks.iter_mut().filter_map(Vec::pop).collect()
    }

    pub fn pop(&mut self, table: &str) -> Option<ShardingOption> {
        let i = *self.index.get(table)?;
        self.stacks[i].pop()
    }

    /// Put an option back on its table's stack, keeping the stack sorted.
    /// Options of unknown tables are ignored.
    pub fn push(&mut self, option: ShardingOption) {
        let Some(&i) = self.index.get(&option.name) else {
            return;
        };
        let stack = &mut self.stacks[i];
        let pos = stack.partition_point(|o| rank_order(o, &option) == Ordering::Greater);
        stack.insert(pos, option);
    }

    pub fn bulk_push(&mut self, options: impl IntoIterator<Item = ShardingOption>) {
        for option in options {
            self.push(option);
        }
    }

    /// Drop every copy of `option` (same table, type, and kernel).
    pub fn remove(&mut self, option: &ShardingOption) -> bool {
        let Some(&i) = self.index.get(&option.name) else {
            return false;
        };
        let before = self.stacks[i].len();
        self.stacks[i].retain(|o| {
            !(o.sharding_type == option.sharding_type && o.compute_kernel == option.compute_kernel)
        });
        before != self.stacks[i].len()
    }

    pub fn len(&self) -> usize {
        self.stacks.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Options left for one table.
    pub fn remaining(&self, table: &str) -> usize {
        self.index.get(table).map_or(0, |&i| self.stacks[i].len())
    }

    pub fn tables(&self) -> &[String] {
        &self.tables
    }
}

/// Ranks every table's options independently.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatRanker;

impl FlatRanker {
    /// `options` holds one list per table; lists are expected to be non-empty
    /// and share a table name.
    pub fn rank(&self, options: Vec<Vec<ShardingOption>>) -> RankStack {
        let mut stack = RankStack::default();
        for mut table_options in options {
            let Some(name) = table_options.first().map(|o| o.name.clone()) else {
                continue;
            };
            table_options.sort_by(|a, b| rank_order(b, a));
            stack.index.insert(name.clone(), stack.tables.len());
            stack.tables.push(name);
            stack.stacks.push(table_options);
        }
        stack
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardplan_core::config::PlannerConfig;
    use shardplan_core::constraints::ConstraintMap;
    use shardplan_core::sharding::{EmbeddingComputeKernel, ShardingType};
    use shardplan_core::table::EmbeddingTable;
    use shardplan_core::topology::{ComputeDevice, Topology};

    use crate::enumerator::EmbeddingEnumerator;
    use crate::estimators::{EmbeddingPerfEstimator, EmbeddingStorageEstimator, ShardEstimator};
    use crate::sharders::{EmbeddingBagCollectionSharder, Sharder};

    fn two_table_stack() -> RankStack {
        let topology = Topology::new(2, ComputeDevice::Cuda).unwrap();
        let config = PlannerConfig::default();
        let constraints = ConstraintMap::new();
        let tables = vec![
            EmbeddingTable::new("table_0", 100, 10, ["feature_0"]),
            EmbeddingTable::new("table_1", 100, 10, ["feature_1"]),
        ];
        let sharder = EmbeddingBagCollectionSharder::new();
        let sharders: Vec<&dyn Sharder> = vec![&sharder];
        let mut options = EmbeddingEnumerator::new(&topology, &config, &constraints)
            .enumerate(&tables, &sharders)
            .unwrap();
        for table_options in &mut options {
            EmbeddingStorageEstimator::new(&topology, &config)
                .estimate(table_options)
                .unwrap();
            EmbeddingPerfEstimator::new(&topology, &config)
                .estimate(table_options)
                .unwrap();
        }
        FlatRanker.rank(options)
    }

    #[test]
    fn test_cheapest_first() {
        let mut stack = two_table_stack();
        assert_eq!(stack.tables(), ["table_0", "table_1"]);
        let top = stack.bulk_pop();
        let labels: Vec<(String, ShardingType, EmbeddingComputeKernel)> = top
            .iter()
            .map(|o| (o.name.clone(), o.sharding_type, o.compute_kernel))
            .collect();
        assert_eq!(
            labels,
            vec![
                ("table_0".into(), ShardingType::DataParallel, EmbeddingComputeKernel::BatchedDense),
                ("table_1".into(), ShardingType::DataParallel, EmbeddingComputeKernel::BatchedDense),
            ]
        );
    }

    #[test]
    fn test_pop_drop_push_walks_each_table() {
        let mut stack = two_table_stack();
        let total = stack.len();
        let mut previous: Option<f64> = None;

        for _ in 0..5 {
            let mut candidates = stack.bulk_pop();
            assert_eq!(candidates.len(), 2);
            candidates.sort_by(rank_order);
            let drop = candidates.remove(0);
            if let Some(p) = previous {
                assert!(drop.total_perf() >= p);
            }
            previous = Some(drop.total_perf());
            assert!(!stack.remove(&drop));
            stack.bulk_push(candidates);
        }
        assert_eq!(stack.len(), total - 5);
    }

    #[test]
    fn test_remove_keeps_the_rest_sorted() {
        let mut stack = two_table_stack();
        let first = stack.pop("table_0").unwrap();
        stack.push(first.clone());
        assert!(stack.remove(&first));
        assert_eq!(stack.remaining("table_0") + 1, stack.remaining("table_1"));
        assert_eq!(stack.remaining("missing"), 0);

        let mut drained = Vec::new();
        while let Some(o) = stack.pop("table_1") {
            drained.push(o);
        }
        assert!(drained
            .windows(2)
            .all(|w| rank_order(&w[0], &w[1]) != Ordering::Greater));
        assert!(stack.pop("missing").is_none());
    }
}
