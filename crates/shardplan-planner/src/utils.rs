//! Small helpers shared across planning stages.

use shardplan_core::option::ShardingOption;
use shardplan_core::sharding::ShardingType;
use shardplan_core::storage::Storage;
use shardplan_core::topology::ComputeDevice;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
const MIB: f64 = 1024.0 * 1024.0;

pub fn bytes_to_gb(num_bytes: u64) -> f64 {
    num_bytes as f64 / GIB
}

pub fn bytes_to_mb(num_bytes: u64) -> f64 {
    num_bytes as f64 / MIB
}

/// Truncates toward zero.
pub fn gb_to_bytes(gb: f64) -> u64 {
    (gb * GIB) as u64
}

/// Product of an iterator of dimensions; 1 for an empty one.
pub fn prod(dims: impl IntoIterator<Item = u64>) -> u64 {
    dims.into_iter().product()
}

/// Device string for a rank, e.g. `rank:3/cuda:1` or `rank:0/cpu`.
pub fn placement(compute_device: ComputeDevice, rank: usize, local_size: usize) -> String {
    if compute_device.is_accelerator() && local_size > 0 {
        format!("rank:{rank}/{compute_device}:{}", rank % local_size)
    } else {
        format!("rank:{rank}/{compute_device}")
    }
}

pub fn storage_repr_in_gb(storage: Option<&Storage>) -> String {
    match storage {
        None => String::new(),
        Some(s) => format!(
            "Storage(hbm = {:.3} GB, ddr = {:.3} GB)",
            bytes_to_gb(s.hbm),
            bytes_to_gb(s.ddr)
        ),
    }
}

/// Clear placements so a proposal can be partitioned again.
pub fn reset_shard_rank(proposal: &mut [ShardingOption]) {
    for option in proposal {
        for shard in &mut option.shards {
            shard.rank = None;
        }
    }
}

/// Load measure used by [`find_imbalance_tables`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImbalanceTarget {
    Perf,
    Hbm,
}

/// Tables that sit on every most-loaded rank, heaviest first.
///
/// Data-parallel and row-wise tables load all ranks evenly and are never
/// reported. A single-rank plan has no imbalance.
pub fn find_imbalance_tables(
    options: &[ShardingOption],
    target: ImbalanceTarget,
) -> Vec<&ShardingOption> {
    let mut load: std::collections::BTreeMap<usize, f64> = Default::default();
    for option in options {
        for shard in &option.shards {
            let Some(rank) = shard.rank else { continue };
            *load.entry(rank).or_default() += shard_load(shard, target);
        }
    }
    if load.len() <= 1 {
        return Vec::new();
    }

    let max = load.values().copied().fold(f64::MIN, f64::max);
    let hot: Vec<usize> = load
        .iter()
        .filter(|(_, v)| **v == max)
        .map(|(r, _)| *r)
        .collect();

    let mut out: Vec<&ShardingOption> = options
        .iter()
        .filter(|o| {
            !matches!(o.sharding_type, ShardingType::DataParallel | ShardingType::RowWise)
        })
        .filter(|o| {
            let ranks = o.ranks();
            hot.iter().all(|r| ranks.contains(r))
        })
        .collect();

    let first_shard_load = |o: &ShardingOption| {
        o.shards.first().map_or(0.0, |s| shard_load(s, target))
    };
    out.sort_by(|a, b| first_shard_load(b).total_cmp(&first_shard_load(a)));
    out
}

fn shard_load(shard: &shardplan_core::option::Shard, target: ImbalanceTarget) -> f64 {
    match target {
        ImbalanceTarget::Perf => shard.perf.total(),
        ImbalanceTarget::Hbm => shard.storage.hbm as f64,
    }
}

/// Probes integers in `[left, right]` to find the largest `x` for which an
/// external step predicate holds (true up to some point, false after).
///
/// The search stops once fewer than `tolerance` candidates remain, counting
/// both bounds, so a tolerance of 1 always reaches the exact boundary.
#[derive(Debug, Clone)]
pub struct BinarySearchPredicate {
    left: i64,
    right: i64,
    tolerance: i64,
    first: bool,
    last_probe: Option<i64>,
    best: Option<i64>,
}

impl BinarySearchPredicate {
    pub fn new(left: i64, right: i64, tolerance: i64) -> Self {
        Self {
            left,
            right,
            tolerance,
            first: true,
            last_probe: None,
            best: None,
        }
    }

    /// Next value to probe given the result of the previous probe (ignored on
    /// the first call). `None` once the range is exhausted.
    pub fn next(&mut self, prior_result: bool) -> Option<i64> {
        if self.first {
            self.first = false;
        } else if let Some(mid) = self.last_probe {
            if prior_result {
                self.best = Some(mid);
                self.left = mid + 1;
            } else {
                self.right = mid - 1;
            }
        }
        if self.remaining() < self.tolerance {
            self.last_probe = None;
            return None;
        }
        let mid = self.left + (self.right - self.left) / 2;
        self.last_probe = Some(mid);
        Some(mid)
    }

    /// Largest probe the predicate accepted so far.
    pub fn best(&self) -> Option<i64> {
        self.best
    }

    fn remaining(&self) -> i64 {
        self.right - self.left + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardplan_core::option::Shard;
    use shardplan_core::sharding::{EmbeddingComputeKernel, PartitionByType};
    use shardplan_core::storage::Perf;
    use shardplan_core::table::DataType;

    #[test]
    fn test_unit_conversions() {
        assert_eq!(bytes_to_gb(1 << 30), 1.0);
        assert_eq!(bytes_to_mb(3 << 20), 3.0);
        assert_eq!(gb_to_bytes(2.0), 2 << 30);
        assert_eq!(prod([3, 4, 5]), 60);
        assert_eq!(prod(std::iter::empty()), 1);
    }

    #[test]
    fn test_placement_strings() {
        assert_eq!(placement(ComputeDevice::Cuda, 5, 4), "rank:5/cuda:1");
        assert_eq!(placement(ComputeDevice::Mtia, 2, 8), "rank:2/mtia:2");
        assert_eq!(placement(ComputeDevice::Cpu, 3, 4), "rank:3/cpu");
    }

    #[test]
    fn test_storage_repr() {
        assert_eq!(storage_repr_in_gb(None), "");
        assert_eq!(
            storage_repr_in_gb(Some(&Storage::new(1 << 30, 1 << 29))),
            "Storage(hbm = 1.000 GB, ddr = 0.500 GB)"
        );
    }

    #[test]
    fn test_binary_search_finds_boundary() {
        let mut search = BinarySearchPredicate::new(0, 100, 1);
        let mut probes = Vec::new();
        let mut prior = true;
        while let Some(x) = search.next(prior) {
            probes.push(x);
            prior = x <= 42;
        }
        assert_eq!(probes, vec![50, 24, 37, 43, 40, 41, 42]);
        assert_eq!(search.best(), Some(42));
        // ceil(log2(100)) + 1
        assert!(probes.len() <= 8);
    }

    #[test]
    fn test_binary_search_all_false_and_tolerance() {
        let mut search = BinarySearchPredicate::new(0, 10, 1);
        let mut prior = true;
        while let Some(_) = search.next(prior) {
            prior = false;
        }
        assert_eq!(search.best(), None);

        let mut coarse = BinarySearchPredicate::new(0, 100, 20);
        let mut probes = 0;
        let mut prior = true;
        while let Some(x) = coarse.next(prior) {
            probes += 1;
            prior = x <= 42;
        }
        assert!(probes < 7);
    }

    fn placed(name: &str, st: ShardingType, ranks: &[usize], perf: f64) -> ShardingOption {
        let shards = ranks
            .iter()
            .map(|r| {
                let mut s = Shard::new([0, 0], [10, 4]);
                s.rank = Some(*r);
                s.perf = Perf {
                    fwd_compute: perf,
                    ..Perf::zero()
                };
                s.storage = Storage::new(perf as u64, 0);
                s
            })
            .collect();
        ShardingOption {
            name: name.into(),
            tensor_shape: [10, 4],
            data_type: DataType::Fp32,
            is_pooled: true,
            sharding_type: st,
            compute_kernel: EmbeddingComputeKernel::Dense,
            partition_by: st.partition_by(),
            pooling_factors: vec![1.0],
            caching_ratio: None,
            shards,
        }
    }

    #[test]
    fn test_find_imbalance_tables() {
        let options = vec![
            placed("a", ShardingType::TableWise, &[0], 5.0),
            placed("b", ShardingType::TableWise, &[0], 7.0),
            placed("c", ShardingType::TableWise, &[1], 3.0),
            placed("dp", ShardingType::DataParallel, &[0, 1], 1.0),
        ];
        let names: Vec<&str> = find_imbalance_tables(&options, ImbalanceTarget::Perf)
            .iter()
            .map(|o| o.name.as_str())
            .collect();
        assert_eq!(names, vec!["b", "a"]);

        let hbm = find_imbalance_tables(&options, ImbalanceTarget::Hbm);
        assert_eq!(hbm[0].name, "b");
        assert_eq!(hbm[0].partition_by, PartitionByType::Device);
    }

    #[test]
    fn test_find_imbalance_single_rank() {
        let options = vec![placed("a", ShardingType::TableWise, &[0], 5.0)];
        assert!(find_imbalance_tables(&options, ImbalanceTarget::Perf).is_empty());
    }

    #[test]
    fn test_reset_shard_rank() {
        let mut options = vec![placed("a", ShardingType::TableWise, &[0], 1.0)];
        reset_shard_rank(&mut options);
        assert!(!options[0].is_placed());
    }
}
