//! Per-rank load attribution: which tables put how much on each rank.
//!
//! The ledger enforces totals; this keeps the breakdown the search and the
//! failure diagnostics need to name the tables behind a hot rank.

use serde::{Deserialize, Serialize};
use shardplan_core::storage::{MemoryTier, Storage};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub table: String,
    pub storage: Storage,
    pub perf: f64,
}

#[derive(Debug, Clone, Default)]
pub struct LoadTracker {
    per_rank: Vec<Vec<Contribution>>,
}

impl LoadTracker {
    pub fn new(world_size: usize) -> Self {
        Self {
            per_rank: vec![Vec::new(); world_size],
        }
    }

    /// Attribute `storage`/`perf` on `rank` to `table`. Repeat records for the
    /// same table accumulate into one entry.
    pub fn record(&mut self, rank: usize, table: &str, storage: Storage, perf: f64) {
        let Some(entries) = self.per_rank.get_mut(rank) else {
            return;
        };
        match entries.iter_mut().find(|c| c.table == table) {
            Some(c) => {
                c.storage += storage;
                c.perf += perf;
            }
            None => entries.push(Contribution {
                table: table.to_string(),
                storage,
                perf,
            }),
        }
        tracing::trace!(rank, table, hbm = storage.hbm, ddr = storage.ddr, perf, "load recorded");
    }

    /// Undo a `record`. Entries that drop to nothing are removed.
    pub fn remove(&mut self, rank: usize, table: &str, storage: Storage, perf: f64) {
        let Some(entries) = self.per_rank.get_mut(rank) else {
            return;
        };
        if let Some(pos) = entries.iter().position(|c| c.table == table) {
            let c = &mut entries[pos];
            c.storage = c.storage.saturating_sub(storage);
            c.perf = (c.perf - perf).max(0.0);
            if c.storage.is_zero() && c.perf == 0.0 {
                entries.remove(pos);
            }
        }
    }

    pub fn on_rank(&self, rank: usize) -> &[Contribution] {
        self.per_rank.get(rank).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Tables on `rank` ordered by bytes in `tier`, largest first.
    pub fn heaviest_by_storage(&self, rank: usize, tier: MemoryTier) -> Vec<(String, u64)> {
        let mut out: Vec<(String, u64)> = self
            .on_rank(rank)
            .iter()
            .map(|c| (c.table.clone(), c.storage.get(tier)))
            .collect();
        out.sort_by(|a, b| b.1.cmp(&a.1));
        out
    }

    /// Tables on `rank` ordered by modeled time, largest first.
    pub fn heaviest_by_perf(&self, rank: usize) -> Vec<(String, f64)> {
        let mut out: Vec<(String, f64)> = self
            .on_rank(rank)
            .iter()
            .map(|c| (c.table.clone(), c.perf))
            .collect();
        out.sort_by(|a, b| b.1.total_cmp(&a.1));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_accumulates_per_table() {
        let mut t = LoadTracker::new(2);
        t.record(0, "a", Storage::new(10, 0), 1.0);
        t.record(0, "a", Storage::new(5, 0), 0.5);
        t.record(0, "b", Storage::new(20, 0), 0.1);
        assert_eq!(t.on_rank(0).len(), 2);
        assert_eq!(
            t.heaviest_by_storage(0, MemoryTier::Hbm),
            vec![("b".to_string(), 20), ("a".to_string(), 15)]
        );
        assert_eq!(t.heaviest_by_perf(0)[0].0, "a");
        assert!(t.on_rank(1).is_empty());
    }

    #[test]
    fn test_remove_drops_empty_entries() {
        let mut t = LoadTracker::new(1);
        t.record(0, "a", Storage::new(10, 0), 1.0);
        t.remove(0, "a", Storage::new(10, 0), 1.0);
        assert!(t.on_rank(0).is_empty());
    }

    #[test]
    fn test_out_of_range_rank_is_ignored() {
        let mut t = LoadTracker::new(1);
        t.record(3, "a", Storage::new(1, 1), 1.0);
        assert!(t.on_rank(3).is_empty());
    }
}
