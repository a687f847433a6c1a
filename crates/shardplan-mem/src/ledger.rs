//! Per-rank capacity ledger.
//!
//! Every placement must go through `try_acquire` before it is recorded. A
//! request that would push any tier of a rank past its capacity is refused and
//! the ledger is left untouched, so partial state never leaks into a plan.

use serde::{Deserialize, Serialize};
use shardplan_core::storage::Storage;
use shardplan_core::topology::Topology;

use crate::error::{Error, Result};

/// Capacity, usage, and accumulated modeled time of one rank.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankBudget {
    pub capacity: Storage,
    pub used: Storage,
    /// Sum of the perf totals of every shard placed here.
    pub perf: f64,
}

impl RankBudget {
    pub fn new(capacity: Storage) -> Self {
        Self {
            capacity,
            used: Storage::zero(),
            perf: 0.0,
        }
    }

    pub fn remaining(&self) -> Storage {
        self.capacity.saturating_sub(self.used)
    }

    pub fn can_fit(&self, need: &Storage) -> bool {
        match self.used.checked_add(*need) {
            Some(next) => next.fits_in(&self.capacity),
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityLedger {
    ranks: Vec<RankBudget>,
}

impl CapacityLedger {
    pub fn new(capacities: impl IntoIterator<Item = Storage>) -> Self {
        Self {
            ranks: capacities.into_iter().map(RankBudget::new).collect(),
        }
    }

    pub fn from_topology(topology: &Topology) -> Self {
        Self::new(topology.capacities())
    }

    pub fn world_size(&self) -> usize {
        self.ranks.len()
    }

    fn budget(&self, rank: usize) -> Result<&RankBudget> {
        self.ranks.get(rank).ok_or(Error::UnknownRank {
            rank,
            world_size: self.ranks.len(),
        })
    }

    pub fn capacity(&self, rank: usize) -> Result<Storage> {
        Ok(self.budget(rank)?.capacity)
    }

    pub fn used(&self, rank: usize) -> Result<Storage> {
        Ok(self.budget(rank)?.used)
    }

    pub fn remaining(&self, rank: usize) -> Result<Storage> {
        Ok(self.budget(rank)?.remaining())
    }

    pub fn perf(&self, rank: usize) -> Result<f64> {
        Ok(self.budget(rank)?.perf)
    }

    /// Unknown ranks never fit.
    pub fn can_fit(&self, rank: usize, need: &Storage) -> bool {
        self.ranks.get(rank).is_some_and(|b| b.can_fit(need))
    }

    /// Reserve `storage` on `rank` and add `perf` to its load.
    ///
    /// On refusal nothing changes and the error carries the rank's
    /// capacity and current usage.
    pub fn try_acquire(&mut self, rank: usize, storage: Storage, perf: f64, tag: &str) -> Result<()> {
        let world_size = self.ranks.len();
        let budget = self
            .ranks
            .get_mut(rank)
            .ok_or(Error::UnknownRank { rank, world_size })?;
        if !budget.can_fit(&storage) {
            tracing::trace!(rank, tag, requested = %storage, used = %budget.used, "acquire refused");
            return Err(Error::BudgetExceeded {
                rank,
                tag: tag.to_string(),
                requested: storage,
                capacity: budget.capacity,
                used: budget.used,
            });
        }
        budget.used += storage;
        budget.perf += perf;
        tracing::trace!(rank, tag, used = %budget.used, perf = budget.perf, "acquired");
        Ok(())
    }

    /// Return a previous acquisition. Releasing more than is held is an error.
    pub fn release(&mut self, rank: usize, storage: Storage, perf: f64) -> Result<()> {
        let world_size = self.ranks.len();
        let budget = self
            .ranks
            .get_mut(rank)
            .ok_or(Error::UnknownRank { rank, world_size })?;
        budget.used = budget
            .used
            .checked_sub(storage)
            .ok_or(Error::ReleaseUnderflow {
                rank,
                released: storage,
                used: budget.used,
            })?;
        budget.perf = (budget.perf - perf).max(0.0);
        Ok(())
    }

    pub fn rank_perfs(&self) -> Vec<f64> {
        self.ranks.iter().map(|b| b.perf).collect()
    }

    pub fn rank_usage(&self) -> Vec<Storage> {
        self.ranks.iter().map(|b| b.used).collect()
    }

    pub fn budgets(&self) -> &[RankBudget] {
        &self.ranks
    }

    pub fn max_perf(&self) -> f64 {
        self.ranks.iter().map(|b| b.perf).fold(0.0, f64::max)
    }

    pub fn mean_perf(&self) -> f64 {
        if self.ranks.is_empty() {
            return 0.0;
        }
        self.ranks.iter().map(|b| b.perf).sum::<f64>() / self.ranks.len() as f64
    }

    /// Among `candidates`, the rank that can take `need` with the lowest
    /// accumulated perf. Ties go to the lowest rank id.
    pub fn least_loaded(
        &self,
        candidates: impl IntoIterator<Item = usize>,
        need: &Storage,
    ) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for rank in candidates {
            if !self.can_fit(rank, need) {
                continue;
            }
            let perf = self.ranks[rank].perf;
            best = match best {
                Some((r, p)) if p < perf || (p == perf && r < rank) => Some((r, p)),
                _ => Some((rank, perf)),
            };
        }
        best.map(|(r, _)| r)
    }
}
