//! Greedy placement of one candidate set onto ranks under hard capacity.
//!
//! Options are placed largest first (total storage desc, then name). Every
//! shard goes through the `CapacityLedger`, so an accepted placement never
//! exceeds a rank's capacity in any tier.

use shardplan_core::error::RankDeficit;
use shardplan_core::option::ShardingOption;
use shardplan_core::sharding::ShardingType;
use shardplan_core::storage::{MemoryTier, Storage};
use shardplan_core::topology::Topology;
use shardplan_mem::{CapacityLedger, LoadTracker};
use thiserror::Error;

use crate::utils::reset_shard_rank;

/// Why one candidate set could not be placed.
#[derive(Debug, Error)]
pub enum PartitionError {
    #[error("shard {} of table '{}' ({}) fits on no rank", .0.shard, .0.table, .0.required)]
    Infeasible(Box<InfeasibleCandidate>),

    #[error(transparent)]
    Ledger(#[from] shardplan_mem::Error),
}

pub type Result<T> = std::result::Result<T, PartitionError>;

/// Local failure report consumed by the proposer.
#[derive(Debug, Clone)]
pub struct InfeasibleCandidate {
    pub table: String,
    pub shard: usize,
    pub required: Storage,
    /// Shortfall on every rank the shard could have gone to.
    pub deficits: Vec<RankDeficit>,
    /// Per-rank usage at the moment of failure.
    pub usage: Vec<Storage>,
    /// What was already placed where at the moment of failure.
    pub loads: LoadTracker,
}

impl InfeasibleCandidate {
    /// Tier the failing shard ran out of; HBM when no deficit was recorded.
    pub fn tier(&self) -> MemoryTier {
        self.deficits.first().map_or(MemoryTier::Hbm, |d| d.tier)
    }
}

#[derive(Debug, Clone)]
pub struct PartitionOutcome {
    /// Input options with every shard's rank filled in, in input order.
    pub options: Vec<ShardingOption>,
    pub rank_perfs: Vec<f64>,
    pub rank_storage: Vec<Storage>,
    pub loads: LoadTracker,
}

impl PartitionOutcome {
    /// Objective: the slowest rank bounds the iteration.
    pub fn max_perf(&self) -> f64 {
        self.rank_perfs.iter().copied().fold(0.0, f64::max)
    }

    pub fn mean_perf(&self) -> f64 {
        if self.rank_perfs.is_empty() {
            return 0.0;
        }
        self.rank_perfs.iter().sum::<f64>() / self.rank_perfs.len() as f64
    }

    /// max / mean rank perf; 1.0 for an idle plan.
    pub fn balance(&self) -> f64 {
        let mean = self.mean_perf();
        if mean > 0.0 {
            self.max_perf() / mean
        } else {
            1.0
        }
    }
}

pub struct GreedyPartitioner<'a> {
    topology: &'a Topology,
}

impl<'a> GreedyPartitioner<'a> {
    pub fn new(topology: &'a Topology) -> Self {
        Self { topology }
    }

    pub fn partition(&self, proposal: &[ShardingOption]) -> Result<PartitionOutcome> {
        let mut options = proposal.to_vec();
        reset_shard_rank(&mut options);

        let mut order: Vec<usize> = (0..options.len()).collect();
        order.sort_by(|&a, &b| {
            options[b]
                .total_bytes()
                .cmp(&options[a].total_bytes())
                .then_with(|| options[a].name.cmp(&options[b].name))
        });

        let mut placement = Placement {
            topology: self.topology,
            ledger: CapacityLedger::from_topology(self.topology),
            loads: LoadTracker::new(self.topology.world_size()),
        };
        for idx in order {
            placement.place(&mut options[idx])?;
        }

        Ok(PartitionOutcome {
            options,
            rank_perfs: placement.ledger.rank_perfs(),
            rank_storage: placement.ledger.rank_usage(),
            loads: placement.loads,
        })
    }
}

struct Placement<'a> {
    topology: &'a Topology,
    ledger: CapacityLedger,
    loads: LoadTracker,
}

impl Placement<'_> {
    fn place(&mut self, option: &mut ShardingOption) -> Result<()> {
        let world = 0..self.topology.world_size();
        match option.sharding_type {
            ShardingType::DataParallel | ShardingType::RowWise => {
                for i in 0..option.shards.len() {
                    self.assign(option, i, i)?;
                }
            }
            ShardingType::TableWise | ShardingType::ColumnWise => {
                for i in 0..option.shards.len() {
                    let need = option.shards[i].storage;
                    let rank = self
                        .ledger
                        .least_loaded(world.clone(), &need)
                        .ok_or_else(|| self.infeasible(option, i, world.clone()))?;
                    self.assign(option, i, rank)?;
                }
            }
            ShardingType::TableColumnWise => self.place_on_one_host(option)?,
            ShardingType::TableRowWise => {
                let local = self.topology.local_world_size();
                let host = self
                    .hosts_by_load()
                    .into_iter()
                    .find(|&h| {
                        option
                            .shards
                            .iter()
                            .enumerate()
                            .all(|(i, s)| self.ledger.can_fit(h * local + i, &s.storage))
                    });
                let Some(host) = host else {
                    let host = self.hosts_by_load().first().copied().unwrap_or(0);
                    let failing = (0..option.shards.len())
                        .find(|&i| !self.ledger.can_fit(host * local + i, &option.shards[i].storage))
                        .unwrap_or(0);
                    let rank = host * local + failing;
                    return Err(self.infeasible(option, failing, rank..rank + 1));
                };
                for i in 0..option.shards.len() {
                    self.assign(option, i, host * local + i)?;
                }
            }
        }
        Ok(())
    }

    /// Hosts ordered by accumulated perf, then host id.
    fn hosts_by_load(&self) -> Vec<usize> {
        let perfs = self.ledger.rank_perfs();
        let host_perf = |h: usize| -> f64 {
            self.topology.ranks_of_host(h).map(|r| perfs[r]).sum()
        };
        let mut hosts: Vec<usize> = (0..self.topology.num_hosts()).collect();
        hosts.sort_by(|&a, &b| host_perf(a).total_cmp(&host_perf(b)).then(a.cmp(&b)));
        hosts
    }

    fn place_on_one_host(&mut self, option: &mut ShardingOption) -> Result<()> {
        let mut last_failure = None;
        for host in self.hosts_by_load() {
            let ranks = self.topology.ranks_of_host(host);
            let mut placed: Vec<usize> = Vec::new();
            let mut failed = None;
            for i in 0..option.shards.len() {
                match self.ledger.least_loaded(ranks.clone(), &option.shards[i].storage) {
                    Some(rank) => {
                        self.assign(option, i, rank)?;
                        placed.push(i);
                    }
                    None => {
                        failed = Some(i);
                        break;
                    }
                }
            }
            let Some(i) = failed else {
                return Ok(());
            };
            last_failure = Some(self.infeasible(option, i, ranks));
            for j in placed {
                self.unassign(option, j)?;
            }
        }
        Err(last_failure.unwrap_or_else(|| self.infeasible(option, 0, 0..self.topology.world_size())))
    }

    fn assign(&mut self, option: &mut ShardingOption, shard: usize, rank: usize) -> Result<()> {
        let s = &option.shards[shard];
        let (storage, perf) = (s.storage, s.perf.total());
        if !self.ledger.can_fit(rank, &storage) {
            return Err(self.infeasible(option, shard, rank..rank + 1));
        }
        self.ledger.try_acquire(rank, storage, perf, &option.name)?;
        self.loads.record(rank, &option.name, storage, perf);
        option.shards[shard].rank = Some(rank);
        tracing::trace!(table = %option.name, shard, rank, %storage, "placed");
        Ok(())
    }

    fn unassign(&mut self, option: &mut ShardingOption, shard: usize) -> Result<()> {
        let s = &option.shards[shard];
        if let Some(rank) = s.rank {
            let (storage, perf) = (s.storage, s.perf.total());
            self.ledger.release(rank, storage, perf)?;
            self.loads.remove(rank, &option.name, storage, perf);
        }
        option.shards[shard].rank = None;
        Ok(())
    }

    fn infeasible(
        &self,
        option: &ShardingOption,
        shard: usize,
        ranks: impl Iterator<Item = usize>,
    ) -> PartitionError {
        let required = option.shards.get(shard).map_or(Storage::zero(), |s| s.storage);
        let deficits = ranks
            .flat_map(|rank| {
                let available = self.ledger.remaining(rank).unwrap_or_default();
                required
                    .excess_over(&available)
                    .into_iter()
                    .map(move |(tier, _)| RankDeficit {
                        rank,
                        tier,
                        required: required.get(tier),
                        available: available.get(tier),
                    })
            })
            .collect();
        PartitionError::Infeasible(Box::new(InfeasibleCandidate {
            table: option.name.clone(),
            shard,
            required,
            deficits,
            usage: self.ledger.rank_usage(),
            loads: self.loads.clone(),
        }))
    }
}
