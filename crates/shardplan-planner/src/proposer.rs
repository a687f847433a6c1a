//! Search over per-table ranked options.
//!
//! The state is the current option of every table, popped from a
//! `RankStack`. Each step hands the current options to the partitioner,
//! keeps the best feasible result, and pops the next option of the table
//! most responsible for the hottest rank. Popped options never return, so no
//! candidate set is evaluated twice.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use shardplan_core::config::PlannerConfig;
use shardplan_core::error::{Error, PlanningFailure, Result};
use shardplan_core::option::ShardingOption;
use shardplan_core::sharding::ShardingType;

use crate::partitioner::{GreedyPartitioner, InfeasibleCandidate, PartitionError, PartitionOutcome};
use crate::ranker::RankStack;

/// Why the search stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// `max_proposals` candidate sets were evaluated.
    Budget,
    /// Every table was on its last option.
    Exhausted,
    /// The best plan reached `target_balance`.
    Balanced,
    /// Nothing to plan.
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchStats {
    pub proposals_evaluated: usize,
    pub feasible_proposals: usize,
    /// Objective of every new best plan, in discovery order.
    pub best_history: Vec<f64>,
    pub termination: Termination,
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    /// Placed options of the best plan, in table order.
    pub best: Vec<ShardingOption>,
    pub best_perf: f64,
    pub stats: SearchStats,
}

pub struct GreedyProposer<'a> {
    partitioner: GreedyPartitioner<'a>,
    config: &'a PlannerConfig,
}

impl<'a> GreedyProposer<'a> {
    pub fn new(partitioner: GreedyPartitioner<'a>, config: &'a PlannerConfig) -> Self {
        Self {
            partitioner,
            config,
        }
    }

    /// `stack` holds at least one option for every table it names.
    pub fn search(&self, mut stack: RankStack) -> Result<SearchOutcome> {
        let mut stats = SearchStats {
            proposals_evaluated: 0,
            feasible_proposals: 0,
            best_history: Vec::new(),
            termination: Termination::Empty,
        };
        let tables = stack.tables().to_vec();
        if tables.is_empty() {
            return Ok(SearchOutcome {
                best: Vec::new(),
                best_perf: 0.0,
                stats,
            });
        }
        let mut current = stack.bulk_pop();
        if current.len() != tables.len() {
            return Err(Error::Invariant(format!(
                "{} of {} tables have ranked options",
                current.len(),
                tables.len()
            )));
        }

        let declared: BTreeMap<&str, usize> = tables
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();
        let mut best: Option<PartitionOutcome> = None;
        let mut last_failure: Option<Box<InfeasibleCandidate>> = None;

        stats.termination = Termination::Budget;
        while stats.proposals_evaluated < self.config.max_proposals {
            stats.proposals_evaluated += 1;

            let candidates = match self.partitioner.partition(&current) {
                Ok(outcome) => {
                    stats.feasible_proposals += 1;
                    let candidates = perf_candidates(&outcome, &declared);
                    let improved = best
                        .as_ref()
                        .map_or(true, |b| outcome.max_perf() < b.max_perf());
                    if improved {
                        tracing::debug!(
                            proposal = stats.proposals_evaluated,
                            max_perf = outcome.max_perf(),
                            balance = outcome.balance(),
                            "new best plan"
                        );
                        stats.best_history.push(outcome.max_perf());
                        best = Some(outcome);
                    }
                    let balanced = match (self.config.target_balance, &best) {
                        (Some(target), Some(b)) => b.balance() <= target,
                        _ => false,
                    };
                    if balanced {
                        stats.termination = Termination::Balanced;
                        break;
                    }
                    candidates
                }
                Err(PartitionError::Infeasible(info)) => {
                    let candidates = storage_candidates(&info, &declared);
                    last_failure = Some(info);
                    candidates
                }
                Err(PartitionError::Ledger(e)) => return Err(Error::Invariant(e.to_string())),
            };

            let advanced = candidates
                .into_iter()
                .find_map(|t| stack.pop(&tables[t]).map(|next| (t, next)));
            match advanced {
                Some((t, next)) => current[t] = next,
                None => {
                    stats.termination = Termination::Exhausted;
                    break;
                }
            }
        }

        tracing::debug!(
            evaluated = stats.proposals_evaluated,
            feasible = stats.feasible_proposals,
            termination = ?stats.termination,
            "search finished"
        );

        match best {
            Some(outcome) => Ok(SearchOutcome {
                best_perf: outcome.max_perf(),
                best: outcome.options,
                stats,
            }),
            None => {
                let failure = planning_failure(stats.proposals_evaluated, last_failure.as_deref());
                tracing::warn!(%failure, "no feasible plan");
                Err(Error::PlanningExhausted(Box::new(failure)))
            }
        }
    }
}

/// Every table, most responsible for the slowest ranks first: ranks in
/// descending perf, heaviest table first within a rank, then declaration
/// order. Data-parallel and row-wise tables load every rank alike, so they
/// go after everything else.
fn perf_candidates(outcome: &PartitionOutcome, declared: &BTreeMap<&str, usize>) -> Vec<usize> {
    let mut ordered: Vec<usize> = Vec::new();
    for rank in ranks_by_load(&outcome.rank_perfs) {
        let mut on_rank: Vec<(usize, f64)> = outcome
            .loads
            .heaviest_by_perf(rank)
            .into_iter()
            .filter_map(|(name, perf)| declared.get(name.as_str()).map(|&i| (i, perf)))
            .collect();
        on_rank.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        for (t, _) in on_rank {
            push_unique(&mut ordered, t);
        }
    }
    for t in 0..declared.len() {
        push_unique(&mut ordered, t);
    }

    let uniform = |t: usize| {
        matches!(
            outcome.options[t].sharding_type,
            ShardingType::DataParallel | ShardingType::RowWise
        )
    };
    let (fixed, movable): (Vec<usize>, Vec<usize>) = ordered.into_iter().partition(|&t| uniform(t));
    movable.into_iter().chain(fixed).collect()
}

/// Every table, most responsible for the shortage first: tables on the
/// fullest rank (in the tier that ran out) largest first, the table that
/// failed to place, the other ranks by usage, then declaration order.
fn storage_candidates(info: &InfeasibleCandidate, declared: &BTreeMap<&str, usize>) -> Vec<usize> {
    let tier = info.tier();
    let usage: Vec<f64> = info.usage.iter().map(|s| s.get(tier) as f64).collect();
    let failing = declared.get(info.table.as_str()).copied();
    let mut out: Vec<usize> = Vec::new();
    for (i, rank) in ranks_by_load(&usage).into_iter().enumerate() {
        let mut on_rank: Vec<(usize, u64)> = info
            .loads
            .heaviest_by_storage(rank, tier)
            .into_iter()
            .filter_map(|(name, bytes)| declared.get(name.as_str()).map(|&t| (t, bytes)))
            .collect();
        on_rank.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        for (t, _) in on_rank {
            push_unique(&mut out, t);
        }
        if let (0, Some(f)) = (i, failing) {
            push_unique(&mut out, f);
        }
    }
    if let Some(f) = failing {
        push_unique(&mut out, f);
    }
    for t in 0..declared.len() {
        push_unique(&mut out, t);
    }
    out
}

/// Ranks by descending load; lowest rank first on ties.
fn ranks_by_load(load: &[f64]) -> Vec<usize> {
    let mut ranks: Vec<usize> = (0..load.len()).collect();
    ranks.sort_by(|&a, &b| load[b].total_cmp(&load[a]).then(a.cmp(&b)));
    ranks
}

fn push_unique(out: &mut Vec<usize>, t: usize) {
    if !out.contains(&t) {
        out.push(t);
    }
}

fn planning_failure(evaluated: usize, last: Option<&InfeasibleCandidate>) -> PlanningFailure {
    let Some(info) = last else {
        return PlanningFailure {
            proposals_evaluated: evaluated,
            ..Default::default()
        };
    };
    let mut heaviest: Vec<(String, u64)> = Vec::new();
    let mut seen_ranks: Vec<usize> = Vec::new();
    for d in &info.deficits {
        if seen_ranks.contains(&d.rank) {
            continue;
        }
        seen_ranks.push(d.rank);
        for (name, bytes) in info.loads.heaviest_by_storage(d.rank, d.tier) {
            match heaviest.iter_mut().find(|(n, _)| *n == name) {
                Some(entry) => entry.1 = entry.1.max(bytes),
                None => heaviest.push((name, bytes)),
            }
        }
    }
    heaviest.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    heaviest.truncate(5);

    PlanningFailure {
        proposals_evaluated: evaluated,
        failing_table: Some(info.table.clone()),
        deficits: info.deficits.clone(),
        heaviest_tables: heaviest,
    }
}
