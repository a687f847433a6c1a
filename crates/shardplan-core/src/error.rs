use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::MemoryTier;

/// Canonical result for core and the planner.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid topology: {0}")]
    Topology(String),

    #[error("duplicate table name '{0}'")]
    DuplicateTable(String),

    #[error("constraints reference unknown table '{0}'")]
    UnknownConstraintTable(String),

    #[error("sharder '{sharder}' reports parameter '{parameter}' that is not a declared table")]
    UnknownShardableParameter { sharder: String, parameter: String },

    #[error("table '{0}' is not shardable by any registered sharder")]
    UnclaimedTable(String),

    #[error("no feasible sharding for table '{table}': {reason}")]
    NoFeasibleSharding { table: String, reason: String },

    #[error("invalid table '{table}': {reason}")]
    InvalidTable { table: String, reason: String },

    #[error("planning exhausted: {0}")]
    PlanningExhausted(Box<PlanningFailure>),

    #[error("Hashing error: {0}")]
    Hash(String),

    #[error("Internal invariant failed: {0}")]
    Invariant(String),
}

/// Coarse classes callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Inputs can never produce a plan as given; fix the configuration.
    Configuration,
    /// A table descriptor is malformed.
    EstimatorInput,
    /// The search found nothing feasible; relax constraints or add capacity.
    PlanningExhausted,
    Internal,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_)
            | Error::Topology(_)
            | Error::DuplicateTable(_)
            | Error::UnknownConstraintTable(_)
            | Error::UnknownShardableParameter { .. }
            | Error::UnclaimedTable(_)
            | Error::NoFeasibleSharding { .. } => ErrorKind::Configuration,
            Error::InvalidTable { .. } => ErrorKind::EstimatorInput,
            Error::PlanningExhausted(_) => ErrorKind::PlanningExhausted,
            Error::Hash(_) | Error::Invariant(_) => ErrorKind::Internal,
        }
    }

    /// Diagnostics attached to an exhausted search.
    pub fn planning_failure(&self) -> Option<&PlanningFailure> {
        match self {
            Error::PlanningExhausted(f) => Some(f),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Hash(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Config(e.to_string())
    }
}

/// One rank that could not take the shard the search last failed on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankDeficit {
    pub rank: usize,
    pub tier: MemoryTier,
    pub required: u64,
    pub available: u64,
}

impl RankDeficit {
    pub fn excess(&self) -> u64 {
        self.required.saturating_sub(self.available)
    }
}

/// Structured report for operators or retry logic when no plan was found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanningFailure {
    pub proposals_evaluated: usize,
    /// Table whose shard could not be placed in the last attempt.
    pub failing_table: Option<String>,
    pub deficits: Vec<RankDeficit>,
    /// Heaviest tables on the over-capacity ranks, as (name, bytes), largest first.
    pub heaviest_tables: Vec<(String, u64)>,
}

impl fmt::Display for PlanningFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "no feasible plan after {} proposals",
            self.proposals_evaluated
        )?;
        if let Some(table) = &self.failing_table {
            write!(f, "; table '{table}' did not fit")?;
        }
        for d in &self.deficits {
            write!(
                f,
                "; rank {} {} short by {} bytes ({} needed, {} free)",
                d.rank,
                d.tier,
                d.excess(),
                d.required,
                d.available
            )?;
        }
        if !self.heaviest_tables.is_empty() {
            let names: Vec<String> = self
                .heaviest_tables
                .iter()
                .map(|(n, b)| format!("{n} ({b} B)"))
                .collect();
            write!(f, "; heaviest tables: {}", names.join(", "))?;
        }
        Ok(())
    }
}
