#![forbid(unsafe_code)]
//! shardplan-mem: hard per-rank capacity budgeting for placement.
//!
//! The partitioner places every shard through a `CapacityLedger`. A shard is
//! only placed once `try_acquire` accepted its bytes, so a finished ledger can
//! never exceed any rank's per-tier capacity.
//!
//! Ledgers are plain values scoped to one candidate evaluation; nothing here
//! is shared between planning calls.

pub mod error;
pub mod ledger;
pub mod tracking;

pub use error::{Error, Result};
pub use ledger::{CapacityLedger, RankBudget};
pub use tracking::{Contribution, LoadTracker};
