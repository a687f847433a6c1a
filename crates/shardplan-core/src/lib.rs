#![forbid(unsafe_code)]
//! shardplan-core: the data model shared by every planning stage.
//!
//! Contents:
//! - `Topology` (device fleet) and `EmbeddingTable` (what gets sharded)
//! - `ParameterConstraints` supplied by callers per table
//! - `ShardingOption` / `Shard` candidates with `Storage` and `Perf` costs
//! - the final `ShardingPlan`, its fingerprint, and the error taxonomy
//! - `PlannerConfig` plus calibration constants
//!
//! No planning logic lives here. The planner crate drives these types.

pub mod config;
pub mod constants;
pub mod constraints;
pub mod error;
pub mod hash;
pub mod option;
pub mod plan;
pub mod prelude;
pub mod sharding;
pub mod storage;
pub mod table;
pub mod topology;

/// Crate version, stamped into plan summaries.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
