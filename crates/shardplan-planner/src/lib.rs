#![forbid(unsafe_code)]
//! shardplan-planner: from tables and a topology to a `ShardingPlan`.
//!
//! Pipeline:
//! - `enumerator`: admissible (sharding type, kernel) options per table
//! - `estimators`: exact bytes per tier and modeled time per shard
//! - `ranker`: cheapest-first option stacks
//! - `partitioner`: greedy placement under hard per-rank capacity
//! - `proposer`: pointer-vector search for the best feasible plan
//! - `planner`: validation and assembly, homogeneous or per device group
//!
//! `manual` builds plans by hand; `scaleup` optionally grows UVM caches after
//! the search. Everything is single-threaded and call-scoped.

pub mod enumerator;
pub mod estimators;
pub mod manual;
pub mod partitioner;
pub mod planner;
pub mod proposer;
pub mod ranker;
pub mod scaleup;
pub mod sharders;
pub mod stats;
pub mod utils;

pub use enumerator::EmbeddingEnumerator;
pub use estimators::{EmbeddingPerfEstimator, EmbeddingStorageEstimator, ShardEstimator};
pub use manual::{construct_module_sharding_plan, ManualLayout, ManualSharding};
pub use partitioner::{GreedyPartitioner, InfeasibleCandidate, PartitionError, PartitionOutcome};
pub use planner::{
    EmbeddingShardingPlanner, HeteroEmbeddingShardingPlanner, HeteroPlanningResult,
    PlanningResult,
};
pub use proposer::{GreedyProposer, SearchOutcome, SearchStats, Termination};
pub use ranker::{FlatRanker, RankStack};
pub use scaleup::CacheScaleup;
pub use sharders::{EmbeddingBagCollectionSharder, QuantEmbeddingBagCollectionSharder, Sharder};
pub use stats::{PlanStats, RankStats};
pub use utils::{BinarySearchPredicate, ImbalanceTarget};
