#![forbid(unsafe_code)]
//! shardplan: sharding and placement planning for large embedding tables.
//!
//! Re-exports the workspace crates so callers depend on one package:
//! - [`model`]: topology, tables, constraints, plans, config, errors
//! - [`mem`]: per-rank capacity ledger
//! - [`planner`]: enumeration, estimation, partitioning, search
//!
//! ```no_run
//! use shardplan::prelude::*;
//!
//! let topology = Topology::new(2, ComputeDevice::Cuda)?;
//! let tables = vec![EmbeddingTable::new("t0", 1_000_000, 64, ["f0"])];
//! let sharder = EmbeddingBagCollectionSharder::new();
//! let plan = EmbeddingShardingPlanner::new(topology).plan(&tables, &[&sharder])?;
//! println!("{plan}");
//! # Ok::<(), shardplan::model::error::Error>(())
//! ```

pub use shardplan_core as model;
pub use shardplan_mem as mem;
pub use shardplan_planner as planner;

pub mod prelude {
    pub use shardplan_core::prelude::*;
    pub use shardplan_planner::{
        construct_module_sharding_plan, EmbeddingBagCollectionSharder, EmbeddingShardingPlanner,
        HeteroEmbeddingShardingPlanner, ManualSharding, PlanStats, PlanningResult,
        QuantEmbeddingBagCollectionSharder, Sharder,
    };
}
