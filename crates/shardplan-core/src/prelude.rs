//! Convenient re-exports for downstream crates.

pub use crate::config::{KernelBandwidth, PlannerConfig};
pub use crate::constraints::{ConstraintMap, ParameterConstraints};
pub use crate::error::{Error, ErrorKind, PlanningFailure, RankDeficit, Result};
pub use crate::hash::Hash256;
pub use crate::option::{Shard, ShardingOption};
pub use crate::plan::{ModuleShardingPlan, ParameterSharding, ShardMetadata, ShardingPlan};
pub use crate::sharding::{EmbeddingComputeKernel, PartitionByType, ShardingType};
pub use crate::storage::{MemoryTier, Perf, Storage};
pub use crate::table::{DataType, EmbeddingTable, PoolingType};
pub use crate::topology::{ComputeDevice, DeviceHardware, Topology};
