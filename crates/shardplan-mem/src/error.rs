use shardplan_core::storage::Storage;
use thiserror::Error;

/// Result type local to shardplan-mem.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("capacity exceeded on rank {rank} for '{tag}': requested {requested}, capacity {capacity}, used {used}")]
    BudgetExceeded {
        rank: usize,
        tag: String,
        requested: Storage,
        capacity: Storage,
        used: Storage,
    },

    #[error("rank {rank} out of range for world_size {world_size}")]
    UnknownRank { rank: usize, world_size: usize },

    #[error("release of {released} on rank {rank} exceeds used {used}")]
    ReleaseUnderflow {
        rank: usize,
        released: Storage,
        used: Storage,
    },
}
