//! Player pools, ready checks and hand-off to match assembly

pub mod assembler;
pub mod coordinator;
pub mod pool;

pub use assembler::{AssembledMatch, MatchAssembler, RandomMatchAssembler, SequentialMatchAssembler};
pub use coordinator::{
    CoordinatorSettings, QueueCoordinator, QueueStats, UnreachablePolicy, DEFAULT_READY_TIMEOUT,
};
pub use pool::{BatchSnapshot, PoolSnapshot};
