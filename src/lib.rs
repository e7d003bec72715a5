//! Execution History Library
//!
//! Stores and queries the execution history of batch jobs across several
//! table layouts, and controls execution lifecycle on top of it.

pub mod config;
pub mod context_codec;
pub mod execution_store;
pub mod lifecycle;
pub mod paging;
pub mod schema_target;
pub mod sqlite_persistence;

// Re-export commonly used types for convenience
pub use context_codec::{ContextCodec, DeserializedContext};
pub use execution_store::{
    BatchStatus, ExecutionFilter, ExecutionReader, ExecutionRecord, ExecutionRepository,
    SqliteExecutionReader, SqliteExecutionRepository, StepRecord,
};
pub use lifecycle::{JobLifecycleService, Launcher, LifecycleError, UnmanagedLauncher};
pub use schema_target::{SchemaTarget, SchemaTargetResolver};
pub use sqlite_persistence::SqliteClient;
