//! Lifecycle control over job executions: queries across schema targets,
//! stop/abandon/restart with state checks, and the shutdown drain.

mod active;
mod error;
mod launcher;
mod models;
mod service;

pub use active::ActiveExecutions;
pub use error::LifecycleError;
pub use launcher::{ExecutionHandle, Launcher, UnmanagedLauncher};
pub use models::{
    ExecutionDetail, ExecutionPage, ExecutionQuery, LifecycleSettings, StepPage,
};
pub use service::JobLifecycleService;
