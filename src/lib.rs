#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod config;
pub mod diagnostic;
mod engine;
mod error;
mod executor;
pub mod service;
mod workflow;

pub use crate::config::{DiagnosticConfig, ExecType, TaskConfig, TaskMock};
pub use crate::diagnostic::{DiagnosticContext, DiagnosticReport};
pub use crate::engine::{
    Caller, Dependencies, Handle, ResultHandle, Task, TaskContext, TaskHeader, WorkerPool,
};
pub use crate::error::{ApplicationError, PoolError, WorkflowError};
pub use crate::executor::{Executor, TIMEOUT_TASK_SUFFIX, TaskBinder, TaskDef};
pub use crate::workflow::{
    LATCH_TASK_SUFFIX, LatchFactory, SingleCountDownLatch, TaskFactory, TaskInstance,
    TaskInstanceHolder, VISITEES_TASK_SUFFIX, Visitees, Visitor, VisitorWorkflow, Workflow,
    WorkflowBuilder,
};

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, `taskgraph=info` when
/// unset. Panics if a global subscriber is already set.
#[cfg(feature = "logging")]
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("taskgraph=info")),
        )
        .init();
}
