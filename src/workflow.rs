//! A workflow binds one root task to one executor.

mod instance;
mod latch;
mod visitor;

use std::sync::Arc;

pub use crate::workflow::instance::{TaskFactory, TaskInstance, TaskInstanceHolder};
pub use crate::workflow::latch::{LATCH_TASK_SUFFIX, LatchFactory, SingleCountDownLatch};
pub use crate::workflow::visitor::{VISITEES_TASK_SUFFIX, Visitees, Visitor, VisitorWorkflow};

use crate::config::{DiagnosticConfig, TaskConfig};
use crate::diagnostic::DiagnosticReport;
use crate::engine::{Caller, ResultHandle, Task, TaskHeader, WorkerPool};
use crate::error::WorkflowError;
use crate::executor::{Executor, TaskDef};

/// The root of a per-request task graph.
///
/// Every task added through the workflow lands in its executor. When the
/// request is done, [`collect_diagnostics`] folds the diagnostic context of
/// every task into the root's and returns the result as a report.
///
/// ```rust
/// use std::sync::Arc;
/// use taskgraph::{DiagnosticConfig, WorkerPool, Workflow};
///
/// let pool = WorkerPool::new("workers");
/// let workflow = Workflow::new("request", Arc::new(DiagnosticConfig::profiling()), &pool);
///
/// let a = workflow.task("a").asynchronous(None).run(|_| Ok(20)).unwrap();
/// let b = workflow.task("b").run(|_| Ok(22)).unwrap();
/// let sum = workflow
///     .task("sum")
///     .depends_on((a, b))
///     .run(|_, (a, b)| Ok(a.unwrap_or(0) + b.unwrap_or(0)))
///     .unwrap();
///
/// assert_eq!(sum.resolve(&workflow).unwrap(), Some(42));
/// let report = workflow.collect_diagnostics().unwrap();
/// assert!(report.task("sum").is_some());
/// ```
///
/// [`collect_diagnostics`]: Workflow::collect_diagnostics
pub struct Workflow {
    root: Arc<TaskHeader>,
    executor: Executor,
}

impl Workflow {
    /// Creates the root task and starts its clock.
    pub fn new(name: impl Into<String>, diagnostic: Arc<DiagnosticConfig>, pool: &WorkerPool) -> Self {
        let config = TaskConfig::simple().with_diagnostics(diagnostic);
        let root = Arc::new(TaskHeader::new(name.into(), config, vec![]));
        root.context().start_span();
        Self::with_root(root, pool)
    }

    /// A workflow whose root is an existing task, with a fresh executor.
    pub fn with_root(root: Arc<TaskHeader>, pool: &WorkerPool) -> Self {
        let executor = Executor::with_diagnostics(pool.clone(), root.config().diagnostic().clone());
        Self { root, executor }
    }

    pub fn name(&self) -> &str {
        self.root.name()
    }

    pub fn root(&self) -> &Arc<TaskHeader> {
        &self.root
    }

    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    pub fn diagnostic_config(&self) -> &Arc<DiagnosticConfig> {
        self.root.config().diagnostic()
    }

    pub fn task(&self, name: impl Into<String>) -> TaskDef<'_> {
        self.executor.task(name)
    }

    pub fn add_task<T>(&self, task: Task<T>) -> Result<ResultHandle<T>, WorkflowError>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.executor.submit(task)
    }

    /// Folds every task context into the root context, then snapshots it.
    /// Only the first call succeeds.
    pub fn collect_diagnostics(&self) -> Result<DiagnosticReport, WorkflowError> {
        self.fold()?;
        let mut context = self.root.context();
        context.stop_span();
        Ok(DiagnosticReport::from_context(&context))
    }

    pub(crate) fn fold(&self) -> Result<(), WorkflowError> {
        self.executor.collect_diagnostics(&self.root)
    }
}

impl Caller for Workflow {
    fn caller_name(&self) -> &str {
        self.root.name()
    }
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("root", &self.root.name())
            .field("executor", &self.executor)
            .finish()
    }
}

/// Anything task factories can add tasks through.
pub trait WorkflowBuilder {
    fn workflow(&self) -> &Workflow;

    fn add_task<T>(&self, task: Task<T>) -> Result<ResultHandle<T>, WorkflowError>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.workflow().add_task(task)
    }
}

impl WorkflowBuilder for Workflow {
    fn workflow(&self) -> &Workflow {
        self
    }
}
