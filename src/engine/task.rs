use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::{DiagnosticConfig, TaskConfig};
use crate::diagnostic::{DiagnosticContext, EXEC_TYPE_TAG};
use crate::engine::{Caller, Dependencies, Handle, WorkerPool, lock};

pub(crate) type Body<T> = Box<dyn FnOnce(&TaskContext<'_>) -> anyhow::Result<Option<T>> + Send>;

/// Identity, configuration, dependencies and diagnostic context of a task.
///
/// Shared between the task's handle, its execution pipeline and the executor
/// registry.
pub struct TaskHeader {
    name: String,
    config: TaskConfig,
    context: Mutex<DiagnosticContext>,
    dependencies: Vec<Arc<dyn Handle>>,
}

impl TaskHeader {
    pub(crate) fn new(name: String, config: TaskConfig, dependencies: Vec<Arc<dyn Handle>>) -> Self {
        let mut context = DiagnosticContext::new(name.clone(), config.diagnostic().clone());
        if config.diagnostic().profiling_enabled() {
            context.add_tag(EXEC_TYPE_TAG, config.exec_type().to_string());
        }

        Self {
            name,
            config,
            context: Mutex::new(context),
            dependencies,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    /// Exclusive access to the task's diagnostic context. Do not hold the
    /// guard while resolving other tasks.
    pub fn context(&self) -> MutexGuard<'_, DiagnosticContext> {
        lock(&self.context)
    }

    pub fn dependency_names(&self) -> Vec<&str> {
        self.dependencies.iter().map(|d| d.header().name()).collect()
    }

    pub(crate) fn dependencies(&self) -> &[Arc<dyn Handle>] {
        &self.dependencies
    }

    pub(crate) fn add_dependency(&self, caller: &str) {
        self.context().add_dependency(caller);
    }
}

impl Caller for TaskHeader {
    fn caller_name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for TaskHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHeader")
            .field("name", &self.name)
            .field("exec_type", &self.config.exec_type())
            .field("dependencies", &self.dependency_names())
            .finish()
    }
}

/// A unit of work not yet submitted to an executor.
///
/// The dependency list is fixed at construction. Submitting the task with
/// [`Executor::submit`](crate::Executor::submit) yields its
/// [`ResultHandle`](crate::ResultHandle).
pub struct Task<T> {
    pub(crate) header: Arc<TaskHeader>,
    pub(crate) body: Body<T>,
}

impl<T> Task<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// The body receives the resolved dependencies; returning `Ok(None)`
    /// means "no value".
    pub fn new<D, F>(name: impl Into<String>, config: TaskConfig, dependencies: D, body: F) -> Self
    where
        D: Dependencies,
        F: FnOnce(&TaskContext<'_>, D::Output) -> anyhow::Result<Option<T>> + Send + 'static,
    {
        let header = TaskHeader::new(name.into(), config, dependencies.handles());
        Self {
            header: Arc::new(header),
            body: Box::new(move |ctx: &TaskContext<'_>| {
                let inputs = dependencies.resolve(ctx.name())?;
                body(ctx, inputs)
            }),
        }
    }

    pub fn name(&self) -> &str {
        self.header.name()
    }

    pub fn header(&self) -> &Arc<TaskHeader> {
        &self.header
    }
}

/// What a running task body can see of itself.
pub struct TaskContext<'a> {
    header: &'a Arc<TaskHeader>,
    pool: &'a WorkerPool,
}

impl<'a> TaskContext<'a> {
    pub(crate) fn new(header: &'a Arc<TaskHeader>, pool: &'a WorkerPool) -> Self {
        Self { header, pool }
    }

    pub fn name(&self) -> &str {
        self.header.name()
    }

    pub fn config(&self) -> &TaskConfig {
        self.header.config()
    }

    pub fn diagnostic_config(&self) -> &Arc<DiagnosticConfig> {
        self.header.config().diagnostic()
    }

    pub fn header(&self) -> &'a Arc<TaskHeader> {
        self.header
    }

    /// The task's diagnostic context, see [`TaskHeader::context`].
    pub fn context(&self) -> MutexGuard<'a, DiagnosticContext> {
        self.header.context()
    }

    pub fn pool(&self) -> &'a WorkerPool {
        self.pool
    }
}

impl Caller for TaskContext<'_> {
    fn caller_name(&self) -> &str {
        self.header.name()
    }
}
