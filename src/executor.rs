use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Sender, bounded};

use crate::config::{DiagnosticConfig, ExecType, TaskConfig};
use crate::diagnostic::NODE_LABEL_TAG;
use crate::engine::pipeline::{Pipeline, Stage, Terminal, current_task};
use crate::engine::{
    Body, Dependencies, Handle, Outcome, ResultHandle, Task, TaskContext, TaskHeader, WorkerPool,
    lock,
};
use crate::error::{PoolError, WorkflowError};
use crate::workflow::Workflow;

/// Suffix of the inner task that enforces an `ASYNC_TIMEOUT` deadline.
pub const TIMEOUT_TASK_SUFFIX: &str = "_timeoutTask";

/// Per-workflow task registry and dispatcher.
///
/// Each task name can be registered once. Sync and simple tasks run inline on
/// the first thread that resolves them, async tasks are handed to the shared
/// [`WorkerPool`] right away.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    pool: WorkerPool,
    diagnostic: Arc<DiagnosticConfig>,
    registry: Mutex<Registry>,
    collected: AtomicBool,
}

#[derive(Default)]
struct Registry {
    order: Vec<String>,
    tasks: HashMap<String, Arc<dyn Handle>>,
}

impl Executor {
    pub fn new(pool: WorkerPool) -> Self {
        Self::with_diagnostics(pool, Arc::new(DiagnosticConfig::default()))
    }

    /// `diagnostic` is the default for tasks defined through [`Executor::task`].
    pub fn with_diagnostics(pool: WorkerPool, diagnostic: Arc<DiagnosticConfig>) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                pool,
                diagnostic,
                registry: Mutex::new(Registry::default()),
                collected: AtomicBool::new(false),
            }),
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.inner.pool
    }

    pub fn diagnostic_config(&self) -> &Arc<DiagnosticConfig> {
        &self.inner.diagnostic
    }

    /// The entry point for defining a task in place.
    pub fn task(&self, name: impl Into<String>) -> TaskDef<'_> {
        TaskDef {
            executor: self,
            name: name.into(),
            config: TaskConfig::sync().with_diagnostics(self.inner.diagnostic.clone()),
        }
    }

    /// Registers the task and dispatches it according to its execution mode.
    pub fn submit<T>(&self, task: Task<T>) -> Result<ResultHandle<T>, WorkflowError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let Task { header, body } = task;
        let exec_type = header.config().exec_type();
        let timeout = header.config().timeout();

        let mut stages = Vec::new();
        if header.config().diagnostic().publish_diagnostics() {
            stages.push(Stage::TagThread {
                parent: current_task(),
            });
        }

        tracing::trace!("submitting {exec_type} task {}", header.name());

        match exec_type {
            ExecType::Sync | ExecType::Simple => {
                stages.extend(profile_stages());
                let pipeline = self.pipeline(header.clone(), stages, Terminal::Body(body));
                let handle = ResultHandle::inline(header, move || pipeline.run());
                self.register(&handle)?;
                Ok(handle)
            }
            ExecType::Async => {
                stages.extend(profile_stages());
                let pipeline = self.pipeline(header.clone(), stages, Terminal::Body(body));
                let (sender, receiver) = bounded(1);
                let handle = ResultHandle::pooled(header, receiver, timeout);
                self.register(&handle)?;
                if let Err(err) = self.dispatch(pipeline, sender) {
                    self.unregister(handle.name());
                    return Err(err.into());
                }
                Ok(handle)
            }
            ExecType::AsyncTimeout => self.submit_with_timeout(header, body, stages, timeout),
        }
    }

    /// Splits the task in two pooled tasks. The inner `<name>_timeoutTask`
    /// runs the body, its handle is bounded by `timeout`. The outer task
    /// waits for the dependencies and only then starts waiting on the inner
    /// one, so the deadline covers the body alone.
    fn submit_with_timeout<T>(
        &self,
        header: Arc<TaskHeader>,
        body: Body<T>,
        tagging: Vec<Stage>,
        timeout: Option<Duration>,
    ) -> Result<ResultHandle<T>, WorkflowError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let invoker = TaskHeader::new(
            format!("{}{TIMEOUT_TASK_SUFFIX}", header.name()),
            header.config().clone().with_exec_type(ExecType::Async),
            header.dependencies().to_vec(),
        );
        invoker.context().add_tag(NODE_LABEL_TAG, "TimeoutTask");
        let invoker = Arc::new(invoker);

        let mut inner_stages = tagging.clone();
        inner_stages.extend(profile_stages());
        let inner_pipeline = self
            .pipeline(invoker.clone(), inner_stages, Terminal::Body(body))
            .on_behalf_of(header.clone());
        let (inner_sender, inner_receiver) = bounded(1);
        let inner = ResultHandle::pooled(invoker, inner_receiver, timeout);

        let mut outer_stages = tagging;
        outer_stages.push(Stage::WaitDependencies);
        let outer_pipeline =
            self.pipeline(header.clone(), outer_stages, Terminal::Delegate(inner.clone()));
        let (outer_sender, outer_receiver) = bounded(1);
        let outer = ResultHandle::pooled(header, outer_receiver, None);

        self.register(&outer)?;
        if let Err(err) = self.register(&inner) {
            self.unregister(outer.name());
            return Err(err);
        }

        let dispatched = self
            .dispatch(inner_pipeline, inner_sender)
            .and_then(|()| self.dispatch(outer_pipeline, outer_sender));
        if let Err(err) = dispatched {
            self.unregister(outer.name());
            self.unregister(inner.name());
            return Err(err.into());
        }

        Ok(outer)
    }

    fn pipeline<T>(&self, header: Arc<TaskHeader>, stages: Vec<Stage>, terminal: Terminal<T>) -> Pipeline<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        Pipeline::new(header, stages, terminal, self.inner.pool.clone())
    }

    fn dispatch<T>(&self, pipeline: Pipeline<T>, sender: Sender<Outcome<T>>) -> Result<(), PoolError>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.inner.pool.submit(move || {
            // the receiver is gone once a resolver gave up waiting
            sender.send(pipeline.run()).ok();
        })
    }

    fn register<T>(&self, handle: &ResultHandle<T>) -> Result<(), WorkflowError>
    where
        T: Clone + Send + Sync + 'static,
    {
        let mut registry = lock(&self.inner.registry);
        let name = handle.name();
        if registry.tasks.contains_key(name) {
            tracing::error!("attempted to add a duplicate task {name}");
            return Err(WorkflowError::DuplicateTask(name.to_owned()));
        }
        registry.order.push(name.to_owned());
        registry
            .tasks
            .insert(name.to_owned(), Arc::new(handle.clone()));
        Ok(())
    }

    fn unregister(&self, name: &str) {
        let mut registry = lock(&self.inner.registry);
        registry.tasks.remove(name);
        registry.order.retain(|n| n != name);
    }

    /// Typed access to a registered task. `None` when no task has that name
    /// or its output is not a `T`.
    pub fn lookup<T>(&self, name: &str) -> Option<ResultHandle<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let registry = lock(&self.inner.registry);
        registry
            .tasks
            .get(name)?
            .as_any()
            .downcast_ref::<ResultHandle<T>>()
            .cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        lock(&self.inner.registry).tasks.contains_key(name)
    }

    /// Registered task names, in registration order.
    pub fn task_names(&self) -> Vec<String> {
        lock(&self.inner.registry).order.clone()
    }

    /// Folds the diagnostic context of every registered task into `root`.
    ///
    /// Runs once per executor, later calls fail with
    /// [`WorkflowError::AlreadyCollected`].
    pub fn collect_diagnostics(&self, root: &TaskHeader) -> Result<(), WorkflowError> {
        if self.inner.collected.swap(true, Ordering::AcqRel) {
            return Err(WorkflowError::AlreadyCollected(root.name().to_owned()));
        }

        let handles: Vec<Arc<dyn Handle>> = {
            let registry = lock(&self.inner.registry);
            registry
                .order
                .iter()
                .filter_map(|name| registry.tasks.get(name).cloned())
                .collect()
        };

        for handle in handles {
            let header = handle.header();
            if std::ptr::eq(header.as_ref(), root) {
                tracing::error!("adding diagnostic context of {} to itself", root.name());
                continue;
            }
            let context = header.context().clone();
            root.context().merge_from(&context);
        }

        Ok(())
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("pool", &self.inner.pool)
            .field("tasks", &self.task_names())
            .finish()
    }
}

fn profile_stages() -> [Stage; 3] {
    [Stage::WaitDependencies, Stage::TimeSpan, Stage::RecordException]
}

/// Builder for a task defined in place, see [`Executor::task`].
pub struct TaskDef<'a> {
    executor: &'a Executor,
    name: String,
    config: TaskConfig,
}

impl<'a> TaskDef<'a> {
    pub fn config(mut self, config: TaskConfig) -> Self {
        self.config = config;
        self
    }

    pub fn sync(mut self) -> Self {
        self.config = self.config.with_exec_type(ExecType::Sync).with_timeout(None);
        self
    }

    pub fn simple(mut self) -> Self {
        self.config = self.config.with_exec_type(ExecType::Simple).with_timeout(None);
        self
    }

    pub fn asynchronous(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.config = self.config.with_exec_type(ExecType::Async).with_timeout(timeout);
        self
    }

    pub fn async_timeout(mut self, timeout: Duration) -> Self {
        self.config = self
            .config
            .with_exec_type(ExecType::AsyncTimeout)
            .with_timeout(timeout);
        self
    }

    pub fn depends_on<D>(self, dependencies: D) -> TaskBinder<'a, D>
    where
        D: Dependencies,
    {
        TaskBinder {
            def: self,
            dependencies,
        }
    }

    pub fn run<F, R>(self, body: F) -> Result<ResultHandle<R>, WorkflowError>
    where
        F: FnOnce(&TaskContext<'_>) -> anyhow::Result<R> + Send + 'static,
        R: Clone + Send + Sync + 'static,
    {
        self.depends_on(()).run(move |ctx, ()| body(ctx))
    }

    pub fn run_optional<F, R>(self, body: F) -> Result<ResultHandle<R>, WorkflowError>
    where
        F: FnOnce(&TaskContext<'_>) -> anyhow::Result<Option<R>> + Send + 'static,
        R: Clone + Send + Sync + 'static,
    {
        self.depends_on(()).run_optional(move |ctx, ()| body(ctx))
    }
}

pub struct TaskBinder<'a, D> {
    def: TaskDef<'a>,
    dependencies: D,
}

impl<'a, D> TaskBinder<'a, D>
where
    D: Dependencies,
{
    pub fn config(mut self, config: TaskConfig) -> Self {
        self.def.config = config;
        self
    }

    pub fn run<F, R>(self, body: F) -> Result<ResultHandle<R>, WorkflowError>
    where
        F: FnOnce(&TaskContext<'_>, D::Output) -> anyhow::Result<R> + Send + 'static,
        R: Clone + Send + Sync + 'static,
    {
        self.run_optional(move |ctx, inputs| body(ctx, inputs).map(Some))
    }

    pub fn run_optional<F, R>(self, body: F) -> Result<ResultHandle<R>, WorkflowError>
    where
        F: FnOnce(&TaskContext<'_>, D::Output) -> anyhow::Result<Option<R>> + Send + 'static,
        R: Clone + Send + Sync + 'static,
    {
        let TaskBinder { def, dependencies } = self;
        let task = Task::new(def.name, def.config, dependencies, body);
        def.executor.submit(task)
    }

    /// A task that builds and runs a nested workflow rooted at itself. The
    /// nested tasks get their own executor on the same pool, and their
    /// diagnostics are folded into this task's context when it completes.
    pub fn run_workflow<F, R>(self, build: F) -> Result<ResultHandle<R>, WorkflowError>
    where
        F: FnOnce(&Workflow, D::Output) -> anyhow::Result<ResultHandle<R>> + Send + 'static,
        R: Clone + Send + Sync + 'static,
    {
        self.run_optional(move |ctx, inputs| {
            let workflow = Workflow::with_root(ctx.header().clone(), ctx.pool());
            let result = build(&workflow, inputs)
                .and_then(|handle| Ok(handle.resolve(&workflow)?));
            workflow.fold()?;
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Instant;

    use super::*;
    use crate::config::TaskMock;
    use crate::diagnostic::{DEPENDENCIES_TAG, EXCEPTION_TAG, PARENT_TASK_TAG};
    use crate::error::ApplicationError;

    fn executor() -> Executor {
        Executor::new(WorkerPool::new("executor-test"))
    }

    fn profiled_executor() -> Executor {
        Executor::with_diagnostics(
            WorkerPool::new("executor-test"),
            Arc::new(DiagnosticConfig::profiling()),
        )
    }

    fn sleeper(executor: &Executor, name: &str, millis: u64, value: i32) -> ResultHandle<i32> {
        executor
            .task(name)
            .asynchronous(None)
            .run(move |_| {
                thread::sleep(Duration::from_millis(millis));
                Ok(value)
            })
            .unwrap()
    }

    #[test]
    fn test_sum_of_numbers() {
        let executor = executor();
        let one = executor.task("number1").run(|_| Ok(1)).unwrap();
        let two = executor.task("number2").asynchronous(None).run(|_| Ok(2)).unwrap();
        let three = executor.task("number3").run(|_| Ok(3)).unwrap();
        let missing = ResultHandle::<i32>::null("number4");

        let sum = executor
            .task("sum")
            .depends_on(vec![one, two, three, missing])
            .run(|_, numbers| Ok(numbers.into_iter().flatten().sum::<i32>()))
            .unwrap();

        assert_eq!(sum.resolve("test").unwrap(), Some(6));
    }

    #[test]
    fn test_mocked_number() {
        let diagnostic = DiagnosticConfig::new().with_mock("number1", TaskMock::value(4));
        let executor = Executor::with_diagnostics(WorkerPool::new("executor-test"), Arc::new(diagnostic));
        let one = executor.task("number1").run(|_| Ok(1)).unwrap();
        let two = executor.task("number2").run(|_| Ok(2)).unwrap();
        let three = executor.task("number3").run(|_| Ok(3)).unwrap();

        let sum = executor
            .task("sum")
            .depends_on((one, two, three))
            .run(|_, (a, b, c)| Ok(a.unwrap_or(0) + b.unwrap_or(0) + c.unwrap_or(0)))
            .unwrap();

        assert_eq!(sum.resolve("test").unwrap(), Some(9));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let executor = executor();
        executor.task("same").run(|_| Ok(1)).unwrap();

        let sync = executor.task("same").run(|_| Ok(2));
        let pooled = executor.task("same").asynchronous(None).run(|_| Ok(3));

        assert!(matches!(sync, Err(WorkflowError::DuplicateTask(name)) if name == "same"));
        assert!(matches!(pooled, Err(WorkflowError::DuplicateTask(_))));
        assert_eq!(executor.task_names(), vec!["same".to_string()]);
    }

    #[test]
    fn test_concurrent_registration_admits_one() {
        let executor = executor();
        let admitted = Arc::new(AtomicUsize::new(0));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let executor = executor.clone();
                let admitted = admitted.clone();
                thread::spawn(move || {
                    if executor.task("racy").run(|_| Ok(())).is_ok() {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        assert_eq!(admitted.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_memoized_under_concurrent_resolvers() {
        let executor = executor();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let handle = executor
            .task("shared")
            .asynchronous(None)
            .run(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(20));
                Ok(String::from("value"))
            })
            .unwrap();

        let threads: Vec<_> = (0..16)
            .map(|_| {
                let handle = handle.clone();
                thread::spawn(move || handle.resolve("reader").unwrap())
            })
            .collect();
        for thread in threads {
            assert_eq!(thread.join().unwrap().as_deref(), Some("value"));
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sync_dependencies_resolve_before_async() {
        let executor = executor();
        // declared first, but must be waited on after the sync one
        let slow_async = sleeper(&executor, "async", 100, 1);
        let slow_sync = executor
            .task("sync")
            .run(|_| {
                thread::sleep(Duration::from_millis(100));
                Ok(2)
            })
            .unwrap();

        let started = Instant::now();
        let sum = executor
            .task("sum")
            .depends_on((slow_async, slow_sync))
            .run(|_, (a, b)| Ok(a.unwrap_or(0) + b.unwrap_or(0)))
            .unwrap();

        assert_eq!(sum.resolve("test").unwrap(), Some(3));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(100));
        assert!(elapsed < Duration::from_millis(180), "took {elapsed:?}");
    }

    #[test]
    fn test_sync_dependencies_resolve_serially() {
        let executor = executor();
        let slow = |name: &str, value: i32| {
            executor
                .task(name)
                .run(move |_| {
                    thread::sleep(Duration::from_millis(100));
                    Ok(value)
                })
                .unwrap()
        };
        let first = slow("first", 1);
        let second = slow("second", 2);

        let started = Instant::now();
        let sum = executor
            .task("sum")
            .depends_on((first, second))
            .run(|_, (a, b)| Ok(a.unwrap_or(0) + b.unwrap_or(0)))
            .unwrap();

        assert_eq!(sum.resolve("test").unwrap(), Some(3));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(200), "took {elapsed:?}");
    }

    #[test]
    fn test_async_timeout_covers_body_only() {
        let executor = executor();
        let first = sleeper(&executor, "first", 75, 1);
        let second = executor
            .task("second")
            .asynchronous(None)
            .depends_on(first)
            .run(|_, first| {
                thread::sleep(Duration::from_millis(75));
                Ok(first.unwrap_or(0) + 1)
            })
            .unwrap();

        let bounded = executor
            .task("bounded")
            .async_timeout(Duration::from_millis(50))
            .depends_on(second)
            .run(|_, second| {
                thread::sleep(Duration::from_millis(10));
                Ok(second.unwrap_or(0) * 10)
            })
            .unwrap();

        assert_eq!(bounded.resolve("test").unwrap(), Some(20));
        assert!(executor.contains("bounded_timeoutTask"));
    }

    #[test]
    fn test_async_timeout_expires_while_body_continues() {
        let executor = executor();
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();

        let started = Instant::now();
        let bounded = executor
            .task("bounded")
            .async_timeout(Duration::from_millis(30))
            .run(move |_| {
                thread::sleep(Duration::from_millis(120));
                flag.store(true, Ordering::SeqCst);
                Ok(1)
            })
            .unwrap();

        assert_eq!(bounded.resolve("test").unwrap(), None);
        assert!(started.elapsed() < Duration::from_millis(110));
        assert!(!finished.load(Ordering::SeqCst));

        // nothing cancels the body
        thread::sleep(Duration::from_millis(200));
        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(bounded.resolve("test").unwrap(), None);
    }

    #[test]
    fn test_async_timeout_window_includes_dependencies() {
        let executor = executor();
        let slow = sleeper(&executor, "slow", 120, 1);
        let bounded = executor
            .task("bounded")
            .asynchronous(Duration::from_millis(50))
            .depends_on(slow)
            .run(|_, slow| Ok(slow.unwrap_or(0)))
            .unwrap();

        assert_eq!(bounded.resolve("test").unwrap(), None);
    }

    #[test]
    fn test_fatal_error_propagates_and_is_cached() {
        let executor = executor();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let err = ApplicationError::new(500, "bottom failed");
        let raised = err.clone();

        let bottom = executor
            .task("bottom")
            .asynchronous(None)
            .run(move |_| -> anyhow::Result<i32> {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(raised.into())
            })
            .unwrap();
        let middle = executor
            .task("middle")
            .depends_on(bottom)
            .run(|_, value| Ok(value.unwrap_or(0) + 1))
            .unwrap();
        let top = executor
            .task("top")
            .asynchronous(None)
            .depends_on(middle)
            .run(|_, value| Ok(value.unwrap_or(0) + 1))
            .unwrap();

        assert!(top.resolve("test").unwrap_err().same_as(&err));
        assert!(top.resolve("test").unwrap_err().same_as(&err));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_local_error_resolves_to_none() {
        let executor = profiled_executor();
        let failing = executor
            .task("failing")
            .run(|_| -> anyhow::Result<i32> { anyhow::bail!("no items") })
            .unwrap();
        let consumer = executor
            .task("consumer")
            .depends_on(failing.clone())
            .run(|_, value| Ok(value.is_none()))
            .unwrap();

        assert_eq!(consumer.resolve("test").unwrap(), Some(true));
        assert_eq!(failing.header().context().tag(EXCEPTION_TAG), Some("no items"));
    }

    #[test]
    fn test_lookup() {
        let executor = executor();
        executor.task("text").run(|_| Ok(String::from("a"))).unwrap();

        assert!(executor.lookup::<String>("text").is_some());
        assert!(executor.lookup::<i32>("text").is_none());
        assert!(executor.lookup::<String>("other").is_none());
    }

    #[test]
    fn test_pool_shutdown_rejects_async_tasks() {
        let pool = WorkerPool::new("executor-test");
        let executor = Executor::new(pool.clone());
        pool.shutdown();

        let rejected = executor.task("late").asynchronous(None).run(|_| Ok(1));
        assert!(matches!(
            rejected,
            Err(WorkflowError::Pool(PoolError::Shutdown))
        ));
        assert!(!executor.contains("late"));

        // inline tasks never touch the pool
        let inline = executor.task("inline").run(|_| Ok(1)).unwrap();
        assert_eq!(inline.resolve("test").unwrap(), Some(1));
    }

    #[test]
    fn test_collect_diagnostics_once() {
        let executor = profiled_executor();
        let root = TaskHeader::new(
            "root".into(),
            TaskConfig::simple().with_diagnostics(executor.diagnostic_config().clone()),
            vec![],
        );
        let number = executor.task("number").run(|_| Ok(1)).unwrap();
        number.resolve(&root).unwrap();

        executor.collect_diagnostics(&root).unwrap();
        {
            let context = root.context();
            let child = &context.span().children()[0];
            assert_eq!(child.name(), "number");
            assert_eq!(child.tag(DEPENDENCIES_TAG), Some("root"));
        }

        assert!(matches!(
            executor.collect_diagnostics(&root),
            Err(WorkflowError::AlreadyCollected(_))
        ));
    }

    #[test]
    fn test_parent_task_is_tagged() {
        let executor = profiled_executor();
        let inner_executor = executor.clone();
        let outer = executor
            .task("outer")
            .run(move |_| {
                let child = inner_executor.task("child").asynchronous(None).run(|_| Ok(1))?;
                Ok(child)
            })
            .unwrap();

        let child = outer.resolve("test").unwrap().unwrap();
        child.resolve("test").unwrap();
        assert_eq!(child.header().context().tag(PARENT_TASK_TAG), Some("outer"));
    }
}
