use std::sync::{Arc, Condvar, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use crate::config::{ExecType, TaskConfig};
use crate::engine::{Caller, ResultHandle, Task, TaskHeader, lock};
use crate::error::{ApplicationError, WorkflowError};
use crate::workflow::{TaskFactory, WorkflowBuilder};

/// Suffix of the task that fires a latch on behalf of a competitor.
pub const LATCH_TASK_SUFFIX: &str = "_latch";

/// "Whichever of N competing tasks produces a value first."
///
/// Each competitor gets wrapped in a `<name>_latch` task with [`wrap`]. The
/// first competitor that resolves to a value fires the latch; a competitor
/// raising an [`ApplicationError`] fires it too, carrying the error. Later
/// firings are ignored. Losers are not cancelled, they run to completion.
///
/// [`wrap`]: SingleCountDownLatch::wrap
pub struct SingleCountDownLatch<T> {
    inner: Arc<LatchInner<T>>,
}

struct LatchInner<T> {
    fired: Mutex<Option<Fired<T>>>,
    signal: Condvar,
}

enum Fired<T> {
    Winner {
        latch_task: Arc<TaskHeader>,
        competitor: ResultHandle<T>,
    },
    Fatal(ApplicationError),
}

impl<T> Clone for SingleCountDownLatch<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> SingleCountDownLatch<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LatchInner {
                fired: Mutex::new(None),
                signal: Condvar::new(),
            }),
        }
    }

    pub fn is_fired(&self) -> bool {
        lock(&self.inner.fired).is_some()
    }

    fn count_down(&self, fired: Fired<T>) -> bool {
        let mut slot = lock(&self.inner.fired);
        if slot.is_some() {
            return false;
        }
        *slot = Some(fired);
        self.inner.signal.notify_all();
        true
    }

    /// Registers the `<competitor>_latch` task that fires this latch. It runs
    /// on the pool, with the competitor's diagnostics and timeout.
    pub fn wrap<B>(&self, builder: &B, competitor: ResultHandle<T>) -> Result<ResultHandle<T>, WorkflowError>
    where
        B: WorkflowBuilder + ?Sized,
    {
        let mut config = competitor.header().config().clone();
        if !config.exec_type().is_async() {
            config = config.with_exec_type(ExecType::Async);
        }

        let latch = self.clone();
        let name = format!("{}{LATCH_TASK_SUFFIX}", competitor.name());
        let task = Task::new(name, config, (), move |ctx, ()| match competitor.resolve(ctx) {
            Ok(Some(value)) => {
                let winner = latch.count_down(Fired::Winner {
                    latch_task: ctx.header().clone(),
                    competitor: competitor.clone(),
                });
                if winner {
                    tracing::debug!("{} fired the latch", competitor.name());
                }
                Ok(Some(value))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                latch.count_down(Fired::Fatal(err));
                Ok(None)
            }
        });

        builder.add_task(task)
    }

    /// Blocks until the latch fires or `timeout` elapses (`None` waits
    /// forever). Returns the winner's value, the fatal error that fired the
    /// latch, or `Ok(None)` on timeout.
    pub fn await_first(
        &self,
        timeout: impl Into<Option<Duration>>,
        caller: &(impl Caller + ?Sized),
    ) -> Result<Option<T>, ApplicationError> {
        let slot = lock(&self.inner.fired);
        let slot = match timeout.into() {
            Some(timeout) => {
                self.inner
                    .signal
                    .wait_timeout_while(slot, timeout, |fired| fired.is_none())
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
            None => self
                .inner
                .signal
                .wait_while(slot, |fired| fired.is_none())
                .unwrap_or_else(PoisonError::into_inner),
        };

        let (latch_task, competitor) = match &*slot {
            None => return Ok(None),
            Some(Fired::Fatal(err)) => return Err(err.clone()),
            Some(Fired::Winner {
                latch_task,
                competitor,
            }) => (latch_task.clone(), competitor.clone()),
        };
        drop(slot);

        latch_task.add_dependency(caller.caller_name());
        competitor.resolve(caller)
    }

    /// Registers a task that waits on the latch for at most the config's
    /// timeout and resolves to the winner's value.
    pub fn waiter<B>(
        &self,
        builder: &B,
        name: impl Into<String>,
        config: TaskConfig,
    ) -> Result<ResultHandle<T>, WorkflowError>
    where
        B: WorkflowBuilder + ?Sized,
    {
        let latch = self.clone();
        let timeout = config.timeout();
        let task = Task::new(name, config, (), move |ctx, ()| {
            Ok(latch.await_first(timeout, ctx)?)
        });
        builder.add_task(task)
    }
}

impl<T> Default for SingleCountDownLatch<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Wraps a factory so the task it creates competes for a latch.
pub struct LatchFactory<F, T> {
    latch: SingleCountDownLatch<T>,
    factory: F,
    key: OnceLock<String>,
}

impl<F, T> LatchFactory<F, T> {
    pub fn new(latch: SingleCountDownLatch<T>, factory: F) -> Self {
        Self {
            latch,
            factory,
            key: OnceLock::new(),
        }
    }
}

impl<B, F, T> TaskFactory<B> for LatchFactory<F, T>
where
    B: WorkflowBuilder + ?Sized,
    F: TaskFactory<B, Output = T>,
    T: Clone + Send + Sync + 'static,
{
    type Output = T;

    fn key(&self) -> &str {
        self.key
            .get_or_init(|| format!("{}{LATCH_TASK_SUFFIX}", self.factory.key()))
    }

    fn create(&self, builder: &B) -> Result<ResultHandle<T>, WorkflowError> {
        let competitor = self.factory.create(builder)?;
        self.latch.wrap(builder, competitor)
    }
}
