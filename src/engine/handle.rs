use std::any::Any;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::config::TaskConfig;
use crate::engine::{Caller, Handle, TaskHeader, lock};
use crate::error::{ApplicationError, WorkflowError};

pub(crate) type Outcome<T> = Result<Option<T>, ApplicationError>;

type Inline<T> = Box<dyn FnOnce() -> Outcome<T> + Send>;

enum State<T> {
    /// Runs on the first resolving thread.
    Inline(Inline<T>),
    /// Dispatched to the worker pool, the result arrives on the channel.
    Pooled(Receiver<Outcome<T>>),
    Resolving,
    Done(Outcome<T>),
}

/// Memoizing, blocking accessor over the outcome of one task.
///
/// The only way to read the result is [`resolve`], which records the caller
/// as a dependent of the task before blocking. The task's work happens at most
/// once; every later call gets the cached value, `None`, or the same
/// [`ApplicationError`].
///
/// [`resolve`]: ResultHandle::resolve
pub struct ResultHandle<T> {
    inner: Arc<HandleInner<T>>,
}

struct HandleInner<T> {
    header: Arc<TaskHeader>,
    /// Upper bound for waiting on a pooled result.
    wait: Option<Duration>,
    state: Mutex<State<T>>,
}

impl<T> Clone for ResultHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> ResultHandle<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn with_state(header: Arc<TaskHeader>, wait: Option<Duration>, state: State<T>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                header,
                wait,
                state: Mutex::new(state),
            }),
        }
    }

    pub(crate) fn inline(
        header: Arc<TaskHeader>,
        run: impl FnOnce() -> Outcome<T> + Send + 'static,
    ) -> Self {
        Self::with_state(header, None, State::Inline(Box::new(run)))
    }

    pub(crate) fn pooled(
        header: Arc<TaskHeader>,
        receiver: Receiver<Outcome<T>>,
        wait: Option<Duration>,
    ) -> Self {
        Self::with_state(header, wait, State::Pooled(receiver))
    }

    fn completed(name: impl Into<String>, outcome: Outcome<T>) -> Self {
        let header = TaskHeader::new(name.into(), TaskConfig::simple(), vec![]);
        Self::with_state(Arc::new(header), None, State::Done(outcome))
    }

    /// A handle that already holds `value`.
    pub fn value(name: impl Into<String>, value: T) -> Self {
        Self::completed(name, Ok(Some(value)))
    }

    /// A handle that resolves to `None`, for optional inputs left out.
    pub fn null(name: impl Into<String>) -> Self {
        Self::completed(name, Ok(None))
    }

    /// A handle that raises `err` on every resolution.
    pub fn fatal(name: impl Into<String>, err: ApplicationError) -> Self {
        Self::completed(name, Err(err))
    }

    pub fn name(&self) -> &str {
        self.inner.header.name()
    }

    pub fn header(&self) -> &Arc<TaskHeader> {
        &self.inner.header
    }

    /// Blocks until the task's outcome is known.
    ///
    /// Returns `Ok(None)` when the task failed locally or timed out, and the
    /// task's fatal error when it raised one, also on every later call.
    pub fn resolve(&self, caller: &(impl Caller + ?Sized)) -> Result<Option<T>, ApplicationError> {
        self.inner.header.add_dependency(caller.caller_name());

        let mut state = lock(&self.inner.state);
        let outcome = match std::mem::replace(&mut *state, State::Resolving) {
            State::Done(outcome) => {
                *state = State::Done(outcome.clone());
                return outcome;
            }
            State::Inline(run) => run(),
            State::Pooled(receiver) => self.receive(receiver),
            State::Resolving => self.fail(anyhow!("an earlier resolution of {} panicked", self.name())),
        };

        let outcome = self.apply_mock(outcome);
        *state = State::Done(outcome.clone());
        outcome
    }

    fn receive(&self, receiver: Receiver<Outcome<T>>) -> Outcome<T> {
        let name = self.name();
        let received = match self.inner.wait {
            Some(wait) => receiver.recv_timeout(wait).map_err(|err| match err {
                RecvTimeoutError::Timeout => anyhow!("task {name} timed out after {wait:?}"),
                RecvTimeoutError::Disconnected => anyhow!("task {name} never completed"),
            }),
            None => receiver
                .recv()
                .map_err(|_| anyhow!("task {name} never completed")),
        };

        received.unwrap_or_else(|err| self.fail(err))
    }

    fn fail(&self, err: anyhow::Error) -> Outcome<T> {
        let mut context = self.inner.header.context();
        context.stop_span();
        context.record_task_exception(self.name(), &err);
        Ok(None)
    }

    fn apply_mock(&self, outcome: Outcome<T>) -> Outcome<T> {
        let diagnostic = self.inner.header.config().diagnostic();
        match outcome {
            Ok(value) if diagnostic.has_mocks() => Ok(diagnostic.mock(self.name(), value)),
            outcome => outcome,
        }
    }

    /// Always fails, use [`resolve`](ResultHandle::resolve).
    pub fn get(&self) -> Result<Option<T>, WorkflowError> {
        Err(WorkflowError::UnsupportedAccessor(self.name().to_owned()))
    }

    /// Always fails, use [`resolve`](ResultHandle::resolve).
    pub fn get_timeout(&self, _timeout: Duration) -> Result<Option<T>, WorkflowError> {
        Err(WorkflowError::UnsupportedAccessor(self.name().to_owned()))
    }

    /// Tasks cannot be cancelled, this always returns `false`.
    pub fn cancel(&self) -> bool {
        false
    }

    pub fn is_cancelled(&self) -> bool {
        false
    }

    pub fn is_done(&self) -> bool {
        matches!(*lock(&self.inner.state), State::Done(_))
    }
}

impl<T> Handle for ResultHandle<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn header(&self) -> &Arc<TaskHeader> {
        &self.inner.header
    }

    fn wait(&self, caller: &str) -> Result<(), ApplicationError> {
        self.resolve(caller).map(|_| ())
    }

    fn is_done(&self) -> bool {
        ResultHandle::is_done(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl<T> std::fmt::Debug for ResultHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultHandle")
            .field("name", &self.inner.header.name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use crossbeam_channel::bounded;

    use super::*;
    use crate::config::{DiagnosticConfig, TaskMock};
    use crate::diagnostic::DEPENDENCIES_TAG;

    fn header(name: &str, config: TaskConfig) -> Arc<TaskHeader> {
        Arc::new(TaskHeader::new(name.into(), config, vec![]))
    }

    #[test]
    fn test_inline_runs_once_under_concurrent_resolvers() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let handle = ResultHandle::inline(header("slow", TaskConfig::sync()), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(30));
            Ok(Some(42))
        });

        let threads: Vec<_> = (0..8)
            .map(|i| {
                let handle = handle.clone();
                thread::spawn(move || handle.resolve(&format!("caller{i}")).unwrap())
            })
            .collect();

        for thread in threads {
            assert_eq!(thread.join().unwrap(), Some(42));
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(handle.is_done());
    }

    #[test]
    fn test_fatal_is_sticky() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let err = ApplicationError::new(500, "boom");
        let raised = err.clone();
        let handle: ResultHandle<i32> = ResultHandle::inline(header("fatal", TaskConfig::sync()), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(raised)
        });

        let first = handle.resolve("a").unwrap_err();
        let second = handle.resolve("b").unwrap_err();

        assert!(first.same_as(&err));
        assert!(second.same_as(&err));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pooled_timeout_resolves_to_none() {
        let (_tx, rx) = bounded::<Outcome<i32>>(1);
        let handle = ResultHandle::pooled(
            header("late", TaskConfig::asynchronous(Duration::from_millis(20))),
            rx,
            Some(Duration::from_millis(20)),
        );

        assert_eq!(handle.resolve("root").unwrap(), None);
        assert_eq!(handle.header().context().errors().len(), 1);
    }

    #[test]
    fn test_pooled_receives_value() {
        let (tx, rx) = bounded(1);
        let handle = ResultHandle::pooled(header("fast", TaskConfig::asynchronous(None)), rx, None);
        tx.send(Ok(Some("done"))).unwrap();

        assert_eq!(handle.resolve("root").unwrap(), Some("done"));
        assert_eq!(handle.resolve("root").unwrap(), Some("done"));
    }

    #[test]
    fn test_resolve_records_every_caller() {
        let config = TaskConfig::sync().with_diagnostics(Arc::new(DiagnosticConfig::profiling()));
        let handle = ResultHandle::inline(header("number", config), || Ok(Some(1)));

        handle.resolve("sum").unwrap();
        handle.resolve("report").unwrap();

        assert_eq!(
            handle.header().context().tag(DEPENDENCIES_TAG),
            Some("sum:report")
        );
    }

    #[test]
    fn test_mock_replaces_value_before_caching() {
        let diagnostic = DiagnosticConfig::new().with_mock("number", TaskMock::value(4));
        let config = TaskConfig::sync().with_diagnostics(Arc::new(diagnostic));
        let handle = ResultHandle::inline(header("number", config), || Ok(Some(1)));

        assert_eq!(handle.resolve("sum").unwrap(), Some(4));
    }

    #[test]
    fn test_unsupported_accessors() {
        let handle = ResultHandle::value("constant", 1);

        assert!(matches!(handle.get(), Err(WorkflowError::UnsupportedAccessor(_))));
        assert!(matches!(
            handle.get_timeout(Duration::from_millis(1)),
            Err(WorkflowError::UnsupportedAccessor(_))
        ));
        assert!(!handle.cancel());
        assert!(!handle.is_cancelled());
        assert!(handle.is_done());
    }

    #[test]
    fn test_constant_handles() {
        assert_eq!(ResultHandle::value("v", 3).resolve("t").unwrap(), Some(3));
        assert_eq!(ResultHandle::<u8>::null("n").resolve("t").unwrap(), None);
        assert!(
            ResultHandle::<u8>::fatal("f", ApplicationError::new(400, "bad"))
                .resolve("t")
                .is_err()
        );
    }
}
