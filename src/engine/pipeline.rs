//! Explicit execution stages wrapped around a task body.
//!
//! A pipeline is a list of [`Stage`]s applied outermost first around a
//! [`Terminal`]: either the task body or another handle to delegate to. The
//! executor picks the stage list from the task's execution mode and the
//! diagnostic configuration.

use std::any::Any;
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::anyhow;

use crate::diagnostic::{PARENT_TASK_TAG, TASK_THREAD_TAG};
use crate::engine::{Body, Handle, Outcome, ResultHandle, TaskContext, TaskHeader, WorkerPool};
use crate::error::{ApplicationError, Failure};

thread_local! {
    static CURRENT_TASK: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Name of the task whose pipeline runs on this thread, if any.
pub(crate) fn current_task() -> Option<String> {
    CURRENT_TASK.with(|current| current.borrow().clone())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Stage {
    /// Tags the parent task and the worker thread, and marks the task as the
    /// current one on this thread.
    TagThread { parent: Option<String> },
    /// Resolves every dependency, sync ones first.
    WaitDependencies,
    /// Times the rest of the pipeline on the task's span.
    TimeSpan,
    /// Swallows task-local failures after recording them.
    RecordException,
}

pub(crate) enum Terminal<T> {
    Body(Body<T>),
    Delegate(ResultHandle<T>),
}

pub(crate) struct Pipeline<T> {
    stages: Vec<Stage>,
    terminal: Terminal<T>,
    /// The task this pipeline runs as, it waits on the dependencies.
    header: Arc<TaskHeader>,
    /// The task whose span and failures the pipeline reports on.
    target: Arc<TaskHeader>,
    pool: WorkerPool,
}

impl<T> Pipeline<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        header: Arc<TaskHeader>,
        stages: Vec<Stage>,
        terminal: Terminal<T>,
        pool: WorkerPool,
    ) -> Self {
        Self {
            stages,
            terminal,
            target: header.clone(),
            header,
            pool,
        }
    }

    /// Report timing and failures on `target` instead of the running task.
    pub(crate) fn on_behalf_of(mut self, target: Arc<TaskHeader>) -> Self {
        self.target = target;
        self
    }

    pub(crate) fn run(self) -> Outcome<T> {
        let Pipeline {
            stages,
            terminal,
            header,
            target,
            pool,
        } = self;

        let invocation = Invocation {
            header: &header,
            target: &target,
            pool: &pool,
        };

        match invocation.proceed(&stages, terminal) {
            Ok(value) => Ok(value),
            Err(Failure::Fatal(err)) => Err(err),
            Err(Failure::Local(err)) => {
                target.context().record_task_exception(target.name(), &err);
                Ok(None)
            }
        }
    }
}

struct Invocation<'a> {
    header: &'a Arc<TaskHeader>,
    target: &'a Arc<TaskHeader>,
    pool: &'a WorkerPool,
}

impl Invocation<'_> {
    fn proceed<T>(&self, stages: &[Stage], terminal: Terminal<T>) -> Result<Option<T>, Failure>
    where
        T: Clone + Send + Sync + 'static,
    {
        let Some((stage, rest)) = stages.split_first() else {
            return self.finish(terminal);
        };

        match stage {
            Stage::TagThread { parent } => {
                {
                    let mut context = self.header.context();
                    if let Some(parent) = parent {
                        context.add_tag(PARENT_TASK_TAG, parent.as_str());
                    }
                    let thread = std::thread::current();
                    context.add_tag(TASK_THREAD_TAG, thread.name().unwrap_or("unnamed"));
                }

                let name = self.target.name().to_owned();
                let previous = CURRENT_TASK.with(|current| current.replace(Some(name)));
                let result = self.proceed(rest, terminal);
                CURRENT_TASK.with(|current| *current.borrow_mut() = previous);
                result
            }
            Stage::WaitDependencies => {
                self.wait_dependencies()?;
                self.proceed(rest, terminal)
            }
            Stage::TimeSpan => {
                self.target.context().start_span();
                let result = self.proceed(rest, terminal);
                self.target.context().stop_span();
                result
            }
            Stage::RecordException => {
                let result = panic::catch_unwind(AssertUnwindSafe(|| self.proceed(rest, terminal)))
                    .unwrap_or_else(|payload| {
                        Err(Failure::Local(anyhow!("task panicked: {}", panic_message(&*payload))))
                    });

                match result {
                    Err(Failure::Local(err)) => {
                        self.target.context().record_task_exception(self.target.name(), &err);
                        Ok(None)
                    }
                    Err(Failure::Fatal(err)) => {
                        self.target.context().record_fatal_error(&err);
                        Err(Failure::Fatal(err))
                    }
                    ok => ok,
                }
            }
        }
    }

    fn finish<T>(&self, terminal: Terminal<T>) -> Result<Option<T>, Failure>
    where
        T: Clone + Send + Sync + 'static,
    {
        match terminal {
            Terminal::Body(body) => {
                let ctx = TaskContext::new(self.target, self.pool);
                body(&ctx).map_err(Failure::from)
            }
            Terminal::Delegate(handle) => handle.resolve(self.target.name()).map_err(Failure::Fatal),
        }
    }

    /// Resolves sync dependencies serially in declared order, then async
    /// ones in declared order, so the time spent in the task body excludes
    /// waiting on inputs. A fatal error from any of them aborts the wait.
    fn wait_dependencies(&self) -> Result<(), ApplicationError> {
        let dependencies = self.header.dependencies();
        if dependencies.is_empty() {
            return Ok(());
        }

        let span = self.header.context().new_child_span("wait_deps");
        let is_async = |dependency: &&Arc<dyn Handle>| {
            dependency.header().config().exec_type().is_async()
        };

        let result = dependencies
            .iter()
            .filter(|d| !is_async(d))
            .chain(dependencies.iter().filter(is_async))
            .try_for_each(|dependency| dependency.wait(self.header.name()));

        self.header.context().add_span(span);
        result
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
