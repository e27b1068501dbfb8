use std::any::Any;
use std::collections::HashMap;
use std::fmt::{self, Display};
use std::sync::Arc;
use std::time::Duration;

use crate::engine::Dynamic;

/// Profiling requested through sampling never exceeds this share of requests.
const MAX_PROFILE_PERCENTAGE: f64 = 0.1;

/// How a task gets dispatched once submitted to an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecType {
    /// Runs inline on the thread that first resolves it.
    Sync,
    /// Runs on the worker pool, the timeout bounds the whole resolve window.
    Async,
    /// Runs on the worker pool, the timeout bounds only the task body.
    AsyncTimeout,
    /// Like `Sync`, but not reported to external tracing.
    Simple,
}

impl ExecType {
    pub fn is_async(self) -> bool {
        matches!(self, ExecType::Async | ExecType::AsyncTimeout)
    }
}

impl Display for ExecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExecType::Sync => "SYNC",
            ExecType::Async => "ASYNC",
            ExecType::AsyncTimeout => "ASYNC_TIMEOUT",
            ExecType::Simple => "SIMPLE",
        })
    }
}

/// Execution mode, timeout and diagnostic switches of a single task.
#[derive(Debug, Clone)]
pub struct TaskConfig {
    exec_type: ExecType,
    timeout: Option<Duration>,
    diagnostic: Arc<DiagnosticConfig>,
}

impl TaskConfig {
    pub fn new(exec_type: ExecType, timeout: Option<Duration>) -> Self {
        Self {
            exec_type,
            timeout,
            diagnostic: Arc::new(DiagnosticConfig::default()),
        }
    }

    pub fn sync() -> Self {
        Self::new(ExecType::Sync, None)
    }

    pub fn simple() -> Self {
        Self::new(ExecType::Simple, None)
    }

    /// Pool dispatch; `timeout` bounds how long resolvers wait, dependency
    /// waits included. `None` waits indefinitely.
    pub fn asynchronous(timeout: impl Into<Option<Duration>>) -> Self {
        Self::new(ExecType::Async, timeout.into())
    }

    /// Pool dispatch where `timeout` only covers the task's own body.
    pub fn async_timeout(timeout: Duration) -> Self {
        Self::new(ExecType::AsyncTimeout, Some(timeout))
    }

    pub fn with_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.timeout = timeout.into();
        self
    }

    pub fn with_exec_type(mut self, exec_type: ExecType) -> Self {
        self.exec_type = exec_type;
        self
    }

    pub fn with_diagnostics(mut self, diagnostic: Arc<DiagnosticConfig>) -> Self {
        self.diagnostic = diagnostic;
        self
    }

    pub fn exec_type(&self) -> ExecType {
        self.exec_type
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn diagnostic(&self) -> &Arc<DiagnosticConfig> {
        &self.diagnostic
    }
}

/// Replacement for a task result, applied right before the result is cached.
#[derive(Debug, Clone)]
pub enum TaskMock {
    /// Resolve the task to `None`.
    Null,
    Value(Dynamic),
}

impl TaskMock {
    pub fn value<T: Send + Sync + 'static>(value: T) -> Self {
        TaskMock::Value(Arc::new(value))
    }
}

/// Per-request diagnostic switches shared by every task of a workflow.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticConfig {
    show_diagnostics: bool,
    service_diagnostics: bool,
    profile: bool,
    task_mocks: HashMap<String, TaskMock>,
}

impl DiagnosticConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Profiling on, everything else off.
    pub fn profiling() -> Self {
        Self::default().with_profile(true)
    }

    /// Reads the flag pairs a request carries (`showdiag`,
    /// `forceServiceDownload`, `profile`), a flag is on when its value is `"1"`.
    pub fn from_flags<'a>(flags: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut config = Self::default();
        for (key, value) in flags {
            let on = value.trim() == "1";
            match key {
                "showdiag" => config.show_diagnostics = on,
                "forceServiceDownload" => config.service_diagnostics = on,
                "profile" => config.profile = on,
                _ => {}
            }
        }
        config
    }

    pub fn with_show_diagnostics(mut self, on: bool) -> Self {
        self.show_diagnostics = on;
        self
    }

    pub fn with_service_diagnostics(mut self, on: bool) -> Self {
        self.service_diagnostics = on;
        self
    }

    pub fn with_profile(mut self, on: bool) -> Self {
        self.profile = on;
        self
    }

    pub fn with_mock(mut self, task: impl Into<String>, mock: TaskMock) -> Self {
        self.task_mocks.insert(task.into(), mock);
        self
    }

    pub fn show_diagnostics(&self) -> bool {
        self.show_diagnostics
    }

    pub fn service_diagnostics(&self) -> bool {
        self.service_diagnostics
    }

    pub fn profiling_enabled(&self) -> bool {
        self.profile
    }

    /// Whether tasks should carry tags and dependency edges at all.
    pub fn publish_diagnostics(&self) -> bool {
        self.profile || self.show_diagnostics
    }

    pub(crate) fn has_mocks(&self) -> bool {
        !self.task_mocks.is_empty()
    }

    /// Applies the mock registered for `task`, if any, to a computed result.
    pub fn mock<T>(&self, task: &str, original: Option<T>) -> Option<T>
    where
        T: Clone + 'static,
    {
        match self.task_mocks.get(task) {
            None => original,
            Some(TaskMock::Null) => None,
            Some(TaskMock::Value(value)) => match (&**value as &dyn Any).downcast_ref::<T>() {
                Some(value) => Some(value.clone()),
                None => {
                    tracing::warn!(
                        "mock for task {task} is not a {}, keeping the computed value",
                        std::any::type_name::<T>()
                    );
                    original
                }
            },
        }
    }

    /// Sampling decision for the `count`-th request: profile one request in
    /// every `1 / percentage`, capped at ten percent.
    pub fn sample_profile(percentage: f64, count: u64) -> bool {
        let percentage = percentage.min(MAX_PROFILE_PERCENTAGE);
        if percentage <= 0.0 {
            return false;
        }
        let modulo = ((1.0 / percentage) as u64).max(1);
        count % modulo == 0
    }
}
