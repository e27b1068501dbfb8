//! Per-task diagnostic state: errors, profiling spans, tags, tracking values.

mod profiler;
mod report;

use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

pub use crate::diagnostic::profiler::{ProfileModel, Span};
pub use crate::diagnostic::report::DiagnosticReport;

use crate::config::DiagnosticConfig;
use crate::error::ApplicationError;

/// Tag holding the callers of a task, joined by [`DEPENDENCIES_SEPARATOR`].
pub const DEPENDENCIES_TAG: &str = "dependencies";
pub const DEPENDENCIES_SEPARATOR: char = ':';
pub const EXCEPTION_TAG: &str = "exception";
pub const EXEC_TYPE_TAG: &str = "execType";
pub const NODE_LABEL_TAG: &str = "node_label";
pub const PARENT_TASK_TAG: &str = "parent_task";
pub const TASK_THREAD_TAG: &str = "task_thread";

/// Maximum number of causes rendered for a recorded task exception.
const MAX_CAUSE_DEPTH: usize = 10;

/// An error surfaced to the client alongside (or instead of) the response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportedError {
    pub id: String,
    pub message: String,
    pub severe: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ReportedError {
    pub fn new(id: impl Into<String>, message: impl Into<String>, severe: bool) -> Self {
        Self {
            id: id.into(),
            message: message.into(),
            severe,
            status: None,
        }
    }
}

/// Verbose records kept only when diagnostics were requested.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    Service {
        sender: String,
        request: String,
        response: String,
    },
    Exception {
        task: String,
        trace: Vec<String>,
    },
}

/// Typed key of the tracking map, rendered as `kind:key`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TrackingKey {
    pub kind: String,
    pub key: String,
}

impl TrackingKey {
    pub fn new(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            key: key.into(),
        }
    }
}

impl Display for TrackingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.key)
    }
}

/// Everything a task reports about its own execution.
///
/// Each task owns exactly one context. After the workflow completes, every
/// context is folded into the root task's context with [`merge_from`].
///
/// [`merge_from`]: DiagnosticContext::merge_from
#[derive(Debug, Clone)]
pub struct DiagnosticContext {
    config: Arc<DiagnosticConfig>,
    span: Span,
    errors: Vec<ReportedError>,
    diagnostics: Vec<Diagnostic>,
    tracking: Option<BTreeMap<TrackingKey, Value>>,
}

impl DiagnosticContext {
    pub fn new(name: impl Into<String>, config: Arc<DiagnosticConfig>) -> Self {
        let enabled = config.publish_diagnostics();
        Self {
            config,
            span: Span::new(name, enabled),
            errors: Vec::new(),
            diagnostics: Vec::new(),
            tracking: None,
        }
    }

    pub fn name(&self) -> &str {
        self.span.name()
    }

    pub fn config(&self) -> &Arc<DiagnosticConfig> {
        &self.config
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn start_span(&mut self) {
        self.span.start();
    }

    pub fn stop_span(&mut self) {
        self.span.stop();
    }

    /// A started, detached span; hand it back with [`add_span`] once stopped.
    ///
    /// [`add_span`]: DiagnosticContext::add_span
    pub fn new_child_span(&self, name: impl Into<String>) -> Span {
        Span::started(name, self.span.is_enabled())
    }

    pub fn add_span(&mut self, mut span: Span) {
        span.stop();
        self.span.add_child(span);
    }

    pub fn add_tag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.span.add_tag(key, value);
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.span.tag(key)
    }

    /// Records `caller` as a dependent of this task.
    pub fn add_dependency(&mut self, caller: &str) {
        if !self.span.is_enabled() {
            return;
        }
        let dependencies = match self.span.tag(DEPENDENCIES_TAG) {
            None => caller.to_owned(),
            Some(existing) if existing.split(DEPENDENCIES_SEPARATOR).any(|d| d == caller) => return,
            Some(existing) => format!("{existing}{DEPENDENCIES_SEPARATOR}{caller}"),
        };
        self.span.add_tag(DEPENDENCIES_TAG, dependencies);
    }

    /// Copies the state of another task's context into this one.
    pub fn merge_from(&mut self, other: &DiagnosticContext) {
        self.errors.extend(other.errors.iter().cloned());
        self.diagnostics.extend(other.diagnostics.iter().cloned());
        if let Some(tracking) = &other.tracking {
            for (key, value) in tracking {
                self.add_tracking(key.clone(), value.clone());
            }
        }
        self.span.add_child(other.span.clone());
    }

    pub fn record_fatal_error(&mut self, err: &ApplicationError) {
        self.errors.push(ReportedError {
            id: "APPLICATION_ERROR".into(),
            message: err.message().to_owned(),
            severe: true,
            status: Some(err.status()),
        });
    }

    /// Records a task-local failure, which the task itself swallows.
    pub fn record_task_exception(&mut self, task: &str, err: &anyhow::Error) {
        tracing::debug!("task {task} failed: {err:#}");

        self.span.add_tag(EXCEPTION_TAG, err.to_string());
        self.errors.push(ReportedError::new("TASK_EXCEPTION", format!("{task}: {err}"), false));

        if self.config.show_diagnostics() {
            let mut trace = Vec::new();
            for (depth, cause) in err.chain().enumerate().take(MAX_CAUSE_DEPTH) {
                match depth {
                    0 => trace.push(cause.to_string()),
                    _ => trace.push(format!("Caused by: {cause}")),
                }
            }
            self.diagnostics.push(Diagnostic::Exception {
                task: task.to_owned(),
                trace,
            });
        }
    }

    pub fn add_error(&mut self, error: ReportedError) {
        self.errors.push(error);
    }

    pub fn errors(&self) -> &[ReportedError] {
        &self.errors
    }

    pub fn add_diagnostic(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Adds a tracking value. Array values under an existing key are appended,
    /// any other collision keeps the first value.
    pub fn add_tracking(&mut self, key: TrackingKey, value: Value) {
        let tracking = self.tracking.get_or_insert_with(BTreeMap::new);
        match tracking.get_mut(&key) {
            None => {
                tracking.insert(key, value);
            }
            Some(Value::Array(existing)) => match value {
                Value::Array(items) => existing.extend(items),
                _ => tracing::error!("tracking key {key} holds a list, ignoring a scalar value"),
            },
            Some(_) => tracing::error!("duplicate tracking key {key}"),
        }
    }

    pub fn add_tracking_list<I, S>(&mut self, key: TrackingKey, items: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let items = items.into_iter().map(|item| Value::String(item.into())).collect();
        self.add_tracking(key, Value::Array(items));
    }

    pub fn tracking(&self, key: &TrackingKey) -> Option<&Value> {
        self.tracking.as_ref()?.get(key)
    }

    pub(crate) fn tracking_entries(&self) -> impl Iterator<Item = (&TrackingKey, &Value)> {
        self.tracking.iter().flatten()
    }
}
