use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// A fatal, request-level error raised by a task.
///
/// Once a task fails with an `ApplicationError` the failure is sticky: the
/// handle caches it and every direct or indirect dependent receives the very
/// same error out of [`ResultHandle::resolve`](crate::ResultHandle::resolve).
/// Any other error returned from a task body is task-local, it gets recorded
/// on that task's diagnostic context and the task resolves to `None`.
///
/// The error is cheap to clone, clones share identity (see [`same_as`]).
///
/// [`same_as`]: ApplicationError::same_as
#[derive(Clone)]
pub struct ApplicationError(Arc<ApplicationErrorInner>);

struct ApplicationErrorInner {
    status: u16,
    message: String,
    payload: Option<serde_json::Value>,
    cause: Option<anyhow::Error>,
}

impl ApplicationError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self(Arc::new(ApplicationErrorInner {
            status,
            message: message.into(),
            payload: None,
            cause: None,
        }))
    }

    /// Attach an entity that should be returned to the client as-is.
    pub fn with_payload(status: u16, message: impl Into<String>, payload: serde_json::Value) -> Self {
        Self(Arc::new(ApplicationErrorInner {
            status,
            message: message.into(),
            payload: Some(payload),
            cause: None,
        }))
    }

    pub fn from_cause(status: u16, cause: impl Into<anyhow::Error>) -> Self {
        let cause = cause.into();
        Self(Arc::new(ApplicationErrorInner {
            status,
            message: cause.to_string(),
            payload: None,
            cause: Some(cause),
        }))
    }

    pub fn status(&self) -> u16 {
        self.0.status
    }

    pub fn message(&self) -> &str {
        &self.0.message
    }

    pub fn payload(&self) -> Option<&serde_json::Value> {
        self.0.payload.as_ref()
    }

    pub fn cause(&self) -> Option<&anyhow::Error> {
        self.0.cause.as_ref()
    }

    /// Whether both values originate from the same raised error.
    pub fn same_as(&self, other: &ApplicationError) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Finds an `ApplicationError` anywhere in an `anyhow` error chain.
    pub(crate) fn find(err: &anyhow::Error) -> Option<&ApplicationError> {
        err.chain().find_map(|e| e.downcast_ref::<ApplicationError>())
    }
}

impl fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "application error {}: {}", self.0.status, self.0.message)
    }
}

impl fmt::Debug for ApplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApplicationError")
            .field("status", &self.0.status)
            .field("message", &self.0.message)
            .field("payload", &self.0.payload)
            .field("cause", &self.0.cause)
            .finish()
    }
}

impl std::error::Error for ApplicationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        let cause: &(dyn std::error::Error + 'static) = &**self.0.cause.as_ref()?;
        Some(cause)
    }
}

/// Errors raised while wiring up or tearing down a workflow.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Attempted to add a duplicate key: {0}")]
    DuplicateTask(String),

    #[error("Cycle detected on task factory: {0}")]
    Cycle(String),

    #[error("Task factory {0} failed on an earlier call")]
    FactoryFailed(String),

    #[error("Diagnostics of workflow '{0}' were already collected")]
    AlreadyCollected(String),

    #[error("Task '{0}': use resolve() so that task dependencies are tracked")]
    UnsupportedAccessor(String),

    #[error("Task '{0}' was registered with a different output type")]
    TypeMismatch(String),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Worker pool has been shut down")]
    Shutdown,

    #[error("Couldn't spawn a worker thread.\n{0}")]
    Spawn(#[from] std::io::Error),
}

/// Outcome of a pipeline step, before it gets cached by a handle.
#[derive(Debug)]
pub(crate) enum Failure {
    Fatal(ApplicationError),
    Local(anyhow::Error),
}

impl From<anyhow::Error> for Failure {
    fn from(err: anyhow::Error) -> Self {
        match ApplicationError::find(&err) {
            Some(fatal) => Failure::Fatal(fatal.clone()),
            None => Failure::Local(err),
        }
    }
}

impl From<ApplicationError> for Failure {
    fn from(err: ApplicationError) -> Self {
        Failure::Fatal(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_keeps_identity() {
        let err = ApplicationError::new(500, "boom");
        let copy = err.clone();
        let other = ApplicationError::new(500, "boom");

        assert!(err.same_as(&copy));
        assert!(!err.same_as(&other));
    }

    #[test]
    fn test_failure_detects_fatal_through_context() {
        let err = ApplicationError::new(503, "unavailable");
        let wrapped = anyhow::Error::from(err.clone()).context("while loading");

        match Failure::from(wrapped) {
            Failure::Fatal(found) => assert!(found.same_as(&err)),
            Failure::Local(_) => panic!("expected a fatal failure"),
        }
    }

    #[test]
    fn test_failure_local() {
        let failure = Failure::from(anyhow::anyhow!("plain"));
        assert!(matches!(failure, Failure::Local(_)));
    }

    #[test]
    fn test_source_is_cause() {
        use std::error::Error;

        let err = ApplicationError::from_cause(400, anyhow::anyhow!("bad input"));
        assert_eq!(err.message(), "bad input");
        assert_eq!(err.source().map(|e| e.to_string()).as_deref(), Some("bad input"));
    }
}
