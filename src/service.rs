//! Calls to downstream services made from inside a task body.

use std::collections::BTreeMap;
use std::fmt::Debug;

use crate::diagnostic::{Diagnostic, ReportedError};
use crate::engine::TaskContext;
use crate::error::ApplicationError;

/// Error id reported when a downstream service fails.
pub const SERVICE_PROVIDER_ERROR: &str = "SERVICE_PROVIDER_ERROR";

/// Name of the child span timing a service call.
pub const GET_RESPONSE_SPAN: &str = "getResponse";

/// Request headers forwarded to a service as-is.
pub type Headers = BTreeMap<String, String>;

/// A downstream service.
pub trait ServiceInvoker<Req>: Send + Sync {
    type Response;

    fn invoke(&self, request: &Req, headers: &Headers) -> anyhow::Result<Self::Response>;
}

/// Runs a [`ServiceInvoker`] on behalf of a task and reports on the task.
///
/// A failure carrying an [`ApplicationError`] is returned as is. Any other
/// failure is recorded as a task exception plus a
/// [`SERVICE_PROVIDER_ERROR`] entry, and the call yields `Ok(None)`.
pub struct DiagnosticInvoker<I> {
    sender: String,
    invoker: I,
}

impl<I> DiagnosticInvoker<I> {
    pub fn new(sender: impl Into<String>, invoker: I) -> Self {
        Self {
            sender: sender.into(),
            invoker,
        }
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn invoke<Req>(
        &self,
        ctx: &TaskContext<'_>,
        request: &Req,
        headers: &Headers,
    ) -> Result<Option<I::Response>, ApplicationError>
    where
        I: ServiceInvoker<Req>,
        I::Response: Debug,
        Req: Debug,
    {
        let span = ctx.context().new_child_span(GET_RESPONSE_SPAN);
        let result = self.invoker.invoke(request, headers);

        let mut context = ctx.context();
        context.add_span(span);
        let service_diagnostics = context.config().service_diagnostics();

        match result {
            Ok(response) => {
                if service_diagnostics {
                    context.add_diagnostic(Diagnostic::Service {
                        sender: self.sender.clone(),
                        request: format!("{request:?}"),
                        response: format!("{response:?}"),
                    });
                }
                Ok(Some(response))
            }
            Err(err) => {
                if let Some(fatal) = ApplicationError::find(&err) {
                    return Err(fatal.clone());
                }

                tracing::warn!("service {} failed for task {}: {err:#}", self.sender, ctx.name());
                context.record_task_exception(ctx.name(), &err);
                context.add_error(ReportedError::new(
                    SERVICE_PROVIDER_ERROR,
                    format!("{}:{err}", self.sender),
                    false,
                ));
                if service_diagnostics {
                    context.add_diagnostic(Diagnostic::Service {
                        sender: self.sender.clone(),
                        request: format!("{request:?}"),
                        response: format!("error: {err}"),
                    });
                }
                Ok(None)
            }
        }
    }
}
