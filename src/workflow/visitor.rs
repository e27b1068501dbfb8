//! Workflows that run a fixed list of visitors over the same visitees.

use std::sync::Arc;

use crate::config::TaskConfig;
use crate::engine::{Caller, ResultHandle, TaskContext};
use crate::error::{ApplicationError, WorkflowError};
use crate::workflow::{Workflow, WorkflowBuilder};

/// Suffix of the handle holding the visitees once every visitor ran.
pub const VISITEES_TASK_SUFFIX: &str = "_visitees";

/// One step applied to every visitee of a [`VisitorWorkflow`].
///
/// Each visitor becomes a task of the nested workflow, named after
/// [`Visitor::name`]. A failed visit is recorded on that task and the
/// visitor moves on to the next visitee, unless the failure carries an
/// [`ApplicationError`].
pub trait Visitor<T>: Send + Sync {
    fn name(&self) -> &str;

    fn config(&self) -> TaskConfig {
        TaskConfig::sync()
    }

    fn visit(&self, ctx: &TaskContext<'_>, visitee: &T) -> anyhow::Result<()>;
}

/// Where the visitees come from.
pub enum Visitees<T> {
    Value(T),
    Values(Vec<T>),
    Task(ResultHandle<T>),
    Tasks(ResultHandle<Vec<T>>),
}

impl<T> Visitees<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// A task that resolved to `None` provides no visitees.
    pub fn provide(self, caller: &(impl Caller + ?Sized)) -> Result<Vec<T>, ApplicationError> {
        Ok(match self {
            Visitees::Value(value) => vec![value],
            Visitees::Values(values) => values,
            Visitees::Task(handle) => handle.resolve(caller)?.into_iter().collect(),
            Visitees::Tasks(handle) => handle.resolve(caller)?.unwrap_or_default(),
        })
    }
}

/// A task that visits its visitees inside a nested workflow.
///
/// Visitors run in the order they were added, each one over every visitee.
/// With no visitees nothing is visited and the task resolves to `None`.
pub struct VisitorWorkflow<T> {
    name: String,
    config: TaskConfig,
    visitors: Vec<Arc<dyn Visitor<T>>>,
}

impl<T> VisitorWorkflow<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: TaskConfig::sync(),
            visitors: Vec::new(),
        }
    }

    pub fn config(mut self, config: TaskConfig) -> Self {
        self.config = config;
        self
    }

    pub fn visitor(mut self, visitor: impl Visitor<T> + 'static) -> Self {
        self.visitors.push(Arc::new(visitor));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Visits the visitees and resolves to the first of them.
    pub fn single(
        &self,
        builder: &impl WorkflowBuilder,
        visitees: Visitees<T>,
    ) -> Result<ResultHandle<T>, WorkflowError> {
        self.submit(builder, visitees, |name, visitees| {
            match visitees.into_iter().next() {
                Some(first) => ResultHandle::value(name, first),
                None => ResultHandle::null(name),
            }
        })
    }

    /// Visits the visitees and resolves to all of them.
    pub fn multi(
        &self,
        builder: &impl WorkflowBuilder,
        visitees: Visitees<T>,
    ) -> Result<ResultHandle<Vec<T>>, WorkflowError> {
        self.submit(builder, visitees, |name, visitees| {
            if visitees.is_empty() {
                ResultHandle::null(name)
            } else {
                ResultHandle::value(name, visitees)
            }
        })
    }

    fn submit<R>(
        &self,
        builder: &impl WorkflowBuilder,
        visitees: Visitees<T>,
        finish: fn(String, Vec<T>) -> ResultHandle<R>,
    ) -> Result<ResultHandle<R>, WorkflowError>
    where
        R: Clone + Send + Sync + 'static,
    {
        let workflow = builder.workflow();
        let visitors = self.visitors.clone();
        let result_name = format!("{}{VISITEES_TASK_SUFFIX}", self.name);

        workflow
            .task(self.name.clone())
            .config(self.config.clone().with_diagnostics(workflow.diagnostic_config().clone()))
            .depends_on(())
            .run_workflow(move |inner, ()| {
                let visitees: Arc<[T]> = visitees.provide(inner)?.into();
                if !visitees.is_empty() {
                    let handles = visitors
                        .iter()
                        .map(|visitor| add_visitor(inner, visitor.clone(), visitees.clone()))
                        .collect::<Result<Vec<_>, _>>()?;
                    for handle in &handles {
                        handle.resolve(inner)?;
                    }
                }
                Ok(finish(result_name, visitees.to_vec()))
            })
    }
}

fn add_visitor<T>(
    inner: &Workflow,
    visitor: Arc<dyn Visitor<T>>,
    visitees: Arc<[T]>,
) -> Result<ResultHandle<()>, WorkflowError>
where
    T: Clone + Send + Sync + 'static,
{
    inner
        .task(visitor.name().to_owned())
        .config(visitor.config().with_diagnostics(inner.diagnostic_config().clone()))
        .run(move |ctx| visit_all(visitor.as_ref(), ctx, &visitees))
}

fn visit_all<T>(visitor: &dyn Visitor<T>, ctx: &TaskContext<'_>, visitees: &[T]) -> anyhow::Result<()> {
    for visitee in visitees {
        let Err(err) = visitor.visit(ctx, visitee) else {
            continue;
        };
        if ApplicationError::find(&err).is_some() {
            return Err(err);
        }
        tracing::warn!("visitor {} failed: {err:#}", ctx.name());
        ctx.context().record_task_exception(ctx.name(), &err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::config::DiagnosticConfig;
    use crate::diagnostic::EXCEPTION_TAG;
    use crate::engine::WorkerPool;

    #[derive(Debug, Default)]
    struct Page {
        sections: Mutex<Vec<String>>,
    }

    impl Page {
        fn sections(&self) -> Vec<String> {
            self.sections.lock().unwrap().clone()
        }
    }

    struct Section(&'static str);

    impl Visitor<Arc<Page>> for Section {
        fn name(&self) -> &str {
            self.0
        }

        fn visit(&self, _: &TaskContext<'_>, page: &Arc<Page>) -> anyhow::Result<()> {
            page.sections.lock().unwrap().push(self.0.to_string());
            Ok(())
        }
    }

    struct Broken;

    impl Visitor<Arc<Page>> for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn visit(&self, _: &TaskContext<'_>, _: &Arc<Page>) -> anyhow::Result<()> {
            anyhow::bail!("missing body")
        }
    }

    struct Counting(Arc<AtomicUsize>);

    impl Visitor<Arc<Page>> for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        fn visit(&self, _: &TaskContext<'_>, _: &Arc<Page>) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Forbidden;

    impl Visitor<Arc<Page>> for Forbidden {
        fn name(&self) -> &str {
            "forbidden"
        }

        fn visit(&self, _: &TaskContext<'_>, _: &Arc<Page>) -> anyhow::Result<()> {
            Err(ApplicationError::new(403, "page is private").into())
        }
    }

    fn profiled(name: &str) -> Workflow {
        Workflow::new(name, Arc::new(DiagnosticConfig::profiling()), &WorkerPool::new("visitor-test"))
    }

    #[test]
    fn test_single_visitee_runs_every_visitor() {
        let workflow = profiled("request");
        let render = VisitorWorkflow::new("render")
            .visitor(Section("header"))
            .visitor(Broken)
            .visitor(Section("footer"));
        let page = Arc::new(Page::default());

        let handle = render.single(&workflow, Visitees::Value(page.clone())).unwrap();
        let visited = handle.resolve(&workflow).unwrap().unwrap();

        assert!(Arc::ptr_eq(&visited, &page));
        assert_eq!(page.sections(), vec!["header", "footer"]);

        let report = workflow.collect_diagnostics().unwrap();
        let render = report.task("render").unwrap();
        let broken = render.child("broken").unwrap();
        assert_eq!(broken.data.get(EXCEPTION_TAG).map(String::as_str), Some("missing body"));
        assert!(render.child("header").unwrap().data.get(EXCEPTION_TAG).is_none());
    }

    #[test]
    fn test_multi_visitees_from_task() {
        let workflow = profiled("request");
        let pages = workflow
            .task("pages")
            .asynchronous(None)
            .run(|_| Ok(vec![Arc::new(Page::default()), Arc::new(Page::default())]))
            .unwrap();
        let render = VisitorWorkflow::new("render")
            .visitor(Section("header"))
            .visitor(Section("footer"));

        let handle = render.multi(&workflow, Visitees::Tasks(pages)).unwrap();
        let visited = handle.resolve(&workflow).unwrap().unwrap();

        assert_eq!(visited.len(), 2);
        for page in &visited {
            assert_eq!(page.sections(), vec!["header", "footer"]);
        }
    }

    #[test]
    fn test_no_visitees_resolves_to_none() {
        let workflow = profiled("request");
        let visits = Arc::new(AtomicUsize::new(0));

        let empty_list = VisitorWorkflow::new("empty_list")
            .visitor(Counting(visits.clone()))
            .multi(&workflow, Visitees::Values(vec![]))
            .unwrap();
        let missing_page = VisitorWorkflow::new("missing_page")
            .visitor(Counting(visits.clone()))
            .single(&workflow, Visitees::Task(ResultHandle::null("page")))
            .unwrap();

        assert!(empty_list.resolve(&workflow).unwrap().is_none());
        assert!(missing_page.resolve(&workflow).unwrap().is_none());
        assert_eq!(visits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_fatal_visit_aborts() {
        let workflow = profiled("request");
        let page = Arc::new(Page::default());
        let render = VisitorWorkflow::new("render")
            .visitor(Forbidden)
            .visitor(Section("footer"));

        let handle = render.single(&workflow, Visitees::Value(page.clone())).unwrap();
        let err = handle.resolve(&workflow).unwrap_err();

        assert_eq!(err.status(), 403);
        assert!(page.sections().is_empty());
    }
}
