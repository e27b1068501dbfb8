mod handle;
pub(crate) mod pipeline;
mod pool;
mod task;

use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use crate::engine::handle::ResultHandle;
pub use crate::engine::pool::WorkerPool;
pub use crate::engine::task::{Task, TaskContext, TaskHeader};

pub(crate) use crate::engine::handle::Outcome;
pub(crate) use crate::engine::task::Body;

use crate::error::ApplicationError;

pub(crate) type Dynamic = Arc<dyn Any + Send + Sync>;

/// Locks a mutex, recovering the data if a panicking thread poisoned it.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Anything that resolves task results and shows up as a dependent in the
/// diagnostic dependency graph.
pub trait Caller {
    fn caller_name(&self) -> &str;
}

impl Caller for str {
    fn caller_name(&self) -> &str {
        self
    }
}

impl Caller for String {
    fn caller_name(&self) -> &str {
        self
    }
}

/// Type-erased view of a [`ResultHandle`], used by the executor registry and
/// by the dependency-wait stage.
pub trait Handle: Send + Sync {
    fn header(&self) -> &Arc<TaskHeader>;

    /// Resolves the handle, dropping the value.
    fn wait(&self, caller: &str) -> Result<(), ApplicationError>;

    fn is_done(&self) -> bool;

    fn as_any(&self) -> &dyn Any;
}

/// A trait that enables a collection of [`ResultHandle`]s to be used as
/// dependencies of a task.
///
/// Implemented for `()`, a single handle, a `Vec` of handles and tuples of
/// handles. The declared order is the order in which the engine waits for
/// dependencies of the same execution mode.
pub trait Dependencies: Send + 'static {
    /// The resolved values, each `None` when the dependency failed locally.
    type Output;

    fn handles(&self) -> Vec<Arc<dyn Handle>>;

    fn resolve(&self, caller: &str) -> Result<Self::Output, ApplicationError>;
}

impl Dependencies for () {
    type Output = ();

    fn handles(&self) -> Vec<Arc<dyn Handle>> {
        vec![]
    }

    fn resolve(&self, _: &str) -> Result<Self::Output, ApplicationError> {
        Ok(())
    }
}

impl<T> Dependencies for ResultHandle<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = Option<T>;

    fn handles(&self) -> Vec<Arc<dyn Handle>> {
        vec![Arc::new(self.clone())]
    }

    fn resolve(&self, caller: &str) -> Result<Self::Output, ApplicationError> {
        ResultHandle::resolve(self, caller)
    }
}

impl<T> Dependencies for Vec<ResultHandle<T>>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = Vec<Option<T>>;

    fn handles(&self) -> Vec<Arc<dyn Handle>> {
        self.iter()
            .map(|handle| Arc::new(handle.clone()) as Arc<dyn Handle>)
            .collect()
    }

    fn resolve(&self, caller: &str) -> Result<Self::Output, ApplicationError> {
        self.iter().map(|handle| handle.resolve(caller)).collect()
    }
}

macro_rules! impl_deps {
    ($($D:ident),*) => {
        #[allow(non_snake_case)]
        impl<$($D),*> Dependencies for ($(ResultHandle<$D>,)*)
        where
            $($D: Clone + Send + Sync + 'static),* {
            type Output = ($(Option<$D>,)*);

            fn handles(&self) -> Vec<Arc<dyn Handle>> {
                let ($($D,)*) = self;
                vec![$(Arc::new($D.clone()) as Arc<dyn Handle>,)*]
            }

            fn resolve(&self, caller: &str) -> Result<Self::Output, ApplicationError> {
                let ($($D,)*) = self;
                Ok(($($D.resolve(caller)?,)*))
            }
        }
    };
}

impl_deps!(A);
impl_deps!(A, B);
impl_deps!(A, B, C);
impl_deps!(A, B, C, D);
impl_deps!(A, B, C, D, E);
impl_deps!(A, B, C, D, E, F);
impl_deps!(A, B, C, D, E, F, G);
impl_deps!(A, B, C, D, E, F, G, H);
