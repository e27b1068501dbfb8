use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, LazyLock, Mutex, PoisonError};
use std::thread::{self, ThreadId};

use crate::engine::{ResultHandle, lock};
use crate::error::WorkflowError;

/// Creates one task (and whatever it depends on) through a builder.
///
/// Factories referenced from several places are memoized per workflow by
/// [`TaskInstance`] or [`TaskInstanceHolder`], keyed by [`key`].
///
/// [`key`]: TaskFactory::key
pub trait TaskFactory<B: ?Sized> {
    type Output: Clone + Send + Sync + 'static;

    /// Stable identity of the factory within a workflow.
    fn key(&self) -> &str;

    fn create(&self, builder: &B) -> Result<ResultHandle<Self::Output>, WorkflowError>;
}

enum Slot<T> {
    Uninitialized,
    Initializing(ThreadId),
    Initialized(ResultHandle<T>),
    /// The factory failed, later calls fail without retrying.
    Failed,
}

/// Threads blocked on a slot another thread is initializing, with that owner.
static WAITING: LazyLock<Mutex<HashMap<ThreadId, Waiting>>> = LazyLock::new(Default::default);

#[derive(Clone, Copy)]
struct Waiting {
    owner: ThreadId,
    /// Address of the awaited `TaskInstance`.
    slot: usize,
}

/// Whether `me` waiting on a slot owned by `owner` closes a wait-for cycle.
fn closes_cycle(waiting: &HashMap<ThreadId, Waiting>, me: ThreadId, owner: ThreadId) -> bool {
    let mut current = owner;
    for _ in 0..=waiting.len() {
        if current == me {
            return true;
        }
        match waiting.get(&current) {
            Some(next) => current = next.owner,
            None => return false,
        }
    }
    false
}

/// "Create once, share the handle" cell for a single factory.
pub struct TaskInstance<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

impl<T> TaskInstance<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Uninitialized),
            ready: Condvar::new(),
        }
    }

    /// Returns the memoized handle, creating it through `factory` on the first
    /// call.
    ///
    /// Other threads wait for the creating thread to finish. Re-entering from
    /// inside the factory, directly or by waiting on a thread that waits on
    /// this one, means the factory depends on itself and fails with
    /// [`WorkflowError::Cycle`].
    pub fn get<B, F>(&self, builder: &B, factory: &F) -> Result<ResultHandle<T>, WorkflowError>
    where
        B: ?Sized,
        F: TaskFactory<B, Output = T> + ?Sized,
    {
        let me = thread::current().id();
        let id = self as *const Self as usize;
        {
            let mut slot = lock(&self.slot);
            loop {
                match &*slot {
                    Slot::Initialized(handle) => return Ok(handle.clone()),
                    Slot::Failed => return Err(WorkflowError::FactoryFailed(factory.key().to_owned())),
                    Slot::Initializing(owner) => {
                        let owner = *owner;
                        let mut waiting = lock(&WAITING);
                        if closes_cycle(&waiting, me, owner) {
                            tracing::error!("cycle detected on task factory {}", factory.key());
                            return Err(WorkflowError::Cycle(factory.key().to_owned()));
                        }
                        waiting.insert(me, Waiting { owner, slot: id });
                    }
                    Slot::Uninitialized => break,
                }
                slot = self.ready.wait(slot).unwrap_or_else(PoisonError::into_inner);
                lock(&WAITING).remove(&me);
            }
            *slot = Slot::Initializing(me);
        }

        let created = factory.create(builder);

        let mut slot = lock(&self.slot);
        *slot = match &created {
            Ok(handle) => Slot::Initialized(handle.clone()),
            Err(_) => Slot::Failed,
        };
        // waiters are no longer blocked on this thread
        lock(&WAITING).retain(|_, waiting| waiting.slot != id);
        self.ready.notify_all();
        created
    }

    pub fn is_initialized(&self) -> bool {
        matches!(*lock(&self.slot), Slot::Initialized(_))
    }
}

impl<T> Default for TaskInstance<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Per-workflow map of [`TaskInstance`]s keyed by [`TaskFactory::key`].
#[derive(Default)]
pub struct TaskInstanceHolder {
    instances: Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl TaskInstanceHolder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<B, F>(&self, builder: &B, factory: &F) -> Result<ResultHandle<F::Output>, WorkflowError>
    where
        B: ?Sized,
        F: TaskFactory<B> + ?Sized,
    {
        let instance = lock(&self.instances)
            .entry(factory.key().to_owned())
            .or_insert_with(|| Arc::new(TaskInstance::<F::Output>::new()) as Arc<dyn Any + Send + Sync>)
            .clone();

        let instance = instance
            .downcast::<TaskInstance<F::Output>>()
            .map_err(|_| WorkflowError::TypeMismatch(factory.key().to_owned()))?;

        // the map is unlocked here, factories recurse into the holder
        instance.get(builder, factory)
    }

    pub fn len(&self) -> usize {
        lock(&self.instances).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
