use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};

use crate::engine::lock;
use crate::error::PoolError;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// How long an idle worker waits for new work before retiring.
const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// Unbounded worker pool with cached-thread semantics.
///
/// A submitted job goes to an idle worker when there is one, otherwise a new
/// worker thread gets spawned for it. Tasks routinely block on each other, so
/// the pool never queues work behind a busy worker. Idle workers retire after
/// a keep-alive period.
///
/// Cloning is cheap, clones share the same workers.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    name: String,
    keep_alive: Duration,
    sender: Mutex<Option<Sender<Job>>>,
    receiver: Receiver<Job>,
    /// Workers waiting on the channel minus jobs waiting in it.
    idle: Arc<AtomicUsize>,
    next_id: AtomicUsize,
    spawned: AtomicUsize,
}

impl WorkerPool {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_keep_alive(name, DEFAULT_KEEP_ALIVE)
    }

    pub fn with_keep_alive(name: impl Into<String>, keep_alive: Duration) -> Self {
        let (sender, receiver) = unbounded();
        Self {
            inner: Arc::new(PoolInner {
                name: name.into(),
                keep_alive,
                sender: Mutex::new(Some(sender)),
                receiver,
                idle: Arc::new(AtomicUsize::new(0)),
                next_id: AtomicUsize::new(0),
                spawned: AtomicUsize::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Number of worker threads started over the pool's lifetime.
    pub fn spawned_workers(&self) -> usize {
        self.inner.spawned.load(Ordering::Relaxed)
    }

    pub fn is_shutdown(&self) -> bool {
        lock(&self.inner.sender).is_none()
    }

    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> Result<(), PoolError> {
        let sender = lock(&self.inner.sender);
        let Some(sender) = sender.as_ref() else {
            return Err(PoolError::Shutdown);
        };

        let claimed = self
            .inner
            .idle
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();

        if claimed {
            sender.send(Box::new(job)).map_err(|_| PoolError::Shutdown)
        } else {
            self.spawn_worker(Box::new(job))
        }
    }

    /// Stops accepting work. Queued and running jobs still complete, idle
    /// workers exit once the queue drains.
    pub fn shutdown(&self) {
        if lock(&self.inner.sender).take().is_some() {
            tracing::debug!("worker pool {} shut down", self.inner.name);
        }
    }

    fn spawn_worker(&self, first: Job) -> Result<(), PoolError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let receiver = self.inner.receiver.clone();
        let idle = self.inner.idle.clone();
        let keep_alive = self.inner.keep_alive;

        thread::Builder::new()
            .name(format!("{}-{}", self.inner.name, id))
            .spawn(move || work(first, receiver, idle, keep_alive))?;
        self.inner.spawned.fetch_add(1, Ordering::Relaxed);

        tracing::trace!("worker pool {} spawned worker {}", self.inner.name, id);
        Ok(())
    }
}

fn work(first: Job, receiver: Receiver<Job>, idle: Arc<AtomicUsize>, keep_alive: Duration) {
    first();

    loop {
        idle.fetch_add(1, Ordering::AcqRel);

        let job = match receiver.recv_timeout(keep_alive) {
            Ok(job) => job,
            Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => {
                // leave only if no submitter counted on us in the meantime
                let retired = idle
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
                    .is_ok();
                if retired {
                    return;
                }
                match receiver.recv() {
                    Ok(job) => job,
                    Err(_) => return,
                }
            }
        };

        job();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("name", &self.inner.name)
            .field("spawned", &self.spawned_workers())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}
