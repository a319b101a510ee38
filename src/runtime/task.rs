//! Dedicated worker threads for watch loops.
//!
//! Each started [`Server`](crate::Server) or [`SocketList`](crate::SocketList)
//! runs its loop on its own thread. Cancellation is cooperative: the loop
//! checks an [`AliveFlag`] once per iteration and returns its state when the
//! flag drops, which [`BackgroundTask::join`] hands back to the foreground.

use crate::error::{Error, Result};

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use tracing::debug;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of a background task, attached to every event it raises.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        Self(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Host-visible "task alive" flag.
#[derive(Clone, Debug)]
pub struct AliveFlag(Arc<AtomicBool>);

impl AliveFlag {
    pub(crate) fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_alive(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A watch loop running on its own thread, producing `T` when it stops.
pub struct BackgroundTask<T> {
    id: TaskId,
    alive: AliveFlag,
    handle: Option<JoinHandle<T>>,
}

impl<T: Send + 'static> BackgroundTask<T> {
    /// Starts `function` on a new thread named `name`.
    ///
    /// The function receives the task id and the alive flag it must poll.
    pub fn spawn<F>(name: &str, function: F) -> Result<Self>
    where
        F: FnOnce(TaskId, AliveFlag) -> T + Send + 'static,
    {
        let id = TaskId::next();
        let alive = AliveFlag::new();
        let flag = alive.clone();

        let handle = thread::Builder::new()
            .name(format!("{name}-{id}"))
            .spawn(move || function(id, flag))
            .map_err(Error::Spawn)?;

        debug!(task = %id, name, "background task started");

        Ok(Self {
            id,
            alive,
            handle: Some(handle),
        })
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    /// True until the task was cancelled or its thread returned.
    pub fn is_alive(&self) -> bool {
        self.alive.is_alive()
            && self
                .handle
                .as_ref()
                .is_some_and(|handle| !handle.is_finished())
    }

    /// Asks the loop to stop after its current iteration.
    pub fn cancel(&self) {
        self.alive.cancel();
    }

    /// Cancels the task and waits for its thread, returning what it produced.
    pub fn join(mut self) -> Result<T> {
        self.cancel();

        let handle = self.handle.take().ok_or(Error::WorkerPanicked)?;
        let output = handle.join().map_err(|_| Error::WorkerPanicked)?;

        debug!(task = %self.id, "background task joined");

        Ok(output)
    }
}

impl<T> Drop for BackgroundTask<T> {
    fn drop(&mut self) {
        self.alive.cancel();
    }
}

impl<T> fmt::Debug for BackgroundTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundTask")
            .field("id", &self.id)
            .field("alive", &self.alive.is_alive())
            .finish()
    }
}
