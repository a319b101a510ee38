//! Shared state every component receives at construction.
//!
//! All data-moving socket syscalls (accept, recv, recvfrom, send, close) run
//! under one lock, whether they come from a watch loop or from the host. The
//! multiplexer never takes it. The lock lives in a [`Context`] that is cloned
//! into every server, socket list and foreground call instead of a global.

use crate::reactor::event::{self, EventSink, Notification};

use crossbeam_channel::Receiver;
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::Arc;

#[derive(Clone)]
pub struct Context {
    lock: Arc<Mutex<()>>,
    sink: Arc<dyn EventSink>,
}

impl Context {
    /// Creates a context that delivers events to `sink`.
    pub fn new(sink: impl EventSink) -> Self {
        Self {
            lock: Arc::new(Mutex::new(())),
            sink: Arc::new(sink),
        }
    }

    /// Creates a context backed by an unbounded channel and returns its receiver.
    pub fn with_channel() -> (Self, Receiver<Notification>) {
        let (sender, receiver) = event::channel();

        (Self::new(sender), receiver)
    }

    /// Takes the socket lock for the duration of the returned guard.
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }

    /// Runs `function` while holding the socket lock.
    pub fn locked<R>(&self, function: impl FnOnce() -> R) -> R {
        let _guard = self.lock.lock();

        function()
    }

    pub(crate) fn sink(&self) -> &dyn EventSink {
        self.sink.as_ref()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("locked", &self.lock.is_locked())
            .finish_non_exhaustive()
    }
}
