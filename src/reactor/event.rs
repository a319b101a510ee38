//! Events raised by the watch loops.
//!
//! A watch loop never returns results directly. It hands [`Event`]s and
//! [`Diagnostic`]s to an [`EventSink`], which is the host's queue. The default
//! sink is a `crossbeam_channel` sender carrying [`Notification`]s.

use crate::net::classify::{FailureKind, Operation, tag};
use crate::net::handle::Handle;
use crate::runtime::task::TaskId;

use crossbeam_channel::{Receiver, Sender, unbounded};
use std::fmt;
use std::net::SocketAddr;
use tracing::{trace, warn};

/// Immutable notification produced by a watch loop.
///
/// Payload bytes are always an owned copy; they never alias a loop's scratch
/// buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The listener accepted `connection`, now tracked by the server registry.
    Accept { listener: Handle, connection: Handle },
    /// One receive on `connection` returned `bytes`.
    Data {
        listener: Handle,
        connection: Handle,
        bytes: Vec<u8>,
    },
    /// One datagram received on `connection` from `source`.
    DataFrom {
        connection: Handle,
        source: SocketAddr,
        bytes: Vec<u8>,
    },
    /// Members of a socket list that are readable, in member order.
    Ready(Vec<Handle>),
    /// The peer closed or reset `connection`.
    Close(Handle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Accept,
    Data,
    RecvFrom,
    Ready,
    Close,
}

impl EventKind {
    /// Name under which the host receives the event.
    pub fn name(self) -> &'static str {
        match self {
            EventKind::Accept => "Accept",
            EventKind::Data => "Data",
            EventKind::RecvFrom => "RecvFrom",
            EventKind::Ready => "Ready",
            EventKind::Close => "Close",
        }
    }

    /// Older hosts know `Ready` as `Select` and `Data` as `Recv`.
    pub fn legacy_name(self) -> &'static str {
        match self {
            EventKind::Ready => "Select",
            EventKind::Data => "Recv",
            other => other.name(),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Accept { .. } => EventKind::Accept,
            Event::Data { .. } => EventKind::Data,
            Event::DataFrom { .. } => EventKind::RecvFrom,
            Event::Ready(_) => EventKind::Ready,
            Event::Close(_) => EventKind::Close,
        }
    }
}

/// A failure a watch loop absorbed and kept running after.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub operation: Operation,
    pub kind: FailureKind,
    pub errno: i32,
    pub handle: Option<Handle>,
}

impl Diagnostic {
    pub(crate) fn new(operation: Operation, errno: i32, handle: Option<Handle>) -> Self {
        Self {
            operation,
            kind: FailureKind::classify(operation, errno),
            errno,
            handle,
        }
    }

    /// Host-facing message tag, e.g. `acceptRetry`.
    pub fn tag(&self) -> String {
        tag(self.operation, self.kind)
    }
}

/// What travels through the default channel sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Event { task: TaskId, event: Event },
    Diagnostic { task: TaskId, diagnostic: Diagnostic },
}

impl Notification {
    pub fn task(&self) -> TaskId {
        match self {
            Notification::Event { task, .. } | Notification::Diagnostic { task, .. } => *task,
        }
    }

    pub fn into_event(self) -> Option<Event> {
        match self {
            Notification::Event { event, .. } => Some(event),
            Notification::Diagnostic { .. } => None,
        }
    }
}

/// Destination for everything a watch loop produces.
pub trait EventSink: Send + Sync + 'static {
    fn raise(&self, task: TaskId, event: Event);

    fn report(&self, task: TaskId, diagnostic: Diagnostic) {
        warn!(task = %task, tag = %diagnostic.tag(), errno = diagnostic.errno, "watch loop diagnostic");
    }
}

impl EventSink for Sender<Notification> {
    fn raise(&self, task: TaskId, event: Event) {
        let kind = event.kind();

        if self.send(Notification::Event { task, event }).is_err() {
            trace!(task = %task, kind = %kind, "event dropped, receiver is gone");
        }
    }

    fn report(&self, task: TaskId, diagnostic: Diagnostic) {
        warn!(task = %task, tag = %diagnostic.tag(), errno = diagnostic.errno, "watch loop diagnostic");

        let _ = self.send(Notification::Diagnostic { task, diagnostic });
    }
}

/// Creates an unbounded notification queue.
pub fn channel() -> (Sender<Notification>, Receiver<Notification>) {
    unbounded()
}
