//! Socket readiness multiplexing with event dispatch.
//!
//! This crate watches sets of socket descriptors on background threads and
//! turns readiness into events delivered to a host-provided sink.
//!
//! # Architecture
//!
//! - **Server**: owns a listener, an interrupt handle and a registry of
//!   accepted connections. Its loop accepts, receives and prunes stale
//!   descriptors, raising `Accept`, `Data` and `Close` events
//! - **SocketList**: a caller-managed member set reported as `Ready` events,
//!   or read one datagram at a time as `RecvFrom` events
//! - **Poller**: `poll(2)` over a watch set with a timeout
//! - **Context**: the socket lock plus the event sink, shared by every loop
//!   and foreground call
//! - **BackgroundTask**: worker thread with a cooperative alive flag
//! - **Builders**: validated configuration for servers and lists
//!
//! # Example
//! ```ignore
//! let (context, events) = Context::with_channel();
//! let (interrupt, waker) = wake_pair(&context)?;
//! let mut server = Server::builder()
//!     .client_capacity(16)
//!     .build(&context, interrupt, listener)?;
//! server.start_watching()?;
//! ```

pub mod builder;
pub mod context;
pub mod error;
pub mod net;
pub mod reactor;
pub mod runtime;

pub use builder::{ServerBuilder, ServerConfig, SocketListBuilder};
pub use context::Context;
pub use error::{Error, Result};
pub use net::classify::{FailureKind, Operation};
pub use net::handle::Handle;
pub use net::socket::{accept, close, is_blocking, recv, recv_from, send, set_blocking};
pub use net::utils::{WakeHandle, wake_pair};
pub use reactor::core::Server;
pub use reactor::event::{Diagnostic, Event, EventKind, EventSink, Notification};
pub use reactor::io::ReceivePolicy;
pub use reactor::poller::{MAX_WATCH, Poller, poll};
pub use reactor::registry::{ClientRegistry, Compaction, Slot};
pub use reactor::select::{ListMode, SocketList};
pub use reactor::validity::{is_valid, retain_valid};
pub use runtime::task::{AliveFlag, BackgroundTask, TaskId};
