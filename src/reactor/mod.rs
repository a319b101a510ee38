//! Readiness multiplexing and event dispatch.
//!
//! - [`poller`]: `poll(2)` wrapper returning the ready subset of a watch set
//! - [`validity`]: stale descriptor detection
//! - [`registry`]: the client registry owned by a server
//! - [`socket`]: accepting into the registry
//! - [`io`]: receive dispatch for ready connections
//! - [`core`]: the [`Server`](core::Server) and its watch loop
//! - [`select`]: caller-managed [`SocketList`](select::SocketList)s
//! - [`event`]: what the loops raise

pub mod core;
pub mod event;
pub mod io;
pub mod poller;
pub mod registry;
pub mod select;
pub mod socket;
pub mod validity;
