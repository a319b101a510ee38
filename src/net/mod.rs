//! Socket plumbing underneath the watch loops.
//!
//! - [`handle`]: [`Handle`](handle::Handle), the opaque socket identifier
//! - [`socket`]: locked accept/recv/send/close wrappers and blocking mode
//! - [`classify`]: errno classification shared by all operations
//! - [`utils`]: address conversion and interrupt pairs

pub mod classify;
pub mod handle;
pub mod socket;
pub mod utils;
