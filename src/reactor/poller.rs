//! Readiness multiplexer over `poll(2)`.
//!
//! Every call takes a snapshot of the handles to watch and a finite timeout;
//! there is no "wait forever" mode. Only read readiness is reported. Hang-ups,
//! errors and closed descriptors count as readable so that the following
//! receive observes them.

use crate::error::{Error, Result};
use crate::net::classify::Operation;
use crate::net::handle::Handle;

use libc::{POLLERR, POLLHUP, POLLIN, POLLNVAL, nfds_t, pollfd};
use std::fmt;
use std::time::Duration;
use tracing::trace;

/// Largest number of handles one multiplex call accepts.
pub const MAX_WATCH: usize = 4096;

const READABLE: libc::c_short = POLLIN | POLLHUP | POLLERR | POLLNVAL;

/// Reusable multiplexer state for one watch loop.
#[derive(Default)]
pub struct Poller {
    fds: Vec<pollfd>,
    ready: Vec<Handle>,
}

impl Poller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits up to `timeout` for any of `watch` to become readable.
    ///
    /// Returns the ready handles in `watch` order. A zero timeout returns
    /// immediately with whatever is ready now.
    pub fn wait(&mut self, watch: &[Handle], timeout: Duration) -> Result<&[Handle]> {
        if watch.is_empty() {
            return Err(Error::EmptyWatchSet);
        }

        if watch.len() > MAX_WATCH {
            return Err(Error::TooManyDescriptors {
                len: watch.len(),
                limit: MAX_WATCH,
            });
        }

        self.fds.clear();
        self.fds.extend(watch.iter().map(|handle| pollfd {
            fd: handle.raw(),
            events: POLLIN,
            revents: 0,
        }));
        self.ready.clear();

        let count = unsafe {
            libc::poll(
                self.fds.as_mut_ptr(),
                self.fds.len() as nfds_t,
                timeout_millis(timeout),
            )
        };

        if count < 0 {
            return Err(Error::last_os(Operation::Poll));
        }

        if count > 0 {
            self.ready.extend(
                self.fds
                    .iter()
                    .zip(watch)
                    .filter(|(fd, _)| fd.revents & READABLE != 0)
                    .map(|(_, &handle)| handle),
            );
        }

        trace!(watched = watch.len(), ready = self.ready.len(), "poll returned");

        Ok(&self.ready)
    }
}

impl fmt::Debug for Poller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Poller")
            .field("watched", &self.fds.len())
            .field("ready", &self.ready)
            .finish()
    }
}

/// One-shot multiplex call over `watch`.
pub fn poll(watch: &[Handle], timeout: Duration) -> Result<Vec<Handle>> {
    let mut poller = Poller::new();

    poller.wait(watch, timeout).map(<[Handle]>::to_vec)
}

// Rounds sub-millisecond positive timeouts up so they still wait.
fn timeout_millis(timeout: Duration) -> libc::c_int {
    if timeout.is_zero() {
        return 0;
    }

    let millis = timeout.as_micros().div_ceil(1000);

    millis.clamp(1, libc::c_int::MAX as u128) as libc::c_int
}
