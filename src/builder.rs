//! Fluent builders for servers and socket lists.
//!
//! Builders validate their settings before anything is created, so contract
//! errors surface on the foreground call rather than inside a watch loop.
//!
//! # Example
//! ```ignore
//! let (context, events) = Context::with_channel();
//! let server = ServerBuilder::new()
//!     .client_capacity(16)
//!     .timeout(Duration::from_millis(50))
//!     .build(&context, interrupt, listener)?;
//! ```

use crate::context::Context;
use crate::error::{Error, Result};
use crate::net::handle::Handle;
use crate::reactor::core::Server;
use crate::reactor::io::ReceivePolicy;
use crate::reactor::poller::MAX_WATCH;
use crate::reactor::select::{ListMode, SocketList};

use std::time::Duration;

pub const DEFAULT_CLIENT_CAPACITY: usize = 64;
pub const DEFAULT_BUFFER_SIZE: usize = 8192;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(50);

/// Longest poll timeout accepted; it is also the worst-case stop latency.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(60);

/// Settings of one [`Server`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    pub client_capacity: usize,
    pub buffer_size: usize,
    pub timeout: Duration,
    pub receive_policy: ReceivePolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            client_capacity: DEFAULT_CLIENT_CAPACITY,
            buffer_size: DEFAULT_BUFFER_SIZE,
            timeout: DEFAULT_TIMEOUT,
            receive_policy: ReceivePolicy::default(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        // The listener and the interrupt share the multiplex set with clients.
        let limit = MAX_WATCH - 2;

        if self.client_capacity == 0 || self.client_capacity > limit {
            return Err(Error::InvalidConfig(format!(
                "client capacity must be in 1..={limit}, got {}",
                self.client_capacity
            )));
        }

        if self.buffer_size == 0 {
            return Err(Error::InvalidConfig("buffer size must be positive".into()));
        }

        validate_timeout(self.timeout)
    }
}

#[derive(Debug, Default)]
pub struct ServerBuilder {
    config: ServerConfig,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum number of connections tracked at once.
    pub fn client_capacity(mut self, capacity: usize) -> Self {
        self.config.client_capacity = capacity;
        self
    }

    /// Size of the scratch buffer, i.e. the largest payload of one `Data` event.
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.buffer_size = size;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn receive_policy(mut self, policy: ReceivePolicy) -> Self {
        self.config.receive_policy = policy;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Validates the settings and creates the server.
    ///
    /// `listener` must already be bound and listening. The server takes
    /// ownership of both handles.
    pub fn build(self, context: &Context, interrupt: Handle, listener: Handle) -> Result<Server> {
        self.config.validate()?;

        if interrupt == listener {
            return Err(Error::InvalidConfig(
                "interrupt and listener must be distinct handles".into(),
            ));
        }

        Ok(Server::with_config(context, interrupt, listener, self.config))
    }
}

#[derive(Debug)]
pub struct SocketListBuilder {
    timeout: Duration,
    capacity_hint: usize,
    mode: ListMode,
}

impl Default for SocketListBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SocketListBuilder {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            capacity_hint: 0,
            mode: ListMode::Ready,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Expected number of members; only used to size storage up front.
    pub fn capacity_hint(mut self, hint: usize) -> Self {
        self.capacity_hint = hint;
        self
    }

    /// Receive one datagram per ready member and raise `RecvFrom` events
    /// instead of `Ready`.
    pub fn recv_from(mut self, buffer_size: usize) -> Self {
        self.mode = ListMode::RecvFrom { buffer_size };
        self
    }

    /// Validates the settings and creates the list. The list takes ownership
    /// of `interrupt`.
    pub fn build(self, context: &Context, interrupt: Handle) -> Result<SocketList> {
        validate_timeout(self.timeout)?;

        if let ListMode::RecvFrom { buffer_size: 0 } = self.mode {
            return Err(Error::InvalidConfig("buffer size must be positive".into()));
        }

        let hint = self.capacity_hint.min(MAX_WATCH - 1);

        Ok(SocketList::with_config(
            context,
            interrupt,
            hint,
            self.timeout,
            self.mode,
        ))
    }
}

// A zero timeout would turn a watch loop into a busy loop.
fn validate_timeout(timeout: Duration) -> Result<()> {
    if timeout.is_zero() {
        return Err(Error::InvalidConfig("timeout must be positive".into()));
    }

    if timeout > MAX_TIMEOUT {
        return Err(Error::InvalidConfig(format!(
            "timeout must not exceed {MAX_TIMEOUT:?}, got {timeout:?}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(ServerConfig::default().validate().is_ok());
    }

    #[test]
    fn capacity_bounds() {
        let zero = ServerBuilder::new().client_capacity(0);
        assert!(matches!(zero.config().validate(), Err(Error::InvalidConfig(_))));

        let huge = ServerBuilder::new().client_capacity(MAX_WATCH);
        assert!(huge.config().validate().is_err());

        let largest = ServerBuilder::new().client_capacity(MAX_WATCH - 2);
        assert!(largest.config().validate().is_ok());
    }

    #[test]
    fn buffer_and_timeout_bounds() {
        assert!(ServerBuilder::new().buffer_size(0).config().validate().is_err());
        assert!(
            ServerBuilder::new()
                .timeout(MAX_TIMEOUT + Duration::from_millis(1))
                .config()
                .validate()
                .is_err()
        );
        assert!(
            ServerBuilder::new()
                .timeout(Duration::ZERO)
                .config()
                .validate()
                .is_err()
        );
        assert!(
            ServerBuilder::new()
                .timeout(Duration::from_millis(1))
                .config()
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn same_handle_for_interrupt_and_listener_is_rejected() {
        let (context, _events) = Context::with_channel();
        let handle = Handle::new(3).unwrap();

        let result = ServerBuilder::new().build(&context, handle, handle);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn zero_sized_datagram_buffer_is_rejected() {
        let (context, _events) = Context::with_channel();
        let handle = Handle::new(3).unwrap();

        let result = SocketListBuilder::new().recv_from(0).build(&context, handle);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn zero_list_timeout_is_rejected() {
        let (context, _events) = Context::with_channel();
        let handle = Handle::new(3).unwrap();

        let result = SocketListBuilder::new()
            .timeout(Duration::ZERO)
            .build(&context, handle);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
