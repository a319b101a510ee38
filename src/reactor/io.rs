//! Receive dispatch for ready connections.

use crate::context::Context;
use crate::net::classify::Operation;
use crate::net::handle::Handle;
use crate::net::socket;
use crate::reactor::event::{Diagnostic, Event};
use crate::reactor::registry::ClientRegistry;
use crate::runtime::task::TaskId;

use libc::{EBADF, ENOTSOCK};
use std::collections::HashSet;
use tracing::trace;

/// How a receive error on a descriptor the multiplexer reported ready is
/// handled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReceivePolicy {
    /// Every error ends the connection with a `Close` event.
    #[default]
    CloseOnError,
    /// `EINTR` and `EAGAIN` are absorbed; the connection stays registered.
    RetryTransient,
}

enum Outcome {
    Data(usize),
    Closed,
    Invalid,
    Skip,
}

/// Owns the scratch buffer shared by all connections of one server.
///
/// The buffer is only borrowed for one receive plus the copy out of it.
#[derive(Debug)]
pub(crate) struct ReceiveDispatcher {
    buffer: Box<[u8]>,
    policy: ReceivePolicy,
}

impl ReceiveDispatcher {
    pub(crate) fn new(buffer_size: usize, policy: ReceivePolicy) -> Self {
        Self {
            buffer: vec![0u8; buffer_size].into_boxed_slice(),
            policy,
        }
    }

    /// Performs one receive on every live, ready connection in registry order.
    ///
    /// Stops scanning once `ready_clients` connections were serviced. Returns
    /// how many were serviced.
    pub(crate) fn dispatch(
        &mut self,
        context: &Context,
        task: TaskId,
        listener: Handle,
        registry: &mut ClientRegistry,
        ready: &HashSet<Handle>,
        ready_clients: usize,
    ) -> usize {
        let mut serviced = 0;

        for index in 0..registry.len() {
            if serviced == ready_clients {
                break;
            }

            let Some(connection) = registry.get(index).and_then(|slot| slot.live()) else {
                continue;
            };

            if !ready.contains(&connection) {
                continue;
            }

            serviced += 1;

            match self.receive(context, task, connection) {
                Outcome::Data(n) => {
                    trace!(connection = %connection, bytes = n, "data received");

                    let bytes = self.buffer[..n].to_vec();
                    context.sink().raise(
                        task,
                        Event::Data {
                            listener,
                            connection,
                            bytes,
                        },
                    );
                }
                Outcome::Closed => {
                    registry.mark_closed(index);
                    context.sink().raise(task, Event::Close(connection));
                }
                Outcome::Invalid => {
                    registry.mark_invalid(index);
                    context.sink().raise(task, Event::Close(connection));
                }
                Outcome::Skip => {}
            }
        }

        serviced
    }

    fn receive(&mut self, context: &Context, task: TaskId, connection: Handle) -> Outcome {
        let err = match socket::recv_raw(context, connection, &mut self.buffer, 0) {
            Ok(0) => return Outcome::Closed,
            Ok(n) => return Outcome::Data(n),
            Err(err) => err,
        };

        let errno = err.raw_os_error().unwrap_or(-1);
        let diagnostic = Diagnostic::new(Operation::Recv, errno, Some(connection));

        if diagnostic.kind.is_transient() && self.policy == ReceivePolicy::RetryTransient {
            return Outcome::Skip;
        }

        if errno == EBADF || errno == ENOTSOCK {
            context.sink().report(task, diagnostic);
            return Outcome::Invalid;
        }

        if !diagnostic.kind.is_connection_terminal() {
            context.sink().report(task, diagnostic);
        }

        Outcome::Closed
    }
}
