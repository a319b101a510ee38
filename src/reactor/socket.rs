use crate::context::Context;
use crate::net::classify::{FailureKind, Operation};
use crate::net::handle::Handle;
use crate::net::socket::{self, Drained};
use crate::reactor::event::{Diagnostic, Event};
use crate::reactor::registry::ClientRegistry;
use crate::runtime::task::TaskId;

use tracing::{debug, trace};

/// Accepts one connection on a ready listener and registers it.
///
/// Failures are reported as diagnostics and never stop the caller's loop. A
/// connection the registry has no room for is closed straight away.
pub(crate) fn accept_client(
    context: &Context,
    task: TaskId,
    listener: Handle,
    registry: &mut ClientRegistry,
) -> Option<Handle> {
    let connection = match socket::accept_raw(context, listener) {
        Ok(connection) => connection,
        Err(err) => {
            let errno = err.raw_os_error().unwrap_or(-1);
            let diagnostic = Diagnostic::new(Operation::Accept, errno, Some(listener));

            // Another thread won the race for this connection.
            if !diagnostic.kind.is_transient() {
                context.sink().report(task, diagnostic);
            }

            return None;
        }
    };

    if registry.append(connection).is_err() {
        debug!(listener = %listener, connection = %connection, "registry full, dropping connection");

        if let Err(err) = socket::close(context, connection) {
            debug!(connection = %connection, error = %err, "closing refused connection failed");
        }
        context.sink().report(
            task,
            Diagnostic {
                operation: Operation::Accept,
                kind: FailureKind::CapacityExceeded,
                errno: 0,
                handle: Some(listener),
            },
        );

        return None;
    }

    debug!(listener = %listener, connection = %connection, "connection accepted");
    context.sink().raise(
        task,
        Event::Accept {
            listener,
            connection,
        },
    );

    Some(connection)
}

/// Interrupt handle of a watch loop.
///
/// Once its writing end is gone the handle stays readable forever, so it is
/// retired: reported once and left out of every later watch set. The loop
/// still owns it and closes it on removal.
#[derive(Debug)]
pub(crate) struct Interrupt {
    handle: Handle,
    live: bool,
}

impl Interrupt {
    pub(crate) fn new(handle: Handle) -> Self {
        Self { handle, live: true }
    }

    pub(crate) fn handle(&self) -> Handle {
        self.handle
    }

    /// Whether the handle still belongs in the watch set.
    pub(crate) fn is_live(&self) -> bool {
        self.live
    }

    /// Empties a ready interrupt, retiring it if its writer is gone.
    pub(crate) fn service(&mut self, context: &Context, task: TaskId) {
        match socket::drain(context, self.handle) {
            Ok(Drained::Emptied(bytes)) => {
                trace!(interrupt = %self.handle, bytes, "interrupt drained");
            }
            Ok(Drained::Closed) => self.retire(context, task, 0),
            Err(err) => self.retire(context, task, err.raw_os_error().unwrap_or(-1)),
        }
    }

    fn retire(&mut self, context: &Context, task: TaskId, errno: i32) {
        debug!(interrupt = %self.handle, errno, "interrupt writer gone, no longer watched");

        self.live = false;
        context
            .sink()
            .report(task, Diagnostic::new(Operation::Recv, errno, Some(self.handle)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::utils::wake_pair;
    use crate::reactor::event::Notification;

    #[test]
    fn wake_up_keeps_interrupt_live() {
        let (context, events) = Context::with_channel();
        let (handle, waker) = wake_pair(&context).unwrap();
        let mut interrupt = Interrupt::new(handle);

        waker.wake().unwrap();
        interrupt.service(&context, TaskId::from_raw(1));

        assert!(interrupt.is_live());
        assert!(events.try_recv().is_err());

        socket::close(&context, handle).unwrap();
    }

    #[test]
    fn closed_writer_retires_interrupt_once() {
        let (context, events) = Context::with_channel();
        let (handle, waker) = wake_pair(&context).unwrap();
        let mut interrupt = Interrupt::new(handle);

        drop(waker);
        interrupt.service(&context, TaskId::from_raw(2));

        assert!(!interrupt.is_live());
        match events.try_recv().unwrap() {
            Notification::Diagnostic { diagnostic, .. } => {
                assert_eq!(diagnostic.handle, Some(handle));
                assert_eq!(diagnostic.tag(), "recvGracefulClose");
            }
            other => panic!("expected a diagnostic, got {other:?}"),
        }

        socket::close(&context, handle).unwrap();
    }
}
