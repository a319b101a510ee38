//! Listening server with its own watch loop.
//!
//! A [`Server`] owns a listening socket, an interrupt handle and the registry
//! of connections it accepted. Once started, its state moves onto a worker
//! thread which repeatedly runs:
//!
//! ```text
//! multiplex -> (if idle) compact -> accept (if listener ready) -> receive (ready clients)
//! ```
//!
//! until the task is cancelled. Stopping hands the state back to the
//! foreground, which is the only place it is ever destroyed.

use crate::builder::{ServerBuilder, ServerConfig};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::net::classify::Operation;
use crate::net::handle::Handle;
use crate::net::socket;
use crate::reactor::event::Diagnostic;
use crate::reactor::io::ReceiveDispatcher;
use crate::reactor::poller::Poller;
use crate::reactor::registry::{ClientRegistry, Compaction};
use crate::reactor::socket::{Interrupt, accept_client};
use crate::runtime::task::{AliveFlag, BackgroundTask, TaskId};

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// State driven by the watch loop.
pub(crate) struct ServerCore {
    listener: Handle,
    interrupt: Interrupt,
    registry: ClientRegistry,
    dispatcher: ReceiveDispatcher,
    poller: Poller,
    timeout: Duration,
    watch: Vec<Handle>,
    ready: HashSet<Handle>,
}

impl ServerCore {
    fn new(listener: Handle, interrupt: Handle, config: &ServerConfig) -> Self {
        Self {
            listener,
            interrupt: Interrupt::new(interrupt),
            registry: ClientRegistry::new(config.client_capacity),
            dispatcher: ReceiveDispatcher::new(config.buffer_size, config.receive_policy),
            poller: Poller::new(),
            timeout: config.timeout,
            watch: Vec::with_capacity(config.client_capacity + 2),
            ready: HashSet::with_capacity(config.client_capacity + 2),
        }
    }

    fn snapshot_watch_set(&mut self) {
        self.watch.clear();
        self.watch.push(self.listener);
        if self.interrupt.is_live() {
            self.watch.push(self.interrupt.handle());
        }
        self.watch
            .extend(self.registry.live().map(|(_, handle)| handle));
    }

    /// Runs one multiplex/accept/receive round.
    pub(crate) fn iterate(&mut self, context: &Context, task: TaskId, alive: &AliveFlag) {
        self.snapshot_watch_set();

        let ready = match self.poller.wait(&self.watch, self.timeout) {
            Ok(ready) => ready,
            Err(err) => {
                if let Some(kind) = err.failure_kind() {
                    let errno = err.raw_os_error().unwrap_or(-1);
                    if !kind.is_transient() {
                        context
                            .sink()
                            .report(task, Diagnostic::new(Operation::Poll, errno, None));
                        thread::sleep(self.timeout);
                    }
                }
                return;
            }
        };

        if !alive.is_alive() {
            return;
        }

        self.ready.clear();
        self.ready.extend(ready.iter().copied());

        // A wake-up alone is not traffic; the round still counts as idle.
        if self.interrupt.is_live() && self.ready.remove(&self.interrupt.handle()) {
            self.interrupt.service(context, task);
        }

        if self.ready.is_empty() {
            self.registry.compact(context);
            return;
        }

        let mut ready_clients = self.ready.len();

        if self.ready.contains(&self.listener) {
            ready_clients -= 1;
            accept_client(context, task, self.listener, &mut self.registry);
        }

        if ready_clients > 0 {
            self.dispatcher.dispatch(
                context,
                task,
                self.listener,
                &mut self.registry,
                &self.ready,
                ready_clients,
            );
        }
    }

    fn close_all(&mut self, context: &Context) {
        let owned = self.registry.take_owned();

        for handle in [self.listener, self.interrupt.handle()]
            .into_iter()
            .chain(owned)
        {
            if let Err(err) = socket::close(context, handle) {
                debug!(handle = %handle, error = %err, "close during removal failed");
            }
        }
    }
}

fn watch(mut core: ServerCore, context: Context, task: TaskId, alive: AliveFlag) -> ServerCore {
    debug!(task = %task, listener = %core.listener, "server watch loop started");

    while alive.is_alive() {
        core.iterate(&context, task, &alive);
    }

    debug!(task = %task, listener = %core.listener, "server watch loop stopped");

    core
}

enum State {
    Idle(Box<ServerCore>),
    Watching(BackgroundTask<Option<ServerCore>>),
    Removed,
}

/// A listening socket plus the connections it accepted.
///
/// Events are raised through the [`Context`] the server was created with.
///
/// # Example
/// ```ignore
/// let (context, events) = Context::with_channel();
/// let (interrupt, waker) = wake_pair(&context)?;
/// let mut server = Server::create(&context, interrupt, listener, 16, 8192, Duration::from_millis(50))?;
/// let task = server.start_watching()?;
/// for notification in events.iter() { /* Accept, Data, Close */ }
/// ```
pub struct Server {
    context: Context,
    listener: Handle,
    state: State,
}

impl Server {
    /// Creates a server over an already bound, listening socket.
    ///
    /// The server owns `interrupt` and `listener` from here on.
    pub fn create(
        context: &Context,
        interrupt: Handle,
        listener: Handle,
        client_capacity: usize,
        buffer_size: usize,
        timeout: Duration,
    ) -> Result<Self> {
        ServerBuilder::new()
            .client_capacity(client_capacity)
            .buffer_size(buffer_size)
            .timeout(timeout)
            .build(context, interrupt, listener)
    }

    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub(crate) fn with_config(
        context: &Context,
        interrupt: Handle,
        listener: Handle,
        config: ServerConfig,
    ) -> Self {
        debug!(
            listener = %listener,
            interrupt = %interrupt,
            capacity = config.client_capacity,
            buffer = config.buffer_size,
            "server created"
        );

        Self {
            context: context.clone(),
            listener,
            state: State::Idle(Box::new(ServerCore::new(listener, interrupt, &config))),
        }
    }

    pub fn listener(&self) -> Handle {
        self.listener
    }

    /// Starts the watch loop on a dedicated thread.
    pub fn start_watching(&mut self) -> Result<TaskId> {
        let core = match std::mem::replace(&mut self.state, State::Removed) {
            State::Idle(core) => core,
            State::Watching(task) => {
                self.state = State::Watching(task);
                return Err(Error::AlreadyWatching);
            }
            State::Removed => return Err(Error::Removed),
        };

        let context = self.context.clone();
        let handoff = Arc::new(Mutex::new(Some(core)));
        let inbox = handoff.clone();

        let spawned = BackgroundTask::spawn("server-watch", move |task, alive| {
            let core = inbox.lock().take();
            core.map(|core| watch(*core, context, task, alive))
        });

        match spawned {
            Ok(task) => {
                let id = task.id();
                self.state = State::Watching(task);
                Ok(id)
            }
            Err(err) => {
                if let Some(core) = handoff.lock().take() {
                    self.state = State::Idle(core);
                }
                Err(err)
            }
        }
    }

    /// Id of the running watch loop, if any.
    pub fn task_id(&self) -> Option<TaskId> {
        match &self.state {
            State::Watching(task) => Some(task.id()),
            _ => None,
        }
    }

    pub fn is_watching(&self) -> bool {
        matches!(&self.state, State::Watching(task) if task.is_alive())
    }

    /// Cancels the watch loop and waits for it, within one poll timeout.
    ///
    /// If the loop panicked its state is lost: the server is left removed and
    /// the handles it owned are not closed.
    pub fn stop(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, State::Removed) {
            State::Watching(task) => {
                let task_id = task.id();

                match task.join() {
                    Ok(Some(core)) => self.state = State::Idle(Box::new(core)),
                    Ok(None) => {}
                    Err(err) => {
                        warn!(
                            task = %task_id,
                            listener = %self.listener,
                            "watch loop panicked, its handles are leaked"
                        );
                        return Err(err);
                    }
                }
                Ok(())
            }
            other => {
                self.state = other;
                Ok(())
            }
        }
    }

    /// Registry of a stopped server.
    pub fn registry(&self) -> Option<&ClientRegistry> {
        match &self.state {
            State::Idle(core) => Some(&core.registry),
            _ => None,
        }
    }

    /// Live connections of a stopped server, in registry order.
    pub fn clients(&self) -> Option<Vec<Handle>> {
        self.registry().map(ClientRegistry::handles)
    }

    /// Compacts the registry of a stopped server.
    pub fn compact(&mut self) -> Result<Compaction> {
        match &mut self.state {
            State::Idle(core) => Ok(core.registry.compact(&self.context)),
            State::Watching(_) => Err(Error::AlreadyWatching),
            State::Removed => Err(Error::Removed),
        }
    }

    /// Stops the watch loop and closes the listener, the interrupt handle and
    /// every connection the registry owns.
    ///
    /// Calling it again is a no-op.
    pub fn remove(&mut self) -> Result<()> {
        self.stop()?;

        if let State::Idle(mut core) = std::mem::replace(&mut self.state, State::Removed) {
            core.close_all(&self.context);
            debug!(listener = %self.listener, "server removed");
        }

        Ok(())
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.remove();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::utils::{WakeHandle, wake_pair};
    use crate::reactor::poller::poll;
    use crate::reactor::registry::Slot;
    use std::io::Write;
    use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
    use std::os::unix::io::IntoRawFd;

    const WAIT: Duration = Duration::from_secs(5);

    fn server_core(context: &Context) -> (ServerCore, SocketAddr, WakeHandle) {
        let (interrupt, waker) = wake_pair(context).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let listener = Handle::new(listener.into_raw_fd()).unwrap();

        let config = ServerConfig {
            client_capacity: 4,
            timeout: Duration::from_millis(20),
            ..ServerConfig::default()
        };

        (ServerCore::new(listener, interrupt, &config), addr, waker)
    }

    // A registered descriptor whose peer is gone, waiting for compaction.
    fn finished_slot(core: &mut ServerCore) -> Handle {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let handle = Handle::new(socket.into_raw_fd()).unwrap();
        let index = core.registry.append(handle).unwrap();
        core.registry.mark_closed(index);
        handle
    }

    #[test]
    fn compaction_waits_for_an_idle_round() {
        let (context, _events) = Context::with_channel();
        let (mut core, addr, _waker) = server_core(&context);
        let task = TaskId::from_raw(1);
        let alive = AliveFlag::new();

        let mut client = TcpStream::connect(addr).unwrap();
        poll(&[core.listener], WAIT).unwrap();
        core.iterate(&context, task, &alive);
        let connection = core.registry.handles()[0];

        let finished = finished_slot(&mut core);

        client.write_all(b"busy").unwrap();
        poll(&[connection], WAIT).unwrap();
        core.iterate(&context, task, &alive);
        assert_eq!(core.registry.get(1), Some(Slot::Closed(finished)));

        core.iterate(&context, task, &alive);
        assert_eq!(core.registry.slots(), &[Slot::Live(connection)]);

        core.close_all(&context);
    }

    #[test]
    fn wake_up_alone_counts_as_idle() {
        let (context, _events) = Context::with_channel();
        let (mut core, _addr, waker) = server_core(&context);
        let task = TaskId::from_raw(2);
        let alive = AliveFlag::new();

        finished_slot(&mut core);

        waker.wake().unwrap();
        poll(&[core.interrupt.handle()], WAIT).unwrap();
        core.iterate(&context, task, &alive);

        assert!(core.registry.is_empty());
        assert!(core.interrupt.is_live());

        core.close_all(&context);
    }

    #[test]
    fn closed_waker_is_retired_and_rounds_stay_idle() {
        let (context, events) = Context::with_channel();
        let (mut core, _addr, waker) = server_core(&context);
        let task = TaskId::from_raw(3);
        let alive = AliveFlag::new();

        drop(waker);
        core.iterate(&context, task, &alive);
        assert!(!core.interrupt.is_live());
        assert!(matches!(
            events.try_recv(),
            Ok(crate::reactor::event::Notification::Diagnostic { .. })
        ));

        finished_slot(&mut core);
        core.iterate(&context, task, &alive);
        assert!(core.registry.is_empty());
        assert!(events.try_recv().is_err());

        core.close_all(&context);
    }
}

