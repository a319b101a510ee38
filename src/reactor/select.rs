//! Caller-managed socket lists.
//!
//! Unlike a [`Server`](crate::reactor::core::Server), a [`SocketList`] never
//! accepts or closes anything during its loop. It watches the members the
//! caller gave it and reports which became readable. In `RecvFrom` mode it
//! also reads one datagram per ready member.

use crate::builder::SocketListBuilder;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::net::classify::Operation;
use crate::net::handle::Handle;
use crate::net::socket;
use crate::reactor::event::{Diagnostic, Event};
use crate::reactor::poller::{MAX_WATCH, Poller};
use crate::reactor::socket::Interrupt;
use crate::runtime::task::{AliveFlag, BackgroundTask, TaskId};

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// What a socket list does with ready members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListMode {
    /// Raise one `Ready` event listing them.
    Ready,
    /// Receive one datagram from each and raise `RecvFrom` events.
    RecvFrom { buffer_size: usize },
}

enum State {
    Idle,
    Watching(BackgroundTask<()>),
    Removed,
}

struct ListLoop {
    context: Context,
    interrupt: Interrupt,
    members: Arc<RwLock<Vec<Handle>>>,
    timeout: Duration,
    mode: ListMode,
    poller: Poller,
    watch: Vec<Handle>,
    buffer: Vec<u8>,
}

impl ListLoop {
    fn snapshot_watch_set(&mut self) {
        let members = self.members.read();

        self.watch.clear();
        if self.interrupt.is_live() {
            self.watch.push(self.interrupt.handle());
        }
        self.watch.extend(members.iter().copied());
    }

    fn iterate(&mut self, task: TaskId, alive: &AliveFlag) {
        self.snapshot_watch_set();

        // Retired interrupt and no members: nothing to multiplex yet.
        if self.watch.is_empty() {
            std::thread::sleep(self.timeout);
            return;
        }

        let ready = match self.poller.wait(&self.watch, self.timeout) {
            Ok(ready) => ready,
            Err(err) => {
                if let Some(kind) = err.failure_kind() {
                    if !kind.is_transient() {
                        let errno = err.raw_os_error().unwrap_or(-1);
                        self.context
                            .sink()
                            .report(task, Diagnostic::new(Operation::Poll, errno, None));
                        std::thread::sleep(self.timeout);
                    }
                }
                return;
            }
        };

        if !alive.is_alive() || ready.is_empty() {
            return;
        }

        let interrupt = self.interrupt.handle();

        if self.interrupt.is_live() && ready.contains(&interrupt) {
            self.interrupt.service(&self.context, task);

            if self.interrupt.is_live() {
                return;
            }
        }

        let ready: Vec<Handle> = ready
            .iter()
            .copied()
            .filter(|&handle| handle != interrupt)
            .collect();

        if ready.is_empty() {
            return;
        }

        match self.mode {
            ListMode::Ready => self.context.sink().raise(task, Event::Ready(ready)),
            ListMode::RecvFrom { .. } => {
                for member in ready {
                    self.receive_datagram(task, member);
                }
            }
        }
    }

    fn receive_datagram(&mut self, task: TaskId, member: Handle) {
        match socket::recv_from_raw(&self.context, member, &mut self.buffer) {
            Ok((received, source)) => {
                trace!(member = %member, %source, bytes = received, "datagram received");
                self.context.sink().raise(
                    task,
                    Event::DataFrom {
                        connection: member,
                        source,
                        bytes: self.buffer[..received].to_vec(),
                    },
                );
            }
            Err(err) => {
                let errno = err.raw_os_error().unwrap_or(0);
                self.context.sink().report(
                    task,
                    Diagnostic::new(Operation::RecvFrom, errno, Some(member)),
                );
            }
        }
    }
}

fn watch(mut list: ListLoop, task: TaskId, alive: AliveFlag) {
    debug!(task = %task, interrupt = %list.interrupt.handle(), "socket list watch loop started");

    while alive.is_alive() {
        list.iterate(task, &alive);
    }

    debug!(task = %task, interrupt = %list.interrupt.handle(), "socket list watch loop stopped");
}

/// A caller-supplied set of descriptors watched for readability.
///
/// Members may be replaced while the loop runs; the new set is picked up on
/// the next round. The list takes ownership of its members: [`remove`]
/// closes the interrupt handle and every member present at that time.
///
/// [`remove`]: SocketList::remove
pub struct SocketList {
    context: Context,
    interrupt: Handle,
    members: Arc<RwLock<Vec<Handle>>>,
    timeout: Duration,
    mode: ListMode,
    state: State,
}

impl SocketList {
    /// Creates a list in `Ready` mode with the default timeout.
    pub fn create(context: &Context, interrupt: Handle, member_count_hint: usize) -> Result<Self> {
        SocketListBuilder::new()
            .capacity_hint(member_count_hint)
            .build(context, interrupt)
    }

    pub fn builder() -> SocketListBuilder {
        SocketListBuilder::new()
    }

    pub(crate) fn with_config(
        context: &Context,
        interrupt: Handle,
        capacity_hint: usize,
        timeout: Duration,
        mode: ListMode,
    ) -> Self {
        debug!(interrupt = %interrupt, ?mode, "socket list created");

        Self {
            context: context.clone(),
            interrupt,
            members: Arc::new(RwLock::new(Vec::with_capacity(capacity_hint))),
            timeout,
            mode,
            state: State::Idle,
        }
    }

    pub fn interrupt(&self) -> Handle {
        self.interrupt
    }

    pub fn mode(&self) -> ListMode {
        self.mode
    }

    /// Replaces the member set.
    ///
    /// Dropped members are not closed; they return to the caller.
    pub fn set_members(&self, handles: &[Handle]) -> Result<()> {
        if matches!(self.state, State::Removed) {
            return Err(Error::Removed);
        }

        let limit = MAX_WATCH - 1;
        if handles.len() > limit {
            return Err(Error::TooManyDescriptors {
                len: handles.len(),
                limit,
            });
        }

        let mut members = self.members.write();
        members.clear();
        members.extend_from_slice(handles);

        trace!(interrupt = %self.interrupt, count = members.len(), "socket list members replaced");

        Ok(())
    }

    pub fn members(&self) -> Vec<Handle> {
        self.members.read().clone()
    }

    /// Starts the watch loop on a dedicated thread.
    pub fn start_watching(&mut self) -> Result<TaskId> {
        match self.state {
            State::Idle => {}
            State::Watching(_) => return Err(Error::AlreadyWatching),
            State::Removed => return Err(Error::Removed),
        }

        let buffer_size = match self.mode {
            ListMode::Ready => 0,
            ListMode::RecvFrom { buffer_size } => buffer_size,
        };

        let list = ListLoop {
            context: self.context.clone(),
            interrupt: Interrupt::new(self.interrupt),
            members: self.members.clone(),
            timeout: self.timeout,
            mode: self.mode,
            poller: Poller::new(),
            watch: Vec::new(),
            buffer: vec![0u8; buffer_size],
        };

        let task = BackgroundTask::spawn("list-watch", move |task, alive| watch(list, task, alive))?;
        let id = task.id();
        self.state = State::Watching(task);

        Ok(id)
    }

    pub fn task_id(&self) -> Option<TaskId> {
        match &self.state {
            State::Watching(task) => Some(task.id()),
            _ => None,
        }
    }

    pub fn is_watching(&self) -> bool {
        matches!(&self.state, State::Watching(task) if task.is_alive())
    }

    /// Cancels the watch loop and waits for it.
    pub fn stop(&mut self) -> Result<()> {
        if !matches!(self.state, State::Watching(_)) {
            return Ok(());
        }

        if let State::Watching(task) = std::mem::replace(&mut self.state, State::Idle) {
            task.join()?;
        }

        Ok(())
    }

    /// Stops the loop, then closes the interrupt handle and every member.
    ///
    /// Calling it again is a no-op.
    pub fn remove(&mut self) -> Result<()> {
        if matches!(self.state, State::Removed) {
            return Ok(());
        }

        let stopped = self.stop();
        self.state = State::Removed;

        let members = std::mem::take(&mut *self.members.write());
        for handle in std::iter::once(self.interrupt).chain(members) {
            if let Err(err) = socket::close(&self.context, handle) {
                debug!(handle = %handle, error = %err, "close during removal failed");
            }
        }

        debug!(interrupt = %self.interrupt, "socket list removed");

        stopped
    }
}

impl Drop for SocketList {
    fn drop(&mut self) {
        let _ = self.remove();
    }
}
