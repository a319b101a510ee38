//! Classification of socket failures.
//!
//! Every failed syscall is mapped to a [`FailureKind`] so that the host can
//! decide whether to retry, close the socket, or alert. The tables follow the
//! errno groups each operation can actually produce.

use libc::{
    EAFNOSUPPORT, EAGAIN, EBADF, ECONNABORTED, ECONNRESET, EFAULT, EINTR, EINVAL, EMFILE,
    EMSGSIZE, ENETDOWN, ENETRESET, ENETUNREACH, ENFILE, ENOBUFS, ENOMEM, ENOTCONN, ENOTSOCK,
    EOPNOTSUPP, EPIPE, EPROTONOSUPPORT, ESHUTDOWN, EWOULDBLOCK,
};
use std::fmt;

/// The socket operation a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Accept,
    Recv,
    RecvFrom,
    Send,
    Close,
    Poll,
    SetBlocking,
}

impl Operation {
    pub fn name(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Accept => "accept",
            Operation::Recv => "recv",
            Operation::RecvFrom => "recvFrom",
            Operation::Send => "send",
            Operation::Close => "close",
            Operation::Poll => "select",
            Operation::SetBlocking => "setBlocking",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the caller should do about a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Interrupted by a signal; call again.
    Retry,
    /// Would block on a non-blocking socket; call again later.
    DelayRetry,
    /// The peer is gone; close the socket.
    CloseSocket,
    /// The peer shut down its write side (receive returned zero).
    GracefulClose,
    /// Datagram too large for the transport.
    MessageSize,
    /// Bad descriptor or argument.
    FixParams,
    /// Out of descriptors or memory.
    ExhaustedResources,
    /// A server accepted a connection its registry had no room for.
    CapacityExceeded,
    /// Network stack is down or unusable.
    RestartProcess,
    Unexpected,
}

impl FailureKind {
    /// Classifies a raw errno for the given operation.
    pub fn classify(operation: Operation, errno: i32) -> Self {
        match errno {
            0 if matches!(operation, Operation::Recv | Operation::RecvFrom) => {
                FailureKind::GracefulClose
            }
            e if e == EINTR => FailureKind::Retry,
            e if e == EAGAIN || e == EWOULDBLOCK => FailureKind::DelayRetry,
            e if e == ECONNRESET || e == ECONNABORTED || e == ESHUTDOWN || e == ENOTCONN => {
                FailureKind::CloseSocket
            }
            e if e == EPIPE && operation == Operation::Send => FailureKind::CloseSocket,
            e if e == EMSGSIZE && operation == Operation::Send => FailureKind::MessageSize,
            e if e == EBADF || e == EINVAL || e == EFAULT || e == ENOTSOCK => {
                FailureKind::FixParams
            }
            e if e == EMFILE || e == ENFILE || e == ENOBUFS || e == ENOMEM => {
                FailureKind::ExhaustedResources
            }
            e if e == EOPNOTSUPP && operation == Operation::Accept => {
                FailureKind::ExhaustedResources
            }
            e if e == ENETDOWN
                || e == ENETUNREACH
                || e == ENETRESET
                || e == EAFNOSUPPORT
                || e == EPROTONOSUPPORT =>
            {
                FailureKind::RestartProcess
            }
            _ => FailureKind::Unexpected,
        }
    }

    /// True for failures that go away by calling again.
    pub fn is_transient(self) -> bool {
        matches!(self, FailureKind::Retry | FailureKind::DelayRetry)
    }

    /// True when the failure leaves the connection unusable.
    pub fn is_connection_terminal(self) -> bool {
        matches!(self, FailureKind::CloseSocket | FailureKind::GracefulClose)
    }

    fn suffix(self) -> &'static str {
        match self {
            FailureKind::Retry => "Retry",
            FailureKind::DelayRetry => "DelayRetry",
            FailureKind::CloseSocket => "CloseSocket",
            FailureKind::GracefulClose => "GracefulClose",
            FailureKind::MessageSize => "MsgSize",
            FailureKind::FixParams => "FixParams",
            FailureKind::ExhaustedResources => "CloseSocket",
            FailureKind::CapacityExceeded => "CapacityExceeded",
            FailureKind::RestartProcess => "RestartProcess",
            FailureKind::Unexpected => "UnexpectedError",
        }
    }
}

/// Host-facing message tag, e.g. `recvCloseSocket` or `acceptRetry`.
pub fn tag(operation: Operation, kind: FailureKind) -> String {
    format!("{}{}", operation.name(), kind.suffix())
}
