use crate::error::{Error, Result};

use std::fmt;
use std::os::unix::io::RawFd;

/// Opaque identifier of an open socket.
///
/// A `Handle` does not own the descriptor: whoever stores it (a [`Server`]
/// registry, a [`SocketList`]) decides when it is closed. Copies handed out in
/// events are identifiers only.
///
/// [`Server`]: crate::Server
/// [`SocketList`]: crate::SocketList
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Handle(pub(crate) RawFd);

impl Handle {
    /// Wraps a raw descriptor, rejecting negative values.
    pub fn new(file_descriptor: RawFd) -> Result<Self> {
        if file_descriptor < 0 {
            return Err(Error::InvalidHandle(file_descriptor));
        }

        Ok(Self(file_descriptor))
    }

    pub fn raw(self) -> RawFd {
        self.0
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.0)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<RawFd> for Handle {
    type Error = Error;

    fn try_from(file_descriptor: RawFd) -> Result<Self> {
        Handle::new(file_descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_descriptors_are_rejected() {
        assert!(matches!(Handle::new(-1), Err(Error::InvalidHandle(-1))));
        assert_eq!(Handle::new(7).map(Handle::raw).ok(), Some(7));
    }
}
