use crate::net::handle::Handle;

use libc::{EBADF, F_GETFL, fcntl};
use std::io;

/// Checks whether `handle` still refers to an open descriptor.
///
/// Probes with `F_GETFL`, which neither blocks nor changes the descriptor.
/// Only `EBADF` counts as invalid; any other failure leaves the handle alone.
pub fn is_valid(handle: Handle) -> bool {
    if unsafe { fcntl(handle.raw(), F_GETFL) } >= 0 {
        return true;
    }

    io::Error::last_os_error().raw_os_error() != Some(EBADF)
}

/// Keeps the valid handles of `handles`, in order.
pub fn retain_valid(handles: &mut Vec<Handle>) {
    handles.retain(|&handle| is_valid(handle));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::UdpSocket;
    use std::os::unix::io::AsRawFd;

    // Far above any descriptor a test process opens.
    const UNUSED: i32 = 1 << 20;

    #[test]
    fn open_and_unused_descriptors() {
        let socket = UdpSocket::bind("127.0.0.1:0").expect("bind");

        assert!(is_valid(Handle::new(socket.as_raw_fd()).unwrap()));
        assert!(!is_valid(Handle::new(UNUSED).unwrap()));
    }

    #[test]
    fn retain_preserves_order() {
        let first = UdpSocket::bind("127.0.0.1:0").expect("bind");
        let second = UdpSocket::bind("127.0.0.1:0").expect("bind");

        let first = Handle::new(first.as_raw_fd()).unwrap();
        let gone = Handle::new(UNUSED).unwrap();
        let third = Handle::new(second.as_raw_fd()).unwrap();

        let mut handles = vec![first, gone, third];
        retain_valid(&mut handles);
        assert_eq!(handles, vec![first, third]);
    }
}
