use crate::context::Context;
use crate::error::{Error, Result};
use crate::net::classify::Operation;
use crate::net::handle::Handle;
use crate::net::socket;

use libc::{AF_INET, AF_INET6, AF_UNIX, SOCK_STREAM, sockaddr_in, sockaddr_in6, sockaddr_storage};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV6};

/// Converts a kernel-filled address into a [`SocketAddr`].
///
/// Returns `None` for families other than IPv4 and IPv6.
pub(crate) fn sockaddr_to_socketaddr(address: &sockaddr_storage) -> Option<SocketAddr> {
    match address.ss_family as libc::c_int {
        AF_INET => {
            let address = unsafe { &*(address as *const _ as *const sockaddr_in) };
            let ip = Ipv4Addr::from(u32::from_be(address.sin_addr.s_addr));
            let port = u16::from_be(address.sin_port);

            Some(SocketAddr::from((ip, port)))
        }
        AF_INET6 => {
            let address = unsafe { &*(address as *const _ as *const sockaddr_in6) };
            let ip = Ipv6Addr::from(address.sin6_addr.s6_addr);
            let port = u16::from_be(address.sin6_port);

            Some(SocketAddr::V6(SocketAddrV6::new(
                ip,
                port,
                address.sin6_flowinfo,
                address.sin6_scope_id,
            )))
        }
        _ => None,
    }
}

/// Writing end of an interrupt pair.
///
/// Each [`wake`](Self::wake) makes the paired interrupt handle readable, so a
/// watch loop sleeping in its multiplexer returns at once instead of waiting
/// out its timeout. Dropping the `WakeHandle` closes the writing end.
#[derive(Debug)]
pub struct WakeHandle {
    handle: Handle,
    context: Context,
}

impl WakeHandle {
    pub fn wake(&self) -> Result<()> {
        match socket::send(&self.context, self.handle, &[1]) {
            Ok(_) => Ok(()),
            // A full buffer already guarantees a pending wake-up.
            Err(err) if err.failure_kind().is_some_and(|kind| kind.is_transient()) => Ok(()),
            Err(err) => Err(err),
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }
}

impl Drop for WakeHandle {
    fn drop(&mut self) {
        let _ = socket::close(&self.context, self.handle);
    }
}

/// Creates a connected interrupt pair.
///
/// The returned [`Handle`] is meant to be passed as the interrupt handle of a
/// server or socket list, which then owns and closes it.
pub fn wake_pair(context: &Context) -> Result<(Handle, WakeHandle)> {
    let mut fds = [0i32; 2];

    if unsafe { libc::socketpair(AF_UNIX, SOCK_STREAM, 0, fds.as_mut_ptr()) } < 0 {
        return Err(Error::last_os(Operation::Create));
    }

    let interrupt = Handle(fds[0]);
    let writer = WakeHandle {
        handle: Handle(fds[1]),
        context: context.clone(),
    };

    if let Err(err) = socket::set_blocking(writer.handle, false) {
        let _ = socket::close(context, interrupt);
        return Err(err);
    }

    Ok((interrupt, writer))
}
