//! Thin, one-call-per-syscall socket layer.
//!
//! Data-moving calls (`accept`, `recv`, `recvfrom`, `send`, `close`) run under
//! the [`Context`] lock, for foreground callers and watch loops alike.
//! Failures come back as [`Error::Os`] carrying a
//! [`FailureKind`](crate::FailureKind).

use crate::context::Context;
use crate::error::{Error, Result};
use crate::net::classify::Operation;
use crate::net::handle::Handle;
use crate::net::utils::sockaddr_to_socketaddr;

use libc::{F_GETFL, F_SETFL, MSG_DONTWAIT, O_NONBLOCK, fcntl, sockaddr, sockaddr_storage, socklen_t};
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::ptr;

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = 0;

const DRAIN_CHUNK: usize = 64;

/// Accepts one pending connection on `listener`.
pub fn accept(context: &Context, listener: Handle) -> Result<Handle> {
    accept_raw(context, listener).map_err(|err| Error::from_io(Operation::Accept, err))
}

pub(crate) fn accept_raw(context: &Context, listener: Handle) -> io::Result<Handle> {
    context.locked(|| {
        let file_descriptor =
            unsafe { libc::accept(listener.raw(), ptr::null_mut(), ptr::null_mut()) };

        if file_descriptor < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Handle(file_descriptor))
    })
}

/// Receives into `buffer`. `Ok(0)` means the peer shut down its write side.
pub fn recv(context: &Context, handle: Handle, buffer: &mut [u8]) -> Result<usize> {
    recv_raw(context, handle, buffer, 0).map_err(|err| Error::from_io(Operation::Recv, err))
}

pub(crate) fn recv_raw(
    context: &Context,
    handle: Handle,
    buffer: &mut [u8],
    flags: libc::c_int,
) -> io::Result<usize> {
    context.locked(|| {
        let res = unsafe {
            libc::recv(
                handle.raw(),
                buffer.as_mut_ptr() as *mut _,
                buffer.len(),
                flags,
            )
        };

        if res < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(res as usize)
    })
}

/// Receives one datagram into `buffer`, returning its length and source.
pub fn recv_from(
    context: &Context,
    handle: Handle,
    buffer: &mut [u8],
) -> Result<(usize, SocketAddr)> {
    recv_from_raw(context, handle, buffer).map_err(|err| Error::from_io(Operation::RecvFrom, err))
}

pub(crate) fn recv_from_raw(
    context: &Context,
    handle: Handle,
    buffer: &mut [u8],
) -> io::Result<(usize, SocketAddr)> {
    let mut address: sockaddr_storage = unsafe { mem::zeroed() };
    let mut length = mem::size_of::<sockaddr_storage>() as socklen_t;

    let received = context.locked(|| {
        let res = unsafe {
            libc::recvfrom(
                handle.raw(),
                buffer.as_mut_ptr() as *mut _,
                buffer.len(),
                0,
                &mut address as *mut _ as *mut sockaddr,
                &mut length,
            )
        };

        if res < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(res as usize)
    })?;

    let source = sockaddr_to_socketaddr(&address).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "unsupported source address family")
    })?;

    Ok((received, source))
}

/// Sends `data`, returning how many bytes the kernel took.
pub fn send(context: &Context, handle: Handle, data: &[u8]) -> Result<usize> {
    context
        .locked(|| {
            let res = unsafe {
                libc::send(
                    handle.raw(),
                    data.as_ptr() as *const _,
                    data.len(),
                    SEND_FLAGS,
                )
            };

            if res < 0 {
                return Err(io::Error::last_os_error());
            }

            Ok(res as usize)
        })
        .map_err(|err| Error::from_io(Operation::Send, err))
}

/// Closes `handle`. The caller must not use it afterwards.
pub fn close(context: &Context, handle: Handle) -> Result<()> {
    context
        .locked(|| {
            if unsafe { libc::close(handle.raw()) } < 0 {
                return Err(io::Error::last_os_error());
            }

            Ok(())
        })
        .map_err(|err| Error::from_io(Operation::Close, err))
}

/// Switches `handle` between blocking and non-blocking mode.
pub fn set_blocking(handle: Handle, blocking: bool) -> Result<()> {
    let flags = unsafe { fcntl(handle.raw(), F_GETFL) };
    if flags < 0 {
        return Err(Error::last_os(Operation::SetBlocking));
    }

    let flags = if blocking {
        flags & !O_NONBLOCK
    } else {
        flags | O_NONBLOCK
    };

    if unsafe { fcntl(handle.raw(), F_SETFL, flags) } < 0 {
        return Err(Error::last_os(Operation::SetBlocking));
    }

    Ok(())
}

pub fn is_blocking(handle: Handle) -> Result<bool> {
    let flags = unsafe { fcntl(handle.raw(), F_GETFL) };
    if flags < 0 {
        return Err(Error::last_os(Operation::SetBlocking));
    }

    Ok(flags & O_NONBLOCK == 0)
}

/// What [`drain`] found on an interrupt handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Drained {
    /// Pending wake-up bytes were discarded.
    Emptied(usize),
    /// The writing end is gone; the handle reads as end-of-file from now on.
    Closed,
}

/// Empties pending wake-up bytes from an interrupt handle without blocking.
pub(crate) fn drain(context: &Context, handle: Handle) -> io::Result<Drained> {
    let mut chunk = [0u8; DRAIN_CHUNK];
    let mut total = 0;

    loop {
        match recv_raw(context, handle, &mut chunk, MSG_DONTWAIT) {
            Ok(0) => return Ok(Drained::Closed),
            Ok(n) => {
                total += n;
                if n < DRAIN_CHUNK {
                    return Ok(Drained::Emptied(total));
                }
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                return Ok(Drained::Emptied(total));
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
}
