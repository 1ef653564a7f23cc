//! Thin wrapper over [`std::net::UdpSocket`] plus a multi-socket readiness
//! wait, so the receive worker can block on several bound sockets (the game
//! socket, the ping socket, the outbound-client socket) at once instead of
//! spinning.

use std::{
    io,
    net::{SocketAddr, ToSocketAddrs, UdpSocket},
    time::Duration,
};

use crate::error::BindError;

/// A bound, non-blocking UDP socket.
///
/// Cloning a [`Socket`] is cheap (it's a thin `Arc`-free wrapper around a
/// single [`UdpSocket`], matching the one-socket-per-bound-port model of
/// `spec.md` §2's Datagram I/O component); socket handles are instead shared
/// behind an `Arc` by callers that need to hand the same socket to multiple
/// connections.
#[derive(Debug)]
pub struct Socket {
    inner: UdpSocket,
}

impl Socket {
    /// Binds a new non-blocking UDP socket to `addr`.
    ///
    /// # Errors
    ///
    /// Errors if the OS `bind` call fails, or the socket cannot be switched
    /// into non-blocking mode.
    pub fn bind(addr: impl ToSocketAddrs) -> Result<Self, BindError> {
        let inner = UdpSocket::bind(addr).map_err(BindError::Io)?;
        inner.set_nonblocking(true).map_err(BindError::NonBlocking)?;
        Ok(Self { inner })
    }

    /// Reads one datagram into `buf`, returning the number of bytes read and
    /// the sender's address.
    ///
    /// Returns `Ok(None)` if no datagram is currently available
    /// (`WouldBlock`); the receive worker should only call this after
    /// [`wait_readable`] reports the socket is ready, or be prepared to spin.
    ///
    /// # Errors
    ///
    /// Errors (other than `WouldBlock`) are returned to the caller, which
    /// per `spec.md` §7 should log them and keep running.
    pub fn recv_from(&self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.inner.recv_from(buf) {
            Ok((n, addr)) => Ok(Some((n, addr))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Sends one datagram to `addr`.
    ///
    /// Errors are the caller's responsibility to log and swallow, per
    /// `spec.md` §4.4's "Raw send" policy — UDP send failures don't have a
    /// meaningful retry at this layer.
    ///
    /// # Errors
    ///
    /// Returns the underlying OS error, if any.
    pub fn send_to(&self, buf: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.inner.send_to(buf, addr)
    }

    /// Gets the local address this socket is bound to.
    ///
    /// # Errors
    ///
    /// Returns the underlying OS error, if any.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

#[cfg(unix)]
mod wait {
    use std::os::unix::io::AsRawFd;

    use super::{Duration, Socket};

    /// Blocks until at least one of `sockets` has a datagram ready to read,
    /// or `timeout` elapses.
    ///
    /// Returns a bitmask-free list of indices into `sockets` which are
    /// readable; an empty vec means the wait timed out with nothing ready,
    /// matching `spec.md` §4.2's "1-second upper bound" poll.
    #[must_use]
    pub fn wait_readable(sockets: &[&Socket], timeout: Duration) -> Vec<usize> {
        let mut fds: Vec<libc::pollfd> = sockets
            .iter()
            .map(|s| libc::pollfd {
                fd: s.inner.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            })
            .collect();

        let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        // SAFETY: `fds` is a valid, uniquely-owned array of `pollfd` of the
        // length we pass, and outlives the call.
        let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };

        if ret <= 0 {
            return Vec::new();
        }

        fds.iter()
            .enumerate()
            .filter(|(_, pfd)| pfd.revents & libc::POLLIN != 0)
            .map(|(i, _)| i)
            .collect()
    }
}

#[cfg(not(unix))]
mod wait {
    use super::{Duration, Socket};

    /// Fallback readiness wait for non-Unix targets: briefly blocks each
    /// socket in turn with a short read timeout and reports any that had
    /// data land during their slice. Functionally equivalent to the
    /// `libc::poll`-based wait, just coarser.
    #[must_use]
    pub fn wait_readable(sockets: &[&Socket], timeout: Duration) -> Vec<usize> {
        let per_socket = timeout / (sockets.len().max(1) as u32);
        let mut ready = Vec::new();
        for (i, socket) in sockets.iter().enumerate() {
            let _ = socket.inner.set_read_timeout(Some(per_socket.max(std::time::Duration::from_millis(1))));
            let mut probe = [0u8; 0];
            match socket.inner.peek(&mut probe) {
                Ok(_) => ready.push(i),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(_) => ready.push(i),
            }
        }
        ready
    }
}

pub use wait::wait_readable;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_and_exchange() {
        let a = Socket::bind("127.0.0.1:0").unwrap();
        let b = Socket::bind("127.0.0.1:0").unwrap();
        let b_addr = b.local_addr().unwrap();

        a.send_to(b"hello", b_addr).unwrap();

        let mut buf = [0u8; 16];
        let mut got = None;
        for _ in 0..1000 {
            if let Some((n, _)) = b.recv_from(&mut buf).unwrap() {
                got = Some(n);
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(Some(5), got);
        assert_eq!(b"hello", &buf[..5]);
    }

    #[test]
    fn recv_from_would_block_returns_none() {
        let a = Socket::bind("127.0.0.1:0").unwrap();
        let mut buf = [0u8; 16];
        assert!(a.recv_from(&mut buf).unwrap().is_none());
    }
}
