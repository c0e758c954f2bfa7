//! Async NETLINK_ROUTE socket.

use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicU32, Ordering};

use bytes::BytesMut;
use netlink_sys::{Socket, SocketAddr, protocols};
use tokio::io::Interest;
use tokio::io::unix::AsyncFd;

use super::error::Result;
use crate::namespace::{self, NamespaceFd};

const RECV_BUF_SIZE: usize = 32768;

/// Async rtnetlink socket bound to the namespace it was created in.
pub struct NetlinkSocket {
    fd: AsyncFd<Socket>,
    seq: AtomicU32,
    /// Port ID assigned by the kernel.
    pid: u32,
}

impl NetlinkSocket {
    /// Open a socket in the caller's network namespace.
    pub fn new() -> Result<Self> {
        let (socket, pid) = open_raw()?;
        Self::from_raw(socket, pid)
    }

    /// Open a socket inside `ns`.
    ///
    /// The socket is created on a short-lived thread that has joined the
    /// namespace; a netlink socket stays bound to the namespace it was
    /// created in, so the caller's thread is never switched. Registration
    /// with the reactor happens afterwards on the calling thread.
    pub fn new_in(ns: &NamespaceFd) -> Result<Self> {
        let (socket, pid) = namespace::run_in(ns, open_raw)??;
        Self::from_raw(socket, pid)
    }

    fn from_raw(socket: Socket, pid: u32) -> Result<Self> {
        Ok(Self {
            fd: AsyncFd::new(socket)?,
            seq: AtomicU32::new(1),
            pid,
        })
    }

    pub fn next_seq(&self) -> u32 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub async fn send(&self, msg: &[u8]) -> Result<()> {
        loop {
            let mut guard = self.fd.ready(Interest::WRITABLE).await?;
            match guard.try_io(|inner| inner.get_ref().send(msg, 0)) {
                Ok(result) => {
                    result?;
                    return Ok(());
                }
                Err(_would_block) => continue,
            }
        }
    }

    /// Receive one datagram.
    pub async fn recv_msg(&self) -> Result<Vec<u8>> {
        let mut buf = BytesMut::with_capacity(RECV_BUF_SIZE);
        loop {
            let mut guard = self.fd.ready(Interest::READABLE).await?;
            match guard.try_io(|inner| inner.get_ref().recv(&mut buf, 0)) {
                Ok(result) => {
                    result?;
                    return Ok(buf.to_vec());
                }
                Err(_would_block) => continue,
            }
        }
    }
}

impl AsRawFd for NetlinkSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.get_ref().as_raw_fd()
    }
}

/// Create, bind and configure a non-blocking route socket in the current
/// thread's namespace.
fn open_raw() -> std::io::Result<(Socket, u32)> {
    let mut socket = Socket::new(protocols::NETLINK_ROUTE)?;
    socket.set_non_blocking(true)?;

    let mut addr = SocketAddr::new(0, 0);
    socket.bind(&addr)?;
    socket.get_address(&mut addr)?;

    // Older kernels lack extended ACKs; error text is then errno-only.
    socket.set_ext_ack(true).ok();

    Ok((socket, addr.port_number()))
}
