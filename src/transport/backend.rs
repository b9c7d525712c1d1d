//! Back-end capability set.
//!
//! A back-end is whatever socket API the board offers: a cellular modem
//! client, an Ethernet driver, a vendor VM socket layer, or a host TCP stack.
//! The core only ever talks to these two traits.
//!
//! Socket operations are non-blocking. Native conditions are reported as
//! [`io::Error`]s and the I/O engine translates them:
//!
//! | Native condition | `io::ErrorKind` |
//! |------------------|-----------------|
//! | no data / no buffer space | `WouldBlock` |
//! | call interrupted by a signal | `Interrupted` |
//! | peer closed, pipe broken | `ConnectionReset` / `BrokenPipe` / `NotConnected` |
//! | anything else | any other kind |

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;

/// Factory for connected sockets.
pub trait Backend: Send {
    /// Connected socket handle produced by this back-end.
    type Socket: Socket;

    /// Open a stream connection to `addr`.
    ///
    /// One attempt; retrying is the connection manager's job.
    fn connect(&mut self, addr: SocketAddr) -> impl Future<Output = io::Result<Self::Socket>> + Send;
}

/// A connected, non-blocking stream socket.
pub trait Socket: Send + fmt::Debug {
    /// Write as much of `buf` as the back-end accepts right now.
    ///
    /// Returns the number of bytes accepted, possibly fewer than `buf.len()`.
    fn send(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Read whatever is available, up to `buf.len()` bytes.
    ///
    /// `WouldBlock` when nothing is buffered; `ConnectionReset` (or `Ok(0)`)
    /// when the peer is gone.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Number of bytes that can be read without blocking.
    fn available(&mut self) -> io::Result<usize>;

    /// Whether the peer is still there.
    ///
    /// Stays true while already-received data remains unread, matching the
    /// Arduino `Client::connected()` contract.
    fn is_connected(&mut self) -> bool;

    /// Post-connect preparation (socket options). Defaults to nothing.
    fn setup(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Stop the socket. Must tolerate being called more than once.
    fn close(&mut self);
}
