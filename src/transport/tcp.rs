//! tokio TCP back-end.
//!
//! Gives a host TCP stream the same non-blocking, `available()`-driven shape
//! as an Arduino network client, so the I/O engine can treat it like any
//! board socket.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;

use tokio::net::TcpStream;

use super::backend::{Backend, Socket};

/// Default size of one non-blocking read from the kernel.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 1460;

/// Default cap on bytes held in the local receive buffer.
pub const DEFAULT_MAX_BUFFERED: usize = 16 * 1024;

/// Back-end opening tokio TCP streams.
#[derive(Debug, Clone)]
pub struct TcpBackend {
    nodelay: bool,
    read_chunk_size: usize,
    max_buffered: usize,
}

impl Default for TcpBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpBackend {
    /// Create a back-end with default options.
    pub fn new() -> Self {
        TcpBackendBuilder::new().build()
    }

    /// Start a builder.
    pub fn builder() -> TcpBackendBuilder {
        TcpBackendBuilder::new()
    }
}

impl Backend for TcpBackend {
    type Socket = TcpSocket;

    async fn connect(&mut self, addr: SocketAddr) -> io::Result<TcpSocket> {
        let stream = TcpStream::connect(addr).await?;
        Ok(TcpSocket::from_stream(
            stream,
            self.nodelay,
            self.read_chunk_size,
            self.max_buffered,
        ))
    }
}

/// Builder for [`TcpBackend`].
#[derive(Debug, Clone)]
pub struct TcpBackendBuilder {
    nodelay: bool,
    read_chunk_size: usize,
    max_buffered: usize,
}

impl Default for TcpBackendBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpBackendBuilder {
    /// Create a builder with default options.
    pub fn new() -> Self {
        Self {
            nodelay: true,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            max_buffered: DEFAULT_MAX_BUFFERED,
        }
    }

    /// Enable or disable `TCP_NODELAY` during setup.
    pub fn nodelay(mut self, enabled: bool) -> Self {
        self.nodelay = enabled;
        self
    }

    /// Set the size of one non-blocking kernel read.
    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size.max(1);
        self
    }

    /// Cap the local receive buffer.
    ///
    /// Once full, nothing more is read from the kernel until the caller
    /// drains it, so TCP flow control throttles the peer.
    pub fn max_buffered(mut self, size: usize) -> Self {
        self.max_buffered = size.max(1);
        self
    }

    /// Build the back-end.
    pub fn build(self) -> TcpBackend {
        TcpBackend {
            nodelay: self.nodelay,
            read_chunk_size: self.read_chunk_size,
            max_buffered: self.max_buffered,
        }
    }
}

/// Connected tokio TCP stream with a local receive buffer.
#[derive(Debug)]
pub struct TcpSocket {
    /// The stream; `None` once closed.
    stream: Option<TcpStream>,
    /// Bytes pulled from the kernel but not yet handed out.
    rx: VecDeque<u8>,
    /// The peer sent FIN or the stream failed.
    peer_closed: bool,
    nodelay: bool,
    read_chunk_size: usize,
    /// `rx` never grows past this.
    max_buffered: usize,
}

impl TcpSocket {
    fn from_stream(
        stream: TcpStream,
        nodelay: bool,
        read_chunk_size: usize,
        max_buffered: usize,
    ) -> Self {
        Self {
            stream: Some(stream),
            rx: VecDeque::new(),
            peer_closed: false,
            nodelay,
            read_chunk_size,
            max_buffered,
        }
    }

    /// Bytes held locally and not yet handed out.
    pub fn buffered(&self) -> usize {
        self.rx.len()
    }

    /// Peer address of the stream, if still open.
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        match &self.stream {
            Some(stream) => stream.peer_addr(),
            None => Err(io::Error::from(io::ErrorKind::NotConnected)),
        }
    }

    /// Pull what the kernel has into the local buffer without blocking,
    /// up to `max_buffered`.
    fn fill(&mut self) -> io::Result<()> {
        if self.peer_closed {
            return Ok(());
        }
        let Some(stream) = &self.stream else {
            return Err(io::Error::from(io::ErrorKind::NotConnected));
        };

        let mut chunk = vec![0u8; self.read_chunk_size];
        loop {
            let room = self.max_buffered.saturating_sub(self.rx.len());
            if room == 0 {
                return Ok(());
            }
            let want = room.min(chunk.len());
            match stream.try_read(&mut chunk[..want]) {
                Ok(0) => {
                    self.peer_closed = true;
                    return Ok(());
                }
                Ok(n) => {
                    self.rx.extend(&chunk[..n]);
                    if n < want {
                        return Ok(());
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.peer_closed = true;
                    return Err(e);
                }
            }
        }
    }
}

impl Socket for TcpSocket {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.peer_closed {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        match &self.stream {
            Some(stream) => stream.try_write(buf),
            None => Err(io::Error::from(io::ErrorKind::NotConnected)),
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.rx.is_empty() {
            self.fill()?;
        }
        if self.rx.is_empty() {
            if self.peer_closed || self.stream.is_none() {
                return Err(io::Error::from(io::ErrorKind::ConnectionReset));
            }
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }

        let n = buf.len().min(self.rx.len());
        for (dst, src) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn available(&mut self) -> io::Result<usize> {
        if self.rx.is_empty() {
            self.fill()?;
        }
        Ok(self.rx.len())
    }

    fn is_connected(&mut self) -> bool {
        if self.stream.is_none() {
            return false;
        }
        if self.rx.is_empty() && self.fill().is_err() {
            return false;
        }
        !self.peer_closed || !self.rx.is_empty()
    }

    fn setup(&mut self) -> io::Result<()> {
        match &self.stream {
            Some(stream) => stream.set_nodelay(self.nodelay),
            None => Err(io::Error::from(io::ErrorKind::NotConnected)),
        }
    }

    fn close(&mut self) {
        self.stream = None;
        self.rx.clear();
        self.peer_closed = true;
    }
}
