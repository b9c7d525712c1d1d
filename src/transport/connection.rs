//! Connection lifecycle.
//!
//! The [`ConnectionManager`] owns the only socket handle. Opening a new
//! connection always closes the previous one first, so there is never more
//! than one live handle per manager.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::backend::{Backend, Socket};
use super::dns::{DnsCache, NoResolver, Resolver};
use super::timer::MonotonicClock;
use crate::core::constants::{
    DEFAULT_DNS_POLL_INTERVAL_MS, DEFAULT_RETRY_COUNT, DEFAULT_RETRY_DELAY_MS,
    DEFAULT_SETTLE_DELAY_MS,
};
use crate::core::{Clock, Direction, NetError, NetResult};

/// Remote endpoint of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Hostname or literal address, as given by the caller.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') && !self.host.starts_with('[') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Lifecycle phase, derived from the connection flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// No socket.
    Closed,
    /// Resolving or attempting the low-level connect.
    Connecting,
    /// Socket open and healthy.
    Open,
    /// Socket still held but the peer reset or the pipe broke.
    Lost,
}

/// The single live transport session.
#[derive(Debug)]
pub struct Connection<S: Socket> {
    socket: Option<S>,
    open: bool,
    lost: bool,
    connecting: bool,
    endpoint: Option<Endpoint>,
}

impl<S: Socket> Default for Connection<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Socket> Connection<S> {
    /// A closed connection.
    pub fn new() -> Self {
        Self {
            socket: None,
            open: false,
            lost: false,
            connecting: false,
            endpoint: None,
        }
    }

    /// Open and not flagged lost.
    pub fn is_open(&self) -> bool {
        self.open && !self.lost
    }

    /// Open but flagged lost.
    pub fn is_lost(&self) -> bool {
        self.open && self.lost
    }

    /// Whether a socket handle is held.
    pub fn has_socket(&self) -> bool {
        self.socket.is_some()
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> ConnectionPhase {
        if self.connecting {
            ConnectionPhase::Connecting
        } else if self.is_lost() {
            ConnectionPhase::Lost
        } else if self.is_open() {
            ConnectionPhase::Open
        } else {
            ConnectionPhase::Closed
        }
    }

    /// Endpoint of the last connect request.
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    pub(crate) fn socket_mut(&mut self) -> Option<&mut S> {
        self.socket.as_mut()
    }

    /// Latch the Lost flag after a peer reset or broken pipe.
    pub(crate) fn mark_lost(&mut self) {
        if self.open && !self.lost {
            warn!(endpoint = ?self.endpoint.as_ref().map(ToString::to_string), "connection lost");
        }
        self.lost = true;
    }

    fn attach(&mut self, socket: S) {
        self.socket = Some(socket);
        self.open = true;
        self.lost = false;
        self.connecting = false;
    }

    fn reset(&mut self) {
        self.open = false;
        self.lost = false;
        self.connecting = false;
    }
}

/// Holds `Connecting` for the life of one connect call.
///
/// Dropping it, including when the connect future is cancelled, clears the
/// flag.
struct ConnectingGuard<'a, S: Socket> {
    conn: &'a mut Connection<S>,
}

impl<'a, S: Socket> ConnectingGuard<'a, S> {
    fn begin(conn: &'a mut Connection<S>, endpoint: Endpoint) -> Self {
        conn.endpoint = Some(endpoint);
        conn.connecting = true;
        Self { conn }
    }
}

impl<S: Socket> Drop for ConnectingGuard<'_, S> {
    fn drop(&mut self) {
        self.conn.connecting = false;
    }
}

/// Retry and delay policy for [`ConnectionManager::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectSettings {
    /// Low-level connect attempts (at least one is always made).
    pub retry_count: u32,
    /// Delay after each failed attempt.
    pub retry_delay_ms: u32,
    /// Delay after closing an existing socket before reopening.
    pub settle_delay_ms: u32,
    /// Mailbox poll step while waiting for DNS.
    pub dns_poll_interval_ms: u32,
}

impl Default for ConnectSettings {
    fn default() -> Self {
        Self {
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            dns_poll_interval_ms: DEFAULT_DNS_POLL_INTERVAL_MS,
        }
    }
}

fn sleep_ms(ms: u32) -> tokio::time::Sleep {
    tokio::time::sleep(Duration::from_millis(u64::from(ms)))
}

/// Owns the connection and its back-end.
#[derive(Debug)]
pub struct ConnectionManager<B: Backend, R: Resolver = NoResolver, C: Clock = MonotonicClock> {
    backend: B,
    dns: DnsCache<R, C>,
    conn: Connection<B::Socket>,
    settings: ConnectSettings,
}

impl<B: Backend, R: Resolver, C: Clock> ConnectionManager<B, R, C> {
    /// Create a closed manager with default settings.
    pub fn new(backend: B, resolver: R, clock: C) -> Self {
        Self {
            backend,
            dns: DnsCache::new(resolver, clock),
            conn: Connection::new(),
            settings: ConnectSettings::default(),
        }
    }

    /// Replace the retry and delay policy.
    pub fn with_settings(mut self, settings: ConnectSettings) -> Self {
        self.set_settings(settings);
        self
    }

    /// Replace the retry and delay policy in place.
    pub fn set_settings(&mut self, settings: ConnectSettings) {
        self.dns.set_poll_interval_ms(settings.dns_poll_interval_ms);
        self.settings = settings;
    }

    /// Current policy.
    pub fn settings(&self) -> &ConnectSettings {
        &self.settings
    }

    /// Forget the handle and flags without closing the socket.
    ///
    /// The handle is dropped, not gracefully stopped; use [`close`] for that.
    ///
    /// [`close`]: ConnectionManager::close
    pub fn init(&mut self) {
        self.conn = Connection::new();
    }

    /// Open and not flagged lost.
    pub fn is_open(&self) -> bool {
        self.conn.is_open()
    }

    /// Open but flagged lost.
    pub fn is_lost(&self) -> bool {
        self.conn.is_lost()
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> ConnectionPhase {
        self.conn.phase()
    }

    /// The connection.
    pub fn connection(&self) -> &Connection<B::Socket> {
        &self.conn
    }

    /// The connection, for the I/O engine.
    pub fn connection_mut(&mut self) -> &mut Connection<B::Socket> {
        &mut self.conn
    }

    /// The DNS cache, e.g. to add static mappings.
    pub fn dns(&mut self) -> &mut DnsCache<R, C> {
        &mut self.dns
    }

    /// The back-end.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Connect to `host:port`.
    ///
    /// An existing socket is closed first, followed by the settle delay.
    /// Hostnames go through the DNS cache with the same timeout. Each
    /// low-level attempt is bounded by `timeout_ms` (0 leaves it unbounded)
    /// and followed by the retry delay when it fails.
    pub async fn connect(&mut self, host: &str, port: u16, timeout_ms: u32) -> NetResult<()> {
        if self.conn.has_socket() {
            info!(host, port, "closing existing connection before reconnect");
            self.close();
            sleep_ms(self.settings.settle_delay_ms).await;
        }

        let mut guard = ConnectingGuard::begin(
            &mut self.conn,
            Endpoint {
                host: host.to_string(),
                port,
            },
        );

        let ip = match self.dns.resolve(host, timeout_ms).await {
            Ok(ip) => ip,
            Err(e) => {
                error!(host, error = %e, "cannot resolve host");
                guard.conn.reset();
                return Err(e);
            }
        };
        let addr = SocketAddr::new(ip, port);

        let attempts = self.settings.retry_count.max(1);
        let mut last_err = NetError::ConnectFailed;
        for attempt in 1..=attempts {
            debug!(%addr, attempt, attempts, timeout_ms, "connecting");

            let outcome = if timeout_ms == 0 {
                Ok(self.backend.connect(addr).await)
            } else {
                let limit = Duration::from_millis(u64::from(timeout_ms));
                tokio::time::timeout(limit, self.backend.connect(addr)).await
            };

            match outcome {
                Ok(Ok(socket)) => {
                    guard.conn.attach(socket);
                    info!(host, %addr, attempt, "connected");
                    return Ok(());
                }
                Ok(Err(e)) => {
                    warn!(%addr, attempt, error = %e, "connect attempt failed");
                    last_err = match NetError::from_io(&e, Direction::Send) {
                        NetError::Timeout => NetError::Timeout,
                        _ => NetError::ConnectFailed,
                    };
                }
                Err(_) => {
                    warn!(%addr, attempt, timeout_ms, "connect attempt timed out");
                    last_err = NetError::Timeout;
                }
            }
            sleep_ms(self.settings.retry_delay_ms).await;
        }

        guard.conn.reset();
        error!(%addr, attempts, error = %last_err, "connect failed");
        Err(last_err)
    }

    /// Stop the socket if present and clear the flags. No-op when closed.
    pub fn close(&mut self) {
        if let Some(mut socket) = self.conn.socket.take() {
            socket.close();
            info!(
                endpoint = ?self.conn.endpoint.as_ref().map(ToString::to_string),
                "connection closed"
            );
        }
        self.conn.reset();
    }

    /// Post-connect socket preparation.
    pub fn setup(&mut self) -> NetResult<()> {
        let socket = self.conn.socket_mut().ok_or(NetError::InvalidContext)?;
        socket.setup().map_err(|e| {
            warn!(error = %e, "socket setup failed");
            NetError::from_io(&e, Direction::Send)
        })
    }
}
