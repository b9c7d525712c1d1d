//! Transport facade.
//!
//! [`Network`] is what an MQTT engine or TLS stack holds: the connection
//! manager and the I/O engine behind two timed calls ([`MqttTransport`]) plus
//! connect/disconnect.

use std::fmt;

use tracing::{error, info, warn};

use super::backend::Backend;
use super::connection::{ConnectSettings, ConnectionManager, ConnectionPhase, Endpoint};
use super::dns::{DnsCache, NoResolver, Resolver};
use super::io::{IoEngine, IoSettings};
use super::timer::MonotonicClock;
use crate::core::constants::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_PORT, DEFAULT_READ_TIMEOUT_MS,
};
use crate::core::{Clock, MqttTransport, NetError, NetResult};

/// Where and how long to try connecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectParams {
    /// Hostname or literal address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Budget for name resolution and for each connect attempt (ms).
    pub timeout_ms: u32,
}

impl ConnectParams {
    /// Parameters with the default timeout.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }

    /// Override the timeout.
    pub fn timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }
}

impl Default for ConnectParams {
    fn default() -> Self {
        Self::new("127.0.0.1", DEFAULT_PORT)
    }
}

impl fmt::Display for ConnectParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// The transport handed to MQTT and TLS layers.
#[derive(Debug)]
pub struct Network<B: Backend, R: Resolver = NoResolver, C: Clock = MonotonicClock> {
    manager: ConnectionManager<B, R, C>,
    io: IoEngine<C>,
    read_timeout_ms: u32,
    max_message_size: usize,
}

impl<B: Backend> Network<B> {
    /// Network with no resolver, the monotonic clock, and default settings.
    pub fn new(backend: B) -> Self {
        Self::builder(backend).build()
    }

    /// Start a builder.
    pub fn builder(backend: B) -> NetworkBuilder<B> {
        NetworkBuilder::new(backend)
    }
}

impl<B: Backend, R: Resolver, C: Clock> Network<B, R, C> {
    /// Close any existing connection, connect, and prepare the socket.
    ///
    /// Reconnecting waits the settle delay after the close.
    pub async fn connect(&mut self, params: &ConnectParams) -> NetResult<()> {
        if self.manager.connection().has_socket() {
            info!(target_endpoint = %params, "replacing open connection");
        }
        self.manager
            .connect(&params.host, params.port, params.timeout_ms)
            .await?;

        if let Err(e) = self.manager.setup() {
            error!(error = %e, "setup failed, closing");
            self.manager.close();
            return Err(e);
        }
        Ok(())
    }

    /// Close the connection if one is held.
    pub fn disconnect(&mut self) {
        self.manager.close();
    }

    /// Open and healthy.
    pub fn is_open(&self) -> bool {
        self.manager.is_open()
    }

    /// Open but the peer went away.
    pub fn is_lost(&self) -> bool {
        self.manager.is_lost()
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> ConnectionPhase {
        self.manager.phase()
    }

    /// Endpoint of the last connect request.
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.manager.connection().endpoint()
    }

    /// Default read timeout from configuration.
    pub fn read_timeout_ms(&self) -> u32 {
        self.read_timeout_ms
    }

    /// Largest message the caller should buffer.
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// The connection manager.
    pub fn manager(&self) -> &ConnectionManager<B, R, C> {
        &self.manager
    }

    /// The connection manager, mutably.
    pub fn manager_mut(&mut self) -> &mut ConnectionManager<B, R, C> {
        &mut self.manager
    }

    /// The DNS cache.
    pub fn dns(&mut self) -> &mut DnsCache<R, C> {
        self.manager.dns()
    }

    /// The I/O engine.
    pub fn io(&self) -> &IoEngine<C> {
        &self.io
    }

    /// Write all of `buf`, bounded by the configured send timeout.
    pub async fn send(&mut self, buf: &[u8]) -> NetResult<usize> {
        self.io.send(self.manager.connection_mut(), buf).await
    }

    /// One non-blocking read.
    pub fn recv(&mut self, buf: &mut [u8]) -> NetResult<usize> {
        self.io.recv(self.manager.connection_mut(), buf)
    }

    /// Wait up to `timeout_ms` for data, then read it.
    pub async fn recv_with_timeout(&mut self, buf: &mut [u8], timeout_ms: u32) -> NetResult<usize> {
        self.io
            .recv_with_timeout(self.manager.connection_mut(), buf, timeout_ms)
            .await
    }

    /// Read one line of at most `max_len` bytes.
    pub async fn read_line(&mut self, max_len: usize) -> NetResult<String> {
        self.io.read_line(self.manager.connection_mut(), max_len).await
    }
}

impl<B: Backend, R: Resolver, C: Clock> MqttTransport for Network<B, R, C> {
    async fn write(&mut self, payload: &[u8], timeout_ms: u32) -> NetResult<usize> {
        let result = self
            .io
            .send_with_timeout(self.manager.connection_mut(), payload, timeout_ms)
            .await;
        if let Err(e) = &result {
            error!(error = %e, code = e.code(), len = payload.len(), "write failed");
        }
        result
    }

    async fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> NetResult<usize> {
        let result = self
            .io
            .recv_with_timeout(self.manager.connection_mut(), buf, timeout_ms)
            .await;
        match &result {
            Err(NetError::WantRead | NetError::Timeout | NetError::RecvTimeout) | Ok(_) => {}
            Err(e) => error!(error = %e, code = e.code(), "read failed"),
        }
        result
    }
}

/// Builder for [`Network`].
#[derive(Debug)]
pub struct NetworkBuilder<B: Backend, R: Resolver = NoResolver, C: Clock = MonotonicClock> {
    backend: B,
    resolver: R,
    clock: C,
    connect: ConnectSettings,
    io: IoSettings,
    read_timeout_ms: u32,
    max_message_size: usize,
    static_hosts: Vec<(String, String)>,
}

impl<B: Backend> NetworkBuilder<B> {
    /// Builder with default settings.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            resolver: NoResolver,
            clock: MonotonicClock::new(),
            connect: ConnectSettings::default(),
            io: IoSettings::default(),
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            static_hosts: Vec::new(),
        }
    }
}

impl<B: Backend, R: Resolver, C: Clock> NetworkBuilder<B, R, C> {
    /// Use `resolver` for hostnames.
    pub fn resolver<R2: Resolver>(self, resolver: R2) -> NetworkBuilder<B, R2, C> {
        NetworkBuilder {
            backend: self.backend,
            resolver,
            clock: self.clock,
            connect: self.connect,
            io: self.io,
            read_timeout_ms: self.read_timeout_ms,
            max_message_size: self.max_message_size,
            static_hosts: self.static_hosts,
        }
    }

    /// Measure every deadline against `clock`.
    pub fn clock<C2: Clock>(self, clock: C2) -> NetworkBuilder<B, R, C2> {
        NetworkBuilder {
            backend: self.backend,
            resolver: self.resolver,
            clock,
            connect: self.connect,
            io: self.io,
            read_timeout_ms: self.read_timeout_ms,
            max_message_size: self.max_message_size,
            static_hosts: self.static_hosts,
        }
    }

    /// Connect retry and delay policy.
    pub fn connect_settings(mut self, settings: ConnectSettings) -> Self {
        self.connect = settings;
        self
    }

    /// I/O poll and retry policy.
    pub fn io_settings(mut self, settings: IoSettings) -> Self {
        self.io = settings;
        self
    }

    /// Default facade read timeout.
    pub fn read_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.read_timeout_ms = timeout_ms;
        self
    }

    /// Largest message the caller should buffer.
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Resolve `name` to `literal_address` without asking the resolver.
    pub fn static_host(mut self, name: impl Into<String>, literal_address: impl Into<String>) -> Self {
        self.static_hosts.push((name.into(), literal_address.into()));
        self
    }

    /// Build the network. Malformed static host addresses are skipped.
    pub fn build(self) -> Network<B, R, C> {
        let mut manager = ConnectionManager::new(self.backend, self.resolver, self.clock.clone())
            .with_settings(self.connect);
        for (name, literal) in &self.static_hosts {
            if let Err(e) = manager.dns().set_static_mapping(name, literal) {
                warn!(name, literal, error = %e, "ignoring static host");
            }
        }
        Network {
            manager,
            io: IoEngine::new(self.clock).with_settings(self.io),
            read_timeout_ms: self.read_timeout_ms,
            max_message_size: self.max_message_size,
        }
    }
}
