//! # netbridge
//!
//! Timeout-bounded, retryable socket transport for MQTT/TLS engines on
//! embedded network back-ends.
//!
//! Cellular modems, Ethernet drivers and vendor VM socket layers each block
//! differently and report errors their own way. netbridge puts them behind
//! one [`Backend`](transport::Backend)/[`Socket`](transport::Socket) pair and
//! gives the MQTT engine two calls, timed write and timed read, that always
//! return within their deadline and always speak [`NetError`].
//!
//! ## Feature Flags
//!
//! - `tcp` (default): tokio TCP back-end
//! - `system-dns` (default): resolver backed by the host's name service
//! - `trace` (default): serial-style trace lines and subscriber setup
//! - `config` (default): TOML configuration loading
//!
//! ## Modules
//!
//! - [`core`]: Core traits, constants, and error types (always included)
//! - [`transport`]: Timer, DNS cache, connection manager, I/O engine, facade
//! - [`config`]: Configuration (requires `config` feature)
//! - [`trace`]: Trace output (requires `trace` feature)
//! - [`testing`]: Fake back-end, resolver and clock
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use netbridge::prelude::*;
//!
//! # async fn run() -> NetResult<()> {
//! let mut net = Network::builder(TcpBackend::new())
//!     .resolver(SystemResolver)
//!     .build();
//!
//! net.connect(&ConnectParams::new("broker.example.test", 1883)).await?;
//! net.write(b"\x10\x0c\x00\x04MQTT\x04\x02\x00\x3c\x00\x00", 5000).await?;
//!
//! let mut buf = [0u8; 4];
//! let n = net.read(&mut buf, 5000).await?;
//! assert_eq!(&buf[..n], b"\x20\x02\x00\x00");
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Transport layer
pub mod transport;

// Configuration (feature-gated)
#[cfg(feature = "config")]
#[cfg_attr(docsrs, doc(cfg(feature = "config")))]
pub mod config;

// Trace output (feature-gated)
#[cfg(feature = "trace")]
#[cfg_attr(docsrs, doc(cfg(feature = "trace")))]
pub mod trace;

// Test doubles
pub mod testing;

/// Prelude module for convenient imports.
pub mod prelude {
    // Core traits and types
    pub use crate::core::*;

    pub use crate::transport::{
        Backend, ConnectParams, ConnectSettings, ConnectionManager, ConnectionPhase, DnsCache,
        Endpoint, IoEngine, IoSettings, MonotonicClock, Network, NetworkBuilder, NoResolver,
        Resolver, Socket, StaticResolver, Timer,
    };

    #[cfg(feature = "system-dns")]
    pub use crate::transport::SystemResolver;

    #[cfg(feature = "tcp")]
    pub use crate::transport::TcpBackend;

    #[cfg(feature = "config")]
    pub use crate::config::TransportConfig;
}

// Re-export commonly used items at crate root
pub use crate::core::{Clock, ConfigError, MqttTransport, NetError, NetResult};

pub use crate::transport::{ConnectParams, Network, Timer};
