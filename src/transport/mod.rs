//! netbridge - Transport Layer
//!
//! Everything between an MQTT engine and a board socket:
//!
//! - **Timer**: [`Timer`] over a wrapping millisecond [`Clock`](crate::core::Clock)
//! - **DNS**: [`DnsCache`] adapting callback resolvers to a polled wait
//! - **Connection**: [`ConnectionManager`] owning the single socket handle
//! - **I/O**: [`IoEngine`] with timeout-bounded send/receive
//! - **Facade**: [`Network`], the [`MqttTransport`](crate::core::MqttTransport) implementation
//! - **Back-ends**: the [`Backend`]/[`Socket`] traits and the tokio [`TcpBackend`]
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        MQTT engine / TLS stack          │
//! ├─────────────────────────────────────────┤
//! │   Network (write / read / connect)      │
//! ├────────────────────┬────────────────────┤
//! │     IoEngine       │  ConnectionManager │ ── DnsCache
//! ├────────────────────┴────────────────────┤
//! │     Backend / Socket (modem, TCP, ...)  │
//! └─────────────────────────────────────────┘
//! ```

pub mod backend;
mod connection;
pub mod dns;
mod io;
mod network;
#[cfg(feature = "tcp")]
mod tcp;
pub mod timer;

pub use backend::{Backend, Socket};
pub use connection::*;
pub use dns::{DnsCache, DnsMailbox, DnsState, NoResolver, ResolveStart, Resolver, StaticResolver};
#[cfg(feature = "system-dns")]
pub use dns::SystemResolver;
pub use io::{IoEngine, IoSettings};
pub use network::*;
#[cfg(feature = "tcp")]
pub use tcp::{TcpBackend, TcpBackendBuilder, TcpSocket};
pub use timer::{MonotonicClock, Timer};
