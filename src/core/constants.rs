//! Default transport timings and sizes.
//!
//! The firmware tuned these per radio/modem. They are defaults for
//! [`TransportConfig`](crate::config::TransportConfig), not protocol
//! constants, and every one of them can be overridden.

// =============================================================================
// CONNECTION
// =============================================================================

/// Default MQTT broker port (plain TCP).
pub const DEFAULT_PORT: u16 = 1883;

/// Default MQTT broker port over TLS.
pub const DEFAULT_TLS_PORT: u16 = 8883;

/// Default budget for a connect attempt and for name resolution (ms).
pub const DEFAULT_CONNECT_TIMEOUT_MS: u32 = 10_000;

/// Default number of low-level connect attempts.
pub const DEFAULT_RETRY_COUNT: u32 = 1;

/// Pause after a failed low-level connect attempt (ms).
pub const DEFAULT_RETRY_DELAY_MS: u32 = 200;

/// Pause after closing a transport before reopening it (ms).
///
/// Some back-ends need this long to release the handle.
pub const DEFAULT_SETTLE_DELAY_MS: u32 = 500;

// =============================================================================
// I/O ENGINE
// =============================================================================

/// Sleep between liveness/availability polls in `recv_with_timeout` (ms).
pub const DEFAULT_POLL_INTERVAL_MS: u32 = 100;

/// Upper bound on how long `send` keeps retrying a would-block write (ms).
pub const DEFAULT_SEND_TIMEOUT_MS: u32 = 10_000;

/// Consecutive would-block reads after which `read_line` gives up.
pub const DEFAULT_LINE_RETRY_COUNT: u32 = 6;

/// Pause between `read_line` would-block retries (ms).
pub const DEFAULT_LINE_RETRY_DELAY_MS: u32 = 200;

// =============================================================================
// DNS
// =============================================================================

/// Sleep between DNS mailbox polls (ms).
pub const DEFAULT_DNS_POLL_INTERVAL_MS: u32 = 100;

/// Longest domain name kept by the DNS cache.
pub const MAX_DOMAIN_NAME_LEN: usize = 100;

// =============================================================================
// MQTT-FACING DEFAULTS
// =============================================================================

/// Default MQTT keepalive interval (s).
pub const DEFAULT_KEEPALIVE_S: u32 = 30;

/// Default facade read timeout (ms).
pub const DEFAULT_READ_TIMEOUT_MS: u32 = 10_000;

/// Default maximum size of a buffered message.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 2048;

// =============================================================================
// TRACE
// =============================================================================

/// Capacity of one formatted trace line, newline included.
pub const TRACE_LINE_CAPACITY: usize = 250;
