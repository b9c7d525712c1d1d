//! Core traits for netbridge.
//!
//! These are the seams the rest of the crate is generic over: the clock every
//! deadline is measured against, and the two-call transport an MQTT engine
//! plugs into.

use std::future::Future;

use super::error::NetResult;

/// Source of a monotonic 32-bit millisecond counter.
///
/// The counter wraps roughly every 49.7 days, like a board's `millis()`.
/// Consumers must compare readings with wrapping arithmetic.
pub trait Clock: Clone + Send + Sync + 'static {
    /// Current counter value in milliseconds.
    fn now_ms(&self) -> u32;
}

/// The network plug-point an MQTT engine calls.
///
/// Exactly two timed operations. Both return the number of bytes moved or
/// a [`NetError`](super::NetError); no back-end-native codes leak through.
pub trait MqttTransport: Send {
    /// Write the whole payload to the peer.
    fn write(
        &mut self,
        payload: &[u8],
        timeout_ms: u32,
    ) -> impl Future<Output = NetResult<usize>> + Send;

    /// Read up to `buf.len()` bytes, waiting at most `timeout_ms`.
    fn read(
        &mut self,
        buf: &mut [u8],
        timeout_ms: u32,
    ) -> impl Future<Output = NetResult<usize>> + Send;
}
