//! Monotonic expiry timer.
//!
//! Every blocking operation in the crate is bounded by a [`Timer`]. Time is a
//! single wrapping `u32` millisecond counter read from a [`Clock`]; deadlines
//! are compared through the signed wrapping difference so a counter rollover
//! between arming and querying is harmless.

use tokio::time::Instant;

use crate::core::Clock;

/// Longest countdown that still compares correctly across a wraparound.
pub const MAX_COUNTDOWN_MS: u32 = i32::MAX as u32;

/// Board-style millisecond counter backed by tokio's monotonic clock.
///
/// Readings are milliseconds since the clock was created, truncated to `u32`.
/// Using tokio's `Instant` means the counter follows the paused test clock.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    /// Reference point; the counter reads `offset` here.
    base: Instant,
    /// Value the counter starts from.
    offset: u32,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock {
    /// Create a clock whose counter starts at zero now.
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: 0,
        }
    }

    /// Create a clock whose counter starts at `offset` now.
    ///
    /// Starting close to `u32::MAX` exercises the rollover path.
    pub fn with_offset(offset: u32) -> Self {
        Self {
            base: Instant::now(),
            offset,
        }
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u32 {
        let elapsed = self.base.elapsed().as_millis() as u32;
        self.offset.wrapping_add(elapsed)
    }
}

/// An expiry deadline.
///
/// `end_time == 0` means unset: an unset timer never expires and has no time
/// left. Arming never produces `0`.
#[derive(Debug, Clone)]
pub struct Timer<C: Clock = MonotonicClock> {
    clock: C,
    end_time: u32,
}

impl Timer<MonotonicClock> {
    /// Create an unset timer on a fresh monotonic clock.
    pub fn new() -> Self {
        Self::with_clock(MonotonicClock::new())
    }
}

impl Default for Timer<MonotonicClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> Timer<C> {
    /// Create an unset timer reading the given clock.
    pub fn with_clock(clock: C) -> Self {
        Self { clock, end_time: 0 }
    }

    /// Reset to unset.
    pub fn init(&mut self) {
        self.end_time = 0;
    }

    /// Arm the timer to expire `duration_ms` from now.
    ///
    /// Durations beyond [`MAX_COUNTDOWN_MS`] are clamped.
    pub fn countdown_ms(&mut self, duration_ms: u32) {
        let duration_ms = duration_ms.min(MAX_COUNTDOWN_MS);
        let end = self.clock.now_ms().wrapping_add(duration_ms);
        // 0 is reserved for "unset".
        self.end_time = if end == 0 { 1 } else { end };
    }

    /// Arm the timer to expire `duration_s` whole seconds from now.
    pub fn countdown_s(&mut self, duration_s: u32) {
        self.countdown_ms(duration_s.saturating_mul(1000));
    }

    /// True iff armed and the clock is at or past the deadline.
    pub fn is_expired(&self) -> bool {
        if self.end_time == 0 {
            return false;
        }
        let past = self.clock.now_ms().wrapping_sub(self.end_time) as i32;
        past >= 0
    }

    /// Milliseconds until expiry; 0 when expired or unset.
    pub fn left_ms(&self) -> u32 {
        if self.end_time == 0 {
            return 0;
        }
        let left = self.end_time.wrapping_sub(self.clock.now_ms()) as i32;
        if left <= 0 { 0 } else { left as u32 }
    }

    /// Whether the timer has been armed.
    pub fn is_set(&self) -> bool {
        self.end_time != 0
    }

    /// Raw deadline in counter milliseconds (0 when unset).
    pub fn end_time(&self) -> u32 {
        self.end_time
    }

    /// The clock this timer reads.
    pub fn clock(&self) -> &C {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testing::ManualClock;

    #[test]
    fn test_unset_timer_never_expires() {
        let clock = ManualClock::new(0);
        let mut timer = Timer::with_clock(clock.clone());
        timer.init();

        clock.advance(1_000_000);
        assert!(!timer.is_set());
        assert!(!timer.is_expired());
        assert_eq!(timer.left_ms(), 0);
    }

    #[test]
    fn test_countdown_expiry_boundary() {
        let clock = ManualClock::new(10_000);
        let mut timer = Timer::with_clock(clock.clone());

        timer.countdown_ms(5000);
        assert!(!timer.is_expired());
        assert_eq!(timer.left_ms(), 5000);

        clock.advance(4999);
        assert!(!timer.is_expired());
        assert_eq!(timer.left_ms(), 1);

        clock.advance(1);
        assert!(timer.is_expired());
        assert_eq!(timer.left_ms(), 0);

        clock.advance(60_000);
        assert!(timer.is_expired());
        assert_eq!(timer.left_ms(), 0);
    }

    #[test]
    fn test_countdown_across_wraparound() {
        let clock = ManualClock::new(u32::MAX - 1000);
        let mut timer = Timer::with_clock(clock.clone());

        timer.countdown_ms(5000);
        // Deadline lies past the rollover.
        assert!(timer.end_time() < 5000);
        assert!(!timer.is_expired());

        clock.advance(2000);
        assert!(!timer.is_expired());
        assert_eq!(timer.left_ms(), 3000);

        clock.advance(3000);
        assert!(timer.is_expired());
    }

    #[test]
    fn test_countdown_never_lands_on_unset() {
        let clock = ManualClock::new(u32::MAX - 99);
        let mut timer = Timer::with_clock(clock.clone());

        timer.countdown_ms(100);
        assert!(timer.is_set());
        assert_eq!(timer.end_time(), 1);

        clock.advance(100);
        assert!(!timer.is_expired());
        clock.advance(1);
        assert!(timer.is_expired());
    }

    #[test]
    fn test_countdown_seconds() {
        let clock = ManualClock::new(0);
        let mut timer = Timer::with_clock(clock.clone());

        timer.countdown_s(3);
        assert_eq!(timer.left_ms(), 3000);
        clock.advance(3000);
        assert!(timer.is_expired());
    }

    #[test]
    fn test_rearm_replaces_deadline() {
        let clock = ManualClock::new(0);
        let mut timer = Timer::with_clock(clock.clone());

        timer.countdown_ms(100);
        clock.advance(150);
        assert!(timer.is_expired());

        timer.countdown_ms(100);
        assert!(!timer.is_expired());
        assert_eq!(timer.left_ms(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monotonic_clock_follows_tokio_time() {
        let clock = MonotonicClock::new();
        let mut timer = Timer::with_clock(clock);

        timer.countdown_ms(5000);
        assert!(!timer.is_expired());

        tokio::time::advance(Duration::from_millis(4999)).await;
        assert!(!timer.is_expired());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(timer.is_expired());
    }

    #[tokio::test(start_paused = true)]
    async fn test_monotonic_clock_offset_wraps() {
        let clock = MonotonicClock::with_offset(u32::MAX - 10);
        tokio::time::advance(Duration::from_millis(20)).await;
        assert_eq!(clock.now_ms(), 9);
    }
}
