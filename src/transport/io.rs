//! Timeout-bounded send and receive.
//!
//! Back-end sockets never block; this engine turns their would-block and
//! reset conditions into bounded waits and [`NetError`]s. Every wait is a
//! sleep on the caller's task, sized by a [`Timer`], so nothing here can spin
//! past its deadline.

use std::time::Duration;

use tracing::{debug, trace, warn};

use super::backend::Socket;
use super::connection::Connection;
use super::timer::{MonotonicClock, Timer};
use crate::core::constants::{
    DEFAULT_LINE_RETRY_COUNT, DEFAULT_LINE_RETRY_DELAY_MS, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_SEND_TIMEOUT_MS,
};
use crate::core::{Clock, Direction, NetError, NetResult};

/// Poll and retry policy of the I/O engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoSettings {
    /// Sleep between readiness checks.
    pub poll_interval_ms: u32,
    /// Upper bound on waiting for send buffer space; 0 waits forever.
    pub send_timeout_ms: u32,
    /// Consecutive would-block reads that end a line read.
    pub line_retry_count: u32,
    /// Sleep between those retries.
    pub line_retry_delay_ms: u32,
}

impl Default for IoSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            send_timeout_ms: DEFAULT_SEND_TIMEOUT_MS,
            line_retry_count: DEFAULT_LINE_RETRY_COUNT,
            line_retry_delay_ms: DEFAULT_LINE_RETRY_DELAY_MS,
        }
    }
}

/// Send/receive primitives over a [`Connection`].
#[derive(Debug, Clone)]
pub struct IoEngine<C: Clock = MonotonicClock> {
    clock: C,
    settings: IoSettings,
}

impl Default for IoEngine<MonotonicClock> {
    fn default() -> Self {
        Self::new(MonotonicClock::new())
    }
}

impl<C: Clock> IoEngine<C> {
    /// Engine with default settings.
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            settings: IoSettings::default(),
        }
    }

    /// Replace the settings.
    pub fn with_settings(mut self, settings: IoSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Current settings.
    pub fn settings(&self) -> &IoSettings {
        &self.settings
    }

    fn timer(&self, timeout_ms: u32) -> Timer<C> {
        let mut timer = Timer::with_clock(self.clock.clone());
        if timeout_ms > 0 {
            timer.countdown_ms(timeout_ms);
        }
        timer
    }

    /// Sleep one poll interval, cut short by the timer's deadline.
    async fn pause(&self, timer: &Timer<C>) {
        let step = if timer.is_set() {
            self.settings.poll_interval_ms.min(timer.left_ms().max(1))
        } else {
            self.settings.poll_interval_ms
        };
        tokio::time::sleep(Duration::from_millis(u64::from(step.max(1)))).await;
    }

    /// Write all of `buf`.
    ///
    /// Would-block waits one poll interval and retries until the send timeout
    /// passes (`SendFailed`). A reset peer yields `ConnReset` and latches the
    /// Lost flag.
    pub async fn send<S: Socket>(&self, conn: &mut Connection<S>, buf: &[u8]) -> NetResult<usize> {
        self.send_with_timeout(conn, buf, self.settings.send_timeout_ms).await
    }

    /// [`send`](IoEngine::send) with an explicit bound; 0 waits forever.
    pub async fn send_with_timeout<S: Socket>(
        &self,
        conn: &mut Connection<S>,
        buf: &[u8],
        timeout_ms: u32,
    ) -> NetResult<usize> {
        if !conn.has_socket() {
            return Err(NetError::InvalidContext);
        }

        let timer = self.timer(timeout_ms);
        let mut written = 0;
        while written < buf.len() {
            let socket = conn.socket_mut().ok_or(NetError::InvalidContext)?;
            match socket.send(&buf[written..]) {
                Ok(n) if n > 0 => {
                    written += n;
                    continue;
                }
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => match NetError::from_io(&e, Direction::Send) {
                    NetError::WantWrite => {}
                    NetError::ConnReset => {
                        conn.mark_lost();
                        return Err(NetError::ConnReset);
                    }
                    _ => {
                        warn!(error = %e, written, len = buf.len(), "send failed");
                        return Err(NetError::SendFailed);
                    }
                },
            }

            if timer.is_expired() {
                warn!(
                    written,
                    len = buf.len(),
                    timeout_ms,
                    "send buffer stayed full"
                );
                return Err(NetError::SendFailed);
            }
            trace!(trace_level = 6, written, len = buf.len(), "send would block");
            self.pause(&timer).await;
        }
        Ok(written)
    }

    /// One non-blocking read.
    ///
    /// `WantRead` when nothing is buffered.
    pub fn recv<S: Socket>(&self, conn: &mut Connection<S>, buf: &mut [u8]) -> NetResult<usize> {
        let socket = conn.socket_mut().ok_or(NetError::InvalidContext)?;
        if buf.is_empty() {
            return Ok(0);
        }

        match socket.recv(buf) {
            Ok(0) => {
                conn.mark_lost();
                Err(NetError::ConnReset)
            }
            Ok(n) => Ok(n),
            Err(e) => match NetError::from_io(&e, Direction::Recv) {
                NetError::WantRead => Err(NetError::WantRead),
                NetError::ConnReset => {
                    conn.mark_lost();
                    Err(NetError::ConnReset)
                }
                other => {
                    warn!(error = %e, "recv failed");
                    Err(other)
                }
            },
        }
    }

    /// Wait up to `timeout_ms` for data, then read it.
    ///
    /// A timeout of 0 is a single [`recv`](IoEngine::recv).
    pub async fn recv_with_timeout<S: Socket>(
        &self,
        conn: &mut Connection<S>,
        buf: &mut [u8],
        timeout_ms: u32,
    ) -> NetResult<usize> {
        if timeout_ms == 0 {
            return self.recv(conn, buf);
        }

        let timer = self.timer(timeout_ms);
        loop {
            let socket = conn.socket_mut().ok_or(NetError::InvalidContext)?;
            if !socket.is_connected() {
                conn.mark_lost();
                return Err(NetError::ConnReset);
            }
            match socket.available() {
                Ok(0) => {}
                Ok(_) => break,
                Err(e) => match NetError::from_io(&e, Direction::Recv) {
                    NetError::WantRead => {}
                    NetError::ConnReset => {
                        conn.mark_lost();
                        return Err(NetError::ConnReset);
                    }
                    other => {
                        warn!(error = %e, "availability check failed");
                        return Err(other);
                    }
                },
            }

            if timer.is_expired() {
                trace!(timeout_ms, "recv timed out");
                return Err(NetError::Timeout);
            }
            self.pause(&timer).await;
        }

        self.recv(conn, buf)
    }

    /// Read one `\n`-terminated line, without the terminator or a trailing `\r`.
    ///
    /// Gives up with `RecvTimeout` on the `line_retry_count`-th consecutive
    /// would-block read, so at most `line_retry_count - 1` retry delays are
    /// waited; the count restarts with every byte received.
    pub async fn read_line<S: Socket>(
        &self,
        conn: &mut Connection<S>,
        max_len: usize,
    ) -> NetResult<String> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        let mut retries = 0u32;

        loop {
            match self.recv(conn, &mut byte) {
                Ok(_) => {
                    retries = 0;
                    if byte[0] == b'\n' {
                        break;
                    }
                    if line.len() >= max_len {
                        warn!(max_len, "line too long");
                        return Err(NetError::LineTooLong);
                    }
                    line.push(byte[0]);
                }
                Err(NetError::WantRead) => {
                    retries += 1;
                    if retries >= self.settings.line_retry_count {
                        debug!(partial = line.len(), "no line terminator");
                        return Err(NetError::RecvTimeout);
                    }
                    tokio::time::sleep(Duration::from_millis(u64::from(
                        self.settings.line_retry_delay_ms,
                    )))
                    .await;
                }
                Err(e) => return Err(e),
            }
        }

        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use std::io::ErrorKind;

    use tokio::time::Instant;

    use super::*;
    use crate::testing::{FakeBackend, FakeLink, FakeSocket};
    use crate::transport::connection::ConnectionManager;
    use crate::transport::dns::NoResolver;

    async fn connected() -> (ConnectionManager<FakeBackend>, FakeLink) {
        let backend = FakeBackend::new();
        let link = backend.link();
        let mut mgr = ConnectionManager::new(backend, NoResolver, MonotonicClock::new());
        mgr.connect("198.51.100.7", 1883, 1000).await.unwrap();
        (mgr, link)
    }

    fn engine() -> IoEngine {
        IoEngine::new(MonotonicClock::new())
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_writes_whole_buffer_in_pieces() {
        let (mut mgr, link) = connected().await;
        link.set_send_capacity(Some(3));

        let n = engine().send(mgr.connection_mut(), b"CONNECT").await.unwrap();
        assert_eq!(n, 7);
        assert_eq!(link.take_outbound(), b"CONNECT");
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_on_closed_is_invalid_context() {
        let mut conn: Connection<FakeSocket> = Connection::new();
        let start = Instant::now();
        assert_eq!(engine().send(&mut conn, b"x").await, Err(NetError::InvalidContext));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_bounded_when_buffer_stays_full() {
        let (mut mgr, link) = connected().await;
        link.set_send_capacity(Some(0));
        let io = engine().with_settings(IoSettings {
            send_timeout_ms: 1000,
            ..IoSettings::default()
        });

        let start = Instant::now();
        assert_eq!(io.send(mgr.connection_mut(), b"x").await, Err(NetError::SendFailed));
        let elapsed = start.elapsed();
        assert!(elapsed >= ms(1000));
        assert!(elapsed <= ms(1000 + u64::from(DEFAULT_POLL_INTERVAL_MS)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_waits_for_buffer_space() {
        let (mut mgr, link) = connected().await;
        link.set_send_capacity(Some(0));

        let opener = link.clone();
        tokio::spawn(async move {
            tokio::time::sleep(ms(350)).await;
            opener.set_send_capacity(None);
        });

        assert_eq!(engine().send(mgr.connection_mut(), b"PUBLISH").await, Ok(7));
        assert_eq!(link.take_outbound(), b"PUBLISH");
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_retries_interrupted() {
        let (mut mgr, link) = connected().await;
        link.fail_next_send(ErrorKind::Interrupted);
        assert_eq!(engine().send(mgr.connection_mut(), b"ab").await, Ok(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_to_closed_peer_marks_lost() {
        let (mut mgr, link) = connected().await;
        link.drop_peer();

        assert_eq!(engine().send(mgr.connection_mut(), b"x").await, Err(NetError::ConnReset));
        assert!(mgr.is_lost());
        assert!(!mgr.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_fatal_error() {
        let (mut mgr, link) = connected().await;
        link.fail_next_send(ErrorKind::PermissionDenied);
        assert_eq!(engine().send(mgr.connection_mut(), b"x").await, Err(NetError::SendFailed));
        assert!(!mgr.is_lost());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recv_single_attempt() {
        let (mut mgr, link) = connected().await;
        let io = engine();
        let mut buf = [0u8; 8];

        assert_eq!(io.recv(mgr.connection_mut(), &mut buf), Err(NetError::WantRead));

        link.push_inbound(b"hello");
        assert_eq!(io.recv(mgr.connection_mut(), &mut buf[..3]), Ok(3));
        assert_eq!(&buf[..3], b"hel");
        assert_eq!(io.recv(mgr.connection_mut(), &mut buf), Ok(2));
        assert_eq!(&buf[..2], b"lo");

        link.fail_next_recv(ErrorKind::InvalidData);
        assert_eq!(io.recv(mgr.connection_mut(), &mut buf), Err(NetError::RecvFailed));

        link.drop_peer();
        assert_eq!(io.recv(mgr.connection_mut(), &mut buf), Err(NetError::ConnReset));
        assert!(mgr.is_lost());

        let mut closed: Connection<FakeSocket> = Connection::new();
        assert_eq!(io.recv(&mut closed, &mut buf), Err(NetError::InvalidContext));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recv_with_timeout_expires_within_one_poll() {
        let (mut mgr, _link) = connected().await;
        let mut buf = [0u8; 8];

        let start = Instant::now();
        let result = engine().recv_with_timeout(mgr.connection_mut(), &mut buf, 1500).await;
        let elapsed = start.elapsed();

        assert_eq!(result, Err(NetError::Timeout));
        assert!(elapsed >= ms(1500));
        assert!(elapsed <= ms(1500 + u64::from(DEFAULT_POLL_INTERVAL_MS)));
        assert!(mgr.is_open());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recv_with_timeout_returns_when_data_arrives() {
        let (mut mgr, link) = connected().await;
        let feeder = link.clone();
        tokio::spawn(async move {
            tokio::time::sleep(ms(250)).await;
            feeder.push_inbound(b"\x20\x02\x00\x00");
        });

        let mut buf = [0u8; 8];
        let start = Instant::now();
        let n = engine()
            .recv_with_timeout(mgr.connection_mut(), &mut buf, 5000)
            .await
            .unwrap();
        let elapsed = start.elapsed();

        assert_eq!(&buf[..n], b"\x20\x02\x00\x00");
        assert!(elapsed >= ms(250));
        assert!(elapsed <= ms(250 + u64::from(DEFAULT_POLL_INTERVAL_MS)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recv_with_timeout_peer_close_marks_lost() {
        let (mut mgr, link) = connected().await;
        let closer = link.clone();
        tokio::spawn(async move {
            tokio::time::sleep(ms(300)).await;
            closer.drop_peer();
        });

        let mut buf = [0u8; 8];
        let result = engine().recv_with_timeout(mgr.connection_mut(), &mut buf, 5000).await;
        assert_eq!(result, Err(NetError::ConnReset));
        assert!(mgr.is_lost());
    }

    #[tokio::test(start_paused = true)]
    async fn test_recv_with_zero_timeout_is_single_recv() {
        let (mut mgr, _link) = connected().await;
        let mut buf = [0u8; 8];
        let start = Instant::now();
        assert_eq!(
            engine().recv_with_timeout(mgr.connection_mut(), &mut buf, 0).await,
            Err(NetError::WantRead)
        );
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_line_strips_crlf() {
        let (mut mgr, link) = connected().await;
        link.push_inbound(b"PING\r\nPONG\n");

        let io = engine();
        assert_eq!(io.read_line(mgr.connection_mut(), 64).await.unwrap(), "PING");
        assert_eq!(io.read_line(mgr.connection_mut(), 64).await.unwrap(), "PONG");
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_line_retry_count_resets_per_byte() {
        let (mut mgr, link) = connected().await;
        let feeder = link.clone();
        tokio::spawn(async move {
            // Each gap is shorter than the full retry budget of 1000 ms
            for chunk in [&b"+C"[..], b"SQ", b": 17", b"\r\n"] {
                feeder.push_inbound(chunk);
                tokio::time::sleep(ms(900)).await;
            }
        });

        let line = engine().read_line(mgr.connection_mut(), 64).await.unwrap();
        assert_eq!(line, "+CSQ: 17");
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_line_gives_up() {
        let (mut mgr, link) = connected().await;
        link.push_inbound(b"partial");

        let start = Instant::now();
        let result = engine().read_line(mgr.connection_mut(), 64).await;
        assert_eq!(result, Err(NetError::RecvTimeout));
        let budget = u64::from((DEFAULT_LINE_RETRY_COUNT - 1) * DEFAULT_LINE_RETRY_DELAY_MS);
        assert_eq!(budget, 1000);
        let elapsed = start.elapsed();
        assert!(elapsed >= ms(budget));
        assert!(elapsed < ms(budget + 10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_line_too_long_and_lossy() {
        let (mut mgr, link) = connected().await;
        let io = engine();

        link.push_inbound(b"0123456789\n");
        assert_eq!(io.read_line(mgr.connection_mut(), 4).await, Err(NetError::LineTooLong));

        let (mut mgr, link) = connected().await;
        link.push_inbound(b"ok\xff\n");
        assert_eq!(io.read_line(mgr.connection_mut(), 16).await.unwrap(), "ok\u{fffd}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_line_reports_reset() {
        let (mut mgr, link) = connected().await;
        link.push_inbound(b"half");
        link.drop_peer();

        assert_eq!(engine().read_line(mgr.connection_mut(), 16).await, Err(NetError::ConnReset));
        assert!(mgr.is_lost());
    }
}
