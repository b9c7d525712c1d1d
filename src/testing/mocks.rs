//! Fake back-end, resolver, and clock.

use std::collections::VecDeque;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::core::Clock;
use crate::transport::backend::{Backend, Socket};
use crate::transport::dns::{DnsMailbox, ResolveStart, Resolver};

/// Clock the test moves by hand.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU32>,
}

impl ManualClock {
    /// Clock reading `start_ms`.
    pub fn new(start_ms: u32) -> Self {
        Self {
            now: Arc::new(AtomicU32::new(start_ms)),
        }
    }

    /// Move the counter forward, wrapping like the board's counter.
    pub fn advance(&self, ms: u32) {
        let now = self.now.load(Ordering::SeqCst);
        self.now.store(now.wrapping_add(ms), Ordering::SeqCst);
    }

    /// Jump to an absolute reading.
    pub fn set(&self, ms: u32) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u32 {
        self.now.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct LinkState {
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
    peer_closed: bool,
    live: usize,
    opened: usize,
    setups: usize,
    send_error: Option<io::ErrorKind>,
    recv_error: Option<io::ErrorKind>,
    send_capacity: Option<usize>,
}

/// The far side of every socket a [`FakeBackend`] hands out.
///
/// Clones share state, so a test keeps one to feed and inspect the link while
/// the transport owns the socket.
#[derive(Debug, Clone, Default)]
pub struct FakeLink {
    state: Arc<Mutex<LinkState>>,
}

impl FakeLink {
    /// Fresh link with no peer data.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue bytes for the transport to read.
    pub fn push_inbound(&self, data: &[u8]) {
        self.lock().inbound.extend(data);
    }

    /// Drain everything the transport has written so far.
    pub fn take_outbound(&self) -> Vec<u8> {
        std::mem::take(&mut self.lock().outbound)
    }

    /// Simulate the peer closing the connection.
    pub fn drop_peer(&self) {
        self.lock().peer_closed = true;
    }

    /// Make the next send fail with `kind`.
    pub fn fail_next_send(&self, kind: io::ErrorKind) {
        self.lock().send_error = Some(kind);
    }

    /// Make the next recv fail with `kind`.
    pub fn fail_next_recv(&self, kind: io::ErrorKind) {
        self.lock().recv_error = Some(kind);
    }

    /// Bytes accepted per send call; `Some(0)` makes every send would-block.
    pub fn set_send_capacity(&self, capacity: Option<usize>) {
        self.lock().send_capacity = capacity;
    }

    /// Sockets opened and not yet closed.
    pub fn live_handles(&self) -> usize {
        self.lock().live
    }

    /// Sockets opened in total.
    pub fn opened(&self) -> usize {
        self.lock().opened
    }

    /// Number of `setup` calls seen.
    pub fn setups(&self) -> usize {
        self.lock().setups
    }

    fn open(&self) -> FakeSocket {
        let mut state = self.lock();
        state.inbound.clear();
        state.peer_closed = false;
        state.live += 1;
        state.opened += 1;
        FakeSocket {
            link: self.clone(),
            closed: false,
        }
    }
}

/// Socket handed out by [`FakeBackend`].
#[derive(Debug)]
pub struct FakeSocket {
    link: FakeLink,
    closed: bool,
}

fn not_connected() -> io::Error {
    io::Error::from(io::ErrorKind::NotConnected)
}

impl Socket for FakeSocket {
    fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(not_connected());
        }
        let mut state = self.link.lock();
        if let Some(kind) = state.send_error.take() {
            return Err(io::Error::from(kind));
        }
        if state.peer_closed {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }
        let n = buf.len().min(state.send_capacity.unwrap_or(usize::MAX));
        if n == 0 && !buf.is_empty() {
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }
        state.outbound.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Err(not_connected());
        }
        let mut state = self.link.lock();
        if let Some(kind) = state.recv_error.take() {
            return Err(io::Error::from(kind));
        }
        if state.inbound.is_empty() {
            if state.peer_closed {
                return Err(io::Error::from(io::ErrorKind::ConnectionReset));
            }
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }
        let n = buf.len().min(state.inbound.len());
        for (dst, src) in buf.iter_mut().zip(state.inbound.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn available(&mut self) -> io::Result<usize> {
        if self.closed {
            return Err(not_connected());
        }
        Ok(self.link.lock().inbound.len())
    }

    fn is_connected(&mut self) -> bool {
        if self.closed {
            return false;
        }
        let state = self.link.lock();
        !state.peer_closed || !state.inbound.is_empty()
    }

    fn setup(&mut self) -> io::Result<()> {
        if self.closed {
            return Err(not_connected());
        }
        self.link.lock().setups += 1;
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            let mut state = self.link.lock();
            state.live = state.live.saturating_sub(1);
        }
    }
}

/// Scripted outcome of one connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Hand out a socket.
    Accept,
    /// Fail with `ConnectionRefused`.
    Refuse,
    /// Never complete.
    Hang,
}

/// Back-end with scripted connect outcomes and a shared [`FakeLink`].
#[derive(Debug, Clone)]
pub struct FakeBackend {
    script: VecDeque<ConnectOutcome>,
    fallback: ConnectOutcome,
    latency: Duration,
    link: FakeLink,
    attempts: Arc<AtomicUsize>,
    addrs: Arc<Mutex<Vec<SocketAddr>>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    /// Back-end that accepts every connect immediately.
    pub fn new() -> Self {
        Self {
            script: VecDeque::new(),
            fallback: ConnectOutcome::Accept,
            latency: Duration::ZERO,
            link: FakeLink::new(),
            attempts: Arc::new(AtomicUsize::new(0)),
            addrs: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Back-end that refuses every connect.
    pub fn refusing() -> Self {
        Self::new().otherwise(ConnectOutcome::Refuse)
    }

    /// Outcomes for the next attempts, in order.
    pub fn script(mut self, outcomes: impl IntoIterator<Item = ConnectOutcome>) -> Self {
        self.script.extend(outcomes);
        self
    }

    /// Outcome once the script runs out.
    pub fn otherwise(mut self, outcome: ConnectOutcome) -> Self {
        self.fallback = outcome;
        self
    }

    /// Time every connect attempt takes before its outcome.
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Handle on the far side of the link.
    pub fn link(&self) -> FakeLink {
        self.link.clone()
    }

    /// Shared counter of connect attempts.
    pub fn attempt_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.attempts)
    }

    /// Connect attempts so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Addresses connect was called with.
    pub fn connected_addrs(&self) -> Vec<SocketAddr> {
        self.addrs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl Backend for FakeBackend {
    type Socket = FakeSocket;

    async fn connect(&mut self, addr: SocketAddr) -> io::Result<FakeSocket> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.addrs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(addr);
        let outcome = self.script.pop_front().unwrap_or(self.fallback);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match outcome {
            ConnectOutcome::Accept => Ok(self.link.open()),
            ConnectOutcome::Refuse => Err(io::Error::from(io::ErrorKind::ConnectionRefused)),
            ConnectOutcome::Hang => std::future::pending().await,
        }
    }
}

/// Resolver whose answer is deposited after a fixed delay.
#[derive(Debug, Clone)]
pub struct DelayedResolver {
    delay: Duration,
    answers: Vec<IpAddr>,
    fail: bool,
    calls: Arc<AtomicUsize>,
}

impl DelayedResolver {
    /// Resolver answering with an empty address list after `delay`.
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            answers: Vec::new(),
            fail: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Add an address to the answer.
    pub fn answer(mut self, addr: IpAddr) -> Self {
        self.answers.push(addr);
        self
    }

    /// Deposit an error instead of addresses.
    pub fn fail(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Shared counter of started resolutions.
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

impl Resolver for DelayedResolver {
    fn start(&mut self, name: &str, mailbox: &DnsMailbox) -> ResolveStart {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return ResolveStart::Failed;
        };

        let name = name.to_string();
        let mailbox = mailbox.clone();
        let delay = self.delay;
        let result = if self.fail {
            Err(io::Error::other("name server unreachable"))
        } else {
            Ok(self.answers.clone())
        };
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            mailbox.deposit(&name, result);
        });
        ResolveStart::Pending
    }
}
