//! DNS resolution cache.
//!
//! Board resolvers answer through a callback that can fire at any moment.
//! Here the callback side only ever deposits an answer into a single-slot
//! [`DnsMailbox`], tagged with the name it answers. The [`DnsCache`] polls
//! that slot from the caller's task against a deadline and ignores any
//! answer whose tag is not the name it is currently waiting on.

use std::collections::HashMap;
use std::io;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use super::timer::Timer;
use crate::core::constants::{DEFAULT_DNS_POLL_INTERVAL_MS, MAX_DOMAIN_NAME_LEN};
use crate::core::{Clock, NetError, NetResult};

/// Resolution state of the cached name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsState {
    /// Nothing requested yet.
    Unresolved,
    /// Request issued, answer not yet picked up.
    Pending,
    /// Answer received and usable.
    Resolved,
    /// Resolver reported an error or an unusable answer.
    Failed,
}

/// An answer deposited by a resolver.
#[derive(Debug)]
pub struct DnsAnswer {
    /// Name this answer is for.
    pub name: String,
    /// Addresses found, or the resolver's error.
    pub result: io::Result<Vec<IpAddr>>,
}

#[derive(Debug, Default)]
struct MailboxSlot {
    /// Name the cache is currently waiting on.
    expected: Option<String>,
    answer: Option<DnsAnswer>,
}

/// Single-slot mailbox shared between a resolver callback and the cache.
#[derive(Debug, Clone, Default)]
pub struct DnsMailbox {
    slot: Arc<Mutex<MailboxSlot>>,
}

impl DnsMailbox {
    /// Create an empty mailbox.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MailboxSlot> {
        // A panicking depositor cannot leave the slot half-written.
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Deposit an answer for `name`.
    ///
    /// Returns `false` and drops the answer when nobody is waiting on `name`
    /// any more.
    pub fn deposit(&self, name: &str, result: io::Result<Vec<IpAddr>>) -> bool {
        let mut slot = self.lock();
        if slot.expected.as_deref() != Some(name) {
            trace!(name, "dropping stale dns answer");
            return false;
        }
        slot.answer = Some(DnsAnswer {
            name: name.to_string(),
            result,
        });
        true
    }

    /// Take the deposited answer, if any.
    pub fn take(&self) -> Option<DnsAnswer> {
        self.lock().answer.take()
    }

    /// Name currently expected, if any.
    pub fn expected(&self) -> Option<String> {
        self.lock().expected.clone()
    }

    /// Start waiting on `name` (or nothing), discarding any deposited answer.
    fn watch(&self, name: Option<&str>) {
        let mut slot = self.lock();
        slot.expected = name.map(str::to_string);
        slot.answer = None;
    }
}

/// Outcome of starting a resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveStart {
    /// The answer will be deposited into the mailbox later.
    Pending,
    /// The resolver answered synchronously (e.g. from its own cache).
    Cached(Vec<IpAddr>),
    /// The request could not be issued.
    Failed,
}

/// Callback-style name resolver.
pub trait Resolver: Send {
    /// Begin resolving `name`.
    ///
    /// An asynchronous answer must be delivered through
    /// [`DnsMailbox::deposit`] on a clone of `mailbox`.
    fn start(&mut self, name: &str, mailbox: &DnsMailbox) -> ResolveStart;
}

/// Resolver for platforms without a usable name service.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoResolver;

impl Resolver for NoResolver {
    fn start(&mut self, name: &str, _mailbox: &DnsMailbox) -> ResolveStart {
        warn!(name, "no resolver available");
        ResolveStart::Failed
    }
}

/// Resolver answering from a fixed hostname table.
///
/// Deployments without DNS ship a table of the hostnames they talk to, with
/// an optional catch-all address.
#[derive(Debug, Clone, Default)]
pub struct StaticResolver {
    hosts: HashMap<String, IpAddr>,
    fallback: Option<IpAddr>,
}

impl StaticResolver {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `name` to `addr`.
    pub fn host(mut self, name: impl Into<String>, addr: IpAddr) -> Self {
        self.hosts.insert(name.into(), addr);
        self
    }

    /// Address returned for names missing from the table.
    pub fn fallback(mut self, addr: IpAddr) -> Self {
        self.fallback = Some(addr);
        self
    }
}

impl Resolver for StaticResolver {
    fn start(&mut self, name: &str, _mailbox: &DnsMailbox) -> ResolveStart {
        match self.hosts.get(name).copied().or(self.fallback) {
            Some(addr) => {
                debug!(name, %addr, "static resolver");
                ResolveStart::Cached(vec![addr])
            }
            None => ResolveStart::Failed,
        }
    }
}

/// Resolver backed by the host's name service.
///
/// The lookup runs on a spawned task, which plays the role of the board's
/// out-of-band DNS callback and deposits its answer into the mailbox.
#[cfg(feature = "system-dns")]
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[cfg(feature = "system-dns")]
impl Resolver for SystemResolver {
    fn start(&mut self, name: &str, mailbox: &DnsMailbox) -> ResolveStart {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(name, "system resolver needs a tokio runtime");
            return ResolveStart::Failed;
        };
        let name = name.to_string();
        let mailbox = mailbox.clone();
        handle.spawn(async move {
            let result = tokio::net::lookup_host((name.as_str(), 0))
                .await
                .map(|addrs| addrs.map(|addr| addr.ip()).collect::<Vec<_>>());
            mailbox.deposit(&name, result);
        });
        ResolveStart::Pending
    }
}

/// The memoized resolution.
#[derive(Debug, Clone)]
pub struct DnsEntry {
    /// Domain name.
    pub name: String,
    /// Resolution state.
    pub state: DnsState,
    /// Resolved address.
    pub address: Option<IpAddr>,
    /// Clock reading when the request was issued.
    pub requested_at: u32,
}

impl DnsEntry {
    fn unresolved() -> Self {
        Self {
            name: String::new(),
            state: DnsState::Unresolved,
            address: None,
            requested_at: 0,
        }
    }
}

/// Whether `name` is a literal address rather than a hostname.
///
/// Policy: anything starting with a digit, or containing a colon (IPv6).
pub fn is_literal_address(name: &str) -> bool {
    name.starts_with(|c: char| c.is_ascii_digit()) || name.contains(':')
}

/// Parse a literal address, tolerating IPv6 brackets.
pub fn parse_literal(name: &str) -> NetResult<IpAddr> {
    let trimmed = name.trim_start_matches('[').trim_end_matches(']');
    trimmed.parse().map_err(|_| {
        warn!(name, "malformed literal address");
        NetError::ResolveError
    })
}

/// Poll-based wrapper around a callback-style [`Resolver`].
#[derive(Debug)]
pub struct DnsCache<R: Resolver, C: Clock> {
    resolver: R,
    clock: C,
    mailbox: DnsMailbox,
    entry: DnsEntry,
    static_mappings: HashMap<String, IpAddr>,
    poll_interval_ms: u32,
}

impl<R: Resolver, C: Clock> DnsCache<R, C> {
    /// Create an empty cache.
    pub fn new(resolver: R, clock: C) -> Self {
        Self {
            resolver,
            clock,
            mailbox: DnsMailbox::new(),
            entry: DnsEntry::unresolved(),
            static_mappings: HashMap::new(),
            poll_interval_ms: DEFAULT_DNS_POLL_INTERVAL_MS,
        }
    }

    /// Set the mailbox poll interval.
    pub fn set_poll_interval_ms(&mut self, interval_ms: u32) {
        self.poll_interval_ms = interval_ms.max(1);
    }

    /// Record a manual name → literal address override.
    pub fn set_static_mapping(&mut self, name: &str, literal_address: &str) -> NetResult<()> {
        let addr = parse_literal(literal_address)?;
        info!(name, %addr, "static dns mapping");
        self.static_mappings.insert(name.to_string(), addr);
        Ok(())
    }

    /// Remove a manual override.
    pub fn remove_static_mapping(&mut self, name: &str) -> Option<IpAddr> {
        self.static_mappings.remove(name)
    }

    /// The memoized entry.
    pub fn entry(&self) -> &DnsEntry {
        &self.entry
    }

    /// State of the memoized entry.
    pub fn state(&self) -> DnsState {
        self.entry.state
    }

    /// The mailbox resolvers deposit into.
    pub fn mailbox(&self) -> &DnsMailbox {
        &self.mailbox
    }

    /// Forget the memoized entry so the next lookup hits the resolver again.
    pub fn invalidate(&mut self) {
        self.entry = DnsEntry::unresolved();
        self.mailbox.watch(None);
    }

    /// Resolve `name` to an address, waiting at most `timeout_ms`.
    ///
    /// A `timeout_ms` of 0 waits until the resolver answers.
    pub async fn resolve(&mut self, name: &str, timeout_ms: u32) -> NetResult<IpAddr> {
        if is_literal_address(name) {
            return parse_literal(name);
        }
        if let Some(addr) = self.static_mappings.get(name) {
            trace!(name, %addr, "static mapping hit");
            return Ok(*addr);
        }
        if name.is_empty() || name.len() > MAX_DOMAIN_NAME_LEN {
            warn!(name, "unusable domain name");
            return Err(NetError::ResolveError);
        }

        let same_name = self.entry.name == name;
        match self.entry.state {
            DnsState::Resolved if same_name => {
                if let Some(addr) = self.entry.address {
                    return Ok(addr);
                }
            }
            DnsState::Pending if same_name => {
                debug!(name, "resolution already pending");
            }
            _ => self.start(name)?,
        }

        self.wait(timeout_ms).await
    }

    /// Issue a new request for `name`, superseding any pending one.
    fn start(&mut self, name: &str) -> NetResult<()> {
        if self.entry.state == DnsState::Pending {
            debug!(previous = %self.entry.name, name, "superseding pending resolution");
        }
        self.entry = DnsEntry {
            name: name.to_string(),
            state: DnsState::Pending,
            address: None,
            requested_at: self.clock.now_ms(),
        };
        self.mailbox.watch(Some(name));
        debug!(name, at_ms = self.entry.requested_at, "resolving");

        match self.resolver.start(name, &self.mailbox) {
            ResolveStart::Pending => Ok(()),
            ResolveStart::Cached(addrs) => {
                debug!(name, "resolver answered from cache");
                self.complete(Ok(addrs));
                Ok(())
            }
            ResolveStart::Failed => {
                self.entry.state = DnsState::Failed;
                self.mailbox.watch(None);
                warn!(name, "resolver refused the request");
                Err(NetError::ResolveError)
            }
        }
    }

    /// Poll the mailbox until the entry settles or the deadline passes.
    async fn wait(&mut self, timeout_ms: u32) -> NetResult<IpAddr> {
        let mut timer = Timer::with_clock(self.clock.clone());
        if timeout_ms > 0 {
            timer.countdown_ms(timeout_ms);
        }

        loop {
            self.poll();
            match self.entry.state {
                DnsState::Resolved => {
                    return self.entry.address.ok_or(NetError::ResolveError);
                }
                DnsState::Failed | DnsState::Unresolved => return Err(NetError::ResolveError),
                DnsState::Pending => {}
            }
            if timer.is_expired() {
                warn!(
                    name = %self.entry.name,
                    waited_ms = self.clock.now_ms().wrapping_sub(self.entry.requested_at),
                    "dns resolution timed out"
                );
                return Err(NetError::Timeout);
            }
            let step = if timer.is_set() {
                self.poll_interval_ms.min(timer.left_ms().max(1))
            } else {
                self.poll_interval_ms
            };
            tokio::time::sleep(Duration::from_millis(u64::from(step))).await;
        }
    }

    /// Pick up a deposited answer, discarding mismatched ones.
    fn poll(&mut self) {
        let Some(answer) = self.mailbox.take() else {
            return;
        };
        if self.entry.state != DnsState::Pending || answer.name != self.entry.name {
            trace!(name = %answer.name, "ignoring mismatched dns answer");
            return;
        }
        self.complete(answer.result);
    }

    fn complete(&mut self, result: io::Result<Vec<IpAddr>>) {
        let elapsed = self.clock.now_ms().wrapping_sub(self.entry.requested_at);
        match result {
            Ok(addrs) if !addrs.is_empty() => {
                // Prefer IPv4: cellular modems rarely route v6.
                let addr = addrs.iter().copied().find(IpAddr::is_ipv4).unwrap_or(addrs[0]);
                info!(name = %self.entry.name, %addr, elapsed_ms = elapsed, "resolved");
                self.entry.address = Some(addr);
                self.entry.state = DnsState::Resolved;
            }
            Ok(_) => {
                warn!(name = %self.entry.name, elapsed_ms = elapsed, "resolver returned no address");
                self.entry.state = DnsState::Failed;
            }
            Err(e) => {
                warn!(name = %self.entry.name, error = %e, elapsed_ms = elapsed, "resolution failed");
                self.entry.state = DnsState::Failed;
            }
        }
        self.mailbox.watch(None);
    }
}
