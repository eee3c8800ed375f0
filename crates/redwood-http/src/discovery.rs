//! Peer discovery piggybacked on ordinary traffic.
//!
//! Every response may carry a header listing peers the remote node knows
//! about; every request advertises the peers we know about in the same
//! shape. The header codec is a [`DiscoveryPort`] so the rest of the
//! transport never hard-codes a header name, and the shared book lives in a
//! [`PeerRegistry`].
//!
//! A [`Heartbeat`] keeps discovery flowing when there is no application
//! traffic. It never reports errors to callers.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use redwood_core::{format_alt_svc, parse_alt_svc, PeerAddressBook};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::capability::RequestBody;
use crate::error::{Result, TransportError};
use crate::request::RequestLayer;

/// Extracts peers from responses and attaches peers to requests.
pub trait DiscoveryPort: Send + Sync {
    /// Peers advertised by a response. Malformed entries are skipped.
    fn extract(&self, headers: &HeaderMap) -> PeerAddressBook;

    /// Advertise `peers` on an outbound request.
    fn attach(&self, peers: &PeerAddressBook, headers: &mut HeaderMap);
}

/// Alt-Svc-style discovery header: `name="addr", name2="addr2"`.
#[derive(Debug, Clone)]
pub struct AltSvcHeader {
    name: HeaderName,
}

impl AltSvcHeader {
    pub fn new(name: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| TransportError::InvalidArgument(format!("discovery header: {e}")))?;
        Ok(Self { name })
    }

    pub fn header_name(&self) -> &HeaderName {
        &self.name
    }
}

impl DiscoveryPort for AltSvcHeader {
    fn extract(&self, headers: &HeaderMap) -> PeerAddressBook {
        let mut found = PeerAddressBook::new();
        for value in headers.get_all(&self.name) {
            match value.to_str() {
                Ok(value) => {
                    found.merge(&parse_alt_svc(value));
                }
                Err(_) => tracing::debug!("skipping non-ascii discovery header"),
            }
        }
        found
    }

    fn attach(&self, peers: &PeerAddressBook, headers: &mut HeaderMap) {
        let Some(value) = format_alt_svc(peers) else {
            return;
        };
        match HeaderValue::from_str(&value) {
            Ok(value) => {
                headers.insert(self.name.clone(), value);
            }
            Err(_) => tracing::debug!("known peers do not fit in a header value"),
        }
    }
}

/// The shared peer address book.
///
/// Merges are set unions under a write lock, so concurrent merges never lose
/// addresses. Every change is published to [`PeerRegistry::subscribe`]rs.
pub struct PeerRegistry {
    book: RwLock<PeerAddressBook>,
    updates: watch::Sender<PeerAddressBook>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        let (updates, _) = watch::channel(PeerAddressBook::new());
        Self {
            book: RwLock::new(PeerAddressBook::new()),
            updates,
        }
    }

    /// Union `found` into the book. Returns the number of new addresses.
    pub fn merge(&self, found: &PeerAddressBook) -> usize {
        let (added, snapshot) = {
            let mut book = self.book.write();
            let added = book.merge(found);
            if added == 0 {
                return 0;
            }
            tracing::debug!(added, total = book.len(), "discovered peers");
            (added, book.clone())
        };
        self.updates.send_replace(snapshot);
        added
    }

    /// Replace the whole book atomically.
    pub fn replace(&self, book: PeerAddressBook) {
        {
            let mut current = self.book.write();
            if *current == book {
                return;
            }
            *current = book.clone();
        }
        self.updates.send_replace(book);
    }

    pub fn snapshot(&self) -> PeerAddressBook {
        self.book.read().clone()
    }

    /// Receive the book after every change.
    pub fn subscribe(&self) -> watch::Receiver<PeerAddressBook> {
        self.updates.subscribe()
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Background task issuing a no-body request at a fixed interval.
///
/// Failures are logged and counted, never propagated. The task stops when
/// the heartbeat is dropped.
pub struct Heartbeat {
    task: JoinHandle<()>,
    failures: Arc<AtomicU32>,
}

impl Heartbeat {
    /// Start the heartbeat. Must be called within a tokio runtime.
    pub(crate) fn spawn(requests: Arc<RequestLayer>, every: Duration) -> Self {
        let failures = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&failures);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match requests
                    .execute(Method::HEAD, "/", HeaderMap::new(), RequestBody::Empty)
                    .await
                {
                    Ok(_) => {
                        counter.store(0, Ordering::Relaxed);
                    }
                    Err(e) => {
                        let failed = counter.fetch_add(1, Ordering::Relaxed) + 1;
                        tracing::warn!(error = %e, consecutive = failed, "discovery heartbeat failed");
                    }
                }
            }
        });

        Self { task, failures }
    }

    /// Heartbeats that failed since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::Relaxed)
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.task.abort();
    }
}
