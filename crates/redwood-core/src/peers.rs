//! The peer address book and its Alt-Svc-style header encoding.
//!
//! Peers advertise themselves as `transport="address"` entries separated by
//! commas, e.g. `http="10.0.0.2:8080", libp2p="/ip4/10.0.0.3/tcp/21231"`.
//! Parsing is tolerant: an entry that does not match is dropped and the rest
//! of the header still counts.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Mapping from transport name to the set of addresses reachable over it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerAddressBook {
    peers: BTreeMap<String, BTreeSet<String>>,
}

impl PeerAddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a single address. Returns true if it was not already present.
    pub fn insert(&mut self, transport: impl Into<String>, address: impl Into<String>) -> bool {
        self.peers
            .entry(transport.into())
            .or_default()
            .insert(address.into())
    }

    /// Union another book into this one. Returns the number of new addresses.
    pub fn merge(&mut self, other: &PeerAddressBook) -> usize {
        let mut added = 0;
        for (transport, addresses) in &other.peers {
            let entry = self.peers.entry(transport.clone()).or_default();
            for address in addresses {
                if entry.insert(address.clone()) {
                    added += 1;
                }
            }
        }
        added
    }

    pub fn addresses(&self, transport: &str) -> impl Iterator<Item = &str> {
        self.peers
            .get(transport)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    pub fn contains(&self, transport: &str, address: &str) -> bool {
        self.peers
            .get(transport)
            .map_or(false, |set| set.contains(address))
    }

    /// Iterate every `(transport, address)` pair in a stable order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.peers.iter().flat_map(|(transport, addresses)| {
            addresses
                .iter()
                .map(move |address| (transport.as_str(), address.as_str()))
        })
    }

    /// Total number of addresses across all transports.
    pub fn len(&self) -> usize {
        self.peers.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Into<String>, A: Into<String>> FromIterator<(T, A)> for PeerAddressBook {
    fn from_iter<I: IntoIterator<Item = (T, A)>>(iter: I) -> Self {
        let mut book = Self::new();
        for (transport, address) in iter {
            book.insert(transport, address);
        }
        book
    }
}

/// Parse an Alt-Svc-style header value into an address book.
///
/// Malformed entries are skipped; this never fails.
pub fn parse_alt_svc(header: &str) -> PeerAddressBook {
    let mut book = PeerAddressBook::new();
    for entry in header.split(',') {
        match parse_entry(entry) {
            Some((transport, address)) => {
                book.insert(transport, address);
            }
            None => {
                if !entry.trim().is_empty() {
                    tracing::debug!(entry = entry.trim(), "skipping malformed discovery entry");
                }
            }
        }
    }
    book
}

/// Encode an address book as an Alt-Svc-style header value.
///
/// Returns `None` for an empty book so callers can omit the header.
pub fn format_alt_svc(book: &PeerAddressBook) -> Option<String> {
    if book.is_empty() {
        return None;
    }
    Some(
        book.iter()
            .map(|(transport, address)| format!("{transport}=\"{address}\""))
            .collect::<Vec<_>>()
            .join(", "),
    )
}

/// Match `name="address"` at the start of an entry.
///
/// `name` is one or more word characters, `address` is one or more
/// characters other than a double quote. Anything after the closing quote
/// (such as `; ma=3600`) is ignored.
fn parse_entry(entry: &str) -> Option<(&str, &str)> {
    let entry = entry.trim_start();
    let name_len = entry
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(entry.len());
    if name_len == 0 {
        return None;
    }
    let (name, rest) = entry.split_at(name_len);
    let rest = rest.strip_prefix("=\"")?;
    let close = rest.find('"')?;
    if close == 0 {
        return None;
    }
    Some((name, &rest[..close]))
}
