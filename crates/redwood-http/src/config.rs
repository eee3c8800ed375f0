//! Transport configuration.

use std::time::Duration;

use url::Url;

/// Default interval between discovery heartbeats.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Default discovery header.
pub const DEFAULT_DISCOVERY_HEADER: &str = "alt-svc";

/// Configuration for an [`HttpTransport`](crate::HttpTransport).
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Base URL of the peer. Request paths are appended to it.
    pub http_host: Url,
    /// Interval between discovery heartbeats. `None` disables the heartbeat.
    pub heartbeat_interval: Option<Duration>,
    /// Header carrying peer addresses on requests and responses.
    pub discovery_header: String,
    /// Addresses at which this transport itself is reachable.
    pub alt_svc_addresses: Vec<String>,
    /// Updates buffered per subscription before the read loop waits.
    pub channel_capacity: usize,
}

impl TransportConfig {
    /// Configuration for a peer at `http_host`, defaults otherwise.
    pub fn new(http_host: Url) -> Self {
        Self {
            http_host,
            ..Self::default()
        }
    }

    pub fn with_heartbeat_interval(mut self, interval: Option<Duration>) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_discovery_header(mut self, header: impl Into<String>) -> Self {
        self.discovery_header = header.into();
        self
    }

    pub fn with_alt_svc_addresses(mut self, addresses: Vec<String>) -> Self {
        self.alt_svc_addresses = addresses;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            http_host: Url::parse("http://localhost:8080").expect("static url is valid"),
            heartbeat_interval: Some(DEFAULT_HEARTBEAT_INTERVAL),
            discovery_header: DEFAULT_DISCOVERY_HEADER.to_string(),
            alt_svc_addresses: Vec::new(),
            channel_capacity: 256,
        }
    }
}
