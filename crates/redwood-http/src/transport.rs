//! The HTTP transport facade.

use std::sync::Arc;

use bytes::Bytes;
use redwood_core::{Keypath, PeerAddressBook, RefDescriptor, Signer, StateUri, Tx, TxId};
use tokio::sync::watch;

use crate::auth;
use crate::capability::{Capability, HeadlessCapability, HostedCapability};
use crate::config::TransportConfig;
use crate::discovery::{AltSvcHeader, DiscoveryPort, Heartbeat, PeerRegistry};
use crate::error::{Result, TransportError};
use crate::ops::{self, Document};
use crate::request::RequestLayer;
use crate::subscription::{self, Subscription, SubscriptionRequest};

/// Name reported by [`HttpTransport::transport_name`].
pub const TRANSPORT_NAME: &str = "http";

/// Client-side transport to one peer over HTTP.
///
/// Every operation shares one request layer, so peers discovered by any
/// call are visible to all of them. Cloning is not supported; share the
/// transport behind an `Arc`.
pub struct HttpTransport {
    config: TransportConfig,
    requests: Arc<RequestLayer>,
    peers: Arc<PeerRegistry>,
    heartbeat: Option<Heartbeat>,
}

impl HttpTransport {
    /// Build a transport over `capability`, using the configured discovery
    /// header.
    ///
    /// If a heartbeat interval is configured this must be called within a
    /// tokio runtime.
    pub fn new(config: TransportConfig, capability: Arc<dyn Capability>) -> Result<Self> {
        let discovery = Arc::new(AltSvcHeader::new(&config.discovery_header)?);
        Self::with_discovery(config, capability, discovery)
    }

    /// Build a transport with a custom discovery codec.
    pub fn with_discovery(
        config: TransportConfig,
        capability: Arc<dyn Capability>,
        discovery: Arc<dyn DiscoveryPort>,
    ) -> Result<Self> {
        let peers = Arc::new(PeerRegistry::new());
        let capability_name = capability.name();
        let requests = Arc::new(RequestLayer::new(
            config.http_host.clone(),
            capability,
            discovery,
            Arc::clone(&peers),
        ));

        let heartbeat = match config.heartbeat_interval {
            Some(every) => {
                if tokio::runtime::Handle::try_current().is_err() {
                    return Err(TransportError::InvalidArgument(
                        "heartbeat requires a tokio runtime".into(),
                    ));
                }
                Some(Heartbeat::spawn(Arc::clone(&requests), every))
            }
            None => None,
        };

        tracing::info!(
            host = %config.http_host,
            capability = capability_name,
            heartbeat = ?config.heartbeat_interval,
            "http transport ready"
        );

        Ok(Self {
            config,
            requests,
            peers,
            heartbeat,
        })
    }

    /// A transport for processes without a native cookie store.
    pub fn headless(config: TransportConfig) -> Result<Self> {
        Self::new(config, Arc::new(HeadlessCapability::new()?))
    }

    /// A transport whose client keeps cookies natively.
    pub fn hosted(config: TransportConfig) -> Result<Self> {
        Self::new(config, Arc::new(HostedCapability::new()?))
    }

    pub fn transport_name(&self) -> &'static str {
        TRANSPORT_NAME
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Open a subscription. Fails with `InvalidArgument` before any network
    /// activity if the request asks for neither transactions nor states.
    pub async fn subscribe(&self, request: SubscriptionRequest) -> Result<Subscription> {
        subscription::open(&self.requests, request, self.config.channel_capacity).await
    }

    /// Fetch the document at `keypath`. `raw` asks for the unprocessed
    /// encoding.
    pub async fn get(
        &self,
        state_uri: impl Into<StateUri>,
        keypath: impl Into<Keypath>,
        raw: bool,
    ) -> Result<Document> {
        ops::get(&self.requests, &state_uri.into(), &keypath.into(), raw).await
    }

    /// Submit a transaction. Not retried.
    pub async fn put(&self, tx: &Tx) -> Result<()> {
        ops::put(&self.requests, tx).await
    }

    /// Acknowledge receipt of a transaction.
    pub async fn ack(&self, tx_id: &TxId) -> Result<()> {
        ops::ack(&self.requests, tx_id).await
    }

    /// Upload a content-addressed blob.
    pub async fn store_ref(&self, blob: impl Into<Bytes>) -> Result<RefDescriptor> {
        ops::store_ref(&self.requests, blob.into()).await
    }

    /// Authenticate with the peer's challenge-response handshake.
    pub async fn authorize(&self, signer: &dyn Signer) -> Result<()> {
        auth::authorize(&self.requests, signer).await
    }

    /// Replace the known peer set.
    pub fn found_peers(&self, peers: PeerAddressBook) {
        self.peers.replace(peers);
    }

    pub fn known_peers(&self) -> PeerAddressBook {
        self.peers.snapshot()
    }

    /// Observe the known peer set as it changes.
    pub fn watch_peers(&self) -> watch::Receiver<PeerAddressBook> {
        self.peers.subscribe()
    }

    /// Addresses at which this transport is reachable.
    pub fn alt_svc_addresses(&self) -> &[String] {
        &self.config.alt_svc_addresses
    }

    /// Heartbeats that failed since the last success. Zero when the
    /// heartbeat is disabled.
    pub fn heartbeat_failures(&self) -> u32 {
        self.heartbeat
            .as_ref()
            .map_or(0, Heartbeat::consecutive_failures)
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("host", &self.config.http_host.as_str())
            .field("capability", &self.requests.capability().name())
            .finish_non_exhaustive()
    }
}
