//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;

use redwood_core::{Keypair, Tx, TxId};
use redwood_http::{Capability, HttpTransport, TransportConfig};
use url::Url;

use crate::node::FakeNode;

/// Base URL every fixture transport points at.
pub const TEST_HOST: &str = "http://fake.node";

/// A transport wired to an in-memory node.
pub struct TestPeer {
    pub node: Arc<FakeNode>,
    pub transport: HttpTransport,
}

impl TestPeer {
    /// A peer with the heartbeat disabled.
    pub fn new() -> Self {
        Self::with_config(|config| config)
    }

    /// A peer whose config is adjusted by `configure` first.
    ///
    /// Enabling the heartbeat requires a tokio runtime.
    pub fn with_config(configure: impl FnOnce(TransportConfig) -> TransportConfig) -> Self {
        let node = Arc::new(FakeNode::new());
        let capability: Arc<dyn Capability> = Arc::clone(&node) as Arc<dyn Capability>;
        let transport = HttpTransport::new(configure(test_config()), capability)
            .expect("fixture transport builds");
        Self { node, transport }
    }
}

impl Default for TestPeer {
    fn default() -> Self {
        Self::new()
    }
}

/// Config for [`TEST_HOST`] with the heartbeat disabled.
pub fn test_config() -> TransportConfig {
    TransportConfig::new(Url::parse(TEST_HOST).expect("test host is a valid url"))
        .with_heartbeat_interval(None)
}

/// A transaction signed by `keypair`.
pub fn signed_tx(keypair: &Keypair, state_uri: &str, parents: &[&str], patches: &[&str]) -> Tx {
    Tx::new(
        state_uri,
        parents.iter().copied().map(TxId::from).collect(),
        patches.iter().map(|p| p.to_string()).collect(),
    )
    .sign(keypair)
}

/// Route transport logs to the test harness. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
