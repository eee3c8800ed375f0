//! # Redwood Testkit
//!
//! Testing utilities for the Redwood HTTP transport.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **FakeNode**: An in-memory peer implementing the transport's
//!   [`Capability`](redwood_http::Capability), so the full request layer can
//!   be exercised without sockets
//! - **Fixtures**: A transport pre-wired to a fake node
//! - **Generators**: Proptest strategies for property-based testing
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use redwood_testkit::fixtures::TestPeer;
//!
//! async fn example() {
//!     let peer = TestPeer::new();
//!     peer.node.insert_document("example.com/chat", "/", serde_json::json!({"messages": []}));
//!     let doc = peer.transport.get("example.com/chat", "/", false).await.unwrap();
//!     assert!(doc.as_json().is_some());
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod node;

pub use fixtures::{init_tracing, signed_tx, test_config, TestPeer, TEST_HOST};
pub use node::{FakeNode, RecordedRequest, SESSION_COOKIE};
