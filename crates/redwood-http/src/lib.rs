//! # Redwood HTTP Transport
//!
//! Client-side transport that lets a node talk to one Redwood peer over
//! HTTP.
//!
//! ## Overview
//!
//! - **Subscriptions**: long-lived update channels, streamed over one
//!   chunked response or an upgraded socket, with per-subscription dedup
//!   and automatic acknowledgement of transactions
//! - **Point operations**: `get`, `put`, `ack`, `store_ref`
//! - **Authorization**: a two-step challenge-response handshake that ends
//!   in a session cookie
//! - **Discovery**: peer addresses piggybacked on every request and
//!   response, kept alive by a heartbeat
//!
//! Environment differences (socket construction, multipart bodies, cookie
//! ownership) live behind the [`Capability`] trait.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use redwood_http::{HttpTransport, SubscriptionRequest, TransportConfig};
//! use url::Url;
//!
//! async fn example() -> redwood_http::Result<()> {
//!     let config = TransportConfig::new(Url::parse("http://localhost:8080").unwrap());
//!     let transport = HttpTransport::headless(config)?;
//!
//!     let mut sub = transport
//!         .subscribe(SubscriptionRequest::new("example.com/chat").txs())
//!         .await?;
//!     while let Some(update) = sub.recv().await {
//!         println!("{:?}", update?.tx);
//!     }
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod capability;
pub mod config;
pub mod cookies;
pub mod discovery;
pub mod error;
pub mod ops;
pub mod request;
pub mod subscription;
pub mod transport;

pub use capability::{
    BodyStream, Capability, FormPart, HeadlessCapability, HostedCapability, HttpRequest,
    HttpResponse, RequestBody, SocketRequest, SocketStream,
};
pub use config::{TransportConfig, DEFAULT_DISCOVERY_HEADER, DEFAULT_HEARTBEAT_INTERVAL};
pub use cookies::SessionCookieJar;
pub use discovery::{AltSvcHeader, DiscoveryPort, PeerRegistry};
pub use error::{Result, TransportError};
pub use ops::Document;
pub use subscription::{CancelHandle, Delivery, Subscription, SubscriptionRequest, SubscriptionState};
pub use transport::{HttpTransport, TRANSPORT_NAME};

pub use redwood_core as core;
