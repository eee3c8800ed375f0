//! # Redwood Core
//!
//! Pure primitives for the Redwood HTTP transport: transactions, update
//! messages, the peer address book, and the streaming frame codec.
//!
//! This crate contains no I/O and no networking. Everything here is
//! synchronous computation over protocol data, so the transport crate can
//! run it between suspension points without holding any connection state.
//!
//! ## Key Types
//!
//! - [`Tx`] - A signed mutation against a state URI
//! - [`UpdateMessage`] - One decoded unit delivered to a subscriber
//! - [`SubscriptionKind`] - Which updates a subscription asks for
//! - [`PeerAddressBook`] - Transport name to reachable addresses
//! - [`FrameDecoder`] - Incremental line splitter for streamed responses
//!
//! ## Framing
//!
//! Streamed subscriptions carry newline-delimited frames, each a fixed
//! `data:` prefix followed by a JSON object. See the [`frame`] module.

pub mod crypto;
pub mod error;
pub mod frame;
pub mod peers;
pub mod tx;
pub mod types;

pub use crypto::{Ed25519PublicKey, Ed25519Signature, Keypair, Signer};
pub use error::{CoreError, Result};
pub use frame::{decode_frame, split_socket_message, FrameDecoder, FRAME_PREFIX_LEN};
pub use peers::{format_alt_svc, parse_alt_svc, PeerAddressBook};
pub use tx::{RefDescriptor, SubscriptionKind, Tx, UpdateMessage};
pub use types::{Keypath, StateUri, TxId};
