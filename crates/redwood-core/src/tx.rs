//! Transactions and the update messages that carry them.
//!
//! A [`Tx`] is a signed mutation against a state URI. Its patches are opaque
//! line-oriented instructions; this layer never interprets them. Parents are
//! forwarded as given and validated by the remote peer.

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::crypto::Signer;
use crate::types::{StateUri, TxId};

/// A signed, causally-ordered mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tx {
    pub id: TxId,
    #[serde(rename = "stateURI")]
    pub state_uri: StateUri,
    /// Ancestor transaction ids. Empty only for the root transaction.
    #[serde(default)]
    pub parents: Vec<TxId>,
    #[serde(default)]
    pub patches: Vec<String>,
    /// Hex-encoded signature over [`Tx::signing_bytes`].
    #[serde(default)]
    pub sig: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "attachment_base64"
    )]
    pub attachment: Option<Vec<u8>>,
}

impl Tx {
    /// Create an unsigned transaction with a random id.
    pub fn new(state_uri: impl Into<StateUri>, parents: Vec<TxId>, patches: Vec<String>) -> Self {
        Self {
            id: TxId::random(),
            state_uri: state_uri.into(),
            parents,
            patches,
            sig: String::new(),
            attachment: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<TxId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_attachment(mut self, attachment: impl Into<Vec<u8>>) -> Self {
        self.attachment = Some(attachment.into());
        self
    }

    /// Sign the transaction, replacing any existing signature.
    pub fn sign(mut self, signer: &dyn Signer) -> Self {
        self.sig = hex::encode(signer.sign_bytes(&self.signing_bytes()));
        self
    }

    /// The bytes covered by the signature.
    ///
    /// Id, state URI, comma-joined parents, and newline-joined patches,
    /// each terminated by a newline.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for field in [
            self.id.as_str(),
            self.state_uri.as_str(),
            &self.parents_header(),
            &self.patch_text(),
        ] {
            out.extend_from_slice(field.as_bytes());
            out.push(b'\n');
        }
        out
    }

    /// Parents joined the way they travel in request metadata.
    pub fn parents_header(&self) -> String {
        self.parents
            .iter()
            .map(TxId::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Patches joined the way they travel in a request body.
    pub fn patch_text(&self) -> String {
        self.patches.join("\n")
    }

    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }
}

/// One decoded unit delivered to a subscriber.
///
/// Which fields are populated depends on the negotiated [`SubscriptionKind`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx: Option<Tx>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<serde_json::Value>,
    /// Current frontier of the causal DAG.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leaves: Option<Vec<TxId>>,
}

impl UpdateMessage {
    pub fn tx_id(&self) -> Option<&TxId> {
        self.tx.as_ref().map(|tx| &tx.id)
    }
}

/// Which updates a subscription asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    Transactions,
    States,
    Both,
}

impl SubscriptionKind {
    /// Resolve the kind from the two request flags.
    ///
    /// Returns `None` when neither is set.
    pub fn from_flags(txs: bool, states: bool) -> Option<Self> {
        match (txs, states) {
            (true, true) => Some(Self::Both),
            (true, false) => Some(Self::Transactions),
            (false, true) => Some(Self::States),
            (false, false) => None,
        }
    }

    /// Value of the `Subscribe` header and `subscription_type` query parameter.
    pub fn as_header_value(&self) -> &'static str {
        match self {
            Self::Transactions => "transactions",
            Self::States => "states",
            Self::Both => "states,transactions",
        }
    }

    /// Parse a header value. Both orders of the combined form are accepted.
    pub fn from_header_value(value: &str) -> Option<Self> {
        let mut txs = false;
        let mut states = false;
        for part in value.split(',').map(str::trim) {
            match part {
                "transactions" => txs = true,
                "states" => states = true,
                _ => return None,
            }
        }
        Self::from_flags(txs, states)
    }

    pub fn includes_txs(&self) -> bool {
        matches!(self, Self::Transactions | Self::Both)
    }

    pub fn includes_states(&self) -> bool {
        matches!(self, Self::States | Self::Both)
    }
}

/// Descriptor returned after uploading a ref.
///
/// Either hash can later be used as an attachment reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefDescriptor {
    pub sha1: String,
    pub sha3: String,
}

mod attachment_base64 {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(bytes) => {
                s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
            }
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let encoded: Option<String> = Option::deserialize(d)?;
        encoded
            .map(|s| {
                base64::engine::general_purpose::STANDARD
                    .decode(s)
                    .map_err(serde::de::Error::custom)
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;

    #[test]
    fn test_subscription_kind_flags() {
        assert_eq!(SubscriptionKind::from_flags(false, false), None);
        assert_eq!(
            SubscriptionKind::from_flags(true, false),
            Some(SubscriptionKind::Transactions)
        );
        assert_eq!(
            SubscriptionKind::from_flags(true, true).map(|k| k.as_header_value()),
            Some("states,transactions")
        );
    }

    #[test]
    fn test_subscription_kind_header_parse() {
        assert_eq!(
            SubscriptionKind::from_header_value("transactions,states"),
            Some(SubscriptionKind::Both)
        );
        assert_eq!(
            SubscriptionKind::from_header_value("states"),
            Some(SubscriptionKind::States)
        );
        assert_eq!(SubscriptionKind::from_header_value("nope"), None);
    }

    #[test]
    fn test_tx_json_shape() {
        let tx = Tx::new("chat.local/room", vec![TxId::from("p1")], vec![".text = \"hi\"".into()])
            .with_id("tx1")
            .with_attachment(vec![1u8, 2, 3]);
        let value = serde_json::to_value(&tx).unwrap();

        assert_eq!(value["id"], "tx1");
        assert_eq!(value["stateURI"], "chat.local/room");
        assert_eq!(value["parents"][0], "p1");
        assert_eq!(value["attachment"], "AQID");

        let decoded: Tx = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, tx);
    }

    #[test]
    fn test_tx_without_attachment_omits_field() {
        let tx = Tx::new("s", vec![], vec![]).with_id("root");
        let value = serde_json::to_value(&tx).unwrap();
        assert!(value.get("attachment").is_none());
        assert!(tx.is_root());
    }

    #[test]
    fn test_tx_signature_verifies() {
        let keypair = Keypair::from_seed(&[7u8; 32]);
        let tx = Tx::new("s", vec![], vec!["a".into(), "b".into()]).sign(&keypair);

        let sig = crate::crypto::Ed25519Signature::from_hex(&tx.sig).unwrap();
        keypair
            .public_key()
            .verify(&tx.signing_bytes(), &sig)
            .expect("signature should verify");
    }

    #[test]
    fn test_update_message_partial_fields() {
        let update: UpdateMessage =
            serde_json::from_str(r#"{"state": {"n": 1}, "leaves": ["a"]}"#).unwrap();
        assert!(update.tx.is_none());
        assert_eq!(update.state, Some(serde_json::json!({"n": 1})));
        assert_eq!(update.leaves, Some(vec![TxId::from("a")]));
        assert_eq!(update.tx_id(), None);
    }
}
