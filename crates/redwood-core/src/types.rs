//! Strong type definitions for the Redwood transport.
//!
//! All identifiers are newtypes to prevent mixing up a state URI with a
//! transaction id at compile time. Their contents are opaque to this layer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque, globally-unique transaction identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(String);

impl TxId {
    /// Wrap an identifier string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a random 32-byte identifier, hex-encoded.
    pub fn random() -> Self {
        use rand::Rng;
        let bytes: [u8; 32] = rand::thread_rng().gen();
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TxId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TxId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A string naming one mutable document or namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateUri(String);

impl StateUri {
    pub fn new(uri: impl Into<String>) -> Self {
        Self(uri.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StateUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StateUri {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for StateUri {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A `/`-delimited path selecting a sub-tree of a document.
///
/// Always stored with a leading `/`; an empty path is the document root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Keypath(String);

impl Keypath {
    /// The document root.
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Normalize a path, adding a leading `/` when missing.
    pub fn new(path: impl AsRef<str>) -> Self {
        let path = path.as_ref();
        if path.is_empty() {
            Self::root()
        } else if path.starts_with('/') {
            Self(path.to_string())
        } else {
            Self(format!("/{path}"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }
}

impl Default for Keypath {
    fn default() -> Self {
        Self::root()
    }
}

impl fmt::Display for Keypath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Keypath {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
