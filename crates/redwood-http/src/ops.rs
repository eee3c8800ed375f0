//! Point operations: read a document, submit a transaction, acknowledge a
//! transaction, upload a ref.
//!
//! None of these retry. Transaction metadata always travels in headers; the
//! body carries only patches (and the attachment, when there is one).

use bytes::Bytes;
use redwood_core::{Keypath, RefDescriptor, StateUri, Tx, TxId};
use reqwest::header::HeaderMap;
use reqwest::Method;

use crate::capability::{FormPart, RequestBody};
use crate::error::Result;
use crate::request::{extension_method, set_header, RequestLayer};

/// A fetched document.
#[derive(Debug, Clone, PartialEq)]
pub enum Document {
    /// Structured decode of the document at the keypath.
    Json(serde_json::Value),
    /// The unprocessed encoding, as requested with `raw`.
    Raw(Bytes),
}

impl Document {
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Document::Json(value) => Some(value),
            Document::Raw(_) => None,
        }
    }
}

pub async fn get(
    requests: &RequestLayer,
    state_uri: &StateUri,
    keypath: &Keypath,
    raw: bool,
) -> Result<Document> {
    let mut headers = HeaderMap::new();
    set_header(&mut headers, "accept", "application/json")?;
    set_header(&mut headers, "state-uri", state_uri.as_str())?;

    let path = if raw {
        format!("{keypath}?raw=1")
    } else {
        keypath.to_string()
    };

    let response = requests
        .execute(Method::GET, &path, headers, RequestBody::Empty)
        .await?;
    if raw {
        Ok(Document::Raw(response.bytes().await?))
    } else {
        Ok(Document::Json(response.json().await?))
    }
}

pub async fn put(requests: &RequestLayer, tx: &Tx) -> Result<()> {
    let mut headers = HeaderMap::new();
    set_header(&mut headers, "state-uri", tx.state_uri.as_str())?;
    set_header(&mut headers, "version", tx.id.as_str())?;
    set_header(&mut headers, "parents", &tx.parents_header())?;
    set_header(&mut headers, "signature", &tx.sig)?;
    set_header(&mut headers, "patch-type", "braid")?;

    let body = match &tx.attachment {
        Some(attachment) => RequestBody::Multipart(vec![
            FormPart::file("attachment", "attachment", Bytes::copy_from_slice(attachment)),
            FormPart::text("patches", tx.patch_text()),
        ]),
        None => RequestBody::Text(tx.patch_text()),
    };

    tracing::debug!(tx = %tx.id, state_uri = %tx.state_uri, "submitting transaction");
    requests.execute(Method::PUT, "/", headers, body).await?;
    Ok(())
}

pub async fn ack(requests: &RequestLayer, tx_id: &TxId) -> Result<()> {
    requests
        .execute(
            extension_method("ACK")?,
            "/",
            HeaderMap::new(),
            RequestBody::Text(tx_id.to_string()),
        )
        .await?;
    Ok(())
}

pub async fn store_ref(requests: &RequestLayer, blob: Bytes) -> Result<RefDescriptor> {
    let mut headers = HeaderMap::new();
    set_header(&mut headers, "ref", "true")?;

    let body = RequestBody::Multipart(vec![FormPart::file("ref", "blob", blob)]);
    requests
        .execute(Method::POST, "/", headers, body)
        .await?
        .json()
        .await
}
