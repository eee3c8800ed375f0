//! Challenge-response authentication.
//!
//! ```text
//! Client                                   Peer
//!   |-------- AUTHORIZE (no body) ---------->|
//!   |<------- 200, hex challenge ------------|
//!   |-------- AUTHORIZE, Response: <sig> --->|
//!   |<------- 200, Set-Cookie: session ------|
//! ```
//!
//! The session cookie is picked up by the request layer like any other.

use redwood_core::Signer;
use reqwest::header::HeaderMap;

use crate::capability::RequestBody;
use crate::error::{Result, TransportError};
use crate::request::{extension_method, set_header, RequestLayer};

/// Run the two-step handshake. Any failure is `AuthenticationFailed`.
pub async fn authorize(requests: &RequestLayer, signer: &dyn Signer) -> Result<()> {
    let method = extension_method("AUTHORIZE")?;

    let challenge_hex = requests
        .execute(method.clone(), "/", HeaderMap::new(), RequestBody::Empty)
        .await
        .map_err(|e| failed("challenge request", e))?
        .text()
        .await
        .map_err(|e| failed("challenge body", e))?;

    let challenge = hex::decode(challenge_hex.trim())
        .map_err(|e| TransportError::AuthenticationFailed(format!("challenge is not hex: {e}")))?;

    let signature = hex::encode(signer.sign_bytes(&challenge));
    let mut headers = HeaderMap::new();
    set_header(&mut headers, "response", &signature)?;

    requests
        .execute(method, "/", headers, RequestBody::Empty)
        .await
        .map_err(|e| failed("signature rejected", e))?;

    tracing::info!(address = %signer.address(), "authorized");
    Ok(())
}

fn failed(step: &str, e: TransportError) -> TransportError {
    TransportError::AuthenticationFailed(format!("{step}: {e}"))
}
