//! Upgraded socket connections shared by both capabilities.

use futures::{future, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;

use super::{SocketRequest, SocketStream};
use crate::error::{Result, TransportError};

/// Open a websocket and expose its text messages.
///
/// Request headers are copied onto the upgrade request. Binary messages are
/// decoded as UTF-8; control frames are dropped.
pub(crate) async fn connect(request: SocketRequest) -> Result<SocketStream> {
    let mut upgrade = request
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| TransportError::InvalidArgument(format!("socket url: {e}")))?;

    // The websocket client and reqwest pin different `http` major versions,
    // so headers cross over by their byte representation.
    for (name, value) in request.headers.iter() {
        let name = HeaderName::from_bytes(name.as_str().as_bytes())
            .map_err(|e| TransportError::InvalidArgument(e.to_string()))?;
        let value = HeaderValue::from_bytes(value.as_bytes())
            .map_err(|e| TransportError::InvalidArgument(e.to_string()))?;
        upgrade.headers_mut().append(name, value);
    }

    let (ws, response) = tokio_tungstenite::connect_async(upgrade)
        .await
        .map_err(|e| TransportError::ConnectionFailed(format!("socket connect failed: {e}")))?;
    tracing::debug!(url = %request.url, status = %response.status(), "socket connected");

    Ok(ws
        .filter_map(|message| {
            future::ready(match message {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(data)) => Some(
                    String::from_utf8(data).map_err(|e| TransportError::Decode(e.to_string())),
                ),
                Ok(_) => None,
                Err(e) => Some(Err(TransportError::ConnectionFailed(format!(
                    "socket receive failed: {e}"
                )))),
            })
        })
        .boxed())
}
