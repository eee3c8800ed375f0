//! Transport capabilities: the environment-specific half of the transport.
//!
//! Hosting environments disagree on how sockets are opened, how file bodies
//! are built, and who owns cookies. Everything that differs lives behind the
//! [`Capability`] trait, and one implementation is chosen when the transport
//! is constructed:
//!
//! - [`HeadlessCapability`] - no native cookie store; the transport keeps a
//!   [`SessionCookieJar`] and replays it on every request.
//! - [`HostedCapability`] - the client owns a native cookie store, as a
//!   browser-like host would; the transport never touches cookies.
//!
//! Implementations must be thread-safe (Send + Sync).

mod headless;
mod hosted;
mod socket;

pub use headless::HeadlessCapability;
pub use hosted::HostedCapability;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use crate::cookies::SessionCookieJar;
use crate::error::{Result, TransportError};

/// A response body delivered incrementally.
pub type BodyStream = BoxStream<'static, Result<Bytes>>;

/// Inbound text messages on an upgraded socket. Dropping it closes the socket.
pub type SocketStream = BoxStream<'static, Result<String>>;

/// One named field of a multipart body.
#[derive(Debug, Clone)]
pub struct FormPart {
    pub name: String,
    /// Set for binary file fields, absent for plain text fields.
    pub file_name: Option<String>,
    pub data: Bytes,
}

impl FormPart {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file_name: None,
            data: Bytes::from(value.into()),
        }
    }

    pub fn file(name: impl Into<String>, file_name: impl Into<String>, data: Bytes) -> Self {
        Self {
            name: name.into(),
            file_name: Some(file_name.into()),
            data,
        }
    }
}

/// An outbound request body.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Text(String),
    Multipart(Vec<FormPart>),
}

/// A fully-formed outbound request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: RequestBody,
}

/// A response whose body has not been read yet.
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

impl HttpResponse {
    /// Read the whole body.
    pub async fn bytes(mut self) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = self.body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf.freeze())
    }

    pub async fn text(self) -> Result<String> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes.to_vec()).map_err(|e| TransportError::Decode(e.to_string()))
    }

    pub async fn json<T: DeserializeOwned>(self) -> Result<T> {
        let bytes = self.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// A request to open an upgraded, persistent connection.
#[derive(Debug, Clone)]
pub struct SocketRequest {
    pub url: Url,
    pub headers: HeaderMap,
}

/// The environment-specific primitives the transport is built on.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Send one request and return as soon as the response head arrives.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;

    /// Open an upgraded connection and stream its inbound text messages.
    async fn connect_socket(&self, request: SocketRequest) -> Result<SocketStream>;

    /// The jar the transport must manage itself, if this environment has no
    /// native cookie store.
    fn session_cookies(&self) -> Option<&SessionCookieJar>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn response(chunks: Vec<&'static [u8]>) -> HttpResponse {
        HttpResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from_static(c)))).boxed(),
        }
    }

    #[tokio::test]
    async fn test_response_collects_chunks() {
        let text = response(vec![b"hel", b"lo"]).text().await.unwrap();
        assert_eq!(text, "hello");
    }

    #[tokio::test]
    async fn test_response_json() {
        let value: serde_json::Value = response(vec![b"{\"a\":", b" 1}"]).json().await.unwrap();
        assert_eq!(value["a"], 1);
    }

    #[tokio::test]
    async fn test_response_invalid_utf8_is_decode_error() {
        let err = response(vec![&[0xff, 0xfe]]).text().await.unwrap_err();
        assert!(matches!(err, TransportError::Decode(_)));
    }
}
