//! The request-execution primitive every operation funnels through.
//!
//! For each call it attaches the discovery header and session cookies,
//! inspects the response for discovered peers (success or not), turns a
//! non-success status into [`TransportError::Remote`], and stores any
//! cookies the response sets when the capability has no native store.

use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, COOKIE};
use reqwest::Method;
use url::Url;

use crate::capability::{Capability, HttpRequest, HttpResponse, RequestBody, SocketRequest};
use crate::discovery::{DiscoveryPort, PeerRegistry};
use crate::error::{Result, TransportError};

/// Shared request layer. Cheap to share behind an `Arc`.
pub struct RequestLayer {
    base: Url,
    capability: Arc<dyn Capability>,
    discovery: Arc<dyn DiscoveryPort>,
    peers: Arc<PeerRegistry>,
}

impl RequestLayer {
    pub fn new(
        base: Url,
        capability: Arc<dyn Capability>,
        discovery: Arc<dyn DiscoveryPort>,
        peers: Arc<PeerRegistry>,
    ) -> Self {
        Self {
            base,
            capability,
            discovery,
            peers,
        }
    }

    pub fn capability(&self) -> &dyn Capability {
        self.capability.as_ref()
    }

    /// Execute one request against `path` (which may carry a query string).
    ///
    /// Caller headers take precedence over the discovery header.
    pub async fn execute(
        &self,
        method: Method,
        path: &str,
        headers: HeaderMap,
        body: RequestBody,
    ) -> Result<HttpResponse> {
        let url = self.url_for(path)?;
        let headers = self.outbound_headers(headers);

        tracing::trace!(%method, %url, "sending request");
        let response = self
            .capability
            .send(HttpRequest {
                method,
                url,
                headers,
                body,
            })
            .await?;

        self.observe_peers(&response.headers);

        if !response.status.is_success() {
            let status = response.status.as_u16();
            let body = match response.bytes().await {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    tracing::warn!(status, error = %e, "failed to read error body");
                    String::new()
                }
            };
            return Err(TransportError::Remote { status, body });
        }

        if let Some(jar) = self.capability.session_cookies() {
            jar.store_from_headers(&response.headers);
        }

        Ok(response)
    }

    /// Build the upgrade request for a socket endpoint derived from the base
    /// URL: same host, `ws`/`wss` scheme, the given path and query.
    pub fn socket_request(&self, path: &str, query: &[(&str, &str)]) -> Result<SocketRequest> {
        let mut url = self.base.clone();
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| TransportError::InvalidArgument(format!("cannot upgrade {}", self.base)))?;
        url.set_path(path);
        url.query_pairs_mut().clear().extend_pairs(query);

        Ok(SocketRequest {
            url,
            headers: self.outbound_headers(HeaderMap::new()),
        })
    }

    fn outbound_headers(&self, headers: HeaderMap) -> HeaderMap {
        let mut outbound = HeaderMap::new();
        self.discovery.attach(&self.peers.snapshot(), &mut outbound);
        outbound.extend(headers);

        if let Some(cookie) = self
            .capability
            .session_cookies()
            .and_then(|jar| jar.header_value())
        {
            outbound.insert(COOKIE, cookie);
        }
        outbound
    }

    fn observe_peers(&self, headers: &HeaderMap) {
        let found = self.discovery.extract(headers);
        if !found.is_empty() {
            self.peers.merge(&found);
        }
    }

    fn url_for(&self, path: &str) -> Result<Url> {
        let base = self.base.as_str().trim_end_matches('/');
        let joined = if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        };
        Url::parse(&joined).map_err(|e| TransportError::InvalidArgument(format!("{joined}: {e}")))
    }
}

/// Insert a header whose value comes from caller data.
pub(crate) fn set_header(headers: &mut HeaderMap, name: &'static str, value: &str) -> Result<()> {
    let value = HeaderValue::from_str(value)
        .map_err(|_| TransportError::InvalidArgument(format!("invalid value for {name}: {value:?}")))?;
    headers.insert(HeaderName::from_static(name), value);
    Ok(())
}

/// A protocol method outside the standard set, such as `ACK`.
pub(crate) fn extension_method(name: &'static str) -> Result<Method> {
    Method::from_bytes(name.as_bytes())
        .map_err(|e| TransportError::InvalidArgument(format!("method {name}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookies::SessionCookieJar;
    use crate::discovery::AltSvcHeader;
    use crate::capability::SocketStream;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::{stream, StreamExt};
    use parking_lot::Mutex;
    use redwood_core::PeerAddressBook;
    use reqwest::StatusCode;

    /// Replies with a fixed status and headers, recording every request.
    struct Scripted {
        status: StatusCode,
        headers: HeaderMap,
        body: &'static [u8],
        seen: Mutex<Vec<HttpRequest>>,
        jar: SessionCookieJar,
    }

    impl Scripted {
        fn new(status: StatusCode, headers: &[(&'static str, &'static str)], body: &'static [u8]) -> Self {
            let mut map = HeaderMap::new();
            for (name, value) in headers {
                map.append(*name, HeaderValue::from_static(value));
            }
            Self {
                status,
                headers: map,
                body,
                seen: Mutex::new(Vec::new()),
                jar: SessionCookieJar::new(),
            }
        }
    }

    #[async_trait]
    impl Capability for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
            self.seen.lock().push(request);
            let body = self.body;
            Ok(HttpResponse {
                status: self.status,
                headers: self.headers.clone(),
                body: stream::once(async move { Ok(Bytes::from_static(body)) }).boxed(),
            })
        }

        async fn connect_socket(&self, _request: SocketRequest) -> Result<SocketStream> {
            Err(TransportError::ConnectionFailed("no sockets".into()))
        }

        fn session_cookies(&self) -> Option<&SessionCookieJar> {
            Some(&self.jar)
        }
    }

    fn layer(capability: Arc<Scripted>, base: &str) -> (RequestLayer, Arc<PeerRegistry>) {
        let peers = Arc::new(PeerRegistry::new());
        let layer = RequestLayer::new(
            Url::parse(base).unwrap(),
            capability,
            Arc::new(AltSvcHeader::new("alt-svc").unwrap()),
            Arc::clone(&peers),
        );
        (layer, peers)
    }

    #[tokio::test]
    async fn test_success_stores_cookies_and_peers() {
        let cap = Arc::new(Scripted::new(
            StatusCode::OK,
            &[("set-cookie", "session=s1; Path=/"), ("alt-svc", r#"http="peer:1""#)],
            b"ok",
        ));
        let (layer, peers) = layer(Arc::clone(&cap), "http://node:8080");

        let resp = layer
            .execute(Method::GET, "/doc", HeaderMap::new(), RequestBody::Empty)
            .await
            .unwrap();
        assert_eq!(resp.text().await.unwrap(), "ok");
        assert_eq!(cap.jar.get("session").as_deref(), Some("s1"));
        assert!(peers.snapshot().contains("http", "peer:1"));

        layer
            .execute(Method::HEAD, "/", HeaderMap::new(), RequestBody::Empty)
            .await
            .unwrap();
        let seen = cap.seen.lock();
        assert_eq!(seen[1].headers.get(COOKIE).unwrap(), "session=s1");
        assert_eq!(seen[1].headers.get("alt-svc").unwrap(), r#"http="peer:1""#);
        assert_eq!(seen[0].url.as_str(), "http://node:8080/doc");
    }

    #[tokio::test]
    async fn test_error_status_is_remote_error_but_peers_still_seen() {
        let cap = Arc::new(Scripted::new(
            StatusCode::FORBIDDEN,
            &[("set-cookie", "session=nope"), ("alt-svc", r#"http="peer:2""#)],
            b"denied",
        ));
        let (layer, peers) = layer(Arc::clone(&cap), "http://node:8080/");

        let err = layer
            .execute(Method::GET, "x", HeaderMap::new(), RequestBody::Empty)
            .await
            .unwrap_err();
        match err {
            TransportError::Remote { status, body } => {
                assert_eq!(status, 403);
                assert_eq!(body, "denied");
            }
            other => panic!("expected remote error, got {other:?}"),
        }
        assert!(cap.jar.is_empty());
        assert!(peers.snapshot().contains("http", "peer:2"));
        assert_eq!(cap.seen.lock()[0].url.as_str(), "http://node:8080/x");
    }

    #[tokio::test]
    async fn test_error_body_kept_when_not_utf8() {
        let cap = Arc::new(Scripted::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            &[],
            b"\xff\xfeok",
        ));
        let (layer, _) = layer(Arc::clone(&cap), "http://node");

        let err = layer
            .execute(Method::GET, "/", HeaderMap::new(), RequestBody::Empty)
            .await
            .unwrap_err();
        match err {
            TransportError::Remote { status, body } => {
                assert_eq!(status, 500);
                assert!(body.ends_with("ok"), "body was {body:?}");
                assert!(body.contains('\u{fffd}'));
            }
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_caller_header_overrides_discovery() {
        let cap = Arc::new(Scripted::new(StatusCode::OK, &[], b""));
        let (layer, peers) = layer(Arc::clone(&cap), "http://node");
        peers.replace([("http", "known")].into_iter().collect::<PeerAddressBook>());

        let mut headers = HeaderMap::new();
        set_header(&mut headers, "alt-svc", "override").unwrap();
        layer
            .execute(Method::GET, "/", headers, RequestBody::Empty)
            .await
            .unwrap();
        assert_eq!(cap.seen.lock()[0].headers.get("alt-svc").unwrap(), "override");
    }

    #[test]
    fn test_socket_request_upgrades_scheme() {
        let cap = Arc::new(Scripted::new(StatusCode::OK, &[], b""));
        let (layer, _) = layer(Arc::clone(&cap), "https://node:443/api");
        cap.jar.insert("session", "s");

        let req = layer
            .socket_request("/ws", &[("state_uri", "a/b"), ("keypath", "/")])
            .unwrap();
        assert_eq!(req.url.scheme(), "wss");
        assert_eq!(req.url.path(), "/ws");
        assert_eq!(req.url.query(), Some("state_uri=a%2Fb&keypath=%2F"));
        assert_eq!(req.headers.get(COOKIE).unwrap(), "session=s");
    }

    #[test]
    fn test_set_header_rejects_control_chars() {
        let mut headers = HeaderMap::new();
        assert!(set_header(&mut headers, "state-uri", "bad\nvalue").is_err());
        assert!(headers.is_empty());
        assert!(extension_method("ACK").is_ok());
    }
}
