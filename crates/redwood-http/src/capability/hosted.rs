//! Capability for hosts that own a native cookie store.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::COOKIE;

use super::headless::send_with;
use super::{socket, Capability, HttpRequest, HttpResponse, SocketRequest, SocketStream};
use crate::cookies::SessionCookieJar;
use crate::error::Result;

/// reqwest-backed capability whose client stores and replays cookies itself.
///
/// Requests always carry credentials. The transport never sees the jar,
/// except that the upgrade request of a socket subscription is handed the
/// cookies the store holds for the equivalent http origin.
///
/// The native store keeps cookies set by any response, including non-success
/// ones such as a rejected `AUTHORIZE`. Only [`HeadlessCapability`] limits
/// cookie storage to successful responses.
///
/// [`HeadlessCapability`]: super::HeadlessCapability
pub struct HostedCapability {
    client: reqwest::Client,
    jar: Arc<Jar>,
}

impl HostedCapability {
    pub fn new() -> Result<Self> {
        let jar = Arc::new(Jar::default());
        let client = reqwest::Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .build()?;
        Ok(Self { client, jar })
    }

    /// The native store, for hosts that seed or inspect it directly.
    pub fn cookie_store(&self) -> Arc<Jar> {
        Arc::clone(&self.jar)
    }
}

#[async_trait]
impl Capability for HostedCapability {
    fn name(&self) -> &'static str {
        "hosted"
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        send_with(&self.client, request).await
    }

    async fn connect_socket(&self, mut request: SocketRequest) -> Result<SocketStream> {
        let mut origin = request.url.clone();
        let scheme = if origin.scheme() == "wss" { "https" } else { "http" };
        if origin.set_scheme(scheme).is_ok() {
            if let Some(cookies) = self.jar.cookies(&origin) {
                request.headers.insert(COOKIE, cookies);
            }
        }
        socket::connect(request).await
    }

    fn session_cookies(&self) -> Option<&SessionCookieJar> {
        None
    }
}
