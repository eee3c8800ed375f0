//! Capability for headless processes with no native cookie store.

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::multipart::{Form, Part};

use super::{socket, Capability, HttpRequest, HttpResponse, RequestBody, SocketRequest, SocketStream};
use crate::cookies::SessionCookieJar;
use crate::error::{Result, TransportError};

/// reqwest-backed capability that leaves cookie handling to the transport.
pub struct HeadlessCapability {
    client: reqwest::Client,
    cookies: SessionCookieJar,
}

impl HeadlessCapability {
    /// Create a capability with a fresh client and an empty jar.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self::with_client(client))
    }

    /// Use an existing client. It must not have a cookie store of its own.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            cookies: SessionCookieJar::new(),
        }
    }
}

#[async_trait]
impl Capability for HeadlessCapability {
    fn name(&self) -> &'static str {
        "headless"
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        send_with(&self.client, request).await
    }

    async fn connect_socket(&self, request: SocketRequest) -> Result<SocketStream> {
        socket::connect(request).await
    }

    fn session_cookies(&self) -> Option<&SessionCookieJar> {
        Some(&self.cookies)
    }
}

/// Send a request through a reqwest client, streaming the response body.
pub(super) async fn send_with(client: &reqwest::Client, request: HttpRequest) -> Result<HttpResponse> {
    let builder = client
        .request(request.method, request.url)
        .headers(request.headers);

    let builder = match request.body {
        RequestBody::Empty => builder,
        RequestBody::Text(text) => builder.body(text),
        RequestBody::Multipart(parts) => {
            let mut form = Form::new();
            for part in parts {
                let field = Part::bytes(part.data.to_vec());
                let field = match part.file_name {
                    Some(file_name) => field.file_name(file_name),
                    None => field,
                };
                form = form.part(part.name, field);
            }
            builder.multipart(form)
        }
    };

    let response = builder.send().await?;
    Ok(HttpResponse {
        status: response.status(),
        headers: response.headers().clone(),
        body: response.bytes_stream().map_err(TransportError::from).boxed(),
    })
}
