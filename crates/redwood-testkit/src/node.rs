//! An in-memory Redwood peer.
//!
//! [`FakeNode`] implements [`Capability`] directly, so a transport built on
//! it exercises the full request layer (headers, cookies, discovery,
//! framing) without sockets. It behaves like a small node:
//!
//! - `GET` with a `Subscribe` header opens a streamed subscription
//! - `GET` without one returns a stored document, or its raw bytes
//! - `PUT` records the transaction and fans it out to subscribers
//! - `ACK` records the acknowledged id
//! - `POST` with `Ref: true` stores a blob
//! - `AUTHORIZE` runs the challenge-response handshake against trusted keys
//! - `HEAD` is answered empty
//!
//! Socket subscriptions opened with `connect_socket` to `/ws` receive the
//! same fan-out.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use rand::RngCore;
use redwood_core::{
    Ed25519PublicKey, Ed25519Signature, Keypath, SubscriptionKind, Tx, TxId, UpdateMessage,
};
use redwood_http::{
    BodyStream, Capability, HttpRequest, HttpResponse, RequestBody, Result, SessionCookieJar,
    SocketRequest, SocketStream, TransportError,
};
use reqwest::header::{HeaderMap, HeaderValue, SET_COOKIE};
use reqwest::{Method, StatusCode};
use tokio::sync::{mpsc, Notify};

/// Name of the cookie issued after a successful handshake.
pub const SESSION_COOKIE: &str = "redwood_session";

/// How long the `wait_for_*` helpers wait before giving up.
const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// A request as the node saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// A query parameter, for socket upgrade requests.
    pub fn query_param(&self, name: &str) -> Option<String> {
        let query = self.query.as_deref()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }
}

enum Sink {
    Stream(mpsc::UnboundedSender<Result<Bytes>>),
    Socket(mpsc::UnboundedSender<Result<String>>),
}

struct Subscriber {
    state_uri: String,
    kind: SubscriptionKind,
    sink: Sink,
}

impl Subscriber {
    fn is_open(&self) -> bool {
        match &self.sink {
            Sink::Stream(tx) => !tx.is_closed(),
            Sink::Socket(tx) => !tx.is_closed(),
        }
    }

    fn send(&self, update: &UpdateMessage) -> bool {
        let json = serde_json::to_string(update).expect("update messages serialize");
        match &self.sink {
            Sink::Stream(tx) => tx.send(Ok(Bytes::from(format!("data: {json}\n")))).is_ok(),
            Sink::Socket(tx) => tx.send(Ok(format!("{json}\n"))).is_ok(),
        }
    }

    /// The update this subscriber receives for `tx`, shaped by its kind.
    fn update_for(&self, tx: &Tx, state: Option<&serde_json::Value>) -> UpdateMessage {
        UpdateMessage {
            tx: self.kind.includes_txs().then(|| tx.clone()),
            state: self
                .kind
                .includes_states()
                .then(|| state.cloned().unwrap_or(serde_json::Value::Null)),
            leaves: Some(vec![tx.id.clone()]),
        }
    }
}

#[derive(Default)]
struct NodeState {
    documents: HashMap<(String, String), serde_json::Value>,
    received: Vec<Tx>,
    acks: Vec<TxId>,
    refs: Vec<Bytes>,
    requests: Vec<RecordedRequest>,
    socket_requests: Vec<RecordedRequest>,
    subscribers: Vec<Subscriber>,
    advertised: Option<String>,
    trusted: Vec<Ed25519PublicKey>,
    challenge: Option<Vec<u8>>,
    offline: bool,
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: BodyStream,
}

impl Reply {
    fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        Self {
            status,
            headers: HeaderMap::new(),
            body: futures::stream::once(async move { Ok(body) }).boxed(),
        }
    }

    fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(StatusCode::OK, body)
    }

    fn empty() -> Self {
        Self::ok(Bytes::new())
    }

    fn streaming(body: BodyStream) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body,
        }
    }
}

/// An in-memory peer node.
#[derive(Default)]
pub struct FakeNode {
    state: Mutex<NodeState>,
    jar: SessionCookieJar,
    acked: Notify,
    subscribed: Notify,
}

impl FakeNode {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advertise `value` in the `Alt-Svc` header of every response.
    pub fn advertise(&self, value: &str) {
        self.state.lock().advertised = Some(value.to_string());
    }

    pub fn stop_advertising(&self) {
        self.state.lock().advertised = None;
    }

    pub fn insert_document(&self, state_uri: &str, keypath: &str, value: serde_json::Value) {
        let keypath = Keypath::new(keypath).as_str().to_string();
        self.state
            .lock()
            .documents
            .insert((state_uri.to_string(), keypath), value);
    }

    /// Accept handshake signatures from `key`.
    pub fn trust(&self, key: Ed25519PublicKey) {
        self.state.lock().trusted.push(key);
    }

    /// While offline every request fails with `ConnectionFailed`.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Send an update to every open subscriber of `state_uri`, regardless
    /// of kind. Returns how many received it.
    pub fn push_update(&self, state_uri: &str, update: &UpdateMessage) -> usize {
        let state = self.state.lock();
        state
            .subscribers
            .iter()
            .filter(|s| s.state_uri == state_uri)
            .filter(|s| s.send(update))
            .count()
    }

    /// Send `tx` as a bare transaction update, as a retransmitting peer would.
    pub fn push_tx(&self, tx: &Tx) -> usize {
        let update = UpdateMessage {
            tx: Some(tx.clone()),
            state: None,
            leaves: Some(vec![tx.id.clone()]),
        };
        self.push_update(tx.state_uri.as_str(), &update)
    }

    /// Write raw bytes to every streamed subscription.
    pub fn push_raw(&self, bytes: &[u8]) -> usize {
        let state = self.state.lock();
        state
            .subscribers
            .iter()
            .filter_map(|s| match &s.sink {
                Sink::Stream(tx) => Some(tx),
                Sink::Socket(_) => None,
            })
            .filter(|tx| tx.send(Ok(Bytes::copy_from_slice(bytes))).is_ok())
            .count()
    }

    /// Send a raw text message to every socket subscription.
    pub fn push_socket_raw(&self, text: &str) -> usize {
        let state = self.state.lock();
        state
            .subscribers
            .iter()
            .filter_map(|s| match &s.sink {
                Sink::Socket(tx) => Some(tx),
                Sink::Stream(_) => None,
            })
            .filter(|tx| tx.send(Ok(text.to_string())).is_ok())
            .count()
    }

    /// End every subscription cleanly.
    pub fn close_subscriptions(&self) {
        self.state.lock().subscribers.clear();
    }

    /// Subscriptions whose client side is still listening.
    pub fn open_subscriptions(&self) -> usize {
        self.state
            .lock()
            .subscribers
            .iter()
            .filter(|s| s.is_open())
            .count()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.state.lock().requests.len()
    }

    /// Requests made with `method`.
    pub fn requests_with(&self, method: &str) -> Vec<RecordedRequest> {
        self.state
            .lock()
            .requests
            .iter()
            .filter(|r| r.method.as_str() == method)
            .cloned()
            .collect()
    }

    pub fn socket_requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().socket_requests.clone()
    }

    /// Transactions accepted through `PUT`, in arrival order.
    pub fn received_txs(&self) -> Vec<Tx> {
        self.state.lock().received.clone()
    }

    pub fn acks(&self) -> Vec<TxId> {
        self.state.lock().acks.clone()
    }

    pub fn refs(&self) -> Vec<Bytes> {
        self.state.lock().refs.clone()
    }

    /// Wait until at least `count` acks have arrived, or time out. Returns
    /// the acks seen either way.
    pub async fn wait_for_acks(&self, count: usize) -> Vec<TxId> {
        let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
        loop {
            let notified = self.acked.notified();
            let acks = self.acks();
            if acks.len() >= count {
                return acks;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.acks();
            }
        }
    }

    /// Wait until at least `count` subscriptions are open, or time out.
    pub async fn wait_for_subscribers(&self, count: usize) -> usize {
        let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
        loop {
            let notified = self.subscribed.notified();
            let open = self.open_subscriptions();
            if open >= count {
                return open;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.open_subscriptions();
            }
        }
    }

    fn handle(&self, request: HttpRequest) -> Result<HttpResponse> {
        let mut state = self.state.lock();
        state.requests.push(RecordedRequest {
            method: request.method.clone(),
            path: request.url.path().to_string(),
            query: request.url.query().map(str::to_string),
            headers: request.headers.clone(),
        });
        if state.offline {
            return Err(TransportError::ConnectionFailed("node offline".into()));
        }

        let method = request.method.clone();
        let reply = match method.as_str() {
            "HEAD" => Reply::empty(),
            "GET" if request.headers.contains_key("subscribe") => {
                open_stream(&mut state, &request)
            }
            "GET" => get_document(&state, &request),
            "PUT" => put(&mut state, request),
            "ACK" => ack(&mut state, request),
            "POST" => store_ref(&mut state, request),
            "AUTHORIZE" => authorize(&mut state, &request),
            _ => Reply::new(StatusCode::METHOD_NOT_ALLOWED, "unsupported method"),
        };

        let mut headers = reply.headers;
        if let Some(value) = state
            .advertised
            .as_deref()
            .and_then(|v| HeaderValue::from_str(v).ok())
        {
            headers.insert("alt-svc", value);
        }
        drop(state);

        self.acked.notify_waiters();
        self.subscribed.notify_waiters();
        Ok(HttpResponse {
            status: reply.status,
            headers,
            body: reply.body,
        })
    }
}

#[async_trait]
impl Capability for FakeNode {
    fn name(&self) -> &'static str {
        "fake-node"
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.handle(request)
    }

    async fn connect_socket(&self, request: SocketRequest) -> Result<SocketStream> {
        self.open_socket(request)
    }

    fn session_cookies(&self) -> Option<&SessionCookieJar> {
        Some(&self.jar)
    }
}

impl FakeNode {
    fn open_socket(&self, request: SocketRequest) -> Result<SocketStream> {
        let recorded = RecordedRequest {
            method: Method::GET,
            path: request.url.path().to_string(),
            query: request.url.query().map(str::to_string),
            headers: request.headers,
        };

        let mut state = self.state.lock();
        state.socket_requests.push(recorded.clone());
        if state.offline {
            return Err(TransportError::ConnectionFailed("node offline".into()));
        }
        if recorded.path != "/ws" {
            return Err(TransportError::ConnectionFailed(format!(
                "no socket endpoint at {}",
                recorded.path
            )));
        }
        let kind = recorded
            .query_param("subscription_type")
            .and_then(|v| SubscriptionKind::from_header_value(&v))
            .ok_or_else(|| TransportError::ConnectionFailed("bad subscription_type".into()))?;
        let state_uri = recorded.query_param("state_uri").unwrap_or_default();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let subscriber = Subscriber {
            state_uri,
            kind,
            sink: Sink::Socket(tx),
        };
        replay(&state, &subscriber, recorded.query_param("from_tx").as_deref());
        state.subscribers.push(subscriber);
        drop(state);

        self.subscribed.notify_waiters();
        Ok(futures::stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed())
    }
}

/// Send every received transaction after `from_tx` to a new subscriber.
fn replay(state: &NodeState, subscriber: &Subscriber, from_tx: Option<&str>) {
    let Some(from_tx) = from_tx else {
        return;
    };
    let Some(start) = state.received.iter().position(|tx| tx.id.as_str() == from_tx) else {
        return;
    };
    for tx in &state.received[start + 1..] {
        if tx.state_uri.as_str() == subscriber.state_uri {
            let root = state
                .documents
                .get(&(subscriber.state_uri.clone(), "/".to_string()));
            subscriber.send(&subscriber.update_for(tx, root));
        }
    }
}

fn header(request: &HttpRequest, name: &str) -> Option<String> {
    request
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn open_stream(state: &mut NodeState, request: &HttpRequest) -> Reply {
    let Some(kind) =
        header(request, "subscribe").and_then(|v| SubscriptionKind::from_header_value(&v))
    else {
        return Reply::new(StatusCode::BAD_REQUEST, "bad subscribe header");
    };
    let state_uri = header(request, "state-uri").unwrap_or_default();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscriber = Subscriber {
        state_uri,
        kind,
        sink: Sink::Stream(tx),
    };
    replay(state, &subscriber, header(request, "from-tx").as_deref());
    state.subscribers.push(subscriber);

    Reply::streaming(futures::stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed())
}

fn get_document(state: &NodeState, request: &HttpRequest) -> Reply {
    let state_uri = header(request, "state-uri").unwrap_or_default();
    let keypath = Keypath::new(request.url.path()).as_str().to_string();
    let raw = request.url.query() == Some("raw=1");

    match state.documents.get(&(state_uri, keypath)) {
        Some(value) if raw => Reply::ok(value.to_string()),
        Some(value) => Reply::ok(serde_json::to_vec(value).expect("json values serialize")),
        None => Reply::new(StatusCode::NOT_FOUND, "not found"),
    }
}

fn put(state: &mut NodeState, request: HttpRequest) -> Reply {
    let Some(id) = header(&request, "version") else {
        return Reply::new(StatusCode::BAD_REQUEST, "missing version");
    };
    let parents = header(&request, "parents")
        .map(|p| {
            p.split(',')
                .filter(|s| !s.is_empty())
                .map(TxId::from)
                .collect()
        })
        .unwrap_or_default();
    let state_uri = header(&request, "state-uri").unwrap_or_default();
    let sig = header(&request, "signature").unwrap_or_default();

    let (patch_text, attachment) = match request.body {
        RequestBody::Empty => (String::new(), None),
        RequestBody::Text(text) => (text, None),
        RequestBody::Multipart(parts) => {
            let mut patch_text = String::new();
            let mut attachment = None;
            for part in parts {
                match part.name.as_str() {
                    "patches" => patch_text = String::from_utf8_lossy(&part.data).into_owned(),
                    "attachment" => attachment = Some(part.data.to_vec()),
                    _ => {}
                }
            }
            (patch_text, attachment)
        }
    };
    let patches = if patch_text.is_empty() {
        Vec::new()
    } else {
        patch_text.split('\n').map(str::to_string).collect()
    };

    let tx = Tx {
        id: TxId::from(id),
        state_uri: state_uri.into(),
        parents,
        patches,
        sig,
        attachment,
    };

    state.subscribers.retain(Subscriber::is_open);
    let root = state
        .documents
        .get(&(tx.state_uri.to_string(), "/".to_string()));
    for subscriber in state
        .subscribers
        .iter()
        .filter(|s| s.state_uri == tx.state_uri.as_str())
    {
        subscriber.send(&subscriber.update_for(&tx, root));
    }
    state.received.push(tx);
    Reply::empty()
}

fn ack(state: &mut NodeState, request: HttpRequest) -> Reply {
    match request.body {
        RequestBody::Text(id) => {
            state.acks.push(TxId::from(id.trim()));
            Reply::empty()
        }
        _ => Reply::new(StatusCode::BAD_REQUEST, "ack needs a tx id"),
    }
}

fn store_ref(state: &mut NodeState, request: HttpRequest) -> Reply {
    if header(&request, "ref").as_deref() != Some("true") {
        return Reply::new(StatusCode::BAD_REQUEST, "expected ref upload");
    }
    let RequestBody::Multipart(parts) = request.body else {
        return Reply::new(StatusCode::BAD_REQUEST, "ref must be multipart");
    };
    let Some(blob) = parts.into_iter().find(|p| p.name == "ref") else {
        return Reply::new(StatusCode::BAD_REQUEST, "missing ref field");
    };

    state.refs.push(blob.data);
    let n = state.refs.len();
    let descriptor = serde_json::json!({
        "sha1": format!("{n:040x}"),
        "sha3": format!("{n:064x}"),
    });
    Reply::ok(descriptor.to_string())
}

fn authorize(state: &mut NodeState, request: &HttpRequest) -> Reply {
    let Some(response) = header(request, "response") else {
        let mut challenge = vec![0u8; 16];
        rand::thread_rng().fill_bytes(&mut challenge);
        let reply = Reply::ok(hex::encode(&challenge));
        state.challenge = Some(challenge);
        return reply;
    };

    let Some(challenge) = state.challenge.take() else {
        return Reply::new(StatusCode::BAD_REQUEST, "no challenge outstanding");
    };
    let Ok(signature) = Ed25519Signature::from_hex(&response) else {
        return Reply::new(StatusCode::UNAUTHORIZED, "malformed signature");
    };
    let trusted = state
        .trusted
        .iter()
        .any(|key| key.verify(&challenge, &signature).is_ok());
    if !trusted {
        return Reply::new(StatusCode::UNAUTHORIZED, "signature does not match a trusted key");
    }

    let mut session = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut session);
    let mut reply = Reply::empty();
    if let Ok(cookie) = HeaderValue::from_str(&format!(
        "{SESSION_COOKIE}={}; Path=/; HttpOnly",
        hex::encode(session)
    )) {
        reply.headers.insert(SET_COOKIE, cookie);
    }
    reply
}
