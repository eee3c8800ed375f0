//! The subscription engine.
//!
//! A subscription is a long-lived update channel for one (state URI,
//! keypath, kind). It moves through
//!
//! ```text
//! Opening --> Streaming --> Closed
//!                 |
//!                 +-------> Errored
//! ```
//!
//! and is delivered in one of two framings:
//!
//! - **Streaming-HTTP**: one response body read incrementally, split into
//!   `data:`-prefixed lines by [`FrameDecoder`].
//! - **Socket-upgrade**: a websocket to `/ws` on the same host whose
//!   messages each hold one or more newline-separated JSON payloads.
//!
//! Either way, each subscription owns a dedup set: an update carrying a
//! transaction is acknowledged and handed to the subscriber only the first
//! time its id is seen. Updates without a transaction are always delivered.
//!
//! Updates arrive through [`Subscription`], a `Stream` of
//! `Result<UpdateMessage>`. A decode or connection error is delivered once
//! and ends the stream.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use redwood_core::{
    split_socket_message, FrameDecoder, Keypath, StateUri, SubscriptionKind, TxId, UpdateMessage,
};
use reqwest::header::HeaderMap;
use reqwest::Method;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::capability::{BodyStream, RequestBody, SocketStream};
use crate::error::{Result, TransportError};
use crate::ops;
use crate::request::{set_header, RequestLayer};

/// Path of the socket-upgrade endpoint.
pub const SOCKET_PATH: &str = "/ws";

/// How updates travel from the peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Delivery {
    /// One long-lived chunked response.
    #[default]
    Streaming,
    /// A persistent upgraded socket.
    Socket,
}

/// Parameters for opening a subscription.
#[derive(Debug, Clone)]
pub struct SubscriptionRequest {
    pub state_uri: StateUri,
    pub keypath: Keypath,
    pub txs: bool,
    pub states: bool,
    /// Resume from a known transaction.
    pub from_tx: Option<TxId>,
    pub delivery: Delivery,
}

impl SubscriptionRequest {
    /// A request for `state_uri` at the root, asking for nothing yet.
    pub fn new(state_uri: impl Into<StateUri>) -> Self {
        Self {
            state_uri: state_uri.into(),
            keypath: Keypath::root(),
            txs: false,
            states: false,
            from_tx: None,
            delivery: Delivery::Streaming,
        }
    }

    pub fn keypath(mut self, keypath: impl Into<Keypath>) -> Self {
        self.keypath = keypath.into();
        self
    }

    pub fn txs(mut self) -> Self {
        self.txs = true;
        self
    }

    pub fn states(mut self) -> Self {
        self.states = true;
        self
    }

    pub fn from_tx(mut self, id: impl Into<TxId>) -> Self {
        self.from_tx = Some(id.into());
        self
    }

    pub fn over_socket(mut self) -> Self {
        self.delivery = Delivery::Socket;
        self
    }

    /// The negotiated kind, or `InvalidArgument` if nothing was requested.
    pub fn kind(&self) -> Result<SubscriptionKind> {
        SubscriptionKind::from_flags(self.txs, self.states).ok_or_else(|| {
            TransportError::InvalidArgument(
                "subscription must request transactions, states, or both".into(),
            )
        })
    }
}

/// Lifecycle of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SubscriptionState {
    /// Connection not yet established. `subscribe` only returns once it is,
    /// so a returned [`Subscription`] never reports this state.
    Opening = 0,
    Streaming = 1,
    Closed = 2,
    Errored = 3,
}

impl SubscriptionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Opening,
            1 => Self::Streaming,
            2 => Self::Closed,
            _ => Self::Errored,
        }
    }
}

/// State shared between a subscription handle and its read loop.
#[derive(Debug)]
struct Shared {
    stop: AtomicBool,
    state: AtomicU8,
}

impl Shared {
    fn new() -> Self {
        Self {
            stop: AtomicBool::new(false),
            state: AtomicU8::new(SubscriptionState::Opening as u8),
        }
    }

    fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.finish(SubscriptionState::Closed);
    }

    fn state(&self) -> SubscriptionState {
        SubscriptionState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SubscriptionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Move to a terminal state unless one was already reached.
    fn finish(&self, state: SubscriptionState) {
        let _ = self.state.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
            match SubscriptionState::from_u8(current) {
                SubscriptionState::Closed | SubscriptionState::Errored => None,
                _ => Some(state as u8),
            }
        });
    }
}

/// Fires an acknowledgement for a received transaction.
pub(crate) type AckFn = Arc<dyn Fn(TxId) + Send + Sync>;

/// A live subscription.
///
/// Dropping it cancels the subscription.
pub struct Subscription {
    state_uri: StateUri,
    updates: mpsc::Receiver<Result<UpdateMessage>>,
    shared: Arc<Shared>,
    task: AbortHandle,
}

impl Subscription {
    pub fn state_uri(&self) -> &StateUri {
        &self.state_uri
    }

    pub fn state(&self) -> SubscriptionState {
        self.shared.state()
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.is_stopped()
    }

    /// Wait for the next update. `None` once the subscription has ended.
    pub async fn recv(&mut self) -> Option<Result<UpdateMessage>> {
        StreamExt::next(self).await
    }

    /// Stop the subscription and release its connection.
    ///
    /// Nothing is delivered after this returns, including updates that were
    /// already buffered.
    pub fn cancel(&mut self) {
        self.cancel_handle().cancel();
        self.updates.close();
        while self.updates.try_recv().is_ok() {}
    }

    /// A handle that can cancel this subscription from elsewhere.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            shared: Arc::clone(&self.shared),
            task: self.task.clone(),
        }
    }
}

impl Stream for Subscription {
    type Item = Result<UpdateMessage>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.shared.is_stopped() {
            return Poll::Ready(None);
        }
        this.updates.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel_handle().cancel();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("state_uri", &self.state_uri)
            .field("state", &self.state())
            .finish()
    }
}

/// Cancels a subscription without owning it.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    shared: Arc<Shared>,
    task: AbortHandle,
}

impl CancelHandle {
    pub fn cancel(&self) {
        if !self.shared.is_stopped() {
            tracing::debug!("cancelling subscription");
        }
        self.shared.stop();
        self.task.abort();
    }
}

/// Per-subscription delivery: dedup set, acks, stop checks.
struct Dispatcher {
    seen: HashSet<TxId>,
    sender: mpsc::Sender<Result<UpdateMessage>>,
    shared: Arc<Shared>,
    ack: AckFn,
}

impl Dispatcher {
    /// Deliver one update. Returns false once the subscription should stop.
    async fn deliver(&mut self, update: UpdateMessage) -> bool {
        if self.shared.is_stopped() {
            return false;
        }
        if let Some(id) = update.tx_id() {
            if !self.seen.insert(id.clone()) {
                tracing::trace!(tx = %id, "dropping duplicate transaction");
                return true;
            }
            (self.ack)(id.clone());
        }
        self.send(Ok(update)).await
    }

    /// Deliver a terminal error.
    async fn fail(&self, error: TransportError) {
        tracing::warn!(%error, "subscription failed");
        self.shared.finish(SubscriptionState::Errored);
        self.send(Err(error)).await;
    }

    fn close(&self) {
        self.shared.finish(SubscriptionState::Closed);
    }

    async fn send(&self, item: Result<UpdateMessage>) -> bool {
        if self.shared.is_stopped() {
            return false;
        }
        self.sender.send(item).await.is_ok()
    }
}

/// Spawn a read loop and return its handle.
fn launch<F, Fut>(state_uri: StateUri, capacity: usize, ack: AckFn, run: F) -> Subscription
where
    F: FnOnce(Dispatcher) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let shared = Arc::new(Shared::new());
    let (sender, updates) = mpsc::channel(capacity.max(1));
    let dispatcher = Dispatcher {
        seen: HashSet::new(),
        sender,
        shared: Arc::clone(&shared),
        ack,
    };

    shared.set_state(SubscriptionState::Streaming);
    let task = tokio::spawn(run(dispatcher)).abort_handle();

    Subscription {
        state_uri,
        updates,
        shared,
        task,
    }
}

async fn run_streaming(mut body: BodyStream, mut dispatcher: Dispatcher) {
    let mut decoder = FrameDecoder::new();
    while let Some(chunk) = body.next().await {
        if dispatcher.shared.is_stopped() {
            return;
        }
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => return dispatcher.fail(e).await,
        };
        decoder.push(&chunk);
        while let Some(frame) = decoder.next_frame() {
            match frame {
                Ok(update) => {
                    if !dispatcher.deliver(update).await {
                        return;
                    }
                }
                Err(e) => return dispatcher.fail(e.into()).await,
            }
        }
    }
    if decoder.pending() > 0 {
        tracing::debug!(bytes = decoder.pending(), "stream ended mid-frame");
    }
    dispatcher.close();
}

async fn run_socket(mut socket: SocketStream, mut dispatcher: Dispatcher) {
    while let Some(message) = socket.next().await {
        if dispatcher.shared.is_stopped() {
            return;
        }
        let message = match message {
            Ok(message) => message,
            Err(e) => return dispatcher.fail(e).await,
        };
        for payload in split_socket_message(&message) {
            match payload {
                Ok(update) => {
                    if !dispatcher.deliver(update).await {
                        return;
                    }
                }
                Err(e) => return dispatcher.fail(e.into()).await,
            }
        }
    }
    dispatcher.close();
}

/// Acknowledge each first-seen transaction in the background.
fn background_ack(requests: &Arc<RequestLayer>) -> AckFn {
    let requests = Arc::clone(requests);
    Arc::new(move |id: TxId| {
        let requests = Arc::clone(&requests);
        tokio::spawn(async move {
            if let Err(e) = ops::ack(&requests, &id).await {
                tracing::warn!(tx = %id, error = %e, "ack failed");
            }
        });
    })
}

/// Open a subscription. The connection is established before this returns;
/// reading continues in the background.
pub(crate) async fn open(
    requests: &Arc<RequestLayer>,
    request: SubscriptionRequest,
    capacity: usize,
) -> Result<Subscription> {
    let kind = request.kind()?;
    let ack = background_ack(requests);

    let subscription = match request.delivery {
        Delivery::Streaming => {
            let mut headers = HeaderMap::new();
            set_header(&mut headers, "state-uri", request.state_uri.as_str())?;
            set_header(&mut headers, "accept", "application/json")?;
            set_header(&mut headers, "subscribe", kind.as_header_value())?;
            if let Some(from_tx) = &request.from_tx {
                set_header(&mut headers, "from-tx", from_tx.as_str())?;
            }

            let response = requests
                .execute(Method::GET, request.keypath.as_str(), headers, RequestBody::Empty)
                .await?;
            launch(request.state_uri.clone(), capacity, ack, |dispatcher| {
                run_streaming(response.body, dispatcher)
            })
        }
        Delivery::Socket => {
            let mut query = vec![
                ("state_uri", request.state_uri.as_str()),
                ("keypath", request.keypath.as_str()),
                ("subscription_type", kind.as_header_value()),
            ];
            if let Some(from_tx) = &request.from_tx {
                query.push(("from_tx", from_tx.as_str()));
            }

            let upgrade = requests.socket_request(SOCKET_PATH, &query)?;
            let socket = requests.capability().connect_socket(upgrade).await?;
            launch(request.state_uri.clone(), capacity, ack, |dispatcher| {
                run_socket(socket, dispatcher)
            })
        }
    };

    tracing::debug!(
        state_uri = %request.state_uri,
        keypath = %request.keypath,
        kind = kind.as_header_value(),
        delivery = ?request.delivery,
        "subscribed"
    );
    Ok(subscription)
}
