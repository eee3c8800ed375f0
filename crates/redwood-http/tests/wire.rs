//! The reqwest and websocket capabilities against a local socket server.
//!
//! Each test scripts one reply per accepted connection and inspects the raw
//! HTTP/1.1 requests that reached the listener.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use redwood_core::{Keypair, Tx, TxId};
use redwood_http::{Document, HttpTransport, SubscriptionRequest, TransportConfig, TransportError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use url::Url;

const STATE_URI: &str = "example.com/wire";

#[derive(Debug, Clone)]
struct WireRequest {
    method: String,
    target: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl WireRequest {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

struct WireReply {
    status: u16,
    headers: Vec<(&'static str, &'static str)>,
    body: &'static [u8],
}

impl WireReply {
    fn ok(body: &'static [u8]) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body,
        }
    }

    fn header(mut self, name: &'static str, value: &'static str) -> Self {
        self.headers.push((name, value));
        self
    }
}

type Recorded = Arc<Mutex<Vec<WireRequest>>>;

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn decode_chunked(mut data: &[u8]) -> Option<Vec<u8>> {
    let mut out = Vec::new();
    loop {
        let line_end = find(data, b"\r\n")?;
        let size_text = std::str::from_utf8(&data[..line_end]).ok()?;
        let size = usize::from_str_radix(size_text.split(';').next()?.trim(), 16).ok()?;
        let start = line_end + 2;
        if size == 0 {
            return Some(out);
        }
        if data.len() < start + size + 2 {
            return None;
        }
        out.extend_from_slice(&data[start..start + size]);
        data = &data[start + size + 2..];
    }
}

async fn read_request(stream: &mut TcpStream) -> std::io::Result<WireRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(head_end) = find(&buf, b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
            let mut lines = head.split("\r\n");
            let mut request_line = lines.next().unwrap_or_default().split(' ');
            let method = request_line.next().unwrap_or_default().to_string();
            let target = request_line.next().unwrap_or_default().to_string();
            let headers: Vec<(String, String)> = lines
                .filter_map(|line| line.split_once(':'))
                .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
                .collect();

            let rest = &buf[head_end + 4..];
            let length = headers
                .iter()
                .find(|(k, _)| k == "content-length")
                .and_then(|(_, v)| v.parse::<usize>().ok());
            let chunked = headers
                .iter()
                .any(|(k, v)| k == "transfer-encoding" && v.contains("chunked"));

            let body = match length {
                Some(len) if rest.len() >= len => Some(rest[..len].to_vec()),
                Some(_) => None,
                None if chunked => decode_chunked(rest),
                None => Some(Vec::new()),
            };
            if let Some(body) = body {
                return Ok(WireRequest {
                    method,
                    target,
                    headers,
                    body,
                });
            }
        }

        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

async fn write_reply(stream: &mut TcpStream, reply: WireReply) -> std::io::Result<()> {
    let mut out = format!("HTTP/1.1 {} Scripted\r\n", reply.status).into_bytes();
    for (name, value) in &reply.headers {
        out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    out.extend_from_slice(
        format!("content-length: {}\r\nconnection: close\r\n\r\n", reply.body.len()).as_bytes(),
    );
    out.extend_from_slice(reply.body);
    stream.write_all(&out).await?;
    stream.shutdown().await
}

async fn handle_http(mut stream: TcpStream, reply: WireReply, recorded: Recorded) {
    if let Ok(request) = read_request(&mut stream).await {
        recorded.lock().push(request);
        let _ = write_reply(&mut stream, reply).await;
    }
}

/// Answer one connection per scripted reply, in order.
async fn serve(replies: Vec<WireReply>) -> (Url, Recorded) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = Url::parse(&format!("http://{}", listener.local_addr().unwrap())).unwrap();
    let recorded: Recorded = Arc::new(Mutex::new(Vec::new()));

    let sink = Arc::clone(&recorded);
    tokio::spawn(async move {
        for reply in replies {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            handle_http(stream, reply, Arc::clone(&sink)).await;
        }
    });
    (url, recorded)
}

fn config(url: Url) -> TransportConfig {
    TransportConfig::new(url).with_heartbeat_interval(None)
}

async fn wait_for(recorded: &Recorded, count: usize) -> Vec<WireRequest> {
    for _ in 0..100 {
        if recorded.lock().len() >= count {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    recorded.lock().clone()
}

#[tokio::test]
async fn test_headless_requests_on_the_wire() {
    let (url, recorded) = serve(vec![
        WireReply::ok(br#"{"a": 1}"#)
            .header("content-type", "application/json")
            .header("set-cookie", "session=abc; Path=/; HttpOnly")
            .header("alt-svc", r#"http="peer-x:1""#),
        WireReply::ok(b""),
        WireReply::ok(b""),
        WireReply::ok(br#"{"sha1": "s1", "sha3": "s3"}"#),
    ])
    .await;
    let transport = HttpTransport::headless(config(url)).unwrap();

    let doc = transport.get(STATE_URI, "notes", false).await.unwrap();
    assert_eq!(doc, Document::Json(serde_json::json!({"a": 1})));
    assert!(transport.known_peers().contains("http", "peer-x:1"));

    let tx = Tx::new(STATE_URI, vec![TxId::from("p1")], vec![".a = 1".into(), ".b = 2".into()])
        .with_attachment(b"attached bytes".to_vec())
        .sign(&Keypair::generate());
    transport.put(&tx).await.unwrap();
    transport.ack(&tx.id).await.unwrap();
    let descriptor = transport.store_ref(&b"blob bytes"[..]).await.unwrap();
    assert_eq!(descriptor.sha1, "s1");

    let seen = recorded.lock().clone();
    assert_eq!(seen.len(), 4);

    let get = &seen[0];
    assert_eq!(get.method, "GET");
    assert_eq!(get.target, "/notes");
    assert_eq!(get.header("state-uri"), Some(STATE_URI));
    assert_eq!(get.header("cookie"), None);

    let put = &seen[1];
    assert_eq!(put.method, "PUT");
    assert_eq!(put.header("cookie"), Some("session=abc"));
    assert_eq!(put.header("alt-svc"), Some(r#"http="peer-x:1""#));
    assert_eq!(put.header("version"), Some(tx.id.as_str()));
    assert_eq!(put.header("parents"), Some("p1"));
    assert_eq!(put.header("signature"), Some(tx.sig.as_str()));
    assert!(put
        .header("content-type")
        .unwrap()
        .starts_with("multipart/form-data; boundary="));
    let body = put.body_text();
    assert!(body.contains(r#"name="attachment"; filename="attachment""#));
    assert!(body.contains("attached bytes"));
    assert!(body.contains(r#"name="patches""#));
    assert!(body.contains(".a = 1\n.b = 2"));

    let ack = &seen[2];
    assert_eq!(ack.method, "ACK");
    assert_eq!(ack.body_text(), tx.id.as_str());
    assert_eq!(ack.header("cookie"), Some("session=abc"));

    let upload = &seen[3];
    assert_eq!(upload.method, "POST");
    assert_eq!(upload.header("ref"), Some("true"));
    assert!(upload.body_text().contains(r#"name="ref"; filename="blob""#));
}

#[tokio::test]
async fn test_error_reply_keeps_body_and_skips_cookie() {
    let (url, recorded) = serve(vec![
        WireReply {
            status: 500,
            headers: vec![("set-cookie", "session=bad; Path=/")],
            body: b"\xff\xfeok",
        },
        WireReply::ok(b""),
    ])
    .await;
    let transport = HttpTransport::headless(config(url)).unwrap();

    let err = transport.ack(&TxId::from("t")).await.unwrap_err();
    match err {
        TransportError::Remote { status, body } => {
            assert_eq!(status, 500);
            assert!(body.ends_with("ok"), "body was {body:?}");
        }
        other => panic!("expected remote error, got {other:?}"),
    }

    transport.ack(&TxId::from("t")).await.unwrap();
    assert_eq!(recorded.lock()[1].header("cookie"), None);
}

/// Handshake details captured by the socket server.
#[derive(Debug, Default, Clone)]
struct Upgrade {
    target: String,
    cookie: Option<String>,
}

/// Serve a cookie-setting GET, then a websocket that pushes two updates,
/// then plain replies for the acks that follow.
async fn serve_socket() -> (Url, Recorded, Arc<Mutex<Option<Upgrade>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = Url::parse(&format!("http://{}", listener.local_addr().unwrap())).unwrap();
    let recorded: Recorded = Arc::new(Mutex::new(Vec::new()));
    let upgrade = Arc::new(Mutex::new(None));

    let sink = Arc::clone(&recorded);
    let seen_upgrade = Arc::clone(&upgrade);
    tokio::spawn(async move {
        let mut index = 0;
        while let Ok((stream, _)) = listener.accept().await {
            index += 1;
            if index == 2 {
                let seen_upgrade = Arc::clone(&seen_upgrade);
                tokio::spawn(async move {
                    let callback = move |req: &Request,
                                         resp: Response|
                          -> Result<Response, ErrorResponse> {
                        *seen_upgrade.lock() = Some(Upgrade {
                            target: req.uri().to_string(),
                            cookie: req
                                .headers()
                                .get("cookie")
                                .and_then(|v| v.to_str().ok())
                                .map(str::to_string),
                        });
                        Ok(resp)
                    };
                    let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await
                    else {
                        return;
                    };
                    let payload = "{\"tx\": {\"id\": \"t1\", \"stateURI\": \"example.com/wire\"}}\n{\"leaves\": [\"t1\"]}";
                    if ws.send(Message::Text(payload.into())).await.is_err() {
                        return;
                    }
                    while ws.next().await.is_some() {}
                });
                continue;
            }
            let reply = if index == 1 {
                WireReply::ok(b"{}")
                    .header("content-type", "application/json")
                    .header("set-cookie", "session=abc; Path=/")
            } else {
                WireReply::ok(b"")
            };
            tokio::spawn(handle_http(stream, reply, Arc::clone(&sink)));
        }
    });
    (url, recorded, upgrade)
}

async fn assert_socket_subscription_carries_session(
    transport: HttpTransport,
    recorded: Recorded,
    upgrade: Arc<Mutex<Option<Upgrade>>>,
) {
    transport.get(STATE_URI, "/", false).await.unwrap();

    let mut sub = transport
        .subscribe(SubscriptionRequest::new(STATE_URI).keypath("/chat").txs().over_socket())
        .await
        .unwrap();

    let first = tokio::time::timeout(Duration::from_secs(5), sub.recv())
        .await
        .expect("timed out waiting for update")
        .expect("subscription ended")
        .expect("subscription errored");
    assert_eq!(first.tx_id(), Some(&TxId::from("t1")));
    let second = tokio::time::timeout(Duration::from_secs(5), sub.recv())
        .await
        .expect("timed out waiting for update")
        .expect("subscription ended")
        .expect("subscription errored");
    assert_eq!(second.leaves, Some(vec![TxId::from("t1")]));

    let handshake = upgrade.lock().clone().expect("upgrade request seen");
    assert!(handshake.target.starts_with("/ws?"));
    assert!(handshake.target.contains("state_uri=example.com%2Fwire"));
    assert!(handshake.target.contains("keypath=%2Fchat"));
    assert!(handshake.target.contains("subscription_type=transactions"));
    assert_eq!(handshake.cookie.as_deref(), Some("session=abc"));

    let seen = wait_for(&recorded, 2).await;
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[1].method, "ACK");
    assert_eq!(seen[1].body_text(), "t1");
}

#[tokio::test]
async fn test_headless_socket_upgrade_carries_session_cookie() {
    let (url, recorded, upgrade) = serve_socket().await;
    let transport = HttpTransport::headless(config(url)).unwrap();
    assert_socket_subscription_carries_session(transport, recorded, upgrade).await;
}

#[tokio::test]
async fn test_hosted_socket_upgrade_carries_native_cookie() {
    let (url, recorded, upgrade) = serve_socket().await;
    let transport = HttpTransport::hosted(config(url)).unwrap();
    assert_socket_subscription_carries_session(transport, recorded, upgrade).await;
}
