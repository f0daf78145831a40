//! Mock XDS agent shared by the integration tests.
//!
//! Serves the REST API and the Socket.IO endpoint on one port, like the real
//! agent. Frames queued with [`MockAgent::push`] (or attached to a request
//! path with [`MockAgentBuilder::on`]) are sent on the open event channel.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use xds_proto::socketio::event_frame;

// ============================================================================
// Event actions
// ============================================================================

/// What the mock agent does on the event channel.
#[derive(Debug, Clone)]
pub enum Push {
    /// Send one text frame.
    Frame(String),
    /// Close the connection.
    Close,
}

/// Socket.IO event frame, as the agent emits it.
pub fn frame(event_type: &str, data: Value) -> Push {
    Push::Frame(event_frame(event_type, data))
}

/// Engine.IO `open` packet sent right after the WebSocket upgrade.
const OPEN_PACKET: &str =
    r#"0{"sid":"eio-1","upgrades":[],"pingInterval":25000,"pingTimeout":60000}"#;

// ============================================================================
// Mock agent
// ============================================================================

/// Canned HTTP answer.
#[derive(Debug, Clone)]
struct Route {
    status: u16,
    body: String,
    pushes: Vec<Push>,
}

/// Builder for [`MockAgent`].
pub struct MockAgentBuilder {
    sid: Option<String>,
    routes: HashMap<String, Route>,
}

impl MockAgentBuilder {
    /// Answers `"{METHOD} {path}"` with `status` and `body`.
    pub fn route(mut self, key: &str, status: u16, body: Value) -> Self {
        let body = if body.is_null() {
            String::new()
        } else {
            body.to_string()
        };
        self.routes.insert(
            key.to_string(),
            Route {
                status,
                body,
                pushes: Vec::new(),
            },
        );
        self
    }

    /// Pushes `pushes` on the event channel when `key` is requested, before answering.
    pub fn on(mut self, key: &str, pushes: Vec<Push>) -> Self {
        if let Some(route) = self.routes.get_mut(key) {
            route.pushes = pushes;
        }
        self
    }

    /// Omits the session header from the handshake.
    pub fn without_sid(mut self) -> Self {
        self.sid = None;
        self
    }

    /// Starts serving on an ephemeral local port.
    pub async fn start(self) -> MockAgent {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let state = Arc::new(State {
            sid: self.sid,
            routes: self.routes,
            requests: Mutex::new(Vec::new()),
            ws_sid: Mutex::new(None),
            ws_uri: Mutex::new(None),
            ws_received: Mutex::new(Vec::new()),
            push_tx,
            push_rx: Mutex::new(Some(push_rx)),
        });

        let server_state = Arc::clone(&state);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(handle(stream, Arc::clone(&server_state)));
            }
        });

        MockAgent { addr, state }
    }
}

struct State {
    sid: Option<String>,
    routes: HashMap<String, Route>,
    requests: Mutex<Vec<RecordedRequest>>,
    ws_sid: Mutex<Option<String>>,
    ws_uri: Mutex<Option<String>>,
    ws_received: Mutex<Vec<String>>,
    push_tx: mpsc::UnboundedSender<Push>,
    push_rx: Mutex<Option<mpsc::UnboundedReceiver<Push>>>,
}

/// One request received on the REST side.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// `"{METHOD} {path}"`
    pub key: String,
    /// Lower-cased header block.
    pub headers: String,
    /// Request body.
    pub body: String,
}

/// Running mock agent.
pub struct MockAgent {
    addr: SocketAddr,
    state: Arc<State>,
}

impl MockAgent {
    /// Agent answering version and config, with session id `sid-1`.
    pub fn builder() -> MockAgentBuilder {
        MockAgentBuilder {
            sid: Some("sid-1".into()),
            routes: HashMap::new(),
        }
        .route(
            "GET /api/v1/version",
            200,
            json!({
                "client": {"id": "agent-1", "version": "1.1.0", "apiVersion": "1"},
                "servers": [{"id": "srv-1", "version": "1.1.0"}]
            }),
        )
        .route(
            "GET /api/v1/config",
            200,
            json!({"servers": [{"id": "srv-1", "url": "http://srv:8000", "connected": true}]}),
        )
    }

    /// Agent URL, without API prefix.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Queues an event channel action.
    pub fn push(&self, push: Push) {
        let _ = self.state.push_tx.send(push);
    }

    /// Requests received so far, in order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().clone()
    }

    /// Request keys received so far, in order.
    pub fn request_keys(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.key).collect()
    }

    /// Session header seen on the event channel handshake.
    pub fn ws_sid(&self) -> Option<String> {
        self.state.ws_sid.lock().clone()
    }

    /// Request URI of the event channel handshake.
    pub fn ws_uri(&self) -> Option<String> {
        self.state.ws_uri.lock().clone()
    }

    /// Text frames sent by the client on the event channel, pongs excluded.
    pub fn ws_received(&self) -> Vec<String> {
        self.state.ws_received.lock().clone()
    }
}

async fn handle(stream: TcpStream, state: Arc<State>) {
    let mut peek = [0u8; 32];
    let n = stream.peek(&mut peek).await.unwrap_or(0);
    if peek[..n].starts_with(b"GET /socket.io/") {
        serve_events(stream, state).await;
    } else {
        serve_http(stream, state).await;
    }
}

async fn serve_events(stream: TcpStream, state: Arc<State>) {
    let seen = Arc::clone(&state);
    let callback = move |req: &Request, resp: Response| {
        let sid = req
            .headers()
            .get("xds-agent-sid")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        *seen.ws_sid.lock() = sid;
        *seen.ws_uri.lock() = Some(req.uri().to_string());
        Ok::<Response, ErrorResponse>(resp)
    };
    let Ok(mut ws) = accept_hdr_async(stream, callback).await else {
        return;
    };
    let Some(mut rx) = state.push_rx.lock().take() else {
        return;
    };
    for packet in [OPEN_PACKET, "40"] {
        if ws.send(Message::Text(packet.into())).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            push = rx.recv() => match push {
                Some(Push::Frame(text)) => {
                    if ws.send(Message::Text(text.into())).await.is_err() {
                        return;
                    }
                }
                Some(Push::Close) | None => {
                    let _ = ws.close(None).await;
                    return;
                }
            },
            incoming = ws.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Some(data) = text.as_str().strip_prefix('2') {
                        let pong = format!("3{data}");
                        if ws.send(Message::Text(pong.into())).await.is_err() {
                            return;
                        }
                    } else {
                        state.ws_received.lock().push(text.as_str().to_string());
                    }
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => {}
            },
        }
    }
}

async fn serve_http(mut stream: TcpStream, state: Arc<State>) {
    let Some(request) = read_request(&mut stream).await else {
        return;
    };
    state.requests.lock().push(request.clone());

    let route = state.routes.get(&request.key).cloned().unwrap_or(Route {
        status: 404,
        body: json!({"error": format!("no route for {}", request.key)}).to_string(),
        pushes: Vec::new(),
    });
    for push in route.pushes {
        let _ = state.push_tx.send(push);
    }

    let sid_header = match (&state.sid, request.key.as_str()) {
        (Some(sid), "GET /api/v1/version") => format!("Xds-Agent-Sid: {sid}\r\n"),
        _ => String::new(),
    };
    let reason = if route.status < 300 { "OK" } else { "Error" };
    let response = format!(
        "HTTP/1.1 {} {reason}\r\nContent-Type: application/json\r\n{sid_header}Content-Length: {}\r\nConnection: close\r\n\r\n{}",
        route.status,
        route.body.len(),
        route.body
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

async fn read_request(stream: &mut TcpStream) -> Option<RecordedRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.lines();
    let mut first = lines.next()?.split_whitespace();
    let key = format!("{} {}", first.next()?, first.next()?);
    let headers = lines.collect::<Vec<_>>().join("\n").to_lowercase();
    let length = headers
        .lines()
        .find_map(|l| l.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < head_end + length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buf[head_end..]).to_string();

    Some(RecordedRequest { key, headers, body })
}

// ============================================================================
// Output capture
// ============================================================================

/// Cloneable in-memory writer.
#[derive(Clone, Default)]
pub struct SharedBuf(pub Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn contents(&self) -> String {
        String::from_utf8(self.0.lock().clone()).unwrap()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
