//! Socket.IO event channel.
//!
//! The agent pushes events over Engine.IO on a WebSocket transport. After the
//! `open` packet, a background task keeps the heartbeat going, turns each
//! Socket.IO event into an [`EventEnvelope`] and dispatches it into the
//! shared [`EventRegistry`]. When the connection drops without a local
//! [`EventChannel::close`], a synthetic `disconnection` envelope is
//! dispatched so that in-flight sessions resolve instead of waiting forever.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};
use url::Url;
use xds_proto::socketio::{
    EnginePacket, OpenHandshake, SocketPacket, ENGINE_IO_VERSION, ROOT_NAMESPACE, SOCKET_IO_PATH,
};
use xds_proto::EventEnvelope;

use super::{TransportError, SESSION_HEADER};
use crate::registry::EventRegistry;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

/// Longest wait for the Engine.IO `open` packet.
const OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Derives the Socket.IO endpoint from the agent URL.
///
/// # Errors
///
/// Returns [`TransportError::Connect`] if `agent_url` is not a valid
/// `http`/`https` URL.
pub fn event_url(agent_url: &str) -> Result<String, TransportError> {
    let invalid = |message: String| TransportError::Connect {
        url: agent_url.to_string(),
        message,
    };

    let mut url = Url::parse(agent_url).map_err(|e| invalid(e.to_string()))?;
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => return Err(invalid(format!("unsupported scheme {other}"))),
    };
    url.set_scheme(scheme)
        .map_err(|()| invalid(format!("cannot switch to {scheme}")))?;
    url.set_path(SOCKET_IO_PATH);
    url.set_query(Some(&format!("EIO={ENGINE_IO_VERSION}&transport=websocket")));
    Ok(url.to_string())
}

/// Push side of the transport pair.
pub struct EventChannel {
    sink: Arc<Mutex<WsSink>>,
    closing: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl std::fmt::Debug for EventChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventChannel")
            .field("closing", &self.closing.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl EventChannel {
    /// Connects to `url` with the session id header, waits for the Engine.IO
    /// handshake and starts dispatching into `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`] if the WebSocket handshake fails
    /// and [`TransportError::Handshake`] if the agent does not open an
    /// Engine.IO session.
    pub async fn connect(
        url: &str,
        sid: &str,
        registry: Arc<EventRegistry>,
    ) -> Result<Self, TransportError> {
        let connect_err = |message: String| TransportError::Connect {
            url: url.to_string(),
            message,
        };

        let mut request = url
            .into_client_request()
            .map_err(|e| connect_err(e.to_string()))?;
        request.headers_mut().insert(
            SESSION_HEADER,
            HeaderValue::from_str(sid).map_err(|e| TransportError::Handshake(e.to_string()))?,
        );

        debug!(url, "connecting IO.socket client");
        let (ws, _response) = connect_async(request)
            .await
            .map_err(|e| connect_err(e.to_string()))?;

        let (sink, mut stream) = ws.split();
        let handshake = time::timeout(OPEN_TIMEOUT, Self::read_open(&mut stream))
            .await
            .map_err(|_| TransportError::Handshake("no engine.io open packet".into()))??;
        debug!(
            engine_sid = %handshake.sid,
            ping_interval_ms = handshake.ping_interval,
            ping_timeout_ms = handshake.ping_timeout,
            "IO.socket session opened"
        );

        let sink = Arc::new(Mutex::new(sink));
        let closing = Arc::new(AtomicBool::new(false));
        let reader = tokio::spawn(Self::reader_task(
            stream,
            Arc::clone(&sink),
            registry,
            Arc::clone(&closing),
            handshake,
        ));

        Ok(Self {
            sink,
            closing,
            reader,
        })
    }

    async fn read_open(stream: &mut SplitStream<WsStream>) -> Result<OpenHandshake, TransportError> {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    return match EnginePacket::parse(text.as_str()) {
                        Ok(EnginePacket::Open(handshake)) => Ok(handshake),
                        Ok(other) => Err(TransportError::Handshake(format!(
                            "expected open packet, got {other:?}"
                        ))),
                        Err(e) => Err(TransportError::Handshake(e.to_string())),
                    };
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Err(TransportError::Handshake(
                        "closed before engine.io open".into(),
                    ));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(TransportError::Request(e.to_string())),
            }
        }
    }

    async fn reader_task(
        mut stream: SplitStream<WsStream>,
        sink: Arc<Mutex<WsSink>>,
        registry: Arc<EventRegistry>,
        closing: Arc<AtomicBool>,
        handshake: OpenHandshake,
    ) {
        let every = Duration::from_millis(handshake.ping_interval.max(1));
        let silence = every + Duration::from_millis(handshake.ping_timeout);
        let mut heartbeat = time::interval_at(Instant::now() + every, every);
        let mut last_seen = Instant::now();

        let cause = loop {
            tokio::select! {
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        last_seen = Instant::now();
                        if let Some(cause) = Self::on_frame(text.as_str(), &sink, &registry).await {
                            break cause;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break frame
                            .map(|f| f.reason.as_str().to_string())
                            .filter(|r| !r.is_empty())
                            .unwrap_or_else(|| "connection closed by agent".to_string());
                    }
                    Some(Ok(_)) => last_seen = Instant::now(),
                    Some(Err(e)) => break e.to_string(),
                    None => break "connection closed".to_string(),
                },
                _ = heartbeat.tick() => {
                    if last_seen.elapsed() > silence {
                        break "heartbeat timeout".to_string();
                    }
                    if let Err(e) = send(&sink, &EnginePacket::Ping(String::new())).await {
                        break e.to_string();
                    }
                }
            }
        };

        if closing.load(Ordering::SeqCst) {
            debug!("event channel closed");
        } else {
            debug!(%cause, "event channel lost");
            registry.dispatch(&EventEnvelope::disconnection(cause));
        }
    }

    /// Handles one Engine.IO frame. Returns the cause when the session ends.
    async fn on_frame(
        text: &str,
        sink: &Mutex<WsSink>,
        registry: &EventRegistry,
    ) -> Option<String> {
        let packet = match EnginePacket::parse(text) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(error = %e, "malformed event frame");
                registry.dispatch(&EventEnvelope::error(format!("parse error: {e}")));
                return None;
            }
        };

        match packet {
            EnginePacket::Message(SocketPacket::Connect(namespace)) => {
                debug!(%namespace, "namespace connected");
            }
            EnginePacket::Message(SocketPacket::Disconnect(namespace)) => {
                return Some(format!("namespace {namespace} closed by agent"));
            }
            EnginePacket::Message(SocketPacket::Error(message)) => {
                warn!(%message, "agent reported a socket error");
                registry.dispatch(&EventEnvelope::error(message));
            }
            EnginePacket::Message(event @ SocketPacket::Event { .. }) => {
                if let Some(envelope) = event.into_envelope() {
                    trace!(event_type = %envelope.event_type, "event received");
                    registry.dispatch(&envelope);
                }
            }
            EnginePacket::Message(SocketPacket::Ack(_) | SocketPacket::Binary) => {
                trace!("ignoring ack/binary packet");
            }
            EnginePacket::Ping(data) => {
                if let Err(e) = send(sink, &EnginePacket::Pong(data)).await {
                    return Some(e.to_string());
                }
            }
            EnginePacket::Pong(_) => trace!("heartbeat"),
            EnginePacket::Close => return Some("session closed by agent".into()),
            EnginePacket::Open(_) | EnginePacket::Upgrade | EnginePacket::Noop => {}
        }
        None
    }

    /// Whether the reader task has stopped.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.reader.is_finished()
    }

    /// Leaves the namespace and closes the channel without raising a
    /// disconnection notice.
    ///
    /// Best-effort: errors while sending are ignored.
    pub async fn close(self) {
        self.closing.store(true, Ordering::SeqCst);
        let leave = EnginePacket::Message(SocketPacket::Disconnect(ROOT_NAMESPACE.into()));
        if let Err(e) = send(&self.sink, &leave).await {
            debug!(error = %e, "namespace leave");
        }
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.close().await {
            debug!(error = %e, "event channel close");
        }
        drop(sink);
        self.reader.abort();
    }
}

async fn send(sink: &Mutex<WsSink>, packet: &EnginePacket) -> Result<(), tungstenite::Error> {
    sink.lock()
        .await
        .send(Message::Text(packet.encode().into()))
        .await
}
