//! Transport pair tests against an in-process mock agent.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::timeout;

use common::{frame, MockAgent, Push};
use xds_cli::registry::EventRegistry;
use xds_cli::transport::{self, events, EventChannel, HttpChannel, Method, RequestChannel, TransportError};
use xds_proto::events::{EVT_EXEC_OUTPUT, EVT_PROJECT_CHANGE, SYS_DISCONNECTION, SYS_ERROR};
use xds_proto::EventEnvelope;

const WAIT: Duration = Duration::from_secs(5);

/// Forwards every envelope of `event_type` into a channel.
fn collect(
    registry: &Arc<EventRegistry>,
    event_type: &str,
) -> (xds_cli::registry::Subscription, mpsc::UnboundedReceiver<EventEnvelope>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let sub = registry.subscribe(event_type, move |env| {
        let _ = tx.send(env.clone());
    });
    (sub, rx)
}

// ============================================================================
// Request channel
// ============================================================================

#[tokio::test]
async fn handshake_reads_session_id() {
    let agent = MockAgent::builder().start().await;

    let channel = HttpChannel::connect(&agent.url()).await.unwrap();

    assert_eq!(channel.sid(), "sid-1");
    assert_eq!(channel.base(), format!("{}/api/v1", agent.url()));
    assert_eq!(channel.greeting()["client"]["id"], "agent-1");
}

#[tokio::test]
async fn session_id_is_sent_on_later_requests() {
    let agent = MockAgent::builder().start().await;
    let channel = HttpChannel::connect(&agent.url()).await.unwrap();

    let _: Value = transport::get(&channel, "/config").await.unwrap();

    let requests = agent.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].key, "GET /api/v1/config");
    assert!(requests[1].headers.contains("xds-agent-sid: sid-1"));
}

#[tokio::test]
async fn missing_session_header_rejects_handshake() {
    let agent = MockAgent::builder().without_sid().start().await;

    let err = HttpChannel::connect(&agent.url()).await.unwrap_err();

    assert!(matches!(err, TransportError::Handshake(_)));
}

#[tokio::test]
async fn error_status_carries_agent_message() {
    let agent = MockAgent::builder()
        .route(
            "GET /api/v1/projects/nope",
            404,
            json!({"error": "project not found"}),
        )
        .start()
        .await;
    let channel = HttpChannel::connect(&agent.url()).await.unwrap();

    let err = channel
        .call(Method::Get, "/projects/nope", None)
        .await
        .unwrap_err();

    match err {
        TransportError::Status { status, message } => {
            assert_eq!(status, 404);
            assert!(message.contains("project not found"));
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn post_sends_json_body() {
    let agent = MockAgent::builder()
        .route("POST /api/v1/events/register", 200, Value::Null)
        .start()
        .await;
    let channel = HttpChannel::connect(&agent.url()).await.unwrap();

    let reply: Value = transport::post(
        &channel,
        "/events/register",
        &xds_proto::EventRegisterArgs::new(EVT_EXEC_OUTPUT),
    )
    .await
    .unwrap();

    assert_eq!(reply, json!({}));
    let body: Value = serde_json::from_str(&agent.requests()[1].body).unwrap();
    assert_eq!(body, json!({"name": "exec:output"}));
}

// ============================================================================
// Event channel
// ============================================================================

#[tokio::test]
async fn events_are_dispatched_in_order_with_session_header() {
    let agent = MockAgent::builder().start().await;
    let registry = EventRegistry::new();
    let (_sub, mut rx) = collect(&registry, EVT_EXEC_OUTPUT);

    let url = events::event_url(&agent.url()).unwrap();
    let channel = EventChannel::connect(&url, "sid-1", Arc::clone(&registry))
        .await
        .unwrap();
    for i in 0..3 {
        agent.push(frame(EVT_EXEC_OUTPUT, json!({"stdout": format!("line {i}\n")})));
    }

    for i in 0..3 {
        let env = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
        assert_eq!(env.data["stdout"], format!("line {i}\n"));
    }
    assert_eq!(agent.ws_sid().as_deref(), Some("sid-1"));
    assert_eq!(
        agent.ws_uri().as_deref(),
        Some("/socket.io/?EIO=3&transport=websocket")
    );
    channel.close().await;
}

#[tokio::test]
async fn wrapped_notice_keeps_agent_time() {
    let agent = MockAgent::builder().start().await;
    let registry = EventRegistry::new();
    let (_sub, mut rx) = collect(&registry, EVT_PROJECT_CHANGE);

    let url = events::event_url(&agent.url()).unwrap();
    let channel = EventChannel::connect(&url, "sid-1", Arc::clone(&registry))
        .await
        .unwrap();
    agent.push(frame(
        EVT_PROJECT_CHANGE,
        json!({"type": EVT_PROJECT_CHANGE, "time": "t0", "data": {"id": "prj-1"}}),
    ));

    let env = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(env.time, "t0");
    assert_eq!(env.data["id"], "prj-1");
    channel.close().await;
}

#[tokio::test]
async fn agent_ping_is_answered() {
    let agent = MockAgent::builder().start().await;
    let url = events::event_url(&agent.url()).unwrap();
    let channel = EventChannel::connect(&url, "sid-1", EventRegistry::new())
        .await
        .unwrap();

    agent.push(Push::Frame("2probe".into()));

    timeout(WAIT, async {
        while !agent.ws_received().iter().any(|f| f == "3probe") {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    channel.close().await;
}

#[tokio::test]
async fn agent_socket_error_raises_error_event() {
    let agent = MockAgent::builder().start().await;
    let registry = EventRegistry::new();
    let (_sub, mut rx) = collect(&registry, SYS_ERROR);

    let url = events::event_url(&agent.url()).unwrap();
    let channel = EventChannel::connect(&url, "sid-1", Arc::clone(&registry))
        .await
        .unwrap();
    agent.push(Push::Frame(r#"44"Invalid namespace""#.into()));

    let env = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(env.data["message"], "Invalid namespace");
    channel.close().await;
}

#[tokio::test]
async fn malformed_frame_raises_error_event() {
    let agent = MockAgent::builder().start().await;
    let registry = EventRegistry::new();
    let (_sub, mut rx) = collect(&registry, SYS_ERROR);

    let url = events::event_url(&agent.url()).unwrap();
    let channel = EventChannel::connect(&url, "sid-1", Arc::clone(&registry))
        .await
        .unwrap();
    agent.push(Push::Frame("not json".into()));

    let env = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(env.event_type, SYS_ERROR);
    assert!(!channel.is_finished());
    channel.close().await;
}

#[tokio::test]
async fn agent_close_raises_disconnection() {
    let agent = MockAgent::builder().start().await;
    let registry = EventRegistry::new();
    let (_sub, mut rx) = collect(&registry, SYS_DISCONNECTION);

    let url = events::event_url(&agent.url()).unwrap();
    let channel = EventChannel::connect(&url, "sid-1", Arc::clone(&registry))
        .await
        .unwrap();
    agent.push(Push::Close);

    let env = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(env.event_type, SYS_DISCONNECTION);
    assert!(env.data["cause"].as_str().is_some_and(|c| !c.is_empty()));
    channel.close().await;
}

#[tokio::test]
async fn namespace_disconnect_raises_disconnection() {
    let agent = MockAgent::builder().start().await;
    let registry = EventRegistry::new();
    let (_sub, mut rx) = collect(&registry, SYS_DISCONNECTION);

    let url = events::event_url(&agent.url()).unwrap();
    let channel = EventChannel::connect(&url, "sid-1", Arc::clone(&registry))
        .await
        .unwrap();
    agent.push(Push::Frame("41".into()));

    let env = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert!(env.data["cause"].as_str().is_some_and(|c| c.contains("closed by agent")));
    assert!(timeout(WAIT, async {
        while !channel.is_finished() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok());
    channel.close().await;
}

#[tokio::test]
async fn local_close_raises_no_disconnection() {
    let agent = MockAgent::builder().start().await;
    let registry = EventRegistry::new();
    let (_sub, mut rx) = collect(&registry, SYS_DISCONNECTION);

    let url = events::event_url(&agent.url()).unwrap();
    let channel = EventChannel::connect(&url, "sid-1", Arc::clone(&registry))
        .await
        .unwrap();
    channel.close().await;

    assert!(timeout(Duration::from_millis(200), rx.recv()).await.is_err());
}
