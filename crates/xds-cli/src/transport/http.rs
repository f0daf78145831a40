//! HTTP request channel.
//!
//! The agent hands out a session id in the `Xds-Agent-Sid` header of the
//! first `GET /version`. That id is replayed on every later request and on
//! the event channel handshake. The handshake body is kept so the version
//! need not be fetched twice.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Client, ClientBuilder, StatusCode};
use serde_json::Value;
use tracing::{debug, trace};
use url::{Host, Url};

use super::{Method, RequestChannel, TransportError, API_PREFIX, SESSION_HEADER};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Request/response channel to the agent REST API.
#[derive(Debug, Clone)]
pub struct HttpChannel {
    client: Client,
    base: String,
    sid: String,
    greeting: Value,
}

impl HttpChannel {
    /// Opens a session on the agent at `agent_url` (e.g. `http://localhost:8800`).
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`] if the agent is unreachable and
    /// [`TransportError::Handshake`] if it does not return a session id.
    pub async fn connect(agent_url: &str) -> Result<Self, TransportError> {
        let base = format!("{}{API_PREFIX}", agent_url.trim_end_matches('/'));
        debug!(url = %base, "connecting HTTP client");

        let probe = client_builder(&base)
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let resp = probe
            .get(format!("{base}/version"))
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| TransportError::Connect {
                url: agent_url.to_string(),
                message: e.to_string(),
            })?;

        if !resp.status().is_success() {
            return Err(TransportError::Handshake(format!(
                "agent answered {}",
                resp.status()
            )));
        }

        let sid = resp
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| TransportError::Handshake("no session id in response".into()))?
            .to_string();
        let greeting = resp.json::<Value>().await.unwrap_or_else(|e| {
            debug!(error = %e, "handshake body is not JSON");
            Value::Null
        });

        let mut channel = Self::with_session(&base, sid)?;
        channel.greeting = greeting;
        Ok(channel)
    }

    /// Builds a channel on an already known session.
    ///
    /// `base` must include the API prefix.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Handshake`] if `sid` is not a valid header value.
    pub fn with_session(base: &str, sid: String) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            SESSION_HEADER,
            HeaderValue::from_str(&sid).map_err(|e| TransportError::Handshake(e.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let client = client_builder(base)
            .default_headers(headers)
            .build()
            .map_err(|e| TransportError::Request(e.to_string()))?;

        Ok(Self {
            client,
            base: base.to_string(),
            sid,
            greeting: Value::Null,
        })
    }

    /// Session id handed out by the agent.
    #[must_use]
    pub fn sid(&self) -> &str {
        &self.sid
    }

    /// Body of the handshake `GET /version`, `Null` when none was read.
    #[must_use]
    pub const fn greeting(&self) -> &Value {
        &self.greeting
    }

    /// Base URL including the API prefix.
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    fn method(method: Method) -> reqwest::Method {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

impl RequestChannel for HttpChannel {
    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, TransportError> {
        debug!(%method, path, "agent request");

        let mut req = self
            .client
            .request(Self::method(method), format!("{}{path}", self.base));
        if let Some(body) = &body {
            req = req.json(body);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;
        trace!(%method, path, status = status.as_u16(), body = %text, "agent response");

        if !status.is_success() {
            return Err(status_error(status, &text));
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

/// Loopback agents are never reached through a proxy.
fn client_builder(base: &str) -> ClientBuilder {
    let builder = Client::builder().connect_timeout(CONNECT_TIMEOUT);
    if is_loopback(base) {
        builder.no_proxy()
    } else {
        builder
    }
}

fn is_loopback(base: &str) -> bool {
    match Url::parse(base).ok().as_ref().and_then(Url::host) {
        Some(Host::Domain(name)) => name.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}

fn status_error(status: StatusCode, body: &str) -> TransportError {
    let body = body.trim();
    let message = if body.is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        // The agent wraps errors as {"error": "..."}; fall back to the raw body.
        serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| body.to_string())
    };
    TransportError::Status {
        status: status.as_u16(),
        message,
    }
}
