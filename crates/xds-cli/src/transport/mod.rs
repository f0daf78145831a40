//! Transport pair to the agent.
//!
//! - [`http::HttpChannel`]: request/response calls under `/api/v1`.
//! - [`events::EventChannel`]: Socket.IO push events, dispatched into an
//!   [`EventRegistry`](crate::registry::EventRegistry).
//!
//! Sessions and commands only see the [`RequestChannel`] trait so they can
//! run against a fake in tests.

pub mod events;
pub mod http;

use std::fmt;
use std::future::Future;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub use events::EventChannel;
pub use http::HttpChannel;

/// Header carrying the agent session id.
pub const SESSION_HEADER: &str = "xds-agent-sid";

/// REST prefix on the agent.
pub const API_PREFIX: &str = "/api/v1";

/// Transport-level failures.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The endpoint could not be reached.
    #[error("cannot connect to {url}: {message}")]
    Connect {
        /// Target URL.
        url: String,
        /// Underlying error.
        message: String,
    },

    /// The endpoint answered but refused the session.
    #[error("handshake rejected: {0}")]
    Handshake(String),

    /// A request could not be sent or its response not read.
    #[error("request failed: {0}")]
    Request(String),

    /// The agent answered with a non-success status.
    #[error("{message} (HTTP {status})")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body.
        message: String,
    },

    /// The response body could not be decoded.
    #[error("invalid response: {0}")]
    Decode(String),
}

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `DELETE`
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        })
    }
}

/// Request/response side of the transport pair.
pub trait RequestChannel: Send + Sync {
    /// Issues one call. `path` is relative to the API prefix.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the call fails or the agent answers
    /// with a non-success status.
    fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> impl Future<Output = Result<Value, TransportError>> + Send;
}

/// Typed `GET`.
///
/// # Errors
///
/// Returns a [`TransportError`] if the call fails or the body does not decode.
pub async fn get<C, T>(channel: &C, path: &str) -> Result<T, TransportError>
where
    C: RequestChannel,
    T: DeserializeOwned,
{
    decode(channel.call(Method::Get, path, None).await?)
}

/// Typed `POST`.
///
/// # Errors
///
/// Returns a [`TransportError`] if the call fails or a body does not convert.
pub async fn post<C, B, T>(channel: &C, path: &str, body: &B) -> Result<T, TransportError>
where
    C: RequestChannel,
    B: Serialize + ?Sized,
    T: DeserializeOwned,
{
    let body = serde_json::to_value(body).map_err(|e| TransportError::Request(e.to_string()))?;
    decode(channel.call(Method::Post, path, Some(body)).await?)
}

/// Typed `DELETE`.
///
/// # Errors
///
/// Returns a [`TransportError`] if the call fails or the body does not decode.
pub async fn delete<C, T>(channel: &C, path: &str) -> Result<T, TransportError>
where
    C: RequestChannel,
    T: DeserializeOwned,
{
    decode(channel.call(Method::Delete, path, None).await?)
}

/// An empty body decodes like `{}`.
fn decode<T: DeserializeOwned>(value: Value) -> Result<T, TransportError> {
    let value = if value.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        value
    };
    serde_json::from_value(value).map_err(|e| TransportError::Decode(e.to_string()))
}
