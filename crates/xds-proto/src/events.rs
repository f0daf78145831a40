//! Push events delivered on the agent's event channel.
//!
//! Every notification is an [`EventEnvelope`] `{type, time, data}`, built
//! from a Socket.IO event by [`crate::socketio`]. The `type` selects how
//! `data` is decoded; [`EventEnvelope::decode`] maps the known
//! types onto [`EventPayload`] and reports unknown types as `None` so that a
//! newer agent never breaks an older client.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{ProjectConfig, ServerConfig};
use crate::ProtoError;

/// Output chunk of a running command.
pub const EVT_EXEC_OUTPUT: &str = "exec:output";
/// Termination of a running command.
pub const EVT_EXEC_EXIT: &str = "exec:exit";
/// Project configuration or state changed.
pub const EVT_PROJECT_CHANGE: &str = "event:project-state-change";
/// SDK installation progress.
pub const EVT_SDK_INSTALL: &str = "event:sdk-install";
/// Server configuration changed.
pub const EVT_SERVER_CONFIG: &str = "event:server-config";

/// Synthetic event raised locally when the event channel drops.
pub const SYS_DISCONNECTION: &str = "disconnection";
/// Synthetic event raised locally when a frame cannot be read.
pub const SYS_ERROR: &str = "error";

/// One typed, timestamped notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventEnvelope {
    /// Event type, one of the `EVT_*` or `SYS_*` names.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Emission time as sent by the agent.
    #[serde(default)]
    pub time: String,
    /// Type-specific payload.
    #[serde(default)]
    pub data: Value,
}

impl EventEnvelope {
    /// Builds an envelope stamped with the current time.
    #[must_use]
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            time: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            data,
        }
    }

    /// Synthetic disconnection notice.
    #[must_use]
    pub fn disconnection(cause: impl Into<String>) -> Self {
        Self::new(
            SYS_DISCONNECTION,
            serde_json::json!({ "cause": cause.into() }),
        )
    }

    /// Synthetic channel error notice.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(SYS_ERROR, serde_json::json!({ "message": message.into() }))
    }

    /// Decodes `data` according to `type`.
    ///
    /// Returns `Ok(None)` for event types this client does not know.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::Decoding`] if a known type carries a malformed payload.
    pub fn decode(&self) -> Result<Option<EventPayload>, ProtoError> {
        let payload = match self.event_type.as_str() {
            EVT_EXEC_OUTPUT => EventPayload::ExecOutput(self.data_as()?),
            EVT_EXEC_EXIT => EventPayload::ExecExit(self.data_as()?),
            EVT_PROJECT_CHANGE => EventPayload::ProjectChange(self.data_as()?),
            EVT_SDK_INSTALL => EventPayload::SdkInstall(self.data_as()?),
            EVT_SERVER_CONFIG => EventPayload::ServerConfig(self.data_as()?),
            SYS_DISCONNECTION => EventPayload::Disconnection(self.data_as()?),
            SYS_ERROR => EventPayload::Error(
                self.data
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            ),
            _ => return Ok(None),
        };
        Ok(Some(payload))
    }

    fn data_as<T: for<'de> Deserialize<'de>>(&self) -> Result<T, ProtoError> {
        T::deserialize(&self.data)
            .map_err(|e| ProtoError::Decoding(format!("{}: {e}", self.event_type)))
    }
}

/// Decoded event payload.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// Command output chunk.
    ExecOutput(ExecOutMsg),
    /// Command termination.
    ExecExit(ExecExitMsg),
    /// Project change.
    ProjectChange(ProjectConfig),
    /// SDK installation progress.
    SdkInstall(SdkManagementMsg),
    /// Server configuration change.
    ServerConfig(ServerConfig),
    /// Event channel lost.
    Disconnection(DisconnectionNotice),
    /// Event channel error.
    Error(String),
}

/// Payload of [`EVT_EXEC_OUTPUT`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecOutMsg {
    /// Command identifier.
    #[serde(rename = "cmdID")]
    pub cmd_id: String,
    /// Time the output was produced.
    pub timestamp: String,
    /// Standard output text.
    pub stdout: String,
    /// Standard error text.
    pub stderr: String,
}

/// Payload of [`EVT_EXEC_EXIT`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecExitMsg {
    /// Command identifier.
    #[serde(rename = "cmdID")]
    pub cmd_id: String,
    /// Time the command exited.
    pub timestamp: String,
    /// Exit code.
    pub code: i32,
    /// Error message, empty on success.
    #[serde(deserialize_with = "nullable_string")]
    pub error: String,
}

/// Payload of [`EVT_SDK_INSTALL`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SdkManagementMsg {
    /// Time of the notice.
    pub timestamp: String,
    /// Management action (`installing`, `removing`, ...).
    pub action: String,
    /// SDK being managed.
    pub sdk: crate::types::Sdk,
    /// Standard output text.
    pub stdout: String,
    /// Standard error text.
    pub stderr: String,
    /// Free-form progress indication.
    pub progress: i32,
    /// Whether the action has finished.
    pub exited: bool,
    /// Exit code, meaningful once `exited` is set.
    pub code: i32,
    /// Error message, empty on success.
    #[serde(deserialize_with = "nullable_string")]
    pub error: String,
}

/// Payload of [`SYS_DISCONNECTION`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DisconnectionNotice {
    /// Why the channel dropped.
    pub cause: String,
}

fn nullable_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
