//! # xds-proto
//!
//! Wire types shared between `xds-cli` and the XDS agent.
//!
//! The agent exposes two channels:
//!
//! ```text
//! ┌──────────┐   REST (JSON, /api/v1)   ┌─────────────┐
//! │ xds-cli  │─────────────────────────►│  xds-agent  │
//! │          │◄─────────────────────────│             │
//! └──────────┘    events (Socket.IO)     └─────────────┘
//! ```
//!
//! [`types`] and [`messages`] cover the request/response side,
//! [`events`] covers the push side and [`socketio`] its framing.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod events;
pub mod messages;
pub mod socketio;
pub mod types;

pub use error::ProtoError;
pub use events::{
    DisconnectionNotice, EventEnvelope, EventPayload, ExecExitMsg, ExecOutMsg, SdkManagementMsg,
};
pub use messages::{EventRegisterArgs, ExecArgs, ExecResult, SdkInstallArgs};
pub use types::{
    AgentConfig, ProjectConfig, ProjectType, Sdk, SdkStatus, ServerConfig, VersionInfo,
    XdsVersion,
};
