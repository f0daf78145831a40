//! # xds-cli
//!
//! Command-line client for the X(cross) Development System agent.
//!
//! Provides commands for:
//! - Remote command execution inside a project (`exec`)
//! - Project management
//! - Cross SDK management and installation
//! - Agent/server version and connection status
//!
//! # Architecture
//!
//! The CLI talks to a local `xds-agent` over two channels: REST calls for
//! submissions and CRUD, and a Socket.IO event stream for live output and
//! termination notices. An [`session::ExecutionSession`] reconciles both
//! into a single exit code.
//!
//! ```text
//!                 REST /api/v1
//! ┌─────────┐ ──────────────────► ┌─────────────┐      ┌────────────┐
//! │ xds-cli │                     │  xds-agent  │◄────►│ xds-server │
//! └─────────┘ ◄────────────────── └─────────────┘      └────────────┘
//!              events (Socket.IO)
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod output;
pub mod registry;
pub mod rpath;
pub mod session;
pub mod transport;

pub use cli::{Cli, Commands, Format};
pub use config::EffectiveConfig;
pub use context::XdsContext;
pub use error::CliError;
pub use output::OutputFormat;
pub use registry::EventRegistry;
pub use session::{ExecutionSession, TerminalResult};
