//! CLI command implementations.
//!
//! Each submodule implements one command group:
//! - [`exec`] - Remote command execution
//! - [`projects`] - Project management
//! - [`sdks`] - SDK management and installation
//! - [`misc`] - Versions and connection status
//!
//! Commands are validated against the effective configuration first, so bad
//! arguments fail before any connection to the agent is opened.

pub mod exec;
pub mod misc;
pub mod projects;
pub mod sdks;

use std::io::Write;
use std::sync::Arc;

pub use exec::ExecCommand;
pub use misc::MiscCommand;
pub use projects::ProjectCommand;
pub use sdks::SdkCommand;

use crate::cli::{Commands, IdArgs};
use crate::config::EffectiveConfig;
use crate::context::XdsContext;
use crate::error::CliError;
use crate::output::OutputFormat;
use crate::session::OutputSink;
use crate::transport::RequestChannel;

/// A validated command, ready to run once connected.
#[derive(Debug, Clone)]
pub enum Command {
    /// `exec`
    Exec(ExecCommand),
    /// `projects`
    Projects(ProjectCommand),
    /// `sdks`
    Sdks(SdkCommand),
    /// `misc`
    Misc(MiscCommand),
}

impl Command {
    /// Validates `command` against `cfg`.
    ///
    /// # Errors
    ///
    /// Returns [`CliError::Validation`] for missing or malformed arguments.
    pub fn from_cli(command: &Commands, cfg: &EffectiveConfig) -> Result<Self, CliError> {
        Ok(match command {
            Commands::Exec(args) => Self::Exec(ExecCommand::from_args(args, cfg)?),
            Commands::Projects { command } => {
                Self::Projects(ProjectCommand::from_args(command, cfg)?)
            }
            Commands::Sdks { command } => Self::Sdks(SdkCommand::from_args(command, cfg)?),
            Commands::Misc { command } => Self::Misc(MiscCommand::from(command)),
        })
    }

    /// Runs the command. Tables and JSON go to `writer`, live operation
    /// output to `output`.
    ///
    /// # Errors
    ///
    /// Returns the command's failure.
    pub async fn execute<C: RequestChannel, W: Write>(
        &self,
        ctx: &XdsContext<C>,
        writer: &mut W,
        format: &OutputFormat,
        output: Arc<OutputSink>,
    ) -> Result<(), CliError> {
        match self {
            Self::Exec(cmd) => cmd.execute(ctx, output).await,
            Self::Projects(cmd) => cmd.execute(ctx, writer, format).await,
            Self::Sdks(cmd) => cmd.execute(ctx, writer, format, output).await,
            Self::Misc(cmd) => cmd.execute(ctx, writer, format).await,
        }
    }
}

/// Resolved id, or the error every id-taking subcommand reports.
pub(crate) fn require_id(ids: &IdArgs, cfg: &EffectiveConfig, key: &str) -> Result<String, CliError> {
    ids.resolve(cfg, key)
        .ok_or_else(|| CliError::Validation("id parameter or option must be set".into()))
}
