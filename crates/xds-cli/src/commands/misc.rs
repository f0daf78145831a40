//! Miscellaneous commands: versions and connection status.

use std::io::Write;

use crate::cli::MiscCommands;
use crate::context::XdsContext;
use crate::error::CliError;
use crate::output::{OutputFormat, StatusReport, VersionReport};
use crate::transport::RequestChannel;

/// Validated `misc` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiscCommand {
    /// Agent and server versions.
    Version {
        /// Include git tags and API versions.
        verbose: bool,
    },
    /// Server connection status.
    Status {
        /// Include agent settings.
        verbose: bool,
    },
}

impl From<&MiscCommands> for MiscCommand {
    fn from(command: &MiscCommands) -> Self {
        match *command {
            MiscCommands::Version { verbose } => Self::Version { verbose },
            MiscCommands::Status { verbose } => Self::Status { verbose },
        }
    }
}

impl MiscCommand {
    /// Execute the misc subcommand.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or output cannot be written.
    pub async fn execute<C: RequestChannel, W: Write>(
        &self,
        ctx: &XdsContext<C>,
        writer: &mut W,
        format: &OutputFormat,
    ) -> Result<(), CliError> {
        match *self {
            Self::Version { verbose } => {
                let report = VersionReport {
                    version: ctx.version().await?,
                    verbose,
                };
                format.write(writer, &report)?;
            }
            Self::Status { verbose } => {
                let report = StatusReport {
                    config: ctx.agent_config().await?,
                    verbose,
                };
                format.write(writer, &report)?;
            }
        }
        Ok(())
    }
}
