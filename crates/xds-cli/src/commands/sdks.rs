//! SDK management command implementation.
//!
//! Installation is asynchronous on the agent side: progress arrives as
//! `event:sdk-install` notices and the last one, flagged `exited`, carries
//! the outcome. It runs through an [`ExecutionSession`](crate::session::ExecutionSession)
//! like `exec`, without soft timeout.

use std::io::Write;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tracing::{debug, warn};
use xds_proto::events::EVT_SDK_INSTALL;
use xds_proto::{EventEnvelope, EventPayload, Sdk, SdkInstallArgs};

use crate::cli::SdkCommands;
use crate::config::{EffectiveConfig, ENV_SDK_ID};
use crate::context::XdsContext;
use crate::error::CliError;
use crate::output::{ActionResult, OutputFormat, SdkList};
use crate::session::{OperationPlan, OutputChunk, OutputSink, Progress, TerminalResult};
use crate::transport::{self, Method, RequestChannel};

use super::require_id;

/// Which SDKs `sdks list` shows.
#[derive(Debug, Clone)]
pub struct SdkFilter {
    all: bool,
    pattern: Option<Regex>,
}

impl SdkFilter {
    /// Filter keeping installed SDKs, or all of them, matching `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`CliError::Validation`] if `pattern` is not a valid regex.
    pub fn new(all: bool, pattern: Option<&str>) -> Result<Self, CliError> {
        let pattern = pattern
            .filter(|p| !p.is_empty())
            .map(|p| {
                Regex::new(p)
                    .map_err(|e| CliError::Validation(format!("invalid filter \"{p}\": {e}")))
            })
            .transpose()?;
        Ok(Self { all, pattern })
    }

    /// Whether `sdk` is shown.
    #[must_use]
    pub fn matches(&self, sdk: &Sdk) -> bool {
        if !self.all && !sdk.is_installed() {
            return false;
        }
        let Some(re) = &self.pattern else {
            return true;
        };
        [&sdk.id, &sdk.name, &sdk.profile, &sdk.arch, &sdk.version]
            .iter()
            .any(|field| re.is_match(field))
    }
}

impl PartialEq for SdkFilter {
    fn eq(&self, other: &Self) -> bool {
        self.all == other.all
            && self.pattern.as_ref().map(Regex::as_str) == other.pattern.as_ref().map(Regex::as_str)
    }
}

/// Validated `sdks` invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum SdkCommand {
    /// Show one SDK.
    Get(String),
    /// List SDKs.
    List {
        /// Selection.
        filter: SdkFilter,
        /// One block per SDK.
        verbose: bool,
    },
    /// Install an SDK and wait for completion.
    Install(SdkInstallArgs),
    /// Remove an installed SDK.
    Uninstall(String),
    /// Abort a running installation.
    Abort(String),
}

impl SdkCommand {
    /// Resolves ids and compiles the list filter.
    ///
    /// # Errors
    ///
    /// Returns [`CliError::Validation`] for a missing id or an invalid filter.
    pub fn from_args(command: &SdkCommands, cfg: &EffectiveConfig) -> Result<Self, CliError> {
        Ok(match command {
            SdkCommands::Get(ids) => Self::Get(require_id(ids, cfg, ENV_SDK_ID)?),
            SdkCommands::List(args) => Self::List {
                filter: SdkFilter::new(args.all, args.filter.as_deref())?,
                verbose: args.verbose,
            },
            SdkCommands::Install(args) => {
                let id = args.ids.resolve(cfg, ENV_SDK_ID).unwrap_or_default();
                let filename = args.file.clone().unwrap_or_default();
                if id.is_empty() && filename.is_empty() {
                    return Err(CliError::Validation(
                        "id or file parameter or option must be set".into(),
                    ));
                }
                Self::Install(SdkInstallArgs {
                    id,
                    filename,
                    force: args.force,
                    install_args: if args.debug {
                        vec!["--debug".into()]
                    } else {
                        Vec::new()
                    },
                })
            }
            SdkCommands::Uninstall(ids) => Self::Uninstall(require_id(ids, cfg, ENV_SDK_ID)?),
            SdkCommands::Abort(ids) => Self::Abort(require_id(ids, cfg, ENV_SDK_ID)?),
        })
    }

    /// Execute the SDK subcommand.
    ///
    /// # Errors
    ///
    /// Returns an error if a request fails, or the installation outcome.
    pub async fn execute<C: RequestChannel, W: Write>(
        &self,
        ctx: &XdsContext<C>,
        writer: &mut W,
        format: &OutputFormat,
        output: Arc<OutputSink>,
    ) -> Result<(), CliError> {
        match self {
            Self::Get(id) => {
                let sdk: Sdk = transport::get(ctx.channel(), &format!("/sdks/{id}")).await?;
                let list = SdkList {
                    sdks: vec![sdk],
                    verbose: true,
                    all: true,
                };
                format.write(writer, &list)?;
            }
            Self::List { filter, verbose } => {
                let sdks: Vec<Sdk> = transport::get(ctx.channel(), "/sdks").await?;
                debug!(count = sdks.len(), "SDKs listed");
                let list = SdkList {
                    sdks: sdks.into_iter().filter(|s| filter.matches(s)).collect(),
                    verbose: *verbose,
                    all: filter.all,
                };
                format.write(writer, &list)?;
            }
            Self::Install(args) => {
                let started: Arc<OnceLock<Sdk>> = Arc::new(OnceLock::new());
                let plan = install_plan(args, Arc::clone(&started))?;
                ctx.session(output).run(plan).await.into_result()?;

                let id = started.get().map_or(args.id.as_str(), |sdk| sdk.id.as_str());
                let msg = ActionResult::new(
                    format!("SDK ID {id} successfully installed."),
                    Some(id.to_string()),
                );
                format.write(writer, &msg)?;
            }
            Self::Uninstall(id) => {
                let removed: Sdk = transport::delete(ctx.channel(), &format!("/sdks/{id}")).await?;
                let msg = ActionResult::new(
                    format!("SDK ID {} successfully deleted.", removed.id),
                    Some(removed.id),
                );
                format.write(writer, &msg)?;
            }
            Self::Abort(id) => {
                let body = SdkInstallArgs {
                    id: id.clone(),
                    ..SdkInstallArgs::default()
                };
                let sdk: Sdk = transport::post(ctx.channel(), "/sdks/abortinstall", &body).await?;
                debug!(id = %sdk.id, status = %sdk.status, "install aborted");
            }
        }
        Ok(())
    }
}

/// Operation plan for `POST /sdks`.
///
/// The SDK returned by the agent is stored in `started`.
///
/// # Errors
///
/// Returns [`CliError::Format`] if the request cannot be encoded.
pub fn install_plan(
    args: &SdkInstallArgs,
    started: Arc<OnceLock<Sdk>>,
) -> Result<OperationPlan, CliError> {
    let body = serde_json::to_value(args)
        .map_err(|e| CliError::Format(format!("cannot encode install request: {e}")))?;

    Ok(OperationPlan::new("sdk install", Method::Post, "/sdks")
        .with_body(body)
        .interpret(EVT_SDK_INSTALL, install_progress)
        .register_remote(EVT_SDK_INSTALL)
        .on_submitted(move |response, output| {
            let sdk: Sdk = serde_json::from_value(response.clone()).unwrap_or_default();
            output.println(&format!(
                "Installation of '{}' SDK successfully started.",
                sdk.name
            ));
            let _ = started.set(sdk);
        }))
}

fn install_progress(envelope: &EventEnvelope) -> Progress {
    match envelope.decode() {
        Ok(Some(EventPayload::SdkInstall(msg))) => Progress {
            output: Some(OutputChunk {
                timestamp: if msg.timestamp.is_empty() {
                    envelope.time.clone()
                } else {
                    msg.timestamp
                },
                stdout: msg.stdout,
                stderr: msg.stderr,
            }),
            terminal: msg
                .exited
                .then(|| TerminalResult::exited(msg.code, msg.error)),
        },
        other => {
            warn!(result = ?other, "undecodable install event");
            Progress::default()
        }
    }
}
