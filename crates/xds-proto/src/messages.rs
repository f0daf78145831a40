//! Request bodies and submission results for the agent REST API.

use serde::{Deserialize, Serialize};

use crate::ProtoError;

/// Default remote command timeout, in seconds.
pub const DEFAULT_CMD_TIMEOUT_SECS: u64 = 60;

/// Body of `POST /exec`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExecArgs {
    /// Project identifier.
    pub id: String,
    /// Cross SDK to run the command with; empty selects the project default.
    #[serde(default)]
    pub sdk_id: String,
    /// Command to run.
    pub cmd: String,
    /// Command arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment, as `KEY=VALUE` entries.
    #[serde(default)]
    pub env: Vec<String>,
    /// Working directory relative to the project root.
    #[serde(default)]
    pub rpath: String,
    /// Remote timeout in seconds.
    #[serde(default = "default_cmd_timeout")]
    pub cmd_timeout: u64,
}

const fn default_cmd_timeout() -> u64 {
    DEFAULT_CMD_TIMEOUT_SECS
}

impl ExecArgs {
    /// Creates a request for `cmd` in project `id`.
    ///
    /// The command is trimmed of surrounding spaces.
    #[must_use]
    pub fn new(id: impl Into<String>, cmd: &str) -> Self {
        Self {
            id: id.into(),
            sdk_id: String::new(),
            cmd: cmd.trim().to_string(),
            args: Vec::new(),
            env: Vec::new(),
            rpath: String::new(),
            cmd_timeout: DEFAULT_CMD_TIMEOUT_SECS,
        }
    }

    /// Sets the command arguments.
    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Sets the SDK.
    #[must_use]
    pub fn with_sdk(mut self, sdk_id: impl Into<String>) -> Self {
        self.sdk_id = sdk_id.into();
        self
    }

    /// Sets the environment list.
    #[must_use]
    pub fn with_env(mut self, env: Vec<String>) -> Self {
        self.env = env;
        self
    }

    /// Sets the project-relative path.
    #[must_use]
    pub fn with_rpath(mut self, rpath: impl Into<String>) -> Self {
        self.rpath = rpath.into();
        self
    }

    /// Sets the remote timeout.
    #[must_use]
    pub const fn with_timeout(mut self, secs: u64) -> Self {
        self.cmd_timeout = secs;
        self
    }

    /// Checks the request can be submitted.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::Validation`] when the project id or the command is empty.
    pub fn validate(&self) -> Result<(), ProtoError> {
        if self.id.is_empty() {
            return Err(ProtoError::Validation(
                "project id must be set (see --id option)".into(),
            ));
        }
        if self.cmd.is_empty() {
            return Err(ProtoError::Validation("command must not be empty".into()));
        }
        Ok(())
    }
}

/// Response of `POST /exec`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecResult {
    /// Submission status.
    pub status: String,
    /// Identifier of the started command, echoed in its events.
    #[serde(rename = "cmdID")]
    pub cmd_id: String,
}

/// Body of `POST /events/register`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventRegisterArgs {
    /// Event type to forward to this session.
    pub name: String,
}

impl EventRegisterArgs {
    /// Registration for one event type.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Body of `POST /sdks` and `POST /sdks/abortinstall`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct SdkInstallArgs {
    /// SDK identifier.
    pub id: String,
    /// Local SDK archive to install instead of downloading.
    pub filename: String,
    /// Reinstall even when already installed.
    pub force: bool,
    /// Extra arguments passed to the install script.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub install_args: Vec<String>,
}
