//! Resource types returned by the agent REST API.
//!
//! Field names follow the agent's camelCase JSON. Every struct tolerates
//! missing fields so that older or newer agents still decode.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ProtoError;

/// Version information for one component (agent or server).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct VersionInfo {
    /// Component identifier.
    pub id: String,
    /// Release version.
    pub version: String,
    /// REST API version.
    pub api_version: String,
    /// Git tag the component was built from.
    pub git_tag: String,
}

/// Result of `GET /version`: the agent plus every server it knows about.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct XdsVersion {
    /// The local agent.
    pub client: VersionInfo,
    /// Remote servers, in configuration order.
    pub servers: Vec<VersionInfo>,
}

/// Connection settings for one XDS server, as held by the agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// Server identifier.
    pub id: String,
    /// Server URL.
    pub url: String,
    /// REST URL used by the agent.
    pub api_url: String,
    /// URL prefix used by the agent.
    pub partial_url: String,
    /// Number of connection retries the agent performs.
    pub conn_retry: u32,
    /// Whether the agent is currently connected to this server.
    pub connected: bool,
    /// Whether this server is disabled.
    pub disabled: bool,
}

/// Result of `GET /config` and body of `POST /config`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    /// Agent web site directory.
    pub website: String,
    /// Agent HTTP port.
    pub http_port: String,
    /// Agent logs directory.
    pub logs_dir: String,
    /// Agent version.
    pub version: String,
    /// Agent API version.
    pub api_version: String,
    /// Agent git tag.
    pub git_tag: String,
    /// Known servers.
    pub servers: Vec<ServerConfig>,
}

/// How a project's sources reach the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ProjectType {
    /// Shared file system: the server sees the sources under another path.
    #[default]
    PathMap,
    /// Sources are synchronized to the server.
    CloudSync,
    /// A type this client does not know about.
    Other(String),
}

impl ProjectType {
    /// Wire representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::PathMap => "PathMap",
            Self::CloudSync => "CloudSync",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for ProjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for ProjectType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "PathMap" => Self::PathMap,
            "CloudSync" => Self::CloudSync,
            _ => Self::Other(s),
        }
    }
}

impl From<ProjectType> for String {
    fn from(t: ProjectType) -> Self {
        t.as_str().to_string()
    }
}

impl FromStr for ProjectType {
    type Err = ProtoError;

    /// Parses the user-facing spelling (`pathmap|pm`, `cloudsync|cs`),
    /// case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pathmap" | "pm" => Ok(Self::PathMap),
            "cloudsync" | "cs" => Ok(Self::CloudSync),
            _ => Err(ProtoError::UnknownProjectType(s.to_string())),
        }
    }
}

/// Project definition.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct ProjectConfig {
    /// Project identifier (assigned by the agent).
    pub id: String,
    /// Server hosting the project.
    pub server_id: String,
    /// Free-form label.
    pub label: String,
    /// Project root on the client side.
    pub client_path: String,
    /// Project root on the server side (path-map projects only).
    pub server_path: String,
    /// Sharing type.
    #[serde(rename = "type")]
    pub project_type: ProjectType,
    /// Status reported by the agent.
    pub status: String,
    /// Whether the sources are in sync.
    pub is_in_sync: bool,
    /// Default SDK identifier, if any.
    pub default_sdk: String,
}

/// Installation status of an SDK.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SdkStatus {
    /// Installed and usable.
    Installed,
    /// Available for download.
    #[default]
    NotInstalled,
    /// Installation in progress.
    Installing,
    /// Removal in progress.
    Uninstalling,
    /// A status this client does not know about.
    Other(String),
}

impl SdkStatus {
    /// Wire representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Installed => "Installed",
            Self::NotInstalled => "Not Installed",
            Self::Installing => "Installing",
            Self::Uninstalling => "Un-installing",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for SdkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for SdkStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Installed" => Self::Installed,
            "Not Installed" => Self::NotInstalled,
            "Installing" => Self::Installing,
            "Un-installing" => Self::Uninstalling,
            _ => Self::Other(s),
        }
    }
}

impl From<SdkStatus> for String {
    fn from(s: SdkStatus) -> Self {
        s.as_str().to_string()
    }
}

/// Cross-toolchain SDK description.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Sdk {
    /// SDK identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Description.
    pub description: String,
    /// Build profile.
    pub profile: String,
    /// SDK version.
    pub version: String,
    /// Target architecture.
    pub arch: String,
    /// Install path on the server.
    pub path: String,
    /// Download URL.
    pub url: String,
    /// Installation status.
    pub status: SdkStatus,
    /// Last installation error, if any.
    pub last_error: String,
}

impl Sdk {
    /// Whether the SDK is installed.
    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.status == SdkStatus::Installed
    }

    /// First eight characters of the id, as shown in listings.
    #[must_use]
    pub fn short_id(&self) -> &str {
        self.id.char_indices().nth(8).map_or(&self.id, |(i, _)| &self.id[..i])
    }
}
