//! Output formatting for CLI commands.
//!
//! Supports table (human-readable) and JSON output formats. Live command
//! output from sessions bypasses this module and goes through
//! [`crate::session::OutputSink`].

use std::io::Write;

use serde::{Serialize, Serializer};
use xds_proto::{AgentConfig, ProjectConfig, ProjectType, Sdk, XdsVersion};

use crate::cli::Format;
use crate::error::CliError;

/// Output formatter that handles both table and JSON output.
#[derive(Debug, Clone)]
pub struct OutputFormat {
    format: Format,
}

impl OutputFormat {
    /// Create a new output formatter.
    #[must_use]
    pub const fn new(format: Format) -> Self {
        Self { format }
    }

    /// Get the current format.
    #[must_use]
    pub const fn format(&self) -> Format {
        self.format
    }

    /// Check if JSON format is selected.
    #[must_use]
    pub const fn is_json(&self) -> bool {
        matches!(self.format, Format::Json)
    }

    /// Write a serializable value to the output.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails.
    pub fn write<W, T>(&self, writer: &mut W, value: &T) -> Result<(), CliError>
    where
        W: Write,
        T: Serialize + TableDisplay,
    {
        match self.format {
            Format::Json => {
                serde_json::to_writer_pretty(&mut *writer, value)
                    .map_err(|e| CliError::Format(format!("JSON serialization failed: {e}")))?;
                writeln!(writer)?;
            }
            Format::Table => {
                value.write_table(writer)?;
            }
        }
        Ok(())
    }

    /// Write a serializable value to a string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_string<T>(&self, value: &T) -> Result<String, CliError>
    where
        T: Serialize + TableDisplay,
    {
        let mut buf = Vec::new();
        self.write(&mut buf, value)?;
        String::from_utf8(buf).map_err(|e| CliError::Format(format!("UTF-8 error: {e}")))
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::new(Format::Table)
    }
}

/// Trait for types that can be displayed as a table.
pub trait TableDisplay {
    /// Write the value as a human-readable table.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails.
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError>;
}

/// Projects for display.
#[derive(Debug, Clone)]
pub struct ProjectList {
    /// Projects, in agent order.
    pub projects: Vec<ProjectConfig>,
    /// One block per project instead of one row.
    pub verbose: bool,
}

impl Serialize for ProjectList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.projects.serialize(serializer)
    }
}

impl TableDisplay for ProjectList {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        if self.verbose {
            for (i, prj) in self.projects.iter().enumerate() {
                if i > 0 {
                    writeln!(writer)?;
                }
                writeln!(writer, "ID:           {}", prj.id)?;
                writeln!(writer, "Label:        {}", prj.label)?;
                writeln!(writer, "Path type:    {}", prj.project_type)?;
                writeln!(writer, "Local Path:   {}", prj.client_path)?;
                if prj.project_type != ProjectType::CloudSync {
                    writeln!(writer, "Server Path:  {}", prj.server_path)?;
                }
                writeln!(writer, "Status:       {}", prj.status)?;
                writeln!(writer, "Is in Sync:   {}", prj.is_in_sync)?;
                let sdk = if prj.default_sdk.is_empty() {
                    "-"
                } else {
                    prj.default_sdk.as_str()
                };
                writeln!(writer, "Default Sdk:  {sdk}")?;
            }
            return Ok(());
        }

        if self.projects.is_empty() {
            writeln!(writer, "No projects")?;
            return Ok(());
        }

        writeln!(writer, "{:<36}  {:<20}  LOCAL PATH", "ID", "LABEL")?;
        for prj in &self.projects {
            writeln!(
                writer,
                "{:<36}  {:<20}  {}",
                prj.id,
                truncate(&prj.label, 20),
                prj.client_path
            )?;
        }
        Ok(())
    }
}

/// SDKs for display.
#[derive(Debug, Clone)]
pub struct SdkList {
    /// SDKs to show, already filtered.
    pub sdks: Vec<Sdk>,
    /// One block per SDK instead of one row.
    pub verbose: bool,
    /// Whether downloadable SDKs are included.
    pub all: bool,
}

impl Serialize for SdkList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.sdks.serialize(serializer)
    }
}

impl TableDisplay for SdkList {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        if self.verbose {
            for (i, sdk) in self.sdks.iter().enumerate() {
                if i > 0 {
                    writeln!(writer)?;
                }
                writeln!(writer, "ID           {}", sdk.id)?;
                writeln!(writer, "Name         {}", sdk.name)?;
                writeln!(writer, "Description  {}", sdk.description)?;
                writeln!(writer, "Profile      {}", sdk.profile)?;
                writeln!(writer, "Arch         {}", sdk.arch)?;
                writeln!(writer, "Version      {}", sdk.version)?;
                writeln!(writer, "Status       {}", sdk.status)?;
                writeln!(writer, "Path         {}", sdk.path)?;
                writeln!(writer, "Url          {}", sdk.url)?;
            }
            return Ok(());
        }

        if self.sdks.is_empty() {
            writeln!(writer, "No SDKs")?;
            return Ok(());
        }

        if self.all {
            writeln!(writer, "List of available SDKs:")?;
        } else {
            writeln!(writer, "List of installed SDKs:")?;
        }
        writeln!(
            writer,
            "{:<8}  {:<24}  {:<14}  {:<10}  ARCH",
            "ID", "NAME", "STATUS", "VERSION"
        )?;
        for sdk in &self.sdks {
            writeln!(
                writer,
                "{:<8}  {:<24}  {:<14}  {:<10}  {}",
                sdk.short_id(),
                truncate(&sdk.name, 24),
                sdk.status,
                sdk.version,
                sdk.arch
            )?;
        }
        Ok(())
    }
}

/// Agent and server versions.
#[derive(Debug, Clone)]
pub struct VersionReport {
    /// Versions as returned by the agent.
    pub version: XdsVersion,
    /// Include git tags and API versions.
    pub verbose: bool,
}

impl Serialize for VersionReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.version.serialize(serializer)
    }
}

impl TableDisplay for VersionReport {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        let components = std::iter::once(("Agent", &self.version.client))
            .chain(self.version.servers.iter().map(|s| ("Server", s)));

        for (kind, info) in components {
            writeln!(writer, "{kind}:")?;
            writeln!(writer, "      ID:           {}", info.id)?;
            if self.verbose {
                writeln!(writer, "      Version:      {} ({})", info.version, info.git_tag)?;
                writeln!(writer, "      API Version:  {}", info.api_version)?;
            } else {
                writeln!(writer, "      Version:      {}", info.version)?;
            }
        }
        Ok(())
    }
}

/// Agent configuration, focused on server connection status.
#[derive(Debug, Clone)]
pub struct StatusReport {
    /// Configuration as returned by the agent.
    pub config: AgentConfig,
    /// Include the agent's own settings.
    pub verbose: bool,
}

impl Serialize for StatusReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.config.serialize(serializer)
    }
}

impl TableDisplay for StatusReport {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        if self.verbose {
            writeln!(writer, "XDS Agent:")?;
            writeln!(writer, "       HTTP port:         {}", self.config.http_port)?;
            writeln!(writer, "       Web site:          {}", self.config.website)?;
            writeln!(writer, "       Logs directory:    {}", self.config.logs_dir)?;
        }
        writeln!(writer, "XDS Server:")?;
        for svr in &self.config.servers {
            writeln!(writer, "       ID:                {}", svr.id)?;
            writeln!(writer, "       URL:               {}", svr.url)?;
            writeln!(writer, "       Connected:         {}", svr.connected)?;
            writeln!(writer, "       Connection retry:  {}", svr.conn_retry)?;
            writeln!(writer, "       Disabled:          {}", svr.disabled)?;
        }
        Ok(())
    }
}

/// Outcome of a one-shot action.
#[derive(Debug, Clone, Serialize)]
pub struct ActionResult {
    /// Human-readable outcome.
    pub message: String,
    /// Identifier of the affected resource.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl ActionResult {
    /// Message about resource `id`.
    #[must_use]
    pub fn new(message: impl Into<String>, id: Option<String>) -> Self {
        Self {
            message: message.into(),
            id,
        }
    }
}

impl TableDisplay for ActionResult {
    fn write_table<W: Write>(&self, writer: &mut W) -> Result<(), CliError> {
        writeln!(writer, "{}", self.message)?;
        Ok(())
    }
}

/// Truncate a string to max length with ellipsis.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len > 3 {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{head}...")
    } else {
        s.chars().take(max_len).collect()
    }
}
