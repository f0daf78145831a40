//! Command-line argument parsing with clap.
//!
//! Flags carry no environment fallback here: the flag > file > environment
//! order is applied by [`crate::config::EffectiveConfig`].

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::EffectiveConfig;

/// Command line tool for the X(cross) Development System.
///
/// Global options are taken, in order, from the command line, from the
/// `XDS_xxx` entries of the `--config` file, then from `XDS_xxx`
/// environment variables.
#[derive(Parser, Debug, Clone)]
#[command(name = "xds-cli")]
#[command(version, about, long_about)]
pub struct Cli {
    /// Global options.
    #[command(flatten)]
    pub global: GlobalFlags,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalFlags {
    /// Env config file to source on startup [env: XDS_CONFIG].
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Logging level: panic, fatal, error, warn, info, debug, trace [env: XDS_LOGLEVEL].
    #[arg(short, long, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Local XDS agent url [env: XDS_AGENT_URL] [default: localhost:8800].
    #[arg(short, long)]
    pub url: Option<String>,

    /// Overwrite the remote XDS server url [env: XDS_SERVER_URL].
    #[arg(long, visible_alias = "us")]
    pub url_server: Option<String>,

    /// Prefix output with timestamp [env: XDS_TIMESTAMP].
    #[arg(long, visible_alias = "ts")]
    pub timestamp: bool,

    /// Output format.
    #[arg(short, long, value_enum, default_value_t = Format::Table)]
    pub format: Format,
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum Format {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON output for scripting.
    Json,
}

/// Top-level subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Execute a command in XDS.
    Exec(ExecArgs),

    /// Project commands group.
    #[command(visible_alias = "prj")]
    Projects {
        /// Project subcommand to execute.
        #[command(subcommand)]
        command: ProjectCommands,
    },

    /// SDKs commands group.
    #[command(visible_alias = "sdk")]
    Sdks {
        /// SDK subcommand to execute.
        #[command(subcommand)]
        command: SdkCommands,
    },

    /// Miscellaneous commands group.
    Misc {
        /// Misc subcommand to execute.
        #[command(subcommand)]
        command: MiscCommands,
    },
}

/// Arguments for the exec command.
#[derive(Args, Debug, Clone, Default)]
pub struct ExecArgs {
    /// Project ID to build (mandatory) [env: XDS_PROJECT_ID].
    #[arg(long)]
    pub id: Option<String>,

    /// Relative path into the project [env: XDS_RPATH].
    #[arg(short = 'p', long)]
    pub rpath: Option<String>,

    /// Cross SDK ID to build the project with [env: XDS_SDK_ID].
    #[arg(long, visible_alias = "sdk")]
    pub sdkid: Option<String>,

    /// Extra environment variable for the command.
    #[arg(short, long, value_name = "KEY=VALUE")]
    pub env: Vec<String>,

    /// Remote command timeout in seconds [env: XDS_TIMEOUT] [default: 60].
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Command and arguments to execute.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "CMD")]
    pub command: Vec<String>,
}

/// Identifier given as `--id` or as the first positional argument.
#[derive(Args, Debug, Clone, Default)]
pub struct IdArgs {
    /// Identifier.
    #[arg(long = "id", value_name = "ID")]
    pub id_flag: Option<String>,

    /// Identifier, when `--id` is not used.
    #[arg(value_name = "ID")]
    pub id: Option<String>,
}

impl IdArgs {
    /// `--id`, else the positional id, else `key` from the config file or environment.
    #[must_use]
    pub fn resolve(&self, cfg: &EffectiveConfig, key: &str) -> Option<String> {
        let flag = self
            .id_flag
            .as_deref()
            .filter(|v| !v.is_empty())
            .or_else(|| self.id.as_deref());
        cfg.pick(flag, key)
    }
}

/// Project subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum ProjectCommands {
    /// Add a new project.
    #[command(visible_alias = "a")]
    Add(ProjectAddArgs),

    /// Get a property of a project.
    Get(IdArgs),

    /// List existing projects.
    #[command(visible_alias = "ls")]
    List {
        /// Display verbose output.
        #[arg(short, long)]
        verbose: bool,
    },

    /// Remove an existing project.
    #[command(visible_alias = "rm")]
    Remove(IdArgs),

    /// Force synchronization of project sources.
    Sync(IdArgs),
}

/// Arguments for `projects add`.
#[derive(Args, Debug, Clone, Default)]
pub struct ProjectAddArgs {
    /// Project label (free form string).
    #[arg(short, long, default_value = "")]
    pub label: String,

    /// Project local path.
    #[arg(short, long, default_value = "")]
    pub path: String,

    /// Project server path (only used with pathmap type).
    #[arg(long, visible_alias = "sp", default_value = "")]
    pub server_path: String,

    /// Project type: pathmap|pm, cloudsync|cs.
    #[arg(short = 't', long = "type", value_name = "TYPE", default_value = "")]
    pub project_type: String,
}

/// SDK subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum SdkCommands {
    /// Get a property of a SDK.
    Get(IdArgs),

    /// List installed SDKs.
    #[command(visible_alias = "ls")]
    List(SdkListArgs),

    /// Install a SDK.
    #[command(visible_alias = "i")]
    Install(SdkInstallArgs),

    /// Uninstall an existing SDK.
    #[command(visible_alias = "rm")]
    Uninstall(IdArgs),

    /// Abort an install action.
    Abort(IdArgs),
}

/// Arguments for `sdks list`.
#[derive(Args, Debug, Clone, Default)]
pub struct SdkListArgs {
    /// Display all existing SDKs (installed and downloadable).
    #[arg(short, long)]
    pub all: bool,

    /// Regexp matched against ID, name, profile, arch and version.
    #[arg(short, long, value_name = "REGEX")]
    pub filter: Option<String>,

    /// Display verbose output.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Arguments for `sdks install`.
#[derive(Args, Debug, Clone, Default)]
pub struct SdkInstallArgs {
    /// SDK to install.
    #[command(flatten)]
    pub ids: IdArgs,

    /// Install from this SDK file.
    #[arg(short, long, value_name = "FILE")]
    pub file: Option<String>,

    /// Enable debug mode of the install script.
    #[arg(long)]
    pub debug: bool,

    /// Force installation when already installed.
    #[arg(long)]
    pub force: bool,
}

/// Miscellaneous subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum MiscCommands {
    /// Get version of XDS agent and XDS server.
    #[command(visible_alias = "v")]
    Version {
        /// Display verbose output.
        #[arg(short, long)]
        verbose: bool,
    },

    /// Get XDS configuration status (including XDS server connection).
    #[command(visible_alias = "sts")]
    Status {
        /// Display verbose output.
        #[arg(short, long)]
        verbose: bool,
    },
}
