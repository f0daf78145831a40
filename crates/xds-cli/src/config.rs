//! Configuration precedence.
//!
//! Every option is looked up in three places, first hit wins:
//!
//! 1. the command-line flag,
//! 2. the dotenv-style file given by `--config` / `XDS_CONFIG`,
//! 3. the process environment.
//!
//! The file is parsed without touching the process environment; the merge
//! happens in [`EffectiveConfig::resolve`] over plain maps so it can be
//! tested with injected environments.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use tracing::{debug, info};

use crate::cli::{Format, GlobalFlags};
use crate::error::CliError;

/// Config file path.
pub const ENV_CONFIG: &str = "XDS_CONFIG";
/// Log level.
pub const ENV_LOGLEVEL: &str = "XDS_LOGLEVEL";
/// Agent URL.
pub const ENV_AGENT_URL: &str = "XDS_AGENT_URL";
/// Server URL override.
pub const ENV_SERVER_URL: &str = "XDS_SERVER_URL";
/// Timestamp prefix toggle.
pub const ENV_TIMESTAMP: &str = "XDS_TIMESTAMP";
/// Project id.
pub const ENV_PROJECT_ID: &str = "XDS_PROJECT_ID";
/// Project-relative path.
pub const ENV_RPATH: &str = "XDS_RPATH";
/// SDK id.
pub const ENV_SDK_ID: &str = "XDS_SDK_ID";
/// Remote command timeout, in seconds.
pub const ENV_TIMEOUT: &str = "XDS_TIMEOUT";

/// Agent URL used when nothing else is set.
pub const DEFAULT_AGENT_URL: &str = "localhost:8800";
/// Log level used when nothing else is set.
pub const DEFAULT_LOG_LEVEL: &str = "error";

/// Reads a dotenv-style file into a sorted map.
///
/// # Errors
///
/// Returns [`CliError::Config`] if the file is missing or malformed.
pub fn load_file(path: &Path) -> Result<BTreeMap<String, String>, CliError> {
    if !path.is_file() {
        return Err(CliError::Config(format!(
            "Error env config file not found: {}",
            path.display()
        )));
    }

    let iter = dotenvy::from_path_iter(path).map_err(|e| {
        CliError::Config(format!("Error loading env config file {}: {e}", path.display()))
    })?;

    let mut vars = BTreeMap::new();
    for item in iter {
        let (key, value) = item.map_err(|e| {
            CliError::Config(format!("Error reading env config file {}: {e}", path.display()))
        })?;
        vars.insert(key, value);
    }

    Ok(vars)
}

/// Normalizes an agent or server URL.
///
/// A bare port becomes `http://localhost:PORT`; a URL without scheme gets
/// `http://`.
#[must_use]
pub fn normalize_url(raw: &str) -> String {
    let raw = raw.trim();
    if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
        return format!("http://localhost:{raw}");
    }
    if raw.is_empty() || raw.starts_with("http://") || raw.starts_with("https://") {
        return raw.to_string();
    }
    format!("http://{raw}")
}

/// Maps a user log level onto a `tracing` filter directive.
///
/// # Errors
///
/// Returns [`CliError::Config`] for an unknown level.
pub fn log_directive(level: &str) -> Result<&'static str, CliError> {
    match level.trim().to_lowercase().as_str() {
        "panic" | "fatal" | "error" => Ok("error"),
        "warn" | "warning" => Ok("warn"),
        "info" => Ok("info"),
        "debug" => Ok("debug"),
        "trace" => Ok("trace"),
        _ => Err(CliError::Config(format!("Invalid log level : \"{level}\""))),
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, CliError> {
    match value.trim() {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
        "" | "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
        other => Err(CliError::Config(format!(
            "invalid boolean value \"{other}\" for {key}"
        ))),
    }
}

/// Fully merged configuration for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveConfig {
    /// Normalized agent URL.
    pub agent_url: String,
    /// Normalized server URL override, if any.
    pub server_url: Option<String>,
    /// `tracing` filter directive.
    pub log_directive: &'static str,
    /// Prefix output with event timestamps.
    pub timestamp: bool,
    /// Default remote command timeout, in seconds.
    pub timeout_secs: u64,
    /// Output format.
    pub format: Format,
    /// Entries of the config file, forwarded as the remote environment.
    pub file_vars: BTreeMap<String, String>,
    /// Process environment overlaid with the file entries.
    merged: HashMap<String, String>,
}

impl EffectiveConfig {
    /// Resolves every option from `flags`, the config file and `env`.
    ///
    /// # Errors
    ///
    /// Returns [`CliError::Config`] if the config file cannot be loaded or
    /// an option has an invalid value.
    pub fn resolve(flags: &GlobalFlags, env: &HashMap<String, String>) -> Result<Self, CliError> {
        let config_path = flags
            .config
            .as_deref()
            .map(Path::to_path_buf)
            .or_else(|| env.get(ENV_CONFIG).filter(|p| !p.is_empty()).map(Into::into));

        let file_vars = match &config_path {
            Some(path) => load_file(path)?,
            None => BTreeMap::new(),
        };

        let mut merged = env.clone();
        merged.extend(file_vars.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut cfg = Self {
            agent_url: String::new(),
            server_url: None,
            log_directive: DEFAULT_LOG_LEVEL,
            timestamp: false,
            timeout_secs: xds_proto::messages::DEFAULT_CMD_TIMEOUT_SECS,
            format: flags.format,
            file_vars,
            merged,
        };

        cfg.agent_url = normalize_url(
            &cfg.pick(flags.url.as_deref(), ENV_AGENT_URL)
                .unwrap_or_else(|| DEFAULT_AGENT_URL.to_string()),
        );
        cfg.server_url = cfg
            .pick(flags.url_server.as_deref(), ENV_SERVER_URL)
            .map(|u| normalize_url(&u));
        cfg.log_directive = log_directive(
            &cfg.pick(flags.log.as_deref(), ENV_LOGLEVEL)
                .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string()),
        )?;
        cfg.timestamp = flags.timestamp
            || cfg
                .lookup(ENV_TIMESTAMP)
                .map(|v| parse_bool(ENV_TIMESTAMP, v))
                .transpose()?
                .unwrap_or(false);
        let timeout = cfg
            .lookup(ENV_TIMEOUT)
            .map(|raw| {
                raw.trim().parse::<u64>().map_err(|_| {
                    CliError::Config(format!("invalid {ENV_TIMEOUT} value \"{raw}\""))
                })
            })
            .transpose()?;
        if let Some(secs) = timeout {
            cfg.timeout_secs = secs;
        }

        Ok(cfg)
    }

    /// Logs the resolved options. Called once logging is set up.
    pub fn log_summary(&self) {
        if !self.file_vars.is_empty() {
            info!(entries = self.file_vars.len(), "config file loaded");
        }
        debug!(
            agent_url = %self.agent_url,
            server_url = ?self.server_url,
            log = self.log_directive,
            timestamp = self.timestamp,
            timeout_secs = self.timeout_secs,
            "effective configuration"
        );
    }

    /// Resolves against the current process environment.
    ///
    /// # Errors
    ///
    /// See [`EffectiveConfig::resolve`].
    pub fn from_process(flags: &GlobalFlags) -> Result<Self, CliError> {
        // Non UTF-8 entries cannot name XDS options and are skipped.
        let env = std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect();
        Self::resolve(flags, &env)
    }

    /// File value, else environment value, for `key`. Empty values count as unset.
    #[must_use]
    pub fn lookup(&self, key: &str) -> Option<&str> {
        self.merged
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// `flag` if set, else [`EffectiveConfig::lookup`] of `key`.
    #[must_use]
    pub fn pick(&self, flag: Option<&str>, key: &str) -> Option<String> {
        flag.filter(|v| !v.is_empty())
            .or_else(|| self.lookup(key))
            .map(str::to_string)
    }

    /// File entries as a sorted `KEY=VALUE` list.
    #[must_use]
    pub fn file_env(&self) -> Vec<String> {
        self.file_vars
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect()
    }
}
