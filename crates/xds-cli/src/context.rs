//! Per-invocation session context.
//!
//! [`XdsContext`] owns both transport channels, the event registry, the
//! effective configuration and the version cache. It is built once in
//! `main` and handed to the command that runs.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use xds_proto::events::SYS_ERROR;
use xds_proto::{AgentConfig, EventEnvelope, EventPayload, XdsVersion};

use crate::config::EffectiveConfig;
use crate::error::CliError;
use crate::registry::{EventRegistry, Subscription};
use crate::session::{ExecutionSession, OutputSink};
use crate::transport::{self, events, EventChannel, HttpChannel, RequestChannel};

/// Connection retries requested when the server URL is changed.
pub const SERVER_CONN_RETRY: u32 = 10;

/// Only the first configured server is used.
const SERVER_INDEX: usize = 0;

/// Shared handles for one invocation.
pub struct XdsContext<C = HttpChannel> {
    channel: C,
    registry: Arc<EventRegistry>,
    events: Option<EventChannel>,
    channel_errors: Option<Subscription>,
    config: EffectiveConfig,
    version: Mutex<Option<XdsVersion>>,
}

impl<C> std::fmt::Debug for XdsContext<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XdsContext")
            .field("agent_url", &self.config.agent_url)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

impl XdsContext<HttpChannel> {
    /// Opens both channels to the agent and applies the server URL override.
    ///
    /// Event channel errors are reported on `output` for the lifetime of the
    /// context.
    ///
    /// # Errors
    ///
    /// Returns a [`CliError::Transport`] if either channel cannot be opened,
    /// or any error raised while reading or updating the agent config.
    pub async fn connect(config: EffectiveConfig, output: Arc<OutputSink>) -> Result<Self, CliError> {
        let channel = HttpChannel::connect(&config.agent_url).await?;
        info!(sid = %channel.sid(), "HTTP session ID");
        let greeting = serde_json::from_value::<XdsVersion>(channel.greeting().clone()).ok();

        let registry = EventRegistry::new();
        let channel_errors = registry.subscribe(SYS_ERROR, move |envelope| {
            if let Some(line) = channel_error_line(envelope) {
                output.eprintln(&line);
            }
        });
        let ws_url = events::event_url(&config.agent_url)?;
        let events = EventChannel::connect(&ws_url, channel.sid(), Arc::clone(&registry)).await?;

        let ctx = Self {
            channel,
            registry,
            events: Some(events),
            channel_errors: Some(channel_errors),
            config,
            version: Mutex::new(greeting),
        };

        let version = ctx.version().await.map_err(|e| {
            CliError::Config(format!("ERROR while retrieving XDS version: {e}"))
        })?;
        info!(
            agent = %version.client.version,
            servers = ?version.servers.iter().map(|s| &s.version).collect::<Vec<_>>(),
            "XDS agent/server version"
        );

        ctx.sync_server_url().await?;
        Ok(ctx)
    }
}

impl<C: RequestChannel> XdsContext<C> {
    /// Context over an existing request channel, without event channel.
    #[must_use]
    pub fn with_channel(channel: C, registry: Arc<EventRegistry>, config: EffectiveConfig) -> Self {
        Self {
            channel,
            registry,
            events: None,
            channel_errors: None,
            config,
            version: Mutex::new(None),
        }
    }

    /// Request channel.
    #[must_use]
    pub const fn channel(&self) -> &C {
        &self.channel
    }

    /// Event registry fed by the event channel.
    #[must_use]
    pub const fn registry(&self) -> &Arc<EventRegistry> {
        &self.registry
    }

    /// Effective configuration.
    #[must_use]
    pub const fn config(&self) -> &EffectiveConfig {
        &self.config
    }

    /// New execution session writing to `output`.
    #[must_use]
    pub fn session(&self, output: Arc<OutputSink>) -> ExecutionSession<'_, C> {
        ExecutionSession::new(&self.channel, &self.registry, output)
    }

    /// Agent and server versions, fetched at most once per context.
    ///
    /// # Errors
    ///
    /// Returns a [`CliError::Transport`] if the first fetch fails; a failed
    /// fetch is not cached.
    pub async fn version(&self) -> Result<XdsVersion, CliError> {
        let mut cached = self.version.lock().await;
        if let Some(version) = cached.as_ref() {
            return Ok(version.clone());
        }
        let version: XdsVersion = transport::get(&self.channel, "/version").await?;
        *cached = Some(version.clone());
        Ok(version)
    }

    /// Drops the cached version.
    pub async fn invalidate_version(&self) {
        *self.version.lock().await = None;
    }

    /// Identifier of the active server, empty when unknown.
    pub async fn server_id(&self) -> String {
        match self.version().await {
            Ok(version) => version
                .servers
                .get(SERVER_INDEX)
                .map(|s| s.id.clone())
                .unwrap_or_default(),
            Err(e) => {
                debug!(error = %e, "server id unavailable");
                String::new()
            }
        }
    }

    /// Current agent configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`CliError::Transport`] if the request fails.
    pub async fn agent_config(&self) -> Result<AgentConfig, CliError> {
        Ok(transport::get(&self.channel, "/config").await?)
    }

    /// Pushes a new agent configuration and checks the active server is connected.
    ///
    /// # Errors
    ///
    /// Returns a [`CliError::Transport`] if the request fails and a
    /// [`CliError::Config`] if the server is still disconnected.
    pub async fn set_agent_config(&self, config: &AgentConfig) -> Result<AgentConfig, CliError> {
        self.invalidate_version().await;

        let updated: AgentConfig = transport::post(&self.channel, "/config", config).await?;
        let connected = updated
            .servers
            .get(SERVER_INDEX)
            .is_some_and(|s| s.connected);
        if !connected {
            let url = config
                .servers
                .get(SERVER_INDEX)
                .map(|s| s.url.as_str())
                .unwrap_or_default();
            return Err(CliError::Config(format!(
                "XDS server {url} still not connected"
            )));
        }
        Ok(updated)
    }

    /// Applies the `--url-server` override when it differs from the agent's
    /// current server or that server is disconnected.
    ///
    /// # Errors
    ///
    /// Returns an error if the agent config cannot be read or updated.
    pub async fn sync_server_url(&self) -> Result<(), CliError> {
        let mut agent_cfg = self
            .agent_config()
            .await
            .map_err(|e| CliError::Config(format!("ERROR while getting XDS config: {e}")))?;

        let Some(server_url) = self.config.server_url.as_deref() else {
            return Ok(());
        };
        let Some(server) = agent_cfg.servers.get_mut(SERVER_INDEX) else {
            return Err(CliError::Config("agent reports no XDS server".into()));
        };
        if server.url == server_url && server.connected {
            return Ok(());
        }

        info!(from = %server.url, to = %server_url, "updating XDS server URL");
        server.url = server_url.to_string();
        server.conn_retry = SERVER_CONN_RETRY;
        self.set_agent_config(&agent_cfg).await.map_err(|e| {
            CliError::Config(format!("ERROR while updating XDS server URL: {e}"))
        })?;
        Ok(())
    }

    /// Closes the event channel. Best-effort.
    pub async fn close(self) {
        debug!("closing IO.socket connection");
        if let Some(events) = self.events {
            events.close().await;
        }
        drop(self.channel_errors);
    }
}

/// Line printed for an event channel `error` notice.
fn channel_error_line(envelope: &EventEnvelope) -> Option<String> {
    match envelope.decode() {
        Ok(Some(EventPayload::Error(message))) => {
            warn!(%message, "event channel error");
            Some(format!("ERROR Websocket: {message}"))
        }
        _ => None,
    }
}
