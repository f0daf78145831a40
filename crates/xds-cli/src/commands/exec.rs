//! Remote command execution.
//!
//! `exec` runs a command inside a project on the XDS server and mirrors its
//! output locally. The process exits with the remote command's exit code.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tracing::{debug, info, warn};
use xds_proto::events::{EVT_EXEC_EXIT, EVT_EXEC_OUTPUT, EVT_PROJECT_CHANGE};
use xds_proto::{EventEnvelope, EventPayload, ExecResult, ProjectConfig};

use crate::cli;
use crate::config::{EffectiveConfig, ENV_PROJECT_ID, ENV_RPATH, ENV_SDK_ID};
use crate::context::XdsContext;
use crate::error::CliError;
use crate::rpath::resolve_rpath;
use crate::session::{OperationPlan, OutputChunk, OutputSink, Progress, TerminalResult};
use crate::transport::{self, Method, RequestChannel};

/// Extra wait after the remote timeout before giving up locally.
pub const EXIT_GRACE_SECS: u64 = 10;

/// Validated `exec` invocation.
#[derive(Debug, Clone)]
pub struct ExecCommand {
    request: xds_proto::ExecArgs,
}

impl ExecCommand {
    /// Builds the request from the command line and the effective config.
    ///
    /// # Errors
    ///
    /// Returns [`CliError::Validation`] when the project id or the command is
    /// missing, or an `--env` entry is not `KEY=VALUE`.
    pub fn from_args(args: &cli::ExecArgs, cfg: &EffectiveConfig) -> Result<Self, CliError> {
        let id = cfg
            .pick(args.id.as_deref(), ENV_PROJECT_ID)
            .unwrap_or_default();
        let (cmd, cmd_args) = match args.command.split_first() {
            Some((cmd, rest)) => (cmd.as_str(), rest.to_vec()),
            None => ("", Vec::new()),
        };

        let request = xds_proto::ExecArgs::new(id, cmd)
            .with_args(cmd_args)
            .with_sdk(cfg.pick(args.sdkid.as_deref(), ENV_SDK_ID).unwrap_or_default())
            .with_rpath(cfg.pick(args.rpath.as_deref(), ENV_RPATH).unwrap_or_default())
            .with_timeout(args.timeout.unwrap_or(cfg.timeout_secs));
        request.validate()?;

        let mut env = cfg.file_env();
        for entry in &args.env {
            check_env_entry(entry)?;
            env.push(entry.clone());
        }

        Ok(Self {
            request: request.with_env(env),
        })
    }

    /// Request as it will be submitted, before path auto-resolution.
    #[must_use]
    pub const fn request(&self) -> &xds_proto::ExecArgs {
        &self.request
    }

    /// Runs the command from the process working directory.
    ///
    /// # Errors
    ///
    /// Returns the error matching the session outcome.
    pub async fn execute<C: RequestChannel>(
        &self,
        ctx: &XdsContext<C>,
        output: Arc<OutputSink>,
    ) -> Result<(), CliError> {
        let cwd = std::env::current_dir()
            .ok()
            .map(|p| p.to_string_lossy().into_owned());
        self.execute_in(ctx, output, cwd.as_deref()).await
    }

    /// Runs the command as if started from `cwd`.
    ///
    /// # Errors
    ///
    /// Returns a [`CliError::Transport`] if the project cannot be fetched,
    /// otherwise the error matching the session outcome.
    pub async fn execute_in<C: RequestChannel>(
        &self,
        ctx: &XdsContext<C>,
        output: Arc<OutputSink>,
        cwd: Option<&str>,
    ) -> Result<(), CliError> {
        info!(cmd = %self.request.cmd, args = ?self.request.args, "execute");

        let project: ProjectConfig =
            transport::get(ctx.channel(), &format!("/projects/{}", self.request.id)).await?;

        let mut request = self.request.clone();
        if request.rpath.is_empty() {
            if let Some(cwd) = cwd {
                request.rpath = resolve_rpath(cwd, &project.client_path);
                debug!(%cwd, client_path = %project.client_path, rpath = %request.rpath, "auto rpath");
            }
        }

        let plan = exec_plan(&request)?;
        ctx.session(output).run(plan).await.into_result()
    }
}

fn check_env_entry(entry: &str) -> Result<(), CliError> {
    match entry.split_once('=') {
        Some((key, _)) if !key.trim().is_empty() => Ok(()),
        _ => Err(CliError::Validation(format!(
            "invalid environment entry \"{entry}\", expected KEY=VALUE"
        ))),
    }
}

/// Operation plan for `POST /exec`.
///
/// # Errors
///
/// Returns [`CliError::Format`] if the request cannot be encoded.
pub fn exec_plan(request: &xds_proto::ExecArgs) -> Result<OperationPlan, CliError> {
    let body = serde_json::to_value(request)
        .map_err(|e| CliError::Format(format!("cannot encode exec request: {e}")))?;

    let cmd_id: Arc<OnceLock<String>> = Arc::new(OnceLock::new());
    let expected = Arc::clone(&cmd_id);

    Ok(OperationPlan::new("exec", Method::Post, "/exec")
        .with_body(body)
        .interpret(EVT_EXEC_OUTPUT, exec_output)
        .interpret(EVT_EXEC_EXIT, move |envelope| {
            exec_exit(envelope, expected.get().map(String::as_str))
        })
        .interpret(EVT_PROJECT_CHANGE, project_change)
        .register_remote(EVT_PROJECT_CHANGE)
        .with_timeout(Duration::from_secs(
            request.cmd_timeout.saturating_add(EXIT_GRACE_SECS),
        ))
        .on_submitted(move |response, _| {
            match serde_json::from_value::<ExecResult>(response.clone()) {
                Ok(result) if !result.cmd_id.is_empty() => {
                    debug!(cmd_id = %result.cmd_id, status = %result.status, "command started");
                    // Only this hook sets the id.
                    let _ = cmd_id.set(result.cmd_id);
                }
                Ok(_) => debug!("no command id in exec response"),
                Err(e) => debug!(error = %e, "unexpected exec response"),
            }
        }))
}

fn exec_output(envelope: &EventEnvelope) -> Progress {
    match envelope.decode() {
        Ok(Some(EventPayload::ExecOutput(msg))) => Progress {
            output: Some(OutputChunk {
                timestamp: if msg.timestamp.is_empty() {
                    envelope.time.clone()
                } else {
                    msg.timestamp
                },
                stdout: msg.stdout,
                stderr: msg.stderr,
            }),
            terminal: None,
        },
        other => {
            warn!(result = ?other, "undecodable output event");
            Progress::default()
        }
    }
}

fn exec_exit(envelope: &EventEnvelope, expected: Option<&str>) -> Progress {
    match envelope.decode() {
        Ok(Some(EventPayload::ExecExit(msg))) => {
            if let Some(expected) = expected {
                if !msg.cmd_id.is_empty() && msg.cmd_id != expected {
                    debug!(cmd_id = %msg.cmd_id, %expected, "exit of another command ignored");
                    return Progress::default();
                }
            }
            Progress {
                output: None,
                terminal: Some(TerminalResult::exited(msg.code, msg.error)),
            }
        }
        other => {
            warn!(result = ?other, "undecodable exit event");
            Progress::default()
        }
    }
}

fn project_change(envelope: &EventEnvelope) -> Progress {
    if let Ok(Some(EventPayload::ProjectChange(prj))) = envelope.decode() {
        info!(
            time = %envelope.time,
            id = %prj.id,
            status = %prj.status,
            in_sync = prj.is_in_sync,
            "project state change"
        );
    }
    Progress::default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::GlobalFlags;
    use crate::registry::EventRegistry;
    use crate::session::testing::{FakeChannel, SharedBuf};
    use crate::transport::TransportError;
    use serde_json::json;
    use std::collections::HashMap;

    fn cfg() -> EffectiveConfig {
        EffectiveConfig::resolve(&GlobalFlags::default(), &HashMap::new()).unwrap()
    }

    fn args(id: &str, command: &[&str]) -> cli::ExecArgs {
        cli::ExecArgs {
            id: Some(id.to_string()),
            command: command.iter().map(ToString::to_string).collect(),
            ..cli::ExecArgs::default()
        }
    }

    fn sink() -> (Arc<OutputSink>, SharedBuf, SharedBuf) {
        let out = SharedBuf::default();
        let err = SharedBuf::default();
        let sink = OutputSink::new(Box::new(out.clone()), Box::new(err.clone()), false);
        (Arc::new(sink), out, err)
    }

    fn project_answer() -> Result<serde_json::Value, TransportError> {
        Ok(json!({"id": "prj-1", "label": "myproj", "clientPath": "myproj", "type": "PathMap"}))
    }

    fn context(channel: FakeChannel, registry: Arc<EventRegistry>) -> XdsContext<FakeChannel> {
        XdsContext::with_channel(channel, registry, cfg())
    }

    #[test]
    fn missing_project_id_is_rejected() {
        let err = ExecCommand::from_args(&cli::ExecArgs::default(), &cfg()).unwrap_err();
        assert!(err.to_string().contains("project id must be set"));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn empty_command_is_rejected() {
        let err = ExecCommand::from_args(&args("prj-1", &[]), &cfg()).unwrap_err();
        assert!(matches!(err, CliError::Validation(_)));

        let err = ExecCommand::from_args(&args("prj-1", &["  "]), &cfg()).unwrap_err();
        assert!(matches!(err, CliError::Validation(_)));
    }

    #[test]
    fn malformed_env_entry_is_rejected() {
        let mut a = args("prj-1", &["make"]);
        a.env = vec!["NOEQUALS".into()];
        let err = ExecCommand::from_args(&a, &cfg()).unwrap_err();
        assert!(err.to_string().contains("KEY=VALUE"));
    }

    #[test]
    fn request_takes_options_from_environment() {
        let env: HashMap<String, String> = [
            (ENV_PROJECT_ID.to_string(), "prj-env".to_string()),
            (ENV_SDK_ID.to_string(), "sdk-env".to_string()),
            ("XDS_TIMEOUT".to_string(), "30".to_string()),
        ]
        .into();
        let cfg = EffectiveConfig::resolve(&GlobalFlags::default(), &env).unwrap();
        let a = cli::ExecArgs {
            command: vec!["make".into(), "-j4".into()],
            env: vec!["A=1".into()],
            ..cli::ExecArgs::default()
        };

        let cmd = ExecCommand::from_args(&a, &cfg).unwrap();
        let req = cmd.request();
        assert_eq!(req.id, "prj-env");
        assert_eq!(req.sdk_id, "sdk-env");
        assert_eq!(req.cmd, "make");
        assert_eq!(req.args, vec!["-j4"]);
        assert_eq!(req.env, vec!["A=1"]);
        assert_eq!(req.cmd_timeout, 30);
    }

    #[tokio::test]
    async fn success_prints_output_and_exits_zero() {
        let registry = EventRegistry::new();
        let channel = FakeChannel::with_registry(Arc::clone(&registry))
            .answer("/projects/prj-1", project_answer())
            .react("/exec", |reg| {
                reg.dispatch(&EventEnvelope::new(EVT_EXEC_OUTPUT, json!({"stdout": "hi\n"})));
                reg.dispatch(&EventEnvelope::new(EVT_EXEC_EXIT, json!({"code": 0})));
            });
        let ctx = context(channel, registry);
        let (sink, out, err) = sink();

        let cmd = ExecCommand::from_args(&args("prj-1", &["echo", "hi"]), &cfg()).unwrap();
        cmd.execute_in(&ctx, sink, None).await.unwrap();

        assert_eq!(out.contents(), "hi\n");
        assert_eq!(err.contents(), "");
    }

    #[tokio::test]
    async fn remote_failure_passes_code_and_message_through() {
        let registry = EventRegistry::new();
        let channel = FakeChannel::with_registry(Arc::clone(&registry))
            .answer("/projects/prj-1", project_answer())
            .react("/exec", |reg| {
                reg.dispatch(&EventEnvelope::new(
                    EVT_EXEC_EXIT,
                    json!({"code": 3, "error": "build failed"}),
                ));
            });
        let ctx = context(channel, registry);
        let (sink, _, _) = sink();

        let cmd = ExecCommand::from_args(&args("prj-1", &["make"]), &cfg()).unwrap();
        let err = cmd.execute_in(&ctx, sink, None).await.unwrap_err();

        assert_eq!(err.exit_code(), 3);
        assert_eq!(err.to_string(), "build failed");
    }

    #[tokio::test]
    async fn disconnection_exits_with_two() {
        let registry = EventRegistry::new();
        let channel = FakeChannel::with_registry(Arc::clone(&registry))
            .answer("/projects/prj-1", project_answer())
            .react("/exec", |reg| {
                reg.dispatch(&EventEnvelope::disconnection("connection reset"));
            });
        let ctx = context(channel, registry);
        let (sink, _, _) = sink();

        let cmd = ExecCommand::from_args(&args("prj-1", &["make"]), &cfg()).unwrap();
        let err = cmd.execute_in(&ctx, sink, None).await.unwrap_err();

        assert_eq!(err.exit_code(), 2);
        assert!(matches!(err, CliError::TransportLost(_)));
    }

    #[tokio::test]
    async fn rpath_is_resolved_from_working_directory() {
        let registry = EventRegistry::new();
        let channel = FakeChannel::with_registry(Arc::clone(&registry))
            .answer("/projects/prj-1", project_answer())
            .react("/exec", |reg| {
                reg.dispatch(&EventEnvelope::new(EVT_EXEC_EXIT, json!({"code": 0})));
            });
        let ctx = context(channel, registry);
        let (sink, _, _) = sink();

        let cmd = ExecCommand::from_args(&args("prj-1", &["make"]), &cfg()).unwrap();
        cmd.execute_in(&ctx, sink, Some("/home/u/ws/myproj/src"))
            .await
            .unwrap();

        let calls = ctx.channel().calls.lock();
        let (_, path, body) = calls.last().unwrap();
        assert_eq!(path, "/exec");
        assert_eq!(body.as_ref().unwrap()["rpath"], "src");
    }

    #[tokio::test]
    async fn explicit_rpath_is_kept() {
        let registry = EventRegistry::new();
        let channel = FakeChannel::with_registry(Arc::clone(&registry))
            .answer("/projects/prj-1", project_answer())
            .react("/exec", |reg| {
                reg.dispatch(&EventEnvelope::new(EVT_EXEC_EXIT, json!({"code": 0})));
            });
        let ctx = context(channel, registry);
        let (sink, _, _) = sink();

        let mut a = args("prj-1", &["make"]);
        a.rpath = Some("lib".into());
        let cmd = ExecCommand::from_args(&a, &cfg()).unwrap();
        cmd.execute_in(&ctx, sink, Some("/home/u/ws/myproj/src"))
            .await
            .unwrap();

        let calls = ctx.channel().calls.lock();
        assert_eq!(calls.last().unwrap().2.as_ref().unwrap()["rpath"], "lib");
    }

    #[tokio::test]
    async fn project_change_is_registered_before_submission() {
        let registry = EventRegistry::new();
        let channel = FakeChannel::with_registry(Arc::clone(&registry))
            .answer("/projects/prj-1", project_answer())
            .react("/exec", |reg| {
                reg.dispatch(&EventEnvelope::new(
                    EVT_PROJECT_CHANGE,
                    json!({"id": "prj-1", "status": "Sync"}),
                ));
                reg.dispatch(&EventEnvelope::new(EVT_EXEC_EXIT, json!({"code": 0})));
            });
        let ctx = context(channel, registry);
        let (sink, _, _) = sink();

        let cmd = ExecCommand::from_args(&args("prj-1", &["make"]), &cfg()).unwrap();
        cmd.execute_in(&ctx, sink, None).await.unwrap();

        assert_eq!(
            ctx.channel().paths(),
            vec!["/projects/prj-1", "/events/register", "/exec"]
        );
    }

    #[test]
    fn exit_of_another_command_is_ignored() {
        let env = EventEnvelope::new(EVT_EXEC_EXIT, json!({"cmdID": "other", "code": 5}));
        assert_eq!(exec_exit(&env, Some("mine")), Progress::default());

        let env = EventEnvelope::new(EVT_EXEC_EXIT, json!({"cmdID": "mine", "code": 5}));
        assert_eq!(
            exec_exit(&env, Some("mine")).terminal,
            Some(TerminalResult::exited(5, ""))
        );
    }

    #[test]
    fn exit_before_submission_response_is_accepted() {
        let env = EventEnvelope::new(EVT_EXEC_EXIT, json!({"cmdID": "any", "code": 0}));
        assert!(exec_exit(&env, None).terminal.is_some());
    }

    #[test]
    fn soft_timeout_includes_grace() {
        let request = xds_proto::ExecArgs::new("prj-1", "make").with_timeout(60);
        let plan = exec_plan(&request).unwrap();
        assert_eq!(plan.timeout, Some(Duration::from_secs(70)));
        assert_eq!(plan.remote_events, vec![EVT_PROJECT_CHANGE]);
    }
}
