//! Remote execution session.
//!
//! One session drives one remote operation to exactly one
//! [`TerminalResult`]:
//!
//! ```text
//! Idle ──subscribe──► Registered ──submit──► Submitted ──► Streaming ──► Resolved
//!   │                     │                     │                          ▲
//!   │                     └── register failed ─┴── submit failed ─────────┤
//!   │                                                                       │
//!   └───────── exit notice | disconnection | soft timeout (first wins) ────┘
//! ```
//!
//! Handlers are attached, and remote registrations acknowledged, before the
//! request goes out, so no event emitted right after submission is lost.
//! Every candidate outcome is offered to a [`ResultSlot`]; only the first
//! offer is kept.

use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};
use xds_proto::events::SYS_DISCONNECTION;
use xds_proto::{EventEnvelope, EventPayload, EventRegisterArgs};

use crate::error::CliError;
use crate::registry::{EventRegistry, Subscription};
use crate::transport::{self, Method, RequestChannel};

/// Exit code reported when the event channel is lost mid-operation.
pub const DISCONNECTED_EXIT_CODE: i32 = 2;

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing attached yet.
    Idle,
    /// Handlers attached and remote registrations acknowledged.
    Registered,
    /// Request accepted by the agent.
    Submitted,
    /// Waiting for a terminal event.
    Streaming,
    /// Terminal result decided.
    Resolved,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What decided a session's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCause {
    /// The remote operation reported termination.
    Exited,
    /// The event channel dropped.
    Disconnected,
    /// No terminal event before the soft timeout.
    TimedOut,
    /// Registration or submission failed.
    SubmitFailed,
}

/// The single outcome of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalResult {
    /// Exit code.
    pub exit_code: i32,
    /// Error message, empty when none.
    pub error: String,
    /// What produced this result.
    pub cause: ResultCause,
}

impl TerminalResult {
    /// Result reported by the remote operation.
    #[must_use]
    pub fn exited(exit_code: i32, error: impl Into<String>) -> Self {
        Self {
            exit_code,
            error: error.into(),
            cause: ResultCause::Exited,
        }
    }

    /// Event channel lost.
    #[must_use]
    pub fn disconnected(cause: impl Into<String>) -> Self {
        Self {
            exit_code: DISCONNECTED_EXIT_CODE,
            error: cause.into(),
            cause: ResultCause::Disconnected,
        }
    }

    /// Soft timeout expired.
    #[must_use]
    pub fn timed_out() -> Self {
        Self {
            exit_code: 1,
            error: "timeout".into(),
            cause: ResultCause::TimedOut,
        }
    }

    /// Request could not be registered or submitted.
    #[must_use]
    pub fn submit_failed(error: impl Into<String>) -> Self {
        Self {
            exit_code: 1,
            error: error.into(),
            cause: ResultCause::SubmitFailed,
        }
    }

    /// Converts to the command result.
    ///
    /// A zero exit code is success even when an error message is present.
    ///
    /// # Errors
    ///
    /// Returns the [`CliError`] matching a non-zero outcome.
    pub fn into_result(self) -> Result<(), CliError> {
        if self.exit_code == 0 {
            return Ok(());
        }
        Err(match self.cause {
            ResultCause::Disconnected => CliError::TransportLost(self.error),
            ResultCause::TimedOut => CliError::Timeout,
            ResultCause::Exited | ResultCause::SubmitFailed => CliError::Remote {
                code: self.exit_code,
                message: self.error,
            },
        })
    }
}

/// Single-assignment result cell: the first [`ResultSlot::try_fill`] wins.
#[derive(Debug)]
pub struct ResultSlot<T> {
    tx: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> ResultSlot<T> {
    /// Creates a slot and the receiver that observes its value.
    #[must_use]
    pub fn channel() -> (Arc<Self>, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        (
            Arc::new(Self {
                tx: Mutex::new(Some(tx)),
            }),
            rx,
        )
    }

    /// Stores `value` if the slot is still empty. Returns whether it was stored.
    pub fn try_fill(&self, value: T) -> bool {
        match self.tx.lock().take() {
            Some(tx) => tx.send(value).is_ok(),
            None => false,
        }
    }

    /// Whether a value has already been offered.
    #[must_use]
    pub fn is_filled(&self) -> bool {
        self.tx.lock().is_none()
    }
}

/// Output text carried by an event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputChunk {
    /// Event timestamp, used for the optional prefix.
    pub timestamp: String,
    /// Text for standard output.
    pub stdout: String,
    /// Text for standard error.
    pub stderr: String,
}

/// What one event contributes to a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Progress {
    /// Output to print immediately.
    pub output: Option<OutputChunk>,
    /// Candidate terminal result.
    pub terminal: Option<TerminalResult>,
}

/// Maps one envelope to its contribution.
pub type Interpreter = Arc<dyn Fn(&EventEnvelope) -> Progress + Send + Sync>;

/// Called with the submission response before waiting.
pub type SubmitHook = Box<dyn FnOnce(&Value, &OutputSink) + Send>;

/// Everything a session needs to run one operation.
pub struct OperationPlan {
    /// Label used in logs.
    pub name: String,
    /// Submission method.
    pub method: Method,
    /// Submission path, relative to the API prefix.
    pub path: String,
    /// Submission body.
    pub body: Option<Value>,
    /// Event types observed locally, each with its interpreter.
    pub interpreters: Vec<(String, Interpreter)>,
    /// Event types the agent must forward, registered before submission.
    pub remote_events: Vec<String>,
    /// Soft timeout; `None` waits until an exit or disconnection.
    pub timeout: Option<Duration>,
    /// Hook run on the submission response.
    pub on_submitted: Option<SubmitHook>,
}

impl fmt::Debug for OperationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationPlan")
            .field("name", &self.name)
            .field("method", &self.method)
            .field("path", &self.path)
            .field(
                "interpreters",
                &self.interpreters.iter().map(|(t, _)| t).collect::<Vec<_>>(),
            )
            .field("remote_events", &self.remote_events)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl OperationPlan {
    /// Plan submitting `body` with `method` to `path`.
    #[must_use]
    pub fn new(name: impl Into<String>, method: Method, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            method,
            path: path.into(),
            body: None,
            interpreters: Vec::new(),
            remote_events: Vec::new(),
            timeout: None,
            on_submitted: None,
        }
    }

    /// Sets the request body.
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Interprets events of `event_type`.
    #[must_use]
    pub fn interpret<F>(mut self, event_type: &str, interpreter: F) -> Self
    where
        F: Fn(&EventEnvelope) -> Progress + Send + Sync + 'static,
    {
        self.interpreters
            .push((event_type.to_string(), Arc::new(interpreter)));
        self
    }

    /// Asks the agent to forward `event_type` before submission.
    #[must_use]
    pub fn register_remote(mut self, event_type: &str) -> Self {
        self.remote_events.push(event_type.to_string());
        self
    }

    /// Sets the soft timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Runs `hook` on the submission response.
    #[must_use]
    pub fn on_submitted<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&Value, &OutputSink) + Send + 'static,
    {
        self.on_submitted = Some(Box::new(hook));
        self
    }
}

/// Destination for operation output.
pub struct OutputSink {
    stdout: Mutex<Box<dyn Write + Send>>,
    stderr: Mutex<Box<dyn Write + Send>>,
    timestamp: bool,
}

impl fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputSink")
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}

impl OutputSink {
    /// Sink writing to the given streams.
    #[must_use]
    pub fn new(
        stdout: Box<dyn Write + Send>,
        stderr: Box<dyn Write + Send>,
        timestamp: bool,
    ) -> Self {
        Self {
            stdout: Mutex::new(stdout),
            stderr: Mutex::new(stderr),
            timestamp,
        }
    }

    /// Sink writing to the process standard streams.
    #[must_use]
    pub fn stdio(timestamp: bool) -> Self {
        Self::new(Box::new(io::stdout()), Box::new(io::stderr()), timestamp)
    }

    /// Writes one chunk, prefixed with `"<timestamp>| "` in timestamp mode.
    pub fn write_chunk(&self, chunk: &OutputChunk) {
        let prefix = if self.timestamp {
            format!("{}| ", chunk.timestamp)
        } else {
            String::new()
        };
        if !chunk.stdout.is_empty() {
            Self::emit(&self.stdout, &format!("{prefix}{}", chunk.stdout));
        }
        if !chunk.stderr.is_empty() {
            Self::emit(&self.stderr, &format!("{prefix}{}", chunk.stderr));
        }
    }

    /// Writes one line to standard output.
    pub fn println(&self, line: &str) {
        Self::emit(&self.stdout, &format!("{line}\n"));
    }

    /// Writes one line to standard error.
    pub fn eprintln(&self, line: &str) {
        Self::emit(&self.stderr, &format!("{line}\n"));
    }

    fn emit(stream: &Mutex<Box<dyn Write + Send>>, text: &str) {
        let mut stream = stream.lock();
        if let Err(e) = stream.write_all(text.as_bytes()).and_then(|()| stream.flush()) {
            warn!(error = %e, "output write failed");
        }
    }
}

/// Orchestrates one remote operation.
pub struct ExecutionSession<'a, C> {
    channel: &'a C,
    registry: &'a Arc<EventRegistry>,
    output: Arc<OutputSink>,
    state: SessionState,
}

impl<C> fmt::Debug for ExecutionSession<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionSession")
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl<'a, C: RequestChannel> ExecutionSession<'a, C> {
    /// New session in the [`SessionState::Idle`] state.
    #[must_use]
    pub fn new(channel: &'a C, registry: &'a Arc<EventRegistry>, output: Arc<OutputSink>) -> Self {
        Self {
            channel,
            registry,
            output,
            state: SessionState::Idle,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = %self.state, to = %next, "session state");
        self.state = next;
    }

    /// Runs `plan` to its terminal result.
    pub async fn run(mut self, plan: OperationPlan) -> TerminalResult {
        let OperationPlan {
            name,
            method,
            path,
            body,
            interpreters,
            remote_events,
            timeout,
            on_submitted,
        } = plan;
        debug!(operation = %name, %method, %path, "session start");

        let (slot, rx) = ResultSlot::channel();
        let _subscriptions = self.attach(interpreters, &slot);

        for event in &remote_events {
            let args = EventRegisterArgs::new(event.as_str());
            if let Err(e) =
                transport::post::<_, _, Value>(self.channel, "/events/register", &args).await
            {
                return self.resolve(TerminalResult::submit_failed(e.to_string()));
            }
            debug!(event = %event, "event registered on agent");
        }
        self.transition(SessionState::Registered);

        let response = match self.channel.call(method, &path, body).await {
            Ok(response) => response,
            Err(e) => return self.resolve(TerminalResult::submit_failed(e.to_string())),
        };
        self.transition(SessionState::Submitted);
        if let Some(hook) = on_submitted {
            hook(&response, &self.output);
        }

        self.transition(SessionState::Streaming);
        let waited = match timeout {
            Some(limit) => tokio::time::timeout(limit, rx).await.ok(),
            None => Some(rx.await),
        };
        let result = match waited {
            Some(Ok(result)) => result,
            Some(Err(_)) => TerminalResult::disconnected("session aborted"),
            None => TerminalResult::timed_out(),
        };
        self.resolve(result)
    }

    fn attach(
        &self,
        interpreters: Vec<(String, Interpreter)>,
        slot: &Arc<ResultSlot<TerminalResult>>,
    ) -> Vec<Subscription> {
        let mut subscriptions = Vec::with_capacity(interpreters.len() + 1);

        for (event_type, interpreter) in interpreters {
            let output = Arc::clone(&self.output);
            let slot = Arc::clone(slot);
            subscriptions.push(self.registry.subscribe(&event_type, move |envelope| {
                let progress = interpreter(envelope);
                if let Some(chunk) = &progress.output {
                    output.write_chunk(chunk);
                }
                if let Some(terminal) = progress.terminal {
                    offer(&slot, terminal);
                }
            }));
        }

        let slot = Arc::clone(slot);
        subscriptions.push(self.registry.subscribe(SYS_DISCONNECTION, move |envelope| {
            let cause = match envelope.decode() {
                Ok(Some(EventPayload::Disconnection(notice))) => notice.cause,
                _ => String::new(),
            };
            debug!(%cause, "disconnection event");
            offer(&slot, TerminalResult::disconnected(cause));
        }));

        subscriptions
    }

    fn resolve(mut self, result: TerminalResult) -> TerminalResult {
        self.transition(SessionState::Resolved);
        debug!(
            exit_code = result.exit_code,
            cause = ?result.cause,
            error = %result.error,
            "session resolved"
        );
        if result.exit_code == 0 && !result.error.is_empty() {
            self.output.eprintln(&result.error);
        }
        result
    }
}

fn offer(slot: &ResultSlot<TerminalResult>, result: TerminalResult) {
    let cause = result.cause;
    if !slot.try_fill(result) {
        debug!(?cause, "late terminal event ignored");
    }
}
