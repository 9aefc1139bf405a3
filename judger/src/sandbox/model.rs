use async_trait::async_trait;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use std::{borrow::Cow, sync::Arc, time::Duration};

use crate::util::duration;

/// Timeout applied when a request does not carry its own.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

/// A request to run a piece of code once.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub code: String,
    #[serde(default, with = "duration::option")]
    pub timeout: Option<Duration>,
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>) -> Self {
        ExecutionRequest {
            code: code.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout_or(&self, default: Duration) -> Duration {
        self.timeout.unwrap_or(default)
    }
}

/// Why a run did not succeed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    ExecutionTimeout,
    InterpreterError,
}

/// The canonical outcome of running code once, regardless of where it ran.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    #[serde(with = "duration")]
    pub duration: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
    /// Set when stdout or stderr hit its size limit and lost output.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub truncated: bool,
}

impl ExecutionResult {
    pub fn succeeded(stdout: String, stderr: String, duration: Duration) -> Self {
        ExecutionResult {
            stdout,
            stderr,
            success: true,
            duration,
            failure: None,
            truncated: false,
        }
    }

    pub fn failed(stdout: String, message: String, kind: FailureKind, duration: Duration) -> Self {
        ExecutionResult {
            stdout,
            stderr: message,
            success: false,
            duration,
            failure: Some(kind),
            truncated: false,
        }
    }

    pub fn with_truncated(mut self, truncated: bool) -> Self {
        self.truncated = truncated;
        self
    }

    pub fn timed_out(&self) -> bool {
        self.failure == Some(FailureKind::ExecutionTimeout)
    }
}

/// Limits applied to a single execution inside the sandbox.
#[derive(Debug, Clone, Builder)]
#[builder(setter(into))]
pub struct ExecOptions {
    #[builder(default = "DEFAULT_TIMEOUT")]
    pub timeout: Duration,

    #[builder(default = "100*1024")]
    pub stdout_size_limit: usize,

    #[builder(default = "100*1024")]
    pub stderr_size_limit: usize,
}

impl Default for ExecOptions {
    fn default() -> Self {
        ExecOptions {
            timeout: DEFAULT_TIMEOUT,
            stdout_size_limit: 100 * 1024,
            stderr_size_limit: 100 * 1024,
        }
    }
}

/// One capped output stream.
///
/// Raw bytes are kept as they arrive and decoded only when read, so a
/// character split across two pipe reads is never mangled.
#[derive(Debug, Clone)]
pub struct CaptureBuf {
    bytes: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl CaptureBuf {
    pub fn new(limit: usize) -> Self {
        CaptureBuf {
            bytes: Vec::new(),
            limit,
            truncated: false,
        }
    }

    /// Append `b`, dropping whatever would exceed the limit.
    pub fn write_bytes(&mut self, b: &[u8]) {
        if self.truncated {
            return;
        }
        let room = self.limit.saturating_sub(self.bytes.len());
        if b.len() <= room {
            self.bytes.extend_from_slice(b);
        } else {
            self.bytes.extend_from_slice(&b[..room]);
            self.truncated = true;
        }
    }

    pub fn write(&mut self, s: &str) {
        self.write_bytes(s.as_bytes())
    }

    /// The captured text. A character cut in half by the limit is dropped.
    pub fn text(&self) -> Cow<'_, str> {
        let end = match std::str::from_utf8(&self.bytes) {
            Err(e) if self.truncated && e.error_len().is_none() => e.valid_up_to(),
            _ => self.bytes.len(),
        };
        String::from_utf8_lossy(&self.bytes[..end])
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn into_string(self) -> String {
        self.text().into_owned()
    }
}

/// Output buffers installed for exactly one execution.
#[derive(Debug, Clone)]
pub struct OutputCapture {
    pub stdout: CaptureBuf,
    pub stderr: CaptureBuf,
}

impl OutputCapture {
    pub fn new(opt: &ExecOptions) -> Self {
        OutputCapture {
            stdout: CaptureBuf::new(opt.stdout_size_limit),
            stderr: CaptureBuf::new(opt.stderr_size_limit),
        }
    }
}

/// A loaded interpreter that can run code.
///
/// The sandbox never runs two pieces of code on the same interpreter at once,
/// so implementations may assume `run` calls do not overlap.
///
/// If the future returned by `run` is dropped before completion (timeout or
/// teardown), the implementation should stop the running code. Implementations
/// that cannot do so only get a best-effort timeout.
#[async_trait]
pub trait Interpreter: Send + Sync {
    /// The name of this interpreter, used in logs
    fn name(&self) -> Cow<'static, str>;

    /// Run `code`, writing everything it prints into `capture`.
    ///
    /// Errors raised by the code itself are returned as `Err` carrying the
    /// message shown to the learner.
    async fn run(&self, code: &str, capture: &mut OutputCapture) -> anyhow::Result<()>;

    /// Release any resource held by this interpreter. Must be idempotent.
    async fn shutdown(&self) {}
}

/// Something that can bring up an [`Interpreter`].
#[async_trait]
pub trait InterpreterLoader: Send + Sync {
    async fn load(&self) -> anyhow::Result<Arc<dyn Interpreter>>;
}
