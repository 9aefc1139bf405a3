use err_derive::Error;

/// Errors produced while executing or grading a submission.
///
/// Both the local sandbox and the remote service report failures through this
/// one type, so callers never need to know which path produced an error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecErr {
    #[error(display = "Sandbox unavailable: {}", _0)]
    SandboxUnavailable(String),

    #[error(display = "Sandbox is not ready")]
    SandboxNotReady,

    #[error(display = "Sandbox is busy with another execution")]
    SandboxBusy,

    #[error(display = "Sandbox has been disposed")]
    SandboxDisposed,

    #[error(display = "execution timed out")]
    ExecutionTimeout,

    #[error(display = "{}", _0)]
    InterpreterError(String),

    #[error(display = "Transport error: {}", _0)]
    TransportError(String),

    #[error(display = "Malformed response: {}", _0)]
    MalformedResponse(String),

    #[error(display = "Invalid test suite: {}", _0)]
    InvalidTestSuite(String),
}

impl ExecErr {
    /// Whether this error belongs to a single run of user code.
    ///
    /// Recoverable errors fail only the test case that produced them. Everything
    /// else aborts the whole grading call.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ExecErr::ExecutionTimeout | ExecErr::InterpreterError(_))
    }
}

impl From<reqwest::Error> for ExecErr {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ExecErr::MalformedResponse(e.to_string())
        } else {
            ExecErr::TransportError(e.to_string())
        }
    }
}

impl From<serde_json::Error> for ExecErr {
    fn from(e: serde_json::Error) -> Self {
        ExecErr::MalformedResponse(e.to_string())
    }
}

pub type ExecResult<T> = Result<T, ExecErr>;
