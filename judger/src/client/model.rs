//! Wire types of the remote grading service.

use serde::{Deserialize, Serialize};

/// Body of `POST /api/missions/{id}/submit_attempt`.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct SubmitAttemptRequest {
    pub code: String,
}

/// Response of the remote service, exactly as sent over the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmitAttemptResponse {
    pub score: f64,
    pub passed_tests: Vec<String>,
    pub failed_tests: Vec<String>,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub next_hint: Option<String>,
}
