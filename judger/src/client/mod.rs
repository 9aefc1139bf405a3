//! Client of the remote grading service.
//!
//! The service grades a whole submission on its side and may count every
//! submission it receives, so this client sends exactly one request per call
//! and never retries on its own.

pub mod model;

use std::time::{Duration, Instant};

use reqwest::Method;
use tracing::instrument;

use self::model::{SubmitAttemptRequest, SubmitAttemptResponse};
use crate::{
    config::RemoteConfig,
    err::{ExecErr, ExecResult},
};

/// Maximum number of body bytes echoed into a transport error.
const ERROR_BODY_PREVIEW: usize = 512;

#[derive(Debug, Clone)]
pub struct RemoteClient {
    client: reqwest::Client,
    endpoint: String,
    access_token: Option<String>,
}

impl RemoteClient {
    pub fn new(cfg: &RemoteConfig) -> ExecResult<RemoteClient> {
        let client = reqwest::Client::builder()
            .timeout(cfg.request_timeout)
            .build()
            .map_err(|e| ExecErr::TransportError(format!("Failed to build HTTP client: {}", e)))?;
        Ok(RemoteClient {
            client,
            endpoint: cfg.submit_endpoint(),
            access_token: cfg.access_token.clone(),
        })
    }

    /// Submit `code` once and return the raw response with the round trip time.
    #[instrument(skip(self, code), fields(endpoint = %self.endpoint))]
    pub async fn submit(&self, code: &str) -> ExecResult<(SubmitAttemptResponse, Duration)> {
        let body = SubmitAttemptRequest { code: code.into() };

        let mut req = self.client.request(Method::POST, &self.endpoint).json(&body);
        if let Some(token) = self.access_token.as_ref() {
            req = req.header("authorization", token);
        }

        let start = Instant::now();
        let res = req.send().await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            tracing::error!(status = status.as_u16(), "Remote grading failed");
            tracing::debug!("body: {}", body);
            let mut preview: String = body.chars().take(ERROR_BODY_PREVIEW).collect();
            if preview.len() < body.len() {
                preview.push_str("...");
            }
            return Err(ExecErr::TransportError(format!(
                "Remote service responded with status {}: {}",
                status.as_u16(),
                preview.trim()
            )));
        }

        let bytes = res.bytes().await?;
        let elapsed = start.elapsed();
        let parsed = serde_json::from_slice::<SubmitAttemptResponse>(&bytes)?;

        tracing::info!(
            score = parsed.score,
            passed = parsed.passed_tests.len(),
            failed = parsed.failed_tests.len(),
            ?elapsed,
            "Remote grading finished"
        );
        Ok((parsed, elapsed))
    }
}
