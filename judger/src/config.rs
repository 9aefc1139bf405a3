use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::{path::Path, str::FromStr, time::Duration};

use crate::{
    sandbox::model::{ExecOptions, DEFAULT_TIMEOUT},
    util::duration,
};

/// Which execution path the coordinator is allowed to take.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionPolicy {
    /// Run locally when the sandbox is ready, remotely otherwise.
    PreferLocal,
    /// Never touch the network.
    LocalOnly,
    /// Never use the local sandbox.
    RemoteOnly,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        ExecutionPolicy::PreferLocal
    }
}

impl FromStr for ExecutionPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prefer-local" => Ok(ExecutionPolicy::PreferLocal),
            "local-only" => Ok(ExecutionPolicy::LocalOnly),
            "remote-only" => Ok(ExecutionPolicy::RemoteOnly),
            _ => Err(anyhow::anyhow!(
                "Unknown policy `{}`, expected one of prefer-local, local-only, remote-only",
                s
            )),
        }
    }
}

/// Configuration of the whole judger, usually read from `judger.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct JudgerConfig {
    pub policy: ExecutionPolicy,
    pub sandbox: SandboxConfig,
    pub remote: Option<RemoteConfig>,
}

impl JudgerConfig {
    pub fn from_toml(s: &str) -> anyhow::Result<JudgerConfig> {
        toml::from_str(s).context("Failed to parse judger config")
    }

    pub async fn load(path: &Path) -> anyhow::Result<JudgerConfig> {
        let s = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// The interpreter executable.
    pub program: String,

    /// Arguments making the interpreter read its script from stdin.
    pub args: Vec<String>,

    /// Time limit of each execution, in milliseconds.
    #[serde(with = "duration")]
    pub timeout: Duration,

    /// Time allowed for bringing the interpreter up, in milliseconds.
    #[serde(with = "duration")]
    pub load_timeout: Duration,

    pub stdout_size_limit: usize,
    pub stderr_size_limit: usize,

    /// Address space of the interpreter process, in bytes.
    pub mem_limit: Option<u64>,

    /// CPU time of each execution, in milliseconds. Enforced by the kernel in
    /// whole seconds, on top of the wall-clock `timeout`.
    #[serde(with = "duration::option")]
    pub cpu_time_limit: Option<Duration>,

    /// Largest file the interpreter may write, in bytes.
    pub file_size_limit: Option<u64>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        SandboxConfig {
            program: "python3".into(),
            // isolated mode, script from stdin
            args: vec!["-I".into(), "-".into()],
            timeout: DEFAULT_TIMEOUT,
            load_timeout: Duration::from_secs(10),
            stdout_size_limit: 100 * 1024,
            stderr_size_limit: 100 * 1024,
            mem_limit: Some(256 * 1024 * 1024),
            cpu_time_limit: Some(Duration::from_secs(10)),
            file_size_limit: Some(1024 * 1024),
        }
    }
}

impl SandboxConfig {
    pub fn exec_options(&self) -> ExecOptions {
        ExecOptions {
            timeout: self.timeout,
            stdout_size_limit: self.stdout_size_limit,
            stderr_size_limit: self.stderr_size_limit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Host of the grading service, including port if needed.
    pub host: String,
    pub ssl: bool,
    pub mission_id: String,
    /// Opaque token identifying the submitting user. Sent as-is.
    pub access_token: Option<String>,
    #[serde(with = "duration")]
    pub request_timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        RemoteConfig {
            host: "".into(),
            ssl: true,
            mission_id: "".into(),
            access_token: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl RemoteConfig {
    pub fn submit_endpoint(&self) -> String {
        let scheme = if self.ssl { "https" } else { "http" };
        format!(
            "{}://{}/api/missions/{}/submit_attempt",
            scheme, self.host, self.mission_id
        )
    }
}
