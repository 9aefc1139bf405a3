//! Choosing where code runs.

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::{
    client::{model::SubmitAttemptResponse, RemoteClient},
    config::{ExecutionPolicy, JudgerConfig},
    err::{ExecErr, ExecResult},
    normalize::{normalize_execution, RawExecution},
    sandbox::{
        process::ProcessLoader, ExecutionRequest, ExecutionResult, SandboxManager, SandboxState,
    },
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionPath {
    Local,
    Remote,
}

/// Single entry point for running code, hiding whether it runs in the local
/// sandbox or on the remote grading service.
///
/// Each coordinator owns its own sandbox, so sessions never share an
/// interpreter.
#[derive(Debug)]
pub struct Coordinator {
    sandbox: SandboxManager,
    remote: Option<RemoteClient>,
    policy: ExecutionPolicy,
}

impl Coordinator {
    pub fn new(
        sandbox: SandboxManager,
        remote: Option<RemoteClient>,
        policy: ExecutionPolicy,
    ) -> anyhow::Result<Coordinator> {
        if policy == ExecutionPolicy::RemoteOnly && remote.is_none() {
            anyhow::bail!("Policy `remote-only` requires a [remote] section");
        }
        Ok(Coordinator {
            sandbox,
            remote,
            policy,
        })
    }

    /// Build a coordinator backed by an interpreter subprocess.
    pub fn from_config(cfg: &JudgerConfig) -> anyhow::Result<Coordinator> {
        let loader = Arc::new(ProcessLoader::from(&cfg.sandbox));
        let sandbox = SandboxManager::new(loader, cfg.sandbox.exec_options());
        let remote = cfg.remote.as_ref().map(RemoteClient::new).transpose()?;
        Self::new(sandbox, remote, cfg.policy)
    }

    pub fn sandbox(&self) -> &SandboxManager {
        &self.sandbox
    }

    pub fn policy(&self) -> ExecutionPolicy {
        self.policy
    }

    pub fn default_timeout(&self) -> Duration {
        self.sandbox.options().timeout
    }

    /// Bring the local sandbox up. Does nothing under `remote-only`.
    pub async fn initialize(&self) -> ExecResult<()> {
        if self.policy == ExecutionPolicy::RemoteOnly {
            return Ok(());
        }
        self.sandbox.initialize().await
    }

    pub async fn dispose(&self) {
        self.sandbox.dispose().await
    }

    /// Decide which path the next call takes. Never touches the network.
    pub fn select_path(&self) -> ExecResult<ExecutionPath> {
        let state = self.sandbox.state();
        if state == SandboxState::Disposed {
            return Err(ExecErr::SandboxDisposed);
        }
        let path = match self.policy {
            ExecutionPolicy::RemoteOnly => self.remote_path()?,
            _ if state == SandboxState::Ready => ExecutionPath::Local,
            ExecutionPolicy::PreferLocal if self.remote.is_some() => ExecutionPath::Remote,
            _ => return Err(ExecErr::SandboxNotReady),
        };
        tracing::debug!(?path, ?state, policy = ?self.policy, "Selected execution path");
        Ok(path)
    }

    fn remote_path(&self) -> ExecResult<ExecutionPath> {
        match self.remote {
            Some(_) => Ok(ExecutionPath::Remote),
            None => Err(no_remote()),
        }
    }

    /// Run `code` once on whichever path the policy allows.
    pub async fn run(&self, code: &str) -> ExecResult<ExecutionResult> {
        let path = self.select_path()?;
        self.run_with(path, &ExecutionRequest::new(code)).await
    }

    /// Run `req` on an already chosen path. A local failure is reported as
    /// is, never retried remotely.
    #[instrument(skip(self, req), fields(code_len = req.code.len()))]
    pub async fn run_with(
        &self,
        path: ExecutionPath,
        req: &ExecutionRequest,
    ) -> ExecResult<ExecutionResult> {
        let raw = match path {
            ExecutionPath::Local => {
                let timeout = req.timeout_or(self.default_timeout());
                RawExecution::Local(self.sandbox.execute(&req.code, timeout).await?)
            }
            ExecutionPath::Remote => {
                let (res, elapsed) = self.submit_remote(&req.code).await?;
                RawExecution::Remote(res, elapsed)
            }
        };
        Ok(normalize_execution(raw))
    }

    /// Submit a whole submission to the remote service once.
    pub async fn submit_remote(&self, code: &str) -> ExecResult<(SubmitAttemptResponse, Duration)> {
        let remote = self.remote.as_ref().ok_or_else(no_remote)?;
        remote.submit(code).await
    }
}

fn no_remote() -> ExecErr {
    ExecErr::TransportError("no remote grading service configured".into())
}
