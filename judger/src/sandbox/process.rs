//! Interpreter backend that runs each piece of code in a fresh child process.
//!
//! The child is spawned with `kill_on_drop`, so dropping a run (timeout or
//! teardown) kills the process instead of leaving it running. On unix it also
//! runs under the rlimits in [`ResourceLimits`].

use std::{borrow::Cow, process::ExitStatus, process::Stdio, sync::Arc, time::Duration};

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    process::Command,
};

#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;

use super::model::{CaptureBuf, Interpreter, InterpreterLoader, OutputCapture};
use crate::config::SandboxConfig;

const READ_CHUNK: usize = 4096;

/// Kernel-enforced limits of every child process. `None` leaves a limit as
/// inherited from the judger.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct ResourceLimits {
    /// Address space, in bytes
    pub mem_limit: Option<u64>,
    /// CPU time, rounded up to whole seconds
    pub cpu_time_limit: Option<Duration>,
    /// Largest file the child may write, in bytes
    pub file_size_limit: Option<u64>,
}

impl ResourceLimits {
    fn cpu_seconds(&self) -> Option<u64> {
        self.cpu_time_limit
            .map(|d| (d.as_millis() as u64 + 999) / 1000)
            .map(|secs| secs.max(1))
    }
}

impl From<&SandboxConfig> for ResourceLimits {
    fn from(cfg: &SandboxConfig) -> Self {
        ResourceLimits {
            mem_limit: cfg.mem_limit,
            cpu_time_limit: cfg.cpu_time_limit,
            file_size_limit: cfg.file_size_limit,
        }
    }
}

/// Loads an interpreter executable such as `python3`.
#[derive(Debug, Clone)]
pub struct ProcessLoader {
    program: String,
    args: Vec<String>,
    load_timeout: Duration,
    limits: ResourceLimits,
}

impl ProcessLoader {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        ProcessLoader {
            program: program.into(),
            args,
            load_timeout: Duration::from_secs(10),
            limits: ResourceLimits::default(),
        }
    }

    pub fn load_timeout(mut self, timeout: Duration) -> Self {
        self.load_timeout = timeout;
        self
    }

    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }
}

impl From<&SandboxConfig> for ProcessLoader {
    fn from(cfg: &SandboxConfig) -> Self {
        ProcessLoader::new(cfg.program.clone(), cfg.args.clone())
            .load_timeout(cfg.load_timeout)
            .limits(ResourceLimits::from(cfg))
    }
}

#[async_trait]
impl InterpreterLoader for ProcessLoader {
    /// Check that the interpreter can be started at all.
    async fn load(&self) -> anyhow::Result<Arc<dyn Interpreter>> {
        let version_cmd = Command::new(&self.program)
            .arg("--version")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.load_timeout, version_cmd)
            .await
            .map_err(|_| anyhow!("`{}` did not start in time", self.program))?
            .with_context(|| format!("Failed to start `{}`", self.program))?;

        if !output.status.success() {
            return Err(anyhow!(
                "`{} --version` failed: {}",
                self.program,
                describe_status(output.status)
            ));
        }

        // Python 2 prints its version to stderr
        let version = String::from_utf8_lossy(if output.stdout.is_empty() {
            &output.stderr
        } else {
            &output.stdout
        })
        .trim()
        .to_owned();
        tracing::info!(program = %self.program, %version, limits = ?self.limits, "Interpreter loaded");

        Ok(Arc::new(ProcessInterpreter {
            program: self.program.clone(),
            args: self.args.clone(),
            version,
            limits: self.limits,
        }))
    }
}

/// A loaded process interpreter. Code is fed through stdin.
#[derive(Debug)]
pub struct ProcessInterpreter {
    program: String,
    args: Vec<String>,
    version: String,
    limits: ResourceLimits,
}

#[async_trait]
impl Interpreter for ProcessInterpreter {
    fn name(&self) -> Cow<'static, str> {
        if self.version.is_empty() {
            Cow::Owned(self.program.clone())
        } else {
            Cow::Owned(format!("{} ({})", self.program, self.version))
        }
    }

    async fn run(&self, code: &str, capture: &mut OutputCapture) -> anyhow::Result<()> {
        let mut command = Command::new(&self.program);
        command.args(&self.args).env_clear();
        if let Some(path) = std::env::var_os("PATH") {
            command.env("PATH", path);
        }
        #[cfg(unix)]
        apply_limits(&mut command, self.limits);
        let mut child = command
            .env("PYTHONIOENCODING", "utf-8")
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn `{}`", self.program))?;

        let mut stdin = child.stdin.take().context("child stdin is not piped")?;
        let stdout = child.stdout.take().context("child stdout is not piped")?;
        let stderr = child.stderr.take().context("child stderr is not piped")?;

        let OutputCapture {
            stdout: out_buf,
            stderr: err_buf,
        } = capture;

        let feed = async move {
            // A script that exits early closes its stdin; that is not our error.
            if let Err(e) = stdin.write_all(code.as_bytes()).await {
                tracing::debug!("Stdin closed early: {}", e);
            }
            drop(stdin);
        };

        let (_, out_res, err_res, status) = tokio::join!(
            feed,
            drain(stdout, &mut *out_buf),
            drain(stderr, &mut *err_buf),
            child.wait()
        );
        out_res?;
        err_res?;
        let status = status?;

        if status.success() {
            Ok(())
        } else {
            let text = err_buf.text();
            let trace = text.trim();
            if trace.is_empty() {
                Err(anyhow!("Process {}", describe_status(status)))
            } else {
                Err(anyhow!("{}", trace))
            }
        }
    }
}

/// Install `limits` on the child between fork and exec.
#[cfg(unix)]
fn apply_limits(command: &mut Command, limits: ResourceLimits) {
    let cpu_seconds = limits.cpu_seconds();
    let set = move |resource, value: u64| -> std::io::Result<()> {
        let limit = libc::rlimit {
            rlim_cur: value as libc::rlim_t,
            rlim_max: value as libc::rlim_t,
        };
        if unsafe { libc::setrlimit(resource, &limit) } != 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(())
    };

    // SAFETY: the hook only calls `setrlimit`, which is async-signal-safe, and
    // allocates nothing.
    unsafe {
        command.pre_exec(move || {
            set(libc::RLIMIT_CORE, 0)?;
            if let Some(bytes) = limits.mem_limit {
                set(libc::RLIMIT_AS, bytes)?;
            }
            if let Some(secs) = cpu_seconds {
                set(libc::RLIMIT_CPU, secs)?;
            }
            if let Some(bytes) = limits.file_size_limit {
                set(libc::RLIMIT_FSIZE, bytes)?;
            }
            Ok(())
        });
    }
}

/// Read a pipe to its end, keeping what fits into `buf`.
async fn drain<R>(mut pipe: R, buf: &mut CaptureBuf) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = pipe.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.write_bytes(&chunk[..n]);
    }
}

#[cfg(unix)]
fn describe_status(status: ExitStatus) -> String {
    match (status.code(), status.signal()) {
        (Some(x), _) => format!("exited with code {}", x),
        (None, Some(x)) => format!("killed by signal {}", x),
        _ => "exited abnormally".into(),
    }
}

#[cfg(not(unix))]
fn describe_status(status: ExitStatus) -> String {
    match status.code() {
        Some(x) => format!("exited with code {}", x),
        None => "exited abnormally".into(),
    }
}
