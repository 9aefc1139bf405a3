//! The local execution sandbox.
//!
//! A [`SandboxManager`] owns exactly one interpreter instance. It loads the
//! interpreter once, runs one piece of code at a time against it, and tears it
//! down on [`SandboxManager::dispose`]. Result normalization happens in
//! [`crate::normalize`]; this module only produces raw local results.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};

use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::instrument;

use crate::{
    err::{ExecErr, ExecResult},
    normalize::LocalRawResult,
};

use self::model::{ExecOptions, Interpreter, InterpreterLoader, OutputCapture};

pub mod model;
pub mod process;

pub use model::{ExecutionRequest, ExecutionResult, FailureKind};

/// Lifecycle of a sandbox. `Failed` and `Disposed` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum SandboxState {
    Uninitialized,
    Loading,
    Ready,
    Failed,
    Disposed,
}

type LoadFuture = Shared<BoxFuture<'static, Result<Arc<dyn Interpreter>, String>>>;

enum Slot {
    Uninitialized,
    Loading(LoadFuture),
    Ready(Arc<dyn Interpreter>),
    Failed(String),
    Disposed,
}

impl Slot {
    fn state(&self) -> SandboxState {
        match self {
            Slot::Uninitialized => SandboxState::Uninitialized,
            Slot::Loading(_) => SandboxState::Loading,
            Slot::Ready(_) => SandboxState::Ready,
            Slot::Failed(_) => SandboxState::Failed,
            Slot::Disposed => SandboxState::Disposed,
        }
    }
}

/// Owner of one interpreter instance.
///
/// Not meant to be shared between grading sessions; every session (or every
/// test) should construct its own manager.
pub struct SandboxManager {
    loader: Arc<dyn InterpreterLoader>,
    opt: ExecOptions,
    slot: Mutex<Slot>,
    /// Set while an execution is in flight
    busy: AtomicBool,
    /// Flips to `true` exactly once, when the sandbox is disposed
    disposed: watch::Sender<bool>,
}

impl std::fmt::Debug for SandboxManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxManager")
            .field("state", &self.state())
            .field("opt", &self.opt)
            .field("busy", &self.busy.load(Ordering::SeqCst))
            .finish()
    }
}

impl SandboxManager {
    pub fn new(loader: Arc<dyn InterpreterLoader>, opt: ExecOptions) -> SandboxManager {
        let (disposed, _) = watch::channel(false);
        SandboxManager {
            loader,
            opt,
            slot: Mutex::new(Slot::Uninitialized),
            busy: AtomicBool::new(false),
            disposed,
        }
    }

    pub fn state(&self) -> SandboxState {
        self.lock_slot().state()
    }

    pub fn options(&self) -> &ExecOptions {
        &self.opt
    }

    fn lock_slot(&self) -> std::sync::MutexGuard<'_, Slot> {
        // The slot is only ever replaced wholesale, so a poisoned value is
        // still consistent.
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Load the interpreter.
    ///
    /// Concurrent calls while loading wait for the same attempt instead of
    /// loading twice. A failed load is final.
    #[instrument(skip(self))]
    pub async fn initialize(&self) -> ExecResult<()> {
        let fut = {
            let mut slot = self.lock_slot();
            match &*slot {
                Slot::Ready(_) => return Ok(()),
                Slot::Failed(msg) => return Err(ExecErr::SandboxUnavailable(msg.clone())),
                Slot::Disposed => return Err(ExecErr::SandboxDisposed),
                Slot::Loading(fut) => fut.clone(),
                Slot::Uninitialized => {
                    tracing::info!("Loading interpreter");
                    let loader = self.loader.clone();
                    let fut = async move { loader.load().await.map_err(|e| format!("{:#}", e)) }
                        .boxed()
                        .shared();
                    *slot = Slot::Loading(fut.clone());
                    fut
                }
            }
        };

        let res = fut.await;

        let orphan = {
            let mut slot = self.lock_slot();
            if matches!(&*slot, Slot::Loading(_)) {
                match res {
                    Ok(interp) => {
                        tracing::info!(interpreter = %interp.name(), "Sandbox ready");
                        *slot = Slot::Ready(interp);
                        return Ok(());
                    }
                    Err(msg) => {
                        tracing::warn!("Failed to load interpreter: {}", msg);
                        *slot = Slot::Failed(msg.clone());
                        return Err(ExecErr::SandboxUnavailable(msg));
                    }
                }
            }
            // Another waiter on the same load already recorded the outcome
            match &*slot {
                Slot::Ready(_) => return Ok(()),
                Slot::Failed(msg) => return Err(ExecErr::SandboxUnavailable(msg.clone())),
                Slot::Uninitialized | Slot::Loading(_) => return Err(ExecErr::SandboxNotReady),
                Slot::Disposed => res.ok(),
            }
        };

        // Disposed while loading. Every waiter of the load sees the same
        // instance, so `shutdown` may run more than once.
        if let Some(interp) = orphan {
            interp.shutdown().await;
        }
        Err(ExecErr::SandboxDisposed)
    }

    /// Run `code` once with the given timeout and capture its output.
    ///
    /// Timeouts and errors raised by the code are part of the returned result;
    /// only sandbox misuse is an `Err`. With an interpreter that cannot be
    /// interrupted, the timeout is best-effort: the result is reported when
    /// the timer fires, but the code may still be running.
    #[instrument(skip(self, code), fields(code_len = code.len()))]
    pub async fn execute(&self, code: &str, timeout: Duration) -> ExecResult<LocalRawResult> {
        let interp = match &*self.lock_slot() {
            Slot::Ready(interp) => interp.clone(),
            Slot::Disposed => return Err(ExecErr::SandboxDisposed),
            _ => return Err(ExecErr::SandboxNotReady),
        };
        let mut disposed = self.disposed.subscribe();
        if *disposed.borrow() {
            return Err(ExecErr::SandboxDisposed);
        }

        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!("Rejecting concurrent execution");
            return Err(ExecErr::SandboxBusy);
        }
        let _busy = scopeguard::guard((), |_| self.busy.store(false, Ordering::SeqCst));

        let mut capture = OutputCapture::new(&self.opt);
        let start = Instant::now();
        let outcome = {
            let run = tokio::time::timeout(timeout, interp.run(code, &mut capture));
            tokio::select! {
                res = run => match res {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(ExecErr::InterpreterError(format!("{:#}", e))),
                    Err(_) => {
                        tracing::debug!(?timeout, "Execution timed out");
                        Err(ExecErr::ExecutionTimeout)
                    }
                },
                _ = disposed.changed() => {
                    tracing::debug!("Sandbox disposed during execution");
                    return Err(ExecErr::SandboxDisposed);
                }
            }
        };
        let elapsed = start.elapsed();

        // Results never outlive a teardown
        if matches!(&*self.lock_slot(), Slot::Disposed) {
            return Err(ExecErr::SandboxDisposed);
        }

        Ok(LocalRawResult {
            capture,
            outcome,
            elapsed,
        })
    }

    /// Tear the sandbox down. Idempotent; no execution succeeds afterwards.
    ///
    /// An execution still in flight is abandoned: its run is dropped and the
    /// call returns [`ExecErr::SandboxDisposed`].
    #[instrument(skip(self))]
    pub async fn dispose(&self) {
        let prev = std::mem::replace(&mut *self.lock_slot(), Slot::Disposed);
        self.disposed.send_replace(true);
        match prev {
            Slot::Disposed => {}
            Slot::Ready(interp) => {
                tracing::info!(interpreter = %interp.name(), "Disposing sandbox");
                interp.shutdown().await;
            }
            _ => tracing::info!("Disposing sandbox before it became ready"),
        }
    }
}
