//! Tanuki apply: create/read/update/delete/import for each GitLab resource type.
//!
//! Orchestrators are thin: they decode ids, validate access levels, ask the planner what changed,
//! ask the resolver what to do about pre-existing objects, call [`tanuki_hub::GitlabApi`] and wait
//! on [`tanuki_converge`] where GitLab finishes work asynchronously.

#![forbid(unsafe_code)]

pub mod adopt;
pub mod probes;
pub mod resources;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tanuki_converge::{ConvergenceTarget, Probe};
use tanuki_core::{TanukiError, TanukiResult};
use tanuki_hub::GitlabApi;
use tokio_util::sync::CancellationToken;

pub use adopt::{resolve, AdoptionDecision};
pub use resources::{builtin, Resource};

fn env_duration(name: &str, default: Duration, unit: fn(u64) -> Duration) -> Duration {
    std::env::var(name).ok().and_then(|s| s.parse::<u64>().ok()).map(unit).unwrap_or(default)
}

pub fn import_timeout() -> Duration { env_duration("TANUKI_IMPORT_TIMEOUT_SECS", Duration::from_secs(600), Duration::from_secs) }

pub fn delete_timeout() -> Duration { env_duration("TANUKI_DELETE_TIMEOUT_SECS", Duration::from_secs(600), Duration::from_secs) }

pub fn branch_protection_timeout() -> Duration {
    env_duration("TANUKI_BRANCH_PROTECTION_TIMEOUT_SECS", Duration::from_secs(120), Duration::from_secs)
}

pub fn branch_timeout() -> Duration { env_duration("TANUKI_BRANCH_TIMEOUT_SECS", Duration::from_secs(60), Duration::from_secs) }

pub fn poll_interval() -> Duration { env_duration("TANUKI_POLL_INTERVAL_MS", Duration::from_secs(1), Duration::from_millis) }

/// Per-call context: the collaborator and the caller's cancellation signal.
#[derive(Clone)]
pub struct Invocation {
    pub api: Arc<dyn GitlabApi>,
    pub cancel: CancellationToken,
}

impl Invocation {
    pub fn new(api: Arc<dyn GitlabApi>) -> Self { Self { api, cancel: CancellationToken::new() } }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Await one collaborator call unless the invocation is cancelled first.
    pub async fn call<T, F>(&self, fut: F) -> TanukiResult<T>
    where
        F: Future<Output = TanukiResult<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TanukiError::Cancelled("invocation cancelled".into())),
            r = fut => r,
        }
    }

    /// Run a convergence wait under this invocation's cancellation; returns the final state.
    pub async fn wait<P: Probe>(&self, target: ConvergenceTarget<P>) -> TanukiResult<String> {
        target.wait(&self.cancel).await.map(|c| c.state)
    }
}

/// `Ok(None)` for NotFound, everything else unchanged.
pub(crate) fn found<T>(r: TanukiResult<T>) -> TanukiResult<Option<T>> {
    match r {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}
