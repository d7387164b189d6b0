//! Tanuki converge: bounded polling until an asynchronous GitLab operation settles.
//!
//! Project imports, project/group deletion, default-branch protection and branch creation all
//! complete some time after the triggering call returns. A [`ConvergenceTarget`] describes one
//! such wait: which states mean "keep waiting", which mean "done", how long to wait, and the
//! probe that reports the current state. This is the only place in tanuki that sleeps.

#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::time::Duration;

use metrics::{counter, histogram};
use tanuki_core::TanukiError;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Floor applied to every poll interval so a misconfigured wait cannot hammer the API.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
/// Ceiling for timeouts and initial delays; larger values are treated as this.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(7 * 24 * 3600);

pub type ProbeResult = Result<String, TanukiError>;

/// Reports the current state of the remote operation being waited on.
#[async_trait::async_trait]
pub trait Probe: Send {
    async fn probe(&mut self) -> ProbeResult;
}

/// Where the automaton stands after one observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Polling,
    Converged,
    TimedOut,
    Failed(String),
    Cancelled,
}

/// Successful end of a wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Converged {
    pub state: String,
    pub polls: u32,
    pub elapsed: Duration,
}

pub struct ConvergenceTarget<P> {
    what: String,
    pending: BTreeSet<String>,
    target: BTreeSet<String>,
    timeout: Duration,
    poll_interval: Duration,
    initial_delay: Duration,
    probe: P,
}

impl<P: Probe> ConvergenceTarget<P> {
    pub fn new<I, J, S, T>(what: impl Into<String>, pending: I, target: J, probe: P) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            what: what.into(),
            pending: pending.into_iter().map(Into::into).collect(),
            target: target.into_iter().map(Into::into).collect(),
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            initial_delay: Duration::ZERO,
            probe,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.min(MAX_TIMEOUT);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(MIN_POLL_INTERVAL);
        self
    }

    /// Wait this long before the first probe; the server rarely reflects a change instantly.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay.min(MAX_TIMEOUT);
        self
    }

    pub fn what(&self) -> &str { &self.what }

    /// Pure transition for one observation taken `elapsed` after the wait started.
    pub fn step(&self, observed: &ProbeResult, elapsed: Duration) -> Phase {
        match observed {
            Err(TanukiError::Cancelled(_)) => Phase::Cancelled,
            Err(e) => Phase::Failed(e.to_string()),
            Ok(state) if self.target.contains(state) => Phase::Converged,
            Ok(state) if !self.pending.contains(state) => Phase::Failed(format!(
                "unexpected state {:?} (pending: {:?}, target: {:?})",
                state, self.pending, self.target
            )),
            Ok(_) if elapsed >= self.timeout => Phase::TimedOut,
            Ok(_) => Phase::Polling,
        }
    }

    /// Poll until a terminal phase. `cancel` aborts promptly with [`TanukiError::Cancelled`].
    pub async fn wait(mut self, cancel: &CancellationToken) -> Result<Converged, TanukiError> {
        let started = Instant::now();
        let deadline = started.checked_add(self.timeout).unwrap_or_else(|| started + MAX_TIMEOUT);
        let mut polls = 0u32;
        let mut last_state: Option<String> = None;

        if !self.initial_delay.is_zero() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled()),
                _ = sleep(self.initial_delay.min(self.timeout)) => {}
            }
        }

        loop {
            polls += 1;
            counter!("converge_polls_total", 1u64);
            let observed = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled()),
                r = self.probe.probe() => r,
                _ = sleep_until(deadline) => {
                    return Err(self.timed_out(started.elapsed(), last_state));
                }
            };
            let elapsed = started.elapsed();
            debug!(what = %self.what, poll = polls, state = ?observed.as_ref().ok(), elapsed_ms = %elapsed.as_millis(), "converge: probe");

            match self.step(&observed, elapsed) {
                Phase::Converged => {
                    let state = observed.unwrap_or_default();
                    counter!("converge_ok", 1u64);
                    histogram!("converge_wait_ms", elapsed.as_secs_f64() * 1000.0);
                    info!(what = %self.what, state = %state, polls, took_ms = %elapsed.as_millis(), "converge: done");
                    return Ok(Converged { state, polls, elapsed });
                }
                Phase::Cancelled => return Err(self.cancelled()),
                Phase::TimedOut => return Err(self.timed_out(elapsed, observed.ok())),
                Phase::Failed(reason) => {
                    counter!("converge_failed", 1u64);
                    warn!(what = %self.what, polls, reason = %reason, "converge: failed");
                    let state = observed.ok();
                    return Err(TanukiError::ConvergenceFailed { what: self.what.clone(), state, reason });
                }
                Phase::Polling => last_state = observed.ok(),
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled()),
                _ = sleep(self.poll_interval.min(remaining)) => {}
            }
        }
    }

    fn cancelled(&self) -> TanukiError {
        counter!("converge_cancelled", 1u64);
        info!(what = %self.what, "converge: cancelled");
        TanukiError::Cancelled(format!("waiting for {}", self.what))
    }

    fn timed_out(&self, waited: Duration, last_state: Option<String>) -> TanukiError {
        counter!("converge_timeout", 1u64);
        warn!(what = %self.what, waited_ms = %waited.as_millis(), last_state = ?last_state, "converge: timed out");
        TanukiError::TimedOut { what: self.what.clone(), waited, last_state }
    }
}
