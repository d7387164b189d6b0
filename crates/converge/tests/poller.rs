use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tanuki_converge::{ConvergenceTarget, Probe, ProbeResult};
use tanuki_core::{ErrorKind, TanukiError};
use tokio_util::sync::CancellationToken;

/// Replays scripted states; repeats the last one forever.
struct Scripted {
    states: VecDeque<ProbeResult>,
    calls: Arc<AtomicUsize>,
}

impl Scripted {
    fn new(states: Vec<ProbeResult>) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (Self { states: states.into(), calls: calls.clone() }, calls)
    }
}

#[async_trait::async_trait]
impl Probe for Scripted {
    async fn probe(&mut self) -> ProbeResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.states.len() > 1 {
            self.states.pop_front().expect("state")
        } else {
            self.states.front().cloned().expect("state")
        }
    }
}

fn ok(s: &str) -> ProbeResult { Ok(s.to_string()) }

fn import_wait(probe: Scripted) -> ConvergenceTarget<Scripted> {
    ConvergenceTarget::new("project import", ["scheduled", "started"], ["finished"], probe)
        .timeout(Duration::from_secs(600))
        .poll_interval(Duration::from_secs(1))
}

#[tokio::test(start_paused = true)]
async fn import_sequence_converges_after_three_probes() {
    let (probe, calls) = Scripted::new(vec![ok("scheduled"), ok("started"), ok("finished")]);
    let done = import_wait(probe).wait(&CancellationToken::new()).await.expect("ok");
    assert_eq!(done.state, "finished");
    assert_eq!(done.polls, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(done.elapsed, Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn timeout_is_bounded_by_one_poll_interval() {
    let (probe, _calls) = Scripted::new(vec![ok("started")]);
    let started = tokio::time::Instant::now();
    let err = ConvergenceTarget::new("import", ["started"], ["finished"], probe)
        .timeout(Duration::from_secs(10))
        .poll_interval(Duration::from_secs(3))
        .wait(&CancellationToken::new())
        .await
        .unwrap_err();
    let waited = started.elapsed();
    assert_eq!(err.kind(), ErrorKind::TimedOut);
    assert!(waited >= Duration::from_secs(10));
    assert!(waited <= Duration::from_secs(13));
    match err {
        TanukiError::TimedOut { last_state, .. } => assert_eq!(last_state.as_deref(), Some("started")),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn cancellation_error_from_probe_is_reported_as_cancelled() {
    let (probe, _calls) = Scripted::new(vec![ok("scheduled"), Err(TanukiError::Cancelled("context canceled".into()))]);
    let err = import_wait(probe).wait(&CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn caller_cancellation_stops_the_wait() {
    let (probe, calls) = Scripted::new(vec![ok("started")]);
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(2500)).await;
        trigger.cancel();
    });
    let err = import_wait(probe).wait(&cancel).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn state_outside_both_sets_fails_with_that_state() {
    let (probe, _calls) = Scripted::new(vec![ok("scheduled"), ok("failed")]);
    let err = import_wait(probe).wait(&CancellationToken::new()).await.unwrap_err();
    match err {
        TanukiError::ConvergenceFailed { state, .. } => assert_eq!(state.as_deref(), Some("failed")),
        other => panic!("unexpected {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn probe_errors_fail_the_wait() {
    let (probe, calls) = Scripted::new(vec![Err(TanukiError::transport(Some(500), "internal error"))]);
    let err = import_wait(probe).wait(&CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Failed);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn initial_delay_precedes_the_first_probe() {
    let (probe, _calls) = Scripted::new(vec![ok("Deleted")]);
    let started = tokio::time::Instant::now();
    let done = ConvergenceTarget::new("project deletion", ["Deleting"], ["Deleted"], probe)
        .initial_delay(Duration::from_secs(5))
        .wait(&CancellationToken::new())
        .await
        .expect("ok");
    assert_eq!(done.polls, 1);
    assert_eq!(started.elapsed(), Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn unbounded_timeout_from_configuration_still_waits() {
    let (probe, calls) = Scripted::new(vec![ok("started"), ok("finished")]);
    let done = ConvergenceTarget::new("import", ["started"], ["finished"], probe)
        .timeout(Duration::from_secs(u64::MAX))
        .poll_interval(Duration::from_secs(1))
        .wait(&CancellationToken::new())
        .await
        .expect("converged");
    assert_eq!(done.state, "finished");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
