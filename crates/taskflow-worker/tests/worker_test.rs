//! End-to-end pipeline scenarios driven through the worker with recording
//! test doubles for the broker and backend.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use taskflow_backend::{Backend, InMemoryBackend};
use taskflow_broker::{Broker, BrokerError, InMemoryBroker, TaskProcessor};
use taskflow_core::{
    Arg, Chord, Config, Group, Result as CoreResult, Signature, TaskResult, TaskState,
    TaskStateInfo, TaskflowError,
};
use taskflow_worker::handler::AddHandler;
use taskflow_worker::{ArgValue, Server, TaskHandler, Worker, WorkerError};
use tokio::sync::mpsc;

/// Backend wrapper that records every state write, so tests can assert
/// transition ordering.
struct RecordingBackend {
    inner: InMemoryBackend,
    transitions: Mutex<Vec<(String, TaskState)>>,
}

impl RecordingBackend {
    fn new() -> Self {
        RecordingBackend {
            inner: InMemoryBackend::new(),
            transitions: Mutex::new(Vec::new()),
        }
    }

    fn record(&self, uuid: &str, state: TaskState) {
        self.transitions.lock().push((uuid.to_string(), state));
    }

    fn transitions_for(&self, uuid: &str) -> Vec<TaskState> {
        self.transitions
            .lock()
            .iter()
            .filter(|(u, _)| u == uuid)
            .map(|(_, s)| *s)
            .collect()
    }
}

#[async_trait]
impl Backend for RecordingBackend {
    async fn init_group(&self, group_uuid: &str, task_uuids: &[String]) -> taskflow_backend::Result<()> {
        self.inner.init_group(group_uuid, task_uuids).await
    }

    async fn group_completed(
        &self,
        group_uuid: &str,
        group_task_count: usize,
    ) -> taskflow_backend::Result<bool> {
        self.inner.group_completed(group_uuid, group_task_count).await
    }

    async fn group_task_states(
        &self,
        group_uuid: &str,
        group_task_count: usize,
    ) -> taskflow_backend::Result<Vec<TaskStateInfo>> {
        self.inner.group_task_states(group_uuid, group_task_count).await
    }

    async fn trigger_chord(&self, group_uuid: &str) -> taskflow_backend::Result<bool> {
        self.inner.trigger_chord(group_uuid).await
    }

    async fn set_state_pending(&self, signature: &Signature) -> taskflow_backend::Result<()> {
        self.record(&signature.uuid, TaskState::Pending);
        self.inner.set_state_pending(signature).await
    }

    async fn set_state_received(&self, signature: &Signature) -> taskflow_backend::Result<()> {
        self.record(&signature.uuid, TaskState::Received);
        self.inner.set_state_received(signature).await
    }

    async fn set_state_started(&self, signature: &Signature) -> taskflow_backend::Result<()> {
        self.record(&signature.uuid, TaskState::Started);
        self.inner.set_state_started(signature).await
    }

    async fn set_state_retry(&self, signature: &Signature) -> taskflow_backend::Result<()> {
        self.record(&signature.uuid, TaskState::Retry);
        self.inner.set_state_retry(signature).await
    }

    async fn set_state_success(
        &self,
        signature: &Signature,
        results: &[TaskResult],
    ) -> taskflow_backend::Result<()> {
        self.record(&signature.uuid, TaskState::Success);
        self.inner.set_state_success(signature, results).await
    }

    async fn set_state_failure(
        &self,
        signature: &Signature,
        error: &str,
    ) -> taskflow_backend::Result<()> {
        self.record(&signature.uuid, TaskState::Failure);
        self.inner.set_state_failure(signature, error).await
    }

    async fn get_state(&self, task_uuid: &str) -> taskflow_backend::Result<TaskStateInfo> {
        self.inner.get_state(task_uuid).await
    }

    async fn purge_state(&self, task_uuid: &str) -> taskflow_backend::Result<()> {
        self.inner.purge_state(task_uuid).await
    }

    async fn purge_group_meta(&self, group_uuid: &str) -> taskflow_backend::Result<()> {
        self.inner.purge_group_meta(group_uuid).await
    }
}

/// Broker double that only records what the pipeline publishes; tests
/// drive the worker directly instead of consuming.
struct CapturingBroker {
    published: Mutex<Vec<Signature>>,
}

impl CapturingBroker {
    fn new() -> Self {
        CapturingBroker {
            published: Mutex::new(Vec::new()),
        }
    }

    fn published(&self) -> Vec<Signature> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl Broker for CapturingBroker {
    async fn start_consuming(
        &self,
        _consumer_tag: &str,
        _concurrency: usize,
        _processor: Arc<dyn TaskProcessor>,
    ) -> taskflow_broker::Result<()> {
        Ok(())
    }

    async fn stop_consuming(&self) {}

    async fn publish(&self, signature: Signature) -> taskflow_broker::Result<()> {
        self.published.lock().push(signature);
        Ok(())
    }
}

/// Broker double whose consume call fails a configured number of times
/// with a transient error before failing permanently.
struct FlakyBroker {
    attempts: AtomicUsize,
    transient_failures: usize,
}

#[async_trait]
impl Broker for FlakyBroker {
    async fn start_consuming(
        &self,
        _consumer_tag: &str,
        _concurrency: usize,
        _processor: Arc<dyn TaskProcessor>,
    ) -> taskflow_broker::Result<()> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.transient_failures {
            Err(BrokerError::ConnectionLost("connection reset".to_string()))
        } else {
            Err(BrokerError::Other("broker gone for good".to_string()))
        }
    }

    async fn stop_consuming(&self) {}

    async fn publish(&self, _signature: Signature) -> taskflow_broker::Result<()> {
        Ok(())
    }
}

/// Handler that always fails.
struct FailHandler;

#[async_trait]
impl TaskHandler for FailHandler {
    fn arg_types(&self) -> &'static [&'static str] {
        &[]
    }

    async fn run(&self, _args: Vec<ArgValue>) -> CoreResult<Vec<TaskResult>> {
        Err(TaskflowError::Failed("flaky task blew up".to_string()))
    }
}

/// Handler that asks to be retried after a fixed delay.
struct RetryLaterHandler {
    retry_in: Duration,
}

#[async_trait]
impl TaskHandler for RetryLaterHandler {
    fn arg_types(&self) -> &'static [&'static str] {
        &[]
    }

    async fn run(&self, _args: Vec<ArgValue>) -> CoreResult<Vec<TaskResult>> {
        Err(TaskflowError::retry_in(self.retry_in))
    }
}

struct Harness {
    server: Arc<Server>,
    worker: Arc<Worker>,
    broker: Arc<CapturingBroker>,
    backend: Arc<RecordingBackend>,
}

fn harness() -> Harness {
    let broker = Arc::new(CapturingBroker::new());
    let backend = Arc::new(RecordingBackend::new());
    let server = Server::new(Config::default(), broker.clone(), backend.clone());
    server.register_task("add", AddHandler);
    server.register_task("flaky", FailHandler);
    let worker = Arc::new(server.new_worker("test_worker", 1));
    Harness {
        server,
        worker,
        broker,
        backend,
    }
}

fn add_signature(a: i64, b: i64) -> Signature {
    Signature::new("add", vec![Arg::new("int64", a), Arg::new("int64", b)])
}

#[tokio::test]
async fn test_simple_success_transitions_in_order() {
    let h = harness();
    let signature = add_signature(2, 3);
    let uuid = signature.uuid.clone();

    h.worker.process_signature(signature).await.unwrap();

    assert_eq!(
        h.backend.transitions_for(&uuid),
        vec![TaskState::Received, TaskState::Started, TaskState::Success]
    );
    let info = h.backend.get_state(&uuid).await.unwrap();
    assert_eq!(info.results, vec![TaskResult::new("int64", 5)]);
}

#[tokio::test]
async fn test_unknown_task_is_skipped_without_state_writes() {
    let h = harness();
    let signature = Signature::new("someone_elses_task", vec![]);
    let uuid = signature.uuid.clone();

    h.worker.process_signature(signature).await.unwrap();

    assert!(h.backend.transitions_for(&uuid).is_empty());
    assert!(h.broker.published().is_empty());
}

#[tokio::test]
async fn test_binding_failure_is_permanent() {
    let h = harness();
    // Arity mismatch: add expects two args.
    let mut signature = Signature::new("add", vec![Arg::new("int64", 2)]);
    signature.retry_count = 5;
    let uuid = signature.uuid.clone();

    let err = h.worker.process_signature(signature).await.unwrap_err();
    assert!(matches!(
        err,
        WorkerError::Task(TaskflowError::ArgCountMismatch { .. })
    ));

    // Failed without ever reaching Started, retry budget notwithstanding.
    assert_eq!(
        h.backend.transitions_for(&uuid),
        vec![TaskState::Received, TaskState::Failure]
    );
}

#[tokio::test]
async fn test_implicit_retry_ladder() {
    let h = harness();
    let mut signature = Signature::new("flaky", vec![]);
    signature.retry_count = 3;
    signature.retry_timeout = 1;
    let uuid = signature.uuid.clone();

    let mut current = signature;
    let mut observed_timeouts = Vec::new();
    for _ in 0..3 {
        let before = Utc::now();
        h.worker.process_signature(current.clone()).await.unwrap();

        let resubmitted = h.broker.published().pop().expect("retry was re-submitted");
        assert_eq!(resubmitted.uuid, uuid, "a retry is the same task");
        observed_timeouts.push(resubmitted.retry_timeout);

        let eta = resubmitted.eta.expect("retry carries an eta");
        let delay_ms = (eta - before).num_milliseconds();
        assert!(
            delay_ms >= (resubmitted.retry_timeout as i64 - 1) * 1000
                && delay_ms <= (resubmitted.retry_timeout as i64 + 1) * 1000,
            "eta {}ms does not match backoff {}s",
            delay_ms,
            resubmitted.retry_timeout
        );
        current = resubmitted;
    }

    // Fibonacci successors from seed 1.
    assert_eq!(observed_timeouts, vec![2, 3, 5]);
    assert_eq!(current.retry_count, 0);

    // Budget exhausted: the next attempt fails terminally.
    h.worker.process_signature(current).await.unwrap();
    let states = h.backend.transitions_for(&uuid);
    assert_eq!(states.iter().filter(|s| **s == TaskState::Retry).count(), 3);
    assert_eq!(states.last(), Some(&TaskState::Failure));
}

#[tokio::test]
async fn test_explicit_retry_keeps_budget_untouched() {
    let h = harness();
    h.server.register_task(
        "retry_later",
        RetryLaterHandler {
            retry_in: Duration::from_secs(10),
        },
    );

    let mut signature = Signature::new("retry_later", vec![]);
    signature.retry_count = 4;
    signature.retry_timeout = 7;
    let uuid = signature.uuid.clone();

    let before = Utc::now();
    h.worker.process_signature(signature).await.unwrap();

    assert_eq!(
        h.backend.transitions_for(&uuid),
        vec![
            TaskState::Received,
            TaskState::Started,
            TaskState::Retry,
            TaskState::Pending
        ]
    );

    let resubmitted = h.broker.published().pop().unwrap();
    assert_eq!(resubmitted.retry_count, 4);
    assert_eq!(resubmitted.retry_timeout, 7);

    let delay_ms = (resubmitted.eta.unwrap() - before).num_milliseconds();
    assert!(
        (9_000..=11_000).contains(&delay_ms),
        "eta should be ~10s out, was {}ms",
        delay_ms
    );
}

#[tokio::test]
async fn test_on_success_chain_extends_child_args() {
    let h = harness();
    let child = Signature::new("add", vec![Arg::new("int64", 1)]);
    let child_uuid = child.uuid.clone();
    let signature = add_signature(3, 4).with_on_success(child);

    h.worker.process_signature(signature).await.unwrap();

    let published = h.broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].uuid, child_uuid);
    assert_eq!(
        published[0].args,
        vec![Arg::new("int64", 1), Arg::new("int64", 7)]
    );
}

#[tokio::test]
async fn test_immutable_parent_leaves_child_args_alone() {
    let h = harness();
    let child = Signature::new("add", vec![Arg::new("int64", 1), Arg::new("int64", 2)]);
    let declared_args = child.args.clone();
    let signature = add_signature(3, 4).with_on_success(child).immutable();

    h.worker.process_signature(signature).await.unwrap();

    let published = h.broker.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].args, declared_args);
}

#[tokio::test]
async fn test_failure_fanout_prepends_error_arg() {
    let h = harness();
    let child = Signature::new("cleanup", vec![Arg::new("int64", 42)]);
    let mut signature = Signature::new("flaky", vec![]).with_on_error(child);
    signature.retry_count = 0;
    let uuid = signature.uuid.clone();

    h.worker.process_signature(signature).await.unwrap();

    let failure = h.backend.get_state(&uuid).await.unwrap();
    let error_message = failure.error.unwrap();

    let published = h.broker.published();
    assert_eq!(published.len(), 1);
    // The error message always lands in argument slot 0.
    assert_eq!(published[0].args[0], Arg::new("string", error_message));
    assert_eq!(published[0].args[1], Arg::new("int64", 42));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_chord_fires_exactly_once_with_collected_results() {
    let h = harness();

    let members = vec![add_signature(1, 1), add_signature(2, 2), add_signature(3, 3)];
    let group = Group::new(members);
    let callback = Signature::new("sum", vec![]);
    let callback_uuid = callback.uuid.clone();
    let chord = Chord::new(group, callback);

    h.server.send_chord(chord.clone()).await.unwrap();

    // Race all members through concurrent pipelines.
    let joins: Vec<_> = chord
        .group
        .tasks
        .iter()
        .cloned()
        .map(|member| {
            let worker = h.worker.clone();
            tokio::spawn(async move { worker.process_signature(member).await })
        })
        .collect();
    for join in joins {
        join.await.unwrap().unwrap();
    }

    let fired: Vec<Signature> = h
        .broker
        .published()
        .into_iter()
        .filter(|s| s.uuid == callback_uuid)
        .collect();
    assert_eq!(fired.len(), 1, "chord must fire exactly once");

    // Collected sibling results, in group registration order.
    assert_eq!(
        fired[0].args,
        vec![
            Arg::new("int64", 2),
            Arg::new("int64", 4),
            Arg::new("int64", 6)
        ]
    );
}

#[tokio::test]
async fn test_chord_abandoned_when_a_member_failed() {
    let h = harness();

    // The failing member runs first, so the succeeding member completes
    // the group, claims the chord, and must then abandon it.
    let mut failing = Signature::new("flaky", vec![]);
    failing.retry_count = 0;
    let members = vec![failing, add_signature(1, 1)];
    let group = Group::new(members);
    let callback = Signature::new("sum", vec![]);
    let callback_uuid = callback.uuid.clone();
    let chord = Chord::new(group, callback);

    h.server.send_chord(chord.clone()).await.unwrap();

    for member in chord.group.tasks.iter().cloned() {
        // The failing member's pipeline returns Ok: failure is handled.
        h.worker.process_signature(member).await.unwrap();
    }

    let fired = h
        .broker
        .published()
        .into_iter()
        .any(|s| s.uuid == callback_uuid);
    assert!(!fired, "chord must not fire when a sibling failed");
}

#[tokio::test]
async fn test_immutable_chord_callback_args_unchanged() {
    let h = harness();

    let group = Group::new(vec![add_signature(1, 1)]);
    let callback = Signature::new("sum", vec![Arg::new("int64", 99)]).immutable();
    let declared_args = callback.args.clone();
    let callback_uuid = callback.uuid.clone();
    let chord = Chord::new(group, callback);

    h.server.send_chord(chord.clone()).await.unwrap();
    for member in chord.group.tasks.iter().cloned() {
        h.worker.process_signature(member).await.unwrap();
    }

    let fired: Vec<Signature> = h
        .broker
        .published()
        .into_iter()
        .filter(|s| s.uuid == callback_uuid)
        .collect();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].args, declared_args);
}

#[tokio::test]
async fn test_end_to_end_over_memory_broker() {
    let broker = Arc::new(InMemoryBroker::new());
    let backend = Arc::new(InMemoryBackend::new());
    let config = Config {
        no_unix_signals: true,
        ..Config::default()
    };
    let server = Server::new(config, broker, backend);
    server.register_task("add", AddHandler);

    let worker = Arc::new(server.new_worker("e2e_worker", 2));
    let (reason_tx, mut reason_rx) = mpsc::unbounded_channel();
    worker.clone().launch_async(reason_tx);

    let async_result = server.send_task(add_signature(20, 22)).await.unwrap();
    let results = tokio::time::timeout(
        Duration::from_secs(2),
        async_result.wait(Duration::from_millis(10)),
    )
    .await
    .expect("task should complete in time")
    .unwrap();
    assert_eq!(results, vec![TaskResult::new("int64", 42)]);

    // A deliberate stop terminates the worker cleanly.
    worker.quit().await;
    let reason = tokio::time::timeout(Duration::from_secs(2), reason_rx.recv())
        .await
        .expect("worker should report a terminal reason");
    assert!(matches!(reason, Some(Ok(()))));
}

#[tokio::test]
async fn test_consumer_loop_reconnects_on_transient_errors() {
    let broker = Arc::new(FlakyBroker {
        attempts: AtomicUsize::new(0),
        transient_failures: 2,
    });
    let backend = Arc::new(InMemoryBackend::new());
    let config = Config {
        no_unix_signals: true,
        ..Config::default()
    };
    let server = Server::new(config, broker, backend);

    let transient_seen = Arc::new(AtomicUsize::new(0));
    let mut worker = server.new_worker("flaky_worker", 1);
    {
        let transient_seen = transient_seen.clone();
        worker.set_error_handler(move |_err| {
            transient_seen.fetch_add(1, Ordering::SeqCst);
        });
    }
    let worker = Arc::new(worker);

    let (reason_tx, mut reason_rx) = mpsc::unbounded_channel();
    worker.clone().launch_async(reason_tx);

    let reason = tokio::time::timeout(Duration::from_secs(2), reason_rx.recv())
        .await
        .expect("worker should terminate")
        .expect("channel open");
    assert!(matches!(reason, Err(WorkerError::Broker(_))));
    assert_eq!(transient_seen.load(Ordering::SeqCst), 2);
}

#[test]
fn test_shutdown_sentinel_messages() {
    assert_eq!(
        WorkerError::GracefulQuit.to_string(),
        "worker quit gracefully"
    );
    assert_eq!(WorkerError::AbruptQuit.to_string(), "worker quit abruptly");
}
