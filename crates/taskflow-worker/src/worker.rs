use crate::error::WorkerError;
use crate::executor::BoundTask;
use crate::server::Server;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use taskflow_broker::TaskProcessor;
use taskflow_core::{
    human_readable_results, retry, Arg, Config, Signature, TaskResult, TaskflowError,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Terminal reason reported when a worker exits: `Ok(())` for a clean
/// broker stop, otherwise the error that ended the worker.
pub type TerminalReason = Result<(), WorkerError>;

/// Observability hook for fatal task errors and transient broker errors.
pub type ErrorHandler = Box<dyn Fn(&(dyn std::error::Error + 'static)) + Send + Sync>;

/// Hook invoked around each task invocation.
pub type SignatureHook = Box<dyn Fn(&Signature) + Send + Sync>;

/// A worker consumes signatures from the broker, runs them through the
/// execution pipeline, and orchestrates their callbacks.
///
/// Handler slots are set before launch and read-only thereafter; the
/// broker invokes [`Worker::process_signature`] (via [`TaskProcessor`])
/// from up to `concurrency` concurrent tasks.
pub struct Worker {
    server: Arc<Server>,
    consumer_tag: String,
    concurrency: usize,
    queue: Option<String>,
    error_handler: Option<ErrorHandler>,
    pre_task_handler: Option<SignatureHook>,
    post_task_handler: Option<SignatureHook>,
}

impl Worker {
    pub(crate) fn new(
        server: Arc<Server>,
        consumer_tag: String,
        concurrency: usize,
        queue: Option<String>,
    ) -> Self {
        Worker {
            server,
            consumer_tag,
            concurrency,
            queue,
            error_handler: None,
            pre_task_handler: None,
            post_task_handler: None,
        }
    }

    pub fn set_error_handler(
        &mut self,
        handler: impl Fn(&(dyn std::error::Error + 'static)) + Send + Sync + 'static,
    ) {
        self.error_handler = Some(Box::new(handler));
    }

    pub fn set_pre_task_handler(&mut self, handler: impl Fn(&Signature) + Send + Sync + 'static) {
        self.pre_task_handler = Some(Box::new(handler));
    }

    pub fn set_post_task_handler(&mut self, handler: impl Fn(&Signature) + Send + Sync + 'static) {
        self.post_task_handler = Some(Box::new(handler));
    }

    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }

    pub fn custom_queue(&self) -> Option<&str> {
        self.queue.as_deref()
    }

    /// Launch the worker and block until it exits.
    pub async fn launch(self: Arc<Self>) -> TerminalReason {
        let (reason_tx, mut reason_rx) = mpsc::unbounded_channel();
        self.launch_async(reason_tx);
        reason_rx.recv().await.unwrap_or(Ok(()))
    }

    /// Start the consumer-restart loop and the signal watcher. The
    /// terminal reason is reported on `reason_tx`.
    pub fn launch_async(self: Arc<Self>, reason_tx: mpsc::UnboundedSender<TerminalReason>) {
        let config = self.server.config().clone();
        self.log_banner(&config);

        self.clone().spawn_consumer_loop(reason_tx.clone());
        if !config.no_unix_signals {
            self.spawn_signal_watcher(reason_tx);
        }
    }

    /// Stop consuming: the broker drains in-flight deliveries, then the
    /// in-flight `start_consuming` call returns.
    pub async fn quit(&self) {
        self.server.broker().stop_consuming().await;
    }

    fn log_banner(&self, config: &Config) {
        info!("Launching a worker with the following settings:");
        info!("- Broker: {}", config.broker);
        match &self.queue {
            Some(queue) => info!("- CustomQueue: {}", queue),
            None => info!("- DefaultQueue: {}", config.default_queue),
        }
        info!("- ResultBackend: {}", config.result_backend);
        if let Some(amqp) = &config.amqp {
            info!("- AMQP: {}", amqp.exchange);
            info!("  - Exchange: {}", amqp.exchange);
            info!("  - ExchangeType: {}", amqp.exchange_type);
            info!("  - BindingKey: {}", amqp.binding_key);
            info!("  - PrefetchCount: {}", amqp.prefetch_count);
        }
    }

    fn spawn_consumer_loop(self: Arc<Self>, reason_tx: mpsc::UnboundedSender<TerminalReason>) {
        let worker = self;
        tokio::spawn(async move {
            let broker = worker.server.broker();
            loop {
                let processor: Arc<dyn TaskProcessor> = worker.clone();
                match broker
                    .start_consuming(&worker.consumer_tag, worker.concurrency, processor)
                    .await
                {
                    // Transient transport failure: reconnect immediately.
                    Err(e) if e.retriable() => {
                        let err = WorkerError::Broker(e);
                        match &worker.error_handler {
                            Some(handler) => handler(&err),
                            None => warn!("broker failed with error: {}", err),
                        }
                    }
                    Err(e) => {
                        let _ = reason_tx.send(Err(WorkerError::Broker(e)));
                        return;
                    }
                    Ok(()) => {
                        let _ = reason_tx.send(Ok(()));
                        return;
                    }
                }
            }
        });
    }

    #[cfg(unix)]
    fn spawn_signal_watcher(self: Arc<Self>, reason_tx: mpsc::UnboundedSender<TerminalReason>) {
        let worker = self;
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};

            let mut interrupt = match signal(SignalKind::interrupt()) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("cannot install SIGINT handler: {}", e);
                    return;
                }
            };
            let mut terminate = match signal(SignalKind::terminate()) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("cannot install SIGTERM handler: {}", e);
                    return;
                }
            };

            let mut signals_received: u32 = 0;
            loop {
                tokio::select! {
                    _ = interrupt.recv() => {}
                    _ = terminate.recv() => {}
                }
                signals_received += 1;
                if signals_received < 2 {
                    info!("signal received, initiating graceful shutdown");
                    let worker = worker.clone();
                    let reason_tx = reason_tx.clone();
                    tokio::spawn(async move {
                        worker.quit().await;
                        let _ = reason_tx.send(Err(WorkerError::GracefulQuit));
                    });
                } else {
                    info!("second signal received, shutting down abruptly");
                    let _ = reason_tx.send(Err(WorkerError::AbruptQuit));
                }
            }
        });
    }

    #[cfg(not(unix))]
    fn spawn_signal_watcher(self: Arc<Self>, reason_tx: mpsc::UnboundedSender<TerminalReason>) {
        let worker = self;
        tokio::spawn(async move {
            let mut signals_received: u32 = 0;
            loop {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                signals_received += 1;
                if signals_received < 2 {
                    info!("signal received, initiating graceful shutdown");
                    let worker = worker.clone();
                    let reason_tx = reason_tx.clone();
                    tokio::spawn(async move {
                        worker.quit().await;
                        let _ = reason_tx.send(Err(WorkerError::GracefulQuit));
                    });
                } else {
                    info!("second signal received, shutting down abruptly");
                    let _ = reason_tx.send(Err(WorkerError::AbruptQuit));
                }
            }
        });
    }

    /// Execution pipeline for one delivery.
    ///
    /// Signatures whose name is not registered here are skipped without
    /// any state write: a fleet may run workers with disjoint registries,
    /// and an unknown task simply belongs to someone else.
    pub async fn process_signature(&self, signature: Signature) -> Result<(), WorkerError> {
        if !self.server.is_task_registered(&signature.name) {
            debug!(
                "task {} ({}) not registered here, skipping",
                signature.name, signature.uuid
            );
            return Ok(());
        }
        let Some(handler) = self.server.get_registered_task(&signature.name) else {
            return Ok(());
        };

        let mut signature = signature;
        let backend = self.server.backend();

        backend
            .set_state_received(&signature)
            .await
            .map_err(|e| WorkerError::state_transition("received", &signature.uuid, e))?;

        // Bind before Started: an unbindable delivery must fail without
        // ever appearing to run.
        let bound = match BoundTask::bind(handler, &signature.args) {
            Ok(bound) => bound,
            Err(e) => {
                self.task_failed(&signature, &e).await?;
                return Err(WorkerError::Task(e));
            }
        };

        let span = info_span!(
            "task",
            uuid = %signature.uuid,
            task_name = %signature.name,
            headers = ?signature.headers,
        );

        backend
            .set_state_started(&signature)
            .await
            .map_err(|e| WorkerError::state_transition("started", &signature.uuid, e))?;

        if let Some(pre) = &self.pre_task_handler {
            pre(&signature);
        }

        let outcome = bound.call().instrument(span).await;

        let result = match outcome {
            Ok(results) => self.task_succeeded(&signature, &results).await,
            Err(TaskflowError::RetryLater { retry_in }) => {
                self.retry_task_in(&mut signature, retry_in).await
            }
            Err(e) => {
                if signature.retry_count > 0 {
                    self.task_retry(&mut signature).await
                } else {
                    self.task_failed(&signature, &e).await
                }
            }
        };

        if let Some(post) = &self.post_task_handler {
            post(&signature);
        }

        result
    }

    /// Implicit retry: consume one retry, advance the Fibonacci backoff,
    /// and re-submit the same signature with the new eta.
    async fn task_retry(&self, signature: &mut Signature) -> Result<(), WorkerError> {
        self.server
            .backend()
            .set_state_retry(signature)
            .await
            .map_err(|e| WorkerError::state_transition("retry", &signature.uuid, e))?;

        signature.retry_count -= 1;
        signature.retry_timeout = retry::fibonacci_next(signature.retry_timeout);
        signature.eta = Some(Utc::now() + chrono::Duration::seconds(signature.retry_timeout as i64));

        info!(
            "task {} failed, going to retry in {} seconds",
            signature.uuid, signature.retry_timeout
        );
        self.server.send_task(signature.clone()).await.map(|_| ())
    }

    /// Explicit retry requested by the task itself: the retry budget and
    /// backoff state are left untouched.
    async fn retry_task_in(
        &self,
        signature: &mut Signature,
        retry_in: Duration,
    ) -> Result<(), WorkerError> {
        self.server
            .backend()
            .set_state_retry(signature)
            .await
            .map_err(|e| WorkerError::state_transition("retry", &signature.uuid, e))?;

        signature.eta = Some(Utc::now() + chrono::Duration::from_std(retry_in).unwrap_or_default());

        info!(
            "task {} failed, going to retry in {} seconds",
            signature.uuid,
            retry_in.as_secs()
        );
        self.server.send_task(signature.clone()).await.map(|_| ())
    }

    async fn task_succeeded(
        &self,
        signature: &Signature,
        results: &[TaskResult],
    ) -> Result<(), WorkerError> {
        let backend = self.server.backend();
        backend
            .set_state_success(signature, results)
            .await
            .map_err(|e| WorkerError::state_transition("success", &signature.uuid, e))?;

        info!(
            "processed task {}, results = {}",
            signature.uuid,
            human_readable_results(results)
        );

        for child in &signature.on_success {
            let mut child = child.clone();
            if !signature.immutable {
                for result in results {
                    child
                        .args
                        .push(Arg::new(result.type_tag.clone(), result.value.clone()));
                }
            }
            if let Err(e) = self.server.send_task(child).await {
                warn!("failed to submit on-success callback: {}", e);
            }
        }

        let Some(group_uuid) = signature.group_uuid.clone() else {
            return Ok(());
        };

        let group_completed = backend
            .group_completed(&group_uuid, signature.group_task_count)
            .await
            .map_err(|e| WorkerError::GroupCompletedCheck {
                group: group_uuid.clone(),
                source: e,
            })?;
        if !group_completed {
            return Ok(());
        }

        let chord_result = self.fire_chord(signature, &group_uuid).await;

        // Transport-coupled backends keep group metadata in the message
        // store; drop it once the group is resolved.
        if backend.is_amqp() {
            if let Err(e) = backend.purge_group_meta(&group_uuid).await {
                warn!("purging group meta for {} failed: {}", group_uuid, e);
            }
        }

        chord_result
    }

    /// Claim and dispatch the group's chord callback. Exactly-once rests
    /// on the backend's atomic `trigger_chord`: one claimant cluster-wide
    /// sees `true`.
    async fn fire_chord(&self, signature: &Signature, group_uuid: &str) -> Result<(), WorkerError> {
        let Some(chord_callback) = &signature.chord_callback else {
            return Ok(());
        };
        let backend = self.server.backend();

        let should_trigger =
            backend
                .trigger_chord(group_uuid)
                .await
                .map_err(|e| WorkerError::ChordTrigger {
                    group: group_uuid.to_string(),
                    source: e,
                })?;
        if !should_trigger {
            return Ok(());
        }

        let Ok(task_states) = backend
            .group_task_states(group_uuid, signature.group_task_count)
            .await
        else {
            return Ok(());
        };

        let mut callback = (**chord_callback).clone();
        for state in &task_states {
            if !state.is_success() {
                // A sibling failed: the chord never fires.
                return Ok(());
            }
            if !callback.immutable {
                for result in &state.results {
                    callback
                        .args
                        .push(Arg::new(result.type_tag.clone(), result.value.clone()));
                }
            }
        }

        self.server.send_task(callback).await.map(|_| ())
    }

    async fn task_failed(
        &self,
        signature: &Signature,
        task_err: &TaskflowError,
    ) -> Result<(), WorkerError> {
        self.server
            .backend()
            .set_state_failure(signature, &task_err.to_string())
            .await
            .map_err(|e| WorkerError::state_transition("failure", &signature.uuid, e))?;

        match &self.error_handler {
            Some(handler) => handler(task_err),
            None => error!(
                "failed processing task {}. Error = {}",
                signature.uuid, task_err
            ),
        }

        for child in &signature.on_error {
            let mut child = child.clone();
            child.args.insert(0, Arg::new("string", task_err.to_string()));
            if let Err(e) = self.server.send_task(child).await {
                warn!("failed to submit on-error callback: {}", e);
            }
        }

        Ok(())
    }
}

#[async_trait::async_trait]
impl TaskProcessor for Worker {
    async fn process(&self, signature: Signature) -> anyhow::Result<()> {
        self.process_signature(signature).await.map_err(Into::into)
    }
}
