use crate::error::WorkerError;
use crate::handler::{HandlerRegistry, TaskHandler};
use crate::worker::Worker;
use std::sync::Arc;
use taskflow_backend::{AsyncResult, Backend};
use taskflow_broker::Broker;
use taskflow_core::{Chord, Config, Group, Signature};
use tracing::debug;

/// The server ties together configuration, broker, backend, and the task
/// registry. Producers use it to submit work; workers are spawned from it
/// and use it to re-submit retries and callbacks.
pub struct Server {
    config: Config,
    broker: Arc<dyn Broker>,
    backend: Arc<dyn Backend>,
    registry: HandlerRegistry,
}

impl Server {
    pub fn new(config: Config, broker: Arc<dyn Broker>, backend: Arc<dyn Backend>) -> Arc<Self> {
        Arc::new(Server {
            config,
            broker,
            backend,
            registry: HandlerRegistry::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn broker(&self) -> Arc<dyn Broker> {
        self.broker.clone()
    }

    pub fn backend(&self) -> Arc<dyn Backend> {
        self.backend.clone()
    }

    pub fn register_task<H: TaskHandler + 'static>(&self, name: impl Into<String>, handler: H) {
        self.registry.register(name, handler);
    }

    pub fn register_tasks(
        &self,
        handlers: std::collections::HashMap<String, Arc<dyn TaskHandler>>,
    ) {
        self.registry.register_all(handlers);
    }

    pub fn is_task_registered(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    pub fn get_registered_task(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.registry.get(name)
    }

    pub fn registered_task_names(&self) -> Vec<String> {
        self.registry.task_names()
    }

    /// Submit a single signature: record `Pending`, then publish to the
    /// broker, which honors the signature's `eta`.
    pub async fn send_task(&self, signature: Signature) -> Result<AsyncResult, WorkerError> {
        self.backend.set_state_pending(&signature).await?;
        debug!("task {} submitted", signature.uuid);

        let async_result = AsyncResult::new(&signature, self.backend.clone());
        self.broker.publish(signature).await?;
        Ok(async_result)
    }

    /// Submit all members of a group, registering the group with the
    /// backend first so workers can detect its completion.
    pub async fn send_group(&self, group: Group) -> Result<Vec<AsyncResult>, WorkerError> {
        self.backend
            .init_group(&group.group_uuid, &group.task_uuids())
            .await?;

        let mut results = Vec::with_capacity(group.tasks.len());
        for task in group.tasks {
            results.push(self.send_task(task).await?);
        }
        Ok(results)
    }

    /// Submit a chord: a group whose members carry the callback. The
    /// callback itself is dispatched by whichever worker completes the
    /// group.
    pub async fn send_chord(&self, chord: Chord) -> Result<Vec<AsyncResult>, WorkerError> {
        self.send_group(chord.group).await
    }

    pub fn new_worker(
        self: &Arc<Self>,
        consumer_tag: impl Into<String>,
        concurrency: usize,
    ) -> Worker {
        Worker::new(self.clone(), consumer_tag.into(), concurrency, None)
    }

    pub fn new_worker_with_queue(
        self: &Arc<Self>,
        consumer_tag: impl Into<String>,
        concurrency: usize,
        queue: impl Into<String>,
    ) -> Worker {
        Worker::new(self.clone(), consumer_tag.into(), concurrency, Some(queue.into()))
    }
}
