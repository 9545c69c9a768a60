mod memory;
mod result;

pub use memory::InMemoryBackend;
pub use result::AsyncResult;

use async_trait::async_trait;
use taskflow_core::{Signature, TaskResult, TaskStateInfo};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("task state not found: {0}")]
    StateNotFound(String),

    #[error("group meta not found: {0}")]
    GroupNotFound(String),

    #[error("task failed: {0}")]
    TaskFailed(String),

    #[error("backend storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, BackendError>;

/// Result backend port: the durable store of task and group state.
///
/// State writes are idempotent with respect to redelivery. The chord
/// trigger is the one operation with a hard atomicity contract:
/// [`Backend::trigger_chord`] must be usable as a distributed mutex, so
/// exactly one caller cluster-wide observes `true` per group.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Register a group's member task uuids ahead of publishing them.
    async fn init_group(&self, group_uuid: &str, task_uuids: &[String]) -> Result<()>;

    /// True iff all `group_task_count` members have reached a terminal
    /// state (success or failure).
    async fn group_completed(&self, group_uuid: &str, group_task_count: usize) -> Result<bool>;

    /// States of all group members, in `init_group` registration order.
    /// Chord callback arguments are assembled in this order.
    async fn group_task_states(
        &self,
        group_uuid: &str,
        group_task_count: usize,
    ) -> Result<Vec<TaskStateInfo>>;

    /// Atomic single-winner claim on the group's chord. The first caller
    /// observing an untriggered chord flips the flag and gets `true`;
    /// every other caller gets `false`.
    async fn trigger_chord(&self, group_uuid: &str) -> Result<bool>;

    async fn set_state_pending(&self, signature: &Signature) -> Result<()>;
    async fn set_state_received(&self, signature: &Signature) -> Result<()>;
    async fn set_state_started(&self, signature: &Signature) -> Result<()>;
    async fn set_state_retry(&self, signature: &Signature) -> Result<()>;
    async fn set_state_success(
        &self,
        signature: &Signature,
        results: &[TaskResult],
    ) -> Result<()>;
    async fn set_state_failure(&self, signature: &Signature, error: &str) -> Result<()>;

    async fn get_state(&self, task_uuid: &str) -> Result<TaskStateInfo>;

    /// Whether this backend is coupled to an AMQP transport and needs its
    /// group metadata purged once a group has been resolved.
    fn is_amqp(&self) -> bool {
        false
    }

    async fn purge_state(&self, task_uuid: &str) -> Result<()>;
    async fn purge_group_meta(&self, group_uuid: &str) -> Result<()>;
}
