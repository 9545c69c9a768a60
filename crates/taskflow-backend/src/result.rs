use crate::{Backend, BackendError, Result};
use std::sync::Arc;
use std::time::Duration;
use taskflow_core::{Signature, TaskResult, TaskState, TaskStateInfo};

/// Handle for observing one task's outcome through the backend.
pub struct AsyncResult {
    task_uuid: String,
    backend: Arc<dyn Backend>,
}

impl AsyncResult {
    pub fn new(signature: &Signature, backend: Arc<dyn Backend>) -> Self {
        AsyncResult {
            task_uuid: signature.uuid.clone(),
            backend,
        }
    }

    pub fn task_uuid(&self) -> &str {
        &self.task_uuid
    }

    /// Current backend state of the task.
    pub async fn state(&self) -> Result<TaskStateInfo> {
        self.backend.get_state(&self.task_uuid).await
    }

    /// Poll until the task reaches a terminal state. Returns the results on
    /// success, or [`BackendError::TaskFailed`] with the recorded message.
    pub async fn wait(&self, poll_interval: Duration) -> Result<Vec<TaskResult>> {
        loop {
            match self.state().await {
                Ok(info) if info.state == TaskState::Success => return Ok(info.results),
                Ok(info) if info.state == TaskState::Failure => {
                    return Err(BackendError::TaskFailed(
                        info.error.unwrap_or_else(|| "unknown error".to_string()),
                    ));
                }
                // Not terminal yet, or the pending write hasn't landed.
                Ok(_) | Err(BackendError::StateNotFound(_)) => {}
                Err(e) => return Err(e),
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}
