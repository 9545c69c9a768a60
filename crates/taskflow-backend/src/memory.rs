use crate::{Backend, BackendError, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use taskflow_core::{Signature, TaskResult, TaskState, TaskStateInfo};
use tracing::debug;

struct GroupMeta {
    /// Member uuids in registration order. `group_task_states` yields
    /// states in this order.
    task_uuids: Vec<String>,
    chord_triggered: bool,
}

/// In-memory result backend, for embedding and tests.
///
/// The chord flag is flipped under the group map's write lock, which makes
/// `trigger_chord` single-winner across every pipeline sharing this
/// backend instance.
#[derive(Default)]
pub struct InMemoryBackend {
    states: RwLock<HashMap<String, TaskStateInfo>>,
    groups: RwLock<HashMap<String, GroupMeta>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn set_state(&self, info: TaskStateInfo) {
        debug!("task {} -> {}", info.task_uuid, info.state.as_str());
        self.states.write().insert(info.task_uuid.clone(), info);
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    async fn init_group(&self, group_uuid: &str, task_uuids: &[String]) -> Result<()> {
        self.groups.write().insert(
            group_uuid.to_string(),
            GroupMeta {
                task_uuids: task_uuids.to_vec(),
                chord_triggered: false,
            },
        );
        Ok(())
    }

    async fn group_completed(&self, group_uuid: &str, group_task_count: usize) -> Result<bool> {
        let states = self.group_task_states(group_uuid, group_task_count).await?;
        Ok(states.iter().filter(|s| s.is_completed()).count() == group_task_count)
    }

    async fn group_task_states(
        &self,
        group_uuid: &str,
        _group_task_count: usize,
    ) -> Result<Vec<TaskStateInfo>> {
        let groups = self.groups.read();
        let meta = groups
            .get(group_uuid)
            .ok_or_else(|| BackendError::GroupNotFound(group_uuid.to_string()))?;

        let states = self.states.read();
        meta.task_uuids
            .iter()
            .map(|uuid| {
                states
                    .get(uuid)
                    .cloned()
                    .ok_or_else(|| BackendError::StateNotFound(uuid.clone()))
            })
            .collect()
    }

    async fn trigger_chord(&self, group_uuid: &str) -> Result<bool> {
        let mut groups = self.groups.write();
        let meta = groups
            .get_mut(group_uuid)
            .ok_or_else(|| BackendError::GroupNotFound(group_uuid.to_string()))?;

        if meta.chord_triggered {
            return Ok(false);
        }
        meta.chord_triggered = true;
        Ok(true)
    }

    async fn set_state_pending(&self, signature: &Signature) -> Result<()> {
        self.set_state(TaskStateInfo::new(&signature.uuid, TaskState::Pending));
        Ok(())
    }

    async fn set_state_received(&self, signature: &Signature) -> Result<()> {
        self.set_state(TaskStateInfo::new(&signature.uuid, TaskState::Received));
        Ok(())
    }

    async fn set_state_started(&self, signature: &Signature) -> Result<()> {
        self.set_state(TaskStateInfo::new(&signature.uuid, TaskState::Started));
        Ok(())
    }

    async fn set_state_retry(&self, signature: &Signature) -> Result<()> {
        self.set_state(TaskStateInfo::new(&signature.uuid, TaskState::Retry));
        Ok(())
    }

    async fn set_state_success(
        &self,
        signature: &Signature,
        results: &[TaskResult],
    ) -> Result<()> {
        let mut info = TaskStateInfo::new(&signature.uuid, TaskState::Success);
        info.results = results.to_vec();
        self.set_state(info);
        Ok(())
    }

    async fn set_state_failure(&self, signature: &Signature, error: &str) -> Result<()> {
        let mut info = TaskStateInfo::new(&signature.uuid, TaskState::Failure);
        info.error = Some(error.to_string());
        self.set_state(info);
        Ok(())
    }

    async fn get_state(&self, task_uuid: &str) -> Result<TaskStateInfo> {
        self.states
            .read()
            .get(task_uuid)
            .cloned()
            .ok_or_else(|| BackendError::StateNotFound(task_uuid.to_string()))
    }

    async fn purge_state(&self, task_uuid: &str) -> Result<()> {
        self.states.write().remove(task_uuid);
        Ok(())
    }

    async fn purge_group_meta(&self, group_uuid: &str) -> Result<()> {
        self.groups.write().remove(group_uuid);
        Ok(())
    }
}
