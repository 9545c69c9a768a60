use crate::result::TaskResult;
use serde::{Deserialize, Serialize};

/// Task state as recorded in the result backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// Published to the broker, not yet picked up by a worker.
    Pending,
    /// A worker has accepted the delivery.
    Received,
    /// The handler invocation has begun.
    Started,
    /// The task errored and has been rescheduled.
    Retry,
    /// Terminal: the task completed and produced results.
    Success,
    /// Terminal: the task failed with no retries remaining.
    Failure,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Received => "received",
            TaskState::Started => "started",
            TaskState::Retry => "retry",
            TaskState::Success => "success",
            TaskState::Failure => "failure",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskState::Pending),
            "received" => Some(TaskState::Received),
            "started" => Some(TaskState::Started),
            "retry" => Some(TaskState::Retry),
            "success" => Some(TaskState::Success),
            "failure" => Some(TaskState::Failure),
            _ => None,
        }
    }

    /// Terminal states: the task will not run again.
    pub fn is_completed(&self) -> bool {
        matches!(self, TaskState::Success | TaskState::Failure)
    }
}

/// A backend record for one task: its current state plus the terminal
/// payload (results on success, an error message on failure).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStateInfo {
    pub task_uuid: String,
    pub state: TaskState,
    pub results: Vec<TaskResult>,
    pub error: Option<String>,
}

impl TaskStateInfo {
    pub fn new(task_uuid: impl Into<String>, state: TaskState) -> Self {
        TaskStateInfo {
            task_uuid: task_uuid.into(),
            state,
            results: Vec::new(),
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.state == TaskState::Success
    }

    pub fn is_completed(&self) -> bool {
        self.state.is_completed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_string_roundtrip() {
        for state in [
            TaskState::Pending,
            TaskState::Received,
            TaskState::Started,
            TaskState::Retry,
            TaskState::Success,
            TaskState::Failure,
        ] {
            assert_eq!(TaskState::from_str(state.as_str()), Some(state));
        }
        assert_eq!(TaskState::from_str("bogus"), None);
    }

    #[test]
    fn test_completed_states() {
        assert!(TaskState::Success.is_completed());
        assert!(TaskState::Failure.is_completed());
        assert!(!TaskState::Retry.is_completed());
        assert!(!TaskState::Started.is_completed());
    }
}
