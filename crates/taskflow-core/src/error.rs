use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskflowError {
    #[error("task not registered: {0}")]
    TaskNotRegistered(String),

    #[error("argument count mismatch: handler expects {expected} args, got {actual}")]
    ArgCountMismatch { expected: usize, actual: usize },

    #[error("cannot bind argument {index} as {expected}: {value}")]
    ArgBinding {
        index: usize,
        expected: String,
        value: serde_json::Value,
    },

    #[error("unsupported argument type tag: {0}")]
    UnsupportedArgType(String),

    /// Returned by a task handler to request a retry after the given delay
    /// without consuming the signature's retry budget.
    #[error("task requested retry in {}s", retry_in.as_secs())]
    RetryLater { retry_in: Duration },

    #[error("task failed: {0}")]
    Failed(String),

    #[error("cannot build an empty chain")]
    EmptyChain,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] serde_yaml::Error),
}

impl TaskflowError {
    /// Shorthand for the retry-later sentinel.
    pub fn retry_in(retry_in: Duration) -> Self {
        TaskflowError::RetryLater { retry_in }
    }
}

pub type Result<T> = std::result::Result<T, TaskflowError>;
