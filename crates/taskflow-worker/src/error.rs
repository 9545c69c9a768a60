use taskflow_backend::BackendError;
use taskflow_broker::BrokerError;
use taskflow_core::TaskflowError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    /// Terminal reason after the first shutdown signal: the broker was
    /// drained before exit.
    #[error("worker quit gracefully")]
    GracefulQuit,

    /// Terminal reason after the second shutdown signal: the worker exited
    /// without waiting for in-flight tasks.
    #[error("worker quit abruptly")]
    AbruptQuit,

    #[error("set state to '{state}' for task {uuid} returned error: {source}")]
    StateTransition {
        state: &'static str,
        uuid: String,
        #[source]
        source: BackendError,
    },

    #[error("completed check for group {group} returned error: {source}")]
    GroupCompletedCheck {
        group: String,
        #[source]
        source: BackendError,
    },

    #[error("triggering chord for group {group} returned error: {source}")]
    ChordTrigger {
        group: String,
        #[source]
        source: BackendError,
    },

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Task(#[from] TaskflowError),
}

impl WorkerError {
    pub(crate) fn state_transition(state: &'static str, uuid: &str, source: BackendError) -> Self {
        WorkerError::StateTransition {
            state,
            uuid: uuid.to_string(),
            source,
        }
    }
}
