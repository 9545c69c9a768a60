mod memory;

pub use memory::InMemoryBroker;

use async_trait::async_trait;
use taskflow_core::Signature;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    /// Transient transport failure. The worker's restart loop reconnects
    /// instead of terminating.
    #[error("broker connection lost: {0}")]
    ConnectionLost(String),

    #[error("publish failed: {0}")]
    PublishFailed(String),

    #[error("broker error: {0}")]
    Other(String),
}

impl BrokerError {
    /// Whether the consumer should reconnect rather than shut down.
    pub fn retriable(&self) -> bool {
        matches!(self, BrokerError::ConnectionLost(_))
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;

/// Dispatch target for broker deliveries. Implemented by the worker;
/// invoked from up to `concurrency` concurrent tasks, so implementations
/// must be reentrant.
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    async fn process(&self, signature: Signature) -> anyhow::Result<()>;
}

/// Broker port: the message transport delivering signatures to workers.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Consume deliveries, dispatching each to `processor`, until the
    /// stream ends. `Ok(())` means a deliberate stop via
    /// [`Broker::stop_consuming`]; an error with
    /// [`BrokerError::retriable`] signals a transient failure the caller
    /// should handle by reconnecting.
    async fn start_consuming(
        &self,
        consumer_tag: &str,
        concurrency: usize,
        processor: std::sync::Arc<dyn TaskProcessor>,
    ) -> Result<()>;

    /// Stop accepting deliveries, let in-flight processing finish, and
    /// unblock the in-flight `start_consuming` call with `Ok(())`.
    async fn stop_consuming(&self);

    /// Publish a signature, honoring its `eta`.
    async fn publish(&self, signature: Signature) -> Result<()>;
}
