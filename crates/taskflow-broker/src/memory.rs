use crate::{Broker, Result, TaskProcessor};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use taskflow_core::Signature;
use tokio::sync::{watch, Notify, Semaphore};
use tracing::{debug, info, warn};

/// In-memory broker, for embedding and tests.
///
/// Pending signatures are held until their `eta` passes, then dispatched
/// FIFO to the processor with at most `concurrency` deliveries in flight.
/// A broker instance covers one consume session: `stop_consuming` is
/// sticky and drains in-flight deliveries before `start_consuming`
/// returns.
pub struct InMemoryBroker {
    pending: Mutex<Vec<Signature>>,
    wakeup: Notify,
    stop_tx: watch::Sender<bool>,
    consuming_tx: watch::Sender<bool>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        InMemoryBroker {
            pending: Mutex::new(Vec::new()),
            wakeup: Notify::new(),
            stop_tx: watch::channel(false).0,
            consuming_tx: watch::channel(false).0,
        }
    }

    /// Pop the first due signature, or tell the caller how long until one
    /// becomes due.
    fn pop_due(&self) -> (Option<Signature>, Option<Duration>) {
        let now = Utc::now();
        let mut pending = self.pending.lock();

        if let Some(idx) = pending
            .iter()
            .position(|s| s.eta.map_or(true, |eta| eta <= now))
        {
            return (Some(pending.remove(idx)), None);
        }

        let next_due = pending
            .iter()
            .filter_map(|s| s.eta)
            .min()
            .map(|eta| (eta - now).to_std().unwrap_or(Duration::ZERO));
        (None, next_due)
    }

    async fn next_delivery(&self, stop_rx: &mut watch::Receiver<bool>) -> Option<Signature> {
        loop {
            if *stop_rx.borrow() {
                return None;
            }
            let (due, next_due) = self.pop_due();
            if let Some(signature) = due {
                return Some(signature);
            }
            match next_due {
                Some(delay) => {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.wakeup.notified() => {}
                        _ = stop_rx.changed() => {}
                    }
                }
                None => {
                    tokio::select! {
                        _ = self.wakeup.notified() => {}
                        _ = stop_rx.changed() => {}
                    }
                }
            }
        }
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn start_consuming(
        &self,
        consumer_tag: &str,
        concurrency: usize,
        processor: Arc<dyn TaskProcessor>,
    ) -> Result<()> {
        let concurrency = concurrency.max(1);
        info!(
            "consumer {} started (concurrency: {})",
            consumer_tag, concurrency
        );
        self.consuming_tx.send_replace(true);

        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut stop_rx = self.stop_tx.subscribe();

        while let Some(signature) = self.next_delivery(&mut stop_rx).await {
            let Ok(permit) = semaphore.clone().acquire_owned().await else {
                break;
            };
            let processor = processor.clone();
            tokio::spawn(async move {
                let uuid = signature.uuid.clone();
                debug!("delivering task {}", uuid);
                if let Err(e) = processor.process(signature).await {
                    warn!("processing task {} failed: {}", uuid, e);
                }
                drop(permit);
            });
        }

        // Drain: wait for every in-flight delivery to finish.
        let _ = semaphore.acquire_many(concurrency as u32).await;
        self.consuming_tx.send_replace(false);
        info!("consumer {} stopped", consumer_tag);
        Ok(())
    }

    async fn stop_consuming(&self) {
        self.stop_tx.send_replace(true);
        self.wakeup.notify_one();

        let mut consuming_rx = self.consuming_tx.subscribe();
        while *consuming_rx.borrow() {
            if consuming_rx.changed().await.is_err() {
                break;
            }
        }
    }

    async fn publish(&self, signature: Signature) -> Result<()> {
        debug!("published task {}", signature.uuid);
        self.pending.lock().push(signature);
        self.wakeup.notify_one();
        Ok(())
    }
}
