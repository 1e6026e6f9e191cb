//! 进程内事件总线

use async_trait::async_trait;
use shared::message::EventEnvelope;
use tokio::sync::broadcast;

use super::{EventError, EventPublisher};

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct BusPublisher {
    tx: broadcast::Sender<EventEnvelope>,
}

impl Default for BusPublisher {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl BusPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl EventPublisher for BusPublisher {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<(), EventError> {
        // 没有订阅者不算错误
        if self.tx.send(envelope.clone()).is_err() {
            tracing::debug!(event = %envelope.event_type, "No bus subscribers");
        }
        Ok(())
    }
}
