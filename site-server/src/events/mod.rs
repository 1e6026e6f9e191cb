//! 订单事件发布
//!
//! ```text
//! OrderManager ──▶ EventPublisher ──┬──▶ BusPublisher  (进程内 broadcast，未配置 broker / 测试)
//!                                   └──▶ AmqpPublisher (lapin topic exchange, routing key = 事件名)
//! ```
//!
//! 发布发生在事务提交之后；发布失败只记日志，不回滚已提交的状态。

mod amqp;
mod bus;

pub use amqp::AmqpPublisher;
pub use bus::BusPublisher;

use async_trait::async_trait;
use shared::message::{EventEnvelope, OrderEvent};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("broker error: {0}")]
    Broker(String),

    #[error("serialize event: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<lapin::Error> for EventError {
    fn from(err: lapin::Error) -> Self {
        EventError::Broker(err.to_string())
    }
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<(), EventError>;
}

/// Wrap `event` in an envelope and publish it; failures are logged and swallowed
pub async fn publish_event(publisher: &dyn EventPublisher, event: OrderEvent) {
    let envelope = EventEnvelope::new(event);
    match publisher.publish(&envelope).await {
        Ok(()) => tracing::info!(
            event = %envelope.event_type,
            event_id = %envelope.event_id,
            order_id = envelope.payload.order_id(),
            "Event published"
        ),
        Err(e) => tracing::error!(
            event = %envelope.event_type,
            event_id = %envelope.event_id,
            order_id = envelope.payload.order_id(),
            error = %e,
            "Event publish failed"
        ),
    }
}
