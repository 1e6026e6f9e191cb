//! 订单事件消息定义
//!
//! 由 site-server 发布到事件总线 (进程内 broadcast 或 AMQP topic exchange)，
//! 通知服务等下游消费者订阅。

use serde::{Deserialize, Serialize};
use std::fmt;

use uuid::Uuid;

pub mod payload;
pub use payload::*;

/// 事件类型，字符串形式即 AMQP routing key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "order.committed")]
    OrderCommitted,
    #[serde(rename = "order.failed")]
    OrderFailed,
    #[serde(rename = "order.needs_reconciliation")]
    OrderNeedsReconciliation,
}

impl EventType {
    pub fn routing_key(&self) -> &'static str {
        match self {
            EventType::OrderCommitted => "order.committed",
            EventType::OrderFailed => "order.failed",
            EventType::OrderNeedsReconciliation => "order.needs_reconciliation",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.routing_key())
    }
}

/// 事件信封
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub event_type: EventType,
    /// Unix millis
    pub occurred_at: i64,
    pub payload: OrderEvent,
}

impl EventEnvelope {
    pub fn new(payload: OrderEvent) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: payload.event_type(),
            occurred_at: crate::util::now_millis(),
            payload,
        }
    }

    pub fn routing_key(&self) -> &'static str {
        self.event_type.routing_key()
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_carries_routing_key_of_payload() {
        let env = EventEnvelope::new(OrderEvent::OrderFailed(OrderFailed {
            order_id: 1,
            site_id: 2,
            reason: "declined".into(),
        }));
        assert_eq!(env.routing_key(), "order.failed");
        let json: serde_json::Value = serde_json::from_slice(&env.to_json_bytes().unwrap()).unwrap();
        assert_eq!(json["event_type"], "order.failed");
        assert_eq!(json["payload"]["reason"], "declined");
    }
}
