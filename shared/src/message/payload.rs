//! 事件负载

use serde::{Deserialize, Serialize};

use super::EventType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommittedItem {
    pub product_id: i64,
    pub product_variant_id: i64,
    pub quantity: i32,
    pub final_price_with_coupon_discount: i64,
}

/// 订单已提交 (库存已扣减)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCommitted {
    pub order_id: i64,
    pub site_id: i64,
    pub customer_id: i64,
    /// 实付金额 (含运费)
    pub total: i64,
    pub items: Vec<CommittedItem>,
}

/// 支付失败 / 网关拒绝
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderFailed {
    pub order_id: i64,
    pub site_id: i64,
    pub reason: String,
}

/// 已付款但提交失败，需人工处理
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderNeedsReconciliation {
    pub order_id: i64,
    pub site_id: i64,
    pub payment_tracking: i64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OrderEvent {
    OrderCommitted(OrderCommitted),
    OrderNeedsReconciliation(OrderNeedsReconciliation),
    OrderFailed(OrderFailed),
}

impl OrderEvent {
    pub fn event_type(&self) -> EventType {
        match self {
            OrderEvent::OrderCommitted(_) => EventType::OrderCommitted,
            OrderEvent::OrderFailed(_) => EventType::OrderFailed,
            OrderEvent::OrderNeedsReconciliation(_) => EventType::OrderNeedsReconciliation,
        }
    }

    pub fn order_id(&self) -> i64 {
        match self {
            OrderEvent::OrderCommitted(e) => e.order_id,
            OrderEvent::OrderFailed(e) => e.order_id,
            OrderEvent::OrderNeedsReconciliation(e) => e.order_id,
        }
    }
}
