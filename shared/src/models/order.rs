//! Order Model
//!
//! An order is an immutable snapshot of a priced basket; only `status`,
//! `failure_reason` and `updated_at` change after creation.

use serde::{Deserialize, Serialize};

use super::gateway::GatewayKind;
use super::serde_helpers::timestamp;

/// Order lifecycle
///
/// ```text
/// Draft ──▶ AwaitingPayment ──▶ Paid ──▶ Committed
///   │             │               │
///   ▼             ▼               ▼
/// Failed      Abandoned    NeedsReconciliation
///               Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Draft,
    AwaitingPayment,
    Paid,
    Committed,
    Failed,
    Abandoned,
    NeedsReconciliation,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Draft => "draft",
            OrderStatus::AwaitingPayment => "awaiting_payment",
            OrderStatus::Paid => "paid",
            OrderStatus::Committed => "committed",
            OrderStatus::Failed => "failed",
            OrderStatus::Abandoned => "abandoned",
            OrderStatus::NeedsReconciliation => "needs_reconciliation",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Committed
                | OrderStatus::Failed
                | OrderStatus::Abandoned
                | OrderStatus::NeedsReconciliation
        )
    }

    /// Allowed edges of the state machine
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Draft, AwaitingPayment)
                | (Draft, Failed)
                | (AwaitingPayment, Paid)
                | (AwaitingPayment, Failed)
                | (AwaitingPayment, Abandoned)
                | (AwaitingPayment, NeedsReconciliation)
                | (Paid, Committed)
                | (Paid, NeedsReconciliation)
        )
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "draft" => OrderStatus::Draft,
            "awaiting_payment" => OrderStatus::AwaitingPayment,
            "paid" => OrderStatus::Paid,
            "committed" => OrderStatus::Committed,
            "failed" => OrderStatus::Failed,
            "abandoned" => OrderStatus::Abandoned,
            "needs_reconciliation" => OrderStatus::NeedsReconciliation,
            other => return Err(format!("unknown order status: {other}")),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Courier {
    #[default]
    Post,
    Tipax,
}

impl Courier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Courier::Post => "post",
            Courier::Tipax => "tipax",
        }
    }
}

impl std::str::FromStr for Courier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "post" => Ok(Courier::Post),
            "tipax" => Ok(Courier::Tipax),
            other => Err(format!("unknown courier: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub site_id: i64,
    pub customer_id: i64,
    pub basket_id: i64,
    pub discount_id: Option<i64>,
    pub address_id: i64,
    pub description: Option<String>,
    pub gateway: GatewayKind,
    pub courier: Courier,
    pub courier_price: i64,
    pub total_weight: i64,
    pub total_raw_price: i64,
    pub total_coupon_discount: i64,
    pub total_discount: i64,
    pub total_price_with_coupon_discount: i64,
    pub total_final_price: i64,
    pub status: OrderStatus,
    pub failure_reason: Option<String>,
    pub items: Vec<OrderItem>,
    #[serde(with = "timestamp")]
    pub created_at: i64,
    #[serde(with = "timestamp")]
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: i64,
    pub product_id: i64,
    pub product_variant_id: i64,
    pub quantity: i32,
    pub raw_price: i64,
    pub final_raw_price: i64,
    pub final_price_with_coupon_discount: i64,
    pub just_coupon_price: i64,
    pub just_discount_price: i64,
    /// Coupon that contributed `just_coupon_price`, decremented at commit
    pub coupon_id: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_machine_edges() {
        use OrderStatus::*;
        assert!(Draft.can_transition_to(AwaitingPayment));
        assert!(AwaitingPayment.can_transition_to(Paid));
        assert!(Paid.can_transition_to(Committed));
        assert!(Paid.can_transition_to(NeedsReconciliation));
        assert!(AwaitingPayment.can_transition_to(Abandoned));

        assert!(!Committed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(AwaitingPayment));
        assert!(!Draft.can_transition_to(Committed));
        assert!(!Abandoned.can_transition_to(Paid));
    }

    #[test]
    fn status_strings_roundtrip() {
        for s in [
            OrderStatus::Draft,
            OrderStatus::AwaitingPayment,
            OrderStatus::NeedsReconciliation,
        ] {
            assert_eq!(s.as_str().parse::<OrderStatus>(), Ok(s));
            assert_eq!(
                serde_json::to_string(&s).unwrap(),
                format!("\"{}\"", s.as_str())
            );
        }
    }

    #[test]
    fn courier_defaults_to_post() {
        assert_eq!(Courier::default(), Courier::Post);
        assert!("bike".parse::<Courier>().is_err());
    }
}
