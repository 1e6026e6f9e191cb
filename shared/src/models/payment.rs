//! Payment Model
//!
//! A payment is the envelope that survives the gateway redirect: everything the
//! callback needs to resume a flow lives in `order_data` and `call_verify_url`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::gateway::GatewayKind;
use super::serde_helpers::timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Waiting for the gateway callback
    Pending,
    /// Gateway confirmed the money
    Active,
    /// Failed, cancelled or abandoned
    Inactive,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Active => "active",
            PaymentStatus::Inactive => "inactive",
        }
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "active" => Ok(PaymentStatus::Active),
            "inactive" => Ok(PaymentStatus::Inactive),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    User,
    Customer,
    Guest,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserType::User => "user",
            UserType::Customer => "customer",
            UserType::Guest => "guest",
        }
    }
}

impl std::str::FromStr for UserType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(UserType::User),
            "customer" => Ok(UserType::Customer),
            "guest" => Ok(UserType::Guest),
            other => Err(format!("unknown user type: {other}")),
        }
    }
}

/// Which flow resumes when the gateway calls back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallVerifyUrl {
    ChargeCreditVerify,
    UpgradePlanVerify,
    CreateOrderVerify,
}

impl CallVerifyUrl {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallVerifyUrl::ChargeCreditVerify => "charge_credit_verify",
            CallVerifyUrl::UpgradePlanVerify => "upgrade_plan_verify",
            CallVerifyUrl::CreateOrderVerify => "create_order_verify",
        }
    }

    /// Service name / action recorded on the payment
    pub fn service(&self) -> (&'static str, &'static str) {
        match self {
            CallVerifyUrl::ChargeCreditVerify => ("user", "charge_credit"),
            CallVerifyUrl::UpgradePlanVerify => ("user", "upgrade_plan"),
            CallVerifyUrl::CreateOrderVerify => ("order", "create_order"),
        }
    }
}

impl std::str::FromStr for CallVerifyUrl {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "charge_credit_verify" => Ok(CallVerifyUrl::ChargeCreditVerify),
            "upgrade_plan_verify" => Ok(CallVerifyUrl::UpgradePlanVerify),
            "create_order_verify" => Ok(CallVerifyUrl::CreateOrderVerify),
            other => Err(format!("unknown verify flow: {other}")),
        }
    }
}

/// Opaque key/value envelope carried across the redirect
pub type OrderData = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub site_id: i64,
    pub order_id: Option<i64>,
    pub user_type: UserType,
    pub user_id: Option<i64>,
    pub customer_id: Option<i64>,
    pub tracking_number: i64,
    pub gateway: GatewayKind,
    pub gateway_account_name: String,
    pub amount: i64,
    pub status: PaymentStatus,
    pub transaction_code: Option<String>,
    pub provider_token: Option<String>,
    pub order_data: OrderData,
    pub client_ip: String,
    pub return_url: String,
    pub call_verify_url: CallVerifyUrl,
    pub service_name: String,
    pub service_action: String,
    pub message: Option<String>,
    pub gateway_response_code: Option<String>,
    #[serde(with = "timestamp")]
    pub created_at: i64,
    #[serde(with = "timestamp")]
    pub updated_at: i64,
}

impl Payment {
    /// Order id stored in the envelope of an order payment
    pub fn envelope_order_id(&self) -> Option<i64> {
        self.order_data.get("OrderId").and_then(|v| v.parse().ok())
    }
}

/// Result of the gateway verify step, persisted on the payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyRecord {
    pub transaction_code: Option<String>,
    pub message: Option<String>,
    pub gateway_response_code: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_flow_names_roundtrip() {
        for flow in [
            CallVerifyUrl::ChargeCreditVerify,
            CallVerifyUrl::UpgradePlanVerify,
            CallVerifyUrl::CreateOrderVerify,
        ] {
            assert_eq!(flow.as_str().parse::<CallVerifyUrl>(), Ok(flow));
        }
        assert!("refund_verify".parse::<CallVerifyUrl>().is_err());
    }

    #[test]
    fn unknown_status_fails_deserialization() {
        let r: Result<PaymentStatus, _> = serde_json::from_str("\"succeed\"");
        assert!(r.is_err());
    }
}
