//! Tenant account: plan and credit ledger

use serde::{Deserialize, Serialize};

use super::discount::DiscountType;
use super::serde_helpers::option_timestamp;

/// Credit kinds a user can buy. Names appear verbatim in payment envelopes
/// (`"SmsCredits_UnitPriceCount"`), hence PascalCase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CreditKind {
    SmsCredits,
    EmailCredits,
    AiCredits,
    AiImageCredits,
    StorageMbCredits,
}

impl CreditKind {
    pub const ALL: [CreditKind; 5] = [
        CreditKind::SmsCredits,
        CreditKind::EmailCredits,
        CreditKind::AiCredits,
        CreditKind::AiImageCredits,
        CreditKind::StorageMbCredits,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CreditKind::SmsCredits => "SmsCredits",
            CreditKind::EmailCredits => "EmailCredits",
            CreditKind::AiCredits => "AiCredits",
            CreditKind::AiImageCredits => "AiImageCredits",
            CreditKind::StorageMbCredits => "StorageMbCredits",
        }
    }

    /// Storage credits expire and are priced per day
    pub fn is_time_bound(&self) -> bool {
        matches!(self, CreditKind::StorageMbCredits)
    }
}

impl std::str::FromStr for CreditKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CreditKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown credit kind: {s}"))
    }
}

/// User (tenant) account state touched by payments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: i64,
    pub plan_id: Option<i64>,
    #[serde(with = "option_timestamp")]
    pub plan_expired_at: Option<i64>,
    pub sms_credits: i64,
    pub email_credits: i64,
    pub ai_credits: i64,
    pub ai_image_credits: i64,
    pub storage_mb_credits: i64,
    #[serde(with = "option_timestamp")]
    pub storage_mb_credits_expire_at: Option<i64>,
}

impl UserAccount {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            plan_id: None,
            plan_expired_at: None,
            sms_credits: 0,
            email_credits: 0,
            ai_credits: 0,
            ai_image_credits: 0,
            storage_mb_credits: 0,
            storage_mb_credits_expire_at: None,
        }
    }

    pub fn credit_mut(&mut self, kind: CreditKind) -> &mut i64 {
        match kind {
            CreditKind::SmsCredits => &mut self.sms_credits,
            CreditKind::EmailCredits => &mut self.email_credits,
            CreditKind::AiCredits => &mut self.ai_credits,
            CreditKind::AiImageCredits => &mut self.ai_image_credits,
            CreditKind::StorageMbCredits => &mut self.storage_mb_credits,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: i64,
    pub name: String,
    pub price: i64,
    pub duration_days: i64,
    pub sms_credits: i64,
    pub email_credits: i64,
    pub ai_credits: i64,
    pub ai_image_credits: i64,
    pub storage_mb_credits: i64,
    #[serde(default)]
    pub discount: Option<i64>,
    #[serde(default)]
    pub discount_type: Option<DiscountType>,
}

impl Plan {
    /// Price after the plan's own discount, never below zero
    pub fn final_price(&self) -> i64 {
        let discount = match (self.discount, self.discount_type) {
            (Some(d), Some(DiscountType::Fixed)) if d > 0 => d,
            (Some(d), Some(DiscountType::Percentage)) if d > 0 => {
                (i128::from(self.price) * i128::from(d) / 100) as i64
            }
            _ => 0,
        };
        (self.price - discount).max(0)
    }
}

/// Price of one credit unit (per day for time-bound credits)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitPrice {
    pub id: i64,
    pub name: CreditKind,
    pub price: i64,
}

/// Credits to add to a user's ledger in one unit of work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditGrant {
    pub kind: CreditKind,
    pub count: i64,
    /// Expiry for time-bound credits
    pub expire_at: Option<i64>,
}
