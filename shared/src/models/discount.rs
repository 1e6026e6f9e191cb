//! Discount codes (site level) and the shared discount type

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use super::serde_helpers::{option_timestamp, timestamp};

/// How a coupon or discount reduces a price
///
/// `value` is accepted as a legacy synonym of `fixed` on input only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    Percentage,
    #[serde(alias = "value")]
    Fixed,
}

impl DiscountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscountType::Percentage => "percentage",
            DiscountType::Fixed => "fixed",
        }
    }
}

impl std::str::FromStr for DiscountType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "percentage" => Ok(DiscountType::Percentage),
            "fixed" | "value" => Ok(DiscountType::Fixed),
            other => Err(format!("unknown discount type: {other}")),
        }
    }
}

/// Check the value range for a discount type (used by coupon and discount inputs)
pub fn validate_discount_value(kind: DiscountType, value: i64) -> Result<(), ValidationError> {
    let ok = match kind {
        DiscountType::Percentage => (1..=100).contains(&value),
        DiscountType::Fixed => value >= 1,
    };
    if ok {
        Ok(())
    } else {
        let mut err = ValidationError::new("discount_value");
        err.message = Some("percentage must be 1..=100, fixed must be positive".into());
        Err(err)
    }
}

/// Site-level discount code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Discount {
    pub id: i64,
    pub site_id: i64,
    pub user_id: i64,
    pub code: String,
    pub quantity: i64,
    #[serde(rename = "type")]
    pub discount_type: DiscountType,
    pub value: i64,
    #[serde(with = "timestamp")]
    pub expiry_date: i64,
    #[serde(with = "timestamp")]
    pub created_at: i64,
    #[serde(with = "timestamp")]
    pub updated_at: i64,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default, with = "option_timestamp")]
    pub deleted_at: Option<i64>,
}

impl Discount {
    /// Quantity left and not expired (redemption history is checked separately)
    pub fn is_usable_at(&self, now: i64) -> bool {
        !self.is_deleted && self.quantity > 0 && now < self.expiry_date
    }
}

/// Create / update payload for a discount
#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_discount_input"))]
pub struct DiscountInput {
    pub site_id: i64,
    #[validate(length(min = 1, max = 64))]
    pub code: String,
    #[validate(range(min = 0))]
    pub quantity: i64,
    #[serde(rename = "type")]
    pub discount_type: DiscountType,
    pub value: i64,
    #[serde(with = "timestamp")]
    pub expiry_date: i64,
}

fn validate_discount_input(input: &DiscountInput) -> Result<(), ValidationError> {
    validate_discount_value(input.discount_type, input.value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_is_a_synonym_for_fixed_on_input() {
        let t: DiscountType = serde_json::from_str("\"value\"").unwrap();
        assert_eq!(t, DiscountType::Fixed);
        assert_eq!(serde_json::to_string(&t).unwrap(), "\"fixed\"");
    }

    #[test]
    fn unknown_discount_type_fails_at_the_boundary() {
        let r: Result<DiscountType, _> = serde_json::from_str("\"bogus\"");
        assert!(r.is_err());
        assert!("bogus".parse::<DiscountType>().is_err());
    }

    #[test]
    fn percentage_range_is_enforced() {
        assert!(validate_discount_value(DiscountType::Percentage, 0).is_err());
        assert!(validate_discount_value(DiscountType::Percentage, 101).is_err());
        assert!(validate_discount_value(DiscountType::Percentage, 10).is_ok());
        assert!(validate_discount_value(DiscountType::Fixed, 1).is_ok());
    }
}
