//! Basket Model

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::serde_helpers::timestamp;

/// One active basket per (customer, site)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Basket {
    pub id: i64,
    pub site_id: i64,
    pub customer_id: i64,
    pub discount_id: Option<i64>,
    pub total_raw_price: i64,
    pub total_coupon_discount: i64,
    pub total_discount: i64,
    pub total_price_with_coupon_discount: i64,
    pub items: Vec<BasketItem>,
    #[serde(with = "timestamp")]
    pub created_at: i64,
    #[serde(with = "timestamp")]
    pub updated_at: i64,
}

impl Basket {
    /// Shape returned when the customer has no basket yet
    pub fn empty(site_id: i64, customer_id: i64) -> Self {
        Self {
            id: 0,
            site_id,
            customer_id,
            discount_id: None,
            total_raw_price: 0,
            total_coupon_discount: 0,
            total_discount: 0,
            total_price_with_coupon_discount: 0,
            items: Vec::new(),
            created_at: 0,
            updated_at: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasketItem {
    pub id: i64,
    pub basket_id: i64,
    pub product_id: i64,
    pub product_variant_id: i64,
    pub quantity: i32,
    pub raw_price: i64,
    pub final_raw_price: i64,
    pub final_price_with_coupon_discount: i64,
    pub just_coupon_price: i64,
    pub just_discount_price: i64,
    /// Refreshed on every pricing run; clients echo it back at checkout
    #[serde(with = "timestamp")]
    pub version: i64,
}

/// Requested basket line (input to pricing and basket update)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct BasketLine {
    /// Existing basket item id, 0 / absent for new lines
    #[serde(default)]
    pub basket_item_id: i64,
    pub product_id: i64,
    pub product_variant_id: i64,
    #[validate(range(min = 1, max = 10000))]
    pub quantity: i32,
}

/// Item version the client last observed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedItem {
    pub basket_item_id: i64,
    #[serde(with = "timestamp")]
    pub version: i64,
}
