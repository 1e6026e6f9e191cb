//! Product Model

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use super::discount::{DiscountType, validate_discount_value};
use super::serde_helpers::{option_timestamp, timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    Active,
    Inactive,
}

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductStatus::Active => "active",
            ProductStatus::Inactive => "inactive",
        }
    }
}

impl std::str::FromStr for ProductStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ProductStatus::Active),
            "inactive" => Ok(ProductStatus::Inactive),
            other => Err(format!("unknown product status: {other}")),
        }
    }
}

/// Product entity (aggregate root of variants and coupon)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub site_id: i64,
    pub user_id: i64,
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub status: ProductStatus,
    /// Weight in grams
    pub weight: i64,
    pub free_send: bool,
    pub selling_count: i64,
    pub visited_count: i64,
    pub review_count: i64,
    pub rate: f64,
    #[serde(default)]
    pub category_ids: Vec<i64>,
    #[serde(default)]
    pub badge_ids: Vec<i64>,
    #[serde(default)]
    pub attribute_ids: Vec<i64>,
    pub variants: Vec<ProductVariant>,
    pub coupon: Option<Coupon>,
    #[serde(with = "timestamp")]
    pub created_at: i64,
    #[serde(with = "timestamp")]
    pub updated_at: i64,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default, with = "option_timestamp")]
    pub deleted_at: Option<i64>,
}

impl Product {
    pub fn variant(&self, variant_id: i64) -> Option<&ProductVariant> {
        self.variants.iter().find(|v| v.id == variant_id)
    }

    /// Lowest variant price, used by price filters and sorts
    pub fn min_price(&self) -> i64 {
        self.variants.iter().map(|v| v.price).min().unwrap_or(0)
    }
}

/// Product variant - the unit that carries price and stock
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductVariant {
    pub id: i64,
    pub product_id: i64,
    pub name: String,
    /// Price in minor units
    pub price: i64,
    pub stock: i64,
    /// Bumped on every stock change
    pub version: i64,
}

/// Product-level coupon (at most one per product)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coupon {
    pub id: i64,
    pub product_id: i64,
    pub quantity: i64,
    #[serde(rename = "type")]
    pub discount_type: DiscountType,
    pub value: i64,
    #[serde(with = "timestamp")]
    pub expiry_date: i64,
}

impl Coupon {
    pub fn is_valid_at(&self, now: i64) -> bool {
        self.quantity > 0 && now < self.expiry_date
    }
}

// ============================================================================
// Input DTOs
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct VariantInput {
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[validate(range(min = 0))]
    pub price: i64,
    #[validate(range(min = 0))]
    pub stock: i64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_coupon_input"))]
pub struct CouponInput {
    #[validate(range(min = 0))]
    pub quantity: i64,
    #[serde(rename = "type")]
    pub discount_type: DiscountType,
    pub value: i64,
    #[serde(with = "timestamp")]
    pub expiry_date: i64,
}

fn validate_coupon_input(input: &CouponInput) -> Result<(), ValidationError> {
    validate_discount_value(input.discount_type, input.value)
}

/// Create / update payload for a product. Variants and coupon are replaced wholesale.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ProductInput {
    pub site_id: i64,
    #[validate(custom(function = "crate::models::validate_slug"))]
    pub slug: String,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_status")]
    pub status: ProductStatus,
    #[validate(range(min = 0))]
    #[serde(default)]
    pub weight: i64,
    #[serde(default)]
    pub free_send: bool,
    #[serde(default)]
    pub category_ids: Vec<i64>,
    #[serde(default)]
    pub badge_ids: Vec<i64>,
    #[serde(default)]
    pub attribute_ids: Vec<i64>,
    #[validate(length(min = 1), nested)]
    pub variants: Vec<VariantInput>,
    #[validate(nested)]
    pub coupon: Option<CouponInput>,
}

fn default_status() -> ProductStatus {
    ProductStatus::Active
}
