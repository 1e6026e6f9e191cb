//! Basket Price Calculator
//!
//! Pure function over a [`PricingSnapshot`]. All amounts are integer minor
//! units; products are done in `i128` and floored, so nothing ever rounds up.
//!
//! Per line:
//! - `raw_price`          = variant price × quantity
//! - `just_coupon_price`  = product coupon share (0 without a valid coupon)
//! - `final_raw_price`    = raw − coupon
//! - `just_discount_price`= share of the site discount, proportional to final_raw
//! - `final_price_with_coupon_discount` = final_raw − discount share

use std::collections::HashMap;

use serde::Serialize;
use shared::error::{AppError, ErrorCode};
use shared::models::{BasketLine, Coupon, Discount, DiscountType, Product, ProductStatus};
use shared::util::millis_to_rfc3339;
use thiserror::Error;

use crate::db::RepoError;

#[derive(Debug, Error)]
pub enum PricingError {
    #[error("product {0} not found")]
    ProductNotFound(i64),

    #[error("variant {variant_id} not found on product {product_id}")]
    VariantNotFound { product_id: i64, variant_id: i64 },

    #[error("invalid basket: {0}")]
    BasketInvalid(String),

    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl From<PricingError> for AppError {
    fn from(err: PricingError) -> Self {
        match err {
            PricingError::ProductNotFound(id) => {
                AppError::new(ErrorCode::ProductNotFound).with_detail("product_id", id)
            }
            PricingError::VariantNotFound {
                product_id,
                variant_id,
            } => AppError::new(ErrorCode::VariantNotFound)
                .with_detail("product_id", product_id)
                .with_detail("product_variant_id", variant_id),
            PricingError::BasketInvalid(msg) => AppError::with_message(ErrorCode::BasketInvalid, msg),
            PricingError::Repo(e) => e.into(),
        }
    }
}

/// What the loader found for the requested discount code
#[derive(Debug, Clone, PartialEq)]
pub enum DiscountLookup {
    NotRequested,
    /// Code or id did not resolve to a live discount
    Unknown(String),
    Found { discount: Discount, redeemed: bool },
}

/// Catalog state the calculator reads
#[derive(Debug, Clone)]
pub struct PricingSnapshot {
    pub site_id: i64,
    pub products: HashMap<i64, Product>,
    pub discount: DiscountLookup,
}

/// Outcome of the site discount code. An unusable code is reported, not raised.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DiscountStatus {
    NotRequested,
    Applied {
        discount_id: i64,
        code: String,
        amount: i64,
    },
    NotApplicable {
        code: String,
        reason: ErrorCode,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PricedItem {
    pub basket_item_id: i64,
    pub product_id: i64,
    pub product_variant_id: i64,
    pub quantity: i32,
    pub raw_price: i64,
    pub just_coupon_price: i64,
    pub final_raw_price: i64,
    pub just_discount_price: i64,
    pub final_price_with_coupon_discount: i64,
    pub coupon_id: Option<i64>,
    pub out_of_stock: bool,
    #[serde(serialize_with = "as_rfc3339")]
    pub version: i64,
    /// quantity × product weight
    #[serde(skip)]
    pub weight: i64,
    #[serde(skip)]
    pub free_send: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PricedTotals {
    pub total_raw_price: i64,
    pub total_coupon_discount: i64,
    pub total_final_raw_price: i64,
    pub total_discount: i64,
    pub total_price_with_coupon_discount: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PricedBasket {
    pub site_id: i64,
    pub items: Vec<PricedItem>,
    pub totals: PricedTotals,
    pub discount: DiscountStatus,
}

impl PricedBasket {
    pub fn applied_discount_id(&self) -> Option<i64> {
        match &self.discount {
            DiscountStatus::Applied { discount_id, .. } => Some(*discount_id),
            _ => None,
        }
    }

    /// Variant ids flagged out of stock, deduplicated
    pub fn out_of_stock_variants(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .items
            .iter()
            .filter(|i| i.out_of_stock)
            .map(|i| i.product_variant_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub fn total_weight(&self) -> i64 {
        self.items.iter().fold(0, |acc, i| acc.saturating_add(i.weight))
    }

    /// True when there is at least one item and none of them pays shipping
    pub fn is_free_send(&self) -> bool {
        !self.items.is_empty() && self.items.iter().all(|i| i.free_send)
    }
}

fn as_rfc3339<S: serde::Serializer>(millis: &i64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&millis_to_rfc3339(*millis))
}

/// floor(amount × numerator / denominator), computed without overflow
fn mul_div_floor(amount: i64, numerator: i64, denominator: i64) -> i64 {
    if denominator == 0 {
        return 0;
    }
    (i128::from(amount) * i128::from(numerator) / i128::from(denominator)) as i64
}

/// Sum of money fields; a basket whose total leaves `i64` is rejected
fn checked_sum(values: impl IntoIterator<Item = i64>) -> Result<i64, PricingError> {
    values
        .into_iter()
        .try_fold(0i64, |acc, v| acc.checked_add(v))
        .ok_or_else(|| PricingError::BasketInvalid("basket total is out of range".into()))
}

/// Coupon share of one line; 0 for an invalid coupon
pub fn coupon_amount(coupon: &Coupon, raw_price: i64, quantity: i32, now: i64) -> i64 {
    if !coupon.is_valid_at(now) {
        return 0;
    }
    let amount = match coupon.discount_type {
        DiscountType::Percentage => mul_div_floor(raw_price, coupon.value, 100),
        DiscountType::Fixed => coupon.value.saturating_mul(i64::from(quantity)),
    };
    amount.clamp(0, raw_price)
}

/// Site discount over the basket's final raw sum
pub fn discount_amount(discount: &Discount, final_raw_sum: i64) -> i64 {
    let amount = match discount.discount_type {
        DiscountType::Percentage => mul_div_floor(final_raw_sum, discount.value, 100),
        DiscountType::Fixed => discount.value,
    };
    amount.clamp(0, final_raw_sum)
}

/// Split `total` across `weights` proportionally, flooring each share.
///
/// The residual goes to the largest weights first (ties by `ids` ascending),
/// never pushing a share above its weight, so `Σ shares == total` whenever
/// `total <= Σ weights`.
pub fn apportion(total: i64, weights: &[i64], ids: &[i64]) -> Vec<i64> {
    let sum: i64 = weights.iter().sum();
    if total <= 0 || sum <= 0 {
        return vec![0; weights.len()];
    }
    let total = total.min(sum);
    let mut shares: Vec<i64> = weights
        .iter()
        .map(|w| mul_div_floor(total, *w, sum))
        .collect();

    let mut residual = total - shares.iter().sum::<i64>();
    if residual > 0 {
        let mut order: Vec<usize> = (0..weights.len()).collect();
        order.sort_by(|a, b| {
            weights[*b]
                .cmp(&weights[*a])
                .then(ids[*a].cmp(&ids[*b]))
                .then(a.cmp(b))
        });
        for idx in order {
            if residual == 0 {
                break;
            }
            let room = (weights[idx] - shares[idx]).max(0);
            let take = room.min(residual);
            shares[idx] += take;
            residual -= take;
        }
    }
    shares
}

fn check_discount(lookup: &DiscountLookup, site_id: i64, now: i64) -> Result<Option<&Discount>, DiscountStatus> {
    match lookup {
        DiscountLookup::NotRequested => Ok(None),
        DiscountLookup::Unknown(code) => Err(DiscountStatus::NotApplicable {
            code: code.clone(),
            reason: ErrorCode::DiscountNotFound,
        }),
        DiscountLookup::Found { discount, redeemed } => {
            let reason = if discount.is_deleted || discount.site_id != site_id {
                Some(ErrorCode::DiscountNotFound)
            } else if discount.quantity <= 0 {
                Some(ErrorCode::DiscountExhausted)
            } else if now >= discount.expiry_date {
                Some(ErrorCode::DiscountExpired)
            } else if *redeemed {
                Some(ErrorCode::DiscountAlreadyRedeemed)
            } else {
                None
            };
            match reason {
                None => Ok(Some(discount)),
                Some(reason) => Err(DiscountStatus::NotApplicable {
                    code: discount.code.clone(),
                    reason,
                }),
            }
        }
    }
}

/// Price `lines` against `snapshot`.
///
/// `prev_versions` maps basket item id to the version last stored; every
/// priced line gets `max(now, prev + 1)` so versions strictly increase.
pub fn price_basket(
    snapshot: &PricingSnapshot,
    lines: &[BasketLine],
    prev_versions: &HashMap<i64, i64>,
    now: i64,
) -> Result<PricedBasket, PricingError> {
    // Demand per variant, so two lines of one variant share its stock
    let mut demand: HashMap<i64, i64> = HashMap::new();
    for line in lines {
        if line.quantity <= 0 {
            return Err(PricingError::BasketInvalid(format!(
                "quantity must be positive (variant {})",
                line.product_variant_id
            )));
        }
        let wanted = demand.entry(line.product_variant_id).or_default();
        *wanted = wanted.saturating_add(i64::from(line.quantity));
    }

    let mut items = Vec::with_capacity(lines.len());
    for line in lines {
        let product = snapshot
            .products
            .get(&line.product_id)
            .filter(|p| !p.is_deleted && p.status == ProductStatus::Active)
            .ok_or(PricingError::ProductNotFound(line.product_id))?;
        if product.site_id != snapshot.site_id {
            return Err(PricingError::BasketInvalid(format!(
                "product {} belongs to another site",
                product.id
            )));
        }
        let variant =
            product
                .variant(line.product_variant_id)
                .ok_or(PricingError::VariantNotFound {
                    product_id: product.id,
                    variant_id: line.product_variant_id,
                })?;

        let raw_price = variant
            .price
            .checked_mul(i64::from(line.quantity))
            .ok_or_else(|| {
                PricingError::BasketInvalid(format!("price of variant {} is out of range", variant.id))
            })?;
        let (just_coupon_price, coupon_id) = match &product.coupon {
            Some(c) => {
                let amount = coupon_amount(c, raw_price, line.quantity, now);
                (amount, (amount > 0).then_some(c.id))
            }
            None => (0, None),
        };
        let final_raw_price = raw_price - just_coupon_price;
        let wanted = demand.get(&variant.id).copied().unwrap_or_default();
        let version = match prev_versions.get(&line.basket_item_id) {
            Some(prev) => now.max(prev + 1),
            None => now,
        };

        items.push(PricedItem {
            basket_item_id: line.basket_item_id,
            product_id: product.id,
            product_variant_id: variant.id,
            quantity: line.quantity,
            raw_price,
            just_coupon_price,
            final_raw_price,
            just_discount_price: 0,
            final_price_with_coupon_discount: final_raw_price,
            coupon_id,
            out_of_stock: variant.stock < wanted,
            version,
            weight: product.weight.saturating_mul(i64::from(line.quantity)),
            free_send: product.free_send,
        });
    }

    let total_raw_price = checked_sum(items.iter().map(|i| i.raw_price))?;
    let final_raw_sum = checked_sum(items.iter().map(|i| i.final_raw_price))?;
    let discount = match check_discount(&snapshot.discount, snapshot.site_id, now) {
        Ok(None) => DiscountStatus::NotRequested,
        Ok(Some(d)) => {
            let amount = discount_amount(d, final_raw_sum);
            let weights: Vec<i64> = items.iter().map(|i| i.final_raw_price).collect();
            let ids: Vec<i64> = items.iter().map(|i| i.basket_item_id).collect();
            for (item, share) in items.iter_mut().zip(apportion(amount, &weights, &ids)) {
                item.just_discount_price = share;
                item.final_price_with_coupon_discount = item.final_raw_price - share;
            }
            DiscountStatus::Applied {
                discount_id: d.id,
                code: d.code.clone(),
                amount,
            }
        }
        Err(status) => status,
    };

    // Every other field is bounded by raw_price per line, so these cannot fail
    // once the raw total fits.
    let totals = PricedTotals {
        total_raw_price,
        total_coupon_discount: checked_sum(items.iter().map(|i| i.just_coupon_price))?,
        total_final_raw_price: final_raw_sum,
        total_discount: checked_sum(items.iter().map(|i| i.just_discount_price))?,
        total_price_with_coupon_discount: checked_sum(
            items.iter().map(|i| i.final_price_with_coupon_discount),
        )?,
    };

    Ok(PricedBasket {
        site_id: snapshot.site_id,
        items,
        totals,
        discount,
    })
}
