//! Pricing Engine
//!
//! Loads a snapshot through the catalog and discount stores, then hands it to
//! the pure calculator. Reads only; nothing is decremented here.

use std::collections::HashMap;
use std::sync::Arc;

use shared::models::BasketLine;

use super::calculator::{DiscountLookup, PricedBasket, PricingError, PricingSnapshot, price_basket};
use crate::db::{CatalogStore, DiscountStore, RepoError};

/// Which discount the basket asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscountRef<'a> {
    None,
    /// Code typed by the customer
    Code(&'a str),
    /// Discount id stored on the basket by an earlier pricing run
    Id(i64),
}

/// One pricing request
#[derive(Debug, Clone)]
pub struct PriceRequest<'a> {
    pub site_id: i64,
    pub customer_id: i64,
    pub discount: DiscountRef<'a>,
    pub lines: &'a [BasketLine],
    /// Basket item id → last stored version
    pub prev_versions: HashMap<i64, i64>,
    pub now: i64,
}

#[derive(Clone)]
pub struct PricingEngine {
    catalog: Arc<dyn CatalogStore>,
    discounts: Arc<dyn DiscountStore>,
}

impl std::fmt::Debug for PricingEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PricingEngine").finish_non_exhaustive()
    }
}

impl PricingEngine {
    pub fn new(catalog: Arc<dyn CatalogStore>, discounts: Arc<dyn DiscountStore>) -> Self {
        Self { catalog, discounts }
    }

    pub async fn price(&self, req: PriceRequest<'_>) -> Result<PricedBasket, PricingError> {
        let snapshot = self
            .load_snapshot(req.site_id, req.customer_id, req.discount, req.lines)
            .await?;
        let priced = price_basket(&snapshot, req.lines, &req.prev_versions, req.now)?;
        tracing::debug!(
            site_id = req.site_id,
            customer_id = req.customer_id,
            items = priced.items.len(),
            total = priced.totals.total_price_with_coupon_discount,
            "Basket priced"
        );
        Ok(priced)
    }

    pub async fn load_snapshot(
        &self,
        site_id: i64,
        customer_id: i64,
        discount: DiscountRef<'_>,
        lines: &[BasketLine],
    ) -> Result<PricingSnapshot, PricingError> {
        let mut ids: Vec<i64> = lines.iter().map(|l| l.product_id).collect();
        ids.sort_unstable();
        ids.dedup();
        let products = if ids.is_empty() {
            HashMap::new()
        } else {
            self.catalog
                .products_by_ids(&ids)
                .await?
                .into_iter()
                .map(|p| (p.id, p))
                .collect()
        };

        let found = match discount {
            DiscountRef::None => None,
            DiscountRef::Code(code) => Some((
                code.to_string(),
                self.discounts.find_discount_by_code(site_id, code).await?,
            )),
            DiscountRef::Id(id) => match self.discounts.get_discount(id).await {
                Ok(d) => Some((d.code.clone(), Some(d))),
                Err(RepoError::NotFound(_)) => Some((id.to_string(), None)),
                Err(e) => return Err(e.into()),
            },
        };
        let discount = match found {
            None => DiscountLookup::NotRequested,
            Some((code, None)) => DiscountLookup::Unknown(code),
            Some((_, Some(d))) => {
                let redeemed = self.discounts.has_redeemed(customer_id, d.id).await?;
                DiscountLookup::Found {
                    discount: d,
                    redeemed,
                }
            }
        };

        Ok(PricingSnapshot {
            site_id,
            products,
            discount,
        })
    }
}
