//! Basket service
//!
//! The basket is the only mutable pre-checkout state. Every update reprices
//! the whole basket and refreshes item versions, which is what the checkout
//! compares against.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shared::models::{Basket, BasketItem, BasketLine};
use shared::query::{PaginatedResponse, PaginationRequest};
use shared::util::now_millis;
use validator::Validate;

use crate::db::{BasketStore, RepoResult};
use crate::pricing::{
    DiscountRef, DiscountStatus, PriceRequest, PricedBasket, PricingEngine, PricingError,
};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct BasketUpdate {
    pub site_id: i64,
    #[validate(length(max = 200))]
    pub items: Vec<BasketLine>,
    /// Site discount code; omitted keeps no discount
    #[validate(length(min = 1, max = 64))]
    pub code: Option<String>,
}

/// Stored basket plus what happened to the requested code
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BasketView {
    #[serde(flatten)]
    pub basket: Basket,
    pub discount: DiscountStatus,
    pub out_of_stock_variants: Vec<i64>,
}

#[derive(Clone)]
pub struct BasketService {
    baskets: Arc<dyn BasketStore>,
    pricing: PricingEngine,
}

impl BasketService {
    pub fn new(baskets: Arc<dyn BasketStore>, pricing: PricingEngine) -> Self {
        Self { baskets, pricing }
    }

    /// Stored basket, or the empty shape when the customer has none
    pub async fn get_basket(&self, customer_id: i64, site_id: i64) -> RepoResult<Basket> {
        Ok(self
            .baskets
            .get_basket(customer_id, site_id)
            .await?
            .unwrap_or_else(|| Basket::empty(site_id, customer_id)))
    }

    /// Replace the item list, reprice and store in one unit of work
    pub async fn update_basket(
        &self,
        customer_id: i64,
        update: &BasketUpdate,
    ) -> Result<BasketView, PricingError> {
        let now = now_millis();
        let existing = self.baskets.get_basket(customer_id, update.site_id).await?;
        let priced = self.price_update(customer_id, update, existing.as_ref(), now).await?;

        let totals = &priced.totals;
        let mut basket = existing.unwrap_or_else(|| Basket::empty(update.site_id, customer_id));
        basket.discount_id = priced.applied_discount_id();
        basket.total_raw_price = totals.total_raw_price;
        basket.total_coupon_discount = totals.total_coupon_discount;
        basket.total_discount = totals.total_discount;
        basket.total_price_with_coupon_discount = totals.total_price_with_coupon_discount;
        basket.items = priced
            .items
            .iter()
            .map(|i| BasketItem {
                id: i.basket_item_id,
                basket_id: basket.id,
                product_id: i.product_id,
                product_variant_id: i.product_variant_id,
                quantity: i.quantity,
                raw_price: i.raw_price,
                final_raw_price: i.final_raw_price,
                final_price_with_coupon_discount: i.final_price_with_coupon_discount,
                just_coupon_price: i.just_coupon_price,
                just_discount_price: i.just_discount_price,
                version: i.version,
            })
            .collect();

        let basket = self.baskets.upsert_basket(&basket).await?;
        tracing::info!(
            basket_id = basket.id,
            customer_id,
            site_id = basket.site_id,
            items = basket.items.len(),
            total = basket.total_price_with_coupon_discount,
            "Basket updated"
        );
        Ok(BasketView {
            basket,
            out_of_stock_variants: priced.out_of_stock_variants(),
            discount: priced.discount,
        })
    }

    /// Price `update` against the stored basket without writing anything
    pub async fn preview(
        &self,
        customer_id: i64,
        update: &BasketUpdate,
    ) -> Result<PricedBasket, PricingError> {
        let existing = self.baskets.get_basket(customer_id, update.site_id).await?;
        self.price_update(customer_id, update, existing.as_ref(), now_millis())
            .await
    }

    async fn price_update(
        &self,
        customer_id: i64,
        update: &BasketUpdate,
        existing: Option<&Basket>,
        now: i64,
    ) -> Result<PricedBasket, PricingError> {
        update
            .validate()
            .map_err(|e| PricingError::BasketInvalid(e.to_string()))?;

        let prev_versions: HashMap<i64, i64> = existing
            .map(|b| b.items.iter().map(|i| (i.id, i.version)).collect())
            .unwrap_or_default();

        // 未知的 basket_item_id 当作新行；同一行不能出现两次
        let mut claimed = HashSet::new();
        let mut lines = Vec::with_capacity(update.items.len());
        for line in &update.items {
            let mut line = line.clone();
            if line.basket_item_id != 0 {
                if !prev_versions.contains_key(&line.basket_item_id) {
                    line.basket_item_id = 0;
                } else if !claimed.insert(line.basket_item_id) {
                    return Err(PricingError::BasketInvalid(format!(
                        "basket item {} listed twice",
                        line.basket_item_id
                    )));
                }
            }
            lines.push(line);
        }

        let discount = update
            .code
            .as_deref()
            .map_or(DiscountRef::None, DiscountRef::Code);
        self.pricing
            .price(PriceRequest {
                site_id: update.site_id,
                customer_id,
                discount,
                lines: &lines,
                prev_versions,
                now,
            })
            .await
    }

    pub async fn customer_baskets(
        &self,
        customer_id: i64,
        page: &PaginationRequest,
    ) -> RepoResult<PaginatedResponse<Basket>> {
        self.baskets.list_customer_baskets(customer_id, page).await
    }

    pub async fn all_baskets(&self, page: &PaginationRequest) -> RepoResult<PaginatedResponse<Basket>> {
        self.baskets.list_baskets(page).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{CatalogStore, MemoryStore};
    use shared::models::ProductInput;

    async fn setup() -> (Arc<MemoryStore>, BasketService, i64, i64) {
        let store = Arc::new(MemoryStore::new());
        let input: ProductInput = serde_json::from_value(serde_json::json!({
            "site_id": 1, "slug": "mug", "name": "Mug",
            "variants": [{"name": "default", "price": 500, "stock": 5}]
        }))
        .unwrap();
        let product = store.create_product(1, &input).await.unwrap();
        let pricing = PricingEngine::new(store.clone(), store.clone());
        let service = BasketService::new(store.clone(), pricing);
        let variant = product.variants[0].id;
        (store, service, product.id, variant)
    }

    fn update(product: i64, variant: i64, item_id: i64, qty: i32) -> BasketUpdate {
        BasketUpdate {
            site_id: 1,
            items: vec![BasketLine {
                basket_item_id: item_id,
                product_id: product,
                product_variant_id: variant,
                quantity: qty,
            }],
            code: None,
        }
    }

    #[tokio::test]
    async fn missing_basket_is_empty() {
        let (_store, service, _, _) = setup().await;
        let basket = service.get_basket(10, 1).await.unwrap();
        assert_eq!(basket.id, 0);
        assert!(basket.items.is_empty());
    }

    #[tokio::test]
    async fn update_prices_and_stores_items() {
        let (_store, service, product, variant) = setup().await;
        let view = service.update_basket(10, &update(product, variant, 0, 2)).await.unwrap();
        assert_eq!(view.basket.total_raw_price, 1_000);
        assert_eq!(view.basket.items.len(), 1);
        assert!(view.basket.items[0].id > 0);
        assert_eq!(view.discount, DiscountStatus::NotRequested);

        let stored = service.get_basket(10, 1).await.unwrap();
        assert_eq!(stored, view.basket);
    }

    #[tokio::test]
    async fn updating_a_line_refreshes_its_version() {
        let (_store, service, product, variant) = setup().await;
        let first = service.update_basket(10, &update(product, variant, 0, 1)).await.unwrap();
        let item = first.basket.items[0].clone();

        let second = service
            .update_basket(10, &update(product, variant, item.id, 3))
            .await
            .unwrap();
        assert_eq!(second.basket.id, first.basket.id);
        assert_eq!(second.basket.items[0].id, item.id);
        assert!(second.basket.items[0].version > item.version);
        assert_eq!(second.basket.items[0].quantity, 3);
    }

    #[tokio::test]
    async fn zero_quantity_is_rejected() {
        let (_store, service, product, variant) = setup().await;
        let err = service
            .update_basket(10, &update(product, variant, 0, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, PricingError::BasketInvalid(_)));
    }

    #[tokio::test]
    async fn unknown_code_is_reported_not_raised() {
        let (_store, service, product, variant) = setup().await;
        let mut req = update(product, variant, 0, 1);
        req.code = Some("NOPE".into());
        let view = service.update_basket(10, &req).await.unwrap();
        assert!(matches!(view.discount, DiscountStatus::NotApplicable { .. }));
        assert_eq!(view.basket.discount_id, None);
    }

    #[tokio::test]
    async fn preview_prices_without_storing() {
        let (_store, service, product, variant) = setup().await;
        let priced = service.preview(10, &update(product, variant, 0, 3)).await.unwrap();
        assert_eq!(priced.totals.total_raw_price, 1_500);
        assert_eq!(priced.items[0].basket_item_id, 0);
        assert_eq!(service.get_basket(10, 1).await.unwrap().id, 0);
    }
}
