use async_trait::async_trait;
use shared::error::ErrorCode;
use shared::models::{
    Basket, Coupon, Discount, DiscountInput, Gateway, GatewayAccount, Product, ProductInput,
    ProductVariant,
};
use shared::query::{PaginatedResponse, PaginationRequest};
use shared::util::now_millis;

use super::{MemoryState, MemoryStore};
use crate::db::filter::{ProductFilter, SortKind};
use crate::db::paging::{
    BASKET_SORT, DISCOUNT_SORT, GATEWAY_SORT, PRODUCT_SORT, SortValue, matches_search, paginate,
};
use crate::db::{
    BasketStore, CatalogStore, DiscountStore, GatewayStore, RepoError, RepoResult,
};

fn product_sort_key(p: &Product, field: &str) -> SortValue {
    match field {
        "name" => SortValue::Text(p.name.clone()),
        "created_at" => SortValue::Int(p.created_at),
        "updated_at" => SortValue::Int(p.updated_at),
        "selling_count" => SortValue::Int(p.selling_count),
        _ => SortValue::Int(p.id),
    }
}

impl MemoryState {
    fn slug_taken(&self, site_id: i64, slug: &str, except: i64) -> bool {
        self.products
            .values()
            .any(|p| !p.is_deleted && p.site_id == site_id && p.slug == slug && p.id != except)
    }

    /// Fresh variants + coupon for `product_id` from an input payload
    fn build_children(
        &mut self,
        product_id: i64,
        input: &ProductInput,
        now: i64,
    ) -> (Vec<ProductVariant>, Option<Coupon>) {
        let variants = input
            .variants
            .iter()
            .map(|v| ProductVariant {
                id: self.next_id(),
                product_id,
                name: v.name.clone(),
                price: v.price,
                stock: v.stock,
                version: now,
            })
            .collect();
        let coupon = input.coupon.as_ref().map(|c| Coupon {
            id: self.next_id(),
            product_id,
            quantity: c.quantity,
            discount_type: c.discount_type,
            value: c.value,
            expiry_date: c.expiry_date,
        });
        (variants, coupon)
    }

    fn live_product_mut(&mut self, id: i64) -> RepoResult<&mut Product> {
        self.products
            .get_mut(&id)
            .filter(|p| !p.is_deleted)
            .ok_or(RepoError::NotFound(ErrorCode::ProductNotFound))
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn create_product(&self, user_id: i64, input: &ProductInput) -> RepoResult<Product> {
        let mut state = self.state.lock();
        if state.slug_taken(input.site_id, &input.slug, 0) {
            return Err(RepoError::Conflict(ErrorCode::SlugAlreadyExists));
        }
        let now = now_millis();
        let id = state.next_id();
        let (variants, coupon) = state.build_children(id, input, now);
        let product = Product {
            id,
            site_id: input.site_id,
            user_id,
            slug: input.slug.clone(),
            name: input.name.clone(),
            description: input.description.clone(),
            status: input.status,
            weight: input.weight,
            free_send: input.free_send,
            selling_count: 0,
            visited_count: 0,
            review_count: 0,
            rate: 0.0,
            category_ids: input.category_ids.clone(),
            badge_ids: input.badge_ids.clone(),
            attribute_ids: input.attribute_ids.clone(),
            variants,
            coupon,
            created_at: now,
            updated_at: now,
            is_deleted: false,
            deleted_at: None,
        };
        state.products.insert(id, product.clone());
        Ok(product)
    }

    async fn update_product(&self, id: i64, input: &ProductInput) -> RepoResult<Product> {
        let mut state = self.state.lock();
        let site_id = state.live_product_mut(id)?.site_id;
        if site_id != input.site_id {
            return Err(RepoError::Conflict(ErrorCode::SiteMismatch));
        }
        if state.slug_taken(site_id, &input.slug, id) {
            return Err(RepoError::Conflict(ErrorCode::SlugAlreadyExists));
        }
        let now = now_millis();
        let (variants, coupon) = state.build_children(id, input, now);
        let product = state.live_product_mut(id)?;
        product.slug = input.slug.clone();
        product.name = input.name.clone();
        product.description = input.description.clone();
        product.status = input.status;
        product.weight = input.weight;
        product.free_send = input.free_send;
        product.category_ids = input.category_ids.clone();
        product.badge_ids = input.badge_ids.clone();
        product.attribute_ids = input.attribute_ids.clone();
        product.variants = variants;
        product.coupon = coupon;
        product.updated_at = now;
        Ok(product.clone())
    }

    async fn get_product(&self, id: i64) -> RepoResult<Product> {
        let mut state = self.state.lock();
        state.live_product_mut(id).map(|p| p.clone())
    }

    async fn get_product_by_slug(&self, site_id: i64, slug: &str) -> RepoResult<Product> {
        self.state
            .lock()
            .products
            .values()
            .find(|p| !p.is_deleted && p.site_id == site_id && p.slug == slug)
            .cloned()
            .ok_or(RepoError::NotFound(ErrorCode::ProductNotFound))
    }

    async fn products_by_ids(&self, ids: &[i64]) -> RepoResult<Vec<Product>> {
        let state = self.state.lock();
        Ok(ids
            .iter()
            .filter_map(|id| state.products.get(id))
            .filter(|p| !p.is_deleted)
            .cloned()
            .collect())
    }

    async fn list_products(
        &self,
        site_id: i64,
        page: &PaginationRequest,
    ) -> RepoResult<PaginatedResponse<Product>> {
        let state = self.state.lock();
        let items = state
            .products
            .values()
            .filter(|p| !p.is_deleted && p.site_id == site_id)
            .filter(|p| matches_search(page, &[&p.name, &p.slug]))
            .cloned()
            .collect();
        Ok(paginate(items, page, PRODUCT_SORT, product_sort_key, |p| p.id))
    }

    async fn filter_products(
        &self,
        site_id: i64,
        filter: &ProductFilter,
        sort: SortKind,
        page: &PaginationRequest,
    ) -> RepoResult<PaginatedResponse<Product>> {
        let state = self.state.lock();
        let mut items: Vec<Product> = state
            .products
            .values()
            .filter(|p| !p.is_deleted && p.site_id == site_id && filter.matches(p))
            .cloned()
            .collect();
        items.sort_by(|a, b| sort.compare(a, b));
        Ok(PaginatedResponse::from_vec(items, page))
    }

    async fn soft_delete_product(&self, id: i64) -> RepoResult<()> {
        let mut state = self.state.lock();
        let product = state.live_product_mut(id)?;
        let now = now_millis();
        product.is_deleted = true;
        product.deleted_at = Some(now);
        product.updated_at = now;
        Ok(())
    }
}

// ========== discounts ==========

impl MemoryState {
    fn code_taken(&self, site_id: i64, code: &str, except: i64) -> bool {
        self.discounts
            .values()
            .any(|d| !d.is_deleted && d.site_id == site_id && d.code == code && d.id != except)
    }

    fn live_discount_mut(&mut self, id: i64) -> RepoResult<&mut Discount> {
        self.discounts
            .get_mut(&id)
            .filter(|d| !d.is_deleted)
            .ok_or(RepoError::NotFound(ErrorCode::DiscountNotFound))
    }
}

#[async_trait]
impl DiscountStore for MemoryStore {
    async fn create_discount(&self, user_id: i64, input: &DiscountInput) -> RepoResult<Discount> {
        let mut state = self.state.lock();
        if state.code_taken(input.site_id, &input.code, 0) {
            return Err(RepoError::Duplicate(format!("discount code {}", input.code)));
        }
        let now = now_millis();
        let discount = Discount {
            id: state.next_id(),
            site_id: input.site_id,
            user_id,
            code: input.code.clone(),
            quantity: input.quantity,
            discount_type: input.discount_type,
            value: input.value,
            expiry_date: input.expiry_date,
            created_at: now,
            updated_at: now,
            is_deleted: false,
            deleted_at: None,
        };
        state.discounts.insert(discount.id, discount.clone());
        Ok(discount)
    }

    async fn update_discount(&self, id: i64, input: &DiscountInput) -> RepoResult<Discount> {
        let mut state = self.state.lock();
        let site_id = state.live_discount_mut(id)?.site_id;
        if site_id != input.site_id {
            return Err(RepoError::Conflict(ErrorCode::SiteMismatch));
        }
        if state.code_taken(site_id, &input.code, id) {
            return Err(RepoError::Duplicate(format!("discount code {}", input.code)));
        }
        let discount = state.live_discount_mut(id)?;
        discount.code = input.code.clone();
        discount.quantity = input.quantity;
        discount.discount_type = input.discount_type;
        discount.value = input.value;
        discount.expiry_date = input.expiry_date;
        discount.updated_at = now_millis();
        Ok(discount.clone())
    }

    async fn get_discount(&self, id: i64) -> RepoResult<Discount> {
        let mut state = self.state.lock();
        state.live_discount_mut(id).map(|d| d.clone())
    }

    async fn find_discount_by_code(
        &self,
        site_id: i64,
        code: &str,
    ) -> RepoResult<Option<Discount>> {
        Ok(self
            .state
            .lock()
            .discounts
            .values()
            .find(|d| !d.is_deleted && d.site_id == site_id && d.code == code)
            .cloned())
    }

    async fn list_discounts(
        &self,
        site_id: Option<i64>,
        page: &PaginationRequest,
    ) -> RepoResult<PaginatedResponse<Discount>> {
        let state = self.state.lock();
        let items = state
            .discounts
            .values()
            .filter(|d| !d.is_deleted && site_id.is_none_or(|s| d.site_id == s))
            .filter(|d| matches_search(page, &[&d.code]))
            .cloned()
            .collect();
        Ok(paginate(
            items,
            page,
            DISCOUNT_SORT,
            |d, field| match field {
                "code" => SortValue::Text(d.code.clone()),
                "created_at" => SortValue::Int(d.created_at),
                "expiry_date" => SortValue::Int(d.expiry_date),
                _ => SortValue::Int(d.id),
            },
            |d| d.id,
        ))
    }

    async fn soft_delete_discount(&self, id: i64) -> RepoResult<()> {
        let mut state = self.state.lock();
        let discount = state.live_discount_mut(id)?;
        discount.is_deleted = true;
        discount.deleted_at = Some(now_millis());
        Ok(())
    }

    async fn has_redeemed(&self, customer_id: i64, discount_id: i64) -> RepoResult<bool> {
        Ok(self
            .state
            .lock()
            .customer_discounts
            .contains(&(customer_id, discount_id)))
    }
}

// ========== baskets ==========

#[async_trait]
impl BasketStore for MemoryStore {
    async fn get_basket(&self, customer_id: i64, site_id: i64) -> RepoResult<Option<Basket>> {
        Ok(self
            .state
            .lock()
            .baskets
            .values()
            .find(|b| b.customer_id == customer_id && b.site_id == site_id)
            .cloned())
    }

    async fn upsert_basket(&self, basket: &Basket) -> RepoResult<Basket> {
        let mut state = self.state.lock();
        let now = now_millis();
        let existing = state
            .baskets
            .values()
            .find(|b| b.customer_id == basket.customer_id && b.site_id == basket.site_id)
            .map(|b| (b.id, b.created_at));

        let mut stored = basket.clone();
        match existing {
            Some((id, created_at)) => {
                stored.id = id;
                stored.created_at = created_at;
            }
            None => {
                stored.id = state.next_id();
                stored.created_at = now;
            }
        }
        stored.updated_at = now;
        for item in &mut stored.items {
            item.basket_id = stored.id;
            if item.id == 0 {
                item.id = state.next_id();
            }
        }
        state.baskets.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn list_customer_baskets(
        &self,
        customer_id: i64,
        page: &PaginationRequest,
    ) -> RepoResult<PaginatedResponse<Basket>> {
        let state = self.state.lock();
        let items = state
            .baskets
            .values()
            .filter(|b| b.customer_id == customer_id)
            .cloned()
            .collect();
        Ok(paginate(items, page, BASKET_SORT, basket_sort_key, |b| b.id))
    }

    async fn list_baskets(&self, page: &PaginationRequest) -> RepoResult<PaginatedResponse<Basket>> {
        let state = self.state.lock();
        let items = state.baskets.values().cloned().collect();
        Ok(paginate(items, page, BASKET_SORT, basket_sort_key, |b| b.id))
    }
}

fn basket_sort_key(b: &Basket, field: &str) -> SortValue {
    match field {
        "updated_at" => SortValue::Int(b.updated_at),
        _ => SortValue::Int(b.id),
    }
}

// ========== gateways ==========

#[async_trait]
impl GatewayStore for MemoryStore {
    async fn get_gateway(&self, id: i64) -> RepoResult<Gateway> {
        self.state
            .lock()
            .gateways
            .get(&id)
            .cloned()
            .ok_or(RepoError::NotFound(ErrorCode::GatewayNotConfigured))
    }

    async fn gateway_for_site(&self, site_id: i64) -> RepoResult<Option<Gateway>> {
        Ok(self
            .state
            .lock()
            .gateways
            .values()
            .find(|g| g.site_id == site_id)
            .cloned())
    }

    async fn upsert_gateway(
        &self,
        site_id: i64,
        user_id: i64,
        accounts: Vec<GatewayAccount>,
    ) -> RepoResult<Gateway> {
        let mut state = self.state.lock();
        let now = now_millis();
        let existing = state
            .gateways
            .values()
            .find(|g| g.site_id == site_id)
            .map(|g| g.id);
        let id = match existing {
            Some(id) => id,
            None => {
                let id = state.next_id();
                state.gateways.insert(
                    id,
                    Gateway {
                        id,
                        site_id,
                        user_id,
                        accounts: Vec::new(),
                        created_at: now,
                        updated_at: now,
                    },
                );
                id
            }
        };
        let gateway = state
            .gateways
            .get_mut(&id)
            .ok_or(RepoError::NotFound(ErrorCode::GatewayNotConfigured))?;
        gateway.merge_accounts(accounts);
        gateway.updated_at = now;
        Ok(gateway.clone())
    }

    async fn list_gateways(&self, page: &PaginationRequest) -> RepoResult<PaginatedResponse<Gateway>> {
        let state = self.state.lock();
        let items = state.gateways.values().cloned().collect();
        Ok(paginate(
            items,
            page,
            GATEWAY_SORT,
            |g, field| match field {
                "created_at" => SortValue::Int(g.created_at),
                "updated_at" => SortValue::Int(g.updated_at),
                _ => SortValue::Int(g.id),
            },
            |g| g.id,
        ))
    }
}
