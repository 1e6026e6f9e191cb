//! Storage layer
//!
//! One narrow async trait per aggregate family. Every method that has to be
//! atomic is a single trait method, so each implementation can wrap it in one
//! transaction (MySQL) or one critical section (memory).

pub mod filter;
pub mod memory;
pub mod mysql;
pub mod paging;

use async_trait::async_trait;
use shared::error::{AppError, ErrorCode};
use shared::models::{
    Article, Basket, ContentInput, CreditGrant, Discount, DiscountInput, Gateway, GatewayAccount,
    HeaderFooter, Order, Page, PageInput, PageSummary, Payment, Plan, Product, ProductInput,
    UnitPrice, UsageKind, UserAccount, VerifyRecord,
};
use shared::query::{PaginatedResponse, PaginationRequest};
use thiserror::Error;

pub use filter::{ProductFilter, RangeFilter, SortKind};
pub use memory::MemoryStore;
pub use mysql::MySqlStore;

/// Repository error types
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("not found: {0}")]
    NotFound(ErrorCode),

    #[error("duplicate: {0}")]
    Duplicate(String),

    /// A business rule rejected the write (stock, coupon, discount, slug ...)
    #[error("conflict: {0}")]
    Conflict(ErrorCode),

    #[error("database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for RepoError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => RepoError::NotFound(ErrorCode::NotFound),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RepoError::Duplicate(db.message().to_string())
            }
            _ => RepoError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(err: serde_json::Error) -> Self {
        RepoError::Database(format!("corrupt json column: {err}"))
    }
}

impl From<RepoError> for AppError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound(code) => AppError::new(code),
            RepoError::Duplicate(msg) => AppError::with_message(ErrorCode::AlreadyExists, msg),
            RepoError::Conflict(code) => AppError::new(code),
            RepoError::Database(msg) => {
                tracing::error!(error = %msg, "Storage error");
                AppError::new(ErrorCode::DatabaseError)
            }
        }
    }
}

/// Result type for repository operations
pub type RepoResult<T> = Result<T, RepoError>;

// =============================================================================
// Unit-of-work inputs
// =============================================================================

/// Everything written by checkout step 3, in one transaction
#[derive(Debug, Clone)]
pub struct NewCheckout {
    /// Order with `id = 0`, status Draft; item ids are assigned by the store
    pub order: Order,
    /// Payment with `id = 0`; `order_id` and `order_data["OrderId"]` are filled by the store
    pub payment: Payment,
    /// Basket consumed by the checkout (deleted with its items)
    pub basket_id: i64,
}

/// Result of a stock/coupon/discount commit attempt
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// Payment claimed and all effects applied
    Committed { order: Order, payment: Payment },
    /// Payment was no longer pending; somebody else resolved it
    AlreadyResolved(Payment),
}

// =============================================================================
// Traits
// =============================================================================

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn create_product(&self, user_id: i64, input: &ProductInput) -> RepoResult<Product>;
    /// Variants and coupon are replaced in the same transaction
    async fn update_product(&self, id: i64, input: &ProductInput) -> RepoResult<Product>;
    async fn get_product(&self, id: i64) -> RepoResult<Product>;
    async fn get_product_by_slug(&self, site_id: i64, slug: &str) -> RepoResult<Product>;
    /// Live products among `ids`; missing ids are simply absent
    async fn products_by_ids(&self, ids: &[i64]) -> RepoResult<Vec<Product>>;
    async fn list_products(
        &self,
        site_id: i64,
        page: &PaginationRequest,
    ) -> RepoResult<PaginatedResponse<Product>>;
    async fn filter_products(
        &self,
        site_id: i64,
        filter: &ProductFilter,
        sort: SortKind,
        page: &PaginationRequest,
    ) -> RepoResult<PaginatedResponse<Product>>;
    async fn soft_delete_product(&self, id: i64) -> RepoResult<()>;
}

#[async_trait]
pub trait DiscountStore: Send + Sync {
    async fn create_discount(&self, user_id: i64, input: &DiscountInput) -> RepoResult<Discount>;
    async fn update_discount(&self, id: i64, input: &DiscountInput) -> RepoResult<Discount>;
    async fn get_discount(&self, id: i64) -> RepoResult<Discount>;
    async fn find_discount_by_code(&self, site_id: i64, code: &str)
    -> RepoResult<Option<Discount>>;
    /// `None` lists every site's discounts
    async fn list_discounts(
        &self,
        site_id: Option<i64>,
        page: &PaginationRequest,
    ) -> RepoResult<PaginatedResponse<Discount>>;
    async fn soft_delete_discount(&self, id: i64) -> RepoResult<()>;
    async fn has_redeemed(&self, customer_id: i64, discount_id: i64) -> RepoResult<bool>;
}

#[async_trait]
pub trait BasketStore: Send + Sync {
    async fn get_basket(&self, customer_id: i64, site_id: i64) -> RepoResult<Option<Basket>>;
    /// Insert or update the (customer, site) basket and replace its items
    async fn upsert_basket(&self, basket: &Basket) -> RepoResult<Basket>;
    async fn list_customer_baskets(
        &self,
        customer_id: i64,
        page: &PaginationRequest,
    ) -> RepoResult<PaginatedResponse<Basket>>;
    async fn list_baskets(&self, page: &PaginationRequest) -> RepoResult<PaginatedResponse<Basket>>;
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Insert order + items + pending payment, delete the basket
    async fn create_checkout(&self, checkout: &NewCheckout) -> RepoResult<(Order, Payment)>;

    /// Draft → AwaitingPayment, storing the provider token on the payment
    async fn mark_awaiting_payment(
        &self,
        order_id: i64,
        tracking_number: i64,
        provider_token: Option<&str>,
    ) -> RepoResult<Order>;

    /// Claim a pending order payment and apply stock, coupon and discount effects.
    ///
    /// Any failed decrement rolls the whole unit back and surfaces as
    /// `RepoError::Conflict(code)`; the payment stays pending.
    async fn commit_paid_order(
        &self,
        tracking_number: i64,
        record: &VerifyRecord,
    ) -> RepoResult<CommitOutcome>;

    /// Claim a pending payment as active and park its order in NeedsReconciliation.
    /// Returns `None` when the payment was no longer pending.
    async fn reconcile_payment(
        &self,
        tracking_number: i64,
        record: &VerifyRecord,
        reason: &str,
    ) -> RepoResult<Option<(Order, Payment)>>;

    /// Claim a pending payment as inactive and fail its order (if any).
    /// Returns `None` when the payment was no longer pending.
    async fn fail_payment(
        &self,
        tracking_number: i64,
        record: &VerifyRecord,
        reason: &str,
    ) -> RepoResult<Option<Payment>>;

    /// AwaitingPayment → Abandoned together with pending payment → inactive.
    /// Returns `None` when the payment was no longer pending.
    async fn abandon_order(&self, order_id: i64, reason: &str) -> RepoResult<Option<Order>>;

    /// Ids of AwaitingPayment orders last touched before `before` (millis)
    async fn stale_awaiting_orders(&self, before: i64) -> RepoResult<Vec<i64>>;

    async fn get_order(&self, id: i64) -> RepoResult<Order>;
    async fn list_customer_orders(
        &self,
        customer_id: i64,
        page: &PaginationRequest,
    ) -> RepoResult<PaginatedResponse<Order>>;
    async fn list_site_orders(
        &self,
        site_id: i64,
        page: &PaginationRequest,
    ) -> RepoResult<PaginatedResponse<Order>>;
    async fn list_orders(&self, page: &PaginationRequest) -> RepoResult<PaginatedResponse<Order>>;
}

#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Insert a payment that belongs to no order (credit charge, plan upgrade)
    async fn create_payment(&self, payment: &Payment) -> RepoResult<Payment>;
    async fn set_provider_token(&self, tracking_number: i64, token: Option<&str>)
    -> RepoResult<()>;
    async fn get_payment_by_tracking(&self, tracking_number: i64) -> RepoResult<Payment>;
    async fn list_payments(&self, page: &PaginationRequest)
    -> RepoResult<PaginatedResponse<Payment>>;
}

#[async_trait]
pub trait GatewayStore: Send + Sync {
    async fn get_gateway(&self, id: i64) -> RepoResult<Gateway>;
    async fn gateway_for_site(&self, site_id: i64) -> RepoResult<Option<Gateway>>;
    /// Create the site's gateway record or merge accounts into it
    async fn upsert_gateway(
        &self,
        site_id: i64,
        user_id: i64,
        accounts: Vec<GatewayAccount>,
    ) -> RepoResult<Gateway>;
    async fn list_gateways(&self, page: &PaginationRequest) -> RepoResult<PaginatedResponse<Gateway>>;
}

#[async_trait]
pub trait PageStore: Send + Sync {
    /// Page create/update also replace its header/footer edges, in the same transaction.
    /// A header/footer that is gone fails the write with `HeaderFooterNotFound`.
    async fn create_page(&self, user_id: i64, input: &PageInput) -> RepoResult<Page>;
    async fn update_page(&self, id: i64, input: &PageInput) -> RepoResult<Page>;
    async fn get_page(&self, id: i64) -> RepoResult<Page>;
    async fn get_page_by_slug(&self, site_id: i64, slug: &str) -> RepoResult<Page>;
    /// `None` lists every site's pages
    async fn list_pages(
        &self,
        site_id: Option<i64>,
        page: &PaginationRequest,
    ) -> RepoResult<PaginatedResponse<Page>>;
    /// Soft-delete the page and hard-delete all of its usage edges
    async fn soft_delete_page(&self, id: i64) -> RepoResult<()>;

    async fn create_article(&self, user_id: i64, input: &ContentInput) -> RepoResult<Article>;
    async fn get_article(&self, id: i64) -> RepoResult<Article>;
    async fn soft_delete_article(&self, id: i64) -> RepoResult<()>;
    async fn create_header_footer(&self, user_id: i64, input: &ContentInput)
    -> RepoResult<HeaderFooter>;
    async fn get_header_footer(&self, id: i64) -> RepoResult<HeaderFooter>;
    async fn soft_delete_header_footer(&self, id: i64) -> RepoResult<()>;

    /// `(id, site_id)` of the live entities of `kind` among `ids`
    async fn entity_sites(&self, kind: UsageKind, ids: &[i64]) -> RepoResult<Vec<(i64, i64)>>;
    /// Replace every edge of `(page, kind)` with `entity_ids`, in one transaction
    async fn replace_usages(
        &self,
        kind: UsageKind,
        page_id: i64,
        site_id: i64,
        user_id: i64,
        entity_ids: &[i64],
    ) -> RepoResult<()>;
    async fn usages_for_page(&self, kind: UsageKind, page_id: i64) -> RepoResult<Vec<i64>>;
    /// Live pages of `site_id` with an edge to any of `entity_ids`, deduplicated
    async fn pages_using(
        &self,
        kind: UsageKind,
        site_id: i64,
        entity_ids: &[i64],
    ) -> RepoResult<Vec<PageSummary>>;
    async fn delete_usages_for_entity(
        &self,
        kind: UsageKind,
        site_id: i64,
        entity_id: i64,
    ) -> RepoResult<u64>;
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn get_user(&self, id: i64) -> RepoResult<UserAccount>;
    async fn get_plan(&self, id: i64) -> RepoResult<Plan>;
    async fn unit_prices(&self) -> RepoResult<Vec<UnitPrice>>;
    /// Claim a pending credit payment and add the grants to the user's ledger
    async fn apply_credit_payment(
        &self,
        tracking_number: i64,
        record: &VerifyRecord,
        user_id: i64,
        grants: &[CreditGrant],
    ) -> RepoResult<Option<Payment>>;
    /// Claim a pending plan payment and move the user onto the plan
    async fn apply_plan_payment(
        &self,
        tracking_number: i64,
        record: &VerifyRecord,
        user_id: i64,
        plan: &Plan,
        expires_at: i64,
    ) -> RepoResult<Option<Payment>>;
}

/// Every store capability behind trait objects, built once at startup
#[derive(Clone)]
pub struct Stores {
    pub catalog: std::sync::Arc<dyn CatalogStore>,
    pub discounts: std::sync::Arc<dyn DiscountStore>,
    pub baskets: std::sync::Arc<dyn BasketStore>,
    pub orders: std::sync::Arc<dyn OrderStore>,
    pub payments: std::sync::Arc<dyn PaymentStore>,
    pub gateways: std::sync::Arc<dyn GatewayStore>,
    pub pages: std::sync::Arc<dyn PageStore>,
    pub accounts: std::sync::Arc<dyn AccountStore>,
}

impl Stores {
    /// All capabilities served by one backend
    pub fn from_backend<B>(backend: std::sync::Arc<B>) -> Self
    where
        B: CatalogStore
            + DiscountStore
            + BasketStore
            + OrderStore
            + PaymentStore
            + GatewayStore
            + PageStore
            + AccountStore
            + 'static,
    {
        Self {
            catalog: backend.clone(),
            discounts: backend.clone(),
            baskets: backend.clone(),
            orders: backend.clone(),
            payments: backend.clone(),
            gateways: backend.clone(),
            pages: backend.clone(),
            accounts: backend,
        }
    }
}
