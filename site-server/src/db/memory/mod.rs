//! In-memory store
//!
//! All state sits behind one `parking_lot::Mutex`; every trait method takes the
//! lock once and never awaits while holding it, so each call is as atomic as
//! one SQL transaction. Used by tests and by `STORAGE=memory` dev runs.

mod catalog;
mod content;
mod orders;

use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::Mutex;
use shared::error::ErrorCode;
use shared::models::{
    Article, Basket, Discount, Gateway, HeaderFooter, Order, Page, Payment, PaymentStatus, Plan,
    Product, UnitPrice, UsageEdge, UsageKind, UserAccount,
};

use super::{RepoError, RepoResult};

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    products: BTreeMap<i64, Product>,
    discounts: BTreeMap<i64, Discount>,
    /// (customer_id, discount_id)
    customer_discounts: HashSet<(i64, i64)>,
    baskets: BTreeMap<i64, Basket>,
    orders: BTreeMap<i64, Order>,
    payments: BTreeMap<i64, Payment>,
    gateways: BTreeMap<i64, Gateway>,
    pages: BTreeMap<i64, Page>,
    articles: BTreeMap<i64, Article>,
    header_footers: BTreeMap<i64, HeaderFooter>,
    usages: HashMap<UsageKind, Vec<UsageEdge>>,
    users: BTreeMap<i64, UserAccount>,
    plans: BTreeMap<i64, Plan>,
    unit_prices: Vec<UnitPrice>,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn payment_by_tracking(&self, tracking_number: i64) -> RepoResult<&Payment> {
        self.payments
            .values()
            .find(|p| p.tracking_number == tracking_number)
            .ok_or(RepoError::NotFound(ErrorCode::PaymentNotFound))
    }

    /// Id of the payment with `tracking_number` if it is still pending
    fn pending_payment_id(&self, tracking_number: i64) -> RepoResult<Option<i64>> {
        let payment = self.payment_by_tracking(tracking_number)?;
        Ok((payment.status == PaymentStatus::Pending).then_some(payment.id))
    }
}

/// In-memory implementation of every store trait
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ---- seeding: tenants, plans and prices are owned by other services ----

    pub fn put_user(&self, user: UserAccount) {
        self.state.lock().users.insert(user.id, user);
    }

    pub fn put_plan(&self, plan: Plan) {
        self.state.lock().plans.insert(plan.id, plan);
    }

    pub fn put_unit_price(&self, price: UnitPrice) {
        let mut state = self.state.lock();
        state.unit_prices.retain(|p| p.name != price.name);
        state.unit_prices.push(price);
    }

    /// Overwrite a variant's stock (test setup)
    pub fn set_stock(&self, variant_id: i64, stock: i64) {
        let mut state = self.state.lock();
        for product in state.products.values_mut() {
            if let Some(v) = product.variants.iter_mut().find(|v| v.id == variant_id) {
                v.stock = stock;
            }
        }
    }

    /// Overwrite a variant's price (test setup)
    pub fn set_price(&self, variant_id: i64, price: i64) {
        let mut state = self.state.lock();
        for product in state.products.values_mut() {
            if let Some(v) = product.variants.iter_mut().find(|v| v.id == variant_id) {
                v.price = price;
            }
        }
    }

    /// Current stock of a variant, `None` if unknown
    pub fn stock(&self, variant_id: i64) -> Option<i64> {
        self.state
            .lock()
            .products
            .values()
            .flat_map(|p| p.variants.iter())
            .find(|v| v.id == variant_id)
            .map(|v| v.stock)
    }
}
