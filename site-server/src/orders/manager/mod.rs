//! OrderManager - checkout and payment state machine
//!
//! # 流程
//!
//! ```text
//! create_order_request
//!   ├─ 1. 版本校验 (observed_items) + 重新定价
//!   ├─ 2. 库存检查 → OutOfStock
//!   ├─ 3. create_checkout: Order(Draft) + Payment(Pending) + 删除购物车 (单事务)
//!   ├─ 4. GatewayAdapter::request (事务外)
//!   │     └─ 失败 → fail_payment: Payment inactive, Order Failed
//!   └─ 5. mark_awaiting_payment → 返回 redirect_url
//!
//! verify_payment (幂等，按 tracking_number)
//!   ├─ Payment 非 Pending → 返回之前的结果
//!   ├─ GatewayAdapter::verify
//!   ├─ 失败 → fail_payment + order.failed
//!   └─ 成功 → 按 call_verify_url 分发
//!         ├─ create_order_verify  → commit_paid_order → order.committed
//!         │     └─ Conflict → reconcile_payment → order.needs_reconciliation
//!         ├─ charge_credit_verify → apply_credit_payment
//!         └─ upgrade_plan_verify  → apply_plan_payment
//! ```
//!
//! The manager holds no state between the redirect and the callback; the
//! payment row carries everything the callback needs.

mod account;
mod error;
mod verify;

#[cfg(test)]
mod tests;

pub use account::{CreditChargeRequest, CreditItem, PlanUpgradeRequest};
pub use error::{LifecycleError, LifecycleResult};
pub use verify::{VerifyResult, VerifyStatus};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shared::models::{
    AccountConfig, BasketLine, CallVerifyUrl, Courier, GatewayKind, ObservedItem, Order, OrderData,
    OrderItem, OrderStatus, Payment, PaymentStatus, UserType, VerifyRecord,
};
use shared::message::{OrderEvent, OrderFailed};
use shared::query::{PaginatedResponse, PaginationRequest};
use shared::util::{now_millis, tracking_number};
use validator::Validate;

use crate::cache::StockCache;
use crate::config::Config;
use crate::db::{
    AccountStore, BasketStore, NewCheckout, OrderStore, PaymentStore, GatewayStore, Stores,
};
use crate::events::{EventPublisher, publish_event};
use crate::gateway::{GatewayAdapter, PaymentRequest};
use crate::pricing::{DiscountRef, PriceRequest, PricedBasket, PricingEngine};

/// Checkout input (customer and client ip come from the request context)
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct OrderRequest {
    pub site_id: i64,
    pub gateway: GatewayKind,
    #[validate(url)]
    pub final_front_return_url: String,
    pub address_id: i64,
    #[serde(default)]
    pub courier: Courier,
    #[validate(length(max = 1000))]
    pub description: Option<String>,
    /// Versions the client last saw; must cover every basket item
    #[serde(default)]
    pub observed_items: Vec<ObservedItem>,
}

/// Where to send the shopper next
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentRedirectView {
    pub redirect_url: String,
    pub tracking_number: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<i64>,
}

/// Pending payment about to be opened at a gateway
struct NewPayment {
    site_id: i64,
    flow: CallVerifyUrl,
    user_type: UserType,
    user_id: Option<i64>,
    customer_id: Option<i64>,
    gateway: GatewayKind,
    amount: i64,
    order_data: OrderData,
    client_ip: String,
    return_url: String,
}

impl NewPayment {
    fn into_payment(self, now: i64) -> Payment {
        let (service_name, service_action) = self.flow.service();
        Payment {
            id: 0,
            site_id: self.site_id,
            order_id: None,
            user_type: self.user_type,
            user_id: self.user_id,
            customer_id: self.customer_id,
            tracking_number: tracking_number(),
            gateway: self.gateway,
            gateway_account_name: self.gateway.account_name(self.site_id),
            amount: self.amount,
            status: PaymentStatus::Pending,
            transaction_code: None,
            provider_token: None,
            order_data: self.order_data,
            client_ip: self.client_ip,
            return_url: self.return_url,
            call_verify_url: self.flow,
            service_name: service_name.to_string(),
            service_action: service_action.to_string(),
            message: None,
            gateway_response_code: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Order lifecycle manager
///
/// Consumes only the capabilities it needs; everything else in [`Stores`]
/// stays with the HTTP layer.
#[derive(Clone)]
pub struct OrderManager {
    baskets: Arc<dyn BasketStore>,
    orders: Arc<dyn OrderStore>,
    payments: Arc<dyn PaymentStore>,
    gateways: Arc<dyn GatewayStore>,
    accounts: Arc<dyn AccountStore>,
    pricing: PricingEngine,
    gateway: Arc<dyn GatewayAdapter>,
    events: Arc<dyn EventPublisher>,
    stock_cache: Arc<dyn StockCache>,
    config: Arc<Config>,
}

impl std::fmt::Debug for OrderManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderManager").finish_non_exhaustive()
    }
}

impl OrderManager {
    pub fn new(
        stores: &Stores,
        gateway: Arc<dyn GatewayAdapter>,
        events: Arc<dyn EventPublisher>,
        stock_cache: Arc<dyn StockCache>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            baskets: stores.baskets.clone(),
            orders: stores.orders.clone(),
            payments: stores.payments.clone(),
            gateways: stores.gateways.clone(),
            accounts: stores.accounts.clone(),
            pricing: PricingEngine::new(stores.catalog.clone(), stores.discounts.clone()),
            gateway,
            events,
            stock_cache,
            config,
        }
    }

    pub fn pricing(&self) -> &PricingEngine {
        &self.pricing
    }

    // ========================================================================
    // Checkout
    // ========================================================================

    /// Turn the customer's basket into an order and open a payment for it
    pub async fn create_order_request(
        &self,
        customer_id: i64,
        req: &OrderRequest,
        client_ip: &str,
    ) -> LifecycleResult<PaymentRedirectView> {
        req.validate()
            .map_err(|e| LifecycleError::Invalid(e.to_string()))?;
        let now = now_millis();

        let basket = self
            .baskets
            .get_basket(customer_id, req.site_id)
            .await?
            .ok_or(LifecycleError::BasketNotFound)?;
        if basket.items.is_empty() {
            return Err(LifecycleError::BasketEmpty);
        }
        check_observed_versions(&basket.items, &req.observed_items)?;

        // 网关配置先于任何写入
        let account = self.resolve_account(req.site_id, req.gateway).await?;

        let lines: Vec<BasketLine> = basket
            .items
            .iter()
            .map(|i| BasketLine {
                basket_item_id: i.id,
                product_id: i.product_id,
                product_variant_id: i.product_variant_id,
                quantity: i.quantity,
            })
            .collect();
        let discount = basket.discount_id.map_or(DiscountRef::None, DiscountRef::Id);
        let priced = self
            .pricing
            .price(PriceRequest {
                site_id: req.site_id,
                customer_id,
                discount,
                lines: &lines,
                prev_versions: HashMap::new(),
                now,
            })
            .await?;

        // 定价结果与客户看到的不一致 (商品改价、折扣失效)
        let drifted: Vec<i64> = priced
            .items
            .iter()
            .filter(|p| {
                basket.items.iter().any(|i| {
                    i.id == p.basket_item_id
                        && i.final_price_with_coupon_discount != p.final_price_with_coupon_discount
                })
            })
            .map(|p| p.basket_item_id)
            .collect();
        if !drifted.is_empty() || basket.discount_id != priced.applied_discount_id() {
            tracing::info!(
                customer_id,
                site_id = req.site_id,
                ?drifted,
                "Basket repriced differently at checkout"
            );
            return Err(LifecycleError::BasketChanged(drifted));
        }

        let out_of_stock = priced.out_of_stock_variants();
        if !out_of_stock.is_empty() {
            return Err(LifecycleError::OutOfStock(out_of_stock));
        }

        let order = self.draft_order(customer_id, basket.id, req, &priced, now);
        let payment = NewPayment {
            site_id: req.site_id,
            flow: CallVerifyUrl::CreateOrderVerify,
            user_type: UserType::Customer,
            user_id: None,
            customer_id: Some(customer_id),
            gateway: req.gateway,
            amount: order.total_final_price,
            order_data: OrderData::new(),
            client_ip: client_ip.to_string(),
            return_url: req.final_front_return_url.clone(),
        }
        .into_payment(now);

        let (order, payment) = self
            .orders
            .create_checkout(&NewCheckout {
                order,
                payment,
                basket_id: basket.id,
            })
            .await?;
        tracing::info!(
            order_id = order.id,
            tracking_number = payment.tracking_number,
            site_id = order.site_id,
            amount = payment.amount,
            "Order created"
        );

        let redirect = match self.open_at_gateway(&payment, &account).await {
            Ok(r) => r,
            Err(e) => {
                publish_event(
                    self.events.as_ref(),
                    OrderEvent::OrderFailed(OrderFailed {
                        order_id: order.id,
                        site_id: order.site_id,
                        reason: e.to_string(),
                    }),
                )
                .await;
                return Err(e);
            }
        };

        let order = self
            .orders
            .mark_awaiting_payment(
                order.id,
                payment.tracking_number,
                redirect.provider_token.as_deref(),
            )
            .await?;
        tracing::info!(
            order_id = order.id,
            tracking_number = payment.tracking_number,
            "Order awaiting payment"
        );

        Ok(PaymentRedirectView {
            redirect_url: redirect.redirect_url,
            tracking_number: payment.tracking_number,
            order_id: Some(order.id),
        })
    }

    fn draft_order(
        &self,
        customer_id: i64,
        basket_id: i64,
        req: &OrderRequest,
        priced: &PricedBasket,
        now: i64,
    ) -> Order {
        let courier_price = if priced.is_free_send() {
            0
        } else {
            self.config.courier_price(req.courier)
        };
        let totals = &priced.totals;
        Order {
            id: 0,
            site_id: req.site_id,
            customer_id,
            basket_id,
            discount_id: priced.applied_discount_id(),
            address_id: req.address_id,
            description: req.description.clone(),
            gateway: req.gateway,
            courier: req.courier,
            courier_price,
            total_weight: priced.total_weight(),
            total_raw_price: totals.total_raw_price,
            total_coupon_discount: totals.total_coupon_discount,
            total_discount: totals.total_discount,
            total_price_with_coupon_discount: totals.total_price_with_coupon_discount,
            total_final_price: totals
                .total_price_with_coupon_discount
                .saturating_add(courier_price),
            status: OrderStatus::Draft,
            failure_reason: None,
            items: priced
                .items
                .iter()
                .map(|i| OrderItem {
                    id: 0,
                    order_id: 0,
                    product_id: i.product_id,
                    product_variant_id: i.product_variant_id,
                    quantity: i.quantity,
                    raw_price: i.raw_price,
                    final_raw_price: i.final_raw_price,
                    final_price_with_coupon_discount: i.final_price_with_coupon_discount,
                    just_coupon_price: i.just_coupon_price,
                    just_discount_price: i.just_discount_price,
                    coupon_id: i.coupon_id,
                })
                .collect(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Site's account for `kind`, which must exist and be switched on
    async fn resolve_account(
        &self,
        site_id: i64,
        kind: GatewayKind,
    ) -> LifecycleResult<AccountConfig> {
        let gateway = self
            .gateways
            .gateway_for_site(site_id)
            .await?
            .ok_or(LifecycleError::GatewayNotConfigured(kind))?;
        let account = gateway
            .account(kind)
            .ok_or(LifecycleError::GatewayNotConfigured(kind))?;
        if !account.is_active {
            return Err(LifecycleError::GatewayInactive(kind));
        }
        Ok(account.config.clone())
    }

    /// Call the gateway outside any transaction; a refusal fails the payment
    async fn open_at_gateway(
        &self,
        payment: &Payment,
        account: &AccountConfig,
    ) -> LifecycleResult<crate::gateway::PaymentRedirect> {
        let callback_url = self
            .config
            .callback_url(payment.call_verify_url.as_str(), payment.tracking_number);
        let result = self
            .gateway
            .request(PaymentRequest {
                amount: payment.amount,
                tracking_number: payment.tracking_number,
                account,
                callback_url: &callback_url,
                client_ip: &payment.client_ip,
            })
            .await;

        match result {
            Ok(redirect) => Ok(redirect),
            Err(e) => {
                let reason = e.to_string();
                let record = VerifyRecord {
                    transaction_code: None,
                    message: Some(reason.clone()),
                    gateway_response_code: None,
                };
                if let Err(fail_err) = self
                    .orders
                    .fail_payment(payment.tracking_number, &record, &reason)
                    .await
                {
                    tracing::error!(
                        tracking_number = payment.tracking_number,
                        error = %fail_err,
                        "Failed to mark payment failed after gateway error"
                    );
                }
                Err(e.into())
            }
        }
    }

    // ========================================================================
    // Cancel / abandon
    // ========================================================================

    /// Customer gives up on an order still waiting for payment
    pub async fn cancel_order(&self, order_id: i64, customer_id: i64) -> LifecycleResult<Order> {
        let order = self.customer_order(order_id, customer_id).await?;
        if order.status != OrderStatus::AwaitingPayment {
            return Err(LifecycleError::InvalidOrderState(order.id, order.status));
        }
        match self
            .orders
            .abandon_order(order_id, "cancelled by customer")
            .await?
        {
            Some(order) => {
                tracing::info!(order_id, customer_id, "Order cancelled");
                Ok(order)
            }
            None => {
                // callback 抢先一步
                let current = self.orders.get_order(order_id).await?;
                Err(LifecycleError::InvalidOrderState(order_id, current.status))
            }
        }
    }

    /// Abandon every AwaitingPayment order untouched since `now - payment_timeout`
    pub async fn sweep_abandoned(&self, now: i64) -> LifecycleResult<usize> {
        let timeout = i64::try_from(self.config.payment_timeout.as_millis()).unwrap_or(i64::MAX);
        let before = now.saturating_sub(timeout);
        let stale = self.orders.stale_awaiting_orders(before).await?;

        let mut abandoned = 0;
        for order_id in stale {
            match self.orders.abandon_order(order_id, "payment timeout").await {
                Ok(Some(_)) => {
                    abandoned += 1;
                    tracing::info!(order_id, "Order abandoned after payment timeout");
                }
                Ok(None) => {}
                Err(e) => tracing::warn!(order_id, error = %e, "Failed to abandon stale order"),
            }
        }
        Ok(abandoned)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Order owned by `customer_id`
    pub async fn customer_order(&self, order_id: i64, customer_id: i64) -> LifecycleResult<Order> {
        let order = self.orders.get_order(order_id).await?;
        if order.customer_id != customer_id {
            return Err(LifecycleError::NotOrderOwner(order_id));
        }
        Ok(order)
    }

    /// Order placed on `site_id`; another site's order reads as missing
    pub async fn site_order(&self, order_id: i64, site_id: i64) -> LifecycleResult<Order> {
        let order = self.orders.get_order(order_id).await?;
        if order.site_id != site_id {
            return Err(LifecycleError::NotOrderOwner(order_id));
        }
        Ok(order)
    }

    pub async fn customer_orders(
        &self,
        customer_id: i64,
        page: &PaginationRequest,
    ) -> LifecycleResult<PaginatedResponse<Order>> {
        Ok(self.orders.list_customer_orders(customer_id, page).await?)
    }

    pub async fn site_orders(
        &self,
        site_id: i64,
        page: &PaginationRequest,
    ) -> LifecycleResult<PaginatedResponse<Order>> {
        Ok(self.orders.list_site_orders(site_id, page).await?)
    }

    pub async fn all_orders(&self, page: &PaginationRequest) -> LifecycleResult<PaginatedResponse<Order>> {
        Ok(self.orders.list_orders(page).await?)
    }

    pub async fn all_payments(
        &self,
        page: &PaginationRequest,
    ) -> LifecycleResult<PaginatedResponse<Payment>> {
        Ok(self.payments.list_payments(page).await?)
    }
}

/// Every stored item must have been observed at its current version
fn check_observed_versions(
    items: &[shared::models::BasketItem],
    observed: &[ObservedItem],
) -> LifecycleResult<()> {
    let seen: HashMap<i64, i64> = observed
        .iter()
        .map(|o| (o.basket_item_id, o.version))
        .collect();
    let stored: HashSet<i64> = items.iter().map(|i| i.id).collect();

    let mut changed: Vec<i64> = items
        .iter()
        .filter(|i| seen.get(&i.id) != Some(&i.version))
        .map(|i| i.id)
        .collect();
    // 客户端看到的行已被删除
    changed.extend(
        observed
            .iter()
            .map(|o| o.basket_item_id)
            .filter(|id| !stored.contains(id)),
    );
    if changed.is_empty() {
        Ok(())
    } else {
        changed.sort_unstable();
        changed.dedup();
        Err(LifecycleError::BasketChanged(changed))
    }
}
