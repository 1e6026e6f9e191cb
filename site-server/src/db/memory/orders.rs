use std::collections::HashMap;

use async_trait::async_trait;
use shared::error::ErrorCode;
use shared::models::{
    CreditGrant, Order, OrderStatus, Payment, PaymentStatus, Plan, UnitPrice, UserAccount,
    VerifyRecord,
};
use shared::query::{PaginatedResponse, PaginationRequest};
use shared::util::now_millis;

use super::{MemoryState, MemoryStore};
use crate::db::paging::{ORDER_SORT, PAYMENT_SORT, SortValue, matches_search, paginate};
use crate::db::{
    AccountStore, CommitOutcome, NewCheckout, OrderStore, PaymentStore, RepoError, RepoResult,
};

fn order_sort_key(o: &Order, field: &str) -> SortValue {
    match field {
        "created_at" => SortValue::Int(o.created_at),
        "updated_at" => SortValue::Int(o.updated_at),
        "total_final_price" => SortValue::Int(o.total_final_price),
        _ => SortValue::Int(o.id),
    }
}

fn order_matches(o: &Order, page: &PaginationRequest) -> bool {
    matches_search(page, &[&o.id.to_string(), o.status.as_str()])
}

fn apply_record(payment: &mut Payment, status: PaymentStatus, record: &VerifyRecord, now: i64) {
    payment.status = status;
    payment.transaction_code = record.transaction_code.clone();
    payment.message = record.message.clone();
    payment.gateway_response_code = record.gateway_response_code.clone();
    payment.updated_at = now;
}

impl MemoryState {
    fn order_mut(&mut self, id: i64) -> RepoResult<&mut Order> {
        self.orders
            .get_mut(&id)
            .ok_or(RepoError::NotFound(ErrorCode::OrderNotFound))
    }

    fn insert_payment(&mut self, payment: &Payment) -> RepoResult<Payment> {
        if self
            .payments
            .values()
            .any(|p| p.tracking_number == payment.tracking_number)
        {
            return Err(RepoError::Duplicate(format!(
                "tracking number {}",
                payment.tracking_number
            )));
        }
        let mut stored = payment.clone();
        stored.id = self.next_id();
        self.payments.insert(stored.id, stored.clone());
        Ok(stored)
    }

    /// Verify that every decrement of `order` can be applied. Nothing is mutated.
    ///
    /// Per item: stock first, then the coupon; the site discount last, with a
    /// prior redemption by the same customer reported before exhaustion.
    fn check_commit(&self, order: &Order) -> RepoResult<()> {
        let mut stock_needed: HashMap<i64, i64> = HashMap::new();
        let mut coupon_needed: HashMap<i64, i64> = HashMap::new();

        for item in &order.items {
            let need = stock_needed.entry(item.product_variant_id).or_default();
            *need += i64::from(item.quantity);
            let stock = self
                .products
                .get(&item.product_id)
                .and_then(|p| p.variant(item.product_variant_id))
                .map(|v| v.stock)
                .unwrap_or(0);
            if stock < *need {
                return Err(RepoError::Conflict(ErrorCode::OutOfStock));
            }

            if let Some(coupon_id) = item.coupon_id {
                let need = coupon_needed.entry(coupon_id).or_default();
                *need += 1;
                let left = self
                    .products
                    .get(&item.product_id)
                    .and_then(|p| p.coupon.as_ref())
                    .filter(|c| c.id == coupon_id)
                    .map(|c| c.quantity)
                    .unwrap_or(0);
                if left < *need {
                    return Err(RepoError::Conflict(ErrorCode::CouponExhausted));
                }
            }
        }

        if let Some(discount_id) = order.discount_id {
            if self
                .customer_discounts
                .contains(&(order.customer_id, discount_id))
            {
                return Err(RepoError::Conflict(ErrorCode::DiscountAlreadyRedeemed));
            }
            let left = self
                .discounts
                .get(&discount_id)
                .map(|d| d.quantity)
                .unwrap_or(0);
            if left < 1 {
                return Err(RepoError::Conflict(ErrorCode::DiscountExhausted));
            }
        }
        Ok(())
    }

    /// Apply the decrements checked by `check_commit`
    fn apply_commit(&mut self, order: &Order, now: i64) {
        for item in &order.items {
            let Some(product) = self.products.get_mut(&item.product_id) else {
                continue;
            };
            product.selling_count += i64::from(item.quantity);
            if let Some(v) = product
                .variants
                .iter_mut()
                .find(|v| v.id == item.product_variant_id)
            {
                v.stock -= i64::from(item.quantity);
                v.version = now.max(v.version + 1);
            }
            if let Some(coupon) = product
                .coupon
                .as_mut()
                .filter(|c| Some(c.id) == item.coupon_id)
            {
                coupon.quantity -= 1;
            }
        }
        if let Some(discount_id) = order.discount_id {
            if let Some(d) = self.discounts.get_mut(&discount_id) {
                d.quantity -= 1;
            }
            self.customer_discounts
                .insert((order.customer_id, discount_id));
        }
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn create_checkout(&self, checkout: &NewCheckout) -> RepoResult<(Order, Payment)> {
        let mut state = self.state.lock();
        let mut order = checkout.order.clone();
        order.id = state.next_id();
        for item in &mut order.items {
            item.id = state.next_id();
            item.order_id = order.id;
        }
        let mut payment = checkout.payment.clone();
        payment.order_id = Some(order.id);
        payment
            .order_data
            .insert("OrderId".to_string(), order.id.to_string());
        let payment = state.insert_payment(&payment)?;

        state.orders.insert(order.id, order.clone());
        state.baskets.remove(&checkout.basket_id);
        Ok((order, payment))
    }

    async fn mark_awaiting_payment(
        &self,
        order_id: i64,
        tracking_number: i64,
        provider_token: Option<&str>,
    ) -> RepoResult<Order> {
        let mut state = self.state.lock();
        let now = now_millis();
        let payment_id = state.payment_by_tracking(tracking_number)?.id;
        let order = state.order_mut(order_id)?;
        if !order.status.can_transition_to(OrderStatus::AwaitingPayment) {
            return Err(RepoError::Conflict(ErrorCode::InvalidOrderState));
        }
        order.status = OrderStatus::AwaitingPayment;
        order.updated_at = now;
        let order = order.clone();
        if let Some(payment) = state.payments.get_mut(&payment_id) {
            payment.provider_token = provider_token.map(str::to_string);
            payment.updated_at = now;
        }
        Ok(order)
    }

    async fn commit_paid_order(
        &self,
        tracking_number: i64,
        record: &VerifyRecord,
    ) -> RepoResult<CommitOutcome> {
        let mut state = self.state.lock();
        let Some(payment_id) = state.pending_payment_id(tracking_number)? else {
            let payment = state.payment_by_tracking(tracking_number)?.clone();
            return Ok(CommitOutcome::AlreadyResolved(payment));
        };
        let order_id = state.payments[&payment_id]
            .order_id
            .ok_or(RepoError::NotFound(ErrorCode::OrderNotFound))?;
        let order = state.order_mut(order_id)?.clone();
        if !order.status.can_transition_to(OrderStatus::Paid) {
            return Err(RepoError::Conflict(ErrorCode::InvalidOrderState));
        }
        state.check_commit(&order)?;

        let now = now_millis();
        state.apply_commit(&order, now);
        let order = state.order_mut(order_id)?;
        order.status = OrderStatus::Committed;
        order.updated_at = now;
        let order = order.clone();
        let payment = state
            .payments
            .get_mut(&payment_id)
            .ok_or(RepoError::NotFound(ErrorCode::PaymentNotFound))?;
        apply_record(payment, PaymentStatus::Active, record, now);
        Ok(CommitOutcome::Committed {
            order,
            payment: payment.clone(),
        })
    }

    async fn reconcile_payment(
        &self,
        tracking_number: i64,
        record: &VerifyRecord,
        reason: &str,
    ) -> RepoResult<Option<(Order, Payment)>> {
        let mut state = self.state.lock();
        let Some(payment_id) = state.pending_payment_id(tracking_number)? else {
            return Ok(None);
        };
        let order_id = state.payments[&payment_id]
            .order_id
            .ok_or(RepoError::NotFound(ErrorCode::OrderNotFound))?;
        let now = now_millis();
        let order = state.order_mut(order_id)?;
        order.status = OrderStatus::NeedsReconciliation;
        order.failure_reason = Some(reason.to_string());
        order.updated_at = now;
        let order = order.clone();
        let payment = state
            .payments
            .get_mut(&payment_id)
            .ok_or(RepoError::NotFound(ErrorCode::PaymentNotFound))?;
        apply_record(payment, PaymentStatus::Active, record, now);
        Ok(Some((order, payment.clone())))
    }

    async fn fail_payment(
        &self,
        tracking_number: i64,
        record: &VerifyRecord,
        reason: &str,
    ) -> RepoResult<Option<Payment>> {
        let mut state = self.state.lock();
        let Some(payment_id) = state.pending_payment_id(tracking_number)? else {
            return Ok(None);
        };
        let now = now_millis();
        if let Some(order_id) = state.payments[&payment_id].order_id {
            let order = state.order_mut(order_id)?;
            if order.status.can_transition_to(OrderStatus::Failed) {
                order.status = OrderStatus::Failed;
                order.failure_reason = Some(reason.to_string());
                order.updated_at = now;
            }
        }
        let payment = state
            .payments
            .get_mut(&payment_id)
            .ok_or(RepoError::NotFound(ErrorCode::PaymentNotFound))?;
        apply_record(payment, PaymentStatus::Inactive, record, now);
        Ok(Some(payment.clone()))
    }

    async fn abandon_order(&self, order_id: i64, reason: &str) -> RepoResult<Option<Order>> {
        let mut state = self.state.lock();
        if state.order_mut(order_id)?.status != OrderStatus::AwaitingPayment {
            return Ok(None);
        }
        let Some(payment_id) = state
            .payments
            .values()
            .find(|p| p.order_id == Some(order_id) && p.status == PaymentStatus::Pending)
            .map(|p| p.id)
        else {
            return Ok(None);
        };
        let now = now_millis();
        if let Some(payment) = state.payments.get_mut(&payment_id) {
            payment.status = PaymentStatus::Inactive;
            payment.message = Some(reason.to_string());
            payment.updated_at = now;
        }
        let order = state.order_mut(order_id)?;
        order.status = OrderStatus::Abandoned;
        order.failure_reason = Some(reason.to_string());
        order.updated_at = now;
        Ok(Some(order.clone()))
    }

    async fn stale_awaiting_orders(&self, before: i64) -> RepoResult<Vec<i64>> {
        Ok(self
            .state
            .lock()
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::AwaitingPayment && o.updated_at < before)
            .map(|o| o.id)
            .collect())
    }

    async fn get_order(&self, id: i64) -> RepoResult<Order> {
        self.state
            .lock()
            .orders
            .get(&id)
            .cloned()
            .ok_or(RepoError::NotFound(ErrorCode::OrderNotFound))
    }

    async fn list_customer_orders(
        &self,
        customer_id: i64,
        page: &PaginationRequest,
    ) -> RepoResult<PaginatedResponse<Order>> {
        let state = self.state.lock();
        let items = state
            .orders
            .values()
            .filter(|o| o.customer_id == customer_id && order_matches(o, page))
            .cloned()
            .collect();
        Ok(paginate(items, page, ORDER_SORT, order_sort_key, |o| o.id))
    }

    async fn list_site_orders(
        &self,
        site_id: i64,
        page: &PaginationRequest,
    ) -> RepoResult<PaginatedResponse<Order>> {
        let state = self.state.lock();
        let items = state
            .orders
            .values()
            .filter(|o| o.site_id == site_id && order_matches(o, page))
            .cloned()
            .collect();
        Ok(paginate(items, page, ORDER_SORT, order_sort_key, |o| o.id))
    }

    async fn list_orders(&self, page: &PaginationRequest) -> RepoResult<PaginatedResponse<Order>> {
        let state = self.state.lock();
        let items = state
            .orders
            .values()
            .filter(|o| order_matches(o, page))
            .cloned()
            .collect();
        Ok(paginate(items, page, ORDER_SORT, order_sort_key, |o| o.id))
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn create_payment(&self, payment: &Payment) -> RepoResult<Payment> {
        self.state.lock().insert_payment(payment)
    }

    async fn set_provider_token(
        &self,
        tracking_number: i64,
        token: Option<&str>,
    ) -> RepoResult<()> {
        let mut state = self.state.lock();
        let id = state.payment_by_tracking(tracking_number)?.id;
        if let Some(payment) = state.payments.get_mut(&id) {
            payment.provider_token = token.map(str::to_string);
            payment.updated_at = now_millis();
        }
        Ok(())
    }

    async fn get_payment_by_tracking(&self, tracking_number: i64) -> RepoResult<Payment> {
        self.state
            .lock()
            .payment_by_tracking(tracking_number)
            .cloned()
    }

    async fn list_payments(
        &self,
        page: &PaginationRequest,
    ) -> RepoResult<PaginatedResponse<Payment>> {
        let state = self.state.lock();
        let items = state
            .payments
            .values()
            .filter(|p| matches_search(page, &[&p.tracking_number.to_string(), p.status.as_str()]))
            .cloned()
            .collect();
        Ok(paginate(
            items,
            page,
            PAYMENT_SORT,
            |p, field| match field {
                "created_at" => SortValue::Int(p.created_at),
                "amount" => SortValue::Int(p.amount),
                _ => SortValue::Int(p.id),
            },
            |p| p.id,
        ))
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn get_user(&self, id: i64) -> RepoResult<UserAccount> {
        self.state
            .lock()
            .users
            .get(&id)
            .cloned()
            .ok_or(RepoError::NotFound(ErrorCode::UserNotFound))
    }

    async fn get_plan(&self, id: i64) -> RepoResult<Plan> {
        self.state
            .lock()
            .plans
            .get(&id)
            .cloned()
            .ok_or(RepoError::NotFound(ErrorCode::PlanNotFound))
    }

    async fn unit_prices(&self) -> RepoResult<Vec<UnitPrice>> {
        Ok(self.state.lock().unit_prices.clone())
    }

    async fn apply_credit_payment(
        &self,
        tracking_number: i64,
        record: &VerifyRecord,
        user_id: i64,
        grants: &[CreditGrant],
    ) -> RepoResult<Option<Payment>> {
        let mut state = self.state.lock();
        let Some(payment_id) = state.pending_payment_id(tracking_number)? else {
            return Ok(None);
        };
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or(RepoError::NotFound(ErrorCode::UserNotFound))?;
        for grant in grants {
            *user.credit_mut(grant.kind) += grant.count;
            if grant.kind.is_time_bound() && grant.expire_at.is_some() {
                user.storage_mb_credits_expire_at = grant.expire_at;
            }
        }
        let payment = state
            .payments
            .get_mut(&payment_id)
            .ok_or(RepoError::NotFound(ErrorCode::PaymentNotFound))?;
        apply_record(payment, PaymentStatus::Active, record, now_millis());
        Ok(Some(payment.clone()))
    }

    async fn apply_plan_payment(
        &self,
        tracking_number: i64,
        record: &VerifyRecord,
        user_id: i64,
        plan: &Plan,
        expires_at: i64,
    ) -> RepoResult<Option<Payment>> {
        let mut state = self.state.lock();
        let Some(payment_id) = state.pending_payment_id(tracking_number)? else {
            return Ok(None);
        };
        let user = state
            .users
            .get_mut(&user_id)
            .ok_or(RepoError::NotFound(ErrorCode::UserNotFound))?;
        let first_plan = user.plan_id.is_none();
        user.plan_id = Some(plan.id);
        user.plan_expired_at = Some(expires_at);
        user.sms_credits = plan.sms_credits;
        user.email_credits = plan.email_credits;
        user.ai_credits = plan.ai_credits;
        user.ai_image_credits = plan.ai_image_credits;
        if first_plan {
            user.storage_mb_credits = plan.storage_mb_credits;
            user.storage_mb_credits_expire_at = Some(expires_at);
        }
        let payment = state
            .payments
            .get_mut(&payment_id)
            .ok_or(RepoError::NotFound(ErrorCode::PaymentNotFound))?;
        apply_record(payment, PaymentStatus::Active, record, now_millis());
        Ok(Some(payment.clone()))
    }
}
