use std::collections::HashMap;

use async_trait::async_trait;
use shared::error::ErrorCode;
use shared::models::{
    CreditGrant, CreditKind, Order, OrderItem, OrderStatus, Payment, PaymentStatus, Plan,
    UnitPrice, UserAccount, VerifyRecord,
};
use shared::query::{PaginatedResponse, PaginationRequest};
use shared::util::now_millis;
use sqlx::MySqlConnection;

use super::{MySqlStore, parse_col, placeholders};
use crate::db::paging::{ORDER_SORT, PAYMENT_SORT, like_pattern, order_clause};
use crate::db::{
    AccountStore, CommitOutcome, NewCheckout, OrderStore, PaymentStore, RepoError, RepoResult,
};

// ============================================================================
// Rows
// ============================================================================

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: i64,
    site_id: i64,
    customer_id: i64,
    basket_id: i64,
    discount_id: Option<i64>,
    address_id: i64,
    description: Option<String>,
    gateway: String,
    courier: String,
    courier_price: i64,
    total_weight: i64,
    total_raw_price: i64,
    total_coupon_discount: i64,
    total_discount: i64,
    total_price_with_coupon_discount: i64,
    total_final_price: i64,
    status: String,
    failure_reason: Option<String>,
    created_at: i64,
    updated_at: i64,
}

const ORDER_COLUMNS: &str = "id, site_id, customer_id, basket_id, discount_id, address_id, description, \
     gateway, courier, courier_price, total_weight, total_raw_price, total_coupon_discount, total_discount, \
     total_price_with_coupon_discount, total_final_price, status, failure_reason, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    id: i64,
    order_id: i64,
    product_id: i64,
    product_variant_id: i64,
    quantity: i32,
    raw_price: i64,
    final_raw_price: i64,
    final_price_with_coupon_discount: i64,
    just_coupon_price: i64,
    just_discount_price: i64,
    coupon_id: Option<i64>,
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: i64,
    site_id: i64,
    order_id: Option<i64>,
    user_type: String,
    user_id: Option<i64>,
    customer_id: Option<i64>,
    tracking_number: i64,
    gateway: String,
    gateway_account_name: String,
    amount: i64,
    status: String,
    transaction_code: Option<String>,
    provider_token: Option<String>,
    order_data: String,
    client_ip: String,
    return_url: String,
    call_verify_url: String,
    service_name: String,
    service_action: String,
    message: Option<String>,
    gateway_response_code: Option<String>,
    created_at: i64,
    updated_at: i64,
}

const PAYMENT_COLUMNS: &str = "id, site_id, order_id, user_type, user_id, customer_id, tracking_number, \
     gateway, gateway_account_name, amount, status, transaction_code, provider_token, order_data, client_ip, \
     return_url, call_verify_url, service_name, service_action, message, gateway_response_code, \
     created_at, updated_at";

impl TryFrom<PaymentRow> for Payment {
    type Error = RepoError;

    fn try_from(r: PaymentRow) -> RepoResult<Self> {
        Ok(Payment {
            id: r.id,
            site_id: r.site_id,
            order_id: r.order_id,
            user_type: parse_col(&r.user_type, "user_type")?,
            user_id: r.user_id,
            customer_id: r.customer_id,
            tracking_number: r.tracking_number,
            gateway: parse_col(&r.gateway, "gateway")?,
            gateway_account_name: r.gateway_account_name,
            amount: r.amount,
            status: parse_col(&r.status, "status")?,
            transaction_code: r.transaction_code,
            provider_token: r.provider_token,
            order_data: serde_json::from_str(&r.order_data)?,
            client_ip: r.client_ip,
            return_url: r.return_url,
            call_verify_url: parse_col(&r.call_verify_url, "call_verify_url")?,
            service_name: r.service_name,
            service_action: r.service_action,
            message: r.message,
            gateway_response_code: r.gateway_response_code,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    plan_id: Option<i64>,
    plan_expired_at: Option<i64>,
    sms_credits: i64,
    email_credits: i64,
    ai_credits: i64,
    ai_image_credits: i64,
    storage_mb_credits: i64,
    storage_mb_credits_expire_at: Option<i64>,
}

#[derive(sqlx::FromRow)]
struct PlanRow {
    id: i64,
    name: String,
    price: i64,
    duration_days: i64,
    sms_credits: i64,
    email_credits: i64,
    ai_credits: i64,
    ai_image_credits: i64,
    storage_mb_credits: i64,
    discount: Option<i64>,
    discount_type: Option<String>,
}

fn credit_column(kind: CreditKind) -> &'static str {
    match kind {
        CreditKind::SmsCredits => "sms_credits",
        CreditKind::EmailCredits => "email_credits",
        CreditKind::AiCredits => "ai_credits",
        CreditKind::AiImageCredits => "ai_image_credits",
        CreditKind::StorageMbCredits => "storage_mb_credits",
    }
}

// ============================================================================
// Helpers
// ============================================================================

impl MySqlStore {
    async fn assemble_orders(&self, rows: Vec<OrderRow>) -> RepoResult<Vec<Order>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT id, order_id, product_id, product_variant_id, quantity, raw_price, final_raw_price, \
             final_price_with_coupon_discount, just_coupon_price, just_discount_price, coupon_id \
             FROM order_items WHERE order_id IN ({}) ORDER BY id",
            placeholders(rows.len())
        );
        let mut q = sqlx::query_as::<_, OrderItemRow>(&sql);
        for r in &rows {
            q = q.bind(r.id);
        }
        let mut items: HashMap<i64, Vec<OrderItem>> = HashMap::new();
        for i in q.fetch_all(&self.pool).await? {
            items.entry(i.order_id).or_default().push(OrderItem {
                id: i.id,
                order_id: i.order_id,
                product_id: i.product_id,
                product_variant_id: i.product_variant_id,
                quantity: i.quantity,
                raw_price: i.raw_price,
                final_raw_price: i.final_raw_price,
                final_price_with_coupon_discount: i.final_price_with_coupon_discount,
                just_coupon_price: i.just_coupon_price,
                just_discount_price: i.just_discount_price,
                coupon_id: i.coupon_id,
            });
        }
        rows.into_iter()
            .map(|r| -> RepoResult<Order> {
                Ok(Order {
                    items: items.remove(&r.id).unwrap_or_default(),
                    gateway: parse_col(&r.gateway, "gateway")?,
                    courier: parse_col(&r.courier, "courier")?,
                    status: parse_col(&r.status, "status")?,
                    id: r.id,
                    site_id: r.site_id,
                    customer_id: r.customer_id,
                    basket_id: r.basket_id,
                    discount_id: r.discount_id,
                    address_id: r.address_id,
                    description: r.description,
                    courier_price: r.courier_price,
                    total_weight: r.total_weight,
                    total_raw_price: r.total_raw_price,
                    total_coupon_discount: r.total_coupon_discount,
                    total_discount: r.total_discount,
                    total_price_with_coupon_discount: r.total_price_with_coupon_discount,
                    total_final_price: r.total_final_price,
                    failure_reason: r.failure_reason,
                    created_at: r.created_at,
                    updated_at: r.updated_at,
                })
            })
            .collect()
    }

    /// Orders page with an optional `owner_column = ?` filter
    async fn order_page(
        &self,
        owner: Option<(&str, i64)>,
        page: &PaginationRequest,
    ) -> RepoResult<PaginatedResponse<Order>> {
        let mut clauses: Vec<String> = Vec::new();
        if let Some((column, _)) = owner {
            clauses.push(format!("{column} = ?"));
        }
        let pattern = page.search().map(like_pattern);
        if pattern.is_some() {
            clauses.push("(CAST(id AS CHAR) LIKE ? OR status LIKE ?)".to_string());
        }
        let filter = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM orders{filter}");
        let mut count = sqlx::query_as::<_, (i64,)>(&count_sql);
        if let Some((_, id)) = owner {
            count = count.bind(id);
        }
        if let Some(p) = &pattern {
            count = count.bind(p).bind(p);
        }
        let (total,) = count.fetch_one(&self.pool).await?;

        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders{filter} ORDER BY {} LIMIT ? OFFSET ?",
            order_clause(page, ORDER_SORT, "")
        );
        let mut q = sqlx::query_as::<_, OrderRow>(&sql);
        if let Some((_, id)) = owner {
            q = q.bind(id);
        }
        if let Some(p) = &pattern {
            q = q.bind(p).bind(p);
        }
        let rows = q
            .bind(i64::from(page.page_size()))
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await?;
        let items = self.assemble_orders(rows).await?;
        Ok(PaginatedResponse::new(items, total as u64, page))
    }
}

async fn insert_payment(conn: &mut MySqlConnection, p: &Payment) -> RepoResult<i64> {
    let result = sqlx::query(
        "INSERT INTO payments (site_id, order_id, user_type, user_id, customer_id, tracking_number, gateway, \
         gateway_account_name, amount, status, transaction_code, provider_token, order_data, client_ip, return_url, \
         call_verify_url, service_name, service_action, message, gateway_response_code, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(p.site_id)
    .bind(p.order_id)
    .bind(p.user_type.as_str())
    .bind(p.user_id)
    .bind(p.customer_id)
    .bind(p.tracking_number)
    .bind(p.gateway.as_str())
    .bind(&p.gateway_account_name)
    .bind(p.amount)
    .bind(p.status.as_str())
    .bind(&p.transaction_code)
    .bind(&p.provider_token)
    .bind(serde_json::to_string(&p.order_data)?)
    .bind(&p.client_ip)
    .bind(&p.return_url)
    .bind(p.call_verify_url.as_str())
    .bind(&p.service_name)
    .bind(&p.service_action)
    .bind(&p.message)
    .bind(&p.gateway_response_code)
    .bind(p.created_at)
    .bind(p.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_id() as i64)
}

/// pending → `status`, recording the verify outcome. Returns whether the claim won.
async fn claim_payment(
    conn: &mut MySqlConnection,
    tracking_number: i64,
    status: PaymentStatus,
    record: &VerifyRecord,
) -> RepoResult<bool> {
    let result = sqlx::query(
        "UPDATE payments SET status = ?, transaction_code = ?, message = ?, gateway_response_code = ?, updated_at = ? \
         WHERE tracking_number = ? AND status = 'pending'",
    )
    .bind(status.as_str())
    .bind(&record.transaction_code)
    .bind(&record.message)
    .bind(&record.gateway_response_code)
    .bind(now_millis())
    .bind(tracking_number)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

async fn payment_order_id(conn: &mut MySqlConnection, tracking_number: i64) -> RepoResult<Option<i64>> {
    let row: Option<(Option<i64>,)> =
        sqlx::query_as("SELECT order_id FROM payments WHERE tracking_number = ?")
            .bind(tracking_number)
            .fetch_optional(&mut *conn)
            .await?;
    row.map(|(id,)| id)
        .ok_or(RepoError::NotFound(ErrorCode::PaymentNotFound))
}

/// Conditional decrements for one paid order. Any failure aborts the caller's transaction.
async fn apply_commit(conn: &mut MySqlConnection, order_id: i64, now: i64) -> RepoResult<()> {
    let (customer_id, discount_id, status): (i64, Option<i64>, String) = sqlx::query_as(
        "SELECT customer_id, discount_id, status FROM orders WHERE id = ? FOR UPDATE",
    )
    .bind(order_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or(RepoError::NotFound(ErrorCode::OrderNotFound))?;
    let status: OrderStatus = parse_col(&status, "status")?;
    if !status.can_transition_to(OrderStatus::Paid) {
        return Err(RepoError::Conflict(ErrorCode::InvalidOrderState));
    }

    let items: Vec<(i64, i64, i32, Option<i64>)> = sqlx::query_as(
        "SELECT product_id, product_variant_id, quantity, coupon_id FROM order_items WHERE order_id = ? ORDER BY id",
    )
    .bind(order_id)
    .fetch_all(&mut *conn)
    .await?;

    for (product_id, variant_id, quantity, coupon_id) in items {
        let quantity = i64::from(quantity);
        let stock = sqlx::query(
            "UPDATE product_variants SET stock = stock - ?, version = GREATEST(?, version + 1) \
             WHERE id = ? AND stock >= ?",
        )
        .bind(quantity)
        .bind(now)
        .bind(variant_id)
        .bind(quantity)
        .execute(&mut *conn)
        .await?;
        if stock.rows_affected() == 0 {
            return Err(RepoError::Conflict(ErrorCode::OutOfStock));
        }

        if let Some(coupon_id) = coupon_id {
            let coupon = sqlx::query(
                "UPDATE coupons SET quantity = quantity - 1 WHERE id = ? AND quantity >= 1",
            )
            .bind(coupon_id)
            .execute(&mut *conn)
            .await?;
            if coupon.rows_affected() == 0 {
                return Err(RepoError::Conflict(ErrorCode::CouponExhausted));
            }
        }

        sqlx::query("UPDATE products SET selling_count = selling_count + ? WHERE id = ?")
            .bind(quantity)
            .bind(product_id)
            .execute(&mut *conn)
            .await?;
    }

    if let Some(discount_id) = discount_id {
        // The unique key serializes redemptions of one customer, so a second
        // commit sees AlreadyRedeemed even when it also took the last unit.
        let redeemed = sqlx::query(
            "INSERT INTO customer_discounts (customer_id, discount_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(customer_id)
        .bind(discount_id)
        .bind(now)
        .execute(&mut *conn)
        .await;
        match redeemed {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(RepoError::Conflict(ErrorCode::DiscountAlreadyRedeemed));
            }
            Err(e) => return Err(e.into()),
        }
        let discount = sqlx::query(
            "UPDATE discounts SET quantity = quantity - 1 WHERE id = ? AND quantity > 0",
        )
        .bind(discount_id)
        .execute(&mut *conn)
        .await?;
        if discount.rows_affected() == 0 {
            return Err(RepoError::Conflict(ErrorCode::DiscountExhausted));
        }
    }

    sqlx::query("UPDATE orders SET status = ?, updated_at = ? WHERE id = ?")
        .bind(OrderStatus::Committed.as_str())
        .bind(now)
        .bind(order_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

// ============================================================================
// OrderStore
// ============================================================================

#[async_trait]
impl OrderStore for MySqlStore {
    async fn create_checkout(&self, checkout: &NewCheckout) -> RepoResult<(Order, Payment)> {
        let o = &checkout.order;
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "INSERT INTO orders (site_id, customer_id, basket_id, discount_id, address_id, description, gateway, \
             courier, courier_price, total_weight, total_raw_price, total_coupon_discount, total_discount, \
             total_price_with_coupon_discount, total_final_price, status, failure_reason, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(o.site_id)
        .bind(o.customer_id)
        .bind(o.basket_id)
        .bind(o.discount_id)
        .bind(o.address_id)
        .bind(&o.description)
        .bind(o.gateway.as_str())
        .bind(o.courier.as_str())
        .bind(o.courier_price)
        .bind(o.total_weight)
        .bind(o.total_raw_price)
        .bind(o.total_coupon_discount)
        .bind(o.total_discount)
        .bind(o.total_price_with_coupon_discount)
        .bind(o.total_final_price)
        .bind(o.status.as_str())
        .bind(&o.failure_reason)
        .bind(o.created_at)
        .bind(o.updated_at)
        .execute(&mut *tx)
        .await?;
        let order_id = result.last_insert_id() as i64;

        for item in &o.items {
            sqlx::query(
                "INSERT INTO order_items (order_id, product_id, product_variant_id, quantity, raw_price, \
                 final_raw_price, final_price_with_coupon_discount, just_coupon_price, just_discount_price, coupon_id) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(order_id)
            .bind(item.product_id)
            .bind(item.product_variant_id)
            .bind(item.quantity)
            .bind(item.raw_price)
            .bind(item.final_raw_price)
            .bind(item.final_price_with_coupon_discount)
            .bind(item.just_coupon_price)
            .bind(item.just_discount_price)
            .bind(item.coupon_id)
            .execute(&mut *tx)
            .await?;
        }

        let mut payment = checkout.payment.clone();
        payment.order_id = Some(order_id);
        payment
            .order_data
            .insert("OrderId".to_string(), order_id.to_string());
        insert_payment(&mut *tx, &payment).await?;

        sqlx::query("DELETE FROM basket_items WHERE basket_id = ?")
            .bind(checkout.basket_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM baskets WHERE id = ?")
            .bind(checkout.basket_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let order = self.get_order(order_id).await?;
        let payment = self.get_payment_by_tracking(payment.tracking_number).await?;
        Ok((order, payment))
    }

    async fn mark_awaiting_payment(
        &self,
        order_id: i64,
        tracking_number: i64,
        provider_token: Option<&str>,
    ) -> RepoResult<Order> {
        let mut tx = self.pool.begin().await?;
        let now = now_millis();
        let result = sqlx::query(
            "UPDATE orders SET status = 'awaiting_payment', updated_at = ? WHERE id = ? AND status = 'draft'",
        )
        .bind(now)
        .bind(order_id)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            let exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM orders WHERE id = ?")
                .bind(order_id)
                .fetch_optional(&mut *tx)
                .await?;
            return Err(match exists {
                Some(_) => RepoError::Conflict(ErrorCode::InvalidOrderState),
                None => RepoError::NotFound(ErrorCode::OrderNotFound),
            });
        }
        let result = sqlx::query(
            "UPDATE payments SET provider_token = ?, updated_at = ? WHERE tracking_number = ?",
        )
        .bind(provider_token)
        .bind(now)
        .bind(tracking_number)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound(ErrorCode::PaymentNotFound));
        }
        tx.commit().await?;
        self.get_order(order_id).await
    }

    async fn commit_paid_order(
        &self,
        tracking_number: i64,
        record: &VerifyRecord,
    ) -> RepoResult<CommitOutcome> {
        let mut tx = self.pool.begin().await?;
        if !claim_payment(&mut *tx, tracking_number, PaymentStatus::Active, record).await? {
            tx.rollback().await?;
            let payment = self.get_payment_by_tracking(tracking_number).await?;
            return Ok(CommitOutcome::AlreadyResolved(payment));
        }
        let order_id = payment_order_id(&mut *tx, tracking_number)
            .await?
            .ok_or(RepoError::NotFound(ErrorCode::OrderNotFound))?;
        // dropping `tx` on error rolls back the claim as well
        apply_commit(&mut *tx, order_id, now_millis()).await?;
        tx.commit().await?;

        Ok(CommitOutcome::Committed {
            order: self.get_order(order_id).await?,
            payment: self.get_payment_by_tracking(tracking_number).await?,
        })
    }

    async fn reconcile_payment(
        &self,
        tracking_number: i64,
        record: &VerifyRecord,
        reason: &str,
    ) -> RepoResult<Option<(Order, Payment)>> {
        let mut tx = self.pool.begin().await?;
        if !claim_payment(&mut *tx, tracking_number, PaymentStatus::Active, record).await? {
            return Ok(None);
        }
        let order_id = payment_order_id(&mut *tx, tracking_number)
            .await?
            .ok_or(RepoError::NotFound(ErrorCode::OrderNotFound))?;
        sqlx::query(
            "UPDATE orders SET status = 'needs_reconciliation', failure_reason = ?, updated_at = ? WHERE id = ?",
        )
        .bind(reason)
        .bind(now_millis())
        .bind(order_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(Some((
            self.get_order(order_id).await?,
            self.get_payment_by_tracking(tracking_number).await?,
        )))
    }

    async fn fail_payment(
        &self,
        tracking_number: i64,
        record: &VerifyRecord,
        reason: &str,
    ) -> RepoResult<Option<Payment>> {
        let mut tx = self.pool.begin().await?;
        if !claim_payment(&mut *tx, tracking_number, PaymentStatus::Inactive, record).await? {
            return Ok(None);
        }
        if let Some(order_id) = payment_order_id(&mut *tx, tracking_number).await? {
            sqlx::query(
                "UPDATE orders SET status = 'failed', failure_reason = ?, updated_at = ? \
                 WHERE id = ? AND status IN ('draft', 'awaiting_payment')",
            )
            .bind(reason)
            .bind(now_millis())
            .bind(order_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(Some(self.get_payment_by_tracking(tracking_number).await?))
    }

    async fn abandon_order(&self, order_id: i64, reason: &str) -> RepoResult<Option<Order>> {
        let mut tx = self.pool.begin().await?;
        let now = now_millis();
        let (status,): (String,) = sqlx::query_as("SELECT status FROM orders WHERE id = ? FOR UPDATE")
            .bind(order_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(RepoError::NotFound(ErrorCode::OrderNotFound))?;
        if parse_col::<OrderStatus>(&status, "status")? != OrderStatus::AwaitingPayment {
            return Ok(None);
        }
        let claimed = sqlx::query(
            "UPDATE payments SET status = 'inactive', message = ?, updated_at = ? \
             WHERE order_id = ? AND status = 'pending'",
        )
        .bind(reason)
        .bind(now)
        .bind(order_id)
        .execute(&mut *tx)
        .await?;
        if claimed.rows_affected() == 0 {
            return Ok(None);
        }
        sqlx::query(
            "UPDATE orders SET status = 'abandoned', failure_reason = ?, updated_at = ? WHERE id = ?",
        )
        .bind(reason)
        .bind(now)
        .bind(order_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(Some(self.get_order(order_id).await?))
    }

    async fn stale_awaiting_orders(&self, before: i64) -> RepoResult<Vec<i64>> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT id FROM orders WHERE status = 'awaiting_payment' AND updated_at < ? ORDER BY id",
        )
        .bind(before)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn get_order(&self, id: i64) -> RepoResult<Order> {
        let sql = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = ?");
        let row = sqlx::query_as::<_, OrderRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RepoError::NotFound(ErrorCode::OrderNotFound))?;
        self.assemble_orders(vec![row])
            .await?
            .pop()
            .ok_or(RepoError::NotFound(ErrorCode::OrderNotFound))
    }

    async fn list_customer_orders(
        &self,
        customer_id: i64,
        page: &PaginationRequest,
    ) -> RepoResult<PaginatedResponse<Order>> {
        self.order_page(Some(("customer_id", customer_id)), page).await
    }

    async fn list_site_orders(
        &self,
        site_id: i64,
        page: &PaginationRequest,
    ) -> RepoResult<PaginatedResponse<Order>> {
        self.order_page(Some(("site_id", site_id)), page).await
    }

    async fn list_orders(&self, page: &PaginationRequest) -> RepoResult<PaginatedResponse<Order>> {
        self.order_page(None, page).await
    }
}

// ============================================================================
// PaymentStore
// ============================================================================

#[async_trait]
impl PaymentStore for MySqlStore {
    async fn create_payment(&self, payment: &Payment) -> RepoResult<Payment> {
        let mut conn = self.pool.acquire().await?;
        insert_payment(&mut *conn, payment).await?;
        drop(conn);
        self.get_payment_by_tracking(payment.tracking_number).await
    }

    async fn set_provider_token(
        &self,
        tracking_number: i64,
        token: Option<&str>,
    ) -> RepoResult<()> {
        let result = sqlx::query(
            "UPDATE payments SET provider_token = ?, updated_at = ? WHERE tracking_number = ?",
        )
        .bind(token)
        .bind(now_millis())
        .bind(tracking_number)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound(ErrorCode::PaymentNotFound));
        }
        Ok(())
    }

    async fn get_payment_by_tracking(&self, tracking_number: i64) -> RepoResult<Payment> {
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE tracking_number = ?");
        sqlx::query_as::<_, PaymentRow>(&sql)
            .bind(tracking_number)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RepoError::NotFound(ErrorCode::PaymentNotFound))?
            .try_into()
    }

    async fn list_payments(
        &self,
        page: &PaginationRequest,
    ) -> RepoResult<PaginatedResponse<Payment>> {
        let pattern = page.search().map(like_pattern);
        let search = if pattern.is_some() {
            " WHERE (CAST(tracking_number AS CHAR) LIKE ? OR status LIKE ?)"
        } else {
            ""
        };
        let count_sql = format!("SELECT COUNT(*) FROM payments{search}");
        let mut count = sqlx::query_as::<_, (i64,)>(&count_sql);
        if let Some(p) = &pattern {
            count = count.bind(p).bind(p);
        }
        let (total,) = count.fetch_one(&self.pool).await?;

        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments{search} ORDER BY {} LIMIT ? OFFSET ?",
            order_clause(page, PAYMENT_SORT, "")
        );
        let mut q = sqlx::query_as::<_, PaymentRow>(&sql);
        if let Some(p) = &pattern {
            q = q.bind(p).bind(p);
        }
        let items = q
            .bind(i64::from(page.page_size()))
            .bind(page.offset() as i64)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(Payment::try_from)
            .collect::<RepoResult<Vec<_>>>()?;
        Ok(PaginatedResponse::new(items, total as u64, page))
    }
}

// ============================================================================
// AccountStore
// ============================================================================

async fn lock_user(conn: &mut MySqlConnection, user_id: i64) -> RepoResult<bool> {
    let row: Option<(i64, Option<i64>)> =
        sqlx::query_as("SELECT id, plan_id FROM users WHERE id = ? FOR UPDATE")
            .bind(user_id)
            .fetch_optional(&mut *conn)
            .await?;
    let (_, plan_id) = row.ok_or(RepoError::NotFound(ErrorCode::UserNotFound))?;
    Ok(plan_id.is_some())
}

#[async_trait]
impl AccountStore for MySqlStore {
    async fn get_user(&self, id: i64) -> RepoResult<UserAccount> {
        let r = sqlx::query_as::<_, UserRow>(
            "SELECT id, plan_id, plan_expired_at, sms_credits, email_credits, ai_credits, ai_image_credits, \
             storage_mb_credits, storage_mb_credits_expire_at FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RepoError::NotFound(ErrorCode::UserNotFound))?;
        Ok(UserAccount {
            id: r.id,
            plan_id: r.plan_id,
            plan_expired_at: r.plan_expired_at,
            sms_credits: r.sms_credits,
            email_credits: r.email_credits,
            ai_credits: r.ai_credits,
            ai_image_credits: r.ai_image_credits,
            storage_mb_credits: r.storage_mb_credits,
            storage_mb_credits_expire_at: r.storage_mb_credits_expire_at,
        })
    }

    async fn get_plan(&self, id: i64) -> RepoResult<Plan> {
        let r = sqlx::query_as::<_, PlanRow>(
            "SELECT id, name, price, duration_days, sms_credits, email_credits, ai_credits, ai_image_credits, \
             storage_mb_credits, discount, discount_type FROM plans WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RepoError::NotFound(ErrorCode::PlanNotFound))?;
        Ok(Plan {
            discount_type: r
                .discount_type
                .as_deref()
                .map(|t| parse_col(t, "discount_type"))
                .transpose()?,
            id: r.id,
            name: r.name,
            price: r.price,
            duration_days: r.duration_days,
            sms_credits: r.sms_credits,
            email_credits: r.email_credits,
            ai_credits: r.ai_credits,
            ai_image_credits: r.ai_image_credits,
            storage_mb_credits: r.storage_mb_credits,
            discount: r.discount,
        })
    }

    async fn unit_prices(&self) -> RepoResult<Vec<UnitPrice>> {
        let rows: Vec<(i64, String, i64)> =
            sqlx::query_as("SELECT id, name, price FROM unit_prices ORDER BY id")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter()
            .map(|(id, name, price)| -> RepoResult<UnitPrice> {
                Ok(UnitPrice {
                    id,
                    name: parse_col(&name, "name")?,
                    price,
                })
            })
            .collect()
    }

    async fn apply_credit_payment(
        &self,
        tracking_number: i64,
        record: &VerifyRecord,
        user_id: i64,
        grants: &[CreditGrant],
    ) -> RepoResult<Option<Payment>> {
        let mut tx = self.pool.begin().await?;
        if !claim_payment(&mut *tx, tracking_number, PaymentStatus::Active, record).await? {
            return Ok(None);
        }
        lock_user(&mut *tx, user_id).await?;
        for grant in grants {
            let column = credit_column(grant.kind);
            sqlx::query(&format!("UPDATE users SET {column} = {column} + ? WHERE id = ?"))
                .bind(grant.count)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
            if let (true, Some(expire_at)) = (grant.kind.is_time_bound(), grant.expire_at) {
                sqlx::query("UPDATE users SET storage_mb_credits_expire_at = ? WHERE id = ?")
                    .bind(expire_at)
                    .bind(user_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        tx.commit().await?;
        Ok(Some(self.get_payment_by_tracking(tracking_number).await?))
    }

    async fn apply_plan_payment(
        &self,
        tracking_number: i64,
        record: &VerifyRecord,
        user_id: i64,
        plan: &Plan,
        expires_at: i64,
    ) -> RepoResult<Option<Payment>> {
        let mut tx = self.pool.begin().await?;
        if !claim_payment(&mut *tx, tracking_number, PaymentStatus::Active, record).await? {
            return Ok(None);
        }
        let had_plan = lock_user(&mut *tx, user_id).await?;
        sqlx::query(
            "UPDATE users SET plan_id = ?, plan_expired_at = ?, sms_credits = ?, email_credits = ?, \
             ai_credits = ?, ai_image_credits = ? WHERE id = ?",
        )
        .bind(plan.id)
        .bind(expires_at)
        .bind(plan.sms_credits)
        .bind(plan.email_credits)
        .bind(plan.ai_credits)
        .bind(plan.ai_image_credits)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
        if !had_plan {
            sqlx::query(
                "UPDATE users SET storage_mb_credits = ?, storage_mb_credits_expire_at = ? WHERE id = ?",
            )
            .bind(plan.storage_mb_credits)
            .bind(expires_at)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(Some(self.get_payment_by_tracking(tracking_number).await?))
    }
}
