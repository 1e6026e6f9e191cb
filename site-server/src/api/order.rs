//! Order endpoints: price preview, checkout, cancel and listings

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use serde::Deserialize;
use shared::error::AppError;
use shared::models::Order;
use shared::query::{PaginatedResponse, PaginationRequest};

use crate::auth::Identity;
use crate::db::paging;
use crate::orders::{BasketUpdate, OrderRequest, PaymentRedirectView};
use crate::pricing::PricedBasket;
use crate::state::AppState;

use super::{ApiResult, ClientIp};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/order/price", post(price_order))
        .route("/order/request", post(request_order))
        .route("/order/{id}/cancel", post(cancel_order))
        .route("/orders", get(list_orders))
        .route("/orders/{id}", get(get_order))
        .route("/sites/{site_id}/orders", get(list_site_orders))
        .route("/sites/{site_id}/orders/{id}", get(get_site_order))
        .route("/admin/orders", get(admin_list_orders))
}

#[derive(Debug, Deserialize)]
pub struct PriceQuery {
    #[serde(flatten)]
    pub basket: BasketUpdate,
    /// Must match the token when present
    pub customer_id: Option<i64>,
    #[serde(default)]
    pub is_order_verify: bool,
}

/// POST /api/v1/order/price
///
/// Prices the given lines against current catalog state. Nothing is stored.
pub async fn price_order(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(query): Json<PriceQuery>,
) -> ApiResult<PricedBasket> {
    let customer_id = identity.customer_id()?;
    identity.require_site(query.basket.site_id)?;
    if query.customer_id.is_some_and(|id| id != customer_id) {
        return Err(AppError::forbidden("customer_id does not match token"));
    }
    if query.is_order_verify {
        return Err(AppError::invalid_field(
            "is_order_verify",
            "price preview never verifies an order",
        ));
    }
    let priced = state.baskets.preview(customer_id, &query.basket).await?;
    Ok(Json(priced))
}

/// POST /api/v1/order/request
pub async fn request_order(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    ClientIp(client_ip): ClientIp,
    Json(req): Json<OrderRequest>,
) -> ApiResult<PaymentRedirectView> {
    let customer_id = identity.customer_id()?;
    identity.require_site(req.site_id)?;
    let view = state
        .orders
        .create_order_request(customer_id, &req, &client_ip)
        .await?;
    Ok(Json(view))
}

/// POST /api/v1/order/{id}/cancel
pub async fn cancel_order(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(order_id): Path<i64>,
) -> ApiResult<Order> {
    let customer_id = identity.customer_id()?;
    Ok(Json(state.orders.cancel_order(order_id, customer_id).await?))
}

/// GET /api/v1/orders
pub async fn list_orders(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(page): Query<PaginationRequest>,
) -> ApiResult<PaginatedResponse<Order>> {
    let customer_id = identity.customer_id()?;
    page.check(paging::ORDER_SORT)?;
    Ok(Json(state.orders.customer_orders(customer_id, &page).await?))
}

/// GET /api/v1/orders/{id}
pub async fn get_order(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(order_id): Path<i64>,
) -> ApiResult<Order> {
    let customer_id = identity.customer_id()?;
    Ok(Json(state.orders.customer_order(order_id, customer_id).await?))
}

/// GET /api/v1/sites/{site_id}/orders
pub async fn list_site_orders(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(site_id): Path<i64>,
    Query(page): Query<PaginationRequest>,
) -> ApiResult<PaginatedResponse<Order>> {
    identity.require_site_owner(site_id)?;
    page.check(paging::ORDER_SORT)?;
    Ok(Json(state.orders.site_orders(site_id, &page).await?))
}

/// GET /api/v1/sites/{site_id}/orders/{id}
pub async fn get_site_order(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path((site_id, order_id)): Path<(i64, i64)>,
) -> ApiResult<Order> {
    identity.require_site_owner(site_id)?;
    Ok(Json(state.orders.site_order(order_id, site_id).await?))
}

/// GET /api/v1/admin/orders
pub async fn admin_list_orders(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(page): Query<PaginationRequest>,
) -> ApiResult<PaginatedResponse<Order>> {
    identity.require_admin()?;
    page.check(paging::ORDER_SORT)?;
    Ok(Json(state.orders.all_orders(&page).await?))
}
