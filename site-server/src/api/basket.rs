//! Basket endpoints (customer tokens)

use axum::{
    Extension, Json, Router,
    extract::{Query, State},
    routing::get,
};
use serde::Deserialize;
use shared::models::Basket;
use shared::query::{PaginatedResponse, PaginationRequest};

use crate::auth::Identity;
use crate::db::paging;
use crate::orders::{BasketUpdate, BasketView};
use crate::state::AppState;

use super::ApiResult;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/basket", get(get_basket).post(update_basket))
        .route("/basket/list", get(list_baskets))
        .route("/admin/baskets", get(admin_list_baskets))
}

#[derive(Debug, Deserialize)]
pub struct BasketQuery {
    pub site_id: i64,
}

/// GET /api/v1/basket?site_id=
pub async fn get_basket(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<BasketQuery>,
) -> ApiResult<Basket> {
    let customer_id = identity.customer_id()?;
    identity.require_site(query.site_id)?;
    let basket = state.baskets.get_basket(customer_id, query.site_id).await?;
    Ok(Json(basket))
}

/// POST /api/v1/basket
pub async fn update_basket(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(update): Json<BasketUpdate>,
) -> ApiResult<BasketView> {
    let customer_id = identity.customer_id()?;
    identity.require_site(update.site_id)?;
    let view = state.baskets.update_basket(customer_id, &update).await?;
    Ok(Json(view))
}

/// GET /api/v1/basket/list
pub async fn list_baskets(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(page): Query<PaginationRequest>,
) -> ApiResult<PaginatedResponse<Basket>> {
    let customer_id = identity.customer_id()?;
    page.check(paging::BASKET_SORT)?;
    Ok(Json(state.baskets.customer_baskets(customer_id, &page).await?))
}

/// GET /api/v1/admin/baskets
pub async fn admin_list_baskets(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(page): Query<PaginationRequest>,
) -> ApiResult<PaginatedResponse<Basket>> {
    identity.require_admin()?;
    page.check(paging::BASKET_SORT)?;
    Ok(Json(state.baskets.all_baskets(&page).await?))
}
