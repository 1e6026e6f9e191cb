//! Site discount codes (panel users only)

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use http::StatusCode;
use shared::error::{AppError, ErrorCode};
use shared::models::{Discount, DiscountInput};
use shared::query::{PaginatedResponse, PaginationRequest};
use validator::Validate;

use crate::auth::Identity;
use crate::db::{DiscountStore, paging};
use crate::state::AppState;

use super::ApiResult;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/discounts", post(create_discount))
        .route(
            "/discounts/{id}",
            get(get_discount).put(update_discount).delete(delete_discount),
        )
        .route("/sites/{site_id}/discounts", get(list_discounts))
        .route("/admin/discounts", get(admin_list_discounts))
}

/// POST /api/v1/discounts
pub async fn create_discount(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(input): Json<DiscountInput>,
) -> ApiResult<Discount> {
    let user_id = identity.user_id()?;
    identity.require_site_owner(input.site_id)?;
    input.validate()?;
    let discount = state.stores.discounts.create_discount(user_id, &input).await?;
    tracing::info!(discount_id = discount.id, site_id = discount.site_id, "Discount created");
    Ok(Json(discount))
}

/// PUT /api/v1/discounts/{id}
pub async fn update_discount(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
    Json(input): Json<DiscountInput>,
) -> ApiResult<Discount> {
    let existing = state.stores.discounts.get_discount(id).await?;
    identity.require_owner(existing.user_id)?;
    if input.site_id != existing.site_id {
        return Err(AppError::new(ErrorCode::SiteMismatch).with_detail("discount_id", id));
    }
    input.validate()?;
    Ok(Json(state.stores.discounts.update_discount(id, &input).await?))
}

/// GET /api/v1/discounts/{id}
pub async fn get_discount(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
) -> ApiResult<Discount> {
    let discount = state.stores.discounts.get_discount(id).await?;
    identity.require_owner(discount.user_id)?;
    Ok(Json(discount))
}

/// GET /api/v1/sites/{site_id}/discounts
pub async fn list_discounts(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(site_id): Path<i64>,
    Query(page): Query<PaginationRequest>,
) -> ApiResult<PaginatedResponse<Discount>> {
    identity.require_site_owner(site_id)?;
    page.check(paging::DISCOUNT_SORT)?;
    Ok(Json(state.stores.discounts.list_discounts(Some(site_id), &page).await?))
}

/// GET /api/v1/admin/discounts
pub async fn admin_list_discounts(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(page): Query<PaginationRequest>,
) -> ApiResult<PaginatedResponse<Discount>> {
    identity.require_admin()?;
    page.check(paging::DISCOUNT_SORT)?;
    Ok(Json(state.stores.discounts.list_discounts(None, &page).await?))
}

/// DELETE /api/v1/discounts/{id}
pub async fn delete_discount(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    let discount = state.stores.discounts.get_discount(id).await?;
    identity.require_owner(discount.user_id)?;
    state.stores.discounts.soft_delete_discount(id).await?;
    tracing::info!(discount_id = id, "Discount deleted");
    Ok(StatusCode::NO_CONTENT)
}
