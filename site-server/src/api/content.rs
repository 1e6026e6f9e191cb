//! Articles and headers/footers
//!
//! Only the fields the usage graph needs; the editors for these live elsewhere.

use axum::{
    Extension, Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use http::StatusCode;
use shared::error::AppError;
use shared::models::{Article, ContentInput, HeaderFooter, UsageKind};
use validator::Validate;

use crate::auth::Identity;
use crate::db::PageStore;
use crate::state::AppState;

use super::ApiResult;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/articles", post(create_article))
        .route("/articles/{id}", get(get_article).delete(delete_article))
        .route("/header-footers", post(create_header_footer))
        .route(
            "/header-footers/{id}",
            get(get_header_footer).delete(delete_header_footer),
        )
}

/// POST /api/v1/articles
pub async fn create_article(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(input): Json<ContentInput>,
) -> ApiResult<Article> {
    let user_id = identity.user_id()?;
    identity.require_site_owner(input.site_id)?;
    input.validate()?;
    Ok(Json(state.stores.pages.create_article(user_id, &input).await?))
}

/// GET /api/v1/articles/{id}
pub async fn get_article(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
) -> ApiResult<Article> {
    let article = state.stores.pages.get_article(id).await?;
    identity.require_site(article.site_id)?;
    Ok(Json(article))
}

/// DELETE /api/v1/articles/{id}
pub async fn delete_article(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    let article = state.stores.pages.get_article(id).await?;
    identity.require_owner(article.user_id)?;
    state.stores.pages.soft_delete_article(id).await?;
    state
        .usage
        .on_entity_deleted(UsageKind::Article, article.site_id, id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/header-footers
pub async fn create_header_footer(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(input): Json<ContentInput>,
) -> ApiResult<HeaderFooter> {
    let user_id = identity.user_id()?;
    identity.require_site_owner(input.site_id)?;
    input.validate()?;
    if input.kind.is_none() {
        return Err(AppError::invalid_field("kind", "header or footer is required"));
    }
    Ok(Json(
        state.stores.pages.create_header_footer(user_id, &input).await?,
    ))
}

/// GET /api/v1/header-footers/{id}
pub async fn get_header_footer(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
) -> ApiResult<HeaderFooter> {
    let item = state.stores.pages.get_header_footer(id).await?;
    identity.require_site(item.site_id)?;
    Ok(Json(item))
}

/// DELETE /api/v1/header-footers/{id}
pub async fn delete_header_footer(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    let item = state.stores.pages.get_header_footer(id).await?;
    identity.require_owner(item.user_id)?;
    state.stores.pages.soft_delete_header_footer(id).await?;
    state
        .usage
        .on_entity_deleted(UsageKind::HeaderFooter, item.site_id, id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
