//! Page endpoints and the usage graph surface

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use shared::error::{AppError, ErrorCode};
use shared::models::{Page, PageInput, PageSummary, UsageKind};
use shared::query::{PaginatedResponse, PaginationRequest};
use validator::Validate;

use crate::auth::Identity;
use crate::db::{PageStore, paging};
use crate::state::AppState;
use crate::usage::{Editor, UsageSync};

use super::ApiResult;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/pages", post(create_page))
        .route("/pages/by-slug", get(get_page_by_slug))
        .route("/pages/usages", get(pages_using))
        .route(
            "/pages/{id}",
            get(get_page).put(update_page).delete(delete_page),
        )
        .route("/pages/{id}/usages", post(sync_usages))
        .route("/sites/{site_id}/pages", get(list_pages))
        .route("/admin/pages", get(admin_list_pages))
}

fn editor(identity: &Identity) -> Result<Editor, AppError> {
    Ok(Editor {
        user_id: identity.user_id()?,
        is_admin: identity.is_admin,
    })
}

/// POST /api/v1/pages
pub async fn create_page(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(input): Json<PageInput>,
) -> ApiResult<Page> {
    let user_id = identity.user_id()?;
    identity.require_site_owner(input.site_id)?;
    input.validate()?;
    state
        .usage
        .check_layout(0, input.site_id, input.header_id, input.footer_id)
        .await?;

    let page = state.stores.pages.create_page(user_id, &input).await?;
    tracing::info!(page_id = page.id, site_id = page.site_id, "Page created");
    Ok(Json(page))
}

/// PUT /api/v1/pages/{id}
pub async fn update_page(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
    Json(input): Json<PageInput>,
) -> ApiResult<Page> {
    let existing = state.stores.pages.get_page(id).await?;
    identity.require_owner(existing.user_id)?;
    if input.site_id != existing.site_id {
        return Err(AppError::new(ErrorCode::SiteMismatch).with_detail("page_id", id));
    }
    input.validate()?;
    state
        .usage
        .check_layout(id, input.site_id, input.header_id, input.footer_id)
        .await?;

    let page = state.stores.pages.update_page(id, &input).await?;
    Ok(Json(page))
}

/// GET /api/v1/pages/{id}
pub async fn get_page(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
) -> ApiResult<Page> {
    let page = state.stores.pages.get_page(id).await?;
    identity.require_site(page.site_id)?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
pub struct SlugQuery {
    pub site_id: i64,
    pub slug: String,
}

/// GET /api/v1/pages/by-slug?site_id=&slug=
pub async fn get_page_by_slug(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<SlugQuery>,
) -> ApiResult<Page> {
    identity.require_site(query.site_id)?;
    let page = state
        .stores
        .pages
        .get_page_by_slug(query.site_id, &query.slug)
        .await?;
    Ok(Json(page))
}

/// GET /api/v1/sites/{site_id}/pages
pub async fn list_pages(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(site_id): Path<i64>,
    Query(page): Query<PaginationRequest>,
) -> ApiResult<PaginatedResponse<Page>> {
    identity.require_site(site_id)?;
    page.check(paging::PAGE_SORT)?;
    Ok(Json(state.stores.pages.list_pages(Some(site_id), &page).await?))
}

/// GET /api/v1/admin/pages
pub async fn admin_list_pages(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(page): Query<PaginationRequest>,
) -> ApiResult<PaginatedResponse<Page>> {
    identity.require_admin()?;
    page.check(paging::PAGE_SORT)?;
    Ok(Json(state.stores.pages.list_pages(None, &page).await?))
}

/// DELETE /api/v1/pages/{id}
pub async fn delete_page(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    let page = state.stores.pages.get_page(id).await?;
    identity.require_owner(page.user_id)?;
    state.stores.pages.soft_delete_page(id).await?;
    tracing::info!(page_id = id, site_id = page.site_id, "Page deleted");
    Ok(StatusCode::NO_CONTENT)
}

// ============================================================================
// Usage graph
// ============================================================================

/// POST /api/v1/pages/{id}/usages
pub async fn sync_usages(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
    Json(req): Json<UsageSync>,
) -> Result<StatusCode, AppError> {
    if req.page_id != id {
        return Err(AppError::invalid_field("page_id", "does not match the path"));
    }
    state.usage.sync(editor(&identity)?, &req).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    /// Comma separated ids
    #[serde(default)]
    pub entity_ids: String,
    #[serde(rename = "type")]
    pub kind: UsageKind,
    pub site_id: i64,
}

#[derive(Debug, Serialize)]
pub struct PagesUsing {
    pub pages: Vec<PageSummary>,
}

fn parse_ids(raw: &str) -> Result<Vec<i64>, AppError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .map_err(|_| AppError::invalid_field("entity_ids", format!("invalid id: {s}")))
        })
        .collect()
}

/// GET /api/v1/pages/usages?entity_ids=1,2&type=product&site_id=
pub async fn pages_using(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<UsageQuery>,
) -> ApiResult<PagesUsing> {
    identity.require_site(query.site_id)?;
    let ids = parse_ids(&query.entity_ids)?;
    let pages = state
        .usage
        .find_pages_using(query.kind, query.site_id, &ids)
        .await?;
    Ok(Json(PagesUsing { pages }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_ids_are_comma_separated() {
        assert_eq!(parse_ids("1, 2,,3").unwrap(), vec![1, 2, 3]);
        assert!(parse_ids("").unwrap().is_empty());
        let err = parse_ids("1,x").unwrap_err();
        assert_eq!(err.code, ErrorCode::ValidationFailed);
    }
}
