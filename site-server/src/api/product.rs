//! Catalog endpoints

use std::collections::HashMap;

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use http::StatusCode;
use serde::Deserialize;
use shared::error::{AppError, ErrorCode};
use shared::models::{Product, ProductInput, UsageKind};
use shared::query::{PaginatedResponse, PaginationRequest};
use validator::Validate;

use crate::auth::Identity;
use crate::cache::{StockCache, invalidate_logged};
use crate::db::{CatalogStore, ProductFilter, SortKind, paging};
use crate::state::AppState;

use super::ApiResult;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/products", post(create_product))
        .route("/products/filter", post(filter_products))
        .route("/products/by-slug", get(get_product_by_slug))
        .route(
            "/products/{id}",
            get(get_product).put(update_product).delete(delete_product),
        )
        .route("/sites/{site_id}/products", get(list_products))
}

/// Show cached stock where the cache has it, seed it where it does not
async fn with_cached_stock(state: &AppState, mut product: Product) -> Product {
    for variant in &mut product.variants {
        match state.stock_cache.get(variant.id).await {
            Ok(Some(stock)) => variant.stock = stock,
            Ok(None) => {
                if let Err(e) = state.stock_cache.put(variant.id, variant.stock).await {
                    tracing::debug!(variant_id = variant.id, error = %e, "Stock cache write failed");
                }
            }
            Err(e) => tracing::warn!(variant_id = variant.id, error = %e, "Stock cache read failed"),
        }
    }
    product
}

fn variant_ids(product: &Product) -> Vec<i64> {
    product.variants.iter().map(|v| v.id).collect()
}

/// POST /api/v1/products
pub async fn create_product(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(input): Json<ProductInput>,
) -> ApiResult<Product> {
    let user_id = identity.user_id()?;
    identity.require_site_owner(input.site_id)?;
    input.validate()?;

    let product = state.stores.catalog.create_product(user_id, &input).await?;
    tracing::info!(product_id = product.id, site_id = product.site_id, "Product created");
    Ok(Json(product))
}

/// PUT /api/v1/products/{id}
pub async fn update_product(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
    Json(input): Json<ProductInput>,
) -> ApiResult<Product> {
    let existing = state.stores.catalog.get_product(id).await?;
    identity.require_owner(existing.user_id)?;
    if input.site_id != existing.site_id {
        return Err(AppError::new(ErrorCode::SiteMismatch).with_detail("product_id", id));
    }
    input.validate()?;

    let product = state.stores.catalog.update_product(id, &input).await?;
    let mut stale = variant_ids(&existing);
    stale.extend(variant_ids(&product));
    invalidate_logged(state.stock_cache.as_ref(), &stale).await;
    tracing::info!(product_id = id, "Product updated");
    Ok(Json(product))
}

/// GET /api/v1/products/{id}
pub async fn get_product(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
) -> ApiResult<Product> {
    let product = state.stores.catalog.get_product(id).await?;
    identity.require_site(product.site_id)?;
    Ok(Json(with_cached_stock(&state, product).await))
}

#[derive(Debug, Deserialize)]
pub struct SlugQuery {
    pub site_id: i64,
    pub slug: String,
}

/// GET /api/v1/products/by-slug?site_id=&slug=
pub async fn get_product_by_slug(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(query): Query<SlugQuery>,
) -> ApiResult<Product> {
    identity.require_site(query.site_id)?;
    let product = state
        .stores
        .catalog
        .get_product_by_slug(query.site_id, &query.slug)
        .await?;
    Ok(Json(with_cached_stock(&state, product).await))
}

/// GET /api/v1/sites/{site_id}/products
pub async fn list_products(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(site_id): Path<i64>,
    Query(page): Query<PaginationRequest>,
) -> ApiResult<PaginatedResponse<Product>> {
    identity.require_site(site_id)?;
    page.check(paging::PRODUCT_SORT)?;
    Ok(Json(state.stores.catalog.list_products(site_id, &page).await?))
}

#[derive(Debug, Deserialize)]
pub struct FilterRequest {
    pub site_id: i64,
    /// `{"price_range": ["100,500"], "category_ids": ["1,2"]}`
    #[serde(default)]
    pub filters: HashMap<String, Vec<String>>,
    /// e.g. `price_low_to_high`; defaults to recently updated
    pub sort_kind: Option<String>,
    #[serde(flatten)]
    pub page: PaginationRequest,
}

/// POST /api/v1/products/filter
pub async fn filter_products(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<FilterRequest>,
) -> ApiResult<PaginatedResponse<Product>> {
    identity.require_site(req.site_id)?;
    req.page.check(paging::PRODUCT_SORT)?;
    let filter = ProductFilter::parse(&req.filters)?;
    let sort = match req.sort_kind.as_deref() {
        Some(raw) => raw.parse::<SortKind>()?,
        None => SortKind::default(),
    };
    let products = state
        .stores
        .catalog
        .filter_products(req.site_id, &filter, sort, &req.page)
        .await?;
    Ok(Json(products))
}

/// DELETE /api/v1/products/{id}
pub async fn delete_product(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
) -> Result<StatusCode, AppError> {
    let product = state.stores.catalog.get_product(id).await?;
    identity.require_owner(product.user_id)?;

    state.stores.catalog.soft_delete_product(id).await?;
    invalidate_logged(state.stock_cache.as_ref(), &variant_ids(&product)).await;
    let edges = state
        .usage
        .on_entity_deleted(UsageKind::Product, product.site_id, id)
        .await?;
    tracing::info!(product_id = id, edges, "Product deleted");
    Ok(StatusCode::NO_CONTENT)
}
