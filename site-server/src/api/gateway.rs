//! Per-site gateway configuration

use std::collections::HashSet;

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    routing::{get, post},
};
use serde::Deserialize;
use shared::error::AppError;
use shared::models::{Gateway, GatewayAccount};
use shared::query::{PaginatedResponse, PaginationRequest};
use validator::Validate;

use crate::auth::Identity;
use crate::db::{GatewayStore, paging};
use crate::state::AppState;

use super::ApiResult;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/gateway", post(upsert_gateway))
        .route("/gateway/{id}", get(get_gateway))
        .route("/admin/gateways", get(admin_list_gateways))
}

#[derive(Debug, Deserialize, Validate)]
pub struct GatewayUpsert {
    pub site_id: i64,
    /// Accounts to add or replace; kinds not listed keep their stored config
    #[validate(length(min = 1, max = 16))]
    pub accounts: Vec<GatewayAccount>,
}

/// POST /api/v1/gateway
pub async fn upsert_gateway(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<GatewayUpsert>,
) -> ApiResult<Gateway> {
    let user_id = identity.user_id()?;
    identity.require_site_owner(req.site_id)?;
    req.validate()?;

    let mut kinds = HashSet::new();
    if let Some(dup) = req.accounts.iter().find(|a| !kinds.insert(a.config.kind())) {
        return Err(AppError::invalid_field(
            "accounts",
            format!("{} listed twice", dup.config.kind()),
        ));
    }

    let gateway = state
        .stores
        .gateways
        .upsert_gateway(req.site_id, user_id, req.accounts)
        .await?;
    tracing::info!(
        gateway_id = gateway.id,
        site_id = gateway.site_id,
        accounts = gateway.accounts.len(),
        "Gateway configuration saved"
    );
    Ok(Json(gateway))
}

/// GET /api/v1/gateway/{id}
pub async fn get_gateway(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<i64>,
) -> ApiResult<Gateway> {
    let gateway = state.stores.gateways.get_gateway(id).await?;
    identity.require_owner(gateway.user_id)?;
    Ok(Json(gateway))
}

/// GET /api/v1/admin/gateways
pub async fn admin_list_gateways(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(page): Query<PaginationRequest>,
) -> ApiResult<PaginatedResponse<Gateway>> {
    identity.require_admin()?;
    page.check(paging::GATEWAY_SORT)?;
    Ok(Json(state.stores.gateways.list_gateways(&page).await?))
}
