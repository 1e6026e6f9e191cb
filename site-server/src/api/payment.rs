//! Payment endpoints
//!
//! Callbacks and the virtual landing page are reached by the shopper's
//! browser straight from a gateway, so they carry no bearer token. The
//! tracking number in the callback URL is the only key.

use axum::{
    Extension, Form, Json, Router,
    extract::{Path, Query, State},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use http::{StatusCode, header};
use serde::Deserialize;
use shared::error::{AppError, ErrorCode};
use shared::models::{CallVerifyUrl, GatewayKind, Payment, PaymentStatus};
use shared::query::{PaginatedResponse, PaginationRequest};

use crate::auth::Identity;
use crate::db::{PaymentStore, paging};
use crate::gateway::CallbackParams;
use crate::orders::{CreditChargeRequest, PaymentRedirectView, PlanUpgradeRequest};
use crate::state::AppState;

use super::{ApiResult, ClientIp};

/// Routes without authentication
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route(
            "/payment/callback/{call_verify_url}",
            get(callback_query).post(callback_form),
        )
        .route("/payment/virtual", get(virtual_landing))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/payment/charge-credit", post(charge_credit))
        .route("/payment/upgrade-plan", post(upgrade_plan))
        .route("/admin/payments", get(admin_list_payments))
}

// ============================================================================
// Callbacks
// ============================================================================

/// GET /payment/callback/{call_verify_url}
pub async fn callback_query(
    State(state): State<AppState>,
    Path(flow): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Result<Response, AppError> {
    handle_callback(&state, &flow, params).await
}

/// POST /payment/callback/{call_verify_url} (form body gateways)
pub async fn callback_form(
    State(state): State<AppState>,
    Path(flow): Path<String>,
    Query(mut params): Query<CallbackParams>,
    Form(form): Form<CallbackParams>,
) -> Result<Response, AppError> {
    // 同名参数以 body 为准
    params.extend(form);
    handle_callback(&state, &flow, params).await
}

async fn handle_callback(
    state: &AppState,
    flow: &str,
    params: CallbackParams,
) -> Result<Response, AppError> {
    let flow: CallVerifyUrl = flow
        .parse()
        .map_err(|e: String| AppError::with_message(ErrorCode::InvalidCallback, e))?;
    let result = state.orders.verify_payment(flow, &params).await?;
    tracing::info!(
        tracking_number = result.tracking_number,
        flow = flow.as_str(),
        status = ?result.status,
        "Payment callback handled"
    );
    Ok(found(&result.redirect_url()))
}

fn found(location: &str) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location.to_owned())]).into_response()
}

// ============================================================================
// Virtual gateway landing page
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct VirtualQuery {
    pub tracking_number: i64,
}

/// GET /payment/virtual?tracking_number=
///
/// Offers "pay" and "cancel" links back to the callback of the stored payment.
pub async fn virtual_landing(
    State(state): State<AppState>,
    Query(query): Query<VirtualQuery>,
) -> Result<Html<String>, AppError> {
    let payment = state
        .stores
        .payments
        .get_payment_by_tracking(query.tracking_number)
        .await?;
    if payment.gateway != GatewayKind::ParbadVirtual {
        return Err(AppError::new(ErrorCode::PaymentNotFound));
    }
    if payment.status != PaymentStatus::Pending {
        return Err(AppError::with_message(
            ErrorCode::InvalidCallback,
            "payment is no longer pending",
        ));
    }

    let callback = state
        .config
        .callback_url(payment.call_verify_url.as_str(), payment.tracking_number);
    let (pay, cancel) = state
        .virtual_gateway
        .result_links(&callback, payment.tracking_number)?;
    Ok(Html(landing_page(&payment, &pay, &cancel)))
}

fn landing_page(payment: &Payment, pay: &str, cancel: &str) -> String {
    let attr = |url: &str| url.replace('&', "&amp;").replace('"', "&quot;");
    format!(
        r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>Virtual gateway</title></head>
<body>
<h1>Virtual gateway</h1>
<p>Tracking number: {tracking}</p>
<p>Amount: {amount}</p>
<p><a id="pay" href="{pay}">Pay</a> <a id="cancel" href="{cancel}">Cancel</a></p>
</body>
</html>
"#,
        tracking = payment.tracking_number,
        amount = payment.amount,
        pay = attr(pay),
        cancel = attr(cancel),
    )
}

// ============================================================================
// User payments
// ============================================================================

/// POST /api/v1/payment/charge-credit
pub async fn charge_credit(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    ClientIp(client_ip): ClientIp,
    Json(req): Json<CreditChargeRequest>,
) -> ApiResult<PaymentRedirectView> {
    let user_id = identity.user_id()?;
    let view = state
        .orders
        .request_credit_charge(user_id, &req, &client_ip)
        .await?;
    Ok(Json(view))
}

/// POST /api/v1/payment/upgrade-plan
pub async fn upgrade_plan(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    ClientIp(client_ip): ClientIp,
    Json(req): Json<PlanUpgradeRequest>,
) -> ApiResult<PaymentRedirectView> {
    let user_id = identity.user_id()?;
    let view = state
        .orders
        .request_plan_upgrade(user_id, &req, &client_ip)
        .await?;
    Ok(Json(view))
}

/// GET /api/v1/admin/payments
pub async fn admin_list_payments(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Query(page): Query<PaginationRequest>,
) -> ApiResult<PaginatedResponse<Payment>> {
    identity.require_admin()?;
    page.check(paging::PAYMENT_SORT)?;
    Ok(Json(state.orders.all_payments(&page).await?))
}
