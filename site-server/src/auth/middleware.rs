//! Bearer-token middleware for the `/api/v1` router
//!
//! Public routes (`/health`, `/payment/callback/*`, `/payment/virtual`) are
//! mounted outside this layer.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use shared::error::AppError;

use crate::state::AppState;

/// Verify the bearer token and put the [`Identity`](super::Identity) into request extensions
pub async fn require_identity(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(AppError::not_authenticated)?;

    let identity = state.jwt.verify(token)?;
    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}
