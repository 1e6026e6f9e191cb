//! HTTP API for site-server
//!
//! `/health`, `/payment/callback/*` and `/payment/virtual` are public; every
//! route under `/api/v1` requires a bearer token.

pub mod basket;
pub mod content;
pub mod discount;
pub mod gateway;
pub mod health;
pub mod order;
pub mod page;
pub mod payment;
pub mod product;

use std::any::Any;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Router, middleware};
use http::request::Parts;
use shared::error::AppError;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::require_identity;
use crate::state::AppState;

pub type ApiResult<T> = Result<axum::Json<T>, AppError>;

/// Build the application router
pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        .merge(basket::router())
        .merge(order::router())
        .merge(payment::router())
        .merge(gateway::router())
        .merge(product::router())
        .merge(discount::router())
        .merge(page::router())
        .merge(content::router())
        .layer(middleware::from_fn_with_state(state.clone(), require_identity));

    Router::new()
        .route("/health", get(health::health_check))
        .merge(payment::public_router())
        .nest("/api/v1", api)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = detail, "Handler panicked");
    AppError::internal("internal server error").into_response()
}

/// Caller address: first `X-Forwarded-For` entry, then the peer address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

impl<S: Send + Sync> FromRequestParts<S> for ClientIp {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(forwarded) = parts.headers.get("x-forwarded-for")
            && let Ok(val) = forwarded.to_str()
            && let Some(first) = val.split(',').next()
        {
            let ip = first.trim();
            if !ip.is_empty() {
                return Ok(ClientIp(ip.to_owned()));
            }
        }

        let ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ci| ci.0.ip().to_string())
            .unwrap_or_else(|| "unknown".to_owned());
        Ok(ClientIp(ip))
    }
}
