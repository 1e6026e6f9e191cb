use shared::error::{AppError, ErrorCode};
use shared::models::{CreditKind, GatewayKind, OrderStatus};
use thiserror::Error;

use crate::db::RepoError;
use crate::gateway::GatewayError;
use crate::pricing::PricingError;

/// Order lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("storage error: {0}")]
    Repo(#[from] RepoError),

    #[error("pricing error: {0}")]
    Pricing(#[from] PricingError),

    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Basket not found")]
    BasketNotFound,

    #[error("Basket is empty")]
    BasketEmpty,

    #[error("Basket changed: items {0:?}")]
    BasketChanged(Vec<i64>),

    #[error("Out of stock: variants {0:?}")]
    OutOfStock(Vec<i64>),

    #[error("Gateway not configured: {0}")]
    GatewayNotConfigured(GatewayKind),

    #[error("Gateway inactive: {0}")]
    GatewayInactive(GatewayKind),

    #[error("Order {0} is {1:?}")]
    InvalidOrderState(i64, OrderStatus),

    #[error("Order {0} belongs to another customer")]
    NotOrderOwner(i64),

    #[error("Unit price not found: {0:?}")]
    UnitPriceNotFound(CreditKind),

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("Invalid callback: {0}")]
    InvalidCallback(String),

    #[error("Corrupt payment envelope {tracking_number}: {reason}")]
    CorruptEnvelope { tracking_number: i64, reason: String },
}

pub type LifecycleResult<T> = Result<T, LifecycleError>;

impl From<LifecycleError> for AppError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::Repo(e) => e.into(),
            LifecycleError::Pricing(e) => e.into(),
            LifecycleError::Gateway(e) => e.into(),
            LifecycleError::BasketNotFound => AppError::new(ErrorCode::BasketNotFound),
            LifecycleError::BasketEmpty => AppError::new(ErrorCode::BasketEmpty),
            LifecycleError::BasketChanged(ids) => {
                AppError::new(ErrorCode::BasketChanged).with_detail("basket_item_ids", ids)
            }
            LifecycleError::OutOfStock(ids) => {
                AppError::new(ErrorCode::OutOfStock).with_detail("product_variant_ids", ids)
            }
            LifecycleError::GatewayNotConfigured(kind) => {
                AppError::new(ErrorCode::GatewayNotConfigured).with_detail("gateway", kind.as_str())
            }
            LifecycleError::GatewayInactive(kind) => {
                AppError::new(ErrorCode::GatewayInactive).with_detail("gateway", kind.as_str())
            }
            LifecycleError::InvalidOrderState(id, status) => {
                AppError::new(ErrorCode::InvalidOrderState)
                    .with_detail("order_id", id)
                    .with_detail("status", status.as_str())
            }
            LifecycleError::NotOrderOwner(_) => AppError::new(ErrorCode::OrderNotFound),
            LifecycleError::UnitPriceNotFound(kind) => {
                AppError::new(ErrorCode::UnitPriceNotFound).with_detail("credit", kind.as_str())
            }
            LifecycleError::Invalid(msg) => AppError::validation(msg),
            LifecycleError::InvalidCallback(msg) => {
                AppError::with_message(ErrorCode::InvalidCallback, msg)
            }
            LifecycleError::CorruptEnvelope {
                tracking_number,
                reason,
            } => {
                tracing::error!(tracking_number, reason = %reason, "Corrupt payment envelope");
                AppError::new(ErrorCode::InternalError)
            }
        }
    }
}
