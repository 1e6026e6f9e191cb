//! HTTP status code mapping for error codes

use super::codes::ErrorCode;
use http::StatusCode;

impl ErrorCode {
    /// Get the appropriate HTTP status code for this error code
    pub fn http_status(&self) -> StatusCode {
        match self {
            // Success
            Self::Success => StatusCode::OK,

            // 404 Not Found
            Self::NotFound
            | Self::SiteNotFound
            | Self::PageNotFound
            | Self::ArticleNotFound
            | Self::HeaderFooterNotFound
            | Self::OrderNotFound
            | Self::BasketNotFound
            | Self::PaymentNotFound
            | Self::ProductNotFound
            | Self::VariantNotFound
            | Self::DiscountNotFound
            | Self::UserNotFound
            | Self::PlanNotFound
            | Self::UnitPriceNotFound => StatusCode::NOT_FOUND,

            // 409 Conflict
            Self::AlreadyExists
            | Self::SlugAlreadyExists
            | Self::BasketChanged
            | Self::OutOfStock
            | Self::InvalidOrderState
            | Self::CouponExhausted
            | Self::DiscountExhausted
            | Self::DiscountAlreadyRedeemed => StatusCode::CONFLICT,

            // 401 Unauthorized
            Self::NotAuthenticated | Self::TokenExpired | Self::TokenInvalid => {
                StatusCode::UNAUTHORIZED
            }

            // 403 Forbidden
            Self::PermissionDenied | Self::AdminRequired => StatusCode::FORBIDDEN,

            // 502 Bad Gateway (upstream payment provider failed, retryable)
            Self::GatewayUnavailable => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable (transient errors, client can retry)
            Self::NetworkError => StatusCode::SERVICE_UNAVAILABLE,

            // 500 Internal Server Error
            Self::Unknown
            | Self::NeedsReconciliation
            | Self::InternalError
            | Self::DatabaseError
            | Self::ConfigError
            | Self::BrokerError => StatusCode::INTERNAL_SERVER_ERROR,

            // 400 Bad Request (default for validation/business errors)
            _ => StatusCode::BAD_REQUEST,
        }
    }
}
