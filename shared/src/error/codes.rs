//! Unified error codes for the site builder
//!
//! Error codes are organized by category:
//! - 0xxx: General errors
//! - 1xxx: Authentication errors
//! - 2xxx: Permission errors
//! - 3xxx: Site / page errors
//! - 4xxx: Order and basket errors
//! - 5xxx: Payment and gateway errors
//! - 6xxx: Catalog and discount errors
//! - 7xxx: Account (plan / credit) errors
//! - 9xxx: System errors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unified error code enum
///
/// All error codes are represented as u16 values so the frontend can
/// localize them without parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
#[repr(u16)]
pub enum ErrorCode {
    // ==================== 0xxx: General ====================
    /// Operation completed successfully
    Success = 0,
    /// Unknown error
    Unknown = 1,
    /// Validation failed
    ValidationFailed = 2,
    /// Resource not found
    NotFound = 3,
    /// Resource already exists
    AlreadyExists = 4,
    /// Invalid request
    InvalidRequest = 5,
    /// Value out of range
    ValueOutOfRange = 8,

    // ==================== 1xxx: Auth ====================
    /// User is not authenticated
    NotAuthenticated = 1001,
    /// Token has expired
    TokenExpired = 1003,
    /// Token is invalid
    TokenInvalid = 1004,

    // ==================== 2xxx: Permission ====================
    /// Permission denied
    PermissionDenied = 2001,
    /// Admin role required
    AdminRequired = 2003,

    // ==================== 3xxx: Site / Page ====================
    /// Site not found
    SiteNotFound = 3001,
    /// Entity and page belong to different sites
    SiteMismatch = 3002,
    /// Page not found
    PageNotFound = 3003,
    /// Slug already used within the site
    SlugAlreadyExists = 3004,
    /// Article not found
    ArticleNotFound = 3005,
    /// Header/footer not found
    HeaderFooterNotFound = 3006,

    // ==================== 4xxx: Order / Basket ====================
    /// Order not found
    OrderNotFound = 4001,
    /// Basket not found
    BasketNotFound = 4002,
    /// Basket content is invalid
    BasketInvalid = 4003,
    /// Basket was modified since the client last saw it
    BasketChanged = 4004,
    /// One or more variants lack stock
    OutOfStock = 4005,
    /// Order is not in a state that allows the operation
    InvalidOrderState = 4006,
    /// Payment succeeded but the commit failed
    NeedsReconciliation = 4007,
    /// Basket has no items
    BasketEmpty = 4008,

    // ==================== 5xxx: Payment / Gateway ====================
    /// Payment not found
    PaymentNotFound = 5001,
    /// Gateway transport failure or 5xx
    GatewayUnavailable = 5002,
    /// Site has no gateway configuration
    GatewayNotConfigured = 5003,
    /// Selected gateway is disabled for the site
    GatewayInactive = 5004,
    /// Gateway rejected the payment
    PaymentVerifyFailed = 5005,
    /// Callback parameters are missing or malformed
    InvalidCallback = 5006,

    // ==================== 6xxx: Catalog / Discount ====================
    /// Product not found
    ProductNotFound = 6001,
    /// Product variant not found
    VariantNotFound = 6002,
    /// Coupon has no remaining uses
    CouponExhausted = 6003,
    /// Discount code not found
    DiscountNotFound = 6004,
    /// Discount has no remaining uses
    DiscountExhausted = 6005,
    /// Customer already redeemed this discount
    DiscountAlreadyRedeemed = 6006,
    /// Discount code has expired
    DiscountExpired = 6007,

    // ==================== 7xxx: Account ====================
    /// User not found
    UserNotFound = 7001,
    /// Plan not found
    PlanNotFound = 7002,
    /// Unit price not found for a credit kind
    UnitPriceNotFound = 7003,

    // ==================== 9xxx: System ====================
    /// Internal server error
    InternalError = 9001,
    /// Database error
    DatabaseError = 9002,
    /// Configuration error
    ConfigError = 9003,
    /// Network error
    NetworkError = 9004,
    /// Message broker error
    BrokerError = 9005,
}

impl ErrorCode {
    /// Get the numeric code value
    #[inline]
    pub const fn code(&self) -> u16 {
        *self as u16
    }

    /// Check if this is a success code
    #[inline]
    pub const fn is_success(&self) -> bool {
        matches!(self, ErrorCode::Success)
    }

    /// Get the developer-facing English message for this error code
    pub const fn message(&self) -> &'static str {
        match self {
            // General
            ErrorCode::Success => "Operation completed successfully",
            ErrorCode::Unknown => "An unknown error occurred",
            ErrorCode::ValidationFailed => "Validation failed",
            ErrorCode::NotFound => "Resource not found",
            ErrorCode::AlreadyExists => "Resource already exists",
            ErrorCode::InvalidRequest => "Invalid request",
            ErrorCode::ValueOutOfRange => "Value is out of range",

            // Auth
            ErrorCode::NotAuthenticated => "User is not authenticated",
            ErrorCode::TokenExpired => "Token has expired",
            ErrorCode::TokenInvalid => "Token is invalid",

            // Permission
            ErrorCode::PermissionDenied => "Permission denied",
            ErrorCode::AdminRequired => "Admin role required",

            // Site / Page
            ErrorCode::SiteNotFound => "Site not found",
            ErrorCode::SiteMismatch => "Entity belongs to a different site",
            ErrorCode::PageNotFound => "Page not found",
            ErrorCode::SlugAlreadyExists => "Slug already exists in this site",
            ErrorCode::ArticleNotFound => "Article not found",
            ErrorCode::HeaderFooterNotFound => "Header/footer not found",

            // Order / Basket
            ErrorCode::OrderNotFound => "Order not found",
            ErrorCode::BasketNotFound => "Basket not found",
            ErrorCode::BasketInvalid => "Basket is invalid",
            ErrorCode::BasketChanged => "Basket changed, please refresh",
            ErrorCode::OutOfStock => "Some items are out of stock",
            ErrorCode::InvalidOrderState => "Order state does not allow this operation",
            ErrorCode::NeedsReconciliation => "Payment received but order could not be committed",
            ErrorCode::BasketEmpty => "Basket is empty",

            // Payment / Gateway
            ErrorCode::PaymentNotFound => "Payment not found",
            ErrorCode::GatewayUnavailable => "Payment gateway is unavailable",
            ErrorCode::GatewayNotConfigured => "No payment gateway configured for this site",
            ErrorCode::GatewayInactive => "Selected payment gateway is inactive",
            ErrorCode::PaymentVerifyFailed => "Payment verification failed",
            ErrorCode::InvalidCallback => "Invalid gateway callback",

            // Catalog / Discount
            ErrorCode::ProductNotFound => "Product not found",
            ErrorCode::VariantNotFound => "Product variant not found",
            ErrorCode::CouponExhausted => "Coupon has no remaining uses",
            ErrorCode::DiscountNotFound => "Discount code not found",
            ErrorCode::DiscountExhausted => "Discount has no remaining uses",
            ErrorCode::DiscountAlreadyRedeemed => "Discount already redeemed by this customer",
            ErrorCode::DiscountExpired => "Discount code has expired",

            // Account
            ErrorCode::UserNotFound => "User not found",
            ErrorCode::PlanNotFound => "Plan not found",
            ErrorCode::UnitPriceNotFound => "Unit price not found",

            // System
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::DatabaseError => "Database error",
            ErrorCode::ConfigError => "Configuration error",
            ErrorCode::NetworkError => "Network error",
            ErrorCode::BrokerError => "Message broker error",
        }
    }
}

impl From<ErrorCode> for u16 {
    #[inline]
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}

/// Error when converting from an invalid u16 to ErrorCode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidErrorCode(pub u16);

impl fmt::Display for InvalidErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid error code: {}", self.0)
    }
}

impl std::error::Error for InvalidErrorCode {}

impl TryFrom<u16> for ErrorCode {
    type Error = InvalidErrorCode;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        let code = match value {
            // General
            0 => ErrorCode::Success,
            1 => ErrorCode::Unknown,
            2 => ErrorCode::ValidationFailed,
            3 => ErrorCode::NotFound,
            4 => ErrorCode::AlreadyExists,
            5 => ErrorCode::InvalidRequest,
            8 => ErrorCode::ValueOutOfRange,

            // Auth
            1001 => ErrorCode::NotAuthenticated,
            1003 => ErrorCode::TokenExpired,
            1004 => ErrorCode::TokenInvalid,

            // Permission
            2001 => ErrorCode::PermissionDenied,
            2003 => ErrorCode::AdminRequired,

            // Site / Page
            3001 => ErrorCode::SiteNotFound,
            3002 => ErrorCode::SiteMismatch,
            3003 => ErrorCode::PageNotFound,
            3004 => ErrorCode::SlugAlreadyExists,
            3005 => ErrorCode::ArticleNotFound,
            3006 => ErrorCode::HeaderFooterNotFound,

            // Order / Basket
            4001 => ErrorCode::OrderNotFound,
            4002 => ErrorCode::BasketNotFound,
            4003 => ErrorCode::BasketInvalid,
            4004 => ErrorCode::BasketChanged,
            4005 => ErrorCode::OutOfStock,
            4006 => ErrorCode::InvalidOrderState,
            4007 => ErrorCode::NeedsReconciliation,
            4008 => ErrorCode::BasketEmpty,

            // Payment / Gateway
            5001 => ErrorCode::PaymentNotFound,
            5002 => ErrorCode::GatewayUnavailable,
            5003 => ErrorCode::GatewayNotConfigured,
            5004 => ErrorCode::GatewayInactive,
            5005 => ErrorCode::PaymentVerifyFailed,
            5006 => ErrorCode::InvalidCallback,

            // Catalog / Discount
            6001 => ErrorCode::ProductNotFound,
            6002 => ErrorCode::VariantNotFound,
            6003 => ErrorCode::CouponExhausted,
            6004 => ErrorCode::DiscountNotFound,
            6005 => ErrorCode::DiscountExhausted,
            6006 => ErrorCode::DiscountAlreadyRedeemed,
            6007 => ErrorCode::DiscountExpired,

            // Account
            7001 => ErrorCode::UserNotFound,
            7002 => ErrorCode::PlanNotFound,
            7003 => ErrorCode::UnitPriceNotFound,

            // System
            9001 => ErrorCode::InternalError,
            9002 => ErrorCode::DatabaseError,
            9003 => ErrorCode::ConfigError,
            9004 => ErrorCode::NetworkError,
            9005 => ErrorCode::BrokerError,

            _ => return Err(InvalidErrorCode(value)),
        };
        Ok(code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_values() {
        assert_eq!(ErrorCode::Success.code(), 0);
        assert_eq!(ErrorCode::ValidationFailed.code(), 2);
        assert_eq!(ErrorCode::NotFound.code(), 3);
        assert_eq!(ErrorCode::NotAuthenticated.code(), 1001);
        assert_eq!(ErrorCode::PermissionDenied.code(), 2001);
        assert_eq!(ErrorCode::SiteMismatch.code(), 3002);
        assert_eq!(ErrorCode::BasketChanged.code(), 4004);
        assert_eq!(ErrorCode::OutOfStock.code(), 4005);
        assert_eq!(ErrorCode::GatewayUnavailable.code(), 5002);
        assert_eq!(ErrorCode::DiscountAlreadyRedeemed.code(), 6006);
        assert_eq!(ErrorCode::InternalError.code(), 9001);
    }

    #[test]
    fn test_is_success() {
        assert!(ErrorCode::Success.is_success());
        assert!(!ErrorCode::NotFound.is_success());
        assert!(!ErrorCode::NeedsReconciliation.is_success());
    }

    #[test]
    fn test_try_from_valid() {
        assert_eq!(ErrorCode::try_from(0), Ok(ErrorCode::Success));
        assert_eq!(ErrorCode::try_from(1001), Ok(ErrorCode::NotAuthenticated));
        assert_eq!(ErrorCode::try_from(4001), Ok(ErrorCode::OrderNotFound));
        assert_eq!(ErrorCode::try_from(4007), Ok(ErrorCode::NeedsReconciliation));
        assert_eq!(ErrorCode::try_from(6003), Ok(ErrorCode::CouponExhausted));
        assert_eq!(ErrorCode::try_from(9001), Ok(ErrorCode::InternalError));
    }

    #[test]
    fn test_try_from_invalid() {
        assert_eq!(ErrorCode::try_from(999), Err(InvalidErrorCode(999)));
        assert_eq!(ErrorCode::try_from(10000), Err(InvalidErrorCode(10000)));
        assert_eq!(ErrorCode::try_from(8001), Err(InvalidErrorCode(8001)));
    }

    #[test]
    fn test_serialize() {
        let json = serde_json::to_string(&ErrorCode::NotFound).unwrap();
        assert_eq!(json, "3");

        let json = serde_json::to_string(&ErrorCode::BasketChanged).unwrap();
        assert_eq!(json, "4004");
    }

    #[test]
    fn test_deserialize() {
        let code: ErrorCode = serde_json::from_str("4005").unwrap();
        assert_eq!(code, ErrorCode::OutOfStock);

        let result: Result<ErrorCode, _> = serde_json::from_str("999");
        assert!(result.is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", ErrorCode::Success), "0");
        assert_eq!(format!("{}", ErrorCode::SiteMismatch), "3002");
    }

    #[test]
    fn test_message() {
        assert_eq!(ErrorCode::NotFound.message(), "Resource not found");
        assert_eq!(ErrorCode::OrderNotFound.message(), "Order not found");
        assert_eq!(ErrorCode::InternalError.message(), "Internal server error");
    }

    #[test]
    fn test_every_code_roundtrips_through_u16() {
        let codes = [
            ErrorCode::Success,
            ErrorCode::TokenExpired,
            ErrorCode::AdminRequired,
            ErrorCode::SlugAlreadyExists,
            ErrorCode::BasketEmpty,
            ErrorCode::InvalidCallback,
            ErrorCode::DiscountExpired,
            ErrorCode::UnitPriceNotFound,
            ErrorCode::BrokerError,
        ];

        for code in codes {
            assert_eq!(ErrorCode::try_from(code.code()), Ok(code));
        }
    }
}
