//! Payment Gateway Adapters
//!
//! Each provider implements [`GatewayAdapter`]: `request` returns the URL the
//! shopper is redirected to, `verify` turns callback parameters into a
//! success/failure verdict. [`GatewayRouter`] picks the adapter from the
//! account's gateway kind; kinds without an adapter answer
//! `GatewayUnavailable("not supported")`.

mod idpay;
mod payir;
mod payping;
mod virtual_gateway;
mod zarinpal;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use shared::error::{AppError, ErrorCode};
use shared::models::{AccountConfig, GatewayKind, VerifyRecord};
use thiserror::Error;

pub use idpay::IdPayGateway;
pub use payir::PayIrGateway;
pub use payping::PayPingGateway;
pub use virtual_gateway::VirtualGateway;
pub use zarinpal::ZarinPalGateway;

use crate::config::Config;

/// Raw query / form parameters the gateway sent to the callback endpoint
pub type CallbackParams = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transport failure, 5xx, or the provider refused to open a payment
    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    /// Account config does not belong to the adapter it was handed to
    #[error("gateway misconfigured: {0}")]
    Misconfigured(String),

    /// Callback parameters are missing or malformed
    #[error("invalid callback: {0}")]
    InvalidCallback(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Unavailable(err.to_string())
    }
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unavailable(msg) => AppError::with_message(ErrorCode::GatewayUnavailable, msg),
            GatewayError::Misconfigured(msg) => {
                AppError::with_message(ErrorCode::GatewayNotConfigured, msg)
            }
            GatewayError::InvalidCallback(msg) => AppError::with_message(ErrorCode::InvalidCallback, msg),
        }
    }
}

/// Open a payment at the provider
#[derive(Debug, Clone)]
pub struct PaymentRequest<'a> {
    pub amount: i64,
    pub tracking_number: i64,
    pub account: &'a AccountConfig,
    /// Where the provider sends the shopper back
    pub callback_url: &'a str,
    pub client_ip: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRedirect {
    pub redirect_url: String,
    /// Provider-side payment id (authority, token, ...) needed again at verify
    pub provider_token: Option<String>,
}

/// Confirm a payment after the callback
#[derive(Debug, Clone)]
pub struct VerifyRequest<'a> {
    pub amount: i64,
    pub tracking_number: i64,
    pub provider_token: Option<&'a str>,
    pub account: &'a AccountConfig,
    pub params: &'a CallbackParams,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyOutcome {
    pub success: bool,
    pub transaction_code: Option<String>,
    pub message: Option<String>,
    pub response_code: Option<String>,
}

impl VerifyOutcome {
    pub fn success(transaction_code: impl Into<String>, response_code: impl Into<String>) -> Self {
        Self {
            success: true,
            transaction_code: Some(transaction_code.into()),
            message: None,
            response_code: Some(response_code.into()),
        }
    }

    pub fn failure(message: impl Into<String>, response_code: Option<String>) -> Self {
        Self {
            success: false,
            transaction_code: None,
            message: Some(message.into()),
            response_code,
        }
    }

    /// What gets persisted on the payment row
    pub fn record(&self) -> VerifyRecord {
        VerifyRecord {
            transaction_code: self.transaction_code.clone(),
            message: self.message.clone(),
            gateway_response_code: self.response_code.clone(),
        }
    }
}

#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    async fn request(&self, req: PaymentRequest<'_>) -> Result<PaymentRedirect, GatewayError>;
    async fn verify(&self, req: VerifyRequest<'_>) -> Result<VerifyOutcome, GatewayError>;
}

/// Dispatches on the account's gateway kind
#[derive(Clone, Default)]
pub struct GatewayRouter {
    adapters: HashMap<GatewayKind, Arc<dyn GatewayAdapter>>,
}

impl GatewayRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: GatewayKind, adapter: Arc<dyn GatewayAdapter>) -> Self {
        self.adapters.insert(kind, adapter);
        self
    }

    /// Production adapters for every provider with a REST integration
    pub fn from_config(config: &Config) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(config.gateway_timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        let base = |kind: GatewayKind| config.gateway_base_urls.get(&kind).cloned();

        Ok(Self::new()
            .with(
                GatewayKind::ZarinPal,
                Arc::new(ZarinPalGateway::new(http.clone(), base(GatewayKind::ZarinPal))),
            )
            .with(
                GatewayKind::IdPay,
                Arc::new(IdPayGateway::new(http.clone(), base(GatewayKind::IdPay))),
            )
            .with(
                GatewayKind::PayIr,
                Arc::new(PayIrGateway::new(http.clone(), base(GatewayKind::PayIr))),
            )
            .with(
                GatewayKind::PayPing,
                Arc::new(PayPingGateway::new(http, base(GatewayKind::PayPing))),
            )
            .with(
                GatewayKind::ParbadVirtual,
                Arc::new(VirtualGateway::new(
                    config.base_urls.virtual_gateway.clone(),
                    config.jwt_secret.as_bytes(),
                )?),
            ))
    }

    fn adapter(&self, kind: GatewayKind) -> Result<&Arc<dyn GatewayAdapter>, GatewayError> {
        self.adapters
            .get(&kind)
            .ok_or_else(|| GatewayError::Unavailable(format!("{kind} not supported")))
    }
}

#[async_trait]
impl GatewayAdapter for GatewayRouter {
    async fn request(&self, req: PaymentRequest<'_>) -> Result<PaymentRedirect, GatewayError> {
        let kind = req.account.kind();
        let tracking_number = req.tracking_number;
        let result = self.adapter(kind)?.request(req).await;
        match &result {
            Ok(_) => tracing::info!(gateway = %kind, tracking_number, "Gateway payment opened"),
            Err(e) => {
                tracing::warn!(gateway = %kind, tracking_number, error = %e, "Gateway request failed")
            }
        }
        result
    }

    async fn verify(&self, req: VerifyRequest<'_>) -> Result<VerifyOutcome, GatewayError> {
        let kind = req.account.kind();
        let tracking_number = req.tracking_number;
        let result = self.adapter(kind)?.verify(req).await;
        match &result {
            Ok(v) => tracing::info!(
                gateway = %kind,
                tracking_number,
                success = v.success,
                response_code = ?v.response_code,
                "Gateway verify"
            ),
            Err(e) => {
                tracing::warn!(gateway = %kind, tracking_number, error = %e, "Gateway verify failed")
            }
        }
        result
    }
}

/// Required callback parameter
pub(crate) fn param<'a>(params: &'a CallbackParams, key: &str) -> Result<&'a str, GatewayError> {
    params
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| GatewayError::InvalidCallback(format!("missing {key}")))
}

/// Treat a 5xx as the provider being down, anything else as an answer
pub(crate) fn check_server_error(resp: &reqwest::Response) -> Result<(), GatewayError> {
    if resp.status().is_server_error() {
        return Err(GatewayError::Unavailable(format!("provider returned {}", resp.status())));
    }
    Ok(())
}

pub(crate) fn mismatch(expected: GatewayKind, got: &AccountConfig) -> GatewayError {
    GatewayError::Misconfigured(format!("{expected} adapter got {} account", got.kind()))
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Tiny provider stand-ins served by axum on an ephemeral port

    use axum::Router;

    /// Serve `app` on 127.0.0.1 and return its base URL
    pub async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }
}
