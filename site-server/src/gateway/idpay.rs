//! IDPay (REST v1.1)
//!
//! request: `POST /v1.1/payment` → `{id, link}`
//! callback: `status, track_id, id, order_id` (status 10 = waiting for verify)
//! verify: `POST /v1.1/payment/verify` → `status` 100 (verified) or 101 (verified before)

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use shared::models::{AccountConfig, ApiKeyCredentials, GatewayKind};

use super::{
    GatewayAdapter, GatewayError, PaymentRedirect, PaymentRequest, VerifyOutcome, VerifyRequest,
    check_server_error, mismatch, param,
};

const PRODUCTION_URL: &str = "https://api.idpay.ir";

pub struct IdPayGateway {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    id: Option<String>,
    link: Option<String>,
    error_code: Option<i64>,
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    status: Option<i64>,
    track_id: Option<serde_json::Value>,
    error_code: Option<i64>,
    error_message: Option<String>,
}

impl IdPayGateway {
    pub fn new(http: reqwest::Client, base_url: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.unwrap_or_else(|| PRODUCTION_URL.into()),
        }
    }

    fn credentials(account: &AccountConfig) -> Result<&ApiKeyCredentials, GatewayError> {
        match account {
            AccountConfig::IdPay(c) => Ok(c),
            other => Err(mismatch(GatewayKind::IdPay, other)),
        }
    }

    fn post(&self, creds: &ApiKeyCredentials, path: &str) -> reqwest::RequestBuilder {
        self.http
            .post(format!("{}{path}", self.base_url))
            .header("X-API-KEY", &creds.api)
            .header("X-SANDBOX", if creds.is_test_account { "1" } else { "0" })
    }
}

#[async_trait]
impl GatewayAdapter for IdPayGateway {
    async fn request(&self, req: PaymentRequest<'_>) -> Result<PaymentRedirect, GatewayError> {
        let creds = Self::credentials(req.account)?;
        let resp = self
            .post(creds, "/v1.1/payment")
            .json(&json!({
                "order_id": req.tracking_number.to_string(),
                "amount": req.amount,
                "callback": req.callback_url,
            }))
            .send()
            .await?;
        check_server_error(&resp)?;
        let body: CreateResponse = resp.json().await?;
        match (body.id, body.link) {
            (Some(id), Some(link)) => Ok(PaymentRedirect {
                redirect_url: link,
                provider_token: Some(id),
            }),
            _ => Err(GatewayError::Unavailable(format!(
                "idpay refused payment ({}): {}",
                body.error_code.unwrap_or_default(),
                body.error_message.unwrap_or_default()
            ))),
        }
    }

    async fn verify(&self, req: VerifyRequest<'_>) -> Result<VerifyOutcome, GatewayError> {
        let creds = Self::credentials(req.account)?;
        let status = param(req.params, "status")?;
        let id = param(req.params, "id")?;
        if req.provider_token.is_some_and(|t| t != id) {
            return Err(GatewayError::InvalidCallback("payment id mismatch".into()));
        }
        if status != "10" {
            return Ok(VerifyOutcome::failure(
                "payment not completed",
                Some(status.to_string()),
            ));
        }

        let resp = self
            .post(creds, "/v1.1/payment/verify")
            .json(&json!({ "id": id, "order_id": req.tracking_number.to_string() }))
            .send()
            .await?;
        check_server_error(&resp)?;
        let body: VerifyResponse = resp.json().await?;

        Ok(match body.status {
            Some(code @ (100 | 101)) => {
                let track = match body.track_id {
                    Some(serde_json::Value::String(s)) => s,
                    Some(v) => v.to_string(),
                    None => id.to_string(),
                };
                VerifyOutcome::success(track, code.to_string())
            }
            Some(code) => VerifyOutcome::failure("verify rejected", Some(code.to_string())),
            None => VerifyOutcome::failure(
                body.error_message.unwrap_or_else(|| "verify rejected".into()),
                body.error_code.map(|c| c.to_string()),
            ),
        })
    }
}
