//! PayPing (REST v2)
//!
//! request: `POST /v2/pay` (bearer token) → `code`, shopper goes to `/v2/pay/gotoipg/{code}`
//! callback: `refid, clientrefid, code`
//! verify: `POST /v2/pay/verify` → 200 on success, 4xx with an error map otherwise

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use shared::models::{AccountConfig, GatewayKind, PayPingCredentials};

use super::{
    GatewayAdapter, GatewayError, PaymentRedirect, PaymentRequest, VerifyOutcome, VerifyRequest,
    check_server_error, mismatch, param,
};

const PRODUCTION_URL: &str = "https://api.payping.ir";

pub struct PayPingGateway {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct PayResponse {
    code: Option<String>,
}

impl PayPingGateway {
    pub fn new(http: reqwest::Client, base_url: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.unwrap_or_else(|| PRODUCTION_URL.into()),
        }
    }

    fn credentials(account: &AccountConfig) -> Result<&PayPingCredentials, GatewayError> {
        match account {
            AccountConfig::PayPing(c) => Ok(c),
            other => Err(mismatch(GatewayKind::PayPing, other)),
        }
    }
}

#[async_trait]
impl GatewayAdapter for PayPingGateway {
    async fn request(&self, req: PaymentRequest<'_>) -> Result<PaymentRedirect, GatewayError> {
        let creds = Self::credentials(req.account)?;
        let resp = self
            .http
            .post(format!("{}/v2/pay", self.base_url))
            .bearer_auth(&creds.access_token)
            .json(&json!({
                "amount": req.amount,
                "returnUrl": req.callback_url,
                "clientRefId": req.tracking_number.to_string(),
            }))
            .send()
            .await?;
        check_server_error(&resp)?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Unavailable(format!(
                "payping refused payment ({status}): {text}"
            )));
        }
        let body: PayResponse = resp.json().await?;
        let code = body
            .code
            .ok_or_else(|| GatewayError::Unavailable("payping returned no code".into()))?;
        Ok(PaymentRedirect {
            redirect_url: format!("{}/v2/pay/gotoipg/{code}", self.base_url),
            provider_token: Some(code),
        })
    }

    async fn verify(&self, req: VerifyRequest<'_>) -> Result<VerifyOutcome, GatewayError> {
        let creds = Self::credentials(req.account)?;
        let ref_id = param(req.params, "refid")?;
        if let Some(client_ref) = req.params.get("clientrefid")
            && client_ref != &req.tracking_number.to_string()
        {
            return Err(GatewayError::InvalidCallback("clientrefid mismatch".into()));
        }

        let resp = self
            .http
            .post(format!("{}/v2/pay/verify", self.base_url))
            .bearer_auth(&creds.access_token)
            .json(&json!({ "refId": ref_id, "amount": req.amount }))
            .send()
            .await?;
        check_server_error(&resp)?;
        let status = resp.status();
        if status.is_success() {
            return Ok(VerifyOutcome::success(ref_id, status.as_u16().to_string()));
        }
        let text = resp.text().await.unwrap_or_default();
        Ok(VerifyOutcome::failure(text, Some(status.as_u16().to_string())))
    }
}
