//! Pay.ir
//!
//! request: `POST /pg/send` → `token`, shopper goes to `/pg/{token}`
//! callback: `status=1|0&token=…`
//! verify: `POST /pg/verify` → `status=1, transId, amount`

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use shared::models::{AccountConfig, ApiKeyCredentials, GatewayKind};

use super::{
    GatewayAdapter, GatewayError, PaymentRedirect, PaymentRequest, VerifyOutcome, VerifyRequest,
    check_server_error, mismatch, param,
};

const PRODUCTION_URL: &str = "https://pay.ir";

pub struct PayIrGateway {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PayIrResponse {
    status: Option<i64>,
    token: Option<String>,
    trans_id: Option<serde_json::Value>,
    amount: Option<serde_json::Value>,
    error_code: Option<serde_json::Value>,
    error_message: Option<String>,
}

impl PayIrGateway {
    pub fn new(http: reqwest::Client, base_url: Option<String>) -> Self {
        Self {
            http,
            base_url: base_url.unwrap_or_else(|| PRODUCTION_URL.into()),
        }
    }

    fn credentials(account: &AccountConfig) -> Result<&ApiKeyCredentials, GatewayError> {
        match account {
            AccountConfig::PayIr(c) => Ok(c),
            other => Err(mismatch(GatewayKind::PayIr, other)),
        }
    }

    /// Test accounts use the documented `test` api key
    fn api_key(creds: &ApiKeyCredentials) -> &str {
        if creds.is_test_account { "test" } else { &creds.api }
    }
}

fn value_string(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl GatewayAdapter for PayIrGateway {
    async fn request(&self, req: PaymentRequest<'_>) -> Result<PaymentRedirect, GatewayError> {
        let creds = Self::credentials(req.account)?;
        let resp = self
            .http
            .post(format!("{}/pg/send", self.base_url))
            .json(&json!({
                "api": Self::api_key(creds),
                "amount": req.amount,
                "redirect": req.callback_url,
                "factorNumber": req.tracking_number.to_string(),
            }))
            .send()
            .await?;
        check_server_error(&resp)?;
        let body: PayIrResponse = resp.json().await?;
        match (body.status, body.token) {
            (Some(1), Some(token)) => Ok(PaymentRedirect {
                redirect_url: format!("{}/pg/{token}", self.base_url),
                provider_token: Some(token),
            }),
            _ => Err(GatewayError::Unavailable(format!(
                "pay.ir refused payment ({}): {}",
                body.error_code.as_ref().map(value_string).unwrap_or_default(),
                body.error_message.unwrap_or_default()
            ))),
        }
    }

    async fn verify(&self, req: VerifyRequest<'_>) -> Result<VerifyOutcome, GatewayError> {
        let creds = Self::credentials(req.account)?;
        let token = param(req.params, "token")?;
        if req.provider_token.is_some_and(|t| t != token) {
            return Err(GatewayError::InvalidCallback("token mismatch".into()));
        }
        if param(req.params, "status")? != "1" {
            return Ok(VerifyOutcome::failure("cancelled by payer", Some("0".into())));
        }

        let resp = self
            .http
            .post(format!("{}/pg/verify", self.base_url))
            .json(&json!({ "api": Self::api_key(creds), "token": token }))
            .send()
            .await?;
        check_server_error(&resp)?;
        let body: PayIrResponse = resp.json().await?;

        let paid = body.amount.as_ref().map(value_string);
        Ok(match (body.status, body.trans_id) {
            (Some(1), Some(trans_id)) if paid.as_deref() == Some(&req.amount.to_string()) => {
                VerifyOutcome::success(value_string(&trans_id), "1")
            }
            (Some(1), Some(_)) => VerifyOutcome::failure("amount mismatch", Some("1".into())),
            _ => VerifyOutcome::failure(
                body.error_message.unwrap_or_else(|| "verify rejected".into()),
                body.error_code.as_ref().map(value_string),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::CallbackParams;
    use crate::gateway::test_support::serve;
    use axum::{Json, Router, routing::post};

    fn account() -> AccountConfig {
        AccountConfig::PayIr(ApiKeyCredentials {
            api: "real-key".into(),
            is_test_account: true,
        })
    }

    #[tokio::test]
    async fn test_accounts_send_the_test_key() {
        let app = Router::new()
            .route(
                "/pg/send",
                post(|Json(body): Json<serde_json::Value>| async move {
                    assert_eq!(body["api"], "test");
                    Json(json!({"status": 1, "token": "tok-1"}))
                }),
            )
            .route(
                "/pg/verify",
                post(|| async { Json(json!({"status": 1, "amount": "2500", "transId": 99})) }),
            );
        let base = serve(app).await;
        let gw = PayIrGateway::new(reqwest::Client::new(), Some(base.clone()));
        let acc = account();

        let redirect = gw
            .request(PaymentRequest {
                amount: 2500,
                tracking_number: 5,
                account: &acc,
                callback_url: "http://cb",
                client_ip: "127.0.0.1",
            })
            .await
            .unwrap();
        assert_eq!(redirect.redirect_url, format!("{base}/pg/tok-1"));

        let params: CallbackParams = [("status", "1"), ("token", "tok-1")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let ok = gw
            .verify(VerifyRequest {
                amount: 2500,
                tracking_number: 5,
                provider_token: Some("tok-1"),
                account: &acc,
                params: &params,
            })
            .await
            .unwrap();
        assert!(ok.success);
        assert_eq!(ok.transaction_code.as_deref(), Some("99"));

        // provider confirms a different amount
        let short = gw
            .verify(VerifyRequest {
                amount: 9999,
                tracking_number: 5,
                provider_token: Some("tok-1"),
                account: &acc,
                params: &params,
            })
            .await
            .unwrap();
        assert!(!short.success);
    }
}
