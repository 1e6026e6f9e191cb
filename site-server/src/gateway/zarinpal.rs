//! ZarinPal (REST v4)
//!
//! request: `POST /pg/v4/payment/request.json` → `data.authority`, shopper goes to `/pg/StartPay/{authority}`
//! callback: `?Authority=…&Status=OK|NOK`
//! verify: `POST /pg/v4/payment/verify.json` → `data.code` 100 (verified) or 101 (verified before)

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use shared::models::{AccountConfig, GatewayKind, ZarinPalCredentials};

use super::{
    GatewayAdapter, GatewayError, PaymentRedirect, PaymentRequest, VerifyOutcome, VerifyRequest,
    check_server_error, mismatch, param,
};

const PRODUCTION_URL: &str = "https://payment.zarinpal.com";
const SANDBOX_URL: &str = "https://sandbox.zarinpal.com";

pub struct ZarinPalGateway {
    http: reqwest::Client,
    base_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ZarinPalData {
    code: Option<i64>,
    authority: Option<String>,
    ref_id: Option<i64>,
    message: Option<String>,
}

/// `data` is an object on success and `[]` on error; `errors` the other way round
#[derive(Debug, Deserialize)]
struct ZarinPalResponse {
    #[serde(default)]
    data: serde_json::Value,
    #[serde(default)]
    errors: serde_json::Value,
}

impl ZarinPalResponse {
    fn data(&self) -> Option<ZarinPalData> {
        serde_json::from_value(self.data.clone()).ok()
    }

    fn error(&self) -> (Option<String>, String) {
        let code = self.errors.get("code").and_then(|c| c.as_i64()).map(|c| c.to_string());
        let message = self
            .errors
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error")
            .to_string();
        (code, message)
    }
}

impl ZarinPalGateway {
    pub fn new(http: reqwest::Client, base_url: Option<String>) -> Self {
        Self { http, base_url }
    }

    fn base(&self, creds: &ZarinPalCredentials) -> &str {
        match &self.base_url {
            Some(url) => url,
            None if creds.is_sandbox => SANDBOX_URL,
            None => PRODUCTION_URL,
        }
    }

    fn credentials(account: &AccountConfig) -> Result<&ZarinPalCredentials, GatewayError> {
        match account {
            AccountConfig::ZarinPal(c) => Ok(c),
            other => Err(mismatch(GatewayKind::ZarinPal, other)),
        }
    }

    fn post(&self, creds: &ZarinPalCredentials, url: String) -> reqwest::RequestBuilder {
        let builder = self.http.post(url).header("Accept", "application/json");
        match &creds.authorization_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[async_trait]
impl GatewayAdapter for ZarinPalGateway {
    async fn request(&self, req: PaymentRequest<'_>) -> Result<PaymentRedirect, GatewayError> {
        let creds = Self::credentials(req.account)?;
        let base = self.base(creds);
        let resp = self
            .post(creds, format!("{base}/pg/v4/payment/request.json"))
            .json(&json!({
                "merchant_id": creds.merchant_id,
                "amount": req.amount,
                "callback_url": req.callback_url,
                "description": format!("payment {}", req.tracking_number),
                "metadata": { "order_id": req.tracking_number.to_string() },
            }))
            .send()
            .await?;
        check_server_error(&resp)?;
        let body: ZarinPalResponse = resp.json().await?;

        match body.data() {
            Some(ZarinPalData {
                code: Some(100),
                authority: Some(authority),
                ..
            }) => Ok(PaymentRedirect {
                redirect_url: format!("{base}/pg/StartPay/{authority}"),
                provider_token: Some(authority),
            }),
            _ => {
                let (code, message) = body.error();
                Err(GatewayError::Unavailable(format!(
                    "zarinpal refused payment ({}): {message}",
                    code.unwrap_or_default()
                )))
            }
        }
    }

    async fn verify(&self, req: VerifyRequest<'_>) -> Result<VerifyOutcome, GatewayError> {
        let creds = Self::credentials(req.account)?;
        let authority = param(req.params, "Authority")?;
        if req.provider_token.is_some_and(|t| t != authority) {
            return Err(GatewayError::InvalidCallback("authority mismatch".into()));
        }
        if param(req.params, "Status")? != "OK" {
            return Ok(VerifyOutcome::failure("cancelled by payer", Some("NOK".into())));
        }

        let base = self.base(creds);
        let resp = self
            .post(creds, format!("{base}/pg/v4/payment/verify.json"))
            .json(&json!({
                "merchant_id": creds.merchant_id,
                "amount": req.amount,
                "authority": authority,
            }))
            .send()
            .await?;
        check_server_error(&resp)?;
        let body: ZarinPalResponse = resp.json().await?;

        Ok(match body.data() {
            Some(ZarinPalData {
                code: Some(code @ (100 | 101)),
                ref_id: Some(ref_id),
                ..
            }) => VerifyOutcome::success(ref_id.to_string(), code.to_string()),
            Some(ZarinPalData {
                code: Some(code),
                message,
                ..
            }) => VerifyOutcome::failure(
                message.unwrap_or_else(|| "verify rejected".into()),
                Some(code.to_string()),
            ),
            _ => {
                let (code, message) = body.error();
                VerifyOutcome::failure(message, code)
            }
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
        AccountConfig::ZarinPal(ZarinPalCredentials {
            merchant_id: "m-1".into(),
            authorization_token: None,
            is_sandbox: true,
        })
    }

    async fn fake_provider() -> String {
        let app = Router::new()
            .route(
                "/pg/v4/payment/request.json",
                post(|Json(body): Json<serde_json::Value>| async move {
                    if body["amount"].as_i64() == Some(0) {
                        return Json(json!({"data": [], "errors": {"code": -9, "message": "bad amount"}}));
                    }
                    Json(json!({"data": {"code": 100, "authority": "A0001"}, "errors": []}))
                }),
            )
            .route(
                "/pg/v4/payment/verify.json",
                post(|Json(body): Json<serde_json::Value>| async move {
                    if body["amount"].as_i64() == Some(1000) {
                        Json(json!({"data": {"code": 100, "ref_id": 777}, "errors": []}))
                    } else {
                        Json(json!({"data": [], "errors": {"code": -50, "message": "amount mismatch"}}))
                    }
                }),
            );
        serve(app).await
    }

    #[tokio::test]
    async fn request_then_verify() {
        let gw = ZarinPalGateway::new(reqwest::Client::new(), Some(fake_provider().await));
        let acc = account();
        let redirect = gw
            .request(PaymentRequest {
                amount: 1000,
                tracking_number: 42,
                account: &acc,
                callback_url: "http://cb",
                client_ip: "127.0.0.1",
            })
            .await
            .unwrap();
        assert!(redirect.redirect_url.ends_with("/pg/StartPay/A0001"));
        assert_eq!(redirect.provider_token.as_deref(), Some("A0001"));

        let params: CallbackParams = [("Authority", "A0001"), ("Status", "OK")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let ok = gw
            .verify(VerifyRequest {
                amount: 1000,
                tracking_number: 42,
                provider_token: Some("A0001"),
                account: &acc,
                params: &params,
            })
            .await
            .unwrap();
        assert!(ok.success);
        assert_eq!(ok.transaction_code.as_deref(), Some("777"));

        let bad = gw
            .verify(VerifyRequest {
                amount: 999,
                tracking_number: 42,
                provider_token: Some("A0001"),
                account: &acc,
                params: &params,
            })
            .await
            .unwrap();
        assert!(!bad.success);
        assert_eq!(bad.response_code.as_deref(), Some("-50"));
    }

    #[tokio::test]
    async fn refused_request_is_unavailable() {
        let gw = ZarinPalGateway::new(reqwest::Client::new(), Some(fake_provider().await));
        let acc = account();
        let err = gw
            .request(PaymentRequest {
                amount: 0,
                tracking_number: 1,
                account: &acc,
                callback_url: "http://cb",
                client_ip: "127.0.0.1",
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable(m) if m.contains("bad amount")));
    }

    #[tokio::test]
    async fn nok_status_fails_without_calling_provider() {
        let gw = ZarinPalGateway::new(reqwest::Client::new(), Some("http://127.0.0.1:9".into()));
        let acc = account();
        let params: CallbackParams = [("Authority", "A1"), ("Status", "NOK")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let out = gw
            .verify(VerifyRequest {
                amount: 1,
                tracking_number: 1,
                provider_token: Some("A1"),
                account: &acc,
                params: &params,
            })
            .await
            .unwrap();
        assert!(!out.success);
    }

    #[tokio::test]
    async fn wrong_account_kind_is_misconfigured() {
        let gw = ZarinPalGateway::new(reqwest::Client::new(), None);
        let err = gw
            .request(PaymentRequest {
                amount: 1,
                tracking_number: 1,
                account: &AccountConfig::ParbadVirtual,
                callback_url: "http://cb",
                client_ip: "127.0.0.1",
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Misconfigured(_)));
    }
}
