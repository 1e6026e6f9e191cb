//! ParbadVirtual: in-process test gateway
//!
//! `request` points the shopper at our own `/payment/virtual` landing page.
//! The page offers a "pay" and a "cancel" link back to the callback URL,
//! each carrying `result=success|failure` and an HMAC-SHA256 `sig` over
//! `{tracking_number}:{result}`, so a callback cannot be forged by editing
//! the query string.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use shared::models::{AccountConfig, GatewayKind};

use super::{
    GatewayAdapter, GatewayError, PaymentRedirect, PaymentRequest, VerifyOutcome, VerifyRequest,
    mismatch, param,
};

type HmacSha256 = Hmac<Sha256>;

pub const RESULT_SUCCESS: &str = "success";
pub const RESULT_FAILURE: &str = "failure";

#[derive(Clone)]
pub struct VirtualGateway {
    landing_url: String,
    /// Keyed once, cloned per signature
    keyed: HmacSha256,
}

impl VirtualGateway {
    pub fn new(landing_url: impl Into<String>, secret: &[u8]) -> Result<Self, GatewayError> {
        let keyed = HmacSha256::new_from_slice(secret)
            .map_err(|e| GatewayError::Misconfigured(format!("virtual gateway key: {e}")))?;
        Ok(Self {
            landing_url: landing_url.into(),
            keyed,
        })
    }

    fn mac(&self, tracking_number: i64, result: &str) -> HmacSha256 {
        let mut mac = self.keyed.clone();
        mac.update(format!("{tracking_number}:{result}").as_bytes());
        mac
    }

    pub fn sign(&self, tracking_number: i64, result: &str) -> String {
        hex::encode(self.mac(tracking_number, result).finalize().into_bytes())
    }

    fn check(&self, tracking_number: i64, result: &str, sig: &str) -> bool {
        let Ok(bytes) = hex::decode(sig) else {
            return false;
        };
        self.mac(tracking_number, result).verify_slice(&bytes).is_ok()
    }

    /// `(pay, cancel)` links for the landing page
    pub fn result_links(
        &self,
        callback_url: &str,
        tracking_number: i64,
    ) -> Result<(String, String), GatewayError> {
        let link = |result: &str| -> Result<String, GatewayError> {
            let mut url = reqwest::Url::parse(callback_url)
                .map_err(|e| GatewayError::InvalidCallback(format!("bad callback url: {e}")))?;
            url.query_pairs_mut()
                .append_pair("result", result)
                .append_pair("sig", &self.sign(tracking_number, result));
            Ok(url.into())
        };
        Ok((link(RESULT_SUCCESS)?, link(RESULT_FAILURE)?))
    }
}

#[async_trait]
impl GatewayAdapter for VirtualGateway {
    async fn request(&self, req: PaymentRequest<'_>) -> Result<PaymentRedirect, GatewayError> {
        if !matches!(req.account, AccountConfig::ParbadVirtual) {
            return Err(mismatch(GatewayKind::ParbadVirtual, req.account));
        }
        let url = reqwest::Url::parse_with_params(
            &self.landing_url,
            &[
                ("tracking_number", req.tracking_number.to_string()),
                ("amount", req.amount.to_string()),
                ("callback", req.callback_url.to_string()),
            ],
        )
        .map_err(|e| GatewayError::Misconfigured(format!("bad virtual gateway url: {e}")))?;
        Ok(PaymentRedirect {
            redirect_url: url.into(),
            provider_token: None,
        })
    }

    async fn verify(&self, req: VerifyRequest<'_>) -> Result<VerifyOutcome, GatewayError> {
        if !matches!(req.account, AccountConfig::ParbadVirtual) {
            return Err(mismatch(GatewayKind::ParbadVirtual, req.account));
        }
        let result = param(req.params, "result")?;
        let sig = param(req.params, "sig")?;
        if !self.check(req.tracking_number, result, sig) {
            return Err(GatewayError::InvalidCallback("bad signature".into()));
        }
        Ok(match result {
            RESULT_SUCCESS => VerifyOutcome::success(format!("virtual-{}", req.tracking_number), "0"),
            RESULT_FAILURE => VerifyOutcome::failure("cancelled by payer", Some("-1".into())),
            other => return Err(GatewayError::InvalidCallback(format!("unknown result {other}"))),
        })
    }
}
