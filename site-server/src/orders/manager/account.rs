//! User payments: credit top-up and plan upgrade
//!
//! Both open a payment with no order. The envelope keys are read back by the
//! callback, so they are part of the stored format.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use shared::models::{
    CallVerifyUrl, CreditGrant, CreditKind, GatewayKind, OrderData, Payment, UserType, VerifyRecord,
};
use shared::util::{DAY_MILLIS, now_millis};
use validator::Validate;

use super::verify::{VerifyResult, VerifyStatus};
use super::{LifecycleError, LifecycleResult, NewPayment, OrderManager, PaymentRedirectView};

const KEY_USER_ID: &str = "UserId";
const KEY_PLAN_ID: &str = "PlanId";
const KEY_DURATION_DAYS: &str = "DurationDays";

fn unit_name_key(kind: CreditKind) -> String {
    format!("{}_UnitPriceName", kind.as_str())
}

fn unit_count_key(kind: CreditKind) -> String {
    format!("{}_UnitPriceCount", kind.as_str())
}

fn unit_day_key(kind: CreditKind) -> String {
    format!("{}_UnitPriceDay", kind.as_str())
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreditItem {
    pub credit: CreditKind,
    #[validate(range(min = 1, max = 1_000_000))]
    pub count: i64,
    /// Required for storage credits
    #[validate(range(min = 1, max = 3650))]
    pub days: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreditChargeRequest {
    pub site_id: i64,
    pub gateway: GatewayKind,
    #[validate(length(min = 1), nested)]
    pub items: Vec<CreditItem>,
    #[validate(url)]
    pub return_url: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PlanUpgradeRequest {
    pub site_id: i64,
    pub gateway: GatewayKind,
    pub plan_id: i64,
    #[validate(url)]
    pub return_url: String,
}

impl OrderManager {
    /// Price a credit top-up from the unit price table and open its payment
    pub async fn request_credit_charge(
        &self,
        user_id: i64,
        req: &CreditChargeRequest,
        client_ip: &str,
    ) -> LifecycleResult<PaymentRedirectView> {
        req.validate()
            .map_err(|e| LifecycleError::Invalid(e.to_string()))?;

        let prices: HashMap<CreditKind, i64> = self
            .accounts
            .unit_prices()
            .await?
            .into_iter()
            .map(|p| (p.name, p.price))
            .collect();

        let mut seen = HashSet::new();
        let mut amount: i64 = 0;
        let mut order_data = OrderData::new();
        for item in &req.items {
            if !seen.insert(item.credit) {
                return Err(LifecycleError::Invalid(format!(
                    "{} listed twice",
                    item.credit.as_str()
                )));
            }
            let unit = *prices
                .get(&item.credit)
                .ok_or(LifecycleError::UnitPriceNotFound(item.credit))?;

            let mut line = i128::from(unit) * i128::from(item.count);
            if item.credit.is_time_bound() {
                let days = item.days.ok_or_else(|| {
                    LifecycleError::Invalid(format!("{} requires days", item.credit.as_str()))
                })?;
                line *= i128::from(days);
                order_data.insert(unit_day_key(item.credit), days.to_string());
            }
            amount = i64::try_from(i128::from(amount) + line)
                .map_err(|_| LifecycleError::Invalid("amount out of range".into()))?;
            order_data.insert(unit_name_key(item.credit), item.credit.as_str().to_string());
            order_data.insert(unit_count_key(item.credit), item.count.to_string());
        }
        order_data.insert(KEY_USER_ID.to_string(), user_id.to_string());

        self.open_user_payment(
            user_id,
            req.site_id,
            req.gateway,
            CallVerifyUrl::ChargeCreditVerify,
            amount,
            order_data,
            client_ip,
            &req.return_url,
        )
        .await
    }

    /// Open the payment for moving a user onto `plan_id`
    pub async fn request_plan_upgrade(
        &self,
        user_id: i64,
        req: &PlanUpgradeRequest,
        client_ip: &str,
    ) -> LifecycleResult<PaymentRedirectView> {
        req.validate()
            .map_err(|e| LifecycleError::Invalid(e.to_string()))?;
        let plan = self.accounts.get_plan(req.plan_id).await?;

        let order_data = OrderData::from([
            (KEY_USER_ID.to_string(), user_id.to_string()),
            (KEY_PLAN_ID.to_string(), plan.id.to_string()),
            (KEY_DURATION_DAYS.to_string(), plan.duration_days.to_string()),
        ]);
        self.open_user_payment(
            user_id,
            req.site_id,
            req.gateway,
            CallVerifyUrl::UpgradePlanVerify,
            plan.final_price(),
            order_data,
            client_ip,
            &req.return_url,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn open_user_payment(
        &self,
        user_id: i64,
        site_id: i64,
        gateway: GatewayKind,
        flow: CallVerifyUrl,
        amount: i64,
        order_data: OrderData,
        client_ip: &str,
        return_url: &str,
    ) -> LifecycleResult<PaymentRedirectView> {
        let account = self.resolve_account(site_id, gateway).await?;
        let payment = NewPayment {
            site_id,
            flow,
            user_type: UserType::User,
            user_id: Some(user_id),
            customer_id: None,
            gateway,
            amount,
            order_data,
            client_ip: client_ip.to_string(),
            return_url: return_url.to_string(),
        }
        .into_payment(now_millis());

        let payment = self.payments.create_payment(&payment).await?;
        tracing::info!(
            user_id,
            tracking_number = payment.tracking_number,
            flow = flow.as_str(),
            amount,
            "User payment created"
        );

        let redirect = self.open_at_gateway(&payment, &account).await?;
        self.payments
            .set_provider_token(payment.tracking_number, redirect.provider_token.as_deref())
            .await?;
        Ok(PaymentRedirectView {
            redirect_url: redirect.redirect_url,
            tracking_number: payment.tracking_number,
            order_id: None,
        })
    }

    pub(super) async fn commit_credit(
        &self,
        payment: &Payment,
        record: &VerifyRecord,
    ) -> LifecycleResult<VerifyResult> {
        let tracking_number = payment.tracking_number;
        let (user_id, grants) = credit_grants(&payment.order_data, now_millis())
            .map_err(|reason| LifecycleError::CorruptEnvelope {
                tracking_number,
                reason,
            })?;

        match self
            .accounts
            .apply_credit_payment(tracking_number, record, user_id, &grants)
            .await?
        {
            Some(paid) => {
                tracing::info!(user_id, tracking_number, grants = grants.len(), "Credits charged");
                Ok(VerifyResult::new(&paid, VerifyStatus::Success))
            }
            None => self.lost_race(tracking_number).await,
        }
    }

    pub(super) async fn commit_plan(
        &self,
        payment: &Payment,
        record: &VerifyRecord,
    ) -> LifecycleResult<VerifyResult> {
        let tracking_number = payment.tracking_number;
        let corrupt = |reason: String| LifecycleError::CorruptEnvelope {
            tracking_number,
            reason,
        };
        let user_id = envelope_i64(&payment.order_data, KEY_USER_ID).map_err(corrupt)?;
        let plan_id = envelope_i64(&payment.order_data, KEY_PLAN_ID).map_err(corrupt)?;
        let days = envelope_i64(&payment.order_data, KEY_DURATION_DAYS).map_err(corrupt)?;

        let plan = self.accounts.get_plan(plan_id).await?;
        let expires_at = now_millis().saturating_add(days.saturating_mul(DAY_MILLIS));
        match self
            .accounts
            .apply_plan_payment(tracking_number, record, user_id, &plan, expires_at)
            .await?
        {
            Some(paid) => {
                tracing::info!(user_id, plan_id, tracking_number, "Plan upgraded");
                Ok(VerifyResult::new(&paid, VerifyStatus::Success))
            }
            None => self.lost_race(tracking_number).await,
        }
    }
}

fn envelope_i64(data: &OrderData, key: &str) -> Result<i64, String> {
    data.get(key)
        .ok_or_else(|| format!("missing {key}"))?
        .parse()
        .map_err(|_| format!("{key} is not a number"))
}

/// Grants recorded in a credit envelope; storage credits expire `days` after `now`
fn credit_grants(data: &OrderData, now: i64) -> Result<(i64, Vec<CreditGrant>), String> {
    let user_id = envelope_i64(data, KEY_USER_ID)?;
    let mut grants = Vec::new();
    for kind in CreditKind::ALL {
        if !data.contains_key(&unit_name_key(kind)) {
            continue;
        }
        let count = envelope_i64(data, &unit_count_key(kind))?;
        let expire_at = if kind.is_time_bound() {
            let days = envelope_i64(data, &unit_day_key(kind))?;
            Some(now.saturating_add(days.saturating_mul(DAY_MILLIS)))
        } else {
            None
        };
        grants.push(CreditGrant {
            kind,
            count,
            expire_at,
        });
    }
    if grants.is_empty() {
        return Err("no credits in envelope".into());
    }
    Ok((user_id, grants))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_grants_follow_the_stored_keys() {
        let data = OrderData::from([
            ("UserId".to_string(), "9".to_string()),
            ("SmsCredits_UnitPriceName".to_string(), "SmsCredits".to_string()),
            ("SmsCredits_UnitPriceCount".to_string(), "100".to_string()),
            ("StorageMbCredits_UnitPriceName".to_string(), "StorageMbCredits".to_string()),
            ("StorageMbCredits_UnitPriceCount".to_string(), "512".to_string()),
            ("StorageMbCredits_UnitPriceDay".to_string(), "30".to_string()),
        ]);
        let (user, grants) = credit_grants(&data, 1_000).unwrap();
        assert_eq!(user, 9);
        assert_eq!(grants.len(), 2);
        assert_eq!(grants[0].kind, CreditKind::SmsCredits);
        assert_eq!(grants[0].expire_at, None);
        assert_eq!(grants[1].count, 512);
        assert_eq!(grants[1].expire_at, Some(1_000 + 30 * DAY_MILLIS));
    }

    #[test]
    fn storage_without_days_is_corrupt() {
        let data = OrderData::from([
            ("UserId".to_string(), "9".to_string()),
            ("StorageMbCredits_UnitPriceName".to_string(), "StorageMbCredits".to_string()),
            ("StorageMbCredits_UnitPriceCount".to_string(), "1".to_string()),
        ]);
        assert!(credit_grants(&data, 0).unwrap_err().contains("UnitPriceDay"));
    }

    #[test]
    fn empty_envelope_is_corrupt() {
        let data = OrderData::from([("UserId".to_string(), "9".to_string())]);
        assert!(credit_grants(&data, 0).is_err());
    }
}
