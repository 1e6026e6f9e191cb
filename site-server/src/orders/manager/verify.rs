//! Callback side of the lifecycle

use reqwest::Url;
use serde::Serialize;
use shared::error::ErrorCode;
use shared::message::{CommittedItem, OrderCommitted, OrderEvent, OrderFailed, OrderNeedsReconciliation};
use shared::models::{CallVerifyUrl, Order, OrderStatus, Payment, PaymentStatus, VerifyRecord};

use super::{LifecycleError, LifecycleResult, OrderManager};
use crate::audit_log;
use crate::cache::invalidate_logged;
use crate::db::{CommitOutcome, RepoError};
use crate::events::publish_event;
use crate::gateway::{CallbackParams, VerifyRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyStatus {
    Success,
    Failed,
    /// Money taken but the order could not be committed
    NeedsReconciliation,
}

/// Outcome of one callback delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyResult {
    pub tracking_number: i64,
    pub flow: CallVerifyUrl,
    pub status: VerifyStatus,
    pub return_url: String,
}

impl VerifyResult {
    pub(super) fn new(payment: &Payment, status: VerifyStatus) -> Self {
        Self {
            tracking_number: payment.tracking_number,
            flow: payment.call_verify_url,
            status,
            return_url: payment.return_url.clone(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == VerifyStatus::Success
    }

    /// `return_url?success=…&tracking_number=…[&status=needs_reconciliation]`
    pub fn redirect_url(&self) -> String {
        let success = if self.is_success() { "true" } else { "false" };
        let tracking = self.tracking_number.to_string();
        let mut pairs = vec![("success", success), ("tracking_number", tracking.as_str())];
        if self.status == VerifyStatus::NeedsReconciliation {
            pairs.push(("status", "needs_reconciliation"));
        }

        match Url::parse(&self.return_url) {
            Ok(mut url) => {
                url.query_pairs_mut().extend_pairs(pairs);
                url.into()
            }
            Err(_) => {
                let sep = if self.return_url.contains('?') { '&' } else { '?' };
                let query: Vec<String> = pairs.iter().map(|(k, v)| format!("{k}={v}")).collect();
                format!("{}{sep}{}", self.return_url, query.join("&"))
            }
        }
    }
}

impl OrderManager {
    /// Resume the flow named by `flow` for the payment in `params`.
    ///
    /// Safe to call any number of times per tracking number: only the first
    /// delivery that finds the payment pending changes anything.
    pub async fn verify_payment(
        &self,
        flow: CallVerifyUrl,
        params: &CallbackParams,
    ) -> LifecycleResult<VerifyResult> {
        let tracking_number: i64 = params
            .get("tracking_number")
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| LifecycleError::InvalidCallback("missing tracking_number".into()))?;

        let payment = match self.payments.get_payment_by_tracking(tracking_number).await {
            Ok(p) => p,
            Err(RepoError::NotFound(_)) => {
                crate::security_log!(WARN, "unknown_tracking_number", tracking_number);
                return Err(RepoError::NotFound(ErrorCode::PaymentNotFound).into());
            }
            Err(e) => return Err(e.into()),
        };
        if payment.call_verify_url != flow {
            return Err(LifecycleError::InvalidCallback(format!(
                "payment {tracking_number} resumes {}, not {}",
                payment.call_verify_url.as_str(),
                flow.as_str()
            )));
        }
        if payment.status != PaymentStatus::Pending {
            tracing::info!(tracking_number, status = payment.status.as_str(), "Duplicate callback");
            return self.prior_result(&payment).await;
        }

        let account = self.resolve_account(payment.site_id, payment.gateway).await?;
        // 网关不可达时保持 Pending，等待网关重试或超时清理
        let outcome = self
            .gateway
            .verify(VerifyRequest {
                amount: payment.amount,
                tracking_number,
                provider_token: payment.provider_token.as_deref(),
                account: &account,
                params,
            })
            .await?;
        let record = outcome.record();

        if !outcome.success {
            let reason = outcome
                .message
                .clone()
                .unwrap_or_else(|| "payment not verified".to_string());
            return self.fail(&payment, &record, &reason).await;
        }

        match flow {
            CallVerifyUrl::CreateOrderVerify => self.commit_order(&payment, &record).await,
            CallVerifyUrl::ChargeCreditVerify => self.commit_credit(&payment, &record).await,
            CallVerifyUrl::UpgradePlanVerify => self.commit_plan(&payment, &record).await,
        }
    }

    /// What an earlier delivery decided
    async fn prior_result(&self, payment: &Payment) -> LifecycleResult<VerifyResult> {
        let status = match payment.status {
            PaymentStatus::Active => match payment.order_id {
                Some(order_id) => {
                    let order = self.orders.get_order(order_id).await?;
                    if order.status == OrderStatus::NeedsReconciliation {
                        VerifyStatus::NeedsReconciliation
                    } else {
                        VerifyStatus::Success
                    }
                }
                None => VerifyStatus::Success,
            },
            PaymentStatus::Pending | PaymentStatus::Inactive => VerifyStatus::Failed,
        };
        Ok(VerifyResult::new(payment, status))
    }

    /// Re-read the payment after losing a claim race
    pub(super) async fn lost_race(&self, tracking_number: i64) -> LifecycleResult<VerifyResult> {
        let payment = self.payments.get_payment_by_tracking(tracking_number).await?;
        tracing::info!(tracking_number, status = payment.status.as_str(), "Payment resolved concurrently");
        self.prior_result(&payment).await
    }

    async fn fail(
        &self,
        payment: &Payment,
        record: &VerifyRecord,
        reason: &str,
    ) -> LifecycleResult<VerifyResult> {
        let tracking_number = payment.tracking_number;
        let Some(failed) = self
            .orders
            .fail_payment(tracking_number, record, reason)
            .await?
        else {
            return self.lost_race(tracking_number).await;
        };
        tracing::info!(
            tracking_number,
            order_id = ?failed.order_id,
            reason = %reason,
            "Payment failed"
        );
        if let Some(order_id) = failed.order_id {
            publish_event(
                self.events.as_ref(),
                OrderEvent::OrderFailed(OrderFailed {
                    order_id,
                    site_id: failed.site_id,
                    reason: reason.to_string(),
                }),
            )
            .await;
        }
        Ok(VerifyResult::new(&failed, VerifyStatus::Failed))
    }

    async fn commit_order(
        &self,
        payment: &Payment,
        record: &VerifyRecord,
    ) -> LifecycleResult<VerifyResult> {
        let tracking_number = payment.tracking_number;
        match self.orders.commit_paid_order(tracking_number, record).await {
            Ok(CommitOutcome::Committed { order, payment }) => {
                tracing::info!(
                    order_id = order.id,
                    tracking_number,
                    total = order.total_final_price,
                    "Order committed"
                );
                let variants: Vec<i64> = order.items.iter().map(|i| i.product_variant_id).collect();
                invalidate_logged(self.stock_cache.as_ref(), &variants).await;
                publish_event(self.events.as_ref(), committed_event(&order)).await;
                Ok(VerifyResult::new(&payment, VerifyStatus::Success))
            }
            Ok(CommitOutcome::AlreadyResolved(payment)) => self.prior_result(&payment).await,
            Err(RepoError::Conflict(code)) => self.reconcile(payment, record, code).await,
            Err(e) => {
                tracing::error!(tracking_number, error = %e, "Order commit failed; payment left pending");
                Err(e.into())
            }
        }
    }

    /// Paid but uncommittable: keep the money, park the order for a human
    async fn reconcile(
        &self,
        payment: &Payment,
        record: &VerifyRecord,
        code: ErrorCode,
    ) -> LifecycleResult<VerifyResult> {
        let tracking_number = payment.tracking_number;
        let reason = code.message();
        let Some((order, payment)) = self
            .orders
            .reconcile_payment(tracking_number, record, reason)
            .await?
        else {
            return self.lost_race(tracking_number).await;
        };

        audit_log!(
            format!("payment:{tracking_number}").as_str(),
            "needs_reconciliation",
            format!("order {} paid {} but commit failed: {reason}", order.id, payment.amount)
                .as_str()
        );
        publish_event(
            self.events.as_ref(),
            OrderEvent::OrderNeedsReconciliation(OrderNeedsReconciliation {
                order_id: order.id,
                site_id: order.site_id,
                payment_tracking: tracking_number,
                reason: reason.to_string(),
            }),
        )
        .await;
        Ok(VerifyResult::new(&payment, VerifyStatus::NeedsReconciliation))
    }
}

fn committed_event(order: &Order) -> OrderEvent {
    OrderEvent::OrderCommitted(OrderCommitted {
        order_id: order.id,
        site_id: order.site_id,
        customer_id: order.customer_id,
        total: order.total_final_price,
        items: order
            .items
            .iter()
            .map(|i| CommittedItem {
                product_id: i.product_id,
                product_variant_id: i.product_variant_id,
                quantity: i.quantity,
                final_price_with_coupon_discount: i.final_price_with_coupon_discount,
            })
            .collect(),
    })
}
