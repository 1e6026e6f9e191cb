use super::*;

use shared::models::{CreditKind, Plan, UnitPrice, UserAccount};
use shared::util::DAY_MILLIS;

const USER: i64 = 7;

fn seed_account(h: &Harness) {
    h.store.put_user(UserAccount::new(USER));
    for (id, kind, price) in [
        (1, CreditKind::SmsCredits, 50),
        (2, CreditKind::AiCredits, 200),
        (3, CreditKind::StorageMbCredits, 3),
    ] {
        h.store.put_unit_price(UnitPrice {
            id,
            name: kind,
            price,
        });
    }
    h.store.put_plan(Plan {
        id: 4,
        name: "pro".into(),
        price: 1_000_000,
        duration_days: 30,
        sms_credits: 500,
        email_credits: 1_000,
        ai_credits: 50,
        ai_image_credits: 10,
        storage_mb_credits: 2_048,
        discount: Some(10),
        discount_type: Some(shared::models::DiscountType::Percentage),
    });
}

fn credit_request(items: Vec<CreditItem>) -> CreditChargeRequest {
    CreditChargeRequest {
        site_id: SITE,
        gateway: GatewayKind::ZarinPal,
        items,
        return_url: "https://panel.test/credits".into(),
    }
}

fn item(credit: CreditKind, count: i64, days: Option<i64>) -> CreditItem {
    CreditItem {
        credit,
        count,
        days,
    }
}

async fn verify_flow(h: &Harness, flow: CallVerifyUrl, tracking_number: i64) -> VerifyResult {
    h.manager
        .verify_payment(flow, &callback(tracking_number))
        .await
        .unwrap()
}

// ========================================================================
// 充值
// ========================================================================

#[tokio::test]
async fn test_credit_charge_prices_and_grants_once() {
    let h = harness().await;
    seed_account(&h);

    let req = credit_request(vec![
        item(CreditKind::SmsCredits, 100, None),
        item(CreditKind::StorageMbCredits, 512, Some(30)),
    ]);
    let redirect = h
        .manager
        .request_credit_charge(USER, &req, "10.0.0.2")
        .await
        .unwrap();
    assert_eq!(redirect.order_id, None);

    let payment = h
        .store
        .get_payment_by_tracking(redirect.tracking_number)
        .await
        .unwrap();
    // 50*100 + 3*512*30
    assert_eq!(payment.amount, 5_000 + 46_080);
    assert_eq!(payment.user_type, UserType::User);
    assert_eq!(payment.call_verify_url, CallVerifyUrl::ChargeCreditVerify);
    assert_eq!(payment.order_data["UserId"], USER.to_string());
    assert_eq!(payment.order_data["StorageMbCredits_UnitPriceDay"], "30");
    assert_eq!(payment.provider_token, Some(format!("A{}", redirect.tracking_number)));

    let before = now_millis();
    let result = verify_flow(&h, CallVerifyUrl::ChargeCreditVerify, redirect.tracking_number).await;
    assert!(result.is_success());
    assert!(result.redirect_url().starts_with("https://panel.test/credits?"));

    let user = h.store.get_user(USER).await.unwrap();
    assert_eq!(user.sms_credits, 100);
    assert_eq!(user.storage_mb_credits, 512);
    let expires = user.storage_mb_credits_expire_at.unwrap();
    assert!(expires >= before + 30 * DAY_MILLIS);

    // 重复回调不重复发放
    let again = verify_flow(&h, CallVerifyUrl::ChargeCreditVerify, redirect.tracking_number).await;
    assert_eq!(again, result);
    assert_eq!(h.store.get_user(USER).await.unwrap().sms_credits, 100);
    assert_eq!(h.gateway.verify_calls(), 1);
}

#[tokio::test]
async fn test_credit_charge_rejections() {
    let h = harness().await;
    seed_account(&h);

    // 没有单价
    let err = h
        .manager
        .request_credit_charge(USER, &credit_request(vec![item(CreditKind::EmailCredits, 1, None)]), "ip")
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::UnitPriceNotFound(CreditKind::EmailCredits)));
    assert_eq!(app_code(err), ErrorCode::UnitPriceNotFound);

    // 存储必须有天数
    let err = h
        .manager
        .request_credit_charge(
            USER,
            &credit_request(vec![item(CreditKind::StorageMbCredits, 10, None)]),
            "ip",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Invalid(_)));

    // 同一种额度不能出现两次
    let err = h
        .manager
        .request_credit_charge(
            USER,
            &credit_request(vec![
                item(CreditKind::SmsCredits, 1, None),
                item(CreditKind::SmsCredits, 2, None),
            ]),
            "ip",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Invalid(_)));

    let err = h
        .manager
        .request_credit_charge(USER, &credit_request(vec![]), "ip")
        .await
        .unwrap_err();
    assert_eq!(app_code(err), ErrorCode::ValidationFailed);
    assert_eq!(h.gateway.requests.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_declined_credit_charge_grants_nothing() {
    let h = harness().await;
    seed_account(&h);
    let redirect = h
        .manager
        .request_credit_charge(USER, &credit_request(vec![item(CreditKind::AiCredits, 5, None)]), "ip")
        .await
        .unwrap();
    h.gateway.script_verify(VerifyScript::Declined);

    let result = verify_flow(&h, CallVerifyUrl::ChargeCreditVerify, redirect.tracking_number).await;
    assert_eq!(result.status, VerifyStatus::Failed);
    assert_eq!(h.store.get_user(USER).await.unwrap().ai_credits, 0);
    let payment = h
        .store
        .get_payment_by_tracking(redirect.tracking_number)
        .await
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Inactive);
}

// ========================================================================
// 套餐
// ========================================================================

#[tokio::test]
async fn test_plan_upgrade_moves_user_onto_plan() {
    let h = harness().await;
    seed_account(&h);

    let req = PlanUpgradeRequest {
        site_id: SITE,
        gateway: GatewayKind::ZarinPal,
        plan_id: 4,
        return_url: "https://panel.test/plans".into(),
    };
    let redirect = h
        .manager
        .request_plan_upgrade(USER, &req, "ip")
        .await
        .unwrap();
    let payment = h
        .store
        .get_payment_by_tracking(redirect.tracking_number)
        .await
        .unwrap();
    assert_eq!(payment.amount, 900_000);
    assert_eq!(payment.order_data["PlanId"], "4");
    assert_eq!(payment.order_data["DurationDays"], "30");

    let before = now_millis();
    let result = verify_flow(&h, CallVerifyUrl::UpgradePlanVerify, redirect.tracking_number).await;
    assert!(result.is_success());

    let user = h.store.get_user(USER).await.unwrap();
    assert_eq!(user.plan_id, Some(4));
    assert!(user.plan_expired_at.unwrap() >= before + 30 * DAY_MILLIS);
    assert_eq!(user.sms_credits, 500);
    assert_eq!(user.ai_image_credits, 10);
    // 第一次开通套餐带上存储额度
    assert_eq!(user.storage_mb_credits, 2_048);
}

#[tokio::test]
async fn test_declined_plan_leaves_user_unchanged() {
    let h = harness().await;
    seed_account(&h);
    let req = PlanUpgradeRequest {
        site_id: SITE,
        gateway: GatewayKind::ZarinPal,
        plan_id: 4,
        return_url: "https://panel.test/plans".into(),
    };
    let redirect = h.manager.request_plan_upgrade(USER, &req, "ip").await.unwrap();
    h.gateway.script_verify(VerifyScript::Declined);

    let result = verify_flow(&h, CallVerifyUrl::UpgradePlanVerify, redirect.tracking_number).await;
    assert_eq!(result.status, VerifyStatus::Failed);
    assert_eq!(h.store.get_user(USER).await.unwrap(), UserAccount::new(USER));
}

#[tokio::test]
async fn test_unknown_plan_is_not_found() {
    let h = harness().await;
    seed_account(&h);
    let req = PlanUpgradeRequest {
        site_id: SITE,
        gateway: GatewayKind::ZarinPal,
        plan_id: 99,
        return_url: "https://panel.test/plans".into(),
    };
    let err = h.manager.request_plan_upgrade(USER, &req, "ip").await.unwrap_err();
    assert_eq!(app_code(err), ErrorCode::PlanNotFound);
}
