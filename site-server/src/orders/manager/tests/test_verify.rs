use super::*;

use shared::models::Product;

async fn awaiting_order(h: &Harness, qty: i32) -> (PaymentRedirectView, i64) {
    let (product, variant) = seed_product(h, "mug", 500, 5).await;
    let view = fill_basket(h, CUSTOMER, &[(product, variant, qty)], None).await;
    (checkout(h, CUSTOMER, &view).await, variant)
}

// ========================================================================
// 支付失败
// ========================================================================

#[tokio::test]
async fn test_declined_payment_fails_the_order() {
    let mut h = harness().await;
    let (redirect, variant) = awaiting_order(&h, 2).await;
    h.gateway.script_verify(VerifyScript::Declined);

    let result = verify_order(&h, redirect.tracking_number).await;
    assert_eq!(result.status, VerifyStatus::Failed);
    assert!(result.redirect_url().contains("success=false"));

    let order = h
        .manager
        .customer_order(redirect.order_id.unwrap(), CUSTOMER)
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Failed);
    assert_eq!(order.failure_reason.as_deref(), Some("cancelled by payer"));

    let payment = h
        .store
        .get_payment_by_tracking(redirect.tracking_number)
        .await
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Inactive);
    assert_eq!(payment.gateway_response_code.as_deref(), Some("-51"));
    assert_eq!(h.store.stock(variant), Some(5));
    assert_eq!(event_types(&h.drain_events()), vec![EventType::OrderFailed]);
}

// ========================================================================
// S5: 重复回调
// ========================================================================

#[tokio::test]
async fn test_duplicate_callback_commits_once() {
    let mut h = harness().await;
    let (redirect, variant) = awaiting_order(&h, 2).await;

    let first = verify_order(&h, redirect.tracking_number).await;
    let second = verify_order(&h, redirect.tracking_number).await;
    assert_eq!(first, second);
    assert_eq!(first.status, VerifyStatus::Success);

    assert_eq!(h.gateway.verify_calls(), 1);
    assert_eq!(h.store.stock(variant), Some(3));
    assert_eq!(event_types(&h.drain_events()), vec![EventType::OrderCommitted]);

    let payment = h
        .store
        .get_payment_by_tracking(redirect.tracking_number)
        .await
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Active);
    assert_eq!(
        payment.transaction_code,
        Some(format!("ref-{}", redirect.tracking_number))
    );
}

#[tokio::test]
async fn test_duplicate_failure_callback_is_stable() {
    let mut h = harness().await;
    let (redirect, _) = awaiting_order(&h, 1).await;
    h.gateway.script_verify(VerifyScript::Declined);
    verify_order(&h, redirect.tracking_number).await;

    // 网关后来又说成功也不改变结果
    h.gateway.script_verify(VerifyScript::Success);
    let again = verify_order(&h, redirect.tracking_number).await;
    assert_eq!(again.status, VerifyStatus::Failed);
    assert_eq!(h.drain_events().len(), 1);
}

// ========================================================================
// 网关不可达
// ========================================================================

#[tokio::test]
async fn test_unreachable_gateway_leaves_payment_pending() {
    let mut h = harness().await;
    let (redirect, variant) = awaiting_order(&h, 1).await;
    h.gateway.script_verify(VerifyScript::Unreachable);

    let err = h
        .manager
        .verify_payment(CallVerifyUrl::CreateOrderVerify, &callback(redirect.tracking_number))
        .await
        .unwrap_err();
    assert_eq!(app_code(err), ErrorCode::GatewayUnavailable);

    let payment = h
        .store
        .get_payment_by_tracking(redirect.tracking_number)
        .await
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert!(h.drain_events().is_empty());

    // 网关重试成功
    h.gateway.script_verify(VerifyScript::Success);
    let result = verify_order(&h, redirect.tracking_number).await;
    assert_eq!(result.status, VerifyStatus::Success);
    assert_eq!(h.store.stock(variant), Some(4));
}

// ========================================================================
// 回调参数
// ========================================================================

#[tokio::test]
async fn test_callback_validation() {
    let h = harness().await;
    let (redirect, _) = awaiting_order(&h, 1).await;

    let err = h
        .manager
        .verify_payment(CallVerifyUrl::CreateOrderVerify, &CallbackParams::new())
        .await
        .unwrap_err();
    assert_eq!(app_code(err), ErrorCode::InvalidCallback);

    let err = h
        .manager
        .verify_payment(CallVerifyUrl::CreateOrderVerify, &callback(424242))
        .await
        .unwrap_err();
    assert_eq!(app_code(err), ErrorCode::PaymentNotFound);

    // 订单支付不能走充值回调
    let err = h
        .manager
        .verify_payment(CallVerifyUrl::ChargeCreditVerify, &callback(redirect.tracking_number))
        .await
        .unwrap_err();
    assert_eq!(app_code(err), ErrorCode::InvalidCallback);
    assert_eq!(h.gateway.verify_calls(), 0);
}

// ========================================================================
// 已付款但无法提交 → NeedsReconciliation
// ========================================================================

#[tokio::test]
async fn test_stock_gone_after_payment_needs_reconciliation() {
    let mut h = harness().await;
    let (redirect, variant) = awaiting_order(&h, 2).await;
    h.store.set_stock(variant, 1);

    let result = verify_order(&h, redirect.tracking_number).await;
    assert_eq!(result.status, VerifyStatus::NeedsReconciliation);
    assert!(result.redirect_url().ends_with("status=needs_reconciliation"));

    let order = h
        .manager
        .customer_order(redirect.order_id.unwrap(), CUSTOMER)
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::NeedsReconciliation);
    assert!(order.failure_reason.is_some());

    // 钱已收：Payment 为 active，库存未动
    let payment = h
        .store
        .get_payment_by_tracking(redirect.tracking_number)
        .await
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Active);
    assert_eq!(h.store.stock(variant), Some(1));

    let events = h.drain_events();
    assert_eq!(event_types(&events), vec![EventType::OrderNeedsReconciliation]);

    // 重复回调返回同样的结果
    let again = verify_order(&h, redirect.tracking_number).await;
    assert_eq!(again.status, VerifyStatus::NeedsReconciliation);
    assert!(h.drain_events().is_empty());
}

// ========================================================================
// S2: 优惠券在提交时扣减
// ========================================================================

#[tokio::test]
async fn test_coupon_is_decremented_at_commit() {
    let h = harness().await;
    let (product, variant) = seed_product_json(
        &h,
        serde_json::json!({
            "site_id": SITE, "slug": "lamp", "name": "lamp",
            "variants": [{"name": "default", "price": 1000, "stock": 5}],
            "coupon": {"quantity": 3, "type": "percentage", "value": 10,
                       "expiry_date": "2999-01-01T00:00:00Z"}
        }),
    )
    .await;
    let view = fill_basket(&h, CUSTOMER, &[(product, variant, 1)], None).await;
    let item = &view.basket.items[0];
    assert_eq!(item.just_coupon_price, 100);
    assert_eq!(item.final_raw_price, 900);
    assert_eq!(item.final_price_with_coupon_discount, 900);

    let redirect = checkout(&h, CUSTOMER, &view).await;
    // 下单不扣减
    let coupon_left = |p: Product| p.coupon.map(|c| c.quantity);
    assert_eq!(coupon_left(h.store.get_product(product).await.unwrap()), Some(3));

    verify_order(&h, redirect.tracking_number).await;
    assert_eq!(coupon_left(h.store.get_product(product).await.unwrap()), Some(2));
    assert_eq!(h.store.stock(variant), Some(4));
}

// ========================================================================
// 折扣只能兑换一次
// ========================================================================

#[tokio::test]
async fn test_discount_redeemed_once_per_customer() {
    let mut h = harness().await;
    let (product, variant) = seed_product(&h, "mug", 1_000, 10).await;
    let discount_id = seed_discount(&h, "TEN", "percentage", 10, 5).await;

    // 两个订单都在兑换前定价，所以都带着折扣
    let view = fill_basket(&h, CUSTOMER, &[(product, variant, 1)], Some("TEN")).await;
    let first = checkout(&h, CUSTOMER, &view).await;
    let view = fill_basket(&h, CUSTOMER, &[(product, variant, 1)], Some("TEN")).await;
    assert_eq!(view.basket.discount_id, Some(discount_id));
    let second = checkout(&h, CUSTOMER, &view).await;

    assert_eq!(verify_order(&h, first.tracking_number).await.status, VerifyStatus::Success);
    assert_eq!(
        verify_order(&h, second.tracking_number).await.status,
        VerifyStatus::NeedsReconciliation
    );
    assert_eq!(h.store.get_discount(discount_id).await.unwrap().quantity, 4);
    assert_eq!(h.store.stock(variant), Some(9));
    assert!(h.store.has_redeemed(CUSTOMER, discount_id).await.unwrap());

    let types = event_types(&h.drain_events());
    assert_eq!(
        types,
        vec![EventType::OrderCommitted, EventType::OrderNeedsReconciliation]
    );

    // 再次更新购物车时折扣不再适用
    let view = fill_basket(&h, CUSTOMER, &[(product, variant, 1)], Some("TEN")).await;
    assert_eq!(view.basket.discount_id, None);
    assert!(matches!(
        view.discount,
        crate::pricing::DiscountStatus::NotApplicable {
            reason: ErrorCode::DiscountAlreadyRedeemed,
            ..
        }
    ));
}
