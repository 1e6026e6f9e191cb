use super::*;

// ========================================================================
// S1: 简单下单 → 支付成功 → 提交
// ========================================================================

#[tokio::test]
async fn test_simple_checkout_commits_after_payment() {
    let mut h = harness().await;
    let (product, variant) = seed_product(&h, "mug", 500, 5).await;
    let view = fill_basket(&h, CUSTOMER, &[(product, variant, 2)], None).await;
    assert_eq!(view.basket.total_raw_price, 1_000);
    assert_eq!(view.basket.total_price_with_coupon_discount, 1_000);

    let redirect = checkout(&h, CUSTOMER, &view).await;
    assert!(redirect.redirect_url.starts_with("https://pay.test/start/"));
    let order_id = redirect.order_id.unwrap();

    let order = h.manager.customer_order(order_id, CUSTOMER).await.unwrap();
    assert_eq!(order.status, OrderStatus::AwaitingPayment);
    assert_eq!(order.total_raw_price, 1_000);
    assert_eq!(order.courier_price, 100_000);
    assert_eq!(order.total_final_price, 101_000);
    assert_eq!(order.total_weight, 500);

    let payment = h
        .store
        .get_payment_by_tracking(redirect.tracking_number)
        .await
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert_eq!(payment.amount, order.total_final_price);
    assert_eq!(payment.envelope_order_id(), Some(order_id));
    assert_eq!(payment.gateway_account_name, "zarinpal-1");
    assert_eq!(payment.call_verify_url, CallVerifyUrl::CreateOrderVerify);

    // 购物车在下单时被删除
    let basket = h.baskets.get_basket(CUSTOMER, SITE).await.unwrap();
    assert!(basket.items.is_empty());

    let result = verify_order(&h, redirect.tracking_number).await;
    assert_eq!(result.status, VerifyStatus::Success);
    assert_eq!(
        result.redirect_url(),
        format!(
            "https://shop.test/checkout/done?success=true&tracking_number={}",
            redirect.tracking_number
        )
    );

    let order = h.manager.customer_order(order_id, CUSTOMER).await.unwrap();
    assert_eq!(order.status, OrderStatus::Committed);
    assert_eq!(h.store.stock(variant), Some(3));

    let events = h.drain_events();
    assert_eq!(event_types(&events), vec![EventType::OrderCommitted]);
    assert_eq!(events[0].payload.order_id(), order_id);
}

#[tokio::test]
async fn test_commit_invalidates_cached_stock() {
    let h = harness().await;
    let (product, variant) = seed_product(&h, "mug", 500, 5).await;
    h.cache.put(variant, 5).await.unwrap();

    let view = fill_basket(&h, CUSTOMER, &[(product, variant, 1)], None).await;
    let redirect = checkout(&h, CUSTOMER, &view).await;
    verify_order(&h, redirect.tracking_number).await;

    assert_eq!(h.cache.get(variant).await.unwrap(), None);
}

// ========================================================================
// 版本校验
// ========================================================================

#[tokio::test]
async fn test_stale_version_is_rejected_before_any_write() {
    let h = harness().await;
    let (product, variant) = seed_product(&h, "mug", 500, 5).await;
    let view = fill_basket(&h, CUSTOMER, &[(product, variant, 1)], None).await;

    let mut req = order_request(&view.basket);
    req.observed_items[0].version -= 1;
    let err = h
        .manager
        .create_order_request(CUSTOMER, &req, "10.0.0.1")
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::BasketChanged(ref ids) if ids == &[view.basket.items[0].id]));
    assert_eq!(app_code(err), ErrorCode::BasketChanged);

    // 什么都没写
    assert_eq!(h.gateway.requests.load(Ordering::SeqCst), 0);
    let orders = h
        .manager
        .customer_orders(CUSTOMER, &PaginationRequest::default())
        .await
        .unwrap();
    assert_eq!(orders.total_count, 0);
}

#[tokio::test]
async fn test_unobserved_item_is_a_change() {
    let h = harness().await;
    let (p1, v1) = seed_product(&h, "mug", 500, 5).await;
    let (p2, v2) = seed_product(&h, "cup", 300, 5).await;
    let view = fill_basket(&h, CUSTOMER, &[(p1, v1, 1), (p2, v2, 1)], None).await;

    let mut req = order_request(&view.basket);
    req.observed_items.truncate(1);
    let err = h
        .manager
        .create_order_request(CUSTOMER, &req, "10.0.0.1")
        .await
        .unwrap_err();
    assert_eq!(app_code(err), ErrorCode::BasketChanged);
}

#[tokio::test]
async fn test_price_change_after_basket_update_is_a_change() {
    let h = harness().await;
    let (product, variant) = seed_product(&h, "mug", 500, 5).await;
    let view = fill_basket(&h, CUSTOMER, &[(product, variant, 1)], None).await;

    h.store.set_price(variant, 650);

    let err = h
        .manager
        .create_order_request(CUSTOMER, &order_request(&view.basket), "10.0.0.1")
        .await
        .unwrap_err();
    assert_eq!(app_code(err), ErrorCode::BasketChanged);
}

#[tokio::test]
async fn test_missing_basket() {
    let h = harness().await;
    let err = h
        .manager
        .create_order_request(CUSTOMER, &order_request(&Basket::empty(SITE, CUSTOMER)), "10.0.0.1")
        .await
        .unwrap_err();
    assert_eq!(app_code(err), ErrorCode::BasketNotFound);
}

// ========================================================================
// S4: 库存不足
// ========================================================================

#[tokio::test]
async fn test_out_of_stock_rejects_checkout() {
    let h = harness().await;
    let (product, variant) = seed_product(&h, "mug", 500, 1).await;
    let view = fill_basket(&h, CUSTOMER, &[(product, variant, 2)], None).await;
    assert_eq!(view.out_of_stock_variants, vec![variant]);

    let err = h
        .manager
        .create_order_request(CUSTOMER, &order_request(&view.basket), "10.0.0.1")
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::OutOfStock(ref ids) if ids == &[variant]));
    let app = AppError::from(err);
    assert_eq!(app.code, ErrorCode::OutOfStock);
    assert_eq!(app.http_status(), http::StatusCode::CONFLICT);
    assert_eq!(h.store.stock(variant), Some(1));
}

// ========================================================================
// 网关配置
// ========================================================================

#[tokio::test]
async fn test_inactive_gateway_is_refused() {
    let h = harness().await;
    let (product, variant) = seed_product(&h, "mug", 500, 5).await;
    let view = fill_basket(&h, CUSTOMER, &[(product, variant, 1)], None).await;

    let mut req = order_request(&view.basket);
    req.gateway = GatewayKind::ParbadVirtual;
    let err = h.manager.create_order_request(CUSTOMER, &req, "10.0.0.1").await.unwrap_err();
    assert_eq!(app_code(err), ErrorCode::GatewayInactive);

    req.gateway = GatewayKind::PayIr;
    let err = h.manager.create_order_request(CUSTOMER, &req, "10.0.0.1").await.unwrap_err();
    assert_eq!(app_code(err), ErrorCode::GatewayNotConfigured);

    // 购物车保留，客户可以换网关重试
    assert_eq!(h.baskets.get_basket(CUSTOMER, SITE).await.unwrap().items.len(), 1);
}

#[tokio::test]
async fn test_gateway_refusal_fails_the_order() {
    let mut h = harness().await;
    let (product, variant) = seed_product(&h, "mug", 500, 5).await;
    let view = fill_basket(&h, CUSTOMER, &[(product, variant, 1)], None).await;
    h.gateway.refuse_requests();

    let err = h
        .manager
        .create_order_request(CUSTOMER, &order_request(&view.basket), "10.0.0.1")
        .await
        .unwrap_err();
    assert_eq!(app_code(err), ErrorCode::GatewayUnavailable);

    let orders = h
        .manager
        .customer_orders(CUSTOMER, &PaginationRequest::default())
        .await
        .unwrap();
    assert_eq!(orders.items.len(), 1);
    let order = &orders.items[0];
    assert_eq!(order.status, OrderStatus::Failed);

    let payments = h.manager.all_payments(&PaginationRequest::default()).await.unwrap();
    assert_eq!(payments.items[0].status, PaymentStatus::Inactive);
    assert_eq!(h.store.stock(variant), Some(5));
    assert_eq!(event_types(&h.drain_events()), vec![EventType::OrderFailed]);
}

// ========================================================================
// 运费
// ========================================================================

#[tokio::test]
async fn test_courier_price_from_config_and_free_send() {
    let mut config = Config::for_tests();
    config.courier_tipax_price = 250_000;
    let h = harness_with(config).await;

    let (product, variant) = seed_product(&h, "mug", 500, 5).await;
    let view = fill_basket(&h, CUSTOMER, &[(product, variant, 1)], None).await;
    let mut req = order_request(&view.basket);
    req.courier = Courier::Tipax;
    req.description = Some("leave at the door".into());
    let redirect = h.manager.create_order_request(CUSTOMER, &req, "10.0.0.1").await.unwrap();
    let order = h.manager.customer_order(redirect.order_id.unwrap(), CUSTOMER).await.unwrap();
    assert_eq!(order.courier, Courier::Tipax);
    assert_eq!(order.courier_price, 250_000);
    assert_eq!(order.total_final_price, 250_500);
    assert_eq!(order.description.as_deref(), Some("leave at the door"));

    let (free, free_variant) = seed_product_json(
        &h,
        serde_json::json!({
            "site_id": SITE, "slug": "ebook", "name": "ebook", "free_send": true,
            "variants": [{"name": "pdf", "price": 900, "stock": 50}]
        }),
    )
    .await;
    let view = fill_basket(&h, CUSTOMER, &[(free, free_variant, 1)], None).await;
    let redirect = checkout(&h, CUSTOMER, &view).await;
    let order = h.manager.customer_order(redirect.order_id.unwrap(), CUSTOMER).await.unwrap();
    assert_eq!(order.courier_price, 0);
    assert_eq!(order.total_final_price, 900);
}

// ========================================================================
// 折扣快照
// ========================================================================

#[tokio::test]
async fn test_discount_is_snapshotted_into_the_order() {
    let h = harness().await;
    let (pa, va) = seed_product(&h, "a", 700, 5).await;
    let (pb, vb) = seed_product(&h, "b", 300, 5).await;
    let discount_id = seed_discount(&h, "OFF100", "fixed", 100, 10).await;

    let view = fill_basket(&h, CUSTOMER, &[(pa, va, 1), (pb, vb, 1)], Some("OFF100")).await;
    assert_eq!(view.basket.discount_id, Some(discount_id));
    assert_eq!(view.basket.total_discount, 100);

    let redirect = checkout(&h, CUSTOMER, &view).await;
    let order = h.manager.customer_order(redirect.order_id.unwrap(), CUSTOMER).await.unwrap();
    assert_eq!(order.discount_id, Some(discount_id));
    assert_eq!(order.total_discount, 100);
    assert_eq!(order.total_price_with_coupon_discount, 900);
    let just: Vec<i64> = order.items.iter().map(|i| i.just_discount_price).collect();
    assert_eq!(just, vec![70, 30]);
}

// ========================================================================
// 取消与超时
// ========================================================================

#[tokio::test]
async fn test_cancel_awaiting_order() {
    let h = harness().await;
    let (product, variant) = seed_product(&h, "mug", 500, 5).await;
    let view = fill_basket(&h, CUSTOMER, &[(product, variant, 1)], None).await;
    let redirect = checkout(&h, CUSTOMER, &view).await;
    let order_id = redirect.order_id.unwrap();

    let err = h.manager.cancel_order(order_id, CUSTOMER + 1).await.unwrap_err();
    assert!(matches!(err, LifecycleError::NotOrderOwner(_)));

    let order = h.manager.cancel_order(order_id, CUSTOMER).await.unwrap();
    assert_eq!(order.status, OrderStatus::Abandoned);
    let payment = h
        .store
        .get_payment_by_tracking(redirect.tracking_number)
        .await
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Inactive);

    let err = h.manager.cancel_order(order_id, CUSTOMER).await.unwrap_err();
    assert!(matches!(err, LifecycleError::InvalidOrderState(_, OrderStatus::Abandoned)));

    // 取消后的回调不会再扣库存
    let result = verify_order(&h, redirect.tracking_number).await;
    assert_eq!(result.status, VerifyStatus::Failed);
    assert_eq!(h.gateway.verify_calls(), 0);
    assert_eq!(h.store.stock(variant), Some(5));
}

#[tokio::test]
async fn test_sweep_abandons_only_stale_orders() {
    let h = harness().await;
    let (product, variant) = seed_product(&h, "mug", 500, 5).await;
    let view = fill_basket(&h, CUSTOMER, &[(product, variant, 1)], None).await;
    let redirect = checkout(&h, CUSTOMER, &view).await;

    let now = shared::util::now_millis();
    assert_eq!(h.manager.sweep_abandoned(now).await.unwrap(), 0);

    let later = now + 31 * 60 * 1000;
    assert_eq!(h.manager.sweep_abandoned(later).await.unwrap(), 1);
    let order = h
        .manager
        .customer_order(redirect.order_id.unwrap(), CUSTOMER)
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Abandoned);
    assert_eq!(order.failure_reason.as_deref(), Some("payment timeout"));

    // 已清理的订单不会被再次处理
    assert_eq!(h.manager.sweep_abandoned(later).await.unwrap(), 0);
}
