use super::*;

use futures::future::join_all;
use shared::message::OrderEvent;

/// Run `verify_order` for every tracking number at once
async fn verify_all(h: &Harness, trackings: &[i64]) -> Vec<VerifyResult> {
    let tasks = trackings.iter().map(|&tracking_number| {
        let manager = h.manager.clone();
        tokio::spawn(async move {
            manager
                .verify_payment(CallVerifyUrl::CreateOrderVerify, &callback(tracking_number))
                .await
                .unwrap()
        })
    });
    join_all(tasks)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect()
}

fn count(results: &[VerifyResult], status: VerifyStatus) -> usize {
    results.iter().filter(|r| r.status == status).count()
}

// ========================================================================
// 库存不会超卖
// ========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_commits_never_oversell() {
    let mut h = harness().await;
    let (product, variant) = seed_product(&h, "mug", 500, 5).await;

    let mut trackings = Vec::new();
    for customer in 100..104 {
        let view = fill_basket(&h, customer, &[(product, variant, 2)], None).await;
        trackings.push(checkout(&h, customer, &view).await.tracking_number);
    }

    let results = verify_all(&h, &trackings).await;
    assert_eq!(count(&results, VerifyStatus::Success), 2);
    assert_eq!(count(&results, VerifyStatus::NeedsReconciliation), 2);
    assert_eq!(h.store.stock(variant), Some(1));

    let types = event_types(&h.drain_events());
    assert_eq!(types.iter().filter(|t| **t == EventType::OrderCommitted).count(), 2);
    assert_eq!(
        types
            .iter()
            .filter(|t| **t == EventType::OrderNeedsReconciliation)
            .count(),
        2
    );
}

// ========================================================================
// 同一笔支付的并发回调
// ========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_duplicate_callbacks_commit_once() {
    let mut h = harness().await;
    let (product, variant) = seed_product(&h, "mug", 500, 5).await;
    let view = fill_basket(&h, CUSTOMER, &[(product, variant, 2)], None).await;
    let redirect = checkout(&h, CUSTOMER, &view).await;

    let results = verify_all(&h, &[redirect.tracking_number; 8]).await;
    assert!(results.iter().all(|r| r.status == VerifyStatus::Success));
    assert_eq!(h.store.stock(variant), Some(3));

    // 网关可能被问了不止一次，但只提交一次
    let events = h.drain_events();
    assert_eq!(event_types(&events), vec![EventType::OrderCommitted]);
    let payment = h
        .store
        .get_payment_by_tracking(redirect.tracking_number)
        .await
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Active);
}

// ========================================================================
// 折扣并发兑换
// ========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_discount_redeemed_exactly_once() {
    let mut h = harness().await;
    let (product, variant) = seed_product(&h, "mug", 1_000, 20).await;
    let discount_id = seed_discount(&h, "ONCE", "fixed", 100, 10).await;

    let mut trackings = Vec::new();
    for _ in 0..4 {
        let view = fill_basket(&h, CUSTOMER, &[(product, variant, 1)], Some("ONCE")).await;
        assert_eq!(view.basket.discount_id, Some(discount_id));
        trackings.push(checkout(&h, CUSTOMER, &view).await.tracking_number);
    }

    let results = verify_all(&h, &trackings).await;
    assert_eq!(count(&results, VerifyStatus::Success), 1);
    assert_eq!(count(&results, VerifyStatus::NeedsReconciliation), 3);
    assert_eq!(h.store.get_discount(discount_id).await.unwrap().quantity, 9);
    assert_eq!(h.store.stock(variant), Some(19));

    let reasons: Vec<String> = h
        .drain_events()
        .into_iter()
        .filter_map(|e| match e.payload {
            OrderEvent::OrderNeedsReconciliation(n) => Some(n.reason),
            _ => None,
        })
        .collect();
    assert_eq!(reasons.len(), 3);
    assert!(
        reasons
            .iter()
            .all(|r| r == ErrorCode::DiscountAlreadyRedeemed.message())
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_last_unit_redeemed_twice_reports_already_redeemed() {
    let mut h = harness().await;
    let (product, variant) = seed_product(&h, "mug", 1_000, 20).await;
    let discount_id = seed_discount(&h, "LAST", "fixed", 100, 1).await;

    let mut trackings = Vec::new();
    for _ in 0..2 {
        let view = fill_basket(&h, CUSTOMER, &[(product, variant, 1)], Some("LAST")).await;
        assert_eq!(view.basket.discount_id, Some(discount_id));
        trackings.push(checkout(&h, CUSTOMER, &view).await.tracking_number);
    }

    let results = verify_all(&h, &trackings).await;
    assert_eq!(count(&results, VerifyStatus::Success), 1);
    assert_eq!(count(&results, VerifyStatus::NeedsReconciliation), 1);
    assert_eq!(h.store.get_discount(discount_id).await.unwrap().quantity, 0);

    let reasons: Vec<String> = h
        .drain_events()
        .into_iter()
        .filter_map(|e| match e.payload {
            OrderEvent::OrderNeedsReconciliation(n) => Some(n.reason),
            _ => None,
        })
        .collect();
    assert_eq!(reasons, vec![ErrorCode::DiscountAlreadyRedeemed.message().to_string()]);
}
