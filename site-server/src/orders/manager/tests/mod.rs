use super::*;

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use shared::error::{AppError, ErrorCode};
use shared::message::{EventEnvelope, EventType};
use shared::models::{
    Basket, DiscountInput, GatewayAccount, ProductInput, ZarinPalCredentials,
};
use tokio::sync::broadcast;

use crate::cache::MemoryCache;
use crate::db::{CatalogStore, DiscountStore, MemoryStore};
use crate::events::BusPublisher;
use crate::gateway::{CallbackParams, GatewayError, PaymentRedirect, VerifyOutcome, VerifyRequest};
use crate::orders::{BasketService, BasketUpdate, BasketView};

const SITE: i64 = 1;
const CUSTOMER: i64 = 10;
const OWNER: i64 = 1;

// ========================================================================
// Scripted gateway
// ========================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VerifyScript {
    Success,
    Declined,
    Unreachable,
}

/// Gateway double: answers from a script and counts calls
struct ScriptedGateway {
    refuse_requests: Mutex<bool>,
    verify: Mutex<VerifyScript>,
    requests: AtomicUsize,
    verifies: AtomicUsize,
}

impl ScriptedGateway {
    fn new() -> Self {
        Self {
            refuse_requests: Mutex::new(false),
            verify: Mutex::new(VerifyScript::Success),
            requests: AtomicUsize::new(0),
            verifies: AtomicUsize::new(0),
        }
    }

    fn refuse_requests(&self) {
        *self.refuse_requests.lock() = true;
    }

    fn script_verify(&self, script: VerifyScript) {
        *self.verify.lock() = script;
    }

    fn verify_calls(&self) -> usize {
        self.verifies.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GatewayAdapter for ScriptedGateway {
    async fn request(&self, req: PaymentRequest<'_>) -> Result<PaymentRedirect, GatewayError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if *self.refuse_requests.lock() {
            return Err(GatewayError::Unavailable("provider returned 503".into()));
        }
        assert!(req.callback_url.contains(&req.tracking_number.to_string()));
        Ok(PaymentRedirect {
            redirect_url: format!("https://pay.test/start/{}", req.tracking_number),
            provider_token: Some(format!("A{}", req.tracking_number)),
        })
    }

    async fn verify(&self, req: VerifyRequest<'_>) -> Result<VerifyOutcome, GatewayError> {
        self.verifies.fetch_add(1, Ordering::SeqCst);
        let script = *self.verify.lock();
        match script {
            VerifyScript::Success => {
                assert_eq!(
                    req.provider_token.map(str::to_string),
                    Some(format!("A{}", req.tracking_number))
                );
                Ok(VerifyOutcome::success(format!("ref-{}", req.tracking_number), "100"))
            }
            VerifyScript::Declined => Ok(VerifyOutcome::failure("cancelled by payer", Some("-51".into()))),
            VerifyScript::Unreachable => Err(GatewayError::Unavailable("timeout".into())),
        }
    }
}

// ========================================================================
// Harness
// ========================================================================

struct Harness {
    store: Arc<MemoryStore>,
    manager: OrderManager,
    baskets: BasketService,
    gateway: Arc<ScriptedGateway>,
    cache: Arc<MemoryCache>,
    events: broadcast::Receiver<EventEnvelope>,
}

impl Harness {
    /// Events published since the last call
    fn drain_events(&mut self) -> Vec<EventEnvelope> {
        let mut out = Vec::new();
        while let Ok(e) = self.events.try_recv() {
            out.push(e);
        }
        out
    }
}

async fn harness() -> Harness {
    harness_with(Config::for_tests()).await
}

async fn harness_with(config: Config) -> Harness {
    let store = Arc::new(MemoryStore::new());
    store
        .upsert_gateway(
            SITE,
            OWNER,
            vec![
                GatewayAccount {
                    is_active: true,
                    config: AccountConfig::ZarinPal(ZarinPalCredentials {
                        merchant_id: "m-1".into(),
                        authorization_token: None,
                        is_sandbox: true,
                    }),
                },
                GatewayAccount {
                    is_active: false,
                    config: AccountConfig::ParbadVirtual,
                },
            ],
        )
        .await
        .unwrap();

    let stores = Stores::from_backend(store.clone());
    let gateway = Arc::new(ScriptedGateway::new());
    let bus = Arc::new(BusPublisher::new());
    let events = bus.subscribe();
    let cache = Arc::new(MemoryCache::new());
    let manager = OrderManager::new(
        &stores,
        gateway.clone(),
        bus,
        cache.clone(),
        Arc::new(config),
    );
    let baskets = BasketService::new(stores.baskets.clone(), manager.pricing().clone());
    Harness {
        store,
        manager,
        baskets,
        gateway,
        cache,
        events,
    }
}

/// Product with one variant; returns (product_id, variant_id)
async fn seed_product(h: &Harness, slug: &str, price: i64, stock: i64) -> (i64, i64) {
    seed_product_json(
        h,
        serde_json::json!({
            "site_id": SITE, "slug": slug, "name": slug, "weight": 250,
            "variants": [{"name": "default", "price": price, "stock": stock}]
        }),
    )
    .await
}

async fn seed_product_json(h: &Harness, json: serde_json::Value) -> (i64, i64) {
    let input: ProductInput = serde_json::from_value(json).unwrap();
    let product = h.store.create_product(OWNER, &input).await.unwrap();
    (product.id, product.variants[0].id)
}

async fn seed_discount(h: &Harness, code: &str, kind: &str, value: i64, quantity: i64) -> i64 {
    let input: DiscountInput = serde_json::from_value(serde_json::json!({
        "site_id": SITE, "code": code, "quantity": quantity, "type": kind,
        "value": value, "expiry_date": "2999-01-01T00:00:00Z"
    }))
    .unwrap();
    h.store.create_discount(OWNER, &input).await.unwrap().id
}

async fn fill_basket(
    h: &Harness,
    customer_id: i64,
    lines: &[(i64, i64, i32)],
    code: Option<&str>,
) -> BasketView {
    h.baskets
        .update_basket(
            customer_id,
            &BasketUpdate {
                site_id: SITE,
                items: lines
                    .iter()
                    .map(|&(product_id, product_variant_id, quantity)| BasketLine {
                        basket_item_id: 0,
                        product_id,
                        product_variant_id,
                        quantity,
                    })
                    .collect(),
                code: code.map(str::to_string),
            },
        )
        .await
        .unwrap()
}

fn observed(basket: &Basket) -> Vec<ObservedItem> {
    basket
        .items
        .iter()
        .map(|i| ObservedItem {
            basket_item_id: i.id,
            version: i.version,
        })
        .collect()
}

fn order_request(basket: &Basket) -> OrderRequest {
    OrderRequest {
        site_id: SITE,
        gateway: GatewayKind::ZarinPal,
        final_front_return_url: "https://shop.test/checkout/done".into(),
        address_id: 3,
        courier: Courier::Post,
        description: None,
        observed_items: observed(basket),
    }
}

async fn checkout(h: &Harness, customer_id: i64, view: &BasketView) -> PaymentRedirectView {
    h.manager
        .create_order_request(customer_id, &order_request(&view.basket), "10.0.0.1")
        .await
        .unwrap()
}

/// Callback parameters as ZarinPal would append them
fn callback(tracking_number: i64) -> CallbackParams {
    CallbackParams::from([
        ("tracking_number".to_string(), tracking_number.to_string()),
        ("Authority".to_string(), format!("A{tracking_number}")),
        ("Status".to_string(), "OK".to_string()),
    ])
}

async fn verify_order(h: &Harness, tracking_number: i64) -> VerifyResult {
    h.manager
        .verify_payment(CallVerifyUrl::CreateOrderVerify, &callback(tracking_number))
        .await
        .unwrap()
}

fn app_code(err: LifecycleError) -> ErrorCode {
    AppError::from(err).code
}

fn event_types(events: &[EventEnvelope]) -> Vec<EventType> {
    events.iter().map(|e| e.event_type).collect()
}

mod test_checkout;
mod test_concurrency;
mod test_flows;
mod test_verify;
