//! HTTP surface tests over the in-memory backend
//!
//! The router is driven with `oneshot`, no sockets involved. Checkout runs
//! against the virtual gateway, so the whole redirect → landing page →
//! callback loop stays in-process.

use axum::Router;
use axum::body::Body;
use http::{HeaderMap, Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use shared::error::ErrorCode;
use site_server::auth::{Identity, PrincipalKind};
use site_server::{AppState, Config, api};
use tower::ServiceExt;

const SITE: i64 = 1;
const OTHER_SITE: i64 = 2;

struct TestApp {
    app: Router,
    state: AppState,
}

struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Value,
}

impl TestApp {
    async fn new() -> Self {
        let state = AppState::new(Config::for_tests()).await.unwrap();
        let app = api::create_router(state.clone());
        Self { app, state }
    }

    fn token(&self, identity: Identity) -> String {
        self.state.jwt.issue(&identity).unwrap()
    }

    fn owner(&self, id: i64, site_id: i64) -> String {
        self.token(Identity {
            id,
            kind: PrincipalKind::User,
            site_id: Some(site_id),
            is_admin: false,
        })
    }

    fn admin(&self) -> String {
        self.token(Identity {
            id: 99,
            kind: PrincipalKind::User,
            site_id: None,
            is_admin: true,
        })
    }

    fn customer(&self, id: i64, site_id: i64) -> String {
        self.token(Identity {
            id,
            kind: PrincipalKind::Customer,
            site_id: Some(site_id),
            is_admin: false,
        })
    }

    async fn call(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        Response {
            status,
            headers,
            body,
        }
    }

    async fn get(&self, uri: &str, token: &str) -> Response {
        self.call("GET", uri, Some(token), None).await
    }

    async fn post(&self, uri: &str, token: &str, body: Value) -> Response {
        self.call("POST", uri, Some(token), Some(body)).await
    }

    /// `(product_id, variant_id)`
    async fn create_product(&self, token: &str, site_id: i64, slug: &str, price: i64, stock: i64) -> (i64, i64) {
        let res = self
            .post(
                "/api/v1/products",
                token,
                json!({
                    "site_id": site_id, "slug": slug, "name": slug,
                    "variants": [{"name": "default", "price": price, "stock": stock}]
                }),
            )
            .await;
        assert_eq!(res.status, StatusCode::OK, "{}", res.body);
        (
            res.body["id"].as_i64().unwrap(),
            res.body["variants"][0]["id"].as_i64().unwrap(),
        )
    }

    async fn create_page(&self, token: &str, site_id: i64, slug: &str) -> i64 {
        let res = self
            .post(
                "/api/v1/pages",
                token,
                json!({"site_id": site_id, "slug": slug, "title": slug}),
            )
            .await;
        assert_eq!(res.status, StatusCode::OK, "{}", res.body);
        res.body["id"].as_i64().unwrap()
    }

    /// Pending virtual-gateway order on `site_id`, returns its id
    async fn place_order(&self, owner: &str, customer: &str, site_id: i64) -> i64 {
        self.post(
            "/api/v1/gateway",
            owner,
            json!({"site_id": site_id, "accounts": [{"gateway": "parbadvirtual", "is_active": true}]}),
        )
        .await;
        let (product, variant) = self.create_product(owner, site_id, "mug", 500, 5).await;
        let res = self
            .post(
                "/api/v1/basket",
                customer,
                json!({"site_id": site_id, "items": [
                    {"product_id": product, "product_variant_id": variant, "quantity": 1}
                ]}),
            )
            .await;
        let item = res.body["items"][0].clone();
        let res = self
            .post(
                "/api/v1/order/request",
                customer,
                json!({
                    "site_id": site_id,
                    "gateway": "parbadvirtual",
                    "final_front_return_url": "https://shop.test/done",
                    "address_id": 3,
                    "observed_items": [{"basket_item_id": item["id"], "version": item["version"]}]
                }),
            )
            .await;
        assert_eq!(res.status, StatusCode::OK, "{}", res.body);

        let res = self.get(&format!("/api/v1/sites/{site_id}/orders"), owner).await;
        res.body["items"][0]["id"].as_i64().unwrap()
    }
}

fn error_code(res: &Response) -> u64 {
    res.body["code"].as_u64().unwrap()
}

/// Path and query of an absolute URL on the public base
fn local_path(url: &str) -> String {
    url.strip_prefix("http://localhost:8080").unwrap().to_string()
}

/// `href` of the anchor with `id` on the virtual landing page
fn link(html: &str, id: &str) -> String {
    let marker = format!("id=\"{id}\" href=\"");
    let start = html.find(&marker).unwrap() + marker.len();
    let end = start + html[start..].find('"').unwrap();
    html[start..end].replace("&amp;", "&")
}

// ============================================================================
// Public surface and auth
// ============================================================================

#[tokio::test]
async fn health_is_public() {
    let t = TestApp::new().await;
    let res = t.call("GET", "/health", None, None).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["status"], "ok");
    assert_eq!(res.body["service"], "site-server");
}

#[tokio::test]
async fn api_requires_a_valid_token() {
    let t = TestApp::new().await;
    let res = t.call("GET", "/api/v1/orders", None, None).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(&res), u64::from(ErrorCode::NotAuthenticated.code()));

    let res = t.call("GET", "/api/v1/orders", Some("not-a-jwt"), None).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(&res), u64::from(ErrorCode::TokenInvalid.code()));
}

#[tokio::test]
async fn tokens_are_scoped() {
    let t = TestApp::new().await;
    let customer = t.customer(10, SITE);

    let res = t.get(&format!("/api/v1/basket?site_id={OTHER_SITE}"), &customer).await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);

    let res = t.get("/api/v1/admin/orders", &customer).await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);

    let owner = t.owner(1, SITE);
    let res = t.get(&format!("/api/v1/sites/{OTHER_SITE}/orders"), &owner).await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
    let res = t.get(&format!("/api/v1/sites/{SITE}/orders"), &owner).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["total_count"], 0);
}

#[tokio::test]
async fn unknown_callback_flow_is_rejected() {
    let t = TestApp::new().await;
    let res = t
        .call("GET", "/payment/callback/refund_verify?tracking_number=1", None, None)
        .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&res), u64::from(ErrorCode::InvalidCallback.code()));
}

// ============================================================================
// Checkout through the virtual gateway
// ============================================================================

#[tokio::test]
async fn checkout_round_trip_commits_the_order() {
    let t = TestApp::new().await;
    let owner = t.owner(1, SITE);
    let customer = t.customer(10, SITE);

    let res = t
        .post(
            "/api/v1/gateway",
            &owner,
            json!({"site_id": SITE, "accounts": [{"gateway": "parbadvirtual", "is_active": true}]}),
        )
        .await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    let (product, variant) = t.create_product(&owner, SITE, "mug", 500, 5).await;

    // basket
    let res = t
        .post(
            "/api/v1/basket",
            &customer,
            json!({"site_id": SITE, "items": [
                {"product_id": product, "product_variant_id": variant, "quantity": 2}
            ]}),
        )
        .await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    let item = res.body["items"][0].clone();
    let item_id = item["id"].as_i64().unwrap();

    // price preview
    let res = t
        .post(
            "/api/v1/order/price",
            &customer,
            json!({"site_id": SITE, "customer_id": 10, "is_order_verify": false, "items": [
                {"basket_item_id": item_id, "product_id": product, "product_variant_id": variant, "quantity": 2}
            ]}),
        )
        .await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    assert_eq!(res.body["totals"]["total_raw_price"], 1000);
    assert_eq!(res.body["totals"]["total_price_with_coupon_discount"], 1000);

    // checkout
    let res = t
        .post(
            "/api/v1/order/request",
            &customer,
            json!({
                "site_id": SITE,
                "gateway": "parbadvirtual",
                "final_front_return_url": "https://shop.test/done",
                "address_id": 3,
                "observed_items": [{"basket_item_id": item_id, "version": item["version"]}]
            }),
        )
        .await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    let tracking = res.body["tracking_number"].as_i64().unwrap();
    let redirect = res.body["redirect_url"].as_str().unwrap().to_string();
    assert!(redirect.starts_with("http://localhost:8080/payment/virtual?"));

    // landing page → pay link → callback
    let res = t.call("GET", &local_path(&redirect), None, None).await;
    assert_eq!(res.status, StatusCode::OK);
    let html = res.body.as_str().unwrap().to_string();
    let pay = link(&html, "pay");

    let res = t.call("GET", &local_path(&pay), None, None).await;
    assert_eq!(res.status, StatusCode::FOUND);
    let location = res.headers[header::LOCATION].to_str().unwrap().to_string();
    assert_eq!(
        location,
        format!("https://shop.test/done?success=true&tracking_number={tracking}")
    );

    // a replayed callback lands on the same result
    let res = t.call("GET", &local_path(&pay), None, None).await;
    assert_eq!(res.status, StatusCode::FOUND);
    assert_eq!(res.headers[header::LOCATION].to_str().unwrap(), location);

    let res = t.get("/api/v1/orders", &customer).await;
    assert_eq!(res.body["total_count"], 1);
    assert_eq!(res.body["items"][0]["status"], "committed");

    let res = t.get(&format!("/api/v1/products/{product}"), &customer).await;
    assert_eq!(res.body["variants"][0]["stock"], 3);

    // the payment is no longer pending, so the landing page is gone
    let res = t.call("GET", &local_path(&redirect), None, None).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cancelled_virtual_payment_fails_the_order() {
    let t = TestApp::new().await;
    let owner = t.owner(1, SITE);
    let customer = t.customer(10, SITE);
    t.post(
        "/api/v1/gateway",
        &owner,
        json!({"site_id": SITE, "accounts": [{"gateway": "parbadvirtual", "is_active": true}]}),
    )
    .await;
    let (product, variant) = t.create_product(&owner, SITE, "mug", 500, 5).await;

    let res = t
        .post(
            "/api/v1/basket",
            &customer,
            json!({"site_id": SITE, "items": [
                {"product_id": product, "product_variant_id": variant, "quantity": 1}
            ]}),
        )
        .await;
    let item = res.body["items"][0].clone();
    let res = t
        .post(
            "/api/v1/order/request",
            &customer,
            json!({
                "site_id": SITE,
                "gateway": "parbadvirtual",
                "final_front_return_url": "https://shop.test/done",
                "address_id": 3,
                "observed_items": [{"basket_item_id": item["id"], "version": item["version"]}]
            }),
        )
        .await;
    let redirect = res.body["redirect_url"].as_str().unwrap().to_string();
    let html = t.call("GET", &local_path(&redirect), None, None).await.body;
    let cancel = link(html.as_str().unwrap(), "cancel");

    let res = t.call("GET", &local_path(&cancel), None, None).await;
    assert_eq!(res.status, StatusCode::FOUND);
    let location = res.headers[header::LOCATION].to_str().unwrap();
    assert!(location.starts_with("https://shop.test/done?success=false"));

    let res = t.get("/api/v1/orders", &customer).await;
    assert_eq!(res.body["items"][0]["status"], "failed");
    let res = t.get(&format!("/api/v1/products/{product}"), &customer).await;
    assert_eq!(res.body["variants"][0]["stock"], 5);
}

#[tokio::test]
async fn checkout_without_gateway_config_is_rejected() {
    let t = TestApp::new().await;
    let owner = t.owner(1, SITE);
    let customer = t.customer(10, SITE);
    let (product, variant) = t.create_product(&owner, SITE, "mug", 500, 5).await;
    let res = t
        .post(
            "/api/v1/basket",
            &customer,
            json!({"site_id": SITE, "items": [
                {"product_id": product, "product_variant_id": variant, "quantity": 1}
            ]}),
        )
        .await;
    let item = res.body["items"][0].clone();

    let res = t
        .post(
            "/api/v1/order/request",
            &customer,
            json!({
                "site_id": SITE,
                "gateway": "zarinpal",
                "final_front_return_url": "https://shop.test/done",
                "address_id": 3,
                "observed_items": [{"basket_item_id": item["id"], "version": item["version"]}]
            }),
        )
        .await;
    assert_eq!(error_code(&res), u64::from(ErrorCode::GatewayNotConfigured.code()));
}

// ============================================================================
// Page usage graph
// ============================================================================

#[tokio::test]
async fn page_usages_sync_and_reverse_lookup() {
    let t = TestApp::new().await;
    let owner = t.owner(1, SITE);
    let page = t.create_page(&owner, SITE, "home").await;
    let (a, _) = t.create_product(&owner, SITE, "a", 100, 1).await;
    let (b, _) = t.create_product(&owner, SITE, "b", 100, 1).await;

    let res = t
        .post(
            &format!("/api/v1/pages/{page}/usages"),
            &owner,
            json!({"page_id": page, "site_id": SITE, "type": "product", "entity_ids": [a, b, a]}),
        )
        .await;
    assert_eq!(res.status, StatusCode::NO_CONTENT);

    let uri = format!("/api/v1/pages/usages?entity_ids={a}&type=product&site_id={SITE}");
    let res = t.get(&uri, &owner).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(
        res.body,
        json!({"pages": [{"id": page, "title": "home", "slug": "home", "site_id": SITE}]})
    );

    // deleting the product drops its edges
    let res = t.call("DELETE", &format!("/api/v1/products/{a}"), Some(&owner), None).await;
    assert_eq!(res.status, StatusCode::NO_CONTENT);
    let res = t.get(&uri, &owner).await;
    assert_eq!(res.body, json!({"pages": []}));

    let uri = format!("/api/v1/pages/usages?entity_ids={b}&type=product&site_id={SITE}");
    assert_eq!(t.get(&uri, &owner).await.body["pages"][0]["id"], page);
}

#[tokio::test]
async fn cross_site_usage_is_rejected() {
    let t = TestApp::new().await;
    let owner = t.owner(1, SITE);
    let other_owner = t.owner(2, OTHER_SITE);
    let page = t.create_page(&owner, SITE, "home").await;
    let (foreign, _) = t.create_product(&other_owner, OTHER_SITE, "x", 100, 1).await;

    let res = t
        .post(
            &format!("/api/v1/pages/{page}/usages"),
            &owner,
            json!({"page_id": page, "site_id": SITE, "type": "product", "entity_ids": [foreign]}),
        )
        .await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&res), u64::from(ErrorCode::SiteMismatch.code()));

    // another user's page
    let res = t
        .post(
            &format!("/api/v1/pages/{page}/usages"),
            &other_owner,
            json!({"page_id": page, "site_id": SITE, "type": "product", "entity_ids": []}),
        )
        .await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);

    // customers never edit pages
    let res = t
        .post(
            &format!("/api/v1/pages/{page}/usages"),
            &t.customer(10, SITE),
            json!({"page_id": page, "site_id": SITE, "type": "product", "entity_ids": []}),
        )
        .await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn page_layout_must_stay_on_its_site() {
    let t = TestApp::new().await;
    let owner = t.owner(1, SITE);
    let other_owner = t.owner(2, OTHER_SITE);
    let res = t
        .post(
            "/api/v1/header-footers",
            &other_owner,
            json!({"site_id": OTHER_SITE, "title": "footer", "kind": "footer"}),
        )
        .await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    let footer = res.body["id"].as_i64().unwrap();

    let res = t
        .post(
            "/api/v1/pages",
            &owner,
            json!({"site_id": SITE, "slug": "home", "title": "Home", "footer_id": footer}),
        )
        .await;
    assert_eq!(error_code(&res), u64::from(ErrorCode::SiteMismatch.code()));

    // nothing was written
    let res = t.get(&format!("/api/v1/sites/{SITE}/pages"), &owner).await;
    assert_eq!(res.body["total_count"], 0);
}

// ============================================================================
// Owner and admin views
// ============================================================================

#[tokio::test]
async fn site_owner_reads_only_their_site_orders() {
    let t = TestApp::new().await;
    let owner = t.owner(1, SITE);
    let other_owner = t.owner(2, OTHER_SITE);
    let customer = t.customer(10, SITE);
    let other_customer = t.customer(11, OTHER_SITE);
    let order = t.place_order(&owner, &customer, SITE).await;
    let foreign = t.place_order(&other_owner, &other_customer, OTHER_SITE).await;

    let res = t.get(&format!("/api/v1/sites/{SITE}/orders/{order}"), &owner).await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    assert_eq!(res.body["id"], order);
    assert_eq!(res.body["site_id"], SITE);

    let res = t.get(&format!("/api/v1/sites/{SITE}/orders/{order}"), &other_owner).await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
    let res = t.get(&format!("/api/v1/sites/{SITE}/orders/{order}"), &customer).await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);

    // an order of another site is not visible through this site's path
    let res = t.get(&format!("/api/v1/sites/{SITE}/orders/{foreign}"), &owner).await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&res), u64::from(ErrorCode::OrderNotFound.code()));
}

#[tokio::test]
async fn admin_lists_span_every_site() {
    let t = TestApp::new().await;
    let owner = t.owner(1, SITE);
    let other_owner = t.owner(2, OTHER_SITE);
    t.create_page(&owner, SITE, "home").await;
    t.create_page(&other_owner, OTHER_SITE, "home").await;

    for uri in ["/api/v1/admin/pages", "/api/v1/admin/discounts"] {
        let res = t.get(uri, &owner).await;
        assert_eq!(res.status, StatusCode::FORBIDDEN, "{uri}");
        assert_eq!(error_code(&res), u64::from(ErrorCode::AdminRequired.code()));
    }

    let admin = t.admin();
    let res = t.get("/api/v1/admin/pages", &admin).await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    assert_eq!(res.body["total_count"], 2);
    let res = t.get("/api/v1/admin/discounts", &admin).await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
    assert_eq!(res.body["total_count"], 0);
}

#[tokio::test]
async fn list_paging_out_of_range_is_rejected() {
    let t = TestApp::new().await;
    let owner = t.owner(1, SITE);
    for query in ["page_size=500", "page_size=0", "page=0", "sort_by=password"] {
        let res = t.get(&format!("/api/v1/sites/{SITE}/pages?{query}"), &owner).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST, "{query}");
        assert_eq!(error_code(&res), u64::from(ErrorCode::ValidationFailed.code()));
    }
    let res = t
        .get(&format!("/api/v1/sites/{SITE}/pages?page_size=100&sort_by=title"), &owner)
        .await;
    assert_eq!(res.status, StatusCode::OK, "{}", res.body);
}
