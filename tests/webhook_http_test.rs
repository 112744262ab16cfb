mod support;

use axum::{
    body::Body,
    http::{
        header::{ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE, ORIGIN},
        Request, StatusCode,
    },
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use support::{dec, paid_callback, test_config, Harness, ScriptedProvider, GATEWAY_KEY, MERCHANT_CODE};
use vazz_fulfillment::create_app;
use vazz_fulfillment::handlers::auth::{MAX_WEBHOOK_BODY, SIGNATURE_HEADER};
use vazz_fulfillment::middleware::request_logger::RequestLogConfig;
use vazz_fulfillment::signing;

const WEBHOOK_SECRET: &str = "whsec_test";

fn app(harness: &Harness, webhook_secret: Option<&str>) -> Router {
    let mut config = test_config();
    config.provider_webhook_secret = webhook_secret.map(str::to_string);
    create_app(
        harness.components.app_state(&config),
        RequestLogConfig { log_body: true },
    )
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn json_post(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn seeded() -> Harness {
    let harness = Harness::new(ScriptedProvider::accepting(9500));
    harness.store.add_user("alice", dec(0)).await;
    harness.seed_topup("VAZZ123", 10000, Some("alice")).await;
    harness
}

#[tokio::test]
async fn test_json_payment_callback() {
    let harness = seeded().await;
    let payload = serde_json::to_value(paid_callback("VAZZ123", 10000)).unwrap();

    let (status, body) = send(app(&harness, None), json_post("/callback/payment", &payload)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["orderId"], "VAZZ123");
    assert_eq!(body["data"]["status"], "PROCESS");

    // Redelivery is acknowledged without a second forward.
    let (status, body) = send(app(&harness, None), json_post("/callback/payment", &payload)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["code"], "DUPLICATE");
    assert_eq!(harness.provider.calls(), 1);
}

#[tokio::test]
async fn test_form_payment_callback() {
    let harness = seeded().await;
    let signature = signing::gateway_callback_signature(MERCHANT_CODE, "10000", "VAZZ123", GATEWAY_KEY);
    let form = format!(
        "merchantCode={}&amount=10000&merchantOrderId=VAZZ123&productDetail=ML86&paymentCode=BC\
         &resultCode=00&reference=DS-VAZZ123&signature={}",
        MERCHANT_CODE, signature
    );
    let request = Request::builder()
        .method("POST")
        .uri("/callback/payment")
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(form))
        .unwrap();

    let (status, body) = send(app(&harness, None), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let state = harness.store.snapshot().await;
    assert_eq!(state.payments["VAZZ123"].reference.as_deref(), Some("DS-VAZZ123"));
}

#[tokio::test]
async fn test_rejected_payment_callback_is_200_with_failure() {
    let harness = seeded().await;
    let mut payload = serde_json::to_value(paid_callback("VAZZ123", 10000)).unwrap();
    payload["signature"] = json!("deadbeef");

    let (status, body) = send(app(&harness, None), json_post("/callback/payment", &payload)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["data"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_undecodable_payment_callback_is_500() {
    let harness = seeded().await;
    let request = Request::builder()
        .method("POST")
        .uri("/callback/payment")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let (status, body) = send(app(&harness, None), request).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    assert_eq!(harness.provider.calls(), 0);
}

#[tokio::test]
async fn test_provider_callback_requires_hub_signature_when_configured() {
    let harness = seeded().await;
    harness
        .components
        .callbacks
        .process_payment_callback(paid_callback("VAZZ123", 10000))
        .await
        .unwrap();

    let report = json!({ "data": { "ref_id": "VAZZ123", "status": "Sukses", "sn": "SN-1" } }).to_string();

    let unsigned = Request::builder()
        .method("POST")
        .uri("/callback/provider")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(report.clone()))
        .unwrap();
    let (status, _) = send(app(&harness, Some(WEBHOOK_SECRET)), unsigned).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let forged = Request::builder()
        .method("POST")
        .uri("/callback/provider")
        .header(SIGNATURE_HEADER, signing::hub_signature("other", report.as_bytes()).unwrap())
        .body(Body::from(report.clone()))
        .unwrap();
    let (status, _) = send(app(&harness, Some(WEBHOOK_SECRET)), forged).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let signed = Request::builder()
        .method("POST")
        .uri("/callback/provider")
        .header(SIGNATURE_HEADER, signing::hub_signature(WEBHOOK_SECRET, report.as_bytes()).unwrap())
        .body(Body::from(report))
        .unwrap();
    let (status, body) = send(app(&harness, Some(WEBHOOK_SECRET)), signed).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "SUCCESS");
}

#[tokio::test]
async fn test_provider_callback_without_secret() {
    let harness = seeded().await;
    let (status, body) = send(
        app(&harness, None),
        json_post("/callback/provider", &json!({ "data": { "ref_id": "UNKNOWN", "status": "Sukses" } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["data"]["code"], "NOT_FOUND");

    let request = Request::builder()
        .method("POST")
        .uri("/callback/provider")
        .body(Body::from("garbage"))
        .unwrap();
    let (status, _) = send(app(&harness, None), request).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_order_endpoints() {
    let harness = Harness::new(ScriptedProvider::accepting(9500));
    harness.store.add_user("alice", dec(5000)).await;

    let (status, body) = send(
        app(&harness, None),
        json_post(
            "/orders",
            &json!({
                "kind": "TOPUP",
                "price": "10000",
                "payment_method": "BC",
                "username": "alice",
                "product_code": "ML86",
                "buyer_id": "123456"
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let order_id = body["order_id"].as_str().unwrap().to_string();

    let request = Request::builder()
        .uri(format!("/orders/{}", order_id))
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(app(&harness, None), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "pending");

    let request = Request::builder().uri("/orders/VAZZ404").body(Body::empty()).unwrap();
    let (status, _) = send(app(&harness, None), request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        app(&harness, None),
        json_post(
            "/orders/balance",
            &json!({ "username": "alice", "product_code": "ML86", "buyer_id": "123456", "price": "10000" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_health_endpoint() {
    let harness = Harness::new(ScriptedProvider::new(vec![]));
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

    let (status, body) = send(app(&harness, None), request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_cross_origin_requests_are_allowed() {
    let harness = Harness::new(ScriptedProvider::new(vec![]));
    let request = Request::builder()
        .uri("/health")
        .header(ORIGIN, "https://shop.vazz.example")
        .body(Body::empty())
        .unwrap();

    let response = app(&harness, None).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
}

#[tokio::test]
async fn test_oversized_provider_callback_is_refused() {
    let harness = seeded().await;
    let request = Request::builder()
        .method("POST")
        .uri("/callback/provider")
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(vec![b' '; MAX_WEBHOOK_BODY + 1]))
        .unwrap();
    // Body logging off so the webhook extractor does the reading.
    let app = create_app(
        harness.components.app_state(&test_config()),
        RequestLogConfig { log_body: false },
    );

    let (status, body) = send(app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(harness.provider.calls(), 0);
}
