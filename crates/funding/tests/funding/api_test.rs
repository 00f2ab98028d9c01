use axum::{
    body::{to_bytes, Body},
    http::{header::CONTENT_TYPE, Request, StatusCode},
    Router,
};
use funding::{
    app, lnpay_webhook_router, AppState, FundingSource, InvoicePoller, InvoiceResponse,
    PaymentResponse, PaymentStatus, SettlementChannel, SettlementMode, VoidWallet,
};
use serde_json::{json, Value};
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

use crate::helpers::{
    init_logger, lnpay_wallet, next_paid, MockFundingSource, BOLT11, BOLT11_PAYMENT_HASH,
};

fn router(state: AppState) -> Router {
    app(state, None, vec![])
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_check_is_ok_without_background_work() {
    init_logger();
    let response = router(AppState::new(Arc::new(VoidWallet::new())))
        .oneshot(get("/api/v1/health_check"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn health_check_fails_when_a_background_thread_died() {
    init_logger();
    let mut state = AppState::new(Arc::new(VoidWallet::new()));
    let finished = tokio::spawn(async {});
    while !finished.is_finished() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    state.background_threads = Arc::new(
        [(String::from("settlement_listener"), finished)]
            .into_iter()
            .collect(),
    );

    let response = router(state)
        .oneshot(get("/api/v1/health_check"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        json_body(response).await,
        json!({ "error": "internal server error" })
    );
}

#[tokio::test]
async fn funding_source_info_names_the_backend() {
    init_logger();
    let response = router(AppState::new(Arc::new(VoidWallet::new())))
        .oneshot(get("/api/v1/funding_source"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!({ "name": "void", "settlement_mode": "unsupported" })
    );
}

#[tokio::test]
async fn void_wallet_invoice_is_a_bad_gateway() {
    init_logger();
    let response = router(AppState::new(Arc::new(VoidWallet::new())))
        .oneshot(post_json("/api/v1/invoices", json!({ "amount": 100 })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body = json_body(response).await;
    assert_eq!(body["ok"], json!(false));
    assert_eq!(body["checking_id"], Value::Null);
    assert_eq!(
        body["error_message"],
        json!("VoidWallet cannot create invoices.")
    );
}

#[tokio::test]
async fn created_invoice_is_tracked_by_the_poller() {
    init_logger();
    let channel = SettlementChannel::new();
    let sender = channel.sender();
    let mut funding_source = MockFundingSource::new();
    funding_source.expect_name().return_const("mock");
    funding_source
        .expect_settlement_mode()
        .return_const(SettlementMode::Poll);
    funding_source
        .expect_settlement_sender()
        .returning(move || sender.clone());
    funding_source
        .expect_create_invoice()
        .withf(|amount, memo, description_hash| {
            *amount == 1000 && memo.as_deref() == Some("coffee") && description_hash.is_none()
        })
        .times(1)
        .returning(|_, _, _| InvoiceResponse::created("hash_1", "lnbc10u1pcoffee"));

    let funding_source = Arc::new(funding_source);
    let poller = Arc::new(InvoicePoller::new(
        funding_source.clone(),
        CancellationToken::new(),
        Duration::from_secs(60),
    ));
    let mut state = AppState::new(funding_source);
    state.poller = Some(poller.clone());

    let response = router(state)
        .oneshot(post_json(
            "/api/v1/invoices",
            json!({ "amount": 1000, "memo": "coffee" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(
        json_body(response).await,
        json!({
            "ok": true,
            "checking_id": "hash_1",
            "payment_request": "lnbc10u1pcoffee",
            "error_message": null
        })
    );
    assert_eq!(poller.outstanding(), vec!["hash_1"]);
}

#[tokio::test]
async fn expired_invoices_get_one_last_poll() {
    init_logger();
    let channel = SettlementChannel::new();
    let sender = channel.sender();
    let mut funding_source = MockFundingSource::new();
    funding_source.expect_name().return_const("mock");
    funding_source
        .expect_settlement_mode()
        .return_const(SettlementMode::Poll);
    funding_source
        .expect_settlement_sender()
        .returning(move || sender.clone());
    funding_source
        .expect_create_invoice()
        .times(1)
        .returning(|_, _, _| InvoiceResponse::created(BOLT11_PAYMENT_HASH, BOLT11));
    funding_source
        .expect_get_invoice_status()
        .withf(|checking_id: &str| checking_id == BOLT11_PAYMENT_HASH)
        .times(1)
        .returning(|_| PaymentStatus::Unknown);

    let funding_source = Arc::new(funding_source);
    let poller = Arc::new(InvoicePoller::new(
        funding_source.clone(),
        CancellationToken::new(),
        Duration::from_secs(60),
    ));
    let mut state = AppState::new(funding_source);
    state.poller = Some(poller.clone());

    let response = router(state)
        .oneshot(post_json("/api/v1/invoices", json!({ "amount": 10 })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(poller.outstanding(), vec![BOLT11_PAYMENT_HASH]);

    // the invoice's own expiry has long passed
    assert_eq!(poller.poll_outstanding().await, 0);
    assert!(poller.outstanding().is_empty());
    assert_eq!(poller.poll_outstanding().await, 0);
}

#[tokio::test]
async fn invalid_invoice_requests_are_rejected() {
    init_logger();
    let mut funding_source = MockFundingSource::new();
    funding_source.expect_create_invoice().times(0);
    let app = router(AppState::new(Arc::new(funding_source)));

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/v1/invoices",
            json!({ "amount": 10, "description_hash": "not hex" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(json_body(response).await["error"].is_string());

    let response = app
        .oneshot(post_json("/api/v1/invoices", json!({ "amount": 0 })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await,
        json!({ "error": "amount must be positive" })
    );
}

#[tokio::test]
async fn malformed_bolt11_never_reaches_the_provider() {
    init_logger();
    let mut funding_source = MockFundingSource::new();
    funding_source.expect_pay_invoice().times(0);

    let response = router(AppState::new(Arc::new(funding_source)))
        .oneshot(post_json(
            "/api/v1/payments",
            json!({ "bolt11": "lnbc1notaninvoice" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert!(body["error"]
        .as_str()
        .is_some_and(|error| error.starts_with("invalid BOLT11 invoice")));
}

#[tokio::test]
async fn payment_outcome_sets_the_status_code() {
    init_logger();
    let mut funding_source = MockFundingSource::new();
    funding_source.expect_name().return_const("mock");
    let mut seq = mockall::Sequence::new();
    funding_source
        .expect_pay_invoice()
        .withf(|bolt11: &str| bolt11 == BOLT11)
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| PaymentResponse::sent(BOLT11_PAYMENT_HASH, 1000));
    funding_source
        .expect_pay_invoice()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_| PaymentResponse::failed("Insufficient balance"));
    let app = router(AppState::new(Arc::new(funding_source)));

    let response = app
        .clone()
        .oneshot(post_json("/api/v1/payments", json!({ "bolt11": BOLT11 })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await,
        json!({
            "ok": true,
            "checking_id": BOLT11_PAYMENT_HASH,
            "fee_msat": 1000,
            "error_message": null
        })
    );

    let response = app
        .oneshot(post_json("/api/v1/payments", json!({ "bolt11": BOLT11 })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(
        json_body(response).await,
        json!({
            "ok": false,
            "checking_id": null,
            "fee_msat": 0,
            "error_message": "Insufficient balance"
        })
    );
}

#[tokio::test]
async fn status_routes_report_paid_flag() {
    init_logger();
    let mut funding_source = MockFundingSource::new();
    funding_source
        .expect_get_invoice_status()
        .withf(|checking_id: &str| checking_id == "inv_1")
        .returning(|_| PaymentStatus::Paid);
    funding_source
        .expect_get_payment_status()
        .withf(|checking_id: &str| checking_id == "pay_1")
        .returning(|_| PaymentStatus::Unknown);
    let app = router(AppState::new(Arc::new(funding_source)));

    let response = app
        .clone()
        .oneshot(get("/api/v1/invoices/inv_1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "paid": true }));

    let response = app.oneshot(get("/api/v1/payments/pay_1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "paid": null }));
}

#[tokio::test]
async fn lnpay_webhook_always_answers_no_content() {
    init_logger();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/user/lntx/lntx_9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "settled": 1 })))
        .expect(1)
        .mount(&server)
        .await;

    let wallet = Arc::new(lnpay_wallet(&server));
    let mut paid = wallet.paid_invoices_stream().await.unwrap();
    let state = AppState::new(wallet.clone());
    let service = app(state, Some(lnpay_webhook_router(wallet)), vec![]);

    let response = service
        .clone()
        .oneshot(post_json(
            "/api/v1/webhooks/lnpay",
            json!({
                "event": { "name": "wallet_receive" },
                "data": { "wtx": { "lnTx": { "id": "lntx_9" } } }
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        next_paid(&mut paid, Duration::from_secs(1)).await.as_deref(),
        Some("lntx_9")
    );

    let response = service
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/webhooks/lnpay")
                .body(Body::from("garbage"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn webhook_route_only_exists_for_lnpay() {
    init_logger();
    let response = router(AppState::new(Arc::new(VoidWallet::new())))
        .oneshot(post_json("/api/v1/webhooks/lnpay", json!({})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
