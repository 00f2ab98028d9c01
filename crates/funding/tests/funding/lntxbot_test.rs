use funding::{
    FundingSource, InvoicePoller, LntxbotSettings, LntxbotWallet, PaymentStatus, SettlementMode,
};
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use wiremock::{
    matchers::{any, body_json, header, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

use crate::helpers::{
    impatient_client, init_logger, lntxbot_wallet, lntxbot_wallet_with, next_paid, test_client,
    LNTXBOT_KEY, STALL,
};

fn basic_auth() -> String {
    format!("Basic {}", LNTXBOT_KEY)
}

async fn mock_payment_status(server: &MockServer, checking_id: &str, status: &str) {
    Mock::given(method("POST"))
        .and(path(format!("/paymentstatus/{}", checking_id)))
        .and(header("Authorization", basic_auth().as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": status })))
        .mount(server)
        .await;
}

async fn mock_invoice_status(server: &MockServer, checking_id: &str, body: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path(format!("/invoicestatus/{}", checking_id)))
        .and(query_param("wait", "false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn create_invoice_uses_payment_hash_as_checking_id() {
    init_logger();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/addinvoice"))
        .and(header("Authorization", basic_auth().as_str()))
        .and(body_json(json!({ "amt": "500", "memo": "tip" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "payment_hash": "ph_1",
            "pay_req": "lnbc5u1ptip"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let invoice = lntxbot_wallet(&server)
        .create_invoice(500, Some(String::from("tip")), None)
        .await;

    assert!(invoice.ok());
    assert_eq!(invoice.checking_id(), Some("ph_1"));
    assert_eq!(invoice.payment_request(), Some("lnbc5u1ptip"));
}

#[tokio::test]
async fn pay_invoice_reports_decoded_hash_and_fee() {
    init_logger();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/payinvoice"))
        .and(body_json(json!({ "invoice": "lnbc1pay" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "decoded": { "payment_hash": "ph_2" },
            "fee_msat": 1500
        })))
        .expect(1)
        .mount(&server)
        .await;

    let payment = lntxbot_wallet(&server).pay_invoice("lnbc1pay").await;

    assert!(payment.ok());
    assert_eq!(payment.checking_id(), Some("ph_2"));
    assert_eq!(payment.fee_msat(), 1500);
}

#[tokio::test]
async fn failed_payment_uses_raw_body_as_message() {
    init_logger();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/payinvoice"))
        .respond_with(ResponseTemplate::new(500).set_body_string("route not found\n"))
        .mount(&server)
        .await;

    let payment = lntxbot_wallet(&server).pay_invoice("lnbc1pay").await;

    assert!(!payment.ok());
    assert_eq!(payment.checking_id(), None);
    assert_eq!(payment.fee_msat(), 0);
    assert_eq!(payment.error_message(), Some("route not found"));
}

#[tokio::test]
async fn payment_status_follows_provider_status() {
    init_logger();
    let server = MockServer::start().await;
    mock_payment_status(&server, "ph_pending", "pending").await;
    mock_payment_status(&server, "ph_failed", "failed").await;
    mock_payment_status(&server, "ph_complete", "complete").await;
    mock_payment_status(&server, "ph_odd", "COMPLETE").await;

    let wallet = lntxbot_wallet(&server);

    let pending = wallet.get_payment_status("ph_pending").await;
    assert_eq!(pending, PaymentStatus::Unknown);
    assert_eq!(pending.paid(), None);

    let failed = wallet.get_payment_status("ph_failed").await;
    assert_eq!(failed, PaymentStatus::Failed);
    assert_eq!(failed.paid(), Some(false));

    assert_eq!(
        wallet.get_payment_status("ph_complete").await,
        PaymentStatus::Paid
    );
    assert_eq!(
        wallet.get_payment_status("ph_odd").await,
        PaymentStatus::Unknown
    );
}

#[tokio::test]
async fn error_key_in_status_reply_is_unknown() {
    init_logger();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/paymentstatus/ph_1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "error": true,
            "message": "payment not found",
            "status": "complete"
        })))
        .mount(&server)
        .await;

    let status = lntxbot_wallet(&server).get_payment_status("ph_1").await;

    assert_eq!(status, PaymentStatus::Unknown);
}

#[tokio::test]
async fn invoice_is_paid_only_with_preimage() {
    init_logger();
    let server = MockServer::start().await;
    mock_invoice_status(&server, "ph_paid", json!({ "preimage": "00ff", "amount": 500 })).await;
    mock_invoice_status(&server, "ph_open", json!({ "amount": 500 })).await;

    let wallet = lntxbot_wallet(&server);

    assert_eq!(
        wallet.get_invoice_status("ph_paid").await,
        PaymentStatus::Paid
    );
    assert_eq!(
        wallet.get_invoice_status("ph_open").await,
        PaymentStatus::Unknown
    );
}

#[tokio::test]
async fn missing_key_fails_without_a_request() {
    init_logger();
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let wallet = LntxbotWallet::new(
        test_client(),
        &LntxbotSettings {
            api_endpoint: server.uri(),
            key: None,
        },
        false,
    );

    assert!(!wallet.create_invoice(10, None, None).await.ok());
    assert!(!wallet.pay_invoice("lnbc1pay").await.ok());
    assert_eq!(
        wallet.get_invoice_status("ph_1").await,
        PaymentStatus::Unknown
    );
    assert_eq!(wallet.settlement_mode(), SettlementMode::Unsupported);
}

#[tokio::test]
async fn poller_emits_settled_invoices_on_the_adapter_stream() {
    init_logger();
    let server = MockServer::start().await;
    mock_invoice_status(&server, "ph_paid", json!({ "preimage": "00ff" })).await;
    mock_invoice_status(&server, "ph_open", json!({})).await;

    let wallet = Arc::new(lntxbot_wallet(&server));
    assert_eq!(wallet.settlement_mode(), SettlementMode::Poll);
    let mut paid = wallet.paid_invoices_stream().await.unwrap();

    let poller = InvoicePoller::new(
        wallet.clone(),
        CancellationToken::new(),
        Duration::from_millis(50),
    );
    poller.track("ph_paid");
    poller.track("ph_open");

    assert_eq!(poller.poll_outstanding().await, 1);
    assert_eq!(poller.outstanding(), vec!["ph_open"]);
    assert_eq!(
        next_paid(&mut paid, Duration::from_secs(1)).await.as_deref(),
        Some("ph_paid")
    );
    assert_eq!(next_paid(&mut paid, Duration::from_millis(100)).await, None);
}

#[tokio::test]
async fn checking_ids_with_path_characters_never_reach_the_provider() {
    init_logger();
    let server = MockServer::start().await;
    Mock::given(any())
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "preimage": "00ff",
            "status": "complete"
        })))
        .expect(0)
        .mount(&server)
        .await;

    let wallet = lntxbot_wallet(&server);

    for checking_id in ["ph_1/../ph_2", "../addinvoice", "ph_1?wait=true"] {
        assert_eq!(
            wallet.get_invoice_status(checking_id).await,
            PaymentStatus::Unknown
        );
        assert_eq!(
            wallet.get_payment_status(checking_id).await,
            PaymentStatus::Unknown
        );
    }
}

#[tokio::test]
async fn stalled_provider_is_a_transport_failure() {
    init_logger();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "payment_hash": "ph_1",
                    "pay_req": "lnbc5u1ptip",
                    "preimage": "00ff",
                    "status": "complete"
                }))
                .set_delay(STALL),
        )
        .mount(&server)
        .await;

    let wallet = lntxbot_wallet_with(&server, impatient_client());

    let invoice = wallet.create_invoice(500, None, None).await;
    assert!(!invoice.ok());
    assert!(invoice
        .error_message()
        .is_some_and(|message| message.starts_with("transport error")));

    let payment = wallet.pay_invoice("lnbc1pay").await;
    assert!(!payment.ok());
    assert_eq!(payment.checking_id(), None);
    assert!(payment
        .error_message()
        .is_some_and(|message| message.starts_with("transport error")));

    assert_eq!(
        wallet.get_invoice_status("ph_1").await,
        PaymentStatus::Unknown
    );
    assert_eq!(
        wallet.get_payment_status("ph_1").await,
        PaymentStatus::Unknown
    );
}
