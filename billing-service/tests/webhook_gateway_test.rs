//! Webhook gateway integration tests for billing-service.

mod common;

use common::{checkout_event, subscription_updated_event, TestApp};
use serde_json::Value;

#[tokio::test]
async fn valid_checkout_event_is_accepted_and_creates_subscription() {
    let app = TestApp::spawn().await;
    app.store.insert_tenant("owner@example.com");

    let payload = checkout_event("owner@example.com", "sub_100", Some("price_pro_monthly"));
    let signature = app.signature_header(&payload);

    let response = app.post_webhook(&payload, &signature).await;
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["received"], true);

    let subscription = app.store.subscription("sub_100").expect("row created");
    assert_eq!(subscription.status, "active");
    assert_eq!(subscription.plan_id, "pro");
}

#[tokio::test]
async fn tampered_signature_is_rejected_without_writes() {
    let app = TestApp::spawn().await;
    app.store.insert_tenant("owner@example.com");

    let payload = checkout_event("owner@example.com", "sub_101", Some("price_pro_monthly"));
    let mut signature = app.signature_header(&payload);
    // Flip the last hex digit of the signature.
    let flipped = if signature.ends_with('0') { "1" } else { "0" };
    signature.truncate(signature.len() - 1);
    signature.push_str(flipped);

    let response = app.post_webhook(&payload, &signature).await;
    assert_eq!(response.status(), 400);

    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().is_some());

    assert_eq!(app.store.subscription_count(), 0);
    assert!(app.store.usage_events().is_empty());
}

#[tokio::test]
async fn missing_signature_header_is_rejected() {
    let app = TestApp::spawn().await;

    let payload = checkout_event("owner@example.com", "sub_102", None);
    let response = app
        .client
        .post(format!("{}/webhooks/stripe", app.address))
        .body(payload)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn unknown_event_kind_is_accepted_and_ignored() {
    let app = TestApp::spawn().await;

    let payload = serde_json::json!({
        "id": "evt_unknown",
        "type": "customer.tax_id.created",
        "created": chrono::Utc::now().timestamp(),
        "data": { "object": { "id": "txi_001" } }
    })
    .to_string()
    .into_bytes();
    let signature = app.signature_header(&payload);

    let response = app.post_webhook(&payload, &signature).await;
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["received"], true);
    assert_eq!(app.store.subscription_count(), 0);
}

#[tokio::test]
async fn update_for_unknown_subscription_is_accepted_without_creating_rows() {
    let app = TestApp::spawn().await;

    let payload =
        subscription_updated_event("sub_never_seen", "active", 1_700_000_000, 1_702_592_000, None);
    let signature = app.signature_header(&payload);

    let response = app.post_webhook(&payload, &signature).await;
    assert_eq!(response.status(), 200);
    assert_eq!(app.store.subscription_count(), 0);
}

#[tokio::test]
async fn checkout_for_unknown_tenant_is_a_processing_error() {
    let app = TestApp::spawn().await;

    let payload = checkout_event("nobody@example.com", "sub_103", Some("price_pro_monthly"));
    let signature = app.signature_header(&payload);

    let response = app.post_webhook(&payload, &signature).await;
    assert_eq!(response.status(), 500);
    assert_eq!(app.store.subscription_count(), 0);
}

#[tokio::test]
async fn malformed_payload_is_rejected() {
    let app = TestApp::spawn().await;

    let payload = b"{\"not\": \"an event\"".to_vec();
    let signature = app.signature_header(&payload);

    let response = app.post_webhook(&payload, &signature).await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .get(format!("{}/health", app.address))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["service"], "billing-service");
}
