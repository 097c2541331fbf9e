//! Webhook verification and payload parsing.
//!
//! The payment processor signs each delivery with
//! `Stripe-Signature: t=<unix>,v1=<hex hmac>` where the HMAC-SHA256 covers
//! `"{t}.{body}"`. Verification failures reject the delivery outright; the
//! sender retries on its own schedule.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{
    CheckoutData, EventData, EventKind, InvoiceData, ProcessorEvent, SubscriptionData,
};

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted clock skew between the signature timestamp and now.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("signature verification failed: {0}")]
    Signature(String),
    #[error("invalid payload: {0}")]
    Payload(String),
}

/// Verifies webhook authenticity and parses payloads into typed events.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Verify the signature header against the raw payload, then parse the
    /// payload into a typed event.
    pub fn verify_and_parse(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<ProcessorEvent, WebhookError> {
        self.verify_signature(payload, signature)?;
        parse_event(payload)
    }

    /// Compute the hex signature for a timestamp and payload. Exposed so
    /// callers (and tests) can construct valid signature headers.
    pub fn sign(&self, timestamp: i64, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    fn verify_signature(&self, payload: &[u8], signature: &str) -> Result<(), WebhookError> {
        let mut timestamp: Option<&str> = None;
        let mut sig_v1: Option<&str> = None;

        for part in signature.split(',') {
            if let Some((key, value)) = part.trim().split_once('=') {
                match key {
                    "t" => timestamp = Some(value),
                    "v1" => sig_v1 = Some(value),
                    _ => {}
                }
            }
        }

        let timestamp = timestamp
            .ok_or_else(|| WebhookError::Signature("missing timestamp".to_string()))?;
        let sig_v1 =
            sig_v1.ok_or_else(|| WebhookError::Signature("missing v1 signature".to_string()))?;

        let ts: i64 = timestamp
            .parse()
            .map_err(|_| WebhookError::Signature("invalid timestamp format".to_string()))?;

        let expected = self.sign(ts, payload);
        let matches: bool = expected.as_bytes().ct_eq(sig_v1.as_bytes()).into();
        if !matches {
            warn!("webhook signature mismatch");
            return Err(WebhookError::Signature(
                "signature mismatch".to_string(),
            ));
        }

        let now = Utc::now().timestamp();
        if (now - ts).abs() > SIGNATURE_TOLERANCE_SECS {
            warn!(timestamp = ts, now = now, "webhook timestamp outside tolerance");
            return Err(WebhookError::Signature("timestamp too old".to_string()));
        }

        Ok(())
    }
}

/// Parse a raw webhook body into a typed event.
fn parse_event(payload: &[u8]) -> Result<ProcessorEvent, WebhookError> {
    let raw: RawEvent =
        serde_json::from_slice(payload).map_err(|e| WebhookError::Payload(e.to_string()))?;

    debug!(event_id = %raw.id, event_type = %raw.event_type, "parsed webhook event");

    let kind = EventKind::from(raw.event_type.as_str());
    let data = parse_event_data(&kind, raw.data.object)?;

    Ok(ProcessorEvent {
        id: raw.id,
        kind,
        data,
        created: raw.created,
    })
}

fn parse_event_data(kind: &EventKind, object: serde_json::Value) -> Result<EventData, WebhookError> {
    match kind {
        EventKind::CheckoutCompleted => {
            let session: RawCheckoutSession = serde_json::from_value(object)
                .map_err(|e| WebhookError::Payload(e.to_string()))?;
            let customer_email = session
                .customer_email
                .or(session.customer_details.and_then(|d| d.email));
            Ok(EventData::Checkout(CheckoutData {
                session_id: session.id,
                customer_email,
                subscription_id: session.subscription,
                price_id: session.metadata.and_then(|m| m.price_id),
            }))
        }
        EventKind::SubscriptionCreated
        | EventKind::SubscriptionUpdated
        | EventKind::SubscriptionDeleted => {
            let sub: RawSubscription = serde_json::from_value(object)
                .map_err(|e| WebhookError::Payload(e.to_string()))?;
            Ok(EventData::Subscription(SubscriptionData {
                subscription_id: sub.id,
                status: sub.status,
                period_start: timestamp(sub.current_period_start)?,
                period_end: timestamp(sub.current_period_end)?,
                trial_end: sub.trial_end.map(timestamp).transpose()?,
                price_id: sub
                    .items
                    .and_then(|items| items.data.into_iter().next())
                    .and_then(|item| item.price)
                    .map(|price| price.id),
            }))
        }
        EventKind::PaymentSucceeded | EventKind::PaymentFailed => {
            let inv: RawInvoice = serde_json::from_value(object)
                .map_err(|e| WebhookError::Payload(e.to_string()))?;
            Ok(EventData::Invoice(InvoiceData {
                invoice_id: inv.id,
                subscription_id: inv.subscription,
                amount_cents: inv.amount_due,
                currency: inv.currency,
            }))
        }
        EventKind::Unknown(_) => Ok(EventData::Raw(object)),
    }
}

fn timestamp(unix: i64) -> Result<DateTime<Utc>, WebhookError> {
    DateTime::<Utc>::from_timestamp(unix, 0)
        .ok_or_else(|| WebhookError::Payload(format!("timestamp out of range: {unix}")))
}

// Raw wire shapes for parsing.

#[derive(Debug, Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: RawEventData,
    created: i64,
}

#[derive(Debug, Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RawCheckoutSession {
    id: String,
    customer_email: Option<String>,
    customer_details: Option<RawCustomerDetails>,
    subscription: Option<String>,
    metadata: Option<RawCheckoutMetadata>,
}

#[derive(Debug, Deserialize)]
struct RawCustomerDetails {
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCheckoutMetadata {
    price_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSubscription {
    id: String,
    status: String,
    current_period_start: i64,
    current_period_end: i64,
    trial_end: Option<i64>,
    items: Option<RawSubscriptionItems>,
}

#[derive(Debug, Deserialize)]
struct RawSubscriptionItems {
    data: Vec<RawSubscriptionItem>,
}

#[derive(Debug, Deserialize)]
struct RawSubscriptionItem {
    price: Option<RawPrice>,
}

#[derive(Debug, Deserialize)]
struct RawPrice {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RawInvoice {
    id: String,
    subscription: Option<String>,
    amount_due: i64,
    currency: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new("whsec_test_secret")
    }

    fn signed_header(verifier: &WebhookVerifier, payload: &[u8]) -> String {
        let ts = Utc::now().timestamp();
        format!("t={},v1={}", ts, verifier.sign(ts, payload))
    }

    fn subscription_event(event_type: &str) -> Vec<u8> {
        json!({
            "id": "evt_001",
            "type": event_type,
            "created": 1_700_000_000,
            "data": {
                "object": {
                    "id": "sub_001",
                    "status": "active",
                    "current_period_start": 1_700_000_000,
                    "current_period_end": 1_702_592_000,
                    "trial_end": null,
                    "items": { "data": [ { "price": { "id": "price_pro_monthly" } } ] }
                }
            }
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn accepts_valid_signature() {
        let v = verifier();
        let payload = subscription_event("customer.subscription.updated");
        let header = signed_header(&v, &payload);

        let event = v.verify_and_parse(&payload, &header).unwrap();
        assert_eq!(event.kind, EventKind::SubscriptionUpdated);
        match event.data {
            EventData::Subscription(data) => {
                assert_eq!(data.subscription_id, "sub_001");
                assert_eq!(data.price_id.as_deref(), Some("price_pro_monthly"));
            }
            other => panic!("unexpected data: {other:?}"),
        }
    }

    #[test]
    fn rejects_tampered_payload() {
        let v = verifier();
        let payload = subscription_event("customer.subscription.updated");
        let header = signed_header(&v, &payload);

        let mut tampered = payload.clone();
        let at = tampered.len() - 10;
        tampered[at] ^= 0x01;

        let err = v.verify_and_parse(&tampered, &header).unwrap_err();
        assert!(matches!(err, WebhookError::Signature(_)));
    }

    #[test]
    fn rejects_missing_signature_parts() {
        let v = verifier();
        let payload = subscription_event("customer.subscription.updated");
        assert!(matches!(
            v.verify_and_parse(&payload, "v1=deadbeef").unwrap_err(),
            WebhookError::Signature(_)
        ));
        assert!(matches!(
            v.verify_and_parse(&payload, "t=1700000000").unwrap_err(),
            WebhookError::Signature(_)
        ));
    }

    #[test]
    fn rejects_stale_timestamp() {
        let v = verifier();
        let payload = subscription_event("customer.subscription.updated");
        let stale = Utc::now().timestamp() - SIGNATURE_TOLERANCE_SECS - 60;
        let header = format!("t={},v1={}", stale, v.sign(stale, &payload));

        let err = v.verify_and_parse(&payload, &header).unwrap_err();
        assert!(matches!(err, WebhookError::Signature(_)));
    }

    #[test]
    fn parses_checkout_session_with_fallback_email() {
        let v = verifier();
        let payload = json!({
            "id": "evt_002",
            "type": "checkout.session.completed",
            "created": 1_700_000_000,
            "data": {
                "object": {
                    "id": "cs_001",
                    "customer_email": null,
                    "customer_details": { "email": "owner@example.com" },
                    "subscription": "sub_002",
                    "metadata": { "price_id": "price_agency_monthly" }
                }
            }
        })
        .to_string()
        .into_bytes();
        let header = signed_header(&v, &payload);

        let event = v.verify_and_parse(&payload, &header).unwrap();
        match event.data {
            EventData::Checkout(data) => {
                assert_eq!(data.customer_email.as_deref(), Some("owner@example.com"));
                assert_eq!(data.subscription_id.as_deref(), Some("sub_002"));
                assert_eq!(data.price_id.as_deref(), Some("price_agency_monthly"));
            }
            other => panic!("unexpected data: {other:?}"),
        }
    }

    #[test]
    fn unknown_event_kinds_parse_as_raw() {
        let v = verifier();
        let payload = json!({
            "id": "evt_003",
            "type": "customer.tax_id.created",
            "created": 1_700_000_000,
            "data": { "object": { "id": "txi_001" } }
        })
        .to_string()
        .into_bytes();
        let header = signed_header(&v, &payload);

        let event = v.verify_and_parse(&payload, &header).unwrap();
        assert_eq!(
            event.kind,
            EventKind::Unknown("customer.tax_id.created".to_string())
        );
        assert!(matches!(event.data, EventData::Raw(_)));
    }

    #[test]
    fn malformed_json_is_a_payload_error() {
        let v = verifier();
        let payload = b"not json at all".to_vec();
        let header = signed_header(&v, &payload);

        let err = v.verify_and_parse(&payload, &header).unwrap_err();
        assert!(matches!(err, WebhookError::Payload(_)));
    }
}
