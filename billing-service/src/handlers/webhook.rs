//! Payment processor webhook endpoint.
//!
//! Responds 200 on acceptance (including unhandled event kinds and updates
//! for subscriptions this side has never seen), 400 when the signature or
//! payload fails verification, and 500 when processing fails so the sender
//! redelivers.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};
use service_core::error::AppError;

use crate::services::metrics::record_webhook_event;
use crate::services::webhook::WebhookError;
use crate::startup::AppState;

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

pub async fn processor_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("missing webhook signature header");
            AppError::BadRequest(anyhow::anyhow!("missing signature header"))
        })?;

    let event = match state.verifier.verify_and_parse(&body, signature) {
        Ok(event) => event,
        Err(e @ WebhookError::Signature(_)) => {
            tracing::warn!(error = %e, "rejected webhook delivery");
            record_webhook_event("unverified", "rejected");
            return Err(AppError::BadRequest(anyhow::anyhow!("{e}")));
        }
        Err(e @ WebhookError::Payload(_)) => {
            tracing::warn!(error = %e, "unparseable webhook payload");
            record_webhook_event("unparseable", "rejected");
            return Err(AppError::BadRequest(anyhow::anyhow!("{e}")));
        }
    };

    let event_type = event.kind.as_str().to_string();
    tracing::info!(event_id = %event.id, event_type = %event_type, "processing webhook event");

    if let Err(e) = state.processor.process(&event).await {
        tracing::error!(event_id = %event.id, error = %e, "webhook event processing failed");
        record_webhook_event(&event_type, "failed");
        // Everything past verification is a processing failure; answering
        // 5xx makes the sender redeliver, which the idempotent handlers
        // absorb.
        return Err(AppError::InternalError(anyhow::anyhow!(
            "failed to process event: {e}"
        )));
    }

    record_webhook_event(&event_type, "accepted");
    Ok(Json(json!({ "received": true })))
}
