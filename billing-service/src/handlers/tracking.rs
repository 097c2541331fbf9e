//! Engagement tracking endpoints.
//!
//! The open pixel and click redirect are embedded into outgoing
//! newsletters. Both record an analytics usage event; neither lets a ledger
//! failure break the pixel or the redirect.

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Redirect};
use serde::Deserialize;
use serde_json::json;
use service_core::error::AppError;
use uuid::Uuid;

use crate::models::{MetricKind, NewUsageEvent};
use crate::startup::AppState;

/// A transparent 1x1 GIF.
const PIXEL_GIF: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xFF, 0xFF, 0xFF, 0x21, 0xF9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2C, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3B,
];

#[derive(Debug, Deserialize)]
pub struct TrackingParams {
    pub tenant: Uuid,
    pub workspace: Uuid,
    pub draft: Option<String>,
    pub url: Option<String>,
}

/// `GET /track/open` - record an open event and serve the pixel.
pub async fn track_open(
    State(state): State<AppState>,
    Query(params): Query<TrackingParams>,
) -> impl IntoResponse {
    state
        .ledger
        .record(
            NewUsageEvent::new(params.tenant, Some(params.workspace), MetricKind::Open)
                .with_metadata(json!({ "draft": params.draft })),
        )
        .await;

    ([(header::CONTENT_TYPE, "image/gif")], PIXEL_GIF)
}

/// `GET /track/click` - record a click event and redirect to the target.
pub async fn track_click(
    State(state): State<AppState>,
    Query(params): Query<TrackingParams>,
) -> Result<Redirect, AppError> {
    let url = params
        .url
        .as_deref()
        .filter(|url| !url.is_empty())
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("missing redirect url")))?;

    state
        .ledger
        .record(
            NewUsageEvent::new(params.tenant, Some(params.workspace), MetricKind::Click)
                .with_metadata(json!({ "draft": params.draft, "url": url })),
        )
        .await;

    Ok(Redirect::temporary(url))
}
