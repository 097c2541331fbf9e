//! Usage event model.

use chrono::{DateTime, Datelike, Months, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A category of meterable usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Send,
    ApiCall,
    Storage,
    Fetch,
    Open,
    Click,
    Payment,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Send => "send",
            MetricKind::ApiCall => "api_call",
            MetricKind::Storage => "storage",
            MetricKind::Fetch => "fetch",
            MetricKind::Open => "open",
            MetricKind::Click => "click",
            MetricKind::Payment => "payment",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "send" => MetricKind::Send,
            "storage" => MetricKind::Storage,
            "fetch" => MetricKind::Fetch,
            "open" => MetricKind::Open,
            "click" => MetricKind::Click,
            "payment" => MetricKind::Payment,
            _ => MetricKind::ApiCall,
        }
    }

    /// The plan limit key that caps this metric, if any.
    pub fn limit_key(&self) -> Option<&'static str> {
        match self {
            MetricKind::Send => Some("max_newsletters_per_month"),
            MetricKind::ApiCall => Some("max_api_calls_per_month"),
            MetricKind::Storage => Some("max_storage_mb"),
            MetricKind::Fetch => Some("max_source_fetches_per_month"),
            MetricKind::Open | MetricKind::Click | MetricKind::Payment => None,
        }
    }
}

/// Append-only metered event. Never mutated after insert; corrections are
/// new compensating events.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UsageEvent {
    pub event_id: Uuid,
    pub tenant_id: Uuid,
    /// Absent for tenant-level audit entries such as payment records.
    pub workspace_id: Option<Uuid>,
    pub metric: String,
    pub value: i64,
    pub metadata: serde_json::Value,
    pub recorded_utc: DateTime<Utc>,
}

/// Input for appending a usage event.
#[derive(Debug, Clone)]
pub struct NewUsageEvent {
    pub tenant_id: Uuid,
    pub workspace_id: Option<Uuid>,
    pub metric: MetricKind,
    pub value: i64,
    pub metadata: serde_json::Value,
}

impl NewUsageEvent {
    /// A single-unit event with empty metadata.
    pub fn new(tenant_id: Uuid, workspace_id: Option<Uuid>, metric: MetricKind) -> Self {
        Self {
            tenant_id,
            workspace_id,
            metric,
            value: 1,
            metadata: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    pub fn with_value(mut self, value: i64) -> Self {
        self.value = value;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Aggregation scope for usage queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageScope {
    Tenant(Uuid),
    Workspace(Uuid),
}

/// Half-open aggregation window: `start <= t < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsagePeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl UsagePeriod {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The calendar month containing `at`.
    pub fn month_of(at: DateTime<Utc>) -> Self {
        let first = Utc
            .with_ymd_and_hms(at.year(), at.month(), 1, 0, 0, 0)
            .single()
            .expect("first of month is always a valid timestamp");
        Self {
            start: first,
            end: first + Months::new(1),
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

/// Result of a quota check. Reporting only; enforcement is the caller's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaCheck {
    pub would_exceed: bool,
    pub current: i64,
    pub cap: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn month_of_spans_the_calendar_month() {
        let at = Utc.with_ymd_and_hms(2025, 3, 17, 12, 30, 0).unwrap();
        let period = UsagePeriod::month_of(at);
        assert_eq!(period.start, Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap());
        assert_eq!(period.end, Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap());
        assert!(period.contains(at));
        assert!(!period.contains(period.end));
    }

    #[test]
    fn month_of_handles_december_rollover() {
        let at = Utc.with_ymd_and_hms(2025, 12, 31, 23, 59, 59).unwrap();
        let period = UsagePeriod::month_of(at);
        assert_eq!(period.end, Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
    }
}
