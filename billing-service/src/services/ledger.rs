//! Usage ledger.
//!
//! Records metered events and answers aggregate queries. Recording never
//! fails the caller's primary operation: billing accuracy must not block
//! the action that generates value.

use std::sync::Arc;

use chrono::Utc;
use service_core::error::AppError;
use tracing::warn;
use uuid::Uuid;

use crate::models::{
    MetricKind, NewUsageEvent, Plan, QuotaCheck, UsagePeriod, UsageScope,
};
use crate::services::metrics::record_usage_event;
use crate::services::store::UsageStore;

#[derive(Clone)]
pub struct UsageLedger {
    store: Arc<dyn UsageStore>,
}

impl UsageLedger {
    pub fn new(store: Arc<dyn UsageStore>) -> Self {
        Self { store }
    }

    /// Append one usage event. A storage failure is logged and swallowed;
    /// the caller's operation proceeds regardless.
    pub async fn record(&self, event: NewUsageEvent) {
        let metric = event.metric;
        match self.store.append(&event).await {
            Ok(_) => record_usage_event(metric.as_str()),
            Err(e) => {
                warn!(
                    tenant_id = %event.tenant_id,
                    metric = metric.as_str(),
                    error = %e,
                    "failed to record usage event, continuing"
                );
            }
        }
    }

    /// Sum of event values for a tenant or workspace over a period.
    pub async fn usage_for(
        &self,
        scope: UsageScope,
        metric: MetricKind,
        period: &UsagePeriod,
    ) -> Result<i64, AppError> {
        self.store.total_for(scope, metric, period).await
    }

    /// Compare current-month usage plus a prospective increment against the
    /// plan's cap for the metric. Reporting only; callers decide whether to
    /// refuse the action.
    pub async fn would_exceed(
        &self,
        workspace_id: Uuid,
        metric: MetricKind,
        value: i64,
        plan: &Plan,
    ) -> Result<QuotaCheck, AppError> {
        let period = UsagePeriod::month_of(Utc::now());
        let current = self
            .usage_for(UsageScope::Workspace(workspace_id), metric, &period)
            .await?;
        let cap = plan.cap_for(metric);
        Ok(QuotaCheck {
            would_exceed: cap.map(|cap| current + value > cap).unwrap_or(false),
            current,
            cap,
        })
    }
}
