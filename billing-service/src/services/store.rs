//! Storage capability traits.
//!
//! All persisted coordination goes through these seams; the Postgres
//! [`Database`](crate::services::Database) implements them in production and
//! tests substitute in-memory doubles.

use async_trait::async_trait;
use service_core::error::AppError;
use uuid::Uuid;

use crate::models::{
    BulkOperation, CreateBulkOperation, NewUsageEvent, Subscription, SubscriptionUpdate,
    TargetOutcome, Tenant, UpsertSubscription, UsageEvent, UsagePeriod, UsageScope,
};
use crate::models::MetricKind;

/// Subscription state store. The upsert is the system's only required
/// atomicity guarantee: a single conditional write keyed by the unique
/// processor subscription id.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn tenant_by_email(&self, email: &str) -> Result<Option<Tenant>, AppError>;

    /// Insert-or-update keyed by processor subscription id, touching only
    /// the fields checkout-completed owns. Safe under concurrent redelivery.
    async fn upsert_from_checkout(
        &self,
        input: &UpsertSubscription,
    ) -> Result<Subscription, AppError>;

    /// Apply a subscription-updated event. `None` when no row matches the
    /// processor subscription id (the caller logs and ignores).
    async fn apply_update(
        &self,
        processor_subscription_id: &str,
        update: &SubscriptionUpdate,
    ) -> Result<Option<Subscription>, AppError>;

    /// Set status to canceled. `None` when no row matches.
    async fn mark_canceled(
        &self,
        processor_subscription_id: &str,
    ) -> Result<Option<Subscription>, AppError>;

    async fn find_by_processor_id(
        &self,
        processor_subscription_id: &str,
    ) -> Result<Option<Subscription>, AppError>;

    async fn subscription_for_tenant(
        &self,
        tenant_id: Uuid,
    ) -> Result<Option<Subscription>, AppError>;
}

/// Append-only usage event log with read-time aggregation.
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn append(&self, event: &NewUsageEvent) -> Result<UsageEvent, AppError>;

    async fn total_for(
        &self,
        scope: UsageScope,
        metric: MetricKind,
        period: &UsagePeriod,
    ) -> Result<i64, AppError>;
}

/// Bulk operation store. Per-target writes touch only their own key in the
/// progress map; aggregate counters are settled in the completion pass.
#[async_trait]
pub trait BulkOperationStore: Send + Sync {
    async fn create(&self, input: &CreateBulkOperation) -> Result<BulkOperation, AppError>;

    async fn mark_running(&self, operation_id: Uuid) -> Result<(), AppError>;

    /// Terminal state for operations that could not start.
    async fn mark_failed(&self, operation_id: Uuid, error: &str) -> Result<(), AppError>;

    /// Overwrite-by-key write of one target's outcome.
    async fn record_target_outcome(
        &self,
        operation_id: Uuid,
        workspace_id: Uuid,
        outcome: &TargetOutcome,
    ) -> Result<(), AppError>;

    /// Settle counters from the progress map and mark the operation
    /// completed.
    async fn mark_completed(&self, operation_id: Uuid) -> Result<BulkOperation, AppError>;

    async fn get(&self, operation_id: Uuid) -> Result<Option<BulkOperation>, AppError>;
}
