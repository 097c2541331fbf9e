//! Domain models for billing-service.

mod bulk;
mod event;
mod plan;
mod subscription;
mod tenant;
mod usage;

pub use bulk::{
    BulkOperation, BulkOperationKind, BulkOperationStatus, CreateBulkOperation, OperationSummary,
    TargetFailure, TargetOutcome,
};
pub use event::{
    CheckoutData, EventData, EventKind, InvoiceData, ProcessorEvent, SubscriptionData,
};
pub use plan::Plan;
pub use subscription::{
    Subscription, SubscriptionStatus, SubscriptionUpdate, UpsertSubscription,
};
pub use tenant::Tenant;
pub use usage::{
    MetricKind, NewUsageEvent, QuotaCheck, UsageEvent, UsagePeriod, UsageScope,
};
