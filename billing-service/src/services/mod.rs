//! Services module for billing-service.

pub mod bulk;
pub mod catalog;
pub mod collaborators;
pub mod database;
pub mod ledger;
pub mod metrics;
pub mod processor;
pub mod store;
pub mod webhook;

pub use bulk::BulkCoordinator;
pub use catalog::PlanCatalog;
pub use collaborators::{
    CollaboratorError, DraftOutcome, FetchOutcome, HttpCollaborators, SendOutcome,
    WorkspaceOperations,
};
pub use database::Database;
pub use ledger::UsageLedger;
pub use metrics::{get_metrics, init_metrics};
pub use processor::EventProcessor;
pub use store::{BulkOperationStore, SubscriptionStore, UsageStore};
pub use webhook::{WebhookError, WebhookVerifier};
