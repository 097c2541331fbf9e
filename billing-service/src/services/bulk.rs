//! Bulk operation coordinator.
//!
//! Fans one administrative action out across target workspaces with bounded
//! concurrency. Failures are isolated per target: one workspace failing
//! never aborts the rest, and the operation completes once every target has
//! been attempted.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde_json::json;
use service_core::error::AppError;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::models::{
    BulkOperation, BulkOperationKind, CreateBulkOperation, MetricKind, NewUsageEvent, Plan,
    TargetOutcome,
};
use crate::services::catalog::PlanCatalog;
use crate::services::collaborators::WorkspaceOperations;
use crate::services::ledger::UsageLedger;
use crate::services::metrics::{record_bulk_operation, record_bulk_target};
use crate::services::store::{BulkOperationStore, SubscriptionStore};

pub struct BulkCoordinator {
    operations: Arc<dyn BulkOperationStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
    ledger: UsageLedger,
    catalog: Arc<PlanCatalog>,
    collaborators: Arc<dyn WorkspaceOperations>,
    worker_limit: usize,
}

impl BulkCoordinator {
    pub fn new(
        operations: Arc<dyn BulkOperationStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
        ledger: UsageLedger,
        catalog: Arc<PlanCatalog>,
        collaborators: Arc<dyn WorkspaceOperations>,
        worker_limit: usize,
    ) -> Self {
        Self {
            operations,
            subscriptions,
            ledger,
            catalog,
            collaborators,
            worker_limit: worker_limit.max(1),
        }
    }

    /// Create and drain a bulk operation.
    ///
    /// Returns the operation row in its terminal state. An error here means
    /// the operation could not be created or its state could not be
    /// persisted; per-target failures are recorded inside the row instead.
    #[instrument(skip(self, input), fields(kind = input.kind.as_str(), targets = input.target_workspaces.len()))]
    pub async fn run(&self, input: CreateBulkOperation) -> Result<BulkOperation, AppError> {
        if input.target_workspaces.is_empty() {
            let operation = self.operations.create(&input).await?;
            self.operations
                .mark_failed(operation.operation_id, "target workspace list is empty")
                .await?;
            warn!(operation_id = %operation.operation_id, "bulk operation has no targets");
            record_bulk_operation(input.kind.as_str(), "failed");
            return self.reload(operation.operation_id).await;
        }

        let operation = self.operations.create(&input).await?;
        self.operations.mark_running(operation.operation_id).await?;
        info!(
            operation_id = %operation.operation_id,
            kind = input.kind.as_str(),
            targets = input.target_workspaces.len(),
            "bulk operation running"
        );

        let plan = self.plan_for_creator(input.created_by).await;

        stream::iter(operation.target_workspaces.clone())
            .for_each_concurrent(self.worker_limit, |workspace_id| {
                let plan = plan.clone();
                async move {
                    let outcome = self
                        .process_target(input.kind, workspace_id, input.created_by, &plan)
                        .await;
                    record_bulk_target(
                        input.kind.as_str(),
                        if outcome.is_succeeded() { "succeeded" } else { "failed" },
                    );
                    if let Err(e) = self
                        .operations
                        .record_target_outcome(operation.operation_id, workspace_id, &outcome)
                        .await
                    {
                        error!(
                            operation_id = %operation.operation_id,
                            workspace_id = %workspace_id,
                            error = %e,
                            "failed to persist target outcome"
                        );
                    }
                }
            })
            .await;

        let completed = self.operations.mark_completed(operation.operation_id).await?;
        let summary = completed.summary();
        info!(
            operation_id = %completed.operation_id,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "bulk operation completed"
        );
        record_bulk_operation(input.kind.as_str(), "completed");
        Ok(completed)
    }

    async fn process_target(
        &self,
        kind: BulkOperationKind,
        workspace_id: Uuid,
        created_by: Uuid,
        plan: &Plan,
    ) -> TargetOutcome {
        if kind == BulkOperationKind::Send {
            match self
                .ledger
                .would_exceed(workspace_id, MetricKind::Send, 1, plan)
                .await
            {
                Ok(quota) if quota.would_exceed => {
                    return TargetOutcome::failed(format!(
                        "send quota exceeded: {} of {} used this period",
                        quota.current,
                        quota.cap.unwrap_or_default()
                    ));
                }
                Ok(_) => {}
                Err(e) => {
                    // Quota reads are advisory; a ledger outage must not
                    // block the send path.
                    warn!(workspace_id = %workspace_id, error = %e, "quota check failed, proceeding");
                }
            }
        }

        match kind {
            BulkOperationKind::Fetch => match self.collaborators.fetch_sources(workspace_id).await
            {
                Ok(outcome) => {
                    TargetOutcome::succeeded(format!("{} items fetched", outcome.items_fetched))
                }
                Err(e) => TargetOutcome::failed(e.to_string()),
            },
            BulkOperationKind::Generate => {
                match self.collaborators.generate_draft(workspace_id).await {
                    Ok(outcome) if outcome.draft_generated => TargetOutcome::succeeded(format!(
                        "draft generated ({} chars)",
                        outcome.length.unwrap_or_default()
                    )),
                    Ok(_) => TargetOutcome::succeeded("no content available, draft skipped"),
                    Err(e) => TargetOutcome::failed(e.to_string()),
                }
            }
            BulkOperationKind::Send => {
                match self.collaborators.send_newsletter(workspace_id).await {
                    Ok(outcome) => {
                        self.ledger
                            .record(
                                NewUsageEvent::new(
                                    created_by,
                                    Some(workspace_id),
                                    MetricKind::Send,
                                )
                                .with_metadata(json!({ "recipient": outcome.recipient })),
                            )
                            .await;
                        TargetOutcome::succeeded(format!("sent to {}", outcome.recipient))
                    }
                    Err(e) => TargetOutcome::failed(e.to_string()),
                }
            }
        }
    }

    /// The plan governing the creator's quota, falling back to the catalog
    /// default when no subscription or plan row resolves.
    async fn plan_for_creator(&self, created_by: Uuid) -> Plan {
        let plan_id = match self.subscriptions.subscription_for_tenant(created_by).await {
            Ok(Some(subscription)) => subscription.plan_id,
            Ok(None) => self.catalog.default_plan_id().to_string(),
            Err(e) => {
                warn!(tenant_id = %created_by, error = %e, "subscription lookup failed, using default plan");
                self.catalog.default_plan_id().to_string()
            }
        };
        self.catalog
            .lookup(&plan_id)
            .or_else(|| self.catalog.default_plan())
            .cloned()
            .unwrap_or_else(crate::services::catalog::fallback_plan)
    }

    async fn reload(&self, operation_id: Uuid) -> Result<BulkOperation, AppError> {
        self.operations
            .get(operation_id)
            .await?
            .ok_or_else(|| AppError::InternalError(anyhow::anyhow!("bulk operation disappeared")))
    }
}
