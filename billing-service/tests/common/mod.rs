//! Test helper module for billing-service integration tests.
//!
//! Provides in-memory store doubles and an app spawner so the HTTP surface
//! and the domain services can be exercised without external dependencies.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use billing_service::models::{
    BulkOperation, BulkOperationStatus, CreateBulkOperation, MetricKind, NewUsageEvent, Plan,
    Subscription, SubscriptionUpdate, TargetOutcome, Tenant, UpsertSubscription, UsageEvent,
    UsagePeriod, UsageScope,
};
use billing_service::services::collaborators::{
    CollaboratorError, DraftOutcome, FetchOutcome, SendOutcome, WorkspaceOperations,
};
use billing_service::services::store::{BulkOperationStore, SubscriptionStore, UsageStore};
use billing_service::services::{
    init_metrics, EventProcessor, PlanCatalog, UsageLedger, WebhookVerifier,
};
use billing_service::startup::{build_router, AppState, HealthState};
use service_core::error::AppError;

pub const TEST_WEBHOOK_SECRET: &str = "whsec_test_secret";

/// In-memory implementation of all three store traits.
#[derive(Default)]
pub struct InMemoryStore {
    tenants: Mutex<Vec<Tenant>>,
    /// Keyed by processor subscription id, mirroring the unique index.
    subscriptions: Mutex<HashMap<String, Subscription>>,
    usage: Mutex<Vec<UsageEvent>>,
    operations: Mutex<HashMap<Uuid, BulkOperation>>,
    fail_usage_appends: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_tenant(&self, email: &str) -> Tenant {
        let tenant = Tenant {
            tenant_id: Uuid::new_v4(),
            email: email.to_string(),
            display_name: email.split('@').next().unwrap_or_default().to_string(),
            created_utc: Utc::now(),
        };
        self.tenants.lock().unwrap().push(tenant.clone());
        tenant
    }

    pub fn insert_subscription(&self, subscription: Subscription) {
        self.subscriptions
            .lock()
            .unwrap()
            .insert(subscription.processor_subscription_id.clone(), subscription);
    }

    pub fn subscription(&self, processor_subscription_id: &str) -> Option<Subscription> {
        self.subscriptions
            .lock()
            .unwrap()
            .get(processor_subscription_id)
            .cloned()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().unwrap().len()
    }

    pub fn usage_events(&self) -> Vec<UsageEvent> {
        self.usage.lock().unwrap().clone()
    }

    pub fn usage_events_for_metric(&self, metric: MetricKind) -> Vec<UsageEvent> {
        self.usage
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.metric == metric.as_str())
            .cloned()
            .collect()
    }

    /// Make every subsequent usage append fail, to exercise the ledger's
    /// swallow-and-log contract.
    pub fn fail_usage_appends(&self) {
        self.fail_usage_appends.store(true, Ordering::SeqCst);
    }

    /// Backdate a recorded usage event, for period-window tests.
    pub fn backdate_usage_event(&self, event_id: Uuid, to: chrono::DateTime<Utc>) {
        let mut usage = self.usage.lock().unwrap();
        if let Some(event) = usage.iter_mut().find(|event| event.event_id == event_id) {
            event.recorded_utc = to;
        }
    }
}

#[async_trait]
impl SubscriptionStore for InMemoryStore {
    async fn tenant_by_email(&self, email: &str) -> Result<Option<Tenant>, AppError> {
        Ok(self
            .tenants
            .lock()
            .unwrap()
            .iter()
            .find(|tenant| tenant.email == email)
            .cloned())
    }

    async fn upsert_from_checkout(
        &self,
        input: &UpsertSubscription,
    ) -> Result<Subscription, AppError> {
        let mut subscriptions = self.subscriptions.lock().unwrap();
        let subscription = subscriptions
            .entry(input.processor_subscription_id.clone())
            .and_modify(|existing| {
                existing.tenant_id = input.tenant_id;
                existing.plan_id = input.plan_id.clone();
                existing.status = input.status.as_str().to_string();
            })
            .or_insert_with(|| Subscription {
                subscription_id: Uuid::new_v4(),
                tenant_id: input.tenant_id,
                plan_id: input.plan_id.clone(),
                processor_subscription_id: input.processor_subscription_id.clone(),
                status: input.status.as_str().to_string(),
                current_period_start: None,
                current_period_end: None,
                trial_end: None,
                created_utc: Utc::now(),
            });
        Ok(subscription.clone())
    }

    async fn apply_update(
        &self,
        processor_subscription_id: &str,
        update: &SubscriptionUpdate,
    ) -> Result<Option<Subscription>, AppError> {
        let mut subscriptions = self.subscriptions.lock().unwrap();
        Ok(subscriptions
            .get_mut(processor_subscription_id)
            .map(|subscription| {
                subscription.status = update.status.as_str().to_string();
                subscription.current_period_start = Some(update.current_period_start);
                subscription.current_period_end = Some(update.current_period_end);
                subscription.trial_end = update.trial_end;
                subscription.clone()
            }))
    }

    async fn mark_canceled(
        &self,
        processor_subscription_id: &str,
    ) -> Result<Option<Subscription>, AppError> {
        let mut subscriptions = self.subscriptions.lock().unwrap();
        Ok(subscriptions
            .get_mut(processor_subscription_id)
            .map(|subscription| {
                subscription.status = "canceled".to_string();
                subscription.clone()
            }))
    }

    async fn find_by_processor_id(
        &self,
        processor_subscription_id: &str,
    ) -> Result<Option<Subscription>, AppError> {
        Ok(self.subscription(processor_subscription_id))
    }

    async fn subscription_for_tenant(
        &self,
        tenant_id: Uuid,
    ) -> Result<Option<Subscription>, AppError> {
        Ok(self
            .subscriptions
            .lock()
            .unwrap()
            .values()
            .find(|subscription| subscription.tenant_id == tenant_id)
            .cloned())
    }
}

#[async_trait]
impl UsageStore for InMemoryStore {
    async fn append(&self, event: &NewUsageEvent) -> Result<UsageEvent, AppError> {
        if self.fail_usage_appends.load(Ordering::SeqCst) {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "usage store unavailable"
            )));
        }
        let row = UsageEvent {
            event_id: Uuid::new_v4(),
            tenant_id: event.tenant_id,
            workspace_id: event.workspace_id,
            metric: event.metric.as_str().to_string(),
            value: event.value,
            metadata: event.metadata.clone(),
            recorded_utc: Utc::now(),
        };
        self.usage.lock().unwrap().push(row.clone());
        Ok(row)
    }

    async fn total_for(
        &self,
        scope: UsageScope,
        metric: MetricKind,
        period: &UsagePeriod,
    ) -> Result<i64, AppError> {
        Ok(self
            .usage
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.metric == metric.as_str())
            .filter(|event| period.contains(event.recorded_utc))
            .filter(|event| match scope {
                UsageScope::Tenant(tenant_id) => event.tenant_id == tenant_id,
                UsageScope::Workspace(workspace_id) => event.workspace_id == Some(workspace_id),
            })
            .map(|event| event.value)
            .sum())
    }
}

#[async_trait]
impl BulkOperationStore for InMemoryStore {
    async fn create(&self, input: &CreateBulkOperation) -> Result<BulkOperation, AppError> {
        let operation = BulkOperation {
            operation_id: Uuid::new_v4(),
            workspace_id: input.workspace_id,
            kind: input.kind.as_str().to_string(),
            target_workspaces: input.target_workspaces.clone(),
            status: BulkOperationStatus::Pending.as_str().to_string(),
            progress: BTreeMap::new(),
            succeeded_count: 0,
            failed_count: 0,
            error_message: None,
            created_by: input.created_by,
            created_utc: Utc::now(),
            started_utc: None,
            completed_utc: None,
        };
        self.operations
            .lock()
            .unwrap()
            .insert(operation.operation_id, operation.clone());
        Ok(operation)
    }

    async fn mark_running(&self, operation_id: Uuid) -> Result<(), AppError> {
        let mut operations = self.operations.lock().unwrap();
        if let Some(operation) = operations.get_mut(&operation_id) {
            operation.status = BulkOperationStatus::Running.as_str().to_string();
            operation.started_utc = Some(Utc::now());
        }
        Ok(())
    }

    async fn mark_failed(&self, operation_id: Uuid, error: &str) -> Result<(), AppError> {
        let mut operations = self.operations.lock().unwrap();
        if let Some(operation) = operations.get_mut(&operation_id) {
            operation.status = BulkOperationStatus::Failed.as_str().to_string();
            operation.error_message = Some(error.to_string());
            operation.completed_utc = Some(Utc::now());
        }
        Ok(())
    }

    async fn record_target_outcome(
        &self,
        operation_id: Uuid,
        workspace_id: Uuid,
        outcome: &TargetOutcome,
    ) -> Result<(), AppError> {
        let mut operations = self.operations.lock().unwrap();
        if let Some(operation) = operations.get_mut(&operation_id) {
            operation.progress.insert(workspace_id, outcome.clone());
        }
        Ok(())
    }

    async fn mark_completed(&self, operation_id: Uuid) -> Result<BulkOperation, AppError> {
        let mut operations = self.operations.lock().unwrap();
        let operation = operations
            .get_mut(&operation_id)
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Bulk operation not found")))?;
        operation.status = BulkOperationStatus::Completed.as_str().to_string();
        operation.completed_utc = Some(Utc::now());
        operation.succeeded_count = operation
            .progress
            .values()
            .filter(|outcome| outcome.is_succeeded())
            .count() as i32;
        operation.failed_count = operation
            .progress
            .values()
            .filter(|outcome| outcome.is_failed())
            .count() as i32;
        Ok(operation.clone())
    }

    async fn get(&self, operation_id: Uuid) -> Result<Option<BulkOperation>, AppError> {
        Ok(self.operations.lock().unwrap().get(&operation_id).cloned())
    }
}

/// Collaborator stub with per-workspace failure injection and call
/// recording.
#[derive(Default)]
pub struct StubCollaborators {
    failing: HashSet<Uuid>,
    calls: Mutex<Vec<(&'static str, Uuid)>>,
}

impl StubCollaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(targets: &[Uuid]) -> Self {
        Self {
            failing: targets.iter().copied().collect(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(&'static str, Uuid)> {
        self.calls.lock().unwrap().clone()
    }

    fn check(&self, operation: &'static str, workspace_id: Uuid) -> Result<(), CollaboratorError> {
        self.calls.lock().unwrap().push((operation, workspace_id));
        if self.failing.contains(&workspace_id) {
            return Err(CollaboratorError::Upstream {
                operation,
                status: 502,
                detail: "collaborator unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl WorkspaceOperations for StubCollaborators {
    async fn fetch_sources(&self, workspace_id: Uuid) -> Result<FetchOutcome, CollaboratorError> {
        self.check("fetch_sources", workspace_id)?;
        Ok(FetchOutcome { items_fetched: 3 })
    }

    async fn generate_draft(&self, workspace_id: Uuid) -> Result<DraftOutcome, CollaboratorError> {
        self.check("generate_draft", workspace_id)?;
        Ok(DraftOutcome {
            draft_generated: true,
            length: Some(1200),
        })
    }

    async fn send_newsletter(&self, workspace_id: Uuid) -> Result<SendOutcome, CollaboratorError> {
        self.check("send_newsletter", workspace_id)?;
        Ok(SendOutcome {
            recipient: format!("owner-{workspace_id}@example.com"),
        })
    }
}

/// Catalog used across tests: the builtin tiers plus processor price ids so
/// price resolution has something to resolve.
pub fn test_catalog() -> PlanCatalog {
    let builtin = PlanCatalog::builtin("pro");
    let mut plans: Vec<Plan> = ["free", "pro", "agency"]
        .iter()
        .filter_map(|id| builtin.lookup(id).cloned())
        .collect();
    for plan in &mut plans {
        plan.processor_price_id_monthly = Some(format!("price_{}_monthly", plan.plan_id));
        plan.processor_price_id_yearly = Some(format!("price_{}_yearly", plan.plan_id));
    }
    PlanCatalog::new(plans, "pro")
}

/// Build an event processor over the shared in-memory store.
pub fn processor_with(store: Arc<InMemoryStore>) -> EventProcessor {
    let ledger = UsageLedger::new(store.clone());
    EventProcessor::new(store, ledger, Arc::new(test_catalog()))
}

/// Test application wrapper for HTTP-level tests.
pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
    pub store: Arc<InMemoryStore>,
    verifier: WebhookVerifier,
}

impl TestApp {
    /// Spawn the HTTP surface on a random port over in-memory stores.
    pub async fn spawn() -> Self {
        init_metrics();

        let store = Arc::new(InMemoryStore::new());
        let ledger = UsageLedger::new(store.clone());
        let verifier = WebhookVerifier::new(TEST_WEBHOOK_SECRET);
        let processor = Arc::new(EventProcessor::new(
            store.clone(),
            ledger.clone(),
            Arc::new(test_catalog()),
        ));

        let state = AppState {
            verifier: Arc::new(verifier.clone()),
            processor,
            ledger,
        };
        let router = build_router(state, HealthState { db: None });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test listener");
        let address = format!("http://{}", listener.local_addr().unwrap());

        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });

        TestApp {
            address,
            client: reqwest::Client::new(),
            store,
            verifier: WebhookVerifier::new(TEST_WEBHOOK_SECRET),
        }
    }

    /// A valid signature header for the payload.
    pub fn signature_header(&self, payload: &[u8]) -> String {
        let ts = Utc::now().timestamp();
        format!("t={},v1={}", ts, self.verifier.sign(ts, payload))
    }

    pub async fn post_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> reqwest::Response {
        self.client
            .post(format!("{}/webhooks/stripe", self.address))
            .header("Stripe-Signature", signature)
            .body(payload.to_vec())
            .send()
            .await
            .expect("Failed to post webhook")
    }
}

// Event payload builders.

pub fn checkout_event(email: &str, subscription_id: &str, price_id: Option<&str>) -> Vec<u8> {
    json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "type": "checkout.session.completed",
        "created": Utc::now().timestamp(),
        "data": {
            "object": {
                "id": format!("cs_{}", Uuid::new_v4().simple()),
                "customer_email": email,
                "subscription": subscription_id,
                "metadata": { "price_id": price_id }
            }
        }
    })
    .to_string()
    .into_bytes()
}

pub fn subscription_updated_event(
    subscription_id: &str,
    status: &str,
    period_start: i64,
    period_end: i64,
    trial_end: Option<i64>,
) -> Vec<u8> {
    json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "type": "customer.subscription.updated",
        "created": Utc::now().timestamp(),
        "data": {
            "object": {
                "id": subscription_id,
                "status": status,
                "current_period_start": period_start,
                "current_period_end": period_end,
                "trial_end": trial_end,
                "items": { "data": [ { "price": { "id": "price_pro_monthly" } } ] }
            }
        }
    })
    .to_string()
    .into_bytes()
}

pub fn subscription_deleted_event(subscription_id: &str) -> Vec<u8> {
    json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "type": "customer.subscription.deleted",
        "created": Utc::now().timestamp(),
        "data": {
            "object": {
                "id": subscription_id,
                "status": "canceled",
                "current_period_start": 1_700_000_000,
                "current_period_end": 1_702_592_000,
                "trial_end": null
            }
        }
    })
    .to_string()
    .into_bytes()
}

pub fn invoice_event(event_type: &str, subscription_id: &str, amount_cents: i64) -> Vec<u8> {
    json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "type": event_type,
        "created": Utc::now().timestamp(),
        "data": {
            "object": {
                "id": format!("in_{}", Uuid::new_v4().simple()),
                "subscription": subscription_id,
                "amount_due": amount_cents,
                "currency": "usd"
            }
        }
    })
    .to_string()
    .into_bytes()
}

/// Parse a raw payload into a typed event without going through HTTP.
pub fn parse_event(payload: &[u8]) -> billing_service::models::ProcessorEvent {
    let verifier = WebhookVerifier::new(TEST_WEBHOOK_SECRET);
    let ts = Utc::now().timestamp();
    let header = format!("t={},v1={}", ts, verifier.sign(ts, payload));
    verifier
        .verify_and_parse(payload, &header)
        .expect("test payload must parse")
}
