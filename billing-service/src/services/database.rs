//! Database service for billing-service.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::FromRow;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::models::{
    BulkOperation, BulkOperationStatus, CreateBulkOperation, MetricKind, NewUsageEvent, Plan,
    Subscription, SubscriptionStatus, SubscriptionUpdate, TargetOutcome, Tenant,
    UpsertSubscription, UsageEvent, UsagePeriod, UsageScope,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::{BulkOperationStore, SubscriptionStore, UsageStore};

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "billing-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Load the plan table for the in-memory catalog.
    #[instrument(skip(self))]
    pub async fn load_plans(&self) -> Result<Vec<Plan>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["load_plans"])
            .start_timer();

        let rows = sqlx::query_as::<_, PlanRow>(
            r#"
            SELECT plan_id, name, price_monthly_cents, price_yearly_cents, processor_price_id_monthly, processor_price_id_yearly, limits, is_active
            FROM plans
            ORDER BY plan_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to load plans: {}", e)))?;

        timer.observe_duration();

        Ok(rows.into_iter().map(Plan::from).collect())
    }
}

#[async_trait]
impl SubscriptionStore for Database {
    #[instrument(skip(self, email))]
    async fn tenant_by_email(&self, email: &str) -> Result<Option<Tenant>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["tenant_by_email"])
            .start_timer();

        let tenant = sqlx::query_as::<_, Tenant>(
            r#"
            SELECT tenant_id, email, display_name, created_utc
            FROM tenants
            WHERE email = $1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to look up tenant: {}", e)))?;

        timer.observe_duration();

        Ok(tenant)
    }

    #[instrument(skip(self, input), fields(processor_subscription_id = %input.processor_subscription_id))]
    async fn upsert_from_checkout(
        &self,
        input: &UpsertSubscription,
    ) -> Result<Subscription, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["upsert_subscription"])
            .start_timer();

        // Single conditional write keyed by the unique processor
        // subscription id; touches only the fields checkout owns.
        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            INSERT INTO subscriptions (subscription_id, tenant_id, plan_id, processor_subscription_id, status)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (processor_subscription_id)
            DO UPDATE SET tenant_id = EXCLUDED.tenant_id, plan_id = EXCLUDED.plan_id, status = EXCLUDED.status
            RETURNING subscription_id, tenant_id, plan_id, processor_subscription_id, status, current_period_start, current_period_end, trial_end, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.tenant_id)
        .bind(&input.plan_id)
        .bind(&input.processor_subscription_id)
        .bind(input.status.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to upsert subscription: {}", e)))?;

        timer.observe_duration();

        Ok(subscription)
    }

    #[instrument(skip(self, update), fields(processor_subscription_id = %processor_subscription_id))]
    async fn apply_update(
        &self,
        processor_subscription_id: &str,
        update: &SubscriptionUpdate,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["apply_subscription_update"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            UPDATE subscriptions
            SET status = $2, current_period_start = $3, current_period_end = $4, trial_end = $5
            WHERE processor_subscription_id = $1
            RETURNING subscription_id, tenant_id, plan_id, processor_subscription_id, status, current_period_start, current_period_end, trial_end, created_utc
            "#,
        )
        .bind(processor_subscription_id)
        .bind(update.status.as_str())
        .bind(update.current_period_start)
        .bind(update.current_period_end)
        .bind(update.trial_end)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to update subscription: {}", e)))?;

        timer.observe_duration();

        Ok(subscription)
    }

    #[instrument(skip(self), fields(processor_subscription_id = %processor_subscription_id))]
    async fn mark_canceled(
        &self,
        processor_subscription_id: &str,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_subscription_canceled"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            UPDATE subscriptions
            SET status = $2
            WHERE processor_subscription_id = $1
            RETURNING subscription_id, tenant_id, plan_id, processor_subscription_id, status, current_period_start, current_period_end, trial_end, created_utc
            "#,
        )
        .bind(processor_subscription_id)
        .bind(SubscriptionStatus::Canceled.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to cancel subscription: {}", e)))?;

        timer.observe_duration();

        Ok(subscription)
    }

    #[instrument(skip(self), fields(processor_subscription_id = %processor_subscription_id))]
    async fn find_by_processor_id(
        &self,
        processor_subscription_id: &str,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT subscription_id, tenant_id, plan_id, processor_subscription_id, status, current_period_start, current_period_end, trial_end, created_utc
            FROM subscriptions
            WHERE processor_subscription_id = $1
            "#,
        )
        .bind(processor_subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to find subscription: {}", e)))?;

        timer.observe_duration();

        Ok(subscription)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id))]
    async fn subscription_for_tenant(
        &self,
        tenant_id: Uuid,
    ) -> Result<Option<Subscription>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["subscription_for_tenant"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT subscription_id, tenant_id, plan_id, processor_subscription_id, status, current_period_start, current_period_end, trial_end, created_utc
            FROM subscriptions
            WHERE tenant_id = $1
            ORDER BY created_utc DESC
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            AppError::DatabaseError(anyhow::anyhow!("Failed to find tenant subscription: {}", e))
        })?;

        timer.observe_duration();

        Ok(subscription)
    }
}

#[async_trait]
impl UsageStore for Database {
    #[instrument(skip(self, event), fields(tenant_id = %event.tenant_id, metric = event.metric.as_str()))]
    async fn append(&self, event: &NewUsageEvent) -> Result<UsageEvent, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["append_usage_event"])
            .start_timer();

        let row = sqlx::query_as::<_, UsageEvent>(
            r#"
            INSERT INTO usage_events (event_id, tenant_id, workspace_id, metric, value, metadata)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING event_id, tenant_id, workspace_id, metric, value, metadata, recorded_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(event.tenant_id)
        .bind(event.workspace_id)
        .bind(event.metric.as_str())
        .bind(event.value)
        .bind(&event.metadata)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to append usage event: {}", e)))?;

        timer.observe_duration();

        Ok(row)
    }

    #[instrument(skip(self, period), fields(metric = metric.as_str()))]
    async fn total_for(
        &self,
        scope: UsageScope,
        metric: MetricKind,
        period: &UsagePeriod,
    ) -> Result<i64, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["total_usage"])
            .start_timer();

        let total: i64 = match scope {
            UsageScope::Tenant(tenant_id) => {
                sqlx::query_scalar(
                    r#"
                    SELECT COALESCE(SUM(value), 0)::BIGINT
                    FROM usage_events
                    WHERE tenant_id = $1 AND metric = $2 AND recorded_utc >= $3 AND recorded_utc < $4
                    "#,
                )
                .bind(tenant_id)
                .bind(metric.as_str())
                .bind(period.start)
                .bind(period.end)
                .fetch_one(&self.pool)
                .await
            }
            UsageScope::Workspace(workspace_id) => {
                sqlx::query_scalar(
                    r#"
                    SELECT COALESCE(SUM(value), 0)::BIGINT
                    FROM usage_events
                    WHERE workspace_id = $1 AND metric = $2 AND recorded_utc >= $3 AND recorded_utc < $4
                    "#,
                )
                .bind(workspace_id)
                .bind(metric.as_str())
                .bind(period.start)
                .bind(period.end)
                .fetch_one(&self.pool)
                .await
            }
        }
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to sum usage: {}", e)))?;

        timer.observe_duration();

        Ok(total)
    }
}

#[async_trait]
impl BulkOperationStore for Database {
    #[instrument(skip(self, input), fields(kind = input.kind.as_str()))]
    async fn create(&self, input: &CreateBulkOperation) -> Result<BulkOperation, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_bulk_operation"])
            .start_timer();

        let row = sqlx::query_as::<_, BulkOperationRow>(
            r#"
            INSERT INTO bulk_operations (operation_id, workspace_id, kind, target_workspaces, created_by)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING operation_id, workspace_id, kind, target_workspaces, status, progress, succeeded_count, failed_count, error_message, created_by, created_utc, started_utc, completed_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.workspace_id)
        .bind(input.kind.as_str())
        .bind(&input.target_workspaces)
        .bind(input.created_by)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to create bulk operation: {}", e)))?;

        timer.observe_duration();
        info!(operation_id = %row.operation_id, "Bulk operation created");

        Ok(row.into())
    }

    #[instrument(skip(self), fields(operation_id = %operation_id))]
    async fn mark_running(&self, operation_id: Uuid) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_bulk_running"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE bulk_operations
            SET status = $2, started_utc = now()
            WHERE operation_id = $1
            "#,
        )
        .bind(operation_id)
        .bind(BulkOperationStatus::Running.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to mark bulk operation running: {}", e)))?;

        timer.observe_duration();

        Ok(())
    }

    #[instrument(skip(self, error), fields(operation_id = %operation_id))]
    async fn mark_failed(&self, operation_id: Uuid, error: &str) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_bulk_failed"])
            .start_timer();

        sqlx::query(
            r#"
            UPDATE bulk_operations
            SET status = $3, error_message = $2, completed_utc = now()
            WHERE operation_id = $1
            "#,
        )
        .bind(operation_id)
        .bind(error)
        .bind(BulkOperationStatus::Failed.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to mark bulk operation failed: {}", e)))?;

        timer.observe_duration();

        Ok(())
    }

    #[instrument(skip(self, outcome), fields(operation_id = %operation_id, workspace_id = %workspace_id))]
    async fn record_target_outcome(
        &self,
        operation_id: Uuid,
        workspace_id: Uuid,
        outcome: &TargetOutcome,
    ) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_target_outcome"])
            .start_timer();

        let value = serde_json::to_value(outcome).map_err(|e| {
            AppError::InternalError(anyhow::anyhow!("Failed to serialize target outcome: {}", e))
        })?;

        // jsonb_set touches only this target's slot, so concurrent workers
        // never clobber each other's entries.
        sqlx::query(
            r#"
            UPDATE bulk_operations
            SET progress = jsonb_set(progress, ARRAY[$2::text], $3::jsonb, true)
            WHERE operation_id = $1
            "#,
        )
        .bind(operation_id)
        .bind(workspace_id.to_string())
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to record target outcome: {}", e)))?;

        timer.observe_duration();

        Ok(())
    }

    #[instrument(skip(self), fields(operation_id = %operation_id))]
    async fn mark_completed(&self, operation_id: Uuid) -> Result<BulkOperation, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["mark_bulk_completed"])
            .start_timer();

        // Counters are settled here in one pass over the progress map,
        // after every target has been attempted.
        let row = sqlx::query_as::<_, BulkOperationRow>(
            r#"
            UPDATE bulk_operations
            SET status = $2,
                completed_utc = now(),
                succeeded_count = (SELECT COUNT(*)::INT FROM jsonb_each(progress) AS p WHERE p.value->>'status' = 'succeeded'),
                failed_count = (SELECT COUNT(*)::INT FROM jsonb_each(progress) AS p WHERE p.value->>'status' = 'failed')
            WHERE operation_id = $1
            RETURNING operation_id, workspace_id, kind, target_workspaces, status, progress, succeeded_count, failed_count, error_message, created_by, created_utc, started_utc, completed_utc
            "#,
        )
        .bind(operation_id)
        .bind(BulkOperationStatus::Completed.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to complete bulk operation: {}", e)))?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Bulk operation not found")))?;

        timer.observe_duration();

        Ok(row.into())
    }

    #[instrument(skip(self), fields(operation_id = %operation_id))]
    async fn get(&self, operation_id: Uuid) -> Result<Option<BulkOperation>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_bulk_operation"])
            .start_timer();

        let row = sqlx::query_as::<_, BulkOperationRow>(
            r#"
            SELECT operation_id, workspace_id, kind, target_workspaces, status, progress, succeeded_count, failed_count, error_message, created_by, created_utc, started_utc, completed_utc
            FROM bulk_operations
            WHERE operation_id = $1
            "#,
        )
        .bind(operation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to get bulk operation: {}", e)))?;

        timer.observe_duration();

        Ok(row.map(BulkOperation::from))
    }
}

#[derive(FromRow)]
struct PlanRow {
    plan_id: String,
    name: String,
    price_monthly_cents: i64,
    price_yearly_cents: Option<i64>,
    processor_price_id_monthly: Option<String>,
    processor_price_id_yearly: Option<String>,
    limits: Json<BTreeMap<String, i64>>,
    is_active: bool,
}

impl From<PlanRow> for Plan {
    fn from(row: PlanRow) -> Self {
        Plan {
            plan_id: row.plan_id,
            name: row.name,
            price_monthly_cents: row.price_monthly_cents,
            price_yearly_cents: row.price_yearly_cents,
            processor_price_id_monthly: row.processor_price_id_monthly,
            processor_price_id_yearly: row.processor_price_id_yearly,
            limits: row.limits.0,
            is_active: row.is_active,
        }
    }
}

#[derive(FromRow)]
struct BulkOperationRow {
    operation_id: Uuid,
    workspace_id: Uuid,
    kind: String,
    target_workspaces: Vec<Uuid>,
    status: String,
    progress: Json<BTreeMap<Uuid, TargetOutcome>>,
    succeeded_count: i32,
    failed_count: i32,
    error_message: Option<String>,
    created_by: Uuid,
    created_utc: chrono::DateTime<chrono::Utc>,
    started_utc: Option<chrono::DateTime<chrono::Utc>>,
    completed_utc: Option<chrono::DateTime<chrono::Utc>>,
}

impl From<BulkOperationRow> for BulkOperation {
    fn from(row: BulkOperationRow) -> Self {
        BulkOperation {
            operation_id: row.operation_id,
            workspace_id: row.workspace_id,
            kind: row.kind,
            target_workspaces: row.target_workspaces,
            status: row.status,
            progress: row.progress.0,
            succeeded_count: row.succeeded_count,
            failed_count: row.failed_count,
            error_message: row.error_message,
            created_by: row.created_by,
            created_utc: row.created_utc,
            started_utc: row.started_utc,
            completed_utc: row.completed_utc,
        }
    }
}
