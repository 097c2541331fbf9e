//! Application startup and lifecycle management.

use std::sync::Arc;

use axum::{
    extract::State, http::StatusCode, middleware, response::IntoResponse, routing::get,
    routing::post, Json, Router,
};
use secrecy::ExposeSecret;
use serde_json::json;
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::BillingConfig;
use crate::handlers::{tracking, webhook};
use crate::services::{
    init_metrics, get_metrics, Database, EventProcessor, PlanCatalog, UsageLedger,
    WebhookVerifier,
};

/// Shared application state for the request handlers.
#[derive(Clone)]
pub struct AppState {
    pub verifier: Arc<WebhookVerifier>,
    pub processor: Arc<EventProcessor>,
    pub ledger: UsageLedger,
}

/// State for health check endpoints.
#[derive(Clone)]
pub struct HealthState {
    /// Absent when the app runs against non-Postgres stores (tests).
    pub db: Option<Arc<Database>>,
}

/// Health check endpoint for Docker/K8s liveness probes.
async fn health_check(State(state): State<HealthState>) -> impl IntoResponse {
    let db_ok = match &state.db {
        Some(db) => db.health_check().await.is_ok(),
        None => true,
    };

    if db_ok {
        (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "service": "billing-service",
                "version": env!("CARGO_PKG_VERSION")
            })),
        )
    } else {
        tracing::warn!("Health check failed - database unavailable");
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unhealthy",
                "service": "billing-service"
            })),
        )
    }
}

/// Readiness check endpoint for K8s readiness probes.
async fn readiness_check(State(state): State<HealthState>) -> impl IntoResponse {
    let ready = match &state.db {
        Some(db) => db.health_check().await.is_ok(),
        None => true,
    };
    if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

/// Build the full router. Exposed so tests can run the HTTP surface against
/// substitute stores.
pub fn build_router(state: AppState, health: HealthState) -> Router {
    let api = Router::new()
        .route("/webhooks/stripe", post(webhook::processor_webhook))
        .route("/track/open", get(tracking::track_open))
        .route("/track/click", get(tracking::track_click))
        .with_state(state);

    let ops = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .with_state(health);

    api.merge(ops)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(request_id_middleware))
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
    health: HealthState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: BillingConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    /// Use this when migrations are already applied by the test harness.
    pub async fn build_without_migrations(config: BillingConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(config: BillingConfig, run_migrations: bool) -> Result<Self, AppError> {
        init_metrics();

        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        let db = Arc::new(db);

        // The catalog is loaded once at startup; an empty plan table falls
        // back to the compiled-in plans.
        let plans = db.load_plans().await?;
        let catalog = Arc::new(if plans.is_empty() {
            tracing::warn!("plan table is empty, using builtin catalog");
            PlanCatalog::builtin(&config.default_plan_id)
        } else {
            PlanCatalog::new(plans, config.default_plan_id.clone())
        });

        let ledger = UsageLedger::new(db.clone());
        let verifier = Arc::new(WebhookVerifier::new(
            config.webhook.secret.expose_secret().clone(),
        ));
        let processor = Arc::new(EventProcessor::new(db.clone(), ledger.clone(), catalog));

        let state = AppState {
            verifier,
            processor,
            ledger,
        };
        let health = HealthState {
            db: Some(db.clone()),
        };

        let addr = config.common.bind_addr();
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(port = port, "Billing service listener bound");

        Ok(Self {
            port,
            listener,
            state,
            health,
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Run the application until stopped.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let router = build_router(self.state, self.health);

        tracing::info!(
            service = "billing-service",
            version = env!("CARGO_PKG_VERSION"),
            port = self.port,
            "Service ready to accept connections"
        );

        axum::serve(self.listener, router).await.map_err(|e| {
            tracing::error!(error = %e, "HTTP server error");
            std::io::Error::other(format!("HTTP server error: {}", e))
        })
    }
}
