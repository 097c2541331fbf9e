//! Configuration for billing-service.

use anyhow::Result;
use dotenvy::dotenv;
use secrecy::Secret;
use serde::Deserialize;
use service_core::config::Config as CoreConfig;
use std::env;

#[derive(Debug, Clone)]
pub struct BillingConfig {
    pub common: CoreConfig,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub webhook: WebhookConfig,
    pub collaborators: CollaboratorConfig,
    pub bulk: BulkConfig,
    /// Plan used when a checkout's price identifier cannot be resolved.
    pub default_plan_id: String,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Shared secret for the payment processor's signature scheme.
    pub secret: Secret<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollaboratorConfig {
    pub base_url: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct BulkConfig {
    /// Upper bound on concurrently processed bulk targets.
    pub worker_limit: usize,
}

impl BillingConfig {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let port = env::var("BILLING_SERVICE_PORT")
            .unwrap_or_else(|_| "3005".to_string())
            .parse()?;

        let db_url = env::var("BILLING_DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("BILLING_DATABASE_URL must be set"))?;
        let max_connections = env::var("BILLING_DB_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()?;
        let min_connections = env::var("BILLING_DB_MIN_CONNECTIONS")
            .unwrap_or_else(|_| "1".to_string())
            .parse()?;

        let webhook_secret =
            env::var("BILLING_WEBHOOK_SECRET").unwrap_or_else(|_| "whsec_dev".to_string());

        let collaborator_base_url = env::var("BILLING_COLLABORATOR_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8100".to_string());
        let collaborator_timeout = env::var("BILLING_COLLABORATOR_TIMEOUT_SECONDS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()?;

        let worker_limit = env::var("BILLING_BULK_WORKERS")
            .unwrap_or_else(|_| "4".to_string())
            .parse()?;

        Ok(Self {
            common: CoreConfig { port },
            service_name: "billing-service".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            otlp_endpoint: env::var("BILLING_OTLP_ENDPOINT").ok(),
            database: DatabaseConfig {
                url: db_url,
                max_connections,
                min_connections,
            },
            webhook: WebhookConfig {
                secret: Secret::new(webhook_secret),
            },
            collaborators: CollaboratorConfig {
                base_url: collaborator_base_url,
                timeout_seconds: collaborator_timeout,
            },
            bulk: BulkConfig { worker_limit },
            default_plan_id: env::var("BILLING_DEFAULT_PLAN_ID")
                .unwrap_or_else(|_| "pro".to_string()),
        })
    }
}
