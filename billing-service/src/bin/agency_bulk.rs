//! Agency bulk operations CLI.
//!
//! Runs a bulk fetch/generate/send across target workspaces from the
//! command line, for scheduled tasks and automation. Exit code 0 means the
//! operation row was created; per-target outcomes are reported on stdout
//! and live in the operation's progress record.

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

use billing_service::config::BillingConfig;
use billing_service::models::{BulkOperationKind, CreateBulkOperation, TargetOutcome};
use billing_service::services::{
    init_metrics, BulkCoordinator, Database, HttpCollaborators, PlanCatalog, SubscriptionStore,
    UsageLedger,
};
use service_core::observability::init_tracing;

#[derive(Parser)]
#[command(name = "agency-bulk", about = "Run bulk operations across agency workspaces")]
struct Cli {
    #[command(subcommand)]
    operation: Operation,
}

#[derive(Subcommand)]
enum Operation {
    /// Bulk fetch sources
    Fetch(BulkArgs),
    /// Bulk generate drafts
    Generate(BulkArgs),
    /// Bulk send newsletters
    Send(BulkArgs),
}

#[derive(Args)]
struct BulkArgs {
    /// Originating agency workspace id
    #[arg(long)]
    workspace_id: Uuid,

    /// Comma-separated target workspace ids. An empty list still creates
    /// the operation row, directly in the failed state.
    #[arg(long, value_delimiter = ',')]
    target_workspaces: Vec<Uuid>,

    /// Billing email of the user creating the operation
    #[arg(long)]
    created_by: String,
}

impl Operation {
    fn kind(&self) -> BulkOperationKind {
        match self {
            Operation::Fetch(_) => BulkOperationKind::Fetch,
            Operation::Generate(_) => BulkOperationKind::Generate,
            Operation::Send(_) => BulkOperationKind::Send,
        }
    }

    fn args(&self) -> &BulkArgs {
        match self {
            Operation::Fetch(args) | Operation::Generate(args) | Operation::Send(args) => args,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match BillingConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_tracing("agency-bulk", &config.log_level, None);
    init_metrics();

    let db = match Database::new(
        &config.database.url,
        config.database.max_connections,
        config.database.min_connections,
    )
    .await
    {
        Ok(db) => Arc::new(db),
        Err(e) => {
            eprintln!("Failed to connect to database: {e}");
            return ExitCode::FAILURE;
        }
    };

    let plans = match db.load_plans().await {
        Ok(plans) => plans,
        Err(e) => {
            eprintln!("Failed to load plan catalog: {e}");
            return ExitCode::FAILURE;
        }
    };
    let catalog = Arc::new(if plans.is_empty() {
        PlanCatalog::builtin(&config.default_plan_id)
    } else {
        PlanCatalog::new(plans, config.default_plan_id.clone())
    });

    let args = cli.operation.args();
    let kind = cli.operation.kind();

    let creator = match db.tenant_by_email(&args.created_by).await {
        Ok(Some(tenant)) => tenant,
        Ok(None) => {
            eprintln!("No tenant with billing email {}", args.created_by);
            return ExitCode::FAILURE;
        }
        Err(e) => {
            eprintln!("Failed to resolve creator: {e}");
            return ExitCode::FAILURE;
        }
    };

    let ledger = UsageLedger::new(db.clone());
    let collaborators = Arc::new(HttpCollaborators::new(&config.collaborators));
    let coordinator = BulkCoordinator::new(
        db.clone(),
        db.clone(),
        ledger,
        catalog,
        collaborators,
        config.bulk.worker_limit,
    );

    println!(
        "Running bulk {} for {} workspaces...",
        kind.as_str(),
        args.target_workspaces.len()
    );

    let operation = match coordinator
        .run(CreateBulkOperation {
            workspace_id: args.workspace_id,
            kind,
            target_workspaces: args.target_workspaces.clone(),
            created_by: creator.tenant_id,
        })
        .await
    {
        Ok(operation) => operation,
        Err(e) => {
            eprintln!("Operation could not be created: {e}");
            return ExitCode::FAILURE;
        }
    };

    let summary = operation.summary();
    println!(
        "Bulk {} {}: {} successful, {} failed",
        kind.as_str(),
        operation.status,
        summary.succeeded,
        summary.failed
    );
    if let Some(message) = &operation.error_message {
        println!("  {message}");
    }

    if !operation.progress.is_empty() {
        println!("\nDetailed results:");
        for (workspace_id, outcome) in &operation.progress {
            match outcome {
                TargetOutcome::Succeeded { detail } => {
                    println!(
                        "  ok   {workspace_id}: {}",
                        detail.as_deref().unwrap_or("succeeded")
                    );
                }
                TargetOutcome::Failed { error } => {
                    println!("  FAIL {workspace_id}: {error}");
                }
                TargetOutcome::Pending => {
                    println!("  ...  {workspace_id}: pending");
                }
            }
        }
    }

    ExitCode::SUCCESS
}
