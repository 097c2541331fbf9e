//! Subscription event processor.
//!
//! Pure state-transition logic over the subscription store. Every handler is
//! idempotent on the processor subscription id: the sender delivers at least
//! once and out of order, so re-applying any event must converge on the same
//! state. No handler partially applies; each transition is a single
//! conditional write.

use std::sync::Arc;

use anyhow::anyhow;
use serde_json::json;
use service_core::error::AppError;
use tracing::{debug, info, instrument, warn};

use crate::models::{
    CheckoutData, EventData, EventKind, InvoiceData, MetricKind, NewUsageEvent, ProcessorEvent,
    SubscriptionData, SubscriptionStatus, SubscriptionUpdate, UpsertSubscription,
};
use crate::services::catalog::PlanCatalog;
use crate::services::ledger::UsageLedger;
use crate::services::store::SubscriptionStore;

pub struct EventProcessor {
    subscriptions: Arc<dyn SubscriptionStore>,
    ledger: UsageLedger,
    catalog: Arc<PlanCatalog>,
}

impl EventProcessor {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        ledger: UsageLedger,
        catalog: Arc<PlanCatalog>,
    ) -> Self {
        Self {
            subscriptions,
            ledger,
            catalog,
        }
    }

    /// Apply one verified event. Errors propagate so the gateway can answer
    /// with a retryable failure; out-of-order races (update or delete before
    /// the row exists) are logged and ignored by design.
    #[instrument(skip(self, event), fields(event_id = %event.id, event_type = event.kind.as_str()))]
    pub async fn process(&self, event: &ProcessorEvent) -> Result<(), AppError> {
        match (&event.kind, &event.data) {
            (EventKind::CheckoutCompleted, EventData::Checkout(data)) => {
                self.handle_checkout(data).await
            }
            (
                EventKind::SubscriptionCreated | EventKind::SubscriptionUpdated,
                EventData::Subscription(data),
            ) => self.handle_subscription_update(data).await,
            (EventKind::SubscriptionDeleted, EventData::Subscription(data)) => {
                self.handle_subscription_deleted(data).await
            }
            (EventKind::PaymentSucceeded, EventData::Invoice(data)) => {
                self.handle_payment(data, true).await
            }
            (EventKind::PaymentFailed, EventData::Invoice(data)) => {
                self.handle_payment(data, false).await
            }
            (EventKind::Unknown(kind), _) => {
                debug!(kind = %kind, "ignoring unhandled event kind");
                Ok(())
            }
            (kind, _) => {
                warn!(kind = kind.as_str(), "event kind and payload shape disagree, ignoring");
                Ok(())
            }
        }
    }

    async fn handle_checkout(&self, data: &CheckoutData) -> Result<(), AppError> {
        let Some(processor_subscription_id) = data.subscription_id.as_deref() else {
            debug!(session_id = %data.session_id, "checkout without subscription, nothing to do");
            return Ok(());
        };

        let email = data.customer_email.as_deref().ok_or_else(|| {
            AppError::BadRequest(anyhow!(
                "checkout session {} carries no billing contact email",
                data.session_id
            ))
        })?;

        let tenant = self
            .subscriptions
            .tenant_by_email(email)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(anyhow!("no tenant with billing email {email}"))
            })?;

        let plan_id = self.resolve_plan_id(data.price_id.as_deref());

        let subscription = self
            .subscriptions
            .upsert_from_checkout(&UpsertSubscription {
                tenant_id: tenant.tenant_id,
                plan_id,
                processor_subscription_id: processor_subscription_id.to_string(),
                status: SubscriptionStatus::Active,
            })
            .await?;

        info!(
            tenant_id = %tenant.tenant_id,
            subscription_id = %subscription.subscription_id,
            plan_id = %subscription.plan_id,
            "checkout completed, subscription active"
        );
        Ok(())
    }

    async fn handle_subscription_update(&self, data: &SubscriptionData) -> Result<(), AppError> {
        let update = SubscriptionUpdate {
            status: SubscriptionStatus::from_string(&data.status),
            current_period_start: data.period_start,
            current_period_end: data.period_end,
            trial_end: data.trial_end,
        };

        match self
            .subscriptions
            .apply_update(&data.subscription_id, &update)
            .await?
        {
            Some(subscription) => {
                info!(
                    subscription_id = %subscription.subscription_id,
                    status = %subscription.status,
                    "subscription updated"
                );
            }
            None => {
                // Update events can overtake the checkout event; the sender
                // will redeliver after the row exists.
                info!(
                    processor_subscription_id = %data.subscription_id,
                    "update for unknown subscription, ignoring"
                );
            }
        }
        Ok(())
    }

    async fn handle_subscription_deleted(&self, data: &SubscriptionData) -> Result<(), AppError> {
        match self
            .subscriptions
            .mark_canceled(&data.subscription_id)
            .await?
        {
            Some(subscription) => {
                info!(subscription_id = %subscription.subscription_id, "subscription canceled");
            }
            None => {
                info!(
                    processor_subscription_id = %data.subscription_id,
                    "delete for unknown subscription, ignoring"
                );
            }
        }
        Ok(())
    }

    /// Invoice outcomes are audit entries; subscription status changes flow
    /// only through the subscription events, matching the sender's own
    /// authority model.
    async fn handle_payment(&self, data: &InvoiceData, succeeded: bool) -> Result<(), AppError> {
        let Some(processor_subscription_id) = data.subscription_id.as_deref() else {
            debug!(invoice_id = %data.invoice_id, "invoice without subscription, ignoring");
            return Ok(());
        };

        let Some(subscription) = self
            .subscriptions
            .find_by_processor_id(processor_subscription_id)
            .await?
        else {
            info!(
                processor_subscription_id = %processor_subscription_id,
                invoice_id = %data.invoice_id,
                "invoice for unknown subscription, ignoring"
            );
            return Ok(());
        };

        self.ledger
            .record(
                NewUsageEvent::new(subscription.tenant_id, None, MetricKind::Payment)
                    .with_metadata(json!({
                        "invoice_id": data.invoice_id,
                        "amount_cents": data.amount_cents,
                        "currency": data.currency,
                        "outcome": if succeeded { "succeeded" } else { "failed" },
                    })),
            )
            .await;
        Ok(())
    }

    fn resolve_plan_id(&self, price_id: Option<&str>) -> String {
        if let Some(price_id) = price_id {
            if let Some(plan) = self.catalog.plan_for_price(price_id) {
                return plan.plan_id.clone();
            }
            warn!(
                price_id = %price_id,
                default_plan = %self.catalog.default_plan_id(),
                "unresolved price identifier, falling back to default plan"
            );
        } else {
            warn!(
                default_plan = %self.catalog.default_plan_id(),
                "checkout carries no price identifier, falling back to default plan"
            );
        }
        self.catalog.default_plan_id().to_string()
    }
}
