//! Typed payment-processor webhook events.
//!
//! Payloads arrive as loosely-typed JSON keyed by an event type string. They
//! are decoded into this tagged union so new event kinds from the sender
//! fail closed (logged and ignored) instead of crashing on dynamic field
//! access.

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Webhook event kinds this service reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    CheckoutCompleted,
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionDeleted,
    PaymentSucceeded,
    PaymentFailed,
    Unknown(String),
}

impl From<&str> for EventKind {
    fn from(s: &str) -> Self {
        match s {
            "checkout.session.completed" => Self::CheckoutCompleted,
            "customer.subscription.created" => Self::SubscriptionCreated,
            "customer.subscription.updated" => Self::SubscriptionUpdated,
            "customer.subscription.deleted" => Self::SubscriptionDeleted,
            "invoice.payment_succeeded" => Self::PaymentSucceeded,
            "invoice.payment_failed" => Self::PaymentFailed,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::CheckoutCompleted => "checkout.session.completed",
            EventKind::SubscriptionCreated => "customer.subscription.created",
            EventKind::SubscriptionUpdated => "customer.subscription.updated",
            EventKind::SubscriptionDeleted => "customer.subscription.deleted",
            EventKind::PaymentSucceeded => "invoice.payment_succeeded",
            EventKind::PaymentFailed => "invoice.payment_failed",
            EventKind::Unknown(kind) => kind,
        }
    }
}

/// A verified, parsed webhook event.
#[derive(Debug, Clone)]
pub struct ProcessorEvent {
    /// The sender's stable event identifier.
    pub id: String,
    pub kind: EventKind,
    pub data: EventData,
    /// Sender-side creation time (unix seconds).
    pub created: i64,
}

/// Event payload variants.
#[derive(Debug, Clone)]
pub enum EventData {
    Checkout(CheckoutData),
    Subscription(SubscriptionData),
    Invoice(InvoiceData),
    /// Raw JSON for unknown event kinds.
    Raw(Value),
}

/// Checkout-completed payload.
#[derive(Debug, Clone)]
pub struct CheckoutData {
    pub session_id: String,
    /// Billing contact email used to resolve the tenant.
    pub customer_email: Option<String>,
    pub subscription_id: Option<String>,
    /// Price identifier used to resolve the plan.
    pub price_id: Option<String>,
}

/// Subscription created/updated/deleted payload.
#[derive(Debug, Clone)]
pub struct SubscriptionData {
    pub subscription_id: String,
    pub status: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub trial_end: Option<DateTime<Utc>>,
    pub price_id: Option<String>,
}

/// Invoice payment payload.
#[derive(Debug, Clone)]
pub struct InvoiceData {
    pub invoice_id: String,
    pub subscription_id: Option<String>,
    pub amount_cents: i64,
    pub currency: String,
}
