//! Tenant model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// The billing-owning entity a subscription belongs to.
///
/// Only the lookup-by-billing-email surface is exposed here; account
/// management lives outside this service.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tenant {
    pub tenant_id: Uuid,
    pub email: String,
    pub display_name: String,
    pub created_utc: DateTime<Utc>,
}
