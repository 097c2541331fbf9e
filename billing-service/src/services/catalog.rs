//! Plan catalog.
//!
//! Immutable lookup service over the plan table, loaded at process start.
//! Callers depend on this capability surface instead of scattered limit
//! constants.

use std::collections::{BTreeMap, HashMap};

use tracing::info;

use crate::models::Plan;

/// In-memory plan lookup keyed by plan id and processor price id.
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    plans: HashMap<String, Plan>,
    default_plan_id: String,
}

impl PlanCatalog {
    pub fn new(plans: Vec<Plan>, default_plan_id: impl Into<String>) -> Self {
        let catalog = Self {
            plans: plans
                .into_iter()
                .map(|plan| (plan.plan_id.clone(), plan))
                .collect(),
            default_plan_id: default_plan_id.into(),
        };
        info!(
            plan_count = catalog.plans.len(),
            default_plan = %catalog.default_plan_id,
            "plan catalog loaded"
        );
        catalog
    }

    /// The compiled-in catalog used when the plan table is empty.
    pub fn builtin(default_plan_id: &str) -> Self {
        Self::new(builtin_plans(), default_plan_id)
    }

    /// Look up a plan by identifier. Resolves inactive plans too, so
    /// existing subscription references keep working after deactivation.
    pub fn lookup(&self, plan_id: &str) -> Option<&Plan> {
        self.plans.get(plan_id)
    }

    /// Resolve a processor price identifier to a plan. Inactive plans are
    /// excluded: a deactivated plan must not be sold again.
    pub fn plan_for_price(&self, price_id: &str) -> Option<&Plan> {
        self.plans
            .values()
            .find(|plan| plan.is_active && plan.matches_price(price_id))
    }

    pub fn default_plan_id(&self) -> &str {
        &self.default_plan_id
    }

    pub fn default_plan(&self) -> Option<&Plan> {
        self.plans.get(&self.default_plan_id)
    }
}

/// The most restrictive builtin plan, used when neither the referenced plan
/// nor the configured default resolves.
pub fn fallback_plan() -> Plan {
    builtin_plans()
        .into_iter()
        .find(|plan| plan.plan_id == "free")
        .expect("builtin catalog always carries the free plan")
}

fn limits(entries: &[(&str, i64)]) -> BTreeMap<String, i64> {
    entries
        .iter()
        .map(|(key, cap)| (key.to_string(), *cap))
        .collect()
}

fn builtin_plans() -> Vec<Plan> {
    vec![
        Plan {
            plan_id: "free".to_string(),
            name: "Free".to_string(),
            price_monthly_cents: 0,
            price_yearly_cents: None,
            processor_price_id_monthly: None,
            processor_price_id_yearly: None,
            limits: limits(&[
                ("max_workspaces", 1),
                ("max_team_members", 1),
                ("max_sources", 5),
                ("max_newsletters_per_month", 10),
            ]),
            is_active: true,
        },
        Plan {
            plan_id: "pro".to_string(),
            name: "Pro".to_string(),
            price_monthly_cents: 2900,
            price_yearly_cents: Some(29_000),
            processor_price_id_monthly: None,
            processor_price_id_yearly: None,
            limits: limits(&[
                ("max_workspaces", 5),
                ("max_team_members", 10),
                ("max_sources", 50),
                ("max_newsletters_per_month", 100),
            ]),
            is_active: true,
        },
        Plan {
            plan_id: "agency".to_string(),
            name: "Agency".to_string(),
            price_monthly_cents: 9900,
            price_yearly_cents: Some(99_000),
            processor_price_id_monthly: None,
            processor_price_id_yearly: None,
            limits: limits(&[
                ("max_workspaces", 50),
                ("max_team_members", 100),
                ("max_sources", 500),
                ("max_newsletters_per_month", 1000),
            ]),
            is_active: true,
        },
    ]
}
