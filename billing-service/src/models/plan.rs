//! Billing plan model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::MetricKind;

/// A billing plan and its numeric limits.
///
/// Plans are referenced by subscriptions through their string identifier and
/// are never deleted, only deactivated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: String,
    pub name: String,
    /// Monthly price in minor currency units (cents).
    pub price_monthly_cents: i64,
    /// Yearly price in minor currency units, when the plan offers one.
    pub price_yearly_cents: Option<i64>,
    /// Payment-processor price identifiers used to resolve checkout events
    /// back to a plan.
    pub processor_price_id_monthly: Option<String>,
    pub processor_price_id_yearly: Option<String>,
    /// Limit name to numeric cap, e.g. `max_newsletters_per_month`.
    pub limits: BTreeMap<String, i64>,
    pub is_active: bool,
}

impl Plan {
    /// The cap this plan places on a metric kind, if any.
    ///
    /// Metrics without a mapped limit key, and limit keys the plan does not
    /// define, are uncapped.
    pub fn cap_for(&self, metric: MetricKind) -> Option<i64> {
        metric
            .limit_key()
            .and_then(|key| self.limits.get(key))
            .copied()
    }

    /// Whether either of the plan's processor price identifiers matches.
    pub fn matches_price(&self, price_id: &str) -> bool {
        self.processor_price_id_monthly.as_deref() == Some(price_id)
            || self.processor_price_id_yearly.as_deref() == Some(price_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan_with_limits(limits: &[(&str, i64)]) -> Plan {
        Plan {
            plan_id: "pro".to_string(),
            name: "Pro".to_string(),
            price_monthly_cents: 2900,
            price_yearly_cents: Some(29_000),
            processor_price_id_monthly: Some("price_pro_monthly".to_string()),
            processor_price_id_yearly: None,
            limits: limits
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            is_active: true,
        }
    }

    #[test]
    fn cap_for_maps_send_to_newsletter_limit() {
        let plan = plan_with_limits(&[("max_newsletters_per_month", 100)]);
        assert_eq!(plan.cap_for(MetricKind::Send), Some(100));
    }

    #[test]
    fn cap_for_is_none_for_unmapped_metrics() {
        let plan = plan_with_limits(&[("max_newsletters_per_month", 100)]);
        assert_eq!(plan.cap_for(MetricKind::Open), None);
        assert_eq!(plan.cap_for(MetricKind::Fetch), None);
    }

    #[test]
    fn matches_price_checks_both_intervals() {
        let plan = plan_with_limits(&[]);
        assert!(plan.matches_price("price_pro_monthly"));
        assert!(!plan.matches_price("price_other"));
    }
}
