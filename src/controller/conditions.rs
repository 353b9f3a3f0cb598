//! Condition bookkeeping following Kubernetes API conventions.

use chrono::Utc;

use crate::crd::{ClusterCondition, ConditionStatus};

/// Upsert a condition, merging by `type`.
///
/// The probe time is stamped on every write; the transition time only moves
/// when the status actually flips.
pub fn set_condition(conditions: &mut Vec<ClusterCondition>, mut condition: ClusterCondition) {
    let now = Utc::now().to_rfc3339();
    condition.last_probe_time = Some(now.clone());

    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        condition.last_transition_time = if existing.status != condition.status {
            Some(now)
        } else {
            existing.last_transition_time.clone()
        };
        *existing = condition;
    } else {
        condition.last_transition_time = Some(now);
        conditions.push(condition);
    }
}

/// Find a condition by type.
pub fn find_condition<'a>(
    conditions: &'a [ClusterCondition],
    type_: &str,
) -> Option<&'a ClusterCondition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Check whether a condition is present and True.
pub fn is_condition_true(conditions: &[ClusterCondition], type_: &str) -> bool {
    find_condition(conditions, type_)
        .map(|c| c.status == ConditionStatus::True)
        .unwrap_or(false)
}
