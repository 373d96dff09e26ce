use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Amount;

pub type PolicyId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyCategory {
    Cancellation,
    Modification,
    NoShow,
    RouteChange,
}

impl PolicyCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyCategory::Cancellation => "cancellation",
            PolicyCategory::Modification => "modification",
            PolicyCategory::NoShow => "no_show",
            PolicyCategory::RouteChange => "route_change",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "cancellation" => Some(PolicyCategory::Cancellation),
            "modification" => Some(PolicyCategory::Modification),
            "no_show" => Some(PolicyCategory::NoShow),
            "route_change" => Some(PolicyCategory::RouteChange),
            _ => None,
        }
    }
}

impl std::fmt::Display for PolicyCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerCondition {
    LessThan,
    GreaterThan,
}

impl TriggerCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerCondition::LessThan => "less_than",
            TriggerCondition::GreaterThan => "greater_than",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "less_than" => Some(TriggerCondition::LessThan),
            "greater_than" => Some(TriggerCondition::GreaterThan),
            _ => None,
        }
    }
}

/// A fee rule keyed by category and a time window before departure.
/// Several policies usually exist per category; `resolve_fee` picks
/// exactly one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancellationPolicy {
    pub id: PolicyId,
    pub name: String,
    pub category: PolicyCategory,
    /// Hours before departure at which this rule triggers. A policy
    /// without a trigger acts as the category default.
    pub hours_trigger: Option<f64>,
    /// Missing condition is treated as LessThan.
    pub condition: Option<TriggerCondition>,
    pub fee: Amount,
    pub created_at: DateTime<Utc>,
}

impl CancellationPolicy {
    pub fn new(
        name: impl Into<String>,
        category: PolicyCategory,
        hours_trigger: Option<f64>,
        condition: Option<TriggerCondition>,
        fee: Amount,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            category,
            hours_trigger,
            condition,
            fee,
            created_at: Utc::now(),
        }
    }
}

/// Outcome of policy resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct FeeResolution {
    pub fee: Amount,
    pub policy_name: String,
}

impl FeeResolution {
    fn none() -> Self {
        Self {
            fee: 0,
            policy_name: "default".to_string(),
        }
    }
}

/// Pick the single applicable fee for one category and a time-to-departure.
///
/// The scan runs over policies sorted ascending by trigger (trigger-less
/// rules last) and is deliberately asymmetric:
/// - LessThan (closer to departure): the FIRST matching rule wins and the
///   scan stops, so the tightest window sets the penalty.
/// - GreaterThan (booked well in advance): later matches overwrite, so the
///   LARGEST matching trigger wins, the most generous applicable rule.
///
/// `hours_remaining` may be negative once departure has passed.
pub fn resolve_fee(
    policies: &[CancellationPolicy],
    category: PolicyCategory,
    hours_remaining: f64,
) -> FeeResolution {
    let mut candidates: Vec<&CancellationPolicy> =
        policies.iter().filter(|p| p.category == category).collect();

    candidates.sort_by(|a, b| match (a.hours_trigger, b.hours_trigger) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });

    let mut resolved: Option<&CancellationPolicy> = None;

    for &policy in &candidates {
        let Some(trigger) = policy.hours_trigger else {
            continue;
        };
        match policy.condition.unwrap_or(TriggerCondition::LessThan) {
            TriggerCondition::LessThan => {
                if hours_remaining < trigger {
                    resolved = Some(policy);
                    break;
                }
            }
            TriggerCondition::GreaterThan => {
                if hours_remaining >= trigger {
                    resolved = Some(policy);
                }
            }
        }
    }

    // Trigger-less policy acts as the category default when nothing matched.
    let resolved = resolved.or_else(|| {
        candidates
            .iter()
            .find(|p| p.hours_trigger.is_none())
            .copied()
    });

    match resolved {
        Some(policy) => FeeResolution {
            fee: policy.fee,
            policy_name: policy.name.clone(),
        },
        None => FeeResolution::none(),
    }
}
