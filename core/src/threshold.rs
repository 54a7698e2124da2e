//! Approval threshold policy.

use serde::Serialize;

use crate::{authorization_queue::Priority, config::AuthorizationPolicyConfig, types::Money};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdDecision {
    pub requires_approval: bool,
    pub reason: String,
    pub priority: Priority,
}

/// Decide whether `maker_role` may apply `amount` of `transaction_type`
/// without a checker. A role missing from the rule has a ceiling of zero.
pub fn evaluate_threshold(
    policy: &AuthorizationPolicyConfig,
    transaction_type: &str,
    amount: Money,
    maker_role: &str,
) -> ThresholdDecision {
    if policy
        .always_require_approval
        .iter()
        .any(|t| t == transaction_type)
    {
        let priority = if amount >= policy.urgent_amount {
            Priority::Urgent
        } else {
            Priority::High
        };
        return ThresholdDecision {
            requires_approval: true,
            reason: format!("{transaction_type} always requires approval"),
            priority,
        };
    }

    let Some(rule) = policy
        .thresholds
        .iter()
        .find(|r| r.transaction_type == transaction_type)
    else {
        return ThresholdDecision {
            requires_approval: true,
            reason: format!("no approval policy for {transaction_type}"),
            priority: Priority::Medium,
        };
    };

    let ceiling = rule
        .role_limits
        .get(maker_role)
        .copied()
        .unwrap_or(Money::ZERO);
    if amount <= ceiling {
        return ThresholdDecision {
            requires_approval: false,
            reason: format!("within {maker_role} limit of {ceiling}"),
            priority: Priority::Low,
        };
    }

    let priority = if amount >= policy.urgent_amount {
        Priority::Urgent
    } else if amount >= policy.high_amount {
        Priority::High
    } else {
        Priority::Medium
    };
    ThresholdDecision {
        requires_approval: true,
        reason: format!("{amount} exceeds {maker_role} limit of {ceiling}"),
        priority,
    }
}
