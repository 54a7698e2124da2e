use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::Money;

// ── Agent tiers ────────────────────────────────────────────────────

/// Default limits assigned to an agent at onboarding, keyed by agent type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTierConfig {
    pub agent_type: String,
    pub daily_limit: Money,
    pub transaction_limit: Money,
    /// Fraction, e.g. 0.003 for 0.3%.
    pub commission_rate: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
struct AgentTiersFile {
    tiers: Vec<AgentTierConfig>,
    fallback_tier: String,
}

// ── Commissions ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "basis", rename_all = "snake_case")]
pub enum CommissionBasis {
    /// Fraction of the transaction amount.
    Percent { rate: Decimal },
    Flat { amount: Money },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommissionRule {
    pub transaction_type: String,
    #[serde(flatten)]
    pub basis: CommissionBasis,
}

#[derive(Debug, Clone, Deserialize)]
struct CommissionsFile {
    rules: Vec<CommissionRule>,
}

// ── Gateway ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub session_ttl_hours: i64,
    pub geofence_radius_km: f64,
    /// Ceiling on one customer's total CASH_OUT per calendar day, across agents.
    pub customer_daily_withdrawal_limit: Money,
}

// ── Authorization policy ───────────────────────────────────────────

/// Per-role ceilings for one operation type. Amounts above the maker's
/// ceiling need a checker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdRule {
    pub transaction_type: String,
    pub role_limits: BTreeMap<String, Money>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationPolicyConfig {
    /// Operation types that always go through the queue.
    pub always_require_approval: Vec<String>,
    pub thresholds: Vec<ThresholdRule>,
    /// At or above this amount an escalated item is URGENT.
    pub urgent_amount: Money,
    /// At or above this amount an escalated item is at least HIGH.
    pub high_amount: Money,
}

#[derive(Debug, Clone)]
pub struct DfsConfig {
    pub agent_tiers: BTreeMap<String, AgentTierConfig>,
    pub fallback_tier: String,
    pub commissions: Vec<CommissionRule>,
    pub gateway: GatewayConfig,
    pub authorization: AuthorizationPolicyConfig,
}

impl DfsConfig {
    /// Load from the data/ directory.
    /// In tests, use DfsConfig::default().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let tiers_path = format!("{data_dir}/agent_tiers.json");
        let tiers_content = std::fs::read_to_string(&tiers_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {tiers_path}: {e}"))?;
        let tiers_file: AgentTiersFile = serde_json::from_str(&tiers_content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {tiers_path}: {e}"))?;
        let agent_tiers: BTreeMap<String, AgentTierConfig> = tiers_file
            .tiers
            .into_iter()
            .map(|t| (t.agent_type.clone(), t))
            .collect();
        if !agent_tiers.contains_key(&tiers_file.fallback_tier) {
            anyhow::bail!(
                "{tiers_path}: fallback tier '{}' has no entry",
                tiers_file.fallback_tier
            );
        }

        let commission_path = format!("{data_dir}/commissions.json");
        let commission_content = std::fs::read_to_string(&commission_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {commission_path}: {e}"))?;
        let commission_file: CommissionsFile = serde_json::from_str(&commission_content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {commission_path}: {e}"))?;

        let gateway_path = format!("{data_dir}/gateway.json");
        let gateway_content = std::fs::read_to_string(&gateway_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {gateway_path}: {e}"))?;
        let gateway: GatewayConfig = serde_json::from_str(&gateway_content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {gateway_path}: {e}"))?;

        let policy_path = format!("{data_dir}/authorization_policy.json");
        let policy_content = std::fs::read_to_string(&policy_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {policy_path}: {e}"))?;
        let authorization: AuthorizationPolicyConfig = serde_json::from_str(&policy_content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {policy_path}: {e}"))?;

        Ok(Self {
            agent_tiers,
            fallback_tier: tiers_file.fallback_tier,
            commissions: commission_file.rules,
            gateway,
            authorization,
        })
    }

    /// Tier for an agent type; unknown types get the fallback tier.
    pub fn tier_for(&self, agent_type: &str) -> Option<&AgentTierConfig> {
        self.agent_tiers
            .get(agent_type)
            .or_else(|| self.agent_tiers.get(&self.fallback_tier))
    }

    pub fn commission_rule(&self, transaction_type: &str) -> Option<&CommissionBasis> {
        self.commissions
            .iter()
            .find(|r| r.transaction_type == transaction_type)
            .map(|r| &r.basis)
    }
}

impl Default for DfsConfig {
    fn default() -> Self {
        let tier = |agent_type: &str, daily: i64, txn: i64, rate_bp: i64| AgentTierConfig {
            agent_type: agent_type.to_string(),
            daily_limit: Decimal::from(daily),
            transaction_limit: Decimal::from(txn),
            // thousandths: 3 -> 0.003 (0.3%)
            commission_rate: Decimal::new(rate_bp, 3),
        };
        let agent_tiers = [
            tier("SUPER_AGENT", 5_000_000, 500_000, 3),
            tier("SUB_AGENT", 1_000_000, 100_000, 5),
            tier("RETAILER", 500_000, 50_000, 7),
        ]
        .into_iter()
        .map(|t| (t.agent_type.clone(), t))
        .collect();

        let percent = |transaction_type: &str, rate: Decimal| CommissionRule {
            transaction_type: transaction_type.to_string(),
            basis: CommissionBasis::Percent { rate },
        };
        let flat = |transaction_type: &str, amount: i64| CommissionRule {
            transaction_type: transaction_type.to_string(),
            basis: CommissionBasis::Flat {
                amount: Decimal::from(amount),
            },
        };
        let commissions = vec![
            percent("CASH_IN", Decimal::new(5, 3)),
            percent("CASH_OUT", Decimal::new(1, 2)),
            flat("BILL_PAYMENT", 10),
            flat("FUND_TRANSFER", 15),
        ];

        let rule = |transaction_type: &str, limits: &[(&str, i64)]| ThresholdRule {
            transaction_type: transaction_type.to_string(),
            role_limits: limits
                .iter()
                .map(|(role, limit)| (role.to_string(), Decimal::from(*limit)))
                .collect(),
        };
        let thresholds = vec![
            rule(
                "CASH_DEPOSIT",
                &[("TELLER", 50_000), ("SUPERVISOR", 200_000), ("BRANCH_MANAGER", 1_000_000)],
            ),
            rule(
                "CASH_WITHDRAWAL",
                &[("TELLER", 50_000), ("SUPERVISOR", 200_000), ("BRANCH_MANAGER", 1_000_000)],
            ),
            rule(
                "BANK_TRANSFER",
                &[("TELLER", 100_000), ("SUPERVISOR", 500_000), ("BRANCH_MANAGER", 2_000_000)],
            ),
            rule(
                "LOAN_APPLICATION",
                &[("LOAN_OFFICER", 500_000), ("SUPERVISOR", 1_000_000), ("BRANCH_MANAGER", 5_000_000)],
            ),
            rule(
                "LOAN_REPAYMENT",
                &[("TELLER", 200_000), ("LOAN_OFFICER", 500_000), ("SUPERVISOR", 1_000_000)],
            ),
            rule(
                "POLICY_SALE",
                &[("TELLER", 100_000), ("BANCASSURANCE_OFFICER", 250_000), ("SUPERVISOR", 1_000_000)],
            ),
            rule(
                "AGENT_FLOAT_TOPUP",
                &[("AGENCY_OFFICER", 100_000), ("SUPERVISOR", 500_000), ("BRANCH_MANAGER", 2_000_000)],
            ),
        ];

        Self {
            agent_tiers,
            fallback_tier: "RETAILER".to_string(),
            commissions,
            gateway: GatewayConfig {
                session_ttl_hours: 8,
                geofence_radius_km: 1.0,
                customer_daily_withdrawal_limit: Decimal::from(500_000),
            },
            authorization: AuthorizationPolicyConfig {
                always_require_approval: [
                    "CIF_CREATE",
                    "ACCOUNT_OPENING",
                    "ACCOUNT_CLOSURE",
                    "MANDATE_CHANGE",
                    "LOAN_RESTRUCTURE",
                    "CLAIMS_PROCESSING",
                    "VAULT_OPEN",
                    "VAULT_CLOSE",
                ]
                .iter()
                .map(|s| s.to_string())
                .collect(),
                thresholds,
                urgent_amount: Decimal::from(5_000_000),
                high_amount: Decimal::from(1_000_000),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_file_is_named_in_the_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("agent_tiers.json"), "{ not json").unwrap();

        let err = DfsConfig::load(dir.path().to_str().unwrap()).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("agent_tiers.json"), "got {message}");
        assert!(message.starts_with("Cannot parse"), "got {message}");
    }
}
