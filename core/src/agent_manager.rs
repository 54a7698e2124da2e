//! Agent hierarchy and float manager.
//!
//! Agents are onboarded PENDING_APPROVAL, become ACTIVE only through an
//! explicit approval, and may then be suspended, reactivated or terminated.
//! The float balance is the agent's prepaid cash inventory: every change to
//! it writes exactly one `agent_float_transaction` row in the same unit of
//! work, and it can never go below zero.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    agency_gateway::AgencyTxnType,
    clock::Clock,
    config::DfsConfig,
    error::{DfsError, DfsResult},
    event::DfsEvent,
    geo::GeoPoint,
    ledger::{AccountType, Ledger},
    store::BankStore,
    types::{generate_reference, short_uuid, validate_amount, EntityId, Money},
};

db_enum! {
    pub enum AgentType {
        SuperAgent => "SUPER_AGENT",
        SubAgent => "SUB_AGENT",
        Retailer => "RETAILER",
    }
}

db_enum! {
    pub enum AgentStatus {
        PendingApproval => "PENDING_APPROVAL",
        Active => "ACTIVE",
        Suspended => "SUSPENDED",
        Terminated => "TERMINATED",
    }
}

db_enum! {
    pub enum FloatTxnType {
        Credit => "CREDIT",
        Debit => "DEBIT",
        InitialCredit => "INITIAL_CREDIT",
    }
}

db_enum! {
    /// Direction of a manual float adjustment.
    pub enum FloatOperation {
        Credit => "CREDIT",
        Debit => "DEBIT",
    }
}

impl FloatTxnType {
    pub fn is_debit(&self) -> bool {
        matches!(self, Self::Debit)
    }
}

impl From<FloatOperation> for FloatTxnType {
    fn from(op: FloatOperation) -> Self {
        match op {
            FloatOperation::Credit => Self::Credit,
            FloatOperation::Debit => Self::Debit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Agent {
    pub agent_id: EntityId,
    pub agent_name: String,
    pub national_id: String,
    pub phone_number: String,
    pub agent_type: AgentType,
    pub parent_agent_id: Option<EntityId>,
    pub business_name: Option<String>,
    #[serde(skip)]
    pub pin_hash: String,
    pub daily_limit: Money,
    pub transaction_limit: Money,
    pub commission_rate: Decimal,
    pub float_balance: Money,
    pub status: AgentStatus,
    pub settlement_account: EntityId,
    pub last_location: Option<GeoPoint>,
    pub last_login: Option<DateTime<Utc>>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KycDocument {
    pub document_type: String,
    pub document_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnboardAgentRequest {
    pub agent_name: String,
    pub national_id: String,
    pub phone_number: String,
    pub agent_type: AgentType,
    #[serde(default)]
    pub parent_agent_id: Option<EntityId>,
    #[serde(default)]
    pub business_name: Option<String>,
    pub pin: String,
    /// Business premises; seeds the geofence reference point.
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub kyc_documents: Vec<KycDocument>,
    pub created_by: String,
}

/// One immutable float ledger row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FloatTransaction {
    pub agent_id: EntityId,
    pub transaction_type: FloatTxnType,
    pub amount: Money,
    pub reference: String,
    pub old_balance: Money,
    pub new_balance: Money,
    pub processed_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusChange {
    pub agent_id: EntityId,
    pub old_status: AgentStatus,
    pub new_status: AgentStatus,
    pub changed_by: String,
    pub reason: String,
    pub changed_at: DateTime<Utc>,
}

/// An agent with its direct parent and direct children (one level only).
#[derive(Debug, Clone, Serialize)]
pub struct AgentHierarchy {
    pub agent: Agent,
    pub parent: Option<Agent>,
    pub children: Vec<Agent>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypeVolume {
    pub transaction_type: AgencyTxnType,
    pub count: i64,
    pub volume: Money,
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentPerformance {
    pub agent_id: EntityId,
    pub period_days: u32,
    pub period_start: DateTime<Utc>,
    pub by_type: Vec<TypeVolume>,
    pub total_transactions: i64,
    pub total_volume: Money,
    pub total_commission: Money,
    pub float_balance: Money,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommissionSettlement {
    pub agent_id: EntityId,
    pub count: i64,
    pub total: Money,
    /// Float credit carrying the payout; None when nothing was pending.
    pub float_transaction: Option<FloatTransaction>,
}

pub struct AgentManager<'e> {
    store: &'e BankStore,
    config: &'e DfsConfig,
    clock: &'e dyn Clock,
}

impl<'e> AgentManager<'e> {
    pub fn new(store: &'e BankStore, config: &'e DfsConfig, clock: &'e dyn Clock) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    pub fn agent(&self, agent_id: &str) -> DfsResult<Agent> {
        self.store
            .agent(agent_id)?
            .ok_or_else(|| DfsError::AgentNotFound(agent_id.to_string()))
    }

    /// Register a new agent in PENDING_APPROVAL with tier-default limits and
    /// a zero-balance settlement account. KYC documents are stored unverified.
    pub fn onboard(&self, req: &OnboardAgentRequest) -> DfsResult<Agent> {
        validate_onboarding(req)?;
        let tier = self
            .config
            .tier_for(req.agent_type.as_str())
            .ok_or_else(|| {
                DfsError::Validation(format!("no limits configured for {}", req.agent_type))
            })?;
        let now = self.clock.now();
        let agent_id = format!("AGT-{}", short_uuid());

        let agent = self.store.atomic(|s| {
            if s.agent_with_national_id(&req.national_id)? {
                return Err(DfsError::DuplicateAgent {
                    field: "national_id",
                    value: req.national_id.clone(),
                });
            }
            if s.agent_with_phone(&req.phone_number)? {
                return Err(DfsError::DuplicateAgent {
                    field: "phone_number",
                    value: req.phone_number.clone(),
                });
            }
            if let Some(parent_id) = &req.parent_agent_id {
                let parent = s
                    .agent(parent_id)?
                    .ok_or_else(|| DfsError::AgentNotFound(parent_id.clone()))?;
                if parent.status == AgentStatus::Terminated {
                    return Err(DfsError::Validation(format!(
                        "parent agent {parent_id} is terminated"
                    )));
                }
            }

            let settlement = Ledger::new(s, self.clock).open_account(
                &format!("{} settlement", req.agent_name.trim()),
                AccountType::Settlement,
                None,
                Some(&agent_id),
            )?;

            let agent = Agent {
                agent_id: agent_id.clone(),
                agent_name: req.agent_name.trim().to_string(),
                national_id: req.national_id.trim().to_string(),
                phone_number: req.phone_number.trim().to_string(),
                agent_type: req.agent_type,
                parent_agent_id: req.parent_agent_id.clone(),
                business_name: req.business_name.clone(),
                pin_hash: hash_pin(&agent_id, &req.pin),
                daily_limit: tier.daily_limit,
                transaction_limit: tier.transaction_limit,
                commission_rate: tier.commission_rate,
                float_balance: Money::ZERO,
                status: AgentStatus::PendingApproval,
                settlement_account: settlement.account_number,
                last_location: req.location,
                last_login: None,
                created_by: req.created_by.clone(),
                created_at: now,
                approved_by: None,
                approved_at: None,
            };
            s.insert_agent(&agent)?;
            for doc in &req.kyc_documents {
                s.insert_kyc_document(&agent_id, doc, &now)?;
            }
            s.append_event(
                &DfsEvent::AgentOnboarded {
                    agent_id: agent_id.clone(),
                    agent_type: agent.agent_type.as_str().to_string(),
                    parent_agent_id: agent.parent_agent_id.clone(),
                },
                &now,
            )?;
            Ok(agent)
        })?;

        log::info!(
            "agent: onboarded {} ({}) pending approval",
            agent.agent_id,
            agent.agent_type
        );
        Ok(agent)
    }

    /// PENDING_APPROVAL → ACTIVE, optionally seeding the float with an
    /// INITIAL_CREDIT. Approving twice fails with `NotPendingApproval`.
    pub fn approve(
        &self,
        agent_id: &str,
        approver_id: &str,
        initial_float: Option<Money>,
    ) -> DfsResult<Agent> {
        if let Some(amount) = initial_float {
            validate_amount(amount)?;
        }
        let now = self.clock.now();
        let agent = self.store.atomic(|s| {
            let agent = s
                .agent(agent_id)?
                .ok_or_else(|| DfsError::AgentNotFound(agent_id.to_string()))?;
            if agent.status != AgentStatus::PendingApproval {
                return Err(DfsError::NotPendingApproval {
                    agent_id: agent_id.to_string(),
                    status: agent.status.as_str().to_string(),
                });
            }
            change_status(
                s,
                &agent,
                AgentStatus::Active,
                approver_id,
                "agent approved",
                &now,
            )?;
            s.mark_agent_approved(agent_id, approver_id, &now)?;

            if let Some(amount) = initial_float {
                let active = s
                    .agent(agent_id)?
                    .ok_or_else(|| DfsError::AgentNotFound(agent_id.to_string()))?;
                let reference = generate_reference("IFL", &now);
                post_float(
                    s,
                    &active,
                    FloatTxnType::InitialCredit,
                    amount,
                    &reference,
                    approver_id,
                    &now,
                )?;
            }
            s.agent(agent_id)?
                .ok_or_else(|| DfsError::AgentNotFound(agent_id.to_string()))
        })?;

        log::info!(
            "agent: {agent_id} approved by {approver_id}, float {}",
            agent.float_balance
        );
        Ok(agent)
    }

    /// Manually credit or debit an ACTIVE agent's float.
    pub fn adjust_float(
        &self,
        agent_id: &str,
        operation: FloatOperation,
        amount: Money,
        processed_by: &str,
        reference: Option<&str>,
    ) -> DfsResult<FloatTransaction> {
        validate_amount(amount)?;
        let now = self.clock.now();
        let reference = reference
            .map(str::to_string)
            .unwrap_or_else(|| generate_reference("FLT", &now));

        let txn = self.store.atomic(|s| {
            let agent = s
                .agent(agent_id)?
                .ok_or_else(|| DfsError::AgentNotFound(agent_id.to_string()))?;
            if agent.status != AgentStatus::Active {
                return Err(DfsError::AgentNotActive {
                    agent_id: agent_id.to_string(),
                    status: agent.status.as_str().to_string(),
                });
            }
            post_float(
                s,
                &agent,
                operation.into(),
                amount,
                &reference,
                processed_by,
                &now,
            )
        })?;

        log::info!(
            "agent: float {} {amount} for {agent_id} ({} -> {})",
            txn.transaction_type,
            txn.old_balance,
            txn.new_balance
        );
        Ok(txn)
    }

    /// ACTIVE → SUSPENDED.
    pub fn suspend(&self, agent_id: &str, reason: &str, suspended_by: &str) -> DfsResult<Agent> {
        self.transition(
            agent_id,
            &[AgentStatus::Active],
            AgentStatus::Suspended,
            suspended_by,
            reason,
            |_| Ok(()),
        )
    }

    /// SUSPENDED → ACTIVE.
    pub fn reactivate(&self, agent_id: &str, reason: &str, reactivated_by: &str) -> DfsResult<Agent> {
        self.transition(
            agent_id,
            &[AgentStatus::Suspended],
            AgentStatus::Active,
            reactivated_by,
            reason,
            |_| Ok(()),
        )
    }

    /// ACTIVE or SUSPENDED → TERMINATED. The float must be fully withdrawn first.
    pub fn terminate(&self, agent_id: &str, reason: &str, terminated_by: &str) -> DfsResult<Agent> {
        self.transition(
            agent_id,
            &[AgentStatus::Active, AgentStatus::Suspended],
            AgentStatus::Terminated,
            terminated_by,
            reason,
            |agent| {
                if agent.float_balance.is_zero() {
                    return Ok(());
                }
                Err(DfsError::InvalidAgentTransition {
                    agent_id: agent.agent_id.clone(),
                    from: format!("{} with float {}", agent.status, agent.float_balance),
                    to: AgentStatus::Terminated.as_str().to_string(),
                })
            },
        )
    }

    /// `guard` sees the agent row read under the write lock.
    fn transition(
        &self,
        agent_id: &str,
        allowed_from: &[AgentStatus],
        to: AgentStatus,
        changed_by: &str,
        reason: &str,
        guard: impl Fn(&Agent) -> DfsResult<()>,
    ) -> DfsResult<Agent> {
        if reason.trim().is_empty() {
            return Err(DfsError::Validation("a reason is required".to_string()));
        }
        let now = self.clock.now();
        let agent = self.store.atomic(|s| {
            let agent = s
                .agent(agent_id)?
                .ok_or_else(|| DfsError::AgentNotFound(agent_id.to_string()))?;
            if !allowed_from.contains(&agent.status) {
                return Err(if allowed_from == [AgentStatus::Active] {
                    DfsError::AgentNotActive {
                        agent_id: agent_id.to_string(),
                        status: agent.status.as_str().to_string(),
                    }
                } else {
                    DfsError::InvalidAgentTransition {
                        agent_id: agent_id.to_string(),
                        from: agent.status.as_str().to_string(),
                        to: to.as_str().to_string(),
                    }
                });
            }
            guard(&agent)?;
            change_status(s, &agent, to, changed_by, reason, &now)?;
            s.agent(agent_id)?
                .ok_or_else(|| DfsError::AgentNotFound(agent_id.to_string()))
        })?;
        log::info!("agent: {agent_id} -> {to} by {changed_by}: {reason}");
        Ok(agent)
    }

    pub fn hierarchy(&self, agent_id: &str) -> DfsResult<AgentHierarchy> {
        let agent = self.agent(agent_id)?;
        let parent = match &agent.parent_agent_id {
            Some(parent_id) => self.store.agent(parent_id)?,
            None => None,
        };
        let children = self.store.child_agents(agent_id)?;
        Ok(AgentHierarchy {
            agent,
            parent,
            children,
        })
    }

    /// Completed transactions and commissions over the last `period_days`.
    pub fn performance(&self, agent_id: &str, period_days: u32) -> DfsResult<AgentPerformance> {
        if period_days == 0 {
            return Err(DfsError::Validation("period must be at least one day".to_string()));
        }
        let agent = self.agent(agent_id)?;
        let period_start = self.clock.now() - Duration::days(i64::from(period_days));
        let by_type = self.store.completed_volume_by_type(agent_id, &period_start)?;
        let total_commission = self.store.commission_total_since(agent_id, &period_start)?;

        Ok(AgentPerformance {
            agent_id: agent.agent_id,
            period_days,
            period_start,
            total_transactions: by_type.iter().map(|t| t.count).sum(),
            total_volume: by_type.iter().map(|t| t.volume).sum(),
            by_type,
            total_commission,
            float_balance: agent.float_balance,
        })
    }

    /// Pay out every PENDING commission into the agent's float.
    pub fn settle_commissions(
        &self,
        agent_id: &str,
        processed_by: &str,
    ) -> DfsResult<CommissionSettlement> {
        let now = self.clock.now();
        let settlement = self.store.atomic(|s| {
            let agent = s
                .agent(agent_id)?
                .ok_or_else(|| DfsError::AgentNotFound(agent_id.to_string()))?;
            if agent.status != AgentStatus::Active {
                return Err(DfsError::AgentNotActive {
                    agent_id: agent_id.to_string(),
                    status: agent.status.as_str().to_string(),
                });
            }
            let (count, total) = s.mark_commissions_paid(agent_id, &now)?;
            let float_transaction = if total > Money::ZERO {
                let reference = generate_reference("COM", &now);
                Some(post_float(
                    s,
                    &agent,
                    FloatTxnType::Credit,
                    total,
                    &reference,
                    processed_by,
                    &now,
                )?)
            } else {
                None
            };
            s.append_event(
                &DfsEvent::CommissionsSettled {
                    agent_id: agent_id.to_string(),
                    count,
                    total,
                },
                &now,
            )?;
            Ok(CommissionSettlement {
                agent_id: agent_id.to_string(),
                count,
                total,
                float_transaction,
            })
        })?;
        log::info!(
            "agent: settled {} commissions ({}) for {agent_id}",
            settlement.count,
            settlement.total
        );
        Ok(settlement)
    }

    /// Most recent float movements first.
    pub fn float_statement(&self, agent_id: &str, limit: usize) -> DfsResult<Vec<FloatTransaction>> {
        self.agent(agent_id)?;
        self.store.float_transactions(agent_id, limit)
    }

    pub fn status_history(&self, agent_id: &str) -> DfsResult<Vec<StatusChange>> {
        self.agent(agent_id)?;
        self.store.status_history(agent_id)
    }
}

/// Salted PIN digest; the agent id is the salt.
pub(crate) fn hash_pin(agent_id: &str, pin: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(agent_id.as_bytes());
    hasher.update(b":");
    hasher.update(pin.as_bytes());
    hex::encode(hasher.finalize())
}

/// Move the float by `amount` and write its ledger row. Caller holds the
/// unit of work and has loaded `agent` inside it.
pub(crate) fn post_float(
    store: &BankStore,
    agent: &Agent,
    transaction_type: FloatTxnType,
    amount: Money,
    reference: &str,
    processed_by: &str,
    at: &DateTime<Utc>,
) -> DfsResult<FloatTransaction> {
    let old_balance = agent.float_balance;
    let new_balance = if transaction_type.is_debit() {
        if old_balance < amount {
            return Err(DfsError::InsufficientFloat {
                agent_id: agent.agent_id.clone(),
                available: old_balance,
                requested: amount,
            });
        }
        old_balance - amount
    } else {
        old_balance + amount
    };

    let txn = FloatTransaction {
        agent_id: agent.agent_id.clone(),
        transaction_type,
        amount,
        reference: reference.to_string(),
        old_balance,
        new_balance,
        processed_by: processed_by.to_string(),
        created_at: *at,
    };
    store.set_float_balance(&agent.agent_id, new_balance)?;
    store.insert_float_transaction(&txn)?;
    store.append_event(
        &DfsEvent::FloatAdjusted {
            agent_id: agent.agent_id.clone(),
            transaction_type: transaction_type.as_str().to_string(),
            amount,
            new_balance,
            reference: reference.to_string(),
        },
        at,
    )?;
    Ok(txn)
}

fn change_status(
    store: &BankStore,
    agent: &Agent,
    to: AgentStatus,
    changed_by: &str,
    reason: &str,
    at: &DateTime<Utc>,
) -> DfsResult<()> {
    if !store.update_agent_status(&agent.agent_id, agent.status, to)? {
        // Another connection moved the agent between our read and write.
        return Err(DfsError::InvalidAgentTransition {
            agent_id: agent.agent_id.clone(),
            from: agent.status.as_str().to_string(),
            to: to.as_str().to_string(),
        });
    }
    store.insert_status_change(&StatusChange {
        agent_id: agent.agent_id.clone(),
        old_status: agent.status,
        new_status: to,
        changed_by: changed_by.to_string(),
        reason: reason.to_string(),
        changed_at: *at,
    })?;
    store.append_event(
        &DfsEvent::AgentStatusChanged {
            agent_id: agent.agent_id.clone(),
            old_status: agent.status.as_str().to_string(),
            new_status: to.as_str().to_string(),
            changed_by: changed_by.to_string(),
            reason: reason.to_string(),
        },
        at,
    )
}

fn validate_onboarding(req: &OnboardAgentRequest) -> DfsResult<()> {
    let required = [
        ("agent_name", &req.agent_name),
        ("national_id", &req.national_id),
        ("phone_number", &req.phone_number),
        ("created_by", &req.created_by),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            return Err(DfsError::Validation(format!("{field} is required")));
        }
    }
    let pin_ok = (4..=6).contains(&req.pin.len()) && req.pin.chars().all(|c| c.is_ascii_digit());
    if !pin_ok {
        return Err(DfsError::Validation("PIN must be 4 to 6 digits".to_string()));
    }
    if let Some(location) = req.location {
        if !location.is_valid() {
            return Err(DfsError::Validation("location is out of range".to_string()));
        }
    }
    for doc in &req.kyc_documents {
        if doc.document_type.trim().is_empty() || doc.document_ref.trim().is_empty() {
            return Err(DfsError::Validation(
                "KYC documents need a type and a reference".to_string(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pin_hash_is_salted_by_agent() {
        assert_eq!(hash_pin("AGT-1", "1234"), hash_pin("AGT-1", "1234"));
        assert_ne!(hash_pin("AGT-1", "1234"), hash_pin("AGT-2", "1234"));
        assert_eq!(hash_pin("AGT-1", "1234").len(), 64);
    }
}
