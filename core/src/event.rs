//! Audit events for every state change the platform makes.
//!
//! RULE: an event is appended in the same transaction as the change it
//! describes, so the log never claims something that was rolled back.

use crate::types::{EntityId, Money};
use serde::{Deserialize, Serialize};

/// Variants are added over time and never removed or reordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DfsEvent {
    // ── Ledger ─────────────────────────────────────
    AccountOpened {
        account_number: EntityId,
        account_type: String,
        cif_number: Option<EntityId>,
    },
    AccountStatusChanged {
        account_number: EntityId,
        old_status: String,
        new_status: String,
    },

    // ── Agents ─────────────────────────────────────
    AgentOnboarded {
        agent_id: EntityId,
        agent_type: String,
        parent_agent_id: Option<EntityId>,
    },
    AgentStatusChanged {
        agent_id: EntityId,
        old_status: String,
        new_status: String,
        changed_by: String,
        reason: String,
    },
    FloatAdjusted {
        agent_id: EntityId,
        transaction_type: String,
        amount: Money,
        new_balance: Money,
        reference: String,
    },
    CommissionsSettled {
        agent_id: EntityId,
        count: i64,
        total: Money,
    },

    // ── Gateway ────────────────────────────────────
    AgentAuthenticated {
        agent_id: EntityId,
        device_id: String,
    },
    AgentAuthenticationFailed {
        agent_id: EntityId,
        device_id: String,
        reason: String,
    },
    AgencyTransactionCompleted {
        agent_id: EntityId,
        transaction_ref: String,
        transaction_type: String,
        amount: Money,
        commission: Money,
    },

    // ── Authorization queue ────────────────────────
    QueueItemSubmitted {
        queue_id: EntityId,
        transaction_type: String,
        maker_id: String,
        priority: String,
    },
    QueueItemCompleted {
        queue_id: EntityId,
        transaction_type: String,
        approved_by: String,
    },
    QueueItemRejected {
        queue_id: EntityId,
        rejected_by: String,
        reason: String,
    },
    CustomerCreated {
        cif_number: EntityId,
        created_by: String,
    },
    LoanDisbursed {
        loan_id: EntityId,
        account_number: EntityId,
        principal: Money,
    },
    LoanRepaid {
        loan_id: EntityId,
        amount_applied: Money,
        outstanding: Money,
    },
    PolicyIssued {
        policy_number: EntityId,
        account_number: EntityId,
        premium: Money,
    },
}

impl DfsEvent {
    /// The id of the entity this event is about, for the indexed column.
    pub fn entity_id(&self) -> &str {
        match self {
            Self::AccountOpened { account_number, .. }
            | Self::AccountStatusChanged { account_number, .. } => account_number,
            Self::AgentOnboarded { agent_id, .. }
            | Self::AgentStatusChanged { agent_id, .. }
            | Self::FloatAdjusted { agent_id, .. }
            | Self::CommissionsSettled { agent_id, .. }
            | Self::AgentAuthenticated { agent_id, .. }
            | Self::AgentAuthenticationFailed { agent_id, .. }
            | Self::AgencyTransactionCompleted { agent_id, .. } => agent_id,
            Self::QueueItemSubmitted { queue_id, .. }
            | Self::QueueItemCompleted { queue_id, .. }
            | Self::QueueItemRejected { queue_id, .. } => queue_id,
            Self::CustomerCreated { cif_number, .. } => cif_number,
            Self::LoanDisbursed { loan_id, .. } | Self::LoanRepaid { loan_id, .. } => loan_id,
            Self::PolicyIssued { policy_number, .. } => policy_number,
        }
    }
}

/// Extract a stable string name from a DfsEvent variant.
/// Used for the event_type column in event_log.
pub fn event_type_name(event: &DfsEvent) -> &'static str {
    match event {
        DfsEvent::AccountOpened { .. }               => "account_opened",
        DfsEvent::AccountStatusChanged { .. }        => "account_status_changed",
        DfsEvent::AgentOnboarded { .. }              => "agent_onboarded",
        DfsEvent::AgentStatusChanged { .. }          => "agent_status_changed",
        DfsEvent::FloatAdjusted { .. }               => "float_adjusted",
        DfsEvent::CommissionsSettled { .. }          => "commissions_settled",
        DfsEvent::AgentAuthenticated { .. }          => "agent_authenticated",
        DfsEvent::AgentAuthenticationFailed { .. }   => "agent_authentication_failed",
        DfsEvent::AgencyTransactionCompleted { .. }  => "agency_transaction_completed",
        DfsEvent::QueueItemSubmitted { .. }          => "queue_item_submitted",
        DfsEvent::QueueItemCompleted { .. }          => "queue_item_completed",
        DfsEvent::QueueItemRejected { .. }           => "queue_item_rejected",
        DfsEvent::CustomerCreated { .. }             => "customer_created",
        DfsEvent::LoanDisbursed { .. }               => "loan_disbursed",
        DfsEvent::LoanRepaid { .. }                  => "loan_repaid",
        DfsEvent::PolicyIssued { .. }                => "policy_issued",
    }
}

/// The event log entry as persisted to SQLite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub id: Option<i64>,
    pub event_type: String,
    pub entity_id: String,
    pub payload: String, // JSON-serialized DfsEvent
    pub created_at: String,
}
