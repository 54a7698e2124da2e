use serde::Serialize;
use thiserror::Error;

use crate::types::Money;

#[derive(Error, Debug)]
pub enum DfsError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation failed: {0}")]
    Validation(String),

    // ── Lookups ────────────────────────────────────────────────
    #[error("Agent '{0}' not found")]
    AgentNotFound(String),

    #[error("Agent '{0}' not found or inactive")]
    AgentNotFoundOrInactive(String),

    #[error("Account '{0}' not found")]
    AccountNotFound(String),

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Queue item '{0}' not found")]
    QueueItemNotFound(String),

    // ── Conflicts ──────────────────────────────────────────────
    #[error("Agent already registered with {field} '{value}'")]
    DuplicateAgent { field: &'static str, value: String },

    #[error("{entity} already exists with {field} '{value}'")]
    Duplicate {
        entity: &'static str,
        field: &'static str,
        value: String,
    },

    #[error("Agent '{agent_id}' is not pending approval (status {status})")]
    NotPendingApproval { agent_id: String, status: String },

    #[error("Agent '{agent_id}' is not active (status {status})")]
    AgentNotActive { agent_id: String, status: String },

    #[error("Agent '{agent_id}' cannot move from {from} to {to}")]
    InvalidAgentTransition {
        agent_id: String,
        from: String,
        to: String,
    },

    #[error("Account '{account}' is not active (status {status})")]
    AccountNotActive { account: String, status: String },

    #[error("Queue item '{queue_id}' is not pending (status {status})")]
    QueueItemNotPending { queue_id: String, status: String },

    #[error("Loan '{loan_id}' is not active (status {status})")]
    LoanNotActive { loan_id: String, status: String },

    // ── Funds and limits ───────────────────────────────────────
    #[error("Insufficient funds in '{account}': available {available}, requested {requested}")]
    InsufficientFunds {
        account: String,
        available: Money,
        requested: Money,
    },

    #[error("Insufficient float for agent '{agent_id}': available {available}, requested {requested}")]
    InsufficientFloat {
        agent_id: String,
        available: Money,
        requested: Money,
    },

    #[error("Insufficient agent float: available {available}, requested {requested}")]
    InsufficientAgentFloat { available: Money, requested: Money },

    #[error("Insufficient customer balance: available {available}, requested {requested}")]
    InsufficientCustomerBalance { available: Money, requested: Money },

    #[error("Amount {amount} exceeds transaction limit {limit}")]
    ExceedsTransactionLimit { amount: Money, limit: Money },

    #[error("Daily limit {limit} exceeded: used {used}, requested {amount}")]
    ExceedsDailyLimit {
        used: Money,
        amount: Money,
        limit: Money,
    },

    #[error("Customer daily withdrawal limit {limit} exceeded: withdrawn {used}, requested {amount}")]
    DailyWithdrawalLimitExceeded {
        used: Money,
        amount: Money,
        limit: Money,
    },

    #[error("Invalid or inactive customer account '{0}'")]
    InvalidCustomerAccount(String),

    // ── Authentication ─────────────────────────────────────────
    #[error("Invalid PIN")]
    InvalidPin,

    #[error("Location verification failed: {distance_km:.2} km from last known location")]
    LocationVerificationFailed { distance_km: f64 },

    #[error("Invalid or expired session")]
    InvalidSession,

    #[error("Unsupported transaction type '{0}'")]
    UnsupportedTransactionType(String),

    // ── Authorization ──────────────────────────────────────────
    #[error("Maker '{user_id}' cannot authorize their own queue item '{queue_id}'")]
    SelfApproval { queue_id: String, user_id: String },

    // ── Execution ──────────────────────────────────────────────
    #[error("Execution of queue item '{queue_id}' failed: {source}")]
    ExecutionFailed {
        queue_id: String,
        #[source]
        source: Box<DfsError>,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Error taxonomy surfaced to callers alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    InsufficientFunds,
    Authentication,
    Authorization,
    Execution,
    Internal,
}

impl DfsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) | Self::UnsupportedTransactionType(_) => ErrorKind::Validation,

            Self::AgentNotFound(_)
            | Self::AccountNotFound(_)
            | Self::NotFound { .. }
            | Self::QueueItemNotFound(_)
            | Self::InvalidCustomerAccount(_) => ErrorKind::NotFound,

            Self::DuplicateAgent { .. }
            | Self::Duplicate { .. }
            | Self::NotPendingApproval { .. }
            | Self::AgentNotActive { .. }
            | Self::InvalidAgentTransition { .. }
            | Self::AccountNotActive { .. }
            | Self::QueueItemNotPending { .. }
            | Self::LoanNotActive { .. } => ErrorKind::Conflict,

            Self::InsufficientFunds { .. }
            | Self::InsufficientFloat { .. }
            | Self::InsufficientAgentFloat { .. }
            | Self::InsufficientCustomerBalance { .. }
            | Self::ExceedsTransactionLimit { .. }
            | Self::ExceedsDailyLimit { .. }
            | Self::DailyWithdrawalLimitExceeded { .. } => ErrorKind::InsufficientFunds,

            Self::AgentNotFoundOrInactive(_)
            | Self::InvalidPin
            | Self::LocationVerificationFailed { .. }
            | Self::InvalidSession => ErrorKind::Authentication,

            Self::SelfApproval { .. } => ErrorKind::Authorization,

            Self::ExecutionFailed { .. } => ErrorKind::Execution,

            Self::Database(_) | Self::Serialization(_) | Self::Other(_) => ErrorKind::Internal,
        }
    }
}

pub type DfsResult<T> = Result<T, DfsError>;
