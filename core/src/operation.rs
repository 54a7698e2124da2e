//! Operations that can be parked in the authorization queue.
//!
//! Each variant is a self-contained snapshot of everything its executor
//! needs, so approval never depends on live state captured at submit time.
//! On the wire the enum is `{ "transaction_type": ..., "operation_data": {...} }`,
//! which is also how the queue row stores it.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    error::{DfsError, DfsResult},
    executor::CustomerType,
    ledger::AccountType,
    types::{EntityId, Money},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashMovement {
    pub account_number: EntityId,
    pub amount: Money,
    #[serde(default)]
    pub narration: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankTransfer {
    pub from_account: EntityId,
    pub to_account: EntityId,
    pub amount: Money,
    #[serde(default)]
    pub narration: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCustomer {
    pub full_name: String,
    pub national_id: String,
    pub phone_number: String,
    #[serde(default)]
    pub email: Option<String>,
    pub customer_type: CustomerType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAccount {
    pub cif_number: EntityId,
    pub account_name: String,
    pub account_type: AccountType,
    #[serde(default)]
    pub initial_deposit: Option<Money>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountClosure {
    pub account_number: EntityId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanApplication {
    pub account_number: EntityId,
    pub principal: Money,
    /// Annual rate as a fraction.
    pub interest_rate: Decimal,
    pub term_months: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoanRepayment {
    pub loan_id: EntityId,
    /// Account the repayment is drawn from.
    pub account_number: EntityId,
    pub amount: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicySale {
    pub account_number: EntityId,
    pub policy_type: String,
    pub premium: Money,
    pub sum_assured: Money,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloatTopup {
    pub agent_id: EntityId,
    pub amount: Money,
    #[serde(default)]
    pub reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "transaction_type",
    content = "operation_data",
    rename_all = "SCREAMING_SNAKE_CASE"
)]
pub enum QueuedOperation {
    CashDeposit(CashMovement),
    CashWithdrawal(CashMovement),
    BankTransfer(BankTransfer),
    CifCreate(NewCustomer),
    AccountOpening(NewAccount),
    AccountClosure(AccountClosure),
    LoanApplication(LoanApplication),
    LoanRepayment(LoanRepayment),
    PolicySale(PolicySale),
    AgentFloatTopup(FloatTopup),
}

impl QueuedOperation {
    pub fn transaction_type(&self) -> &'static str {
        match self {
            Self::CashDeposit(_) => "CASH_DEPOSIT",
            Self::CashWithdrawal(_) => "CASH_WITHDRAWAL",
            Self::BankTransfer(_) => "BANK_TRANSFER",
            Self::CifCreate(_) => "CIF_CREATE",
            Self::AccountOpening(_) => "ACCOUNT_OPENING",
            Self::AccountClosure(_) => "ACCOUNT_CLOSURE",
            Self::LoanApplication(_) => "LOAN_APPLICATION",
            Self::LoanRepayment(_) => "LOAN_REPAYMENT",
            Self::PolicySale(_) => "POLICY_SALE",
            Self::AgentFloatTopup(_) => "AGENT_FLOAT_TOPUP",
        }
    }

    /// Amount shown to the checker and fed to threshold evaluation.
    pub fn amount(&self) -> Money {
        match self {
            Self::CashDeposit(m) | Self::CashWithdrawal(m) => m.amount,
            Self::BankTransfer(t) => t.amount,
            Self::AccountOpening(a) => a.initial_deposit.unwrap_or(Money::ZERO),
            Self::LoanApplication(l) => l.principal,
            Self::LoanRepayment(r) => r.amount,
            Self::PolicySale(p) => p.premium,
            Self::AgentFloatTopup(f) => f.amount,
            Self::CifCreate(_) | Self::AccountClosure(_) => Money::ZERO,
        }
    }

    /// The entity the operation is about.
    pub fn reference_id(&self) -> &str {
        match self {
            Self::CashDeposit(m) | Self::CashWithdrawal(m) => &m.account_number,
            Self::BankTransfer(t) => &t.from_account,
            Self::CifCreate(c) => &c.national_id,
            Self::AccountOpening(a) => &a.cif_number,
            Self::AccountClosure(c) => &c.account_number,
            Self::LoanApplication(l) => &l.account_number,
            Self::LoanRepayment(r) => &r.loan_id,
            Self::PolicySale(p) => &p.account_number,
            Self::AgentFloatTopup(f) => &f.agent_id,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::CashDeposit(m) => format!("Cash deposit of {} to {}", m.amount, m.account_number),
            Self::CashWithdrawal(m) => {
                format!("Cash withdrawal of {} from {}", m.amount, m.account_number)
            }
            Self::BankTransfer(t) => format!(
                "Transfer of {} from {} to {}",
                t.amount, t.from_account, t.to_account
            ),
            Self::CifCreate(c) => format!("New {} customer: {}", c.customer_type, c.full_name),
            Self::AccountOpening(a) => {
                format!("Open {} account '{}' for {}", a.account_type, a.account_name, a.cif_number)
            }
            Self::AccountClosure(c) => format!("Close account {}: {}", c.account_number, c.reason),
            Self::LoanApplication(l) => format!(
                "Loan of {} over {} months to {}",
                l.principal, l.term_months, l.account_number
            ),
            Self::LoanRepayment(r) => format!("Repayment of {} on loan {}", r.amount, r.loan_id),
            Self::PolicySale(p) => format!(
                "{} policy on {} (premium {})",
                p.policy_type, p.account_number, p.premium
            ),
            Self::AgentFloatTopup(f) => format!("Float top-up of {} for {}", f.amount, f.agent_id),
        }
    }

    /// Split into the queue row's `transaction_type` and `operation_data` columns.
    pub fn to_parts(&self) -> DfsResult<(&'static str, Value)> {
        let mut envelope = serde_json::to_value(self)?;
        let data = envelope
            .get_mut("operation_data")
            .map(Value::take)
            .unwrap_or(Value::Null);
        Ok((self.transaction_type(), data))
    }

    /// Rebuild from the stored columns. Unknown types are a validation error.
    pub fn from_parts(transaction_type: &str, operation_data: &Value) -> DfsResult<Self> {
        serde_json::from_value(json!({
            "transaction_type": transaction_type,
            "operation_data": operation_data,
        }))
        .map_err(|e| {
            DfsError::Validation(format!("cannot decode {transaction_type} operation: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn wire_shape_is_type_plus_data() {
        let op = QueuedOperation::CashDeposit(CashMovement {
            account_number: "SAV1".into(),
            amount: dec!(1500),
            narration: None,
        });
        let (kind, data) = op.to_parts().unwrap();
        assert_eq!(kind, "CASH_DEPOSIT");
        assert_eq!(data["account_number"], "SAV1");
        assert_eq!(QueuedOperation::from_parts(kind, &data).unwrap(), op);
    }

    #[test]
    fn unknown_type_does_not_decode() {
        let err = QueuedOperation::from_parts("VAULT_OPEN", &json!({})).unwrap_err();
        assert!(matches!(err, DfsError::Validation(_)));
    }
}
