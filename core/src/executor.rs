//! Executors for approved queue items.
//!
//! One function per [`QueuedOperation`] variant, dispatched by a total match.
//! Executors run inside the approval's unit of work: any error here rolls
//! the approval back and the item stays PENDING.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{
    agent_manager::{AgentManager, FloatOperation},
    clock::Clock,
    config::DfsConfig,
    error::{DfsError, DfsResult},
    event::DfsEvent,
    ledger::{AccountStatus, Ledger, PostingMeta},
    operation::{
        AccountClosure, BankTransfer, CashMovement, FloatTopup, LoanApplication, LoanRepayment,
        NewAccount, NewCustomer, PolicySale, QueuedOperation,
    },
    store::BankStore,
    types::{short_uuid, validate_amount, EntityId, Money},
};

const CHANNEL: &str = "BRANCH";

db_enum! {
    pub enum CustomerType {
        Individual => "INDIVIDUAL",
        Business => "BUSINESS",
    }
}

db_enum! {
    pub enum LoanStatus {
        Active => "ACTIVE",
        Paid => "PAID",
    }
}

db_enum! {
    pub enum PolicyStatus {
        Active => "ACTIVE",
    }
}

/// Customer Information File record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub cif_number: EntityId,
    pub full_name: String,
    pub national_id: String,
    pub phone_number: String,
    pub email: Option<String>,
    pub customer_type: CustomerType,
    pub kyc_status: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Loan {
    pub loan_id: EntityId,
    pub account_number: EntityId,
    pub cif_number: Option<EntityId>,
    pub principal: Money,
    pub interest_rate: Decimal,
    pub term_months: u32,
    pub outstanding_balance: Money,
    pub status: LoanStatus,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsurancePolicy {
    pub policy_number: EntityId,
    pub account_number: EntityId,
    pub policy_type: String,
    pub premium: Money,
    pub sum_assured: Money,
    pub status: PolicyStatus,
    pub created_at: DateTime<Utc>,
}

/// What an executor did; persisted as the item's `execution_result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Posted {
        reference: String,
        account_number: EntityId,
        new_balance: Money,
    },
    Transferred {
        reference: String,
        from_balance: Money,
        to_balance: Money,
    },
    CustomerCreated {
        cif_number: EntityId,
    },
    AccountOpened {
        account_number: EntityId,
        balance: Money,
    },
    AccountClosed {
        account_number: EntityId,
    },
    LoanDisbursed {
        loan_id: EntityId,
        account_number: EntityId,
        principal: Money,
    },
    LoanRepaid {
        loan_id: EntityId,
        amount_applied: Money,
        refunded: Money,
        outstanding: Money,
        status: LoanStatus,
    },
    PolicyIssued {
        policy_number: EntityId,
        premium: Money,
    },
    FloatToppedUp {
        agent_id: EntityId,
        reference: String,
        new_balance: Money,
    },
}

/// Who approved what, and when.
#[derive(Debug, Clone)]
pub struct ExecutionContext<'a> {
    pub queue_id: &'a str,
    pub approved_by: &'a str,
    pub now: DateTime<Utc>,
}

pub struct Executor<'e> {
    store: &'e BankStore,
    config: &'e DfsConfig,
    clock: &'e dyn Clock,
}

impl<'e> Executor<'e> {
    pub fn new(store: &'e BankStore, config: &'e DfsConfig, clock: &'e dyn Clock) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    pub fn execute(
        &self,
        op: &QueuedOperation,
        ctx: &ExecutionContext<'_>,
    ) -> DfsResult<ExecutionOutcome> {
        log::debug!("executor: {} for {}", op.transaction_type(), ctx.queue_id);
        match op {
            QueuedOperation::CashDeposit(m) => self.cash_deposit(m, ctx),
            QueuedOperation::CashWithdrawal(m) => self.cash_withdrawal(m, ctx),
            QueuedOperation::BankTransfer(t) => self.bank_transfer(t, ctx),
            QueuedOperation::CifCreate(c) => self.create_customer(c, ctx),
            QueuedOperation::AccountOpening(a) => self.open_account(a, ctx),
            QueuedOperation::AccountClosure(c) => self.close_account(c),
            QueuedOperation::LoanApplication(l) => self.disburse_loan(l, ctx),
            QueuedOperation::LoanRepayment(r) => self.repay_loan(r, ctx),
            QueuedOperation::PolicySale(p) => self.sell_policy(p, ctx),
            QueuedOperation::AgentFloatTopup(f) => self.top_up_float(f, ctx),
        }
    }

    fn ledger(&self) -> Ledger<'e> {
        Ledger::new(self.store, self.clock)
    }

    fn cash_deposit(&self, m: &CashMovement, ctx: &ExecutionContext<'_>) -> DfsResult<ExecutionOutcome> {
        let narration = m.narration.as_deref().unwrap_or("Teller cash deposit");
        let posting = self.ledger().credit(
            &m.account_number,
            m.amount,
            ctx.queue_id,
            PostingMeta::new(narration, CHANNEL),
        )?;
        Ok(ExecutionOutcome::Posted {
            reference: posting.reference,
            account_number: posting.account_number,
            new_balance: posting.new_balance,
        })
    }

    fn cash_withdrawal(
        &self,
        m: &CashMovement,
        ctx: &ExecutionContext<'_>,
    ) -> DfsResult<ExecutionOutcome> {
        let narration = m.narration.as_deref().unwrap_or("Teller cash withdrawal");
        let posting = self.ledger().debit(
            &m.account_number,
            m.amount,
            ctx.queue_id,
            PostingMeta::new(narration, CHANNEL),
        )?;
        Ok(ExecutionOutcome::Posted {
            reference: posting.reference,
            account_number: posting.account_number,
            new_balance: posting.new_balance,
        })
    }

    fn bank_transfer(&self, t: &BankTransfer, ctx: &ExecutionContext<'_>) -> DfsResult<ExecutionOutcome> {
        let narration = t.narration.as_deref().unwrap_or("Bank transfer");
        let transfer = self.ledger().transfer(
            &t.from_account,
            &t.to_account,
            t.amount,
            Some(ctx.queue_id),
            PostingMeta::new(narration, CHANNEL),
        )?;
        Ok(ExecutionOutcome::Transferred {
            reference: transfer.reference,
            from_balance: transfer.debit.new_balance,
            to_balance: transfer.credit.new_balance,
        })
    }

    fn create_customer(&self, c: &NewCustomer, ctx: &ExecutionContext<'_>) -> DfsResult<ExecutionOutcome> {
        for (field, value) in [
            ("full_name", &c.full_name),
            ("national_id", &c.national_id),
            ("phone_number", &c.phone_number),
        ] {
            if value.trim().is_empty() {
                return Err(DfsError::Validation(format!("{field} is required")));
            }
        }
        if self.store.customer_exists_with_national_id(&c.national_id)? {
            return Err(DfsError::Duplicate {
                entity: "Customer",
                field: "national_id",
                value: c.national_id.clone(),
            });
        }

        let customer = Customer {
            cif_number: format!("CIF{}", short_uuid()),
            full_name: c.full_name.trim().to_string(),
            national_id: c.national_id.trim().to_string(),
            phone_number: c.phone_number.trim().to_string(),
            email: c.email.clone(),
            customer_type: c.customer_type,
            kyc_status: "PENDING".to_string(),
            created_by: ctx.approved_by.to_string(),
            created_at: ctx.now,
        };
        self.store.insert_customer(&customer)?;
        self.store.append_event(
            &DfsEvent::CustomerCreated {
                cif_number: customer.cif_number.clone(),
                created_by: ctx.approved_by.to_string(),
            },
            &ctx.now,
        )?;
        log::info!("executor: customer {} created", customer.cif_number);
        Ok(ExecutionOutcome::CustomerCreated {
            cif_number: customer.cif_number,
        })
    }

    fn open_account(&self, a: &NewAccount, ctx: &ExecutionContext<'_>) -> DfsResult<ExecutionOutcome> {
        if self.store.customer(&a.cif_number)?.is_none() {
            return Err(DfsError::NotFound {
                entity: "Customer",
                id: a.cif_number.clone(),
            });
        }
        let ledger = self.ledger();
        let account = ledger.open_account(&a.account_name, a.account_type, Some(&a.cif_number), None)?;
        let balance = match a.initial_deposit {
            Some(amount) if !amount.is_zero() => {
                ledger
                    .credit(
                        &account.account_number,
                        amount,
                        ctx.queue_id,
                        PostingMeta::new("Initial deposit", CHANNEL),
                    )?
                    .new_balance
            }
            _ => Money::ZERO,
        };
        Ok(ExecutionOutcome::AccountOpened {
            account_number: account.account_number,
            balance,
        })
    }

    fn close_account(&self, c: &AccountClosure) -> DfsResult<ExecutionOutcome> {
        self.ledger()
            .set_status(&c.account_number, AccountStatus::Disabled)?;
        Ok(ExecutionOutcome::AccountClosed {
            account_number: c.account_number.clone(),
        })
    }

    fn disburse_loan(&self, l: &LoanApplication, ctx: &ExecutionContext<'_>) -> DfsResult<ExecutionOutcome> {
        validate_amount(l.principal)?;
        if l.interest_rate < Decimal::ZERO || l.term_months == 0 {
            return Err(DfsError::Validation(
                "loan needs a non-negative rate and a term of at least one month".to_string(),
            ));
        }
        let account = self.ledger().account(&l.account_number)?;
        let loan = Loan {
            loan_id: format!("LN{}", short_uuid()),
            account_number: account.account_number.clone(),
            cif_number: account.cif_number.clone(),
            principal: l.principal,
            interest_rate: l.interest_rate,
            term_months: l.term_months,
            outstanding_balance: l.principal,
            status: LoanStatus::Active,
            created_at: ctx.now,
            closed_at: None,
        };
        self.store.insert_loan(&loan)?;
        self.ledger().credit(
            &account.account_number,
            l.principal,
            &loan.loan_id,
            PostingMeta::new("Loan disbursement", CHANNEL),
        )?;
        self.store.append_event(
            &DfsEvent::LoanDisbursed {
                loan_id: loan.loan_id.clone(),
                account_number: loan.account_number.clone(),
                principal: loan.principal,
            },
            &ctx.now,
        )?;
        Ok(ExecutionOutcome::LoanDisbursed {
            loan_id: loan.loan_id,
            account_number: loan.account_number,
            principal: loan.principal,
        })
    }

    /// Debit the full amount, apply what is owed and credit back any overpayment.
    fn repay_loan(&self, r: &LoanRepayment, ctx: &ExecutionContext<'_>) -> DfsResult<ExecutionOutcome> {
        let loan = self.store.loan(&r.loan_id)?.ok_or_else(|| DfsError::NotFound {
            entity: "Loan",
            id: r.loan_id.clone(),
        })?;
        if loan.status != LoanStatus::Active {
            return Err(DfsError::LoanNotActive {
                loan_id: loan.loan_id,
                status: loan.status.as_str().to_string(),
            });
        }

        let ledger = self.ledger();
        ledger.debit(
            &r.account_number,
            r.amount,
            ctx.queue_id,
            PostingMeta::new("Loan repayment", CHANNEL),
        )?;
        let amount_applied = r.amount.min(loan.outstanding_balance);
        let refunded = r.amount - amount_applied;
        if refunded > Money::ZERO {
            ledger.credit(
                &r.account_number,
                refunded,
                ctx.queue_id,
                PostingMeta::new("Loan overpayment refund", CHANNEL),
            )?;
        }

        let outstanding = loan.outstanding_balance - amount_applied;
        let (status, closed_at) = if outstanding.is_zero() {
            (LoanStatus::Paid, Some(ctx.now))
        } else {
            (LoanStatus::Active, None)
        };
        self.store
            .update_loan_balance(&loan.loan_id, outstanding, status, closed_at.as_ref())?;
        self.store.append_event(
            &DfsEvent::LoanRepaid {
                loan_id: loan.loan_id.clone(),
                amount_applied,
                outstanding,
            },
            &ctx.now,
        )?;
        Ok(ExecutionOutcome::LoanRepaid {
            loan_id: loan.loan_id,
            amount_applied,
            refunded,
            outstanding,
            status,
        })
    }

    fn sell_policy(&self, p: &PolicySale, ctx: &ExecutionContext<'_>) -> DfsResult<ExecutionOutcome> {
        validate_amount(p.sum_assured)?;
        if p.policy_type.trim().is_empty() {
            return Err(DfsError::Validation("policy_type is required".to_string()));
        }
        self.ledger().debit(
            &p.account_number,
            p.premium,
            ctx.queue_id,
            PostingMeta::new("Insurance premium", CHANNEL),
        )?;
        let policy = InsurancePolicy {
            policy_number: format!("POL{}", short_uuid()),
            account_number: p.account_number.clone(),
            policy_type: p.policy_type.trim().to_string(),
            premium: p.premium,
            sum_assured: p.sum_assured,
            status: PolicyStatus::Active,
            created_at: ctx.now,
        };
        self.store.insert_policy(&policy)?;
        self.store.append_event(
            &DfsEvent::PolicyIssued {
                policy_number: policy.policy_number.clone(),
                account_number: policy.account_number.clone(),
                premium: policy.premium,
            },
            &ctx.now,
        )?;
        Ok(ExecutionOutcome::PolicyIssued {
            policy_number: policy.policy_number,
            premium: policy.premium,
        })
    }

    fn top_up_float(&self, f: &FloatTopup, ctx: &ExecutionContext<'_>) -> DfsResult<ExecutionOutcome> {
        let reference = f.reference.as_deref().unwrap_or(ctx.queue_id);
        let txn = AgentManager::new(self.store, self.config, self.clock).adjust_float(
            &f.agent_id,
            FloatOperation::Credit,
            f.amount,
            ctx.approved_by,
            Some(reference),
        )?;
        Ok(ExecutionOutcome::FloatToppedUp {
            agent_id: txn.agent_id,
            reference: txn.reference,
            new_balance: txn.new_balance,
        })
    }
}
