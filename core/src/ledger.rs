//! Ledger primitives: the only code that changes an account balance.
//!
//! Each primitive checks, mutates the balance and appends its posting inside
//! one unit of work. Called from inside a larger unit (cash-in, an approved
//! queue item) it joins that unit instead, so a later failure rolls the
//! posting back with everything else.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    clock::Clock,
    error::{DfsError, DfsResult},
    event::DfsEvent,
    store::BankStore,
    types::{generate_reference, validate_amount, EntityId, Money},
};

db_enum! {
    pub enum AccountStatus {
        Active => "ACTIVE",
        Frozen => "FROZEN",
        Disabled => "DISABLED",
    }
}

db_enum! {
    pub enum AccountType {
        Savings => "SAVINGS",
        Current => "CURRENT",
        Business => "BUSINESS",
        Settlement => "SETTLEMENT",
        Internal => "INTERNAL",
    }
}

db_enum! {
    pub enum EntryType {
        Debit => "DEBIT",
        Credit => "CREDIT",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub account_number: EntityId,
    pub account_name: String,
    pub account_type: AccountType,
    pub cif_number: Option<EntityId>,
    /// Set for agent settlement accounts.
    pub agent_id: Option<EntityId>,
    pub balance: Money,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
}

/// One immutable row of the core ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerPosting {
    pub account_number: EntityId,
    pub entry_type: EntryType,
    pub amount: Money,
    pub old_balance: Money,
    pub new_balance: Money,
    pub reference: String,
    pub narration: String,
    pub channel: String,
    pub created_at: DateTime<Utc>,
}

/// Free-form context written alongside a posting.
#[derive(Debug, Clone, Copy)]
pub struct PostingMeta<'a> {
    pub narration: &'a str,
    pub channel: &'a str,
}

impl<'a> PostingMeta<'a> {
    pub fn new(narration: &'a str, channel: &'a str) -> Self {
        Self { narration, channel }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub reference: String,
    pub debit: LedgerPosting,
    pub credit: LedgerPosting,
}

pub struct Ledger<'e> {
    store: &'e BankStore,
    clock: &'e dyn Clock,
}

impl<'e> Ledger<'e> {
    pub fn new(store: &'e BankStore, clock: &'e dyn Clock) -> Self {
        Self { store, clock }
    }

    /// Open an account with a zero balance.
    pub fn open_account(
        &self,
        account_name: &str,
        account_type: AccountType,
        cif_number: Option<&str>,
        agent_id: Option<&str>,
    ) -> DfsResult<Account> {
        let now = self.clock.now();
        let account = Account {
            account_number: generate_account_number(account_type),
            account_name: account_name.to_string(),
            account_type,
            cif_number: cif_number.map(str::to_string),
            agent_id: agent_id.map(str::to_string),
            balance: Money::ZERO,
            status: AccountStatus::Active,
            created_at: now,
        };
        self.store.atomic(|s| {
            s.insert_account(&account)?;
            s.append_event(
                &DfsEvent::AccountOpened {
                    account_number: account.account_number.clone(),
                    account_type: account_type.as_str().to_string(),
                    cif_number: account.cif_number.clone(),
                },
                &now,
            )?;
            Ok(())
        })?;
        Ok(account)
    }

    pub fn account(&self, account_number: &str) -> DfsResult<Account> {
        self.store
            .account(account_number)?
            .ok_or_else(|| DfsError::AccountNotFound(account_number.to_string()))
    }

    /// Fails with `InsufficientFunds` when the balance is below `amount`
    /// and `AccountNotActive` unless the account is ACTIVE.
    pub fn debit(
        &self,
        account_number: &str,
        amount: Money,
        reference: &str,
        meta: PostingMeta<'_>,
    ) -> DfsResult<LedgerPosting> {
        validate_amount(amount)?;
        self.store.atomic(|s| {
            let account = active_account(s, account_number)?;
            if account.balance < amount {
                return Err(DfsError::InsufficientFunds {
                    account: account.account_number,
                    available: account.balance,
                    requested: amount,
                });
            }
            post(s, &account, EntryType::Debit, amount, reference, meta, &self.clock.now())
        })
    }

    pub fn credit(
        &self,
        account_number: &str,
        amount: Money,
        reference: &str,
        meta: PostingMeta<'_>,
    ) -> DfsResult<LedgerPosting> {
        validate_amount(amount)?;
        self.store.atomic(|s| {
            let account = active_account(s, account_number)?;
            post(s, &account, EntryType::Credit, amount, reference, meta, &self.clock.now())
        })
    }

    /// Debit then credit under one unit of work; a failed credit undoes the debit.
    pub fn transfer(
        &self,
        from_account: &str,
        to_account: &str,
        amount: Money,
        reference: Option<&str>,
        meta: PostingMeta<'_>,
    ) -> DfsResult<Transfer> {
        if from_account == to_account {
            return Err(DfsError::Validation(
                "cannot transfer to the same account".to_string(),
            ));
        }
        let reference = reference
            .map(str::to_string)
            .unwrap_or_else(|| generate_reference("TRF", &self.clock.now()));
        self.store.atomic(|_| {
            let debit = self.debit(from_account, amount, &reference, meta)?;
            let credit = self.credit(to_account, amount, &reference, meta)?;
            Ok(Transfer {
                reference: reference.clone(),
                debit,
                credit,
            })
        })
    }

    pub fn statement(&self, account_number: &str, limit: usize) -> DfsResult<Vec<LedgerPosting>> {
        self.account(account_number)?;
        self.store.postings_for_account(account_number, limit)
    }

    /// Change an account's status (freeze, close). Closing requires a zero balance.
    pub fn set_status(&self, account_number: &str, status: AccountStatus) -> DfsResult<Account> {
        let now = self.clock.now();
        self.store.atomic(|s| {
            let mut account = s
                .account(account_number)?
                .ok_or_else(|| DfsError::AccountNotFound(account_number.to_string()))?;
            if account.status == status {
                return Ok(account);
            }
            if status == AccountStatus::Disabled && !account.balance.is_zero() {
                return Err(DfsError::Validation(format!(
                    "account {account_number} has balance {} and cannot be closed",
                    account.balance
                )));
            }
            s.set_account_status(account_number, status)?;
            s.append_event(
                &DfsEvent::AccountStatusChanged {
                    account_number: account_number.to_string(),
                    old_status: account.status.as_str().to_string(),
                    new_status: status.as_str().to_string(),
                },
                &now,
            )?;
            account.status = status;
            Ok(account)
        })
    }
}

fn active_account(store: &BankStore, account_number: &str) -> DfsResult<Account> {
    let account = store
        .account(account_number)?
        .ok_or_else(|| DfsError::AccountNotFound(account_number.to_string()))?;
    if account.status != AccountStatus::Active {
        return Err(DfsError::AccountNotActive {
            account: account.account_number,
            status: account.status.as_str().to_string(),
        });
    }
    Ok(account)
}

/// Apply one posting: new balance plus its ledger row. Caller holds the unit of work.
fn post(
    store: &BankStore,
    account: &Account,
    entry_type: EntryType,
    amount: Money,
    reference: &str,
    meta: PostingMeta<'_>,
    at: &DateTime<Utc>,
) -> DfsResult<LedgerPosting> {
    let new_balance = match entry_type {
        EntryType::Debit => account.balance - amount,
        EntryType::Credit => account.balance + amount,
    };
    let posting = LedgerPosting {
        account_number: account.account_number.clone(),
        entry_type,
        amount,
        old_balance: account.balance,
        new_balance,
        reference: reference.to_string(),
        narration: meta.narration.to_string(),
        channel: meta.channel.to_string(),
        created_at: *at,
    };
    store.set_account_balance(&account.account_number, new_balance)?;
    store.insert_posting(&posting)?;
    log::debug!(
        "ledger: {} {} {amount} ({} -> {}) ref={reference}",
        entry_type,
        account.account_number,
        posting.old_balance,
        posting.new_balance
    );
    Ok(posting)
}

fn generate_account_number(account_type: AccountType) -> String {
    let prefix = match account_type {
        AccountType::Savings => "SAV",
        AccountType::Current => "CUR",
        AccountType::Business => "BUS",
        AccountType::Settlement => "STL",
        AccountType::Internal => "INT",
    };
    format!("{prefix}{}", crate::types::short_uuid())
}
