use super::{decimal_col, expect_one, opt_ts_col, ts_col, unique_violation, BankStore};
use crate::{
    error::{DfsError, DfsResult},
    executor::{Customer, InsurancePolicy, Loan, LoanStatus},
    ledger::{Account, AccountStatus, LedgerPosting},
    types::{format_ts, from_minor, to_minor, Money},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

const ACCOUNT_COLUMNS: &str = "account_number, account_name, account_type, cif_number, agent_id,
                               balance, status, created_at";

fn account_from_row(r: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        account_number: r.get(0)?,
        account_name: r.get(1)?,
        account_type: r.get(2)?,
        cif_number: r.get(3)?,
        agent_id: r.get(4)?,
        balance: from_minor(r.get(5)?),
        status: r.get(6)?,
        created_at: ts_col(r, 7)?,
    })
}

impl BankStore {
    // ── Customer (CIF) ────────────────────────────────────────────

    pub fn insert_customer(&self, c: &Customer) -> DfsResult<()> {
        self.conn
            .execute(
                "INSERT INTO customer (
                     cif_number, full_name, national_id, phone_number, email,
                     customer_type, kyc_status, created_by, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    c.cif_number,
                    c.full_name,
                    c.national_id,
                    c.phone_number,
                    c.email,
                    c.customer_type,
                    c.kyc_status,
                    c.created_by,
                    format_ts(&c.created_at),
                ],
            )
            .map_err(|e| {
                if unique_violation(&e) {
                    DfsError::Duplicate {
                        entity: "Customer",
                        field: "national_id",
                        value: c.national_id.clone(),
                    }
                } else {
                    e.into()
                }
            })?;
        Ok(())
    }

    pub fn customer(&self, cif_number: &str) -> DfsResult<Option<Customer>> {
        let row = self
            .conn
            .query_row(
                "SELECT cif_number, full_name, national_id, phone_number, email,
                        customer_type, kyc_status, created_by, created_at
                 FROM customer WHERE cif_number = ?1",
                params![cif_number],
                |r| {
                    Ok(Customer {
                        cif_number: r.get(0)?,
                        full_name: r.get(1)?,
                        national_id: r.get(2)?,
                        phone_number: r.get(3)?,
                        email: r.get(4)?,
                        customer_type: r.get(5)?,
                        kyc_status: r.get(6)?,
                        created_by: r.get(7)?,
                        created_at: ts_col(r, 8)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn customer_exists_with_national_id(&self, national_id: &str) -> DfsResult<bool> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM customer WHERE national_id = ?1",
            params![national_id],
            |r| r.get(0),
        )?;
        Ok(n > 0)
    }

    /// Count customers (test helper).
    pub fn customer_count(&self) -> DfsResult<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM customer", [], |r| r.get(0))?)
    }

    // ── Account ───────────────────────────────────────────────────

    pub fn insert_account(&self, a: &Account) -> DfsResult<()> {
        self.conn.execute(
            "INSERT INTO account (
                 account_number, account_name, account_type, cif_number, agent_id,
                 balance, status, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                a.account_number,
                a.account_name,
                a.account_type,
                a.cif_number,
                a.agent_id,
                to_minor(a.balance)?,
                a.status,
                format_ts(&a.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn account(&self, account_number: &str) -> DfsResult<Option<Account>> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM account WHERE account_number = ?1");
        let row = self
            .conn
            .query_row(&sql, params![account_number], account_from_row)
            .optional()?;
        Ok(row)
    }

    pub fn set_account_balance(&self, account_number: &str, balance: Money) -> DfsResult<()> {
        let changed = self.conn.execute(
            "UPDATE account SET balance = ?1 WHERE account_number = ?2",
            params![to_minor(balance)?, account_number],
        )?;
        expect_one(changed, || DfsError::AccountNotFound(account_number.to_string()))
    }

    pub fn set_account_status(&self, account_number: &str, status: AccountStatus) -> DfsResult<()> {
        let changed = self.conn.execute(
            "UPDATE account SET status = ?1 WHERE account_number = ?2",
            params![status, account_number],
        )?;
        expect_one(changed, || DfsError::AccountNotFound(account_number.to_string()))
    }

    // ── Ledger postings ───────────────────────────────────────────

    pub fn insert_posting(&self, p: &LedgerPosting) -> DfsResult<()> {
        self.conn
            .execute(
                "INSERT INTO ledger_transaction (
                     account_number, entry_type, amount, old_balance, new_balance,
                     reference, narration, channel, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    p.account_number,
                    p.entry_type,
                    to_minor(p.amount)?,
                    to_minor(p.old_balance)?,
                    to_minor(p.new_balance)?,
                    p.reference,
                    p.narration,
                    p.channel,
                    format_ts(&p.created_at),
                ],
            )
            .map_err(|e| {
                if unique_violation(&e) {
                    DfsError::Duplicate {
                        entity: "Ledger posting",
                        field: "reference",
                        value: p.reference.clone(),
                    }
                } else {
                    e.into()
                }
            })?;
        Ok(())
    }

    /// Most recent postings first.
    pub fn postings_for_account(
        &self,
        account_number: &str,
        limit: usize,
    ) -> DfsResult<Vec<LedgerPosting>> {
        let mut stmt = self.conn.prepare(
            "SELECT account_number, entry_type, amount, old_balance, new_balance,
                    reference, narration, channel, created_at
             FROM ledger_transaction WHERE account_number = ?1
             ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![account_number, limit as i64], |r| {
            Ok(LedgerPosting {
                account_number: r.get(0)?,
                entry_type: r.get(1)?,
                amount: from_minor(r.get(2)?),
                old_balance: from_minor(r.get(3)?),
                new_balance: from_minor(r.get(4)?),
                reference: r.get(5)?,
                narration: r.get(6)?,
                channel: r.get(7)?,
                created_at: ts_col(r, 8)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn posting_count(&self, account_number: &str) -> DfsResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM ledger_transaction WHERE account_number = ?1",
            params![account_number],
            |r| r.get(0),
        )?)
    }

    // ── Loans ─────────────────────────────────────────────────────

    pub fn insert_loan(&self, l: &Loan) -> DfsResult<()> {
        self.conn.execute(
            "INSERT INTO loan (
                 loan_id, account_number, cif_number, principal, interest_rate,
                 term_months, outstanding_balance, status, created_at, closed_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                l.loan_id,
                l.account_number,
                l.cif_number,
                to_minor(l.principal)?,
                l.interest_rate.to_string(),
                l.term_months,
                to_minor(l.outstanding_balance)?,
                l.status,
                format_ts(&l.created_at),
                l.closed_at.as_ref().map(format_ts),
            ],
        )?;
        Ok(())
    }

    pub fn loan(&self, loan_id: &str) -> DfsResult<Option<Loan>> {
        let row = self
            .conn
            .query_row(
                "SELECT loan_id, account_number, cif_number, principal, interest_rate,
                        term_months, outstanding_balance, status, created_at, closed_at
                 FROM loan WHERE loan_id = ?1",
                params![loan_id],
                |r| {
                    Ok(Loan {
                        loan_id: r.get(0)?,
                        account_number: r.get(1)?,
                        cif_number: r.get(2)?,
                        principal: from_minor(r.get(3)?),
                        interest_rate: decimal_col(r, 4)?,
                        term_months: r.get(5)?,
                        outstanding_balance: from_minor(r.get(6)?),
                        status: r.get(7)?,
                        created_at: ts_col(r, 8)?,
                        closed_at: opt_ts_col(r, 9)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn update_loan_balance(
        &self,
        loan_id: &str,
        outstanding: Money,
        status: LoanStatus,
        closed_at: Option<&DateTime<Utc>>,
    ) -> DfsResult<()> {
        let changed = self.conn.execute(
            "UPDATE loan SET outstanding_balance = ?1, status = ?2, closed_at = ?3
             WHERE loan_id = ?4",
            params![to_minor(outstanding)?, status, closed_at.map(format_ts), loan_id],
        )?;
        expect_one(changed, || DfsError::NotFound {
            entity: "Loan",
            id: loan_id.to_string(),
        })
    }

    // ── Insurance policies ────────────────────────────────────────

    pub fn insert_policy(&self, p: &InsurancePolicy) -> DfsResult<()> {
        self.conn.execute(
            "INSERT INTO insurance_policy (
                 policy_number, account_number, policy_type, premium, sum_assured,
                 status, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                p.policy_number,
                p.account_number,
                p.policy_type,
                to_minor(p.premium)?,
                to_minor(p.sum_assured)?,
                p.status,
                format_ts(&p.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn policies_for_account(&self, account_number: &str) -> DfsResult<Vec<InsurancePolicy>> {
        let mut stmt = self.conn.prepare(
            "SELECT policy_number, account_number, policy_type, premium, sum_assured,
                    status, created_at
             FROM insurance_policy WHERE account_number = ?1
             ORDER BY created_at ASC",
        )?;
        let rows = stmt.query_map(params![account_number], |r| {
            Ok(InsurancePolicy {
                policy_number: r.get(0)?,
                account_number: r.get(1)?,
                policy_type: r.get(2)?,
                premium: from_minor(r.get(3)?),
                sum_assured: from_minor(r.get(4)?),
                status: r.get(5)?,
                created_at: ts_col(r, 6)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
