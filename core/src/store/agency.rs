use super::{opt_ts_col, ts_col, unique_violation, BankStore};
use crate::{
    agency_gateway::{
        AgencyTransaction, AgencyTxnStatus, AgencyTxnType, AgentCommission, AuthAttempt,
        AuthStatus, CommissionStatus, Session,
    },
    agent_manager::TypeVolume,
    error::{DfsError, DfsResult},
    geo::GeoPoint,
    types::{day_key, format_ts, from_minor, to_minor, Money},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

const AGENCY_TXN_COLUMNS: &str = "transaction_ref, agent_id, customer_account, transaction_type,
                                  amount, commission, status, failure_reason, device_id,
                                  latitude, longitude, created_at, completed_at";

fn agency_txn_from_row(r: &Row<'_>) -> rusqlite::Result<AgencyTransaction> {
    let latitude: Option<f64> = r.get(9)?;
    let longitude: Option<f64> = r.get(10)?;
    Ok(AgencyTransaction {
        transaction_ref: r.get(0)?,
        agent_id: r.get(1)?,
        customer_account: r.get(2)?,
        transaction_type: r.get(3)?,
        amount: from_minor(r.get(4)?),
        commission: from_minor(r.get(5)?),
        status: r.get(6)?,
        failure_reason: r.get(7)?,
        device_id: r.get(8)?,
        location: latitude.zip(longitude).map(|(lat, lon)| GeoPoint::new(lat, lon)),
        created_at: ts_col(r, 11)?,
        completed_at: opt_ts_col(r, 12)?,
    })
}

impl BankStore {
    // ── Sessions ──────────────────────────────────────────────────

    pub fn insert_auth_attempt(&self, a: &AuthAttempt) -> DfsResult<()> {
        self.conn.execute(
            "INSERT INTO agent_auth_log (
                 agent_id, device_id, status, failure_reason, session_token,
                 latitude, longitude, biometric_used, created_at, expires_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                a.agent_id,
                a.device_id,
                a.status,
                a.failure_reason,
                a.session_token,
                a.location.map(|p| p.latitude),
                a.location.map(|p| p.longitude),
                a.biometric_used,
                format_ts(&a.created_at),
                a.expires_at.as_ref().map(format_ts),
            ],
        )?;
        Ok(())
    }

    /// The SUCCESS row carrying `token`, expired or not.
    pub fn session(&self, token: &str) -> DfsResult<Option<Session>> {
        let row = self
            .conn
            .query_row(
                "SELECT session_token, agent_id, device_id, created_at, expires_at
                 FROM agent_auth_log
                 WHERE session_token = ?1 AND status = ?2 AND expires_at IS NOT NULL",
                params![token, AuthStatus::Success],
                |r| {
                    Ok(Session {
                        session_token: r.get(0)?,
                        agent_id: r.get(1)?,
                        device_id: r.get(2)?,
                        issued_at: ts_col(r, 3)?,
                        expires_at: ts_col(r, 4)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn auth_attempt_count(&self, agent_id: &str, status: AuthStatus) -> DfsResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM agent_auth_log WHERE agent_id = ?1 AND status = ?2",
            params![agent_id, status],
            |r| r.get(0),
        )?)
    }

    // ── Agency transactions ───────────────────────────────────────

    pub fn insert_agency_transaction(&self, t: &AgencyTransaction) -> DfsResult<()> {
        self.conn
            .execute(
                "INSERT INTO agency_transaction (
                     transaction_ref, agent_id, customer_account, transaction_type,
                     amount, commission, status, failure_reason, device_id,
                     latitude, longitude, txn_date, created_at, completed_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    t.transaction_ref,
                    t.agent_id,
                    t.customer_account,
                    t.transaction_type,
                    to_minor(t.amount)?,
                    to_minor(t.commission)?,
                    t.status,
                    t.failure_reason,
                    t.device_id,
                    t.location.map(|p| p.latitude),
                    t.location.map(|p| p.longitude),
                    day_key(&t.created_at),
                    format_ts(&t.created_at),
                    t.completed_at.as_ref().map(format_ts),
                ],
            )
            .map_err(|e| {
                if unique_violation(&e) {
                    DfsError::Duplicate {
                        entity: "Agency transaction",
                        field: "transaction_ref",
                        value: t.transaction_ref.clone(),
                    }
                } else {
                    e.into()
                }
            })?;
        Ok(())
    }

    pub fn agency_transaction(&self, transaction_ref: &str) -> DfsResult<Option<AgencyTransaction>> {
        let sql = format!("SELECT {AGENCY_TXN_COLUMNS} FROM agency_transaction WHERE transaction_ref = ?1");
        let row = self
            .conn
            .query_row(&sql, params![transaction_ref], agency_txn_from_row)
            .optional()?;
        Ok(row)
    }

    /// Sum of the agent's COMPLETED amounts on `day` (YYYY-MM-DD).
    pub fn agent_completed_total(&self, agent_id: &str, day: &str) -> DfsResult<Money> {
        let minor: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(amount), 0) FROM agency_transaction
             WHERE agent_id = ?1 AND txn_date = ?2 AND status = ?3",
            params![agent_id, day, AgencyTxnStatus::Completed],
            |r| r.get(0),
        )?;
        Ok(from_minor(minor))
    }

    /// Sum of COMPLETED CASH_OUT amounts against one customer account on `day`,
    /// across all agents.
    pub fn customer_withdrawal_total(&self, account_number: &str, day: &str) -> DfsResult<Money> {
        let minor: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(amount), 0) FROM agency_transaction
             WHERE customer_account = ?1 AND txn_date = ?2
               AND transaction_type = ?3 AND status = ?4",
            params![
                account_number,
                day,
                AgencyTxnType::CashOut,
                AgencyTxnStatus::Completed
            ],
            |r| r.get(0),
        )?;
        Ok(from_minor(minor))
    }

    pub fn agency_transaction_count(&self, agent_id: &str, status: AgencyTxnStatus) -> DfsResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM agency_transaction WHERE agent_id = ?1 AND status = ?2",
            params![agent_id, status],
            |r| r.get(0),
        )?)
    }

    /// COMPLETED count and volume per type since `since`.
    pub fn completed_volume_by_type(
        &self,
        agent_id: &str,
        since: &DateTime<Utc>,
    ) -> DfsResult<Vec<TypeVolume>> {
        let mut stmt = self.conn.prepare(
            "SELECT transaction_type, COUNT(*), COALESCE(SUM(amount), 0)
             FROM agency_transaction
             WHERE agent_id = ?1 AND status = ?2 AND created_at >= ?3
             GROUP BY transaction_type ORDER BY transaction_type",
        )?;
        let rows = stmt.query_map(
            params![agent_id, AgencyTxnStatus::Completed, format_ts(since)],
            |r| {
                Ok(TypeVolume {
                    transaction_type: r.get(0)?,
                    count: r.get(1)?,
                    volume: from_minor(r.get(2)?),
                })
            },
        )?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    // ── Commissions ───────────────────────────────────────────────

    pub fn insert_commission(&self, c: &AgentCommission) -> DfsResult<()> {
        self.conn.execute(
            "INSERT INTO agent_commission (
                 agent_id, transaction_ref, commission_amount, commission_type,
                 status, created_at, paid_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                c.agent_id,
                c.transaction_ref,
                to_minor(c.commission_amount)?,
                c.commission_type,
                c.status,
                format_ts(&c.created_at),
                c.paid_at.as_ref().map(format_ts),
            ],
        )?;
        Ok(())
    }

    pub fn commissions_for_agent(&self, agent_id: &str) -> DfsResult<Vec<AgentCommission>> {
        let mut stmt = self.conn.prepare(
            "SELECT agent_id, transaction_ref, commission_amount, commission_type,
                    status, created_at, paid_at
             FROM agent_commission WHERE agent_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![agent_id], |r| {
            Ok(AgentCommission {
                agent_id: r.get(0)?,
                transaction_ref: r.get(1)?,
                commission_amount: from_minor(r.get(2)?),
                commission_type: r.get(3)?,
                status: r.get(4)?,
                created_at: ts_col(r, 5)?,
                paid_at: opt_ts_col(r, 6)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Commission earned since `since`, excluding reversals.
    pub fn commission_total_since(&self, agent_id: &str, since: &DateTime<Utc>) -> DfsResult<Money> {
        let minor: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(commission_amount), 0) FROM agent_commission
             WHERE agent_id = ?1 AND status != ?2 AND created_at >= ?3",
            params![agent_id, CommissionStatus::Reversed, format_ts(since)],
            |r| r.get(0),
        )?;
        Ok(from_minor(minor))
    }

    /// Flip every PENDING commission to PAID; returns how many and their total.
    pub fn mark_commissions_paid(&self, agent_id: &str, at: &DateTime<Utc>) -> DfsResult<(i64, Money)> {
        let (count, minor): (i64, i64) = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(commission_amount), 0) FROM agent_commission
             WHERE agent_id = ?1 AND status = ?2",
            params![agent_id, CommissionStatus::Pending],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;
        self.conn.execute(
            "UPDATE agent_commission SET status = ?1, paid_at = ?2
             WHERE agent_id = ?3 AND status = ?4",
            params![
                CommissionStatus::Paid,
                format_ts(at),
                agent_id,
                CommissionStatus::Pending
            ],
        )?;
        Ok((count, from_minor(minor)))
    }

    // ── Audit ─────────────────────────────────────────────────────

    pub fn insert_agency_audit(
        &self,
        agent_id: &str,
        transaction_type: AgencyTxnType,
        request: &str,
        response: &str,
        success: bool,
        at: &DateTime<Utc>,
    ) -> DfsResult<()> {
        self.conn.execute(
            "INSERT INTO agency_audit_log (agent_id, transaction_type, request, response, success, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![agent_id, transaction_type, request, response, success, format_ts(at)],
        )?;
        Ok(())
    }

    pub fn agency_audit_count(&self, agent_id: &str) -> DfsResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM agency_audit_log WHERE agent_id = ?1",
            params![agent_id],
            |r| r.get(0),
        )?)
    }

    /// Success flag of each audit row, oldest first.
    pub fn agency_audit_outcomes(&self, agent_id: &str) -> DfsResult<Vec<bool>> {
        let mut stmt = self
            .conn
            .prepare("SELECT success FROM agency_audit_log WHERE agent_id = ?1 ORDER BY id ASC")?;
        let rows = stmt.query_map(params![agent_id], |r| r.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
