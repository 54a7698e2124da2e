use super::{decimal_col, expect_one, opt_ts_col, ts_col, unique_violation, BankStore};
use crate::{
    agent_manager::{Agent, AgentStatus, FloatTransaction, KycDocument, StatusChange},
    error::{DfsError, DfsResult},
    geo::GeoPoint,
    types::{format_ts, from_minor, to_minor, Money},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

const AGENT_COLUMNS: &str = "agent_id, agent_name, national_id, phone_number, agent_type,
                             parent_agent_id, business_name, pin_hash, daily_limit,
                             transaction_limit, commission_rate, float_balance, status,
                             settlement_account, last_latitude, last_longitude, last_login,
                             created_by, created_at, approved_by, approved_at";

fn agent_from_row(r: &Row<'_>) -> rusqlite::Result<Agent> {
    let latitude: Option<f64> = r.get(14)?;
    let longitude: Option<f64> = r.get(15)?;
    Ok(Agent {
        agent_id: r.get(0)?,
        agent_name: r.get(1)?,
        national_id: r.get(2)?,
        phone_number: r.get(3)?,
        agent_type: r.get(4)?,
        parent_agent_id: r.get(5)?,
        business_name: r.get(6)?,
        pin_hash: r.get(7)?,
        daily_limit: from_minor(r.get(8)?),
        transaction_limit: from_minor(r.get(9)?),
        commission_rate: decimal_col(r, 10)?,
        float_balance: from_minor(r.get(11)?),
        status: r.get(12)?,
        settlement_account: r.get(13)?,
        last_location: latitude.zip(longitude).map(|(lat, lon)| GeoPoint::new(lat, lon)),
        last_login: opt_ts_col(r, 16)?,
        created_by: r.get(17)?,
        created_at: ts_col(r, 18)?,
        approved_by: r.get(19)?,
        approved_at: opt_ts_col(r, 20)?,
    })
}

impl BankStore {
    // ── Agent ─────────────────────────────────────────────────────

    pub fn insert_agent(&self, a: &Agent) -> DfsResult<()> {
        self.conn
            .execute(
                "INSERT INTO agent (
                     agent_id, agent_name, national_id, phone_number, agent_type,
                     parent_agent_id, business_name, pin_hash, daily_limit,
                     transaction_limit, commission_rate, float_balance, status,
                     settlement_account, last_latitude, last_longitude, last_login,
                     created_by, created_at, approved_by, approved_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                           ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)",
                params![
                    a.agent_id,
                    a.agent_name,
                    a.national_id,
                    a.phone_number,
                    a.agent_type,
                    a.parent_agent_id,
                    a.business_name,
                    a.pin_hash,
                    to_minor(a.daily_limit)?,
                    to_minor(a.transaction_limit)?,
                    a.commission_rate.to_string(),
                    to_minor(a.float_balance)?,
                    a.status,
                    a.settlement_account,
                    a.last_location.map(|p| p.latitude),
                    a.last_location.map(|p| p.longitude),
                    a.last_login.as_ref().map(format_ts),
                    a.created_by,
                    format_ts(&a.created_at),
                    a.approved_by,
                    a.approved_at.as_ref().map(format_ts),
                ],
            )
            .map_err(|e| {
                if unique_violation(&e) {
                    DfsError::DuplicateAgent {
                        field: "national_id or phone_number",
                        value: a.national_id.clone(),
                    }
                } else {
                    e.into()
                }
            })?;
        Ok(())
    }

    pub fn agent(&self, agent_id: &str) -> DfsResult<Option<Agent>> {
        let sql = format!("SELECT {AGENT_COLUMNS} FROM agent WHERE agent_id = ?1");
        let row = self
            .conn
            .query_row(&sql, params![agent_id], agent_from_row)
            .optional()?;
        Ok(row)
    }

    pub fn agent_with_national_id(&self, national_id: &str) -> DfsResult<bool> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM agent WHERE national_id = ?1",
            params![national_id],
            |r| r.get(0),
        )?;
        Ok(n > 0)
    }

    pub fn agent_with_phone(&self, phone_number: &str) -> DfsResult<bool> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM agent WHERE phone_number = ?1",
            params![phone_number],
            |r| r.get(0),
        )?;
        Ok(n > 0)
    }

    /// Direct children only.
    pub fn child_agents(&self, parent_agent_id: &str) -> DfsResult<Vec<Agent>> {
        let sql = format!(
            "SELECT {AGENT_COLUMNS} FROM agent WHERE parent_agent_id = ?1
             ORDER BY created_at ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![parent_agent_id], agent_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Compare-and-swap on status. Returns false when the agent was no
    /// longer in `from`.
    pub fn update_agent_status(
        &self,
        agent_id: &str,
        from: AgentStatus,
        to: AgentStatus,
    ) -> DfsResult<bool> {
        let changed = self.conn.execute(
            "UPDATE agent SET status = ?1 WHERE agent_id = ?2 AND status = ?3",
            params![to, agent_id, from],
        )?;
        Ok(changed == 1)
    }

    pub fn mark_agent_approved(
        &self,
        agent_id: &str,
        approved_by: &str,
        at: &DateTime<Utc>,
    ) -> DfsResult<()> {
        let changed = self.conn.execute(
            "UPDATE agent SET approved_by = ?1, approved_at = ?2 WHERE agent_id = ?3",
            params![approved_by, format_ts(at), agent_id],
        )?;
        expect_one(changed, || DfsError::AgentNotFound(agent_id.to_string()))
    }

    pub fn set_float_balance(&self, agent_id: &str, balance: Money) -> DfsResult<()> {
        let changed = self.conn.execute(
            "UPDATE agent SET float_balance = ?1 WHERE agent_id = ?2",
            params![to_minor(balance)?, agent_id],
        )?;
        expect_one(changed, || DfsError::AgentNotFound(agent_id.to_string()))
    }

    pub fn record_agent_login(
        &self,
        agent_id: &str,
        at: &DateTime<Utc>,
        location: Option<GeoPoint>,
    ) -> DfsResult<()> {
        let changed = self.conn.execute(
            "UPDATE agent SET last_login = ?1,
                              last_latitude = COALESCE(?2, last_latitude),
                              last_longitude = COALESCE(?3, last_longitude)
             WHERE agent_id = ?4",
            params![
                format_ts(at),
                location.map(|p| p.latitude),
                location.map(|p| p.longitude),
                agent_id
            ],
        )?;
        expect_one(changed, || DfsError::AgentNotFound(agent_id.to_string()))
    }

    // ── Float ledger ──────────────────────────────────────────────

    pub fn insert_float_transaction(&self, t: &FloatTransaction) -> DfsResult<()> {
        self.conn
            .execute(
                "INSERT INTO agent_float_transaction (
                     agent_id, transaction_type, amount, reference, old_balance,
                     new_balance, processed_by, created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    t.agent_id,
                    t.transaction_type,
                    to_minor(t.amount)?,
                    t.reference,
                    to_minor(t.old_balance)?,
                    to_minor(t.new_balance)?,
                    t.processed_by,
                    format_ts(&t.created_at),
                ],
            )
            .map_err(|e| {
                if unique_violation(&e) {
                    DfsError::Duplicate {
                        entity: "Float transaction",
                        field: "reference",
                        value: t.reference.clone(),
                    }
                } else {
                    e.into()
                }
            })?;
        Ok(())
    }

    /// Most recent first.
    pub fn float_transactions(
        &self,
        agent_id: &str,
        limit: usize,
    ) -> DfsResult<Vec<FloatTransaction>> {
        let mut stmt = self.conn.prepare(
            "SELECT agent_id, transaction_type, amount, reference, old_balance,
                    new_balance, processed_by, created_at
             FROM agent_float_transaction WHERE agent_id = ?1
             ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![agent_id, limit as i64], |r| {
            Ok(FloatTransaction {
                agent_id: r.get(0)?,
                transaction_type: r.get(1)?,
                amount: from_minor(r.get(2)?),
                reference: r.get(3)?,
                old_balance: from_minor(r.get(4)?),
                new_balance: from_minor(r.get(5)?),
                processed_by: r.get(6)?,
                created_at: ts_col(r, 7)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn float_transaction_count(&self, agent_id: &str) -> DfsResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM agent_float_transaction WHERE agent_id = ?1",
            params![agent_id],
            |r| r.get(0),
        )?)
    }

    // ── Status audit and KYC ──────────────────────────────────────

    pub fn insert_status_change(&self, c: &StatusChange) -> DfsResult<()> {
        self.conn.execute(
            "INSERT INTO agent_status_log (
                 agent_id, old_status, new_status, changed_by, reason, changed_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                c.agent_id,
                c.old_status,
                c.new_status,
                c.changed_by,
                c.reason,
                format_ts(&c.changed_at),
            ],
        )?;
        Ok(())
    }

    /// Oldest first.
    pub fn status_history(&self, agent_id: &str) -> DfsResult<Vec<StatusChange>> {
        let mut stmt = self.conn.prepare(
            "SELECT agent_id, old_status, new_status, changed_by, reason, changed_at
             FROM agent_status_log WHERE agent_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![agent_id], |r| {
            Ok(StatusChange {
                agent_id: r.get(0)?,
                old_status: r.get(1)?,
                new_status: r.get(2)?,
                changed_by: r.get(3)?,
                reason: r.get(4)?,
                changed_at: ts_col(r, 5)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn insert_kyc_document(
        &self,
        agent_id: &str,
        doc: &KycDocument,
        at: &DateTime<Utc>,
    ) -> DfsResult<()> {
        self.conn.execute(
            "INSERT INTO agent_kyc_document (agent_id, document_type, document_ref, verified, uploaded_at)
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![agent_id, doc.document_type, doc.document_ref, format_ts(at)],
        )?;
        Ok(())
    }

    /// Documents with their verified flag.
    pub fn kyc_documents(&self, agent_id: &str) -> DfsResult<Vec<(KycDocument, bool)>> {
        let mut stmt = self.conn.prepare(
            "SELECT document_type, document_ref, verified
             FROM agent_kyc_document WHERE agent_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![agent_id], |r| {
            Ok((
                KycDocument {
                    document_type: r.get(0)?,
                    document_ref: r.get(1)?,
                },
                r.get::<_, i64>(2)? != 0,
            ))
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
