use super::{json_col, opt_json_col, opt_ts_col, ts_col, BankStore};
use crate::{
    authorization_queue::{PendingFilter, QueueItem, QueueStatus},
    error::{DfsError, DfsResult},
    types::{format_ts, from_minor, to_minor},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use serde_json::Value;

const QUEUE_COLUMNS: &str = "queue_id, transaction_type, reference_id, maker_id, maker_name,
                             amount, description, branch_code, status, priority, operation_data,
                             approved_by, approved_at, rejection_reason, execution_result,
                             created_at, completed_at";

fn queue_item_from_row(r: &Row<'_>) -> rusqlite::Result<QueueItem> {
    Ok(QueueItem {
        queue_id: r.get(0)?,
        transaction_type: r.get(1)?,
        reference_id: r.get(2)?,
        maker_id: r.get(3)?,
        maker_name: r.get(4)?,
        amount: from_minor(r.get(5)?),
        description: r.get(6)?,
        branch_code: r.get(7)?,
        status: r.get(8)?,
        priority: r.get(9)?,
        operation_data: json_col(r, 10)?,
        approved_by: r.get(11)?,
        approved_at: opt_ts_col(r, 12)?,
        rejection_reason: r.get(13)?,
        execution_result: opt_json_col(r, 14)?,
        created_at: ts_col(r, 15)?,
        completed_at: opt_ts_col(r, 16)?,
    })
}

impl BankStore {
    pub fn insert_queue_item(&self, q: &QueueItem) -> DfsResult<()> {
        self.conn.execute(
            "INSERT INTO authorization_queue (
                 queue_id, transaction_type, reference_id, maker_id, maker_name,
                 amount, description, branch_code, status, priority, priority_rank,
                 operation_data, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                q.queue_id,
                q.transaction_type,
                q.reference_id,
                q.maker_id,
                q.maker_name,
                to_minor(q.amount)?,
                q.description,
                q.branch_code,
                q.status,
                q.priority,
                q.priority.rank(),
                q.operation_data.to_string(),
                format_ts(&q.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn queue_item(&self, queue_id: &str) -> DfsResult<Option<QueueItem>> {
        let sql = format!("SELECT {QUEUE_COLUMNS} FROM authorization_queue WHERE queue_id = ?1");
        let row = self
            .conn
            .query_row(&sql, params![queue_id], queue_item_from_row)
            .optional()?;
        Ok(row)
    }

    /// PENDING → APPROVED, only if still PENDING. Returns whether this
    /// caller won the item.
    pub fn claim_queue_item(
        &self,
        queue_id: &str,
        approved_by: &str,
        at: &DateTime<Utc>,
    ) -> DfsResult<bool> {
        let changed = self.conn.execute(
            "UPDATE authorization_queue
             SET status = ?1, approved_by = ?2, approved_at = ?3
             WHERE queue_id = ?4 AND status = ?5",
            params![
                QueueStatus::Approved,
                approved_by,
                format_ts(at),
                queue_id,
                QueueStatus::Pending
            ],
        )?;
        Ok(changed == 1)
    }

    /// APPROVED → COMPLETED with the executor's result.
    pub fn complete_queue_item(
        &self,
        queue_id: &str,
        execution_result: &Value,
        at: &DateTime<Utc>,
    ) -> DfsResult<()> {
        let changed = self.conn.execute(
            "UPDATE authorization_queue
             SET status = ?1, execution_result = ?2, completed_at = ?3
             WHERE queue_id = ?4 AND status = ?5",
            params![
                QueueStatus::Completed,
                execution_result.to_string(),
                format_ts(at),
                queue_id,
                QueueStatus::Approved
            ],
        )?;
        if changed == 1 {
            Ok(())
        } else {
            Err(DfsError::QueueItemNotPending {
                queue_id: queue_id.to_string(),
                status: "not APPROVED".to_string(),
            })
        }
    }

    /// PENDING → REJECTED, only if still PENDING.
    pub fn reject_queue_item(
        &self,
        queue_id: &str,
        rejected_by: &str,
        reason: &str,
        at: &DateTime<Utc>,
    ) -> DfsResult<bool> {
        let changed = self.conn.execute(
            "UPDATE authorization_queue
             SET status = ?1, approved_by = ?2, approved_at = ?3,
                 rejection_reason = ?4, completed_at = ?3
             WHERE queue_id = ?5 AND status = ?6",
            params![
                QueueStatus::Rejected,
                rejected_by,
                format_ts(at),
                reason,
                queue_id,
                QueueStatus::Pending
            ],
        )?;
        Ok(changed == 1)
    }

    pub fn pending_queue_items(&self, filter: &PendingFilter) -> DfsResult<Vec<QueueItem>> {
        let mut sql = format!("SELECT {QUEUE_COLUMNS} FROM authorization_queue WHERE status = ?1");
        let mut args: Vec<String> = vec![QueueStatus::Pending.as_str().to_string()];
        if let Some(transaction_type) = &filter.transaction_type {
            args.push(transaction_type.clone());
            sql.push_str(&format!(" AND transaction_type = ?{}", args.len()));
        }
        if let Some(priority) = filter.priority {
            args.push(priority.as_str().to_string());
            sql.push_str(&format!(" AND priority = ?{}", args.len()));
        }
        if let Some(branch_code) = &filter.branch_code {
            args.push(branch_code.clone());
            sql.push_str(&format!(" AND branch_code = ?{}", args.len()));
        }
        sql.push_str(" ORDER BY priority_rank ASC, created_at ASC, rowid ASC");

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), queue_item_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn queue_count(&self, status: QueueStatus) -> DfsResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM authorization_queue WHERE status = ?1",
            params![status],
            |r| r.get(0),
        )?)
    }
}
