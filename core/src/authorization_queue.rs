//! Maker-checker authorization queue.
//!
//! A maker submits a [`QueuedOperation`]; nothing is applied until a
//! different user approves it. Approval and execution are one unit of work:
//! the item is claimed with a compare-and-swap on `status = 'PENDING'`, the
//! executor runs, and the item is marked COMPLETED. If the executor fails the
//! whole unit rolls back, the item stays PENDING and the caller gets
//! `ExecutionFailed`. Concurrent approvals of the same item serialize on the
//! write lock and exactly one of them executes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    clock::Clock,
    config::DfsConfig,
    error::{DfsError, DfsResult},
    event::DfsEvent,
    executor::{ExecutionContext, ExecutionOutcome, Executor},
    operation::QueuedOperation,
    store::BankStore,
    threshold::{evaluate_threshold, ThresholdDecision},
    types::{generate_reference, EntityId, Money},
};

db_enum! {
    pub enum QueueStatus {
        Pending => "PENDING",
        Approved => "APPROVED",
        Rejected => "REJECTED",
        Completed => "COMPLETED",
    }
}

db_enum! {
    pub enum Priority {
        Urgent => "URGENT",
        High => "HIGH",
        Medium => "MEDIUM",
        Low => "LOW",
    }
}

impl Priority {
    /// Inbox sort key: URGENT first.
    pub fn rank(&self) -> i64 {
        match self {
            Self::Urgent => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MakerInfo {
    pub maker_id: String,
    pub maker_name: String,
    pub branch_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueItem {
    pub queue_id: EntityId,
    pub transaction_type: String,
    pub reference_id: String,
    pub maker_id: String,
    pub maker_name: String,
    pub amount: Money,
    pub description: String,
    pub branch_code: String,
    pub status: QueueStatus,
    pub priority: Priority,
    pub operation_data: Value,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub execution_result: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    pub fn operation(&self) -> DfsResult<QueuedOperation> {
        QueuedOperation::from_parts(&self.transaction_type, &self.operation_data)
    }
}

/// Returned to the maker: the operation is parked, not applied.
#[derive(Debug, Clone, Serialize)]
pub struct SubmitReceipt {
    pub queue_id: EntityId,
    pub status: &'static str,
    pub priority: Priority,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApprovalReceipt {
    pub queue_id: EntityId,
    pub status: QueueStatus,
    pub message: String,
    pub result: ExecutionOutcome,
}

/// Supervisor inbox filter; empty fields match everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PendingFilter {
    #[serde(default)]
    pub transaction_type: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub branch_code: Option<String>,
}

pub struct AuthorizationQueue<'e> {
    store: &'e BankStore,
    config: &'e DfsConfig,
    clock: &'e dyn Clock,
}

impl<'e> AuthorizationQueue<'e> {
    pub fn new(store: &'e BankStore, config: &'e DfsConfig, clock: &'e dyn Clock) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    /// Pure policy lookup: does this maker need a checker for this amount?
    pub fn evaluate_threshold(
        &self,
        transaction_type: &str,
        amount: Money,
        maker_role: &str,
    ) -> ThresholdDecision {
        evaluate_threshold(&self.config.authorization, transaction_type, amount, maker_role)
    }

    pub fn submit(
        &self,
        operation: &QueuedOperation,
        maker: &MakerInfo,
        priority: Priority,
    ) -> DfsResult<SubmitReceipt> {
        let now = self.clock.now();
        let (transaction_type, operation_data) = operation.to_parts()?;
        let item = QueueItem {
            queue_id: generate_reference("AQ", &now),
            transaction_type: transaction_type.to_string(),
            reference_id: operation.reference_id().to_string(),
            maker_id: maker.maker_id.clone(),
            maker_name: maker.maker_name.clone(),
            amount: operation.amount(),
            description: operation.describe(),
            branch_code: maker.branch_code.clone(),
            status: QueueStatus::Pending,
            priority,
            operation_data,
            approved_by: None,
            approved_at: None,
            rejection_reason: None,
            execution_result: None,
            created_at: now,
            completed_at: None,
        };

        self.store.atomic(|s| {
            s.insert_queue_item(&item)?;
            s.append_event(
                &DfsEvent::QueueItemSubmitted {
                    queue_id: item.queue_id.clone(),
                    transaction_type: item.transaction_type.clone(),
                    maker_id: item.maker_id.clone(),
                    priority: priority.as_str().to_string(),
                },
                &now,
            )
        })?;
        log::info!(
            "queue: {} {} submitted by {} ({priority}): {}",
            item.queue_id,
            item.transaction_type,
            item.maker_id,
            item.description
        );
        Ok(SubmitReceipt {
            queue_id: item.queue_id,
            status: "PENDING_APPROVAL",
            priority,
        })
    }

    /// Approve and execute as one step.
    pub fn approve(&self, queue_id: &str, approver_id: &str) -> DfsResult<ApprovalReceipt> {
        let now = self.clock.now();
        let result = self.store.atomic(|s| {
            let item = pending_item(s, queue_id)?;
            if item.maker_id == approver_id {
                return Err(DfsError::SelfApproval {
                    queue_id: queue_id.to_string(),
                    user_id: approver_id.to_string(),
                });
            }
            if !s.claim_queue_item(queue_id, approver_id, &now)? {
                return Err(not_pending(s, queue_id)?);
            }

            let ctx = ExecutionContext {
                queue_id,
                approved_by: approver_id,
                now,
            };
            let outcome = item
                .operation()
                .and_then(|op| Executor::new(s, self.config, self.clock).execute(&op, &ctx))
                .map_err(|source| DfsError::ExecutionFailed {
                    queue_id: queue_id.to_string(),
                    source: Box::new(source),
                })?;

            s.complete_queue_item(queue_id, &serde_json::to_value(&outcome)?, &now)?;
            s.append_event(
                &DfsEvent::QueueItemCompleted {
                    queue_id: queue_id.to_string(),
                    transaction_type: item.transaction_type.clone(),
                    approved_by: approver_id.to_string(),
                },
                &now,
            )?;
            Ok((item, outcome))
        });

        match result {
            Ok((item, outcome)) => {
                log::info!(
                    "queue: {queue_id} {} approved by {approver_id} and executed",
                    item.transaction_type
                );
                Ok(ApprovalReceipt {
                    queue_id: queue_id.to_string(),
                    status: QueueStatus::Completed,
                    message: format!("{} approved and executed", item.transaction_type),
                    result: outcome,
                })
            }
            Err(err) => {
                log::warn!("queue: approval of {queue_id} by {approver_id} failed: {err}");
                Err(err)
            }
        }
    }

    /// Terminal; nothing executes.
    pub fn reject(&self, queue_id: &str, approver_id: &str, reason: &str) -> DfsResult<QueueItem> {
        if reason.trim().is_empty() {
            return Err(DfsError::Validation("a rejection reason is required".to_string()));
        }
        let now = self.clock.now();
        let item = self.store.atomic(|s| {
            let item = pending_item(s, queue_id)?;
            if item.maker_id == approver_id {
                return Err(DfsError::SelfApproval {
                    queue_id: queue_id.to_string(),
                    user_id: approver_id.to_string(),
                });
            }
            if !s.reject_queue_item(queue_id, approver_id, reason, &now)? {
                return Err(not_pending(s, queue_id)?);
            }
            s.append_event(
                &DfsEvent::QueueItemRejected {
                    queue_id: queue_id.to_string(),
                    rejected_by: approver_id.to_string(),
                    reason: reason.to_string(),
                },
                &now,
            )?;
            s.queue_item(queue_id)?
                .ok_or_else(|| DfsError::QueueItemNotFound(queue_id.to_string()))
        })?;
        log::info!("queue: {queue_id} rejected by {approver_id}: {reason}");
        Ok(item)
    }

    /// PENDING items, URGENT first, then oldest first.
    pub fn list_pending(&self, filter: &PendingFilter) -> DfsResult<Vec<QueueItem>> {
        self.store.pending_queue_items(filter)
    }

    pub fn get(&self, queue_id: &str) -> DfsResult<QueueItem> {
        self.store
            .queue_item(queue_id)?
            .ok_or_else(|| DfsError::QueueItemNotFound(queue_id.to_string()))
    }
}

fn pending_item(s: &BankStore, queue_id: &str) -> DfsResult<QueueItem> {
    let item = s
        .queue_item(queue_id)?
        .ok_or_else(|| DfsError::QueueItemNotFound(queue_id.to_string()))?;
    if item.status != QueueStatus::Pending {
        return Err(DfsError::QueueItemNotPending {
            queue_id: queue_id.to_string(),
            status: item.status.as_str().to_string(),
        });
    }
    Ok(item)
}

fn not_pending(s: &BankStore, queue_id: &str) -> DfsResult<DfsError> {
    let status = s
        .queue_item(queue_id)?
        .map(|i| i.status.as_str().to_string())
        .unwrap_or_default();
    Ok(DfsError::QueueItemNotPending {
        queue_id: queue_id.to_string(),
        status,
    })
}
