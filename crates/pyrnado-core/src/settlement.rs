//! Durable stand-in for delayed chain confirmation. A task row is written in
//! the same transaction as the mutation that needs settling and is applied
//! later by whichever executor claims it.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::DomainError,
    models::{LedgerTransaction, TenantId, TransactionStatus},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementKind {
    LedgerTransaction,
    PayrollBatch,
}

impl SettlementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LedgerTransaction => "ledger_transaction",
            Self::PayrollBatch => "payroll_batch",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value {
            "ledger_transaction" => Ok(Self::LedgerTransaction),
            "payroll_batch" => Ok(Self::PayrollBatch),
            other => Err(DomainError::Internal(format!(
                "unknown settlement kind `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    Scheduled,
    Done,
}

impl SettlementStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Done => "done",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value {
            "scheduled" => Ok(Self::Scheduled),
            "done" => Ok(Self::Done),
            other => Err(DomainError::Internal(format!(
                "unknown settlement status `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementTask {
    pub id: Uuid,
    pub tenant: TenantId,
    pub kind: SettlementKind,
    pub reference_id: Uuid,
    pub status: SettlementStatus,
    pub due_at: DateTime<Utc>,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SettlementTask {
    pub fn schedule(
        tenant: TenantId,
        kind: SettlementKind,
        reference_id: Uuid,
        now: DateTime<Utc>,
        delay: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant,
            kind,
            reference_id,
            status: SettlementStatus::Scheduled,
            due_at: now + delay,
            attempts: 0,
            last_error: None,
            created_at: now,
            completed_at: None,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == SettlementStatus::Scheduled && self.due_at <= now
    }

    pub fn mark_done(&mut self, now: DateTime<Utc>) {
        self.status = SettlementStatus::Done;
        self.attempts += 1;
        self.last_error = None;
        self.completed_at = Some(now);
    }

    pub fn record_failure(&mut self, err: &DomainError) {
        self.attempts += 1;
        self.last_error = Some(err.to_string());
    }
}

/// What one executor pass did with a claimed task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementOutcome {
    pub task_id: Uuid,
    pub kind: SettlementKind,
    pub reference_id: Uuid,
    pub applied: bool,
    pub error: Option<String>,
}

impl SettlementOutcome {
    pub fn applied(task: &SettlementTask) -> Self {
        Self {
            task_id: task.id,
            kind: task.kind,
            reference_id: task.reference_id,
            applied: true,
            error: None,
        }
    }

    pub fn failed(task: &SettlementTask, err: &DomainError) -> Self {
        Self {
            task_id: task.id,
            kind: task.kind,
            reference_id: task.reference_id,
            applied: false,
            error: Some(err.to_string()),
        }
    }
}

/// Flips a pending or processing ledger row to settled. Settling twice is a
/// no-op so a re-run task cannot fail on its own earlier success.
pub fn settle_transaction(
    transaction: &mut LedgerTransaction,
    now: DateTime<Utc>,
) -> Result<(), DomainError> {
    match transaction.status {
        TransactionStatus::Settled => Ok(()),
        TransactionStatus::Pending | TransactionStatus::Processing => {
            transaction.status = TransactionStatus::Settled;
            transaction.settled_at = Some(now);
            Ok(())
        }
        TransactionStatus::Failed => Err(DomainError::transition(
            "transaction",
            transaction.status,
            TransactionStatus::Settled,
        )),
    }
}

/// Wakes settlement executors after a task has been committed. Delivery is
/// best effort: executors also poll, so a lost nudge only delays settlement.
#[async_trait]
pub trait SettlementNotifier: Send + Sync {
    async fn settlement_scheduled(&self, task_id: Uuid) -> anyhow::Result<()>;
}
