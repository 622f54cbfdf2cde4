use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pyrnado_core::{
    DomainError, LedgerTransaction, PaymentStatus, SettlementKind, SettlementOutcome,
    SettlementStore, SettlementTask, TransactionStatus, settlement,
};
use sqlx::{Acquire, PgConnection};
use tracing::warn;
use uuid::Uuid;

use super::{
    PgStore, db_error, expect_one,
    payroll::{lock_batch, payments_of, update_batch, update_payments},
    rows::{self, SELECT_TASK, SELECT_TRANSACTION},
};

pub(crate) async fn insert_task(
    conn: &mut PgConnection,
    task: &SettlementTask,
) -> Result<(), DomainError> {
    sqlx::query(
        r#"
        INSERT INTO settlement_tasks (
            id, company_id, kind, reference_id, status, due_at, attempts, last_error,
            created_at, completed_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(task.id)
    .bind(task.tenant.as_uuid())
    .bind(task.kind.as_str())
    .bind(task.reference_id)
    .bind(task.status.as_str())
    .bind(task.due_at)
    .bind(task.attempts)
    .bind(&task.last_error)
    .bind(task.created_at)
    .bind(task.completed_at)
    .execute(&mut *conn)
    .await
    .map_err(db_error)?;

    Ok(())
}

async fn save_task(conn: &mut PgConnection, task: &SettlementTask) -> Result<(), DomainError> {
    let result = sqlx::query(
        r#"
        UPDATE settlement_tasks
        SET status = $2, attempts = $3, last_error = $4, completed_at = $5
        WHERE id = $1
        "#,
    )
    .bind(task.id)
    .bind(task.status.as_str())
    .bind(task.attempts)
    .bind(&task.last_error)
    .bind(task.completed_at)
    .execute(&mut *conn)
    .await
    .map_err(db_error)?;

    expect_one(result.rows_affected(), "settlement task")
}

async fn lock_transaction(
    conn: &mut PgConnection,
    transaction_id: Uuid,
) -> Result<LedgerTransaction, DomainError> {
    let sql = format!("{SELECT_TRANSACTION} WHERE id = $1 FOR UPDATE");
    let row = sqlx::query(&sql)
        .bind(transaction_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_error)?
        .ok_or(DomainError::NotFound("transaction"))?;

    rows::transaction(&row)
}

async fn settle_transaction_row(
    conn: &mut PgConnection,
    transaction_id: Uuid,
    now: DateTime<Utc>,
) -> Result<(), DomainError> {
    let mut transaction = lock_transaction(conn, transaction_id).await?;
    if transaction.status == TransactionStatus::Settled {
        return Ok(());
    }
    let before = transaction.status;

    settlement::settle_transaction(&mut transaction, now)?;

    let result = sqlx::query(
        "UPDATE ledger_transactions SET status = $3, settled_at = $4 WHERE id = $1 AND status = $2",
    )
    .bind(transaction.id)
    .bind(before.as_str())
    .bind(transaction.status.as_str())
    .bind(transaction.settled_at)
    .execute(&mut *conn)
    .await
    .map_err(db_error)?;

    expect_one(result.rows_affected(), "transaction")
}

async fn apply(
    conn: &mut PgConnection,
    task: &SettlementTask,
    now: DateTime<Utc>,
) -> Result<(), DomainError> {
    match task.kind {
        SettlementKind::LedgerTransaction => {
            settle_transaction_row(conn, task.reference_id, now).await
        }
        SettlementKind::PayrollBatch => {
            let mut batch = lock_batch(conn, task.tenant, task.reference_id).await?;
            let mut payments = payments_of(conn, batch.id, true).await?;
            let transaction_id = batch
                .transaction_id
                .ok_or(DomainError::NotFound("transaction"))?;
            let before = batch.status;

            batch.complete(&mut payments, now)?;

            update_batch(conn, &batch, before).await?;
            update_payments(conn, &payments, PaymentStatus::Processing).await?;
            settle_transaction_row(conn, transaction_id, now).await
        }
    }
}

#[async_trait]
impl SettlementStore for PgStore {
    async fn run_due_settlements(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<SettlementOutcome>, DomainError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        // concurrent executors claim disjoint tasks
        let sql = format!(
            "{SELECT_TASK} WHERE status = 'scheduled' AND due_at <= $1 \
             ORDER BY due_at LIMIT $2 FOR UPDATE SKIP LOCKED"
        );
        let records = sqlx::query(&sql)
            .bind(now)
            .bind(limit.max(0))
            .fetch_all(&mut *tx)
            .await
            .map_err(db_error)?;
        let tasks = records
            .iter()
            .map(rows::task)
            .collect::<Result<Vec<_>, _>>()?;

        let mut outcomes = Vec::with_capacity(tasks.len());
        for mut task in tasks {
            // each task gets a savepoint so one failure does not undo the others
            let mut savepoint = (&mut *tx).begin().await.map_err(db_error)?;
            match apply(&mut savepoint, &task, now).await {
                Ok(()) => {
                    savepoint.commit().await.map_err(db_error)?;
                    task.mark_done(now);
                    outcomes.push(SettlementOutcome::applied(&task));
                }
                Err(err) => {
                    savepoint.rollback().await.map_err(db_error)?;
                    warn!(
                        task_id = %task.id,
                        attempts = task.attempts + 1,
                        "settlement failed: {err}"
                    );
                    task.record_failure(&err);
                    outcomes.push(SettlementOutcome::failed(&task, &err));
                }
            }
            save_task(&mut tx, &task).await?;
        }

        tx.commit().await.map_err(db_error)?;
        Ok(outcomes)
    }
}
