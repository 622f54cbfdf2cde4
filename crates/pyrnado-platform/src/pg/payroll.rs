use async_trait::async_trait;
use chrono::Utc;
use pyrnado_core::{
    BatchDetail, BatchExecution, BatchStatus, DomainError, NewBatch, NewWorker, PaymentStatus,
    PayrollBatch, PayrollPayment, PayrollStore, PayrollWorker, SettlementKind, SettlementTask,
    TenantId,
};
use sqlx::PgConnection;
use tracing::info;
use uuid::Uuid;

use super::{
    PgStore, db_error, expect_one, insert_transaction,
    rows::{self, SELECT_BATCH, SELECT_PAYMENT, SELECT_WORKER},
    settlement::insert_task,
};

pub(crate) async fn lock_batch(
    conn: &mut PgConnection,
    tenant: TenantId,
    batch_id: Uuid,
) -> Result<PayrollBatch, DomainError> {
    let sql = format!("{SELECT_BATCH} WHERE id = $1 AND company_id = $2 FOR UPDATE");
    let row = sqlx::query(&sql)
        .bind(batch_id)
        .bind(tenant.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_error)?
        .ok_or(DomainError::NotFound("payroll batch"))?;

    rows::batch(&row)
}

pub(crate) async fn payments_of(
    conn: &mut PgConnection,
    batch_id: Uuid,
    lock: bool,
) -> Result<Vec<PayrollPayment>, DomainError> {
    let sql = format!(
        "{SELECT_PAYMENT} WHERE batch_id = $1 ORDER BY id{}",
        if lock { " FOR UPDATE" } else { "" }
    );
    let records = sqlx::query(&sql)
        .bind(batch_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(db_error)?;

    records.iter().map(rows::payment).collect()
}

pub(crate) async fn update_batch(
    conn: &mut PgConnection,
    batch: &PayrollBatch,
    expected: BatchStatus,
) -> Result<(), DomainError> {
    let result = sqlx::query(
        r#"
        UPDATE payroll_batches
        SET status = $3, transaction_id = $4, updated_at = $5, executed_at = $6,
            completed_at = $7
        WHERE id = $1 AND status = $2
        "#,
    )
    .bind(batch.id)
    .bind(expected.as_str())
    .bind(batch.status.as_str())
    .bind(batch.transaction_id)
    .bind(batch.updated_at)
    .bind(batch.executed_at)
    .bind(batch.completed_at)
    .execute(&mut *conn)
    .await
    .map_err(db_error)?;

    expect_one(result.rows_affected(), "payroll batch")
}

pub(crate) async fn update_payments(
    conn: &mut PgConnection,
    payments: &[PayrollPayment],
    expected: PaymentStatus,
) -> Result<(), DomainError> {
    for payment in payments {
        let result = sqlx::query(
            r#"
            UPDATE payroll_payments
            SET status = $3, tx_hash = $4, paid_at = $5
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(payment.id)
        .bind(expected.as_str())
        .bind(payment.status.as_str())
        .bind(&payment.tx_hash)
        .bind(payment.paid_at)
        .execute(&mut *conn)
        .await
        .map_err(db_error)?;

        expect_one(result.rows_affected(), "payroll payment")?;
    }
    Ok(())
}

async fn insert_batch(
    conn: &mut PgConnection,
    batch: &PayrollBatch,
    payments: &[PayrollPayment],
) -> Result<(), DomainError> {
    sqlx::query(
        r#"
        INSERT INTO payroll_batches (
            id, company_id, name, status, total_amount, currency, payment_count,
            transaction_id, scheduled_for, created_at, updated_at, executed_at, completed_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(batch.id)
    .bind(batch.tenant.as_uuid())
    .bind(&batch.name)
    .bind(batch.status.as_str())
    .bind(batch.total_amount)
    .bind(&batch.currency)
    .bind(batch.payment_count)
    .bind(batch.transaction_id)
    .bind(batch.scheduled_for)
    .bind(batch.created_at)
    .bind(batch.updated_at)
    .bind(batch.executed_at)
    .bind(batch.completed_at)
    .execute(&mut *conn)
    .await
    .map_err(db_error)?;

    for payment in payments {
        sqlx::query(
            r#"
            INSERT INTO payroll_payments (id, batch_id, worker_id, amount, status, tx_hash, paid_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(payment.id)
        .bind(payment.batch_id)
        .bind(payment.worker_id)
        .bind(payment.amount)
        .bind(payment.status.as_str())
        .bind(&payment.tx_hash)
        .bind(payment.paid_at)
        .execute(&mut *conn)
        .await
        .map_err(db_error)?;
    }

    Ok(())
}

impl PgStore {
    /// Moves a batch one approval step forward under its row lock.
    async fn step_batch(
        &self,
        tenant: TenantId,
        batch_id: Uuid,
        step: fn(&mut PayrollBatch, chrono::DateTime<Utc>) -> Result<(), DomainError>,
    ) -> Result<PayrollBatch, DomainError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let mut batch = lock_batch(&mut tx, tenant, batch_id).await?;
        let before = batch.status;

        step(&mut batch, Utc::now())?;

        update_batch(&mut tx, &batch, before).await?;
        tx.commit().await.map_err(db_error)?;
        info!(batch_id = %batch_id, status = %batch.status, "payroll batch advanced");
        Ok(batch)
    }
}

#[async_trait]
impl PayrollStore for PgStore {
    async fn create_worker(
        &self,
        tenant: TenantId,
        input: NewWorker,
    ) -> Result<PayrollWorker, DomainError> {
        let worker = input.into_worker(tenant, Utc::now())?;

        sqlx::query(
            r#"
            INSERT INTO payroll_workers (
                id, company_id, name, email, wallet_address, role, salary, currency,
                active, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(worker.id)
        .bind(worker.tenant.as_uuid())
        .bind(&worker.name)
        .bind(&worker.email)
        .bind(&worker.wallet_address)
        .bind(&worker.role)
        .bind(worker.salary)
        .bind(&worker.currency)
        .bind(worker.active)
        .bind(worker.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(worker)
    }

    async fn list_workers(&self, tenant: TenantId) -> Result<Vec<PayrollWorker>, DomainError> {
        let sql = format!("{SELECT_WORKER} WHERE company_id = $1 ORDER BY created_at");
        let records = sqlx::query(&sql)
            .bind(tenant.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        records.iter().map(rows::worker).collect()
    }

    async fn create_batch(
        &self,
        tenant: TenantId,
        input: NewBatch,
    ) -> Result<BatchDetail, DomainError> {
        input.validate_shape()?;

        let mut tx = self.pool.begin().await.map_err(db_error)?;
        // lock the workers so none is deactivated while the batch is written
        let sql = format!("{SELECT_WORKER} WHERE company_id = $1 AND id = ANY($2) FOR SHARE");
        let records = sqlx::query(&sql)
            .bind(tenant.as_uuid())
            .bind(input.worker_ids.as_slice())
            .fetch_all(&mut *tx)
            .await
            .map_err(db_error)?;
        let workers = records
            .iter()
            .map(rows::worker)
            .collect::<Result<Vec<_>, _>>()?;

        let (batch, payments) = input.into_draft(tenant, &workers, Utc::now())?;

        insert_batch(&mut tx, &batch, &payments).await?;
        tx.commit().await.map_err(db_error)?;

        info!(batch_id = %batch.id, payments = payments.len(), "payroll batch created");
        Ok(BatchDetail { batch, payments })
    }

    async fn list_batches(&self, tenant: TenantId) -> Result<Vec<PayrollBatch>, DomainError> {
        let sql = format!("{SELECT_BATCH} WHERE company_id = $1 ORDER BY created_at DESC");
        let records = sqlx::query(&sql)
            .bind(tenant.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        records.iter().map(rows::batch).collect()
    }

    async fn batch_detail(
        &self,
        tenant: TenantId,
        batch_id: Uuid,
    ) -> Result<BatchDetail, DomainError> {
        let mut conn = self.pool.acquire().await.map_err(db_error)?;
        let sql = format!("{SELECT_BATCH} WHERE id = $1 AND company_id = $2");
        let row = sqlx::query(&sql)
            .bind(batch_id)
            .bind(tenant.as_uuid())
            .fetch_optional(&mut *conn)
            .await
            .map_err(db_error)?
            .ok_or(DomainError::NotFound("payroll batch"))?;
        let batch = rows::batch(&row)?;
        let payments = payments_of(&mut conn, batch_id, false).await?;

        Ok(BatchDetail { batch, payments })
    }

    async fn submit_batch(
        &self,
        tenant: TenantId,
        batch_id: Uuid,
    ) -> Result<PayrollBatch, DomainError> {
        self.step_batch(tenant, batch_id, PayrollBatch::submit).await
    }

    async fn approve_batch(
        &self,
        tenant: TenantId,
        batch_id: Uuid,
    ) -> Result<PayrollBatch, DomainError> {
        self.step_batch(tenant, batch_id, PayrollBatch::approve).await
    }

    async fn execute_batch(
        &self,
        tenant: TenantId,
        batch_id: Uuid,
    ) -> Result<BatchExecution, DomainError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let mut batch = lock_batch(&mut tx, tenant, batch_id).await?;
        let mut payments = payments_of(&mut tx, batch_id, true).await?;
        let before = batch.status;

        let transaction = batch.execute(&mut payments, now)?;
        let task = SettlementTask::schedule(
            tenant,
            SettlementKind::PayrollBatch,
            batch.id,
            now,
            self.settlement_delay,
        );

        insert_transaction(&mut tx, &transaction).await?;
        update_batch(&mut tx, &batch, before).await?;
        update_payments(&mut tx, &payments, PaymentStatus::Pending).await?;
        insert_task(&mut tx, &task).await?;
        tx.commit().await.map_err(db_error)?;

        info!(
            batch_id = %batch_id,
            amount = %transaction.amount,
            task_id = %task.id,
            "payroll batch executing"
        );
        Ok(BatchExecution {
            detail: BatchDetail { batch, payments },
            transaction,
            settlement: task,
        })
    }
}
