//! Postgres implementation of the storage traits.
//!
//! Every mutating call opens one transaction, locks the owning contract or
//! batch row with `FOR UPDATE`, runs the shared lifecycle rules on the loaded
//! rows and writes the changes back with status compare-and-swap predicates.
//! A guarded write that matches no row means someone else moved the entity
//! first and surfaces as `Conflict`.

mod escrow;
mod payroll;
mod rows;
mod settlement;

use async_trait::async_trait;
use chrono::Duration;
use pyrnado_core::{
    DomainError, IdentityStore, LedgerStore, LedgerTransaction, Principal, TenantId,
};
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    settlement_delay: Duration,
}

impl PgStore {
    pub fn new(pool: PgPool, settlement_delay: Duration) -> Self {
        Self {
            pool,
            settlement_delay,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub(crate) fn db_error(err: sqlx::Error) -> DomainError {
    if let sqlx::Error::Database(db) = &err
        && db.is_unique_violation()
    {
        return DomainError::Conflict(format!("concurrent write rejected: {}", db.message()));
    }
    DomainError::internal(err)
}

/// Turns a guarded update that matched nothing into a `Conflict`.
pub(crate) fn expect_one(rows_affected: u64, entity: &str) -> Result<(), DomainError> {
    if rows_affected == 0 {
        return Err(DomainError::Conflict(format!(
            "{entity} was modified concurrently"
        )));
    }
    Ok(())
}

pub(crate) async fn insert_transaction(
    conn: &mut PgConnection,
    transaction: &LedgerTransaction,
) -> Result<(), DomainError> {
    sqlx::query(
        r#"
        INSERT INTO ledger_transactions (
            id, company_id, type, description, amount, currency, is_incoming, status,
            fees, chain, tx_hash, reference_id, occurred_at, settled_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        "#,
    )
    .bind(transaction.id)
    .bind(transaction.tenant.as_uuid())
    .bind(transaction.kind.as_str())
    .bind(&transaction.description)
    .bind(transaction.amount)
    .bind(&transaction.currency)
    .bind(transaction.is_incoming)
    .bind(transaction.status.as_str())
    .bind(transaction.fees)
    .bind(&transaction.chain)
    .bind(&transaction.tx_hash)
    .bind(transaction.reference_id)
    .bind(transaction.timestamp)
    .bind(transaction.settled_at)
    .execute(&mut *conn)
    .await
    .map_err(db_error)?;

    Ok(())
}

#[async_trait]
impl IdentityStore for PgStore {
    async fn resolve_token(&self, token: &str) -> Result<Option<Principal>, DomainError> {
        // tokens are user primary keys; anything else cannot match
        let Ok(user_id) = Uuid::parse_str(token.trim()) else {
            return Ok(None);
        };

        let row = sqlx::query("SELECT id, company_id FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.map(|row| {
            Ok(Principal {
                user_id: row.try_get("id").map_err(DomainError::internal)?,
                tenant: TenantId(row.try_get("company_id").map_err(DomainError::internal)?),
            })
        })
        .transpose()
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn list_transactions(
        &self,
        tenant: TenantId,
        limit: i64,
    ) -> Result<Vec<LedgerTransaction>, DomainError> {
        let sql = format!(
            "{} WHERE company_id = $1 ORDER BY occurred_at DESC LIMIT $2",
            rows::SELECT_TRANSACTION
        );
        let records = sqlx::query(&sql)
            .bind(tenant.as_uuid())
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        records.iter().map(rows::transaction).collect()
    }
}
