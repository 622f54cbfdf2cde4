//! Column lists and row mappers shared by the Postgres store.

use std::str::FromStr;

use pyrnado_core::{
    Contract, ContractBid, DomainError, LedgerTransaction, Milestone, PayrollBatch,
    PayrollPayment, PayrollWorker, SettlementKind, SettlementStatus, SettlementTask, TenantId,
};
use sqlx::{Decode, Postgres, Row, Type, postgres::PgRow};
use uuid::Uuid;

pub(crate) const SELECT_CONTRACT: &str = r#"
    SELECT id, company_id, title, description, client, contractor, total_amount,
           locked_amount, released_amount, currency, status, is_public, start_date,
           end_date, chain, contract_address, view_count, dispute_reason, created_at,
           updated_at
    FROM escrow_contracts
"#;

pub(crate) const SELECT_MILESTONE: &str = r#"
    SELECT id, contract_id, title, description, amount, status, due_date,
           completed_date, created_at
    FROM escrow_milestones
"#;

pub(crate) const SELECT_BID: &str = r#"
    SELECT id, contract_id, contractor_name, contractor_email, proposal, amount,
           status, is_verified, created_at, decided_at
    FROM escrow_bids
"#;

pub(crate) const SELECT_TRANSACTION: &str = r#"
    SELECT id, company_id, type, description, amount, currency, is_incoming, status,
           fees, chain, tx_hash, reference_id, occurred_at, settled_at
    FROM ledger_transactions
"#;

pub(crate) const SELECT_WORKER: &str = r#"
    SELECT id, company_id, name, email, wallet_address, role, salary, currency,
           active, created_at
    FROM payroll_workers
"#;

pub(crate) const SELECT_BATCH: &str = r#"
    SELECT id, company_id, name, status, total_amount, currency, payment_count,
           transaction_id, scheduled_for, created_at, updated_at, executed_at,
           completed_at
    FROM payroll_batches
"#;

pub(crate) const SELECT_PAYMENT: &str = r#"
    SELECT id, batch_id, worker_id, amount, status, tx_hash, paid_at
    FROM payroll_payments
"#;

pub(crate) const SELECT_TASK: &str = r#"
    SELECT id, company_id, kind, reference_id, status, due_at, attempts, last_error,
           created_at, completed_at
    FROM settlement_tasks
"#;

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, DomainError>
where
    T: Decode<'r, Postgres> + Type<Postgres>,
{
    row.try_get(column).map_err(DomainError::internal)
}

/// Stored status text that no longer parses is a data problem, not bad input.
fn status<T>(row: &PgRow, column: &str) -> Result<T, DomainError>
where
    T: FromStr<Err = DomainError>,
{
    let raw: String = get(row, column)?;
    raw.parse()
        .map_err(|err: DomainError| DomainError::Internal(err.to_string()))
}

fn tenant(row: &PgRow) -> Result<TenantId, DomainError> {
    get::<Uuid>(row, "company_id").map(TenantId)
}

pub(crate) fn contract(row: &PgRow) -> Result<Contract, DomainError> {
    Ok(Contract {
        id: get(row, "id")?,
        tenant: tenant(row)?,
        title: get(row, "title")?,
        description: get(row, "description")?,
        client: get(row, "client")?,
        contractor: get(row, "contractor")?,
        total_amount: get(row, "total_amount")?,
        locked_amount: get(row, "locked_amount")?,
        released_amount: get(row, "released_amount")?,
        currency: get(row, "currency")?,
        status: status(row, "status")?,
        is_public: get(row, "is_public")?,
        start_date: get(row, "start_date")?,
        end_date: get(row, "end_date")?,
        chain: get(row, "chain")?,
        contract_address: get(row, "contract_address")?,
        view_count: get(row, "view_count")?,
        dispute_reason: get(row, "dispute_reason")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
    })
}

pub(crate) fn milestone(row: &PgRow) -> Result<Milestone, DomainError> {
    Ok(Milestone {
        id: get(row, "id")?,
        contract_id: get(row, "contract_id")?,
        title: get(row, "title")?,
        description: get(row, "description")?,
        amount: get(row, "amount")?,
        status: status(row, "status")?,
        due_date: get(row, "due_date")?,
        completed_date: get(row, "completed_date")?,
        created_at: get(row, "created_at")?,
    })
}

pub(crate) fn bid(row: &PgRow) -> Result<ContractBid, DomainError> {
    Ok(ContractBid {
        id: get(row, "id")?,
        contract_id: get(row, "contract_id")?,
        contractor_name: get(row, "contractor_name")?,
        contractor_email: get(row, "contractor_email")?,
        proposal: get(row, "proposal")?,
        amount: get(row, "amount")?,
        status: status(row, "status")?,
        is_verified: get(row, "is_verified")?,
        created_at: get(row, "created_at")?,
        decided_at: get(row, "decided_at")?,
    })
}

pub(crate) fn transaction(row: &PgRow) -> Result<LedgerTransaction, DomainError> {
    Ok(LedgerTransaction {
        id: get(row, "id")?,
        tenant: tenant(row)?,
        kind: status(row, "type")?,
        description: get(row, "description")?,
        amount: get(row, "amount")?,
        currency: get(row, "currency")?,
        is_incoming: get(row, "is_incoming")?,
        status: status(row, "status")?,
        fees: get(row, "fees")?,
        chain: get(row, "chain")?,
        tx_hash: get(row, "tx_hash")?,
        reference_id: get(row, "reference_id")?,
        timestamp: get(row, "occurred_at")?,
        settled_at: get(row, "settled_at")?,
    })
}

pub(crate) fn worker(row: &PgRow) -> Result<PayrollWorker, DomainError> {
    Ok(PayrollWorker {
        id: get(row, "id")?,
        tenant: tenant(row)?,
        name: get(row, "name")?,
        email: get(row, "email")?,
        wallet_address: get(row, "wallet_address")?,
        role: get(row, "role")?,
        salary: get(row, "salary")?,
        currency: get(row, "currency")?,
        active: get(row, "active")?,
        created_at: get(row, "created_at")?,
    })
}

pub(crate) fn batch(row: &PgRow) -> Result<PayrollBatch, DomainError> {
    Ok(PayrollBatch {
        id: get(row, "id")?,
        tenant: tenant(row)?,
        name: get(row, "name")?,
        status: status(row, "status")?,
        total_amount: get(row, "total_amount")?,
        currency: get(row, "currency")?,
        payment_count: get(row, "payment_count")?,
        transaction_id: get(row, "transaction_id")?,
        scheduled_for: get(row, "scheduled_for")?,
        created_at: get(row, "created_at")?,
        updated_at: get(row, "updated_at")?,
        executed_at: get(row, "executed_at")?,
        completed_at: get(row, "completed_at")?,
    })
}

pub(crate) fn payment(row: &PgRow) -> Result<PayrollPayment, DomainError> {
    Ok(PayrollPayment {
        id: get(row, "id")?,
        batch_id: get(row, "batch_id")?,
        worker_id: get(row, "worker_id")?,
        amount: get(row, "amount")?,
        status: status(row, "status")?,
        tx_hash: get(row, "tx_hash")?,
        paid_at: get(row, "paid_at")?,
    })
}

pub(crate) fn task(row: &PgRow) -> Result<SettlementTask, DomainError> {
    let kind: String = get(row, "kind")?;
    let task_status: String = get(row, "status")?;

    Ok(SettlementTask {
        id: get(row, "id")?,
        tenant: tenant(row)?,
        kind: SettlementKind::parse(&kind)?,
        reference_id: get(row, "reference_id")?,
        status: SettlementStatus::parse(&task_status)?,
        due_at: get(row, "due_at")?,
        attempts: get(row, "attempts")?,
        last_error: get(row, "last_error")?,
        created_at: get(row, "created_at")?,
        completed_at: get(row, "completed_at")?,
    })
}
