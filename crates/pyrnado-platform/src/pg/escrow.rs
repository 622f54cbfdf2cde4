use async_trait::async_trait;
use chrono::Utc;
use pyrnado_core::{
    BidStatus, Contract, ContractBid, ContractDetail, ContractStatus, ContractSummary,
    DisputeOutcome, DomainError, EscrowStore, Milestone, MilestoneStatus, NewBid, NewContract,
    NewMilestone, Release, SettlementKind, SettlementTask, TenantId, TransactionStatus, escrow,
};
use rust_decimal::Decimal;
use sqlx::{PgConnection, Row};
use tracing::info;
use uuid::Uuid;

use super::{
    PgStore, db_error, expect_one, insert_transaction,
    rows::{self, SELECT_BID, SELECT_CONTRACT, SELECT_MILESTONE},
    settlement::insert_task,
};

async fn fetch_contract(
    conn: &mut PgConnection,
    tenant: TenantId,
    contract_id: Uuid,
    lock: bool,
) -> Result<Contract, DomainError> {
    let sql = format!(
        "{SELECT_CONTRACT} WHERE id = $1 AND company_id = $2{}",
        if lock { " FOR UPDATE" } else { "" }
    );
    let row = sqlx::query(&sql)
        .bind(contract_id)
        .bind(tenant.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(db_error)?
        .ok_or(DomainError::NotFound("contract"))?;

    rows::contract(&row)
}

async fn lock_contract(
    conn: &mut PgConnection,
    tenant: TenantId,
    contract_id: Uuid,
) -> Result<Contract, DomainError> {
    fetch_contract(conn, tenant, contract_id, true).await
}

async fn milestones_of(
    conn: &mut PgConnection,
    contract_id: Uuid,
    lock: bool,
) -> Result<Vec<Milestone>, DomainError> {
    let sql = format!(
        "{SELECT_MILESTONE} WHERE contract_id = $1 ORDER BY due_date, created_at{}",
        if lock { " FOR UPDATE" } else { "" }
    );
    let records = sqlx::query(&sql)
        .bind(contract_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(db_error)?;

    records.iter().map(rows::milestone).collect()
}

async fn bids_of(
    conn: &mut PgConnection,
    contract_id: Uuid,
    lock: bool,
) -> Result<Vec<ContractBid>, DomainError> {
    let sql = format!(
        "{SELECT_BID} WHERE contract_id = $1 ORDER BY created_at{}",
        if lock { " FOR UPDATE" } else { "" }
    );
    let records = sqlx::query(&sql)
        .bind(contract_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(db_error)?;

    records.iter().map(rows::bid).collect()
}

async fn count_bids(conn: &mut PgConnection, contract_id: Uuid) -> Result<i64, DomainError> {
    let row = sqlx::query("SELECT COUNT(*) AS bid_count FROM escrow_bids WHERE contract_id = $1")
        .bind(contract_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(db_error)?;

    row.try_get("bid_count").map_err(DomainError::internal)
}

async fn detail(
    conn: &mut PgConnection,
    contract: Contract,
) -> Result<ContractDetail, DomainError> {
    let milestones = milestones_of(conn, contract.id, false).await?;
    let bids = bids_of(conn, contract.id, false).await?;
    Ok(ContractDetail {
        contract,
        milestones,
        bids,
    })
}

async fn insert_contract(conn: &mut PgConnection, contract: &Contract) -> Result<(), DomainError> {
    sqlx::query(
        r#"
        INSERT INTO escrow_contracts (
            id, company_id, title, description, client, contractor, total_amount,
            locked_amount, released_amount, currency, status, is_public, start_date,
            end_date, chain, contract_address, view_count, dispute_reason, created_at,
            updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                $18, $19, $20)
        "#,
    )
    .bind(contract.id)
    .bind(contract.tenant.as_uuid())
    .bind(&contract.title)
    .bind(&contract.description)
    .bind(&contract.client)
    .bind(&contract.contractor)
    .bind(contract.total_amount)
    .bind(contract.locked_amount)
    .bind(contract.released_amount)
    .bind(&contract.currency)
    .bind(contract.status.as_str())
    .bind(contract.is_public)
    .bind(contract.start_date)
    .bind(contract.end_date)
    .bind(&contract.chain)
    .bind(&contract.contract_address)
    .bind(contract.view_count)
    .bind(&contract.dispute_reason)
    .bind(contract.created_at)
    .bind(contract.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(db_error)?;

    Ok(())
}

async fn insert_milestone(
    conn: &mut PgConnection,
    milestone: &Milestone,
) -> Result<(), DomainError> {
    sqlx::query(
        r#"
        INSERT INTO escrow_milestones (
            id, contract_id, title, description, amount, status, due_date,
            completed_date, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(milestone.id)
    .bind(milestone.contract_id)
    .bind(&milestone.title)
    .bind(&milestone.description)
    .bind(milestone.amount)
    .bind(milestone.status.as_str())
    .bind(milestone.due_date)
    .bind(milestone.completed_date)
    .bind(milestone.created_at)
    .execute(&mut *conn)
    .await
    .map_err(db_error)?;

    Ok(())
}

async fn insert_bid(conn: &mut PgConnection, bid: &ContractBid) -> Result<(), DomainError> {
    sqlx::query(
        r#"
        INSERT INTO escrow_bids (
            id, contract_id, contractor_name, contractor_email, proposal, amount, status,
            is_verified, created_at, decided_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(bid.id)
    .bind(bid.contract_id)
    .bind(&bid.contractor_name)
    .bind(&bid.contractor_email)
    .bind(&bid.proposal)
    .bind(bid.amount)
    .bind(bid.status.as_str())
    .bind(bid.is_verified)
    .bind(bid.created_at)
    .bind(bid.decided_at)
    .execute(&mut *conn)
    .await
    .map_err(db_error)?;

    Ok(())
}

/// Writes the mutable contract columns, guarded by the status the rules ran
/// against.
async fn update_contract(
    conn: &mut PgConnection,
    contract: &Contract,
    expected: ContractStatus,
) -> Result<(), DomainError> {
    let result = sqlx::query(
        r#"
        UPDATE escrow_contracts
        SET contractor = $3, total_amount = $4, locked_amount = $5, released_amount = $6,
            status = $7, is_public = $8, dispute_reason = $9, updated_at = $10
        WHERE id = $1 AND status = $2
        "#,
    )
    .bind(contract.id)
    .bind(expected.as_str())
    .bind(&contract.contractor)
    .bind(contract.total_amount)
    .bind(contract.locked_amount)
    .bind(contract.released_amount)
    .bind(contract.status.as_str())
    .bind(contract.is_public)
    .bind(&contract.dispute_reason)
    .bind(contract.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(db_error)?;

    expect_one(result.rows_affected(), "contract")
}

async fn update_milestone(
    conn: &mut PgConnection,
    milestone: &Milestone,
    expected: MilestoneStatus,
) -> Result<(), DomainError> {
    let result = sqlx::query(
        r#"
        UPDATE escrow_milestones
        SET status = $3, completed_date = $4
        WHERE id = $1 AND status = $2
        "#,
    )
    .bind(milestone.id)
    .bind(expected.as_str())
    .bind(milestone.status.as_str())
    .bind(milestone.completed_date)
    .execute(&mut *conn)
    .await
    .map_err(db_error)?;

    expect_one(result.rows_affected(), "milestone")
}

async fn update_bid(
    conn: &mut PgConnection,
    bid: &ContractBid,
    expected: BidStatus,
) -> Result<(), DomainError> {
    let result = sqlx::query(
        "UPDATE escrow_bids SET status = $3, decided_at = $4 WHERE id = $1 AND status = $2",
    )
    .bind(bid.id)
    .bind(expected.as_str())
    .bind(bid.status.as_str())
    .bind(bid.decided_at)
    .execute(&mut *conn)
    .await
    .map_err(db_error)?;

    expect_one(result.rows_affected(), "bid")
}

/// Persists every bid listed in `changed`; they were all pending before.
async fn update_decided_bids(
    conn: &mut PgConnection,
    bids: &[ContractBid],
    changed: &[Uuid],
) -> Result<(), DomainError> {
    for bid in bids.iter().filter(|bid| changed.contains(&bid.id)) {
        update_bid(conn, bid, BidStatus::Pending).await?;
    }
    Ok(())
}

#[async_trait]
impl EscrowStore for PgStore {
    async fn create_contract(
        &self,
        tenant: TenantId,
        input: NewContract,
    ) -> Result<ContractDetail, DomainError> {
        let (contract, milestones) = input.into_draft(tenant, Utc::now())?;

        let mut tx = self.pool.begin().await.map_err(db_error)?;
        insert_contract(&mut tx, &contract).await?;
        for milestone in &milestones {
            insert_milestone(&mut tx, milestone).await?;
        }
        tx.commit().await.map_err(db_error)?;

        info!(contract_id = %contract.id, milestones = milestones.len(), "contract created");
        Ok(ContractDetail {
            contract,
            milestones,
            bids: Vec::new(),
        })
    }

    async fn list_contracts(&self, tenant: TenantId) -> Result<Vec<ContractSummary>, DomainError> {
        let mut conn = self.pool.acquire().await.map_err(db_error)?;
        let sql = format!("{SELECT_CONTRACT} WHERE company_id = $1 ORDER BY created_at DESC");
        let records = sqlx::query(&sql)
            .bind(tenant.as_uuid())
            .fetch_all(&mut *conn)
            .await
            .map_err(db_error)?;

        let mut summaries = Vec::with_capacity(records.len());
        for record in &records {
            let contract = rows::contract(record)?;
            let milestones = milestones_of(&mut conn, contract.id, false).await?;
            let bid_count = count_bids(&mut conn, contract.id).await?;
            summaries.push(ContractSummary {
                contract,
                milestones,
                bid_count,
            });
        }
        Ok(summaries)
    }

    async fn contract_detail(
        &self,
        tenant: TenantId,
        contract_id: Uuid,
    ) -> Result<ContractDetail, DomainError> {
        let mut conn = self.pool.acquire().await.map_err(db_error)?;
        let contract = fetch_contract(&mut conn, tenant, contract_id, false).await?;
        detail(&mut conn, contract).await
    }

    async fn view_public_contract(
        &self,
        contract_id: Uuid,
    ) -> Result<ContractSummary, DomainError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let bumped = sqlx::query(
            r#"
            UPDATE escrow_contracts
            SET view_count = view_count + 1
            WHERE id = $1 AND is_public AND status <> 'cancelled'
            "#,
        )
        .bind(contract_id)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;
        if bumped.rows_affected() == 0 {
            return Err(DomainError::NotFound("contract"));
        }

        let sql = format!("{SELECT_CONTRACT} WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(contract_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_error)?;
        let contract = rows::contract(&row)?;
        let milestones = milestones_of(&mut tx, contract_id, false).await?;
        let bid_count = count_bids(&mut tx, contract_id).await?;
        tx.commit().await.map_err(db_error)?;

        Ok(ContractSummary {
            contract,
            milestones,
            bid_count,
        })
    }

    async fn submit_bid(
        &self,
        contract_id: Uuid,
        input: NewBid,
        is_verified: bool,
    ) -> Result<ContractBid, DomainError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        // shares the contract lock with acceptance so no bid lands after it
        let sql = format!("{SELECT_CONTRACT} WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(contract_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error)?
            .ok_or(DomainError::NotFound("contract"))?;
        let contract = rows::contract(&row)?;

        let bid = input.into_bid(&contract, is_verified, Utc::now())?;
        insert_bid(&mut tx, &bid).await?;
        tx.commit().await.map_err(db_error)?;

        Ok(bid)
    }

    async fn accept_bid(
        &self,
        tenant: TenantId,
        contract_id: Uuid,
        bid_id: Uuid,
    ) -> Result<ContractDetail, DomainError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let mut contract = lock_contract(&mut tx, tenant, contract_id).await?;
        let mut bids = bids_of(&mut tx, contract_id, true).await?;
        let before = contract.status;

        let decision = escrow::accept_bid(&mut contract, &mut bids, bid_id, Utc::now())?;

        update_contract(&mut tx, &contract, before).await?;
        update_decided_bids(&mut tx, &bids, std::slice::from_ref(&decision.accepted)).await?;
        update_decided_bids(&mut tx, &bids, &decision.rejected).await?;
        let milestones = milestones_of(&mut tx, contract_id, false).await?;
        tx.commit().await.map_err(db_error)?;

        info!(
            contract_id = %contract_id,
            bid_id = %decision.accepted,
            rejected = decision.rejected.len(),
            "bid accepted"
        );
        Ok(ContractDetail {
            contract,
            milestones,
            bids,
        })
    }

    async fn reject_bid(
        &self,
        tenant: TenantId,
        contract_id: Uuid,
        bid_id: Uuid,
    ) -> Result<ContractBid, DomainError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let contract = lock_contract(&mut tx, tenant, contract_id).await?;
        let sql = format!("{SELECT_BID} WHERE id = $1 AND contract_id = $2 FOR UPDATE");
        let row = sqlx::query(&sql)
            .bind(bid_id)
            .bind(contract_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error)?
            .ok_or(DomainError::NotFound("bid"))?;
        let mut bid = rows::bid(&row)?;
        let before = bid.status;

        escrow::reject_bid(&contract, &mut bid, Utc::now())?;

        update_bid(&mut tx, &bid, before).await?;
        tx.commit().await.map_err(db_error)?;
        Ok(bid)
    }

    async fn activate_contract(
        &self,
        tenant: TenantId,
        contract_id: Uuid,
    ) -> Result<ContractDetail, DomainError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let mut contract = lock_contract(&mut tx, tenant, contract_id).await?;
        let mut bids = bids_of(&mut tx, contract_id, true).await?;
        let before = contract.status;

        let rejected = contract.activate(&mut bids, Utc::now())?;

        update_contract(&mut tx, &contract, before).await?;
        update_decided_bids(&mut tx, &bids, &rejected).await?;
        let milestones = milestones_of(&mut tx, contract_id, false).await?;
        tx.commit().await.map_err(db_error)?;

        info!(contract_id = %contract_id, "escrow contract activated");
        Ok(ContractDetail {
            contract,
            milestones,
            bids,
        })
    }

    async fn add_milestone(
        &self,
        tenant: TenantId,
        contract_id: Uuid,
        input: NewMilestone,
    ) -> Result<Milestone, DomainError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let contract = lock_contract(&mut tx, tenant, contract_id).await?;
        let existing = milestones_of(&mut tx, contract_id, false).await?;

        contract.ensure_milestone_budget(&existing, &input)?;

        let milestone = input.into_milestone(contract_id, Utc::now());
        insert_milestone(&mut tx, &milestone).await?;
        tx.commit().await.map_err(db_error)?;
        Ok(milestone)
    }

    async fn advance_milestone(
        &self,
        tenant: TenantId,
        contract_id: Uuid,
        milestone_id: Uuid,
        next: MilestoneStatus,
    ) -> Result<Milestone, DomainError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let contract = lock_contract(&mut tx, tenant, contract_id).await?;
        let mut milestone = milestones_of(&mut tx, contract_id, true)
            .await?
            .into_iter()
            .find(|milestone| milestone.id == milestone_id)
            .ok_or(DomainError::NotFound("milestone"))?;
        let before = milestone.status;

        milestone.advance(&contract, next)?;

        update_milestone(&mut tx, &milestone, before).await?;
        tx.commit().await.map_err(db_error)?;
        Ok(milestone)
    }

    async fn release_funds(
        &self,
        tenant: TenantId,
        contract_id: Uuid,
        amount: Decimal,
    ) -> Result<Release, DomainError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let mut contract = lock_contract(&mut tx, tenant, contract_id).await?;
        let before = contract.status;

        let amount = contract.release(amount, now)?;
        contract.complete_if_drained(now);
        let transaction = escrow::release_transaction(
            &contract,
            amount,
            format!("Escrow release: {}", contract.title),
            TransactionStatus::Settled,
            now,
        );

        update_contract(&mut tx, &contract, before).await?;
        insert_transaction(&mut tx, &transaction).await?;
        tx.commit().await.map_err(db_error)?;

        info!(contract_id = %contract_id, amount = %transaction.amount, "escrow funds released");
        Ok(Release {
            contract,
            milestone: None,
            transaction,
            settlement: None,
        })
    }

    async fn release_milestone(
        &self,
        tenant: TenantId,
        contract_id: Uuid,
        milestone_id: Uuid,
        amount: Option<Decimal>,
    ) -> Result<Release, DomainError> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let mut contract = lock_contract(&mut tx, tenant, contract_id).await?;
        let mut milestones = milestones_of(&mut tx, contract_id, true).await?;
        let index = milestones
            .iter()
            .position(|milestone| milestone.id == milestone_id)
            .ok_or(DomainError::NotFound("milestone"))?;
        let contract_before = contract.status;
        let milestone_before = milestones[index].status;

        let released =
            escrow::release_milestone(&mut contract, &mut milestones[index], amount, now)?;
        contract.complete_if_drained(now);
        let milestone = milestones[index].clone();
        let transaction = escrow::release_transaction(
            &contract,
            released,
            format!("Milestone release: {}", milestone.title),
            TransactionStatus::Pending,
            now,
        );
        let task = SettlementTask::schedule(
            tenant,
            SettlementKind::LedgerTransaction,
            transaction.id,
            now,
            self.settlement_delay,
        );

        update_contract(&mut tx, &contract, contract_before).await?;
        update_milestone(&mut tx, &milestone, milestone_before).await?;
        insert_transaction(&mut tx, &transaction).await?;
        insert_task(&mut tx, &task).await?;
        tx.commit().await.map_err(db_error)?;

        info!(
            contract_id = %contract_id,
            milestone_id = %milestone_id,
            amount = %released,
            task_id = %task.id,
            "milestone released"
        );
        Ok(Release {
            contract,
            milestone: Some(milestone),
            transaction,
            settlement: Some(task),
        })
    }

    async fn raise_dispute(
        &self,
        tenant: TenantId,
        contract_id: Uuid,
        reason: String,
    ) -> Result<Contract, DomainError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let mut contract = lock_contract(&mut tx, tenant, contract_id).await?;
        let before = contract.status;

        contract.raise_dispute(&reason, Utc::now())?;

        update_contract(&mut tx, &contract, before).await?;
        tx.commit().await.map_err(db_error)?;
        info!(contract_id = %contract_id, "contract disputed");
        Ok(contract)
    }

    async fn resolve_dispute(
        &self,
        tenant: TenantId,
        contract_id: Uuid,
        outcome: DisputeOutcome,
    ) -> Result<Contract, DomainError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let mut contract = lock_contract(&mut tx, tenant, contract_id).await?;
        let before = contract.status;

        contract.resolve_dispute(outcome, Utc::now())?;

        update_contract(&mut tx, &contract, before).await?;
        tx.commit().await.map_err(db_error)?;
        info!(contract_id = %contract_id, status = %contract.status, "dispute resolved");
        Ok(contract)
    }

    async fn cancel_contract(
        &self,
        tenant: TenantId,
        contract_id: Uuid,
    ) -> Result<ContractDetail, DomainError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let mut contract = lock_contract(&mut tx, tenant, contract_id).await?;
        let mut bids = bids_of(&mut tx, contract_id, true).await?;
        let before = contract.status;

        let rejected = contract.cancel(&mut bids, Utc::now())?;

        update_contract(&mut tx, &contract, before).await?;
        update_decided_bids(&mut tx, &bids, &rejected).await?;
        let milestones = milestones_of(&mut tx, contract_id, false).await?;
        tx.commit().await.map_err(db_error)?;

        Ok(ContractDetail {
            contract,
            milestones,
            bids,
        })
    }
}
