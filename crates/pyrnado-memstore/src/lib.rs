//! In-process store. One `RwLock` guards all state, so each mutating call is
//! serialized and applies atomically: rules run against cloned rows and the
//! clones are written back only when every rule passed.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use pyrnado_core::{
    BatchDetail, BatchExecution, Contract, ContractBid, ContractDetail, ContractSummary,
    DisputeOutcome, DomainError, EscrowStore, IdentityStore, LedgerStore, LedgerTransaction,
    Milestone, MilestoneStatus, NewBatch, NewBid, NewContract, NewMilestone, NewWorker,
    PayrollBatch, PayrollPayment, PayrollStore, PayrollWorker, Principal, Release,
    SettlementKind, SettlementNotifier, SettlementOutcome, SettlementStore, SettlementTask,
    TenantId, TransactionStatus, escrow, settlement,
};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Default)]
struct State {
    principals: HashMap<String, Principal>,
    contracts: HashMap<Uuid, Contract>,
    milestones: Vec<Milestone>,
    bids: Vec<ContractBid>,
    transactions: Vec<LedgerTransaction>,
    workers: Vec<PayrollWorker>,
    batches: HashMap<Uuid, PayrollBatch>,
    payments: Vec<PayrollPayment>,
    tasks: Vec<SettlementTask>,
}

impl State {
    fn owned_contract(&self, tenant: TenantId, contract_id: Uuid) -> Result<Contract, DomainError> {
        self.contracts
            .get(&contract_id)
            .filter(|contract| contract.owned_by(tenant))
            .cloned()
            .ok_or(DomainError::NotFound("contract"))
    }

    fn milestones_of(&self, contract_id: Uuid) -> Vec<Milestone> {
        self.milestones
            .iter()
            .filter(|milestone| milestone.contract_id == contract_id)
            .cloned()
            .collect()
    }

    fn bids_of(&self, contract_id: Uuid) -> Vec<ContractBid> {
        self.bids
            .iter()
            .filter(|bid| bid.contract_id == contract_id)
            .cloned()
            .collect()
    }

    fn put_contract(&mut self, contract: Contract) {
        self.contracts.insert(contract.id, contract);
    }

    fn put_milestones(&mut self, updated: &[Milestone]) {
        for milestone in updated {
            if let Some(slot) = self.milestones.iter_mut().find(|m| m.id == milestone.id) {
                *slot = milestone.clone();
            }
        }
    }

    fn put_bids(&mut self, updated: &[ContractBid]) {
        for bid in updated {
            if let Some(slot) = self.bids.iter_mut().find(|b| b.id == bid.id) {
                *slot = bid.clone();
            }
        }
    }

    fn summary(&self, contract: Contract) -> ContractSummary {
        let bid_count = self
            .bids
            .iter()
            .filter(|bid| bid.contract_id == contract.id)
            .count() as i64;
        ContractSummary {
            milestones: self.milestones_of(contract.id),
            bid_count,
            contract,
        }
    }

    fn detail(&self, contract: Contract) -> ContractDetail {
        ContractDetail {
            milestones: self.milestones_of(contract.id),
            bids: self.bids_of(contract.id),
            contract,
        }
    }

    fn owned_batch(&self, tenant: TenantId, batch_id: Uuid) -> Result<PayrollBatch, DomainError> {
        self.batches
            .get(&batch_id)
            .filter(|batch| batch.owned_by(tenant))
            .cloned()
            .ok_or(DomainError::NotFound("payroll batch"))
    }

    fn payments_of(&self, batch_id: Uuid) -> Vec<PayrollPayment> {
        self.payments
            .iter()
            .filter(|payment| payment.batch_id == batch_id)
            .cloned()
            .collect()
    }

    fn put_payments(&mut self, updated: &[PayrollPayment]) {
        for payment in updated {
            if let Some(slot) = self.payments.iter_mut().find(|p| p.id == payment.id) {
                *slot = payment.clone();
            }
        }
    }

    fn transaction_mut(&mut self, transaction_id: Uuid) -> Option<&mut LedgerTransaction> {
        self.transactions
            .iter_mut()
            .find(|transaction| transaction.id == transaction_id)
    }

    fn apply_settlement(
        &mut self,
        task: &SettlementTask,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        match task.kind {
            SettlementKind::LedgerTransaction => {
                let transaction = self
                    .transaction_mut(task.reference_id)
                    .ok_or(DomainError::NotFound("transaction"))?;
                settlement::settle_transaction(transaction, now)
            }
            SettlementKind::PayrollBatch => {
                let mut batch = self.owned_batch(task.tenant, task.reference_id)?;
                let mut payments = self.payments_of(batch.id);
                let mut transaction = batch
                    .transaction_id
                    .and_then(|id| self.transactions.iter().find(|t| t.id == id).cloned())
                    .ok_or(DomainError::NotFound("transaction"))?;

                batch.complete(&mut payments, now)?;
                settlement::settle_transaction(&mut transaction, now)?;

                self.put_payments(&payments);
                self.batches.insert(batch.id, batch);
                if let Some(slot) = self.transaction_mut(transaction.id) {
                    *slot = transaction;
                }
                Ok(())
            }
        }
    }
}

pub struct MemoryStore {
    state: RwLock<State>,
    settlement_delay: Duration,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Duration::zero())
    }
}

impl MemoryStore {
    pub fn new(settlement_delay: Duration) -> Self {
        Self {
            state: RwLock::new(State::default()),
            settlement_delay,
        }
    }

    /// Creates a user in `tenant` and returns the bearer token that resolves
    /// to it.
    pub async fn register_user(&self, tenant: TenantId) -> String {
        let principal = Principal {
            user_id: Uuid::new_v4(),
            tenant,
        };
        let token = principal.user_id.to_string();
        self.state
            .write()
            .await
            .principals
            .insert(token.clone(), principal);
        token
    }

    pub async fn settlement_tasks(&self) -> Vec<SettlementTask> {
        self.state.read().await.tasks.clone()
    }

    fn schedule(
        &self,
        tenant: TenantId,
        kind: SettlementKind,
        reference_id: Uuid,
        now: DateTime<Utc>,
    ) -> SettlementTask {
        SettlementTask::schedule(tenant, kind, reference_id, now, self.settlement_delay)
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn resolve_token(&self, token: &str) -> Result<Option<Principal>, DomainError> {
        Ok(self.state.read().await.principals.get(token).copied())
    }
}

#[async_trait]
impl EscrowStore for MemoryStore {
    async fn create_contract(
        &self,
        tenant: TenantId,
        input: NewContract,
    ) -> Result<ContractDetail, DomainError> {
        let (contract, milestones) = input.into_draft(tenant, Utc::now())?;
        let mut state = self.state.write().await;
        state.milestones.extend(milestones);
        state.put_contract(contract.clone());
        Ok(state.detail(contract))
    }

    async fn list_contracts(&self, tenant: TenantId) -> Result<Vec<ContractSummary>, DomainError> {
        let state = self.state.read().await;
        let mut contracts: Vec<Contract> = state
            .contracts
            .values()
            .filter(|contract| contract.owned_by(tenant))
            .cloned()
            .collect();
        contracts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(contracts
            .into_iter()
            .map(|contract| state.summary(contract))
            .collect())
    }

    async fn contract_detail(
        &self,
        tenant: TenantId,
        contract_id: Uuid,
    ) -> Result<ContractDetail, DomainError> {
        let state = self.state.read().await;
        let contract = state.owned_contract(tenant, contract_id)?;
        Ok(state.detail(contract))
    }

    async fn view_public_contract(
        &self,
        contract_id: Uuid,
    ) -> Result<ContractSummary, DomainError> {
        let mut state = self.state.write().await;
        let contract = state
            .contracts
            .get_mut(&contract_id)
            .filter(|contract| contract.is_public)
            .ok_or(DomainError::NotFound("contract"))?;
        contract.record_view();
        let contract = contract.clone();
        Ok(state.summary(contract))
    }

    async fn submit_bid(
        &self,
        contract_id: Uuid,
        input: NewBid,
        is_verified: bool,
    ) -> Result<ContractBid, DomainError> {
        let mut state = self.state.write().await;
        let contract = state
            .contracts
            .get(&contract_id)
            .ok_or(DomainError::NotFound("contract"))?;
        let bid = input.into_bid(contract, is_verified, Utc::now())?;
        state.bids.push(bid.clone());
        Ok(bid)
    }

    async fn accept_bid(
        &self,
        tenant: TenantId,
        contract_id: Uuid,
        bid_id: Uuid,
    ) -> Result<ContractDetail, DomainError> {
        let mut state = self.state.write().await;
        let mut contract = state.owned_contract(tenant, contract_id)?;
        let mut bids = state.bids_of(contract_id);

        let decision = escrow::accept_bid(&mut contract, &mut bids, bid_id, Utc::now())?;

        state.put_bids(&bids);
        state.put_contract(contract.clone());
        info!(
            contract_id = %contract_id,
            bid_id = %decision.accepted,
            rejected = decision.rejected.len(),
            "bid accepted"
        );
        Ok(state.detail(contract))
    }

    async fn reject_bid(
        &self,
        tenant: TenantId,
        contract_id: Uuid,
        bid_id: Uuid,
    ) -> Result<ContractBid, DomainError> {
        let mut state = self.state.write().await;
        let contract = state.owned_contract(tenant, contract_id)?;
        let mut bid = state
            .bids
            .iter()
            .find(|bid| bid.id == bid_id && bid.contract_id == contract_id)
            .cloned()
            .ok_or(DomainError::NotFound("bid"))?;

        escrow::reject_bid(&contract, &mut bid, Utc::now())?;

        state.put_bids(std::slice::from_ref(&bid));
        Ok(bid)
    }

    async fn activate_contract(
        &self,
        tenant: TenantId,
        contract_id: Uuid,
    ) -> Result<ContractDetail, DomainError> {
        let mut state = self.state.write().await;
        let mut contract = state.owned_contract(tenant, contract_id)?;
        let mut bids = state.bids_of(contract_id);

        contract.activate(&mut bids, Utc::now())?;

        state.put_bids(&bids);
        state.put_contract(contract.clone());
        Ok(state.detail(contract))
    }

    async fn add_milestone(
        &self,
        tenant: TenantId,
        contract_id: Uuid,
        input: NewMilestone,
    ) -> Result<Milestone, DomainError> {
        let mut state = self.state.write().await;
        let contract = state.owned_contract(tenant, contract_id)?;
        let existing = state.milestones_of(contract_id);

        contract.ensure_milestone_budget(&existing, &input)?;

        let milestone = input.into_milestone(contract_id, Utc::now());
        state.milestones.push(milestone.clone());
        Ok(milestone)
    }

    async fn advance_milestone(
        &self,
        tenant: TenantId,
        contract_id: Uuid,
        milestone_id: Uuid,
        next: MilestoneStatus,
    ) -> Result<Milestone, DomainError> {
        let mut state = self.state.write().await;
        let contract = state.owned_contract(tenant, contract_id)?;
        let mut milestone = state
            .milestones_of(contract_id)
            .into_iter()
            .find(|milestone| milestone.id == milestone_id)
            .ok_or(DomainError::NotFound("milestone"))?;

        milestone.advance(&contract, next)?;

        state.put_milestones(std::slice::from_ref(&milestone));
        Ok(milestone)
    }

    async fn release_funds(
        &self,
        tenant: TenantId,
        contract_id: Uuid,
        amount: Decimal,
    ) -> Result<Release, DomainError> {
        let now = Utc::now();
        let mut state = self.state.write().await;
        let mut contract = state.owned_contract(tenant, contract_id)?;

        let amount = contract.release(amount, now)?;
        contract.complete_if_drained(now);
        let transaction = escrow::release_transaction(
            &contract,
            amount,
            format!("Escrow release: {}", contract.title),
            TransactionStatus::Settled,
            now,
        );

        state.put_contract(contract.clone());
        state.transactions.push(transaction.clone());
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
        let mut state = self.state.write().await;
        let mut contract = state.owned_contract(tenant, contract_id)?;
        let mut milestones = state.milestones_of(contract_id);
        let index = milestones
            .iter()
            .position(|milestone| milestone.id == milestone_id)
            .ok_or(DomainError::NotFound("milestone"))?;

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
        let task = self.schedule(tenant, SettlementKind::LedgerTransaction, transaction.id, now);

        state.put_contract(contract.clone());
        state.put_milestones(std::slice::from_ref(&milestone));
        state.transactions.push(transaction.clone());
        state.tasks.push(task.clone());
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
        let mut state = self.state.write().await;
        let mut contract = state.owned_contract(tenant, contract_id)?;
        contract.raise_dispute(&reason, Utc::now())?;
        state.put_contract(contract.clone());
        Ok(contract)
    }

    async fn resolve_dispute(
        &self,
        tenant: TenantId,
        contract_id: Uuid,
        outcome: DisputeOutcome,
    ) -> Result<Contract, DomainError> {
        let mut state = self.state.write().await;
        let mut contract = state.owned_contract(tenant, contract_id)?;
        contract.resolve_dispute(outcome, Utc::now())?;
        state.put_contract(contract.clone());
        Ok(contract)
    }

    async fn cancel_contract(
        &self,
        tenant: TenantId,
        contract_id: Uuid,
    ) -> Result<ContractDetail, DomainError> {
        let mut state = self.state.write().await;
        let mut contract = state.owned_contract(tenant, contract_id)?;
        let mut bids = state.bids_of(contract_id);

        contract.cancel(&mut bids, Utc::now())?;

        state.put_bids(&bids);
        state.put_contract(contract.clone());
        Ok(state.detail(contract))
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn list_transactions(
        &self,
        tenant: TenantId,
        limit: i64,
    ) -> Result<Vec<LedgerTransaction>, DomainError> {
        let state = self.state.read().await;
        let mut transactions: Vec<LedgerTransaction> = state
            .transactions
            .iter()
            .filter(|transaction| transaction.tenant == tenant)
            .cloned()
            .collect();
        transactions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        transactions.truncate(limit.max(0) as usize);
        Ok(transactions)
    }
}

#[async_trait]
impl PayrollStore for MemoryStore {
    async fn create_worker(
        &self,
        tenant: TenantId,
        input: NewWorker,
    ) -> Result<PayrollWorker, DomainError> {
        let worker = input.into_worker(tenant, Utc::now())?;
        self.state.write().await.workers.push(worker.clone());
        Ok(worker)
    }

    async fn list_workers(&self, tenant: TenantId) -> Result<Vec<PayrollWorker>, DomainError> {
        let state = self.state.read().await;
        Ok(state
            .workers
            .iter()
            .filter(|worker| worker.tenant == tenant)
            .cloned()
            .collect())
    }

    async fn create_batch(
        &self,
        tenant: TenantId,
        input: NewBatch,
    ) -> Result<BatchDetail, DomainError> {
        let mut state = self.state.write().await;
        let workers: Vec<PayrollWorker> = state
            .workers
            .iter()
            .filter(|worker| worker.tenant == tenant)
            .cloned()
            .collect();

        let (batch, payments) = input.into_draft(tenant, &workers, Utc::now())?;

        state.payments.extend(payments.iter().cloned());
        state.batches.insert(batch.id, batch.clone());
        Ok(BatchDetail { batch, payments })
    }

    async fn list_batches(&self, tenant: TenantId) -> Result<Vec<PayrollBatch>, DomainError> {
        let state = self.state.read().await;
        let mut batches: Vec<PayrollBatch> = state
            .batches
            .values()
            .filter(|batch| batch.owned_by(tenant))
            .cloned()
            .collect();
        batches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(batches)
    }

    async fn batch_detail(
        &self,
        tenant: TenantId,
        batch_id: Uuid,
    ) -> Result<BatchDetail, DomainError> {
        let state = self.state.read().await;
        let batch = state.owned_batch(tenant, batch_id)?;
        let payments = state.payments_of(batch_id);
        Ok(BatchDetail { batch, payments })
    }

    async fn submit_batch(
        &self,
        tenant: TenantId,
        batch_id: Uuid,
    ) -> Result<PayrollBatch, DomainError> {
        let mut state = self.state.write().await;
        let mut batch = state.owned_batch(tenant, batch_id)?;
        batch.submit(Utc::now())?;
        state.batches.insert(batch.id, batch.clone());
        Ok(batch)
    }

    async fn approve_batch(
        &self,
        tenant: TenantId,
        batch_id: Uuid,
    ) -> Result<PayrollBatch, DomainError> {
        let mut state = self.state.write().await;
        let mut batch = state.owned_batch(tenant, batch_id)?;
        batch.approve(Utc::now())?;
        state.batches.insert(batch.id, batch.clone());
        Ok(batch)
    }

    async fn execute_batch(
        &self,
        tenant: TenantId,
        batch_id: Uuid,
    ) -> Result<BatchExecution, DomainError> {
        let now = Utc::now();
        let mut state = self.state.write().await;
        let mut batch = state.owned_batch(tenant, batch_id)?;
        let mut payments = state.payments_of(batch_id);

        let transaction = batch.execute(&mut payments, now)?;
        let task = self.schedule(tenant, SettlementKind::PayrollBatch, batch.id, now);

        state.put_payments(&payments);
        state.batches.insert(batch.id, batch.clone());
        state.transactions.push(transaction.clone());
        state.tasks.push(task.clone());
        Ok(BatchExecution {
            detail: BatchDetail { batch, payments },
            transaction,
            settlement: task,
        })
    }
}

#[async_trait]
impl SettlementStore for MemoryStore {
    async fn run_due_settlements(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<SettlementOutcome>, DomainError> {
        let mut state = self.state.write().await;
        let mut due: Vec<usize> = (0..state.tasks.len())
            .filter(|index| state.tasks[*index].is_due(now))
            .collect();
        due.sort_by_key(|index| state.tasks[*index].due_at);
        due.truncate(limit.max(0) as usize);

        let mut outcomes = Vec::with_capacity(due.len());
        for index in due {
            let task = state.tasks[index].clone();
            match state.apply_settlement(&task, now) {
                Ok(()) => {
                    state.tasks[index].mark_done(now);
                    outcomes.push(SettlementOutcome::applied(&task));
                }
                Err(err) => {
                    warn!(task_id = %task.id, "settlement failed: {err}");
                    state.tasks[index].record_failure(&err);
                    outcomes.push(SettlementOutcome::failed(&task, &err));
                }
            }
        }

        Ok(outcomes)
    }
}

/// Keeps every nudge in memory; stands in for the Redis bus in tests and
/// single-process demos.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Uuid>>,
}

impl RecordingNotifier {
    pub async fn sent(&self) -> Vec<Uuid> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl SettlementNotifier for RecordingNotifier {
    async fn settlement_scheduled(&self, task_id: Uuid) -> anyhow::Result<()> {
        self.sent.lock().await.push(task_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests;
