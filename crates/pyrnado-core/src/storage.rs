use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::DomainError,
    escrow::{DisputeOutcome, NewBid, NewContract, NewMilestone},
    models::{
        Contract, ContractBid, LedgerTransaction, Milestone, MilestoneStatus, PayrollBatch,
        PayrollPayment, PayrollWorker, Principal, TenantId,
    },
    payroll::{NewBatch, NewWorker},
    settlement::{SettlementOutcome, SettlementTask},
};

/// Contract with milestones and a bid count; the shape shown on listings and
/// on the public page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractSummary {
    #[serde(flatten)]
    pub contract: Contract,
    pub milestones: Vec<Milestone>,
    pub bid_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractDetail {
    #[serde(flatten)]
    pub contract: Contract,
    pub milestones: Vec<Milestone>,
    pub bids: Vec<ContractBid>,
}

/// Outcome of either release variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    pub contract: Contract,
    pub milestone: Option<Milestone>,
    pub transaction: LedgerTransaction,
    pub settlement: Option<SettlementTask>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchDetail {
    #[serde(flatten)]
    pub batch: PayrollBatch,
    pub payments: Vec<PayrollPayment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchExecution {
    #[serde(flatten)]
    pub detail: BatchDetail,
    pub transaction: LedgerTransaction,
    pub settlement: SettlementTask,
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Maps a bearer credential to a caller, `None` when nobody holds it.
    async fn resolve_token(&self, token: &str) -> Result<Option<Principal>, DomainError>;
}

/// Escrow contracts, their milestones and bids. Every mutating call is one
/// atomic unit: it either applies completely or leaves no trace.
#[async_trait]
pub trait EscrowStore: Send + Sync {
    async fn create_contract(
        &self,
        tenant: TenantId,
        input: NewContract,
    ) -> Result<ContractDetail, DomainError>;

    async fn list_contracts(&self, tenant: TenantId) -> Result<Vec<ContractSummary>, DomainError>;

    async fn contract_detail(
        &self,
        tenant: TenantId,
        contract_id: Uuid,
    ) -> Result<ContractDetail, DomainError>;

    /// Fetches a public contract and bumps its view counter.
    async fn view_public_contract(&self, contract_id: Uuid)
    -> Result<ContractSummary, DomainError>;

    async fn submit_bid(
        &self,
        contract_id: Uuid,
        input: NewBid,
        is_verified: bool,
    ) -> Result<ContractBid, DomainError>;

    async fn accept_bid(
        &self,
        tenant: TenantId,
        contract_id: Uuid,
        bid_id: Uuid,
    ) -> Result<ContractDetail, DomainError>;

    async fn reject_bid(
        &self,
        tenant: TenantId,
        contract_id: Uuid,
        bid_id: Uuid,
    ) -> Result<ContractBid, DomainError>;

    /// Starts a draft contract whose contractor was named at creation.
    async fn activate_contract(
        &self,
        tenant: TenantId,
        contract_id: Uuid,
    ) -> Result<ContractDetail, DomainError>;

    async fn add_milestone(
        &self,
        tenant: TenantId,
        contract_id: Uuid,
        input: NewMilestone,
    ) -> Result<Milestone, DomainError>;

    async fn advance_milestone(
        &self,
        tenant: TenantId,
        contract_id: Uuid,
        milestone_id: Uuid,
        next: MilestoneStatus,
    ) -> Result<Milestone, DomainError>;

    async fn release_funds(
        &self,
        tenant: TenantId,
        contract_id: Uuid,
        amount: Decimal,
    ) -> Result<Release, DomainError>;

    async fn release_milestone(
        &self,
        tenant: TenantId,
        contract_id: Uuid,
        milestone_id: Uuid,
        amount: Option<Decimal>,
    ) -> Result<Release, DomainError>;

    async fn raise_dispute(
        &self,
        tenant: TenantId,
        contract_id: Uuid,
        reason: String,
    ) -> Result<Contract, DomainError>;

    async fn resolve_dispute(
        &self,
        tenant: TenantId,
        contract_id: Uuid,
        outcome: DisputeOutcome,
    ) -> Result<Contract, DomainError>;

    async fn cancel_contract(
        &self,
        tenant: TenantId,
        contract_id: Uuid,
    ) -> Result<ContractDetail, DomainError>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn list_transactions(
        &self,
        tenant: TenantId,
        limit: i64,
    ) -> Result<Vec<LedgerTransaction>, DomainError>;
}

#[async_trait]
pub trait PayrollStore: Send + Sync {
    async fn create_worker(
        &self,
        tenant: TenantId,
        input: NewWorker,
    ) -> Result<PayrollWorker, DomainError>;

    async fn list_workers(&self, tenant: TenantId) -> Result<Vec<PayrollWorker>, DomainError>;

    async fn create_batch(
        &self,
        tenant: TenantId,
        input: NewBatch,
    ) -> Result<BatchDetail, DomainError>;

    async fn list_batches(&self, tenant: TenantId) -> Result<Vec<PayrollBatch>, DomainError>;

    async fn batch_detail(
        &self,
        tenant: TenantId,
        batch_id: Uuid,
    ) -> Result<BatchDetail, DomainError>;

    async fn submit_batch(
        &self,
        tenant: TenantId,
        batch_id: Uuid,
    ) -> Result<PayrollBatch, DomainError>;

    async fn approve_batch(
        &self,
        tenant: TenantId,
        batch_id: Uuid,
    ) -> Result<PayrollBatch, DomainError>;

    async fn execute_batch(
        &self,
        tenant: TenantId,
        batch_id: Uuid,
    ) -> Result<BatchExecution, DomainError>;
}

#[async_trait]
pub trait SettlementStore: Send + Sync {
    /// Claims up to `limit` scheduled tasks due at `now` and applies each one.
    /// Failed tasks stay scheduled with their attempt count bumped.
    async fn run_due_settlements(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<SettlementOutcome>, DomainError>;
}
