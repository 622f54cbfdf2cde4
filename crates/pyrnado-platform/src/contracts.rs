use chrono::NaiveDate;
use pyrnado_core::{
    DisputeOutcome, MilestoneStatus, NewBatch, NewBid, NewContract, NewMilestone, NewWorker,
    chain::DEFAULT_CHAIN, escrow::DEFAULT_CURRENCY,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DEFAULT_TRANSACTION_LIMIT: i64 = 50;
pub const MAX_TRANSACTION_LIMIT: i64 = 200;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMilestoneRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub amount: Decimal,
    pub due_date: NaiveDate,
}

impl From<CreateMilestoneRequest> for NewMilestone {
    fn from(request: CreateMilestoneRequest) -> Self {
        NewMilestone {
            title: request.title,
            description: request.description,
            amount: request.amount,
            due_date: request.due_date,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateContractRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub client: String,
    pub contractor: Option<String>,
    #[serde(default)]
    pub total_amount: Decimal,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    #[serde(default = "default_chain")]
    pub chain: String,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub milestones: Vec<CreateMilestoneRequest>,
}

impl From<CreateContractRequest> for NewContract {
    fn from(request: CreateContractRequest) -> Self {
        NewContract {
            title: request.title,
            description: request.description,
            client: request.client,
            contractor: request.contractor.filter(|name| !name.trim().is_empty()),
            total_amount: request.total_amount,
            currency: request.currency,
            start_date: request.start_date,
            end_date: request.end_date,
            chain: request.chain,
            is_public: request.is_public,
            milestones: request.milestones.into_iter().map(Into::into).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBidRequest {
    #[serde(default)]
    pub contractor_name: String,
    #[serde(default)]
    pub contractor_email: String,
    #[serde(default)]
    pub proposal: String,
    #[serde(default)]
    pub amount: Decimal,
}

impl From<SubmitBidRequest> for NewBid {
    fn from(request: SubmitBidRequest) -> Self {
        NewBid {
            contractor_name: request.contractor_name,
            contractor_email: request.contractor_email,
            proposal: request.proposal,
            amount: request.amount,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseFundsRequest {
    pub amount: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseMilestoneRequest {
    pub milestone_id: Uuid,
    pub amount: Option<Decimal>,
}

/// Named milestone transition; only `completed` and `approved` are accepted
/// here, release has its own endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMilestoneRequest {
    pub status: MilestoneStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisputeRequest {
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveDisputeRequest {
    pub outcome: DisputeOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkerRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub wallet_address: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub salary: Decimal,
    #[serde(default = "default_currency")]
    pub currency: String,
}

impl From<CreateWorkerRequest> for NewWorker {
    fn from(request: CreateWorkerRequest) -> Self {
        NewWorker {
            name: request.name,
            email: request.email,
            wallet_address: request.wallet_address,
            role: request.role,
            salary: request.salary,
            currency: request.currency,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBatchRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub worker_ids: Vec<Uuid>,
    #[serde(default)]
    pub amounts: Vec<Decimal>,
    pub scheduled_for: Option<NaiveDate>,
}

impl From<CreateBatchRequest> for NewBatch {
    fn from(request: CreateBatchRequest) -> Self {
        NewBatch {
            name: request.name,
            currency: request.currency,
            worker_ids: request.worker_ids,
            amounts: request.amounts,
            scheduled_for: request.scheduled_for,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionsQuery {
    pub limit: Option<i64>,
}

impl TransactionsQuery {
    pub fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_TRANSACTION_LIMIT)
            .clamp(1, MAX_TRANSACTION_LIMIT)
    }
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_chain() -> String {
    DEFAULT_CHAIN.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_request_fills_defaults() {
        let request: CreateContractRequest = serde_json::from_str(
            r#"{
                "title": "Audit",
                "client": "Acme",
                "totalAmount": "1200.50",
                "milestones": [{ "title": "Report", "amount": "1200.50", "dueDate": "2026-11-30" }]
            }"#,
        )
        .unwrap();
        let input = NewContract::from(request);

        assert_eq!(input.currency, "USDC");
        assert_eq!(input.chain, "ethereum");
        assert!(!input.is_public);
        assert_eq!(input.total_amount, Decimal::new(120050, 2));
        assert_eq!(input.milestones.len(), 1);
        assert_eq!(input.milestones[0].description, "");
    }

    #[test]
    fn milestone_update_rejects_unknown_statuses() {
        assert!(serde_json::from_str::<UpdateMilestoneRequest>(r#"{"status":"approved"}"#).is_ok());
        assert!(serde_json::from_str::<UpdateMilestoneRequest>(r#"{"status":"paid"}"#).is_err());
    }

    #[test]
    fn transaction_limit_is_clamped() {
        assert_eq!(TransactionsQuery::default().limit(), 50);
        assert_eq!(TransactionsQuery { limit: Some(5_000) }.limit(), 200);
        assert_eq!(TransactionsQuery { limit: Some(-3) }.limit(), 1);
    }
}
