use axum::{Json, extract::State, http::StatusCode};
use pyrnado_core::{
    Contract, ContractBid, ContractDetail, ContractSummary, DomainError, Milestone,
    MilestoneStatus, Release,
};
use pyrnado_platform::{
    CreateContractRequest, CreateMilestoneRequest, DisputeRequest, ReleaseFundsRequest,
    ReleaseMilestoneRequest, ResolveDisputeRequest, SubmitBidRequest, UpdateMilestoneRequest,
};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    app::AppState,
    auth::{MaybeTenant, TenantContext},
    error::{ApiError, ApiJson, ApiPath},
};

/// Public contract page: bidder identities are reduced to a count.
pub async fn view_public_contract(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<ContractSummary>, ApiError> {
    Ok(Json(state.escrow.view_public_contract(id).await?))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BidReceipt {
    pub id: Uuid,
    pub contract_id: Uuid,
    pub status: pyrnado_core::BidStatus,
    pub is_verified: bool,
}

impl From<ContractBid> for BidReceipt {
    fn from(bid: ContractBid) -> Self {
        Self {
            id: bid.id,
            contract_id: bid.contract_id,
            status: bid.status,
            is_verified: bid.is_verified,
        }
    }
}

pub async fn submit_bid(
    State(state): State<AppState>,
    MaybeTenant(caller): MaybeTenant,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<SubmitBidRequest>,
) -> Result<(StatusCode, Json<BidReceipt>), ApiError> {
    let bid = state
        .escrow
        .submit_bid(id, payload.into(), caller.is_some())
        .await?;
    Ok((StatusCode::CREATED, Json(bid.into())))
}

pub async fn list_contracts(
    State(state): State<AppState>,
    ctx: TenantContext,
) -> Result<Json<Vec<ContractSummary>>, ApiError> {
    Ok(Json(state.escrow.list_contracts(ctx.tenant).await?))
}

pub async fn create_contract(
    State(state): State<AppState>,
    ctx: TenantContext,
    ApiJson(payload): ApiJson<CreateContractRequest>,
) -> Result<(StatusCode, Json<ContractDetail>), ApiError> {
    let detail = state
        .escrow
        .create_contract(ctx.tenant, payload.into())
        .await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

pub async fn contract_detail(
    State(state): State<AppState>,
    ctx: TenantContext,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<ContractDetail>, ApiError> {
    Ok(Json(state.escrow.contract_detail(ctx.tenant, id).await?))
}

pub async fn accept_bid(
    State(state): State<AppState>,
    ctx: TenantContext,
    ApiPath((id, bid_id)): ApiPath<(Uuid, Uuid)>,
) -> Result<Json<ContractDetail>, ApiError> {
    Ok(Json(state.escrow.accept_bid(ctx.tenant, id, bid_id).await?))
}

pub async fn reject_bid(
    State(state): State<AppState>,
    ctx: TenantContext,
    ApiPath((id, bid_id)): ApiPath<(Uuid, Uuid)>,
) -> Result<Json<ContractBid>, ApiError> {
    Ok(Json(state.escrow.reject_bid(ctx.tenant, id, bid_id).await?))
}

pub async fn release_funds(
    State(state): State<AppState>,
    ctx: TenantContext,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<ReleaseFundsRequest>,
) -> Result<Json<Release>, ApiError> {
    let release = state
        .escrow
        .release_funds(ctx.tenant, id, payload.amount)
        .await?;
    Ok(Json(release))
}

pub async fn release_milestone(
    State(state): State<AppState>,
    ctx: TenantContext,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<ReleaseMilestoneRequest>,
) -> Result<Json<Release>, ApiError> {
    let release = state
        .escrow
        .release_milestone(ctx.tenant, id, payload.milestone_id, payload.amount)
        .await?;
    if let Some(task) = &release.settlement {
        state.announce(task).await;
    }
    Ok(Json(release))
}

pub async fn add_milestone(
    State(state): State<AppState>,
    ctx: TenantContext,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<CreateMilestoneRequest>,
) -> Result<(StatusCode, Json<Milestone>), ApiError> {
    let milestone = state
        .escrow
        .add_milestone(ctx.tenant, id, payload.into())
        .await?;
    Ok((StatusCode::CREATED, Json(milestone)))
}

pub async fn update_milestone(
    State(state): State<AppState>,
    ctx: TenantContext,
    ApiPath((id, milestone_id)): ApiPath<(Uuid, Uuid)>,
    ApiJson(payload): ApiJson<UpdateMilestoneRequest>,
) -> Result<Json<Milestone>, ApiError> {
    if payload.status == MilestoneStatus::Released {
        return Err(DomainError::InvalidTransition(format!(
            "use POST /escrow/contracts/{id}/release to release a milestone"
        ))
        .into());
    }
    let milestone = state
        .escrow
        .advance_milestone(ctx.tenant, id, milestone_id, payload.status)
        .await?;
    Ok(Json(milestone))
}

pub async fn raise_dispute(
    State(state): State<AppState>,
    ctx: TenantContext,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<DisputeRequest>,
) -> Result<Json<Contract>, ApiError> {
    let contract = state
        .escrow
        .raise_dispute(ctx.tenant, id, payload.reason)
        .await?;
    Ok(Json(contract))
}

pub async fn resolve_dispute(
    State(state): State<AppState>,
    ctx: TenantContext,
    ApiPath(id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<ResolveDisputeRequest>,
) -> Result<Json<Contract>, ApiError> {
    let contract = state
        .escrow
        .resolve_dispute(ctx.tenant, id, payload.outcome)
        .await?;
    Ok(Json(contract))
}

pub async fn activate_contract(
    State(state): State<AppState>,
    ctx: TenantContext,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<ContractDetail>, ApiError> {
    Ok(Json(state.escrow.activate_contract(ctx.tenant, id).await?))
}

pub async fn cancel_contract(
    State(state): State<AppState>,
    ctx: TenantContext,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<ContractDetail>, ApiError> {
    Ok(Json(state.escrow.cancel_contract(ctx.tenant, id).await?))
}
