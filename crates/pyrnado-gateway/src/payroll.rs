use axum::{Json, extract::State, http::StatusCode};
use pyrnado_core::{BatchDetail, BatchExecution, PayrollBatch, PayrollWorker};
use pyrnado_platform::{CreateBatchRequest, CreateWorkerRequest};
use uuid::Uuid;

use crate::{
    app::AppState,
    auth::TenantContext,
    error::{ApiError, ApiJson, ApiPath},
};

pub async fn list_workers(
    State(state): State<AppState>,
    ctx: TenantContext,
) -> Result<Json<Vec<PayrollWorker>>, ApiError> {
    Ok(Json(state.payroll.list_workers(ctx.tenant).await?))
}

pub async fn create_worker(
    State(state): State<AppState>,
    ctx: TenantContext,
    ApiJson(payload): ApiJson<CreateWorkerRequest>,
) -> Result<(StatusCode, Json<PayrollWorker>), ApiError> {
    let worker = state
        .payroll
        .create_worker(ctx.tenant, payload.into())
        .await?;
    Ok((StatusCode::CREATED, Json(worker)))
}

pub async fn list_batches(
    State(state): State<AppState>,
    ctx: TenantContext,
) -> Result<Json<Vec<PayrollBatch>>, ApiError> {
    Ok(Json(state.payroll.list_batches(ctx.tenant).await?))
}

pub async fn create_batch(
    State(state): State<AppState>,
    ctx: TenantContext,
    ApiJson(payload): ApiJson<CreateBatchRequest>,
) -> Result<(StatusCode, Json<BatchDetail>), ApiError> {
    let detail = state
        .payroll
        .create_batch(ctx.tenant, payload.into())
        .await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

pub async fn batch_detail(
    State(state): State<AppState>,
    ctx: TenantContext,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<BatchDetail>, ApiError> {
    Ok(Json(state.payroll.batch_detail(ctx.tenant, id).await?))
}

pub async fn submit_batch(
    State(state): State<AppState>,
    ctx: TenantContext,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<PayrollBatch>, ApiError> {
    Ok(Json(state.payroll.submit_batch(ctx.tenant, id).await?))
}

pub async fn approve_batch(
    State(state): State<AppState>,
    ctx: TenantContext,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<PayrollBatch>, ApiError> {
    Ok(Json(state.payroll.approve_batch(ctx.tenant, id).await?))
}

pub async fn execute_batch(
    State(state): State<AppState>,
    ctx: TenantContext,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<BatchExecution>, ApiError> {
    let execution = state.payroll.execute_batch(ctx.tenant, id).await?;
    state.announce(&execution.settlement).await;
    Ok(Json(execution))
}
