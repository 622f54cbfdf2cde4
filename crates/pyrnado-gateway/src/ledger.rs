use axum::{Json, extract::State};
use pyrnado_core::LedgerTransaction;
use pyrnado_platform::TransactionsQuery;

use crate::{
    app::AppState,
    auth::TenantContext,
    error::{ApiError, ApiQuery},
};

pub async fn list_transactions(
    State(state): State<AppState>,
    ctx: TenantContext,
    ApiQuery(query): ApiQuery<TransactionsQuery>,
) -> Result<Json<Vec<LedgerTransaction>>, ApiError> {
    let transactions = state
        .ledger
        .list_transactions(ctx.tenant, query.limit())
        .await?;
    Ok(Json(transactions))
}
