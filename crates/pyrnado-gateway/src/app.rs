use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post, put},
};
use pyrnado_core::{
    EscrowStore, IdentityStore, LedgerStore, PayrollStore, SettlementNotifier, SettlementTask,
};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::{escrow, ledger, payroll};

#[derive(Clone)]
pub struct AppState {
    pub identity: Arc<dyn IdentityStore>,
    pub escrow: Arc<dyn EscrowStore>,
    pub ledger: Arc<dyn LedgerStore>,
    pub payroll: Arc<dyn PayrollStore>,
    pub notifier: Arc<dyn SettlementNotifier>,
}

impl AppState {
    /// Serves every concern from one backing store.
    pub fn new<S>(store: Arc<S>, notifier: Arc<dyn SettlementNotifier>) -> Self
    where
        S: IdentityStore + EscrowStore + LedgerStore + PayrollStore + 'static,
    {
        Self {
            identity: store.clone(),
            escrow: store.clone(),
            ledger: store.clone(),
            payroll: store,
            notifier,
        }
    }

    /// Nudges settlement executors once the task row is committed. A lost
    /// nudge is picked up by the executor's poll, so failures only log.
    pub async fn announce(&self, task: &SettlementTask) {
        if let Err(err) = self.notifier.settlement_scheduled(task.id).await {
            warn!(task_id = %task.id, "failed to publish settlement nudge: {err:#}");
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/escrow/public/{id}", get(escrow::view_public_contract))
        .route("/escrow/public/{id}/bid", post(escrow::submit_bid))
        .route(
            "/escrow/contracts",
            get(escrow::list_contracts).post(escrow::create_contract),
        )
        .route("/escrow/contracts/{id}", get(escrow::contract_detail))
        .route(
            "/escrow/contracts/{id}/bids/{bid_id}/accept",
            put(escrow::accept_bid),
        )
        .route(
            "/escrow/contracts/{id}/bids/{bid_id}/reject",
            put(escrow::reject_bid),
        )
        .route(
            "/escrow/contracts/{id}/release",
            put(escrow::release_funds).post(escrow::release_milestone),
        )
        .route(
            "/escrow/contracts/{id}/milestones",
            post(escrow::add_milestone),
        )
        .route(
            "/escrow/contracts/{id}/milestones/{milestone_id}",
            put(escrow::update_milestone),
        )
        .route("/escrow/contracts/{id}/dispute", post(escrow::raise_dispute))
        .route(
            "/escrow/contracts/{id}/dispute/resolve",
            put(escrow::resolve_dispute),
        )
        .route("/escrow/contracts/{id}/activate", put(escrow::activate_contract))
        .route("/escrow/contracts/{id}/cancel", put(escrow::cancel_contract))
        .route("/transactions", get(ledger::list_transactions))
        .route(
            "/payroll/workers",
            get(payroll::list_workers).post(payroll::create_worker),
        )
        .route(
            "/payroll/batches",
            get(payroll::list_batches).post(payroll::create_batch),
        )
        .route("/payroll/batches/{id}", get(payroll::batch_detail))
        .route("/payroll/batches/{id}/submit", put(payroll::submit_batch))
        .route("/payroll/batches/{id}/approve", put(payroll::approve_batch))
        .route("/payroll/batches/{id}/execute", put(payroll::execute_batch))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}
