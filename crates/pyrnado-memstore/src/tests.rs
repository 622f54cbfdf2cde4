use std::sync::Arc;

use chrono::NaiveDate;
use pyrnado_core::{
    BatchStatus, BidStatus, ContractStatus, PaymentStatus, TransactionType, chain,
    escrow::DEFAULT_CURRENCY,
};

use super::*;

fn amount(value: i64) -> Decimal {
    Decimal::new(value, 0)
}

fn milestone(title: &str, value: i64) -> NewMilestone {
    NewMilestone {
        title: title.to_string(),
        description: String::new(),
        amount: amount(value),
        due_date: NaiveDate::from_ymd_opt(2026, 12, 1).unwrap(),
    }
}

fn contract(total: i64, milestones: Vec<NewMilestone>) -> NewContract {
    NewContract {
        title: "Mobile wallet".to_string(),
        description: "iOS and Android".to_string(),
        client: "Pyrnado Labs".to_string(),
        contractor: None,
        total_amount: amount(total),
        currency: DEFAULT_CURRENCY.to_string(),
        start_date: None,
        end_date: None,
        chain: chain::DEFAULT_CHAIN.to_string(),
        is_public: true,
        milestones,
    }
}

fn bid(name: &str, value: i64) -> NewBid {
    NewBid {
        contractor_name: name.to_string(),
        contractor_email: format!("{}@example.com", name.to_lowercase()),
        proposal: "Shipped three wallets before".to_string(),
        amount: amount(value),
    }
}

async fn approve(store: &MemoryStore, tenant: TenantId, contract_id: Uuid, milestone_id: Uuid) {
    store
        .advance_milestone(tenant, contract_id, milestone_id, MilestoneStatus::Completed)
        .await
        .unwrap();
    store
        .advance_milestone(tenant, contract_id, milestone_id, MilestoneStatus::Approved)
        .await
        .unwrap();
}

/// Contract of 10000 split into two milestones, won by a 9500 bid.
async fn active_contract(store: &MemoryStore, tenant: TenantId) -> ContractDetail {
    let created = store
        .create_contract(
            tenant,
            contract(10_000, vec![milestone("Design", 5_000), milestone("Build", 5_000)]),
        )
        .await
        .unwrap();
    let id = created.contract.id;
    store.submit_bid(id, bid("Ann", 9_000), false).await.unwrap();
    let winner = store.submit_bid(id, bid("Bea", 9_500), true).await.unwrap();
    store.submit_bid(id, bid("Cat", 8_000), false).await.unwrap();
    store.accept_bid(tenant, id, winner.id).await.unwrap()
}

#[tokio::test]
async fn bid_acceptance_scenario() {
    let store = MemoryStore::default();
    let tenant = TenantId::new();

    let detail = active_contract(&store, tenant).await;

    assert_eq!(detail.contract.status, ContractStatus::Active);
    assert_eq!(detail.contract.contractor.as_deref(), Some("Bea"));
    assert_eq!(detail.contract.total_amount, amount(9_500));
    assert_eq!(detail.contract.locked_amount, amount(9_500));
    assert!(!detail.contract.is_public);
    assert_eq!(detail.milestones.len(), 2);
    let statuses: Vec<(i64, BidStatus)> = detail
        .bids
        .iter()
        .map(|bid| (bid.amount.try_into().unwrap(), bid.status))
        .collect();
    assert!(statuses.contains(&(9_500, BidStatus::Accepted)));
    assert!(statuses.contains(&(9_000, BidStatus::Rejected)));
    assert!(statuses.contains(&(8_000, BidStatus::Rejected)));
}

#[tokio::test]
async fn release_scenario_keeps_the_books_balanced() {
    let store = MemoryStore::default();
    let tenant = TenantId::new();
    let id = active_contract(&store, tenant).await.contract.id;

    let release = store.release_funds(tenant, id, amount(3_000)).await.unwrap();
    assert_eq!(release.contract.locked_amount, amount(6_500));
    assert_eq!(release.contract.released_amount, amount(3_000));
    assert_eq!(release.transaction.amount, amount(3_000));
    assert_eq!(release.transaction.kind, TransactionType::Escrow);
    assert_eq!(release.transaction.status, TransactionStatus::Settled);
    assert!(!release.transaction.is_incoming);

    let err = store
        .release_funds(tenant, id, amount(7_000))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::InsufficientFunds { .. }));

    let detail = store.contract_detail(tenant, id).await.unwrap();
    assert_eq!(detail.contract.locked_amount, amount(6_500));
    assert_eq!(
        detail.contract.locked_amount + detail.contract.released_amount,
        detail.contract.total_amount
    );
    let ledger = store.list_transactions(tenant, 50).await.unwrap();
    assert_eq!(ledger.len(), 1);
}

#[tokio::test]
async fn concurrent_acceptances_have_one_winner() {
    let store = Arc::new(MemoryStore::default());
    let tenant = TenantId::new();
    let id = store
        .create_contract(tenant, contract(1_000, Vec::new()))
        .await
        .unwrap()
        .contract
        .id;
    let first = store.submit_bid(id, bid("Ann", 900), false).await.unwrap();
    let second = store.submit_bid(id, bid("Bea", 950), false).await.unwrap();

    let (a, b) = tokio::join!(
        {
            let store = store.clone();
            async move { store.accept_bid(tenant, id, first.id).await }
        },
        {
            let store = store.clone();
            async move { store.accept_bid(tenant, id, second.id).await }
        }
    );

    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let loser = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    assert!(matches!(
        loser,
        DomainError::Conflict(_) | DomainError::InvalidTransition(_)
    ));
    let detail = store.contract_detail(tenant, id).await.unwrap();
    let accepted = detail
        .bids
        .iter()
        .filter(|bid| bid.status == BidStatus::Accepted)
        .count();
    assert_eq!(accepted, 1);
}

#[tokio::test]
async fn private_or_active_contracts_refuse_bids() {
    let store = MemoryStore::default();
    let tenant = TenantId::new();
    let mut private = contract(1_000, Vec::new());
    private.is_public = false;
    let private_id = store.create_contract(tenant, private).await.unwrap().contract.id;

    let err = store
        .submit_bid(private_id, bid("Ann", 900), false)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Conflict(_)));

    let active_id = active_contract(&store, tenant).await.contract.id;
    let err = store
        .submit_bid(active_id, bid("Dan", 900), false)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Conflict(_)));
}

#[tokio::test]
async fn other_tenants_cannot_see_or_touch_contracts() {
    let store = MemoryStore::default();
    let owner = TenantId::new();
    let stranger = TenantId::new();
    let id = active_contract(&store, owner).await.contract.id;

    assert_eq!(
        store.contract_detail(stranger, id).await.unwrap_err(),
        DomainError::NotFound("contract")
    );
    assert!(store.release_funds(stranger, id, amount(1)).await.is_err());
    assert!(store.list_contracts(stranger).await.unwrap().is_empty());
    assert_eq!(store.list_contracts(owner).await.unwrap().len(), 1);
}

#[tokio::test]
async fn public_view_counts_every_fetch() {
    let store = MemoryStore::default();
    let tenant = TenantId::new();
    let id = store
        .create_contract(tenant, contract(1_000, vec![milestone("All", 1_000)]))
        .await
        .unwrap()
        .contract
        .id;
    store.submit_bid(id, bid("Ann", 900), false).await.unwrap();

    store.view_public_contract(id).await.unwrap();
    let summary = store.view_public_contract(id).await.unwrap();

    assert_eq!(summary.contract.view_count, 2);
    assert_eq!(summary.bid_count, 1);
    assert_eq!(summary.milestones.len(), 1);
}

#[tokio::test]
async fn milestone_release_settles_through_the_task_queue() {
    let store = MemoryStore::new(Duration::seconds(3));
    let tenant = TenantId::new();
    let detail = active_contract(&store, tenant).await;
    let id = detail.contract.id;
    let design = detail.milestones[0].id;

    let err = store
        .release_milestone(tenant, id, design, None)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::InvalidTransition(_)));

    approve(&store, tenant, id, design).await;
    let release = store
        .release_milestone(tenant, id, design, Some(amount(5_000)))
        .await
        .unwrap();
    assert_eq!(release.contract.locked_amount, amount(4_500));
    assert_eq!(release.contract.released_amount, amount(5_000));
    assert_eq!(
        release.milestone.as_ref().map(|m| m.status),
        Some(MilestoneStatus::Released)
    );
    assert_eq!(release.transaction.status, TransactionStatus::Pending);
    let task = release.settlement.unwrap();

    let early = store.run_due_settlements(Utc::now(), 10).await.unwrap();
    assert!(early.is_empty());

    let outcomes = store
        .run_due_settlements(task.due_at, 10)
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].applied);
    let ledger = store.list_transactions(tenant, 10).await.unwrap();
    assert_eq!(ledger[0].status, TransactionStatus::Settled);
    assert!(store.run_due_settlements(task.due_at, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn releasing_the_last_milestone_completes_the_contract() {
    let store = MemoryStore::default();
    let tenant = TenantId::new();
    let created = store
        .create_contract(tenant, contract(1_000, vec![milestone("All", 1_000)]))
        .await
        .unwrap();
    let id = created.contract.id;
    let only = created.milestones[0].id;
    let winner = store.submit_bid(id, bid("Ann", 1_000), false).await.unwrap();
    store.accept_bid(tenant, id, winner.id).await.unwrap();
    approve(&store, tenant, id, only).await;

    let release = store.release_milestone(tenant, id, only, None).await.unwrap();

    assert_eq!(release.contract.status, ContractStatus::Completed);
    assert!(release.contract.locked_amount.is_zero());
}

#[tokio::test]
async fn draining_the_rest_completes_a_bid_shrunk_contract() {
    let store = MemoryStore::default();
    let tenant = TenantId::new();
    let detail = active_contract(&store, tenant).await;
    let id = detail.contract.id;
    let (design, build) = (detail.milestones[0].id, detail.milestones[1].id);
    approve(&store, tenant, id, design).await;
    approve(&store, tenant, id, build).await;

    let first = store.release_milestone(tenant, id, design, None).await.unwrap();
    assert_eq!(first.contract.locked_amount, amount(4_500));
    assert_eq!(first.contract.status, ContractStatus::Active);
    let err = store
        .release_milestone(tenant, id, build, None)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::InsufficientFunds { .. }));

    let rest = store.release_funds(tenant, id, amount(4_500)).await.unwrap();
    assert_eq!(rest.contract.status, ContractStatus::Completed);
    assert!(rest.contract.locked_amount.is_zero());
    assert_eq!(rest.contract.released_amount, amount(9_500));
}

#[tokio::test]
async fn release_amounts_are_rounded_before_checks() {
    let store = MemoryStore::default();
    let tenant = TenantId::new();
    let id = active_contract(&store, tenant).await.contract.id;

    let err = store
        .release_funds(tenant, id, Decimal::new(1, 5))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::InvalidInput(_)));

    let release = store
        .release_funds(tenant, id, Decimal::new(250_000_004, 5))
        .await
        .unwrap();
    assert_eq!(release.transaction.amount, amount(2_500));
    assert_eq!(release.contract.locked_amount, amount(7_000));
}

#[tokio::test]
async fn private_contract_with_contractor_can_be_activated() {
    let store = MemoryStore::default();
    let tenant = TenantId::new();
    let mut new = contract(1_000, vec![milestone("Audit", 1_000)]);
    new.is_public = false;
    new.contractor = Some("Known Contractor".to_string());
    let created = store.create_contract(tenant, new).await.unwrap();
    let (id, audit) = (created.contract.id, created.milestones[0].id);
    assert_eq!(created.contract.status, ContractStatus::Draft);

    let err = store.release_funds(tenant, id, amount(100)).await.unwrap_err();
    assert!(matches!(err, DomainError::InvalidTransition(_)));
    assert_eq!(
        store.activate_contract(TenantId::new(), id).await.unwrap_err(),
        DomainError::NotFound("contract")
    );

    let activated = store.activate_contract(tenant, id).await.unwrap();
    assert_eq!(activated.contract.status, ContractStatus::Active);
    assert_eq!(activated.contract.locked_amount, amount(1_000));

    approve(&store, tenant, id, audit).await;
    let partial = store.release_funds(tenant, id, amount(100)).await.unwrap();
    assert_eq!(partial.contract.locked_amount, amount(900));
    let disputed = store
        .raise_dispute(tenant, id, "scope creep".to_string())
        .await
        .unwrap();
    assert_eq!(disputed.status, ContractStatus::Disputed);
    assert!(matches!(
        store.activate_contract(tenant, id).await.unwrap_err(),
        DomainError::InvalidTransition(_)
    ));
}

#[tokio::test]
async fn open_bidding_contract_without_contractor_cannot_be_activated() {
    let store = MemoryStore::default();
    let tenant = TenantId::new();
    let id = store
        .create_contract(tenant, contract(1_000, Vec::new()))
        .await
        .unwrap()
        .contract
        .id;
    store.submit_bid(id, bid("Ann", 900), false).await.unwrap();

    let err = store.activate_contract(tenant, id).await.unwrap_err();
    assert!(matches!(err, DomainError::InvalidInput(_)));
    let detail = store.contract_detail(tenant, id).await.unwrap();
    assert_eq!(detail.contract.status, ContractStatus::Draft);
    assert_eq!(detail.bids[0].status, BidStatus::Pending);
}

#[tokio::test]
async fn milestones_cannot_skip_states_or_be_forced_released() {
    let store = MemoryStore::default();
    let tenant = TenantId::new();
    let detail = active_contract(&store, tenant).await;
    let (id, build) = (detail.contract.id, detail.milestones[1].id);

    for status in [MilestoneStatus::Approved, MilestoneStatus::Released] {
        let err = store
            .advance_milestone(tenant, id, build, status)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition(_)));
    }
    let err = store
        .advance_milestone(tenant, id, Uuid::new_v4(), MilestoneStatus::Completed)
        .await
        .unwrap_err();
    assert_eq!(err, DomainError::NotFound("milestone"));
}

#[tokio::test]
async fn rejecting_and_cancelling() {
    let store = MemoryStore::default();
    let tenant = TenantId::new();
    let id = store
        .create_contract(tenant, contract(1_000, Vec::new()))
        .await
        .unwrap()
        .contract
        .id;
    let first = store.submit_bid(id, bid("Ann", 900), false).await.unwrap();
    store.submit_bid(id, bid("Bea", 950), false).await.unwrap();

    let rejected = store.reject_bid(tenant, id, first.id).await.unwrap();
    assert_eq!(rejected.status, BidStatus::Rejected);
    assert!(store.reject_bid(tenant, id, first.id).await.is_err());
    assert_eq!(
        store.reject_bid(tenant, id, Uuid::new_v4()).await.unwrap_err(),
        DomainError::NotFound("bid")
    );

    let cancelled = store.cancel_contract(tenant, id).await.unwrap();
    assert_eq!(cancelled.contract.status, ContractStatus::Cancelled);
    assert!(cancelled.bids.iter().all(|b| b.status == BidStatus::Rejected));
    assert!(store.view_public_contract(id).await.is_err());
}

#[tokio::test]
async fn dispute_round_trip() {
    let store = MemoryStore::default();
    let tenant = TenantId::new();
    let id = active_contract(&store, tenant).await.contract.id;

    let disputed = store
        .raise_dispute(tenant, id, "work not delivered".to_string())
        .await
        .unwrap();
    assert_eq!(disputed.status, ContractStatus::Disputed);
    assert!(store.release_funds(tenant, id, amount(1)).await.is_err());

    let resumed = store
        .resolve_dispute(tenant, id, DisputeOutcome::Resume)
        .await
        .unwrap();
    assert_eq!(resumed.status, ContractStatus::Active);
    assert!(
        store
            .resolve_dispute(tenant, id, DisputeOutcome::Cancel)
            .await
            .is_err()
    );
}

#[tokio::test]
async fn payroll_batch_settles_after_execution() {
    let store = MemoryStore::new(Duration::seconds(5));
    let tenant = TenantId::new();
    let mut worker_ids = Vec::new();
    for name in ["ann", "bea"] {
        let worker = store
            .create_worker(
                tenant,
                NewWorker {
                    name: name.to_string(),
                    email: format!("{name}@example.com"),
                    wallet_address: format!("0x{name}"),
                    role: "engineer".to_string(),
                    salary: amount(4_000),
                    currency: "USDC".to_string(),
                },
            )
            .await
            .unwrap();
        worker_ids.push(worker.id);
    }

    let err = store
        .create_batch(
            tenant,
            NewBatch {
                name: "April".to_string(),
                currency: "USDC".to_string(),
                worker_ids: worker_ids.clone(),
                amounts: vec![amount(4_000)],
                scheduled_for: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::MalformedBatch(_)));

    let detail = store
        .create_batch(
            tenant,
            NewBatch {
                name: "April".to_string(),
                currency: "USDC".to_string(),
                worker_ids,
                amounts: vec![amount(4_000), amount(4_500)],
                scheduled_for: None,
            },
        )
        .await
        .unwrap();
    let batch_id = detail.batch.id;
    assert_eq!(detail.payments.len(), 2);

    assert!(store.execute_batch(tenant, batch_id).await.is_err());
    store.submit_batch(tenant, batch_id).await.unwrap();
    store.approve_batch(tenant, batch_id).await.unwrap();
    let execution = store.execute_batch(tenant, batch_id).await.unwrap();
    assert_eq!(execution.detail.batch.status, BatchStatus::Processing);
    assert_eq!(execution.transaction.amount, amount(8_500));

    let outcomes = store
        .run_due_settlements(execution.settlement.due_at, 10)
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 1);

    let detail = store.batch_detail(tenant, batch_id).await.unwrap();
    assert_eq!(detail.batch.status, BatchStatus::Completed);
    assert!(
        detail
            .payments
            .iter()
            .all(|payment| payment.status == PaymentStatus::Completed)
    );
    let ledger = store.list_transactions(tenant, 10).await.unwrap();
    assert_eq!(ledger[0].kind, TransactionType::Payroll);
    assert_eq!(ledger[0].status, TransactionStatus::Settled);
}

#[tokio::test]
async fn tokens_resolve_to_their_tenant() {
    let store = MemoryStore::default();
    let tenant = TenantId::new();
    let token = store.register_user(tenant).await;

    let principal = store.resolve_token(&token).await.unwrap().unwrap();
    assert_eq!(principal.tenant, tenant);
    assert!(store.resolve_token("nope").await.unwrap().is_none());
}
