//! Escrow lifecycle rules.
//!
//! Every function here validates its preconditions before touching any field,
//! so a returned error always leaves the borrowed entities unchanged. Store
//! implementations load rows (locked), run these rules, and persist whatever
//! changed inside a single transaction.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    chain,
    error::DomainError,
    models::{
        BidStatus, Contract, ContractBid, ContractStatus, LedgerTransaction, Milestone,
        MilestoneStatus, TenantId, TransactionStatus, TransactionType,
    },
};

pub const DEFAULT_CURRENCY: &str = "USDC";

#[derive(Debug, Clone, PartialEq)]
pub struct NewMilestone {
    pub title: String,
    pub description: String,
    pub amount: Decimal,
    pub due_date: NaiveDate,
}

impl NewMilestone {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.title.trim().is_empty() {
            return Err(DomainError::invalid("milestone title is required"));
        }
        if self.amount <= Decimal::ZERO {
            return Err(DomainError::invalid("milestone amount must be positive"));
        }
        Ok(())
    }

    pub fn into_milestone(self, contract_id: Uuid, now: DateTime<Utc>) -> Milestone {
        Milestone {
            id: Uuid::new_v4(),
            contract_id,
            title: self.title.trim().to_string(),
            description: self.description.trim().to_string(),
            amount: self.amount.round_dp(4),
            status: MilestoneStatus::Pending,
            due_date: self.due_date,
            completed_date: None,
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewContract {
    pub title: String,
    pub description: String,
    pub client: String,
    pub contractor: Option<String>,
    pub total_amount: Decimal,
    pub currency: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub chain: String,
    pub is_public: bool,
    pub milestones: Vec<NewMilestone>,
}

impl NewContract {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.title.trim().is_empty() {
            return Err(DomainError::invalid("title is required"));
        }
        if self.client.trim().is_empty() {
            return Err(DomainError::invalid("client is required"));
        }
        if self.currency.trim().is_empty() {
            return Err(DomainError::invalid("currency is required"));
        }
        if self.total_amount <= Decimal::ZERO {
            return Err(DomainError::invalid("totalAmount must be positive"));
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date)
            && end < start
        {
            return Err(DomainError::invalid("endDate must not precede startDate"));
        }

        let mut committed = Decimal::ZERO;
        for milestone in &self.milestones {
            milestone.validate()?;
            committed += milestone.amount;
        }
        if committed > self.total_amount {
            return Err(DomainError::invalid(format!(
                "milestone amounts ({committed}) exceed totalAmount ({})",
                self.total_amount
            )));
        }

        Ok(())
    }

    /// Builds the draft contract and its pending milestones.
    pub fn into_draft(
        self,
        tenant: TenantId,
        now: DateTime<Utc>,
    ) -> Result<(Contract, Vec<Milestone>), DomainError> {
        self.validate()?;

        let id = Uuid::new_v4();
        let total = self.total_amount.round_dp(4);
        let contract = Contract {
            id,
            tenant,
            title: self.title.trim().to_string(),
            description: self.description.trim().to_string(),
            client: self.client.trim().to_string(),
            contractor: self
                .contractor
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            total_amount: total,
            locked_amount: total,
            released_amount: Decimal::ZERO,
            currency: self.currency.trim().to_ascii_uppercase(),
            status: ContractStatus::Draft,
            is_public: self.is_public,
            start_date: self.start_date,
            end_date: self.end_date,
            chain: self.chain,
            contract_address: chain::contract_address(id),
            view_count: 0,
            dispute_reason: None,
            created_at: now,
            updated_at: now,
        };
        let milestones = self
            .milestones
            .into_iter()
            .map(|milestone| milestone.into_milestone(id, now))
            .collect();

        Ok((contract, milestones))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewBid {
    pub contractor_name: String,
    pub contractor_email: String,
    pub proposal: String,
    pub amount: Decimal,
}

impl NewBid {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.contractor_name.trim().is_empty() {
            return Err(DomainError::invalid("contractorName is required"));
        }
        let email = self.contractor_email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(DomainError::invalid("contractorEmail must be an email address"));
        }
        if self.amount <= Decimal::ZERO {
            return Err(DomainError::invalid("amount must be positive"));
        }
        Ok(())
    }

    pub fn into_bid(
        self,
        contract: &Contract,
        is_verified: bool,
        now: DateTime<Utc>,
    ) -> Result<ContractBid, DomainError> {
        self.validate()?;
        if !contract.accepting_bids() {
            return Err(DomainError::Conflict(
                "contract is not accepting bids".to_string(),
            ));
        }

        Ok(ContractBid {
            id: Uuid::new_v4(),
            contract_id: contract.id,
            contractor_name: self.contractor_name.trim().to_string(),
            contractor_email: self.contractor_email.trim().to_ascii_lowercase(),
            proposal: self.proposal.trim().to_string(),
            amount: self.amount.round_dp(4),
            status: BidStatus::Pending,
            is_verified,
            created_at: now,
            decided_at: None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeOutcome {
    Resume,
    Cancel,
}

/// Result of accepting a bid: the winner plus every bid closed by the fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BidDecision {
    pub accepted: Uuid,
    pub rejected: Vec<Uuid>,
}

impl ContractStatus {
    pub fn can_transition_to(self, next: ContractStatus) -> bool {
        use ContractStatus::*;
        matches!(
            (self, next),
            (Draft, Active)
                | (Draft, Cancelled)
                | (Active, Completed)
                | (Active, Disputed)
                | (Active, Cancelled)
                | (Disputed, Active)
                | (Disputed, Cancelled)
        )
    }
}

impl MilestoneStatus {
    pub fn next(self) -> Option<MilestoneStatus> {
        match self {
            MilestoneStatus::Pending => Some(MilestoneStatus::Completed),
            MilestoneStatus::Completed => Some(MilestoneStatus::Approved),
            MilestoneStatus::Approved => Some(MilestoneStatus::Released),
            MilestoneStatus::Released => None,
        }
    }
}

impl Contract {
    pub fn owned_by(&self, tenant: TenantId) -> bool {
        self.tenant == tenant
    }

    /// Public bidding is open only on public contracts nobody has won yet.
    pub fn accepting_bids(&self) -> bool {
        self.is_public && self.status == ContractStatus::Draft
    }

    pub fn transition(
        &mut self,
        next: ContractStatus,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::transition("contract", self.status, next));
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Starts work on a draft contract whose contractor was named up front.
    /// Bidding closes and any pending bids are rejected.
    pub fn activate(
        &mut self,
        bids: &mut [ContractBid],
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, DomainError> {
        if self.status != ContractStatus::Draft {
            return Err(DomainError::transition(
                "contract",
                self.status,
                ContractStatus::Active,
            ));
        }
        if self.contractor.is_none() {
            return Err(DomainError::invalid(
                "contractor must be set before the contract can be activated",
            ));
        }
        self.transition(ContractStatus::Active, now)?;
        self.is_public = false;
        Ok(reject_pending(bids, None, now))
    }

    /// Moves `amount`, rounded to four places, from locked to released and
    /// returns the amount moved.
    pub fn release(
        &mut self,
        amount: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Decimal, DomainError> {
        let amount = amount.round_dp(4);
        if amount <= Decimal::ZERO {
            return Err(DomainError::invalid("amount must be positive"));
        }
        if self.status != ContractStatus::Active {
            return Err(DomainError::InvalidTransition(format!(
                "funds can only be released from an active contract, found {}",
                self.status
            )));
        }
        if amount > self.locked_amount {
            return Err(DomainError::InsufficientFunds {
                requested: amount,
                available: self.locked_amount,
            });
        }

        self.locked_amount -= amount;
        self.released_amount += amount;
        self.updated_at = now;
        Ok(amount)
    }

    /// Completes an active contract once nothing is left locked. Milestones
    /// that were never funded do not hold it open. Returns whether the status
    /// changed.
    pub fn complete_if_drained(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == ContractStatus::Active && self.locked_amount.is_zero() {
            self.status = ContractStatus::Completed;
            self.updated_at = now;
            return true;
        }
        false
    }

    pub fn raise_dispute(&mut self, reason: &str, now: DateTime<Utc>) -> Result<(), DomainError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(DomainError::invalid("reason is required"));
        }
        self.transition(ContractStatus::Disputed, now)?;
        self.dispute_reason = Some(reason.to_string());
        Ok(())
    }

    pub fn resolve_dispute(
        &mut self,
        outcome: DisputeOutcome,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if self.status != ContractStatus::Disputed {
            return Err(DomainError::InvalidTransition(format!(
                "only disputed contracts can be resolved, found {}",
                self.status
            )));
        }
        let next = match outcome {
            DisputeOutcome::Resume => ContractStatus::Active,
            DisputeOutcome::Cancel => ContractStatus::Cancelled,
        };
        self.transition(next, now)
    }

    /// Cancels a draft contract and closes every pending bid on it.
    pub fn cancel(
        &mut self,
        bids: &mut [ContractBid],
        now: DateTime<Utc>,
    ) -> Result<Vec<Uuid>, DomainError> {
        if self.status != ContractStatus::Draft {
            return Err(DomainError::transition(
                "contract",
                self.status,
                ContractStatus::Cancelled,
            ));
        }
        self.transition(ContractStatus::Cancelled, now)?;
        self.is_public = false;
        Ok(reject_pending(bids, None, now))
    }

    pub fn record_view(&mut self) {
        self.view_count += 1;
    }

    /// Guards milestone additions: the contract must still be open and the
    /// committed milestone total may not exceed the contract budget.
    pub fn ensure_milestone_budget(
        &self,
        existing: &[Milestone],
        milestone: &NewMilestone,
    ) -> Result<(), DomainError> {
        milestone.validate()?;
        if !matches!(self.status, ContractStatus::Draft | ContractStatus::Active) {
            return Err(DomainError::InvalidTransition(format!(
                "milestones cannot be added to a {} contract",
                self.status
            )));
        }
        let committed: Decimal = existing.iter().map(|m| m.amount).sum();
        if committed + milestone.amount > self.total_amount {
            return Err(DomainError::invalid(format!(
                "milestone amounts ({}) would exceed totalAmount ({})",
                committed + milestone.amount,
                self.total_amount
            )));
        }
        Ok(())
    }
}

impl Milestone {
    /// Worker completion and client approval. Releases go through
    /// [`release_milestone`] because they move money.
    pub fn advance(
        &mut self,
        contract: &Contract,
        next: MilestoneStatus,
    ) -> Result<(), DomainError> {
        if contract.status != ContractStatus::Active {
            return Err(DomainError::InvalidTransition(format!(
                "milestones of a {} contract cannot change",
                contract.status
            )));
        }
        if next == MilestoneStatus::Released || self.status.next() != Some(next) {
            return Err(DomainError::transition("milestone", self.status, next));
        }
        self.status = next;
        Ok(())
    }
}

/// Accepts one bid, activates the contract at the bid amount and rejects every
/// other pending bid.
pub fn accept_bid(
    contract: &mut Contract,
    bids: &mut [ContractBid],
    bid_id: Uuid,
    now: DateTime<Utc>,
) -> Result<BidDecision, DomainError> {
    match contract.status {
        ContractStatus::Draft if contract.is_public => {}
        ContractStatus::Draft | ContractStatus::Active => {
            return Err(DomainError::Conflict(
                "contract is no longer accepting bids".to_string(),
            ));
        }
        other => {
            return Err(DomainError::transition(
                "contract",
                other,
                ContractStatus::Active,
            ));
        }
    }

    let Some(index) = bids
        .iter()
        .position(|bid| bid.id == bid_id && bid.contract_id == contract.id)
    else {
        return Err(DomainError::NotFound("bid"));
    };
    let bid = &bids[index];
    if bid.status != BidStatus::Pending {
        return Err(DomainError::transition("bid", bid.status, BidStatus::Accepted));
    }
    let contractor = bid.contractor_name.clone();
    let amount = bid.amount;

    contract.transition(ContractStatus::Active, now)?;
    contract.contractor = Some(contractor);
    contract.total_amount = amount;
    contract.locked_amount = amount;
    contract.released_amount = Decimal::ZERO;
    contract.is_public = false;

    let bid = &mut bids[index];
    bid.status = BidStatus::Accepted;
    bid.decided_at = Some(now);

    Ok(BidDecision {
        accepted: bid_id,
        rejected: reject_pending(bids, Some(bid_id), now),
    })
}

pub fn reject_bid(
    contract: &Contract,
    bid: &mut ContractBid,
    now: DateTime<Utc>,
) -> Result<(), DomainError> {
    if bid.contract_id != contract.id {
        return Err(DomainError::NotFound("bid"));
    }
    if bid.status != BidStatus::Pending {
        return Err(DomainError::transition("bid", bid.status, BidStatus::Rejected));
    }
    bid.status = BidStatus::Rejected;
    bid.decided_at = Some(now);
    Ok(())
}

/// Releases an approved milestone and returns the amount moved.
pub fn release_milestone(
    contract: &mut Contract,
    milestone: &mut Milestone,
    requested: Option<Decimal>,
    now: DateTime<Utc>,
) -> Result<Decimal, DomainError> {
    if milestone.contract_id != contract.id {
        return Err(DomainError::NotFound("milestone"));
    }
    if milestone.status != MilestoneStatus::Approved {
        return Err(DomainError::transition(
            "milestone",
            milestone.status,
            MilestoneStatus::Released,
        ));
    }
    if let Some(amount) = requested
        && amount != milestone.amount
    {
        return Err(DomainError::invalid(format!(
            "amount {amount} does not match milestone amount {}",
            milestone.amount
        )));
    }

    contract.release(milestone.amount, now)?;
    milestone.status = MilestoneStatus::Released;
    milestone.completed_date = Some(now);
    Ok(milestone.amount)
}

/// Outgoing escrow ledger entry for a release.
pub fn release_transaction(
    contract: &Contract,
    amount: Decimal,
    description: String,
    status: TransactionStatus,
    now: DateTime<Utc>,
) -> LedgerTransaction {
    LedgerTransaction {
        id: Uuid::new_v4(),
        tenant: contract.tenant,
        kind: TransactionType::Escrow,
        description,
        amount,
        currency: contract.currency.clone(),
        is_incoming: false,
        status,
        fees: Decimal::ZERO,
        chain: contract.chain.clone(),
        tx_hash: chain::simulated_tx_hash(contract.id, now),
        reference_id: Some(contract.id),
        timestamp: now,
        settled_at: (status == TransactionStatus::Settled).then_some(now),
    }
}

fn reject_pending(bids: &mut [ContractBid], keep: Option<Uuid>, now: DateTime<Utc>) -> Vec<Uuid> {
    let mut rejected = Vec::new();
    for bid in bids.iter_mut() {
        if Some(bid.id) != keep && bid.status == BidStatus::Pending {
            bid.status = BidStatus::Rejected;
            bid.decided_at = Some(now);
            rejected.push(bid.id);
        }
    }
    rejected
}
