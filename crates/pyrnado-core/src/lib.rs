pub mod chain;
pub mod error;
pub mod escrow;
pub mod models;
pub mod payroll;
pub mod settlement;
pub mod storage;

pub use error::DomainError;
pub use escrow::{BidDecision, DisputeOutcome, NewBid, NewContract, NewMilestone};
pub use models::{
    BatchStatus, BidStatus, Contract, ContractBid, ContractStatus, LedgerTransaction, Milestone,
    MilestoneStatus, PaymentStatus, PayrollBatch, PayrollPayment, PayrollWorker, Principal,
    TenantId, TransactionStatus, TransactionType,
};
pub use payroll::{NewBatch, NewWorker};
pub use settlement::{
    SettlementKind, SettlementNotifier, SettlementOutcome, SettlementStatus, SettlementTask,
};
pub use storage::{
    BatchDetail, BatchExecution, ContractDetail, ContractSummary, EscrowStore, IdentityStore,
    LedgerStore, PayrollStore, Release, SettlementStore,
};
