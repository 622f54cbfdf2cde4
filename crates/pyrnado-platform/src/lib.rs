pub mod config;
pub mod contracts;
pub mod db;
pub mod pg;
pub mod redis_bus;

pub use config::{ServiceConfig, SettlementConfig};
pub use contracts::{
    CreateBatchRequest, CreateContractRequest, CreateMilestoneRequest, CreateWorkerRequest,
    DisputeRequest, ReleaseFundsRequest, ReleaseMilestoneRequest, ResolveDisputeRequest,
    SubmitBidRequest, TransactionsQuery, UpdateMilestoneRequest,
};
pub use db::{apply_schema, connect_database};
pub use pg::PgStore;
pub use redis_bus::{RedisBus, SETTLEMENTS_CHANNEL, SettlementScheduledEvent};
