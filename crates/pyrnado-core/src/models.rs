use std::{fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Declares a status enum persisted as lowercase text.
macro_rules! text_status {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = DomainError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok(Self::$variant),)+
                    other => Err(DomainError::InvalidInput(format!(
                        "unsupported {} `{other}`",
                        stringify!($name)
                    ))),
                }
            }
        }
    };
}

text_status!(ContractStatus {
    Draft => "draft",
    Active => "active",
    Completed => "completed",
    Disputed => "disputed",
    Cancelled => "cancelled",
});

text_status!(MilestoneStatus {
    Pending => "pending",
    Completed => "completed",
    Approved => "approved",
    Released => "released",
});

text_status!(BidStatus {
    Pending => "pending",
    Accepted => "accepted",
    Rejected => "rejected",
});

text_status!(TransactionType {
    Escrow => "escrow",
    Payroll => "payroll",
    Remittance => "remittance",
    Swap => "swap",
    Deposit => "deposit",
    Withdrawal => "withdrawal",
});

text_status!(TransactionStatus {
    Pending => "pending",
    Processing => "processing",
    Settled => "settled",
    Failed => "failed",
});

text_status!(BatchStatus {
    Draft => "draft",
    Pending => "pending",
    Approved => "approved",
    Processing => "processing",
    Completed => "completed",
});

text_status!(PaymentStatus {
    Pending => "pending",
    Processing => "processing",
    Completed => "completed",
});

/// Owning company of every tenant-scoped row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub Uuid);

impl TenantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Verified caller identity attached to an authenticated request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub tenant: TenantId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    pub id: Uuid,
    #[serde(rename = "companyId")]
    pub tenant: TenantId,
    pub title: String,
    pub description: String,
    pub client: String,
    pub contractor: Option<String>,
    pub total_amount: Decimal,
    pub locked_amount: Decimal,
    pub released_amount: Decimal,
    pub currency: String,
    pub status: ContractStatus,
    pub is_public: bool,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub chain: String,
    pub contract_address: String,
    pub view_count: i64,
    pub dispute_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    pub id: Uuid,
    pub contract_id: Uuid,
    pub title: String,
    pub description: String,
    pub amount: Decimal,
    pub status: MilestoneStatus,
    pub due_date: NaiveDate,
    pub completed_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractBid {
    pub id: Uuid,
    pub contract_id: Uuid,
    pub contractor_name: String,
    pub contractor_email: String,
    pub proposal: String,
    pub amount: Decimal,
    pub status: BidStatus,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

/// Ledger row written as a side effect of every money movement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerTransaction {
    pub id: Uuid,
    #[serde(rename = "companyId")]
    pub tenant: TenantId,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub description: String,
    pub amount: Decimal,
    pub currency: String,
    pub is_incoming: bool,
    pub status: TransactionStatus,
    pub fees: Decimal,
    pub chain: String,
    pub tx_hash: String,
    pub reference_id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayrollWorker {
    pub id: Uuid,
    #[serde(rename = "companyId")]
    pub tenant: TenantId,
    pub name: String,
    pub email: String,
    pub wallet_address: String,
    pub role: String,
    pub salary: Decimal,
    pub currency: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayrollBatch {
    pub id: Uuid,
    #[serde(rename = "companyId")]
    pub tenant: TenantId,
    pub name: String,
    pub status: BatchStatus,
    pub total_amount: Decimal,
    pub currency: String,
    pub payment_count: i64,
    pub transaction_id: Option<Uuid>,
    pub scheduled_for: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayrollPayment {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub worker_id: Uuid,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub tx_hash: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_parse_case_insensitively() {
        assert_eq!("Approved".parse::<MilestoneStatus>(), Ok(MilestoneStatus::Approved));
        assert_eq!(" draft ".parse::<ContractStatus>(), Ok(ContractStatus::Draft));
        assert!("shipped".parse::<BidStatus>().is_err());
    }

    #[test]
    fn statuses_serialize_as_lowercase_text() {
        let json = serde_json::to_string(&TransactionType::Escrow).unwrap();
        assert_eq!(json, "\"escrow\"");
        assert_eq!(BatchStatus::Processing.to_string(), "processing");
    }
}
