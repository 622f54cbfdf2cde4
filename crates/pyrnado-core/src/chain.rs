//! Cosmetic on-chain identifiers. Nothing here touches a real network: the
//! values are deterministic digests so the dashboard has something to render.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const DEFAULT_CHAIN: &str = "ethereum";

/// `0x`-prefixed 20-byte address derived from the contract id.
pub fn contract_address(contract_id: Uuid) -> String {
    let digest = Sha256::digest(contract_id.as_bytes());
    let hex = format!("{digest:x}");
    format!("0x{}", &hex[..40])
}

/// `0x`-prefixed 32-byte hash standing in for a settlement transaction.
pub fn simulated_tx_hash(reference_id: Uuid, at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(reference_id.as_bytes());
    hasher.update(at.timestamp_nanos_opt().unwrap_or_default().to_be_bytes());
    hasher.update(Uuid::new_v4().as_bytes());
    format!("0x{:x}", hasher.finalize())
}
