use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{
    chain,
    error::DomainError,
    models::{
        BatchStatus, LedgerTransaction, PaymentStatus, PayrollBatch, PayrollPayment,
        PayrollWorker, TenantId, TransactionStatus, TransactionType,
    },
};

#[derive(Debug, Clone, PartialEq)]
pub struct NewWorker {
    pub name: String,
    pub email: String,
    pub wallet_address: String,
    pub role: String,
    pub salary: Decimal,
    pub currency: String,
}

impl NewWorker {
    pub fn into_worker(
        self,
        tenant: TenantId,
        now: DateTime<Utc>,
    ) -> Result<PayrollWorker, DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::invalid("name is required"));
        }
        let email = self.email.trim().to_ascii_lowercase();
        if !email.contains('@') {
            return Err(DomainError::invalid("email must be an email address"));
        }
        if self.wallet_address.trim().is_empty() {
            return Err(DomainError::invalid("walletAddress is required"));
        }
        if self.salary < Decimal::ZERO {
            return Err(DomainError::invalid("salary must not be negative"));
        }

        Ok(PayrollWorker {
            id: Uuid::new_v4(),
            tenant,
            name: self.name.trim().to_string(),
            email,
            wallet_address: self.wallet_address.trim().to_string(),
            role: self.role.trim().to_string(),
            salary: self.salary.round_dp(4),
            currency: self.currency.trim().to_ascii_uppercase(),
            active: true,
            created_at: now,
        })
    }
}

/// Batch request with amounts positionally aligned to `worker_ids`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewBatch {
    pub name: String,
    pub currency: String,
    pub worker_ids: Vec<Uuid>,
    pub amounts: Vec<Decimal>,
    pub scheduled_for: Option<NaiveDate>,
}

impl NewBatch {
    /// Checks the batch shape before any worker lookup happens.
    pub fn validate_shape(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::invalid("name is required"));
        }
        if self.currency.trim().is_empty() {
            return Err(DomainError::invalid("currency is required"));
        }
        if self.worker_ids.is_empty() {
            return Err(DomainError::MalformedBatch(
                "batch needs at least one worker".to_string(),
            ));
        }
        if self.worker_ids.len() != self.amounts.len() {
            return Err(DomainError::MalformedBatch(format!(
                "{} workers but {} amounts",
                self.worker_ids.len(),
                self.amounts.len()
            )));
        }
        let mut seen = HashSet::with_capacity(self.worker_ids.len());
        for worker_id in &self.worker_ids {
            if !seen.insert(worker_id) {
                return Err(DomainError::MalformedBatch(format!(
                    "worker {worker_id} appears more than once"
                )));
            }
        }
        if let Some(position) = self.amounts.iter().position(|a| *a <= Decimal::ZERO) {
            return Err(DomainError::MalformedBatch(format!(
                "amount at position {position} must be positive"
            )));
        }
        Ok(())
    }

    /// Fans the batch out into one pending payment per (worker, amount) pair.
    /// `workers` holds the tenant's rows for the requested ids.
    pub fn into_draft(
        self,
        tenant: TenantId,
        workers: &[PayrollWorker],
        now: DateTime<Utc>,
    ) -> Result<(PayrollBatch, Vec<PayrollPayment>), DomainError> {
        self.validate_shape()?;

        for worker_id in &self.worker_ids {
            match workers.iter().find(|worker| worker.id == *worker_id) {
                Some(worker) if worker.tenant == tenant && worker.active => {}
                Some(_) => {
                    return Err(DomainError::MalformedBatch(format!(
                        "worker {worker_id} is not active"
                    )));
                }
                None => {
                    return Err(DomainError::MalformedBatch(format!(
                        "worker {worker_id} does not exist"
                    )));
                }
            }
        }

        let batch_id = Uuid::new_v4();
        let payments: Vec<PayrollPayment> = self
            .worker_ids
            .iter()
            .zip(&self.amounts)
            .map(|(worker_id, amount)| PayrollPayment {
                id: Uuid::new_v4(),
                batch_id,
                worker_id: *worker_id,
                amount: amount.round_dp(4),
                status: PaymentStatus::Pending,
                tx_hash: None,
                paid_at: None,
            })
            .collect();
        let total_amount: Decimal = payments.iter().map(|payment| payment.amount).sum();

        let batch = PayrollBatch {
            id: batch_id,
            tenant,
            name: self.name.trim().to_string(),
            status: BatchStatus::Draft,
            total_amount,
            currency: self.currency.trim().to_ascii_uppercase(),
            payment_count: payments.len() as i64,
            transaction_id: None,
            scheduled_for: self.scheduled_for,
            created_at: now,
            updated_at: now,
            executed_at: None,
            completed_at: None,
        };

        Ok((batch, payments))
    }
}

impl BatchStatus {
    pub fn next(self) -> Option<BatchStatus> {
        match self {
            BatchStatus::Draft => Some(BatchStatus::Pending),
            BatchStatus::Pending => Some(BatchStatus::Approved),
            BatchStatus::Approved => Some(BatchStatus::Processing),
            BatchStatus::Processing => Some(BatchStatus::Completed),
            BatchStatus::Completed => None,
        }
    }
}

impl PayrollBatch {
    pub fn owned_by(&self, tenant: TenantId) -> bool {
        self.tenant == tenant
    }

    fn advance(&mut self, next: BatchStatus, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.status.next() != Some(next) {
            return Err(DomainError::transition("payroll batch", self.status, next));
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    pub fn submit(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.advance(BatchStatus::Pending, now)
    }

    pub fn approve(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.advance(BatchStatus::Approved, now)
    }

    /// Starts paying out: every payment gets a simulated hash and the batch
    /// gets one outgoing ledger entry that settles later.
    pub fn execute(
        &mut self,
        payments: &mut [PayrollPayment],
        now: DateTime<Utc>,
    ) -> Result<LedgerTransaction, DomainError> {
        if self.status != BatchStatus::Approved {
            return Err(DomainError::transition(
                "payroll batch",
                self.status,
                BatchStatus::Processing,
            ));
        }
        if let Some(payment) = payments
            .iter()
            .find(|payment| payment.batch_id != self.id || payment.status != PaymentStatus::Pending)
        {
            return Err(DomainError::Conflict(format!(
                "payment {} is not pending in this batch",
                payment.id
            )));
        }

        self.advance(BatchStatus::Processing, now)?;
        self.executed_at = Some(now);
        for payment in payments.iter_mut() {
            payment.status = PaymentStatus::Processing;
            payment.tx_hash = Some(chain::simulated_tx_hash(payment.id, now));
        }

        let transaction = LedgerTransaction {
            id: Uuid::new_v4(),
            tenant: self.tenant,
            kind: TransactionType::Payroll,
            description: format!("Payroll batch {}", self.name),
            amount: self.total_amount,
            currency: self.currency.clone(),
            is_incoming: false,
            status: TransactionStatus::Processing,
            fees: Decimal::ZERO,
            chain: chain::DEFAULT_CHAIN.to_string(),
            tx_hash: chain::simulated_tx_hash(self.id, now),
            reference_id: Some(self.id),
            timestamp: now,
            settled_at: None,
        };
        self.transaction_id = Some(transaction.id);
        Ok(transaction)
    }

    /// Final step run by the settlement executor.
    pub fn complete(
        &mut self,
        payments: &mut [PayrollPayment],
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.advance(BatchStatus::Completed, now)?;
        self.completed_at = Some(now);
        for payment in payments.iter_mut() {
            if payment.status == PaymentStatus::Processing {
                payment.status = PaymentStatus::Completed;
                payment.paid_at = Some(now);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(tenant: TenantId, name: &str) -> PayrollWorker {
        NewWorker {
            name: name.to_string(),
            email: format!("{name}@example.com"),
            wallet_address: "0xabc".to_string(),
            role: "engineer".to_string(),
            salary: Decimal::new(4_000, 0),
            currency: "usdc".to_string(),
        }
        .into_worker(tenant, Utc::now())
        .unwrap()
    }

    fn batch(workers: &[PayrollWorker], amounts: Vec<Decimal>) -> NewBatch {
        NewBatch {
            name: "March".to_string(),
            currency: "USDC".to_string(),
            worker_ids: workers.iter().map(|w| w.id).collect(),
            amounts,
            scheduled_for: None,
        }
    }

    #[test]
    fn misaligned_arrays_fail_fast() {
        let tenant = TenantId::new();
        let workers = vec![worker(tenant, "ann"), worker(tenant, "bea")];
        let err = batch(&workers, vec![Decimal::ONE])
            .into_draft(tenant, &workers, Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::MalformedBatch(_)));
    }

    #[test]
    fn unknown_or_foreign_workers_are_rejected() {
        let tenant = TenantId::new();
        let foreign = worker(TenantId::new(), "eve");
        let err = batch(std::slice::from_ref(&foreign), vec![Decimal::ONE])
            .into_draft(tenant, &[foreign.clone()], Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::MalformedBatch(_)));

        let err = batch(&[foreign], vec![Decimal::ONE])
            .into_draft(tenant, &[], Utc::now())
            .unwrap_err();
        assert!(matches!(err, DomainError::MalformedBatch(_)));
    }

    #[test]
    fn batch_walks_its_lifecycle() {
        let tenant = TenantId::new();
        let workers = vec![worker(tenant, "ann"), worker(tenant, "bea")];
        let (mut batch, mut payments) = batch(
            &workers,
            vec![Decimal::new(1_000, 0), Decimal::new(1_500, 0)],
        )
        .into_draft(tenant, &workers, Utc::now())
        .unwrap();
        assert_eq!(batch.total_amount, Decimal::new(2_500, 0));
        assert_eq!(batch.payment_count, 2);

        assert!(batch.execute(&mut payments, Utc::now()).is_err());
        batch.submit(Utc::now()).unwrap();
        assert!(batch.submit(Utc::now()).is_err());
        batch.approve(Utc::now()).unwrap();

        let transaction = batch.execute(&mut payments, Utc::now()).unwrap();
        assert_eq!(batch.status, BatchStatus::Processing);
        assert_eq!(transaction.amount, Decimal::new(2_500, 0));
        assert_eq!(transaction.status, TransactionStatus::Processing);
        assert!(payments.iter().all(|p| p.status == PaymentStatus::Processing));
        assert!(payments.iter().all(|p| p.tx_hash.is_some()));

        batch.complete(&mut payments, Utc::now()).unwrap();
        assert_eq!(batch.status, BatchStatus::Completed);
        assert!(payments.iter().all(|p| p.status == PaymentStatus::Completed));
        assert!(batch.complete(&mut payments, Utc::now()).is_err());
    }
}
