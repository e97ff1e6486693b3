//! Quota gate — atomic check-and-deduct against an owner's active package.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, QuotaError};
use crate::store::Store;

/// Outcome of a successful deduction.
#[derive(Debug, Clone, Copy)]
pub struct QuotaReceipt {
    pub account_id: Uuid,
    /// Units left after this deduction. Advisory: concurrent deductions may
    /// have moved the counter further by the time the caller reads this.
    pub remaining: i64,
}

/// Gate between message sends and the owner's subscription allowance.
#[derive(Clone)]
pub struct QuotaGate {
    store: Arc<dyn Store>,
}

impl QuotaGate {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Deduct one message unit from the owner's active package.
    ///
    /// The check and the increment happen as one conditional update at the
    /// storage layer, so two concurrent calls can never both spend the last
    /// unit.
    pub async fn check_and_deduct(&self, owner_id: Uuid) -> Result<QuotaReceipt, Error> {
        let account = self
            .store
            .get_active_quota_account(owner_id, Utc::now())
            .await?
            .ok_or(QuotaError::NoActivePackage { owner_id })?;

        if !self.store.try_deduct_quota(account.id, 1).await? {
            return Err(QuotaError::Exhausted { owner_id }.into());
        }

        let remaining = account.message_quota - account.message_used - 1;
        debug!(owner_id = %owner_id, remaining, "Quota deducted");
        Ok(QuotaReceipt {
            account_id: account.id,
            remaining: remaining.max(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::store::{LibSqlStore, QuotaAccount};

    async fn gate_with_quota(quota: i64, used: i64) -> (QuotaGate, Uuid) {
        let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let owner = Uuid::new_v4();
        store
            .insert_quota_account(&QuotaAccount {
                id: Uuid::new_v4(),
                owner_id: owner,
                message_quota: quota,
                message_used: used,
                start_date: Utc::now() - chrono::Duration::days(1),
                end_date: Utc::now() + chrono::Duration::days(29),
                is_active: true,
            })
            .await
            .unwrap();
        (QuotaGate::new(store), owner)
    }

    #[tokio::test]
    async fn deducts_while_quota_remains() {
        let (gate, owner) = gate_with_quota(2, 0).await;
        let receipt = gate.check_and_deduct(owner).await.unwrap();
        assert_eq!(receipt.remaining, 1);
        let receipt = gate.check_and_deduct(owner).await.unwrap();
        assert_eq!(receipt.remaining, 0);
    }

    #[tokio::test]
    async fn fails_without_mutation_when_exhausted() {
        let (gate, owner) = gate_with_quota(1, 1).await;
        let err = gate.check_and_deduct(owner).await.unwrap_err();
        assert!(matches!(err, Error::Quota(QuotaError::Exhausted { .. })));
    }

    #[tokio::test]
    async fn fails_without_active_package() {
        let store = Arc::new(LibSqlStore::new_memory().await.unwrap());
        let gate = QuotaGate::new(store);
        let err = gate.check_and_deduct(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Quota(QuotaError::NoActivePackage { .. })
        ));
    }

    #[tokio::test]
    async fn concurrent_callers_get_exactly_the_remaining_quota() {
        let (gate, owner) = gate_with_quota(3, 0).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let gate = gate.clone();
            handles.push(tokio::spawn(
                async move { gate.check_and_deduct(owner).await },
            ));
        }

        let mut ok = 0;
        let mut exhausted = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(Error::Quota(QuotaError::Exhausted { .. })) => exhausted += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(ok, 3);
        assert_eq!(exhausted, 5);
    }
}
