//! # Ledger
//!
//! Per-user balances moved only through journaled [`LedgerEntry`] rows. Lifecycle commands put
//! their entries into the same [`ChangeSet`] as the state change that causes them; the
//! standalone operations here commit entries on their own.
//!
//! Payouts are guarded by the tack's `is_paid` flag, which flips in the same commit as the
//! credit, so a retried finish can never pay twice.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};

use crate::error::MarketplaceResult;
use crate::models::UserId;
use crate::store::{ChangeSet, MarketplaceStore};

mod entries;

pub use entries::{
    apply_entries, ensure_positive, escrow_hold, escrow_refund, payout, transfer, LedgerEntry,
    LedgerError, LedgerReason, LedgerResult,
};

#[derive(Clone)]
pub struct Ledger {
    store: Arc<dyn MarketplaceStore>,
}

impl Ledger {
    pub fn new(store: Arc<dyn MarketplaceStore>) -> Self {
        Self { store }
    }

    pub async fn balance(&self, user_id: UserId) -> MarketplaceResult<i64> {
        Ok(self.store.balance(user_id).await?)
    }

    pub async fn entries(&self, user_id: UserId) -> MarketplaceResult<Vec<LedgerEntry>> {
        Ok(self.store.ledger_entries(user_id).await?)
    }

    /// Fund a balance from outside the marketplace
    #[instrument(skip(self))]
    pub async fn deposit(&self, user_id: UserId, amount: i64) -> MarketplaceResult<i64> {
        self.credit(user_id, amount, LedgerReason::Deposit).await
    }

    /// Move funds out of the marketplace; fails with `InsufficientFunds` on overdraft
    #[instrument(skip(self))]
    pub async fn withdraw(&self, user_id: UserId, amount: i64) -> MarketplaceResult<i64> {
        self.debit(user_id, amount, LedgerReason::Withdrawal).await
    }

    pub async fn debit(
        &self,
        user_id: UserId,
        amount: i64,
        reason: LedgerReason,
    ) -> MarketplaceResult<i64> {
        ensure_positive(amount)?;
        self.commit_entries(vec![LedgerEntry::debit(
            user_id,
            amount,
            reason,
            None,
            Utc::now(),
        )])
        .await?;
        self.balance(user_id).await
    }

    pub async fn credit(
        &self,
        user_id: UserId,
        amount: i64,
        reason: LedgerReason,
    ) -> MarketplaceResult<i64> {
        ensure_positive(amount)?;
        self.commit_entries(vec![LedgerEntry::credit(
            user_id,
            amount,
            reason,
            None,
            Utc::now(),
        )])
        .await?;
        self.balance(user_id).await
    }

    /// Debit `payer` and credit `payee`, both or neither
    #[instrument(skip(self))]
    pub async fn transfer(
        &self,
        payer: UserId,
        payee: UserId,
        amount: i64,
    ) -> MarketplaceResult<()> {
        ensure_positive(amount)?;
        let entries = transfer(
            payer,
            payee,
            amount,
            LedgerReason::Withdrawal,
            LedgerReason::Deposit,
            None,
            Utc::now(),
        );
        self.commit_entries(entries.to_vec()).await
    }

    async fn commit_entries(&self, entries: Vec<LedgerEntry>) -> MarketplaceResult<()> {
        let mut changes = ChangeSet::new();
        for entry in entries {
            info!(
                user_id = %entry.user_id,
                delta = entry.delta,
                reason = %entry.reason,
                "Applying ledger entry"
            );
            changes.ledger_entry(entry);
        }
        self.store.commit(changes).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn ledger() -> Ledger {
        Ledger::new(Arc::new(InMemoryStore::new()))
    }

    #[tokio::test]
    async fn test_deposit_and_withdraw() {
        let ledger = ledger();
        let user = UserId::new();

        assert_eq!(ledger.deposit(user, 1000).await.unwrap(), 1000);
        assert_eq!(ledger.withdraw(user, 400).await.unwrap(), 600);

        let err = ledger.withdraw(user, 601).await.unwrap_err();
        assert_eq!(err.code(), "insufficient_funds");
        assert_eq!(ledger.balance(user).await.unwrap(), 600);
        assert_eq!(ledger.entries(user).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_transfer_is_all_or_nothing() {
        let ledger = ledger();
        let payer = UserId::new();
        let payee = UserId::new();
        ledger.deposit(payer, 300).await.unwrap();

        assert!(ledger.transfer(payer, payee, 500).await.is_err());
        assert_eq!(ledger.balance(payer).await.unwrap(), 300);
        assert_eq!(ledger.balance(payee).await.unwrap(), 0);

        ledger.transfer(payer, payee, 300).await.unwrap();
        assert_eq!(ledger.balance(payer).await.unwrap(), 0);
        assert_eq!(ledger.balance(payee).await.unwrap(), 300);
    }

    #[tokio::test]
    async fn test_non_positive_amounts_rejected() {
        let ledger = ledger();
        let user = UserId::new();
        assert_eq!(
            ledger.deposit(user, 0).await.unwrap_err().code(),
            "validation_error"
        );
        assert!(ledger.entries(user).await.unwrap().is_empty());
    }
}
