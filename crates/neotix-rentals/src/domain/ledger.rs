use crate::domain::types::{LedgerTransaction, UsdAmount, UserId};
use crate::error::Result;
use crate::storage::LedgerRepository;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Atomic money movement against user balances.
///
/// Every mutation carries an idempotency key; replaying a key returns the
/// transaction written the first time and moves no money, so a caller retry
/// after a crash cannot double-charge.
#[async_trait]
pub trait LedgerOperations: Send + Sync {
    async fn balance(&self, user_id: &UserId) -> Result<UsdAmount>;

    /// Debit `amount` from the user, failing with `InsufficientBalance` when
    /// the balance cannot cover it. The balance check and the transaction
    /// write happen in one atomic unit.
    async fn debit(
        &self,
        user_id: &UserId,
        amount: UsdAmount,
        description: &str,
        idempotency_key: &str,
    ) -> Result<LedgerTransaction>;

    /// Credit `amount` to the user. Settlement top-ups only; this design
    /// issues no refunds, so the amount is non-negative by construction.
    async fn credit(
        &self,
        user_id: &UserId,
        amount: UsdAmount,
        description: &str,
        idempotency_key: &str,
    ) -> Result<LedgerTransaction>;

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<LedgerTransaction>>;
}

pub struct LedgerManager {
    repository: Arc<dyn LedgerRepository>,
}

impl LedgerManager {
    pub fn new(repository: Arc<dyn LedgerRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl LedgerOperations for LedgerManager {
    async fn balance(&self, user_id: &UserId) -> Result<UsdAmount> {
        self.repository.get_balance(user_id).await
    }

    async fn debit(
        &self,
        user_id: &UserId,
        amount: UsdAmount,
        description: &str,
        idempotency_key: &str,
    ) -> Result<LedgerTransaction> {
        if let Some(existing) = self
            .repository
            .find_transaction_by_key(idempotency_key)
            .await?
        {
            info!(
                key = idempotency_key,
                transaction_id = %existing.id,
                "ledger debit replayed, returning original transaction"
            );
            return Ok(existing);
        }

        let transaction = self
            .repository
            .debit(user_id, amount, description, idempotency_key)
            .await?;

        info!(
            user_id = %user_id,
            amount = %amount,
            key = idempotency_key,
            transaction_id = %transaction.id,
            "ledger debit applied"
        );

        Ok(transaction)
    }

    async fn credit(
        &self,
        user_id: &UserId,
        amount: UsdAmount,
        description: &str,
        idempotency_key: &str,
    ) -> Result<LedgerTransaction> {
        if let Some(existing) = self
            .repository
            .find_transaction_by_key(idempotency_key)
            .await?
        {
            info!(
                key = idempotency_key,
                transaction_id = %existing.id,
                "ledger credit replayed, returning original transaction"
            );
            return Ok(existing);
        }

        let transaction = self
            .repository
            .credit(user_id, amount, description, idempotency_key)
            .await?;

        info!(
            user_id = %user_id,
            amount = %amount,
            key = idempotency_key,
            transaction_id = %transaction.id,
            "ledger credit applied"
        );

        Ok(transaction)
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<LedgerTransaction>> {
        self.repository.find_transaction_by_key(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::User;
    use crate::error::RentalsError;
    use crate::storage::memory::InMemoryLedgerRepository;
    use rust_decimal_macros::dec;

    fn funded_user(balance: rust_decimal::Decimal) -> (Arc<InMemoryLedgerRepository>, UserId) {
        let repository = Arc::new(InMemoryLedgerRepository::new());
        let user = User {
            id: UserId::new(),
            email: "renter@example.com".to_string(),
            balance: UsdAmount::from_decimal(balance),
        };
        let user_id = user.id;
        repository.insert_user(user);
        (repository, user_id)
    }

    #[tokio::test]
    async fn test_debit_decrements_balance_and_records_transaction() {
        let (repository, user_id) = funded_user(dec!(10.00));
        let ledger = LedgerManager::new(repository);

        let tx = ledger
            .debit(
                &user_id,
                UsdAmount::from_decimal(dec!(1.13)),
                "GPU rental deposit",
                "r1:deposit",
            )
            .await
            .unwrap();

        assert_eq!(tx.amount, dec!(-1.13));
        assert_eq!(
            ledger.balance(&user_id).await.unwrap().as_decimal(),
            dec!(8.87)
        );
    }

    #[tokio::test]
    async fn test_debit_replay_charges_once() {
        let (repository, user_id) = funded_user(dec!(10.00));
        let ledger = LedgerManager::new(repository);
        let amount = UsdAmount::from_decimal(dec!(1.13));

        let first = ledger
            .debit(&user_id, amount, "GPU rental deposit", "r1:deposit")
            .await
            .unwrap();
        let replay = ledger
            .debit(&user_id, amount, "GPU rental deposit", "r1:deposit")
            .await
            .unwrap();

        assert_eq!(first.id, replay.id);
        assert_eq!(
            ledger.balance(&user_id).await.unwrap().as_decimal(),
            dec!(8.87)
        );
    }

    #[tokio::test]
    async fn test_credit_increments_balance_and_replays_once() {
        let (repository, user_id) = funded_user(dec!(1.00));
        let ledger = LedgerManager::new(repository);
        let amount = UsdAmount::from_decimal(dec!(2.50));

        let first = ledger
            .credit(&user_id, amount, "manual adjustment", "adj:1")
            .await
            .unwrap();
        assert_eq!(first.amount, dec!(2.50));

        let replay = ledger
            .credit(&user_id, amount, "manual adjustment", "adj:1")
            .await
            .unwrap();
        assert_eq!(first.id, replay.id);
        assert_eq!(
            ledger.balance(&user_id).await.unwrap().as_decimal(),
            dec!(3.50)
        );
    }

    #[tokio::test]
    async fn test_debit_insufficient_balance() {
        let (repository, user_id) = funded_user(dec!(1.00));
        let ledger = LedgerManager::new(repository.clone());

        let result = ledger
            .debit(
                &user_id,
                UsdAmount::from_decimal(dec!(1.13)),
                "GPU rental deposit",
                "r1:deposit",
            )
            .await;

        match result {
            Err(RentalsError::InsufficientBalance {
                required,
                available,
                ..
            }) => {
                assert_eq!(required, dec!(1.13));
                assert_eq!(available, dec!(1.00));
            }
            other => panic!("expected InsufficientBalance, got {other:?}"),
        }

        // Nothing moved, nothing was written
        assert_eq!(
            ledger.balance(&user_id).await.unwrap().as_decimal(),
            dec!(1.00)
        );
        assert!(ledger
            .find_by_idempotency_key("r1:deposit")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_concurrent_debits_cannot_overdraw() {
        let (repository, user_id) = funded_user(dec!(5.00));
        let ledger = Arc::new(LedgerManager::new(repository));
        let amount = UsdAmount::from_decimal(dec!(3.00));

        let mut handles = Vec::new();
        for i in 0..2 {
            let ledger = ledger.clone();
            let key = format!("race:{i}");
            handles.push(tokio::spawn(async move {
                ledger.debit(&user_id, amount, "settlement", &key).await
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                successes += 1;
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(
            ledger.balance(&user_id).await.unwrap().as_decimal(),
            dec!(2.00)
        );
    }
}
