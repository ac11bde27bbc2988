use crate::domain::types::{
    LedgerTransaction, TransactionId, TransactionStatus, UsdAmount, User, UserId,
};
use crate::error::{RentalsError, Result};
use crate::storage::postgres::PostgresConnection;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::Row;
use std::str::FromStr;
use std::sync::Arc;

#[async_trait]
pub trait LedgerRepository: Send + Sync {
    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>>;
    async fn get_balance(&self, user_id: &UserId) -> Result<UsdAmount>;
    async fn find_transaction_by_key(&self, key: &str) -> Result<Option<LedgerTransaction>>;

    /// Balance check, transaction write and balance decrement in one atomic
    /// unit. The row lock closes the check-then-write race between
    /// concurrent debits for the same user.
    async fn debit(
        &self,
        user_id: &UserId,
        amount: UsdAmount,
        description: &str,
        idempotency_key: &str,
    ) -> Result<LedgerTransaction>;

    async fn credit(
        &self,
        user_id: &UserId,
        amount: UsdAmount,
        description: &str,
        idempotency_key: &str,
    ) -> Result<LedgerTransaction>;
}

pub struct SqlLedgerRepository {
    connection: Arc<PostgresConnection>,
}

impl SqlLedgerRepository {
    pub fn new(connection: Arc<PostgresConnection>) -> Self {
        Self { connection }
    }

    fn transaction_from_row(row: &sqlx::postgres::PgRow) -> Result<LedgerTransaction> {
        let status_str: String = row.get("status");
        let status =
            TransactionStatus::from_str(&status_str).map_err(|e| RentalsError::Database {
                operation: "transaction_from_row".to_string(),
                source: e.into(),
            })?;

        Ok(LedgerTransaction {
            id: TransactionId::from_uuid(row.get("id")),
            user_id: UserId::from_uuid(row.get("user_id")),
            amount: row.get("amount"),
            status,
            description: row.get("description"),
            idempotency_key: row.get("idempotency_key"),
            created_at: row.get("created_at"),
        })
    }

    /// Shared atomic write path; `amount` is already signed.
    async fn apply(
        &self,
        user_id: &UserId,
        signed_amount: Decimal,
        description: &str,
        idempotency_key: &str,
    ) -> Result<LedgerTransaction> {
        let mut tx = self
            .connection
            .pool()
            .begin()
            .await
            .map_err(|e| RentalsError::database("ledger_begin", e))?;

        // Replay of a key returns the original row untouched.
        let existing = sqlx::query(
            r#"
            SELECT id, user_id, amount, status, description, idempotency_key, created_at
            FROM ledger_transactions
            WHERE idempotency_key = $1
            "#,
        )
        .bind(idempotency_key)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| RentalsError::database("ledger_find_by_key", e))?;
        if let Some(row) = existing {
            return Self::transaction_from_row(&row);
        }

        let balance: Option<Decimal> =
            sqlx::query_scalar("SELECT balance FROM users WHERE id = $1 FOR UPDATE")
                .bind(user_id.as_uuid())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| RentalsError::database("ledger_lock_balance", e))?;
        let balance = balance.ok_or_else(|| RentalsError::NotFound {
            resource: "user",
            id: user_id.to_string(),
        })?;

        if balance + signed_amount < Decimal::ZERO {
            return Err(RentalsError::InsufficientBalance {
                required: -signed_amount,
                available: balance,
                breakdown: None,
            });
        }

        let transaction = LedgerTransaction {
            id: TransactionId::new(),
            user_id: *user_id,
            amount: signed_amount,
            status: TransactionStatus::Completed,
            description: description.to_string(),
            idempotency_key: idempotency_key.to_string(),
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO ledger_transactions
            (id, user_id, amount, status, description, idempotency_key, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(transaction.id.as_uuid())
        .bind(transaction.user_id.as_uuid())
        .bind(transaction.amount)
        .bind(transaction.status.to_string())
        .bind(&transaction.description)
        .bind(&transaction.idempotency_key)
        .bind(transaction.created_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| RentalsError::database("ledger_insert_transaction", e))?;

        sqlx::query("UPDATE users SET balance = balance + $2, updated_at = NOW() WHERE id = $1")
            .bind(user_id.as_uuid())
            .bind(signed_amount)
            .execute(&mut *tx)
            .await
            .map_err(|e| RentalsError::database("ledger_update_balance", e))?;

        tx.commit()
            .await
            .map_err(|e| RentalsError::database("ledger_commit", e))?;

        Ok(transaction)
    }
}

#[async_trait]
impl LedgerRepository for SqlLedgerRepository {
    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>> {
        let row = sqlx::query("SELECT id, email, balance FROM users WHERE id = $1")
            .bind(user_id.as_uuid())
            .fetch_optional(self.connection.pool())
            .await
            .map_err(|e| RentalsError::database("get_user", e))?;

        Ok(row.map(|r| User {
            id: UserId::from_uuid(r.get("id")),
            email: r.get("email"),
            balance: UsdAmount::from_decimal(r.get("balance")),
        }))
    }

    async fn get_balance(&self, user_id: &UserId) -> Result<UsdAmount> {
        let balance: Option<Decimal> =
            sqlx::query_scalar("SELECT balance FROM users WHERE id = $1")
                .bind(user_id.as_uuid())
                .fetch_optional(self.connection.pool())
                .await
                .map_err(|e| RentalsError::database("get_balance", e))?;

        balance
            .map(UsdAmount::from_decimal)
            .ok_or_else(|| RentalsError::NotFound {
                resource: "user",
                id: user_id.to_string(),
            })
    }

    async fn find_transaction_by_key(&self, key: &str) -> Result<Option<LedgerTransaction>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, amount, status, description, idempotency_key, created_at
            FROM ledger_transactions
            WHERE idempotency_key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(self.connection.pool())
        .await
        .map_err(|e| RentalsError::database("find_transaction_by_key", e))?;

        row.map(|r| Self::transaction_from_row(&r)).transpose()
    }

    async fn debit(
        &self,
        user_id: &UserId,
        amount: UsdAmount,
        description: &str,
        idempotency_key: &str,
    ) -> Result<LedgerTransaction> {
        self.apply(user_id, -amount.as_decimal(), description, idempotency_key)
            .await
    }

    async fn credit(
        &self,
        user_id: &UserId,
        amount: UsdAmount,
        description: &str,
        idempotency_key: &str,
    ) -> Result<LedgerTransaction> {
        self.apply(user_id, amount.as_decimal(), description, idempotency_key)
            .await
    }
}
