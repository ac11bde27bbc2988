use crate::domain::types::{CostBreakdown, CostRecord, RentalId, TransactionId, UsdAmount};
use crate::error::{RentalsError, Result};
use crate::storage::postgres::PostgresConnection;
use async_trait::async_trait;
use sqlx::Row;
use std::sync::Arc;

#[async_trait]
pub trait CostRecordRepository: Send + Sync {
    async fn insert(&self, record: &CostRecord) -> Result<()>;
    async fn get_for_rental(&self, rental_id: &RentalId) -> Result<Option<CostRecord>>;
    /// Overwrite the stored figures in place; the record keeps its identity
    /// and its reference to the deposit transaction.
    async fn update(&self, record: &CostRecord) -> Result<()>;
}

pub struct SqlCostRecordRepository {
    connection: Arc<PostgresConnection>,
}

impl SqlCostRecordRepository {
    pub fn new(connection: Arc<PostgresConnection>) -> Self {
        Self { connection }
    }

    fn record_from_row(row: &sqlx::postgres::PgRow) -> CostRecord {
        CostRecord {
            id: row.get("id"),
            rental_id: RentalId::from_uuid(row.get("rental_id")),
            transaction_id: TransactionId::from_uuid(row.get("transaction_id")),
            breakdown: CostBreakdown {
                base_cost: UsdAmount::from_decimal(row.get("base_cost")),
                tax_rate: row.get("tax_rate"),
                tax_amount: UsdAmount::from_decimal(row.get("tax_amount")),
                platform_fee_rate: row.get("platform_fee_rate"),
                platform_fee_amount: UsdAmount::from_decimal(row.get("platform_fee_amount")),
                total_cost: UsdAmount::from_decimal(row.get("total_cost")),
            },
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl CostRecordRepository for SqlCostRecordRepository {
    async fn insert(&self, record: &CostRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO deployment_costs
            (id, rental_id, transaction_id, base_cost, tax_rate, tax_amount,
             platform_fee_rate, platform_fee_amount, total_cost, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(record.id)
        .bind(record.rental_id.as_uuid())
        .bind(record.transaction_id.as_uuid())
        .bind(record.breakdown.base_cost.as_decimal())
        .bind(record.breakdown.tax_rate)
        .bind(record.breakdown.tax_amount.as_decimal())
        .bind(record.breakdown.platform_fee_rate)
        .bind(record.breakdown.platform_fee_amount.as_decimal())
        .bind(record.breakdown.total_cost.as_decimal())
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(self.connection.pool())
        .await
        .map_err(|e| RentalsError::database("insert_cost_record", e))?;
        Ok(())
    }

    async fn get_for_rental(&self, rental_id: &RentalId) -> Result<Option<CostRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, rental_id, transaction_id, base_cost, tax_rate, tax_amount,
                   platform_fee_rate, platform_fee_amount, total_cost, created_at, updated_at
            FROM deployment_costs
            WHERE rental_id = $1
            "#,
        )
        .bind(rental_id.as_uuid())
        .fetch_optional(self.connection.pool())
        .await
        .map_err(|e| RentalsError::database("get_cost_record", e))?;

        Ok(row.map(|r| Self::record_from_row(&r)))
    }

    async fn update(&self, record: &CostRecord) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE deployment_costs
            SET base_cost = $2, tax_rate = $3, tax_amount = $4,
                platform_fee_rate = $5, platform_fee_amount = $6, total_cost = $7,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(record.id)
        .bind(record.breakdown.base_cost.as_decimal())
        .bind(record.breakdown.tax_rate)
        .bind(record.breakdown.tax_amount.as_decimal())
        .bind(record.breakdown.platform_fee_rate)
        .bind(record.breakdown.platform_fee_amount.as_decimal())
        .bind(record.breakdown.total_cost.as_decimal())
        .execute(self.connection.pool())
        .await
        .map_err(|e| RentalsError::database("update_cost_record", e))?;
        Ok(())
    }
}
