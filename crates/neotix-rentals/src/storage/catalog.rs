use crate::domain::catalog::CatalogService;
use crate::domain::types::{GpuConfiguration, ListingId, UsdAmount};
use crate::error::{RentalsError, Result};
use crate::storage::postgres::PostgresConnection;
use async_trait::async_trait;
use sqlx::Row;
use std::sync::Arc;

/// Catalog lookups against the `gpu_listings` table.
///
/// The listings themselves are written by the pricing-ingestion pipeline,
/// which lives outside this service; we only read.
pub struct SqlCatalogService {
    connection: Arc<PostgresConnection>,
}

impl SqlCatalogService {
    pub fn new(connection: Arc<PostgresConnection>) -> Self {
        Self { connection }
    }
}

#[async_trait]
impl CatalogService for SqlCatalogService {
    async fn get_configuration(&self, id: ListingId) -> Result<GpuConfiguration> {
        let row = sqlx::query(
            r#"
            SELECT gpu_vendor, gpu_model, gpu_memory_gb, gpu_count, hourly_price
            FROM gpu_listings
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(self.connection.pool())
        .await
        .map_err(|e| RentalsError::database("get_configuration", e))?;

        let row = row.ok_or_else(|| RentalsError::NotFound {
            resource: "gpu listing",
            id: id.to_string(),
        })?;

        Ok(GpuConfiguration {
            gpu_vendor: row.get("gpu_vendor"),
            gpu_model: row.get("gpu_model"),
            gpu_memory_gb: row.get::<i32, _>("gpu_memory_gb") as u32,
            gpu_count: row.get::<i32, _>("gpu_count") as u32,
            hourly_price: UsdAmount::from_decimal(row.get("hourly_price")),
        })
    }
}
