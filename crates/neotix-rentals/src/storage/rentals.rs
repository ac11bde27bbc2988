use crate::domain::types::{ClusterId, Rental, RentalId, RentalStatus, UsdAmount, UserId};
use crate::error::{RentalsError, Result};
use crate::storage::postgres::PostgresConnection;
use async_trait::async_trait;
use sqlx::Row;
use std::str::FromStr;
use std::sync::Arc;

#[async_trait]
pub trait RentalRepository: Send + Sync {
    /// Insert a new Active rental, reserving the cluster's single slot.
    /// Fails with `Conflict` when the cluster already holds an Active rental.
    async fn insert_active(&self, rental: &Rental) -> Result<()>;
    async fn get(&self, id: &RentalId) -> Result<Option<Rental>>;
    async fn update(&self, rental: &Rental) -> Result<()>;
    async fn delete(&self, id: &RentalId) -> Result<()>;
    async fn active_for_cluster(&self, cluster: &ClusterId) -> Result<Option<Rental>>;
    async fn history_for_cluster(&self, cluster: &ClusterId) -> Result<Vec<Rental>>;
}

pub struct SqlRentalRepository {
    connection: Arc<PostgresConnection>,
}

impl SqlRentalRepository {
    pub fn new(connection: Arc<PostgresConnection>) -> Self {
        Self { connection }
    }

    fn rental_from_row(row: &sqlx::postgres::PgRow) -> Result<Rental> {
        let status_str: String = row.get("status");
        let status = RentalStatus::from_str(&status_str).map_err(|e| RentalsError::Database {
            operation: "rental_from_row".to_string(),
            source: e.into(),
        })?;

        Ok(Rental {
            id: RentalId::from_uuid(row.get("id")),
            cluster_id: ClusterId::from_uuid(row.get("cluster_id")),
            user_id: UserId::from_uuid(row.get("user_id")),
            configuration: serde_json::from_value(row.get("configuration")).map_err(|e| {
                RentalsError::Database {
                    operation: "rental_from_row".to_string(),
                    source: Box::new(e),
                }
            })?,
            hourly_price: UsdAmount::from_decimal(row.get("hourly_price")),
            status,
            ssh_keys: serde_json::from_value(row.get("ssh_keys")).unwrap_or_default(),
            email_enabled: row.get("email_enabled"),
            instance: row
                .get::<Option<serde_json::Value>, _>("instance")
                .and_then(|value| serde_json::from_value(value).ok()),
            credentials: row
                .get::<Option<serde_json::Value>, _>("credentials")
                .and_then(|value| serde_json::from_value(value).ok()),
            start_time: row.get("start_time"),
            end_time: row.get("end_time"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl RentalRepository for SqlRentalRepository {
    async fn insert_active(&self, rental: &Rental) -> Result<()> {
        let configuration = serde_json::to_value(&rental.configuration).map_err(|e| {
            RentalsError::Database {
                operation: "insert_active".to_string(),
                source: Box::new(e),
            }
        })?;
        let ssh_keys = serde_json::to_value(&rental.ssh_keys).unwrap_or_default();

        let result = sqlx::query(
            r#"
            INSERT INTO rentals
            (id, cluster_id, user_id, configuration, hourly_price, status,
             ssh_keys, email_enabled, start_time, end_time, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(rental.id.as_uuid())
        .bind(rental.cluster_id.as_uuid())
        .bind(rental.user_id.as_uuid())
        .bind(configuration)
        .bind(rental.hourly_price.as_decimal())
        .bind(rental.status.to_string())
        .bind(ssh_keys)
        .bind(rental.email_enabled)
        .bind(rental.start_time)
        .bind(rental.end_time)
        .bind(rental.created_at)
        .bind(rental.updated_at)
        .execute(self.connection.pool())
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err))
                if db_err.constraint() == Some("rentals_one_active_per_cluster") =>
            {
                Err(RentalsError::Conflict {
                    cluster_id: rental.cluster_id,
                })
            }
            Err(e) => Err(RentalsError::database("insert_active", e)),
        }
    }

    async fn get(&self, id: &RentalId) -> Result<Option<Rental>> {
        let row = sqlx::query(
            r#"
            SELECT id, cluster_id, user_id, configuration, hourly_price, status,
                   ssh_keys, email_enabled, instance, credentials,
                   start_time, end_time, created_at, updated_at
            FROM rentals
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(self.connection.pool())
        .await
        .map_err(|e| RentalsError::database("get_rental", e))?;

        row.map(|r| Self::rental_from_row(&r)).transpose()
    }

    async fn update(&self, rental: &Rental) -> Result<()> {
        let configuration = serde_json::to_value(&rental.configuration).map_err(|e| {
            RentalsError::Database {
                operation: "update_rental".to_string(),
                source: Box::new(e),
            }
        })?;
        let ssh_keys = serde_json::to_value(&rental.ssh_keys).unwrap_or_default();
        let instance = rental
            .instance
            .as_ref()
            .and_then(|details| serde_json::to_value(details).ok());
        let credentials = rental
            .credentials
            .as_ref()
            .and_then(|credentials| serde_json::to_value(credentials).ok());

        sqlx::query(
            r#"
            UPDATE rentals
            SET configuration = $2, hourly_price = $3, status = $4, ssh_keys = $5,
                email_enabled = $6, instance = $7, credentials = $8,
                start_time = $9, end_time = $10, updated_at = $11
            WHERE id = $1
            "#,
        )
        .bind(rental.id.as_uuid())
        .bind(configuration)
        .bind(rental.hourly_price.as_decimal())
        .bind(rental.status.to_string())
        .bind(ssh_keys)
        .bind(rental.email_enabled)
        .bind(instance)
        .bind(credentials)
        .bind(rental.start_time)
        .bind(rental.end_time)
        .bind(rental.updated_at)
        .execute(self.connection.pool())
        .await
        .map_err(|e| RentalsError::database("update_rental", e))?;

        Ok(())
    }

    async fn delete(&self, id: &RentalId) -> Result<()> {
        sqlx::query("DELETE FROM rentals WHERE id = $1")
            .bind(id.as_uuid())
            .execute(self.connection.pool())
            .await
            .map_err(|e| RentalsError::database("delete_rental", e))?;
        Ok(())
    }

    async fn active_for_cluster(&self, cluster: &ClusterId) -> Result<Option<Rental>> {
        let row = sqlx::query(
            r#"
            SELECT id, cluster_id, user_id, configuration, hourly_price, status,
                   ssh_keys, email_enabled, instance, credentials,
                   start_time, end_time, created_at, updated_at
            FROM rentals
            WHERE cluster_id = $1 AND status = 'active'
            ORDER BY start_time DESC
            LIMIT 1
            "#,
        )
        .bind(cluster.as_uuid())
        .fetch_optional(self.connection.pool())
        .await
        .map_err(|e| RentalsError::database("active_for_cluster", e))?;

        row.map(|r| Self::rental_from_row(&r)).transpose()
    }

    async fn history_for_cluster(&self, cluster: &ClusterId) -> Result<Vec<Rental>> {
        let rows = sqlx::query(
            r#"
            SELECT id, cluster_id, user_id, configuration, hourly_price, status,
                   ssh_keys, email_enabled, instance, credentials,
                   start_time, end_time, created_at, updated_at
            FROM rentals
            WHERE cluster_id = $1
            ORDER BY start_time DESC
            "#,
        )
        .bind(cluster.as_uuid())
        .fetch_all(self.connection.pool())
        .await
        .map_err(|e| RentalsError::database("history_for_cluster", e))?;

        rows.iter().map(Self::rental_from_row).collect()
    }
}
