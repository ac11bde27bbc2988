use crate::domain::types::{Cluster, ClusterId, ListingId, UserId};
use crate::error::{RentalsError, Result};
use crate::storage::postgres::PostgresConnection;
use async_trait::async_trait;
use sqlx::Row;
use std::sync::Arc;

#[async_trait]
pub trait ClusterRepository: Send + Sync {
    async fn insert(&self, cluster: &Cluster) -> Result<()>;
    async fn get(&self, id: &ClusterId) -> Result<Option<Cluster>>;
    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Cluster>>;
    async fn update(&self, cluster: &Cluster) -> Result<()>;
}

pub struct SqlClusterRepository {
    connection: Arc<PostgresConnection>,
}

impl SqlClusterRepository {
    pub fn new(connection: Arc<PostgresConnection>) -> Self {
        Self { connection }
    }

    fn cluster_from_row(row: &sqlx::postgres::PgRow) -> Cluster {
        Cluster {
            id: ClusterId::from_uuid(row.get("id")),
            user_id: UserId::from_uuid(row.get("user_id")),
            name: row.get("name"),
            description: row.get("description"),
            current_listing_id: row
                .get::<Option<uuid::Uuid>, _>("current_listing_id")
                .map(ListingId::from_uuid),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl ClusterRepository for SqlClusterRepository {
    async fn insert(&self, cluster: &Cluster) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO clusters
            (id, user_id, name, description, current_listing_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(cluster.id.as_uuid())
        .bind(cluster.user_id.as_uuid())
        .bind(&cluster.name)
        .bind(&cluster.description)
        .bind(cluster.current_listing_id.map(|id| id.as_uuid()))
        .bind(cluster.created_at)
        .bind(cluster.updated_at)
        .execute(self.connection.pool())
        .await
        .map_err(|e| RentalsError::database("insert_cluster", e))?;
        Ok(())
    }

    async fn get(&self, id: &ClusterId) -> Result<Option<Cluster>> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, name, description, current_listing_id, created_at, updated_at
            FROM clusters
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(self.connection.pool())
        .await
        .map_err(|e| RentalsError::database("get_cluster", e))?;

        Ok(row.map(|r| Self::cluster_from_row(&r)))
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Cluster>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, name, description, current_listing_id, created_at, updated_at
            FROM clusters
            WHERE user_id = $1
            ORDER BY created_at
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(self.connection.pool())
        .await
        .map_err(|e| RentalsError::database("list_clusters", e))?;

        Ok(rows.iter().map(Self::cluster_from_row).collect())
    }

    async fn update(&self, cluster: &Cluster) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE clusters
            SET name = $2, description = $3, current_listing_id = $4, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(cluster.id.as_uuid())
        .bind(&cluster.name)
        .bind(&cluster.description)
        .bind(cluster.current_listing_id.map(|id| id.as_uuid()))
        .execute(self.connection.pool())
        .await
        .map_err(|e| RentalsError::database("update_cluster", e))?;
        Ok(())
    }
}
