//! In-memory repository implementations.
//!
//! Back the unit and scenario tests and the local development mode; the
//! Postgres implementations in the sibling modules are the production path.

use crate::domain::catalog::CatalogService;
use crate::domain::types::{
    Cluster, ClusterId, CostRecord, GpuConfiguration, LedgerTransaction, ListingId, Rental,
    RentalId, TransactionId, TransactionStatus, UsdAmount, User, UserId,
};
use crate::error::{RentalsError, Result};
use crate::storage::{ClusterRepository, CostRecordRepository, LedgerRepository, RentalRepository};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use uuid::Uuid;

#[derive(Default)]
struct LedgerState {
    users: HashMap<UserId, User>,
    transactions: HashMap<String, LedgerTransaction>,
}

/// Ledger over process memory. A single mutex around users and transactions
/// gives the same atomicity the SQL implementation gets from row locking.
#[derive(Default)]
pub struct InMemoryLedgerRepository {
    state: Mutex<LedgerState>,
}

impl InMemoryLedgerRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&self, user: User) {
        self.state.lock().unwrap().users.insert(user.id, user);
    }

    fn apply(
        &self,
        user_id: &UserId,
        signed_amount: rust_decimal::Decimal,
        description: &str,
        idempotency_key: &str,
    ) -> Result<LedgerTransaction> {
        let mut state = self.state.lock().unwrap();

        if let Some(existing) = state.transactions.get(idempotency_key) {
            return Ok(existing.clone());
        }

        let user = state
            .users
            .get_mut(user_id)
            .ok_or_else(|| RentalsError::NotFound {
                resource: "user",
                id: user_id.to_string(),
            })?;

        let new_balance = user.balance.as_decimal() + signed_amount;
        if new_balance < rust_decimal::Decimal::ZERO {
            return Err(RentalsError::InsufficientBalance {
                required: -signed_amount,
                available: user.balance.as_decimal(),
                breakdown: None,
            });
        }
        user.balance = UsdAmount::from_decimal(new_balance);

        let transaction = LedgerTransaction {
            id: TransactionId::new(),
            user_id: *user_id,
            amount: signed_amount,
            status: TransactionStatus::Completed,
            description: description.to_string(),
            idempotency_key: idempotency_key.to_string(),
            created_at: Utc::now(),
        };
        state
            .transactions
            .insert(idempotency_key.to_string(), transaction.clone());

        Ok(transaction)
    }
}

#[async_trait]
impl LedgerRepository for InMemoryLedgerRepository {
    async fn get_user(&self, user_id: &UserId) -> Result<Option<User>> {
        Ok(self.state.lock().unwrap().users.get(user_id).cloned())
    }

    async fn get_balance(&self, user_id: &UserId) -> Result<UsdAmount> {
        self.state
            .lock()
            .unwrap()
            .users
            .get(user_id)
            .map(|user| user.balance)
            .ok_or_else(|| RentalsError::NotFound {
                resource: "user",
                id: user_id.to_string(),
            })
    }

    async fn find_transaction_by_key(&self, key: &str) -> Result<Option<LedgerTransaction>> {
        Ok(self.state.lock().unwrap().transactions.get(key).cloned())
    }

    async fn debit(
        &self,
        user_id: &UserId,
        amount: UsdAmount,
        description: &str,
        idempotency_key: &str,
    ) -> Result<LedgerTransaction> {
        self.apply(user_id, -amount.as_decimal(), description, idempotency_key)
    }

    async fn credit(
        &self,
        user_id: &UserId,
        amount: UsdAmount,
        description: &str,
        idempotency_key: &str,
    ) -> Result<LedgerTransaction> {
        self.apply(user_id, amount.as_decimal(), description, idempotency_key)
    }
}

#[derive(Default)]
pub struct InMemoryRentalRepository {
    rentals: RwLock<HashMap<RentalId, Rental>>,
}

impl InMemoryRentalRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RentalRepository for InMemoryRentalRepository {
    async fn insert_active(&self, rental: &Rental) -> Result<()> {
        let mut rentals = self.rentals.write().unwrap();
        let occupied = rentals
            .values()
            .any(|existing| existing.cluster_id == rental.cluster_id && existing.status.is_active());
        if occupied {
            return Err(RentalsError::Conflict {
                cluster_id: rental.cluster_id,
            });
        }
        rentals.insert(rental.id, rental.clone());
        Ok(())
    }

    async fn get(&self, id: &RentalId) -> Result<Option<Rental>> {
        Ok(self.rentals.read().unwrap().get(id).cloned())
    }

    async fn update(&self, rental: &Rental) -> Result<()> {
        let mut rentals = self.rentals.write().unwrap();
        if !rentals.contains_key(&rental.id) {
            return Err(RentalsError::NotFound {
                resource: "rental",
                id: rental.id.to_string(),
            });
        }
        rentals.insert(rental.id, rental.clone());
        Ok(())
    }

    async fn delete(&self, id: &RentalId) -> Result<()> {
        self.rentals.write().unwrap().remove(id);
        Ok(())
    }

    async fn active_for_cluster(&self, cluster: &ClusterId) -> Result<Option<Rental>> {
        let rentals = self.rentals.read().unwrap();
        Ok(rentals
            .values()
            .filter(|rental| rental.cluster_id == *cluster && rental.status.is_active())
            .max_by_key(|rental| rental.start_time)
            .cloned())
    }

    async fn history_for_cluster(&self, cluster: &ClusterId) -> Result<Vec<Rental>> {
        let rentals = self.rentals.read().unwrap();
        let mut history: Vec<Rental> = rentals
            .values()
            .filter(|rental| rental.cluster_id == *cluster)
            .cloned()
            .collect();
        history.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(history)
    }
}

#[derive(Default)]
pub struct InMemoryClusterRepository {
    clusters: RwLock<HashMap<ClusterId, Cluster>>,
}

impl InMemoryClusterRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClusterRepository for InMemoryClusterRepository {
    async fn insert(&self, cluster: &Cluster) -> Result<()> {
        self.clusters
            .write()
            .unwrap()
            .insert(cluster.id, cluster.clone());
        Ok(())
    }

    async fn get(&self, id: &ClusterId) -> Result<Option<Cluster>> {
        Ok(self.clusters.read().unwrap().get(id).cloned())
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<Cluster>> {
        let clusters = self.clusters.read().unwrap();
        let mut owned: Vec<Cluster> = clusters
            .values()
            .filter(|cluster| cluster.user_id == *user_id)
            .cloned()
            .collect();
        owned.sort_by_key(|cluster| cluster.created_at);
        Ok(owned)
    }

    async fn update(&self, cluster: &Cluster) -> Result<()> {
        self.clusters
            .write()
            .unwrap()
            .insert(cluster.id, cluster.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryCostRecordRepository {
    records: RwLock<HashMap<Uuid, CostRecord>>,
}

impl InMemoryCostRecordRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CostRecordRepository for InMemoryCostRecordRepository {
    async fn insert(&self, record: &CostRecord) -> Result<()> {
        self.records
            .write()
            .unwrap()
            .insert(record.id, record.clone());
        Ok(())
    }

    async fn get_for_rental(&self, rental_id: &RentalId) -> Result<Option<CostRecord>> {
        let records = self.records.read().unwrap();
        Ok(records
            .values()
            .find(|record| record.rental_id == *rental_id)
            .cloned())
    }

    async fn update(&self, record: &CostRecord) -> Result<()> {
        let mut records = self.records.write().unwrap();
        if !records.contains_key(&record.id) {
            return Err(RentalsError::NotFound {
                resource: "cost record",
                id: record.id.to_string(),
            });
        }
        records.insert(record.id, record.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryCatalogService {
    listings: RwLock<HashMap<ListingId, GpuConfiguration>>,
}

impl InMemoryCatalogService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_listing(&self, id: ListingId, configuration: GpuConfiguration) {
        self.listings.write().unwrap().insert(id, configuration);
    }
}

#[async_trait]
impl CatalogService for InMemoryCatalogService {
    async fn get_configuration(&self, id: ListingId) -> Result<GpuConfiguration> {
        self.listings
            .read()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| RentalsError::NotFound {
                resource: "gpu listing",
                id: id.to_string(),
            })
    }
}
