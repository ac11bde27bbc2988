use crate::domain::billing::{fractional_hours, BillingCalculator};
use crate::domain::ledger::LedgerOperations;
use crate::domain::registry::RentalRegistry;
use crate::domain::types::{Cluster, ClusterId, UsdAmount, UserId};
use crate::error::{RentalsError, Result};
use crate::storage::{ClusterRepository, CostRecordRepository};
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;

/// Live status of one cluster, including the running-cost estimate for an
/// active rental.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterStatus {
    pub cluster_id: ClusterId,
    pub name: String,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hourly_rate: Option<UsdAmount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub running_hours: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_current_total: Option<UsdAmount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_deposit: Option<UsdAmount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_charges: Option<UsdAmount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}

/// Read-only live-cost estimator.
///
/// Estimates use exact fractional hours, unlike real charges, which always
/// round up to whole hours. Nothing here moves money; authoritative charging
/// happens exclusively in the terminate saga.
pub struct StatusResolver {
    registry: Arc<RentalRegistry>,
    clusters: Arc<dyn ClusterRepository>,
    costs: Arc<dyn CostRecordRepository>,
    ledger: Arc<dyn LedgerOperations>,
    calculator: BillingCalculator,
}

impl StatusResolver {
    pub fn new(
        registry: Arc<RentalRegistry>,
        clusters: Arc<dyn ClusterRepository>,
        costs: Arc<dyn CostRecordRepository>,
        ledger: Arc<dyn LedgerOperations>,
        calculator: BillingCalculator,
    ) -> Self {
        Self {
            registry,
            clusters,
            costs,
            ledger,
            calculator,
        }
    }

    pub async fn resolve(&self, cluster: &Cluster) -> Result<ClusterStatus> {
        let mut status = ClusterStatus {
            cluster_id: cluster.id,
            name: cluster.name.clone(),
            is_active: false,
            gpu_model: None,
            hourly_rate: None,
            start_time: None,
            elapsed_seconds: None,
            running_hours: None,
            estimated_current_total: None,
            initial_deposit: None,
            additional_charges: None,
            instance_id: None,
        };

        let Some(rental) = self.registry.active_rental_for(&cluster.id).await? else {
            return Ok(status);
        };

        let now = Utc::now();
        let elapsed = rental.elapsed(now);
        let running_hours = fractional_hours(elapsed);
        let estimate = self.calculator.quote(rental.hourly_price, running_hours);

        // The deposit actually taken, read back from the ledger when present.
        let initial_deposit = match self
            .ledger
            .find_by_idempotency_key(&format!("{}:deposit", rental.id))
            .await?
        {
            Some(transaction) => Some(UsdAmount::from_decimal(transaction.amount.abs())),
            None => self
                .costs
                .get_for_rental(&rental.id)
                .await?
                .map(|record| record.breakdown.total_cost),
        };

        let additional_charges = initial_deposit.map(|deposit| {
            estimate
                .total_cost
                .checked_sub(deposit)
                .unwrap_or_else(UsdAmount::zero)
        });

        status.is_active = true;
        status.gpu_model = Some(rental.configuration.gpu_model.clone());
        status.hourly_rate = Some(rental.hourly_price);
        status.start_time = Some(rental.start_time);
        status.elapsed_seconds = Some(elapsed.num_seconds().max(0));
        status.running_hours = Some(running_hours);
        status.estimated_current_total = Some(estimate.total_cost);
        status.initial_deposit = initial_deposit;
        status.additional_charges = additional_charges;
        status.instance_id = rental
            .instance
            .as_ref()
            .map(|instance| instance.instance_id.clone());

        Ok(status)
    }

    pub async fn resolve_cluster(&self, cluster_id: &ClusterId) -> Result<ClusterStatus> {
        let cluster = self
            .clusters
            .get(cluster_id)
            .await?
            .ok_or_else(|| RentalsError::NotFound {
                resource: "cluster",
                id: cluster_id.to_string(),
            })?;
        self.resolve(&cluster).await
    }

    /// Status for every cluster the user owns, active rentals first.
    pub async fn resolve_all(&self, user_id: &UserId) -> Result<Vec<ClusterStatus>> {
        let clusters = self.clusters.list_for_user(user_id).await?;
        let mut statuses =
            try_join_all(clusters.iter().map(|cluster| self.resolve(cluster))).await?;
        statuses.sort_by(|a, b| b.is_active.cmp(&a.is_active).then(a.name.cmp(&b.name)));
        Ok(statuses)
    }
}
