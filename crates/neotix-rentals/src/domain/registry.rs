use crate::domain::types::{
    Cluster, ClusterId, GpuConfiguration, InstanceCredentials, InstanceDetails, Rental, RentalId,
    RentalStatus,
};
use crate::error::{RentalsError, Result};
use crate::storage::RentalRepository;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

/// Owner of the rental state machine and of the "at most one live rental per
/// cluster" invariant.
///
/// The slot is reserved by inserting the Active row before provisioning has
/// succeeded; the storage layer enforces exclusivity, so two concurrent
/// reservations yield exactly one success and one `Conflict`.
pub struct RentalRegistry {
    repository: Arc<dyn RentalRepository>,
}

impl RentalRegistry {
    pub fn new(repository: Arc<dyn RentalRepository>) -> Self {
        Self { repository }
    }

    /// The most recent rental that is Active and not past an explicit end.
    ///
    /// Legacy fixed-duration rentals expire implicitly: when the stored end
    /// time has passed, the row is flipped to Completed here and the cluster
    /// reads as free.
    pub async fn active_rental_for(&self, cluster: &ClusterId) -> Result<Option<Rental>> {
        let Some(rental) = self.repository.active_for_cluster(cluster).await? else {
            return Ok(None);
        };

        let now = Utc::now();
        if rental.is_live(now) {
            return Ok(Some(rental));
        }

        debug!(rental_id = %rental.id, "refreshing expired fixed-duration rental");
        let mut expired = rental;
        expired.status = RentalStatus::Completed;
        expired.updated_at = now;
        self.repository.update(&expired).await?;
        Ok(None)
    }

    /// Atomically reserve the cluster's rental slot.
    ///
    /// Returns the new Active rental, with no instance attached yet. Fails
    /// with `Conflict` when another rental already holds the slot.
    pub async fn begin_deploy(
        &self,
        cluster: &Cluster,
        configuration: GpuConfiguration,
        ssh_keys: Vec<String>,
        email_enabled: bool,
    ) -> Result<Rental> {
        let rental = Rental::new(
            cluster.id,
            cluster.user_id,
            configuration,
            ssh_keys,
            email_enabled,
        );
        self.repository.insert_active(&rental).await?;

        info!(
            rental_id = %rental.id,
            cluster_id = %cluster.id,
            "reserved rental slot"
        );
        Ok(rental)
    }

    /// Store the external handle, connection details and credentials once
    /// provisioning has succeeded.
    pub async fn attach_instance(
        &self,
        rental_id: &RentalId,
        instance: InstanceDetails,
        credentials: InstanceCredentials,
    ) -> Result<Rental> {
        let mut rental = self.get(rental_id).await?;
        rental.instance = Some(instance);
        rental.credentials = Some(credentials);
        rental.updated_at = Utc::now();
        self.repository.update(&rental).await?;
        Ok(rental)
    }

    /// Active → Completed, stamping the end time.
    ///
    /// Idempotent: completing an already-Completed rental returns the stored
    /// record unchanged.
    pub async fn complete(&self, rental_id: &RentalId) -> Result<Rental> {
        let mut rental = self.get(rental_id).await?;
        if rental.status == RentalStatus::Completed {
            return Ok(rental);
        }

        if !rental.status.can_transition_to(RentalStatus::Completed) {
            return Err(RentalsError::InvalidStateTransition {
                from: rental.status.to_string(),
                to: RentalStatus::Completed.to_string(),
            });
        }

        let now = Utc::now();
        rental.status = RentalStatus::Completed;
        // Keep an already-passed expiry as the end; everything else ends now.
        if rental.end_time.map_or(true, |end| end > now) {
            rental.end_time = Some(now);
        }
        rental.updated_at = now;
        self.repository.update(&rental).await?;

        info!(rental_id = %rental.id, "rental completed");
        Ok(rental)
    }

    /// Delete a reserved row whose deploy failed. Compensation only; a rental
    /// that was ever billed is completed, not deleted.
    pub async fn abort_deploy(&self, rental_id: &RentalId) -> Result<()> {
        self.repository.delete(rental_id).await?;
        info!(rental_id = %rental_id, "rolled back reserved rental slot");
        Ok(())
    }

    pub async fn get(&self, rental_id: &RentalId) -> Result<Rental> {
        self.repository
            .get(rental_id)
            .await?
            .ok_or_else(|| RentalsError::NotFound {
                resource: "rental",
                id: rental_id.to_string(),
            })
    }

    /// Rental history for a cluster, newest first.
    pub async fn history_for(&self, cluster: &ClusterId) -> Result<Vec<Rental>> {
        self.repository.history_for_cluster(cluster).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{ClusterId, UsdAmount, UserId};
    use crate::storage::memory::InMemoryRentalRepository;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn registry() -> RentalRegistry {
        RentalRegistry::new(Arc::new(InMemoryRentalRepository::new()))
    }

    fn test_cluster() -> Cluster {
        Cluster::new(UserId::new(), "training-rig")
    }

    fn test_configuration() -> GpuConfiguration {
        GpuConfiguration {
            gpu_vendor: "NVIDIA".to_string(),
            gpu_model: "T4".to_string(),
            gpu_memory_gb: 16,
            gpu_count: 1,
            hourly_price: UsdAmount::from_decimal(dec!(1.00)),
        }
    }

    #[tokio::test]
    async fn test_begin_deploy_is_exclusive_per_cluster() {
        let registry = registry();
        let cluster = test_cluster();

        registry
            .begin_deploy(&cluster, test_configuration(), vec![], true)
            .await
            .unwrap();

        let second = registry
            .begin_deploy(&cluster, test_configuration(), vec![], true)
            .await;
        assert!(matches!(second, Err(RentalsError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_slot_frees_after_completion() {
        let registry = registry();
        let cluster = test_cluster();

        let first = registry
            .begin_deploy(&cluster, test_configuration(), vec![], true)
            .await
            .unwrap();
        registry.complete(&first.id).await.unwrap();

        assert!(registry.active_rental_for(&cluster.id).await.unwrap().is_none());
        registry
            .begin_deploy(&cluster, test_configuration(), vec![], true)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_complete_is_idempotent() {
        let registry = registry();
        let cluster = test_cluster();

        let rental = registry
            .begin_deploy(&cluster, test_configuration(), vec![], true)
            .await
            .unwrap();

        let completed = registry.complete(&rental.id).await.unwrap();
        let end_time = completed.end_time.unwrap();

        let again = registry.complete(&rental.id).await.unwrap();
        assert_eq!(again.status, RentalStatus::Completed);
        assert_eq!(again.end_time.unwrap(), end_time);
    }

    #[tokio::test]
    async fn test_expired_fixed_duration_rental_reads_as_free() {
        let repository = Arc::new(InMemoryRentalRepository::new());
        let registry = RentalRegistry::new(repository.clone());
        let cluster = test_cluster();

        let mut rental = registry
            .begin_deploy(&cluster, test_configuration(), vec![], true)
            .await
            .unwrap();

        // Simulate a legacy 24h rental whose window has passed
        rental.start_time = Utc::now() - Duration::hours(25);
        rental.end_time = Some(Utc::now() - Duration::hours(1));
        repository.update(&rental).await.unwrap();

        assert!(registry.active_rental_for(&cluster.id).await.unwrap().is_none());

        // The refresh persisted the completion
        let stored = registry.get(&rental.id).await.unwrap();
        assert_eq!(stored.status, RentalStatus::Completed);
    }

    #[tokio::test]
    async fn test_abort_deploy_removes_reservation() {
        let registry = registry();
        let cluster = test_cluster();

        let rental = registry
            .begin_deploy(&cluster, test_configuration(), vec![], true)
            .await
            .unwrap();
        registry.abort_deploy(&rental.id).await.unwrap();

        assert!(registry.active_rental_for(&cluster.id).await.unwrap().is_none());
        assert!(matches!(
            registry.get(&rental.id).await,
            Err(RentalsError::NotFound { .. })
        ));
    }
}
