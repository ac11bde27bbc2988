use crate::domain::types::{GpuConfiguration, ListingId};
use crate::error::Result;
use async_trait::async_trait;

/// Catalog lookup collaborator.
///
/// The orchestrator copies the returned configuration into the rental as an
/// immutable snapshot; whatever the catalog does to its prices afterwards is
/// invisible to existing rentals.
#[async_trait]
pub trait CatalogService: Send + Sync {
    async fn get_configuration(&self, id: ListingId) -> Result<GpuConfiguration>;
}
