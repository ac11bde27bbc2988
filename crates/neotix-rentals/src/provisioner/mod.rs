pub mod aws;

use crate::domain::types::{GpuConfiguration, InstanceCredentials, InstanceDetails};
use async_trait::async_trait;
use thiserror::Error;

pub use aws::Ec2Provisioner;

#[derive(Debug, Clone, Error)]
pub enum ProvisionError {
    #[error("transient provisioning failure: {0}")]
    Transient(String),

    #[error("no capacity available: {0}")]
    Capacity(String),

    #[error("provider quota exceeded: {0}")]
    Quota(String),

    #[error("instance not found: {0}")]
    NotFound(String),
}

/// A freshly created instance: its connection details plus the credentials
/// generated for it.
#[derive(Debug, Clone)]
pub struct ProvisionedInstance {
    pub details: InstanceDetails,
    pub credentials: InstanceCredentials,
}

/// External compute provider contract.
///
/// `create` may legitimately block for minutes while the provider schedules
/// capacity; callers own the timeout. It must not be retried for the same
/// rental without first cleaning up whatever the previous attempt left
/// behind.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn create(
        &self,
        configuration: &GpuConfiguration,
    ) -> Result<ProvisionedInstance, ProvisionError>;

    /// Idempotent: terminating an unknown or already-terminated handle is a
    /// successful no-op.
    async fn terminate(&self, instance_id: &str) -> Result<(), ProvisionError>;

    async fn inspect(&self, instance_id: &str) -> Result<InstanceDetails, ProvisionError>;
}
