use crate::config::ProvisionerConfig;
use crate::domain::types::{GpuConfiguration, InstanceCredentials, InstanceDetails};
use crate::provisioner::{ProvisionError, ProvisionedInstance, Provisioner};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_ec2::error::ProvideErrorMetadata;
use aws_sdk_ec2::types::{
    InstanceMarketOptionsRequest, InstanceStateName, InstanceType, IpPermission, IpRange,
    MarketType, Placement, SpotInstanceType, SpotMarketOptions,
};
use aws_sdk_ec2::Client;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// GPU model to EC2 instance type, single-GPU baseline.
const GPU_INSTANCE_MAPPING: &[(&str, &str)] = &[
    ("T4", "g4dn.xlarge"),
    ("A100", "p4d.24xlarge"),
    ("A10G", "g5.2xlarge"),
    ("V100", "p3.2xlarge"),
    ("K80", "p2.xlarge"),
];

/// EC2 spot-instance provisioner.
///
/// Each launch gets its own key pair (whose private key becomes the rental's
/// credentials blob) and a fresh security group opening SSH. Launch failures
/// clean up the key pair before surfacing the error so a retry starts clean.
pub struct Ec2Provisioner {
    client: Client,
    config: ProvisionerConfig,
}

impl Ec2Provisioner {
    pub async fn new(config: ProvisionerConfig) -> Self {
        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;
        Self {
            client: Client::new(&sdk_config),
            config,
        }
    }

    fn instance_type_for(configuration: &GpuConfiguration) -> String {
        let model = configuration
            .gpu_model
            .trim_start_matches("NVIDIA ")
            .trim();

        let mapped = GPU_INSTANCE_MAPPING
            .iter()
            .find(|(gpu, _)| gpu.eq_ignore_ascii_case(model))
            .map(|(_, instance_type)| *instance_type);

        if let Some(instance_type) = mapped {
            // Multi-GPU configurations scale the instance size within the
            // same family.
            if configuration.gpu_count > 1 {
                if let Some((family, size)) = instance_type.split_once('.') {
                    if let Some(multiple) = size.strip_suffix("xlarge") {
                        let base: u32 = if multiple.is_empty() {
                            1
                        } else {
                            multiple.parse().unwrap_or(1)
                        };
                        return format!("{family}.{}xlarge", base * configuration.gpu_count);
                    }
                }
            }
            return instance_type.to_string();
        }

        // Memory-based fallback for models without a direct mapping
        match configuration.gpu_memory_gb {
            memory if memory >= 80 => "p4d.24xlarge",
            memory if memory >= 32 => "p3.2xlarge",
            _ => "g4dn.xlarge",
        }
        .to_string()
    }

    async fn create_key_pair(&self, key_name: &str) -> Result<String, ProvisionError> {
        for attempt in 0..2 {
            match self
                .client
                .create_key_pair()
                .key_name(key_name)
                .send()
                .await
            {
                Ok(output) => {
                    return output.key_material().map(str::to_string).ok_or_else(|| {
                        ProvisionError::Transient(format!(
                            "create_key_pair returned no key material for {key_name}"
                        ))
                    });
                }
                Err(err) if err.code() == Some("InvalidKeyPair.Duplicate") && attempt == 0 => {
                    // Stale key pair from a dead launch; replace it.
                    self.delete_key_pair(key_name).await;
                }
                Err(err) => return Err(map_sdk_error("create_key_pair", &err)),
            }
        }
        Err(ProvisionError::Transient(format!(
            "could not replace duplicate key pair {key_name}"
        )))
    }

    async fn delete_key_pair(&self, key_name: &str) {
        if let Err(err) = self
            .client
            .delete_key_pair()
            .key_name(key_name)
            .send()
            .await
        {
            warn!(key_name, code = err.code().unwrap_or("unknown"), "failed to delete key pair");
        }
    }

    /// Create a per-launch security group allowing inbound SSH.
    async fn create_security_group(&self) -> Result<String, ProvisionError> {
        let group_name = format!("neotix-gpu-{}", Uuid::new_v4().simple());

        let created = self
            .client
            .create_security_group()
            .group_name(&group_name)
            .description("Security group for Neotix GPU instances with SSH access")
            .send()
            .await
            .map_err(|err| map_sdk_error("create_security_group", &err))?;

        let group_id = created.group_id().map(str::to_string).ok_or_else(|| {
            ProvisionError::Transient("create_security_group returned no group id".to_string())
        })?;

        self.client
            .authorize_security_group_ingress()
            .group_id(&group_id)
            .ip_permissions(
                IpPermission::builder()
                    .ip_protocol("tcp")
                    .from_port(22)
                    .to_port(22)
                    .ip_ranges(IpRange::builder().cidr_ip("0.0.0.0/0").build())
                    .build(),
            )
            .send()
            .await
            .map_err(|err| map_sdk_error("authorize_security_group_ingress", &err))?;

        info!(group_name, group_id, "created security group");
        Ok(group_id)
    }

    async fn wait_until_running(
        &self,
        instance_id: &str,
    ) -> Result<InstanceDetails, ProvisionError> {
        for _ in 0..self.config.max_poll_attempts {
            let described = self
                .client
                .describe_instances()
                .instance_ids(instance_id)
                .send()
                .await
                .map_err(|err| map_sdk_error("describe_instances", &err))?;

            let instance = described
                .reservations()
                .iter()
                .flat_map(|reservation| reservation.instances())
                .next();

            if let Some(instance) = instance {
                let state = instance.state().and_then(|state| state.name());
                match state {
                    Some(InstanceStateName::Running) => {
                        return Ok(InstanceDetails {
                            instance_id: instance_id.to_string(),
                            instance_type: instance
                                .instance_type()
                                .map(|t| t.as_str().to_string())
                                .unwrap_or_default(),
                            public_ip: instance.public_ip_address().map(str::to_string),
                            public_dns: instance
                                .public_dns_name()
                                .filter(|dns| !dns.is_empty())
                                .map(str::to_string),
                        });
                    }
                    Some(
                        InstanceStateName::ShuttingDown
                        | InstanceStateName::Terminated
                        | InstanceStateName::Stopping
                        | InstanceStateName::Stopped,
                    ) => {
                        return Err(ProvisionError::Capacity(format!(
                            "instance {instance_id} was reclaimed before reaching running state"
                        )));
                    }
                    _ => {}
                }
            }

            tokio::time::sleep(Duration::from_secs(self.config.poll_interval_secs)).await;
        }

        Err(ProvisionError::Transient(format!(
            "instance {instance_id} did not reach running state in time"
        )))
    }
}

#[async_trait]
impl Provisioner for Ec2Provisioner {
    async fn create(
        &self,
        configuration: &GpuConfiguration,
    ) -> Result<ProvisionedInstance, ProvisionError> {
        let instance_type = Self::instance_type_for(configuration);
        let key_name = format!("neotix-{}", Uuid::new_v4().simple());

        let private_key = self.create_key_pair(&key_name).await?;

        let group_id = match self.create_security_group().await {
            Ok(group_id) => group_id,
            Err(err) => {
                self.delete_key_pair(&key_name).await;
                return Err(err);
            }
        };

        info!(%instance_type, key_name, "requesting spot instance");

        let mut request = self
            .client
            .run_instances()
            .image_id(&self.config.ami_id)
            .instance_type(InstanceType::from(instance_type.as_str()))
            .key_name(&key_name)
            .security_group_ids(&group_id)
            .min_count(1)
            .max_count(1)
            .instance_market_options(
                InstanceMarketOptionsRequest::builder()
                    .market_type(MarketType::Spot)
                    .spot_options(
                        SpotMarketOptions::builder()
                            .spot_instance_type(SpotInstanceType::OneTime)
                            .build(),
                    )
                    .build(),
            )
            .placement(
                Placement::builder()
                    .availability_zone(&self.config.availability_zone)
                    .build(),
            );
        if let Some(subnet_id) = &self.config.subnet_id {
            request = request.subnet_id(subnet_id);
        }

        let launched = match request.send().await {
            Ok(response) => response,
            Err(err) => {
                let mapped = map_sdk_error("run_instances", &err);
                self.delete_key_pair(&key_name).await;
                return Err(mapped);
            }
        };

        let instance_id = launched
            .instances()
            .first()
            .and_then(|instance| instance.instance_id())
            .map(str::to_string);
        let Some(instance_id) = instance_id else {
            self.delete_key_pair(&key_name).await;
            return Err(ProvisionError::Transient(
                "run_instances returned no instance".to_string(),
            ));
        };

        match self.wait_until_running(&instance_id).await {
            Ok(details) => {
                info!(instance_id, ip = ?details.public_ip, "spot instance running");
                Ok(ProvisionedInstance {
                    details,
                    credentials: InstanceCredentials {
                        key_name,
                        private_key,
                    },
                })
            }
            Err(err) => {
                // The launch is dead on arrival; reap whatever exists so a
                // retry starts from nothing.
                if let Err(terminate_err) = self.terminate(&instance_id).await {
                    warn!(instance_id, error = %terminate_err, "failed to reap dead launch");
                }
                self.delete_key_pair(&key_name).await;
                Err(err)
            }
        }
    }

    async fn terminate(&self, instance_id: &str) -> Result<(), ProvisionError> {
        match self
            .client
            .terminate_instances()
            .instance_ids(instance_id)
            .send()
            .await
        {
            Ok(_) => {
                info!(instance_id, "terminated instance");
                Ok(())
            }
            // Unknown handles are already gone; that is success.
            Err(err) if err.code().is_some_and(|code| code.starts_with("InvalidInstanceID")) => {
                info!(instance_id, "instance already gone");
                Ok(())
            }
            Err(err) => Err(map_sdk_error("terminate_instances", &err)),
        }
    }

    async fn inspect(&self, instance_id: &str) -> Result<InstanceDetails, ProvisionError> {
        let described = self
            .client
            .describe_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .map_err(|err| {
                if err.code().is_some_and(|code| code.starts_with("InvalidInstanceID")) {
                    ProvisionError::NotFound(instance_id.to_string())
                } else {
                    map_sdk_error("describe_instances", &err)
                }
            })?;

        described
            .reservations()
            .iter()
            .flat_map(|reservation| reservation.instances())
            .next()
            .map(|instance| InstanceDetails {
                instance_id: instance_id.to_string(),
                instance_type: instance
                    .instance_type()
                    .map(|t| t.as_str().to_string())
                    .unwrap_or_default(),
                public_ip: instance.public_ip_address().map(str::to_string),
                public_dns: instance
                    .public_dns_name()
                    .filter(|dns| !dns.is_empty())
                    .map(str::to_string),
            })
            .ok_or_else(|| ProvisionError::NotFound(instance_id.to_string()))
    }
}

fn map_sdk_error<E>(operation: &str, err: &E) -> ProvisionError
where
    E: ProvideErrorMetadata,
{
    let code = err.code().unwrap_or("unknown");
    let message = err.message().unwrap_or("no further detail");
    let detail = format!("{operation}: {code}: {message}");

    if code.contains("LimitExceeded") || code.contains("Quota") {
        ProvisionError::Quota(detail)
    } else if code.contains("InsufficientInstanceCapacity")
        || code.contains("SpotMaxPriceTooLow")
        || code.contains("Unsupported")
    {
        ProvisionError::Capacity(detail)
    } else {
        ProvisionError::Transient(detail)
    }
}
