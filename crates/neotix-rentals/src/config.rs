use anyhow::{anyhow, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RentalsConfig {
    pub database_url: String,
    pub listen_address: String,
    pub billing: BillingConfig,
    pub provisioner: ProvisionerConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BillingConfig {
    pub tax_rate: Decimal,
    pub platform_fee_rate: Decimal,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProvisionerConfig {
    pub region: String,
    pub availability_zone: String,
    pub ami_id: String,
    pub subnet_id: Option<String>,
    /// Hard ceiling the orchestrator applies around a single create call.
    pub create_timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub max_poll_attempts: u32,
}

impl Default for RentalsConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://neotix@localhost:5432/neotix_rentals".to_string(),
            listen_address: "0.0.0.0:8080".to_string(),
            billing: BillingConfig::default(),
            provisioner: ProvisionerConfig::default(),
        }
    }
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            tax_rate: dec!(0.08),
            platform_fee_rate: dec!(0.05),
        }
    }
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            availability_zone: "us-east-1a".to_string(),
            // Ubuntu 22.04 LTS with NVIDIA drivers
            ami_id: "ami-0c7217cdde317cfec".to_string(),
            subnet_id: None,
            create_timeout_secs: 240,
            poll_interval_secs: 5,
            max_poll_attempts: 48,
        }
    }
}

impl RentalsConfig {
    pub fn load(path_override: Option<PathBuf>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(RentalsConfig::default()));

        if let Some(path) = path_override {
            if path.exists() {
                figment = figment.merge(Toml::file(&path));
            }
        } else {
            let default_path = PathBuf::from("neotix-rentals.toml");
            if default_path.exists() {
                figment = figment.merge(Toml::file(default_path));
            }
        }

        figment = figment.merge(Env::prefixed("NEOTIX_").split("__"));

        figment
            .extract()
            .map_err(|e| anyhow!("Configuration error: {}", e))
    }

    pub fn from_env() -> Result<Self> {
        Self::load(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rates_match_platform_policy() {
        let config = RentalsConfig::default();
        assert_eq!(config.billing.tax_rate, dec!(0.08));
        assert_eq!(config.billing.platform_fee_rate, dec!(0.05));
        assert_eq!(config.provisioner.create_timeout_secs, 240);
    }
}
