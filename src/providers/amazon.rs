//! Amazon EC2 facade

use std::sync::Arc;

use crate::bootstrap::Bootstrapper;
use crate::cloud::ClientFactory;
use crate::config::ProvisionrConfig;
use crate::image::{ImageResolver, ImageTable};
use crate::launcher::Launcher;
use crate::models::{PoolInstance, PoolSpec, Provider};
use crate::orchestrator::Orchestrator;
use crate::provisionr::{Provisionr, ProvisionrCore};
use crate::Result;

pub const AMAZON_ID: &str = "amazon";

/// On-demand or spot pools, images resolved from the Ubuntu table
pub struct AmazonProvisionr {
    config: ProvisionrConfig,
    core: ProvisionrCore,
}

impl AmazonProvisionr {
    pub fn new(config: ProvisionrConfig, factory: Arc<dyn ClientFactory>) -> Result<Self> {
        config.validate()?;
        let table = match super::configured_image_table(&config, AMAZON_ID)? {
            Some(table) => table,
            None => ImageTable::builtin()?,
        };
        let launcher = Launcher::new(ImageResolver::new(table), config.retry.clone())
            .with_spot_validity(config.spot_request_validity());
        let core = ProvisionrCore::new(factory, launcher, config.lifecycle_settings());
        Ok(Self { config, core })
    }

    pub fn with_bootstrapper(mut self, bootstrapper: Arc<dyn Bootstrapper>) -> Self {
        self.core = self.core.with_bootstrapper(bootstrapper);
        self
    }

    pub fn with_orchestrator(mut self, orchestrator: Orchestrator) -> Self {
        self.core = self.core.with_orchestrator(orchestrator);
        self
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        self.core.orchestrator()
    }
}

impl Provisionr for AmazonProvisionr {
    fn id(&self) -> &str {
        AMAZON_ID
    }

    fn default_provider(&self) -> Option<Provider> {
        self.config.default_provider_for(AMAZON_ID)
    }

    fn start_pool_management_process(&self, business_key: &str, spec: PoolSpec) -> Result<String> {
        self.core.start(AMAZON_ID, business_key, spec)
    }

    fn get_pool_instance(&self, business_key: &str) -> Result<PoolInstance> {
        self.core.get(business_key)
    }

    fn list_pool_instances(&self) -> Vec<PoolInstance> {
        self.core.list()
    }

    fn trigger_pool_management_process_termination(&self, business_key: &str) -> Result<()> {
        self.core.terminate(business_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::InMemoryCloud;
    use crate::config::DefaultProviderConfig;
    use crate::Error;

    #[test]
    fn test_default_provider() {
        let cloud = InMemoryCloud::new();
        let bare = AmazonProvisionr::new(ProvisionrConfig::default(), cloud.factory()).unwrap();
        assert_eq!(bare.id(), "amazon");
        assert!(bare.default_provider().is_none());

        let config = ProvisionrConfig::builder()
            .default_provider(DefaultProviderConfig {
                access_key: "AKIA".into(),
                secret_key: "secret".into(),
                ..Default::default()
            })
            .build()
            .unwrap();
        let configured = AmazonProvisionr::new(config, cloud.factory()).unwrap();
        let provider = configured.default_provider().unwrap();
        assert_eq!(provider.id, "amazon");
        assert_eq!(provider.access_key, "AKIA");
    }

    #[test]
    fn test_missing_image_table_file() {
        let config = ProvisionrConfig::builder()
            .image_table(AMAZON_ID, "/nonexistent/ubuntu.csv")
            .build()
            .unwrap();
        let result = AmazonProvisionr::new(config, InMemoryCloud::new().factory());
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[test]
    fn test_unknown_key_is_not_found() {
        let provisionr = AmazonProvisionr::new(ProvisionrConfig::default(), InMemoryCloud::new().factory()).unwrap();
        assert!(provisionr.get_pool_instance("missing").unwrap_err().is_not_found());
        assert!(provisionr
            .trigger_pool_management_process_termination("missing")
            .unwrap_err()
            .is_not_found());
        assert!(provisionr.list_pool_instances().is_empty());
    }
}
