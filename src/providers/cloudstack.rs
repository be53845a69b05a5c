//! CloudStack facade

use std::sync::Arc;

use crate::bootstrap::Bootstrapper;
use crate::cloud::ClientFactory;
use crate::config::ProvisionrConfig;
use crate::image::ImageResolver;
use crate::launcher::Launcher;
use crate::models::{options, PoolInstance, PoolSpec, Provider};
use crate::orchestrator::Orchestrator;
use crate::provisionr::{Provisionr, ProvisionrCore};
use crate::{Error, Result};

pub const CLOUDSTACK_ID: &str = "cloudstack";

/// On-demand pools only, launched into a guest network. Without a
/// configured image table pool specs must name their template explicitly.
pub struct CloudStackProvisionr {
    config: ProvisionrConfig,
    core: ProvisionrCore,
}

impl CloudStackProvisionr {
    pub fn new(config: ProvisionrConfig, factory: Arc<dyn ClientFactory>) -> Result<Self> {
        config.validate()?;
        let resolver = match super::configured_image_table(&config, CLOUDSTACK_ID)? {
            Some(table) => ImageResolver::new(table),
            None => ImageResolver::explicit_only(),
        };
        let launcher = Launcher::new(resolver, config.retry.clone())
            .without_spot()
            .with_managed_network();
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

impl Provisionr for CloudStackProvisionr {
    fn id(&self) -> &str {
        CLOUDSTACK_ID
    }

    fn default_provider(&self) -> Option<Provider> {
        self.config.default_provider_for(CLOUDSTACK_ID)
    }

    fn start_pool_management_process(&self, business_key: &str, spec: PoolSpec) -> Result<String> {
        if spec.provider().option(options::SPOT_BID).is_some() {
            return Err(Error::validation("cloudstack pools cannot use spot instances"));
        }
        self.core.start(CLOUDSTACK_ID, business_key, spec)
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
