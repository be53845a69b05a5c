//! Provider facade
//!
//! A [`Provisionr`] accepts pool specs for one backend and exposes the
//! running pools. [`ProvisionrCore`] holds the machinery every backend
//! shares: the process registry, the client cache and the lifecycle
//! settings.

use std::sync::Arc;

use crate::bootstrap::{Bootstrapper, LoggingBootstrapper};
use crate::cloud::{ClientCache, ClientFactory};
use crate::launcher::Launcher;
use crate::models::{PoolInstance, PoolSpec, Provider};
use crate::orchestrator::{Orchestrator, PoolContext, Signal};
use crate::pool::{LifecycleSettings, PoolLifecycle};
use crate::state::status_of;
use crate::{Error, Result};

/// Format a timeout as an ISO-8601 duration: whole minutes as `PT<n>M`,
/// anything else as `PT<n>S`
pub fn convert_timeout_to_iso8601(seconds: u32) -> String {
    if seconds % 60 == 0 {
        format!("PT{}M", seconds / 60)
    } else {
        format!("PT{}S", seconds)
    }
}

pub trait Provisionr: Send + Sync {
    /// Provider id this facade handles, e.g. `amazon`
    fn id(&self) -> &str;

    /// Provider built from process-wide configuration, if any
    fn default_provider(&self) -> Option<Provider>;

    /// Start managing a pool under `business_key`. Needs a tokio runtime.
    /// Returns the process id.
    fn start_pool_management_process(&self, business_key: &str, spec: PoolSpec) -> Result<String>;

    fn get_pool_instance(&self, business_key: &str) -> Result<PoolInstance>;

    /// Pools that have not reached a terminal state
    fn list_pool_instances(&self) -> Vec<PoolInstance>;

    /// Ask the pool to terminate. A pool already terminating or terminated
    /// is left alone.
    fn trigger_pool_management_process_termination(&self, business_key: &str) -> Result<()>;
}

/// State shared by the backend facades
pub struct ProvisionrCore {
    orchestrator: Orchestrator,
    clients: ClientCache,
    launcher: Launcher,
    bootstrapper: Arc<dyn Bootstrapper>,
    settings: LifecycleSettings,
}

impl ProvisionrCore {
    pub fn new(factory: Arc<dyn ClientFactory>, launcher: Launcher, settings: LifecycleSettings) -> Self {
        Self {
            orchestrator: Orchestrator::new(),
            clients: ClientCache::new(factory),
            launcher,
            bootstrapper: Arc::new(LoggingBootstrapper::default()),
            settings,
        }
    }

    /// Share a process registry with other facades
    pub fn with_orchestrator(mut self, orchestrator: Orchestrator) -> Self {
        self.orchestrator = orchestrator;
        self
    }

    pub fn with_bootstrapper(mut self, bootstrapper: Arc<dyn Bootstrapper>) -> Self {
        self.bootstrapper = bootstrapper;
        self
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn start(&self, provider_id: &str, business_key: &str, spec: PoolSpec) -> Result<String> {
        if business_key.trim().is_empty() {
            return Err(Error::validation("business key cannot be empty"));
        }
        if spec.provider().id != provider_id {
            return Err(Error::validation(format!(
                "pool targets provider {}, this facade handles {}",
                spec.provider().id,
                provider_id
            )));
        }

        let client = self.clients.get(spec.provider())?;
        let lifecycle = PoolLifecycle::new(
            client,
            self.launcher.clone(),
            self.bootstrapper.clone(),
            self.settings.clone(),
        );
        let context = PoolContext::new(business_key, spec);
        self.orchestrator
            .start_process(context, move |process| lifecycle.run(process))
    }

    pub fn get(&self, business_key: &str) -> Result<PoolInstance> {
        let context = self.orchestrator.variables(business_key)?;
        Ok(PoolInstance {
            key: context.business_key,
            machines: context.machines,
            status: status_of(context.status).to_string(),
            pool_spec: context.spec,
        })
    }

    pub fn list(&self) -> Vec<PoolInstance> {
        self.orchestrator
            .active_keys()
            .iter()
            .filter_map(|key| self.get(key).ok())
            .collect()
    }

    pub fn terminate(&self, business_key: &str) -> Result<()> {
        let status = self.orchestrator.status(business_key)?;
        if status.is_some_and(|s| s.is_shutting_down()) {
            tracing::debug!(pool = %business_key, status = %status_of(status), "Pool already shutting down");
            return Ok(());
        }

        match self.orchestrator.signal(business_key, Signal::Terminate) {
            Err(e) if e.is_not_found() => {
                // The process may have finished between the two reads
                let status = self.orchestrator.status(business_key)?;
                if status.is_some_and(|s| s.is_shutting_down()) {
                    Ok(())
                } else {
                    Err(e)
                }
            }
            other => other,
        }
    }
}
