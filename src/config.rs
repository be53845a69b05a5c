//! Process-wide configuration with builder pattern

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::Provider;
use crate::pool::LifecycleSettings;
use crate::retry::RetryPolicy;
use crate::{Error, Result};

/// Credentials used when a caller asks a facade for its default provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultProviderConfig {
    pub access_key: String,
    pub secret_key: String,
    pub endpoint: Option<String>,
    pub options: BTreeMap<String, String>,
}

impl DefaultProviderConfig {
    /// Provider for facade `id`, or `None` when no credentials are set
    pub fn create_provider(&self, id: &str) -> Option<Provider> {
        if self.access_key.trim().is_empty() {
            return None;
        }
        let mut builder = Provider::builder()
            .id(id)
            .access_key(self.access_key.clone())
            .secret_key(self.secret_key.clone())
            .options(self.options.clone());
        if let Some(endpoint) = &self.endpoint {
            builder = builder.endpoint(endpoint.clone());
        }
        match builder.build() {
            Ok(provider) => Some(provider),
            Err(e) => {
                tracing::warn!(provider = %id, error = %e, "Ignoring invalid default provider configuration");
                None
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionrConfig {
    pub default_provider: Option<DefaultProviderConfig>,
    pub poll_interval_ms: u64,
    pub machine_wait_timeout_secs: u64,
    pub termination_timeout_secs: u64,
    pub spot_request_validity_secs: u64,
    pub retry: RetryPolicy,
    /// Image tables by provider id, overriding the built-in ones
    pub image_tables: BTreeMap<String, PathBuf>,
}

impl Default for ProvisionrConfig {
    fn default() -> Self {
        Self {
            default_provider: None,
            poll_interval_ms: 2_000,
            machine_wait_timeout_secs: 600,
            termination_timeout_secs: 300,
            spot_request_validity_secs: 600,
            retry: RetryPolicy::default(),
            image_tables: BTreeMap::new(),
        }
    }
}

impl ProvisionrConfig {
    pub fn builder() -> ProvisionrConfigBuilder {
        ProvisionrConfigBuilder::default()
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(Error::Config("poll_interval_ms must be positive".into()));
        }
        if self.machine_wait_timeout_secs == 0 {
            return Err(Error::Config("machine_wait_timeout_secs must be positive".into()));
        }
        if self.spot_request_validity_secs == 0 {
            return Err(Error::Config("spot_request_validity_secs must be positive".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.call_timeout_secs == 0 {
            return Err(Error::Config("retry.call_timeout_secs must be positive".into()));
        }
        if self.retry.min_delay_ms > self.retry.max_delay_ms {
            return Err(Error::Config("retry.min_delay_ms cannot exceed retry.max_delay_ms".into()));
        }
        Ok(())
    }

    pub fn lifecycle_settings(&self) -> LifecycleSettings {
        LifecycleSettings {
            retry: self.retry.clone(),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            machine_wait_timeout: Duration::from_secs(self.machine_wait_timeout_secs),
            termination_timeout: Duration::from_secs(self.termination_timeout_secs),
        }
    }

    pub fn spot_request_validity(&self) -> Duration {
        Duration::from_secs(self.spot_request_validity_secs)
    }

    pub fn default_provider_for(&self, id: &str) -> Option<Provider> {
        self.default_provider.as_ref()?.create_provider(id)
    }
}

#[derive(Default)]
pub struct ProvisionrConfigBuilder {
    config: ProvisionrConfig,
}

impl ProvisionrConfigBuilder {
    pub fn default_provider(mut self, provider: DefaultProviderConfig) -> Self {
        self.config.default_provider = Some(provider);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn machine_wait_timeout(mut self, timeout: Duration) -> Self {
        self.config.machine_wait_timeout_secs = timeout.as_secs();
        self
    }

    pub fn termination_timeout(mut self, timeout: Duration) -> Self {
        self.config.termination_timeout_secs = timeout.as_secs();
        self
    }

    pub fn spot_request_validity(mut self, validity: Duration) -> Self {
        self.config.spot_request_validity_secs = validity.as_secs();
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn image_table(mut self, provider_id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.config.image_tables.insert(provider_id.into(), path.into());
        self
    }

    pub fn build(self) -> Result<ProvisionrConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
