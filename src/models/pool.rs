//! Pool specification and pool snapshots

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{AdminAccess, Hardware, Machine, Network, Provider, Software};
use crate::{Error, Result};

/// Default bootstrap deadline (15 minutes)
pub const DEFAULT_BOOTSTRAP_TIME_SECS: u32 = 15 * 60;

/// Declarative description of a pool of machines.
///
/// Built through [`PoolSpecBuilder`], which rejects the first violated
/// constraint. Deserialization goes through the same checks, so a `PoolSpec`
/// value is always valid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "PoolSpecFields")]
pub struct PoolSpec {
    provider: Provider,
    network: Network,
    admin_access: AdminAccess,
    software: Software,
    hardware: Hardware,
    min_size: u32,
    expected_size: u32,
    bootstrap_time_in_seconds: u32,
    options: BTreeMap<String, String>,
}

impl PoolSpec {
    pub fn builder() -> PoolSpecBuilder {
        PoolSpecBuilder::default()
    }

    pub fn to_builder(&self) -> PoolSpecBuilder {
        PoolSpecBuilder {
            provider: Some(self.provider.clone()),
            network: Some(self.network.clone()),
            admin_access: Some(self.admin_access.clone()),
            software: Some(self.software.clone()),
            hardware: Some(self.hardware.clone()),
            min_size: self.min_size,
            expected_size: self.expected_size,
            bootstrap_time_in_seconds: Some(self.bootstrap_time_in_seconds),
            options: self.options.clone(),
        }
    }

    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn admin_access(&self) -> &AdminAccess {
        &self.admin_access
    }

    pub fn software(&self) -> &Software {
        &self.software
    }

    pub fn hardware(&self) -> &Hardware {
        &self.hardware
    }

    pub fn min_size(&self) -> u32 {
        self.min_size
    }

    pub fn expected_size(&self) -> u32 {
        self.expected_size
    }

    pub fn bootstrap_time_in_seconds(&self) -> u32 {
        self.bootstrap_time_in_seconds
    }

    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }

    pub fn option(&self, name: &str) -> Option<&str> {
        self.options.get(name).map(String::as_str)
    }
}

#[derive(Default)]
pub struct PoolSpecBuilder {
    provider: Option<Provider>,
    network: Option<Network>,
    admin_access: Option<AdminAccess>,
    software: Option<Software>,
    hardware: Option<Hardware>,
    min_size: u32,
    expected_size: u32,
    /// `None` until set; falls back to [`DEFAULT_BOOTSTRAP_TIME_SECS`]
    bootstrap_time_in_seconds: Option<u32>,
    options: BTreeMap<String, String>,
}

impl PoolSpecBuilder {
    pub fn provider(mut self, provider: Provider) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn network(mut self, network: Network) -> Self {
        self.network = Some(network);
        self
    }

    pub fn admin_access(mut self, admin_access: AdminAccess) -> Self {
        self.admin_access = Some(admin_access);
        self
    }

    pub fn software(mut self, software: Software) -> Self {
        self.software = Some(software);
        self
    }

    pub fn hardware(mut self, hardware: Hardware) -> Self {
        self.hardware = Some(hardware);
        self
    }

    pub fn min_size(mut self, min_size: u32) -> Self {
        self.min_size = min_size;
        self
    }

    pub fn expected_size(mut self, expected_size: u32) -> Self {
        self.expected_size = expected_size;
        self
    }

    pub fn bootstrap_time_in_seconds(mut self, seconds: u32) -> Self {
        self.bootstrap_time_in_seconds = Some(seconds);
        self
    }

    pub fn option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(name.into(), value.into());
        self
    }

    pub fn build(self) -> Result<PoolSpec> {
        let provider = self.provider.ok_or_else(|| Error::validation("provider is required"))?;
        let network = self.network.ok_or_else(|| Error::validation("network is required"))?;
        let admin_access = self
            .admin_access
            .ok_or_else(|| Error::validation("adminAccess is required"))?;
        let software = self.software.ok_or_else(|| Error::validation("software is required"))?;
        let hardware = self.hardware.ok_or_else(|| Error::validation("hardware is required"))?;

        if self.min_size == 0 {
            return Err(Error::validation("minSize should be positive"));
        }
        if self.expected_size == 0 {
            return Err(Error::validation("expectedSize should be positive"));
        }
        let bootstrap_time_in_seconds = match self.bootstrap_time_in_seconds {
            Some(0) => return Err(Error::validation("bootstrapTimeInSeconds should be positive")),
            Some(seconds) => seconds,
            None => DEFAULT_BOOTSTRAP_TIME_SECS,
        };
        if self.min_size > self.expected_size {
            return Err(Error::validation(format!(
                "minSize ({}) cannot exceed expectedSize ({})",
                self.min_size, self.expected_size
            )));
        }

        provider.validate()?;
        network.validate()?;
        admin_access.validate()?;
        software.validate()?;
        hardware.validate()?;

        Ok(PoolSpec {
            provider,
            network,
            admin_access,
            software,
            hardware,
            min_size: self.min_size,
            expected_size: self.expected_size,
            bootstrap_time_in_seconds,
            options: self.options,
        })
    }
}

/// Wire shape of [`PoolSpec`]; converted through the builder on decode
#[derive(Deserialize)]
struct PoolSpecFields {
    provider: Provider,
    network: Network,
    admin_access: AdminAccess,
    software: Software,
    hardware: Hardware,
    min_size: u32,
    expected_size: u32,
    #[serde(default)]
    bootstrap_time_in_seconds: Option<u32>,
    #[serde(default)]
    options: BTreeMap<String, String>,
}

impl TryFrom<PoolSpecFields> for PoolSpec {
    type Error = Error;

    fn try_from(fields: PoolSpecFields) -> Result<Self> {
        PoolSpecBuilder {
            provider: Some(fields.provider),
            network: Some(fields.network),
            admin_access: Some(fields.admin_access),
            software: Some(fields.software),
            hardware: Some(fields.hardware),
            min_size: fields.min_size,
            expected_size: fields.expected_size,
            bootstrap_time_in_seconds: fields.bootstrap_time_in_seconds,
            options: fields.options,
        }
        .build()
    }
}

/// Read-only snapshot of a running pool, rebuilt on every query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolInstance {
    pub key: String,
    pub machines: Vec<Machine>,
    pub status: String,
    pub pool_spec: PoolSpec,
}
