//! Cloud provider identity and options

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Well-known option names read from [`Provider::options`] and
/// [`crate::models::Network::options`]
pub mod options {
    pub const REGION: &str = "region";
    pub const DEFAULT_REGION: &str = "us-east-1";

    pub const BASE_OPERATING_SYSTEM_VERSION: &str = "baseOperatingSystemVersion";
    pub const DEFAULT_BASE_OPERATING_SYSTEM_VERSION: &str = "12.04";

    /// Presence switches the launcher to one-time spot requests at this price
    pub const SPOT_BID: &str = "spotBid";

    /// CloudStack only: launch into an existing network instead of the default one
    pub const EXISTING_NETWORK_ID: &str = "existingNetworkId";

    /// CloudStack only: zone and offering used to create a pool network
    pub const ZONE_ID: &str = "zoneId";
    pub const NETWORK_OFFERING_ID: &str = "networkOfferingId";
}

#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    pub endpoint: Option<String>,
    pub access_key: String,
    pub secret_key: String,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl Provider {
    pub fn builder() -> ProviderBuilder {
        ProviderBuilder::default()
    }

    pub fn to_builder(&self) -> ProviderBuilder {
        ProviderBuilder {
            provider: self.clone(),
        }
    }

    pub fn option(&self, name: &str) -> Option<&str> {
        self.options.get(name).map(String::as_str)
    }

    pub fn option_or<'a>(&'a self, name: &str, default: &'a str) -> &'a str {
        self.option(name).unwrap_or(default)
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::validation("provider id cannot be empty"));
        }
        if let Some(endpoint) = &self.endpoint {
            if endpoint.trim().is_empty() {
                return Err(Error::validation("provider endpoint cannot be blank"));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("options", &self.options)
            .finish()
    }
}

#[derive(Default)]
pub struct ProviderBuilder {
    provider: Provider,
}

impl ProviderBuilder {
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.provider.id = id.into();
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.provider.endpoint = Some(endpoint.into());
        self
    }

    pub fn access_key(mut self, key: impl Into<String>) -> Self {
        self.provider.access_key = key.into();
        self
    }

    pub fn secret_key(mut self, key: impl Into<String>) -> Self {
        self.provider.secret_key = key.into();
        self
    }

    pub fn option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.provider.options.insert(name.into(), value.into());
        self
    }

    pub fn options(mut self, options: BTreeMap<String, String>) -> Self {
        self.provider.options = options;
        self
    }

    pub fn build(self) -> Result<Provider> {
        self.provider.validate()?;
        Ok(self.provider)
    }
}
