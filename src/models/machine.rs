//! Machine model

use serde::{Deserialize, Serialize};

/// A launched machine as reported by the provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Machine {
    pub external_id: String,
    pub public_dns_name: String,
    pub public_ip: String,
    pub private_dns_name: String,
    pub private_ip: String,
}

impl Machine {
    /// Loopback machine for local test doubles
    pub fn localhost(external_id: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            public_dns_name: "localhost".into(),
            public_ip: "127.0.0.1".into(),
            private_dns_name: "localhost".into(),
            private_ip: "127.0.0.1".into(),
        }
    }

    /// Address to use for SSH, preferring the public side
    pub fn address(&self) -> &str {
        if !self.public_ip.is_empty() {
            &self.public_ip
        } else if !self.public_dns_name.is_empty() {
            &self.public_dns_name
        } else {
            &self.private_ip
        }
    }
}
