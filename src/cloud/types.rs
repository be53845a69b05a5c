//! Request and response shapes exchanged with providers

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{BlockDevice, Machine, Protocol, Rule};

/// Provider-side form of one ingress rule. Ports are `-1` when the protocol
/// has none.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IpPermission {
    pub protocol: String,
    pub from_port: i32,
    pub to_port: i32,
    pub cidr: String,
}

impl IpPermission {
    pub fn new(protocol: impl Into<String>, from_port: i32, to_port: i32, cidr: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            from_port,
            to_port,
            cidr: cidr.into(),
        }
    }
}

impl From<&Rule> for IpPermission {
    fn from(rule: &Rule) -> Self {
        let protocol = match rule.protocol {
            Protocol::All => "-1".to_string(),
            other => other.to_string(),
        };
        let (from_port, to_port) = match rule.ports {
            Some(range) if rule.protocol.has_ports() => (i32::from(range.from), i32::from(range.to)),
            _ => (-1, -1),
        };
        Self {
            protocol,
            from_port,
            to_port,
            cidr: rule.cidr.clone(),
        }
    }
}

impl fmt::Display for IpPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{} from {}", self.protocol, self.from_port, self.to_port, self.cidr)
    }
}

/// Everything needed to boot one kind of machine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchRequest {
    pub image_id: String,
    pub instance_type: String,
    pub security_group: String,
    pub key_name: String,
    /// Volumes are always deleted with the instance
    pub block_devices: Vec<BlockDevice>,
    /// Existing network to attach to, when the provider supports it
    pub network_id: Option<String>,
}

/// Bid parameters for a one-time spot request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpotRequest {
    pub price: String,
    pub count: u32,
    pub launch_group: String,
    pub valid_until: DateTime<Utc>,
    /// Replaying a token returns the requests created the first time
    pub client_token: String,
}

/// A provider-side guest network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkDescription {
    pub network_id: String,
    pub name: String,
    pub zone_id: String,
}

/// Result of an on-demand launch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub reservation_id: String,
    pub instance_ids: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    Pending,
    Running,
    ShuttingDown,
    Terminated,
    Stopping,
    Stopped,
}

impl InstanceState {
    pub fn is_gone(self) -> bool {
        matches!(self, InstanceState::Terminated)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDescription {
    pub instance_id: String,
    pub state: InstanceState,
    pub public_dns_name: String,
    pub public_ip: String,
    pub private_dns_name: String,
    pub private_ip: String,
}

impl InstanceDescription {
    pub fn is_running(&self) -> bool {
        self.state == InstanceState::Running
    }

    pub fn to_machine(&self) -> Machine {
        Machine {
            external_id: self.instance_id.clone(),
            public_dns_name: self.public_dns_name.clone(),
            public_ip: self.public_ip.clone(),
            private_dns_name: self.private_dns_name.clone(),
            private_ip: self.private_ip.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpotRequestState {
    Open,
    Active,
    Cancelled,
    Closed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpotRequestDescription {
    pub request_id: String,
    pub state: SpotRequestState,
    pub instance_id: Option<String>,
}
