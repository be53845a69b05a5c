//! Network ingress rules

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// CIDR matching every IPv4 source
pub const ANY_SOURCE: &str = "0.0.0.0/0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    All,
}

impl Protocol {
    pub fn has_ports(self) -> bool {
        matches!(self, Protocol::Tcp | Protocol::Udp)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
            Protocol::Icmp => write!(f, "icmp"),
            Protocol::All => write!(f, "all"),
        }
    }
}

/// Inclusive port range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortRange {
    pub from: u16,
    pub to: u16,
}

impl PortRange {
    pub fn single(port: u16) -> Self {
        Self { from: port, to: port }
    }
}

/// A single allowed-traffic tuple
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rule {
    pub cidr: String,
    pub protocol: Protocol,
    pub ports: Option<PortRange>,
}

impl Rule {
    pub fn builder() -> RuleBuilder {
        RuleBuilder::default()
    }

    pub fn is_any_source(&self) -> bool {
        self.cidr == ANY_SOURCE
    }

    pub fn validate(&self) -> Result<()> {
        validate_cidr(&self.cidr)?;
        match (self.protocol.has_ports(), self.ports) {
            (true, None) => Err(Error::validation(format!(
                "{} rule for {} requires a port",
                self.protocol, self.cidr
            ))),
            (true, Some(range)) if range.from == 0 || range.from > range.to => {
                Err(Error::validation(format!(
                    "invalid port range {}-{}",
                    range.from, range.to
                )))
            }
            (false, Some(_)) => Err(Error::validation(format!(
                "{} rules do not take ports",
                self.protocol
            ))),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ports {
            Some(range) if range.from == range.to => {
                write!(f, "{}/{} from {}", self.protocol, range.from, self.cidr)
            }
            Some(range) => write!(f, "{}/{}-{} from {}", self.protocol, range.from, range.to, self.cidr),
            None => write!(f, "{} from {}", self.protocol, self.cidr),
        }
    }
}

fn validate_cidr(cidr: &str) -> Result<()> {
    let (addr, prefix) = cidr
        .split_once('/')
        .ok_or_else(|| Error::validation(format!("source {} is not a CIDR block", cidr)))?;
    let addr: IpAddr = addr
        .parse()
        .map_err(|_| Error::validation(format!("source {} has an invalid address", cidr)))?;
    let prefix: u8 = prefix
        .parse()
        .map_err(|_| Error::validation(format!("source {} has an invalid prefix", cidr)))?;
    let max = if addr.is_ipv4() { 32 } else { 128 };
    if prefix > max {
        return Err(Error::validation(format!("source {} prefix exceeds /{}", cidr, max)));
    }
    Ok(())
}

pub struct RuleBuilder {
    cidr: String,
    protocol: Protocol,
    ports: Option<PortRange>,
}

impl Default for RuleBuilder {
    fn default() -> Self {
        Self {
            cidr: ANY_SOURCE.to_string(),
            protocol: Protocol::Tcp,
            ports: None,
        }
    }
}

impl RuleBuilder {
    pub fn any_source(mut self) -> Self {
        self.cidr = ANY_SOURCE.to_string();
        self
    }

    pub fn cidr(mut self, cidr: impl Into<String>) -> Self {
        self.cidr = cidr.into();
        self
    }

    pub fn tcp(mut self) -> Self {
        self.protocol = Protocol::Tcp;
        self
    }

    pub fn udp(mut self) -> Self {
        self.protocol = Protocol::Udp;
        self
    }

    pub fn icmp(mut self) -> Self {
        self.protocol = Protocol::Icmp;
        self
    }

    pub fn all_protocols(mut self) -> Self {
        self.protocol = Protocol::All;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.ports = Some(PortRange::single(port));
        self
    }

    pub fn port_range(mut self, from: u16, to: u16) -> Self {
        self.ports = Some(PortRange { from, to });
        self
    }

    pub fn build(self) -> Result<Rule> {
        let rule = Rule {
            cidr: self.cidr,
            protocol: self.protocol,
            ports: self.ports,
        };
        rule.validate()?;
        Ok(rule)
    }
}

/// Ingress rules for a pool. Rules form a set: order is irrelevant and
/// duplicates collapse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Network {
    pub ingress: BTreeSet<Rule>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl Network {
    pub fn builder() -> NetworkBuilder {
        NetworkBuilder::default()
    }

    pub fn option(&self, name: &str) -> Option<&str> {
        self.options.get(name).map(String::as_str)
    }

    pub fn validate(&self) -> Result<()> {
        self.ingress.iter().try_for_each(Rule::validate)
    }
}

#[derive(Default)]
pub struct NetworkBuilder {
    network: Network,
}

impl NetworkBuilder {
    pub fn rule(mut self, rule: Rule) -> Self {
        self.network.ingress.insert(rule);
        self
    }

    pub fn rules(mut self, rules: impl IntoIterator<Item = Rule>) -> Self {
        self.network.ingress.extend(rules);
        self
    }

    pub fn option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.network.options.insert(name.into(), value.into());
        self
    }

    pub fn build(self) -> Network {
        self.network
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rules_collapse_as_set() {
        let ssh = Rule::builder().any_source().tcp().port(22).build().unwrap();
        let network = Network::builder()
            .rule(ssh.clone())
            .rule(ssh.clone())
            .rule(Rule::builder().icmp().build().unwrap())
            .build();

        assert_eq!(network.ingress.len(), 2);
        assert!(network.ingress.contains(&ssh));
    }

    #[test]
    fn test_rule_order_is_irrelevant() {
        let a = Rule::builder().tcp().port(22).build().unwrap();
        let b = Rule::builder().udp().port(53).build().unwrap();

        let first = Network::builder().rule(a.clone()).rule(b.clone()).build();
        let second = Network::builder().rule(b).rule(a).build();
        assert_eq!(first, second);
    }

    #[test]
    fn test_rule_validation() {
        assert!(Rule::builder().tcp().build().is_err());
        assert!(Rule::builder().icmp().port(1).build().is_err());
        assert!(Rule::builder().tcp().port_range(120, 100).build().is_err());
        assert!(Rule::builder().cidr("10.0.0.0/33").tcp().port(80).build().is_err());
        assert!(Rule::builder().cidr("not-a-cidr").udp().port(53).build().is_err());
        assert!(Rule::builder().cidr("10.1.0.0/16").tcp().port_range(100, 120).build().is_ok());
    }

    #[test]
    fn test_rule_display() {
        let rule = Rule::builder().any_source().tcp().port(8088).build().unwrap();
        assert_eq!(rule.to_string(), "tcp/8088 from 0.0.0.0/0");
    }
}
