//! In-memory provider backend
//!
//! Behaves like a small, eventually consistent cloud: instances boot after a
//! number of describe calls, spot requests are fulfilled the same way, and
//! duplicate creates fail with the provider's duplicate codes. Failures can
//! be injected per operation and operations can be made to hang. Used by the
//! CLI and by tests.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::api::{CloudClient, InstanceApi, KeyPairApi, NetworkApi, SecurityGroupApi};
use super::cache::ClientFactory;
use super::error::{ProviderError, ProviderResult};
use super::types::{
    InstanceDescription, InstanceState, IpPermission, LaunchRequest, NetworkDescription, Reservation,
    SpotRequest, SpotRequestDescription, SpotRequestState,
};
use crate::key_pair::fingerprint_public_key;
use crate::models::Provider;

/// Operations that can be counted or made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateSecurityGroup,
    DescribeSecurityGroup,
    AuthorizeIngress,
    RevokeIngress,
    DeleteSecurityGroup,
    ImportKeyPair,
    DescribeKeyPair,
    DeleteKeyPair,
    RunInstances,
    RequestSpotInstances,
    DescribeInstances,
    DescribeSpotRequests,
    CancelSpotRequests,
    TerminateInstances,
    DescribeNetwork,
    FindNetwork,
    CreateNetwork,
    DeleteNetwork,
}

#[derive(Debug, Clone)]
struct InstanceRecord {
    description: InstanceDescription,
    /// Describe and terminate calls that named this instance
    describes: u32,
}

#[derive(Debug, Clone)]
struct SpotRecord {
    description: SpotRequestDescription,
    launch: LaunchRequest,
    describes: u32,
}

/// Everything handed to `run_instances` or `request_spot_instances`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRecord {
    pub request: LaunchRequest,
    pub min: u32,
    pub max: u32,
    pub client_token: Option<String>,
    pub spot: Option<SpotRequest>,
}

#[derive(Debug)]
struct State {
    groups: HashMap<String, HashSet<IpPermission>>,
    key_pairs: HashMap<String, String>,
    instances: BTreeMap<String, InstanceRecord>,
    reservations: HashMap<String, Reservation>,
    spot_requests: BTreeMap<String, SpotRecord>,
    spot_tokens: HashMap<String, Vec<String>>,
    networks: BTreeMap<String, NetworkDescription>,
    launches: Vec<LaunchRecord>,
    failures: HashMap<Operation, VecDeque<ProviderError>>,
    stalled: HashSet<Operation>,
    calls: HashMap<Operation, usize>,
    next_id: u64,
    boot_after: u32,
    visibility_lag: u32,
    spot_fulfilment: bool,
    capacity: Option<usize>,
}

impl State {
    fn enter(&mut self, operation: Operation) -> ProviderResult<()> {
        *self.calls.entry(operation).or_insert(0) += 1;
        match self.failures.get_mut(&operation).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{:08x}", prefix, self.next_id)
    }

    /// First of `instance_ids` still hidden by the visibility lag
    fn hidden_instance<'a>(&self, instance_ids: &'a [String]) -> Option<&'a String> {
        instance_ids.iter().find(|id| {
            self.instances
                .get(*id)
                .is_some_and(|r| r.describes <= self.visibility_lag)
        })
    }

    fn live_instances(&self) -> usize {
        self.instances
            .values()
            .filter(|r| {
                !matches!(
                    r.description.state,
                    InstanceState::ShuttingDown | InstanceState::Terminated
                )
            })
            .count()
    }

    fn spawn_instance(&mut self) -> String {
        let id = self.next_id("i");
        let n = self.next_id;
        let description = InstanceDescription {
            instance_id: id.clone(),
            state: InstanceState::Pending,
            public_dns_name: String::new(),
            public_ip: String::new(),
            private_dns_name: format!("ip-10-0-{}-{}.internal", n / 256, n % 256),
            private_ip: format!("10.0.{}.{}", n / 256, n % 256),
        };
        self.instances.insert(
            id.clone(),
            InstanceRecord {
                description,
                describes: 0,
            },
        );
        id
    }
}

/// Thread-safe, cloneable handle; clones share state
#[derive(Debug, Clone)]
pub struct InMemoryCloud {
    state: Arc<Mutex<State>>,
}

impl Default for InMemoryCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCloud {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                groups: HashMap::new(),
                key_pairs: HashMap::new(),
                instances: BTreeMap::new(),
                reservations: HashMap::new(),
                spot_requests: BTreeMap::new(),
                spot_tokens: HashMap::new(),
                networks: BTreeMap::new(),
                launches: Vec::new(),
                failures: HashMap::new(),
                stalled: HashSet::new(),
                calls: HashMap::new(),
                next_id: 0,
                boot_after: 1,
                visibility_lag: 0,
                spot_fulfilment: true,
                capacity: None,
            })),
        }
    }

    /// Instances report `running` once they were described this many times
    pub fn with_boot_after(self, describes: u32) -> Self {
        self.state.lock().boot_after = describes;
        self
    }

    /// New instances are unknown to describe and terminate calls for this
    /// many calls
    pub fn with_visibility_lag(self, describes: u32) -> Self {
        self.state.lock().visibility_lag = describes;
        self
    }

    /// Cap on instances that can be alive at once
    pub fn with_capacity(self, instances: usize) -> Self {
        self.state.lock().capacity = Some(instances);
        self
    }

    /// When false, spot requests stay open forever
    pub fn with_spot_fulfilment(self, fulfil: bool) -> Self {
        self.state.lock().spot_fulfilment = fulfil;
        self
    }

    /// Fail the next call of `operation` with `error`. Queued errors are
    /// returned in order.
    pub fn fail_next(&self, operation: Operation, error: ProviderError) {
        self.state.lock().failures.entry(operation).or_default().push_back(error);
    }

    /// Every later call of `operation` hangs forever
    pub fn stall(&self, operation: Operation) {
        self.state.lock().stalled.insert(operation);
    }

    async fn checkpoint(&self, operation: Operation) {
        let stalled = {
            let mut state = self.state.lock();
            let stalled = state.stalled.contains(&operation);
            if stalled {
                *state.calls.entry(operation).or_insert(0) += 1;
            }
            stalled
        };
        if stalled {
            tracing::trace!(?operation, "Stalling provider call");
            std::future::pending::<()>().await;
        }
    }

    /// Factory handing out this cloud for every provider
    pub fn factory(&self) -> Arc<dyn ClientFactory> {
        let cloud = self.clone();
        Arc::new(move |_: &Provider| -> crate::Result<Arc<dyn CloudClient>> { Ok(Arc::new(cloud.clone())) })
    }

    pub fn calls(&self, operation: Operation) -> usize {
        self.state.lock().calls.get(&operation).copied().unwrap_or(0)
    }

    pub fn put_security_group(&self, name: &str, permissions: impl IntoIterator<Item = IpPermission>) {
        self.state
            .lock()
            .groups
            .insert(name.to_string(), permissions.into_iter().collect());
    }

    pub fn security_group(&self, name: &str) -> Option<HashSet<IpPermission>> {
        self.state.lock().groups.get(name).cloned()
    }

    pub fn put_key_pair(&self, name: &str, fingerprint: &str) {
        self.state
            .lock()
            .key_pairs
            .insert(name.to_string(), fingerprint.to_string());
    }

    pub fn key_pair_fingerprint(&self, name: &str) -> Option<String> {
        self.state.lock().key_pairs.get(name).cloned()
    }

    pub fn instance_state(&self, instance_id: &str) -> Option<InstanceState> {
        self.state
            .lock()
            .instances
            .get(instance_id)
            .map(|r| r.description.state)
    }

    /// Instances neither terminated nor shutting down
    pub fn live_instances(&self) -> usize {
        self.state.lock().live_instances()
    }

    pub fn spot_request_state(&self, request_id: &str) -> Option<SpotRequestState> {
        self.state
            .lock()
            .spot_requests
            .get(request_id)
            .map(|r| r.description.state)
    }

    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.state.lock().launches.clone()
    }

    /// Returns the id of the network
    pub fn put_network(&self, name: &str, zone_id: &str) -> String {
        let mut state = self.state.lock();
        let network_id = state.next_id("net");
        state.networks.insert(
            network_id.clone(),
            NetworkDescription {
                network_id: network_id.clone(),
                name: name.to_string(),
                zone_id: zone_id.to_string(),
            },
        );
        network_id
    }

    pub fn network(&self, network_id: &str) -> Option<NetworkDescription> {
        self.state.lock().networks.get(network_id).cloned()
    }

    pub fn network_named(&self, name: &str) -> Option<NetworkDescription> {
        self.state.lock().networks.values().find(|n| n.name == name).cloned()
    }
}

fn not_found(code: &str, id: &str) -> ProviderError {
    ProviderError::from_code(code, format!("{} does not exist", id))
}

#[async_trait]
impl SecurityGroupApi for InMemoryCloud {
    async fn create_security_group(&self, name: &str, _description: &str) -> ProviderResult<()> {
        self.checkpoint(Operation::CreateSecurityGroup).await;
        let mut state = self.state.lock();
        state.enter(Operation::CreateSecurityGroup)?;
        if state.groups.contains_key(name) {
            return Err(ProviderError::from_code(
                "InvalidGroup.Duplicate",
                format!("The security group '{}' already exists", name),
            ));
        }
        state.groups.insert(name.to_string(), HashSet::new());
        Ok(())
    }

    async fn describe_security_group(&self, name: &str) -> ProviderResult<HashSet<IpPermission>> {
        self.checkpoint(Operation::DescribeSecurityGroup).await;
        let mut state = self.state.lock();
        state.enter(Operation::DescribeSecurityGroup)?;
        state
            .groups
            .get(name)
            .cloned()
            .ok_or_else(|| not_found("InvalidGroup.NotFound", name))
    }

    async fn authorize_ingress(&self, name: &str, permissions: Vec<IpPermission>) -> ProviderResult<()> {
        self.checkpoint(Operation::AuthorizeIngress).await;
        let mut state = self.state.lock();
        state.enter(Operation::AuthorizeIngress)?;
        let group = state
            .groups
            .get_mut(name)
            .ok_or_else(|| not_found("InvalidGroup.NotFound", name))?;
        if let Some(existing) = permissions.iter().find(|p| group.contains(*p)) {
            return Err(ProviderError::from_code(
                "InvalidPermission.Duplicate",
                format!("permission {} already exists on {}", existing, name),
            ));
        }
        group.extend(permissions);
        Ok(())
    }

    async fn revoke_ingress(&self, name: &str, permissions: Vec<IpPermission>) -> ProviderResult<()> {
        self.checkpoint(Operation::RevokeIngress).await;
        let mut state = self.state.lock();
        state.enter(Operation::RevokeIngress)?;
        let group = state
            .groups
            .get_mut(name)
            .ok_or_else(|| not_found("InvalidGroup.NotFound", name))?;
        for permission in &permissions {
            group.remove(permission);
        }
        Ok(())
    }

    async fn delete_security_group(&self, name: &str) -> ProviderResult<()> {
        self.checkpoint(Operation::DeleteSecurityGroup).await;
        let mut state = self.state.lock();
        state.enter(Operation::DeleteSecurityGroup)?;
        state
            .groups
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| not_found("InvalidGroup.NotFound", name))
    }
}

#[async_trait]
impl KeyPairApi for InMemoryCloud {
    async fn import_key_pair(&self, name: &str, public_key: &str) -> ProviderResult<()> {
        self.checkpoint(Operation::ImportKeyPair).await;
        let mut state = self.state.lock();
        state.enter(Operation::ImportKeyPair)?;
        if state.key_pairs.contains_key(name) {
            return Err(ProviderError::from_code(
                "InvalidKeyPair.Duplicate",
                format!("The keypair '{}' already exists", name),
            ));
        }
        let fingerprint = fingerprint_public_key(public_key)
            .map_err(|e| ProviderError::from_code("InvalidKeyPair.Format", e.to_string()))?;
        state.key_pairs.insert(name.to_string(), fingerprint);
        Ok(())
    }

    async fn describe_key_pair(&self, name: &str) -> ProviderResult<String> {
        self.checkpoint(Operation::DescribeKeyPair).await;
        let mut state = self.state.lock();
        state.enter(Operation::DescribeKeyPair)?;
        state
            .key_pairs
            .get(name)
            .cloned()
            .ok_or_else(|| not_found("InvalidKeyPair.NotFound", name))
    }

    async fn delete_key_pair(&self, name: &str) -> ProviderResult<()> {
        self.checkpoint(Operation::DeleteKeyPair).await;
        let mut state = self.state.lock();
        state.enter(Operation::DeleteKeyPair)?;
        // Deleting a missing key pair succeeds, as it does on EC2
        state.key_pairs.remove(name);
        Ok(())
    }
}

#[async_trait]
impl InstanceApi for InMemoryCloud {
    async fn run_instances(
        &self,
        request: &LaunchRequest,
        min: u32,
        max: u32,
        client_token: &str,
    ) -> ProviderResult<Reservation> {
        self.checkpoint(Operation::RunInstances).await;
        let mut state = self.state.lock();
        state.enter(Operation::RunInstances)?;
        state.launches.push(LaunchRecord {
            request: request.clone(),
            min,
            max,
            client_token: Some(client_token.to_string()),
            spot: None,
        });

        if let Some(reservation) = state.reservations.get(client_token) {
            return Ok(reservation.clone());
        }
        if !state.groups.contains_key(&request.security_group) {
            return Err(not_found("InvalidGroup.NotFound", &request.security_group));
        }
        if !state.key_pairs.contains_key(&request.key_name) {
            return Err(not_found("InvalidKeyPair.NotFound", &request.key_name));
        }

        let available = state
            .capacity
            .map(|cap| cap.saturating_sub(state.live_instances()))
            .unwrap_or(usize::MAX);
        if (min as usize) > available {
            return Err(ProviderError::from_code(
                "InsufficientInstanceCapacity",
                format!("only {} instances available, {} requested", available, min),
            ));
        }

        if let Some(network_id) = &request.network_id {
            if !state.networks.contains_key(network_id) {
                return Err(not_found("InvalidNetworkID.NotFound", network_id));
            }
        }

        let count = (max as usize).min(available);
        let instance_ids: Vec<String> = (0..count).map(|_| state.spawn_instance()).collect();
        let reservation = Reservation {
            reservation_id: state.next_id("r"),
            instance_ids,
        };
        state
            .reservations
            .insert(client_token.to_string(), reservation.clone());
        Ok(reservation)
    }

    async fn request_spot_instances(
        &self,
        request: &LaunchRequest,
        spot: &SpotRequest,
    ) -> ProviderResult<Vec<String>> {
        self.checkpoint(Operation::RequestSpotInstances).await;
        let mut state = self.state.lock();
        state.enter(Operation::RequestSpotInstances)?;
        state.launches.push(LaunchRecord {
            request: request.clone(),
            min: spot.count,
            max: spot.count,
            client_token: Some(spot.client_token.clone()),
            spot: Some(spot.clone()),
        });

        if let Some(ids) = state.spot_tokens.get(&spot.client_token) {
            return Ok(ids.clone());
        }

        if spot.price.parse::<f64>().map(|p| p <= 0.0).unwrap_or(true) {
            return Err(ProviderError::from_code(
                "InvalidParameterValue",
                format!("invalid spot price {}", spot.price),
            ));
        }

        let mut ids = Vec::with_capacity(spot.count as usize);
        for _ in 0..spot.count {
            let id = state.next_id("sir");
            state.spot_requests.insert(
                id.clone(),
                SpotRecord {
                    description: SpotRequestDescription {
                        request_id: id.clone(),
                        state: SpotRequestState::Open,
                        instance_id: None,
                    },
                    launch: request.clone(),
                    describes: 0,
                },
            );
            ids.push(id);
        }
        state.spot_tokens.insert(spot.client_token.clone(), ids.clone());
        Ok(ids)
    }

    async fn describe_instances(&self, instance_ids: &[String]) -> ProviderResult<Vec<InstanceDescription>> {
        self.checkpoint(Operation::DescribeInstances).await;
        let mut state = self.state.lock();
        state.enter(Operation::DescribeInstances)?;
        let boot_after = state.boot_after;
        let lag = state.visibility_lag;

        for id in instance_ids {
            let record = state
                .instances
                .get_mut(id)
                .ok_or_else(|| not_found("InvalidInstanceID.NotFound", id))?;
            record.describes += 1;
        }
        if let Some(id) = state.hidden_instance(instance_ids) {
            return Err(not_found("InvalidInstanceID.NotFound", id));
        }

        let mut descriptions = Vec::with_capacity(instance_ids.len());
        for id in instance_ids {
            let Some(record) = state.instances.get_mut(id) else {
                continue;
            };
            let description = &mut record.description;
            match description.state {
                InstanceState::Pending if record.describes >= boot_after.saturating_add(lag) => {
                    description.state = InstanceState::Running;
                    description.public_ip = description.private_ip.replacen("10.", "54.", 1);
                    description.public_dns_name =
                        format!("ec2-{}.compute.amazonaws.com", description.public_ip.replace('.', "-"));
                }
                InstanceState::ShuttingDown => {
                    description.state = InstanceState::Terminated;
                }
                _ => {}
            }
            descriptions.push(description.clone());
        }
        Ok(descriptions)
    }

    async fn describe_spot_requests(&self, request_ids: &[String]) -> ProviderResult<Vec<SpotRequestDescription>> {
        self.checkpoint(Operation::DescribeSpotRequests).await;
        let mut state = self.state.lock();
        state.enter(Operation::DescribeSpotRequests)?;
        let boot_after = state.boot_after;
        let fulfil = state.spot_fulfilment;

        let mut descriptions = Vec::with_capacity(request_ids.len());
        for id in request_ids {
            let ready = {
                let record = state
                    .spot_requests
                    .get_mut(id)
                    .ok_or_else(|| not_found("InvalidSpotInstanceRequestID.NotFound", id))?;
                record.describes += 1;
                fulfil
                    && record.description.state == SpotRequestState::Open
                    && record.describes >= boot_after
            };
            let has_room = state
                .capacity
                .map(|cap| state.live_instances() < cap)
                .unwrap_or(true);

            if ready && has_room {
                let instance_id = state.spawn_instance();
                if let Some(record) = state.spot_requests.get_mut(id) {
                    record.description.state = SpotRequestState::Active;
                    record.description.instance_id = Some(instance_id);
                    tracing::trace!(request = %id, image = %record.launch.image_id, "Fulfilled spot request");
                }
            }
            if let Some(record) = state.spot_requests.get(id) {
                descriptions.push(record.description.clone());
            }
        }
        Ok(descriptions)
    }

    async fn cancel_spot_requests(&self, request_ids: &[String]) -> ProviderResult<()> {
        self.checkpoint(Operation::CancelSpotRequests).await;
        let mut state = self.state.lock();
        state.enter(Operation::CancelSpotRequests)?;
        for id in request_ids {
            let record = state
                .spot_requests
                .get_mut(id)
                .ok_or_else(|| not_found("InvalidSpotInstanceRequestID.NotFound", id))?;
            if matches!(record.description.state, SpotRequestState::Open | SpotRequestState::Active) {
                record.description.state = SpotRequestState::Cancelled;
            }
        }
        Ok(())
    }

    async fn terminate_instances(&self, instance_ids: &[String]) -> ProviderResult<()> {
        self.checkpoint(Operation::TerminateInstances).await;
        let mut state = self.state.lock();
        state.enter(Operation::TerminateInstances)?;
        if let Some(missing) = instance_ids.iter().find(|id| !state.instances.contains_key(*id)) {
            return Err(not_found("InvalidInstanceID.NotFound", missing));
        }
        for id in instance_ids {
            if let Some(record) = state.instances.get_mut(id) {
                record.describes += 1;
            }
        }
        if let Some(id) = state.hidden_instance(instance_ids) {
            return Err(not_found("InvalidInstanceID.NotFound", id));
        }
        for id in instance_ids {
            if let Some(record) = state.instances.get_mut(id) {
                if record.description.state != InstanceState::Terminated {
                    record.description.state = InstanceState::ShuttingDown;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl NetworkApi for InMemoryCloud {
    async fn describe_network(&self, network_id: &str) -> ProviderResult<NetworkDescription> {
        self.checkpoint(Operation::DescribeNetwork).await;
        let mut state = self.state.lock();
        state.enter(Operation::DescribeNetwork)?;
        state
            .networks
            .get(network_id)
            .cloned()
            .ok_or_else(|| not_found("InvalidNetworkID.NotFound", network_id))
    }

    async fn find_network_by_name(&self, name: &str) -> ProviderResult<Option<NetworkDescription>> {
        self.checkpoint(Operation::FindNetwork).await;
        let mut state = self.state.lock();
        state.enter(Operation::FindNetwork)?;
        Ok(state.networks.values().find(|n| n.name == name).cloned())
    }

    async fn create_network(&self, name: &str, zone_id: &str, offering_id: &str) -> ProviderResult<NetworkDescription> {
        self.checkpoint(Operation::CreateNetwork).await;
        let mut state = self.state.lock();
        state.enter(Operation::CreateNetwork)?;
        if state.networks.values().any(|n| n.name == name) {
            return Err(ProviderError::from_code(
                "InvalidNetwork.Duplicate",
                format!("The network '{}' already exists", name),
            ));
        }
        let network = NetworkDescription {
            network_id: state.next_id("net"),
            name: name.to_string(),
            zone_id: zone_id.to_string(),
        };
        tracing::trace!(network = %network.network_id, zone = %zone_id, offering = %offering_id, "Created network");
        state.networks.insert(network.network_id.clone(), network.clone());
        Ok(network)
    }

    async fn delete_network(&self, network_id: &str) -> ProviderResult<()> {
        self.checkpoint(Operation::DeleteNetwork).await;
        let mut state = self.state.lock();
        state.enter(Operation::DeleteNetwork)?;
        state
            .networks
            .remove(network_id)
            .map(|_| ())
            .ok_or_else(|| not_found("InvalidNetworkID.NotFound", network_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn launch_request() -> LaunchRequest {
        LaunchRequest {
            image_id: "ami-1".into(),
            instance_type: "m1.small".into(),
            security_group: "network-k".into(),
            key_name: "key-k".into(),
            block_devices: Vec::new(),
            network_id: None,
        }
    }

    fn prepared_cloud() -> InMemoryCloud {
        let cloud = InMemoryCloud::new();
        cloud.put_security_group("network-k", []);
        cloud.put_key_pair("key-k", "SHA256:x");
        cloud
    }

    #[tokio::test]
    async fn test_duplicate_security_group() {
        let cloud = InMemoryCloud::new();
        cloud.create_security_group("g", "d").await.unwrap();
        let err = cloud.create_security_group("g", "d").await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_client_token_is_idempotent() {
        let cloud = prepared_cloud();
        let first = cloud.run_instances(&launch_request(), 2, 3, "k").await.unwrap();
        let second = cloud.run_instances(&launch_request(), 2, 3, "k").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.instance_ids.len(), 3);
        assert_eq!(cloud.live_instances(), 3);
    }

    #[tokio::test]
    async fn test_capacity_limits_launch() {
        let cloud = prepared_cloud().with_capacity(2);
        let reservation = cloud.run_instances(&launch_request(), 1, 5, "a").await.unwrap();
        assert_eq!(reservation.instance_ids.len(), 2);

        let err = cloud.run_instances(&launch_request(), 1, 1, "b").await.unwrap_err();
        assert_eq!(err.code, "InsufficientInstanceCapacity");
    }

    #[tokio::test]
    async fn test_instances_boot_and_terminate() {
        let cloud = prepared_cloud().with_boot_after(2);
        let ids = cloud.run_instances(&launch_request(), 1, 1, "k").await.unwrap().instance_ids;

        let first = cloud.describe_instances(&ids).await.unwrap();
        assert_eq!(first[0].state, InstanceState::Pending);
        let second = cloud.describe_instances(&ids).await.unwrap();
        assert!(second[0].is_running());
        assert!(!second[0].public_ip.is_empty());

        cloud.terminate_instances(&ids).await.unwrap();
        let gone = cloud.describe_instances(&ids).await.unwrap();
        assert_eq!(gone[0].state, InstanceState::Terminated);
    }

    #[tokio::test]
    async fn test_visibility_lag() {
        let cloud = prepared_cloud().with_visibility_lag(1);
        let ids = cloud.run_instances(&launch_request(), 1, 1, "k").await.unwrap().instance_ids;

        let err = cloud.describe_instances(&ids).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(cloud.describe_instances(&ids).await.unwrap()[0].is_running());
    }

    #[tokio::test]
    async fn test_spot_fulfilment() {
        let cloud = InMemoryCloud::new();
        let spot = SpotRequest {
            price: "0.04".into(),
            count: 2,
            launch_group: "k".into(),
            valid_until: chrono::Utc::now(),
            client_token: "k".into(),
        };
        let ids = cloud.request_spot_instances(&launch_request(), &spot).await.unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(cloud.request_spot_instances(&launch_request(), &spot).await.unwrap(), ids);

        let described = cloud.describe_spot_requests(&ids).await.unwrap();
        assert!(described.iter().all(|d| d.state == SpotRequestState::Active));
        assert!(described.iter().all(|d| d.instance_id.is_some()));
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed_in_order() {
        let cloud = InMemoryCloud::new();
        cloud.fail_next(
            Operation::DescribeKeyPair,
            ProviderError::from_code("RequestLimitExceeded", "slow down"),
        );

        let err = cloud.describe_key_pair("key-k").await.unwrap_err();
        assert!(err.is_transient());
        let err = cloud.describe_key_pair("key-k").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(cloud.calls(Operation::DescribeKeyPair), 2);
    }

    #[tokio::test]
    async fn test_terminate_honours_visibility_lag() {
        let cloud = prepared_cloud().with_visibility_lag(2);
        let ids = cloud.run_instances(&launch_request(), 2, 2, "k").await.unwrap().instance_ids;

        assert!(cloud.terminate_instances(&ids).await.unwrap_err().is_not_found());
        assert!(cloud.describe_instances(&ids).await.unwrap_err().is_not_found());
        assert_eq!(cloud.live_instances(), 2);

        cloud.terminate_instances(&ids).await.unwrap();
        assert_eq!(cloud.live_instances(), 0);
    }

    #[tokio::test]
    async fn test_launch_into_unknown_network() {
        let cloud = prepared_cloud();
        let mut request = launch_request();
        request.network_id = Some("net-missing".into());
        let err = cloud.run_instances(&request, 1, 1, "k").await.unwrap_err();
        assert!(err.is_not_found());

        request.network_id = Some(cloud.put_network("network-k", "zone-1"));
        assert_eq!(cloud.run_instances(&request, 1, 1, "k").await.unwrap().instance_ids.len(), 1);
    }

    #[tokio::test]
    async fn test_network_lifecycle() {
        let cloud = InMemoryCloud::new();
        let created = cloud.create_network("network-k", "zone-1", "offering-1").await.unwrap();
        assert!(cloud.create_network("network-k", "zone-1", "offering-1").await.unwrap_err().is_already_exists());
        assert_eq!(cloud.find_network_by_name("network-k").await.unwrap(), Some(created.clone()));

        cloud.delete_network(&created.network_id).await.unwrap();
        assert!(cloud.describe_network(&created.network_id).await.unwrap_err().is_not_found());
        assert_eq!(cloud.find_network_by_name("network-k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_operation_never_returns() {
        let cloud = InMemoryCloud::new();
        cloud.stall(Operation::CreateSecurityGroup);

        let call = cloud.create_security_group("g", "d");
        let result = tokio::time::timeout(std::time::Duration::from_secs(3600), call).await;
        assert!(result.is_err());
        assert_eq!(cloud.calls(Operation::CreateSecurityGroup), 1);
        assert!(cloud.security_group("g").is_none());
    }
}
