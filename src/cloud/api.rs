//! Provider operation traits

use std::collections::HashSet;

use async_trait::async_trait;

use super::error::ProviderResult;
use super::types::{
    InstanceDescription, IpPermission, LaunchRequest, NetworkDescription, Reservation, SpotRequest,
    SpotRequestDescription,
};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SecurityGroupApi: Send + Sync {
    /// Fails with an `AlreadyExists` error when the group is present
    async fn create_security_group(&self, name: &str, description: &str) -> ProviderResult<()>;

    async fn describe_security_group(&self, name: &str) -> ProviderResult<HashSet<IpPermission>>;

    async fn authorize_ingress(&self, name: &str, permissions: Vec<IpPermission>) -> ProviderResult<()>;

    async fn revoke_ingress(&self, name: &str, permissions: Vec<IpPermission>) -> ProviderResult<()>;

    async fn delete_security_group(&self, name: &str) -> ProviderResult<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyPairApi: Send + Sync {
    /// Fails with an `AlreadyExists` error when the name is taken
    async fn import_key_pair(&self, name: &str, public_key: &str) -> ProviderResult<()>;

    /// Fingerprint of the stored public key
    async fn describe_key_pair(&self, name: &str) -> ProviderResult<String>;

    async fn delete_key_pair(&self, name: &str) -> ProviderResult<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InstanceApi: Send + Sync {
    /// Launch between `min` and `max` instances. Replaying a `client_token`
    /// returns the original reservation.
    async fn run_instances(
        &self,
        request: &LaunchRequest,
        min: u32,
        max: u32,
        client_token: &str,
    ) -> ProviderResult<Reservation>;

    /// Returns the ids of the spot requests created
    async fn request_spot_instances(
        &self,
        request: &LaunchRequest,
        spot: &SpotRequest,
    ) -> ProviderResult<Vec<String>>;

    async fn describe_instances(&self, instance_ids: &[String]) -> ProviderResult<Vec<InstanceDescription>>;

    async fn describe_spot_requests(&self, request_ids: &[String]) -> ProviderResult<Vec<SpotRequestDescription>>;

    async fn cancel_spot_requests(&self, request_ids: &[String]) -> ProviderResult<()>;

    async fn terminate_instances(&self, instance_ids: &[String]) -> ProviderResult<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NetworkApi: Send + Sync {
    /// Fails with a `NotFound` error when no network has this id
    async fn describe_network(&self, network_id: &str) -> ProviderResult<NetworkDescription>;

    async fn find_network_by_name(&self, name: &str) -> ProviderResult<Option<NetworkDescription>>;

    async fn create_network(&self, name: &str, zone_id: &str, offering_id: &str) -> ProviderResult<NetworkDescription>;

    async fn delete_network(&self, network_id: &str) -> ProviderResult<()>;
}

/// A complete provider client
pub trait CloudClient: SecurityGroupApi + KeyPairApi + InstanceApi + NetworkApi {}

impl<T> CloudClient for T where T: SecurityGroupApi + KeyPairApi + InstanceApi + NetworkApi {}
