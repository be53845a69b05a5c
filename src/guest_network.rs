//! Guest network convergence for providers that launch into a network

use crate::cloud::NetworkApi;
use crate::models::{options, PoolSpec};
use crate::retry::{retry_transient, RetryPolicy};
use crate::{Error, Result};

/// Network name for a business key
pub fn name_for(business_key: &str) -> String {
    format!("network-{}", business_key)
}

/// Network a pool launches into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkOutcome {
    pub network_id: String,
    /// True when this call created the network, so teardown deletes it
    pub created: bool,
}

/// `existingNetworkId` from the network options, then the provider options
pub fn existing_network_id(spec: &PoolSpec) -> Option<&str> {
    spec.network()
        .option(options::EXISTING_NETWORK_ID)
        .or_else(|| spec.provider().option(options::EXISTING_NETWORK_ID))
}

/// Find the network a pool should use, creating it when needed.
///
/// An `existingNetworkId` must name a network that exists. Without one, a
/// network named after the business key is reused or created from the
/// `zoneId` and `networkOfferingId` provider options.
pub async fn ensure<C>(client: &C, business_key: &str, spec: &PoolSpec, retry: &RetryPolicy) -> Result<NetworkOutcome>
where
    C: NetworkApi + ?Sized,
{
    if let Some(network_id) = existing_network_id(spec) {
        return match retry_transient("describe_network", retry, || client.describe_network(network_id)).await {
            Ok(network) => {
                tracing::info!(pool = %business_key, network = %network.network_id, "Using existing network");
                Ok(NetworkOutcome {
                    network_id: network.network_id,
                    created: false,
                })
            }
            Err(e) if e.is_not_found() => Err(Error::validation(format!(
                "Network with id {} does not exist",
                network_id
            ))),
            Err(e) => Err(e.into()),
        };
    }

    let name = name_for(business_key);
    if let Some(network) = retry_transient("find_network_by_name", retry, || client.find_network_by_name(&name)).await? {
        tracing::info!(pool = %business_key, network = %network.network_id, name = %name, "Network exists");
        return Ok(NetworkOutcome {
            network_id: network.network_id,
            created: false,
        });
    }

    let provider = spec.provider();
    let zone_id = provider
        .option(options::ZONE_ID)
        .ok_or_else(|| Error::validation(format!("provider option {} is required to create a network", options::ZONE_ID)))?;
    let offering_id = provider.option(options::NETWORK_OFFERING_ID).ok_or_else(|| {
        Error::validation(format!(
            "provider option {} is required to create a network",
            options::NETWORK_OFFERING_ID
        ))
    })?;

    tracing::info!(pool = %business_key, name = %name, zone = %zone_id, offering = %offering_id, "Creating network");
    let network = retry_transient("create_network", retry, || client.create_network(&name, zone_id, offering_id)).await?;
    Ok(NetworkOutcome {
        network_id: network.network_id,
        created: true,
    })
}

/// Delete a network created by [`ensure`]. A missing network counts as
/// deleted.
pub async fn delete<C>(client: &C, network_id: &str, retry: &RetryPolicy) -> Result<()>
where
    C: NetworkApi + ?Sized,
{
    match retry_transient("delete_network", retry, || client.delete_network(network_id)).await {
        Ok(()) => {
            tracing::info!(network = %network_id, "Deleted network");
            Ok(())
        }
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{InMemoryCloud, MockNetworkApi, Operation, ProviderError};
    use crate::models::{AdminAccess, Hardware, Network, Provider, Software};

    fn spec(provider: Provider, network: Network) -> PoolSpec {
        PoolSpec::builder()
            .provider(provider)
            .network(network)
            .admin_access(
                AdminAccess::builder()
                    .username("admin")
                    .public_key(crate::key_pair::tests::rsa_public_key(1))
                    .private_key("private")
                    .build()
                    .unwrap(),
            )
            .software(Software::builder().image_id("template-1").build().unwrap())
            .hardware(Hardware::builder().instance_type("small").build().unwrap())
            .min_size(1)
            .expected_size(1)
            .build()
            .unwrap()
    }

    fn cloudstack() -> Provider {
        Provider::builder()
            .id("cloudstack")
            .access_key("a")
            .secret_key("s")
            .option(options::ZONE_ID, "zone-1")
            .option(options::NETWORK_OFFERING_ID, "offering-1")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_existing_network_is_checked() {
        let cloud = InMemoryCloud::new();
        let network_id = cloud.put_network("shared", "zone-1");
        let network = Network::builder().option(options::EXISTING_NETWORK_ID, &network_id).build();

        let outcome = ensure(&cloud, "k", &spec(cloudstack(), network), &RetryPolicy::none())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            NetworkOutcome {
                network_id,
                created: false
            }
        );
        assert_eq!(cloud.calls(Operation::CreateNetwork), 0);
        assert_eq!(cloud.calls(Operation::FindNetwork), 0);
    }

    #[tokio::test]
    async fn test_missing_existing_network_fails() {
        let cloud = InMemoryCloud::new();
        let network = Network::builder().option(options::EXISTING_NETWORK_ID, "net-404").build();

        let err = ensure(&cloud, "k", &spec(cloudstack(), network), &RetryPolicy::none())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("net-404"));
        assert_eq!(cloud.calls(Operation::CreateNetwork), 0);
    }

    #[tokio::test]
    async fn test_existing_network_from_provider_options() {
        let cloud = InMemoryCloud::new();
        let network_id = cloud.put_network("shared", "zone-1");
        let provider = cloudstack()
            .to_builder()
            .option(options::EXISTING_NETWORK_ID, &network_id)
            .build()
            .unwrap();

        let outcome = ensure(&cloud, "k", &spec(provider, Network::default()), &RetryPolicy::none())
            .await
            .unwrap();
        assert_eq!(outcome.network_id, network_id);
    }

    #[tokio::test]
    async fn test_named_network_is_reused() {
        let cloud = InMemoryCloud::new();
        let network_id = cloud.put_network("network-k", "zone-1");

        let outcome = ensure(&cloud, "k", &spec(cloudstack(), Network::default()), &RetryPolicy::none())
            .await
            .unwrap();
        assert_eq!(outcome.network_id, network_id);
        assert!(!outcome.created);
        assert_eq!(cloud.calls(Operation::CreateNetwork), 0);
    }

    #[tokio::test]
    async fn test_network_is_created_once() {
        let cloud = InMemoryCloud::new();
        let spec = spec(cloudstack(), Network::default());

        let first = ensure(&cloud, "k", &spec, &RetryPolicy::none()).await.unwrap();
        assert!(first.created);
        let created = cloud.network(&first.network_id).unwrap();
        assert_eq!(created.name, "network-k");
        assert_eq!(created.zone_id, "zone-1");

        let second = ensure(&cloud, "k", &spec, &RetryPolicy::none()).await.unwrap();
        assert_eq!(second.network_id, first.network_id);
        assert!(!second.created);
        assert_eq!(cloud.calls(Operation::CreateNetwork), 1);
    }

    #[tokio::test]
    async fn test_creation_needs_zone_and_offering() {
        let cloud = InMemoryCloud::new();
        let provider = Provider::builder()
            .id("cloudstack")
            .access_key("a")
            .secret_key("s")
            .option(options::ZONE_ID, "zone-1")
            .build()
            .unwrap();

        let err = ensure(&cloud, "k", &spec(provider, Network::default()), &RetryPolicy::none())
            .await
            .unwrap_err();
        assert!(err.to_string().contains(options::NETWORK_OFFERING_ID));
        assert_eq!(cloud.calls(Operation::CreateNetwork), 0);
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing_network() {
        let mut mock = MockNetworkApi::new();
        mock.expect_delete_network()
            .times(1)
            .returning(|id| Err(ProviderError::from_code("InvalidNetworkID.NotFound", id.to_string())));

        delete(&mock, "net-1", &RetryPolicy::none()).await.unwrap();
    }
}
