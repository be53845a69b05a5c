//! Instance launch, on-demand or spot

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::cloud::{InstanceApi, LaunchRequest, SpotRequest};
use crate::image::ImageResolver;
use crate::models::{options, PoolSpec};
use crate::retry::{retry_transient, RetryPolicy};
use crate::{guest_network, key_pair, security_group, Error, Result};

/// Longest idempotency token providers accept
pub const CLIENT_TOKEN_MAX_LEN: usize = 64;

pub const DEFAULT_SPOT_VALIDITY: Duration = Duration::from_secs(10 * 60);

/// Idempotency token for the launch of a pool, on-demand or spot
pub fn client_token_for(business_key: &str) -> String {
    business_key.chars().take(CLIENT_TOKEN_MAX_LEN).collect()
}

/// Identifiers to poll after a launch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LaunchHandle {
    OnDemand {
        reservation_id: String,
        instance_ids: Vec<String>,
    },
    Spot {
        request_ids: Vec<String>,
    },
}

impl LaunchHandle {
    pub fn is_spot(&self) -> bool {
        matches!(self, LaunchHandle::Spot { .. })
    }
}

#[derive(Debug, Clone)]
pub struct Launcher {
    resolver: ImageResolver,
    retry: RetryPolicy,
    spot_validity: Duration,
    supports_spot: bool,
    manages_network: bool,
}

impl Launcher {
    pub fn new(resolver: ImageResolver, retry: RetryPolicy) -> Self {
        Self {
            resolver,
            retry,
            spot_validity: DEFAULT_SPOT_VALIDITY,
            supports_spot: true,
            manages_network: false,
        }
    }

    /// How long unfulfilled spot requests stay open
    pub fn with_spot_validity(mut self, validity: Duration) -> Self {
        self.spot_validity = validity;
        self
    }

    /// Reject pools that carry a spot bid
    pub fn without_spot(mut self) -> Self {
        self.supports_spot = false;
        self
    }

    /// Converge a guest network before launching
    pub fn with_managed_network(mut self) -> Self {
        self.manages_network = true;
        self
    }

    pub fn manages_network(&self) -> bool {
        self.manages_network
    }

    /// Launch parameters for a pool. Names derive from the business key, so
    /// repeated calls target the same group and key pair.
    pub fn launch_request(&self, spec: &PoolSpec, business_key: &str) -> Result<LaunchRequest> {
        let hardware = spec.hardware();
        let image_id = self
            .resolver
            .resolve(spec.software(), spec.provider(), &hardware.instance_type)?;

        Ok(LaunchRequest {
            image_id,
            instance_type: hardware.instance_type.clone(),
            security_group: security_group::name_for(business_key),
            key_name: key_pair::name_for(business_key),
            block_devices: hardware.block_devices.clone(),
            network_id: guest_network::existing_network_id(spec).map(str::to_string),
        })
    }

    /// Submit the launch. Returns as soon as the provider accepted it.
    pub async fn launch<C>(&self, client: &C, spec: &PoolSpec, business_key: &str) -> Result<LaunchHandle>
    where
        C: InstanceApi + ?Sized,
    {
        self.launch_into(client, spec, business_key, None).await
    }

    /// Like [`Launcher::launch`], attaching the instances to `network_id`
    /// when given
    pub async fn launch_into<C>(
        &self,
        client: &C,
        spec: &PoolSpec,
        business_key: &str,
        network_id: Option<&str>,
    ) -> Result<LaunchHandle>
    where
        C: InstanceApi + ?Sized,
    {
        let mut request = self.launch_request(spec, business_key)?;
        if let Some(network_id) = network_id {
            request.network_id = Some(network_id.to_string());
        }

        match spec.provider().option(options::SPOT_BID) {
            Some(bid) => self.launch_spot(client, spec, business_key, &request, bid).await,
            None => self.launch_on_demand(client, spec, business_key, &request).await,
        }
    }

    async fn launch_on_demand<C>(
        &self,
        client: &C,
        spec: &PoolSpec,
        business_key: &str,
        request: &LaunchRequest,
    ) -> Result<LaunchHandle>
    where
        C: InstanceApi + ?Sized,
    {
        let token = client_token_for(business_key);
        let (min, max) = (spec.min_size(), spec.expected_size());

        let reservation = retry_transient("run_instances", &self.retry, || {
            client.run_instances(request, min, max, &token)
        })
        .await?;

        tracing::info!(
            pool = %business_key,
            reservation = %reservation.reservation_id,
            launched = reservation.instance_ids.len(),
            min,
            max,
            image = %request.image_id,
            "Launched on-demand instances"
        );

        Ok(LaunchHandle::OnDemand {
            reservation_id: reservation.reservation_id,
            instance_ids: reservation.instance_ids,
        })
    }

    async fn launch_spot<C>(
        &self,
        client: &C,
        spec: &PoolSpec,
        business_key: &str,
        request: &LaunchRequest,
        bid: &str,
    ) -> Result<LaunchHandle>
    where
        C: InstanceApi + ?Sized,
    {
        if !self.supports_spot {
            return Err(Error::validation(format!(
                "provider {} does not support spot instances",
                spec.provider().id
            )));
        }
        match bid.trim().parse::<f64>() {
            Ok(price) if price > 0.0 => {}
            _ => return Err(Error::validation(format!("invalid spot bid {:?}", bid))),
        }

        let validity = chrono::Duration::from_std(self.spot_validity)
            .map_err(|e| Error::Config(format!("spot validity out of range: {}", e)))?;
        let spot = SpotRequest {
            price: bid.trim().to_string(),
            count: spec.expected_size(),
            launch_group: business_key.to_string(),
            valid_until: Utc::now() + validity,
            client_token: client_token_for(business_key),
        };

        let request_ids = retry_transient("request_spot_instances", &self.retry, || {
            client.request_spot_instances(request, &spot)
        })
        .await?;

        tracing::info!(
            pool = %business_key,
            requests = request_ids.len(),
            price = %spot.price,
            valid_until = %spot.valid_until,
            "Submitted spot requests"
        );

        Ok(LaunchHandle::Spot { request_ids })
    }
}
