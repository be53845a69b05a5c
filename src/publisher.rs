//! Machine discovery after launch

use std::time::Duration;

use tokio::time::Instant;

use crate::cloud::{InstanceApi, InstanceState, SpotRequestState};
use crate::launcher::LaunchHandle;
use crate::models::Machine;
use crate::retry::{retry_transient, RetryPolicy};
use crate::{Error, Result};

/// One look at the instances behind a launch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MachineSnapshot {
    /// Every instance known so far, spot fulfilments included
    pub instance_ids: Vec<String>,
    /// Running instances, in launch order
    pub machines: Vec<Machine>,
    /// Instances still booting plus spot requests still open
    pub pending: usize,
}

impl MachineSnapshot {
    pub fn running(&self) -> usize {
        self.machines.len()
    }

    /// Nothing is left booting and at least `min_size` machines run
    pub fn is_complete(&self, min_size: usize) -> bool {
        self.pending == 0 && self.running() >= min_size
    }
}

/// Describe the launch once. Instances the provider does not know yet count
/// as pending.
pub async fn poll<C>(client: &C, handle: &LaunchHandle, retry: &RetryPolicy) -> Result<MachineSnapshot>
where
    C: InstanceApi + ?Sized,
{
    let mut snapshot = MachineSnapshot::default();

    match handle {
        LaunchHandle::OnDemand { instance_ids, .. } => {
            snapshot.instance_ids = instance_ids.clone();
        }
        LaunchHandle::Spot { request_ids } => {
            let described = retry_transient("describe_spot_requests", retry, || {
                client.describe_spot_requests(request_ids)
            })
            .await;
            let requests = match described {
                Ok(requests) => requests,
                Err(e) if e.is_not_found() => {
                    snapshot.pending = request_ids.len();
                    return Ok(snapshot);
                }
                Err(e) => return Err(e.into()),
            };
            for request in requests {
                match (request.state, request.instance_id) {
                    (_, Some(instance_id)) => snapshot.instance_ids.push(instance_id),
                    (SpotRequestState::Open, None) => snapshot.pending += 1,
                    (state, None) => {
                        tracing::warn!(request = %request.request_id, ?state, "Spot request closed unfulfilled")
                    }
                }
            }
        }
    }

    if snapshot.instance_ids.is_empty() {
        return Ok(snapshot);
    }

    let described = retry_transient("describe_instances", retry, || {
        client.describe_instances(&snapshot.instance_ids)
    })
    .await;
    let instances = match described {
        Ok(instances) => instances,
        Err(e) if e.is_not_found() => {
            tracing::debug!(error = %e, "Instances not visible yet");
            snapshot.pending += snapshot.instance_ids.len();
            return Ok(snapshot);
        }
        Err(e) => return Err(e.into()),
    };

    for instance in &instances {
        match instance.state {
            InstanceState::Running => snapshot.machines.push(instance.to_machine()),
            InstanceState::Pending => snapshot.pending += 1,
            _ => {}
        }
    }
    Ok(snapshot)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitSettings {
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

/// Poll until every launched machine runs, or the timeout passes.
///
/// After the timeout the pool still proceeds when `min_size` machines run;
/// otherwise the wait fails with [`Error::MachineTimeout`].
pub async fn wait_for_machines<C>(
    client: &C,
    handle: &LaunchHandle,
    business_key: &str,
    min_size: usize,
    settings: &WaitSettings,
) -> Result<MachineSnapshot>
where
    C: InstanceApi + ?Sized,
{
    let deadline = Instant::now() + settings.timeout;
    loop {
        let snapshot = poll(client, handle, &settings.retry).await?;
        tracing::debug!(
            pool = %business_key,
            running = snapshot.running(),
            pending = snapshot.pending,
            "Polled machines"
        );

        if snapshot.is_complete(min_size) {
            tracing::info!(pool = %business_key, running = snapshot.running(), "Machines are running");
            return Ok(snapshot);
        }
        if snapshot.pending == 0 && snapshot.running() < min_size {
            return Err(Error::MachineTimeout {
                key: business_key.to_string(),
                running: snapshot.running(),
                required: min_size,
            });
        }
        if Instant::now() >= deadline {
            if snapshot.running() >= min_size {
                tracing::warn!(
                    pool = %business_key,
                    running = snapshot.running(),
                    pending = snapshot.pending,
                    "Gave up on pending machines, proceeding with those running"
                );
                return Ok(snapshot);
            }
            return Err(Error::MachineTimeout {
                key: business_key.to_string(),
                running: snapshot.running(),
                required: min_size,
            });
        }

        tokio::time::sleep(settings.poll_interval).await;
    }
}
