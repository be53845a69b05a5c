//! Per-pool lifecycle task
//!
//! Drives one pool from CREATING to READY, then waits for the termination
//! signal and releases everything it created. Reconcilers run in a fixed
//! order: security group, key pair, guest network (when the launcher manages
//! one), launch, machine wait, bootstrap.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::Instant;

use crate::bootstrap::{self, BootstrapPlan, Bootstrapper};
use crate::cloud::CloudClient;
use crate::launcher::{LaunchHandle, Launcher};
use crate::models::PoolSpec;
use crate::orchestrator::{ProcessHandle, SharedContext, Signal};
use crate::publisher::{self, WaitSettings};
use crate::retry::{retry_transient, RetryPolicy};
use crate::state::PoolState;
use crate::{guest_network, key_pair, security_group, Error, Result};

/// Timing knobs shared by every pool of a facade
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleSettings {
    pub retry: RetryPolicy,
    pub poll_interval: Duration,
    pub machine_wait_timeout: Duration,
    pub termination_timeout: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            poll_interval: Duration::from_secs(2),
            machine_wait_timeout: Duration::from_secs(600),
            termination_timeout: Duration::from_secs(300),
        }
    }
}

pub struct PoolLifecycle {
    client: Arc<dyn CloudClient>,
    launcher: Launcher,
    bootstrapper: Arc<dyn Bootstrapper>,
    settings: LifecycleSettings,
}

impl PoolLifecycle {
    pub fn new(
        client: Arc<dyn CloudClient>,
        launcher: Launcher,
        bootstrapper: Arc<dyn Bootstrapper>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            client,
            launcher,
            bootstrapper,
            settings,
        }
    }

    /// Process body. Returns once the pool is TERMINATED or FAILED, or when
    /// the orchestrator goes away while the pool is READY.
    pub async fn run(self, process: ProcessHandle) {
        let ProcessHandle { context, mut signals } = process;
        let (key, spec) = {
            let ctx = context.read();
            (ctx.business_key.clone(), ctx.spec.clone())
        };

        advance(&context, PoolState::Creating);
        let outcome = self.provision(&context, &key, &spec, &mut signals).await;

        let failed = match outcome {
            Ok(()) => match signals.recv().await {
                Some(Signal::Terminate) => false,
                None => {
                    tracing::warn!(pool = %key, "Orchestrator dropped, leaving pool running");
                    return;
                }
            },
            Err(e) if e.is_preempted() => {
                tracing::info!(pool = %key, "Termination requested before the pool was ready");
                false
            }
            Err(e) => {
                tracing::error!(pool = %key, error = %e, "Pool provisioning failed");
                context.write().last_error = Some(e.to_string());
                true
            }
        };

        self.teardown(&context, &key).await;
        advance(
            &context,
            if failed {
                PoolState::Failed
            } else {
                PoolState::Terminated
            },
        );
    }

    async fn provision(
        &self,
        context: &SharedContext,
        key: &str,
        spec: &PoolSpec,
        signals: &mut mpsc::Receiver<Signal>,
    ) -> Result<()> {
        let client = self.client.as_ref();
        let retry = &self.settings.retry;
        check_signal(signals, key)?;

        let group = security_group::name_for(key);
        context.write().security_group = Some(group.clone());
        preemptible(signals, key, security_group::synchronize(client, &group, spec.network(), retry)).await?;

        let key_name = key_pair::name_for(key);
        context.write().key_pair = Some(key_name.clone());
        preemptible(
            signals,
            key,
            key_pair::ensure(client, &key_name, &spec.admin_access().public_key, retry),
        )
        .await?;

        let mut network_id = None;
        if self.launcher.manages_network() {
            let network = guest_network::ensure(client, key, spec, retry).await?;
            {
                let mut ctx = context.write();
                ctx.network_id = Some(network.network_id.clone());
                ctx.owns_network = network.created;
            }
            network_id = Some(network.network_id);
            check_signal(signals, key)?;
        }

        let handle = self.launcher.launch_into(client, spec, key, network_id.as_deref()).await?;
        {
            let mut ctx = context.write();
            if let LaunchHandle::OnDemand { instance_ids, .. } = &handle {
                ctx.instance_ids = instance_ids.clone();
            }
            ctx.launch = Some(handle.clone());
        }

        let wait = WaitSettings {
            poll_interval: self.settings.poll_interval,
            timeout: self.settings.machine_wait_timeout,
            retry: retry.clone(),
        };
        let snapshot = preemptible(
            signals,
            key,
            publisher::wait_for_machines(client, &handle, key, spec.min_size() as usize, &wait),
        )
        .await?;
        {
            let mut ctx = context.write();
            ctx.instance_ids = snapshot.instance_ids.clone();
            ctx.machines = snapshot.machines.clone();
        }
        advance(context, PoolState::Bootstrapping);

        let plan = BootstrapPlan::for_spec(spec);
        let deadline = Duration::from_secs(u64::from(spec.bootstrap_time_in_seconds()));
        preemptible(
            signals,
            key,
            bootstrap::run(
                self.bootstrapper.clone(),
                key,
                &snapshot.machines,
                spec.admin_access(),
                &plan,
                deadline,
            ),
        )
        .await?;
        check_signal(signals, key)?;

        advance(context, PoolState::Ready);
        Ok(())
    }

    /// Release every resource recorded in the context. Failures are logged
    /// and skipped.
    async fn teardown(&self, context: &SharedContext, key: &str) {
        advance(context, PoolState::Terminating);
        let client = self.client.as_ref();
        let retry = &self.settings.retry;

        let (launch, mut instance_ids, group, key_name, owned_network) = {
            let ctx = context.read();
            (
                ctx.launch.clone(),
                ctx.instance_ids.clone(),
                ctx.security_group.clone(),
                ctx.key_pair.clone(),
                ctx.network_id.clone().filter(|_| ctx.owns_network),
            )
        };

        if let Some(LaunchHandle::Spot { request_ids }) = &launch {
            if let Err(e) = retry_transient("cancel_spot_requests", retry, || {
                client.cancel_spot_requests(request_ids)
            })
            .await
            {
                tracing::warn!(pool = %key, error = %e, "Failed to cancel spot requests");
            }
            match retry_transient("describe_spot_requests", retry, || {
                client.describe_spot_requests(request_ids)
            })
            .await
            {
                Ok(requests) => {
                    for instance_id in requests.into_iter().filter_map(|r| r.instance_id) {
                        if !instance_ids.contains(&instance_id) {
                            instance_ids.push(instance_id);
                        }
                    }
                }
                Err(e) => tracing::warn!(pool = %key, error = %e, "Failed to describe spot requests"),
            }
        }

        if !instance_ids.is_empty() && self.terminate_instances(key, &instance_ids).await {
            self.wait_for_termination(key, &instance_ids).await;
        }

        if let Some(name) = key_name {
            if let Err(e) = key_pair::delete(client, &name, retry).await {
                tracing::warn!(pool = %key, key_pair = %name, error = %e, "Failed to delete key pair");
            }
        }
        if let Some(name) = group {
            if let Err(e) = security_group::delete(client, &name, retry).await {
                tracing::warn!(pool = %key, group = %name, error = %e, "Failed to delete security group");
            }
        }
        if let Some(network_id) = owned_network {
            if let Err(e) = guest_network::delete(client, &network_id, retry).await {
                tracing::warn!(pool = %key, network = %network_id, error = %e, "Failed to delete network");
            }
        }

        context.write().machines.clear();
    }

    /// Ask the provider to terminate `instance_ids`. Instances launched
    /// moments ago may not be visible yet, so `NotFound` is retried until
    /// the termination timeout.
    async fn terminate_instances(&self, key: &str, instance_ids: &[String]) -> bool {
        let client = self.client.as_ref();
        let deadline = Instant::now() + self.settings.termination_timeout;
        loop {
            let terminated = retry_transient("terminate_instances", &self.settings.retry, || {
                client.terminate_instances(instance_ids)
            })
            .await;
            match terminated {
                Ok(()) => {
                    tracing::info!(pool = %key, instances = instance_ids.len(), "Terminating instances");
                    return true;
                }
                Err(e) if e.is_not_found() && Instant::now() < deadline => {
                    tracing::debug!(pool = %key, error = %e, "Instances not visible yet, retrying termination");
                }
                Err(e) => {
                    tracing::warn!(pool = %key, error = %e, "Failed to terminate instances");
                    return false;
                }
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }

    async fn wait_for_termination(&self, key: &str, instance_ids: &[String]) {
        let client = self.client.as_ref();
        let deadline = Instant::now() + self.settings.termination_timeout;
        loop {
            let described = retry_transient("describe_instances", &self.settings.retry, || {
                client.describe_instances(instance_ids)
            })
            .await;
            match described {
                Ok(instances) if instances.iter().all(|i| i.state.is_gone()) => {
                    tracing::info!(pool = %key, "All instances terminated");
                    return;
                }
                Ok(_) => {}
                // Terminated instances eventually drop out of describe results
                Err(e) if e.is_not_found() => return,
                Err(e) => tracing::warn!(pool = %key, error = %e, "Failed to describe instances"),
            }

            if Instant::now() >= deadline {
                tracing::warn!(pool = %key, "Timed out waiting for instances to terminate");
                return;
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
    }
}

/// Publish a new status if the transition is allowed
fn advance(context: &SharedContext, next: PoolState) {
    let mut ctx = context.write();
    if let Some(current) = ctx.status {
        if let Err(e) = current.ensure_transition(next) {
            tracing::error!(pool = %ctx.business_key, error = %e, "Refusing pool transition");
            return;
        }
    }
    ctx.status = Some(next);
    ctx.updated_at = Utc::now();
    tracing::info!(pool = %ctx.business_key, status = %next, "Pool status changed");
}

/// Fails with `Preempted` when a termination signal is queued
fn check_signal(signals: &mut mpsc::Receiver<Signal>, key: &str) -> Result<()> {
    match signals.try_recv() {
        Ok(Signal::Terminate) => Err(Error::Preempted(key.to_string())),
        Err(TryRecvError::Empty | TryRecvError::Disconnected) => Ok(()),
    }
}

/// Run `work` unless a termination signal arrives first. A closed channel
/// never pre-empts.
async fn preemptible<T, F>(signals: &mut mpsc::Receiver<Signal>, key: &str, work: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::pin!(work);
    tokio::select! {
        biased;
        signal = signals.recv() => match signal {
            Some(Signal::Terminate) => Err(Error::Preempted(key.to_string())),
            None => work.await,
        },
        result = &mut work => result,
    }
}
