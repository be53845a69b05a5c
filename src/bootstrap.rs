//! Post-launch machine configuration

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};

use crate::models::{AdminAccess, Machine, PoolSpec, Repository};
use crate::{Error, Result};

/// One configuration action, applied to every machine in order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum BootstrapStep {
    SetupAdminAccess { username: String },
    InstallRepositories { repositories: Vec<Repository> },
    InstallPackages { packages: Vec<String> },
    DownloadFiles { files: BTreeMap<String, String> },
}

impl BootstrapStep {
    pub fn name(&self) -> &'static str {
        match self {
            BootstrapStep::SetupAdminAccess { .. } => "setup-admin-access",
            BootstrapStep::InstallRepositories { .. } => "install-repositories",
            BootstrapStep::InstallPackages { .. } => "install-packages",
            BootstrapStep::DownloadFiles { .. } => "download-files",
        }
    }
}

impl fmt::Display for BootstrapStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered steps for a pool. Empty for cached images.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootstrapPlan {
    steps: Vec<BootstrapStep>,
}

impl BootstrapPlan {
    pub fn for_spec(spec: &PoolSpec) -> Self {
        let software = spec.software();
        if software.cached_image {
            return Self::default();
        }

        let mut steps = vec![BootstrapStep::SetupAdminAccess {
            username: spec.admin_access().username.clone(),
        }];
        if !software.repositories.is_empty() {
            steps.push(BootstrapStep::InstallRepositories {
                repositories: software.repositories.clone(),
            });
        }
        if !software.packages.is_empty() {
            steps.push(BootstrapStep::InstallPackages {
                packages: software.packages.clone(),
            });
        }
        if !software.files.is_empty() {
            steps.push(BootstrapStep::DownloadFiles {
                files: software.files.clone(),
            });
        }
        Self { steps }
    }

    pub fn steps(&self) -> &[BootstrapStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Applies bootstrap steps to a machine, typically over SSH
#[async_trait]
pub trait Bootstrapper: Send + Sync {
    async fn run_step(&self, machine: &Machine, access: &AdminAccess, step: &BootstrapStep) -> Result<()>;
}

/// Logs each step and waits `step_delay`; stands in for a real remote
/// executor.
#[derive(Debug, Clone, Default)]
pub struct LoggingBootstrapper {
    step_delay: Duration,
}

impl LoggingBootstrapper {
    pub fn new(step_delay: Duration) -> Self {
        Self { step_delay }
    }
}

#[async_trait]
impl Bootstrapper for LoggingBootstrapper {
    async fn run_step(&self, machine: &Machine, access: &AdminAccess, step: &BootstrapStep) -> Result<()> {
        tracing::info!(
            machine = %machine.external_id,
            address = %machine.address(),
            user = %access.username,
            step = %step,
            "Running bootstrap step"
        );
        if !self.step_delay.is_zero() {
            tokio::time::sleep(self.step_delay).await;
        }
        Ok(())
    }
}

async fn bootstrap_machine(
    bootstrapper: &dyn Bootstrapper,
    machine: &Machine,
    access: &AdminAccess,
    plan: &BootstrapPlan,
) -> Result<()> {
    for step in plan.steps() {
        bootstrapper
            .run_step(machine, access, step)
            .await
            .map_err(|e| match e {
                Error::Bootstrap { .. } => e,
                other => Error::Bootstrap {
                    machine: machine.external_id.clone(),
                    message: format!("{} failed: {}", step, other),
                },
            })?;
    }
    tracing::debug!(machine = %machine.external_id, "Machine bootstrapped");
    Ok(())
}

/// Run `plan` on all machines concurrently under a hard deadline.
///
/// Exceeding `timeout` fails with [`Error::BootstrapTimeout`]; the first
/// machine error fails the whole run.
pub async fn run(
    bootstrapper: Arc<dyn Bootstrapper>,
    business_key: &str,
    machines: &[Machine],
    access: &AdminAccess,
    plan: &BootstrapPlan,
    timeout: Duration,
) -> Result<()> {
    if plan.is_empty() {
        tracing::info!(pool = %business_key, "Cached image, skipping bootstrap");
        return Ok(());
    }

    tracing::info!(
        pool = %business_key,
        machines = machines.len(),
        steps = plan.steps().len(),
        timeout_secs = timeout.as_secs(),
        "Bootstrapping machines"
    );
    let all = try_join_all(
        machines
            .iter()
            .map(|machine| bootstrap_machine(bootstrapper.as_ref(), machine, access, plan)),
    );

    match tokio::time::timeout(timeout, all).await {
        Ok(result) => result.map(|_| ()),
        Err(_) => Err(Error::BootstrapTimeout {
            key: business_key.to_string(),
            seconds: u32::try_from(timeout.as_secs()).unwrap_or(u32::MAX),
        }),
    }
}
