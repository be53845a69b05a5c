//! Process registry for pool lifecycles
//!
//! Each pool runs as its own task. The orchestrator keeps the task's
//! variables, which the task publishes as it goes, and routes termination
//! signals to it by business key.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::launcher::LaunchHandle;
use crate::models::{options, Machine, PoolSpec};
use crate::provisionr::convert_timeout_to_iso8601;
use crate::state::PoolState;
use crate::{Error, Result};

/// Signals a running pool can wait on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Terminate,
}

impl Signal {
    pub fn name(self) -> &'static str {
        match self {
            Signal::Terminate => "terminatePool",
        }
    }
}

/// Variables carried through a pool's lifetime
#[derive(Debug, Clone, Serialize)]
pub struct PoolContext {
    pub process_id: String,
    pub business_key: String,
    pub provider_id: String,
    pub spec: PoolSpec,
    /// ISO-8601 duration, e.g. `PT15M`
    pub bootstrap_timeout: String,
    pub cached_image: bool,
    pub spot_bid: Option<String>,
    pub security_group: Option<String>,
    pub key_pair: Option<String>,
    pub network_id: Option<String>,
    /// The pool created `network_id` and deletes it on teardown
    pub owns_network: bool,
    pub launch: Option<LaunchHandle>,
    pub instance_ids: Vec<String>,
    pub machines: Vec<Machine>,
    /// `None` until the lifecycle task publishes its first status
    pub status: Option<PoolState>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PoolContext {
    pub fn new(business_key: impl Into<String>, spec: PoolSpec) -> Self {
        let now = Utc::now();
        Self {
            process_id: format!("pool-{}", uuid::Uuid::new_v4()),
            business_key: business_key.into(),
            provider_id: spec.provider().id.clone(),
            bootstrap_timeout: convert_timeout_to_iso8601(spec.bootstrap_time_in_seconds()),
            cached_image: spec.software().cached_image,
            spot_bid: spec.provider().option(options::SPOT_BID).map(str::to_string),
            spec,
            security_group: None,
            key_pair: None,
            network_id: None,
            owns_network: false,
            launch: None,
            instance_ids: Vec::new(),
            machines: Vec::new(),
            status: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_some_and(PoolState::is_terminal)
    }
}

pub type SharedContext = Arc<RwLock<PoolContext>>;

/// What a process body receives when started
pub struct ProcessHandle {
    pub context: SharedContext,
    pub signals: mpsc::Receiver<Signal>,
}

struct PoolEntry {
    context: SharedContext,
    signals: mpsc::Sender<Signal>,
}

/// Registry of pool processes keyed by business key
#[derive(Clone, Default)]
pub struct Orchestrator {
    pools: Arc<RwLock<HashMap<String, PoolEntry>>>,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `context` under its business key and spawn `body` on the
    /// current tokio runtime. Returns the process id.
    ///
    /// A key whose previous process is still active is rejected; a key
    /// whose process finished is reused.
    pub fn start_process<F, Fut>(&self, context: PoolContext, body: F) -> Result<String>
    where
        F: FnOnce(ProcessHandle) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Config(format!("pool processes need a tokio runtime: {}", e)))?;

        let key = context.business_key.clone();
        let process_id = context.process_id.clone();
        let (tx, rx) = mpsc::channel(1);
        let context = Arc::new(RwLock::new(context));

        {
            let mut pools = self.pools.write();
            if let Some(existing) = pools.get(&key) {
                if !existing.context.read().is_terminal() {
                    return Err(Error::AlreadyExists(key));
                }
            }
            pools.insert(
                key.clone(),
                PoolEntry {
                    context: context.clone(),
                    signals: tx,
                },
            );
        }

        runtime.spawn(body(ProcessHandle {
            context,
            signals: rx,
        }));
        tracing::info!(pool = %key, process = %process_id, "Started pool management process");
        Ok(process_id)
    }

    /// Snapshot of the process variables
    pub fn variables(&self, business_key: &str) -> Result<PoolContext> {
        let pools = self.pools.read();
        let entry = pools
            .get(business_key)
            .ok_or_else(|| Error::NotFound(format!("no pool process for key {}", business_key)))?;
        let context = entry.context.read().clone();
        Ok(context)
    }

    pub fn status(&self, business_key: &str) -> Result<Option<PoolState>> {
        let pools = self.pools.read();
        let entry = pools
            .get(business_key)
            .ok_or_else(|| Error::NotFound(format!("no pool process for key {}", business_key)))?;
        let status = entry.context.read().status;
        Ok(status)
    }

    pub fn contains(&self, business_key: &str) -> bool {
        self.pools.read().contains_key(business_key)
    }

    /// Keys of processes that have not reached a terminal state, sorted
    pub fn active_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .pools
            .read()
            .iter()
            .filter(|(_, entry)| !entry.context.read().is_terminal())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Deliver `signal` to the process waiting under `business_key`.
    ///
    /// A signal already queued absorbs repeats. Fails with `NotFound` when
    /// the key is unknown or its process no longer listens.
    pub fn signal(&self, business_key: &str, signal: Signal) -> Result<()> {
        let sender = self
            .pools
            .read()
            .get(business_key)
            .map(|entry| entry.signals.clone())
            .ok_or_else(|| Error::NotFound(format!("no pool process for key {}", business_key)))?;

        match sender.try_send(signal) {
            Ok(()) => {
                tracing::info!(pool = %business_key, signal = signal.name(), "Delivered signal");
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                tracing::debug!(pool = %business_key, signal = signal.name(), "Signal already pending");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(Error::NotFound(format!(
                "no execution of {} is waiting for signal {}",
                business_key,
                signal.name()
            ))),
        }
    }

    /// Forget finished processes. Returns how many were removed.
    pub fn prune_terminated(&self) -> usize {
        let mut pools = self.pools.write();
        let before = pools.len();
        pools.retain(|_, entry| !entry.context.read().is_terminal());
        before - pools.len()
    }

    pub fn len(&self) -> usize {
        self.pools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.read().is_empty()
    }
}
