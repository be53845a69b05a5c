//! Per-credential client pooling

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::api::CloudClient;
use crate::models::Provider;
use crate::Result;

/// Builds a client for a provider description
pub trait ClientFactory: Send + Sync {
    fn create(&self, provider: &Provider) -> Result<Arc<dyn CloudClient>>;
}

impl<F> ClientFactory for F
where
    F: Fn(&Provider) -> Result<Arc<dyn CloudClient>> + Send + Sync,
{
    fn create(&self, provider: &Provider) -> Result<Arc<dyn CloudClient>> {
        self(provider)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    id: String,
    endpoint: Option<String>,
    access_key: String,
}

impl From<&Provider> for ClientKey {
    fn from(provider: &Provider) -> Self {
        Self {
            id: provider.id.clone(),
            endpoint: provider.endpoint.clone(),
            access_key: provider.access_key.clone(),
        }
    }
}

/// Clients keyed by credential identity, shared by every pool using the
/// same account and endpoint
pub struct ClientCache {
    factory: Arc<dyn ClientFactory>,
    clients: RwLock<HashMap<ClientKey, Arc<dyn CloudClient>>>,
}

impl ClientCache {
    pub fn new(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            factory,
            clients: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, provider: &Provider) -> Result<Arc<dyn CloudClient>> {
        let key = ClientKey::from(provider);
        if let Some(client) = self.clients.read().get(&key) {
            return Ok(client.clone());
        }

        let client = self.factory.create(provider)?;
        tracing::debug!(provider = %provider.id, endpoint = ?provider.endpoint, "Created provider client");
        Ok(self.clients.write().entry(key).or_insert(client).clone())
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }
}
