//! The authoritative route catalog.
//!
//! Routes are written by the build pipeline and only ever read or deleted
//! here; the router never mutates a route between create and delete.

use async_trait::async_trait;
use vault_client::VaultClient;

use crate::error::RouterError;
use crate::types::Route;

/// Secret-engine mount holding one route per train id.
const ROUTES_MOUNT: &str = "routes";

#[async_trait]
pub trait RouteStore: Send + Sync {
    /// Fetch the route for a train. `NotFound` if no entry exists.
    async fn get(&self, train_id: &str) -> Result<Route, RouterError>;

    /// List every stored route.
    async fn list(&self) -> Result<Vec<Route>, RouterError>;

    /// Delete the route for a completed train.
    async fn delete(&self, train_id: &str) -> Result<(), RouterError>;
}

/// Route catalog backed by a Vault KV v1 mount.
pub struct VaultRouteStore {
    vault: VaultClient,
}

impl VaultRouteStore {
    pub fn new(vault: VaultClient) -> Self {
        Self { vault }
    }
}

#[async_trait]
impl RouteStore for VaultRouteStore {
    async fn get(&self, train_id: &str) -> Result<Route, RouterError> {
        let route: Route = self.vault.read_kv1(ROUTES_MOUNT, train_id).await?;
        Ok(route)
    }

    async fn list(&self) -> Result<Vec<Route>, RouterError> {
        let keys = self.vault.list_kv1(ROUTES_MOUNT).await?;
        let mut routes = Vec::with_capacity(keys.len());
        for key in keys {
            match self.vault.read_kv1::<Route>(ROUTES_MOUNT, &key).await {
                Ok(route) => routes.push(route),
                // A key can disappear between list and read.
                Err(vault_client::VaultError::NotFound) => {
                    tracing::warn!(train_id = %key, "Route listed but no data found, skipping");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(routes)
    }

    async fn delete(&self, train_id: &str) -> Result<(), RouterError> {
        self.vault.delete_kv1(ROUTES_MOUNT, train_id).await?;
        tracing::info!(train_id, "Removed route from vault");
        Ok(())
    }
}

/// In-memory route catalog for tests.
#[cfg(any(test, feature = "test-utils"))]
pub struct MemoryRouteStore {
    routes: std::sync::Mutex<std::collections::HashMap<String, Route>>,
}

#[cfg(any(test, feature = "test-utils"))]
impl MemoryRouteStore {
    pub fn new() -> Self {
        Self {
            routes: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub fn insert(&self, route: Route) {
        self.routes
            .lock()
            .unwrap()
            .insert(route.repository_suffix.clone(), route);
    }

    pub fn contains(&self, train_id: &str) -> bool {
        self.routes.lock().unwrap().contains_key(train_id)
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl Default for MemoryRouteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl RouteStore for MemoryRouteStore {
    async fn get(&self, train_id: &str) -> Result<Route, RouterError> {
        self.routes
            .lock()
            .unwrap()
            .get(train_id)
            .cloned()
            .ok_or(RouterError::NotFound)
    }

    async fn list(&self) -> Result<Vec<Route>, RouterError> {
        Ok(self.routes.lock().unwrap().values().cloned().collect())
    }

    async fn delete(&self, train_id: &str) -> Result<(), RouterError> {
        self.routes
            .lock()
            .unwrap()
            .remove(train_id)
            .map(|_| ())
            .ok_or(RouterError::NotFound)
    }
}
