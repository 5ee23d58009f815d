//! Process State
//!
//! The authoritative in-memory record of upstream definitions and their
//! runtime status, plus the `AppState` aggregate handed to every management
//! route. Upstream status is driven by transport-registry events and by
//! discovery outcomes; readers always get point-in-time snapshots.

use std::collections::HashMap;
use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::RwLock;

use nexus_shared::{UpstreamDefinition, UpstreamStatus, ValidationError};

use crate::config::Config;
use crate::mcp::{CapabilityCatalog, Discoverer, RefreshScheduler, TransportEvent, TransportRegistry};
use crate::vmcp::VmcpManager;

/// Error type for upstream-store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("upstream already exists: {0}")]
    DuplicateName(String),

    #[error("another enabled upstream already uses url: {0}")]
    DuplicateUrl(String),

    #[error("upstream not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

/// Result type for upstream-store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// In-memory store of upstream definitions, keyed by name.
pub struct UpstreamStore {
    inner: RwLock<HashMap<String, UpstreamDefinition>>,
}

fn normalized_url(url: &str) -> &str {
    url.trim_end_matches('/')
}

impl UpstreamStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a new definition. Names are unique; the url must be unique
    /// across enabled upstreams.
    pub async fn insert(&self, definition: UpstreamDefinition) -> StoreResult<()> {
        definition.validate()?;
        let mut inner = self.inner.write().await;
        if inner.contains_key(&definition.name) {
            return Err(StoreError::DuplicateName(definition.name));
        }
        if !definition.is_disabled {
            let clash = inner.values().any(|other| {
                !other.is_disabled
                    && normalized_url(&other.url) == normalized_url(&definition.url)
            });
            if clash {
                return Err(StoreError::DuplicateUrl(definition.url));
            }
        }
        tracing::info!(upstream = %definition.name, url = %definition.url, "Upstream registered");
        inner.insert(definition.name.clone(), definition);
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Option<UpstreamDefinition> {
        self.inner.read().await.get(name).cloned()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.inner.read().await.contains_key(name)
    }

    /// Every definition, sorted by name.
    pub async fn list(&self) -> Vec<UpstreamDefinition> {
        let mut all: Vec<UpstreamDefinition> = self.inner.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub async fn remove(&self, name: &str) -> StoreResult<UpstreamDefinition> {
        self.inner
            .write()
            .await
            .remove(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    /// Flip the disabled flag; a disabled upstream is reported offline.
    pub async fn set_disabled(&self, name: &str, disabled: bool) -> StoreResult<UpstreamDefinition> {
        let mut inner = self.inner.write().await;
        let definition = inner
            .get_mut(name)
            .ok_or_else(|| StoreError::NotFound(name.to_string()))?;
        definition.is_disabled = disabled;
        if disabled {
            definition.status = UpstreamStatus::Offline;
        }
        Ok(definition.clone())
    }

    /// Record a status transition; going online refreshes `lastSeen`.
    pub async fn set_status(&self, name: &str, status: UpstreamStatus) {
        let mut inner = self.inner.write().await;
        if let Some(definition) = inner.get_mut(name) {
            if definition.status != status {
                tracing::info!(upstream = %name, status = ?status, "Upstream status changed");
            }
            definition.status = status;
            if status == UpstreamStatus::Online {
                definition.last_seen = Some(OffsetDateTime::now_utc());
            }
        }
    }
}

impl Default for UpstreamStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared application state for the management plane.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub upstreams: Arc<UpstreamStore>,
    pub registry: Arc<TransportRegistry>,
    pub catalog: Arc<CapabilityCatalog>,
    pub discoverer: Arc<Discoverer>,
    pub scheduler: Arc<RefreshScheduler>,
    pub manager: Arc<VmcpManager>,
    pub started_at: OffsetDateTime,
}

impl AppState {
    /// Mirror transport connectivity into upstream status fields.
    pub fn spawn_status_observer(&self) {
        let upstreams = self.upstreams.clone();
        let mut events = self.registry.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let (name, status) = match &event {
                            TransportEvent::Online { name } => (name.clone(), UpstreamStatus::Online),
                            TransportEvent::Offline { name } => {
                                (name.clone(), UpstreamStatus::Offline)
                            }
                            TransportEvent::Errored { name } => {
                                (name.clone(), UpstreamStatus::Error)
                            }
                        };
                        upstreams.set_status(&name, status).await;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Status observer missed transport events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_insert_rejects_duplicate_name() {
        let store = UpstreamStore::new();
        store
            .insert(UpstreamDefinition::new("u1", "http://127.0.0.1:40001"))
            .await
            .unwrap();
        assert!(matches!(
            store
                .insert(UpstreamDefinition::new("u1", "http://127.0.0.1:40002"))
                .await,
            Err(StoreError::DuplicateName(_))
        ));
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_url_among_enabled() {
        let store = UpstreamStore::new();
        store
            .insert(UpstreamDefinition::new("u1", "http://127.0.0.1:40001"))
            .await
            .unwrap();
        assert!(matches!(
            store
                .insert(UpstreamDefinition::new("u2", "http://127.0.0.1:40001/"))
                .await,
            Err(StoreError::DuplicateUrl(_))
        ));

        // A disabled upstream may share the url.
        let mut disabled = UpstreamDefinition::new("u3", "http://127.0.0.1:40001");
        disabled.is_disabled = true;
        store.insert(disabled).await.unwrap();
    }

    #[tokio::test]
    async fn test_status_transition_updates_last_seen() {
        let store = UpstreamStore::new();
        store
            .insert(UpstreamDefinition::new("u1", "http://127.0.0.1:40001"))
            .await
            .unwrap();
        assert!(store.get("u1").await.unwrap().last_seen.is_none());

        store.set_status("u1", UpstreamStatus::Online).await;
        let definition = store.get("u1").await.unwrap();
        assert_eq!(definition.status, UpstreamStatus::Online);
        assert!(definition.last_seen.is_some());
    }

    #[tokio::test]
    async fn test_disable_marks_offline() {
        let store = UpstreamStore::new();
        store
            .insert(UpstreamDefinition::new("u1", "http://127.0.0.1:40001"))
            .await
            .unwrap();
        store.set_status("u1", UpstreamStatus::Online).await;

        let definition = store.set_disabled("u1", true).await.unwrap();
        assert!(definition.is_disabled);
        assert_eq!(definition.status, UpstreamStatus::Offline);
    }
}
