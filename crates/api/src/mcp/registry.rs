//! Transport Registry
//!
//! Named collection of upstream transports. Owns transport lifecycle
//! (add/connect/disconnect/remove), serializes lifecycle operations per
//! name, and rebroadcasts connectivity transitions so the process config
//! state and running virtual servers can observe upstream health.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::{broadcast, Mutex, RwLock};

use super::transport::{ChannelStatus, SseTransport, TransportError};
use super::types::{JsonRpcId, JsonRpcRequest};

/// Error type for registry operations
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("upstream already registered: {0}")]
    Duplicate(String),

    #[error("upstream not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Connectivity transition of a named upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Channel established (initial connect or successful reconnect).
    Online { name: String },
    /// Channel lost; the transport is reconnecting, or was closed on purpose.
    Offline { name: String },
    /// Channel terminally down (reconnection exhausted).
    Errored { name: String },
}

impl TransportEvent {
    /// Name of the upstream the event concerns.
    pub fn name(&self) -> &str {
        match self {
            TransportEvent::Online { name }
            | TransportEvent::Offline { name }
            | TransportEvent::Errored { name } => name,
        }
    }
}

struct RegistryEntry {
    transport: Arc<SseTransport>,
    /// Serializes connect/disconnect per name.
    ops: Mutex<()>,
}

struct RegistryInner {
    entries: RwLock<HashMap<String, Arc<RegistryEntry>>>,
    events: broadcast::Sender<TransportEvent>,
}

/// Named collection of upstream transports.
pub struct TransportRegistry {
    inner: Arc<RegistryInner>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(RegistryInner {
                entries: RwLock::new(HashMap::new()),
                events,
            }),
        }
    }

    /// Subscribe to connectivity transitions of every registered upstream.
    pub fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.inner.events.subscribe()
    }

    /// Register a transport under `name`. A second `add` for the same name is
    /// rejected.
    ///
    /// The registry takes the transport's status and close hooks: status
    /// transitions are rebroadcast as [`TransportEvent`]s, and a terminal
    /// stream-side close removes the entry.
    pub async fn add(&self, name: impl Into<String>, transport: SseTransport) -> RegistryResult<()> {
        let name = name.into();
        let mut entries = self.inner.entries.write().await;
        if entries.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }

        let weak: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        let status_name = name.clone();
        let status_weak = weak.clone();
        transport.set_status_hook(Arc::new(move |status| {
            if let Some(inner) = status_weak.upgrade() {
                let event = match status {
                    ChannelStatus::Online => TransportEvent::Online {
                        name: status_name.clone(),
                    },
                    ChannelStatus::Offline => TransportEvent::Offline {
                        name: status_name.clone(),
                    },
                    ChannelStatus::Errored => TransportEvent::Errored {
                        name: status_name.clone(),
                    },
                };
                let _ = inner.events.send(event);
            }
        }));

        let close_name = name.clone();
        transport.set_on_close(Arc::new(move || {
            if let Some(inner) = weak.upgrade() {
                let close_name = close_name.clone();
                tokio::spawn(async move {
                    tracing::warn!(upstream = %close_name, "Channel terminally closed, dropping registry entry");
                    inner.entries.write().await.remove(&close_name);
                });
            }
        }));

        entries.insert(
            name.clone(),
            Arc::new(RegistryEntry {
                transport: Arc::new(transport),
                ops: Mutex::new(()),
            }),
        );
        tracing::info!(upstream = %name, "Transport registered");
        Ok(())
    }

    /// Open the named transport's channel. No-op when already connected.
    ///
    /// After the channel comes up, the MCP `initialize` handshake is played
    /// through it; handshake refusal is logged but does not fail the connect.
    pub async fn connect(&self, name: &str) -> RegistryResult<()> {
        let entry = self.entry(name).await?;
        let _guard = entry.ops.lock().await;
        if entry.transport.is_connected() {
            return Ok(());
        }
        entry.transport.start().await?;

        match self.initialize_handshake(&entry.transport).await {
            Ok(()) => {}
            Err(e) => {
                tracing::warn!(upstream = %name, error = %e, "Initialize handshake declined");
            }
        }
        Ok(())
    }

    /// Close the named transport's channel; the entry stays registered.
    pub async fn disconnect(&self, name: &str) -> RegistryResult<()> {
        let entry = self.entry(name).await?;
        let _guard = entry.ops.lock().await;
        entry.transport.close().await;
        let _ = self.inner.events.send(TransportEvent::Offline {
            name: name.to_string(),
        });
        Ok(())
    }

    /// Close and drop the named transport.
    pub async fn remove(&self, name: &str) -> RegistryResult<()> {
        let entry = {
            let mut entries = self.inner.entries.write().await;
            entries
                .remove(name)
                .ok_or_else(|| RegistryError::NotFound(name.to_string()))?
        };
        let _guard = entry.ops.lock().await;
        entry.transport.close().await;
        let _ = self.inner.events.send(TransportEvent::Offline {
            name: name.to_string(),
        });
        tracing::info!(upstream = %name, "Transport removed");
        Ok(())
    }

    /// Shared handle to the named transport.
    pub async fn get(&self, name: &str) -> Option<Arc<SseTransport>> {
        self.inner
            .entries
            .read()
            .await
            .get(name)
            .map(|e| e.transport.clone())
    }

    /// Issue a correlated request through the named transport.
    pub async fn request(
        &self,
        name: &str,
        request: JsonRpcRequest,
    ) -> RegistryResult<serde_json::Value> {
        let entry = self.entry(name).await?;
        Ok(entry.transport.request(request).await?)
    }

    /// Whether the named transport currently has an open channel.
    pub async fn is_connected(&self, name: &str) -> bool {
        match self.inner.entries.read().await.get(name) {
            Some(entry) => entry.transport.is_connected(),
            None => false,
        }
    }

    /// Names of every registered transport, sorted.
    pub async fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.entries.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Close every transport. Used on process shutdown.
    pub async fn close_all(&self) {
        let entries: Vec<Arc<RegistryEntry>> = {
            let mut map = self.inner.entries.write().await;
            map.drain().map(|(_, e)| e).collect()
        };
        for entry in entries {
            entry.transport.close().await;
        }
    }

    async fn entry(&self, name: &str) -> RegistryResult<Arc<RegistryEntry>> {
        self.inner
            .entries
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    async fn initialize_handshake(&self, transport: &SseTransport) -> RegistryResult<()> {
        let request = JsonRpcRequest::new(
            JsonRpcId::String(format!("init-{}", uuid::Uuid::new_v4())),
            "initialize",
            Some(serde_json::json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {
                    "name": "Nexus",
                    "version": env!("CARGO_PKG_VERSION"),
                }
            })),
        );
        transport.request(request).await?;

        transport
            .send(super::types::JsonRpcMessage::Notification(
                JsonRpcRequest::notification("notifications/initialized", None),
            ))
            .await?;
        Ok(())
    }
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::new()
    }
}
