//! Capability Discovery
//!
//! Runs the three list queries (`tools/list`, `prompts/list`,
//! `resources/list`) against a named upstream, normalizes the records with
//! source attribution, and replaces the upstream's catalog entries. Partial
//! failure is explicit: kinds registered before the failing call stay
//! registered.
//!
//! A refresh scheduler wraps the discoverer, re-running it per upstream on a
//! fixed interval; individual failures feed an operator callback and never
//! disturb the schedule.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tokio_util::sync::CancellationToken;

use super::catalog::CapabilityCatalog;
use super::registry::{RegistryError, TransportRegistry};
use super::transport::{TransportError, TransportResult};
use super::types::{CapabilityKind, JsonRpcId, JsonRpcRequest};

/// Maximum retry attempts per list call for transient failures.
const LIST_MAX_RETRIES: usize = 2;

/// Initial backoff for list-call retries.
const LIST_RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Error type for discovery operations
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("upstream not found: {0}")]
    ServerNotFound(String),

    #[error("discovery failed for '{name}': {reason}")]
    ConnectionFailed { name: String, reason: String },

    #[error("tools discovery failed for '{name}': {reason}")]
    ToolsDiscoveryFailed { name: String, reason: String },

    #[error("prompts discovery failed for '{name}': {reason}")]
    PromptsDiscoveryFailed { name: String, reason: String },

    #[error("resources discovery failed for '{name}': {reason}")]
    ResourcesDiscoveryFailed { name: String, reason: String },
}

/// Result type for discovery operations
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// What one discovery pass registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoverySummary {
    pub tools: usize,
    pub prompts: usize,
    pub resources: usize,
}

/// Runs list queries against upstreams and feeds the catalog.
pub struct Discoverer {
    registry: Arc<TransportRegistry>,
    catalog: Arc<CapabilityCatalog>,
}

impl Discoverer {
    pub fn new(registry: Arc<TransportRegistry>, catalog: Arc<CapabilityCatalog>) -> Self {
        Self { registry, catalog }
    }

    /// Discover every capability kind of `name`, replacing its catalog
    /// entries kind by kind.
    ///
    /// Connects the transport first when needed. Fails with a kind-specific
    /// error on the first list call that cannot be completed; kinds
    /// registered before that point remain in the catalog.
    pub async fn discover(&self, name: &str) -> DiscoveryResult<DiscoverySummary> {
        if !self.registry.is_connected(name).await {
            self.registry.connect(name).await.map_err(|e| match e {
                RegistryError::NotFound(n) => DiscoveryError::ServerNotFound(n),
                other => DiscoveryError::ConnectionFailed {
                    name: name.to_string(),
                    reason: other.to_string(),
                },
            })?;
        }

        let mut summary = DiscoverySummary::default();
        let tools_failed = |e: &dyn std::fmt::Display| DiscoveryError::ToolsDiscoveryFailed {
            name: name.to_string(),
            reason: e.to_string(),
        };
        let prompts_failed = |e: &dyn std::fmt::Display| DiscoveryError::PromptsDiscoveryFailed {
            name: name.to_string(),
            reason: e.to_string(),
        };
        let resources_failed =
            |e: &dyn std::fmt::Display| DiscoveryError::ResourcesDiscoveryFailed {
                name: name.to_string(),
                reason: e.to_string(),
            };

        let mut tools: Vec<super::types::ToolRecord> = self
            .list_kind(name, CapabilityKind::Tool)
            .await
            .map_err(|e| tools_failed(&e))?;
        for tool in &mut tools {
            tool.source = name.to_string();
        }
        summary.tools = tools.len();
        self.catalog
            .replace_tools(name, tools)
            .await
            .map_err(|e| tools_failed(&e))?;

        let mut prompts: Vec<super::types::PromptRecord> = self
            .list_kind(name, CapabilityKind::Prompt)
            .await
            .map_err(|e| prompts_failed(&e))?;
        for prompt in &mut prompts {
            prompt.source = name.to_string();
        }
        summary.prompts = prompts.len();
        self.catalog
            .replace_prompts(name, prompts)
            .await
            .map_err(|e| prompts_failed(&e))?;

        let mut resources: Vec<super::types::ResourceRecord> = self
            .list_kind(name, CapabilityKind::Resource)
            .await
            .map_err(|e| resources_failed(&e))?;
        for resource in &mut resources {
            resource.source = name.to_string();
        }
        summary.resources = resources.len();
        self.catalog
            .replace_resources(name, resources)
            .await
            .map_err(|e| resources_failed(&e))?;

        tracing::info!(
            upstream = %name,
            tools = summary.tools,
            prompts = summary.prompts,
            resources = summary.resources,
            "Discovery complete"
        );
        Ok(summary)
    }

    /// One list call with transient-failure retries, parsed as the kind's
    /// record array.
    async fn list_kind<T: DeserializeOwned>(
        &self,
        name: &str,
        kind: CapabilityKind,
    ) -> TransportResult<Vec<T>> {
        let transport = match self.registry.get(name).await {
            Some(t) => t,
            None => return Err(TransportError::NotConnected),
        };

        let strategy = ExponentialBackoff::from_millis(LIST_RETRY_BASE_DELAY.as_millis() as u64)
            .max_delay(Duration::from_secs(2))
            .take(LIST_MAX_RETRIES)
            .map(jitter);

        let result: TransportResult<serde_json::Value> = Retry::spawn(strategy, || async {
            let request = JsonRpcRequest::new(
                JsonRpcId::String(format!("discover-{}-{}", kind, uuid::Uuid::new_v4())),
                kind.list_method(),
                Some(serde_json::json!({})),
            );
            let result = transport.request(request).await;
            match &result {
                Ok(_) => Ok(result),
                Err(e) if e.retryable() => {
                    tracing::debug!(upstream = %name, kind = %kind, error = %e, "Transient list failure, retrying");
                    Err(result)
                }
                Err(_) => Ok(result),
            }
        })
        .await
        .unwrap_or_else(|e| e);

        let value = result?;
        let records = value
            .get(kind.list_property())
            .cloned()
            .ok_or_else(|| {
                TransportError::InvalidMessage(format!(
                    "{} result is missing '{}'",
                    kind.list_method(),
                    kind.list_property()
                ))
            })?;
        serde_json::from_value(records)
            .map_err(|e| TransportError::InvalidMessage(e.to_string()))
    }
}

// =============================================================================
// Refresh Scheduler
// =============================================================================

/// Callback invoked when a scheduled refresh fails.
pub type RefreshErrorHook = Arc<dyn Fn(&str, &DiscoveryError) + Send + Sync>;
/// Callback invoked when a scheduled refresh succeeds.
pub type RefreshSuccessHook = Arc<dyn Fn(&str, &DiscoverySummary) + Send + Sync>;

/// Periodically re-discovers configured upstreams.
pub struct RefreshScheduler {
    discoverer: Arc<Discoverer>,
    interval: Duration,
    on_success: RefreshSuccessHook,
    on_error: RefreshErrorHook,
    tasks: tokio::sync::Mutex<HashMap<String, JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl RefreshScheduler {
    pub fn new(
        discoverer: Arc<Discoverer>,
        interval: Duration,
        on_success: RefreshSuccessHook,
        on_error: RefreshErrorHook,
    ) -> Self {
        Self {
            discoverer,
            interval,
            on_success,
            on_error,
            tasks: tokio::sync::Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Start refreshing `name`: one pass immediately, then every interval.
    /// Re-watching a name restarts its schedule.
    pub async fn watch(&self, name: &str) {
        let discoverer = self.discoverer.clone();
        let interval = self.interval;
        let on_success = self.on_success.clone();
        let on_error = self.on_error.clone();
        let shutdown = self.shutdown.clone();
        let upstream = name.to_string();

        let task = tokio::spawn(async move {
            loop {
                match discoverer.discover(&upstream).await {
                    Ok(summary) => on_success(&upstream, &summary),
                    Err(e) => {
                        tracing::warn!(upstream = %upstream, error = %e, "Scheduled refresh failed");
                        on_error(&upstream, &e);
                    }
                }
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });

        if let Some(prior) = self.tasks.lock().await.insert(name.to_string(), task) {
            prior.abort();
        }
    }

    /// Stop refreshing `name`.
    pub async fn unwatch(&self, name: &str) {
        if let Some(task) = self.tasks.lock().await.remove(name) {
            task.abort();
        }
    }

    /// Stop every refresh task.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        for (_, task) in self.tasks.lock().await.drain() {
            task.abort();
        }
    }
}
