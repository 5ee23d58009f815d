//! Virtual-Server Manager
//!
//! Process-wide store of virtual-server definitions plus their lifecycle.
//! Validation on add covers structure, source cross-references, and port
//! uniqueness against both the management port and every other definition
//! (running or not); the listener bind at start remains the last word on
//! whether a port is actually free.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use nexus_shared::{
    AggregationRule, NewVirtualServer, VirtualServerDefinition, VmcpId, VmcpStatus,
};
use time::OffsetDateTime;

use crate::config::VmcpLimits;
use crate::mcp::{CapabilityCatalog, TransportRegistry};
use crate::state::UpstreamStore;

use super::instance::VmcpInstance;
use super::runtime::{VmcpError, VmcpResult, VmcpRuntime};

struct VmcpEntry {
    id: VmcpId,
    name: String,
    port: u16,
    source_server_ids: Vec<String>,
    aggregation_rules: Vec<AggregationRule>,
    created_at: OffsetDateTime,
    runtime: Arc<VmcpRuntime>,
    /// Holding this lock serializes start/stop per definition.
    instance: Mutex<Option<Arc<VmcpInstance>>>,
}

impl VmcpEntry {
    fn snapshot(&self) -> VirtualServerDefinition {
        let (status, underlying, updated_at) = self.runtime.snapshot();
        VirtualServerDefinition {
            id: self.id,
            name: self.name.clone(),
            port: self.port,
            source_server_ids: self.source_server_ids.clone(),
            aggregation_rules: self.aggregation_rules.clone(),
            status,
            underlying_servers_status: underlying,
            created_at: self.created_at,
            updated_at,
        }
    }
}

/// Owns virtual-server definitions and their running instances.
pub struct VmcpManager {
    registry: Arc<TransportRegistry>,
    catalog: Arc<CapabilityCatalog>,
    upstreams: Arc<UpstreamStore>,
    management_port: u16,
    limits: VmcpLimits,
    entries: RwLock<HashMap<VmcpId, Arc<VmcpEntry>>>,
}

impl VmcpManager {
    pub fn new(
        registry: Arc<TransportRegistry>,
        catalog: Arc<CapabilityCatalog>,
        upstreams: Arc<UpstreamStore>,
        management_port: u16,
        limits: VmcpLimits,
    ) -> Self {
        Self {
            registry,
            catalog,
            upstreams,
            management_port,
            limits,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Validate and register a definition, then attempt to start it.
    ///
    /// A failed auto-start leaves the definition in place with status
    /// `error`; the returned snapshot reflects the outcome.
    pub async fn add(&self, request: NewVirtualServer) -> VmcpResult<VirtualServerDefinition> {
        request.validate()?;

        for source in &request.source_server_ids {
            if !self.upstreams.contains(source).await {
                return Err(VmcpError::UnknownSource(source.clone()));
            }
        }

        let entry = {
            let mut entries = self.entries.write().await;
            if let Some(max) = self.limits.max_instances {
                if entries.len() >= max {
                    return Err(VmcpError::TooManyInstances(max));
                }
            }
            self.check_port(request.port, &entries)?;

            let entry = Arc::new(VmcpEntry {
                id: VmcpId::new(),
                name: request.name,
                port: request.port,
                source_server_ids: request.source_server_ids,
                aggregation_rules: request.aggregation_rules,
                created_at: OffsetDateTime::now_utc(),
                runtime: Arc::new(VmcpRuntime::new()),
                instance: Mutex::new(None),
            });
            entries.insert(entry.id, entry.clone());
            entry
        };
        tracing::info!(vmcp = %entry.name, id = %entry.id, port = entry.port, "Virtual server defined");

        if let Err(e) = self.start(entry.id).await {
            tracing::error!(vmcp = %entry.name, error = %e, "Auto-start failed");
        }
        Ok(entry.snapshot())
    }

    /// Start (or restart) the definition's listener.
    pub async fn start(&self, id: VmcpId) -> VmcpResult<()> {
        let entry = self.entry(id).await?;
        let mut slot = entry.instance.lock().await;

        if let Some(prior) = slot.take() {
            prior.stop().await;
        }
        entry.runtime.set_status(VmcpStatus::Starting);

        let definition = entry.snapshot();
        match VmcpInstance::start(
            &definition,
            &self.catalog,
            self.registry.clone(),
            entry.runtime.clone(),
        )
        .await
        {
            Ok(instance) => {
                *slot = Some(Arc::new(instance));
                Ok(())
            }
            Err(e) => {
                entry.runtime.set_status(VmcpStatus::Error);
                Err(e)
            }
        }
    }

    /// Stop the definition's listener. A second stop is a no-op.
    pub async fn stop(&self, id: VmcpId) -> VmcpResult<()> {
        let entry = self.entry(id).await?;
        let mut slot = entry.instance.lock().await;
        match slot.take() {
            Some(instance) => instance.stop().await,
            None => {
                if entry.runtime.status() != VmcpStatus::Stopped {
                    entry.runtime.set_status(VmcpStatus::Stopped);
                }
            }
        }
        Ok(())
    }

    /// Best-effort stop, then delete the definition.
    pub async fn remove(&self, id: VmcpId) -> VmcpResult<()> {
        self.stop(id).await?;
        self.entries.write().await.remove(&id);
        tracing::info!(id = %id, "Virtual server removed");
        Ok(())
    }

    pub async fn get(&self, id: VmcpId) -> VmcpResult<VirtualServerDefinition> {
        Ok(self.entry(id).await?.snapshot())
    }

    /// Every definition, oldest first.
    pub async fn list(&self) -> Vec<VirtualServerDefinition> {
        let mut all: Vec<VirtualServerDefinition> = self
            .entries
            .read()
            .await
            .values()
            .map(|e| e.snapshot())
            .collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        all
    }

    /// Handle to the running instance, if any.
    pub async fn get_instance(&self, id: VmcpId) -> VmcpResult<Arc<VmcpInstance>> {
        let entry = self.entry(id).await?;
        let slot = entry.instance.lock().await;
        slot.clone().ok_or(VmcpError::InstanceNotRunning(id))
    }

    /// Source ids the definition depends on.
    pub async fn dependents(&self, id: VmcpId) -> VmcpResult<Vec<String>> {
        Ok(self.entry(id).await?.source_server_ids.clone())
    }

    pub async fn start_all(&self) {
        for definition in self.list().await {
            if let Err(e) = self.start(definition.id).await {
                tracing::error!(vmcp = %definition.name, error = %e, "Start failed");
            }
        }
    }

    pub async fn stop_all(&self) {
        for definition in self.list().await {
            if let Err(e) = self.stop(definition.id).await {
                tracing::error!(vmcp = %definition.name, error = %e, "Stop failed");
            }
        }
    }

    async fn entry(&self, id: VmcpId) -> VmcpResult<Arc<VmcpEntry>> {
        self.entries
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(VmcpError::NotFound(id))
    }

    fn check_port(&self, port: u16, entries: &HashMap<VmcpId, Arc<VmcpEntry>>) -> VmcpResult<()> {
        if port == self.management_port {
            return Err(VmcpError::PortUnavailable(port));
        }
        if let Some(range) = self.limits.port_range {
            if port < range.start || port > range.end {
                return Err(VmcpError::PortOutOfRange {
                    port,
                    start: range.start,
                    end: range.end,
                });
            }
        }
        if entries.values().any(|e| e.port == port) {
            return Err(VmcpError::PortUnavailable(port));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_shared::UpstreamDefinition;

    async fn manager() -> VmcpManager {
        let upstreams = Arc::new(UpstreamStore::new());
        upstreams
            .insert(UpstreamDefinition::new("u1", "http://127.0.0.1:40001"))
            .await
            .unwrap();
        VmcpManager::new(
            Arc::new(TransportRegistry::new()),
            Arc::new(CapabilityCatalog::new()),
            upstreams,
            3000,
            VmcpLimits::default(),
        )
    }

    fn request(name: &str, port: u16) -> NewVirtualServer {
        NewVirtualServer {
            name: name.to_string(),
            port,
            source_server_ids: vec!["u1".to_string()],
            aggregation_rules: vec![AggregationRule::AggregateAll],
        }
    }

    #[tokio::test]
    async fn test_add_with_unknown_source_fails() {
        let manager = manager().await;
        let mut req = request("v1", 5001);
        req.source_server_ids = vec!["ghost".to_string()];
        assert!(matches!(
            manager.add(req).await,
            Err(VmcpError::UnknownSource(_))
        ));
    }

    #[tokio::test]
    async fn test_management_port_is_reserved() {
        let manager = manager().await;
        assert!(matches!(
            manager.add(request("v1", 3000)).await,
            Err(VmcpError::PortUnavailable(3000))
        ));
    }

    #[tokio::test]
    async fn test_port_collision_with_stopped_definition_still_fails() {
        let manager = manager().await;
        // Empty catalog: auto-start fails, definition stays in `error`.
        let v1 = manager.add(request("v1", 5001)).await.unwrap();
        assert_eq!(v1.status, VmcpStatus::Error);

        // The port is taken by the definition even though nothing runs on it.
        assert!(matches!(
            manager.add(request("v2", 5001)).await,
            Err(VmcpError::PortUnavailable(5001))
        ));
    }

    #[tokio::test]
    async fn test_failed_auto_start_keeps_definition() {
        let manager = manager().await;
        let v1 = manager.add(request("v1", 5001)).await.unwrap();
        assert_eq!(v1.status, VmcpStatus::Error);
        assert!(v1.updated_at >= v1.created_at);
        assert_eq!(manager.list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_start_with_empty_view_reports_no_capabilities() {
        let manager = manager().await;
        let v1 = manager.add(request("v1", 5001)).await.unwrap();
        assert!(matches!(
            manager.start(v1.id).await,
            Err(VmcpError::StartupNoCapabilities)
        ));
    }

    #[tokio::test]
    async fn test_stop_twice_is_a_no_op() {
        let manager = manager().await;
        let v1 = manager.add(request("v1", 5001)).await.unwrap();
        manager.stop(v1.id).await.unwrap();
        let first = manager.get(v1.id).await.unwrap();
        manager.stop(v1.id).await.unwrap();
        let second = manager.get(v1.id).await.unwrap();
        assert_eq!(first.status, VmcpStatus::Stopped);
        assert_eq!(second.updated_at, first.updated_at);
    }

    #[tokio::test]
    async fn test_remove_deletes_definition() {
        let manager = manager().await;
        let v1 = manager.add(request("v1", 5001)).await.unwrap();
        manager.remove(v1.id).await.unwrap();
        assert!(matches!(
            manager.get(v1.id).await,
            Err(VmcpError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_get_instance_when_stopped_is_not_running() {
        let manager = manager().await;
        let v1 = manager.add(request("v1", 5001)).await.unwrap();
        assert!(matches!(
            manager.get_instance(v1.id).await,
            Err(VmcpError::InstanceNotRunning(_))
        ));
    }

    #[tokio::test]
    async fn test_port_range_enforced() {
        let upstreams = Arc::new(UpstreamStore::new());
        upstreams
            .insert(UpstreamDefinition::new("u1", "http://127.0.0.1:40001"))
            .await
            .unwrap();
        let manager = VmcpManager::new(
            Arc::new(TransportRegistry::new()),
            Arc::new(CapabilityCatalog::new()),
            upstreams,
            3000,
            VmcpLimits {
                max_instances: Some(1),
                port_range: Some(crate::config::PortRange {
                    start: 5000,
                    end: 6000,
                }),
            },
        );

        assert!(matches!(
            manager.add(request("v1", 9000)).await,
            Err(VmcpError::PortOutOfRange { .. })
        ));
        manager.add(request("v1", 5001)).await.unwrap();
        assert!(matches!(
            manager.add(request("v2", 5002)).await,
            Err(VmcpError::TooManyInstances(1))
        ));
    }
}
