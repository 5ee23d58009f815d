//! Virtual-Server Runtime Status
//!
//! The live status cell shared between the manager (which owns definitions)
//! and a running instance (which observes source health). Every transition
//! bumps `updated_at` so the management API reflects it within one
//! observation cycle.

use std::sync::Mutex;

use nexus_shared::{SourceHealth, SourceStatus, VmcpId, VmcpStatus};
use time::OffsetDateTime;

use crate::mcp::types::CapabilityKind;

/// Error type for virtual-server operations
#[derive(Debug, thiserror::Error)]
pub enum VmcpError {
    #[error("port {0} is unavailable")]
    PortUnavailable(u16),

    #[error("port {port} is outside the allowed range {start}-{end}")]
    PortOutOfRange { port: u16, start: u16, end: u16 },

    #[error("unknown source server: {0}")]
    UnknownSource(String),

    #[error("virtual server matches no capabilities")]
    StartupNoCapabilities,

    #[error("virtual server not found: {0}")]
    NotFound(VmcpId),

    #[error("virtual server is not running: {0}")]
    InstanceNotRunning(VmcpId),

    #[error("no route for {kind} '{identifier}'")]
    CapabilityUnmapped {
        kind: CapabilityKind,
        identifier: String,
    },

    #[error("virtual-server limit reached ({0})")]
    TooManyInstances(usize),

    #[error(transparent)]
    Validation(#[from] nexus_shared::ValidationError),
}

/// Result type for virtual-server operations
pub type VmcpResult<T> = Result<T, VmcpError>;

struct RuntimeInner {
    status: VmcpStatus,
    sources: Vec<SourceStatus>,
    /// True between a successful start and the matching stop; source-health
    /// recomputation only applies while serving.
    serving: bool,
    updated_at: OffsetDateTime,
}

/// Live status of one virtual server.
pub struct VmcpRuntime {
    inner: Mutex<RuntimeInner>,
}

impl VmcpRuntime {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RuntimeInner {
                status: VmcpStatus::Stopped,
                sources: Vec::new(),
                serving: false,
                updated_at: OffsetDateTime::now_utc(),
            }),
        }
    }

    /// Force a lifecycle status (manager-driven transitions).
    pub fn set_status(&self, status: VmcpStatus) {
        let mut inner = self.inner.lock().unwrap();
        inner.status = status;
        inner.serving = status == VmcpStatus::Running;
        if status == VmcpStatus::Stopped {
            inner.sources.clear();
        }
        inner.updated_at = OffsetDateTime::now_utc();
    }

    /// Mark a successful start: all sources healthy, status running.
    pub fn mark_running(&self, sources: &[String]) {
        let mut inner = self.inner.lock().unwrap();
        inner.status = VmcpStatus::Running;
        inner.serving = true;
        inner.sources = sources.iter().map(SourceStatus::healthy).collect();
        inner.updated_at = OffsetDateTime::now_utc();
    }

    /// Record the health of one source and derive the overall status:
    /// all healthy => running, some => partially degraded, none => error.
    pub fn set_source_health(&self, name: &str, health: SourceHealth, error: Option<String>) {
        let mut inner = self.inner.lock().unwrap();
        let Some(entry) = inner.sources.iter_mut().find(|s| s.name == name) else {
            return;
        };
        if entry.status == health && entry.last_error == error {
            return;
        }
        entry.status = health;
        entry.last_error = error;

        if inner.serving {
            let healthy = inner
                .sources
                .iter()
                .filter(|s| s.status == SourceHealth::Ok)
                .count();
            inner.status = if healthy == inner.sources.len() {
                VmcpStatus::Running
            } else if healthy > 0 {
                VmcpStatus::PartiallyDegraded
            } else {
                VmcpStatus::Error
            };
        }
        inner.updated_at = OffsetDateTime::now_utc();
    }

    /// Whether requests may be routed to `name` right now.
    pub fn source_is_healthy(&self, name: &str) -> bool {
        self.inner
            .lock()
            .unwrap()
            .sources
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.status == SourceHealth::Ok)
            .unwrap_or(false)
    }

    pub fn status(&self) -> VmcpStatus {
        self.inner.lock().unwrap().status
    }

    /// Point-in-time view: status, per-source health, last transition time.
    pub fn snapshot(&self) -> (VmcpStatus, Vec<SourceStatus>, OffsetDateTime) {
        let inner = self.inner.lock().unwrap();
        (inner.status, inner.sources.clone(), inner.updated_at)
    }
}

impl Default for VmcpRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degradation_ladder() {
        let runtime = VmcpRuntime::new();
        runtime.mark_running(&["u1".to_string(), "u2".to_string()]);
        assert_eq!(runtime.status(), VmcpStatus::Running);

        runtime.set_source_health("u1", SourceHealth::Error, Some("gone".to_string()));
        assert_eq!(runtime.status(), VmcpStatus::PartiallyDegraded);
        assert!(!runtime.source_is_healthy("u1"));
        assert!(runtime.source_is_healthy("u2"));

        runtime.set_source_health("u2", SourceHealth::Error, Some("gone".to_string()));
        assert_eq!(runtime.status(), VmcpStatus::Error);

        runtime.set_source_health("u1", SourceHealth::Ok, None);
        assert_eq!(runtime.status(), VmcpStatus::PartiallyDegraded);
        runtime.set_source_health("u2", SourceHealth::Ok, None);
        assert_eq!(runtime.status(), VmcpStatus::Running);
    }

    #[test]
    fn test_sole_source_down_is_error_not_degraded() {
        let runtime = VmcpRuntime::new();
        runtime.mark_running(&["only".to_string()]);
        runtime.set_source_health("only", SourceHealth::Error, None);
        assert_eq!(runtime.status(), VmcpStatus::Error);
    }

    #[test]
    fn test_health_events_ignored_while_stopped() {
        let runtime = VmcpRuntime::new();
        runtime.mark_running(&["u1".to_string()]);
        runtime.set_status(VmcpStatus::Stopped);

        runtime.set_source_health("u1", SourceHealth::Error, None);
        assert_eq!(runtime.status(), VmcpStatus::Stopped);
    }

    #[test]
    fn test_transitions_bump_updated_at() {
        let runtime = VmcpRuntime::new();
        let (_, _, before) = runtime.snapshot();
        runtime.set_status(VmcpStatus::Starting);
        let (_, _, after) = runtime.snapshot();
        assert!(after >= before);
    }
}
