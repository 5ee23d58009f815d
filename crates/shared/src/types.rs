//! Common types used across Nexus

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::ValidationError;

// =============================================================================
// ID Wrappers
// =============================================================================

/// Virtual-server (vMCP) ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VmcpId(pub Uuid);

impl VmcpId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for VmcpId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for VmcpId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for VmcpId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

// =============================================================================
// Upstream Servers
// =============================================================================

/// Runtime status of an upstream MCP server connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamStatus {
    Online,
    Offline,
    Error,
}

impl Default for UpstreamStatus {
    fn default() -> Self {
        Self::Offline
    }
}

/// Definition of an upstream MCP server, as managed through the API.
///
/// The `name` doubles as the server's id everywhere in the gateway; it must
/// be unique, and `url` + port must be unique across enabled upstreams.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamDefinition {
    pub name: String,
    pub url: String,
    /// Bearer token sent as `Authorization: Bearer …` on every request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub is_disabled: bool,
    #[serde(default)]
    pub status: UpstreamStatus,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_seen: Option<OffsetDateTime>,
}

impl UpstreamDefinition {
    /// Build a definition in its initial (offline, never seen) state.
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            auth_token: None,
            is_disabled: false,
            status: UpstreamStatus::Offline,
            last_seen: None,
        }
    }

    /// Structural validation: non-empty name and url.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if self.url.trim().is_empty() {
            return Err(ValidationError::EmptyUrl);
        }
        Ok(())
    }
}

// =============================================================================
// Aggregation Rules
// =============================================================================

/// A selection rule applied when building a virtual server's merged view.
///
/// Multiple rules combine by union; a kind no rule mentions contributes
/// nothing unless `aggregate_all` is present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AggregationRule {
    AggregateAll,
    IncludeTools { names: Vec<String> },
    IncludePrompts { names: Vec<String> },
    IncludeResources { uris: Vec<String> },
}

// =============================================================================
// Virtual Servers
// =============================================================================

/// Lifecycle status of a virtual server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VmcpStatus {
    Stopped,
    Starting,
    Running,
    Error,
    PartiallyDegraded,
}

impl Default for VmcpStatus {
    fn default() -> Self {
        Self::Stopped
    }
}

/// Health of a single source as observed by a running virtual server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceHealth {
    Ok,
    Error,
}

/// Per-source status entry reported in `underlyingServersStatus`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceStatus {
    pub name: String,
    pub status: SourceHealth,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl SourceStatus {
    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: SourceHealth::Ok,
            last_error: None,
        }
    }

    pub fn failed(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: SourceHealth::Error,
            last_error: Some(error.into()),
        }
    }
}

/// Request payload for creating a virtual server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewVirtualServer {
    pub name: String,
    pub port: u16,
    pub source_server_ids: Vec<String>,
    pub aggregation_rules: Vec<AggregationRule>,
}

impl NewVirtualServer {
    /// Structural validation: name, port, at least one source, at least one
    /// rule, no repeated sources.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        if self.source_server_ids.is_empty() {
            return Err(ValidationError::NoSources);
        }
        if self.aggregation_rules.is_empty() {
            return Err(ValidationError::NoRules);
        }
        let mut seen = HashSet::new();
        for source in &self.source_server_ids {
            if !seen.insert(source.as_str()) {
                return Err(ValidationError::DuplicateSource(source.clone()));
            }
        }
        Ok(())
    }
}

/// Full virtual-server definition as reported by the management API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualServerDefinition {
    pub id: VmcpId,
    pub name: String,
    pub port: u16,
    pub source_server_ids: Vec<String>,
    pub aggregation_rules: Vec<AggregationRule>,
    pub status: VmcpStatus,
    #[serde(default)]
    pub underlying_servers_status: Vec<SourceStatus>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl VirtualServerDefinition {
    /// Materialize a definition from a validated creation request.
    pub fn from_request(request: NewVirtualServer) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: VmcpId::new(),
            name: request.name,
            port: request.port,
            source_server_ids: request.source_server_ids,
            aggregation_rules: request.aggregation_rules,
            status: VmcpStatus::Stopped,
            underlying_servers_status: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> NewVirtualServer {
        NewVirtualServer {
            name: "dev-tools".to_string(),
            port: 5001,
            source_server_ids: vec!["github".to_string()],
            aggregation_rules: vec![AggregationRule::AggregateAll],
        }
    }

    #[test]
    fn test_valid_request() {
        assert!(request().validate().is_ok());
    }

    #[test]
    fn test_request_requires_sources_and_rules() {
        let mut r = request();
        r.source_server_ids.clear();
        assert_eq!(r.validate(), Err(ValidationError::NoSources));

        let mut r = request();
        r.aggregation_rules.clear();
        assert_eq!(r.validate(), Err(ValidationError::NoRules));
    }

    #[test]
    fn test_request_rejects_duplicate_sources() {
        let mut r = request();
        r.source_server_ids.push("github".to_string());
        assert_eq!(
            r.validate(),
            Err(ValidationError::DuplicateSource("github".to_string()))
        );
    }

    #[test]
    fn test_aggregation_rule_wire_format() {
        let rule: AggregationRule =
            serde_json::from_str(r#"{"type":"include_tools","names":["a","c"]}"#).unwrap();
        assert_eq!(
            rule,
            AggregationRule::IncludeTools {
                names: vec!["a".to_string(), "c".to_string()]
            }
        );

        let all = serde_json::to_value(AggregationRule::AggregateAll).unwrap();
        assert_eq!(all, serde_json::json!({"type":"aggregate_all"}));
    }

    #[test]
    fn test_definition_starts_stopped() {
        let def = VirtualServerDefinition::from_request(request());
        assert_eq!(def.status, VmcpStatus::Stopped);
        assert_eq!(def.created_at, def.updated_at);
    }
}
