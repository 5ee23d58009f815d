//! Capability Catalog
//!
//! Per-upstream indexed sets of tools, prompts, and resources with source
//! attribution. Written only by the discoverer and by source removal; every
//! reader sees a coherent per-source view.
//!
//! Registration is validation: a record that is structurally wrong (missing
//! name, non-object tool schema) never enters the catalog.

use std::collections::{BTreeMap, HashMap};

use tokio::sync::RwLock;

use super::types::{PromptRecord, ResourceRecord, ToolRecord};

/// Error type for catalog operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("invalid tool: {0}")]
    InvalidTool(String),

    #[error("invalid prompt: {0}")]
    InvalidPrompt(String),

    #[error("invalid resource: {0}")]
    InvalidResource(String),

    #[error("duplicate tool '{name}' for source '{source_id}'")]
    DuplicateTool { source_id: String, name: String },

    #[error("duplicate prompt '{name}' for source '{source_id}'")]
    DuplicatePrompt { source_id: String, name: String },

    #[error("duplicate resource '{uri}' for source '{source_id}'")]
    DuplicateResource { source_id: String, uri: String },
}

/// Result type for catalog operations
pub type CatalogResult<T> = Result<T, CatalogError>;

#[derive(Default)]
struct CatalogInner {
    tools: HashMap<String, BTreeMap<String, ToolRecord>>,
    prompts: HashMap<String, BTreeMap<String, PromptRecord>>,
    resources: HashMap<String, BTreeMap<String, ResourceRecord>>,
}

/// Shared, read-mostly capability index.
pub struct CapabilityCatalog {
    inner: RwLock<CatalogInner>,
}

fn validate_tool(tool: &ToolRecord) -> CatalogResult<()> {
    if tool.source.trim().is_empty() {
        return Err(CatalogError::InvalidTool("missing source".to_string()));
    }
    if tool.name.trim().is_empty() {
        return Err(CatalogError::InvalidTool("missing name".to_string()));
    }
    if !tool.input_schema.is_object() {
        return Err(CatalogError::InvalidTool(format!(
            "tool '{}' inputSchema must be an object",
            tool.name
        )));
    }
    Ok(())
}

fn validate_prompt(prompt: &PromptRecord) -> CatalogResult<()> {
    if prompt.source.trim().is_empty() {
        return Err(CatalogError::InvalidPrompt("missing source".to_string()));
    }
    if prompt.name.trim().is_empty() {
        return Err(CatalogError::InvalidPrompt("missing name".to_string()));
    }
    for arg in &prompt.arguments {
        if arg.name.trim().is_empty() {
            return Err(CatalogError::InvalidPrompt(format!(
                "prompt '{}' has an unnamed argument",
                prompt.name
            )));
        }
    }
    Ok(())
}

fn validate_resource(resource: &ResourceRecord) -> CatalogResult<()> {
    if resource.source.trim().is_empty() {
        return Err(CatalogError::InvalidResource("missing source".to_string()));
    }
    if resource.uri.trim().is_empty() {
        return Err(CatalogError::InvalidResource("missing uri".to_string()));
    }
    Ok(())
}

impl CapabilityCatalog {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(CatalogInner::default()),
        }
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Validate and register one tool. Rejects a name already registered for
    /// the same source.
    pub async fn register_tool(&self, tool: ToolRecord) -> CatalogResult<()> {
        validate_tool(&tool)?;
        let mut inner = self.inner.write().await;
        let by_name = inner.tools.entry(tool.source.clone()).or_default();
        if by_name.contains_key(&tool.name) {
            return Err(CatalogError::DuplicateTool {
                source_id: tool.source,
                name: tool.name,
            });
        }
        by_name.insert(tool.name.clone(), tool);
        Ok(())
    }

    /// Validate and register one prompt.
    pub async fn register_prompt(&self, prompt: PromptRecord) -> CatalogResult<()> {
        validate_prompt(&prompt)?;
        let mut inner = self.inner.write().await;
        let by_name = inner.prompts.entry(prompt.source.clone()).or_default();
        if by_name.contains_key(&prompt.name) {
            return Err(CatalogError::DuplicatePrompt {
                source_id: prompt.source,
                name: prompt.name,
            });
        }
        by_name.insert(prompt.name.clone(), prompt);
        Ok(())
    }

    /// Validate and register one resource, keyed by uri.
    pub async fn register_resource(&self, resource: ResourceRecord) -> CatalogResult<()> {
        validate_resource(&resource)?;
        let mut inner = self.inner.write().await;
        let by_uri = inner.resources.entry(resource.source.clone()).or_default();
        if by_uri.contains_key(&resource.uri) {
            return Err(CatalogError::DuplicateResource {
                source_id: resource.source,
                uri: resource.uri,
            });
        }
        by_uri.insert(resource.uri.clone(), resource);
        Ok(())
    }

    // =========================================================================
    // Replacement (discovery)
    // =========================================================================

    /// Replace every tool registered for `source` with `tools`.
    ///
    /// The whole batch is validated first; on any invalid or duplicated
    /// record nothing changes and the prior entries survive.
    pub async fn replace_tools(&self, source: &str, tools: Vec<ToolRecord>) -> CatalogResult<()> {
        let mut by_name = BTreeMap::new();
        for tool in tools {
            validate_tool(&tool)?;
            if by_name.contains_key(&tool.name) {
                return Err(CatalogError::DuplicateTool {
                    source_id: source.to_string(),
                    name: tool.name,
                });
            }
            by_name.insert(tool.name.clone(), tool);
        }
        self.inner
            .write()
            .await
            .tools
            .insert(source.to_string(), by_name);
        Ok(())
    }

    /// Replace every prompt registered for `source` with `prompts`.
    pub async fn replace_prompts(
        &self,
        source: &str,
        prompts: Vec<PromptRecord>,
    ) -> CatalogResult<()> {
        let mut by_name = BTreeMap::new();
        for prompt in prompts {
            validate_prompt(&prompt)?;
            if by_name.contains_key(&prompt.name) {
                return Err(CatalogError::DuplicatePrompt {
                    source_id: source.to_string(),
                    name: prompt.name,
                });
            }
            by_name.insert(prompt.name.clone(), prompt);
        }
        self.inner
            .write()
            .await
            .prompts
            .insert(source.to_string(), by_name);
        Ok(())
    }

    /// Replace every resource registered for `source` with `resources`.
    pub async fn replace_resources(
        &self,
        source: &str,
        resources: Vec<ResourceRecord>,
    ) -> CatalogResult<()> {
        let mut by_uri = BTreeMap::new();
        for resource in resources {
            validate_resource(&resource)?;
            if by_uri.contains_key(&resource.uri) {
                return Err(CatalogError::DuplicateResource {
                    source_id: source.to_string(),
                    uri: resource.uri,
                });
            }
            by_uri.insert(resource.uri.clone(), resource);
        }
        self.inner
            .write()
            .await
            .resources
            .insert(source.to_string(), by_uri);
        Ok(())
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Tools registered for `source`, in name order. Empty for an unknown
    /// source.
    pub async fn tools_for_source(&self, source: &str) -> Vec<ToolRecord> {
        self.inner
            .read()
            .await
            .tools
            .get(source)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Prompts registered for `source`, in name order.
    pub async fn prompts_for_source(&self, source: &str) -> Vec<PromptRecord> {
        self.inner
            .read()
            .await
            .prompts
            .get(source)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Resources registered for `source`, in uri order.
    pub async fn resources_for_source(&self, source: &str) -> Vec<ResourceRecord> {
        self.inner
            .read()
            .await
            .resources
            .get(source)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Every registered tool, grouped by source in source-name order.
    pub async fn all_tools(&self) -> Vec<ToolRecord> {
        let inner = self.inner.read().await;
        let mut sources: Vec<&String> = inner.tools.keys().collect();
        sources.sort();
        sources
            .into_iter()
            .flat_map(|s| inner.tools[s].values().cloned().collect::<Vec<_>>())
            .collect()
    }

    /// Every registered prompt, grouped by source in source-name order.
    pub async fn all_prompts(&self) -> Vec<PromptRecord> {
        let inner = self.inner.read().await;
        let mut sources: Vec<&String> = inner.prompts.keys().collect();
        sources.sort();
        sources
            .into_iter()
            .flat_map(|s| inner.prompts[s].values().cloned().collect::<Vec<_>>())
            .collect()
    }

    /// Every registered resource, grouped by source in source-name order.
    pub async fn all_resources(&self) -> Vec<ResourceRecord> {
        let inner = self.inner.read().await;
        let mut sources: Vec<&String> = inner.resources.keys().collect();
        sources.sort();
        sources
            .into_iter()
            .flat_map(|s| inner.resources[s].values().cloned().collect::<Vec<_>>())
            .collect()
    }

    /// Drop everything registered for `source`.
    pub async fn remove_source(&self, source: &str) {
        let mut inner = self.inner.write().await;
        inner.tools.remove(source);
        inner.prompts.remove(source);
        inner.resources.remove(source);
        tracing::debug!(source = %source, "Catalog entries removed");
    }
}

impl Default for CapabilityCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool(source: &str, name: &str) -> ToolRecord {
        ToolRecord {
            source: source.to_string(),
            name: name.to_string(),
            description: None,
            input_schema: json!({"type": "object"}),
        }
    }

    #[tokio::test]
    async fn test_register_then_lookup_round_trips() {
        let catalog = CapabilityCatalog::new();
        catalog.register_tool(tool("u1", "echo")).await.unwrap();

        let tools = catalog.tools_for_source("u1").await;
        assert_eq!(tools, vec![tool("u1", "echo")]);
        assert!(catalog.tools_for_source("u2").await.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_invalid_tool_schema() {
        let catalog = CapabilityCatalog::new();
        let mut bad = tool("u1", "echo");
        bad.input_schema = json!("not an object");
        assert!(matches!(
            catalog.register_tool(bad).await,
            Err(CatalogError::InvalidTool(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_name_within_source_rejected() {
        let catalog = CapabilityCatalog::new();
        catalog.register_tool(tool("u1", "echo")).await.unwrap();
        assert!(matches!(
            catalog.register_tool(tool("u1", "echo")).await,
            Err(CatalogError::DuplicateTool { .. })
        ));
        // The same name under another source is fine.
        catalog.register_tool(tool("u2", "echo")).await.unwrap();
    }

    #[tokio::test]
    async fn test_replace_swaps_not_merges() {
        let catalog = CapabilityCatalog::new();
        catalog
            .replace_tools("u1", vec![tool("u1", "a"), tool("u1", "b")])
            .await
            .unwrap();
        catalog
            .replace_tools("u1", vec![tool("u1", "c")])
            .await
            .unwrap();

        let names: Vec<String> = catalog
            .tools_for_source("u1")
            .await
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["c"]);
    }

    #[tokio::test]
    async fn test_replace_keeps_prior_entries_on_invalid_batch() {
        let catalog = CapabilityCatalog::new();
        catalog
            .replace_tools("u1", vec![tool("u1", "a")])
            .await
            .unwrap();

        let mut bad = tool("u1", "b");
        bad.input_schema = json!(42);
        assert!(catalog
            .replace_tools("u1", vec![tool("u1", "c"), bad])
            .await
            .is_err());

        let names: Vec<String> = catalog
            .tools_for_source("u1")
            .await
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["a"]);
    }

    #[tokio::test]
    async fn test_lookup_is_identifier_ordered() {
        let catalog = CapabilityCatalog::new();
        catalog
            .replace_tools("u1", vec![tool("u1", "zeta"), tool("u1", "alpha")])
            .await
            .unwrap();
        let names: Vec<String> = catalog
            .tools_for_source("u1")
            .await
            .into_iter()
            .map(|t| t.name)
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[tokio::test]
    async fn test_remove_source_clears_all_kinds() {
        let catalog = CapabilityCatalog::new();
        catalog.register_tool(tool("u1", "echo")).await.unwrap();
        catalog
            .register_resource(ResourceRecord {
                source: "u1".to_string(),
                uri: "file:///tmp/a".to_string(),
                name: None,
                mime_type: None,
            })
            .await
            .unwrap();

        catalog.remove_source("u1").await;
        assert!(catalog.tools_for_source("u1").await.is_empty());
        assert!(catalog.resources_for_source("u1").await.is_empty());
    }
}
