//! Capability Aggregation
//!
//! Builds a virtual server's merged view from the catalog: expands its
//! aggregation rules, pulls entries per source in the order the definition
//! lists them, and emits an authoritative routing map alongside the
//! aggregated arrays.
//!
//! Identifier collisions across sources resolve deterministically: the first
//! source in `sourceServerIds` that contributed the identifier wins, later
//! duplicates are dropped and counted.

use std::collections::{HashMap, HashSet};

use nexus_shared::{AggregationRule, VirtualServerDefinition};

use crate::mcp::catalog::CapabilityCatalog;
use crate::mcp::types::{CapabilityKind, PromptRecord, ResourceRecord, ToolRecord};

/// Where a served identifier is actually executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub source: String,
    pub identifier: String,
}

/// Mapping from `(kind, identifier)` to its owning source.
///
/// Built once at instance start; immutable for the lifetime of a running
/// virtual server.
#[derive(Debug, Default)]
pub struct RoutingMap {
    entries: HashMap<(CapabilityKind, String), RouteTarget>,
}

impl RoutingMap {
    /// Resolve a served identifier to its source and original identifier.
    pub fn lookup(&self, kind: CapabilityKind, identifier: &str) -> Option<&RouteTarget> {
        self.entries.get(&(kind, identifier.to_string()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, kind: CapabilityKind, identifier: String, target: RouteTarget) -> bool {
        match self.entries.entry((kind, identifier)) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(target);
                true
            }
        }
    }
}

/// Duplicates dropped while merging, per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DuplicateCounts {
    pub tools: usize,
    pub prompts: usize,
    pub resources: usize,
}

impl DuplicateCounts {
    pub fn total(&self) -> usize {
        self.tools + self.prompts + self.resources
    }
}

/// A virtual server's merged capability view plus its routing map.
#[derive(Debug, Default)]
pub struct AggregatedView {
    pub tools: Vec<ToolRecord>,
    pub prompts: Vec<PromptRecord>,
    pub resources: Vec<ResourceRecord>,
    pub routing: RoutingMap,
    pub duplicates: DuplicateCounts,
}

impl AggregatedView {
    /// The view is empty exactly when the routing map is empty.
    pub fn is_empty(&self) -> bool {
        self.routing.is_empty()
    }
}

/// Per-kind selection after rule expansion.
enum Filter {
    Excluded,
    All,
    Named(HashSet<String>),
}

impl Filter {
    fn allow_all(&mut self) {
        *self = Filter::All;
    }

    fn allow_names(&mut self, names: &[String]) {
        match self {
            Filter::All => {}
            Filter::Named(set) => set.extend(names.iter().cloned()),
            Filter::Excluded => *self = Filter::Named(names.iter().cloned().collect()),
        }
    }

    fn allows(&self, identifier: &str) -> bool {
        match self {
            Filter::Excluded => false,
            Filter::All => true,
            Filter::Named(set) => set.contains(identifier),
        }
    }
}

struct Selection {
    tools: Filter,
    prompts: Filter,
    resources: Filter,
}

/// Expand rules into per-kind filters. Rules combine by union; a kind no
/// rule mentions contributes nothing.
fn expand_rules(rules: &[AggregationRule]) -> Selection {
    let mut selection = Selection {
        tools: Filter::Excluded,
        prompts: Filter::Excluded,
        resources: Filter::Excluded,
    };

    for rule in rules {
        match rule {
            AggregationRule::AggregateAll => {
                selection.tools.allow_all();
                selection.prompts.allow_all();
                selection.resources.allow_all();
            }
            AggregationRule::IncludeTools { names } => selection.tools.allow_names(names),
            AggregationRule::IncludePrompts { names } => selection.prompts.allow_names(names),
            AggregationRule::IncludeResources { uris } => selection.resources.allow_names(uris),
        }
    }
    selection
}

/// Materialize the merged view for `definition` from the current catalog.
pub async fn aggregate(
    definition: &VirtualServerDefinition,
    catalog: &CapabilityCatalog,
) -> AggregatedView {
    let selection = expand_rules(&definition.aggregation_rules);
    let mut view = AggregatedView::default();

    for source in &definition.source_server_ids {
        for tool in catalog.tools_for_source(source).await {
            if !selection.tools.allows(&tool.name) {
                continue;
            }
            let target = RouteTarget {
                source: source.clone(),
                identifier: tool.name.clone(),
            };
            if view
                .routing
                .insert(CapabilityKind::Tool, tool.name.clone(), target)
            {
                view.tools.push(tool);
            } else {
                view.duplicates.tools += 1;
            }
        }

        for prompt in catalog.prompts_for_source(source).await {
            if !selection.prompts.allows(&prompt.name) {
                continue;
            }
            let target = RouteTarget {
                source: source.clone(),
                identifier: prompt.name.clone(),
            };
            if view
                .routing
                .insert(CapabilityKind::Prompt, prompt.name.clone(), target)
            {
                view.prompts.push(prompt);
            } else {
                view.duplicates.prompts += 1;
            }
        }

        for resource in catalog.resources_for_source(source).await {
            if !selection.resources.allows(&resource.uri) {
                continue;
            }
            let target = RouteTarget {
                source: source.clone(),
                identifier: resource.uri.clone(),
            };
            if view
                .routing
                .insert(CapabilityKind::Resource, resource.uri.clone(), target)
            {
                view.resources.push(resource);
            } else {
                view.duplicates.resources += 1;
            }
        }
    }

    view
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_shared::{VmcpId, VmcpStatus};
    use serde_json::json;
    use time::OffsetDateTime;

    fn tool(source: &str, name: &str) -> ToolRecord {
        ToolRecord {
            source: source.to_string(),
            name: name.to_string(),
            description: None,
            input_schema: json!({"type": "object"}),
        }
    }

    fn definition(sources: &[&str], rules: Vec<AggregationRule>) -> VirtualServerDefinition {
        let now = OffsetDateTime::now_utc();
        VirtualServerDefinition {
            id: VmcpId::new(),
            name: "v1".to_string(),
            port: 5001,
            source_server_ids: sources.iter().map(|s| s.to_string()).collect(),
            aggregation_rules: rules,
            status: VmcpStatus::Stopped,
            underlying_servers_status: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    async fn catalog_with(tools: Vec<ToolRecord>) -> CapabilityCatalog {
        let catalog = CapabilityCatalog::new();
        for t in tools {
            catalog.register_tool(t).await.unwrap();
        }
        catalog
    }

    #[tokio::test]
    async fn test_aggregate_all_takes_everything() {
        let catalog = catalog_with(vec![tool("u1", "a"), tool("u1", "b")]).await;
        let def = definition(&["u1"], vec![AggregationRule::AggregateAll]);

        let view = aggregate(&def, &catalog).await;
        let names: Vec<&str> = view.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(view.routing.len(), 2);
    }

    #[tokio::test]
    async fn test_include_filter_keeps_listed_names_in_order() {
        let catalog = catalog_with(vec![tool("u1", "a"), tool("u1", "b"), tool("u1", "c")]).await;
        let def = definition(
            &["u1"],
            vec![AggregationRule::IncludeTools {
                names: vec!["a".to_string(), "c".to_string()],
            }],
        );

        let view = aggregate(&def, &catalog).await;
        let names: Vec<&str> = view.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
        assert!(view.routing.lookup(CapabilityKind::Tool, "b").is_none());
    }

    #[tokio::test]
    async fn test_first_source_wins_on_collision() {
        let catalog = catalog_with(vec![tool("u1", "echo"), tool("u2", "echo")]).await;
        let def = definition(&["u1", "u2"], vec![AggregationRule::AggregateAll]);

        let view = aggregate(&def, &catalog).await;
        assert_eq!(view.tools.len(), 1);
        assert_eq!(view.duplicates.tools, 1);
        let target = view.routing.lookup(CapabilityKind::Tool, "echo").unwrap();
        assert_eq!(target.source, "u1");
        assert_eq!(target.identifier, "echo");
    }

    #[tokio::test]
    async fn test_source_order_follows_definition_not_catalog() {
        let catalog = catalog_with(vec![tool("u1", "echo"), tool("u2", "echo")]).await;
        let def = definition(&["u2", "u1"], vec![AggregationRule::AggregateAll]);

        let view = aggregate(&def, &catalog).await;
        assert_eq!(
            view.routing
                .lookup(CapabilityKind::Tool, "echo")
                .unwrap()
                .source,
            "u2"
        );
    }

    #[tokio::test]
    async fn test_unmatched_rules_leave_view_empty() {
        let catalog = catalog_with(vec![tool("u1", "a")]).await;
        let def = definition(
            &["u1"],
            vec![AggregationRule::IncludeTools {
                names: vec!["nope".to_string()],
            }],
        );

        let view = aggregate(&def, &catalog).await;
        assert!(view.is_empty());
        assert!(view.tools.is_empty() && view.routing.is_empty());
    }

    #[tokio::test]
    async fn test_kind_without_rule_contributes_nothing() {
        let catalog = CapabilityCatalog::new();
        catalog.register_tool(tool("u1", "a")).await.unwrap();
        catalog
            .register_resource(ResourceRecord {
                source: "u1".to_string(),
                uri: "file:///x".to_string(),
                name: None,
                mime_type: None,
            })
            .await
            .unwrap();

        let def = definition(
            &["u1"],
            vec![AggregationRule::IncludeTools {
                names: vec!["a".to_string()],
            }],
        );
        let view = aggregate(&def, &catalog).await;
        assert_eq!(view.tools.len(), 1);
        assert!(view.resources.is_empty());
    }

    #[tokio::test]
    async fn test_rules_union() {
        let catalog = catalog_with(vec![tool("u1", "a"), tool("u1", "b"), tool("u1", "c")]).await;
        let def = definition(
            &["u1"],
            vec![
                AggregationRule::IncludeTools {
                    names: vec!["a".to_string()],
                },
                AggregationRule::IncludeTools {
                    names: vec!["b".to_string()],
                },
            ],
        );

        let view = aggregate(&def, &catalog).await;
        let names: Vec<&str> = view.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_every_listed_identifier_is_routable() {
        let catalog = catalog_with(vec![tool("u1", "a"), tool("u2", "b")]).await;
        let def = definition(&["u1", "u2"], vec![AggregationRule::AggregateAll]);

        let view = aggregate(&def, &catalog).await;
        for t in &view.tools {
            assert!(view.routing.lookup(CapabilityKind::Tool, &t.name).is_some());
        }
        assert_eq!(view.routing.len(), view.tools.len());
    }
}
