//! Group manager: resolves a group definition against discovered backend
//! capabilities into the client-facing view.
//!
//! Tool overrides rename and re-shape backend tools; resources and prompts
//! deduplicate by URI / name with the first listed occurrence winning, which
//! makes listing order the fallback priority.

use std::{
    borrow::Cow,
    collections::{HashMap, HashSet},
    sync::Arc,
};

use parking_lot::RwLock;
use rmcp::model::{AnnotateAble, Prompt, Resource, Tool};
use serde::Serialize;
use tracing::warn;

use crate::{
    config::{Group, GroupsConfig, PromptRef, ResourceRef, ToolOverride},
    discovery::DiscoverySnapshot,
    error::{GatewayError, GatewayResult},
    transform::client_input_schema,
    uri_template,
};

/// How two resource refs in the same group collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictKind {
    ExactDuplicate,
    TemplateCoversExact,
    ExactCoveredByTemplate,
    TemplateOverlap,
}

/// Diagnostic record for a pair of overlapping resource refs, with a concrete
/// URI both sides can serve.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceConflict {
    #[serde(rename = "type")]
    pub kind: ConflictKind,
    pub a: ResourceRef,
    pub b: ResourceRef,
    pub example_uri: String,
}

pub struct GroupManager {
    groups: RwLock<Arc<GroupsConfig>>,
}

impl GroupManager {
    pub fn new(config: Arc<GroupsConfig>) -> Self {
        Self {
            groups: RwLock::new(config),
        }
    }

    /// Replace the config snapshot (reload).
    pub fn swap(&self, config: Arc<GroupsConfig>) {
        *self.groups.write() = config;
    }

    pub fn snapshot(&self) -> Arc<GroupsConfig> {
        Arc::clone(&self.groups.read())
    }

    pub fn group(&self, name: &str) -> GatewayResult<Group> {
        self.snapshot()
            .groups
            .get(name)
            .cloned()
            .ok_or_else(|| GatewayError::ConfigInvalid(format!("group '{name}' is not defined")))
    }

    pub fn group_names(&self) -> Vec<String> {
        self.snapshot().groups.keys().cloned().collect()
    }

    /// Client-facing tools for the group. Tools missing from their backend
    /// are dropped with a warning; duplicate client-visible names keep the
    /// first occurrence.
    pub fn tools_for_group(&self, group: &Group, snapshot: &DiscoverySnapshot) -> Vec<Tool> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut tools = Vec::new();

        for tool_override in &group.tools {
            let Some(backend_tool) =
                snapshot.find_tool(&tool_override.server_name, &tool_override.original_name)
            else {
                warn!(
                    group = %group.name,
                    server = %tool_override.server_name,
                    tool = %tool_override.original_name,
                    "tool not reported by backend, dropping from group view"
                );
                continue;
            };

            let client_name = tool_override.client_name().to_string();
            if !seen.insert(client_name.clone()) {
                warn!(
                    group = %group.name,
                    tool = %client_name,
                    "duplicate client-visible tool name, keeping first"
                );
                continue;
            }

            tools.push(overridden_tool(client_name, backend_tool, tool_override));
        }

        tools
    }

    /// Find the override a client-visible tool name refers to.
    pub fn tool_override<'g>(&self, group: &'g Group, client_name: &str) -> Option<&'g ToolOverride> {
        group
            .tools
            .iter()
            .find(|t| t.client_name() == client_name)
    }

    /// Client-facing resources, deduplicated by URI. The first listed ref
    /// has priority, so its server's metadata is what the client sees.
    pub fn resources_for_group(
        &self,
        group: &Group,
        snapshot: &DiscoverySnapshot,
    ) -> Vec<Resource> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut resources = Vec::new();

        for resource_ref in &group.resources {
            for raw in matching_resources(resource_ref, snapshot) {
                if seen.insert(raw.uri.clone()) {
                    resources.push(raw.clone().no_annotation());
                }
            }
        }

        resources
    }

    /// Client-facing prompts, deduplicated by name, first listed wins.
    pub fn prompts_for_group(&self, group: &Group, snapshot: &DiscoverySnapshot) -> Vec<Prompt> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut prompts = Vec::new();

        for prompt_ref in &group.prompts {
            if let Some(prompt) = snapshot.find_prompt(&prompt_ref.server_name, &prompt_ref.name) {
                if seen.insert(prompt.name.clone()) {
                    prompts.push(prompt.clone());
                }
            }
        }

        prompts
    }

    /// Ordered refs able to serve the given URI: the fallback chain for
    /// `resources/read`. Template refs match any URI in their value set.
    pub fn resource_refs_for_uri(&self, group: &Group, uri: &str) -> Vec<ResourceRef> {
        group
            .resources
            .iter()
            .filter(|r| {
                r.uri == uri
                    || (uri_template::is_template(&r.uri) && uri_template::matches(&r.uri, uri))
            })
            .cloned()
            .collect()
    }

    /// Ordered refs able to serve the given prompt name.
    pub fn prompt_refs_for_name(&self, group: &Group, name: &str) -> Vec<PromptRef> {
        group
            .prompts
            .iter()
            .filter(|p| p.name == name)
            .cloned()
            .collect()
    }

    /// Classify every conflicting pair of resource refs.
    pub fn detect_resource_conflicts(&self, refs: &[ResourceRef]) -> Vec<ResourceConflict> {
        let mut conflicts = Vec::new();
        for i in 0..refs.len() {
            for j in (i + 1)..refs.len() {
                let a = &refs[i];
                let b = &refs[j];
                let a_template = uri_template::is_template(&a.uri);
                let b_template = uri_template::is_template(&b.uri);

                let conflict = match (a_template, b_template) {
                    (false, false) if a.uri == b.uri => Some((
                        ConflictKind::ExactDuplicate,
                        a.uri.clone(),
                    )),
                    (true, false) if uri_template::matches(&a.uri, &b.uri) => {
                        Some((ConflictKind::TemplateCoversExact, b.uri.clone()))
                    }
                    (false, true) if uri_template::matches(&b.uri, &a.uri) => {
                        Some((ConflictKind::ExactCoveredByTemplate, a.uri.clone()))
                    }
                    (true, true)
                        if uri_template::overlap(&a.uri, &b.uri)
                            != uri_template::Overlap::None =>
                    {
                        Some((
                            ConflictKind::TemplateOverlap,
                            uri_template::example_uri(&a.uri),
                        ))
                    }
                    _ => None,
                };

                if let Some((kind, example_uri)) = conflict {
                    conflicts.push(ResourceConflict {
                        kind,
                        a: a.clone(),
                        b: b.clone(),
                        example_uri,
                    });
                }
            }
        }
        conflicts
    }
}

fn matching_resources<'s>(
    resource_ref: &ResourceRef,
    snapshot: &'s DiscoverySnapshot,
) -> Vec<&'s rmcp::model::RawResource> {
    let listed = snapshot.resources_for(&resource_ref.server_name);
    if uri_template::is_template(&resource_ref.uri) {
        listed
            .iter()
            .filter(|r| uri_template::matches(&resource_ref.uri, &r.uri))
            .collect()
    } else {
        listed.iter().filter(|r| r.uri == resource_ref.uri).collect()
    }
}

fn overridden_tool(client_name: String, backend: &Tool, tool_override: &ToolOverride) -> Tool {
    let description = tool_override
        .description
        .clone()
        .map(Cow::Owned)
        .or_else(|| backend.description.clone());
    let input_schema = client_input_schema(
        &backend.input_schema,
        tool_override.input_schema.as_ref(),
        tool_override.argument_mapping.as_ref(),
    );
    Tool {
        name: Cow::Owned(client_name),
        title: backend.title.clone(),
        description,
        input_schema: Arc::new(input_schema),
        output_schema: backend.output_schema.clone(),
        annotations: backend.annotations.clone(),
        icons: backend.icons.clone(),
    }
}

/// Index the group's tools by client-visible name (first occurrence wins),
/// for request-time dispatch.
pub fn tool_index(group: &Group) -> HashMap<String, &ToolOverride> {
    let mut index = HashMap::new();
    for tool_override in &group.tools {
        index
            .entry(tool_override.client_name().to_string())
            .or_insert(tool_override);
    }
    index
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::discovery::test_support::*;

    fn manager_with(group_json: serde_json::Value) -> (GroupManager, Group) {
        let name = group_json["name"].as_str().unwrap().to_string();
        let mut groups = serde_json::Map::new();
        groups.insert(name.clone(), group_json);
        let config: GroupsConfig = serde_json::from_value(json!({"groups": groups})).unwrap();
        let manager = GroupManager::new(Arc::new(config));
        let group = manager.group(&name).unwrap();
        (manager, group)
    }

    #[test]
    fn test_tools_for_group_applies_overrides() {
        let (manager, group) = manager_with(json!({
            "name": "dev",
            "tools": [
                {"serverName": "s1", "originalName": "search", "name": "find",
                 "description": "curated search"}
            ]
        }));
        let snapshot = snapshot_with(
            "s1",
            vec![test_tool_with_schema(
                "search",
                json!({"type": "object", "properties": {"q": {"type": "string"}}}),
            )],
            vec![],
            vec![],
        );

        let tools = manager.tools_for_group(&group, &snapshot);
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "find");
        assert_eq!(tools[0].description.as_deref(), Some("curated search"));
        assert!(tools[0].input_schema.contains_key("properties"));
    }

    #[test]
    fn test_missing_backend_tool_silently_dropped() {
        let (manager, group) = manager_with(json!({
            "name": "dev",
            "tools": [
                {"serverName": "s1", "originalName": "present"},
                {"serverName": "s1", "originalName": "absent"}
            ]
        }));
        let snapshot = snapshot_with("s1", vec![test_tool("present")], vec![], vec![]);

        let tools = manager.tools_for_group(&group, &snapshot);
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_ref()).collect();
        assert_eq!(names, vec!["present"]);
    }

    #[test]
    fn test_tools_for_group_is_stable() {
        let (manager, group) = manager_with(json!({
            "name": "dev",
            "tools": [{"serverName": "s1", "originalName": "a"}]
        }));
        let snapshot = snapshot_with("s1", vec![test_tool("a")], vec![], vec![]);
        let first = manager.tools_for_group(&group, &snapshot);
        let second = manager.tools_for_group(&group, &snapshot);
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a.name, b.name);
            assert_eq!(a.description, b.description);
            assert_eq!(a.input_schema, b.input_schema);
        }
    }

    #[test]
    fn test_resources_dedup_keeps_first_priority_metadata() {
        let (manager, group) = manager_with(json!({
            "name": "dev",
            "resources": [
                {"serverName": "p", "uri": "x://a"},
                {"serverName": "q", "uri": "x://a"}
            ]
        }));
        let mut snapshot = snapshot_with(
            "p",
            vec![],
            vec![test_resource("x://a", "from-p")],
            vec![],
        );
        snapshot
            .resources
            .insert("q".to_string(), vec![test_resource("x://a", "from-q")]);

        let resources = manager.resources_for_group(&group, &snapshot);
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].raw.name, "from-p");
    }

    #[test]
    fn test_template_ref_matches_listed_resources() {
        let (manager, group) = manager_with(json!({
            "name": "dev",
            "resources": [
                {"serverName": "p", "uri": "file:///logs/{date}"}
            ]
        }));
        let snapshot = snapshot_with(
            "p",
            vec![],
            vec![
                test_resource("file:///logs/2024-01-01", "day1"),
                test_resource("file:///other", "other"),
            ],
            vec![],
        );

        let resources = manager.resources_for_group(&group, &snapshot);
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].raw.name, "day1");
    }

    #[test]
    fn test_prompts_dedup_by_name() {
        let (manager, group) = manager_with(json!({
            "name": "dev",
            "prompts": [
                {"serverName": "p", "name": "greet"},
                {"serverName": "q", "name": "greet"}
            ]
        }));
        let mut snapshot = snapshot_with("p", vec![], vec![], vec![test_prompt("greet")]);
        snapshot
            .prompts
            .insert("q".to_string(), vec![test_prompt("greet")]);

        let prompts = manager.prompts_for_group(&group, &snapshot);
        assert_eq!(prompts.len(), 1);
    }

    #[test]
    fn test_empty_group_yields_empty_lists_not_errors() {
        let (manager, group) = manager_with(json!({"name": "empty"}));
        let snapshot = DiscoverySnapshot::default();
        assert!(manager.tools_for_group(&group, &snapshot).is_empty());
        assert!(manager.resources_for_group(&group, &snapshot).is_empty());
        assert!(manager.prompts_for_group(&group, &snapshot).is_empty());
    }

    #[test]
    fn test_fallback_chain_order_preserved() {
        let (manager, group) = manager_with(json!({
            "name": "dev",
            "resources": [
                {"serverName": "p", "uri": "x://a"},
                {"serverName": "q", "uri": "x://a"},
                {"serverName": "r", "uri": "x://other"}
            ]
        }));
        let refs = manager.resource_refs_for_uri(&group, "x://a");
        let servers: Vec<&str> = refs.iter().map(|r| r.server_name.as_str()).collect();
        assert_eq!(servers, vec!["p", "q"]);
    }

    #[test]
    fn test_template_refs_participate_in_fallback() {
        let (manager, group) = manager_with(json!({
            "name": "dev",
            "resources": [
                {"serverName": "p", "uri": "file:///logs/{date}"},
                {"serverName": "q", "uri": "file:///logs/2024-01-01"}
            ]
        }));
        let refs = manager.resource_refs_for_uri(&group, "file:///logs/2024-01-01");
        assert_eq!(refs.len(), 2);
        assert_eq!(refs[0].server_name, "p");
    }

    #[test]
    fn test_conflict_classification() {
        let manager = GroupManager::new(Arc::new(GroupsConfig::default()));
        let refs = vec![
            ResourceRef {
                server_name: "a".into(),
                uri: "x://same".into(),
            },
            ResourceRef {
                server_name: "b".into(),
                uri: "x://same".into(),
            },
            ResourceRef {
                server_name: "c".into(),
                uri: "x://{v}".into(),
            },
            ResourceRef {
                server_name: "d".into(),
                uri: "x://{w}".into(),
            },
        ];
        let conflicts = manager.detect_resource_conflicts(&refs);

        let kinds: Vec<ConflictKind> = conflicts.iter().map(|c| c.kind).collect();
        assert!(kinds.contains(&ConflictKind::ExactDuplicate));
        // Template listed after the literals it covers.
        assert!(kinds.contains(&ConflictKind::ExactCoveredByTemplate));
        assert!(kinds.contains(&ConflictKind::TemplateOverlap));
        for conflict in &conflicts {
            assert!(!conflict.example_uri.is_empty());
            assert!(!uri_template::is_template(&conflict.example_uri));
        }
    }

    #[test]
    fn test_conflict_template_first_covers_exact() {
        let manager = GroupManager::new(Arc::new(GroupsConfig::default()));
        let refs = vec![
            ResourceRef {
                server_name: "a".into(),
                uri: "x://{v}".into(),
            },
            ResourceRef {
                server_name: "b".into(),
                uri: "x://literal".into(),
            },
        ];
        let conflicts = manager.detect_resource_conflicts(&refs);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::TemplateCoversExact);
        assert_eq!(conflicts[0].example_uri, "x://literal");
    }

    #[test]
    fn test_conflict_kind_serializes_kebab_case() {
        let json = serde_json::to_value(ConflictKind::TemplateCoversExact).unwrap();
        assert_eq!(json, serde_json::json!("template-covers-exact"));
    }

    #[test]
    fn test_tool_index_first_wins() {
        let (_, group) = manager_with(json!({
            "name": "dev",
            "tools": [
                {"serverName": "s1", "originalName": "search", "name": "find"},
                {"serverName": "s2", "originalName": "lookup"}
            ]
        }));
        let index = tool_index(&group);
        assert_eq!(index.get("find").unwrap().server_name, "s1");
        assert_eq!(index.get("lookup").unwrap().server_name, "s2");
        assert!(!index.contains_key("search"));
    }
}
