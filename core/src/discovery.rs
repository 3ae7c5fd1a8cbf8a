//! Discovery cache: what each backend advertises.
//!
//! A snapshot maps server name -> tools/resources/prompts as reported by
//! `tools/list`, `resources/list`, and `prompts/list`. Snapshots are
//! immutable; a refresh builds a new one and swaps the `Arc`, so readers
//! never observe a torn view. One backend failing discovery never affects
//! the others.

use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use rmcp::model::{Prompt, RawResource, Tool};
use tokio::{sync::mpsc, task::JoinSet};
use tracing::{debug, info, warn};

use crate::pool::{ClientPool, McpClient, RefreshRequest};

#[derive(Debug, Clone, Default)]
pub struct DiscoverySnapshot {
    pub tools: HashMap<String, Vec<Tool>>,
    pub resources: HashMap<String, Vec<RawResource>>,
    pub prompts: HashMap<String, Vec<Prompt>>,
}

impl DiscoverySnapshot {
    pub fn tools_for(&self, server: &str) -> &[Tool] {
        self.tools.get(server).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn resources_for(&self, server: &str) -> &[RawResource] {
        self.resources.get(server).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn prompts_for(&self, server: &str) -> &[Prompt] {
        self.prompts.get(server).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn find_tool(&self, server: &str, name: &str) -> Option<&Tool> {
        self.tools_for(server).iter().find(|t| t.name == name)
    }

    pub fn find_prompt(&self, server: &str, name: &str) -> Option<&Prompt> {
        self.prompts_for(server).iter().find(|p| p.name == name)
    }

    pub fn counts(&self) -> (usize, usize, usize) {
        (
            self.tools.values().map(Vec::len).sum(),
            self.resources.values().map(Vec::len).sum(),
            self.prompts.values().map(Vec::len).sum(),
        )
    }
}

pub struct DiscoveryCache {
    snapshot: RwLock<Arc<DiscoverySnapshot>>,
}

impl Default for DiscoveryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl DiscoveryCache {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(DiscoverySnapshot::default())),
        }
    }

    /// Current generation. Cheap to call; the `Arc` pins a consistent view
    /// for the caller's whole request.
    pub fn snapshot(&self) -> Arc<DiscoverySnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Drop all cached capabilities (reload path; the next refresh repopulates).
    pub fn invalidate(&self) {
        *self.snapshot.write() = Arc::new(DiscoverySnapshot::default());
    }

    /// Run discovery against every configured backend and swap the snapshot.
    pub async fn refresh(&self, pool: &Arc<ClientPool>) {
        let names = pool.config().server_names();
        let mut join_set = JoinSet::new();
        for name in names {
            let pool = Arc::clone(pool);
            join_set.spawn(async move {
                match pool.ensure_connected(&name).await {
                    Ok(client) => {
                        let discovered = discover_server(&name, &client).await;
                        Some((name, discovered))
                    }
                    Err(e) => {
                        warn!(server = %name, error = %e, "skipping discovery, backend unreachable");
                        None
                    }
                }
            });
        }

        let mut next = DiscoverySnapshot::default();
        while let Some(joined) = join_set.join_next().await {
            let Ok(Some((name, (tools, resources, prompts)))) = joined else {
                continue;
            };
            next.tools.insert(name.clone(), tools);
            next.resources.insert(name.clone(), resources);
            next.prompts.insert(name, prompts);
        }

        let (tools, resources, prompts) = next.counts();
        info!(tools, resources, prompts, "discovery refreshed");
        *self.snapshot.write() = Arc::new(next);
    }

    /// Re-discover a single backend, carrying the rest of the snapshot over.
    pub async fn refresh_server(&self, pool: &Arc<ClientPool>, server: &str) {
        let client = match pool.ensure_connected(server).await {
            Ok(client) => client,
            Err(e) => {
                warn!(server = %server, error = %e, "cannot refresh, backend unreachable");
                return;
            }
        };
        let (tools, resources, prompts) = discover_server(server, &client).await;

        let mut next = (**self.snapshot.read()).clone();
        next.tools.insert(server.to_string(), tools);
        next.resources.insert(server.to_string(), resources);
        next.prompts.insert(server.to_string(), prompts);
        *self.snapshot.write() = Arc::new(next);
    }

    /// Consume refresh requests emitted by backend list-change notifications.
    pub fn spawn_refresh_worker(
        self: &Arc<Self>,
        pool: Arc<ClientPool>,
        mut rx: mpsc::Receiver<RefreshRequest>,
    ) {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(request) = rx.recv().await {
                debug!(server = %request.server, "refreshing discovery on notification");
                cache.refresh_server(&pool, &request.server).await;
            }
        });
    }
}

async fn discover_server(
    server: &str,
    client: &McpClient,
) -> (Vec<Tool>, Vec<RawResource>, Vec<Prompt>) {
    let tools = match client.peer().list_all_tools().await {
        Ok(tools) => {
            info!(server = %server, count = tools.len(), "discovered tools");
            tools
        }
        Err(e) => {
            warn!(server = %server, error = %e, "failed to list tools");
            Vec::new()
        }
    };

    let resources = match client.peer().list_all_resources().await {
        Ok(resources) => {
            info!(server = %server, count = resources.len(), "discovered resources");
            resources.into_iter().map(|r| r.raw).collect()
        }
        Err(e) => {
            debug!(server = %server, error = %e, "no resources or listing failed");
            Vec::new()
        }
    };

    let prompts = match client.peer().list_all_prompts().await {
        Ok(prompts) => {
            info!(server = %server, count = prompts.len(), "discovered prompts");
            prompts
        }
        Err(e) => {
            debug!(server = %server, error = %e, "no prompts or listing failed");
            Vec::new()
        }
    };

    (tools, resources, prompts)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::{borrow::Cow, sync::Arc};

    use serde_json::Map;

    use super::*;

    pub fn test_tool(name: &str) -> Tool {
        Tool {
            name: Cow::Owned(name.to_string()),
            title: None,
            description: Some(Cow::Owned(format!("tool {name}"))),
            input_schema: Arc::new(Map::new()),
            output_schema: None,
            annotations: None,
            icons: None,
        }
    }

    pub fn test_tool_with_schema(name: &str, schema: serde_json::Value) -> Tool {
        let map = schema.as_object().cloned().unwrap_or_default();
        Tool {
            input_schema: Arc::new(map),
            ..test_tool(name)
        }
    }

    pub fn test_resource(uri: &str, name: &str) -> RawResource {
        RawResource {
            uri: uri.to_string(),
            name: name.to_string(),
            title: None,
            description: Some(format!("resource {name}")),
            mime_type: Some("text/plain".to_string()),
            size: None,
            icons: None,
        }
    }

    pub fn test_prompt(name: &str) -> Prompt {
        Prompt {
            name: name.to_string(),
            title: None,
            description: Some(format!("prompt {name}")),
            arguments: None,
            icons: None,
        }
    }

    pub fn snapshot_with(
        server: &str,
        tools: Vec<Tool>,
        resources: Vec<RawResource>,
        prompts: Vec<Prompt>,
    ) -> DiscoverySnapshot {
        let mut snapshot = DiscoverySnapshot::default();
        snapshot.tools.insert(server.to_string(), tools);
        snapshot.resources.insert(server.to_string(), resources);
        snapshot.prompts.insert(server.to_string(), prompts);
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_snapshot_lookup() {
        let snapshot = snapshot_with(
            "s1",
            vec![test_tool("search")],
            vec![test_resource("x://a", "a")],
            vec![test_prompt("greet")],
        );
        assert!(snapshot.find_tool("s1", "search").is_some());
        assert!(snapshot.find_tool("s1", "missing").is_none());
        assert!(snapshot.find_tool("s2", "search").is_none());
        assert!(snapshot.find_prompt("s1", "greet").is_some());
        assert_eq!(snapshot.counts(), (1, 1, 1));
    }

    #[test]
    fn test_cache_swap_is_atomic_per_reader() {
        let cache = DiscoveryCache::new();
        let before = cache.snapshot();
        *cache.snapshot.write() = Arc::new(snapshot_with(
            "s1",
            vec![test_tool("t")],
            vec![],
            vec![],
        ));
        // The old handle still sees the old generation.
        assert_eq!(before.counts(), (0, 0, 0));
        assert_eq!(cache.snapshot().counts(), (1, 0, 0));
    }

    #[test]
    fn test_invalidate_resets() {
        let cache = DiscoveryCache::new();
        *cache.snapshot.write() = Arc::new(snapshot_with(
            "s1",
            vec![test_tool("t")],
            vec![],
            vec![],
        ));
        cache.invalidate();
        assert_eq!(cache.snapshot().counts(), (0, 0, 0));
    }
}
