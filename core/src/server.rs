//! Frontend MCP server: the single endpoint the client talks to.
//!
//! Serves one capability group over the gateway's own stdio. Handlers read a
//! consistent discovery snapshot per request, transform arguments through the
//! tool's mapping, and route to the owning backend via the proxy. Resources
//! and prompts iterate their ordered fallback chain until a backend succeeds.
//! Every failure is converted into a JSON-RPC error; nothing escapes onto
//! stdout.

use std::sync::Arc;

use rmcp::{
    model::{
        CallToolRequestParam, CallToolResult, GetPromptRequestParam, GetPromptResult,
        ListPromptsResult, ListResourcesResult, ListToolsResult, PaginatedRequestParam,
        ReadResourceRequestParam, ReadResourceResult, ServerCapabilities, ServerInfo,
    },
    service::{RequestContext, RoleServer},
    ErrorData, ServerHandler,
};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::{
    config::{PromptRef, ResourceRef},
    discovery::DiscoveryCache,
    error::{GatewayError, GatewayResult},
    groups::GroupManager,
    proxy::Proxy,
    transform,
};

#[derive(Clone)]
pub struct GatewayServer {
    group_name: Arc<str>,
    groups: Arc<GroupManager>,
    discovery: Arc<DiscoveryCache>,
    proxy: Arc<Proxy>,
}

impl GatewayServer {
    pub fn new(
        group_name: impl AsRef<str>,
        groups: Arc<GroupManager>,
        discovery: Arc<DiscoveryCache>,
        proxy: Arc<Proxy>,
    ) -> Self {
        Self {
            group_name: Arc::from(group_name.as_ref()),
            groups,
            discovery,
            proxy,
        }
    }

    pub fn group_name(&self) -> &str {
        &self.group_name
    }

    async fn handle_call_tool(
        &self,
        request: CallToolRequestParam,
    ) -> GatewayResult<CallToolResult> {
        let group = self.groups.group(&self.group_name)?;
        let client_name = request.name.as_ref();
        let tool_override = self
            .groups
            .tool_override(&group, client_name)
            .ok_or_else(|| {
                GatewayError::CapabilityNotFound(format!(
                    "tool '{client_name}' in group '{}'",
                    self.group_name
                ))
            })?;

        let arguments = match &tool_override.argument_mapping {
            Some(mapping) => Some(transform::transform(request.arguments.as_ref(), mapping)?),
            None => request.arguments,
        };

        info!(
            tool = %client_name,
            server = %tool_override.server_name,
            original = %tool_override.original_name,
            "routing tool call"
        );
        self.proxy
            .call_tool(
                &tool_override.server_name,
                &tool_override.original_name,
                arguments,
                None,
            )
            .await
    }
}

impl ServerHandler for GatewayServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(format!(
                "MCP gateway exposing the '{}' capability group. Tools, resources, and \
                 prompts are aggregated from the configured backend servers.",
                self.group_name
            )),
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .enable_prompts()
                .build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        let group = self.groups.group(&self.group_name)?;
        let snapshot = self.discovery.snapshot();
        let tools = self.groups.tools_for_group(&group, &snapshot);
        Ok(ListToolsResult {
            tools,
            ..Default::default()
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        Ok(self.handle_call_tool(request).await?)
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, ErrorData> {
        let group = self.groups.group(&self.group_name)?;
        let snapshot = self.discovery.snapshot();
        let resources = self.groups.resources_for_group(&group, &snapshot);
        Ok(ListResourcesResult {
            resources,
            ..Default::default()
        })
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, ErrorData> {
        let group = self.groups.group(&self.group_name)?;
        let refs = self.groups.resource_refs_for_uri(&group, &request.uri);
        Ok(read_resource_with_fallback(&self.proxy, &refs, &request.uri).await?)
    }

    async fn list_prompts(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListPromptsResult, ErrorData> {
        let group = self.groups.group(&self.group_name)?;
        let snapshot = self.discovery.snapshot();
        let prompts = self.groups.prompts_for_group(&group, &snapshot);
        Ok(ListPromptsResult {
            prompts,
            ..Default::default()
        })
    }

    async fn get_prompt(
        &self,
        request: GetPromptRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<GetPromptResult, ErrorData> {
        let group = self.groups.group(&self.group_name)?;
        let refs = self.groups.prompt_refs_for_name(&group, &request.name);
        Ok(
            get_prompt_with_fallback(&self.proxy, &refs, &request.name, request.arguments)
                .await?,
        )
    }
}

/// Try each ref in priority order; the first success wins. When every server
/// fails, the last error is surfaced under the resource identifier.
pub(crate) async fn read_resource_with_fallback(
    proxy: &Proxy,
    refs: &[ResourceRef],
    uri: &str,
) -> GatewayResult<ReadResourceResult> {
    if refs.is_empty() {
        return Err(GatewayError::CapabilityNotFound(format!("resource '{uri}'")));
    }
    let mut last_error: Option<GatewayError> = None;
    for resource_ref in refs {
        match proxy
            .read_resource(&resource_ref.server_name, uri, None)
            .await
        {
            Ok(result) => return Ok(result),
            Err(e) => {
                warn!(
                    server = %resource_ref.server_name,
                    uri = %uri,
                    error = %e,
                    "resource read failed, trying next server"
                );
                last_error = Some(e);
            }
        }
    }
    Err(GatewayError::AllFallbacksExhausted {
        what: format!("resource '{uri}'"),
        last_error: last_error.expect("non-empty refs").to_string(),
    })
}

pub(crate) async fn get_prompt_with_fallback(
    proxy: &Proxy,
    refs: &[PromptRef],
    name: &str,
    arguments: Option<Map<String, Value>>,
) -> GatewayResult<GetPromptResult> {
    if refs.is_empty() {
        return Err(GatewayError::CapabilityNotFound(format!("prompt '{name}'")));
    }
    let mut last_error: Option<GatewayError> = None;
    for prompt_ref in refs {
        match proxy
            .get_prompt(&prompt_ref.server_name, name, arguments.clone(), None)
            .await
        {
            Ok(result) => return Ok(result),
            Err(e) => {
                warn!(
                    server = %prompt_ref.server_name,
                    prompt = %name,
                    error = %e,
                    "prompt fetch failed, trying next server"
                );
                last_error = Some(e);
            }
        }
    }
    Err(GatewayError::AllFallbacksExhausted {
        what: format!("prompt '{name}'"),
        last_error: last_error.expect("non-empty refs").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::BackendServersConfig, pool::ClientPool, supervisor::SupervisorHandle,
    };

    fn proxy_without_backends() -> Proxy {
        let config = Arc::new(BackendServersConfig::default());
        let supervisor = SupervisorHandle::start(&config);
        Proxy::new(Arc::new(ClientPool::new(config, supervisor)))
    }

    #[tokio::test]
    async fn test_read_resource_no_refs_is_not_found() {
        let proxy = proxy_without_backends();
        let err = read_resource_with_fallback(&proxy, &[], "x://a")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::CapabilityNotFound(_)));
    }

    #[tokio::test]
    async fn test_read_resource_exhausts_fallbacks() {
        let proxy = proxy_without_backends();
        let refs = vec![
            ResourceRef {
                server_name: "p".into(),
                uri: "x://a".into(),
            },
            ResourceRef {
                server_name: "q".into(),
                uri: "x://a".into(),
            },
        ];
        let err = read_resource_with_fallback(&proxy, &refs, "x://a")
            .await
            .unwrap_err();
        match err {
            GatewayError::AllFallbacksExhausted { what, last_error } => {
                assert!(what.contains("x://a"));
                // The last ref tried was q.
                assert!(last_error.contains("q"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_get_prompt_exhausts_fallbacks() {
        let proxy = proxy_without_backends();
        let refs = vec![PromptRef {
            server_name: "p".into(),
            name: "greet".into(),
        }];
        let err = get_prompt_with_fallback(&proxy, &refs, "greet", None)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::AllFallbacksExhausted { .. }));
    }
}
