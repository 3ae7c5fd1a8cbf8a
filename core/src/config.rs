//! Configuration model for backend servers and capability groups.
//!
//! Two JSON files drive the gateway: `backend-servers.json` (the fleet of
//! backend MCP servers) and `groups.json` (curated capability bundles).
//! Unknown fields are rejected so that typos surface at load time instead of
//! silently changing behavior.

use std::{
    collections::{BTreeMap, HashSet},
    path::Path,
    sync::OnceLock,
};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    error::{GatewayError, GatewayResult},
    transform::ArgumentMapping,
};

/// Transport-specific configuration for one backend server.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", deny_unknown_fields)]
pub enum BackendServerConfig {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
    },
    StreamableHttp {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
    Sse {
        url: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
}

impl BackendServerConfig {
    /// Whether this backend is a child process the supervisor owns.
    pub fn is_stdio(&self) -> bool {
        matches!(self, BackendServerConfig::Stdio { .. })
    }
}

/// Top-level backend-servers file: server name -> transport config.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BackendServersConfig {
    #[serde(rename = "mcpServers")]
    pub mcp_servers: BTreeMap<String, BackendServerConfig>,
}

impl BackendServersConfig {
    pub fn server(&self, name: &str) -> Option<&BackendServerConfig> {
        self.mcp_servers.get(name)
    }

    pub fn server_names(&self) -> Vec<String> {
        self.mcp_servers.keys().cloned().collect()
    }

    /// Names of the stdio backends (the supervised subset).
    pub fn stdio_server_names(&self) -> Vec<String> {
        self.mcp_servers
            .iter()
            .filter(|(_, cfg)| cfg.is_stdio())
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn from_json(content: &str) -> GatewayResult<Self> {
        serde_json::from_str(content)
            .map_err(|e| GatewayError::ConfigInvalid(format!("backend servers config: {e}")))
    }

    /// Load from disk, seeding from `<stem>.example.json` when the file is
    /// missing but the example exists.
    pub async fn load(path: &Path) -> GatewayResult<Self> {
        seed_from_example(path).await?;
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            GatewayError::ConfigInvalid(format!("read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }
}

/// Reference to a backend-provided resource. The URI may be an RFC 6570
/// template.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResourceRef {
    pub server_name: String,
    pub uri: String,
}

/// Reference to a backend-provided prompt.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PromptRef {
    pub server_name: String,
    pub name: String,
}

/// A tool exposed by a group, optionally re-named, re-described, re-schemed,
/// and re-shaped through an argument mapping.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ToolOverride {
    pub server_name: String,
    pub original_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub argument_mapping: Option<ArgumentMapping>,
}

impl ToolOverride {
    /// Client-visible name: the override name when set, else the backend name.
    pub fn client_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.original_name)
    }
}

/// A curated bundle of tools, resources, and prompts exposed to the client as
/// a single MCP endpoint. Insertion order defines fallback priority.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Group {
    pub name: String,
    #[serde(default)]
    pub tools: Vec<ToolOverride>,
    #[serde(default)]
    pub resources: Vec<ResourceRef>,
    #[serde(default)]
    pub prompts: Vec<PromptRef>,
}

impl Group {
    /// Union of all server names referenced by this group.
    pub fn required_servers(&self) -> HashSet<String> {
        let mut servers = HashSet::new();
        servers.extend(self.tools.iter().map(|t| t.server_name.clone()));
        servers.extend(self.resources.iter().map(|r| r.server_name.clone()));
        servers.extend(self.prompts.iter().map(|p| p.server_name.clone()));
        servers
    }
}

/// Top-level groups file: group name -> group definition.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GroupsConfig {
    pub groups: BTreeMap<String, Group>,
}

impl GroupsConfig {
    pub fn from_json(content: &str) -> GatewayResult<Self> {
        let config: Self = serde_json::from_str(content)
            .map_err(|e| GatewayError::ConfigInvalid(format!("groups config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub async fn load(path: &Path) -> GatewayResult<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            GatewayError::ConfigInvalid(format!("read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Structural validation beyond what serde enforces: group keys must match
    /// group names, and client-visible tool names must be unique per group.
    pub fn validate(&self) -> GatewayResult<()> {
        for (key, group) in &self.groups {
            if *key != group.name {
                return Err(GatewayError::ConfigInvalid(format!(
                    "group key '{}' does not match group name '{}'",
                    key, group.name
                )));
            }
            let mut seen = HashSet::new();
            for tool in &group.tools {
                if !seen.insert(tool.client_name()) {
                    return Err(GatewayError::ConfigInvalid(format!(
                        "group '{}' defines tool '{}' more than once",
                        key,
                        tool.client_name()
                    )));
                }
            }
        }
        Ok(())
    }
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("placeholder regex"))
}

fn expand_str<F>(input: &str, lookup: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    placeholder_regex()
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            match lookup(name) {
                Some(value) => value,
                None => {
                    warn!(
                        variable = name,
                        "environment variable not set, leaving placeholder unexpanded"
                    );
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}

/// Substitute `${VAR}` placeholders in stdio `command`, each `arg`, and each
/// `env` value. Missing variables log a warning and remain unexpanded.
pub fn expand_env_with<F>(config: &mut BackendServersConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    for backend in config.mcp_servers.values_mut() {
        if let BackendServerConfig::Stdio {
            command, args, env, ..
        } = backend
        {
            *command = expand_str(command, &lookup);
            for arg in args.iter_mut() {
                *arg = expand_str(arg, &lookup);
            }
            for value in env.values_mut() {
                *value = expand_str(value, &lookup);
            }
        }
    }
}

/// [`expand_env_with`] against the process environment.
pub fn expand_env(config: &mut BackendServersConfig) {
    expand_env_with(config, |name| std::env::var(name).ok());
}

async fn seed_from_example(path: &Path) -> GatewayResult<()> {
    if tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Ok(());
    }
    let Some(example) = example_path(path) else {
        return Ok(());
    };
    if tokio::fs::try_exists(&example).await.unwrap_or(false) {
        info!(
            from = %example.display(),
            to = %path.display(),
            "config missing, seeding from example"
        );
        tokio::fs::copy(&example, path).await?;
    }
    Ok(())
}

fn example_path(path: &Path) -> Option<std::path::PathBuf> {
    let stem = path.file_stem()?.to_str()?;
    let ext = path.extension()?.to_str()?;
    Some(path.with_file_name(format!("{stem}.example.{ext}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stdio_backend() {
        let json = r#"{
            "mcpServers": {
                "files": {
                    "type": "stdio",
                    "command": "mcp-server-filesystem",
                    "args": ["--root", "/tmp"],
                    "env": {"DEBUG": "1"}
                }
            }
        }"#;

        let config = BackendServersConfig::from_json(json).unwrap();
        assert_eq!(config.server_names(), vec!["files".to_string()]);
        match config.server("files").unwrap() {
            BackendServerConfig::Stdio {
                command, args, env, cwd,
            } => {
                assert_eq!(command, "mcp-server-filesystem");
                assert_eq!(args, &["--root", "/tmp"]);
                assert_eq!(env.get("DEBUG").unwrap(), "1");
                assert!(cwd.is_none());
            }
            other => panic!("expected stdio backend, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_remote_backends() {
        let json = r#"{
            "mcpServers": {
                "search": {
                    "type": "sse",
                    "url": "https://mcp.example.com/sse",
                    "headers": {"X-API-Key": "k"}
                },
                "docs": {
                    "type": "streamable-http",
                    "url": "https://mcp.example.com/mcp"
                }
            }
        }"#;

        let config = BackendServersConfig::from_json(json).unwrap();
        assert!(matches!(
            config.server("search"),
            Some(BackendServerConfig::Sse { .. })
        ));
        assert!(matches!(
            config.server("docs"),
            Some(BackendServerConfig::StreamableHttp { .. })
        ));
        assert!(config.stdio_server_names().is_empty());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let json = r#"{
            "mcpServers": {
                "s": {"type": "stdio", "command": "x", "unexpected": true}
            }
        }"#;

        let err = BackendServersConfig::from_json(json).unwrap_err();
        assert!(matches!(err, GatewayError::ConfigInvalid(_)));
    }

    #[test]
    fn test_unknown_transport_rejected() {
        let json = r#"{"mcpServers": {"s": {"type": "websocket", "url": "ws://x"}}}"#;
        assert!(BackendServersConfig::from_json(json).is_err());
    }

    #[test]
    fn test_backend_config_round_trip() {
        let json = r#"{
            "mcpServers": {
                "a": {"type": "stdio", "command": "a-server"},
                "b": {"type": "sse", "url": "https://b/sse"}
            }
        }"#;

        let config = BackendServersConfig::from_json(json).unwrap();
        let written = serde_json::to_string(&config).unwrap();
        let reloaded = BackendServersConfig::from_json(&written).unwrap();
        assert_eq!(config, reloaded);
    }

    #[test]
    fn test_env_expansion() {
        let json = r#"{
            "mcpServers": {
                "s": {
                    "type": "stdio",
                    "command": "${BIN_DIR}/server",
                    "args": ["--token", "${API_TOKEN}"],
                    "env": {"HOME_DIR": "${MISSING_VAR}"}
                }
            }
        }"#;

        let mut config = BackendServersConfig::from_json(json).unwrap();
        expand_env_with(&mut config, |name| match name {
            "BIN_DIR" => Some("/opt/mcp".to_string()),
            "API_TOKEN" => Some("secret".to_string()),
            _ => None,
        });

        match config.server("s").unwrap() {
            BackendServerConfig::Stdio { command, args, env, .. } => {
                assert_eq!(command, "/opt/mcp/server");
                assert_eq!(args[1], "secret");
                // Missing variables stay put.
                assert_eq!(env.get("HOME_DIR").unwrap(), "${MISSING_VAR}");
            }
            _ => unreachable!(),
        }
    }

    #[test]
    #[serial_test::serial]
    fn test_expand_env_from_process_environment() {
        std::env::set_var("GATEWAY_TEST_TOKEN", "tok-123");
        let json = r#"{
            "mcpServers": {
                "s": {"type": "stdio", "command": "srv", "args": ["${GATEWAY_TEST_TOKEN}"]}
            }
        }"#;

        let mut config = BackendServersConfig::from_json(json).unwrap();
        expand_env(&mut config);
        match config.server("s").unwrap() {
            BackendServerConfig::Stdio { args, .. } => assert_eq!(args[0], "tok-123"),
            _ => unreachable!(),
        }

        std::env::remove_var("GATEWAY_TEST_TOKEN");
    }

    #[test]
    fn test_groups_parse_and_priority_order() {
        let json = r#"{
            "groups": {
                "dev": {
                    "name": "dev",
                    "tools": [
                        {"serverName": "s1", "originalName": "search", "name": "find"}
                    ],
                    "resources": [
                        {"serverName": "p", "uri": "x://a"},
                        {"serverName": "q", "uri": "x://a"}
                    ],
                    "prompts": [
                        {"serverName": "p", "name": "greet"}
                    ]
                }
            }
        }"#;

        let config = GroupsConfig::from_json(json).unwrap();
        let group = config.groups.get("dev").unwrap();
        assert_eq!(group.tools[0].client_name(), "find");
        // Listed order is preserved: p before q.
        assert_eq!(group.resources[0].server_name, "p");
        assert_eq!(group.resources[1].server_name, "q");

        let servers = group.required_servers();
        assert!(servers.contains("s1"));
        assert!(servers.contains("p"));
        assert!(servers.contains("q"));
    }

    #[test]
    fn test_duplicate_client_tool_name_rejected() {
        let json = r#"{
            "groups": {
                "g": {
                    "name": "g",
                    "tools": [
                        {"serverName": "a", "originalName": "search", "name": "find"},
                        {"serverName": "b", "originalName": "find"}
                    ]
                }
            }
        }"#;

        let err = GroupsConfig::from_json(json).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn test_group_key_name_mismatch_rejected() {
        let json = r#"{"groups": {"a": {"name": "b"}}}"#;
        assert!(GroupsConfig::from_json(json).is_err());
    }

    #[test]
    fn test_groups_round_trip() {
        let json = r#"{
            "groups": {
                "g": {
                    "name": "g",
                    "tools": [{
                        "serverName": "s",
                        "originalName": "t",
                        "argumentMapping": {
                            "type": "template",
                            "mappings": {
                                "api_key": {"type": "constant", "value": "secret"}
                            }
                        }
                    }]
                }
            }
        }"#;

        let config = GroupsConfig::from_json(json).unwrap();
        let written = serde_json::to_string(&config).unwrap();
        let reloaded = GroupsConfig::from_json(&written).unwrap();
        assert_eq!(config, reloaded);
    }

    #[tokio::test]
    async fn test_load_seeds_from_example() {
        let dir = std::env::temp_dir().join(format!(
            "gateway-config-test-{}",
            std::process::id()
        ));
        tokio::fs::create_dir_all(&dir).await.unwrap();
        let target = dir.join("backend-servers.json");
        let example = dir.join("backend-servers.example.json");
        let _ = tokio::fs::remove_file(&target).await;
        tokio::fs::write(&example, r#"{"mcpServers": {}}"#)
            .await
            .unwrap();

        let config = BackendServersConfig::load(&target).await.unwrap();
        assert!(config.mcp_servers.is_empty());
        assert!(tokio::fs::try_exists(&target).await.unwrap());

        let _ = tokio::fs::remove_dir_all(&dir).await;
    }

    #[tokio::test]
    async fn test_load_missing_without_example_fails() {
        let path = std::env::temp_dir().join("gateway-no-such-config.json");
        let _ = tokio::fs::remove_file(&path).await;
        let err = BackendServersConfig::load(&path).await.unwrap_err();
        assert!(matches!(err, GatewayError::ConfigInvalid(_)));
    }
}
