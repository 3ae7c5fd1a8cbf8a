//! Command-line interface.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub const BACKEND_CONFIG_FILE: &str = "backend-servers.json";
pub const GROUPS_CONFIG_FILE: &str = "groups.json";

#[derive(Debug, Parser)]
#[command(
    name = "mcp-gateway",
    version,
    about = "Aggregating MCP gateway: expose a curated group of backend capabilities over stdio"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run in stdio proxy mode, exposing one capability group.
    Serve {
        /// Name of the group to expose.
        #[arg(long)]
        group: String,
        /// Path to the backend servers config file.
        #[arg(long, value_name = "FILE")]
        backend_config: Option<PathBuf>,
        /// Path to the groups config file.
        #[arg(long, value_name = "FILE")]
        groups_config: Option<PathBuf>,
    },
    /// Validate both config files and report groups, servers, and conflicts.
    Check {
        #[arg(long, value_name = "FILE")]
        backend_config: Option<PathBuf>,
        #[arg(long, value_name = "FILE")]
        groups_config: Option<PathBuf>,
    },
}

fn config_dir() -> PathBuf {
    std::env::var("MCP_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

pub fn backend_config_path(overridden: Option<PathBuf>) -> PathBuf {
    overridden.unwrap_or_else(|| config_dir().join(BACKEND_CONFIG_FILE))
}

pub fn groups_config_path(overridden: Option<PathBuf>) -> PathBuf {
    overridden.unwrap_or_else(|| config_dir().join(GROUPS_CONFIG_FILE))
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_parses_serve() {
        let cli = Cli::try_parse_from(["mcp-gateway", "serve", "--group", "dev"]).unwrap();
        match cli.command {
            Commands::Serve { group, .. } => assert_eq!(group, "dev"),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_cli_requires_group_for_serve() {
        assert!(Cli::try_parse_from(["mcp-gateway", "serve"]).is_err());
    }

    #[test]
    fn test_cli_debug_assert() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_default_config_paths() {
        let backend = backend_config_path(None);
        assert!(backend.ends_with(BACKEND_CONFIG_FILE));
        let explicit = groups_config_path(Some(PathBuf::from("/etc/gw/groups.json")));
        assert_eq!(explicit, PathBuf::from("/etc/gw/groups.json"));
    }
}
