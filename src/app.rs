//! Gateway assembly: configuration, supervisor, pool, discovery, groups, and
//! the stdio frontend, wired together with a reload hook for the admin UI.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use gateway_core::{
    config::{expand_env, BackendServersConfig, GroupsConfig},
    discovery::DiscoveryCache,
    groups::GroupManager,
    pool::ClientPool,
    proxy::Proxy,
    server::GatewayServer,
    supervisor::SupervisorHandle,
    GatewayError,
};
use rmcp::serve_server;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

pub struct Gateway {
    supervisor: SupervisorHandle,
    pool: Arc<ClientPool>,
    discovery: Arc<DiscoveryCache>,
    groups: Arc<GroupManager>,
    proxy: Arc<Proxy>,
    backend_config_path: PathBuf,
    groups_config_path: PathBuf,
}

impl Gateway {
    /// Load configs, launch the supervised fleet, connect clients, and run
    /// initial discovery.
    pub async fn bootstrap(
        backend_config_path: PathBuf,
        groups_config_path: PathBuf,
    ) -> anyhow::Result<Self> {
        let mut backend_config = BackendServersConfig::load(&backend_config_path).await?;
        expand_env(&mut backend_config);
        let backend_config = Arc::new(backend_config);
        let groups_config = Arc::new(GroupsConfig::load(&groups_config_path).await?);

        let supervisor = SupervisorHandle::start(&backend_config);

        let (refresh_tx, refresh_rx) = mpsc::channel(32);
        let pool = Arc::new(
            ClientPool::new(Arc::clone(&backend_config), supervisor.clone())
                .with_refresh_channel(refresh_tx),
        );
        pool.spawn_invalidation_task();

        let report = pool.connect_all().await;
        info!(
            connected = report.successful.len(),
            failed = report.failed.len(),
            "backend connections established"
        );
        for (server, reason) in &report.failed {
            warn!(server = %server, reason = %reason, "backend unavailable at startup");
        }

        let discovery = Arc::new(DiscoveryCache::new());
        discovery.refresh(&pool).await;
        discovery.spawn_refresh_worker(Arc::clone(&pool), refresh_rx);

        let groups = Arc::new(GroupManager::new(groups_config));
        let proxy = Arc::new(Proxy::new(Arc::clone(&pool)));

        Ok(Self {
            supervisor,
            pool,
            discovery,
            groups,
            proxy,
            backend_config_path,
            groups_config_path,
        })
    }

    /// Serve the given group over this process's stdio until the client
    /// disconnects or the process is interrupted.
    pub async fn serve_stdio(&self, group_name: &str) -> anyhow::Result<()> {
        let group = self
            .groups
            .group(group_name)
            .with_context(|| format!("cannot serve group '{group_name}'"))?;

        for conflict in self.groups.detect_resource_conflicts(&group.resources) {
            warn!(
                kind = ?conflict.kind,
                a = %conflict.a.uri,
                b = %conflict.b.uri,
                example = %conflict.example_uri,
                "resource refs overlap; first listed wins"
            );
        }

        let handler = GatewayServer::new(
            group_name,
            Arc::clone(&self.groups),
            Arc::clone(&self.discovery),
            Arc::clone(&self.proxy),
        );

        info!(group = %group_name, "serving MCP over stdio");
        let server = serve_server(handler, (tokio::io::stdin(), tokio::io::stdout()))
            .await
            .context("failed to start frontend MCP server")?;

        tokio::select! {
            result = server.waiting() => {
                result.context("frontend server terminated abnormally")?;
                info!("client disconnected");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
            }
        }
        Ok(())
    }

    /// Reload hook for the external admin UI: re-read both config files,
    /// swap the snapshots atomically, and re-run discovery.
    pub async fn reload(&self) -> anyhow::Result<()> {
        let mut backend_config = BackendServersConfig::load(&self.backend_config_path).await?;
        expand_env(&mut backend_config);
        let groups_config = GroupsConfig::load(&self.groups_config_path).await?;

        self.pool.swap_config(Arc::new(backend_config));
        self.groups.swap(Arc::new(groups_config));
        self.discovery.invalidate();
        self.discovery.refresh(&self.pool).await;
        info!("configuration reloaded");
        Ok(())
    }

    pub async fn shutdown(&self) {
        self.pool.disconnect_all().await;
        self.supervisor.shutdown().await;
    }
}

pub async fn run_serve(
    group: String,
    backend_config_path: PathBuf,
    groups_config_path: PathBuf,
) -> anyhow::Result<()> {
    let gateway = Gateway::bootstrap(backend_config_path, groups_config_path).await?;
    let result = gateway.serve_stdio(&group).await;
    gateway.shutdown().await;
    result
}

/// Validate both config files without starting anything; diagnostics go to
/// stderr via the logger, the summary to stdout (nothing is serving there).
pub async fn run_check(
    backend_config_path: PathBuf,
    groups_config_path: PathBuf,
) -> anyhow::Result<()> {
    let mut backend_config = BackendServersConfig::load(&backend_config_path).await?;
    expand_env(&mut backend_config);
    let groups_config = GroupsConfig::load(&groups_config_path).await?;

    println!(
        "backend servers: {}",
        backend_config.server_names().join(", ")
    );

    let manager = GroupManager::new(Arc::new(groups_config.clone()));
    let mut problems = 0usize;
    for (name, group) in &groups_config.groups {
        println!(
            "group '{}': {} tools, {} resources, {} prompts",
            name,
            group.tools.len(),
            group.resources.len(),
            group.prompts.len()
        );
        for server in group.required_servers() {
            if backend_config.server(&server).is_none() {
                problems += 1;
                error!(group = %name, server = %server, "group references unconfigured backend");
            }
        }
        for conflict in manager.detect_resource_conflicts(&group.resources) {
            println!(
                "  conflict ({:?}): {} vs {} (example: {})",
                conflict.kind, conflict.a.uri, conflict.b.uri, conflict.example_uri
            );
        }
    }

    if problems > 0 {
        anyhow::bail!(GatewayError::ConfigInvalid(format!(
            "{problems} unresolved backend reference(s)"
        )));
    }
    println!("configuration OK");
    Ok(())
}
