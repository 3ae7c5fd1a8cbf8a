//! Client pool: one MCP client connection per backend server.
//!
//! Stdio backends connect over the supervised child's stdio pair; remote
//! backends (SSE, streamable HTTP) connect through reqwest-backed transports
//! with exponential-backoff retry. Clients are created lazily and invalidated
//! when the supervisor reports the backing process gone.

use std::{sync::Arc, time::Duration};

use backoff::ExponentialBackoffBuilder;
use dashmap::DashMap;
use parking_lot::RwLock;
use rmcp::{
    model::{
        CancelledNotificationParam, ClientInfo, LoggingLevel, LoggingMessageNotificationParam,
        ProgressNotificationParam, ResourceUpdatedNotificationParam,
    },
    service::{NotificationContext, RunningService},
    transport::{
        sse_client::SseClientConfig, streamable_http_client::StreamableHttpClientTransportConfig,
        SseClientTransport, StreamableHttpClientTransport,
    },
    ClientHandler, RoleClient, ServiceExt,
};
use tokio::{sync::mpsc, task::JoinSet};
use tracing::{debug, error, info, warn};

use crate::{
    config::{BackendServerConfig, BackendServersConfig},
    error::{GatewayError, GatewayResult},
    supervisor::{SupervisorEvent, SupervisorHandle},
};

pub type McpClient = RunningService<RoleClient, GatewayClientHandler>;

/// Request to re-run discovery for one backend, emitted when the backend
/// notifies a capability-list change.
#[derive(Debug, Clone)]
pub struct RefreshRequest {
    pub server: String,
}

/// Outcome of [`ClientPool::connect_all`]. Individual failures do not fail
/// the pool.
#[derive(Debug, Default)]
pub struct ConnectReport {
    pub successful: Vec<String>,
    pub failed: Vec<(String, String)>,
}

pub struct ClientPool {
    clients: DashMap<String, Arc<McpClient>>,
    config: RwLock<Arc<BackendServersConfig>>,
    supervisor: SupervisorHandle,
    refresh_tx: Option<mpsc::Sender<RefreshRequest>>,
    /// Serializes connection establishment so concurrent `ensure_connected`
    /// calls for the same backend cannot double-connect.
    connect_lock: tokio::sync::Mutex<()>,
}

impl ClientPool {
    pub fn new(config: Arc<BackendServersConfig>, supervisor: SupervisorHandle) -> Self {
        Self {
            clients: DashMap::new(),
            config: RwLock::new(config),
            supervisor,
            refresh_tx: None,
            connect_lock: tokio::sync::Mutex::new(()),
        }
    }

    #[must_use]
    pub fn with_refresh_channel(mut self, tx: mpsc::Sender<RefreshRequest>) -> Self {
        self.refresh_tx = Some(tx);
        self
    }

    /// Watch supervisor events and drop clients whose process went away.
    pub fn spawn_invalidation_task(self: &Arc<Self>) {
        let pool = Arc::clone(self);
        let mut events = self.supervisor.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SupervisorEvent::Exited { server })
                    | Ok(SupervisorEvent::SpawnFailed { server }) => {
                        if pool.clients.remove(&server).is_some() {
                            info!(server = %server, "backend gone, dropping client");
                        }
                    }
                    Ok(SupervisorEvent::Started { .. }) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "supervisor event stream lagged, resetting pool");
                        pool.clients.clear();
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Swap the backend config snapshot (reload).
    pub fn swap_config(&self, config: Arc<BackendServersConfig>) {
        *self.config.write() = config;
    }

    pub fn config(&self) -> Arc<BackendServersConfig> {
        Arc::clone(&self.config.read())
    }

    pub fn connected_names(&self) -> Vec<String> {
        self.clients.iter().map(|e| e.key().clone()).collect()
    }

    pub fn invalidate(&self, server: &str) {
        self.clients.remove(server);
    }

    /// Return a ready client for the backend, connecting lazily if needed.
    pub async fn ensure_connected(&self, server: &str) -> GatewayResult<Arc<McpClient>> {
        if let Some(client) = self.clients.get(server) {
            return Ok(Arc::clone(client.value()));
        }

        let _guard = self.connect_lock.lock().await;
        if let Some(client) = self.clients.get(server) {
            return Ok(Arc::clone(client.value()));
        }

        let config = self.config();
        let backend = config
            .server(server)
            .ok_or_else(|| GatewayError::BackendNotConfigured(server.to_string()))?;

        let client = Arc::new(self.connect(server, backend).await?);
        self.clients.insert(server.to_string(), Arc::clone(&client));
        info!(server = %server, "connected to backend");
        Ok(client)
    }

    /// Connect every configured backend in parallel.
    pub async fn connect_all(self: &Arc<Self>) -> ConnectReport {
        let names = self.config().server_names();
        let mut join_set = JoinSet::new();
        for name in names {
            let pool = Arc::clone(self);
            join_set.spawn(async move {
                let result = pool.ensure_connected(&name).await;
                (name, result)
            });
        }

        let mut report = ConnectReport::default();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((name, Ok(_))) => report.successful.push(name),
                Ok((name, Err(e))) => {
                    error!(server = %name, error = %e, "backend connection failed");
                    report.failed.push((name, e.to_string()));
                }
                Err(e) => warn!(error = %e, "connection task panicked"),
            }
        }
        report
    }

    /// Close every client connection.
    pub async fn disconnect_all(&self) {
        let names: Vec<String> = self.clients.iter().map(|e| e.key().clone()).collect();
        for name in names {
            if let Some((_, client)) = self.clients.remove(&name) {
                match Arc::try_unwrap(client) {
                    Ok(client) => {
                        if let Err(e) = client.cancel().await {
                            warn!(server = %name, error = %e, "error disconnecting client");
                        }
                    }
                    Err(_) => {
                        warn!(server = %name, "client still in use during disconnect");
                    }
                }
            }
        }
    }

    fn handler(&self, server: &str) -> GatewayClientHandler {
        let mut handler = GatewayClientHandler::new(server);
        if let Some(tx) = &self.refresh_tx {
            handler = handler.with_refresh_channel(tx.clone());
        }
        handler
    }

    async fn connect(
        &self,
        server: &str,
        backend: &BackendServerConfig,
    ) -> GatewayResult<McpClient> {
        match backend {
            BackendServerConfig::Stdio { .. } => self.connect_stdio(server).await,
            BackendServerConfig::Sse { .. } | BackendServerConfig::StreamableHttp { .. } => {
                self.connect_remote_with_retry(server, backend).await
            }
        }
    }

    async fn connect_stdio(&self, server: &str) -> GatewayResult<McpClient> {
        let (stdout, stdin) = self.supervisor.take_io(server).await?;
        let client = self
            .handler(server)
            .serve((stdout, stdin))
            .await
            .map_err(|e| {
                GatewayError::BackendUnavailable(format!(
                    "initialize stdio client for '{server}': {e}"
                ))
            })?;
        Ok(client)
    }

    /// Remote transports retry with exponential backoff; connection refusal
    /// is usually transient while the remote end comes up.
    async fn connect_remote_with_retry(
        &self,
        server: &str,
        backend: &BackendServerConfig,
    ) -> GatewayResult<McpClient> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_secs(1))
            .with_max_interval(Duration::from_secs(10))
            .with_max_elapsed_time(Some(Duration::from_secs(30)))
            .build();

        backoff::future::retry(policy, || async {
            match self.connect_remote(server, backend).await {
                Ok(client) => Ok(client),
                Err(e) if is_permanent_error(&e) => {
                    error!(server = %server, error = %e, "permanent connection error, not retrying");
                    Err(backoff::Error::permanent(e))
                }
                Err(e) => {
                    warn!(server = %server, error = %e, "connection failed, retrying");
                    Err(backoff::Error::transient(e))
                }
            }
        })
        .await
    }

    async fn connect_remote(
        &self,
        server: &str,
        backend: &BackendServerConfig,
    ) -> GatewayResult<McpClient> {
        match backend {
            BackendServerConfig::Sse { url, headers } => {
                let http = http_client(headers)?;
                let config = SseClientConfig {
                    sse_endpoint: url.clone().into(),
                    ..Default::default()
                };
                let transport = SseClientTransport::start_with_client(http, config)
                    .await
                    .map_err(|e| {
                        GatewayError::BackendUnavailable(format!(
                            "create SSE transport for '{server}': {e}"
                        ))
                    })?;
                let client = self.handler(server).serve(transport).await.map_err(|e| {
                    GatewayError::BackendUnavailable(format!(
                        "initialize SSE client for '{server}': {e}"
                    ))
                })?;
                debug!(server = %server, url = %url, "SSE client ready");
                Ok(client)
            }
            BackendServerConfig::StreamableHttp { url, headers } => {
                let http = http_client(headers)?;
                let config = StreamableHttpClientTransportConfig::with_uri(url.as_str());
                let transport = StreamableHttpClientTransport::with_client(http, config);
                let client = self.handler(server).serve(transport).await.map_err(|e| {
                    GatewayError::BackendUnavailable(format!(
                        "initialize streamable HTTP client for '{server}': {e}"
                    ))
                })?;
                debug!(server = %server, url = %url, "streamable HTTP client ready");
                Ok(client)
            }
            BackendServerConfig::Stdio { .. } => {
                Err(GatewayError::BackendUnavailable(format!(
                    "'{server}' is a stdio backend"
                )))
            }
        }
    }
}

fn is_permanent_error(error: &GatewayError) -> bool {
    matches!(
        error,
        GatewayError::ConfigInvalid(_) | GatewayError::BackendNotConfigured(_)
    )
}

fn http_client(
    headers: &std::collections::BTreeMap<String, String>,
) -> GatewayResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder().connect_timeout(Duration::from_secs(10));
    if !headers.is_empty() {
        let mut map = reqwest::header::HeaderMap::new();
        for (name, value) in headers {
            let name: reqwest::header::HeaderName = name
                .parse()
                .map_err(|_| GatewayError::ConfigInvalid(format!("invalid header name '{name}'")))?;
            let value = value.parse().map_err(|_| {
                GatewayError::ConfigInvalid(format!("invalid value for header '{name}'"))
            })?;
            map.insert(name, value);
        }
        builder = builder.default_headers(map);
    }
    Ok(builder.build()?)
}

/// Client-side handler for backend notifications: list-change notifications
/// feed the discovery refresh channel, log notifications are re-emitted on
/// our own log stream.
#[derive(Clone, Debug)]
pub struct GatewayClientHandler {
    server: Arc<str>,
    client_info: ClientInfo,
    refresh_tx: Option<mpsc::Sender<RefreshRequest>>,
}

impl GatewayClientHandler {
    pub fn new(server: impl AsRef<str>) -> Self {
        let mut client_info = ClientInfo::default();
        client_info.client_info.name = "mcp-gateway".to_string();
        client_info.client_info.version = env!("CARGO_PKG_VERSION").to_string();
        Self {
            server: Arc::from(server.as_ref()),
            client_info,
            refresh_tx: None,
        }
    }

    #[must_use]
    pub fn with_refresh_channel(mut self, tx: mpsc::Sender<RefreshRequest>) -> Self {
        self.refresh_tx = Some(tx);
        self
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    fn send_refresh(&self) {
        if let Some(tx) = &self.refresh_tx {
            if let Err(e) = tx.try_send(RefreshRequest {
                server: self.server.to_string(),
            }) {
                warn!(server = %self.server, error = %e, "failed to queue discovery refresh");
            }
        }
    }
}

impl ClientHandler for GatewayClientHandler {
    async fn on_tool_list_changed(&self, _context: NotificationContext<RoleClient>) {
        info!(server = %self.server, "backend tool list changed");
        self.send_refresh();
    }

    async fn on_resource_list_changed(&self, _context: NotificationContext<RoleClient>) {
        info!(server = %self.server, "backend resource list changed");
        self.send_refresh();
    }

    async fn on_prompt_list_changed(&self, _context: NotificationContext<RoleClient>) {
        info!(server = %self.server, "backend prompt list changed");
        self.send_refresh();
    }

    async fn on_resource_updated(
        &self,
        params: ResourceUpdatedNotificationParam,
        _context: NotificationContext<RoleClient>,
    ) {
        debug!(server = %self.server, uri = %params.uri, "backend resource updated");
    }

    async fn on_progress(
        &self,
        params: ProgressNotificationParam,
        _context: NotificationContext<RoleClient>,
    ) {
        debug!(
            server = %self.server,
            token = ?params.progress_token,
            progress = %params.progress,
            "backend progress"
        );
    }

    async fn on_cancelled(
        &self,
        params: CancelledNotificationParam,
        _context: NotificationContext<RoleClient>,
    ) {
        info!(
            server = %self.server,
            request_id = %params.request_id,
            reason = ?params.reason,
            "backend cancelled request"
        );
    }

    async fn on_logging_message(
        &self,
        params: LoggingMessageNotificationParam,
        _context: NotificationContext<RoleClient>,
    ) {
        let logger = params.logger.as_deref().unwrap_or("mcp");
        match params.level {
            LoggingLevel::Emergency
            | LoggingLevel::Alert
            | LoggingLevel::Critical
            | LoggingLevel::Error => {
                error!(server = %self.server, logger = %logger, "backend: {}", params.data);
            }
            LoggingLevel::Warning => {
                warn!(server = %self.server, logger = %logger, "backend: {}", params.data);
            }
            LoggingLevel::Notice | LoggingLevel::Info => {
                info!(server = %self.server, logger = %logger, "backend: {}", params.data);
            }
            LoggingLevel::Debug => {
                debug!(server = %self.server, logger = %logger, "backend: {}", params.data);
            }
        }
    }

    fn get_info(&self) -> ClientInfo {
        self.client_info.clone()
    }
}
