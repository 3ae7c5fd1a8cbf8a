//! Backend child-process supervisor.
//!
//! A single actor task owns the process map; every mutation (spawn, manual
//! restart, exit bookkeeping, shutdown) arrives as a message on its channel,
//! which serializes exit events against `restart_server` calls. Each child
//! gets an attendant task that waits for the process and performs the
//! terminate -> grace -> kill sequence, and a reader task that drains stderr
//! into the log stream line by line.
//!
//! Only `stdio` backends are supervised; http/sse backends have no process
//! lifecycle and are handled entirely by the client pool.

use std::collections::HashMap;

use tokio::{
    io::{AsyncBufReadExt, BufReader},
    process::{Child, ChildStderr, ChildStdin, ChildStdout, Command},
    sync::{broadcast, mpsc, oneshot},
    time::{sleep, Duration},
};
use tracing::{debug, error, info, warn};

use crate::{
    config::{BackendServerConfig, BackendServersConfig},
    error::{GatewayError, GatewayResult},
};

const RESTART_BASE_DELAY_MS: u64 = 1000;
const MAX_RESTART_FAILURES: u32 = 5;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Stdio handles of a freshly spawned backend, claimed once per incarnation
/// by the client pool.
pub type ServerIo = (ChildStdout, ChildStdin);

/// Lifecycle notifications, consumed by the client pool for invalidation.
#[derive(Debug, Clone)]
pub enum SupervisorEvent {
    Started { server: String },
    Exited { server: String },
    SpawnFailed { server: String },
}

/// Backoff delay before restart attempt `failure_count` (1-based), or `None`
/// once the failure budget is exhausted.
pub(crate) fn restart_delay(failure_count: u32) -> Option<Duration> {
    if failure_count == 0 || failure_count > MAX_RESTART_FAILURES {
        return None;
    }
    Some(Duration::from_millis(
        RESTART_BASE_DELAY_MS << (failure_count - 1),
    ))
}

enum Op {
    TakeIo {
        server: String,
        reply: oneshot::Sender<GatewayResult<ServerIo>>,
    },
    Restart {
        server: String,
        reply: oneshot::Sender<GatewayResult<()>>,
    },
    Pid {
        server: String,
        reply: oneshot::Sender<Option<u32>>,
    },
    Names {
        reply: oneshot::Sender<Vec<String>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

enum Internal {
    /// The attendant confirmed the child is gone, for whatever reason.
    Gone { server: String, generation: u64 },
    /// A scheduled restart backoff elapsed.
    RestartDue { server: String },
}

/// Cloneable façade over the supervisor actor.
#[derive(Clone)]
pub struct SupervisorHandle {
    ops: mpsc::Sender<Op>,
    events: broadcast::Sender<SupervisorEvent>,
}

impl SupervisorHandle {
    /// Spawn the actor and launch every stdio backend in the config.
    pub fn start(config: &BackendServersConfig) -> Self {
        let (ops_tx, ops_rx) = mpsc::channel(64);
        let (events_tx, _) = broadcast::channel(64);
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();

        let stdio_configs: HashMap<String, BackendServerConfig> = config
            .mcp_servers
            .iter()
            .filter(|(_, cfg)| cfg.is_stdio())
            .map(|(name, cfg)| (name.clone(), cfg.clone()))
            .collect();

        let mut actor = Actor {
            configs: stdio_configs,
            servers: HashMap::new(),
            restart_counts: HashMap::new(),
            events: events_tx.clone(),
            internal_tx,
            shutting_down: false,
            shutdown_reply: None,
            next_generation: 0,
        };

        tokio::spawn(async move {
            actor.spawn_all();
            actor.run(ops_rx, internal_rx).await;
        });

        Self {
            ops: ops_tx,
            events: events_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    /// Claim the stdio handles of a running backend. Each process incarnation
    /// hands them out exactly once.
    pub async fn take_io(&self, server: &str) -> GatewayResult<ServerIo> {
        let (reply, rx) = oneshot::channel();
        self.send(Op::TakeIo {
            server: server.to_string(),
            reply,
        })
        .await?;
        rx.await
            .map_err(|_| GatewayError::BackendUnavailable(server.to_string()))?
    }

    /// Stop and respawn one backend. Resets its restart budget on success.
    /// Concurrent calls for the same server are serialized by the actor.
    pub async fn restart_server(&self, server: &str) -> GatewayResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Op::Restart {
            server: server.to_string(),
            reply,
        })
        .await?;
        rx.await
            .map_err(|_| GatewayError::BackendUnavailable(server.to_string()))?
    }

    pub async fn server_pid(&self, server: &str) -> Option<u32> {
        let (reply, rx) = oneshot::channel();
        self.send(Op::Pid {
            server: server.to_string(),
            reply,
        })
        .await
        .ok()?;
        rx.await.ok().flatten()
    }

    /// Names of currently live supervised backends.
    pub async fn server_names(&self) -> Vec<String> {
        let (reply, rx) = oneshot::channel();
        if self.send(Op::Names { reply }).await.is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Gracefully stop every child and the actor itself.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(Op::Shutdown { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    async fn send(&self, op: Op) -> GatewayResult<()> {
        self.ops
            .send(op)
            .await
            .map_err(|_| GatewayError::BackendUnavailable("supervisor not running".into()))
    }
}

struct Supervised {
    generation: u64,
    pid: Option<u32>,
    io: Option<ServerIo>,
    stop_tx: Option<oneshot::Sender<()>>,
    shutting_down: bool,
    pending_restart: Vec<oneshot::Sender<GatewayResult<()>>>,
}

struct Actor {
    configs: HashMap<String, BackendServerConfig>,
    servers: HashMap<String, Supervised>,
    /// Kept across map removals so a crash-looping backend cannot reset its
    /// budget by being briefly absent.
    restart_counts: HashMap<String, u32>,
    events: broadcast::Sender<SupervisorEvent>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    shutting_down: bool,
    shutdown_reply: Option<oneshot::Sender<()>>,
    next_generation: u64,
}

impl Actor {
    async fn run(
        &mut self,
        mut ops: mpsc::Receiver<Op>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        loop {
            tokio::select! {
                Some(event) = internal.recv() => self.handle_internal(event),
                op = ops.recv() => match op {
                    Some(op) => self.handle_op(op),
                    None => return,
                },
            }
            if self.shutting_down && self.servers.is_empty() {
                self.finish_shutdown();
                return;
            }
        }
    }

    fn spawn_all(&mut self) {
        let names: Vec<String> = self.configs.keys().cloned().collect();
        for name in names {
            if let Err(e) = self.spawn_server(&name) {
                error!(server = %name, error = %e, "failed to spawn backend");
                let _ = self.events.send(SupervisorEvent::SpawnFailed {
                    server: name.clone(),
                });
            }
        }
    }

    fn handle_op(&mut self, op: Op) {
        match op {
            Op::TakeIo { server, reply } => {
                let result = match self.servers.get_mut(&server) {
                    Some(state) => state.io.take().ok_or_else(|| {
                        GatewayError::BackendUnavailable(format!(
                            "stdio for '{server}' already claimed; restart to reconnect"
                        ))
                    }),
                    None => Err(GatewayError::BackendUnavailable(format!(
                        "backend '{server}' is not running"
                    ))),
                };
                let _ = reply.send(result);
            }
            Op::Restart { server, reply } => {
                self.handle_restart(server, reply);
            }
            Op::Pid { server, reply } => {
                let _ = reply.send(self.servers.get(&server).and_then(|s| s.pid));
            }
            Op::Names { reply } => {
                let _ = reply.send(self.servers.keys().cloned().collect());
            }
            Op::Shutdown { reply } => {
                info!(
                    live = self.servers.len(),
                    "supervisor shutting down, stopping backends"
                );
                self.shutting_down = true;
                self.shutdown_reply = Some(reply);
                for state in self.servers.values_mut() {
                    state.shutting_down = true;
                    if let Some(tx) = state.stop_tx.take() {
                        let _ = tx.send(());
                    }
                }
            }
        }
    }

    fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::Gone { server, generation } => self.handle_gone(server, generation),
            Internal::RestartDue { server } => self.handle_restart_due(server),
        }
    }

    fn handle_restart(&mut self, server: String, reply: oneshot::Sender<GatewayResult<()>>) {
        if !self.configs.contains_key(&server) {
            let _ = reply.send(Err(GatewayError::BackendNotConfigured(server)));
            return;
        }
        if self.shutting_down {
            let _ = reply.send(Err(GatewayError::BackendUnavailable(
                "supervisor is shutting down".into(),
            )));
            return;
        }
        match self.servers.get_mut(&server) {
            Some(state) => {
                state.pending_restart.push(reply);
                if !state.shutting_down {
                    state.shutting_down = true;
                    if let Some(tx) = state.stop_tx.take() {
                        let _ = tx.send(());
                    }
                }
                // A second restart while one is in flight just queues up; the
                // respawn resolves every waiter.
            }
            None => {
                let result = self.spawn_server(&server);
                if result.is_ok() {
                    self.restart_counts.insert(server, 0);
                }
                let _ = reply.send(result);
            }
        }
    }

    fn handle_gone(&mut self, server: String, generation: u64) {
        let Some(state) = self.servers.get(&server) else {
            return;
        };
        if state.generation != generation {
            // Stale event from a previous incarnation.
            return;
        }
        let state = self.servers.remove(&server).expect("presence checked");
        let _ = self.events.send(SupervisorEvent::Exited {
            server: server.clone(),
        });

        if self.shutting_down {
            for tx in state.pending_restart {
                let _ = tx.send(Err(GatewayError::BackendUnavailable(
                    "supervisor is shutting down".into(),
                )));
            }
            return;
        }

        if state.shutting_down {
            // Intentional stop; respawn only if a manual restart asked for it.
            if state.pending_restart.is_empty() {
                return;
            }
            let result = self.spawn_server(&server);
            match result {
                Ok(()) => {
                    self.restart_counts.insert(server, 0);
                    for tx in state.pending_restart {
                        let _ = tx.send(Ok(()));
                    }
                }
                Err(e) => {
                    let reason = e.to_string();
                    let _ = self.events.send(SupervisorEvent::SpawnFailed {
                        server: server.clone(),
                    });
                    for tx in state.pending_restart {
                        let _ = tx.send(Err(GatewayError::BackendSpawnFailed {
                            server: server.clone(),
                            reason: reason.clone(),
                        }));
                    }
                }
            }
            return;
        }

        self.schedule_restart(server);
    }

    fn schedule_restart(&mut self, server: String) {
        let count = self.restart_counts.entry(server.clone()).or_insert(0);
        *count += 1;
        let count = *count;

        match restart_delay(count) {
            Some(delay) => {
                info!(
                    server = %server,
                    attempt = count,
                    delay_ms = delay.as_millis() as u64,
                    "backend exited unexpectedly, scheduling restart"
                );
                let tx = self.internal_tx.clone();
                tokio::spawn(async move {
                    sleep(delay).await;
                    let _ = tx.send(Internal::RestartDue { server });
                });
            }
            None => {
                error!(
                    server = %server,
                    restart_count = count,
                    "backend keeps failing, giving up"
                );
            }
        }
    }

    fn handle_restart_due(&mut self, server: String) {
        if self.shutting_down || self.servers.contains_key(&server) {
            return;
        }
        if let Err(e) = self.spawn_server(&server) {
            warn!(server = %server, error = %e, "restart attempt failed to spawn");
            let _ = self.events.send(SupervisorEvent::SpawnFailed {
                server: server.clone(),
            });
            self.schedule_restart(server);
        }
    }

    fn spawn_server(&mut self, server: &str) -> GatewayResult<()> {
        let Some(BackendServerConfig::Stdio {
            command,
            args,
            env,
            cwd,
        }) = self.configs.get(server)
        else {
            return Err(GatewayError::BackendNotConfigured(server.to_string()));
        };

        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd.spawn().map_err(|e| GatewayError::BackendSpawnFailed {
            server: server.to_string(),
            reason: e.to_string(),
        })?;

        let pid = child.id();
        let stdout = child.stdout.take();
        let stdin = child.stdin.take();
        let io = match (stdout, stdin) {
            (Some(out), Some(inp)) => Some((out, inp)),
            _ => None,
        };
        if let Some(stderr) = child.stderr.take() {
            spawn_stderr_reader(server.to_string(), stderr);
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        let (stop_tx, stop_rx) = oneshot::channel();
        spawn_attendant(
            server.to_string(),
            generation,
            child,
            stop_rx,
            self.internal_tx.clone(),
        );

        self.servers.insert(
            server.to_string(),
            Supervised {
                generation,
                pid,
                io,
                stop_tx: Some(stop_tx),
                shutting_down: false,
                pending_restart: Vec::new(),
            },
        );

        info!(server = %server, pid = ?pid, "spawned backend");
        let _ = self.events.send(SupervisorEvent::Started {
            server: server.to_string(),
        });
        Ok(())
    }

    fn finish_shutdown(&mut self) {
        if let Some(reply) = self.shutdown_reply.take() {
            let _ = reply.send(());
        }
        info!("supervisor stopped");
    }
}

fn spawn_stderr_reader(server: String, stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            info!(server = %server, "backend stderr: {}", line);
        }
        debug!(server = %server, "backend stderr closed");
    });
}

fn spawn_attendant(
    server: String,
    generation: u64,
    mut child: Child,
    stop_rx: oneshot::Receiver<()>,
    internal_tx: mpsc::UnboundedSender<Internal>,
) {
    tokio::spawn(async move {
        tokio::select! {
            status = child.wait() => {
                match status {
                    Ok(status) => {
                        info!(server = %server, code = ?status.code(), "backend exited");
                    }
                    Err(e) => warn!(server = %server, error = %e, "wait on backend failed"),
                }
            }
            _ = stop_rx => {
                graceful_stop(&server, &mut child).await;
            }
        }
        let _ = internal_tx.send(Internal::Gone { server, generation });
    });
}

/// Terminate, then kill after the grace period. A single select decides the
/// race between the exit event and the grace timer.
async fn graceful_stop(server: &str, child: &mut Child) {
    send_terminate(child);
    tokio::select! {
        status = child.wait() => {
            info!(server = %server, code = ?status.ok().and_then(|s| s.code()), "backend stopped");
        }
        _ = sleep(SHUTDOWN_GRACE) => {
            warn!(server = %server, "backend ignored terminate signal, killing");
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}

#[cfg(unix)]
fn send_terminate(child: &Child) {
    if let Some(pid) = child.id() {
        // SAFETY: sending a signal to a pid we spawned and still own.
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &Child) {
    // No terminate signal on this platform; the grace timer will escalate.
    let _ = child.id();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendServersConfig;

    fn stdio_config(name: &str, command: &str, args: &[&str]) -> BackendServersConfig {
        let json = serde_json::json!({
            "mcpServers": {
                name: {
                    "type": "stdio",
                    "command": command,
                    "args": args,
                }
            }
        });
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_restart_delay_sequence() {
        let delays: Vec<u64> = (1..=5)
            .map(|n| restart_delay(n).unwrap().as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 16000]);
    }

    #[test]
    fn test_sixth_failure_gets_no_delay() {
        assert!(restart_delay(6).is_none());
        assert!(restart_delay(0).is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_take_io_and_shutdown() {
        let config = stdio_config("echoer", "cat", &[]);
        let handle = SupervisorHandle::start(&config);

        // Give the actor a moment to spawn.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(handle.server_names().await, vec!["echoer".to_string()]);
        assert!(handle.server_pid("echoer").await.is_some());

        let io = handle.take_io("echoer").await;
        assert!(io.is_ok());
        // Second claim on the same incarnation fails.
        assert!(handle.take_io("echoer").await.is_err());

        handle.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unexpected_exit_schedules_restart() {
        let config = stdio_config("flaky", "sh", &["-c", "exit 1"]);
        let handle = SupervisorHandle::start(&config);
        let mut events = handle.subscribe();

        let mut started = 0;
        let mut exited = 0;
        // First run plus one restart after the 1s backoff.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while started < 2 || exited < 1 {
            let event = tokio::time::timeout_at(deadline, events.recv())
                .await
                .expect("expected restart within backoff window")
                .expect("event stream open");
            match event {
                SupervisorEvent::Started { ref server } if server == "flaky" => started += 1,
                SupervisorEvent::Exited { ref server } if server == "flaky" => exited += 1,
                _ => {}
            }
        }

        handle.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_manual_restart_yields_fresh_io() {
        let config = stdio_config("svc", "cat", &[]);
        let handle = SupervisorHandle::start(&config);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let first = handle.take_io("svc").await;
        assert!(first.is_ok());

        handle.restart_server("svc").await.unwrap();
        let second = handle.take_io("svc").await;
        assert!(second.is_ok(), "restart must produce claimable io again");

        handle.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_rapid_restarts_serialize() {
        let config = stdio_config("svc", "cat", &[]);
        let handle = SupervisorHandle::start(&config);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let (a, b) = tokio::join!(handle.restart_server("svc"), handle.restart_server("svc"));
        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(handle.server_names().await, vec!["svc".to_string()]);

        handle.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_restart_unconfigured_server_fails() {
        let config = BackendServersConfig::default();
        let handle = SupervisorHandle::start(&config);
        let err = handle.restart_server("ghost").await.unwrap_err();
        assert!(matches!(err, GatewayError::BackendNotConfigured(_)));
        handle.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_failure_is_reported_not_fatal() {
        let config = stdio_config("broken", "/nonexistent/binary-xyz", &[]);
        let handle = SupervisorHandle::start(&config);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.server_names().await.is_empty());
        handle.shutdown().await;
    }
}
