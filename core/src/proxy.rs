//! Proxy / router: executes client calls against a chosen backend.
//!
//! Every primitive races the backend call against a deadline (30 s default)
//! and wraps failures with `<op> <server>.<name>` context. Retry wrappers add
//! linear backoff on top; batch variants run calls in parallel and always
//! resolve, reporting per-item success in input order.

use std::{borrow::Cow, sync::Arc, time::Duration};

use futures::future::join_all;
use rmcp::model::{
    CallToolRequestParam, CallToolResult, GetPromptRequestParam, GetPromptResult,
    ReadResourceRequestParam, ReadResourceResult,
};
use serde_json::{Map, Value};
use tokio::time::{timeout, Instant};
use tracing::{debug, error, warn};

use crate::{
    error::{GatewayError, GatewayResult},
    pool::ClientPool,
};

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Options for the `*_with_retry` wrappers.
#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Extra attempts after the initial one. Zero means exactly one attempt.
    pub max_retries: u32,
    /// Attempt N waits `retry_delay * N` before running.
    pub retry_delay: Duration,
    pub timeout: Option<Duration>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay: Duration::from_secs(1),
            timeout: None,
        }
    }
}

/// One entry of a `call_tools_batch` request.
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub server_name: String,
    pub tool_name: String,
    pub arguments: Option<Map<String, Value>>,
}

/// One entry of a `read_resources_batch` request.
#[derive(Debug, Clone)]
pub struct ResourceReadRequest {
    pub server_name: String,
    pub uri: String,
}

/// Per-item batch outcome; batches never reject as a whole.
#[derive(Debug)]
pub struct BatchItem<T> {
    pub success: bool,
    pub result: Option<T>,
    pub error: Option<String>,
}

impl<T> From<GatewayResult<T>> for BatchItem<T> {
    fn from(result: GatewayResult<T>) -> Self {
        match result {
            Ok(value) => BatchItem {
                success: true,
                result: Some(value),
                error: None,
            },
            Err(e) => BatchItem {
                success: false,
                result: None,
                error: Some(e.to_string()),
            },
        }
    }
}

pub struct Proxy {
    pool: Arc<ClientPool>,
}

impl Proxy {
    pub fn new(pool: Arc<ClientPool>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Arc<ClientPool> {
        &self.pool
    }

    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Option<Map<String, Value>>,
        call_timeout: Option<Duration>,
    ) -> GatewayResult<CallToolResult> {
        let operation = format!("tools/call {server}.{tool}");
        let client = self.pool.ensure_connected(server).await?;
        let request = CallToolRequestParam {
            name: Cow::Owned(tool.to_string()),
            arguments,
        };
        self.raced(&operation, call_timeout, client.call_tool(request))
            .await
    }

    pub async fn read_resource(
        &self,
        server: &str,
        uri: &str,
        call_timeout: Option<Duration>,
    ) -> GatewayResult<ReadResourceResult> {
        let operation = format!("resources/read {server}.{uri}");
        let client = self.pool.ensure_connected(server).await?;
        let request = ReadResourceRequestParam {
            uri: uri.to_string(),
        };
        self.raced(&operation, call_timeout, client.read_resource(request))
            .await
    }

    pub async fn get_prompt(
        &self,
        server: &str,
        name: &str,
        arguments: Option<Map<String, Value>>,
        call_timeout: Option<Duration>,
    ) -> GatewayResult<GetPromptResult> {
        let operation = format!("prompts/get {server}.{name}");
        let client = self.pool.ensure_connected(server).await?;
        let request = GetPromptRequestParam {
            name: name.to_string(),
            arguments,
        };
        self.raced(&operation, call_timeout, client.get_prompt(request))
            .await
    }

    pub async fn call_tool_with_retry(
        &self,
        server: &str,
        tool: &str,
        arguments: Option<Map<String, Value>>,
        options: &RetryOptions,
    ) -> GatewayResult<CallToolResult> {
        let operation = format!("tools/call {server}.{tool}");
        with_retry(&operation, options, || {
            self.call_tool(server, tool, arguments.clone(), options.timeout)
        })
        .await
    }

    pub async fn read_resource_with_retry(
        &self,
        server: &str,
        uri: &str,
        options: &RetryOptions,
    ) -> GatewayResult<ReadResourceResult> {
        let operation = format!("resources/read {server}.{uri}");
        with_retry(&operation, options, || {
            self.read_resource(server, uri, options.timeout)
        })
        .await
    }

    /// Execute all calls in parallel; results map 1:1 to the input order.
    pub async fn call_tools_batch(
        &self,
        requests: Vec<ToolCallRequest>,
        call_timeout: Option<Duration>,
    ) -> Vec<BatchItem<CallToolResult>> {
        join_all(requests.into_iter().map(|request| async move {
            self.call_tool(
                &request.server_name,
                &request.tool_name,
                request.arguments,
                call_timeout,
            )
            .await
            .into()
        }))
        .await
    }

    pub async fn read_resources_batch(
        &self,
        requests: Vec<ResourceReadRequest>,
        call_timeout: Option<Duration>,
    ) -> Vec<BatchItem<ReadResourceResult>> {
        join_all(requests.into_iter().map(|request| async move {
            self.read_resource(&request.server_name, &request.uri, call_timeout)
                .await
                .into()
        }))
        .await
    }

    async fn raced<T, E>(
        &self,
        operation: &str,
        call_timeout: Option<Duration>,
        fut: impl std::future::Future<Output = Result<T, E>>,
    ) -> GatewayResult<T>
    where
        E: std::fmt::Display,
    {
        let limit = call_timeout.unwrap_or(DEFAULT_CALL_TIMEOUT);
        let started = Instant::now();
        match timeout(limit, fut).await {
            Ok(Ok(result)) => {
                debug!(
                    operation = %operation,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "backend call completed"
                );
                Ok(result)
            }
            Ok(Err(e)) => Err(GatewayError::BackendError(format!(
                "{operation} failed: {e}"
            ))),
            Err(_) => Err(GatewayError::BackendTimeout {
                operation: operation.to_string(),
                timeout_ms: limit.as_millis() as u64,
            }),
        }
    }
}

/// Run `attempt_fn` up to `1 + max_retries` times. Attempt N (1-based) waits
/// `retry_delay * N` first; the final failure is surfaced as-is.
pub async fn with_retry<T, F, Fut>(
    operation: &str,
    options: &RetryOptions,
    mut attempt_fn: F,
) -> GatewayResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = GatewayResult<T>>,
{
    let mut last_error: Option<GatewayError> = None;
    for attempt in 0..=options.max_retries {
        if attempt > 0 {
            let delay = options.retry_delay * attempt;
            warn!(
                operation = %operation,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "retrying after failure"
            );
            tokio::time::sleep(delay).await;
        }
        match attempt_fn().await {
            Ok(value) => return Ok(value),
            Err(e) => last_error = Some(e),
        }
    }
    let err = last_error.expect("at least one attempt ran");
    error!(operation = %operation, error = %err, "all attempts failed");
    Err(err)
}
