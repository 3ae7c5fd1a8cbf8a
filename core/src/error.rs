//! Gateway error types.
//!
//! One variant per failure class the router has to distinguish: configuration,
//! backend lifecycle, transport, mapping, and capability resolution errors.

use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("Backend not configured: {0}")]
    BackendNotConfigured(String),

    #[error("Failed to spawn backend '{server}': {reason}")]
    BackendSpawnFailed { server: String, reason: String },

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("{operation} timed out after {timeout_ms}ms")]
    BackendTimeout {
        operation: String,
        timeout_ms: u64,
    },

    #[error("{0}")]
    BackendError(String),

    #[error("Mapping error: {0}")]
    Mapping(String),

    #[error("Capability not found: {0}")]
    CapabilityNotFound(String),

    #[error("All fallback servers failed for {what}: {last_error}")]
    AllFallbacksExhausted { what: String, last_error: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl GatewayError {
    /// JSON-RPC error code for this error.
    ///
    /// Standard codes are reused where they fit; backend-originated failures
    /// use the -32000..-32099 implementation-defined range.
    pub fn jsonrpc_code(&self) -> i32 {
        match self {
            GatewayError::CapabilityNotFound(_) => -32601,
            GatewayError::Mapping(_) | GatewayError::ConfigInvalid(_) => -32602,
            GatewayError::BackendNotConfigured(_) => -32001,
            GatewayError::BackendSpawnFailed { .. } => -32002,
            GatewayError::BackendUnavailable(_) => -32003,
            GatewayError::BackendTimeout { .. } => -32004,
            GatewayError::BackendError(_) => -32005,
            GatewayError::AllFallbacksExhausted { .. } => -32006,
            GatewayError::Io(_) | GatewayError::Http(_) => -32603,
        }
    }
}

impl From<GatewayError> for rmcp::ErrorData {
    fn from(err: GatewayError) -> Self {
        rmcp::ErrorData::new(
            rmcp::model::ErrorCode(err.jsonrpc_code()),
            err.to_string(),
            None,
        )
    }
}
