//! Core subsystems of the MCP aggregating gateway.
//!
//! ## Modules
//!
//! - [`supervisor`]: backend child-process lifecycle (spawn, restart, stop)
//! - [`pool`]: one MCP client connection per backend
//! - [`discovery`]: cached view of backend tools/resources/prompts
//! - [`groups`]: group resolution and capability remapping
//! - [`transform`]: declarative argument mappings (template + jsonata)
//! - [`proxy`]: request routing with timeout, retry, and batching
//! - [`server`]: the client-facing MCP server handler

pub mod config;
pub mod discovery;
pub mod error;
pub mod groups;
pub mod jsonata;
pub mod pool;
pub mod proxy;
pub mod server;
pub mod supervisor;
pub mod transform;
pub mod uri_template;

pub use config::{
    expand_env, expand_env_with, BackendServerConfig, BackendServersConfig, Group, GroupsConfig,
    PromptRef, ResourceRef, ToolOverride,
};
pub use discovery::{DiscoveryCache, DiscoverySnapshot};
pub use error::{GatewayError, GatewayResult};
pub use groups::{ConflictKind, GroupManager, ResourceConflict};
pub use pool::{ClientPool, ConnectReport, GatewayClientHandler, RefreshRequest};
pub use proxy::{BatchItem, Proxy, ResourceReadRequest, RetryOptions, ToolCallRequest};
pub use server::GatewayServer;
pub use supervisor::{SupervisorEvent, SupervisorHandle};
pub use transform::{
    client_input_schema, test_transform, transform, validate, ArgumentMapping, MappingValidation,
    ParameterMapping, TransformTest,
};
