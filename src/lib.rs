//! Binary-side glue for the MCP aggregating gateway: CLI parsing, logging
//! bootstrap, and application wiring. The subsystems live in `gateway-core`.

pub mod app;
pub mod cli;
pub mod logging;
