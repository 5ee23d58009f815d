//! Nexus Gateway Library
//!
//! Nexus aggregates upstream MCP servers (JSON-RPC 2.0 over SSE + HTTP POST)
//! into a single management plane and re-exposes operator-defined virtual
//! servers, each serving a filtered, merged view of the upstream catalog on
//! its own port.

pub mod config;
pub mod error;
pub mod mcp;
pub mod routes;
pub mod state;
pub mod vmcp;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
