//! Nexus Shared Types
//!
//! This crate contains the data model shared between the gateway core and
//! the management plane: upstream server definitions, virtual-server
//! definitions, aggregation rules, and their validation.

pub mod error;
pub mod types;

pub use error::*;
pub use types::*;
