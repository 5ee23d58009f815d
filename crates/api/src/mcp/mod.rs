//! MCP (Model Context Protocol) Upstream Integration
//!
//! Everything the gateway needs to speak to upstream MCP servers over the
//! SSE + HTTP-POST transport and to keep an indexed view of what they offer.
//!
//! # Architecture
//!
//! ```text
//! Upstream definition --> SseTransport (correlated JSON-RPC channel)
//!                           |  owned by
//!                         TransportRegistry --> connectivity events
//!                           |  driven by
//!                         Discoverer --> CapabilityCatalog (per-source index)
//! ```
//!
//! Virtual servers consume the catalog through the aggregator (see
//! [`crate::vmcp`]) and proxy invocations back through the registry.

pub mod catalog;
pub mod discovery;
pub mod registry;
pub mod transport;
pub mod types;

pub use catalog::{CapabilityCatalog, CatalogError};
pub use discovery::{Discoverer, DiscoveryError, DiscoverySummary, RefreshScheduler};
pub use registry::{RegistryError, TransportEvent, TransportRegistry};
pub use transport::{SseTransport, TransportError, TransportOptions};
pub use types::*;
