//! Error types for Nexus definitions

use thiserror::Error;

/// Structural validation failure on an upstream or virtual-server definition.
///
/// Cross-reference checks (unknown source servers, port collisions against
/// other definitions) live with the stores that can see the whole picture.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("name must not be empty")]
    EmptyName,

    #[error("url must not be empty")]
    EmptyUrl,

    #[error("port must be non-zero")]
    InvalidPort,

    #[error("at least one source server is required")]
    NoSources,

    #[error("at least one aggregation rule is required")]
    NoRules,

    #[error("duplicate source server: {0}")]
    DuplicateSource(String),
}
