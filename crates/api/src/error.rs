//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::mcp::{CatalogError, DiscoveryError, RegistryError, TransportError};
use crate::state::StoreError;
use crate::vmcp::VmcpError;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),

    // Resource errors
    #[error("Resource not found: {0}")]
    NotFound(String),
    #[error("Resource already exists: {0}")]
    Conflict(String),
    #[error("Port unavailable: {0}")]
    PortUnavailable(u16),

    // Upstream errors
    #[error("Upstream error: {0}")]
    Upstream(String),

    // Internal errors
    #[error("Internal server error")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),

            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            ApiError::PortUnavailable(port) => (
                StatusCode::CONFLICT,
                "PORT_UNAVAILABLE",
                format!("Port {} is unavailable", port),
            ),

            ApiError::Upstream(msg) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", msg.clone()),

            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(name) => ApiError::NotFound(name),
            StoreError::DuplicateName(name) => ApiError::Conflict(name),
            StoreError::DuplicateUrl(url) => ApiError::Conflict(url),
            StoreError::Validation(e) => ApiError::Validation(e.to_string()),
        }
    }
}

impl From<VmcpError> for ApiError {
    fn from(err: VmcpError) -> Self {
        match err {
            VmcpError::NotFound(id) => ApiError::NotFound(id.to_string()),
            VmcpError::PortUnavailable(port) => ApiError::PortUnavailable(port),
            VmcpError::PortOutOfRange { .. } | VmcpError::TooManyInstances(_) => {
                ApiError::Validation(err.to_string())
            }
            VmcpError::UnknownSource(_) | VmcpError::Validation(_) => {
                ApiError::Validation(err.to_string())
            }
            VmcpError::StartupNoCapabilities | VmcpError::InstanceNotRunning(_) => {
                ApiError::BadRequest(err.to_string())
            }
            VmcpError::CapabilityUnmapped { .. } => ApiError::NotFound(err.to_string()),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(name) => ApiError::NotFound(name),
            RegistryError::Duplicate(name) => ApiError::Conflict(name),
            RegistryError::Transport(e) => e.into(),
        }
    }
}

impl From<TransportError> for ApiError {
    fn from(err: TransportError) -> Self {
        ApiError::Upstream(err.to_string())
    }
}

impl From<DiscoveryError> for ApiError {
    fn from(err: DiscoveryError) -> Self {
        match err {
            DiscoveryError::ServerNotFound(name) => ApiError::NotFound(name),
            other => ApiError::Upstream(other.to_string()),
        }
    }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        ApiError::Validation(err.to_string())
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
