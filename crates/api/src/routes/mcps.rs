//! Upstream MCP server management routes

use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use nexus_shared::{UpstreamDefinition, UpstreamStatus};

use crate::error::{ApiError, ApiResult};
use crate::mcp::types::{JsonRpcId, JsonRpcRequest};
use crate::mcp::SseTransport;
use crate::state::AppState;

/// Upstream definition as reported by the API; the bearer token is redacted.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamResponse {
    pub name: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    pub is_disabled: bool,
    pub status: UpstreamStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_seen: Option<time::OffsetDateTime>,
    pub connected: bool,
}

impl UpstreamResponse {
    fn new(definition: UpstreamDefinition, connected: bool) -> Self {
        Self {
            name: definition.name,
            url: definition.url,
            auth_token: definition.auth_token.map(|_| "[REDACTED]".to_string()),
            is_disabled: definition.is_disabled,
            status: definition.status,
            last_seen: definition.last_seen,
            connected,
        }
    }
}

/// Create request for an upstream definition
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUpstreamRequest {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub is_disabled: bool,
}

/// `PUT /{name}/connection` body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRequest {
    pub is_disabled: bool,
}

/// `POST /{name}/tools/execute` body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteToolRequest {
    pub tool_name: String,
    #[serde(default)]
    pub params: Value,
}

/// Connectivity probe result
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResponse {
    pub healthy: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn mgmt_id() -> JsonRpcId {
    JsonRpcId::String(format!("mgmt-{}", Uuid::new_v4()))
}

/// GET /api/mcp-servers
pub async fn list(State(state): State<AppState>) -> Json<Vec<UpstreamResponse>> {
    let mut out = Vec::new();
    for definition in state.upstreams.list().await {
        let connected = state.registry.is_connected(&definition.name).await;
        out.push(UpstreamResponse::new(definition, connected));
    }
    Json(out)
}

/// POST /api/mcp-servers
pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<CreateUpstreamRequest>,
) -> ApiResult<(StatusCode, Json<UpstreamResponse>)> {
    let mut definition = UpstreamDefinition::new(request.name, request.url);
    definition.auth_token = request.auth_token;
    definition.is_disabled = request.is_disabled;

    state.upstreams.insert(definition.clone()).await?;

    let transport = SseTransport::new(
        definition.name.clone(),
        definition.url.clone(),
        state
            .config
            .transport_options(definition.auth_token.clone()),
    );
    if let Err(e) = state.registry.add(definition.name.clone(), transport).await {
        // Roll the definition back; a dangling entry would shadow the error.
        let _ = state.upstreams.remove(&definition.name).await;
        return Err(e.into());
    }

    if !definition.is_disabled {
        state.scheduler.watch(&definition.name).await;
    }

    let definition = state
        .upstreams
        .get(&definition.name)
        .await
        .unwrap_or(definition);
    Ok((
        StatusCode::CREATED,
        Json(UpstreamResponse::new(definition, false)),
    ))
}

/// GET /api/mcp-servers/{name}
pub async fn get(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<UpstreamResponse>> {
    let definition = state
        .upstreams
        .get(&name)
        .await
        .ok_or_else(|| ApiError::NotFound(name.clone()))?;
    let connected = state.registry.is_connected(&name).await;
    Ok(Json(UpstreamResponse::new(definition, connected)))
}

/// DELETE /api/mcp-servers/{name}
pub async fn remove(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<StatusCode> {
    state.scheduler.unwatch(&name).await;
    let _ = state.registry.remove(&name).await;
    state.catalog.remove_source(&name).await;
    state.upstreams.remove(&name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/mcp-servers/{name}/connection
pub async fn set_connection(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<ConnectionRequest>,
) -> ApiResult<Json<UpstreamResponse>> {
    let definition = state
        .upstreams
        .set_disabled(&name, request.is_disabled)
        .await?;

    if request.is_disabled {
        state.scheduler.unwatch(&name).await;
        let _ = state.registry.disconnect(&name).await;
    } else {
        // A terminally-failed transport was auto-dropped from the registry;
        // re-enabling recreates it.
        if state.registry.get(&name).await.is_none() {
            let transport = SseTransport::new(
                name.clone(),
                definition.url.clone(),
                state
                    .config
                    .transport_options(definition.auth_token.clone()),
            );
            state.registry.add(name.clone(), transport).await?;
        }
        state.scheduler.watch(&name).await;
    }

    let connected = state.registry.is_connected(&name).await;
    Ok(Json(UpstreamResponse::new(definition, connected)))
}

/// GET /api/mcp-servers/{name}/capabilities
pub async fn capabilities(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    if !state.upstreams.contains(&name).await {
        return Err(ApiError::NotFound(name));
    }
    Ok(Json(serde_json::json!({
        "tools": state.catalog.tools_for_source(&name).await,
        "prompts": state.catalog.prompts_for_source(&name).await,
        "resources": state.catalog.resources_for_source(&name).await,
    })))
}

/// POST /api/mcp-servers/{name}/capabilities/refresh
pub async fn refresh(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    if !state.upstreams.contains(&name).await {
        return Err(ApiError::NotFound(name));
    }
    match state.discoverer.discover(&name).await {
        Ok(summary) => {
            state.upstreams.set_status(&name, UpstreamStatus::Online).await;
            Ok(Json(serde_json::json!({
                "tools": summary.tools,
                "prompts": summary.prompts,
                "resources": summary.resources,
            })))
        }
        Err(e) => {
            state.upstreams.set_status(&name, UpstreamStatus::Error).await;
            Err(e.into())
        }
    }
}

/// POST /api/mcp-servers/{name}/test
pub async fn test(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<TestResponse>> {
    if !state.upstreams.contains(&name).await {
        return Err(ApiError::NotFound(name));
    }

    let started = Instant::now();
    let outcome = async {
        state.registry.connect(&name).await?;
        state
            .registry
            .request(
                &name,
                JsonRpcRequest::new(mgmt_id(), "tools/list", Some(serde_json::json!({}))),
            )
            .await
    }
    .await;
    let latency_ms = started.elapsed().as_millis() as u64;

    let response = match outcome {
        Ok(result) => TestResponse {
            healthy: true,
            latency_ms,
            tools_count: result
                .get("tools")
                .and_then(|t| t.as_array())
                .map(|t| t.len()),
            error: None,
        },
        Err(e) => TestResponse {
            healthy: false,
            latency_ms,
            tools_count: None,
            error: Some(e.to_string()),
        },
    };
    Ok(Json(response))
}

/// POST /api/mcp-servers/{name}/tools/execute
pub async fn execute_tool(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<ExecuteToolRequest>,
) -> ApiResult<Json<Value>> {
    if !state.upstreams.contains(&name).await {
        return Err(ApiError::NotFound(name));
    }

    let call = JsonRpcRequest::new(
        mgmt_id(),
        "tools/call",
        Some(serde_json::json!({
            "name": request.tool_name,
            "arguments": request.params,
        })),
    );
    let result = state.registry.request(&name, call).await?;
    Ok(Json(result))
}
