//! Virtual-server management routes

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;
use uuid::Uuid;

use nexus_shared::{NewVirtualServer, VirtualServerDefinition, VmcpId};

use crate::error::ApiResult;
use crate::state::AppState;
use crate::vmcp::HealthReport;

/// GET /api/vmcps
pub async fn list(State(state): State<AppState>) -> Json<Vec<VirtualServerDefinition>> {
    Json(state.manager.list().await)
}

/// POST /api/vmcps
pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<NewVirtualServer>,
) -> ApiResult<(StatusCode, Json<VirtualServerDefinition>)> {
    let definition = state.manager.add(request).await?;
    Ok((StatusCode::CREATED, Json(definition)))
}

/// GET /api/vmcps/{id}
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<VirtualServerDefinition>> {
    Ok(Json(state.manager.get(VmcpId(id)).await?))
}

/// DELETE /api/vmcps/{id}
pub async fn remove(State(state): State<AppState>, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    state.manager.remove(VmcpId(id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/vmcps/{id}/start
pub async fn start(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<VirtualServerDefinition>> {
    state.manager.start(VmcpId(id)).await?;
    Ok(Json(state.manager.get(VmcpId(id)).await?))
}

/// POST /api/vmcps/{id}/stop
pub async fn stop(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<VirtualServerDefinition>> {
    state.manager.stop(VmcpId(id)).await?;
    Ok(Json(state.manager.get(VmcpId(id)).await?))
}

/// GET /api/vmcps/{id}/health
pub async fn health(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<HealthReport>> {
    let instance = state.manager.get_instance(VmcpId(id)).await?;
    Ok(Json(instance.check_health().await))
}

/// GET /api/vmcps/{id}/capabilities
pub async fn capabilities(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
    let instance = state.manager.get_instance(VmcpId(id)).await?;
    Ok(Json(instance.capabilities()))
}

/// GET /api/vmcps/{id}/dependents
pub async fn dependents(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<String>>> {
    Ok(Json(state.manager.dependents(VmcpId(id)).await?))
}
