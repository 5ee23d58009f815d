//! Health and status endpoints

use axum::{extract::State, Json};
use serde::Serialize;
use time::OffsetDateTime;

use nexus_shared::{UpstreamStatus, VmcpStatus};

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Liveness endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[derive(Default, Serialize)]
pub struct UpstreamCounts {
    pub total: usize,
    pub online: usize,
    pub offline: usize,
    pub error: usize,
}

#[derive(Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VmcpCounts {
    pub total: usize,
    pub running: usize,
    pub stopped: usize,
    pub starting: usize,
    pub error: usize,
    pub partially_degraded: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub upstreams: UpstreamCounts,
    pub vmcps: VmcpCounts,
    pub uptime_seconds: i64,
}

/// Process-wide status summary
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let mut upstreams = UpstreamCounts::default();
    for definition in state.upstreams.list().await {
        upstreams.total += 1;
        match definition.status {
            UpstreamStatus::Online => upstreams.online += 1,
            UpstreamStatus::Offline => upstreams.offline += 1,
            UpstreamStatus::Error => upstreams.error += 1,
        }
    }

    let mut vmcps = VmcpCounts::default();
    for definition in state.manager.list().await {
        vmcps.total += 1;
        match definition.status {
            VmcpStatus::Running => vmcps.running += 1,
            VmcpStatus::Stopped => vmcps.stopped += 1,
            VmcpStatus::Starting => vmcps.starting += 1,
            VmcpStatus::Error => vmcps.error += 1,
            VmcpStatus::PartiallyDegraded => vmcps.partially_degraded += 1,
        }
    }

    let uptime = OffsetDateTime::now_utc() - state.started_at;
    Json(StatusResponse {
        upstreams,
        vmcps,
        uptime_seconds: uptime.whole_seconds(),
    })
}
