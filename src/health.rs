//! Built-in health endpoint handler.
//!
//! Served on `health.path` (default `/healthz`) for any method; that
//! exact path is never proxied. Returns a
//! [`HealthResponse`] JSON payload with `"ok": true`, the build
//! metadata, uptime, the loaded config's fingerprint and route count,
//! and cumulative request statistics.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::server::AppState;

#[derive(Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub version: String,
    pub build: BuildInfo,
    pub uptime_seconds: u64,
    pub config: ConfigHealth,
    pub stats: StatsResponse,
}

#[derive(Serialize, Deserialize)]
pub struct BuildInfo {
    pub git: String,
    pub profile: String,
}

#[derive(Serialize, Deserialize)]
pub struct ConfigHealth {
    pub source: String,
    pub version: String,
    pub loaded_ago_seconds: u64,
    pub routes: usize,
}

#[derive(Serialize, Deserialize)]
pub struct StatsResponse {
    pub requests_forwarded: u64,
    pub requests_failed: u64,
    pub requests_unrouted: u64,
    pub requests_cancelled: u64,
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let loaded = &state.config;
    let stats = state.router.stats();

    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
        build: BuildInfo {
            git: env!("WAYPOINT_GIT_SHORT").to_string(),
            profile: env!("WAYPOINT_BUILD_PROFILE").to_string(),
        },
        uptime_seconds: state.start_time.elapsed().as_secs(),
        config: ConfigHealth {
            source: loaded.source_name.clone(),
            version: loaded.version.short().to_string(),
            loaded_ago_seconds: loaded.loaded_at.elapsed().as_secs(),
            routes: state.router.table().route_count(),
        },
        stats: StatsResponse {
            requests_forwarded: stats.forwarded.load(Ordering::Relaxed),
            requests_failed: stats.failed.load(Ordering::Relaxed),
            requests_unrouted: stats.not_found.load(Ordering::Relaxed),
            requests_cancelled: stats.cancelled.load(Ordering::Relaxed),
        },
    })
}
