// Health endpoints
// /health answers liveness; /health/ready reports each dependency with its
// probe latency and returns 503 when anything required is down.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::json;
use std::time::Instant;

use crate::{app::AppState, db::check_diesel_health};

/// GET /health
pub async fn liveness() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// GET /health/ready
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let mut healthy = true;

    let start = Instant::now();
    let postgres = match check_diesel_health(&state.diesel_pool).await {
        Ok(()) => json!({
            "status": "healthy",
            "latency_ms": start.elapsed().as_millis() as u64,
        }),
        Err(e) => {
            healthy = false;
            json!({
                "status": "unhealthy",
                "latency_ms": start.elapsed().as_millis() as u64,
                "error": e.to_string(),
            })
        },
    };

    let redis = state.redis_pool.health_check().await;
    if !redis.is_healthy {
        healthy = false;
    }

    let response = json!({
        "status": if healthy { "ready" } else { "degraded" },
        "service": "lumina-backend",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "components": {
            "postgresql": postgres,
            "redis": {
                "status": if redis.is_healthy { "healthy" } else { "unhealthy" },
                "latency_ms": redis.latency_ms,
                "error": redis.error,
            },
        },
    });

    if healthy {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}
