// Rate limiting middleware
// Per-IP limits guard the whole surface; per-user limits apply behind
// authentication. Limit checks that cannot reach Redis fail open so a cache
// outage degrades to "no limiting" instead of "no service".

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use tracing::warn;

use crate::{
    app::AppState,
    middleware::auth::AuthenticatedUser,
    services::rate_limit::{RateLimitConfig, RateLimitResult},
    utils::problem::ApiError,
};

pub fn apply_rate_limit_headers(response: &mut Response, result: &RateLimitResult) {
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&result.limit.to_string()) {
        headers.insert("X-RateLimit-Limit", value);
    }
    if let Ok(value) = HeaderValue::from_str(&result.remaining.to_string()) {
        headers.insert("X-RateLimit-Remaining", value);
    }
    if let Ok(value) = HeaderValue::from_str(&result.reset_time.to_string()) {
        headers.insert("X-RateLimit-Reset", value);
    }
}

async fn enforce(
    state: &AppState,
    key: String,
    config: &RateLimitConfig,
    request: Request<Body>,
    next: Next,
) -> Response {
    match state.rate_limit_service.check(&key, config).await {
        Ok(result) if result.allowed => {
            let mut response = next.run(request).await;
            apply_rate_limit_headers(&mut response, &result);
            response
        },
        Ok(result) => {
            let retry_after = result.retry_after.unwrap_or(config.block_duration) as u64;
            let mut response = ApiError::RateLimited { retry_after }.into_response();
            apply_rate_limit_headers(&mut response, &result);
            response
        },
        Err(e) => {
            warn!(key, "rate limit check failed, allowing request: {}", e);
            next.run(request).await
        },
    }
}

/// Per-IP limit for every request, authenticated or not.
pub async fn ip_rate_limit_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !state.config.security.enable_rate_limiting {
        return next.run(request).await;
    }

    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    let config = state.rate_limit_config.unauthenticated.clone();
    enforce(&state, format!("ip:{}", ip), &config, request, next).await
}

/// Per-user limit; runs behind the auth middleware on protected routes.
pub async fn user_rate_limit_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !state.config.security.enable_rate_limiting {
        return next.run(request).await;
    }

    let Some(user) = request.extensions().get::<AuthenticatedUser>() else {
        return next.run(request).await;
    };

    let key = format!("user:{}", user.user_id);
    let config = state.rate_limit_config.authenticated.clone();
    enforce(&state, key, &config, request, next).await
}
