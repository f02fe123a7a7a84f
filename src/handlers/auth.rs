// Authentication handlers
// Register, login, refresh, logout, logout-all and session listing. Token
// pairs go out exactly as { access_token, refresh_token, token_type,
// expires_in }; every error renders as a problem document.

use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use axum_extra::{extract::cookie::CookieJar, headers::UserAgent, TypedHeader};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use validator::Validate;

use crate::{
    app::AppState,
    middleware::auth::AuthenticatedUser,
    services::{ClientInfo, RegisterInput},
    utils::problem::ApiError,
};

// =============================================================================
// REQUEST/RESPONSE TYPES
// =============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email format"))]
    #[validate(length(max = 320, message = "Email must be at most 320 characters"))]
    pub email: String,

    #[validate(length(min = 3, max = 32, message = "Username must be 3-32 characters"))]
    pub username: String,

    #[validate(length(min = 12, max = 128, message = "Password must be 12-128 characters"))]
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Email address or username.
    pub identifier: String,
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RefreshRequest {
    /// Optional for web clients, which carry the token in a cookie.
    pub refresh_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: String,
    pub email: String,
    pub username: String,
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: u64,
}

#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: String,
    pub expires_at: String,
}

fn client_info(addr: &SocketAddr, user_agent: Option<&TypedHeader<UserAgent>>) -> ClientInfo {
    ClientInfo {
        ip_address: Some(addr.ip().to_string()),
        user_agent: user_agent.map(|TypedHeader(ua)| ua.to_string()),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

// =============================================================================
// HANDLERS
// =============================================================================

/// POST /api/v1/auth/register
pub async fn register(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    user_agent: Option<TypedHeader<UserAgent>>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;

    let client = client_info(&addr, user_agent.as_ref());

    let (user, pair) = state
        .auth_service
        .register(
            RegisterInput {
                email: req.email,
                username: req.username,
                password: req.password,
            },
            client,
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id: user.id.to_string(),
            email: user.email,
            username: user.username,
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
            token_type: pair.token_type,
            expires_in: pair.expires_in,
        }),
    ))
}

/// POST /api/v1/auth/login
pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    user_agent: Option<TypedHeader<UserAgent>>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    // Login gets its own, much tighter per-IP window.
    if state.config.security.enable_rate_limiting {
        let key = format!("login:ip:{}", addr.ip());
        match state
            .rate_limit_service
            .check(&key, &state.rate_limit_config.login)
            .await
        {
            Ok(status) if !status.allowed => {
                return Err(ApiError::RateLimited {
                    retry_after: status.retry_after.unwrap_or(60) as u64,
                });
            },
            Err(e) => tracing::warn!("login rate limit check failed: {}", e),
            _ => {},
        }
    }

    let client = client_info(&addr, user_agent.as_ref());
    let (_user, pair) = state
        .auth_service
        .login(&req.identifier, &req.password, client)
        .await?;

    Ok(Json(pair))
}

/// POST /api/v1/auth/refresh
///
/// The refresh token arrives in a cookie (web) or the JSON body (mobile).
pub async fn refresh_token(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    user_agent: Option<TypedHeader<UserAgent>>,
    jar: CookieJar,
    body: Option<Json<RefreshRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let from_cookie = jar.get("refresh_token").map(|c| c.value().to_string());
    let from_body = body.and_then(|Json(req)| req.refresh_token);

    let token = from_cookie
        .or(from_body)
        .ok_or(ApiError::InvalidToken)?;

    let client = client_info(&addr, user_agent.as_ref());
    let pair = state.auth_service.refresh(&token, client).await?;
    Ok(Json(pair))
}

/// POST /api/v1/auth/logout
///
/// Idempotent: missing sessions and already-revoked tokens still succeed.
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
    body: Option<Json<LogoutRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let access_token = bearer_token(&headers).ok_or(ApiError::Unauthorized)?;

    let refresh = jar
        .get("refresh_token")
        .map(|c| c.value().to_string())
        .or_else(|| body.and_then(|Json(req)| req.refresh_token));

    state
        .auth_service
        .logout(access_token, refresh.as_deref())
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/auth/logout-all
pub async fn logout_all(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, ApiError> {
    state.auth_service.logout_all(user.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/v1/auth/account
///
/// Soft-deletes the account and tears down every session and token.
pub async fn delete_account(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, ApiError> {
    state.auth_service.delete_account(user.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/auth/sessions
///
/// Multi-device listing of the caller's live sessions.
pub async fn list_sessions(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, ApiError> {
    let sessions = state
        .auth_service
        .sessions()
        .get_user_sessions(user.user_id)
        .await
        .map_err(crate::services::AuthError::from)?;

    let sessions: Vec<SessionInfo> = sessions
        .into_iter()
        .map(|s| SessionInfo {
            id: s.id.to_string(),
            ip_address: s.ip_address,
            user_agent: s.user_agent,
            created_at: s.created_at.to_rfc3339(),
            expires_at: s.expires_at.to_rfc3339(),
        })
        .collect();

    Ok(Json(sessions))
}
