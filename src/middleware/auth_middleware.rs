// Authentication middleware for protected routes
// Validates the bearer token through the full chain (signature, blacklist,
// session) and injects AuthenticatedUser into request extensions.

use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{header, request::Parts, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::{app::AppState, middleware::auth::AuthenticatedUser, utils::problem::ApiError};

pub async fn auth_middleware(
    State(app_state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let auth_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let token = match auth_header {
        Some(header) if header.starts_with("Bearer ") => &header[7..],
        _ => return ApiError::Unauthorized.into_response(),
    };

    // Signature -> blacklist -> session, in that order.
    match app_state.auth_service.validate_token(token).await {
        Ok(claims) => {
            let Some(auth_user) = AuthenticatedUser::from_claims(&claims) else {
                return ApiError::InvalidToken.into_response();
            };

            request.extensions_mut().insert(auth_user);
            next.run(request).await
        },
        Err(e) => {
            tracing::debug!("token validation failed: {}", e);
            ApiError::from(e).into_response()
        },
    }
}

/// Extractor so handlers can take `AuthenticatedUser` directly.
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or(ApiError::Unauthorized)
    }
}
