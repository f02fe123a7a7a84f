// HTTP handlers

pub mod auth;
pub mod health;
pub mod images;

use axum::routing::{delete, get, post};
use axum::Router;

use crate::app::AppState;

/// Routes under /api/v1/auth. logout-all and sessions additionally sit
/// behind the auth middleware, wired in main.
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh_token))
        .route("/logout", post(auth::logout))
}

pub fn protected_auth_routes() -> Router<AppState> {
    Router::new()
        .route("/logout-all", post(auth::logout_all))
        .route("/sessions", get(auth::list_sessions))
        .route("/account", delete(auth::delete_account))
}

/// Routes under /api/v1/images; all require authentication.
pub fn image_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(images::upload_image).get(images::list_images))
        .route(
            "/{id}",
            get(images::get_image)
                .put(images::update_image)
                .delete(images::delete_image),
        )
        .route("/{id}/variants/{size}", get(images::get_variant))
}
