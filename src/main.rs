// Lumina gallery backend entry point

use axum::{extract::DefaultBodyLimit, middleware as axum_middleware, routing::get, Router};
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lumina_backend::{
    handlers::{self, health},
    initialize_app_state,
    middleware::{auth_middleware, ip_rate_limit_middleware, user_rate_limit_middleware},
};

/// Headroom on top of the configured upload cap for the multipart framing
/// and metadata fields.
const MULTIPART_OVERHEAD_BYTES: usize = 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() > 1 && args[1] == "--version" {
        println!("lumina-backend v{}", env!("CARGO_PKG_VERSION"));
        std::process::exit(0);
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lumina_backend=debug,axum=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenv::dotenv().ok();

    let app_state = initialize_app_state().await?;
    let config = app_state.config.clone();

    lumina_backend::services::maintenance::spawn_cleanup_task(
        app_state.diesel_pool.clone(),
        std::time::Duration::from_secs(3600),
    );

    info!(
        "=== STARTING LUMINA BACKEND ({} environment) ===",
        config.server.environment
    );

    let body_limit =
        config.upload.max_upload_size_bytes as usize + MULTIPART_OVERHEAD_BYTES;

    // Protected surface: everything that requires a validated token, with
    // the per-user limit applied after authentication.
    let protected = Router::new()
        .nest("/auth", handlers::protected_auth_routes())
        .nest("/images", handlers::image_routes())
        .route_layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            user_rate_limit_middleware,
        ))
        .route_layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            auth_middleware,
        ));

    let api = Router::new()
        .nest("/auth", handlers::auth_routes())
        .merge(protected);

    let app = Router::new()
        .route("/health", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .nest("/api/v1", api)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(body_limit))
                .layer(axum_middleware::from_fn_with_state(
                    app_state.clone(),
                    ip_rate_limit_middleware,
                )),
        )
        .with_state(app_state);

    let addr: SocketAddr = config.server.bind_address.parse()?;
    info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
