use axum::{
    http::{header::HeaderName, HeaderValue},
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowHeaders, AllowMethods, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use services::AppState;

use services::scenario_images::IMAGES_ROUTE;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = cors_layer(&app_state.config.cors_origins);

    let mut router = Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        .nest("/api/session", session_routes())
        .nest("/api/analyze-driving", analysis_routes());

    let images_path = &app_state.config.images_path;
    if images_path.is_dir() {
        tracing::info!("Serving scenario images from {}", images_path.display());
        router = router.nest_service(IMAGES_ROUTE, ServeDir::new(images_path));
    } else {
        tracing::warn!(
            "Scenario image directory {} not found, {} is not mounted",
            images_path.display(),
            IMAGES_ROUTE
        );
    }

    router
        .with_state(app_state)
        .layer(cors)
        .layer(CompressionLayer::new())
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

fn session_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/start", post(handlers::sessions::start_session))
        .route("/{id}", delete(handlers::sessions::end_session))
        .route("/{id}/answer", post(handlers::sessions::submit_answer))
        .route("/{id}/progress", get(handlers::sessions::get_progress))
        .route("/{id}/end", post(handlers::sessions::end_session))
}

fn analysis_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(handlers::analysis::analyze_driving))
        .route("/simple", post(handlers::analysis::analyze_driving_simple))
}

/// Credentialed CORS cannot use wildcards, so methods and headers mirror the
/// preflight request.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .expose_headers([HeaderName::from_static(
            middlewares::trace::TRACE_ID_HEADER,
        )])
        .allow_credentials(true)
}
