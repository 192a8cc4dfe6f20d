pub mod api;
pub mod config;
pub mod infrastructure;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod utils;

use crate::config::ServerConfig;
use crate::services::storage::{MemoryWaveformStore, WaveformStore};
use axum::{
    Router,
    http::{HeaderValue, Method},
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::presigner::presign_upload,
        api::handlers::parser::parse_waveform,
        api::handlers::health::health_check,
    ),
    components(
        schemas(
            models::PresignResponse,
            models::DisplaySample,
            api::handlers::health::HealthResponse,
        )
    ),
    tags(
        (name = "waveforms", description = "Waveform upload and parsing endpoints"),
        (name = "system", description = "Service health")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn WaveformStore>,
    /// Set when uploads are received by this process instead of object storage
    pub local_uploads: Option<Arc<MemoryWaveformStore>>,
    pub config: ServerConfig,
}

impl AppState {
    pub fn with_store(storage: Arc<dyn WaveformStore>, config: ServerConfig) -> Self {
        Self {
            storage,
            local_uploads: None,
            config,
        }
    }

    pub fn with_local_uploads(store: Arc<MemoryWaveformStore>, config: ServerConfig) -> Self {
        Self {
            storage: store.clone(),
            local_uploads: Some(store),
            config,
        }
    }
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    if allowed_origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

pub fn create_app(state: AppState) -> Router {
    let mut router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .route("/presigner", get(api::handlers::presigner::presign_upload))
        .route("/parser", get(api::handlers::parser::parse_waveform));

    if state.local_uploads.is_some() {
        let body_limit = usize::try_from(state.config.max_upload_size).unwrap_or(usize::MAX);
        router = router.route(
            "/uploads/",
            post(api::handlers::uploads::receive_upload)
                .layer(axum::extract::DefaultBodyLimit::max(body_limit)),
        );
    }

    router
        .layer(cors_layer(&state.config.allowed_origins))
        .with_state(state)
}
