pub mod api;
pub mod config;
pub mod entities;
pub mod infrastructure;
pub mod services;
pub mod utils;

use crate::config::UploadConfig;
use crate::services::access_gate::{AccessGate, MaintenanceFlag};
use crate::services::chunk_receiver::ChunkReceiver;
use crate::services::handoff::StorageHandoff;
use crate::services::janitor::StagingJanitor;
use crate::services::reassembly::ReassemblyEngine;
use crate::services::session_cache::{SessionCache, SessionStore};
use crate::services::staging::StagingArea;
use crate::services::storage::DestinationStore;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::HeaderValue,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use utoipa::openapi::security::{ApiKey, ApiKeyValue, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::upload::upload_chunk,
        api::handlers::health::upload_healthcheck,
        api::handlers::health::health_check,
        api::handlers::admin::reload_cache,
        api::handlers::admin::set_maintenance,
    ),
    components(
        schemas(
            api::handlers::upload::ChunkUploadResponse,
            api::handlers::health::UploadHealthResponse,
            api::handlers::health::HealthResponse,
            api::handlers::admin::ReloadResponse,
            api::handlers::admin::MaintenanceRequest,
            api::handlers::admin::MaintenanceResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "uploads", description = "Link-gated chunked uploads"),
        (name = "admin", description = "Operator endpoints"),
        (name = "system", description = "Liveness")
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "admin_key",
                SecurityScheme::ApiKey(ApiKey::Header(ApiKeyValue::new(
                    api::middleware::admin::ADMIN_KEY_HEADER,
                ))),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: UploadConfig,
    pub cache: Arc<SessionCache>,
    pub gate: Arc<AccessGate>,
    pub staging: Arc<StagingArea>,
    pub destination: Arc<dyn DestinationStore>,
    pub receiver: Arc<ChunkReceiver>,
    pub janitor: Arc<StagingJanitor>,
}

impl AppState {
    /// Wire the upload pipeline: gate -> receiver -> reassembly -> handoff.
    pub fn new(
        config: UploadConfig,
        sessions: Arc<dyn SessionStore>,
        destination: Arc<dyn DestinationStore>,
    ) -> Self {
        let maintenance = Arc::new(MaintenanceFlag::new());
        let cache = Arc::new(SessionCache::new(sessions));
        let gate = Arc::new(AccessGate::new(
            cache.clone(),
            maintenance.clone(),
            config.reload_per_request,
        ));
        let staging = Arc::new(StagingArea::new(config.staging_root.clone()));
        let handoff = Arc::new(StorageHandoff::new(destination.clone()));
        let reassembly = Arc::new(ReassemblyEngine::new(handoff));
        let receiver = Arc::new(ChunkReceiver::new(
            gate.clone(),
            staging.clone(),
            reassembly,
        ));
        let janitor = Arc::new(StagingJanitor::new(staging.clone(), maintenance));

        Self {
            config,
            cache,
            gate,
            staging,
            destination,
            receiver,
            janitor,
        }
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if origins.iter().any(|o| o == "*") {
        return base.allow_origin(Any);
    }

    let list: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", o);
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(list))
}

pub fn create_app(state: AppState) -> Router {
    let admin = Router::new()
        .route("/reload-cache", post(api::handlers::admin::reload_cache))
        .route("/maintenance", post(api::handlers::admin::set_maintenance))
        .route_layer(from_fn_with_state(
            state.clone(),
            api::middleware::admin::admin_middleware,
        ));

    let uploads = Router::new()
        .route(
            "/upload-chunk/:token",
            post(api::handlers::upload::upload_chunk)
                .layer(DefaultBodyLimit::max(state.config.max_chunk_body())),
        )
        .route(
            "/healthcheck/:token",
            get(api::handlers::health::upload_healthcheck),
        )
        .merge(admin);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .nest("/uploads", uploads)
        .layer(from_fn(api::middleware::metrics::metrics_middleware))
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .layer(cors_layer(&state.config.allowed_origins))
        .with_state(state)
}
