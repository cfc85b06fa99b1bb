use axum::routing::{delete, get, post, put};
use axum::Router;
use ritual_providers::{CredentialStore, ProviderRegistry};
use sqlx::{Pool, Postgres};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

pub struct AppState {
    pub db: Pool<Postgres>,
    pub registry: ProviderRegistry,
}

impl AppState {
    pub fn new(db: Pool<Postgres>) -> Arc<Self> {
        Arc::new(Self {
            db,
            registry: ProviderRegistry::with_defaults(),
        })
    }

    /// The Postgres pool doubles as the credential store handed to adapters.
    pub fn credential_store(&self) -> Arc<dyn CredentialStore> {
        Arc::new(crate::store::PgCredentialStore(self.db.clone()))
    }
}

/// Create CORS layer with permissive settings
pub fn create_cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Build the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/servers", get(crate::servers::list_servers))
        .route("/servers", post(crate::servers::create_server))
        .route("/servers/names", get(crate::servers::list_server_names))
        .route("/servers/{id}", get(crate::servers::get_server))
        .route("/servers/{id}", delete(crate::servers::delete_server))
        .route("/servers/{id}/toggle", post(crate::servers::toggle_server))
        .route(
            "/configurations",
            get(crate::configurations::list_configurations),
        )
        .route("/models", get(crate::models_endpoint::list_models))
        .route("/keys", put(crate::keys::update_keys))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
