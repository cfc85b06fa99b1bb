use crate::auth::{self, ApiError, UserPermission};
use crate::servers::all_providers;
use crate::AppState;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use ritual_common::Configuration;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ConfigurationsResponse {
    /// Provider kind => purchasable configurations
    pub configurations: HashMap<String, Vec<Configuration>>,
}

#[utoipa::path(
    get,
    path = "/configurations",
    tag = "Configurations",
    responses(
        (status = 200, description = "Configurations for every stored provider", body = ConfigurationsResponse),
        (status = 401, description = "Unauthorized user")
    )
)]
pub async fn list_configurations(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ConfigurationsResponse>, ApiError> {
    auth::require(&headers, UserPermission::ReadWrite)?;

    // All-or-nothing: one provider failing fails the whole catalog
    let mut configurations = HashMap::new();
    for provider in all_providers(&state).await? {
        configurations.insert(
            provider.kind().as_str().to_string(),
            provider.get_configurations().await?,
        );
    }

    Ok(Json(ConfigurationsResponse { configurations }))
}
