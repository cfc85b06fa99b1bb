use crate::auth::{self, ApiError, UserPermission};
use axum::http::HeaderMap;
use axum::Json;
use ritual_common::model::{SupportedModel, PUBLIC_MODELS};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
    pub models: Vec<SupportedModel>,
}

#[utoipa::path(
    get,
    path = "/models",
    tag = "Models",
    responses(
        (status = 200, description = "Deployable model allow-list"),
        (status = 401, description = "Unauthorized user")
    )
)]
pub async fn list_models(headers: HeaderMap) -> Result<Json<ModelsResponse>, ApiError> {
    auth::require(&headers, UserPermission::Read)?;
    Ok(Json(ModelsResponse {
        models: PUBLIC_MODELS.to_vec(),
    }))
}
