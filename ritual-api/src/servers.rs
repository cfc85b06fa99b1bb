//! Server lifecycle endpoints. Behavior contract: every response either
//! carries a fully merged local + remote view or an error; nothing partial
//! leaves this module.

use crate::auth::{self, ApiError, UserPermission};
use crate::reconciliation;
use crate::store;
use crate::AppState;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use ritual_common::{
    Error, ProviderType, RunConfig, Server, ServerAction, ServerConfig, ServerMetadata,
    ServerStatus,
};
use ritual_providers::{script, BaseProvider};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ServersResponse {
    pub servers: Vec<Server>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ServerResponse {
    pub server: Server,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ServerNamesResponse {
    pub servers: Vec<ServerMetadata>,
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct CreatedResponse {
    pub id: String,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateServerRequest {
    pub server_config: ServerConfig,
    #[schema(value_type = Object)]
    pub run_config: RunConfig,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct ToggleRequest {
    pub action: ServerAction,
}

/// Builds the adapter for a provider kind from its stored credentials.
pub(crate) async fn provider_for(
    state: &AppState,
    kind: ProviderType,
    missing: &str,
) -> Result<Arc<dyn BaseProvider>, ApiError> {
    let credentials = store::find_credentials(&state.db, kind)
        .await?
        .ok_or_else(|| ApiError::from(Error::not_found(missing)))?;
    state
        .registry
        .build(&credentials, state.credential_store())
        .ok_or_else(|| ApiError::from(Error::not_found(missing)))
}

/// Adapters for every stored provider credential.
pub(crate) async fn all_providers(
    state: &AppState,
) -> Result<Vec<Arc<dyn BaseProvider>>, ApiError> {
    let credentials = store::find_all_credentials(&state.db).await?;
    let credential_store = state.credential_store();
    Ok(credentials
        .iter()
        .filter_map(|c| state.registry.build(c, credential_store.clone()))
        .collect())
}

fn validate_server_config(config: &ServerConfig) -> Result<(), Error> {
    if config.name.is_empty()
        || config.instance.is_empty()
        || config.size.is_empty()
        || config.region.is_empty()
        || config.os.is_empty()
    {
        return Err(Error::validation("Missing server parameters"));
    }
    if config.name.len() > 30 {
        return Err(Error::validation("Name is too long"));
    }
    Ok(())
}

/// A server mid-transition can be neither started nor stopped; conflicting
/// actions are refused up front.
fn check_toggle(status: ServerStatus, action: ServerAction) -> Result<(), Error> {
    match action {
        ServerAction::Start if !status.is_stopped() => {
            Err(Error::validation("Only stopped servers can be started"))
        }
        ServerAction::Stop if !status.is_running() => {
            Err(Error::validation("Only running servers can be stopped"))
        }
        _ => Ok(()),
    }
}

#[utoipa::path(
    get,
    path = "/servers",
    tag = "Servers",
    responses(
        (status = 200, description = "Merged local and remote server list", body = ServersResponse),
        (status = 401, description = "Unauthorized user")
    )
)]
pub async fn list_servers(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ServersResponse>, ApiError> {
    auth::require(&headers, UserPermission::Read)?;

    let providers = all_providers(&state).await?;
    let servers = reconciliation::get_all_servers(&state.db, &providers).await?;
    Ok(Json(ServersResponse { servers }))
}

#[utoipa::path(
    get,
    path = "/servers/names",
    tag = "Servers",
    responses(
        (status = 200, description = "Ids and names of local server records", body = ServerNamesResponse),
        (status = 401, description = "Unauthorized user")
    )
)]
pub async fn list_server_names(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ServerNamesResponse>, ApiError> {
    auth::require(&headers, UserPermission::Read)?;

    let servers = store::find_server_names(&state.db).await?;
    Ok(Json(ServerNamesResponse { servers }))
}

#[utoipa::path(
    get,
    path = "/servers/{id}",
    tag = "Servers",
    responses(
        (status = 200, description = "Server details", body = ServerResponse),
        (status = 401, description = "Unauthorized user"),
        (status = 404, description = "Server does not exist")
    )
)]
pub async fn get_server(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<ServerResponse>, ApiError> {
    auth::require(&headers, UserPermission::Read)?;

    let record = store::find_server(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::from(Error::not_found("Server does not exist")))?;
    let provider = provider_for(&state, record.provider, "Provider does not exist").await?;
    let remote = provider.get_server(&id).await?;

    Ok(Json(ServerResponse {
        server: Server {
            name: record.name,
            description: record.description,
            provider: record.provider,
            model: record.model,
            created_at: record.created_at,
            remote,
        },
    }))
}

#[utoipa::path(
    post,
    path = "/servers",
    tag = "Servers",
    request_body = CreateServerRequest,
    responses(
        (status = 200, description = "Server created", body = CreatedResponse),
        (status = 400, description = "Invalid server or run configuration"),
        (status = 401, description = "Unauthorized user")
    )
)]
pub async fn create_server(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateServerRequest>,
) -> Result<Json<CreatedResponse>, ApiError> {
    auth::require(&headers, UserPermission::ReadWrite)?;

    // Validate server and run configurations before any remote side effect
    validate_server_config(&req.server_config)?;
    script::validate_run_config(&req.run_config)?;

    let provider = provider_for(&state, req.server_config.provider, "Unsupported provider").await?;
    let id = provider
        .create_server(&req.server_config, &req.run_config)
        .await?;

    // The local record is only written once the remote create succeeded
    let model = req.run_config.get("model_id").and_then(|v| v.as_str());
    store::create_server_record(
        &state.db,
        &id,
        &req.server_config.name,
        req.server_config.description.as_deref().unwrap_or(""),
        req.server_config.provider,
        model,
    )
    .await?;

    Ok(Json(CreatedResponse { id }))
}

#[utoipa::path(
    post,
    path = "/servers/{id}/toggle",
    tag = "Servers",
    request_body = ToggleRequest,
    responses(
        (status = 200, description = "Action dispatched"),
        (status = 400, description = "Conflicting action for the server's current status"),
        (status = 401, description = "Unauthorized user"),
        (status = 404, description = "Server does not exist")
    )
)]
pub async fn toggle_server(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<ToggleRequest>,
) -> Result<StatusCode, ApiError> {
    auth::require(&headers, UserPermission::ReadWrite)?;

    let record = store::find_server(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::from(Error::not_found("Server does not exist")))?;
    let provider = provider_for(&state, record.provider, "Provider does not exist").await?;
    let server = provider.get_server(&id).await?;

    check_toggle(server.status, req.action)?;
    match req.action {
        ServerAction::Start => provider.start_server(&id).await?,
        ServerAction::Stop => provider.stop_server(&id).await?,
    }

    Ok(StatusCode::OK)
}

#[utoipa::path(
    delete,
    path = "/servers/{id}",
    tag = "Servers",
    responses(
        (status = 200, description = "Server deleted remotely and locally"),
        (status = 401, description = "Unauthorized user"),
        (status = 404, description = "Server does not exist")
    )
)]
pub async fn delete_server(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    auth::require(&headers, UserPermission::ReadWrite)?;

    let record = store::find_server(&state.db, &id)
        .await?
        .ok_or_else(|| ApiError::from(Error::not_found("Server does not exist")))?;
    let provider = provider_for(&state, record.provider, "Provider does not exist").await?;

    // Remote first; the local record only goes once the provider confirmed
    provider.delete_server(&id).await?;
    store::delete_server_record(&state.db, &id).await?;

    Ok(StatusCode::OK)
}
