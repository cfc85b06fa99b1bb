//! Admin credential management. New keys are verified against both of the
//! provider's API surfaces before they are persisted; providers with
//! deployed servers are locked.

use crate::auth::{self, ApiError, UserPermission};
use crate::store;
use crate::AppState;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::Utc;
use ritual_common::{Error, ProviderCredentials, ProviderType};
use ritual_providers::CredentialsUpdate;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct KeyUpdate {
    pub key: String,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize, utoipa::ToSchema)]
pub struct KeysUpdateRequest {
    /// Provider kind => replacement credentials
    pub keys: HashMap<String, KeyUpdate>,
}

/// A replacement entry only counts when key, email and password are all
/// present and non-empty.
fn complete_entry(entry: &KeyUpdate) -> Option<(&str, &str)> {
    let email = entry.email.as_deref().filter(|s| !s.is_empty())?;
    let password = entry.password.as_deref().filter(|s| !s.is_empty())?;
    if entry.key.is_empty() {
        return None;
    }
    Some((email, password))
}

fn matches_stored(entry: &KeyUpdate, email: &str, password: &str, current: &ProviderCredentials) -> bool {
    current.key == entry.key
        && current.email.as_deref() == Some(email)
        && current.password.as_deref() == Some(password)
}

#[utoipa::path(
    put,
    path = "/keys",
    tag = "Keys",
    request_body = KeysUpdateRequest,
    responses(
        (status = 200, description = "Credentials updated"),
        (status = 400, description = "Unsupported provider, in-use provider or invalid credentials"),
        (status = 401, description = "Unauthorized user")
    )
)]
pub async fn update_keys(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<KeysUpdateRequest>,
) -> Result<StatusCode, ApiError> {
    auth::require(&headers, UserPermission::Admin)?;

    let existing: HashMap<ProviderType, ProviderCredentials> =
        store::find_all_credentials(&state.db)
            .await?
            .into_iter()
            .map(|credentials| (credentials.provider, credentials))
            .collect();

    let mut updates: Vec<CredentialsUpdate> = Vec::new();
    for (name, entry) in &req.keys {
        // Skip entries without a complete credential set
        let Some((email, password)) = complete_entry(entry) else {
            continue;
        };

        let Some(kind) = ProviderType::parse(name) else {
            return Err(Error::validation(format!("Unsupported provider: {name}")).into());
        };

        // Skip entries identical to what is already stored
        if let Some(current) = existing.get(&kind) {
            if matches_stored(entry, email, password, current) {
                continue;
            }
        }

        // Credentials of a provider with deployed servers are locked
        if store::count_servers_for_provider(&state.db, kind).await? > 0 {
            return Err(
                Error::validation(format!("Cannot modify key ({name}) currently in use")).into(),
            );
        }

        // Verify the supplied credentials against both API surfaces
        let candidate = ProviderCredentials {
            provider: kind,
            key: entry.key.clone(),
            email: Some(email.to_string()),
            password: Some(password.to_string()),
            auth_token: None,
            namespace: None,
            created_at: Utc::now(),
        };
        let provider = state
            .registry
            .build(&candidate, state.credential_store())
            .ok_or_else(|| ApiError::from(Error::validation(format!("Unsupported provider: {name}"))))?;
        if !provider.is_auth().await {
            return Err(Error::validation(format!("Invalid credentials for {name}")).into());
        }

        updates.push(CredentialsUpdate {
            provider: kind,
            key: entry.key.clone(),
            email: Some(email.to_string()),
            password: Some(password.to_string()),
            auth_token: None,
            namespace: None,
        });
    }

    if updates.is_empty() {
        return Err(Error::validation("No new key data provided").into());
    }
    for update in &updates {
        store::upsert_credentials(&state.db, update).await?;
    }

    Ok(StatusCode::OK)
}
