//! Postgres persistence. Queries bind at runtime (no compile-time
//! DATABASE_URL) and surface as `Error::Store` so handlers can map them
//! uniformly.

use async_trait::async_trait;
use ritual_common::{
    Error, ProviderCredentials, ProviderType, Result, ServerMetadata, ServerRecord,
};
use ritual_providers::{CredentialStore, CredentialsUpdate};
use sqlx::{Pool, Postgres};

fn store_error(e: sqlx::Error) -> Error {
    Error::store(e.to_string())
}

pub async fn find_all_credentials(db: &Pool<Postgres>) -> Result<Vec<ProviderCredentials>> {
    sqlx::query_as::<_, ProviderCredentials>(
        "SELECT provider, key, email, password, auth_token, namespace, created_at
         FROM providers",
    )
    .fetch_all(db)
    .await
    .map_err(store_error)
}

pub async fn find_credentials(
    db: &Pool<Postgres>,
    provider: ProviderType,
) -> Result<Option<ProviderCredentials>> {
    sqlx::query_as::<_, ProviderCredentials>(
        "SELECT provider, key, email, password, auth_token, namespace, created_at
         FROM providers
         WHERE provider = $1",
    )
    .bind(provider)
    .fetch_optional(db)
    .await
    .map_err(store_error)
}

/// Upserts a credential row. A `None` token/namespace leaves any previously
/// stored session untouched; only a fresh login overwrites it.
pub async fn upsert_credentials(db: &Pool<Postgres>, update: &CredentialsUpdate) -> Result<()> {
    sqlx::query(
        "INSERT INTO providers (provider, key, email, password, auth_token, namespace)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (provider) DO UPDATE
         SET key = EXCLUDED.key,
             email = EXCLUDED.email,
             password = EXCLUDED.password,
             auth_token = COALESCE(EXCLUDED.auth_token, providers.auth_token),
             namespace = COALESCE(EXCLUDED.namespace, providers.namespace)",
    )
    .bind(update.provider)
    .bind(&update.key)
    .bind(&update.email)
    .bind(&update.password)
    .bind(&update.auth_token)
    .bind(&update.namespace)
    .execute(db)
    .await
    .map_err(store_error)?;
    Ok(())
}

pub async fn find_server(db: &Pool<Postgres>, id: &str) -> Result<Option<ServerRecord>> {
    sqlx::query_as::<_, ServerRecord>(
        "SELECT id, name, description, provider, model, created_at
         FROM servers
         WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(db)
    .await
    .map_err(store_error)
}

pub async fn find_server_names(db: &Pool<Postgres>) -> Result<Vec<ServerMetadata>> {
    sqlx::query_as::<_, ServerMetadata>("SELECT id, name FROM servers")
        .fetch_all(db)
        .await
        .map_err(store_error)
}

pub async fn create_server_record(
    db: &Pool<Postgres>,
    id: &str,
    name: &str,
    description: &str,
    provider: ProviderType,
    model: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO servers (id, name, description, provider, model)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(id)
    .bind(name)
    .bind(description)
    .bind(provider)
    .bind(model)
    .execute(db)
    .await
    .map_err(store_error)?;
    Ok(())
}

pub async fn delete_server_record(db: &Pool<Postgres>, id: &str) -> Result<()> {
    sqlx::query("DELETE FROM servers WHERE id = $1")
        .bind(id)
        .execute(db)
        .await
        .map_err(store_error)?;
    Ok(())
}

pub async fn count_servers_for_provider(db: &Pool<Postgres>, provider: ProviderType) -> Result<i64> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM servers WHERE provider = $1")
        .bind(provider)
        .fetch_one(db)
        .await
        .map_err(store_error)
}

/// Local server records as the reconciliation routine consumes them.
#[async_trait]
pub trait ServerStore: Send + Sync {
    /// All records, ordered by name ascending; the merge result keeps this
    /// ordering.
    async fn find_all_servers(&self) -> Result<Vec<ServerRecord>>;
    async fn delete_servers_by_ids(&self, ids: &[String]) -> Result<()>;
}

#[async_trait]
impl ServerStore for Pool<Postgres> {
    async fn find_all_servers(&self) -> Result<Vec<ServerRecord>> {
        sqlx::query_as::<_, ServerRecord>(
            "SELECT id, name, description, provider, model, created_at
             FROM servers
             ORDER BY name ASC",
        )
        .fetch_all(self)
        .await
        .map_err(store_error)
    }

    async fn delete_servers_by_ids(&self, ids: &[String]) -> Result<()> {
        sqlx::query("DELETE FROM servers WHERE id = ANY($1)")
            .bind(ids)
            .execute(self)
            .await
            .map_err(store_error)?;
        Ok(())
    }
}

/// Newtype over the sqlx pool so the foreign `CredentialStore` trait can be
/// implemented without violating Rust's orphan rule.
pub struct PgCredentialStore(pub Pool<Postgres>);

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_credentials(
        &self,
        provider: ProviderType,
    ) -> Result<Option<ProviderCredentials>> {
        find_credentials(&self.0, provider).await
    }

    async fn upsert_credentials(&self, update: &CredentialsUpdate) -> Result<()> {
        upsert_credentials(&self.0, update).await
    }
}
