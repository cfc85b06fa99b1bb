use async_trait::async_trait;
use ritual_common::{
    Configuration, ProviderCredentials, ProviderServer, ProviderType, Result, RunConfig,
    ServerConfig,
};
use std::collections::HashMap;
use std::sync::Arc;

pub mod script;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

#[cfg(any(test, feature = "paperspace"))]
pub mod paperspace;

#[cfg(any(test, feature = "paperspace"))]
mod paperspace_api;

/// An ML inference provider. One implementation per cloud vendor; all
/// dashboard operations go through this trait.
#[async_trait]
pub trait BaseProvider: Send + Sync {
    fn kind(&self) -> ProviderType;

    /// Checks that the stored API credentials are valid. Ambiguous failures
    /// (network, 5xx) count as valid so a transient blip does not lock the
    /// provider out of the dashboard.
    async fn is_auth(&self) -> bool;

    /// Lists purchasable machine configurations. Computed fresh on every
    /// call; all upstream inputs must succeed or the whole call fails.
    async fn get_configurations(&self) -> Result<Vec<Configuration>>;

    /// Collects details about a single server.
    async fn get_server(&self, id: &str) -> Result<ProviderServer>;

    /// Collects details about all servers.
    async fn get_all_servers(&self) -> Result<Vec<ProviderServer>>;

    /// Creates a new server, returning its provider-native id.
    async fn create_server(
        &self,
        server_config: &ServerConfig,
        run_config: &RunConfig,
    ) -> Result<String>;

    async fn start_server(&self, id: &str) -> Result<()>;
    async fn stop_server(&self, id: &str) -> Result<()>;
    async fn delete_server(&self, id: &str) -> Result<()>;
}

/// Credential fields written back by providers (session token refresh) and
/// by the key-management endpoint. `created_at` is owned by the store.
#[derive(Debug, Clone)]
pub struct CredentialsUpdate {
    pub provider: ProviderType,
    pub key: String,
    pub email: Option<String>,
    pub password: Option<String>,
    pub auth_token: Option<String>,
    pub namespace: Option<String>,
}

/// Persistence contract for provider credentials. Implemented over Postgres
/// by the service crate and in memory for tests; providers only see this
/// trait so the adapter layer stays database-free.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_credentials(&self, provider: ProviderType)
        -> Result<Option<ProviderCredentials>>;
    async fn upsert_credentials(&self, update: &CredentialsUpdate) -> Result<()>;
}

pub type ProviderConstructor =
    fn(&ProviderCredentials, Arc<dyn CredentialStore>) -> Arc<dyn BaseProvider>;

/// Maps a provider kind to its adapter constructor. Built once at process
/// start; adding a provider is a single `register` call.
pub struct ProviderRegistry {
    constructors: HashMap<ProviderType, ProviderConstructor>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registry with every provider this build was compiled with.
    pub fn with_defaults() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();
        #[cfg(any(test, feature = "paperspace"))]
        registry.register(ProviderType::Paperspace, |credentials, store| {
            Arc::new(paperspace::PaperspaceProvider::from_credentials(
                credentials,
                store,
            ))
        });
        registry
    }

    pub fn register(&mut self, kind: ProviderType, constructor: ProviderConstructor) {
        self.constructors.insert(kind, constructor);
    }

    pub fn build(
        &self,
        credentials: &ProviderCredentials,
        store: Arc<dyn CredentialStore>,
    ) -> Option<Arc<dyn BaseProvider>> {
        self.constructors
            .get(&credentials.provider)
            .map(|constructor| constructor(credentials, store))
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
pub(crate) fn env_guard() -> std::sync::MutexGuard<'static, ()> {
    // Process-wide env mutations in tests must not interleave.
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(|e| e.into_inner())
}
