//! In-memory doubles for tests and local development: a provider whose
//! fleet lives in a `Vec`, and a credential store backed by a `HashMap`.

use crate::{BaseProvider, CredentialStore, CredentialsUpdate};
use async_trait::async_trait;
use chrono::Utc;
use ritual_common::{
    Configuration, ConfigurationPrice, Error, GpuSpecifications, ProviderCredentials,
    ProviderServer, ProviderType, Result, RunConfig, ServerConfig, ServerSpecifications,
    ServerStatus,
};
use std::collections::HashMap;
use std::sync::Mutex;

pub struct MockProvider {
    auth_ok: bool,
    fail_listing: bool,
    servers: Mutex<Vec<ProviderServer>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::with_servers(Vec::new())
    }

    pub fn with_servers(servers: Vec<ProviderServer>) -> Self {
        Self {
            auth_ok: true,
            fail_listing: false,
            servers: Mutex::new(servers),
        }
    }

    /// A provider whose listing calls fail, for abort-path tests.
    pub fn failing() -> Self {
        Self {
            auth_ok: true,
            fail_listing: true,
            servers: Mutex::new(Vec::new()),
        }
    }

    /// A provider whose credentials never validate.
    pub fn unauthorized() -> Self {
        Self {
            auth_ok: false,
            fail_listing: false,
            servers: Mutex::new(Vec::new()),
        }
    }

    /// Fixture server with sane defaults.
    pub fn server(id: &str) -> ProviderServer {
        ProviderServer {
            id: id.to_string(),
            ip: "203.0.113.7".to_string(),
            os: "Ubuntu 20.04".to_string(),
            status: ServerStatus::Ready,
            price: ConfigurationPrice {
                hourly: 3.09,
                monthly: None,
            },
            specs: ServerSpecifications {
                cores: 8,
                ram: 80,
                gpu: GpuSpecifications {
                    model: "Ampere A100".to_string(),
                    count: 2,
                },
            },
        }
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseProvider for MockProvider {
    fn kind(&self) -> ProviderType {
        ProviderType::Paperspace
    }

    async fn is_auth(&self) -> bool {
        self.auth_ok
    }

    async fn get_configurations(&self) -> Result<Vec<Configuration>> {
        Ok(Vec::new())
    }

    async fn get_server(&self, id: &str) -> Result<ProviderServer> {
        self.servers
            .lock()
            .unwrap()
            .iter()
            .find(|server| server.id == id)
            .cloned()
            .ok_or_else(|| Error::upstream(format!("Error collecting server: {id}")))
    }

    async fn get_all_servers(&self) -> Result<Vec<ProviderServer>> {
        if self.fail_listing {
            return Err(Error::upstream("Error collecting all servers"));
        }
        Ok(self.servers.lock().unwrap().clone())
    }

    async fn create_server(
        &self,
        _server_config: &ServerConfig,
        _run_config: &RunConfig,
    ) -> Result<String> {
        let id = format!("mock-{}", uuid::Uuid::new_v4());
        let mut server = Self::server(&id);
        server.status = ServerStatus::Provisioning;
        self.servers.lock().unwrap().push(server);
        Ok(id)
    }

    async fn start_server(&self, id: &str) -> Result<()> {
        self.set_status(id, ServerStatus::Starting)
    }

    async fn stop_server(&self, id: &str) -> Result<()> {
        self.set_status(id, ServerStatus::Stopping)
    }

    async fn delete_server(&self, id: &str) -> Result<()> {
        let mut servers = self.servers.lock().unwrap();
        let before = servers.len();
        servers.retain(|server| server.id != id);
        if servers.len() == before {
            return Err(Error::upstream(format!("Error deleting server: {id}")));
        }
        Ok(())
    }
}

impl MockProvider {
    fn set_status(&self, id: &str, status: ServerStatus) -> Result<()> {
        let mut servers = self.servers.lock().unwrap();
        match servers.iter_mut().find(|server| server.id == id) {
            Some(server) => {
                server.status = status;
                Ok(())
            }
            None => Err(Error::upstream(format!("Error starting server {id}"))),
        }
    }
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    records: Mutex<HashMap<ProviderType, ProviderCredentials>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_credentials(credentials: ProviderCredentials) -> Self {
        let store = Self::new();
        store
            .records
            .lock()
            .unwrap()
            .insert(credentials.provider, credentials);
        store
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_credentials(
        &self,
        provider: ProviderType,
    ) -> Result<Option<ProviderCredentials>> {
        Ok(self.records.lock().unwrap().get(&provider).cloned())
    }

    async fn upsert_credentials(&self, update: &CredentialsUpdate) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        let created_at = records
            .get(&update.provider)
            .map(|existing| existing.created_at)
            .unwrap_or_else(Utc::now);
        records.insert(
            update.provider,
            ProviderCredentials {
                provider: update.provider,
                key: update.key.clone(),
                email: update.email.clone(),
                password: update.password.clone(),
                auth_token: update.auth_token.clone(),
                namespace: update.namespace.clone(),
                created_at,
            },
        );
        Ok(())
    }
}
