//! PaperSpace adapter. Two API surfaces back every operation: the public
//! REST API authenticated with an `X-Api-Key` header, and the private
//! console API authenticated with an ephemeral session token scoped to a
//! team namespace. The private session is obtained through the same login
//! call the console web client makes and refreshed transparently whenever a
//! probe reports it stale.

use crate::paperspace_api::{
    gpu_memory_gb, Created, LoginData, LoginUser, Machine, MachineDetail, OperatingSystemsData,
    OsTemplate, StorageRate, StorageRatesData, ALLOWED_MACHINES, ALLOWED_OPERATING_SYSTEMS,
    CLIENT_FINGERPRINT, OPERATING_SYSTEMS_QUERY, PAPERSPACE_API_BASE_URL,
    PAPERSPACE_PRIVATE_API_BASE_URL, PENDING_TEAM_MEMBERSHIPS_QUERY, REQUEST_VALIDATION_KEY,
    STORAGE_RATES_QUERY,
};
use crate::script;
use crate::{BaseProvider, CredentialStore, CredentialsUpdate};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{header, Client, StatusCode};
use ritual_common::{
    Configuration, ConfigurationPrice, ConfigurationRegion, Error, GpuSpecifications,
    MachineSpecifications, OperatingSystem, ProviderCredentials, ProviderServer, ProviderType,
    Result, RunConfig, ServerConfig, ServerSpecifications, StorageCost,
};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Ephemeral private-API session. Constructed empty, filled from the stored
/// credential record or a fresh login, and discarded with the adapter at the
/// end of the call chain.
#[derive(Debug, Default)]
struct PrivateSession {
    token: Option<String>,
    namespace: Option<String>,
}

pub struct PaperspaceProvider {
    client: Client,
    api_key: String,
    email: Option<String>,
    password: Option<String>,
    store: Arc<dyn CredentialStore>,
    // Refresh is a critical section: concurrent callers seeing a stale token
    // must not both trigger a login.
    session: Mutex<PrivateSession>,
    public_base: String,
    private_base: String,
}

impl PaperspaceProvider {
    pub fn new(
        api_key: String,
        email: Option<String>,
        password: Option<String>,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        // Default reqwest client has no overall timeout. If PaperSpace
        // stalls, the inbound request would hang with it.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap();
        let api_key = api_key.trim().to_string();
        let email = email
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let password = password.filter(|s| !s.is_empty());
        Self {
            client,
            api_key,
            email,
            password,
            store,
            session: Mutex::new(PrivateSession::default()),
            public_base: PAPERSPACE_API_BASE_URL.to_string(),
            private_base: PAPERSPACE_PRIVATE_API_BASE_URL.to_string(),
        }
    }

    pub fn from_credentials(
        credentials: &ProviderCredentials,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        Self::new(
            credentials.key.clone(),
            credentials.email.clone(),
            credentials.password.clone(),
            store,
        )
    }

    /// Points the adapter at alternate API endpoints.
    pub fn with_endpoints(mut self, public_base: String, private_base: String) -> Self {
        self.public_base = public_base.trim_end_matches('/').to_string();
        self.private_base = private_base.trim_end_matches('/').to_string();
        self
    }

    fn public_headers(&self) -> header::HeaderMap {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            "X-Api-Key",
            header::HeaderValue::from_str(&self.api_key).unwrap(),
        );
        headers
    }

    /// Headers the console web client sends on private-API calls.
    fn private_headers(&self, namespace: &str, token: &str) -> header::HeaderMap {
        let mut headers = header::HeaderMap::new();
        headers.insert(header::ACCEPT, header::HeaderValue::from_static("*/*"));
        headers.insert(
            header::ACCEPT_LANGUAGE,
            header::HeaderValue::from_static("en-US,en;q=0.9"),
        );
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("token {}_{}", namespace, token)).unwrap(),
        );
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        headers.insert(
            header::ORIGIN,
            header::HeaderValue::from_static("https://console.paperspace.com"),
        );
        headers.insert(
            header::REFERER,
            header::HeaderValue::from_static("https://console.paperspace.com/"),
        );
        headers
    }

    /// Probe the public key-auth surface. A 400/401 means the key was
    /// rejected; any other outcome (5xx, transport failure) counts as still
    /// valid so a transient blip does not read as revoked credentials.
    async fn is_public_auth(&self) -> bool {
        let result = self
            .client
            .get(format!("{}/machines/getMachines", self.public_base))
            .headers(self.public_headers())
            .query(&[("limit", "1")])
            .send()
            .await;
        match result {
            Ok(resp) => !matches!(
                resp.status(),
                StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED
            ),
            Err(_) => true,
        }
    }

    /// Cheap read-only probe against the private API with the current
    /// session. Same optimistic rule as the public probe.
    async fn is_private_auth(&self, session: &PrivateSession) -> bool {
        let body = json!({
            "query": PENDING_TEAM_MEMBERSHIPS_QUERY,
            "operationName": "PendingTeamMemberships",
            "variables": { "first": 10 },
        });
        let result = self
            .client
            .post(format!("{}/graphql", self.private_base))
            .headers(self.session_headers(session))
            .header("authority", "api.paperspace.com")
            .json(&body)
            .send()
            .await;
        match result {
            Ok(resp)
                if matches!(
                    resp.status(),
                    StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED
                ) =>
            {
                tracing::error!("paperspace private API unauthorized");
                false
            }
            _ => true,
        }
    }

    fn session_headers(&self, session: &PrivateSession) -> header::HeaderMap {
        self.private_headers(
            session.namespace.as_deref().unwrap_or_default(),
            session.token.as_deref().unwrap_or_default(),
        )
    }

    async fn load_session_from_store(&self, session: &mut PrivateSession) {
        match self.store.find_credentials(self.kind()).await {
            Ok(Some(credentials)) => {
                session.token = credentials.auth_token;
                session.namespace = credentials.namespace;
            }
            Ok(None) => {}
            Err(e) => tracing::error!("error loading stored paperspace session: {e}"),
        }
    }

    /// Derives the working namespace for the private API: a team the user
    /// belongs to other than their personal team, or the sole membership if
    /// there is only one.
    async fn get_namespace(&self, user: &LoginUser, session: &PrivateSession) -> Option<String> {
        let personal_team = user.user_team.iter().find(|team| team.is_user_team);
        let team_id = if user.team_memberships.len() == 1 {
            Some(user.team_memberships[0].team_id)
        } else {
            user.team_memberships
                .iter()
                .find(|membership| Some(membership.team_id) != personal_team.map(|team| team.id))
                .map(|membership| membership.team_id)
        };
        let Some(team_id) = team_id else {
            tracing::error!("error getting namespace: user has no team memberships");
            return None;
        };

        let result = self
            .client
            .get(format!("{}/teams/{}/showTeam", self.public_base, team_id))
            .query(&[("access_token", session.token.as_deref().unwrap_or_default())])
            .headers(self.session_headers(session))
            .header("authority", "api.paperspace.io")
            .send()
            .await;
        let resp = match result {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                tracing::error!("error getting namespace: status {}", resp.status());
                return None;
            }
            Err(e) => {
                tracing::error!("error getting namespace: {e}");
                return None;
            }
        };
        match resp.json::<crate::paperspace_api::ShowTeam>().await {
            Ok(team) => Some(team.namespace),
            Err(e) => {
                tracing::error!("error getting namespace: {e}");
                None
            }
        }
    }

    /// Login flow with private credentials; loads and persists the new
    /// token and namespace on success. Every failure resolves to `false`;
    /// nothing escapes this boundary as an error.
    async fn login(&self, email: &str, password: &str, session: &mut PrivateSession) -> bool {
        let body = json!({
            "email": email,
            "password": password,
            "clientFingerprint": CLIENT_FINGERPRINT,
            "PS_REQUEST_VALIDATION_KEY": REQUEST_VALIDATION_KEY,
        });
        let result = self
            .client
            .post(format!("{}/users/login", self.public_base))
            .headers(self.session_headers(session))
            .header("authority", "api.paperspace.io")
            .json(&body)
            .send()
            .await;
        let resp = match result {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(resp) => {
                tracing::error!("paperspace login rejected: status {}", resp.status());
                return false;
            }
            Err(e) => {
                tracing::error!("paperspace login failed: {e}");
                return false;
            }
        };
        let data: LoginData = match resp.json().await {
            Ok(data) => data,
            Err(e) => {
                tracing::error!("paperspace login returned malformed body: {e}");
                return false;
            }
        };

        session.token = Some(data.id);
        session.namespace = self.get_namespace(&data.user, session).await;

        // Persist immediately so later call chains skip the login.
        let update = CredentialsUpdate {
            provider: self.kind(),
            key: self.api_key.clone(),
            email: Some(email.to_string()),
            password: Some(password.to_string()),
            auth_token: session.token.clone(),
            namespace: session.namespace.clone(),
        };
        match self.store.upsert_credentials(&update).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("error persisting paperspace session: {e}");
                false
            }
        }
    }

    /// Refreshes the session token. Credentials are passed at construction
    /// when the user is updating them; otherwise they come from the stored
    /// record.
    async fn refresh_token(&self, session: &mut PrivateSession) -> bool {
        let (email, password) = match (self.email.clone(), self.password.clone()) {
            (Some(email), Some(password)) => (email, password),
            _ => {
                let stored = match self.store.find_credentials(self.kind()).await {
                    Ok(Some(credentials)) => credentials,
                    _ => return false,
                };
                match (stored.email, stored.password) {
                    (Some(email), Some(password)) => (email, password),
                    _ => return false,
                }
            }
        };
        self.login(&email, &password, session).await
    }

    /// Runs before every private-API call: checks the held token, loading
    /// it from the store if absent and refreshing it if stale. Returns the
    /// `(namespace, token)` pair privileged calls build headers from, or
    /// `None` when no valid session could be established.
    async fn ensure_private_auth(&self) -> Option<(String, String)> {
        let mut session = self.session.lock().await;
        if session.token.is_none() || session.namespace.is_none() {
            self.load_session_from_store(&mut session).await;
        }

        let valid = self.is_private_auth(&session).await;
        if valid || self.refresh_token(&mut session).await {
            Some((
                session.namespace.clone().unwrap_or_default(),
                session.token.clone().unwrap_or_default(),
            ))
        } else {
            None
        }
    }

    /// Fetches rates for disk storage and transforms them.
    async fn get_storage_rates(&self) -> Result<Vec<StorageCost>> {
        let Some((namespace, token)) = self.ensure_private_auth().await else {
            return Err(Error::authentication("Authentication failed."));
        };
        let body = json!({
            "query": STORAGE_RATES_QUERY,
            "operationName": "StorageRates",
            "variables": { "first": 20 },
        });
        let resp = self
            .client
            .post(format!("{}/graphql", self.private_base))
            .headers(self.private_headers(&namespace, &token))
            .header("authority", "api.paperspace.com")
            .json(&body)
            .send()
            .await
            .map_err(|_| Error::upstream("Error getting storage rates."))?;
        if !resp.status().is_success() {
            return Err(upstream_error(resp, "Error getting storage rates.".to_string()).await);
        }
        let data: StorageRatesData = resp
            .json()
            .await
            .map_err(|_| Error::upstream("Error getting storage rates."))?;
        Ok(transform_storage_rates(data.data.storage_rates.nodes))
    }

    /// Fetches OS templates, split into windows and other buckets.
    async fn get_os_templates(&self) -> Result<(Vec<OperatingSystem>, Vec<OperatingSystem>)> {
        let resp = self
            .client
            .get(format!("{}/templates/getTemplates", self.public_base))
            .headers(self.public_headers())
            .send()
            .await
            .map_err(|_| Error::upstream("Error collecting templates."))?;
        if !resp.status().is_success() {
            return Err(upstream_error(resp, "Error collecting templates.".to_string()).await);
        }
        let templates: Vec<OsTemplate> = resp
            .json()
            .await
            .map_err(|_| Error::upstream("Error collecting templates."))?;
        Ok(transform_templates(templates, ALLOWED_OPERATING_SYSTEMS))
    }

    /// Creates and registers a startup script for a new machine. The script
    /// is rendered first so missing env secrets fail before any remote call.
    async fn create_startup_script(&self, num_shard: i32, run_config: &RunConfig) -> Result<String> {
        let script_text = script::format_startup_script(num_shard, run_config)?;
        let body = json!({
            "scriptName": format!("startup_script_{}", Utc::now().timestamp_millis()),
            "scriptText": script_text,
            "runOnce": false,
        });
        let resp = self
            .client
            .post(format!("{}/scripts/createScript", self.public_base))
            .headers(self.public_headers())
            .json(&body)
            .send()
            .await
            .map_err(|_| Error::upstream("Error creating startup script."))?;
        if !resp.status().is_success() {
            return Err(Error::upstream("Error creating startup script."));
        }
        let created: Created = resp
            .json()
            .await
            .map_err(|_| Error::upstream("Error creating startup script."))?;
        Ok(created.id)
    }

    async fn server_action(&self, id: &str, action: &str, fallback: String) -> Result<()> {
        let resp = self
            .client
            .post(format!("{}/machines/{}/{}", self.public_base, id, action))
            .headers(self.public_headers())
            .send()
            .await
            .map_err(|_| Error::Upstream(fallback.clone()))?;
        if !resp.status().is_success() {
            return Err(upstream_error(resp, fallback).await);
        }
        Ok(())
    }
}

#[async_trait]
impl BaseProvider for PaperspaceProvider {
    fn kind(&self) -> ProviderType {
        ProviderType::Paperspace
    }

    async fn is_auth(&self) -> bool {
        self.is_public_auth().await && self.ensure_private_auth().await.is_some()
    }

    async fn get_configurations(&self) -> Result<Vec<Configuration>> {
        let Some((namespace, token)) = self.ensure_private_auth().await else {
            return Err(Error::authentication("Authentication failed."));
        };
        let body = json!({
            "query": OPERATING_SYSTEMS_QUERY,
            "operationName": "OperatingSystems",
            "variables": { "osFirst": 40, "vmTypeFirst": 100 },
        });
        let resp = self
            .client
            .post(format!("{}/graphql", self.private_base))
            .headers(self.private_headers(&namespace, &token))
            .header("authority", "api.paperspace.com")
            .json(&body)
            .send()
            .await
            .map_err(|_| Error::upstream("Error getting configurations."))?;
        if !resp.status().is_success() {
            return Err(upstream_error(resp, "Error getting configurations.".to_string()).await);
        }
        let data: OperatingSystemsData = resp
            .json()
            .await
            .map_err(|_| Error::upstream("Error getting configurations."))?;

        let storage_rates = self.get_storage_rates().await?;
        let (windows, other) = self.get_os_templates().await?;
        Ok(build_configurations(
            data,
            ALLOWED_MACHINES,
            &storage_rates,
            &windows,
            &other,
        ))
    }

    async fn get_server(&self, id: &str) -> Result<ProviderServer> {
        if id.is_empty() {
            return Err(Error::validation("Missing server ID"));
        }
        let fallback = || Error::upstream(format!("Error collecting server: {id}"));

        let resp = self
            .client
            .get(format!("{}/machines/getMachinePublic", self.public_base))
            .headers(self.public_headers())
            .query(&[("machineId", id)])
            .send()
            .await
            .map_err(|_| fallback())?;
        if !resp.status().is_success() {
            return Err(upstream_error(resp, format!("Error collecting server: {id}")).await);
        }
        let machine: Machine = resp.json().await.map_err(|_| fallback())?;
        let mut server = transform_server(&machine);

        // The public payload carries no pricing; that needs the internal id.
        let resp = self
            .client
            .get(format!("{}/machines/getMachines", self.public_base))
            .headers(self.public_headers())
            .query(&[("machineId", id)])
            .send()
            .await
            .map_err(|_| fallback())?;
        if !resp.status().is_success() {
            return Err(upstream_error(resp, format!("Error collecting server: {id}")).await);
        }
        let machines: Vec<Machine> = resp.json().await.map_err(|_| fallback())?;
        let internal_id = machines
            .iter()
            .find(|machine| machine.id == id)
            .and_then(|machine| machine.internal_id)
            .ok_or_else(|| fallback())?;

        let resp = self
            .client
            .get(format!("{}/machines/getMachine", self.public_base))
            .headers(self.public_headers())
            .query(&[("machineId", internal_id.to_string())])
            .send()
            .await
            .map_err(|_| fallback())?;
        if !resp.status().is_success() {
            return Err(upstream_error(resp, format!("Error collecting server: {id}")).await);
        }
        let detail: MachineDetail = resp.json().await.map_err(|_| fallback())?;

        let hourly: f64 = detail.usage_rate.rate_hourly.parse().map_err(|_| fallback())?;
        let monthly: f64 = detail
            .usage_rate
            .rate_monthly
            .parse()
            .map_err(|_| fallback())?;
        let storage: f64 = detail.storage_rate.rate.parse().map_err(|_| fallback())?;
        server.price.hourly = hourly;
        server.price.monthly = Some(monthly + storage);

        Ok(server)
    }

    async fn get_all_servers(&self) -> Result<Vec<ProviderServer>> {
        let resp = self
            .client
            .get(format!("{}/machines/getMachines", self.public_base))
            .headers(self.public_headers())
            .send()
            .await
            .map_err(|_| Error::upstream("Error collecting all servers"))?;
        if !resp.status().is_success() {
            return Err(upstream_error(resp, "Error collecting all servers".to_string()).await);
        }
        let machines: Vec<Machine> = resp
            .json()
            .await
            .map_err(|_| Error::upstream("Error collecting all servers"))?;
        Ok(machines.iter().map(transform_server).collect())
    }

    async fn create_server(
        &self,
        server_config: &ServerConfig,
        run_config: &RunConfig,
    ) -> Result<String> {
        let script_id = self
            .create_startup_script(number_of_gpus(&server_config.instance), run_config)
            .await?;

        let body = json!({
            "machineType": server_config.instance,
            "region": server_config.region,
            "machineName": server_config.name,
            "templateId": server_config.os,
            "size": server_config.size,
            "scriptId": script_id,
            "billingType": "hourly",
            "assignPublicIp": true,
        });
        let fallback = "Error creating server - Are you authorized to create this instance?";
        let resp = self
            .client
            .post(format!(
                "{}/machines/createSingleMachinePublic",
                self.public_base
            ))
            .headers(self.public_headers())
            .json(&body)
            .send()
            .await
            .map_err(|_| Error::upstream(fallback))?;
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v.get("error")?.get("message")?.as_str().map(str::to_string));
            return Err(Error::Upstream(message.unwrap_or_else(|| fallback.to_string())));
        }
        let created: Created = resp.json().await.map_err(|_| Error::upstream(fallback))?;
        Ok(created.id)
    }

    async fn start_server(&self, id: &str) -> Result<()> {
        self.server_action(id, "start", format!("Error starting server {id}"))
            .await
    }

    async fn stop_server(&self, id: &str) -> Result<()> {
        self.server_action(id, "stop", format!("Error stopping server {id}"))
            .await
    }

    async fn delete_server(&self, id: &str) -> Result<()> {
        self.server_action(id, "destroyMachine", format!("Error deleting server: {id}"))
            .await
    }
}

/// Builds the error for a failed provider call: the provider's own
/// `message` when its error body carries one, else the given fallback.
async fn upstream_error(resp: reqwest::Response, fallback: String) -> Error {
    let body = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str().map(str::to_string)));
    Error::Upstream(message.unwrap_or(fallback))
}

/// Extract # of GPUs from the machine type name (e.g. P4000x2).
fn number_of_gpus(machine_name: &str) -> i32 {
    machine_name
        .rfind('x')
        .map(|at| &machine_name[at + 1..])
        .filter(|suffix| !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|suffix| suffix.parse().ok())
        .unwrap_or(1)
}

fn transform_server(machine: &Machine) -> ProviderServer {
    let gpu_count = number_of_gpus(&machine.machine_type);
    ProviderServer {
        id: machine.id.clone(),
        ip: machine.public_ip_address.clone().unwrap_or_default(),
        os: machine.os.clone().unwrap_or_default(),
        status: machine.state,
        price: ConfigurationPrice {
            hourly: -1.0, // missing until the internal lookup fills it
            monthly: None,
        },
        specs: ServerSpecifications {
            cores: machine.cpus,
            // gpu ram
            ram: gpu_memory_gb(&machine.gpu)
                .map(|per_gpu| gpu_count * per_gpu)
                .unwrap_or(-1),
            gpu: GpuSpecifications {
                model: machine.gpu.clone(),
                count: gpu_count,
            },
        },
    }
}

fn transform_storage_rates(rates: Vec<StorageRate>) -> Vec<StorageCost> {
    rates
        .into_iter()
        .map(|rate| StorageCost {
            monthly: rate.rate,
            size: rate.size.to_string(),
        })
        .collect()
}

/// Transforms and deduplicates OS templates, splitting windows from the
/// rest. Per OS name only the most recently created template survives; both
/// buckets come back sorted by name.
fn transform_templates(
    templates: Vec<OsTemplate>,
    allowed: &[&str],
) -> (Vec<OperatingSystem>, Vec<OperatingSystem>) {
    let mut windows: HashMap<String, OsTemplate> = HashMap::new();
    let mut other: HashMap<String, OsTemplate> = HashMap::new();

    for template in templates
        .into_iter()
        .filter(|template| allowed.contains(&template.id.as_str()))
    {
        let bucket = if template.os.to_lowercase().contains("windows") {
            &mut windows
        } else {
            &mut other
        };
        match bucket.get(&template.os) {
            Some(existing) if existing.dt_created >= template.dt_created => {}
            _ => {
                bucket.insert(template.os.clone(), template);
            }
        }
    }

    (collect_bucket(windows), collect_bucket(other))
}

fn collect_bucket(bucket: HashMap<String, OsTemplate>) -> Vec<OperatingSystem> {
    let mut templates: Vec<OsTemplate> = bucket.into_values().collect();
    templates.sort_by(|a, b| a.os.to_lowercase().cmp(&b.os.to_lowercase()));
    templates
        .into_iter()
        .map(|template| OperatingSystem {
            id: template.id,
            label: template.os,
        })
        .collect()
}

/// Joins the private configuration graph with storage rates and the OS
/// template buckets into the normalized catalog. Pure function of its
/// inputs; the fetches happen in the caller.
fn build_configurations(
    data: OperatingSystemsData,
    allowed_machines: &[&str],
    storage_rates: &[StorageCost],
    windows: &[OperatingSystem],
    other: &[OperatingSystem],
) -> Vec<Configuration> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut configurations: Vec<Configuration> = Vec::new();

    for os in data.data.operating_systems.nodes {
        for vm_type in os
            .vm_types
            .nodes
            .into_iter()
            .filter(|vm_type| allowed_machines.contains(&vm_type.gpu.as_str()))
        {
            let Some(hourly) = vm_type
                .default_usage_rates
                .nodes
                .iter()
                .find(|rate| rate.description.ends_with(" hourly"))
                .map(|rate| rate.rate)
            else {
                continue;
            };

            let mut regions: Vec<ConfigurationRegion> = vm_type
                .region_availability
                .nodes
                .iter()
                .filter(|node| node.is_available)
                .map(|node| ConfigurationRegion {
                    id: node.region_name.clone(),
                    description: node.region_name.clone(),
                    country: String::new(),
                })
                .collect();
            regions.sort_by(|a, b| a.description.to_lowercase().cmp(&b.description.to_lowercase()));
            // Exclude machines not available in any region
            if regions.is_empty() {
                continue;
            }

            // "GRID" machines only work with Windows templates
            let os_options = if vm_type.gpu.to_lowercase().contains("grid") {
                windows.to_vec()
            } else {
                other.to_vec()
            };

            // Deduplicate machine types
            if !seen.insert(vm_type.label.clone()) {
                continue;
            }

            configurations.push(Configuration {
                id: vm_type.label.clone(),
                price: ConfigurationPrice {
                    hourly,
                    monthly: None,
                },
                specs: MachineSpecifications {
                    cores: vm_type.cpus,
                    // gpu ram
                    ram: gpu_memory_gb(&vm_type.gpu)
                        .map(|per_gpu| vm_type.gpu_count * per_gpu)
                        .unwrap_or(-1),
                    storage_cost: storage_rates.to_vec(),
                },
                gpu: GpuSpecifications {
                    model: vm_type.gpu,
                    count: vm_type.gpu_count,
                },
                os: os_options,
                regions,
            });
        }
    }

    // Sort alphabetically by GPU
    configurations.sort_by(|a, b| a.gpu.model.to_lowercase().cmp(&b.gpu.model.to_lowercase()));
    configurations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MemoryCredentialStore;
    use chrono::NaiveDateTime;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(
        store: Arc<MemoryCredentialStore>,
        public: &MockServer,
        private: &MockServer,
    ) -> PaperspaceProvider {
        PaperspaceProvider::new(
            "test-key".to_string(),
            Some("admin@ritual.com".to_string()),
            Some("hunter2".to_string()),
            store,
        )
        .with_endpoints(public.uri(), private.uri())
    }

    fn template(id: &str, os: &str, created: &str) -> OsTemplate {
        OsTemplate {
            id: id.to_string(),
            os: os.to_string(),
            dt_created: NaiveDateTime::parse_from_str(created, "%Y-%m-%d %H:%M:%S")
                .unwrap()
                .and_utc(),
        }
    }

    #[test]
    fn gpu_count_parses_machine_type_suffix() {
        assert_eq!(number_of_gpus("A100x4"), 4);
        assert_eq!(number_of_gpus("A100"), 1);
        assert_eq!(number_of_gpus("A100x"), 1);
        assert_eq!(number_of_gpus("P4000x2"), 2);
    }

    #[test]
    fn templates_split_dedup_and_sort() {
        let templates = vec![
            template("t1", "Windows 10", "2021-01-01 00:00:00"),
            template("t2", "Windows 10", "2022-06-01 00:00:00"),
            template("t3", "Ubuntu 20.04", "2021-03-01 00:00:00"),
            template("t4", "CentOS 7", "2020-01-01 00:00:00"),
            template("t5", "Ubuntu 20.04", "2020-12-01 00:00:00"),
            // Not allow-listed, must vanish
            template("t6", "Debian 11", "2023-01-01 00:00:00"),
        ];
        let allowed = ["t1", "t2", "t3", "t4", "t5"];
        let (windows, other) = transform_templates(templates, &allowed);

        assert_eq!(windows.len(), 1);
        // Latest Windows 10 template wins
        assert_eq!(windows[0].id, "t2");
        assert_eq!(windows[0].label, "Windows 10");

        assert_eq!(other.len(), 2);
        assert_eq!(other[0].label, "CentOS 7");
        assert_eq!(other[1].label, "Ubuntu 20.04");
        assert_eq!(other[1].id, "t3");
    }

    fn os_graph(nodes: serde_json::Value) -> OperatingSystemsData {
        serde_json::from_value(json!({
            "data": { "operatingSystems": { "nodes": nodes } }
        }))
        .unwrap()
    }

    fn vm_type(label: &str, gpu: &str, regions: serde_json::Value) -> serde_json::Value {
        json!({
            "label": label,
            "cpus": 8,
            "gpu": gpu,
            "gpuCount": 2,
            "defaultUsageRates": { "nodes": [
                { "description": format!("{label} monthly"), "rate": 500.0 },
                { "description": format!("{label} hourly"), "rate": 2.3 },
            ]},
            "regionAvailability": { "nodes": regions },
        })
    }

    #[test]
    fn configuration_join_filters_sorts_and_dedups() {
        let regions = json!([
            { "regionName": "West Coast (CA1)", "isAvailable": true },
            { "regionName": "East Coast (NY2)", "isAvailable": true },
            { "regionName": "Europe (AMS1)", "isAvailable": false },
        ]);
        let data = os_graph(json!([
            { "vmTypes": { "nodes": [
                vm_type("RTX5000", "Quadro RTX5000", regions.clone()),
                // Unlisted GPU model, dropped
                vm_type("P5000", "Quadro P5000", regions.clone()),
                // No hourly rate entry, dropped
                {
                    "label": "A4000",
                    "cpus": 8,
                    "gpu": "Ampere A4000",
                    "gpuCount": 1,
                    "defaultUsageRates": { "nodes": [
                        { "description": "A4000 monthly", "rate": 400.0 },
                    ]},
                    "regionAvailability": { "nodes": regions.clone() },
                },
                // No available region, dropped
                vm_type("A100-unavailable", "Ampere A100", json!([
                    { "regionName": "Europe (AMS1)", "isAvailable": false },
                ])),
                vm_type("A100x2", "Ampere A100", regions.clone()),
            ]}},
            // Duplicate label from a second OS node, first-seen wins
            { "vmTypes": { "nodes": [ vm_type("A100x2", "Ampere A100", regions) ] } },
        ]));

        let storage_rates = vec![StorageCost {
            size: "50".to_string(),
            monthly: 5.0,
        }];
        let other = vec![OperatingSystem {
            id: "twnlo3zj".to_string(),
            label: "Ubuntu 20.04".to_string(),
        }];

        let configurations =
            build_configurations(data, ALLOWED_MACHINES, &storage_rates, &[], &other);

        assert_eq!(configurations.len(), 2);
        // Sorted by GPU model, case-insensitively
        assert_eq!(configurations[0].gpu.model, "Ampere A100");
        assert_eq!(configurations[0].id, "A100x2");
        assert_eq!(configurations[1].gpu.model, "Quadro RTX5000");

        let a100 = &configurations[0];
        assert_eq!(a100.price.hourly, 2.3);
        // 2 GPUs x 40GB
        assert_eq!(a100.specs.ram, 80);
        assert_eq!(a100.specs.storage_cost, storage_rates);
        assert_eq!(a100.os, other);
        // Unavailable region filtered, remainder sorted by description
        assert_eq!(
            a100.regions.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(),
            ["East Coast (NY2)", "West Coast (CA1)"]
        );
        assert!(configurations.iter().all(|c| !c.regions.is_empty()));
    }

    #[test]
    fn configuration_sort_is_stable_for_equal_gpu_models() {
        let regions = json!([{ "regionName": "East Coast (NY2)", "isAvailable": true }]);
        let data = os_graph(json!([
            { "vmTypes": { "nodes": [
                vm_type("A100-large", "Ampere A100", regions.clone()),
                vm_type("A100-small", "Ampere A100", regions),
            ]}},
        ]));
        let configurations = build_configurations(data, ALLOWED_MACHINES, &[], &[], &[]);
        // Same GPU model: first-seen order survives the final sort
        assert_eq!(
            configurations.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(),
            ["A100-large", "A100-small"]
        );
    }

    #[test]
    fn configuration_join_assigns_windows_bucket_to_grid_machines() {
        let regions = json!([{ "regionName": "East Coast (NY2)", "isAvailable": true }]);
        let data = os_graph(json!([
            { "vmTypes": { "nodes": [ vm_type("GRID+", "GRID P4000", regions) ] } }
        ]));
        let windows = vec![OperatingSystem {
            id: "tw10".to_string(),
            label: "Windows 10".to_string(),
        }];
        let configurations =
            build_configurations(data, &["GRID P4000"], &[], &windows, &[]);
        assert_eq!(configurations.len(), 1);
        assert_eq!(configurations[0].os, windows);
        // Unknown GPU model has no known memory
        assert_eq!(configurations[0].specs.ram, -1);
    }

    #[tokio::test]
    async fn is_auth_false_when_public_probe_unauthorized() {
        let public = MockServer::start().await;
        let private = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/machines/getMachines"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&public)
            .await;

        let store = Arc::new(MemoryCredentialStore::new());
        assert!(!provider(store, &public, &private).is_auth().await);
        // Short-circuit: the private surface is never probed
        assert!(private.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn is_auth_true_when_both_surfaces_accept() {
        let public = MockServer::start().await;
        let private = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/machines/getMachines"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&public)
            .await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": {} })))
            .mount(&private)
            .await;

        let store = Arc::new(MemoryCredentialStore::new());
        assert!(provider(store, &public, &private).is_auth().await);
    }

    #[tokio::test]
    async fn is_auth_true_when_public_probe_unreachable() {
        let private = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": {} })))
            .mount(&private)
            .await;

        let store = Arc::new(MemoryCredentialStore::new());
        let provider = PaperspaceProvider::new(
            "test-key".to_string(),
            None,
            None,
            store,
        )
        // Nothing listens here; the probe sees a transport error
        .with_endpoints("http://127.0.0.1:9".to_string(), private.uri());
        assert!(provider.is_auth().await);
    }

    #[tokio::test]
    async fn stale_session_refreshes_and_persists_credentials() {
        let public = MockServer::start().await;
        let private = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(body_partial_json(json!({ "operationName": "PendingTeamMemberships" })))
            .respond_with(ResponseTemplate::new(401))
            .mount(&private)
            .await;
        Mock::given(method("POST"))
            .and(path("/users/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "tok123",
                "user": {
                    "userTeam": [ { "id": 1, "isUserTeam": true } ],
                    "teamMemberships": [ { "teamId": 1 }, { "teamId": 7 } ],
                },
            })))
            .mount(&public)
            .await;
        Mock::given(method("GET"))
            .and(path("/teams/7/showTeam"))
            .and(query_param("access_token", "tok123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "namespace": "nsx" })))
            .mount(&public)
            .await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(body_partial_json(json!({ "operationName": "StorageRates" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "storageRates": { "nodes": [
                    { "size": 50, "rate": 5.0, "templateRate": 1.0, "snapshotRate": 0.4 },
                    { "size": 100, "rate": 9.0, "templateRate": 1.0, "snapshotRate": 0.4 },
                ]}},
            })))
            .mount(&private)
            .await;

        let store = Arc::new(MemoryCredentialStore::new());
        let rates = provider(store.clone(), &public, &private)
            .get_storage_rates()
            .await
            .unwrap();

        assert_eq!(rates.len(), 2);
        assert_eq!(rates[0].size, "50");
        assert_eq!(rates[0].monthly, 5.0);

        // The refreshed session was written back
        let stored = store
            .find_credentials(ProviderType::Paperspace)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.auth_token.as_deref(), Some("tok123"));
        assert_eq!(stored.namespace.as_deref(), Some("nsx"));
        assert_eq!(stored.key, "test-key");
    }

    #[tokio::test]
    async fn sole_team_membership_wins_namespace_derivation() {
        let public = MockServer::start().await;
        let private = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/graphql"))
            .and(body_partial_json(json!({ "operationName": "PendingTeamMemberships" })))
            .respond_with(ResponseTemplate::new(400))
            .mount(&private)
            .await;
        Mock::given(method("POST"))
            .and(path("/users/login"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "tok9",
                "user": {
                    "userTeam": [ { "id": 3, "isUserTeam": true } ],
                    "teamMemberships": [ { "teamId": 3 } ],
                },
            })))
            .mount(&public)
            .await;
        Mock::given(method("GET"))
            .and(path("/teams/3/showTeam"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "namespace": "personal" })))
            .mount(&public)
            .await;

        let store = Arc::new(MemoryCredentialStore::new());
        let provider = provider(store.clone(), &public, &private);
        assert!(provider.ensure_private_auth().await.is_some());

        let stored = store
            .find_credentials(ProviderType::Paperspace)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.namespace.as_deref(), Some("personal"));
    }

    #[tokio::test]
    async fn configurations_fail_with_authentication_error_when_login_rejected() {
        let public = MockServer::start().await;
        let private = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&private)
            .await;
        Mock::given(method("POST"))
            .and(path("/users/login"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&public)
            .await;

        let store = Arc::new(MemoryCredentialStore::new());
        let err = provider(store, &public, &private)
            .get_configurations()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
    }

    #[tokio::test]
    async fn get_server_merges_pricing_from_internal_lookup() {
        let public = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/machines/getMachinePublic"))
            .and(query_param("machineId", "ps1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "ps1",
                "publicIpAddress": "203.0.113.7",
                "os": "Ubuntu 20.04",
                "state": "ready",
                "cpus": 8,
                "gpu": "Ampere A100",
                "machineType": "A100x2",
            })))
            .mount(&public)
            .await;
        Mock::given(method("GET"))
            .and(path("/machines/getMachines"))
            .and(query_param("machineId", "ps1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "id": "ps1",
                "state": "ready",
                "cpus": 8,
                "gpu": "Ampere A100",
                "machineType": "A100x2",
                "internalId": 4242,
            }])))
            .mount(&public)
            .await;
        Mock::given(method("GET"))
            .and(path("/machines/getMachine"))
            .and(query_param("machineId", "4242"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "usageRate": { "rateHourly": "3.09", "rateMonthly": "930.25" },
                "storageRate": { "rate": "7.25" },
            })))
            .mount(&public)
            .await;

        let private = MockServer::start().await;
        let store = Arc::new(MemoryCredentialStore::new());
        let server = provider(store, &public, &private)
            .get_server("ps1")
            .await
            .unwrap();

        assert_eq!(server.id, "ps1");
        assert_eq!(server.ip, "203.0.113.7");
        assert_eq!(server.status, ritual_common::ServerStatus::Ready);
        assert_eq!(server.specs.gpu.count, 2);
        assert_eq!(server.specs.ram, 80);
        assert_eq!(server.price.hourly, 3.09);
        assert_eq!(server.price.monthly, Some(937.5));
    }

    #[tokio::test]
    async fn get_server_rejects_empty_id() {
        let public = MockServer::start().await;
        let private = MockServer::start().await;
        let store = Arc::new(MemoryCredentialStore::new());
        let err = provider(store, &public, &private)
            .get_server("")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(public.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_server_missing_from_listing_is_a_fetch_error() {
        let public = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/machines/getMachinePublic"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "ps1",
                "state": "off",
                "cpus": 8,
                "gpu": "Ampere A100",
                "machineType": "A100",
            })))
            .mount(&public)
            .await;
        Mock::given(method("GET"))
            .and(path("/machines/getMachines"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&public)
            .await;

        let private = MockServer::start().await;
        let store = Arc::new(MemoryCredentialStore::new());
        let err = provider(store, &public, &private)
            .get_server("ps1")
            .await
            .unwrap_err();
        match err {
            Error::Upstream(message) => assert_eq!(message, "Error collecting server: ps1"),
            other => panic!("expected upstream error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn get_all_servers_transforms_every_machine() {
        let public = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/machines/getMachines"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "id": "ps1",
                    "publicIpAddress": "203.0.113.7",
                    "os": "Ubuntu 20.04",
                    "state": "ready",
                    "cpus": 8,
                    "gpu": "Ampere A100",
                    "machineType": "A100x2",
                },
                {
                    // No address assigned yet, unknown GPU model
                    "id": "ps2",
                    "os": "Ubuntu 20.04",
                    "state": "provisioning",
                    "cpus": 4,
                    "gpu": "Quadro P5000",
                    "machineType": "P5000",
                },
            ])))
            .mount(&public)
            .await;

        let private = MockServer::start().await;
        let store = Arc::new(MemoryCredentialStore::new());
        let servers = provider(store, &public, &private)
            .get_all_servers()
            .await
            .unwrap();

        assert_eq!(servers.len(), 2);
        assert_eq!(servers[0].specs.ram, 80);
        assert_eq!(servers[1].ip, "");
        assert_eq!(servers[1].specs.ram, -1);
        assert_eq!(servers[1].specs.gpu.count, 1);
    }

    #[tokio::test]
    async fn server_actions_pass_provider_messages_through() {
        let public = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/machines/ps1/start"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "message": "Machine is already running",
            })))
            .mount(&public)
            .await;
        Mock::given(method("POST"))
            .and(path("/machines/ps1/stop"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&public)
            .await;

        let private = MockServer::start().await;
        let store = Arc::new(MemoryCredentialStore::new());
        let provider = provider(store, &public, &private);

        match provider.start_server("ps1").await.unwrap_err() {
            Error::Upstream(message) => assert_eq!(message, "Machine is already running"),
            other => panic!("expected upstream error, got {other:?}"),
        }
        match provider.stop_server("ps1").await.unwrap_err() {
            Error::Upstream(message) => assert_eq!(message, "Error stopping server ps1"),
            other => panic!("expected upstream error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_server_fails_before_any_remote_call_without_env_secrets() {
        let _guard = crate::env_guard();
        for name in [
            "DB_HOST",
            "DB_PORT",
            "DB_USER",
            "DB_PASS",
            "DB_NAME",
            "DOCKERHUB_USER",
            "DOCKERHUB_TGI_IMAGE_TAG",
        ] {
            std::env::remove_var(name);
        }

        let public = MockServer::start().await;
        let private = MockServer::start().await;
        let store = Arc::new(MemoryCredentialStore::new());
        let server_config = ServerConfig {
            instance: "A100x2".to_string(),
            name: "staging".to_string(),
            description: None,
            provider: ProviderType::Paperspace,
            region: "East Coast (NY2)".to_string(),
            os: "twnlo3zj".to_string(),
            size: "50".to_string(),
        };
        let run_config: RunConfig =
            serde_json::from_value(json!({ "model_id": "huggyllama/llama-65b" })).unwrap();

        let err = provider(store, &public, &private)
            .create_server(&server_config, &run_config)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(public.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_server_registers_script_then_machine() {
        let _guard = crate::env_guard();
        for (name, value) in [
            ("DB_HOST", "db.ritual.internal"),
            ("DB_PORT", "5432"),
            ("DB_USER", "ritual"),
            ("DB_PASS", "sekrit"),
            ("DB_NAME", "ritual"),
            ("DOCKERHUB_USER", "ritualml"),
            ("DOCKERHUB_TGI_IMAGE_TAG", "tgi:latest"),
        ] {
            std::env::set_var(name, value);
        }

        let public = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/scripts/createScript"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "script-1" })))
            .mount(&public)
            .await;
        Mock::given(method("POST"))
            .and(path("/machines/createSingleMachinePublic"))
            .and(body_partial_json(json!({
                "machineType": "A100x2",
                "scriptId": "script-1",
                "billingType": "hourly",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "ps-new" })))
            .mount(&public)
            .await;

        let private = MockServer::start().await;
        let store = Arc::new(MemoryCredentialStore::new());
        let server_config = ServerConfig {
            instance: "A100x2".to_string(),
            name: "staging".to_string(),
            description: None,
            provider: ProviderType::Paperspace,
            region: "East Coast (NY2)".to_string(),
            os: "twnlo3zj".to_string(),
            size: "50".to_string(),
        };
        let run_config: RunConfig =
            serde_json::from_value(json!({ "model_id": "huggyllama/llama-65b" })).unwrap();

        let id = provider(store, &public, &private)
            .create_server(&server_config, &run_config)
            .await
            .unwrap();
        assert_eq!(id, "ps-new");
    }
}
