use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod error;
pub mod model;

pub use error::{Error, Result};

// --- Enums ---

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type, utoipa::ToSchema)]
#[sqlx(type_name = "provider_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Paperspace,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Paperspace => "paperspace",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "paperspace" => Some(ProviderType::Paperspace),
            _ => None,
        }
    }
}

/// Raw machine states reported by the provider.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Off,
    Provisioning,
    Ready,
    Restarting,
    ServiceReady,
    Starting,
    Stopping,
    Upgrading,
}

/// Semantic buckets the raw states collapse into. Every status belongs to
/// exactly one bucket; anything neither running nor stopped is transitional
/// and conflicting actions must be refused while a server is in it.
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Running,
    Stopped,
    Transitional,
}

impl ServerStatus {
    pub const ALL: [ServerStatus; 8] = [
        ServerStatus::Off,
        ServerStatus::Provisioning,
        ServerStatus::Ready,
        ServerStatus::Restarting,
        ServerStatus::ServiceReady,
        ServerStatus::Starting,
        ServerStatus::Stopping,
        ServerStatus::Upgrading,
    ];

    pub fn kind(&self) -> StatusKind {
        match self {
            ServerStatus::Ready | ServerStatus::ServiceReady => StatusKind::Running,
            ServerStatus::Off | ServerStatus::Stopping => StatusKind::Stopped,
            ServerStatus::Provisioning
            | ServerStatus::Restarting
            | ServerStatus::Starting
            | ServerStatus::Upgrading => StatusKind::Transitional,
        }
    }

    pub fn is_running(&self) -> bool {
        self.kind() == StatusKind::Running
    }

    pub fn is_stopped(&self) -> bool {
        self.kind() == StatusKind::Stopped
    }
}

/// User-facing toggle actions on a server.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ServerAction {
    Start,
    Stop,
}

// --- Configurations ---

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, utoipa::ToSchema)]
pub struct ConfigurationPrice {
    pub hourly: f64,
    pub monthly: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, utoipa::ToSchema)]
pub struct ConfigurationRegion {
    pub id: String,
    pub country: String,
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, utoipa::ToSchema)]
pub struct GpuSpecifications {
    pub model: String,
    pub count: i32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, utoipa::ToSchema)]
pub struct StorageCost {
    /// Storage size in GB
    pub size: String,
    pub monthly: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, utoipa::ToSchema)]
pub struct MachineSpecifications {
    pub cores: i32,
    /// GPU RAM in GB; -1 when the model is unknown
    pub ram: i32,
    pub storage_cost: Vec<StorageCost>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, utoipa::ToSchema)]
pub struct OperatingSystem {
    pub id: String,
    pub label: String,
}

/// A purchasable machine template offered by a provider. Computed fresh on
/// every catalog fetch, never persisted.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, utoipa::ToSchema)]
pub struct Configuration {
    pub id: String,
    pub gpu: GpuSpecifications,
    pub price: ConfigurationPrice,
    pub specs: MachineSpecifications,
    pub os: Vec<OperatingSystem>,
    pub regions: Vec<ConfigurationRegion>,
}

// --- Servers ---

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, utoipa::ToSchema)]
pub struct ServerSpecifications {
    pub cores: i32,
    /// GPU RAM in GB; -1 when the model is unknown
    pub ram: i32,
    pub gpu: GpuSpecifications,
}

/// The provider's authoritative view of one machine.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, utoipa::ToSchema)]
pub struct ProviderServer {
    pub id: String,
    /// May be empty until the provider assigns an address
    pub ip: String,
    pub os: String,
    pub status: ServerStatus,
    pub price: ConfigurationPrice,
    pub specs: ServerSpecifications,
}

/// Local server record merged with the live provider view.
#[derive(Debug, Serialize, Clone, PartialEq, utoipa::ToSchema)]
pub struct Server {
    pub name: String,
    pub description: Option<String>,
    pub provider: ProviderType,
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub remote: ProviderServer,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow, utoipa::ToSchema)]
pub struct ServerMetadata {
    pub id: String,
    pub name: String,
}

/// Creation parameters supplied by the user.
#[derive(Debug, Serialize, Deserialize, Clone, utoipa::ToSchema)]
pub struct ServerConfig {
    /// Machine type (configuration id)
    pub instance: String,
    pub name: String,
    pub description: Option<String>,
    pub provider: ProviderType,
    /// Region id
    pub region: String,
    /// OS template id
    pub os: String,
    /// Storage size in GB
    pub size: String,
}

/// Runtime options forwarded to the deployed inference container.
pub type RunConfig = HashMap<String, serde_json::Value>;

// --- Entities (SQLx Mapped) ---

/// One row per provider kind: public API key plus the private-session
/// credentials and the last session token/namespace obtained with them.
#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow)]
pub struct ProviderCredentials {
    pub provider: ProviderType,
    pub key: String,
    #[serde(skip)] // Never serialize login credentials
    pub email: Option<String>,
    #[serde(skip)]
    pub password: Option<String>,
    #[serde(skip)]
    pub auth_token: Option<String>,
    pub namespace: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, sqlx::FromRow, utoipa::ToSchema)]
pub struct ServerRecord {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub provider: ProviderType,
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_buckets_are_disjoint_and_total() {
        let mut running = 0;
        let mut stopped = 0;
        let mut transitional = 0;
        for status in ServerStatus::ALL {
            match status.kind() {
                StatusKind::Running => running += 1,
                StatusKind::Stopped => stopped += 1,
                StatusKind::Transitional => transitional += 1,
            }
        }
        assert_eq!(running, 2);
        assert_eq!(stopped, 2);
        assert_eq!(transitional, 4);
    }

    #[test]
    fn status_serde_uses_provider_spelling() {
        for (status, s) in [
            (ServerStatus::Off, "\"off\""),
            (ServerStatus::ServiceReady, "\"serviceready\""),
            (ServerStatus::Provisioning, "\"provisioning\""),
        ] {
            assert_eq!(serde_json::to_string(&status).unwrap(), s);
            assert_eq!(serde_json::from_str::<ServerStatus>(s).unwrap(), status);
        }
        assert!(serde_json::from_str::<ServerStatus>("\"hibernating\"").is_err());
    }

    #[test]
    fn provider_type_parse_roundtrip() {
        assert_eq!(ProviderType::parse("paperspace"), Some(ProviderType::Paperspace));
        assert_eq!(ProviderType::parse("PAPERSPACE"), Some(ProviderType::Paperspace));
        assert_eq!(ProviderType::parse("aws"), None);
        assert_eq!(ProviderType::Paperspace.as_str(), "paperspace");
    }

    #[test]
    fn merged_server_flattens_remote_fields() {
        let server = Server {
            name: "staging".to_string(),
            description: None,
            provider: ProviderType::Paperspace,
            model: Some("huggyllama/llama-65b".to_string()),
            created_at: DateTime::parse_from_rfc3339("2023-07-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
            remote: ProviderServer {
                id: "psx1".to_string(),
                ip: "203.0.113.7".to_string(),
                os: "Ubuntu 20.04".to_string(),
                status: ServerStatus::Ready,
                price: ConfigurationPrice { hourly: 3.09, monthly: None },
                specs: ServerSpecifications {
                    cores: 12,
                    ram: 80,
                    gpu: GpuSpecifications { model: "Ampere A100".to_string(), count: 2 },
                },
            },
        };
        let json = serde_json::to_value(&server).unwrap();
        assert_eq!(json["id"], "psx1");
        assert_eq!(json["name"], "staging");
        assert_eq!(json["status"], "ready");
    }
}
