//! Raw payload shapes and constants for the two PaperSpace API surfaces.
//! Defaulting of absent fields happens here, at the serde boundary; the
//! transformers in `paperspace` only ever see typed data.

use chrono::{DateTime, Utc};
use ritual_common::ServerStatus;
use serde::Deserialize;

pub const PAPERSPACE_API_BASE_URL: &str = "https://api.paperspace.io";
pub const PAPERSPACE_PRIVATE_API_BASE_URL: &str = "https://api.paperspace.com";

// The console web client sends these with every login; the API rejects
// logins without them.
pub const CLIENT_FINGERPRINT: &str = "893bbf8dd5fd92f760c8590f202e56c7";
pub const REQUEST_VALIDATION_KEY: &str = "Nu/CfHRkn2A1YqTQHNfzrWgIJF+iV/0B+QfTXDcya2g=";

/// Machine types the dashboard offers. Everything else the provider returns
/// is filtered out of the catalog.
pub const ALLOWED_MACHINES: &[&str] = &[
    "Ampere A100",
    "Ampere A100 80G",
    "Ampere A4000",
    "Quadro RTX5000",
];

/// GPU RAM per model in GB. Hardcoded since the API does not return it.
pub fn gpu_memory_gb(model: &str) -> Option<i32> {
    match model {
        "Ampere A100" => Some(40),
        "Ampere A100 80G" => Some(80),
        "Ampere A4000" => Some(45),
        "Quadro RTX5000" => Some(16),
        _ => None,
    }
}

/// OS template ids the dashboard offers.
pub const ALLOWED_OPERATING_SYSTEMS: &[&str] = &[
    // Ubuntu 20.04 MLiaB
    "twnlo3zj",
];

pub const PENDING_TEAM_MEMBERSHIPS_QUERY: &str = "query PendingTeamMemberships($first: Int) {\n  pendingTeamMemberships(first: $first) {\n    nodes {\n      userId\n      teamId\n      __typename\n    }\n    __typename\n  }\n}\n";

pub const STORAGE_RATES_QUERY: &str = "query StorageRates($first: Int) {\n  storageRates(first: $first) {\n    nodes {\n      size\n      rate\n      templateRate\n      snapshotRate\n      __typename\n    }\n    __typename\n  }\n}\n";

pub const OPERATING_SYSTEMS_QUERY: &str = "query OperatingSystems($osFirst: Int, $vmTypeFirst: Int) {\n  operatingSystems(first: $osFirst) {\n    nodes {\n      name\n      label\n      description\n      note\n      isAvailable\n      isLicensed\n      isRecommended\n      isBase\n      operatingSystemGroup\n      vmTypes(first: $vmTypeFirst) {\n        nodes {\n          label\n          cpus\n          ram\n          gpu\n          gpuCount\n          supportsNvlink\n          nvlinkGpu\n          nvlinkGpuCount\n          defaultUsageRates(first: 5) {\n            nodes {\n              description\n              rate\n              type\n              __typename\n            }\n            __typename\n          }\n          templates(first: 100) {\n            nodes {\n              id\n              agentType\n              defaultSizeGb\n              ... on PublicTemplate {\n                operatingSystem {\n                  label\n                  __typename\n                }\n                __typename\n              }\n              ... on CustomTemplate {\n                operatingSystem {\n                  label\n                  __typename\n                }\n                __typename\n              }\n              __typename\n            }\n            __typename\n          }\n          osPermissions(first: 100) {\n            nodes {\n              flag\n              operatingSystemLabel\n              __typename\n            }\n            __typename\n          }\n          regionAvailability(first: 10) {\n            nodes {\n              regionName\n              isAvailable\n              __typename\n            }\n            __typename\n          }\n          __typename\n        }\n        __typename\n      }\n      __typename\n    }\n    __typename\n  }\n}\n";

/// Generic GraphQL connection wrapper.
#[derive(Debug, Deserialize)]
pub struct Nodes<T> {
    #[serde(default = "Vec::new")]
    pub nodes: Vec<T>,
}

impl<T> Default for Nodes<T> {
    fn default() -> Self {
        Self { nodes: Vec::new() }
    }
}

// --- Public REST API ---

/// One machine as returned by `getMachines` / `getMachinePublic`.
/// `internal_id` is only present on the authenticated list endpoint.
#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    pub id: String,
    #[serde(default)]
    pub public_ip_address: Option<String>,
    #[serde(default)]
    pub os: Option<String>,
    pub state: ServerStatus,
    pub cpus: i32,
    pub gpu: String,
    pub machine_type: String,
    #[serde(default)]
    pub internal_id: Option<i64>,
}

/// Pricing detail from the internal `getMachine` lookup. Rates come back as
/// decimal strings.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineDetail {
    pub usage_rate: UsageRateDetail,
    pub storage_rate: StorageRateDetail,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRateDetail {
    pub rate_hourly: String,
    pub rate_monthly: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageRateDetail {
    pub rate: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OsTemplate {
    pub id: String,
    pub os: String,
    pub dt_created: DateTime<Utc>,
}

/// `createScript` / `createSingleMachinePublic` both answer with an id.
#[derive(Debug, Deserialize)]
pub struct Created {
    pub id: String,
}

// --- Private GraphQL API ---

#[derive(Debug, Deserialize)]
pub struct StorageRatesData {
    pub data: StorageRatesRoot,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageRatesRoot {
    pub storage_rates: Nodes<StorageRate>,
}

#[derive(Debug, Deserialize)]
pub struct StorageRate {
    pub size: f64,
    pub rate: f64,
}

#[derive(Debug, Deserialize)]
pub struct OperatingSystemsData {
    pub data: OperatingSystemsRoot,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatingSystemsRoot {
    pub operating_systems: Nodes<OperatingSystemNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatingSystemNode {
    #[serde(default)]
    pub vm_types: Nodes<VmType>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmType {
    pub label: String,
    pub cpus: i32,
    pub gpu: String,
    pub gpu_count: i32,
    #[serde(default)]
    pub default_usage_rates: Nodes<VmUsageRate>,
    #[serde(default)]
    pub region_availability: Nodes<RegionAvailability>,
}

#[derive(Debug, Deserialize)]
pub struct VmUsageRate {
    pub description: String,
    pub rate: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionAvailability {
    pub region_name: String,
    pub is_available: bool,
}

// --- Login flow ---

/// Response of the `users/login` call: a fresh session token plus the user
/// graph the namespace is derived from.
#[derive(Debug, Deserialize)]
pub struct LoginData {
    pub id: String,
    pub user: LoginUser,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginUser {
    #[serde(default)]
    pub user_team: Vec<UserTeam>,
    #[serde(default)]
    pub team_memberships: Vec<TeamMembership>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTeam {
    pub id: i64,
    pub is_user_team: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMembership {
    pub team_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct ShowTeam {
    pub namespace: String,
}
