use crate::configurations;
use crate::keys;
use crate::models_endpoint;
use crate::servers;
use ritual_common::{
    Configuration, ConfigurationPrice, ConfigurationRegion, GpuSpecifications,
    MachineSpecifications, OperatingSystem, ProviderServer, ProviderType, Server, ServerAction,
    ServerConfig, ServerMetadata, ServerSpecifications, ServerStatus, StatusKind, StorageCost,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        servers::list_servers,
        servers::list_server_names,
        servers::get_server,
        servers::create_server,
        servers::toggle_server,
        servers::delete_server,
        configurations::list_configurations,
        keys::update_keys,
        models_endpoint::list_models,
    ),
    components(
        schemas(
            Server,
            ProviderServer,
            ServerMetadata,
            ServerConfig,
            ServerStatus,
            StatusKind,
            ServerAction,
            ServerSpecifications,
            ProviderType,
            Configuration,
            ConfigurationPrice,
            ConfigurationRegion,
            GpuSpecifications,
            MachineSpecifications,
            OperatingSystem,
            StorageCost,
            servers::ServersResponse,
            servers::ServerResponse,
            servers::ServerNamesResponse,
            servers::CreatedResponse,
            servers::CreateServerRequest,
            servers::ToggleRequest,
            configurations::ConfigurationsResponse,
            keys::KeysUpdateRequest,
            keys::KeyUpdate,
        )
    ),
    tags(
        (name = "Servers", description = "Server lifecycle and reconciliation"),
        (name = "Configurations", description = "Provider machine catalogs"),
        (name = "Keys", description = "Provider credential management"),
        (name = "Models", description = "Deployable models"),
    )
)]
pub struct ApiDoc;
