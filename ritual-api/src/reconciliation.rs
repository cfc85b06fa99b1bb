//! Aligns local server records with the providers' live fleets. The
//! providers are the source of truth for existence: records without a
//! remote counterpart are deleted, remote machines nobody registered are
//! ignored, and only servers present on both sides reach the dashboard.

use crate::store::ServerStore;
use ritual_common::{ProviderServer, ProviderType, Result, Server};
use ritual_providers::BaseProvider;
use std::collections::HashMap;
use std::sync::Arc;

/// 1. Collects all remote servers
/// 2. Collects all local servers
/// 3. Filters out remote servers that don't exist locally
/// 4. Deletes local servers that don't exist remotely
/// 5. Returns servers with merged remote and local info
///
/// Any provider listing failure aborts the whole routine; the local delete
/// in step 4 is not rolled back if a later step fails.
pub async fn get_all_servers(
    store: &dyn ServerStore,
    providers: &[Arc<dyn BaseProvider>],
) -> Result<Vec<Server>> {
    // Collect all remote servers (id => server). Ids are provider-scoped,
    // so a collision is not expected; if one happens the provider processed
    // last wins.
    let mut remote: HashMap<String, (ProviderServer, ProviderType)> = HashMap::new();
    for provider in providers {
        let kind = provider.kind();
        for server in provider.get_all_servers().await? {
            remote.insert(server.id.clone(), (server, kind));
        }
    }

    // Collect all local servers, ordered by name
    let local = store.find_all_servers().await?;

    // Delete local servers that don't exist remotely
    let delete_ids: Vec<String> = local
        .iter()
        .filter(|record| !remote.contains_key(&record.id))
        .map(|record| record.id.clone())
        .collect();
    if !delete_ids.is_empty() {
        store.delete_servers_by_ids(&delete_ids).await?;
    }

    // Merge; iterating the local records keeps name ordering, and remote
    // servers without a local record simply never come up.
    let mut servers = Vec::new();
    for record in local {
        let Some((remote_server, provider)) = remote.remove(&record.id) else {
            continue;
        };
        servers.push(Server {
            name: record.name,
            description: record.description,
            provider,
            model: None,
            created_at: record.created_at,
            remote: remote_server,
        });
    }

    Ok(servers)
}
