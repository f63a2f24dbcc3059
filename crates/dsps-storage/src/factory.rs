use dsps_telemetry::{log_event, CATEGORY_STORAGE};
use dsps_types::{Context, Storage, StorageError, StorageId};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{StorageConfig, StoragesConfig};
use crate::deps::StorageDeps;
use crate::multiplex::StorageMultiplexer;
use crate::onmemory::OnmemoryStorage;
use crate::redis::RedisStorage;
use crate::tracing_wrapper::TracingStorage;

/// Id of the tracing wrapper around the multiplexer.
pub const ROOT_STORAGE_ID: &str = "#root";

/// Build every configured storage behind one multiplexer.
///
/// Each child is wrapped in a [`TracingStorage`] named after its id, and the
/// multiplexer itself in one named [`ROOT_STORAGE_ID`]. When a child fails to
/// initialize, the children built so far are shut down.
pub async fn new_storage(
    ctx: &Context,
    config: &StoragesConfig,
    deps: &StorageDeps,
) -> Result<Arc<dyn Storage>, StorageError> {
    if config.is_empty() {
        return Err(StorageError::Configuration("Empty storage configuration given".into()));
    }

    let mut children: BTreeMap<StorageId, Arc<dyn Storage>> = BTreeMap::new();
    for (id, child_config) in config {
        match new_child(ctx, id, child_config, deps).await {
            Ok(child) => {
                children.insert(id.clone(), Arc::new(TracingStorage::new(child, id.clone(), deps)));
            }
            Err(e) => {
                shutdown_children(ctx, &children).await;
                return Err(StorageError::Child {
                    operation: "Initialize",
                    storage_id: id.to_string(),
                    source: Box::new(e),
                });
            }
        }
    }

    let multiplexer = StorageMultiplexer::new(children)?;
    Ok(Arc::new(TracingStorage::new(
        Arc::new(multiplexer),
        StorageId::new(ROOT_STORAGE_ID),
        deps,
    )))
}

async fn new_child(
    ctx: &Context,
    id: &StorageId,
    config: &StorageConfig,
    deps: &StorageDeps,
) -> Result<Arc<dyn Storage>, StorageError> {
    match (&config.onmemory, &config.redis) {
        (Some(onmemory), None) => {
            log_event!(warn, CATEGORY_STORAGE, "DO NOT USE onmemory storage on production environment", storage = %id);
            Ok(Arc::new(OnmemoryStorage::new(onmemory, deps)?))
        }
        (None, Some(redis)) => {
            log_event!(debug, CATEGORY_STORAGE, "Initializing Redis storage", storage = %id);
            Ok(Arc::new(RedisStorage::new(ctx, redis, deps).await?))
        }
        (None, None) => Err(StorageError::Configuration("no storage type under the item".into())),
        (Some(_), Some(_)) => Err(StorageError::Configuration(
            "found multiple storage type under single item".into(),
        )),
    }
}

async fn shutdown_children(ctx: &Context, children: &BTreeMap<StorageId, Arc<dyn Storage>>) {
    join_all(children.iter().map(|(id, child)| async move {
        if let Err(e) = child.shutdown(ctx).await {
            log_event!(warn, CATEGORY_STORAGE, "Failed to shutdown storage", storage = %id, error = %e);
        }
    }))
    .await;
}
