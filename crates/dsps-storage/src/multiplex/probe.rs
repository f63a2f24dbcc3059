use dsps_telemetry::{log_event, CATEGORY_STORAGE};
use dsps_types::{Context, StorageError};
use futures::future::join_all;
use serde_json::{json, Map, Value};

use super::StorageMultiplexer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Probe {
    /// Fails when any child fails.
    Liveness,
    /// Reports failing children inline.
    Readiness,
}

impl Probe {
    fn operation(self) -> &'static str {
        match self {
            Probe::Liveness => "Liveness",
            Probe::Readiness => "Readiness",
        }
    }
}

impl StorageMultiplexer {
    pub(crate) async fn probe(&self, ctx: &Context, probe: Probe) -> Result<Value, StorageError> {
        let results = join_all(self.children.iter().map(|(id, child)| async move {
            let result = match probe {
                Probe::Liveness => child.liveness(ctx).await,
                Probe::Readiness => child.readiness(ctx).await,
            };
            (id, result)
        }))
        .await;

        let mut children = Map::new();
        for (id, result) in results {
            match result {
                Ok(value) => {
                    children.insert(id.to_string(), value);
                }
                Err(source) if probe == Probe::Liveness => {
                    return Err(StorageError::Child {
                        operation: probe.operation(),
                        storage_id: id.to_string(),
                        source: Box::new(source),
                    });
                }
                Err(e) => {
                    log_event!(warn, CATEGORY_STORAGE, "Storage readiness check failed", storage = %id, error = %e);
                    children.insert(id.to_string(), json!({ "error": e.to_string() }));
                }
            }
        }
        Ok(json!({ "children": children }))
    }

    pub(crate) async fn collect_stat(&self, ctx: &Context) -> Result<Value, StorageError> {
        let results = join_all(
            self.children
                .iter()
                .map(|(id, child)| async move { (id, child.stat(ctx).await) }),
        )
        .await;

        let mut children = Map::new();
        for (id, result) in results {
            let value = result.unwrap_or_else(|e| {
                log_event!(warn, CATEGORY_STORAGE, "Storage stat resulted in error", storage = %id, error = %e);
                json!({ "error": e.to_string() })
            });
            children.insert(id.to_string(), value);
        }
        Ok(json!({
            "multiplex": self.multiplex_stat(),
            "children": children,
        }))
    }
}
