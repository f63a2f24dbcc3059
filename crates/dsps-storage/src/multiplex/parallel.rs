use dsps_telemetry::{log_event, CATEGORY_STORAGE};
use dsps_types::{Storage, StorageError, StorageId};
use futures::future::{join_all, BoxFuture};
use std::collections::BTreeMap;

use super::StorageMultiplexer;

/// Call on one child; `None` skips a child lacking the capability.
pub(crate) type ChildCall<'a, T> = Option<BoxFuture<'a, Result<T, StorageError>>>;

impl StorageMultiplexer {
    /// Runs `f` on every child concurrently and waits for all of them.
    ///
    /// Succeeds with the results of the successful children when at least one
    /// succeeded (or every child was skipped). Otherwise returns the first error,
    /// preferring non-fatal (business) errors over backend failures.
    pub(crate) async fn parallel_at_least_one_success<'a, T, F>(
        &'a self,
        operation: &'static str,
        f: F,
    ) -> Result<BTreeMap<StorageId, T>, StorageError>
    where
        F: Fn(&'a StorageId, &'a dyn Storage) -> ChildCall<'a, T>,
    {
        let calls = self
            .children
            .iter()
            .filter_map(|(id, child)| f(id, child.as_ref()).map(|call| async move { (id, call.await) }));
        let outcomes = join_all(calls).await;

        let mut successes = BTreeMap::new();
        let mut first_error: Option<StorageError> = None;
        for (id, outcome) in outcomes {
            let err = match outcome {
                Ok(value) => {
                    successes.insert(id.clone(), value);
                    continue;
                }
                Err(source) => StorageError::Child {
                    operation,
                    storage_id: id.to_string(),
                    source: Box::new(source),
                },
            };
            if err.is_non_fatal() {
                log_event!(debug, CATEGORY_STORAGE, "Storage operation failed", storage = %id, error = %err);
            } else {
                log_event!(warn, CATEGORY_STORAGE, "Storage operation failed", storage = %id, error = %err);
            }
            let replace = match &first_error {
                None => true,
                Some(current) => err.is_non_fatal() && !current.is_non_fatal(),
            };
            if replace {
                first_error = Some(err);
            }
        }

        match first_error {
            Some(err) if successes.is_empty() => Err(err),
            _ => Ok(successes),
        }
    }
}
