//! Structured logging helpers.
//!
//! Every DSPS log line carries a `category` field (`storage`, `outgoing-webhook`,
//! `daemon`) so that logs of one concern can be filtered in the aggregator.

/// Log with a category field.
///
/// ```rust,ignore
/// log_event!(warn, CATEGORY_STORAGE, "child storage failed", storage = %id, error = %e);
/// ```
#[macro_export]
macro_rules! log_event {
    (info, $category:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::info!(
            category = $category,
            $($($field)*,)?
            $msg
        )
    };

    (warn, $category:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::warn!(
            category = $category,
            $($($field)*,)?
            $msg
        )
    };

    (error, $category:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::error!(
            category = $category,
            $($($field)*,)?
            $msg
        )
    };

    (debug, $category:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::debug!(
            category = $category,
            $($($field)*,)?
            $msg
        )
    };
}
