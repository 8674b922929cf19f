//! Tolerance for analytics schema drift between deployments.
//!
//! Nodes that have not yet applied a migration reject queries naming new
//! columns. Those errors are recognized by message text and the query is
//! retried once with the legacy column set; fields that only exist in the new
//! schema come back empty.

use crate::error::{BillingError, Result};
use crate::metrics;
use std::fmt;
use std::future::Future;
use tracing::warn;

/// Error fragments (lowercase) ClickHouse emits for unknown or missing columns.
const COMPATIBILITY_PATTERNS: [&str; 4] = [
    "unknown expression identifier",
    "unknown identifier",
    "missing columns",
    "there is no column",
];

/// Column set a query is issued with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaShape {
    Current,
    Legacy,
}

pub fn is_schema_compatibility_error<E>(err: Option<&E>) -> bool
where
    E: fmt::Display + ?Sized,
{
    let Some(err) = err else {
        return false;
    };
    let msg = err.to_string().to_lowercase();
    COMPATIBILITY_PATTERNS.iter().any(|p| msg.contains(p))
}

/// Run `run(Current)`; on a schema-compatibility error retry once with `Legacy`.
///
/// Unrecognized errors propagate unchanged. A failing legacy retry becomes a
/// [`BillingError::Query`] for `query`.
pub async fn with_legacy_fallback<T, F, Fut>(query: &'static str, run: F) -> Result<T>
where
    F: Fn(SchemaShape) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match run(SchemaShape::Current).await {
        Ok(value) => Ok(value),
        Err(err) if is_schema_compatibility_error(Some(&err)) => {
            warn!(
                query = query,
                error = %err,
                "Analytics schema not yet upgraded on this node, retrying with legacy columns"
            );
            metrics::record_schema_fallback(query);
            run(SchemaShape::Legacy)
                .await
                .map_err(|legacy_err| BillingError::Query {
                    query,
                    message: format!("legacy fallback failed: {}", legacy_err),
                })
        }
        Err(err) => Err(err),
    }
}
