//! Cluster attribution for usage rows.
//!
//! Every summary is billed to exactly one cluster. Rows carry the serving and
//! origin clusters when the analytics schema records them; otherwise the
//! tenant's primary cluster from the directory is used.

/// Cluster billed when neither the usage row nor the tenant directory names one.
pub const FALLBACK_CLUSTER_ID: &str = "global-primary";

/// Pick the billing cluster for a usage row.
///
/// First non-blank of: serving cluster, origin cluster, the tenant's primary
/// cluster, then [`FALLBACK_CLUSTER_ID`].
pub fn attribute_cluster<'a>(
    serving_cluster_id: &'a str,
    origin_cluster_id: &'a str,
    tenant_primary_cluster_id: Option<&'a str>,
) -> &'a str {
    [
        Some(serving_cluster_id),
        Some(origin_cluster_id),
        tenant_primary_cluster_id,
    ]
    .into_iter()
    .flatten()
    .find(|id| !id.trim().is_empty())
    .unwrap_or(FALLBACK_CLUSTER_ID)
}
