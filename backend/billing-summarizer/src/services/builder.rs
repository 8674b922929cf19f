//! Per-tenant usage summary construction.
//!
//! Runs every metric query for one tenant window, degrades non-foundational
//! failures to zero, sanitizes every float, attributes egress to billing
//! clusters and decides whether the window is billable at all.

use crate::error::{BillingError, Result};
use crate::metrics;
use crate::models::{sanitize, ApiUsageBreakdown, CountryMetrics, UsageSummary, Window};
use crate::services::attribution::attribute_cluster;
use crate::services::directory::TenantDirectory;
use crate::services::query_source::{ApiUsageRow, EgressRow, GeoRow, MetricQuerySource};
use crate::services::schema_guard::with_legacy_fallback;
use crate::utils::Clock;
use chrono::{Datelike, TimeZone, Utc};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// One metric query and how its failure is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricQuerySpec {
    pub name: &'static str,
    /// A failing foundational query aborts the tenant's summary for the window.
    pub foundational: bool,
}

pub const VIEWER_SESSIONS: MetricQuerySpec = MetricQuerySpec {
    name: "viewer_sessions",
    foundational: true,
};
pub const EGRESS: MetricQuerySpec = MetricQuerySpec {
    name: "egress",
    foundational: true,
};
pub const PEAK_BANDWIDTH: MetricQuerySpec = MetricQuerySpec {
    name: "peak_bandwidth",
    foundational: false,
};
pub const UNIQUE_USERS: MetricQuerySpec = MetricQuerySpec {
    name: "unique_users_mtd",
    foundational: false,
};
pub const AVERAGE_STORAGE: MetricQuerySpec = MetricQuerySpec {
    name: "average_storage",
    foundational: false,
};
pub const PROCESSING: MetricQuerySpec = MetricQuerySpec {
    name: "processing_seconds",
    foundational: false,
};
pub const API_USAGE: MetricQuerySpec = MetricQuerySpec {
    name: "api_usage",
    foundational: false,
};
pub const GEO_BREAKDOWN: MetricQuerySpec = MetricQuerySpec {
    name: "geo_breakdown",
    foundational: false,
};

pub const METRIC_QUERIES: [MetricQuerySpec; 8] = [
    VIEWER_SESSIONS,
    EGRESS,
    PEAK_BANDWIDTH,
    UNIQUE_USERS,
    AVERAGE_STORAGE,
    PROCESSING,
    API_USAGE,
    GEO_BREAKDOWN,
];

/// Await one metric query, applying its failure policy.
///
/// Foundational failures surface as [`BillingError::Query`]; any other failure
/// is logged and replaced by `T::default()`, the zero value for that metric.
pub async fn run_metric<T, Fut>(spec: MetricQuerySpec, tenant_id: &str, query: Fut) -> Result<T>
where
    T: Default,
    Fut: Future<Output = Result<T>>,
{
    match query.await {
        Ok(value) => Ok(value),
        Err(err) if spec.foundational => Err(match err {
            BillingError::Query { .. } => err,
            other => BillingError::Query {
                query: spec.name,
                message: other.to_string(),
            },
        }),
        Err(err) => {
            warn!(
                tenant_id = %tenant_id,
                query = spec.name,
                error = %err,
                "Metric query failed, defaulting to zero"
            );
            metrics::record_query_degraded(spec.name);
            Ok(T::default())
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct ClusterTraffic {
    egress_gb: f64,
    viewer_hours: f64,
    unique_viewers: u64,
}

/// Builds [`UsageSummary`] values for one tenant window.
#[derive(Clone)]
pub struct UsageSummaryBuilder {
    source: Arc<dyn MetricQuerySource>,
    directory: Arc<dyn TenantDirectory>,
    clock: Arc<dyn Clock>,
    geo_top_n: u32,
}

impl UsageSummaryBuilder {
    pub fn new(
        source: Arc<dyn MetricQuerySource>,
        directory: Arc<dyn TenantDirectory>,
        clock: Arc<dyn Clock>,
        geo_top_n: u32,
    ) -> Self {
        Self {
            source,
            directory,
            clock,
            geo_top_n,
        }
    }

    /// Summaries for `tenant_id` over `window`, one per attributed cluster.
    ///
    /// Returns `Ok(None)` when nothing in the window is billable. Cluster-neutral
    /// metrics (streams, storage, processing, API, geo) land on the summary of
    /// the tenant's primary cluster, which is always first.
    pub async fn build(&self, tenant_id: &str, window: &Window) -> Result<Option<Vec<UsageSummary>>> {
        let primary = match self.directory.primary_cluster(tenant_id).await {
            Ok(primary) => primary,
            Err(err) => {
                warn!(
                    tenant_id = %tenant_id,
                    error = %err,
                    "Failed to resolve tenant primary cluster, using fallback attribution"
                );
                None
            }
        };
        let primary_cluster_id = attribute_cluster("", "", primary.as_deref()).to_string();

        let source = self.source.as_ref();

        let viewers = run_metric(
            VIEWER_SESSIONS,
            tenant_id,
            source.viewer_sessions(tenant_id, window),
        )
        .await?;

        let egress_rows: Vec<EgressRow> = run_metric(
            EGRESS,
            tenant_id,
            with_legacy_fallback(EGRESS.name, |shape| source.egress(tenant_id, window, shape)),
        )
        .await?;

        let peak_bandwidth = run_metric(
            PEAK_BANDWIDTH,
            tenant_id,
            source.peak_bandwidth_mbps(tenant_id, window),
        )
        .await?;

        let month_to_date = Window::new(month_start(window), window.end);
        let unique_users = run_metric(
            UNIQUE_USERS,
            tenant_id,
            source.unique_users(tenant_id, &month_to_date),
        )
        .await?;

        let average_storage = run_metric(
            AVERAGE_STORAGE,
            tenant_id,
            source.average_storage_gb(tenant_id, window),
        )
        .await?;

        let processing = run_metric(
            PROCESSING,
            tenant_id,
            source.processing_seconds(tenant_id, window),
        )
        .await?;

        let api_rows: Vec<ApiUsageRow> = run_metric(
            API_USAGE,
            tenant_id,
            with_legacy_fallback(API_USAGE.name, |shape| {
                source.api_usage(tenant_id, window, shape)
            }),
        )
        .await?;

        let geo_rows: Vec<GeoRow> = run_metric(
            GEO_BREAKDOWN,
            tenant_id,
            source.geo_breakdown(tenant_id, window, self.geo_top_n),
        )
        .await?;

        let now = self.clock.now();
        let traffic = traffic_by_cluster(&egress_rows, primary.as_deref());
        let api_breakdown = merge_api_usage(api_rows);

        let mut summary = UsageSummary::empty(tenant_id, &primary_cluster_id, window, now);
        summary.stream_hours = sanitize(viewers.stream_hours);
        summary.total_streams = viewers.total_streams;
        summary.max_viewers = viewers.max_viewers;
        summary.unique_users = unique_users;
        summary.peak_bandwidth_mbps = sanitize(peak_bandwidth);
        summary.average_storage_gb = sanitize(average_storage);
        summary.processing = processing.sanitized();
        summary.api_requests = api_breakdown.iter().map(|r| r.requests).sum();
        summary.api_errors = api_breakdown.iter().map(|r| r.errors).sum();
        summary.api_duration_ms = api_breakdown.iter().map(|r| r.duration_ms).sum();
        summary.api_complexity = api_breakdown.iter().map(|r| r.complexity).sum();
        summary.api_breakdown = api_breakdown;
        summary.geo_breakdown = geo_breakdown(geo_rows);
        if let Some(own) = traffic.get(&primary_cluster_id) {
            apply_traffic(&mut summary, own);
        }

        let mut summaries = vec![summary];
        for (cluster_id, cluster) in &traffic {
            if *cluster_id == primary_cluster_id {
                continue;
            }
            let mut other = UsageSummary::empty(tenant_id, cluster_id, window, now);
            apply_traffic(&mut other, cluster);
            if other.has_usage() {
                summaries.push(other);
            }
        }

        if !summaries.iter().any(UsageSummary::has_usage) {
            info!(
                tenant_id = %tenant_id,
                window_start = %window.start,
                window_end = %window.end,
                "No usage data for tenant in window, skipping"
            );
            return Ok(None);
        }

        info!(
            tenant_id = %tenant_id,
            window_start = %window.start,
            window_end = %window.end,
            cluster_count = summaries.len(),
            stream_hours = summaries[0].stream_hours,
            total_egress_gb = summaries.iter().map(|s| s.egress_gb).sum::<f64>(),
            api_requests = summaries[0].api_requests,
            "Generated usage summaries for tenant"
        );

        Ok(Some(summaries))
    }
}

fn month_start(window: &Window) -> chrono::DateTime<Utc> {
    let start = window.start;
    Utc.with_ymd_and_hms(start.year(), start.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(start)
}

fn traffic_by_cluster(rows: &[EgressRow], primary: Option<&str>) -> BTreeMap<String, ClusterTraffic> {
    let mut traffic: BTreeMap<String, ClusterTraffic> = BTreeMap::new();
    for row in rows {
        let cluster_id = attribute_cluster(&row.cluster_id, &row.origin_cluster_id, primary);
        let entry = traffic.entry(cluster_id.to_string()).or_default();
        entry.egress_gb += sanitize(row.egress_gb);
        entry.viewer_hours += sanitize(row.viewer_hours);
        entry.unique_viewers += row.unique_viewers;
    }
    traffic
}

fn apply_traffic(summary: &mut UsageSummary, traffic: &ClusterTraffic) {
    summary.egress_gb = sanitize(traffic.egress_gb);
    summary.viewer_hours = sanitize(traffic.viewer_hours);
    summary.total_viewers = traffic.unique_viewers;
}

/// Sanitize API rows and merge any duplicate `(auth_type, operation_type, operation_name)` keys.
fn merge_api_usage(rows: Vec<ApiUsageRow>) -> Vec<ApiUsageBreakdown> {
    let mut breakdown: Vec<ApiUsageBreakdown> = Vec::with_capacity(rows.len());
    let mut index: HashMap<(String, String, String), usize> = HashMap::new();

    for row in rows {
        let operation_name = row.operation_name.unwrap_or_default();
        let key = (
            row.auth_type.clone(),
            row.operation_type.clone(),
            operation_name.clone(),
        );
        match index.get(&key) {
            Some(&idx) => {
                let existing = &mut breakdown[idx];
                existing.requests += sanitize(row.requests);
                existing.errors += sanitize(row.errors);
                existing.duration_ms += sanitize(row.duration_ms);
                existing.complexity += sanitize(row.complexity);
                existing.unique_users += sanitize(row.unique_users);
                existing.unique_tokens += sanitize(row.unique_tokens);
            }
            None => {
                index.insert(key, breakdown.len());
                breakdown.push(ApiUsageBreakdown {
                    auth_type: row.auth_type,
                    operation_type: row.operation_type,
                    operation_name,
                    requests: sanitize(row.requests),
                    errors: sanitize(row.errors),
                    duration_ms: sanitize(row.duration_ms),
                    complexity: sanitize(row.complexity),
                    unique_users: sanitize(row.unique_users),
                    unique_tokens: sanitize(row.unique_tokens),
                });
            }
        }
    }
    breakdown
}

fn geo_breakdown(rows: Vec<GeoRow>) -> Vec<CountryMetrics> {
    let total_viewers: u64 = rows.iter().map(|r| r.viewer_count).sum();
    rows.into_iter()
        .map(|row| {
            let percentage = if total_viewers == 0 {
                0.0
            } else {
                row.viewer_count as f64 * 100.0 / total_viewers as f64
            };
            CountryMetrics {
                country_code: row.country_code,
                viewer_count: row.viewer_count,
                viewer_hours: sanitize(row.viewer_hours),
                egress_gb: sanitize(row.egress_gb),
                percentage: sanitize(percentage),
            }
        })
        .collect()
}
