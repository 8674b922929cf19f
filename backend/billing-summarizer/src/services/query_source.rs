//! Aggregate metric queries against the analytics store.
//!
//! Every query is scoped to one tenant and one half-open window and returns
//! zero-valued results when the store has no matching rows. A rollup bucket is
//! read by the window containing its *end* (see [`bucket_billed_in`]): it is
//! never read while still filling, and consecutive windows read it exactly once.

use crate::config::ClickHouseConfig;
use crate::error::Result;
use crate::models::{CodecSeconds, Window};
use crate::services::schema_guard::SchemaShape;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clickhouse::{Client, Row};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Tenant ids reserved for system and demo traffic; never billed.
pub const RESERVED_TENANT_IDS: [&str; 3] = [
    "00000000-0000-0000-0000-000000000000",
    "00000000-0000-0000-0000-000000000001",
    "00000000-0000-0000-0000-000000000002",
];

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ViewerSessionMetrics {
    pub max_viewers: u64,
    pub total_streams: u64,
    pub stream_hours: f64,
}

/// Egress and viewer hours for one (serving, origin) cluster pair.
///
/// Cluster columns are empty when the store has no attribution for the row,
/// including every row read through the legacy schema shape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EgressRow {
    pub cluster_id: String,
    pub origin_cluster_id: String,
    pub egress_gb: f64,
    pub viewer_hours: f64,
    pub unique_viewers: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiUsageRow {
    pub auth_type: String,
    pub operation_type: String,
    pub operation_name: Option<String>,
    pub requests: f64,
    pub errors: f64,
    pub duration_ms: f64,
    pub complexity: f64,
    pub unique_users: f64,
    pub unique_tokens: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeoRow {
    pub country_code: String,
    pub viewer_count: u64,
    pub viewer_hours: f64,
    pub egress_gb: f64,
}

/// Whether the rollup bucket `[bucket_start, bucket_start + width)` is billed in `window`.
///
/// Mirrors the SQL predicate `bucket + width > start AND bucket + width <= end`.
pub fn bucket_billed_in(bucket_start: DateTime<Utc>, width: chrono::Duration, window: &Window) -> bool {
    let bucket_end = bucket_start + width;
    bucket_end > window.start && bucket_end <= window.end
}

/// Named aggregate queries the usage builder depends on.
#[async_trait]
pub trait MetricQuerySource: Send + Sync {
    /// Distinct tenant ids with events since `since`, excluding [`RESERVED_TENANT_IDS`].
    async fn active_tenants(&self, since: DateTime<Utc>) -> Result<Vec<String>>;

    async fn viewer_sessions(&self, tenant_id: &str, window: &Window) -> Result<ViewerSessionMetrics> {
        // Stream-hours follow the rollup rule: an hour counts once, in the window where it closes.
        let query = self.windowed(
            r#"
            WITH ? AS tenant, toDateTime(?) AS window_start, toDateTime(?) AS window_end
            SELECT
                toUInt64(COALESCE(maxIf(total_viewers, timestamp >= window_start), 0)) AS max_viewers,
                toUInt64(uniqIf(internal_name, timestamp >= window_start)) AS total_streams,
                toFloat64(uniqExactIf(
                    concat(internal_name, toString(toStartOfHour(timestamp))),
                    toStartOfHour(timestamp) + INTERVAL 1 HOUR > window_start
                        AND toStartOfHour(timestamp) + INTERVAL 1 HOUR <= window_end
                )) AS stream_hours
            FROM stream_event_log
            WHERE tenant_id = tenant
              AND timestamp >= window_start - INTERVAL 1 HOUR AND timestamp < window_end
              AND total_viewers IS NOT NULL
            "#,
            tenant_id,
            window,
        );
        let row: Option<ViewerSessionRecord> = self.fetch_optional(query).await?;
        Ok(row
            .map(|r| ViewerSessionMetrics {
                max_viewers: r.max_viewers,
                total_streams: r.total_streams,
                stream_hours: r.stream_hours,
            })
            .unwrap_or_default())
    }

    async fn egress(&self, tenant_id: &str, window: &Window, shape: SchemaShape) -> Result<Vec<EgressRow>> {
        match shape {
            SchemaShape::Current => {
                let query = self.windowed(
                    r#"
                    SELECT
                        cluster_id,
                        origin_cluster_id,
                        toFloat64(COALESCE(sum(egress_gb), 0)) AS egress_gb,
                        toFloat64(COALESCE(sum(viewer_hours), 0)) AS viewer_hours,
                        toUInt64(COALESCE(sum(unique_viewers), 0)) AS unique_viewers
                    FROM tenant_viewer_hourly
                    WHERE tenant_id = ?
                      AND hour + INTERVAL 1 HOUR > toDateTime(?) AND hour + INTERVAL 1 HOUR <= toDateTime(?)
                    GROUP BY cluster_id, origin_cluster_id
                    "#,
                    tenant_id,
                    window,
                );
                let rows: Vec<EgressRecord> = self.fetch_all(query).await?;
                Ok(rows
                    .into_iter()
                    .map(|r| EgressRow {
                        cluster_id: r.cluster_id,
                        origin_cluster_id: r.origin_cluster_id,
                        egress_gb: r.egress_gb,
                        viewer_hours: r.viewer_hours,
                        unique_viewers: r.unique_viewers,
                    })
                    .collect())
            }
            SchemaShape::Legacy => {
                let query = self.windowed(
                    r#"
                    SELECT
                        cluster_id,
                        toFloat64(COALESCE(sum(egress_gb), 0)) AS egress_gb,
                        toFloat64(COALESCE(sum(viewer_hours), 0)) AS viewer_hours,
                        toUInt64(COALESCE(sum(unique_viewers), 0)) AS unique_viewers
                    FROM tenant_viewer_hourly
                    WHERE tenant_id = ?
                      AND hour + INTERVAL 1 HOUR > toDateTime(?) AND hour + INTERVAL 1 HOUR <= toDateTime(?)
                    GROUP BY cluster_id
                    "#,
                    tenant_id,
                    window,
                );
                let rows: Vec<LegacyEgressRecord> = self.fetch_all(query).await?;
                Ok(rows
                    .into_iter()
                    .map(|r| EgressRow {
                        cluster_id: r.cluster_id,
                        origin_cluster_id: String::new(),
                        egress_gb: r.egress_gb,
                        viewer_hours: r.viewer_hours,
                        unique_viewers: r.unique_viewers,
                    })
                    .collect())
            }
        }
    }

    async fn peak_bandwidth_mbps(&self, tenant_id: &str, window: &Window) -> Result<f64> {
        // avg_bw_out is bytes/sec
        let query = self.windowed(
            r#"
            SELECT toFloat64(COALESCE(max(avg_bw_out) / (1024 * 1024), 0)) AS value
            FROM client_qoe_5m
            WHERE tenant_id = ?
              AND timestamp_5m + INTERVAL 5 MINUTE > toDateTime(?) AND timestamp_5m + INTERVAL 5 MINUTE <= toDateTime(?)
            "#,
            tenant_id,
            window,
        );
        let row: Option<ScalarF64> = self.fetch_optional(query).await?;
        Ok(row.map(|r| r.value).unwrap_or(0.0))
    }

    async fn unique_users(&self, tenant_id: &str, window: &Window) -> Result<u64> {
        let query = self.windowed(
            r#"
            SELECT toUInt64(uniq(session_id)) AS value
            FROM viewer_connection_events
            WHERE tenant_id = ?
              AND timestamp >= toDateTime(?) AND timestamp < toDateTime(?)
            "#,
            tenant_id,
            window,
        );
        let row: Option<ScalarU64> = self.fetch_optional(query).await?;
        Ok(row.map(|r| r.value).unwrap_or(0))
    }

    async fn average_storage_gb(&self, tenant_id: &str, window: &Window) -> Result<f64> {
        let query = self.windowed(
            r#"
            SELECT toFloat64(COALESCE(avgMerge(avg_total_bytes) / (1024 * 1024 * 1024), 0)) AS value
            FROM storage_usage_hourly
            WHERE tenant_id = ?
              AND hour + INTERVAL 1 HOUR > toDateTime(?) AND hour + INTERVAL 1 HOUR <= toDateTime(?)
            "#,
            tenant_id,
            window,
        );
        let row: Option<ScalarF64> = self.fetch_optional(query).await?;
        Ok(row.map(|r| r.value).unwrap_or(0.0))
    }

    async fn processing_seconds(&self, tenant_id: &str, window: &Window) -> Result<CodecSeconds> {
        let query = self.windowed(
            r#"
            SELECT
                toFloat64(COALESCE(sum(livepeer_h264_seconds), 0)) AS livepeer_h264_seconds,
                toFloat64(COALESCE(sum(livepeer_vp9_seconds), 0)) AS livepeer_vp9_seconds,
                toFloat64(COALESCE(sum(livepeer_av1_seconds), 0)) AS livepeer_av1_seconds,
                toFloat64(COALESCE(sum(livepeer_hevc_seconds), 0)) AS livepeer_hevc_seconds,
                toFloat64(COALESCE(sum(native_av_h264_seconds), 0)) AS native_av_h264_seconds,
                toFloat64(COALESCE(sum(native_av_vp9_seconds), 0)) AS native_av_vp9_seconds,
                toFloat64(COALESCE(sum(native_av_av1_seconds), 0)) AS native_av_av1_seconds,
                toFloat64(COALESCE(sum(native_av_hevc_seconds), 0)) AS native_av_hevc_seconds,
                toFloat64(COALESCE(sum(native_av_aac_seconds), 0)) AS native_av_aac_seconds,
                toFloat64(COALESCE(sum(native_av_opus_seconds), 0)) AS native_av_opus_seconds
            FROM processing_hourly
            WHERE tenant_id = ?
              AND hour + INTERVAL 1 HOUR > toDateTime(?) AND hour + INTERVAL 1 HOUR <= toDateTime(?)
            "#,
            tenant_id,
            window,
        );
        let row: Option<ProcessingRecord> = self.fetch_optional(query).await?;
        Ok(row
            .map(|r| CodecSeconds {
                livepeer_h264_seconds: r.livepeer_h264_seconds,
                livepeer_vp9_seconds: r.livepeer_vp9_seconds,
                livepeer_av1_seconds: r.livepeer_av1_seconds,
                livepeer_hevc_seconds: r.livepeer_hevc_seconds,
                native_av_h264_seconds: r.native_av_h264_seconds,
                native_av_vp9_seconds: r.native_av_vp9_seconds,
                native_av_av1_seconds: r.native_av_av1_seconds,
                native_av_hevc_seconds: r.native_av_hevc_seconds,
                native_av_aac_seconds: r.native_av_aac_seconds,
                native_av_opus_seconds: r.native_av_opus_seconds,
            })
            .unwrap_or_default())
    }

    async fn api_usage(&self, tenant_id: &str, window: &Window, shape: SchemaShape) -> Result<Vec<ApiUsageRow>> {
        match shape {
            SchemaShape::Current => {
                let query = self.windowed(
                    r#"
                    SELECT
                        auth_type,
                        operation_type,
                        operation_name,
                        toFloat64(COALESCE(sumMerge(total_requests), 0)) AS total_requests,
                        toFloat64(COALESCE(sumMerge(total_errors), 0)) AS total_errors,
                        toFloat64(COALESCE(sumMerge(total_duration_ms), 0)) AS total_duration_ms,
                        toFloat64(COALESCE(sumMerge(total_complexity), 0)) AS total_complexity,
                        toFloat64(COALESCE(uniqCombinedMerge(unique_users), 0)) AS unique_users,
                        toFloat64(COALESCE(uniqCombinedMerge(unique_tokens), 0)) AS unique_tokens
                    FROM api_usage_hourly
                    WHERE tenant_id = ?
                      AND hour + INTERVAL 1 HOUR > toDateTime(?) AND hour + INTERVAL 1 HOUR <= toDateTime(?)
                    GROUP BY auth_type, operation_type, operation_name
                    "#,
                    tenant_id,
                    window,
                );
                let rows: Vec<ApiUsageRecord> = self.fetch_all(query).await?;
                Ok(rows
                    .into_iter()
                    .map(|r| ApiUsageRow {
                        auth_type: r.auth_type,
                        operation_type: r.operation_type,
                        operation_name: r.operation_name,
                        requests: r.total_requests,
                        errors: r.total_errors,
                        duration_ms: r.total_duration_ms,
                        complexity: r.total_complexity,
                        unique_users: r.unique_users,
                        unique_tokens: r.unique_tokens,
                    })
                    .collect())
            }
            SchemaShape::Legacy => {
                let query = self.windowed(
                    r#"
                    SELECT
                        auth_type,
                        operation_type,
                        operation_name,
                        toFloat64(COALESCE(sumMerge(total_requests), 0)) AS total_requests,
                        toFloat64(COALESCE(sumMerge(total_errors), 0)) AS total_errors,
                        toFloat64(COALESCE(sumMerge(total_duration_ms), 0)) AS total_duration_ms,
                        toFloat64(COALESCE(sumMerge(total_complexity), 0)) AS total_complexity
                    FROM api_usage_hourly
                    WHERE tenant_id = ?
                      AND hour + INTERVAL 1 HOUR > toDateTime(?) AND hour + INTERVAL 1 HOUR <= toDateTime(?)
                    GROUP BY auth_type, operation_type, operation_name
                    "#,
                    tenant_id,
                    window,
                );
                let rows: Vec<LegacyApiUsageRecord> = self.fetch_all(query).await?;
                Ok(rows
                    .into_iter()
                    .map(|r| ApiUsageRow {
                        auth_type: r.auth_type,
                        operation_type: r.operation_type,
                        operation_name: r.operation_name,
                        requests: r.total_requests,
                        errors: r.total_errors,
                        duration_ms: r.total_duration_ms,
                        complexity: r.total_complexity,
                        ..Default::default()
                    })
                    .collect())
            }
        }
    }

    async fn geo_breakdown(&self, tenant_id: &str, window: &Window, limit: u32) -> Result<Vec<GeoRow>> {
        let query = self
            .windowed(
                r#"
                SELECT
                    country_code,
                    toUInt64(sum(viewer_count)) AS viewer_count,
                    toFloat64(sum(viewer_hours)) AS viewer_hours,
                    toFloat64(sum(egress_gb)) AS egress_gb
                FROM viewer_geo_hourly
                WHERE tenant_id = ?
                  AND hour + INTERVAL 1 HOUR > toDateTime(?) AND hour + INTERVAL 1 HOUR <= toDateTime(?)
                GROUP BY country_code
                ORDER BY viewer_hours DESC
                LIMIT ?
                "#,
                tenant_id,
                window,
            )
            .bind(limit);
        let rows: Vec<GeoRecord> = self.fetch_all(query).await?;
        Ok(rows
            .into_iter()
            .map(|r| GeoRow {
                country_code: r.country_code,
                viewer_count: r.viewer_count,
                viewer_hours: r.viewer_hours,
                egress_gb: r.egress_gb,
            })
            .collect())
    }
}
