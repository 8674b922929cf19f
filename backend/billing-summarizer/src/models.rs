//! Billing data model: usage windows, summaries, cursors and the ingest envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Replace NaN and ±Inf with zero so summaries never carry non-finite numbers.
pub fn sanitize(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Half-open usage interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> chrono::Duration {
        self.end - self.start
    }

    /// `"<start>/<end>"` in RFC 3339, the format billing keys periods on.
    pub fn period_string(&self) -> String {
        format!("{}/{}", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Transcoding seconds per processor and codec.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CodecSeconds {
    pub livepeer_h264_seconds: f64,
    pub livepeer_vp9_seconds: f64,
    pub livepeer_av1_seconds: f64,
    pub livepeer_hevc_seconds: f64,
    pub native_av_h264_seconds: f64,
    pub native_av_vp9_seconds: f64,
    pub native_av_av1_seconds: f64,
    pub native_av_hevc_seconds: f64,
    pub native_av_aac_seconds: f64,
    pub native_av_opus_seconds: f64,
}

impl CodecSeconds {
    pub fn sanitized(self) -> Self {
        Self {
            livepeer_h264_seconds: sanitize(self.livepeer_h264_seconds),
            livepeer_vp9_seconds: sanitize(self.livepeer_vp9_seconds),
            livepeer_av1_seconds: sanitize(self.livepeer_av1_seconds),
            livepeer_hevc_seconds: sanitize(self.livepeer_hevc_seconds),
            native_av_h264_seconds: sanitize(self.native_av_h264_seconds),
            native_av_vp9_seconds: sanitize(self.native_av_vp9_seconds),
            native_av_av1_seconds: sanitize(self.native_av_av1_seconds),
            native_av_hevc_seconds: sanitize(self.native_av_hevc_seconds),
            native_av_aac_seconds: sanitize(self.native_av_aac_seconds),
            native_av_opus_seconds: sanitize(self.native_av_opus_seconds),
        }
    }

    pub fn named(&self) -> [(&'static str, f64); 10] {
        [
            ("livepeer_h264_seconds", self.livepeer_h264_seconds),
            ("livepeer_vp9_seconds", self.livepeer_vp9_seconds),
            ("livepeer_av1_seconds", self.livepeer_av1_seconds),
            ("livepeer_hevc_seconds", self.livepeer_hevc_seconds),
            ("native_av_h264_seconds", self.native_av_h264_seconds),
            ("native_av_vp9_seconds", self.native_av_vp9_seconds),
            ("native_av_av1_seconds", self.native_av_av1_seconds),
            ("native_av_hevc_seconds", self.native_av_hevc_seconds),
            ("native_av_aac_seconds", self.native_av_aac_seconds),
            ("native_av_opus_seconds", self.native_av_opus_seconds),
        ]
    }
}

/// API usage for one `(auth_type, operation_type, operation_name)` group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiUsageBreakdown {
    pub auth_type: String,
    pub operation_type: String,
    pub operation_name: String,
    pub requests: f64,
    pub errors: f64,
    pub duration_ms: f64,
    pub complexity: f64,
    pub unique_users: f64,
    pub unique_tokens: f64,
}

impl ApiUsageBreakdown {
    pub fn has_usage(&self) -> bool {
        [
            self.requests,
            self.errors,
            self.duration_ms,
            self.complexity,
            self.unique_users,
            self.unique_tokens,
        ]
        .iter()
        .any(|v| *v != 0.0)
    }
}

/// Viewer metrics for one country.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CountryMetrics {
    pub country_code: String,
    pub viewer_count: u64,
    pub viewer_hours: f64,
    pub egress_gb: f64,
    /// Share of total viewers across the reported countries, 0..=100.
    pub percentage: f64,
}

impl CountryMetrics {
    pub fn has_usage(&self) -> bool {
        self.viewer_count != 0 || self.viewer_hours != 0.0 || self.egress_gb != 0.0
    }
}

/// Per-tenant, per-cluster usage for one window, as consumed by billing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub tenant_id: String,
    pub cluster_id: String,
    pub period: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,

    pub stream_hours: f64,
    pub egress_gb: f64,
    pub peak_bandwidth_mbps: f64,
    pub average_storage_gb: f64,
    #[serde(flatten)]
    pub processing: CodecSeconds,

    pub total_streams: u64,
    pub total_viewers: u64,
    pub viewer_hours: f64,
    pub max_viewers: u64,
    pub unique_users: u64,

    pub api_requests: f64,
    pub api_errors: f64,
    pub api_duration_ms: f64,
    pub api_complexity: f64,
    pub api_breakdown: Vec<ApiUsageBreakdown>,

    pub geo_breakdown: Vec<CountryMetrics>,

    #[serde(rename = "timestamp")]
    pub generated_at: DateTime<Utc>,
}

impl UsageSummary {
    /// Scalar fields that make a window billable when any is non-zero.
    pub const BILLABLE_FIELDS: [&'static str; 23] = [
        "stream_hours",
        "egress_gb",
        "viewer_hours",
        "average_storage_gb",
        "peak_bandwidth_mbps",
        "total_streams",
        "max_viewers",
        "total_viewers",
        "unique_users",
        "livepeer_h264_seconds",
        "livepeer_vp9_seconds",
        "livepeer_av1_seconds",
        "livepeer_hevc_seconds",
        "native_av_h264_seconds",
        "native_av_vp9_seconds",
        "native_av_av1_seconds",
        "native_av_hevc_seconds",
        "native_av_aac_seconds",
        "native_av_opus_seconds",
        "api_requests",
        "api_errors",
        "api_duration_ms",
        "api_complexity",
    ];

    /// An all-zero summary for `tenant_id`/`cluster_id` over `window`.
    pub fn empty(
        tenant_id: &str,
        cluster_id: &str,
        window: &Window,
        generated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            cluster_id: cluster_id.to_string(),
            period: window.period_string(),
            period_start: window.start,
            period_end: window.end,
            stream_hours: 0.0,
            egress_gb: 0.0,
            peak_bandwidth_mbps: 0.0,
            average_storage_gb: 0.0,
            processing: CodecSeconds::default(),
            total_streams: 0,
            total_viewers: 0,
            viewer_hours: 0.0,
            max_viewers: 0,
            unique_users: 0,
            api_requests: 0.0,
            api_errors: 0.0,
            api_duration_ms: 0.0,
            api_complexity: 0.0,
            api_breakdown: Vec::new(),
            geo_breakdown: Vec::new(),
            generated_at,
        }
    }

    /// Values of [`Self::BILLABLE_FIELDS`], in the same order.
    pub fn billable_values(&self) -> [f64; 23] {
        let p = &self.processing;
        [
            self.stream_hours,
            self.egress_gb,
            self.viewer_hours,
            self.average_storage_gb,
            self.peak_bandwidth_mbps,
            self.total_streams as f64,
            self.max_viewers as f64,
            self.total_viewers as f64,
            self.unique_users as f64,
            p.livepeer_h264_seconds,
            p.livepeer_vp9_seconds,
            p.livepeer_av1_seconds,
            p.livepeer_hevc_seconds,
            p.native_av_h264_seconds,
            p.native_av_vp9_seconds,
            p.native_av_av1_seconds,
            p.native_av_hevc_seconds,
            p.native_av_aac_seconds,
            p.native_av_opus_seconds,
            self.api_requests,
            self.api_errors,
            self.api_duration_ms,
            self.api_complexity,
        ]
    }

    pub fn has_usage(&self) -> bool {
        self.billable_values().iter().any(|v| *v != 0.0)
            || self.api_breakdown.iter().any(ApiUsageBreakdown::has_usage)
            || self.geo_breakdown.iter().any(CountryMetrics::has_usage)
    }

    /// True when every float, including nested breakdown rows, is finite.
    pub fn is_finite(&self) -> bool {
        self.billable_values().iter().all(|v| v.is_finite())
            && self.api_breakdown.iter().all(|row| {
                [
                    row.requests,
                    row.errors,
                    row.duration_ms,
                    row.complexity,
                    row.unique_users,
                    row.unique_tokens,
                ]
                .iter()
                .all(|v| v.is_finite())
            })
            && self
                .geo_breakdown
                .iter()
                .all(|row| row.viewer_hours.is_finite() && row.egress_gb.is_finite() && row.percentage.is_finite())
    }
}

/// Durable "delivered through" marker for a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TenantCursor {
    pub tenant_id: String,
    pub last_processed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Body of `POST /ingest-usage` on the billing service.
#[derive(Debug, Serialize, Deserialize)]
pub struct UsageIngestRequest {
    pub usage_summaries: Vec<UsageSummary>,
    pub source: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UsageIngestResponse {
    pub success: bool,
    #[serde(default)]
    pub processed_count: usize,
    #[serde(default)]
    pub error: Option<String>,
}
