//! In-memory collaborators for summarizer integration tests.

use async_trait::async_trait;
use billing_summarizer::error::{BillingError, Result};
use billing_summarizer::models::{CodecSeconds, TenantCursor, UsageSummary, Window};
use billing_summarizer::services::delivery::DeliverySink;
use billing_summarizer::services::query_source::{
    bucket_billed_in, ApiUsageRow, EgressRow, GeoRow, MetricQuerySource, ViewerSessionMetrics,
};
use billing_summarizer::services::schema_guard::SchemaShape;
use billing_summarizer::services::{CursorStore, TenantDirectory};
use billing_summarizer::utils::Clock;
use chrono::{DateTime, Duration, Utc};
use mockall::mock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

mock! {
    pub Directory {}

    #[async_trait]
    impl TenantDirectory for Directory {
        async fn primary_cluster(&self, tenant_id: &str) -> Result<Option<String>>;
    }
}

/// Canned usage for one tenant, returned for any window.
#[derive(Debug, Clone, Default)]
pub struct TenantUsage {
    pub viewers: ViewerSessionMetrics,
    pub egress: Vec<EgressRow>,
    pub unique_users: u64,
    pub api: Vec<ApiUsageRow>,
    pub fail_viewer_sessions: bool,
}

#[derive(Default)]
struct SourceState {
    tenants: Vec<String>,
    usage: HashMap<String, TenantUsage>,
    /// Tenants whose egress query only succeeds with the legacy column set.
    legacy_egress: Vec<String>,
    fail_enumeration: bool,
    /// (tenant, bucket hour, egress GB accrued per minute) for hourly rollup buckets.
    hourly_egress: Vec<(String, DateTime<Utc>, f64)>,
    /// (tenant, window) of every viewer_sessions call, in order.
    viewer_windows: Vec<(String, Window)>,
    egress_shapes: Vec<SchemaShape>,
}

#[derive(Default)]
pub struct FakeMetricSource {
    state: Mutex<SourceState>,
}

impl FakeMetricSource {
    pub fn add_tenant(&self, tenant_id: &str, usage: TenantUsage) {
        let mut state = self.state.lock().unwrap();
        state.tenants.push(tenant_id.to_string());
        state.usage.insert(tenant_id.to_string(), usage);
    }

    pub fn set_usage(&self, tenant_id: &str, usage: TenantUsage) {
        self.state
            .lock()
            .unwrap()
            .usage
            .insert(tenant_id.to_string(), usage);
    }

    pub fn require_legacy_egress(&self, tenant_id: &str) {
        self.state
            .lock()
            .unwrap()
            .legacy_egress
            .push(tenant_id.to_string());
    }

    /// An hourly egress bucket that fills at `gb_per_minute` from `hour` until it closes.
    pub fn add_hourly_egress(&self, tenant_id: &str, hour: DateTime<Utc>, gb_per_minute: f64) {
        self.state
            .lock()
            .unwrap()
            .hourly_egress
            .push((tenant_id.to_string(), hour, gb_per_minute));
    }

    pub fn fail_enumeration(&self, fail: bool) {
        self.state.lock().unwrap().fail_enumeration = fail;
    }

    pub fn viewer_windows(&self, tenant_id: &str) -> Vec<Window> {
        self.state
            .lock()
            .unwrap()
            .viewer_windows
            .iter()
            .filter(|(t, _)| t == tenant_id)
            .map(|(_, w)| *w)
            .collect()
    }

    pub fn egress_shapes(&self) -> Vec<SchemaShape> {
        self.state.lock().unwrap().egress_shapes.clone()
    }

    /// Buckets closing in `window`, as filled at `window.end`.
    fn hourly_egress_rows(&self, tenant_id: &str, window: &Window) -> Vec<EgressRow> {
        self.state
            .lock()
            .unwrap()
            .hourly_egress
            .iter()
            .filter(|(t, hour, _)| t == tenant_id && bucket_billed_in(*hour, Duration::hours(1), window))
            .map(|(_, hour, rate)| {
                let minutes = (window.end - *hour).num_minutes().clamp(0, 60) as f64;
                EgressRow {
                    egress_gb: rate * minutes,
                    ..Default::default()
                }
            })
            .collect()
    }

    fn usage(&self, tenant_id: &str) -> TenantUsage {
        self.state
            .lock()
            .unwrap()
            .usage
            .get(tenant_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl MetricQuerySource for FakeMetricSource {
    async fn active_tenants(&self, _since: DateTime<Utc>) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        if state.fail_enumeration {
            return Err(BillingError::ClickHouse("connection refused".to_string()));
        }
        Ok(state.tenants.clone())
    }

    async fn viewer_sessions(&self, tenant_id: &str, window: &Window) -> Result<ViewerSessionMetrics> {
        self.state
            .lock()
            .unwrap()
            .viewer_windows
            .push((tenant_id.to_string(), *window));
        let usage = self.usage(tenant_id);
        if usage.fail_viewer_sessions {
            return Err(BillingError::ClickHouse("viewer sessions unavailable".to_string()));
        }
        Ok(usage.viewers)
    }

    async fn egress(&self, tenant_id: &str, window: &Window, shape: SchemaShape) -> Result<Vec<EgressRow>> {
        let legacy_only = {
            let mut state = self.state.lock().unwrap();
            state.egress_shapes.push(shape);
            state.legacy_egress.iter().any(|t| t == tenant_id)
        };
        let mut rows = self.usage(tenant_id).egress;
        rows.extend(self.hourly_egress_rows(tenant_id, window));
        match (legacy_only, shape) {
            (true, SchemaShape::Current) => Err(BillingError::ClickHouse(
                "Code: 47. DB::Exception: Unknown expression identifier 'origin_cluster_id'".to_string(),
            )),
            (true, SchemaShape::Legacy) => Ok(rows
                .into_iter()
                .map(|r| EgressRow {
                    origin_cluster_id: String::new(),
                    ..r
                })
                .collect()),
            (false, _) => Ok(rows),
        }
    }

    async fn peak_bandwidth_mbps(&self, _: &str, _: &Window) -> Result<f64> {
        Ok(0.0)
    }

    async fn unique_users(&self, tenant_id: &str, _: &Window) -> Result<u64> {
        Ok(self.usage(tenant_id).unique_users)
    }

    async fn average_storage_gb(&self, _: &str, _: &Window) -> Result<f64> {
        Ok(0.0)
    }

    async fn processing_seconds(&self, _: &str, _: &Window) -> Result<CodecSeconds> {
        Ok(CodecSeconds::default())
    }

    async fn api_usage(&self, tenant_id: &str, _: &Window, _: SchemaShape) -> Result<Vec<ApiUsageRow>> {
        Ok(self.usage(tenant_id).api)
    }

    async fn geo_breakdown(&self, _: &str, _: &Window, _: u32) -> Result<Vec<GeoRow>> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
pub struct FakeCursorStore {
    cursors: Mutex<HashMap<String, DateTime<Utc>>>,
    fail_advance: AtomicBool,
}

impl FakeCursorStore {
    pub fn seed(&self, tenant_id: &str, at: DateTime<Utc>) {
        self.cursors.lock().unwrap().insert(tenant_id.to_string(), at);
    }

    pub fn get(&self, tenant_id: &str) -> Option<DateTime<Utc>> {
        self.cursors.lock().unwrap().get(tenant_id).copied()
    }

    pub fn fail_advance(&self, fail: bool) {
        self.fail_advance.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CursorStore for FakeCursorStore {
    async fn get_or_create(&self, tenant_id: &str, initial: DateTime<Utc>) -> Result<TenantCursor> {
        let mut cursors = self.cursors.lock().unwrap();
        let at = *cursors.entry(tenant_id.to_string()).or_insert(initial);
        Ok(TenantCursor {
            tenant_id: tenant_id.to_string(),
            last_processed_at: at,
            updated_at: at,
        })
    }

    async fn advance(&self, tenant_id: &str, processed_through: DateTime<Utc>) -> Result<()> {
        if self.fail_advance.load(Ordering::SeqCst) {
            return Err(BillingError::CursorStore("database unavailable".to_string()));
        }
        self.cursors
            .lock()
            .unwrap()
            .insert(tenant_id.to_string(), processed_through);
        Ok(())
    }
}

/// Records every delivered batch; fails on demand.
#[derive(Default)]
pub struct RecordingSink {
    batches: Mutex<Vec<Vec<UsageSummary>>>,
    fail: AtomicBool,
    fail_tenant: Mutex<Option<String>>,
    /// When set, deliveries park until this is notified.
    gate: Mutex<Option<Arc<Notify>>>,
    delivering: Notify,
}

impl RecordingSink {
    /// Park every delivery until the returned handle is notified.
    pub fn hold_deliveries(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Resolves once a delivery has started and is parked.
    pub async fn wait_until_delivering(&self) {
        self.delivering.notified().await;
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn fail_for_tenant(&self, tenant_id: &str) {
        *self.fail_tenant.lock().unwrap() = Some(tenant_id.to_string());
    }

    pub fn batches(&self) -> Vec<Vec<UsageSummary>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn delivered(&self) -> Vec<UsageSummary> {
        self.batches().into_iter().flatten().collect()
    }
}

#[async_trait]
impl DeliverySink for RecordingSink {
    async fn deliver(&self, batch: &[UsageSummary]) -> Result<()> {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            self.delivering.notify_one();
            gate.notified().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(BillingError::Delivery("broker unavailable".to_string()));
        }
        let failing = self.fail_tenant.lock().unwrap().clone();
        if let Some(tenant) = failing {
            if batch.iter().any(|s| s.tenant_id == tenant) {
                return Err(BillingError::Delivery(format!("rejected batch for {}", tenant)));
            }
        }
        self.batches.lock().unwrap().push(batch.to_vec());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

pub struct FakeClock {
    now: Mutex<DateTime<Utc>>,
}

impl FakeClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
