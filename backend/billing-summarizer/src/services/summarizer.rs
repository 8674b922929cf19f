//! Billing sweep orchestration.
//!
//! Per tenant window: `PENDING → BUILT → (SKIPPED | DELIVERED) → CURSOR_ADVANCED`,
//! or `PENDING → BUILD_FAILED`. Full sweeps (hourly/daily) summarize the
//! previous closed period and never touch cursors. Incremental sweeps summarize
//! each tenant from its cursor up to the current minute and advance the cursor
//! only once delivery is confirmed, so a failed window is retried verbatim.

use crate::config::SummarizerConfig;
use crate::error::{BillingError, Result};
use crate::metrics;
use crate::models::{UsageSummary, Window};
use crate::services::builder::UsageSummaryBuilder;
use crate::services::cursor::CursorStore;
use crate::services::delivery::DeliverySink;
use crate::services::directory::TenantDirectory;
use crate::services::query_source::MetricQuerySource;
use crate::utils::clock::truncate;
use crate::utils::Clock;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepMode {
    Hourly,
    Daily,
    Incremental,
}

impl SweepMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SweepMode::Hourly => "hourly",
            SweepMode::Daily => "daily",
            SweepMode::Incremental => "incremental",
        }
    }
}

/// What happened to one tenant during an incremental sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowOutcome {
    /// Window shorter than the minimum; nothing read or written.
    TooShort,
    /// No billable usage; cursor advanced to `through`.
    Empty { through: DateTime<Utc> },
    /// Summaries confirmed delivered; cursor advanced to `through`.
    Delivered {
        through: DateTime<Utc>,
        summaries: usize,
    },
    /// Another sweep currently owns this tenant.
    Busy,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub tenants: usize,
    pub delivered: usize,
    pub empty: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl SweepReport {
    fn record(&mut self, outcome: &WindowOutcome) {
        match outcome {
            WindowOutcome::Delivered { .. } => self.delivered += 1,
            WindowOutcome::Empty { .. } => self.empty += 1,
            WindowOutcome::TooShort | WindowOutcome::Busy => self.skipped += 1,
        }
    }
}

/// Drives full and incremental billing sweeps over all active tenants.
pub struct BillingSummarizer {
    source: Arc<dyn MetricQuerySource>,
    builder: UsageSummaryBuilder,
    sink: Arc<dyn DeliverySink>,
    cursors: Arc<dyn CursorStore>,
    clock: Arc<dyn Clock>,
    config: SummarizerConfig,
    tenant_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl BillingSummarizer {
    pub fn new(
        source: Arc<dyn MetricQuerySource>,
        directory: Arc<dyn TenantDirectory>,
        sink: Arc<dyn DeliverySink>,
        cursors: Arc<dyn CursorStore>,
        clock: Arc<dyn Clock>,
        config: SummarizerConfig,
    ) -> Self {
        let builder = UsageSummaryBuilder::new(
            Arc::clone(&source),
            directory,
            Arc::clone(&clock),
            config.geo_top_n,
        );
        Self {
            source,
            builder,
            sink,
            cursors,
            clock,
            config,
            tenant_locks: DashMap::new(),
        }
    }

    /// Summarize the previous full hour for every active tenant.
    pub async fn run_hourly(&self) -> Result<SweepReport> {
        let window = closed_period(self.clock.now(), Duration::hours(1));
        self.summarize_period(SweepMode::Hourly, window).await
    }

    /// Summarize the previous full UTC day for every active tenant.
    pub async fn run_daily(&self) -> Result<SweepReport> {
        let window = closed_period(self.clock.now(), Duration::days(1));
        self.summarize_period(SweepMode::Daily, window).await
    }

    /// Summarize and deliver `window` for every active tenant without touching cursors.
    ///
    /// Fails only when tenant enumeration fails.
    pub async fn summarize_period(&self, mode: SweepMode, window: Window) -> Result<SweepReport> {
        let started = Instant::now();
        info!(
            mode = mode.as_str(),
            window_start = %window.start,
            window_end = %window.end,
            "Starting usage summarization for period"
        );

        let tenants = self.active_tenants().await?;
        let mut report = SweepReport {
            tenants: tenants.len(),
            ..Default::default()
        };

        for tenant_id in &tenants {
            match self.summarize_tenant_window(mode, tenant_id, &window).await {
                Ok(Some(count)) => {
                    report.delivered += 1;
                    metrics::record_summaries_emitted(mode.as_str(), count);
                }
                Ok(None) => report.empty += 1,
                Err(err) => {
                    report.failed += 1;
                    metrics::record_tenant_failure(mode.as_str(), err.stage());
                    error!(
                        mode = mode.as_str(),
                        tenant_id = %tenant_id,
                        error = %err,
                        "Failed to summarize usage for tenant"
                    );
                }
            }
        }

        metrics::observe_sweep(mode.as_str(), started.elapsed());
        info!(
            mode = mode.as_str(),
            tenants = report.tenants,
            delivered = report.delivered,
            empty = report.empty,
            failed = report.failed,
            "Usage summarization for period finished"
        );
        Ok(report)
    }

    async fn summarize_tenant_window(
        &self,
        mode: SweepMode,
        tenant_id: &str,
        window: &Window,
    ) -> Result<Option<usize>> {
        let Some(summaries) = self.builder.build(tenant_id, window).await? else {
            debug!(mode = mode.as_str(), tenant_id = %tenant_id, "No billable usage in period");
            return Ok(None);
        };
        self.deliver(tenant_id, &summaries).await?;
        Ok(Some(summaries.len()))
    }

    /// Catch every active tenant up from its cursor to the current minute.
    ///
    /// Fails only when tenant enumeration fails.
    pub async fn run_incremental(&self) -> Result<SweepReport> {
        let started = Instant::now();
        let mode = SweepMode::Incremental;
        info!(mode = mode.as_str(), "Processing pending usage for all tenants");

        let tenants = self.active_tenants().await?;
        let mut report = SweepReport {
            tenants: tenants.len(),
            ..Default::default()
        };

        for tenant_id in &tenants {
            match self.process_tenant_incremental(tenant_id).await {
                Ok(outcome) => report.record(&outcome),
                Err(err) => {
                    report.failed += 1;
                    metrics::record_tenant_failure(mode.as_str(), err.stage());
                    error!(
                        mode = mode.as_str(),
                        tenant_id = %tenant_id,
                        error = %err,
                        "Failed to process pending usage for tenant"
                    );
                }
            }
        }

        metrics::observe_sweep(mode.as_str(), started.elapsed());
        info!(
            mode = mode.as_str(),
            tenants = report.tenants,
            delivered = report.delivered,
            empty = report.empty,
            skipped = report.skipped,
            failed = report.failed,
            "Incremental usage processing finished"
        );
        Ok(report)
    }

    /// One incremental step for `tenant_id`.
    ///
    /// On any error the cursor is left where it was, so the next call
    /// retries the identical window.
    pub async fn process_tenant_incremental(&self, tenant_id: &str) -> Result<WindowOutcome> {
        let lock = self
            .tenant_locks
            .entry(tenant_id.to_string())
            .or_default()
            .clone();
        let Ok(_guard) = lock.try_lock_owned() else {
            warn!(tenant_id = %tenant_id, "Incremental sweep already running for tenant, skipping");
            return Ok(WindowOutcome::Busy);
        };

        let now = self.clock.now();
        let initial = now - Duration::hours(self.config.cursor_default_lookback_hours);
        let cursor = self.cursors.get_or_create(tenant_id, initial).await?;

        let window = Window::new(cursor.last_processed_at, truncate(now, Duration::minutes(1)));
        if window.duration() < Duration::seconds(self.config.min_incremental_window_secs) {
            debug!(
                tenant_id = %tenant_id,
                window_start = %window.start,
                window_end = %window.end,
                "Incremental window too short, skipping"
            );
            return Ok(WindowOutcome::TooShort);
        }

        match self.builder.build(tenant_id, &window).await? {
            None => {
                self.cursors.advance(tenant_id, window.end).await?;
                metrics::record_cursor_advance("empty");
                info!(
                    tenant_id = %tenant_id,
                    window_start = %window.start,
                    window_end = %window.end,
                    "No usage summary emitted; cursor advanced"
                );
                Ok(WindowOutcome::Empty { through: window.end })
            }
            Some(summaries) => {
                self.deliver(tenant_id, &summaries).await?;
                metrics::record_summaries_emitted(SweepMode::Incremental.as_str(), summaries.len());

                self.cursors.advance(tenant_id, window.end).await?;
                metrics::record_cursor_advance("delivered");
                info!(
                    tenant_id = %tenant_id,
                    window_start = %window.start,
                    window_end = %window.end,
                    summaries = summaries.len(),
                    "Successfully processed pending usage"
                );
                Ok(WindowOutcome::Delivered {
                    through: window.end,
                    summaries: summaries.len(),
                })
            }
        }
    }

    async fn deliver(&self, tenant_id: &str, summaries: &[UsageSummary]) -> Result<()> {
        self.sink.deliver(summaries).await.map_err(|err| {
            error!(
                tenant_id = %tenant_id,
                sink = self.sink.name(),
                summaries = summaries.len(),
                error = %err,
                "Usage delivery not confirmed"
            );
            match err {
                BillingError::Delivery(_) => err,
                other => BillingError::Delivery(other.to_string()),
            }
        })
    }

    async fn active_tenants(&self) -> Result<Vec<String>> {
        let since = self.clock.now() - Duration::days(self.config.active_tenant_lookback_days);
        let tenants = self.source.active_tenants(since).await.map_err(|err| {
            error!(error = %err, "Failed to enumerate active tenants");
            err
        })?;
        debug!(count = tenants.len(), "Enumerated active tenants");
        Ok(tenants)
    }
}

/// The closed period of length `period` immediately before `now`.
pub fn closed_period(now: DateTime<Utc>, period: Duration) -> Window {
    let end = truncate(now, period);
    Window::new(end - period, end)
}
