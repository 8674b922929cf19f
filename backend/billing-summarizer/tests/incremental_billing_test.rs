//! Integration Tests: Incremental and full billing sweeps
//!
//! Coverage:
//! - Cursor advances only after confirmed delivery
//! - Re-running a caught-up tenant is a no-op
//! - Failed delivery leaves the cursor and the next run retries the same window
//! - Windows without usage advance the cursor without delivering
//! - Tenant enumeration failure is the only sweep-level error
//! - One tenant's failure does not affect another
//! - Legacy analytics schema fallback
//! - Full sweeps never touch cursors
//! - Concurrent runs for one tenant are single-flight
//! - Hourly rollups are billed once, after their hour closes

mod common;

use billing_summarizer::models::CodecSeconds;
use billing_summarizer::services::query_source::{EgressRow, ViewerSessionMetrics};
use billing_summarizer::services::schema_guard::SchemaShape;
use billing_summarizer::services::WindowOutcome;
use chrono::Duration;
use common::fakes::{MockDirectory, TenantUsage};
use common::{t0, Harness};

fn t1_usage() -> TenantUsage {
    TenantUsage {
        viewers: ViewerSessionMetrics {
            max_viewers: 120,
            total_streams: 3,
            stream_hours: 3.0,
        },
        egress: vec![EgressRow {
            cluster_id: String::new(),
            origin_cluster_id: String::new(),
            egress_gb: 45.2,
            viewer_hours: 10.5,
            unique_viewers: 200,
        }],
        ..Default::default()
    }
}

/// Clock a little past T0 + 1h so the incremental window is exactly [T0, T0+1h).
fn harness_one_hour_in() -> Harness {
    Harness::new(t0() + Duration::hours(1) + Duration::seconds(30))
}

#[tokio::test]
async fn delivers_window_then_advances_cursor() {
    let h = harness_one_hour_in();
    h.source.add_tenant("t1", t1_usage());
    h.cursors.seed("t1", t0());

    let report = h.summarizer.run_incremental().await.unwrap();
    assert_eq!(report.tenants, 1);
    assert_eq!(report.delivered, 1);
    assert_eq!(report.failed, 0);

    let delivered = h.sink.delivered();
    assert_eq!(delivered.len(), 1);
    let summary = &delivered[0];
    assert_eq!(summary.tenant_id, "t1");
    assert_eq!(summary.cluster_id, "cluster-a");
    assert_eq!(summary.period_start, t0());
    assert_eq!(summary.period_end, t0() + Duration::hours(1));
    assert_eq!(summary.max_viewers, 120);
    assert_eq!(summary.total_streams, 3);
    assert_eq!(summary.stream_hours, 3.0);
    assert_eq!(summary.egress_gb, 45.2);
    assert_eq!(summary.viewer_hours, 10.5);
    assert_eq!(summary.total_viewers, 200);
    assert_eq!(summary.processing, CodecSeconds::default());
    assert!(summary.has_usage());

    assert_eq!(h.cursors.get("t1"), Some(t0() + Duration::hours(1)));
}

#[tokio::test]
async fn caught_up_tenant_is_noop() {
    let h = harness_one_hour_in();
    h.source.add_tenant("t1", t1_usage());
    h.cursors.seed("t1", t0());

    h.summarizer.run_incremental().await.unwrap();
    let report = h.summarizer.run_incremental().await.unwrap();

    assert_eq!(report.skipped, 1);
    assert_eq!(report.delivered, 0);
    assert_eq!(h.sink.batches().len(), 1);
    assert_eq!(h.cursors.get("t1"), Some(t0() + Duration::hours(1)));
}

#[tokio::test]
async fn failed_delivery_keeps_cursor_and_retries_same_window() {
    let h = harness_one_hour_in();
    h.source.add_tenant("t1", t1_usage());
    h.cursors.seed("t1", t0());

    h.sink.fail(true);
    let report = h.summarizer.run_incremental().await.unwrap();
    assert_eq!(report.failed, 1);
    assert!(h.sink.batches().is_empty());
    assert_eq!(h.cursors.get("t1"), Some(t0()));

    h.sink.fail(false);
    let outcome = h.summarizer.process_tenant_incremental("t1").await.unwrap();
    assert_eq!(
        outcome,
        WindowOutcome::Delivered {
            through: t0() + Duration::hours(1),
            summaries: 1,
        }
    );

    let windows = h.source.viewer_windows("t1");
    assert_eq!(windows.len(), 2);
    assert_eq!(windows[0], windows[1]);
    assert_eq!(h.cursors.get("t1"), Some(t0() + Duration::hours(1)));
}

#[tokio::test]
async fn cursor_write_failure_redelivers_on_next_run() {
    let h = harness_one_hour_in();
    h.source.add_tenant("t1", t1_usage());
    h.cursors.seed("t1", t0());

    h.cursors.fail_advance(true);
    let err = h.summarizer.process_tenant_incremental("t1").await.unwrap_err();
    assert_eq!(err.stage(), "cursor");
    assert_eq!(h.cursors.get("t1"), Some(t0()));

    h.cursors.fail_advance(false);
    h.summarizer.process_tenant_incremental("t1").await.unwrap();

    let batches = h.sink.batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0][0].period, batches[1][0].period);
}

#[tokio::test]
async fn window_without_usage_advances_cursor() {
    let h = harness_one_hour_in();
    h.source.add_tenant("t1", TenantUsage::default());
    h.cursors.seed("t1", t0());

    let outcome = h.summarizer.process_tenant_incremental("t1").await.unwrap();

    assert_eq!(
        outcome,
        WindowOutcome::Empty {
            through: t0() + Duration::hours(1)
        }
    );
    assert!(h.sink.batches().is_empty());
    assert_eq!(h.cursors.get("t1"), Some(t0() + Duration::hours(1)));
}

#[tokio::test]
async fn new_tenant_starts_from_default_lookback() {
    let now = t0() + Duration::minutes(7) + Duration::seconds(12);
    let h = Harness::new(now);
    h.source.add_tenant("t1", t1_usage());

    h.summarizer.run_incremental().await.unwrap();

    let windows = h.source.viewer_windows("t1");
    assert_eq!(windows.len(), 1);
    assert_eq!(windows[0].start, now - Duration::hours(24));
    assert_eq!(windows[0].end, t0() + Duration::minutes(7));
    assert_eq!(h.cursors.get("t1"), Some(t0() + Duration::minutes(7)));
}

#[tokio::test]
async fn short_window_is_skipped_without_queries() {
    let h = Harness::new(t0() + Duration::seconds(59));
    h.source.add_tenant("t1", t1_usage());
    h.cursors.seed("t1", t0());

    let outcome = h.summarizer.process_tenant_incremental("t1").await.unwrap();

    assert_eq!(outcome, WindowOutcome::TooShort);
    assert!(h.source.viewer_windows("t1").is_empty());
    assert_eq!(h.cursors.get("t1"), Some(t0()));
}

#[tokio::test]
async fn enumeration_failure_fails_every_sweep() {
    let h = harness_one_hour_in();
    h.source.add_tenant("t1", t1_usage());
    h.source.fail_enumeration(true);

    assert!(h.summarizer.run_incremental().await.is_err());
    assert!(h.summarizer.run_hourly().await.is_err());
    assert!(h.summarizer.run_daily().await.is_err());
    assert!(h.sink.batches().is_empty());
}

#[tokio::test]
async fn tenant_failures_are_isolated() {
    let h = harness_one_hour_in();
    h.source.add_tenant("t1", t1_usage());
    h.source.add_tenant("t2", t1_usage());
    h.source.add_tenant(
        "t3",
        TenantUsage {
            fail_viewer_sessions: true,
            ..t1_usage()
        },
    );
    for tenant in ["t1", "t2", "t3"] {
        h.cursors.seed(tenant, t0());
    }
    h.sink.fail_for_tenant("t1");

    let report = h.summarizer.run_incremental().await.unwrap();

    assert_eq!(report.tenants, 3);
    assert_eq!(report.delivered, 1);
    assert_eq!(report.failed, 2);
    assert_eq!(h.cursors.get("t1"), Some(t0()));
    assert_eq!(h.cursors.get("t2"), Some(t0() + Duration::hours(1)));
    assert_eq!(h.cursors.get("t3"), Some(t0()));
    assert!(h.sink.delivered().iter().all(|s| s.tenant_id == "t2"));
}

#[tokio::test]
async fn legacy_schema_egress_still_bills() {
    let h = harness_one_hour_in();
    h.source.add_tenant("t1", t1_usage());
    h.source.require_legacy_egress("t1");
    h.cursors.seed("t1", t0());

    let report = h.summarizer.run_incremental().await.unwrap();

    assert_eq!(report.delivered, 1);
    assert_eq!(
        h.source.egress_shapes(),
        vec![SchemaShape::Current, SchemaShape::Legacy]
    );
    let delivered = h.sink.delivered();
    assert_eq!(delivered[0].egress_gb, 45.2);
    assert_eq!(delivered[0].cluster_id, "cluster-a");
}

#[tokio::test]
async fn directory_outage_bills_fallback_cluster() {
    let mut directory = MockDirectory::new();
    directory.expect_primary_cluster().returning(|_| {
        Err(billing_summarizer::BillingError::Directory(
            "unavailable".to_string(),
        ))
    });
    let h = Harness::with_directory(t0() + Duration::hours(1), directory);
    h.source.add_tenant("t1", t1_usage());
    h.cursors.seed("t1", t0());

    h.summarizer.run_incremental().await.unwrap();

    let delivered = h.sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].cluster_id, "global-primary");
}

#[tokio::test]
async fn hourly_sweep_covers_previous_hour_without_cursors() {
    let h = Harness::new(t0() + Duration::hours(1) + Duration::minutes(5));
    h.source.add_tenant("t1", t1_usage());
    h.source.add_tenant("t2", TenantUsage::default());

    let report = h.summarizer.run_hourly().await.unwrap();

    assert_eq!(report.tenants, 2);
    assert_eq!(report.delivered, 1);
    assert_eq!(report.empty, 1);
    let delivered = h.sink.delivered();
    assert_eq!(delivered[0].period_start, t0());
    assert_eq!(delivered[0].period_end, t0() + Duration::hours(1));
    assert_eq!(h.cursors.get("t1"), None);
    assert_eq!(h.cursors.get("t2"), None);
}

#[tokio::test]
async fn daily_sweep_delivery_failure_is_not_fatal() {
    let h = Harness::new(t0());
    h.source.add_tenant("t1", t1_usage());
    h.sink.fail(true);

    let report = h.summarizer.run_daily().await.unwrap();

    assert_eq!(report.failed, 1);
    let windows = h.source.viewer_windows("t1");
    assert_eq!(windows[0].duration(), Duration::days(1));
    assert_eq!(windows[0].end, t0() - Duration::hours(10));
    assert_eq!(h.cursors.get("t1"), None);
}

#[tokio::test]
async fn clock_progress_opens_next_window() {
    let h = harness_one_hour_in();
    h.source.add_tenant("t1", t1_usage());
    h.cursors.seed("t1", t0());

    h.summarizer.run_incremental().await.unwrap();
    h.clock.set(t0() + Duration::hours(2) + Duration::seconds(5));
    h.summarizer.run_incremental().await.unwrap();

    let windows = h.source.viewer_windows("t1");
    assert_eq!(windows.len(), 2);
    assert_eq!(windows[1].start, windows[0].end);
    assert_eq!(h.cursors.get("t1"), Some(t0() + Duration::hours(2)));
}

#[tokio::test]
async fn concurrent_runs_for_same_tenant_are_single_flight() {
    let h = harness_one_hour_in();
    h.source.add_tenant("t1", t1_usage());
    h.cursors.seed("t1", t0());
    let release = h.sink.hold_deliveries();

    let summarizer = h.summarizer.clone();
    let first = tokio::spawn(async move { summarizer.process_tenant_incremental("t1").await });
    h.sink.wait_until_delivering().await;

    let second = h.summarizer.process_tenant_incremental("t1").await.unwrap();
    assert_eq!(second, WindowOutcome::Busy);

    release.notify_one();
    let first = first.await.unwrap().unwrap();
    assert_eq!(
        first,
        WindowOutcome::Delivered {
            through: t0() + Duration::hours(1),
            summaries: 1,
        }
    );

    assert_eq!(h.sink.batches().len(), 1);
    assert_eq!(h.source.viewer_windows("t1").len(), 1);
    assert_eq!(h.cursors.get("t1"), Some(t0() + Duration::hours(1)));
}

#[tokio::test]
async fn hourly_rollups_are_billed_once_after_they_close() {
    let start = t0() + Duration::minutes(55);
    let h = Harness::new(start);
    h.source.add_tenant("t1", TenantUsage::default());
    // 11:00 bucket accrues 1 GB per minute until 12:00.
    h.source.add_hourly_egress("t1", t0() + Duration::hours(1), 1.0);
    h.cursors.seed("t1", start);

    let stop = t0() + Duration::hours(2) + Duration::minutes(10);
    let mut now = start;
    while now < stop {
        now = now + Duration::minutes(5);
        h.clock.set(now);
        h.summarizer.process_tenant_incremental("t1").await.unwrap();
    }

    let delivered = h.sink.delivered();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].period_start, t0() + Duration::hours(1) + Duration::minutes(55));
    assert_eq!(delivered[0].period_end, t0() + Duration::hours(2));
    let total: f64 = delivered.iter().map(|s| s.egress_gb).sum();
    assert_eq!(total, 60.0);
    assert_eq!(h.cursors.get("t1"), Some(stop));
}
