#![allow(dead_code)]

pub mod fakes;

use billing_summarizer::config::SummarizerConfig;
use billing_summarizer::services::BillingSummarizer;
use chrono::{DateTime, TimeZone, Utc};
use fakes::{FakeClock, FakeCursorStore, FakeMetricSource, MockDirectory, RecordingSink};
use std::sync::Arc;

/// 2024-04-02T10:00:00Z, an hour boundary used as the first cursor position.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, 2, 10, 0, 0).unwrap()
}

/// A summarizer wired to in-memory collaborators.
pub struct Harness {
    pub source: Arc<FakeMetricSource>,
    pub sink: Arc<RecordingSink>,
    pub cursors: Arc<FakeCursorStore>,
    pub clock: Arc<FakeClock>,
    pub summarizer: Arc<BillingSummarizer>,
}

impl Harness {
    /// Directory that knows every tenant's primary cluster as `cluster-a`.
    pub fn new(now: DateTime<Utc>) -> Self {
        let mut directory = MockDirectory::new();
        directory
            .expect_primary_cluster()
            .returning(|_| Ok(Some("cluster-a".to_string())));
        Self::with_directory(now, directory)
    }

    pub fn with_directory(now: DateTime<Utc>, directory: MockDirectory) -> Self {
        let source = Arc::new(FakeMetricSource::default());
        let sink = Arc::new(RecordingSink::default());
        let cursors = Arc::new(FakeCursorStore::default());
        let clock = Arc::new(FakeClock::new(now));

        let summarizer = Arc::new(BillingSummarizer::new(
            source.clone(),
            Arc::new(directory),
            sink.clone(),
            cursors.clone(),
            clock.clone(),
            SummarizerConfig::default(),
        ));

        Self {
            source,
            sink,
            cursors,
            clock,
            summarizer,
        }
    }
}
