//! Delivery of usage summaries to the billing service.
//!
//! Two transports implement [`DeliverySink`]: a Kafka producer keyed by
//! tenant (per-tenant ordering) and a synchronous HTTP ingest call. Either
//! reports success only when every summary in the batch was accepted.

mod http;
mod kafka;

pub use http::HttpIngestSink;
pub use kafka::KafkaSink;

use crate::config::{DeliveryConfig, DeliveryMode};
use crate::error::Result;
use crate::models::UsageSummary;
use async_trait::async_trait;
use std::sync::Arc;

/// Value of the `source` header / envelope field on everything this service emits.
pub const DELIVERY_SOURCE: &str = "billing-summarizer";

#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Publish `batch`; `Ok(())` means every summary was confirmed.
    async fn deliver(&self, batch: &[UsageSummary]) -> Result<()>;

    fn name(&self) -> &'static str;
}

/// Build the sink selected by `BILLING_DELIVERY_MODE`.
pub fn sink_from_config(config: &DeliveryConfig) -> Result<Arc<dyn DeliverySink>> {
    Ok(match config.mode {
        DeliveryMode::Kafka => Arc::new(KafkaSink::new(config)?),
        DeliveryMode::Http => Arc::new(HttpIngestSink::new(config)?),
    })
}
