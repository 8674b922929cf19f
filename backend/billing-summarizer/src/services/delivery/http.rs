use super::{DeliverySink, DELIVERY_SOURCE};
use crate::config::DeliveryConfig;
use crate::error::{BillingError, Result};
use crate::models::{UsageIngestRequest, UsageIngestResponse, UsageSummary};
use async_trait::async_trait;
use chrono::Utc;
use std::time::Duration;
use tracing::{info, warn};

/// Posts the whole batch to the billing service's ingest endpoint.
pub struct HttpIngestSink {
    client: reqwest::Client,
    url: String,
    service_token: String,
}

impl HttpIngestSink {
    pub fn new(config: &DeliveryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.ingest_timeout_secs))
            .build()
            .map_err(|e| BillingError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: config.ingest_url.clone(),
            service_token: config.service_token.clone(),
        })
    }
}

#[async_trait]
impl DeliverySink for HttpIngestSink {
    async fn deliver(&self, batch: &[UsageSummary]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let body = UsageIngestRequest {
            usage_summaries: batch.to_vec(),
            source: DELIVERY_SOURCE.to_string(),
            timestamp: Utc::now(),
        };

        let mut request = self.client.post(&self.url).json(&body);
        if !self.service_token.is_empty() {
            request = request.bearer_auth(&self.service_token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(BillingError::Delivery(format!(
                "billing ingest returned {}: {}",
                status, text
            )));
        }

        let ack: UsageIngestResponse = response.json().await?;
        if !ack.success || ack.processed_count != batch.len() {
            warn!(
                summary_count = batch.len(),
                processed_count = ack.processed_count,
                error = ?ack.error,
                "Billing ingest did not confirm the full batch"
            );
            return Err(BillingError::Delivery(format!(
                "billing ingest processed {} of {} summaries: {}",
                ack.processed_count,
                batch.len(),
                ack.error.unwrap_or_else(|| "no error detail".to_string())
            )));
        }

        info!(
            summary_count = batch.len(),
            processed_count = ack.processed_count,
            "Billing ingest accepted usage summaries"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
