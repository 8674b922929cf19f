use super::{DeliverySink, DELIVERY_SOURCE};
use crate::config::DeliveryConfig;
use crate::error::{BillingError, Result};
use crate::models::UsageSummary;
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use std::time::Duration;
use tracing::{debug, error, info};

/// Publishes one message per summary, keyed by tenant id.
pub struct KafkaSink {
    producer: FutureProducer,
    topic: String,
    timeout: Duration,
}

impl KafkaSink {
    pub fn new(config: &DeliveryConfig) -> Result<Self> {
        info!(
            "Initializing billing Kafka producer (brokers: {}, topic: {})",
            config.kafka_brokers, config.kafka_topic
        );

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.kafka_brokers)
            .set("message.timeout.ms", config.kafka_timeout_ms.to_string())
            .set("request.timeout.ms", config.kafka_timeout_ms.to_string())
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("max.in.flight.requests.per.connection", "5")
            .set("compression.type", "lz4")
            .set("linger.ms", "10")
            .create()
            .map_err(|e| {
                error!("Failed to create Kafka producer: {}", e);
                BillingError::Config(format!("Kafka producer creation failed: {}", e))
            })?;

        Ok(Self {
            producer,
            topic: config.kafka_topic.clone(),
            timeout: Duration::from_millis(config.kafka_timeout_ms),
        })
    }

    async fn publish(&self, summary: &UsageSummary) -> Result<()> {
        let payload = serde_json::to_string(summary)?;
        let headers = OwnedHeaders::new()
            .insert(Header {
                key: "source",
                value: Some(DELIVERY_SOURCE),
            })
            .insert(Header {
                key: "type",
                value: Some("usage_summary"),
            });

        let record = FutureRecord::to(&self.topic)
            .key(summary.tenant_id.as_str())
            .payload(&payload)
            .headers(headers);

        self.producer
            .send(record, self.timeout)
            .await
            .map_err(|(e, _)| BillingError::Delivery(format!("Kafka send failed: {}", e)))?;

        debug!(
            tenant_id = %summary.tenant_id,
            cluster_id = %summary.cluster_id,
            topic = %self.topic,
            "Published usage summary"
        );
        Ok(())
    }
}

#[async_trait]
impl DeliverySink for KafkaSink {
    async fn deliver(&self, batch: &[UsageSummary]) -> Result<()> {
        let mut delivered = 0usize;
        let mut last_error = None;

        for summary in batch {
            match self.publish(summary).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    error!(
                        tenant_id = %summary.tenant_id,
                        cluster_id = %summary.cluster_id,
                        error = %e,
                        "Failed to produce usage summary"
                    );
                    last_error = Some(e);
                }
            }
        }

        info!(
            summary_count = batch.len(),
            processed_count = delivered,
            "Produced usage summaries to Kafka"
        );

        match last_error {
            None => Ok(()),
            Some(e) => Err(BillingError::Delivery(format!(
                "{} of {} summaries failed, last error: {}",
                batch.len() - delivered,
                batch.len(),
                e
            ))),
        }
    }

    fn name(&self) -> &'static str {
        "kafka"
    }
}
