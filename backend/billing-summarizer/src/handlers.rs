//! HTTP surface: health, metrics and manual sweep triggers.

use crate::error::BillingError;
use crate::metrics::serve_metrics;
use crate::services::BillingSummarizer;
use actix_web::{web, HttpResponse};
use std::sync::Arc;
use tracing::info;

pub fn register_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(|| async { "OK" }))
        .route("/metrics", web::get().to(serve_metrics))
        .service(
            web::scope("/internal/billing")
                .route("/hourly", web::post().to(trigger_hourly))
                .route("/daily", web::post().to(trigger_daily))
                .route("/incremental", web::post().to(trigger_incremental)),
        );
}

/// POST /internal/billing/hourly
pub async fn trigger_hourly(
    summarizer: web::Data<Arc<BillingSummarizer>>,
) -> Result<HttpResponse, BillingError> {
    info!("Manual hourly billing sweep requested");
    let report = summarizer.run_hourly().await?;
    Ok(HttpResponse::Ok().json(report))
}

/// POST /internal/billing/daily
pub async fn trigger_daily(
    summarizer: web::Data<Arc<BillingSummarizer>>,
) -> Result<HttpResponse, BillingError> {
    info!("Manual daily billing sweep requested");
    let report = summarizer.run_daily().await?;
    Ok(HttpResponse::Ok().json(report))
}

/// POST /internal/billing/incremental
pub async fn trigger_incremental(
    summarizer: web::Data<Arc<BillingSummarizer>>,
) -> Result<HttpResponse, BillingError> {
    info!("Manual incremental billing sweep requested");
    let report = summarizer.run_incremental().await?;
    Ok(HttpResponse::Ok().json(report))
}
