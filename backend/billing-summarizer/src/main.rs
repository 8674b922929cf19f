use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use billing_summarizer::config::Config;
use billing_summarizer::handlers::register_routes;
use billing_summarizer::services::scheduler::spawn_sweeps;
use billing_summarizer::services::{
    sink_from_config, BillingSummarizer, ClickHouseQuerySource, GrpcTenantDirectory,
    PgCursorStore,
};
use billing_summarizer::utils::SystemClock;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,billing_summarizer=debug".into());
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[actix_web::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    tracing::info!("Starting billing-summarizer");

    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(
        delivery_mode = ?config.delivery.mode,
        clickhouse_url = %config.clickhouse.url,
        tenant_directory = %config.directory.grpc_url,
        "Configuration loaded"
    );

    let db_pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url)
        .await
        .context("Failed to create database pool")?;

    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations completed successfully");

    let source = Arc::new(ClickHouseQuerySource::new(&config.clickhouse));
    let directory = Arc::new(
        GrpcTenantDirectory::connect_lazy(&config.directory)
            .context("Failed to configure tenant directory client")?,
    );
    let sink = sink_from_config(&config.delivery).context("Failed to configure delivery sink")?;
    tracing::info!(sink = sink.name(), "Delivery sink ready");

    let summarizer = Arc::new(BillingSummarizer::new(
        source,
        directory,
        sink,
        Arc::new(PgCursorStore::new(db_pool.clone())),
        Arc::new(SystemClock),
        config.summarizer.clone(),
    ));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let sweeps = spawn_sweeps(
        Arc::clone(&summarizer),
        Duration::from_secs(config.summarizer.incremental_interval_secs),
        &shutdown_tx,
    );

    let http_port = config.http_port;
    tracing::info!("Starting HTTP server on 0.0.0.0:{}", http_port);

    let server_summarizer = Arc::clone(&summarizer);
    let server_result = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(Arc::clone(&server_summarizer)))
            .configure(register_routes)
    })
    .bind(("0.0.0.0", http_port))
    .context("Failed to bind HTTP server")?
    .run()
    .await;

    tracing::info!("HTTP server stopped, shutting down billing sweeps");
    let _ = shutdown_tx.send(());
    for handle in sweeps {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Billing sweep task panicked");
        }
    }
    db_pool.close().await;

    server_result.context("HTTP server error")
}
