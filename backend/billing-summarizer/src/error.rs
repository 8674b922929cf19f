use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    /// A single metric query failed. Degrades to zero unless the query is foundational.
    #[error("Query error ({query}): {message}")]
    Query { query: &'static str, message: String },

    #[error("ClickHouse error: {0}")]
    ClickHouse(String),

    #[error("Tenant directory error: {0}")]
    Directory(String),

    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("Cursor store error: {0}")]
    CursorStore(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BillingError {
    /// Short stage label used in logs and the failure counter.
    pub fn stage(&self) -> &'static str {
        match self {
            BillingError::Query { .. } | BillingError::ClickHouse(_) => "build",
            BillingError::Directory(_) => "directory",
            BillingError::Delivery(_) => "deliver",
            BillingError::CursorStore(_) => "cursor",
            BillingError::Timeout(_) => "timeout",
            BillingError::Config(_) => "config",
            BillingError::Serialization(_) => "internal",
        }
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

impl ResponseError for BillingError {
    fn error_response(&self) -> HttpResponse {
        let code = self.status_code();
        HttpResponse::build(code).json(ErrorResponse {
            error: self.to_string(),
            code: code.as_u16(),
        })
    }

    fn status_code(&self) -> StatusCode {
        match self {
            BillingError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            BillingError::ClickHouse(_) | BillingError::Query { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::CursorStore(err.to_string())
    }
}

impl From<clickhouse::error::Error> for BillingError {
    fn from(err: clickhouse::error::Error) -> Self {
        BillingError::ClickHouse(err.to_string())
    }
}

impl From<reqwest::Error> for BillingError {
    fn from(err: reqwest::Error) -> Self {
        BillingError::Delivery(err.to_string())
    }
}

impl From<tonic::Status> for BillingError {
    fn from(status: tonic::Status) -> Self {
        BillingError::Directory(format!("{}: {}", status.code(), status.message()))
    }
}
