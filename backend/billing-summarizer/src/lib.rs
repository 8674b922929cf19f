//! Billing summarizer: turns per-tenant streaming, storage, processing and API
//! usage into billing usage summaries and delivers them downstream.

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod services;
pub mod utils;

pub use error::{BillingError, Result};
