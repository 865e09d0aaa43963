//! Concord engine library interface
//!
//! Reconciles extraction results from several independent producers into
//! one versioned consensus record per segment, and serves the review gate
//! over HTTP.

pub mod alignment;
pub mod api;
pub mod arbitration;
pub mod config;
pub mod db;
pub mod error;
pub mod matching;
pub mod producers;
pub mod review;
pub mod taxonomy;
pub mod types;
pub mod validators;
pub mod workflow;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

use crate::taxonomy::Taxonomy;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Target taxonomy corrections are checked against
    pub taxonomy: Arc<Taxonomy>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(db: SqlitePool, taxonomy: Taxonomy) -> Self {
        Self {
            db,
            taxonomy: Arc::new(taxonomy),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::record_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
