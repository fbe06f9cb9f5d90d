use axum::{
    routing::{get, post},
    Router,
};
use parking_lot::RwLock;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::index::Index;
use crate::metrics::IndexMetrics;

use super::handlers::*;

/// Application state shared across all handlers
pub struct AppState {
    pub index: RwLock<Index>,
    pub metrics: Arc<IndexMetrics>,
}

impl AppState {
    pub fn new(index: Index, metrics: Arc<IndexMetrics>) -> Self {
        Self {
            index: RwLock::new(index),
            metrics,
        }
    }
}

/// Create the HTTP router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Index operations
        .route("/search", post(search))
        .route("/insert", post(insert))
        .route("/flush", post(flush))
        .route("/stats", get(stats))
        // Health and metrics
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
