//! lrx-etl - Streaming ETL normalization engine
//!
//! Consumes xAPI learning-activity events from the durable queue, resolves
//! learner/verb/activity identities, and writes the normalized relational
//! schema. A periodic reconciler re-drives anything the queue path missed
//! and publishes drift reports. The HTTP surface is read-only status.

pub mod api;
pub mod dead_letter;
pub mod error;
pub mod identity;
pub mod normalizer;
pub mod queue;
pub mod raw_store;
pub mod reconciler;
pub mod worker;

use axum::routing::get;
use axum::Router;
use lrx_common::events::EventBus;
use sqlx::SqlitePool;
use tower_http::trace::TraceLayer;

/// Shared application state for the HTTP surface
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub event_bus: EventBus,
}

impl AppState {
    pub fn new(db: SqlitePool, event_bus: EventBus) -> Self {
        Self { db, event_bus }
    }
}

/// Build the status router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(api::health))
        .route("/drift", get(api::drift_reports))
        .route("/deadletters", get(api::dead_letters))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
