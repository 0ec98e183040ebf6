//! Maintenance tracking backend: machines, maintenance events with steps,
//! scheduled maintenance and a per-machine history feed, served from one
//! action-dispatched JSON endpoint.

use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod models;
pub mod payload;
pub mod store;
pub mod telemetry;

pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use store::MaintStore;

/// Builds the HTTP surface. `api_path` is where the action endpoint lives.
pub fn build_router(store: MaintStore, api_path: &str) -> Router {
    Router::new()
        .route(
            api_path,
            get(handlers::list_machines)
                .post(handlers::post_action)
                .put(handlers::put_action)
                .delete(handlers::delete_action)
                .fallback(handlers::method_not_allowed),
        )
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(store)
}
