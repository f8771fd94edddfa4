use std::sync::Arc;

use axum::{middleware, routing::post, Router};
use tower_http::trace::TraceLayer;

use crate::bookmark::BookmarkManager;
use crate::driver::GraphDriver;
use crate::query::QueryEvaluator;

use super::auth::auth_middleware;
use super::handlers::{
    run_batch, run_batch_default, stream_batch, stream_batch_default, AppState,
};

pub fn create_router(
    driver: Arc<dyn GraphDriver>,
    bookmarks: Arc<BookmarkManager>,
    default_database: &str,
) -> Router {
    let state = AppState {
        evaluator: Arc::new(QueryEvaluator::new(driver, bookmarks)),
        default_database: default_database.to_string(),
    };

    Router::new()
        // Per-database routes
        .route("/db/{database}/query", post(run_batch))
        .route("/db/{database}/query/stream", post(stream_batch))
        // Default-database twins
        .route("/query", post(run_batch_default))
        .route("/query/stream", post(stream_batch_default))
        .layer(middleware::from_fn(auth_middleware))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
