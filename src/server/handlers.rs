use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    response::{IntoResponse, Response},
    Extension, Json,
};

use crate::error::GatewayError;
use crate::principal::Principal;
use crate::query::streamer::{render_buffered, streaming_response};
use crate::query::{Mode, QueryEvaluator, ResultHandle, StatementBatch};

#[derive(Clone)]
pub struct AppState {
    pub evaluator: Arc<QueryEvaluator>,
    pub default_database: String,
}

// ==================== Query Handlers ====================

pub async fn run_batch(
    State(state): State<AppState>,
    Path(database): Path<String>,
    Extension(principal): Extension<Principal>,
    body: Bytes,
) -> Result<Response, GatewayError> {
    dispatch(state, principal, database, Mode::Buffered, body).await
}

pub async fn run_batch_default(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let database = state.default_database.clone();
    dispatch(state, principal, database, Mode::Buffered, body).await
}

pub async fn stream_batch(
    State(state): State<AppState>,
    Path(database): Path<String>,
    Extension(principal): Extension<Principal>,
    body: Bytes,
) -> Result<Response, GatewayError> {
    dispatch(state, principal, database, Mode::Streaming, body).await
}

pub async fn stream_batch_default(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let database = state.default_database.clone();
    dispatch(state, principal, database, Mode::Streaming, body).await
}

async fn dispatch(
    state: AppState,
    principal: Principal,
    database: String,
    mode: Mode,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let batch = StatementBatch::parse(&body)?;
    let handle = state
        .evaluator
        .execute(&principal, &database, batch, mode)
        .await?;
    Ok(match handle {
        ResultHandle::Buffered(results) => Json(render_buffered(results)).into_response(),
        ResultHandle::Streaming(events) => streaming_response(events),
    })
}
