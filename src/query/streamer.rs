//! Wire rendering of batch results.
//!
//! Streaming mode frames the same document shape as buffered mode
//! (`{"results": [...], "errors": [...]}`) but emits it chunk by chunk, one
//! row per chunk, without ever knowing the total result size. The generator
//! only advances when the transport polls for the next chunk, so row
//! production is governed by the slower of database yield rate and socket
//! writability. Bytes already flushed cannot be rewound; a mid-stream
//! failure therefore closes the open frames and appends a terminal entry in
//! `"errors"` that a well-formed client recognizes.

use std::convert::Infallible;

use axum::body::{Body, Bytes};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use futures::{Stream, StreamExt};
use serde_json::json;

use crate::driver::{Node, Relationship, ResultRow};
use crate::query::batch::ResultShape;
use crate::query::evaluator::{EventStream, StatementResult, StreamEvent};

/// The fully materialized response document for buffered mode.
pub fn render_buffered(results: Vec<StatementResult>) -> serde_json::Value {
    let results: Vec<_> = results
        .iter()
        .map(|result| {
            json!({
                "columns": result.columns,
                "data": result
                    .rows
                    .iter()
                    .map(|row| data_entry(row, result.shape))
                    .collect::<Vec<_>>(),
            })
        })
        .collect();
    json!({ "results": results, "errors": [] })
}

/// A chunked 200 response fed by the evaluator's event stream.
pub fn streaming_response(events: EventStream) -> Response {
    (
        [(header::CONTENT_TYPE, "application/json")],
        Body::from_stream(frame_events(events)),
    )
        .into_response()
}

fn frame_events(events: EventStream) -> impl Stream<Item = Result<Bytes, Infallible>> {
    async_stream::stream! {
        let mut events = events;
        let mut wrote_statement = false;
        let mut wrote_row = false;
        let mut in_statement = false;
        let mut shape = ResultShape::Row;
        let mut error_entry = None;

        yield Ok(Bytes::from_static(b"{\"results\":["));

        while let Some(event) = events.next().await {
            match event {
                StreamEvent::BeginStatement { columns, shape: stmt_shape } => {
                    let mut frame = String::new();
                    if wrote_statement {
                        frame.push(',');
                    }
                    frame.push_str("{\"columns\":");
                    frame.push_str(&json!(columns).to_string());
                    frame.push_str(",\"data\":[");
                    wrote_statement = true;
                    in_statement = true;
                    wrote_row = false;
                    shape = stmt_shape;
                    yield Ok(Bytes::from(frame));
                }
                StreamEvent::Row(row) => {
                    let mut frame = String::new();
                    if wrote_row {
                        frame.push(',');
                    }
                    frame.push_str(&data_entry(&row, shape).to_string());
                    wrote_row = true;
                    yield Ok(Bytes::from(frame));
                }
                StreamEvent::EndStatement => {
                    in_statement = false;
                    yield Ok(Bytes::from_static(b"]}"));
                }
                StreamEvent::Committed => {}
                StreamEvent::Failed(err) => {
                    tracing::warn!(error = %err, "terminating stream with in-band error marker");
                    if in_statement {
                        in_statement = false;
                        yield Ok(Bytes::from_static(b"]}"));
                    }
                    error_entry = Some(err.error_entry());
                    break;
                }
            }
        }

        let mut tail = String::from("],\"errors\":[");
        if let Some(entry) = error_entry {
            tail.push_str(&entry.to_string());
        }
        tail.push_str("]}");
        yield Ok(Bytes::from(tail));
    }
}

fn data_entry(row: &ResultRow, shape: ResultShape) -> serde_json::Value {
    match shape {
        ResultShape::Row => json!({ "row": row.values }),
        ResultShape::Graph => {
            let (nodes, rels) = row.graph_entities();
            json!({
                "graph": {
                    "nodes": nodes.iter().map(|n| node_json(n)).collect::<Vec<_>>(),
                    "relationships": rels
                        .iter()
                        .map(|r| relationship_json(r))
                        .collect::<Vec<_>>(),
                }
            })
        }
    }
}

fn node_json(node: &Node) -> serde_json::Value {
    json!({
        "id": node.id.to_string(),
        "labels": node.labels,
        "properties": node.properties,
    })
}

fn relationship_json(rel: &Relationship) -> serde_json::Value {
    json!({
        "id": rel.id.to_string(),
        "type": rel.rel_type,
        "startNode": rel.start.to_string(),
        "endNode": rel.end.to_string(),
        "properties": rel.properties,
    })
}
