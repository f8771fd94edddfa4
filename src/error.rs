use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;

/// Every failure the gateway can surface, across parsing, session
/// establishment, statement execution and streaming.
///
/// The evaluator only classifies; mapping onto transport responses happens
/// exclusively in [`IntoResponse`] below and in the result streamer's
/// terminal error marker.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Malformed request: {0}")]
    MalformedSyntax(String),

    #[error("Statement batch is empty")]
    EmptyBatch,

    #[error("Invalid parameter type: {0}")]
    InvalidParameterType(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Session unavailable: {0}")]
    SessionUnavailable(String),

    #[error("Statement {index} failed: {cause}")]
    QueryFailed { index: usize, cause: String },

    #[error("Timed out waiting on the database")]
    Timeout,

    #[error("Stream aborted: {0}")]
    StreamAborted(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    /// Stable machine-readable code carried in the wire-level error entry.
    pub fn wire_code(&self) -> &'static str {
        match self {
            GatewayError::MalformedSyntax(_) => "Gateway.Request.MalformedSyntax",
            GatewayError::EmptyBatch => "Gateway.Request.EmptyBatch",
            GatewayError::InvalidParameterType(_) => "Gateway.Request.InvalidParameterType",
            GatewayError::Unauthorized(_) => "Gateway.Security.Unauthorized",
            GatewayError::Forbidden(_) => "Gateway.Security.Forbidden",
            GatewayError::SessionUnavailable(_) => "Gateway.Database.SessionUnavailable",
            GatewayError::QueryFailed { .. } => "Gateway.Statement.ExecutionFailed",
            GatewayError::Timeout => "Gateway.Database.Timeout",
            GatewayError::StreamAborted(_) => "Gateway.Stream.Aborted",
            GatewayError::Internal(_) => "Gateway.Internal",
        }
    }

    /// The error entry placed in a response body's `"errors"` array.
    ///
    /// Statement-level failures carry the offending statement index so a
    /// client can tell which part of the batch was rejected.
    pub fn error_entry(&self) -> serde_json::Value {
        let mut entry = serde_json::json!({
            "code": self.wire_code(),
            "message": self.to_string(),
        });
        if let GatewayError::QueryFailed { index, .. } = self {
            entry["statement"] = serde_json::json!(index);
        }
        entry
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            GatewayError::MalformedSyntax(_)
            | GatewayError::EmptyBatch
            | GatewayError::InvalidParameterType(_) => StatusCode::BAD_REQUEST,
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden(_) => StatusCode::FORBIDDEN,
            GatewayError::SessionUnavailable(_) => StatusCode::BAD_GATEWAY,
            // The batch rolled back before any byte was sent; statement
            // failures are reported in-body, like the streaming mode's
            // terminal marker.
            GatewayError::QueryFailed { .. } => StatusCode::OK,
            GatewayError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::StreamAborted(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = serde_json::json!({
            "results": [],
            "errors": [self.error_entry()],
        });

        (status, Json(body)).into_response()
    }
}
