//! Parsed representation of a request body's statement batch.

use serde::Deserialize;

use crate::driver::{Value, ValueMap};
use crate::error::{GatewayError, GatewayResult};

/// How a statement's rows are rendered in the response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultShape {
    /// Positional values; entities flatten to their property maps.
    #[default]
    Row,
    /// Per-row `{"nodes": [...], "relationships": [...]}` objects carrying
    /// entity identity and metadata.
    Graph,
}

/// One statement with its parameters and rendering annotation.
#[derive(Debug, Clone)]
pub struct AnnotatedStatement {
    pub text: String,
    pub parameters: ValueMap,
    pub shape: ResultShape,
}

/// Ordered, non-empty sequence of statements executed as one unit of work.
/// Later statements may depend on side effects of earlier ones.
#[derive(Debug)]
pub struct StatementBatch {
    statements: Vec<AnnotatedStatement>,
}

#[derive(Debug, Deserialize)]
struct WireBatch {
    #[serde(default)]
    statements: Vec<WireStatement>,
}

#[derive(Debug, Deserialize)]
struct WireStatement {
    statement: String,
    #[serde(default)]
    parameters: serde_json::Map<String, serde_json::Value>,
    #[serde(rename = "resultDataContents", default)]
    result_data_contents: Vec<String>,
}

impl StatementBatch {
    /// Parses and validates a raw request body. No side effects.
    pub fn parse(raw: &[u8]) -> GatewayResult<Self> {
        let wire: WireBatch = serde_json::from_slice(raw)
            .map_err(|e| GatewayError::MalformedSyntax(e.to_string()))?;

        if wire.statements.is_empty() {
            return Err(GatewayError::EmptyBatch);
        }

        let mut statements = Vec::with_capacity(wire.statements.len());
        for stmt in wire.statements {
            if stmt.statement.trim().is_empty() {
                return Err(GatewayError::MalformedSyntax(
                    "statement text must not be empty".to_string(),
                ));
            }

            let mut parameters = ValueMap::new();
            for (key, value) in stmt.parameters {
                let value = Value::from_json(value).map_err(|detail| {
                    GatewayError::InvalidParameterType(format!("parameter '{}': {}", key, detail))
                })?;
                parameters.insert(key, value);
            }

            statements.push(AnnotatedStatement {
                text: stmt.statement,
                parameters,
                shape: parse_shape(&stmt.result_data_contents)?,
            });
        }

        Ok(Self { statements })
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn statements(&self) -> &[AnnotatedStatement] {
        &self.statements
    }

    pub fn into_statements(self) -> Vec<AnnotatedStatement> {
        self.statements
    }
}

fn parse_shape(contents: &[String]) -> GatewayResult<ResultShape> {
    let mut shape = None;
    for entry in contents {
        let parsed = match entry.to_ascii_lowercase().as_str() {
            "row" => ResultShape::Row,
            "graph" => ResultShape::Graph,
            other => {
                return Err(GatewayError::MalformedSyntax(format!(
                    "unknown result shape '{}'",
                    other
                )))
            }
        };
        // First recognized annotation wins.
        shape.get_or_insert(parsed);
    }
    Ok(shape.unwrap_or_default())
}
