//! The value model crossing the driver boundary.
//!
//! Parameters use the closed JSON-like variant; result rows may additionally
//! carry graph-native entities (nodes, relationships, paths), which the
//! gateway core treats as opaque beyond "serializable".

use std::collections::BTreeMap;
use std::fmt;

use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};

pub type PropertyMap = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    Map(PropertyMap),
    Node(Node),
    Relationship(Relationship),
    Path(Path),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: u64,
    pub labels: Vec<String>,
    pub properties: PropertyMap,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    pub id: u64,
    pub rel_type: String,
    pub start: u64,
    pub end: u64,
    pub properties: PropertyMap,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    pub nodes: Vec<Node>,
    pub relationships: Vec<Relationship>,
}

impl Value {
    /// Converts a parsed JSON value into the closed parameter variant.
    ///
    /// The only JSON shape with no counterpart is an unsigned integer above
    /// `i64::MAX`; everything else maps structurally.
    pub fn from_json(value: serde_json::Value) -> Result<Value, String> {
        Ok(match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if n.is_u64() {
                    return Err(format!("integer {} is outside the supported range", n));
                } else if let Some(f) = n.as_f64() {
                    Value::Float(f)
                } else {
                    return Err(format!("number {} is not representable", n));
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => Value::List(
                items
                    .into_iter()
                    .map(Value::from_json)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            serde_json::Value::Object(map) => {
                let mut out = PropertyMap::new();
                for (key, item) in map {
                    out.insert(key, Value::from_json(item)?);
                }
                Value::Map(out)
            }
        })
    }

    pub fn as_map(&self) -> Option<&PropertyMap> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }
}

// Row-form serialization: entities flatten to their property maps, a path
// to the alternating property maps of its elements. Graph-form rendering
// lives with the result streamer, which needs entity identity as well.
impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::String(s) => serializer.serialize_str(s),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(map) => serialize_properties(map, serializer),
            Value::Node(node) => serialize_properties(&node.properties, serializer),
            Value::Relationship(rel) => serialize_properties(&rel.properties, serializer),
            Value::Path(path) => {
                let mut seq =
                    serializer.serialize_seq(Some(path.nodes.len() + path.relationships.len()))?;
                let mut rels = path.relationships.iter();
                for node in &path.nodes {
                    seq.serialize_element(&node.properties)?;
                    if let Some(rel) = rels.next() {
                        seq.serialize_element(&rel.properties)?;
                    }
                }
                seq.end()
            }
        }
    }
}

fn serialize_properties<S>(map: &PropertyMap, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut out = serializer.serialize_map(Some(map.len()))?;
    for (key, value) in map {
        out.serialize_entry(key, value)?;
    }
    out.end()
}

/// One row of a statement result. Column names live on the statement
/// cursor; values are positional.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub values: Vec<Value>,
}

impl ResultRow {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    /// All graph entities reachable from this row, deduplicated by id in
    /// first-seen order. Used for graph-form result rendering.
    pub fn graph_entities(&self) -> (Vec<&Node>, Vec<&Relationship>) {
        let mut nodes: Vec<&Node> = Vec::new();
        let mut rels: Vec<&Relationship> = Vec::new();
        for value in &self.values {
            collect_entities(value, &mut nodes, &mut rels);
        }
        (nodes, rels)
    }
}

fn collect_entities<'a>(
    value: &'a Value,
    nodes: &mut Vec<&'a Node>,
    rels: &mut Vec<&'a Relationship>,
) {
    match value {
        Value::Node(node) => {
            if !nodes.iter().any(|n| n.id == node.id) {
                nodes.push(node);
            }
        }
        Value::Relationship(rel) => {
            if !rels.iter().any(|r| r.id == rel.id) {
                rels.push(rel);
            }
        }
        Value::Path(path) => {
            for node in &path.nodes {
                if !nodes.iter().any(|n| n.id == node.id) {
                    nodes.push(node);
                }
            }
            for rel in &path.relationships {
                if !rels.iter().any(|r| r.id == rel.id) {
                    rels.push(rel);
                }
            }
        }
        Value::List(items) => {
            for item in items {
                collect_entities(item, nodes, rels);
            }
        }
        Value::Map(map) => {
            for item in map.values() {
                collect_entities(item, nodes, rels);
            }
        }
        _ => {}
    }
}

/// Opaque causal token minted by the database when a unit of work commits.
///
/// The gateway never inspects the contents; it only stores tokens, hands
/// them back on session establishment, and supersedes them on commit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Bookmark(String);

impl Bookmark {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Bookmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
