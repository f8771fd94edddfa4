//! In-process graph backend implementing the driver boundary.
//!
//! Ships with the gateway so the binary runs out of the box and the test
//! suites can exercise real commit/rollback/bookmark behavior. Sessions
//! stage writes privately and publish them atomically on commit, which
//! bumps a per-database version encoded into the minted bookmark.
//!
//! The statement dialect is deliberately tiny: `CREATE (n {..}) RETURN n`,
//! `MATCH (n {..}) RETURN n` and `UNWIND $list AS x RETURN x`, with
//! `$param` substitution in property positions. Anything else fails with a
//! statement error, which is itself useful for exercising the gateway's
//! failure paths.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::principal::Principal;

use super::{
    Bookmark, DriverError, GraphDriver, GraphSession, Node, PropertyMap, ResultRow,
    StatementCursor, Value, ValueMap,
};

pub struct MemoryGraph {
    databases: DashMap<String, Arc<Store>>,
    credentials: Option<(String, String)>,
}

#[derive(Default)]
struct Store {
    inner: RwLock<StoreInner>,
    next_node_id: AtomicU64,
}

#[derive(Default)]
struct StoreInner {
    nodes: Vec<Node>,
    version: u64,
}

impl MemoryGraph {
    /// A backend that accepts any principal.
    pub fn new() -> Self {
        Self {
            databases: DashMap::new(),
            credentials: None,
        }
    }

    /// A backend that rejects every principal except `user`/`password`.
    pub fn with_credentials(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            databases: DashMap::new(),
            credentials: Some((user.into(), password.into())),
        }
    }
}

impl Default for MemoryGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphDriver for MemoryGraph {
    async fn open_session(
        &self,
        principal: &Principal,
        database: &str,
        bookmarks: &[Bookmark],
    ) -> Result<Box<dyn GraphSession>, DriverError> {
        if let Some((user, password)) = &self.credentials {
            if principal.name() != user || principal.credential() != password {
                return Err(DriverError::AuthenticationFailed(format!(
                    "invalid credentials for '{}'",
                    principal.name()
                )));
            }
        }

        let store = self
            .databases
            .entry(database.to_string())
            .or_insert_with(|| Arc::new(Store::default()))
            .clone();

        // Commits publish synchronously in-process, so every token minted
        // here is already observable; a token ahead of the committed
        // version can only come from somewhere else.
        let current = store.inner.read().version;
        for bookmark in bookmarks {
            let version = bookmark_version(database, bookmark).ok_or_else(|| {
                DriverError::Unavailable(format!("unrecognized bookmark '{}'", bookmark))
            })?;
            if version > current {
                return Err(DriverError::Unavailable(format!(
                    "bookmark '{}' references unseen state",
                    bookmark
                )));
            }
        }

        Ok(Box::new(MemorySession {
            database: database.to_string(),
            store,
            staged: Vec::new(),
            finished: false,
        }))
    }
}

struct MemorySession {
    database: String,
    store: Arc<Store>,
    staged: Vec<Node>,
    finished: bool,
}

#[async_trait]
impl GraphSession for MemorySession {
    async fn run(
        &mut self,
        statement: &str,
        parameters: &ValueMap,
    ) -> Result<StatementCursor, DriverError> {
        if self.finished {
            return Err(DriverError::Statement("unit of work already closed".into()));
        }
        let stmt = parse_statement(statement, parameters).map_err(DriverError::Statement)?;

        let (columns, rows) = match stmt {
            Stmt::Create {
                var,
                labels,
                properties,
            } => {
                let id = self.store.next_node_id.fetch_add(1, Ordering::Relaxed) + 1;
                let node = Node {
                    id,
                    labels,
                    properties,
                };
                self.staged.push(node.clone());
                (vec![var], vec![ResultRow::new(vec![Value::Node(node)])])
            }
            Stmt::Match {
                var,
                labels,
                properties,
            } => {
                // Reads observe committed state plus this session's own
                // staged writes.
                let inner = self.store.inner.read();
                let rows = inner
                    .nodes
                    .iter()
                    .chain(self.staged.iter())
                    .filter(|node| {
                        labels.iter().all(|label| node.labels.contains(label))
                            && properties
                                .iter()
                                .all(|(key, value)| node.properties.get(key) == Some(value))
                    })
                    .map(|node| ResultRow::new(vec![Value::Node(node.clone())]))
                    .collect::<Vec<_>>();
                (vec![var], rows)
            }
            Stmt::Unwind { alias, items } => (
                vec![alias],
                items
                    .into_iter()
                    .map(|value| ResultRow::new(vec![value]))
                    .collect(),
            ),
        };

        Ok(StatementCursor {
            columns,
            rows: Box::pin(stream::iter(rows.into_iter().map(Ok::<_, DriverError>))),
        })
    }

    async fn commit(&mut self) -> Result<Bookmark, DriverError> {
        if self.finished {
            return Err(DriverError::Statement("unit of work already closed".into()));
        }
        let version = {
            let mut inner = self.store.inner.write();
            inner.nodes.append(&mut self.staged);
            inner.version += 1;
            inner.version
        };
        self.finished = true;
        tracing::debug!(database = %self.database, version, "unit of work committed");
        Ok(mint_bookmark(&self.database, version))
    }

    async fn rollback(&mut self) {
        self.staged.clear();
        self.finished = true;
        tracing::debug!(database = %self.database, "unit of work rolled back");
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        if !self.finished && !self.staged.is_empty() {
            tracing::debug!(
                database = %self.database,
                staged = self.staged.len(),
                "discarding uncommitted unit of work"
            );
        }
    }
}

fn mint_bookmark(database: &str, version: u64) -> Bookmark {
    Bookmark::new(format!(
        "{}:v{}:{}",
        database,
        version,
        Uuid::new_v4().simple()
    ))
}

fn bookmark_version(database: &str, bookmark: &Bookmark) -> Option<u64> {
    bookmark
        .as_str()
        .strip_prefix(database)?
        .strip_prefix(":v")?
        .split(':')
        .next()?
        .parse()
        .ok()
}

// ==================== Statement dialect ====================

enum Stmt {
    Create {
        var: String,
        labels: Vec<String>,
        properties: PropertyMap,
    },
    Match {
        var: String,
        labels: Vec<String>,
        properties: PropertyMap,
    },
    Unwind {
        alias: String,
        items: Vec<Value>,
    },
}

fn parse_statement(text: &str, params: &ValueMap) -> Result<Stmt, String> {
    let mut s = Scanner::new(text);
    let stmt = if s.keyword("CREATE") {
        let (var, labels, properties) = parse_node_pattern(&mut s, params)?;
        expect_return(&mut s, &var)?;
        Stmt::Create {
            var,
            labels,
            properties,
        }
    } else if s.keyword("MATCH") {
        let (var, labels, properties) = parse_node_pattern(&mut s, params)?;
        expect_return(&mut s, &var)?;
        Stmt::Match {
            var,
            labels,
            properties,
        }
    } else if s.keyword("UNWIND") {
        if !s.punct('$') {
            return Err("UNWIND expects a parameter".into());
        }
        let name = s.ident()?;
        let items = params
            .get(name)
            .ok_or_else(|| format!("missing parameter ${}", name))?
            .as_list()
            .ok_or_else(|| format!("parameter ${} must be a list", name))?
            .to_vec();
        s.expect_keyword("AS")?;
        let alias = s.ident()?.to_string();
        expect_return(&mut s, &alias)?;
        Stmt::Unwind { alias, items }
    } else {
        return Err("unsupported statement; expected CREATE, MATCH or UNWIND".into());
    };

    if !s.at_end() {
        return Err(format!("unexpected trailing input: '{}'", s.remainder()));
    }
    Ok(stmt)
}

fn parse_node_pattern(
    s: &mut Scanner<'_>,
    params: &ValueMap,
) -> Result<(String, Vec<String>, PropertyMap), String> {
    s.expect('(')?;
    let var = s.ident()?.to_string();
    let mut labels = Vec::new();
    while s.punct(':') {
        labels.push(s.ident()?.to_string());
    }
    let properties = match s.peek() {
        Some('{') | Some('$') => parse_properties(s, params)?,
        _ => PropertyMap::new(),
    };
    s.expect(')')?;
    Ok((var, labels, properties))
}

fn parse_properties(s: &mut Scanner<'_>, params: &ValueMap) -> Result<PropertyMap, String> {
    if s.punct('$') {
        let name = s.ident()?;
        let value = params
            .get(name)
            .ok_or_else(|| format!("missing parameter ${}", name))?;
        return value
            .as_map()
            .cloned()
            .ok_or_else(|| format!("parameter ${} must be a map", name));
    }

    let mut map = PropertyMap::new();
    s.expect('{')?;
    if s.punct('}') {
        return Ok(map);
    }
    loop {
        let key = s.ident()?.to_string();
        s.expect(':')?;
        let value = parse_value(s, params)?;
        map.insert(key, value);
        if s.punct(',') {
            continue;
        }
        s.expect('}')?;
        break;
    }
    Ok(map)
}

fn parse_value(s: &mut Scanner<'_>, params: &ValueMap) -> Result<Value, String> {
    if s.punct('$') {
        let name = s.ident()?;
        return params
            .get(name)
            .cloned()
            .ok_or_else(|| format!("missing parameter ${}", name));
    }
    match s.peek() {
        Some('\'') | Some('"') => s.quoted(),
        Some(c) if c.is_ascii_digit() || c == '-' => s.number(),
        _ => {
            if s.keyword("true") {
                Ok(Value::Bool(true))
            } else if s.keyword("false") {
                Ok(Value::Bool(false))
            } else if s.keyword("null") {
                Ok(Value::Null)
            } else {
                Err("expected a literal or parameter".into())
            }
        }
    }
}

fn expect_return(s: &mut Scanner<'_>, var: &str) -> Result<(), String> {
    s.expect_keyword("RETURN")?;
    let returned = s.ident()?;
    if returned != var {
        return Err(format!("unknown variable '{}' in RETURN", returned));
    }
    Ok(())
}

struct Scanner<'a> {
    rest: &'a str,
}

impl<'a> Scanner<'a> {
    fn new(input: &'a str) -> Self {
        Self { rest: input }
    }

    fn skip_ws(&mut self) {
        self.rest = self.rest.trim_start();
    }

    fn at_end(&mut self) -> bool {
        self.skip_ws();
        self.rest.is_empty()
    }

    fn remainder(&self) -> &'a str {
        self.rest.trim()
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.rest.chars().next()
    }

    fn punct(&mut self, c: char) -> bool {
        self.skip_ws();
        match self.rest.strip_prefix(c) {
            Some(stripped) => {
                self.rest = stripped;
                true
            }
            None => false,
        }
    }

    fn expect(&mut self, c: char) -> Result<(), String> {
        if self.punct(c) {
            Ok(())
        } else {
            Err(format!("expected '{}'", c))
        }
    }

    fn word(&mut self) -> Option<&'a str> {
        self.skip_ws();
        let end = self
            .rest
            .find(|ch: char| !ch.is_ascii_alphanumeric() && ch != '_')
            .unwrap_or(self.rest.len());
        if end == 0 {
            None
        } else {
            let (word, rest) = self.rest.split_at(end);
            self.rest = rest;
            Some(word)
        }
    }

    fn keyword(&mut self, kw: &str) -> bool {
        let save = self.rest;
        match self.word() {
            Some(word) if word.eq_ignore_ascii_case(kw) => true,
            _ => {
                self.rest = save;
                false
            }
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<(), String> {
        if self.keyword(kw) {
            Ok(())
        } else {
            Err(format!("expected {}", kw))
        }
    }

    fn ident(&mut self) -> Result<&'a str, String> {
        self.word().ok_or_else(|| "expected an identifier".into())
    }

    fn quoted(&mut self) -> Result<Value, String> {
        self.skip_ws();
        let mut chars = self.rest.chars();
        let quote = chars.next().ok_or_else(|| "unterminated string".to_string())?;
        let body = chars.as_str();
        let end = body
            .find(quote)
            .ok_or_else(|| "unterminated string literal".to_string())?;
        let text = &body[..end];
        self.rest = &body[end + quote.len_utf8()..];
        Ok(Value::String(text.to_string()))
    }

    fn number(&mut self) -> Result<Value, String> {
        self.skip_ws();
        let end = self
            .rest
            .char_indices()
            .find(|(i, ch)| !(ch.is_ascii_digit() || *ch == '.' || (*i == 0 && *ch == '-')))
            .map(|(i, _)| i)
            .unwrap_or(self.rest.len());
        let (text, rest) = self.rest.split_at(end);
        self.rest = rest;
        if text.contains('.') {
            text.parse()
                .map(Value::Float)
                .map_err(|_| format!("invalid number '{}'", text))
        } else {
            text.parse()
                .map(Value::Int)
                .map_err(|_| format!("invalid number '{}'", text))
        }
    }
}
