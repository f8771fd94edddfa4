//! The capability boundary to the graph database.
//!
//! The gateway core consumes these traits and never looks behind them: a
//! driver hands out short-lived sessions, a session runs statements inside
//! exactly one unit of work and finishes with a commit (minting a bookmark)
//! or a rollback. Dropping a session with an uncommitted unit of work MUST
//! discard its staged effects; the gateway relies on this for cancellation
//! when a client goes away mid-stream.

pub mod memory;
pub mod types;

use std::collections::BTreeMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

use crate::principal::Principal;

pub use memory::MemoryGraph;
pub use types::{Bookmark, Node, Path, PropertyMap, Relationship, ResultRow, Value};

pub type ValueMap = BTreeMap<String, Value>;

/// Lazy, single-pass, forward-only sequence of result rows. Finite, not
/// restartable; pulling the next row may suspend the caller.
pub type RowStream = Pin<Box<dyn Stream<Item = Result<ResultRow, DriverError>> + Send>>;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("database unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Statement(String),

    #[error("connection lost: {0}")]
    ConnectionLost(String),
}

/// The result of running one statement: column names up front, rows pulled
/// lazily.
pub struct StatementCursor {
    pub columns: Vec<String>,
    pub rows: RowStream,
}

#[async_trait]
pub trait GraphDriver: Send + Sync + 'static {
    /// Opens a session bound to one principal and one database, seeded with
    /// the causal tokens the session must observe before its first read.
    async fn open_session(
        &self,
        principal: &Principal,
        database: &str,
        bookmarks: &[Bookmark],
    ) -> Result<Box<dyn GraphSession>, DriverError>;
}

/// One unit of work. Statements run in call order and see the effects of
/// earlier statements in the same session.
#[async_trait]
pub trait GraphSession: Send {
    async fn run(
        &mut self,
        statement: &str,
        parameters: &ValueMap,
    ) -> Result<StatementCursor, DriverError>;

    /// Commits the unit of work and mints the bookmark that makes it
    /// causally visible to later sessions.
    async fn commit(&mut self) -> Result<Bookmark, DriverError>;

    /// Discards the unit of work. Also implied by dropping the session.
    async fn rollback(&mut self);
}
