//! Batch execution against the driver boundary.
//!
//! One session and one unit of work per batch. Buffered mode materializes
//! every row before returning; streaming mode hands back a lazy event
//! sequence that owns the session, defers the commit until the consumer has
//! drained every row, and rolls back if the consumer goes away early
//! (dropping the sequence drops the session, whose contract discards the
//! uncommitted unit of work).

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::time::timeout;

use crate::bookmark::BookmarkManager;
use crate::driver::{
    Bookmark, DriverError, GraphDriver, GraphSession, ResultRow, StatementCursor,
};
use crate::error::{GatewayError, GatewayResult};
use crate::principal::Principal;
use crate::query::batch::{ResultShape, StatementBatch};

const DEFAULT_DB_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Buffered,
    Streaming,
}

/// A fully materialized statement result (buffered mode).
#[derive(Debug)]
pub struct StatementResult {
    pub columns: Vec<String>,
    pub rows: Vec<ResultRow>,
    pub shape: ResultShape,
}

/// Events of a streaming execution, in order: for each statement a
/// `BeginStatement`, its rows, an `EndStatement`; then exactly one
/// `Committed` or `Failed`. A `Failed` event is always terminal and the
/// unit of work has already been rolled back when it is observed.
pub enum StreamEvent {
    BeginStatement {
        columns: Vec<String>,
        shape: ResultShape,
    },
    Row(ResultRow),
    EndStatement,
    Committed,
    Failed(GatewayError),
}

pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

pub enum ResultHandle {
    Buffered(Vec<StatementResult>),
    Streaming(EventStream),
}

pub struct QueryEvaluator {
    driver: Arc<dyn GraphDriver>,
    bookmarks: Arc<BookmarkManager>,
    db_timeout: Duration,
}

impl QueryEvaluator {
    pub fn new(driver: Arc<dyn GraphDriver>, bookmarks: Arc<BookmarkManager>) -> Self {
        Self {
            driver,
            bookmarks,
            db_timeout: DEFAULT_DB_TIMEOUT,
        }
    }

    /// Budget for any single wait on the driver (session establishment,
    /// statement dispatch, row pull, commit).
    pub fn with_timeout(mut self, db_timeout: Duration) -> Self {
        self.db_timeout = db_timeout;
        self
    }

    pub fn bookmarks(&self) -> &Arc<BookmarkManager> {
        &self.bookmarks
    }

    /// Executes `batch` as one unit of work. Session establishment happens
    /// here in both modes, so auth and availability failures surface
    /// before any response byte exists.
    pub async fn execute(
        &self,
        principal: &Principal,
        database: &str,
        batch: StatementBatch,
        mode: Mode,
    ) -> GatewayResult<ResultHandle> {
        let seeded = self.bookmarks.current(database);
        let session = timeout(
            self.db_timeout,
            self.driver.open_session(principal, database, &seeded),
        )
        .await
        .map_err(|_| GatewayError::Timeout)?
        .map_err(classify_session_error)?;

        tracing::debug!(
            database,
            principal = principal.name(),
            statements = batch.len(),
            mode = ?mode,
            "executing batch"
        );

        match mode {
            Mode::Buffered => self
                .run_buffered(session, database, seeded, batch)
                .await
                .map(ResultHandle::Buffered),
            Mode::Streaming => Ok(ResultHandle::Streaming(self.run_streaming(
                session,
                database.to_string(),
                seeded,
                batch,
            ))),
        }
    }

    async fn run_buffered(
        &self,
        mut session: Box<dyn GraphSession>,
        database: &str,
        seeded: Vec<Bookmark>,
        batch: StatementBatch,
    ) -> GatewayResult<Vec<StatementResult>> {
        let mut results = Vec::with_capacity(batch.len());

        for (index, stmt) in batch.into_statements().into_iter().enumerate() {
            let cursor = match timeout(
                self.db_timeout,
                session.run(&stmt.text, &stmt.parameters),
            )
            .await
            {
                Err(_) => {
                    session.rollback().await;
                    return Err(GatewayError::Timeout);
                }
                Ok(Err(e)) => {
                    session.rollback().await;
                    return Err(classify_statement_error(index, e));
                }
                Ok(Ok(cursor)) => cursor,
            };

            let StatementCursor { columns, mut rows } = cursor;
            let mut collected = Vec::new();
            loop {
                match timeout(self.db_timeout, rows.next()).await {
                    Err(_) => {
                        session.rollback().await;
                        return Err(GatewayError::Timeout);
                    }
                    Ok(None) => break,
                    Ok(Some(Err(e))) => {
                        session.rollback().await;
                        return Err(classify_statement_error(index, e));
                    }
                    Ok(Some(Ok(row))) => collected.push(row),
                }
            }

            results.push(StatementResult {
                columns,
                rows: collected,
                shape: stmt.shape,
            });
        }

        match timeout(self.db_timeout, session.commit()).await {
            Err(_) => {
                session.rollback().await;
                Err(GatewayError::Timeout)
            }
            Ok(Err(e)) => {
                session.rollback().await;
                Err(GatewayError::SessionUnavailable(e.to_string()))
            }
            Ok(Ok(bookmark)) => {
                self.bookmarks.record(database, &seeded, bookmark);
                Ok(results)
            }
        }
    }

    fn run_streaming(
        &self,
        session: Box<dyn GraphSession>,
        database: String,
        seeded: Vec<Bookmark>,
        batch: StatementBatch,
    ) -> EventStream {
        let bookmarks = Arc::clone(&self.bookmarks);
        let db_timeout = self.db_timeout;

        Box::pin(async_stream::stream! {
            let mut session = session;

            for (index, stmt) in batch.into_statements().into_iter().enumerate() {
                let cursor = match timeout(
                    db_timeout,
                    session.run(&stmt.text, &stmt.parameters),
                )
                .await
                {
                    Err(_) => {
                        session.rollback().await;
                        yield StreamEvent::Failed(GatewayError::Timeout);
                        return;
                    }
                    Ok(Err(e)) => {
                        session.rollback().await;
                        yield StreamEvent::Failed(classify_statement_error(index, e));
                        return;
                    }
                    Ok(Ok(cursor)) => cursor,
                };

                let StatementCursor { columns, mut rows } = cursor;
                yield StreamEvent::BeginStatement { columns, shape: stmt.shape };

                loop {
                    match timeout(db_timeout, rows.next()).await {
                        Err(_) => {
                            session.rollback().await;
                            yield StreamEvent::Failed(GatewayError::Timeout);
                            return;
                        }
                        Ok(None) => break,
                        Ok(Some(Err(e))) => {
                            session.rollback().await;
                            yield StreamEvent::Failed(classify_statement_error(index, e));
                            return;
                        }
                        Ok(Some(Ok(row))) => yield StreamEvent::Row(row),
                    }
                }

                yield StreamEvent::EndStatement;
            }

            // Commit only after the consumer has drained every row; an
            // abandoned stream never reaches this point and the dropped
            // session discards the unit of work.
            match timeout(db_timeout, session.commit()).await {
                Err(_) => {
                    session.rollback().await;
                    yield StreamEvent::Failed(GatewayError::Timeout);
                }
                Ok(Err(e)) => {
                    session.rollback().await;
                    yield StreamEvent::Failed(GatewayError::SessionUnavailable(e.to_string()));
                }
                Ok(Ok(bookmark)) => {
                    bookmarks.record(&database, &seeded, bookmark);
                    yield StreamEvent::Committed;
                }
            }
        })
    }
}

fn classify_session_error(error: DriverError) -> GatewayError {
    match error {
        DriverError::AuthenticationFailed(msg) => GatewayError::Unauthorized(msg),
        other => GatewayError::SessionUnavailable(other.to_string()),
    }
}

fn classify_statement_error(index: usize, error: DriverError) -> GatewayError {
    match error {
        DriverError::Statement(cause) => {
            tracing::warn!(index, %cause, "statement failed, rolling back batch");
            GatewayError::QueryFailed { index, cause }
        }
        other => GatewayError::SessionUnavailable(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{MemoryGraph, Value, ValueMap};
    use async_trait::async_trait;
    use futures::stream;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn batch(body: serde_json::Value) -> StatementBatch {
        StatementBatch::parse(body.to_string().as_bytes()).expect("batch")
    }

    fn evaluator(driver: Arc<dyn GraphDriver>) -> QueryEvaluator {
        QueryEvaluator::new(driver, Arc::new(BookmarkManager::new()))
    }

    fn principal() -> Principal {
        Principal::new("neo4j", "pw")
    }

    async fn buffered(
        evaluator: &QueryEvaluator,
        database: &str,
        body: serde_json::Value,
    ) -> GatewayResult<Vec<StatementResult>> {
        match evaluator
            .execute(&principal(), database, batch(body), Mode::Buffered)
            .await?
        {
            ResultHandle::Buffered(results) => Ok(results),
            ResultHandle::Streaming(_) => unreachable!("asked for buffered"),
        }
    }

    #[tokio::test]
    async fn test_buffered_create_records_bookmark() {
        let evaluator = evaluator(Arc::new(MemoryGraph::new()));

        let results = buffered(
            &evaluator,
            "db",
            json!({"statements": [
                {"statement": "CREATE (n $props) RETURN n", "parameters": {"props": {"name": "My Node"}}}
            ]}),
        )
        .await
        .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].columns, vec!["n"]);
        assert_eq!(results[0].rows.len(), 1);
        assert_eq!(evaluator.bookmarks().current("db").len(), 1);
    }

    #[tokio::test]
    async fn test_read_your_writes_across_executions() {
        let evaluator = evaluator(Arc::new(MemoryGraph::new()));

        buffered(
            &evaluator,
            "db",
            json!({"statements": [
                {"statement": "CREATE (n {name: 'A'}) RETURN n"}
            ]}),
        )
        .await
        .unwrap();

        let results = buffered(
            &evaluator,
            "db",
            json!({"statements": [{"statement": "MATCH (n) RETURN n"}]}),
        )
        .await
        .unwrap();
        assert_eq!(results[0].rows.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_statement_rolls_back_whole_batch() {
        let evaluator = evaluator(Arc::new(MemoryGraph::new()));

        let err = buffered(
            &evaluator,
            "db",
            json!({"statements": [
                {"statement": "CREATE (n {name: 'A'}) RETURN n"},
                {"statement": "THIS IS NOT A STATEMENT"}
            ]}),
        )
        .await
        .unwrap_err();

        match err {
            GatewayError::QueryFailed { index, .. } => assert_eq!(index, 1),
            other => panic!("expected QueryFailed, got {:?}", other),
        }
        assert!(evaluator.bookmarks().current("db").is_empty());

        // Statement 0 would have succeeded in isolation; atomicity means
        // its effect is gone too.
        let results = buffered(
            &evaluator,
            "db",
            json!({"statements": [{"statement": "MATCH (n) RETURN n"}]}),
        )
        .await
        .unwrap();
        assert!(results[0].rows.is_empty());
    }

    #[tokio::test]
    async fn test_streaming_and_buffered_rows_are_identical() {
        let driver: Arc<dyn GraphDriver> = Arc::new(MemoryGraph::new());
        let evaluator = evaluator(driver);
        let body = json!({"statements": [
            {"statement": "CREATE (n {name: 'A'}) RETURN n"},
            {"statement": "UNWIND $xs AS x RETURN x", "parameters": {"xs": [1, 2, 3]}}
        ]});

        let buffered_rows: Vec<Vec<ResultRow>> = buffered(&evaluator, "db", body.clone())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.rows)
            .collect();

        let handle = evaluator
            .execute(&principal(), "db", batch(body), Mode::Streaming)
            .await
            .unwrap();
        let mut events = match handle {
            ResultHandle::Streaming(events) => events,
            ResultHandle::Buffered(_) => unreachable!(),
        };

        let mut streamed: Vec<Vec<ResultRow>> = Vec::new();
        let mut committed = false;
        while let Some(event) = events.next().await {
            match event {
                StreamEvent::BeginStatement { .. } => streamed.push(Vec::new()),
                StreamEvent::Row(row) => streamed.last_mut().unwrap().push(row),
                StreamEvent::EndStatement => {}
                StreamEvent::Committed => committed = true,
                StreamEvent::Failed(err) => panic!("unexpected failure: {}", err),
            }
        }

        assert!(committed);
        // Both batches created one node each, so only row content of the
        // UNWIND statement is directly comparable; the CREATE rows differ
        // by node id but not by shape.
        assert_eq!(streamed.len(), buffered_rows.len());
        assert_eq!(streamed[1], buffered_rows[1]);
        assert_eq!(streamed[0].len(), buffered_rows[0].len());
    }

    #[tokio::test]
    async fn test_streaming_failure_after_rows_rolls_back() {
        let evaluator = evaluator(Arc::new(MemoryGraph::new()));

        let handle = evaluator
            .execute(
                &principal(),
                "db",
                batch(json!({"statements": [
                    {"statement": "CREATE (n {name: 'A'}) RETURN n"},
                    {"statement": "NONSENSE"}
                ]})),
                Mode::Streaming,
            )
            .await
            .unwrap();
        let mut events = match handle {
            ResultHandle::Streaming(events) => events,
            ResultHandle::Buffered(_) => unreachable!(),
        };

        let mut saw_failure = false;
        while let Some(event) = events.next().await {
            if let StreamEvent::Failed(GatewayError::QueryFailed { index, .. }) = event {
                assert_eq!(index, 1);
                saw_failure = true;
            }
        }
        assert!(saw_failure);
        assert!(evaluator.bookmarks().current("db").is_empty());

        let results = buffered(
            &evaluator,
            "db",
            json!({"statements": [{"statement": "MATCH (n) RETURN n"}]}),
        )
        .await
        .unwrap();
        assert!(results[0].rows.is_empty());
    }

    #[tokio::test]
    async fn test_dropping_stream_cancels_unit_of_work() {
        let evaluator = evaluator(Arc::new(MemoryGraph::new()));

        let handle = evaluator
            .execute(
                &principal(),
                "db",
                batch(json!({"statements": [
                    {"statement": "CREATE (n {name: 'A'}) RETURN n"}
                ]})),
                Mode::Streaming,
            )
            .await
            .unwrap();
        let mut events = match handle {
            ResultHandle::Streaming(events) => events,
            ResultHandle::Buffered(_) => unreachable!(),
        };

        // Consume the statement header and the row, then walk away before
        // the commit event.
        assert!(matches!(
            events.next().await,
            Some(StreamEvent::BeginStatement { .. })
        ));
        assert!(matches!(events.next().await, Some(StreamEvent::Row(_))));
        drop(events);

        assert!(evaluator.bookmarks().current("db").is_empty());
        let results = buffered(
            &evaluator,
            "db",
            json!({"statements": [{"statement": "MATCH (n) RETURN n"}]}),
        )
        .await
        .unwrap();
        assert!(results[0].rows.is_empty());
    }

    // Driver producing rows on demand, counting how many were ever pulled.
    struct CountingDriver {
        produced: Arc<AtomicUsize>,
        total: i64,
    }

    struct CountingSession {
        produced: Arc<AtomicUsize>,
        total: i64,
    }

    #[async_trait]
    impl GraphDriver for CountingDriver {
        async fn open_session(
            &self,
            _principal: &Principal,
            _database: &str,
            _bookmarks: &[Bookmark],
        ) -> Result<Box<dyn GraphSession>, DriverError> {
            Ok(Box::new(CountingSession {
                produced: Arc::clone(&self.produced),
                total: self.total,
            }))
        }
    }

    #[async_trait]
    impl GraphSession for CountingSession {
        async fn run(
            &mut self,
            _statement: &str,
            _parameters: &ValueMap,
        ) -> Result<StatementCursor, DriverError> {
            let produced = Arc::clone(&self.produced);
            let rows =
                stream::iter(0..self.total).map(move |i| -> Result<ResultRow, DriverError> {
                    produced.fetch_add(1, Ordering::SeqCst);
                    Ok(ResultRow::new(vec![Value::Int(i)]))
                });
            Ok(StatementCursor {
                columns: vec!["x".to_string()],
                rows: Box::pin(rows),
            })
        }

        async fn commit(&mut self) -> Result<Bookmark, DriverError> {
            Ok(Bookmark::new("counting:v1"))
        }

        async fn rollback(&mut self) {}
    }

    #[tokio::test]
    async fn test_unconsumed_stream_pulls_no_rows() {
        let produced = Arc::new(AtomicUsize::new(0));
        let evaluator = evaluator(Arc::new(CountingDriver {
            produced: Arc::clone(&produced),
            total: 100_000,
        }));

        let handle = evaluator
            .execute(
                &principal(),
                "db",
                batch(json!({"statements": [{"statement": "anything"}]})),
                Mode::Streaming,
            )
            .await
            .unwrap();
        let mut events = match handle {
            ResultHandle::Streaming(events) => events,
            ResultHandle::Buffered(_) => unreachable!(),
        };

        // Demand only a handful of events; row production must track
        // demand instead of racing ahead.
        for _ in 0..6 {
            events.next().await;
        }
        let pulled = produced.load(Ordering::SeqCst);
        assert!(pulled <= 6, "driver produced {} rows for 6 polls", pulled);

        drop(events);
        assert!(evaluator.bookmarks().current("db").is_empty());
    }

    // Driver that never answers; used to exercise the timeout path.
    struct HangingDriver;
    struct HangingSession;

    #[async_trait]
    impl GraphDriver for HangingDriver {
        async fn open_session(
            &self,
            _principal: &Principal,
            _database: &str,
            _bookmarks: &[Bookmark],
        ) -> Result<Box<dyn GraphSession>, DriverError> {
            Ok(Box::new(HangingSession))
        }
    }

    #[async_trait]
    impl GraphSession for HangingSession {
        async fn run(
            &mut self,
            _statement: &str,
            _parameters: &ValueMap,
        ) -> Result<StatementCursor, DriverError> {
            futures::future::pending().await
        }

        async fn commit(&mut self) -> Result<Bookmark, DriverError> {
            futures::future::pending().await
        }

        async fn rollback(&mut self) {}
    }

    #[tokio::test]
    async fn test_database_timeout_is_classified() {
        let evaluator = evaluator(Arc::new(HangingDriver))
            .with_timeout(Duration::from_millis(20));

        let err = buffered(
            &evaluator,
            "db",
            json!({"statements": [{"statement": "anything"}]}),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, GatewayError::Timeout));
        assert!(evaluator.bookmarks().current("db").is_empty());
    }

    #[tokio::test]
    async fn test_auth_rejection_is_unauthorized() {
        let evaluator = evaluator(Arc::new(MemoryGraph::with_credentials("neo4j", "right")));

        let err = evaluator
            .execute(
                &Principal::new("neo4j", "wrong"),
                "db",
                batch(json!({"statements": [{"statement": "MATCH (n) RETURN n"}]})),
                Mode::Buffered,
            )
            .await
            .err();
        assert!(matches!(err, Some(GatewayError::Unauthorized(_))));
    }
}
