//! The Driver interface the core consumes (spec §6.1) and the handful of
//! value types that cross that boundary. The core never talks SQL text to
//! a driver directly — a [`Compiler`] turns a rewritten [`Stmt`] into a
//! [`CompiledQuery`] first.

use std::fmt;

use async_trait::async_trait;
use entityql_ast::{Stmt, Value};
use entityql_errors::EngineResult;
use futures::stream::BoxStream;
use indexmap::IndexMap;
use smol_str::SmolStr;

/// A single fetched row, keyed by the (already name-mapped-back) logical
/// field name the projection asked for.
pub type Row = IndexMap<SmolStr, serde_json::Value>;

/// A batch of rows as handed back by [`Connection::stream_query`] (spec
/// §6.1 "async iterator of row batches").
pub type RowBatch = Vec<Row>;

/// Opaque key a [`Compiler`] assigns a compiled statement, carried through
/// to the driver for caching/prepared-statement reuse. The core never
/// inspects it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryId(pub SmolStr);

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The output of a [`Compiler`] (spec §6.2): SQL text, its positional bind
/// parameters, and the [`QueryId`] the driver may key a prepared statement
/// on.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<Value>,
    pub query_id: QueryId,
}

/// Turns a fully rewritten [`Stmt`] into SQL text + bind parameters. The
/// core ships no implementation (spec §1 exclusions: "no SQL string
/// compiler"); callers plug in a dialect-specific one.
pub trait Compiler: Send + Sync {
    fn compile(&self, stmt: &Stmt) -> EngineResult<CompiledQuery>;
}

/// `executeQuery`'s return shape (spec §6.1).
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    pub num_affected_rows: u64,
}

/// Isolation level for `beginTransaction(level)` (spec §6.1). Defaults to
/// `RepeatableRead` (spec §5: "Isolation defaults to REPEATABLE READ").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    #[default]
    RepeatableRead,
    Serializable,
}

/// One acquired connection, possibly inside a transaction. `Send` so an
/// owned `Box<dyn Connection>` can be held across an `.await` inside the
/// Executor.
#[async_trait]
pub trait Connection: Send {
    async fn begin_transaction(&mut self, level: IsolationLevel) -> EngineResult<()>;
    async fn commit(&mut self) -> EngineResult<()>;
    async fn rollback(&mut self) -> EngineResult<()>;

    async fn execute_query(&mut self, query: &CompiledQuery) -> EngineResult<QueryResult>;

    /// Streamed variant for result sets too large to buffer (spec §6.1).
    /// The default forwards to `execute_query` and yields a single batch —
    /// drivers that can actually stream override this.
    fn stream_query<'c>(&'c mut self, query: &'c CompiledQuery) -> BoxStream<'c, EngineResult<RowBatch>> {
        Box::pin(futures::stream::once(async move { self.execute_query(query).await.map(|r| r.rows) }))
    }

    async fn release(self: Box<Self>);
}

/// The driver itself: connection lifecycle only, per spec §6.1
/// (`init`/`acquireConnection`/`releaseConnection`/`destroy`); everything
/// per-statement lives on [`Connection`].
#[async_trait]
pub trait Driver: Send + Sync {
    async fn init(&self) -> EngineResult<()>;
    async fn acquire_connection(&self) -> EngineResult<Box<dyn Connection>>;
    async fn destroy(&self) -> EngineResult<()>;
}
