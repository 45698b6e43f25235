//! An in-memory [`Driver`]/[`Compiler`] pair for exercising the Executor
//! without a real database. Gated behind `test-util` so it can also be
//! reused from the facade crate's integration tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use entityql_ast::Stmt;
use entityql_errors::EngineResult;
use smol_str::SmolStr;

use crate::driver::{CompiledQuery, Compiler, Connection, Driver, IsolationLevel, QueryId, QueryResult, Row};

/// A scripted answer for one call to `execute_query`. Matched in call
/// order, not by statement shape — tests line these up with the stages
/// they expect the Executor to run.
#[derive(Debug, Clone, Default)]
pub struct ScriptedResult {
    pub rows: Vec<Row>,
    pub num_affected_rows: u64,
}

impl From<Vec<Row>> for ScriptedResult {
    fn from(rows: Vec<Row>) -> Self {
        let num_affected_rows = rows.len() as u64;
        ScriptedResult { rows, num_affected_rows }
    }
}

struct Shared {
    script: Mutex<std::collections::VecDeque<ScriptedResult>>,
    calls: Mutex<Vec<String>>,
    tx_depth: AtomicU64,
}

/// Plays back a fixed queue of [`ScriptedResult`]s, one per
/// `execute_query` call, and records the statements it was asked to run
/// so a test can assert on them afterwards. Its mutable state lives behind
/// an `Arc` so a `MockConnection` can own a handle to it independent of the
/// `&self` borrow `Driver::acquire_connection` is called through.
pub struct MockDriver {
    shared: Arc<Shared>,
}

impl MockDriver {
    pub fn new(script: impl IntoIterator<Item = ScriptedResult>) -> Self {
        MockDriver {
            shared: Arc::new(Shared {
                script: Mutex::new(script.into_iter().collect()),
                calls: Mutex::new(Vec::new()),
                tx_depth: AtomicU64::new(0),
            }),
        }
    }

    /// The SQL text of every `execute_query` call so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.shared.calls.lock().expect("mock driver mutex poisoned").clone()
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn init(&self) -> EngineResult<()> {
        Ok(())
    }

    async fn acquire_connection(&self) -> EngineResult<Box<dyn Connection>> {
        Ok(Box::new(MockConnection { shared: self.shared.clone() }))
    }

    async fn destroy(&self) -> EngineResult<()> {
        Ok(())
    }
}

struct MockConnection {
    shared: Arc<Shared>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn begin_transaction(&mut self, _level: IsolationLevel) -> EngineResult<()> {
        self.shared.tx_depth.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(&mut self) -> EngineResult<()> {
        self.shared.tx_depth.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&mut self) -> EngineResult<()> {
        self.shared.tx_depth.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    async fn execute_query(&mut self, query: &CompiledQuery) -> EngineResult<QueryResult> {
        self.shared.calls.lock().expect("mock driver mutex poisoned").push(query.sql.clone());
        let next = self.shared.script.lock().expect("mock driver mutex poisoned").pop_front().unwrap_or_default();
        Ok(QueryResult { rows: next.rows, num_affected_rows: next.num_affected_rows })
    }

    async fn release(self: Box<Self>) {}
}

/// A `Compiler` that does not actually produce dialect SQL — it renders a
/// debug form of the tree, good enough for a [`MockDriver`]-backed test to
/// assert *that* a query ran and in what order, without needing a real
/// dialect compiler wired in.
pub struct DebugCompiler;

impl Compiler for DebugCompiler {
    fn compile(&self, stmt: &Stmt) -> EngineResult<CompiledQuery> {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        Ok(CompiledQuery { sql: format!("{stmt:?}"), params: Vec::new(), query_id: QueryId(SmolStr::new(format!("q{id}"))) })
    }
}
