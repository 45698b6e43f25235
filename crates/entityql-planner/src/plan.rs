//! The planner's output shape (spec §5): either a single `SELECT` or a
//! pipeline of dependent stages the Executor dispatches, running siblings
//! with no unresolved `depends_on` edge between them concurrently.

use entityql_ast::{SqlExpr, Stmt, Value};
use smol_str::SmolStr;

pub type StageId = u32;

/// Reserved function name the Executor Pipeline recognizes and substitutes
/// before compiling a stage's SQL: "the value of `column` returned by stage
/// `source_stage`". Modeled as an ordinary `SqlExpr::Function` call rather
/// than a new AST variant — the core already treats function names as an
/// open set (`array_contains`, `coalesce`, ...), and a nested-write pipeline
/// needing a not-yet-known id is exactly that kind of engine-internal
/// escape hatch.
pub const DEFERRED_FN: &str = "$deferred";

pub fn deferred_ref(source_stage: StageId, column: impl Into<SmolStr>) -> SqlExpr {
    SqlExpr::call(DEFERRED_FN, vec![SqlExpr::val(Value::Int(source_stage as i64)), SqlExpr::val(Value::Str(column.into()))])
}

/// `Some((stage, column))` if `expr` is a `deferred_ref` marker.
pub fn as_deferred_ref(expr: &SqlExpr) -> Option<(StageId, &str)> {
    let SqlExpr::Function { name, args } = expr else { return None };
    if name != DEFERRED_FN {
        return None;
    }
    let [SqlExpr::Value(Value::Int(stage)), SqlExpr::Value(Value::Str(col))] = args.as_slice() else { return None };
    Some((*stage as StageId, col.as_str()))
}

#[derive(Debug, Clone)]
pub struct Stage {
    pub id: StageId,
    pub ast: Stmt,
    /// Stage ids that must execute (and, for inserts, have their
    /// `RETURNING` read) before this one can run.
    pub depends_on: Vec<StageId>,
    /// True when only this stage's `RETURNING` ids feed a later stage and
    /// the Policy Rewriter's read-back protocol still owns the final shape
    /// the caller sees.
    pub returning_ids_only: bool,
    /// `connectOrCreate`: if this stage is a connect-resolution `SELECT`
    /// that returns zero rows, the Executor runs `fallback` instead (a
    /// nested `create` pipeline) and uses its id going forward.
    pub fallback: Option<StageId>,
    /// Human-readable tag for logging/tracing (e.g. `"Post.create"`,
    /// `"Post.categories.connect"`).
    pub label: SmolStr,
}

/// What the Operation Planner hands the Executor Pipeline for one public
/// client call.
#[derive(Debug, Clone)]
pub enum PlannedQuery {
    Select(Box<Stmt>),
    Pipeline(Vec<Stage>),
}

impl PlannedQuery {
    pub fn single(stmt: Stmt) -> Self {
        PlannedQuery::Select(Box::new(stmt))
    }
}

/// Assigns ever-increasing stage ids within one planning pass. Plain
/// monotonic counter; the planner owns one per top-level operation.
#[derive(Default)]
pub struct StageBuilder {
    next_id: StageId,
    stages: Vec<Stage>,
}

impl StageBuilder {
    pub fn new() -> Self {
        StageBuilder::default()
    }

    pub fn push(&mut self, ast: Stmt, depends_on: Vec<StageId>, returning_ids_only: bool, label: impl Into<SmolStr>) -> StageId {
        self.push_with_fallback(ast, depends_on, returning_ids_only, None, label)
    }

    pub fn push_with_fallback(
        &mut self,
        ast: Stmt,
        depends_on: Vec<StageId>,
        returning_ids_only: bool,
        fallback: Option<StageId>,
        label: impl Into<SmolStr>,
    ) -> StageId {
        let id = self.next_id;
        self.next_id += 1;
        self.stages.push(Stage { id, ast, depends_on, returning_ids_only, fallback, label: label.into() });
        id
    }

    pub fn finish(self) -> Vec<Stage> {
        self.stages
    }

    /// Wires an already-pushed `SELECT` stage's `fallback` to another
    /// already-pushed stage, used by `connectOrCreate` once the nested
    /// create's stages have been pushed onto the same builder.
    pub fn set_fallback(&mut self, select_stage: StageId, fallback: StageId) {
        if let Some(stage) = self.stages.iter_mut().find(|s| s.id == select_stage) {
            stage.fallback = Some(fallback);
        }
    }
}
