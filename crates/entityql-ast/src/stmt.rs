use smol_str::SmolStr;

use crate::clause::{DistinctKind, FromSource, Join, OnConflict, OrderByItem};
use crate::expr::SqlExpr;

/// The tagged AST root (spec §2.3). Immutable; every rewriter consumes a
/// tree by value and returns a new one rather than mutating in place.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Select(SelectStmt),
    Insert(InsertStmt),
    Update(UpdateStmt),
    Delete(DeleteStmt),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectStmt {
    pub projection: Vec<SqlExpr>,
    pub from: FromSource,
    pub joins: Vec<Join>,
    pub where_: Option<SqlExpr>,
    pub group_by: Vec<SqlExpr>,
    pub having: Option<SqlExpr>,
    pub order_by: Vec<OrderByItem>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub distinct: DistinctKind,
    pub distinct_on: Vec<SqlExpr>,
    /// The `-- $$context:{...}` trailer (spec §6.5), carried on the tree so
    /// every rewriter stage sees the same model/operation tag.
    pub context: QueryContext,
}

impl SelectStmt {
    pub fn new(from: FromSource, context: QueryContext) -> Self {
        SelectStmt {
            projection: Vec::new(),
            from,
            joins: Vec::new(),
            where_: None,
            group_by: Vec::new(),
            having: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            distinct: DistinctKind::None,
            distinct_on: Vec::new(),
            context,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertStmt {
    pub table: SqlExpr,
    pub columns: Vec<SmolStr>,
    pub rows: Vec<Vec<SqlExpr>>,
    pub on_conflict: Option<OnConflict>,
    pub returning: Option<Vec<SqlExpr>>,
    pub context: QueryContext,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStmt {
    pub table: SqlExpr,
    pub assignments: Vec<(SmolStr, SqlExpr)>,
    /// `UPDATE ... FROM ...` (Postgres-like) used when the update's
    /// predicate needs to join across tables (spec §4.4 "if the query has
    /// a FROM (join)").
    pub from: Option<FromSource>,
    pub where_: Option<SqlExpr>,
    pub returning: Option<Vec<SqlExpr>>,
    /// `LIMIT` on the update itself, only valid where
    /// `supportsUpdateWithLimit` (spec §4.6); otherwise the planner rewrites
    /// to the id-subselect form instead of setting this.
    pub limit: Option<i64>,
    pub context: QueryContext,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStmt {
    pub table: SqlExpr,
    pub using: Option<FromSource>,
    pub where_: Option<SqlExpr>,
    pub returning: Option<Vec<SqlExpr>>,
    pub limit: Option<i64>,
    pub context: QueryContext,
}

/// Observability trailer content (spec §6.5). The core appends this as a
/// SQL comment; it never reads it back.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryContext {
    pub model: SmolStr,
    pub operation: SmolStr,
}

impl QueryContext {
    pub fn new(model: impl Into<SmolStr>, operation: impl Into<SmolStr>) -> Self {
        QueryContext { model: model.into(), operation: operation.into() }
    }
}
