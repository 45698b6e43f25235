use smol_str::SmolStr;

use crate::expr::SqlExpr;
use crate::stmt::Stmt;

/// The thing a `FROM`/`JOIN`/`USING` clause names: a bare table (rewritten
/// to `physical AS alias` by the Name-Mapping Rewriter), or a derived table
/// (subquery, already "mapped").
#[derive(Debug, Clone, PartialEq)]
pub enum FromSource {
    Table { expr: SqlExpr, alias: Option<SmolStr> },
    Subquery { stmt: Box<Stmt>, alias: SmolStr },
}

impl FromSource {
    pub fn table(name: impl Into<SmolStr>, alias: Option<SmolStr>) -> Self {
        FromSource::Table { expr: SqlExpr::table(name), alias }
    }

    pub fn alias(&self) -> Option<&str> {
        match self {
            FromSource::Table { alias, .. } => alias.as_deref(),
            FromSource::Subquery { alias, .. } => Some(alias.as_str()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    /// Postgres-like lateral joins used to build nested relation JSON
    /// (spec §4.1 step 8, Postgres-like branch).
    LeftLateral,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub source: FromSource,
    pub on: Option<SqlExpr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

impl SortDir {
    pub fn reversed(self) -> Self {
        match self {
            SortDir::Asc => SortDir::Desc,
            SortDir::Desc => SortDir::Asc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullsOrder {
    First,
    Last,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderByItem {
    pub expr: SqlExpr,
    pub dir: SortDir,
    pub nulls: Option<NullsOrder>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistinctKind {
    None,
    All,
    /// `DISTINCT ON (cols)` — only emitted when the dialect supports it
    /// (spec §4.6 `supportsDistinctOn`); otherwise the planner falls back
    /// to in-memory dedup and leaves this `None`.
    On,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnConflictAction {
    DoNothing,
    /// `ON CONFLICT DO UPDATE`; the Policy Rewriter ANDs the `update`
    /// policy into the carried `Update`'s `WHERE` (spec §4.4).
    DoUpdate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OnConflict {
    pub target_columns: Vec<SmolStr>,
    pub action: OnConflictAction,
    /// Present only for `DoUpdate`: column assignments plus an optional
    /// `WHERE`, which the Policy Rewriter rewrites in place.
    pub update_assignments: Vec<(SmolStr, SqlExpr)>,
    pub update_where: Option<SqlExpr>,
}
