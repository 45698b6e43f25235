use entityql_ast::{Join, SelectStmt, SqlExpr};
use smol_str::SmolStr;

/// Everything a dialect needs to build the nested-relation JSON fragment
/// described in spec §4.1 step 8. The planner builds the inner `SELECT`
/// (table, where/orderBy/skip/take/distinct already applied, correlated to
/// the parent via `inner.where_`) and hands it to the dialect purely to
/// decide *how* to aggregate it into JSON.
pub struct RelationSelectionRequest {
    /// Alias the inner select's `FROM` is bound to; json field expressions
    /// in `json_fields` are written against this alias.
    pub child_alias: SmolStr,
    pub inner: SelectStmt,
    pub json_fields: Vec<(SmolStr, SqlExpr)>,
    /// `true` for to-many relations (aggregate into a JSON array), `false`
    /// for a singleton to-one (a single JSON object or `NULL`).
    pub to_many: bool,
    /// The alias the outer query should project the result under.
    pub result_alias: SmolStr,
}

/// How the built fragment attaches to the outer query.
pub enum RelationSelectionResult {
    /// Postgres-like: a `LEFT JOIN LATERAL (...) AS alias ON true`; the
    /// planner appends `join` to the outer `SelectStmt::joins` and projects
    /// `value` (a reference into the lateral alias).
    Lateral { join: Join, value: SqlExpr },
    /// SQLite-like: a correlated scalar subquery usable directly as a
    /// projection item, no join required.
    Inline { value: SqlExpr },
}
