//! Resolves [`entityql_planner::deferred_ref`] markers left in a stage's
//! AST against the actual rows a prior stage returned, right before that
//! stage is compiled and sent to the driver.

use entityql_ast::{DeleteStmt, FromSource, InsertStmt, Join, SelectStmt, SqlExpr, Stmt, UpdateStmt, Value as AstValue};
use entityql_errors::{EngineError, EngineResult};
use entityql_planner::{as_deferred_ref, StageId};
use indexmap::IndexMap;

use crate::driver::QueryResult;

/// Every stage whose output a later stage might reference, keyed by the
/// id it was pushed with. A fallback stage's result is additionally stored
/// under the *select* stage's own id (spec: "Stage.fallback... substitutes
/// into the select stage's own slot regardless of which branch ran").
pub type StageResults = IndexMap<StageId, QueryResult>;

pub fn substitute_deferred(stmt: Stmt, results: &StageResults) -> EngineResult<Stmt> {
    match stmt {
        Stmt::Select(s) => Ok(Stmt::Select(substitute_select(s, results)?)),
        Stmt::Insert(s) => Ok(Stmt::Insert(substitute_insert(s, results)?)),
        Stmt::Update(s) => Ok(Stmt::Update(substitute_update(s, results)?)),
        Stmt::Delete(s) => Ok(Stmt::Delete(substitute_delete(s, results)?)),
    }
}

fn substitute_select(mut sel: SelectStmt, results: &StageResults) -> EngineResult<SelectStmt> {
    sel.from = substitute_from(sel.from, results)?;
    let mut joins = Vec::with_capacity(sel.joins.len());
    for j in sel.joins {
        joins.push(substitute_join(j, results)?);
    }
    sel.joins = joins;
    sel.projection = sel.projection.into_iter().map(|e| substitute_expr(e, results)).collect::<EngineResult<_>>()?;
    sel.where_ = sel.where_.map(|w| substitute_expr(w, results)).transpose()?;
    sel.group_by = sel.group_by.into_iter().map(|e| substitute_expr(e, results)).collect::<EngineResult<_>>()?;
    sel.having = sel.having.map(|h| substitute_expr(h, results)).transpose()?;
    Ok(sel)
}

fn substitute_insert(mut ins: InsertStmt, results: &StageResults) -> EngineResult<InsertStmt> {
    let mut rows = Vec::with_capacity(ins.rows.len());
    for row in ins.rows {
        rows.push(row.into_iter().map(|e| substitute_expr(e, results)).collect::<EngineResult<_>>()?);
    }
    ins.rows = rows;
    ins.returning = ins.returning.map(|r| r.into_iter().map(|e| substitute_expr(e, results)).collect()).transpose()?;
    Ok(ins)
}

fn substitute_update(mut upd: UpdateStmt, results: &StageResults) -> EngineResult<UpdateStmt> {
    upd.assignments = upd
        .assignments
        .into_iter()
        .map(|(c, e)| Ok((c, substitute_expr(e, results)?)))
        .collect::<EngineResult<_>>()?;
    if let Some(from) = upd.from.take() {
        upd.from = Some(substitute_from(from, results)?);
    }
    upd.where_ = upd.where_.map(|w| substitute_expr(w, results)).transpose()?;
    upd.returning = upd.returning.map(|r| r.into_iter().map(|e| substitute_expr(e, results)).collect()).transpose()?;
    Ok(upd)
}

fn substitute_delete(mut del: DeleteStmt, results: &StageResults) -> EngineResult<DeleteStmt> {
    if let Some(using) = del.using.take() {
        del.using = Some(substitute_from(using, results)?);
    }
    del.where_ = del.where_.map(|w| substitute_expr(w, results)).transpose()?;
    del.returning = del.returning.map(|r| r.into_iter().map(|e| substitute_expr(e, results)).collect()).transpose()?;
    Ok(del)
}

fn substitute_from(from: FromSource, results: &StageResults) -> EngineResult<FromSource> {
    match from {
        FromSource::Table { expr, alias } => Ok(FromSource::Table { expr: substitute_expr(expr, results)?, alias }),
        FromSource::Subquery { stmt, alias } => Ok(FromSource::Subquery { stmt: Box::new(substitute_deferred(*stmt, results)?), alias }),
    }
}

fn substitute_join(mut join: Join, results: &StageResults) -> EngineResult<Join> {
    join.source = substitute_from(join.source, results)?;
    join.on = join.on.map(|e| substitute_expr(e, results)).transpose()?;
    Ok(join)
}

fn substitute_expr(expr: SqlExpr, results: &StageResults) -> EngineResult<SqlExpr> {
    if let Some((stage, column)) = as_deferred_ref(&expr) {
        let value = resolve(stage, column, results)?;
        return Ok(SqlExpr::val(value));
    }
    match expr {
        SqlExpr::Alias { expr, alias } => Ok(SqlExpr::Alias { expr: Box::new(substitute_expr(*expr, results)?), alias }),
        SqlExpr::ValueList(items) => Ok(SqlExpr::ValueList(items.into_iter().map(|i| substitute_expr(i, results)).collect::<EngineResult<_>>()?)),
        SqlExpr::BinaryOp { op, left, right } => {
            Ok(SqlExpr::BinaryOp { op, left: Box::new(substitute_expr(*left, results)?), right: Box::new(substitute_expr(*right, results)?) })
        }
        SqlExpr::Not(inner) => Ok(SqlExpr::Not(Box::new(substitute_expr(*inner, results)?))),
        SqlExpr::Function { name, args } => {
            Ok(SqlExpr::Function { name, args: args.into_iter().map(|a| substitute_expr(a, results)).collect::<EngineResult<_>>()? })
        }
        SqlExpr::Parens(inner) => Ok(SqlExpr::Parens(Box::new(substitute_expr(*inner, results)?))),
        SqlExpr::Selection { expr, alias } => Ok(SqlExpr::Selection { expr: Box::new(substitute_expr(*expr, results)?), alias }),
        SqlExpr::Exists { negated, subquery } => Ok(SqlExpr::Exists { negated, subquery: Box::new(substitute_deferred(*subquery, results)?) }),
        SqlExpr::Subquery(stmt) => Ok(SqlExpr::Subquery(Box::new(substitute_deferred(*stmt, results)?))),
        other @ (SqlExpr::Table { .. } | SqlExpr::Column { .. } | SqlExpr::Reference { .. } | SqlExpr::Value(_) | SqlExpr::Star) => Ok(other),
    }
}

fn resolve(stage: StageId, column: &str, results: &StageResults) -> EngineResult<AstValue> {
    let result = results
        .get(&stage)
        .ok_or_else(|| EngineError::internal(format!("stage {stage} referenced before it ran")))?;
    let row = result
        .rows
        .first()
        .ok_or_else(|| EngineError::rejected("unknown", format!("stage {stage} produced no rows for a dependent statement")))?;
    let json = row.get(column).ok_or_else(|| EngineError::internal(format!("stage {stage} has no column `{column}`")))?;
    Ok(json_to_value(json))
}

fn json_to_value(value: &serde_json::Value) -> AstValue {
    match value {
        serde_json::Value::Null => AstValue::Null,
        serde_json::Value::Bool(b) => AstValue::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                AstValue::Int(i)
            } else {
                AstValue::Float(n.as_f64().unwrap_or_default())
            }
        }
        serde_json::Value::String(s) => AstValue::Str(s.as_str().into()),
        other => AstValue::Json(other.clone()),
    }
}
