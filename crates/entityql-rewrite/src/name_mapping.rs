//! The Name-Mapping Rewriter (spec §4.2): walks the AST with a scope stack,
//! rewriting logical model/field names to physical table/column names.

use entityql_ast::{
    DeleteStmt, FromSource, InsertStmt, Join, OrderByItem, SelectStmt, SqlExpr, Stmt, UpdateStmt,
};
use entityql_errors::{EngineError, EngineResult};
use entityql_schema::Schema;
use smol_str::SmolStr;

use crate::scope::{Scope, ScopeStack};

pub struct NameMappingRewriter<'a> {
    schema: &'a Schema,
}

impl<'a> NameMappingRewriter<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        NameMappingRewriter { schema }
    }

    pub fn rewrite(&self, stmt: Stmt) -> EngineResult<Stmt> {
        let mut scopes = ScopeStack::new();
        self.rewrite_stmt(stmt, &mut scopes)
    }

    fn rewrite_stmt(&self, stmt: Stmt, scopes: &mut ScopeStack) -> EngineResult<Stmt> {
        match stmt {
            Stmt::Select(s) => Ok(Stmt::Select(self.rewrite_select(s, scopes)?)),
            Stmt::Insert(s) => Ok(Stmt::Insert(self.rewrite_insert(s, scopes)?)),
            Stmt::Update(s) => Ok(Stmt::Update(self.rewrite_update(s, scopes)?)),
            Stmt::Delete(s) => Ok(Stmt::Delete(self.rewrite_delete(s, scopes)?)),
        }
    }

    fn rewrite_select(&self, mut sel: SelectStmt, scopes: &mut ScopeStack) -> EngineResult<SelectStmt> {
        let mut pushed = 1usize;
        sel.from = self.rewrite_from_source(sel.from, scopes)?;
        let mut joins = Vec::with_capacity(sel.joins.len());
        for join in sel.joins {
            joins.push(self.rewrite_join(join, scopes)?);
            pushed += 1;
        }
        sel.joins = joins;

        let mut projection = Vec::with_capacity(sel.projection.len());
        for item in sel.projection {
            if matches!(item, SqlExpr::Star) {
                projection.extend(self.expand_star(scopes)?);
            } else {
                projection.push(self.rewrite_expr(item, scopes)?);
            }
        }
        sel.projection = projection;

        sel.where_ = sel.where_.map(|w| self.rewrite_expr(w, scopes)).transpose()?;
        sel.group_by =
            sel.group_by.into_iter().map(|e| self.rewrite_expr(e, scopes)).collect::<EngineResult<Vec<_>>>()?;
        sel.having = sel.having.map(|h| self.rewrite_expr(h, scopes)).transpose()?;
        sel.distinct_on =
            sel.distinct_on.into_iter().map(|e| self.rewrite_expr(e, scopes)).collect::<EngineResult<Vec<_>>>()?;

        let mut order_by = Vec::with_capacity(sel.order_by.len());
        for item in sel.order_by {
            order_by.push(OrderByItem { expr: self.rewrite_expr(item.expr, scopes)?, ..item });
        }
        sel.order_by = order_by;

        for _ in 0..pushed {
            scopes.pop();
        }
        Ok(sel)
    }

    fn rewrite_insert(&self, mut ins: InsertStmt, scopes: &mut ScopeStack) -> EngineResult<InsertStmt> {
        let (table_expr, model_name) = self.resolve_table_expr(ins.table)?;
        ins.table = table_expr;
        let model = self.schema.model(&model_name)?;
        ins.columns = ins.columns.into_iter().map(|c| physical_column(model, &c).unwrap_or(c)).collect();

        scopes.push(Scope { model: Some(model_name.clone().into()), alias: model_name.clone().into(), names_mapped: false });
        let mut rows = Vec::with_capacity(ins.rows.len());
        for row in ins.rows {
            rows.push(row.into_iter().map(|e| self.rewrite_expr(e, scopes)).collect::<EngineResult<Vec<_>>>()?);
        }
        ins.rows = rows;
        if let Some(oc) = &mut ins.on_conflict {
            oc.target_columns = oc.target_columns.iter().map(|c| physical_column(model, c).unwrap_or_else(|| c.clone())).collect();
            oc.update_assignments = oc
                .update_assignments
                .drain(..)
                .map(|(c, e)| Ok((physical_column(model, &c).unwrap_or(c), self.rewrite_expr(e, scopes)?)))
                .collect::<EngineResult<Vec<_>>>()?;
            oc.update_where = oc.update_where.take().map(|w| self.rewrite_expr(w, scopes)).transpose()?;
        }
        ins.returning = ins.returning.map(|r| self.rewrite_returning(r, scopes)).transpose()?;
        scopes.pop();
        Ok(ins)
    }

    fn rewrite_update(&self, mut upd: UpdateStmt, scopes: &mut ScopeStack) -> EngineResult<UpdateStmt> {
        let (table_expr, model_name) = self.resolve_table_expr(upd.table)?;
        upd.table = table_expr;
        let model = self.schema.model(&model_name)?;
        scopes.push(Scope { model: Some(model_name.clone().into()), alias: model_name.clone().into(), names_mapped: false });

        let mut pushed = 1usize;
        if let Some(from) = upd.from.take() {
            upd.from = Some(self.rewrite_from_source(from, scopes)?);
            pushed += 1;
        }

        upd.assignments = upd
            .assignments
            .into_iter()
            .map(|(c, e)| Ok((physical_column(model, &c).unwrap_or(c), self.rewrite_expr(e, scopes)?)))
            .collect::<EngineResult<Vec<_>>>()?;
        upd.where_ = upd.where_.map(|w| self.rewrite_expr(w, scopes)).transpose()?;
        upd.returning = upd.returning.map(|r| self.rewrite_returning(r, scopes)).transpose()?;

        for _ in 0..pushed {
            scopes.pop();
        }
        Ok(upd)
    }

    fn rewrite_delete(&self, mut del: DeleteStmt, scopes: &mut ScopeStack) -> EngineResult<DeleteStmt> {
        let (table_expr, model_name) = self.resolve_table_expr(del.table)?;
        del.table = table_expr;
        scopes.push(Scope { model: Some(model_name.clone().into()), alias: model_name.clone().into(), names_mapped: false });

        let mut pushed = 1usize;
        if let Some(using) = del.using.take() {
            del.using = Some(self.rewrite_from_source(using, scopes)?);
            pushed += 1;
        }
        del.where_ = del.where_.map(|w| self.rewrite_expr(w, scopes)).transpose()?;
        del.returning = del.returning.map(|r| self.rewrite_returning(r, scopes)).transpose()?;

        for _ in 0..pushed {
            scopes.pop();
        }
        Ok(del)
    }

    fn rewrite_returning(&self, items: Vec<SqlExpr>, scopes: &mut ScopeStack) -> EngineResult<Vec<SqlExpr>> {
        let mut out = Vec::with_capacity(items.len());
        for item in items {
            if matches!(item, SqlExpr::Star) {
                out.extend(self.expand_star(scopes)?);
            } else {
                out.push(self.rewrite_expr(item, scopes)?);
            }
        }
        Ok(out)
    }

    /// `DB table AS alias` for a bare logical table reference. Returns the
    /// model name so callers can push the right scope.
    fn resolve_table_expr(&self, expr: SqlExpr) -> EngineResult<(SqlExpr, SmolStr)> {
        match expr {
            SqlExpr::Table { name, schema } => {
                let model = self.schema.model(&name)?;
                Ok((SqlExpr::Table { name: model.db_table.clone(), schema }, name))
            }
            other => Err(EngineError::internal(format!("expected a bare table reference, got {other:?}"))),
        }
    }

    fn rewrite_from_source(&self, from: FromSource, scopes: &mut ScopeStack) -> EngineResult<FromSource> {
        match from {
            FromSource::Table { expr: SqlExpr::Table { name, schema }, alias } => {
                let model = self.schema.model(&name)?;
                let effective_alias: SmolStr = alias.clone().unwrap_or_else(|| name.clone());
                let has_mapping = has_mapped_columns(model);
                scopes.push(Scope { model: Some(name.clone()), alias: effective_alias.clone(), names_mapped: !has_mapping });
                Ok(FromSource::Table {
                    expr: SqlExpr::Alias {
                        expr: Box::new(SqlExpr::Table { name: model.db_table.clone(), schema }),
                        alias: effective_alias,
                    },
                    alias,
                })
            }
            FromSource::Table { expr, alias } => {
                // Already mapped (e.g. a raw physical reference built by a
                // rewriter stage that ran before this one).
                let effective_alias = alias.clone().unwrap_or_else(|| "t".into());
                scopes.push(Scope { model: None, alias: effective_alias, names_mapped: true });
                Ok(FromSource::Table { expr, alias })
            }
            FromSource::Subquery { stmt, alias } => {
                let rewritten = self.rewrite_stmt(*stmt, scopes)?;
                scopes.push(Scope { model: None, alias: alias.clone(), names_mapped: true });
                Ok(FromSource::Subquery { stmt: Box::new(rewritten), alias })
            }
        }
    }

    fn rewrite_join(&self, mut join: Join, scopes: &mut ScopeStack) -> EngineResult<Join> {
        join.source = self.rewrite_from_source(join.source, scopes)?;
        join.on = join.on.map(|e| self.rewrite_expr(e, scopes)).transpose()?;
        Ok(join)
    }

    fn rewrite_expr(&self, expr: SqlExpr, scopes: &ScopeStack) -> EngineResult<SqlExpr> {
        match expr {
            SqlExpr::Column { name } => Ok(self.resolve_unqualified(&name, scopes)?.0),
            SqlExpr::Reference { qualifier, name } => Ok(self.resolve_qualified(&qualifier, &name, scopes)?.0),
            SqlExpr::Alias { expr, alias } => Ok(SqlExpr::Alias { expr: Box::new(self.rewrite_expr(*expr, scopes)?), alias }),
            SqlExpr::Value(v) => Ok(SqlExpr::Value(v)),
            SqlExpr::ValueList(items) => {
                Ok(SqlExpr::ValueList(items.into_iter().map(|i| self.rewrite_expr(i, scopes)).collect::<EngineResult<Vec<_>>>()?))
            }
            SqlExpr::BinaryOp { op, left, right } => Ok(SqlExpr::BinaryOp {
                op,
                left: Box::new(self.rewrite_expr(*left, scopes)?),
                right: Box::new(self.rewrite_expr(*right, scopes)?),
            }),
            SqlExpr::Not(inner) => Ok(SqlExpr::Not(Box::new(self.rewrite_expr(*inner, scopes)?))),
            SqlExpr::Function { name, args } => Ok(SqlExpr::Function {
                name,
                args: args.into_iter().map(|a| self.rewrite_expr(a, scopes)).collect::<EngineResult<Vec<_>>>()?,
            }),
            SqlExpr::Parens(inner) => Ok(SqlExpr::Parens(Box::new(self.rewrite_expr(*inner, scopes)?))),
            SqlExpr::Selection { expr, alias } => self.rewrite_selection(*expr, alias, scopes),
            SqlExpr::Star => Err(EngineError::internal("`*` must be expanded by the caller, not rewrite_expr")),
            SqlExpr::Exists { negated, subquery } => {
                let mut inner_scopes = ScopeStack::new();
                let rewritten = self.rewrite_stmt(*subquery, &mut inner_scopes)?;
                let _ = scopes; // outer scopes are visible to nested correlation via qualified refs already baked in
                Ok(SqlExpr::Exists { negated, subquery: Box::new(rewritten) })
            }
            SqlExpr::Subquery(stmt) => {
                let mut inner_scopes = ScopeStack::new();
                Ok(SqlExpr::Subquery(Box::new(self.rewrite_stmt(*stmt, &mut inner_scopes)?)))
            }
            table @ SqlExpr::Table { .. } => Ok(table),
        }
    }

    fn rewrite_selection(&self, expr: SqlExpr, alias: Option<SmolStr>, scopes: &ScopeStack) -> EngineResult<SqlExpr> {
        let (rewritten, remapped_logical_name) = match &expr {
            SqlExpr::Column { name } => {
                let (e, remapped) = self.resolve_unqualified(name, scopes)?;
                (e, remapped.then(|| name.clone()))
            }
            SqlExpr::Reference { qualifier, name } => {
                let (e, remapped) = self.resolve_qualified(qualifier, name, scopes)?;
                (e, remapped.then(|| name.clone()))
            }
            _ => (self.rewrite_expr(expr, scopes)?, None),
        };
        let final_alias = alias.or(remapped_logical_name);
        Ok(SqlExpr::Selection { expr: Box::new(rewritten), alias: final_alias })
    }

    /// Resolve an unqualified column by walking the scope stack top-down to
    /// the innermost scope whose model has a field of that name (spec
    /// §4.2). Returns whether the name was actually remapped.
    fn resolve_unqualified(&self, name: &str, scopes: &ScopeStack) -> EngineResult<(SqlExpr, bool)> {
        for scope in scopes.iter_innermost_first() {
            let Some(model_name) = &scope.model else { continue };
            let Ok(model) = self.schema.model(model_name) else { continue };
            let Some(field) = model.field(name) else { continue };
            if scope.names_mapped {
                return Ok((SqlExpr::reference(scope.alias.clone(), name.to_string()), false));
            }
            return Ok((SqlExpr::reference(scope.alias.clone(), field.db_column.clone()), field.db_column != field.name));
        }
        // No scope claims this field: leave it bare rather than erroring —
        // it may be a column introduced by a prior rewriter pass.
        Ok((SqlExpr::column(name), false))
    }

    fn resolve_qualified(&self, qualifier: &str, name: &str, scopes: &ScopeStack) -> EngineResult<(SqlExpr, bool)> {
        let scope = scopes
            .find_by_alias(qualifier)
            .or_else(|| scopes.find_by_model(qualifier))
            .ok_or_else(|| EngineError::internal(format!("unresolved qualifier `{qualifier}`")))?;
        if scope.names_mapped {
            return Ok((SqlExpr::reference(scope.alias.clone(), name.to_string()), false));
        }
        let Some(model_name) = &scope.model else {
            return Ok((SqlExpr::reference(scope.alias.clone(), name.to_string()), false));
        };
        let model = self.schema.model(model_name)?;
        let Some(field) = model.field(name) else {
            return Ok((SqlExpr::reference(scope.alias.clone(), name.to_string()), false));
        };
        Ok((SqlExpr::reference(scope.alias.clone(), field.db_column.clone()), field.db_column != field.name))
    }

    /// `SELECT *` expansion (spec §4.2): only expand when the innermost
    /// scope's model has any mapped columns; otherwise `*` is left as-is.
    fn expand_star(&self, scopes: &ScopeStack) -> EngineResult<Vec<SqlExpr>> {
        let scope = scopes.innermost().ok_or_else(|| EngineError::internal("`*` with no active scope"))?;
        if scope.names_mapped {
            return Ok(vec![SqlExpr::Star]);
        }
        let Some(model_name) = &scope.model else { return Ok(vec![SqlExpr::Star]) };
        let model = self.schema.model(model_name)?;
        if !has_mapped_columns(model) {
            return Ok(vec![SqlExpr::Star]);
        }
        Ok(model
            .scalar_fields()
            .map(|f| SqlExpr::reference(scope.alias.clone(), f.db_column.clone()).alias(f.name.clone()))
            .collect())
    }
}

fn has_mapped_columns(model: &entityql_schema::ModelDef) -> bool {
    model.name != model.db_table || model.fields.values().any(|f| f.name != f.db_column)
}

fn physical_column(model: &entityql_schema::ModelDef, logical: &str) -> Option<SmolStr> {
    model.field(logical).map(|f| f.db_column.clone())
}
