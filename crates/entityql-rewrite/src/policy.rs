//! The Policy Rewriter (spec §4.4): wraps every table appearance with its
//! compiled policy filter, enforces the pre-create check, and rewrites
//! `RETURNING` into the id-only + read-back protocol.
//!
//! Runs *before* the Name-Mapping Rewriter: every `Table`/column reference
//! it touches is still a bare logical name, so a `SqlExpr::Table { name,
//! .. }` IS the model name.

use entityql_ast::{
    BinOp, DeleteStmt, FromSource, InsertStmt, OnConflictAction, SelectStmt, SqlExpr, Stmt, UpdateStmt, Value,
};
use entityql_dialect::Dialect;
use entityql_errors::{EngineError, EngineResult};
use entityql_expr::{compile_policy, CompileCtx, ExprCompiler};
use entityql_schema::{ModelDef, PolicyOp, Schema};
use smol_str::SmolStr;

pub struct PolicyRewriter<'a> {
    pub schema: &'a Schema,
    pub dialect: &'a dyn Dialect,
    pub auth: Option<&'a serde_json::Value>,
    pub operation: &'a str,
}

/// Returned when a mutation's `RETURNING` had to be narrowed to id columns;
/// the caller (Executor) issues the described follow-up read-back (spec
/// §4.4 "Returning").
pub struct ReadBackPlan {
    pub model: SmolStr,
    pub id_columns: Vec<SmolStr>,
    pub original_projection: Vec<SqlExpr>,
}

impl<'a> PolicyRewriter<'a> {
    fn compiler(&self) -> ExprCompiler<'a> {
        ExprCompiler::new(self.schema, self.dialect)
    }

    fn ctx<'c>(&'c self, model: &'c str, alias: &'c str) -> CompileCtx<'c> {
        CompileCtx::new(model, alias, self.auth, self.operation)
    }

    /// Pre-mapping, a `FromSource::Table` names a model directly. Returns
    /// `(model, effective_alias)`.
    fn model_name_for_from(&self, source: &FromSource) -> Option<(SmolStr, SmolStr)> {
        match source {
            FromSource::Table { expr, alias } => {
                let model = match expr {
                    SqlExpr::Table { name, .. } => name.clone(),
                    _ => return None,
                };
                let eff_alias = alias.clone().unwrap_or_else(|| model.clone());
                Some((model, eff_alias))
            }
            FromSource::Subquery { .. } => None,
        }
    }

    /// SELECT: compile `read` for the root table and every joined table
    /// (spec §4.4: "Joins are rewritten to `(SELECT * FROM T WHERE
    /// <read-policy>) AS A`").
    pub fn rewrite_select(&self, mut sel: SelectStmt, model: &str) -> EngineResult<SelectStmt> {
        if let Some((_, alias)) = self.model_name_for_from(&sel.from) {
            let policy = compile_policy(&self.compiler(), model, PolicyOp::Read, &self.ctx(model, &alias))?;
            sel.where_ = Some(match sel.where_ {
                Some(existing) => existing.and(policy),
                None => policy,
            });
        }

        let mut joins = Vec::with_capacity(sel.joins.len());
        for mut join in sel.joins {
            if let Some((joined_model, alias)) = self.model_name_for_from(&join.source) {
                let join_policy = compile_policy(&self.compiler(), &joined_model, PolicyOp::Read, &self.ctx(&joined_model, &alias))?;
                join.source = wrap_as_policy_filtered_subquery(join.source, join_policy)?;
            }
            joins.push(join);
        }
        sel.joins = joins;
        Ok(sel)
    }

    /// UPDATE: compile `update` for the target, plus `read` for any joined
    /// table (spec §4.4).
    pub fn rewrite_update(&self, mut upd: UpdateStmt, model: &str) -> EngineResult<UpdateStmt> {
        let alias: SmolStr = match &upd.table {
            SqlExpr::Table { name, .. } => name.clone(),
            other => return Err(EngineError::internal(format!("expected a bare table in UPDATE target, got {other:?}"))),
        };
        let policy = compile_policy(&self.compiler(), model, PolicyOp::Update, &self.ctx(model, &alias))?;
        upd.where_ = Some(match upd.where_ {
            Some(existing) => existing.and(policy),
            None => policy,
        });

        if let Some(from) = &upd.from {
            if let Some((joined_model, join_alias)) = self.model_name_for_from(from) {
                let read_policy = compile_policy(&self.compiler(), &joined_model, PolicyOp::Read, &self.ctx(&joined_model, &join_alias))?;
                upd.where_ = Some(upd.where_.unwrap().and(read_policy));
            }
        }
        Ok(upd)
    }

    pub fn rewrite_delete(&self, mut del: DeleteStmt, model: &str) -> EngineResult<DeleteStmt> {
        let alias: SmolStr = match &del.table {
            SqlExpr::Table { name, .. } => name.clone(),
            other => return Err(EngineError::internal(format!("expected a bare table in DELETE target, got {other:?}"))),
        };
        let policy = compile_policy(&self.compiler(), model, PolicyOp::Delete, &self.ctx(model, &alias))?;
        del.where_ = Some(match del.where_ {
            Some(existing) => existing.and(policy),
            None => policy,
        });

        if let Some(using) = &del.using {
            if let Some((joined_model, join_alias)) = self.model_name_for_from(using) {
                let read_policy = compile_policy(&self.compiler(), &joined_model, PolicyOp::Read, &self.ctx(&joined_model, &join_alias))?;
                del.where_ = Some(del.where_.unwrap().and(read_policy));
            }
        }
        Ok(del)
    }

    /// `ON CONFLICT DO UPDATE` ANDs the `update` policy into its own
    /// `WHERE` (spec §4.4); `DO NOTHING` needs no rewriting since it never
    /// touches an existing row's data.
    pub fn rewrite_insert_on_conflict(&self, mut ins: InsertStmt, model: &str) -> EngineResult<InsertStmt> {
        if let Some(oc) = &mut ins.on_conflict {
            if oc.action == OnConflictAction::DoUpdate {
                let alias: SmolStr = model.into();
                let policy = compile_policy(&self.compiler(), model, PolicyOp::Update, &self.ctx(model, &alias))?;
                oc.update_where = Some(match oc.update_where.take() {
                    Some(existing) => existing.and(policy),
                    None => policy,
                });
            }
        }
        Ok(ins)
    }

    /// Static rejection when there is no `allow` for `create` or there is an
    /// unconditional `deny`; the per-row check still has to run at execute
    /// time (`build_pre_create_check`) — this only short-circuits the case
    /// that's knowable from the schema alone.
    pub fn check_insert_allowed(&self, model: &str) -> EngineResult<()> {
        let model_def = self.schema.model(model)?;
        if !model_def.policies.has_any_allow(PolicyOp::Create) {
            return Err(EngineError::rejected(model, "no `allow` rule permits create"));
        }
        if model_def.policies.has_unconditional_deny(PolicyOp::Create) {
            return Err(EngineError::rejected(model, "an unconditional `deny` blocks create"));
        }
        Ok(())
    }

    /// `SELECT COUNT(*)>0 FROM (VALUES(...)) AS t(columns...) WHERE
    /// <create-policy>` (spec §4.4).
    pub fn build_pre_create_check(&self, model: &str, rows: Vec<Vec<SqlExpr>>, columns: Vec<SmolStr>) -> EngineResult<SelectStmt> {
        let alias: SmolStr = "t".into();
        let policy = compile_policy(&self.compiler(), model, PolicyOp::Create, &self.ctx(model, &alias))?;
        let values_stmt = SelectStmt {
            projection: columns.iter().map(|c| SqlExpr::Selection { expr: Box::new(SqlExpr::column(c.clone())), alias: None }).collect(),
            from: FromSource::Table {
                expr: SqlExpr::call("values", rows.into_iter().map(SqlExpr::ValueList).collect()),
                alias: Some(alias.clone()),
            },
            joins: vec![],
            where_: None,
            group_by: vec![],
            having: None,
            order_by: vec![],
            limit: None,
            offset: None,
            distinct: entityql_ast::DistinctKind::None,
            distinct_on: vec![],
            context: entityql_ast::QueryContext::new(model, "create"),
        };
        Ok(SelectStmt {
            projection: vec![SqlExpr::Selection {
                expr: Box::new(SqlExpr::binary(BinOp::Gt, SqlExpr::call("count", vec![SqlExpr::Star]), SqlExpr::val(Value::Int(0)))),
                alias: Some("allowed".into()),
            }],
            from: FromSource::Subquery { stmt: Box::new(Stmt::Select(values_stmt)), alias },
            joins: vec![],
            where_: Some(policy),
            group_by: vec![],
            having: None,
            order_by: vec![],
            limit: None,
            offset: None,
            distinct: entityql_ast::DistinctKind::None,
            distinct_on: vec![],
            context: entityql_ast::QueryContext::new(model, "create"),
        })
    }

    /// Narrow `RETURNING` to id columns; the caller must then issue the
    /// read-back described by the returned `ReadBackPlan`.
    pub fn plan_read_back(&self, model: &str, requested_projection: Vec<SqlExpr>) -> EngineResult<(Vec<SqlExpr>, ReadBackPlan)> {
        let model_def = self.schema.model(model)?;
        let id_columns: Vec<SmolStr> = model_def
            .id_field_names()
            .iter()
            .map(|f| model_def.field(f).map(|fd| fd.db_column.clone()).unwrap_or_else(|| f.clone()))
            .collect();
        let id_only: Vec<SqlExpr> = id_columns.iter().map(|c| SqlExpr::column(c.clone())).collect();
        Ok((id_only, ReadBackPlan { model: model.into(), id_columns, original_projection: requested_projection }))
    }

    /// The follow-up `SELECT` for a read-back: `read` policy AND id
    /// membership in the ids the mutation actually returned.
    pub fn build_read_back_select(&self, plan: &ReadBackPlan, returned_ids: Vec<Vec<SqlExpr>>) -> EngineResult<SelectStmt> {
        let alias: SmolStr = plan.model.clone();
        let policy = compile_policy(&self.compiler(), &plan.model, PolicyOp::Read, &self.ctx(&plan.model, &alias))?;
        let where_ = match build_id_in_filter(&alias, &plan.id_columns, returned_ids) {
            Some(f) => policy.and(f),
            None => policy,
        };
        Ok(SelectStmt {
            projection: self.apply_field_level_read(&plan.model, &alias, plan.original_projection.clone())?,
            from: FromSource::Table { expr: SqlExpr::table(plan.model.clone()), alias: Some(alias) },
            joins: vec![],
            where_: Some(where_),
            group_by: vec![],
            having: None,
            order_by: vec![],
            limit: None,
            offset: None,
            distinct: entityql_ast::DistinctKind::None,
            distinct_on: vec![],
            context: entityql_ast::QueryContext::new(plan.model.clone(), self.operation),
        })
    }

    /// Field-level read policies (spec §4.4): an unreadable scalar is
    /// projected as `NULL` rather than excluded, so the result's shape
    /// stays stable regardless of which rows pass.
    pub fn apply_field_level_read(&self, model: &str, alias: &str, projection: Vec<SqlExpr>) -> EngineResult<Vec<SqlExpr>> {
        let model_def = self.schema.model(model)?;
        projection.into_iter().map(|item| self.apply_field_level_read_one(model_def, alias, item)).collect()
    }

    fn apply_field_level_read_one(&self, model_def: &ModelDef, alias: &str, item: SqlExpr) -> EngineResult<SqlExpr> {
        let (expr, sel_alias) = match item {
            SqlExpr::Selection { expr, alias } => (expr, alias),
            other => return Ok(other),
        };
        let column = match expr.as_ref() {
            SqlExpr::Reference { name, .. } => name.clone(),
            _ => return Ok(SqlExpr::Selection { expr, alias: sel_alias }),
        };
        let Some(field) = model_def.fields.values().find(|f| f.db_column == column) else {
            return Ok(SqlExpr::Selection { expr, alias: sel_alias });
        };
        if !model_def.policies.has_field_policy(&field.name) {
            return Ok(SqlExpr::Selection { expr, alias: sel_alias });
        }

        let ctx = self.ctx(&model_def.name, alias);
        let allow: Vec<SqlExpr> = model_def
            .policies
            .field_rules_for(&field.name, PolicyOp::Read)
            .filter(|r| r.kind == entityql_schema::PolicyKind::Allow)
            .map(|r| self.compiler().compile(&r.expr, &ctx))
            .collect::<EngineResult<_>>()?;
        let deny: Vec<SqlExpr> = model_def
            .policies
            .field_rules_for(&field.name, PolicyOp::Read)
            .filter(|r| r.kind == entityql_schema::PolicyKind::Deny)
            .map(|r| self.compiler().compile(&r.expr, &ctx))
            .collect::<EngineResult<_>>()?;

        let mut condition = SqlExpr::or_all(allow).unwrap_or(SqlExpr::val(Value::Bool(true)));
        if let Some(deny_expr) = SqlExpr::or_all(deny) {
            condition = condition.and(deny_expr.not());
        }
        let guarded = SqlExpr::call("case_when", vec![condition, *expr, SqlExpr::val(Value::Null)]);
        Ok(SqlExpr::Selection { expr: Box::new(guarded), alias: sel_alias })
    }
}

fn build_id_in_filter(alias: &str, id_columns: &[SmolStr], returned_ids: Vec<Vec<SqlExpr>>) -> Option<SqlExpr> {
    if id_columns.len() == 1 {
        let col = &id_columns[0];
        let values: Vec<SqlExpr> = returned_ids.into_iter().filter_map(|mut row| row.pop()).collect();
        if values.is_empty() {
            return None;
        }
        return Some(SqlExpr::binary(BinOp::In, SqlExpr::reference(alias, col.clone()), SqlExpr::ValueList(values)));
    }
    let rows: Vec<SqlExpr> = returned_ids
        .into_iter()
        .map(|row| {
            let eqs: Vec<SqlExpr> = id_columns
                .iter()
                .zip(row)
                .map(|(col, val)| SqlExpr::binary(BinOp::Eq, SqlExpr::reference(alias, col.clone()), val))
                .collect();
            SqlExpr::and_all(eqs).unwrap_or(SqlExpr::val(Value::Bool(false)))
        })
        .collect();
    SqlExpr::or_all(rows)
}

/// Turns a joined `FromSource::Table` into `(SELECT * FROM T AS alias
/// WHERE <read-policy>) AS alias` (spec §4.4). `Subquery` sources are left
/// alone — they were already produced by an earlier rewriter stage and
/// carry their own policy filter.
fn wrap_as_policy_filtered_subquery(source: FromSource, policy: SqlExpr) -> EngineResult<FromSource> {
    match source {
        FromSource::Table { expr, alias } => {
            let table_alias: SmolStr = alias.unwrap_or_else(|| "t".into());
            let inner = SelectStmt {
                projection: vec![SqlExpr::Star],
                from: FromSource::Table { expr, alias: Some(table_alias.clone()) },
                joins: vec![],
                where_: Some(policy),
                group_by: vec![],
                having: None,
                order_by: vec![],
                limit: None,
                offset: None,
                distinct: entityql_ast::DistinctKind::None,
                distinct_on: vec![],
                context: entityql_ast::QueryContext::default(),
            };
            Ok(FromSource::Subquery { stmt: Box::new(Stmt::Select(inner)), alias: table_alias })
        }
        other @ FromSource::Subquery { .. } => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entityql_dialect::for_provider;
    use entityql_schema::{Expr, FieldDef, FieldType, PolicyKind, PolicyRule, PolicySet, Provider, ScalarType};
    use indexmap::IndexMap;

    fn post_field_def() -> FieldDef {
        FieldDef {
            name: "id".into(),
            db_column: "id".into(),
            field_type: FieldType::Scalar(ScalarType::Int),
            array: false,
            optional: false,
            id: true,
            unique: true,
            updated_at: false,
            computed: false,
            origin_model: None,
            relation: None,
            foreign_key_for: vec![],
            default: None,
            attributes: vec![],
        }
    }

    fn schema_with(policies: PolicySet) -> Schema {
        let mut fields = IndexMap::new();
        fields.insert(SmolStr::from("id"), post_field_def());
        let model = ModelDef {
            name: "Post".into(),
            db_table: "posts".into(),
            fields,
            id_fields: vec!["id".into()],
            unique_fields: vec![],
            is_delegate: false,
            base_model: None,
            discriminator_field: None,
            policies,
        };
        let mut models = IndexMap::new();
        models.insert(SmolStr::from("Post"), model);
        Schema::build(models, IndexMap::new(), Provider::PostgresLike, None)
    }

    #[test]
    fn select_without_explicit_where_gets_policy_attached() {
        let policies = PolicySet::new(
            vec![PolicyRule { kind: PolicyKind::Allow, ops: vec![PolicyOp::All], expr: Expr::BoolLit(true) }],
            vec![],
        );
        let schema = schema_with(policies);
        let dialect = for_provider(Provider::PostgresLike);
        let rewriter = PolicyRewriter { schema: &schema, dialect, auth: None, operation: "findMany" };
        let sel = SelectStmt::new(FromSource::table("Post", None), entityql_ast::QueryContext::new("Post", "findMany"));
        let rewritten = rewriter.rewrite_select(sel, "Post").unwrap();
        assert!(rewritten.where_.is_some());
    }

    #[test]
    fn insert_rejected_with_no_allow_rule() {
        let schema = schema_with(PolicySet::default());
        let dialect = for_provider(Provider::PostgresLike);
        let rewriter = PolicyRewriter { schema: &schema, dialect, auth: None, operation: "create" };
        assert!(rewriter.check_insert_allowed("Post").is_err());
    }
}
