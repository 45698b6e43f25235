//! The find path (spec §4.1): base `SELECT`, `where`/`orderBy`/`skip`/
//! `take`/`cursor`/`distinct`, and the nested relation-JSON/`_count`
//! projection machinery (step 8, dispatched to the `Dialect`).
//!
//! Nested relation/count subqueries never pass back through the Policy
//! Rewriter (they're correlated scalar subqueries or lateral joins, not
//! `FromSource::Table` entries the rewriter walks), so this module embeds
//! each related model's compiled read policy directly at build time. The
//! root statement's own policy is left for the caller to attach via
//! `entityql_rewrite::PolicyRewriter::rewrite_select`.

use entityql_ast::{BinOp, DistinctKind, FromSource, Join, QueryContext, SelectStmt, SqlExpr, Stmt, Value};
use entityql_dialect::{Dialect, RelationSelectionRequest, RelationSelectionResult};
use entityql_errors::{EngineError, EngineResult};
use entityql_expr::{compile_policy, CompileCtx, ExprCompiler};
use entityql_rewrite::PolicyRewriter;
use entityql_schema::{ModelDef, PolicyOp, Schema};
use smol_str::SmolStr;

use crate::args::{FindArgs, ProjectedField, RelationProjection, Selection, WhereNode};
use crate::filter::FilterCompiler;

type SortKey = (SmolStr, entityql_ast::SortDir, Option<entityql_ast::NullsOrder>);

pub struct FindPlan {
    pub select: SelectStmt,
    /// Distinct fields the dialect cannot express as `DISTINCT ON`; the
    /// Executor Pipeline dedupes the fetched rows on these after the fact
    /// (spec §4.6: "planner falls back to in-memory dedup").
    pub in_memory_distinct: Vec<SmolStr>,
    /// `true` when `take` was negative: the query ran with every sort key
    /// reversed so `LIMIT |take|` lands on the right side of the cursor
    /// (spec §4.1 step 3), and the caller must reverse the fetched rows
    /// back to the requested order before returning them (spec §8: "the
    /// cursor row is still included at the boundary").
    pub reverse_rows: bool,
}

pub struct FindPlanner<'a> {
    pub schema: &'a Schema,
    pub dialect: &'a dyn Dialect,
    pub auth: Option<&'a serde_json::Value>,
    pub operation: &'a str,
}

impl<'a> FindPlanner<'a> {
    fn filter(&self) -> FilterCompiler<'a> {
        FilterCompiler::new(self.schema)
    }

    fn policy_rewriter(&self) -> PolicyRewriter<'a> {
        PolicyRewriter { schema: self.schema, dialect: self.dialect, auth: self.auth, operation: self.operation }
    }

    pub fn plan(&self, model: &str, alias: &str, args: &FindArgs) -> EngineResult<FindPlan> {
        let (select, in_memory_distinct, reverse_rows) = self.build_select(model, alias, args, false)?;
        Ok(FindPlan { select, in_memory_distinct, reverse_rows })
    }

    /// `embed_policy`: `true` for every relation/count subquery nested under
    /// a parent row (they bypass the Policy Rewriter entirely), `false` for
    /// the outermost call, which the rewriter handles afterward.
    fn build_select(&self, model: &str, alias: &str, args: &FindArgs, embed_policy: bool) -> EngineResult<(SelectStmt, Vec<SmolStr>, bool)> {
        let model_def = self.schema.model(model)?;

        let mut where_ = match &args.where_ {
            Some(node) => Some(self.filter().compile(model, alias, node)?),
            None => None,
        };
        if embed_policy {
            let policy = self.compile_read_policy(model, alias)?;
            where_ = Some(match where_ { Some(w) => w.and(policy), None => policy });
        }

        let sort_keys = self.resolve_sort_keys(model_def, args);
        // `take < 0` means "the |take| rows immediately before the cursor,
        // in the caller's requested order" (spec §4.1 step 3/5): run the
        // query with every sort key's direction flipped so `LIMIT |take|`
        // lands on the correct side, then undo the flip in-memory
        // (`FindPlan::reverse_rows`) once the rows come back.
        let reverse_rows = args.take.is_some_and(|t| t < 0);
        let effective_keys: Vec<SortKey> =
            if reverse_rows { sort_keys.iter().map(|(col, dir, nulls)| (col.clone(), dir.reversed(), *nulls)).collect() } else { sort_keys.clone() };

        if let Some(cursor) = &args.cursor {
            let keyset = self.build_keyset_predicate(model_def, alias, cursor, &effective_keys)?;
            where_ = Some(match where_ { Some(w) => w.and(keyset), None => keyset });
        }

        let order_by = effective_keys
            .iter()
            .map(|(col, dir, nulls)| entityql_ast::OrderByItem { expr: SqlExpr::reference(alias, col.clone()), dir: *dir, nulls: *nulls })
            .collect();

        let (distinct, distinct_on, in_memory_distinct) = self.resolve_distinct(&args.distinct, &sort_keys);

        let mut joins = Vec::new();
        let projection = self.build_projection(model_def, alias, &args.selection, &mut joins)?;

        let select = SelectStmt {
            projection,
            from: FromSource::table(model_def.db_table.clone(), Some(SmolStr::from(alias))),
            joins,
            where_,
            group_by: vec![],
            having: None,
            order_by,
            limit: args.take.map(i64::abs),
            offset: args.skip,
            distinct,
            distinct_on,
            context: QueryContext::new(model_def.name.clone(), self.operation),
        };
        Ok((select, in_memory_distinct, reverse_rows))
    }

    fn compile_read_policy(&self, model: &str, alias: &str) -> EngineResult<SqlExpr> {
        let compiler = ExprCompiler::new(self.schema, self.dialect);
        let ctx = CompileCtx::new(model, alias, self.auth, self.operation);
        compile_policy(&compiler, model, PolicyOp::Read, &ctx)
    }

    fn resolve_sort_keys(&self, model_def: &ModelDef, args: &FindArgs) -> Vec<SortKey> {
        if !args.order_by.is_empty() {
            let mut keys: Vec<SortKey> = args.order_by.iter().map(|o| (o.field.clone(), o.dir, o.nulls)).collect();
            // Tie-break with id columns not already present, so cursor/offset
            // pagination stays deterministic across pages.
            for id_field in &model_def.id_fields {
                if !keys.iter().any(|(f, _, _)| f == id_field) {
                    keys.push((id_field.clone(), entityql_ast::SortDir::Asc, None));
                }
            }
            keys
        } else {
            model_def.id_fields.iter().map(|f| (f.clone(), entityql_ast::SortDir::Asc, None)).collect()
        }
    }

    fn resolve_distinct(&self, distinct: &[SmolStr], sort_keys: &[SortKey]) -> (DistinctKind, Vec<SqlExpr>, Vec<SmolStr>) {
        if distinct.is_empty() {
            return (DistinctKind::None, vec![], vec![]);
        }
        if self.dialect.supports_distinct_on() {
            let _ = sort_keys;
            let cols = distinct.iter().map(|f| SqlExpr::column(f.clone())).collect();
            (DistinctKind::On, cols, vec![])
        } else {
            (DistinctKind::None, vec![], distinct.to_vec())
        }
    }

    fn build_keyset_predicate(
        &self,
        model_def: &ModelDef,
        alias: &str,
        cursor: &WhereNode,
        sort_keys: &[SortKey],
    ) -> EngineResult<SqlExpr> {
        if sort_keys.is_empty() {
            return Err(EngineError::validation("cursor pagination requires at least one sort key"));
        }
        let cursor_alias: SmolStr = format!("{alias}__cursor").into();
        let cursor_where = self.filter().compile(&model_def.name, &cursor_alias, cursor)?;

        let col_subquery = |col: &SmolStr| -> SqlExpr {
            let stmt = SelectStmt {
                projection: vec![SqlExpr::Selection { expr: Box::new(SqlExpr::reference(cursor_alias.clone(), col.clone())), alias: None }],
                from: FromSource::table(model_def.db_table.clone(), Some(cursor_alias.clone())),
                joins: vec![],
                where_: Some(cursor_where.clone()),
                group_by: vec![],
                having: None,
                order_by: vec![],
                limit: Some(1),
                offset: None,
                distinct: DistinctKind::None,
                distinct_on: vec![],
                context: QueryContext::new(model_def.name.clone(), "cursor"),
            };
            SqlExpr::Subquery(Box::new(Stmt::Select(stmt)))
        };

        let mut disjuncts = Vec::with_capacity(sort_keys.len());
        for i in 0..sort_keys.len() {
            let mut conj = Vec::with_capacity(i + 1);
            for (col, _, _) in &sort_keys[..i] {
                conj.push(SqlExpr::binary(BinOp::Eq, SqlExpr::reference(alias, col.clone()), col_subquery(col)));
            }
            // Only the last tie-break tier is inclusive (spec §4.1 step 5;
            // spec §8: "the cursor row is still included at the boundary")
            // — an earlier tier tying the prefix but strictly behind on a
            // later key must stay excluded, so only the tier that pins
            // every earlier key to equality can match the cursor row
            // itself. `dir` already has `take<0`'s inversion folded in.
            let (col, dir, _) = &sort_keys[i];
            let last = i == sort_keys.len() - 1;
            let op = match (dir, last) {
                (entityql_ast::SortDir::Asc, true) => BinOp::GtEq,
                (entityql_ast::SortDir::Asc, false) => BinOp::Gt,
                (entityql_ast::SortDir::Desc, true) => BinOp::LtEq,
                (entityql_ast::SortDir::Desc, false) => BinOp::Lt,
            };
            conj.push(SqlExpr::binary(op, SqlExpr::reference(alias, col.clone()), col_subquery(col)));
            disjuncts.push(SqlExpr::and_all(conj).expect("at least the i-th comparison is always pushed"));
        }
        Ok(SqlExpr::or_all(disjuncts).expect("sort_keys is non-empty"))
    }

    fn build_projection(
        &self,
        model_def: &ModelDef,
        alias: &str,
        selection: &Selection,
        joins: &mut Vec<Join>,
    ) -> EngineResult<Vec<SqlExpr>> {
        match selection {
            Selection::AllScalars { omit } => {
                let scalars: Vec<SqlExpr> = model_def
                    .scalar_fields()
                    .filter(|f| !omit.contains(&f.name))
                    .map(|f| SqlExpr::Selection { expr: Box::new(SqlExpr::reference(alias, f.db_column.clone())), alias: Some(f.name.clone()) })
                    .collect();
                self.policy_rewriter().apply_field_level_read(&model_def.name, alias, scalars)
            }
            Selection::Select(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.build_projected_field(model_def, alias, item, joins)?);
                }
                self.policy_rewriter().apply_field_level_read(&model_def.name, alias, out)
            }
            Selection::Include { omit, relations } => {
                let mut out: Vec<SqlExpr> = model_def
                    .scalar_fields()
                    .filter(|f| !omit.contains(&f.name))
                    .map(|f| SqlExpr::Selection { expr: Box::new(SqlExpr::reference(alias, f.db_column.clone())), alias: Some(f.name.clone()) })
                    .collect();
                out = self.policy_rewriter().apply_field_level_read(&model_def.name, alias, out)?;
                for rel in relations {
                    out.push(self.build_relation_projection(model_def, alias, rel, joins)?);
                }
                Ok(out)
            }
        }
    }

    fn build_projected_field(&self, model_def: &ModelDef, alias: &str, item: &ProjectedField, joins: &mut Vec<Join>) -> EngineResult<SqlExpr> {
        match item {
            ProjectedField::Scalar(name) => {
                let field = model_def
                    .field(name)
                    .filter(|f| f.is_scalar())
                    .ok_or_else(|| EngineError::validation(format!("{}: unknown scalar field `{name}` in select", model_def.name)))?;
                Ok(SqlExpr::Selection { expr: Box::new(SqlExpr::reference(alias, field.db_column.clone())), alias: Some(field.name.clone()) })
            }
            ProjectedField::Relation(rel) => self.build_relation_projection(model_def, alias, rel, joins),
            ProjectedField::Count(fields) => self.build_count_projection(model_def, alias, fields),
        }
    }

    fn build_relation_projection(&self, model_def: &ModelDef, alias: &str, rel: &RelationProjection, joins: &mut Vec<Join>) -> EngineResult<SqlExpr> {
        let field = model_def
            .field(&rel.field)
            .filter(|f| f.is_relation())
            .ok_or_else(|| EngineError::validation(format!("{}: unknown relation `{}`", model_def.name, rel.field)))?;
        let entityql_schema::FieldType::Model(related_name) = &field.field_type else {
            return Err(EngineError::internal("relation field without model type"));
        };
        let child_alias: SmolStr = format!("{alias}__{}", rel.field).into();
        let (mut inner, _, _) = self.build_select(related_name, &child_alias, &rel.args, true)?;

        let join_pred = entityql_expr::relation_join_predicate(self.schema, &model_def.name, alias, &rel.field, &child_alias)?;
        inner.where_ = Some(match inner.where_ { Some(w) => join_pred.and(w), None => join_pred });

        let json_fields: Vec<(SmolStr, SqlExpr)> = std::mem::take(&mut inner.projection)
            .into_iter()
            .filter_map(|p| match p {
                SqlExpr::Selection { expr, alias: Some(a) } => Some((a, *expr)),
                _ => None,
            })
            .collect();

        let req = RelationSelectionRequest { child_alias, inner, json_fields, to_many: field.is_to_many(), result_alias: rel.field.clone() };
        match self.dialect.build_relation_selection(req) {
            RelationSelectionResult::Lateral { join, value } => {
                joins.push(join);
                Ok(value)
            }
            RelationSelectionResult::Inline { value } => Ok(value),
        }
    }

    fn build_count_projection(&self, model_def: &ModelDef, alias: &str, fields: &[SmolStr]) -> EngineResult<SqlExpr> {
        let mut json_fields = Vec::with_capacity(fields.len());
        for field_name in fields {
            let field = model_def
                .field(field_name)
                .filter(|f| f.is_to_many())
                .ok_or_else(|| EngineError::validation(format!("{}: `_count` needs a to-many relation, got `{field_name}`", model_def.name)))?;
            let entityql_schema::FieldType::Model(related_name) = &field.field_type else {
                return Err(EngineError::internal("relation field without model type"));
            };
            let child_alias: SmolStr = format!("{alias}__{field_name}__count").into();
            let join_pred = entityql_expr::relation_join_predicate(self.schema, &model_def.name, alias, field_name, &child_alias)?;
            let where_ = join_pred.and(self.compile_read_policy(related_name, &child_alias)?);
            let related_def = self.schema.model(related_name)?;
            let count_stmt = SelectStmt {
                projection: vec![SqlExpr::Selection { expr: Box::new(SqlExpr::call("count", vec![SqlExpr::Star])), alias: None }],
                from: FromSource::table(related_def.db_table.clone(), Some(child_alias)),
                joins: vec![],
                where_: Some(where_),
                group_by: vec![],
                having: None,
                order_by: vec![],
                limit: None,
                offset: None,
                distinct: DistinctKind::None,
                distinct_on: vec![],
                context: QueryContext::new(related_name.clone(), "count"),
            };
            json_fields.push((field_name.clone(), SqlExpr::Subquery(Box::new(Stmt::Select(count_stmt)))));
        }
        Ok(SqlExpr::Selection { expr: Box::new(self.dialect.build_json_object(json_fields)), alias: Some("_count".into()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::{FieldOp, WhereNode};
    use entityql_dialect::for_provider;
    use entityql_schema::{FieldDef, FieldType as FT, PolicySet, Provider, ScalarType};
    use indexmap::IndexMap;

    fn scalar_field(name: &str, id: bool) -> FieldDef {
        FieldDef {
            name: name.into(), db_column: name.into(), field_type: FT::Scalar(ScalarType::Int), array: false,
            optional: false, id, unique: id, updated_at: false, computed: false, origin_model: None,
            relation: None, foreign_key_for: vec![], default: None, attributes: vec![],
        }
    }

    fn schema() -> Schema {
        let mut fields = IndexMap::new();
        fields.insert(SmolStr::from("id"), scalar_field("id", true));
        fields.insert(SmolStr::from("title"), FieldDef {
            field_type: FT::Scalar(ScalarType::String),
            ..scalar_field("title", false)
        });
        let model = ModelDef {
            name: "Post".into(), db_table: "posts".into(), fields, id_fields: vec!["id".into()],
            unique_fields: vec![], is_delegate: false, base_model: None, discriminator_field: None,
            policies: PolicySet::default(),
        };
        let mut models = IndexMap::new();
        models.insert(SmolStr::from("Post"), model);
        Schema::build(models, IndexMap::new(), Provider::PostgresLike, None)
    }

    #[test]
    fn find_without_order_by_defaults_to_id_ascending() {
        let schema = schema();
        let dialect = for_provider(Provider::PostgresLike);
        let planner = FindPlanner { schema: &schema, dialect, auth: None, operation: "findMany" };
        let plan = planner.plan("Post", "p", &FindArgs::default()).unwrap();
        assert_eq!(plan.select.order_by.len(), 1);
        assert_eq!(plan.select.order_by[0].dir, entityql_ast::SortDir::Asc);
    }

    #[test]
    fn where_clause_is_compiled_into_select() {
        let schema = schema();
        let dialect = for_provider(Provider::PostgresLike);
        let planner = FindPlanner { schema: &schema, dialect, auth: None, operation: "findMany" };
        let args = FindArgs { where_: Some(WhereNode::Field("title".into(), FieldOp::Equals(serde_json::json!("x")))), ..Default::default() };
        let plan = planner.plan("Post", "p", &args).unwrap();
        assert!(plan.select.where_.is_some());
    }

    #[test]
    fn unsupported_distinct_on_dialect_falls_back_to_in_memory() {
        let schema = schema();
        let dialect = for_provider(Provider::SqliteLike);
        let planner = FindPlanner { schema: &schema, dialect, auth: None, operation: "findMany" };
        let args = FindArgs { distinct: vec!["title".into()], ..Default::default() };
        let plan = planner.plan("Post", "p", &args).unwrap();
        assert_eq!(plan.select.distinct, DistinctKind::None);
        assert_eq!(plan.in_memory_distinct, vec![SmolStr::from("title")]);
    }
}
