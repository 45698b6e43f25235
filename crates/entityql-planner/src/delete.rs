//! The delete path (spec §4.1): delegate base-chain cascade (leaf first,
//! since a base row can't be removed while a leaf row still references
//! it via its own id) and the `deleteMany` id-subselect rewrite for
//! dialects without `DELETE ... LIMIT` or for polymorphic models.

use entityql_ast::{DeleteStmt, DistinctKind, FromSource, QueryContext, SelectStmt, SqlExpr, Stmt, Value};
use entityql_dialect::Dialect;
use entityql_errors::{EngineError, EngineResult};
use entityql_schema::{ModelDef, PolicyOp, Schema};
use smol_str::SmolStr;

use crate::args::{DeleteArgs, DeleteManyArgs};
use crate::filter::FilterCompiler;
use crate::plan::{Stage, StageBuilder, StageId};

/// What [`DeletePlanner::plan`] hands the facade: the full stage pipeline
/// plus the stage whose `RETURNING` row is the deleted entity itself (the
/// leaf delete, for a delegate chain — the upward cascade into base
/// tables carries no row the caller cares about).
pub struct DeletePlan {
    pub stages: Vec<Stage>,
    pub root_stage: StageId,
}

pub struct DeletePlanner<'a> {
    pub schema: &'a Schema,
    pub dialect: &'a dyn Dialect,
    pub auth: Option<&'a serde_json::Value>,
    pub operation: &'a str,
}

impl<'a> DeletePlanner<'a> {
    fn compile_policy(&self, model: &str, alias: &str, op: PolicyOp) -> EngineResult<SqlExpr> {
        let compiler = entityql_expr::ExprCompiler::new(self.schema, self.dialect);
        let ctx = entityql_expr::CompileCtx::new(model, alias, self.auth, self.operation);
        entityql_expr::compile_policy(&compiler, model, op, &ctx)
    }

    pub fn plan(&self, model: &str, args: &DeleteArgs) -> EngineResult<DeletePlan> {
        let model_def = self.schema.model(model)?;
        let filter = FilterCompiler::new(self.schema);
        let alias: SmolStr = "t".into();
        let mut where_ = filter.compile(model, &alias, &args.where_)?;
        where_ = where_.and(self.compile_policy(model, &alias, PolicyOp::Delete)?);

        let mut builder = StageBuilder::new();
        let root_stage = self.emit_chain_delete(&mut builder, model_def, where_)?;
        Ok(DeletePlan { stages: builder.finish(), root_stage })
    }

    pub fn plan_delete_many(&self, model: &str, args: &DeleteManyArgs) -> EngineResult<Vec<Stage>> {
        let model_def = self.schema.model(model)?;
        let filter = FilterCompiler::new(self.schema);
        let alias: SmolStr = "t".into();
        let mut where_ = match &args.where_ {
            Some(w) => filter.compile(model, &alias, w)?,
            None => SqlExpr::val(Value::Bool(true)),
        };
        where_ = where_.and(self.compile_policy(model, &alias, PolicyOp::Delete)?);

        let needs_subselect = args.limit.is_some() && !self.dialect.supports_delete_with_limit() || model_def.has_base() || model_def.is_delegate;

        let mut builder = StageBuilder::new();
        if needs_subselect {
            let id_subselect = self.id_subselect(model_def, where_, args.limit);
            let id_where = self.id_in_subselect(model_def, id_subselect);
            self.emit_chain_delete(&mut builder, model_def, id_where)?;
        } else if let Some(limit) = args.limit {
            let delete = DeleteStmt {
                table: SqlExpr::table(model_def.name.clone()),
                using: None,
                where_: Some(where_),
                returning: None,
                limit: Some(limit),
                context: QueryContext::new(model_def.name.clone(), "deleteMany"),
            };
            builder.push(Stmt::Delete(delete), vec![], false, format!("{model}.deleteMany"));
        } else {
            let delete = DeleteStmt {
                table: SqlExpr::table(model_def.name.clone()),
                using: None,
                where_: Some(where_),
                returning: None,
                limit: None,
                context: QueryContext::new(model_def.name.clone(), "deleteMany"),
            };
            builder.push(Stmt::Delete(delete), vec![], false, format!("{model}.deleteMany"));
        }
        Ok(builder.finish())
    }

    /// Deletes every level of `model_def`'s delegate base chain, leaf
    /// first: a base row's id is only free to go once no leaf row still
    /// points at it. Each level keys off the same shared id, so every
    /// level's `DELETE` can use the id-subselect independently — nothing
    /// downstream depends on the leaf delete's own `RETURNING`. Only the
    /// leaf (the first stage pushed) returns its id columns; the caller
    /// never sees the base-table cascade as rows of their own.
    fn emit_chain_delete(&self, builder: &mut StageBuilder, model_def: &'a ModelDef, where_: SqlExpr) -> EngineResult<StageId> {
        let chain = self.schema.delegate_chain(&model_def.name)?;
        if chain.len() == 1 {
            let delete = DeleteStmt {
                table: SqlExpr::table(model_def.name.clone()),
                using: None,
                where_: Some(where_),
                returning: Some(id_columns_as_exprs(model_def)),
                limit: None,
                context: QueryContext::new(model_def.name.clone(), self.operation),
            };
            return Ok(builder.push(Stmt::Delete(delete), vec![], false, format!("{}.delete", model_def.name)));
        }

        let id_subselect = self.id_subselect(model_def, where_, None);
        // Leaf-first (chain is already ordered leaf-first by `delegate_chain`).
        let mut prev_stage: Option<StageId> = None;
        let mut root_stage = None;
        for level_def in &chain {
            let level_where = self.id_in_subselect(level_def, id_subselect.clone());
            let delete = DeleteStmt {
                table: SqlExpr::table(level_def.name.clone()),
                using: None,
                where_: Some(level_where),
                returning: (level_def.name == model_def.name).then(|| id_columns_as_exprs(level_def)),
                limit: None,
                context: QueryContext::new(level_def.name.clone(), self.operation),
            };
            let deps = prev_stage.map(|s| vec![s]).unwrap_or_default();
            let stage_id = builder.push(Stmt::Delete(delete), deps, false, format!("{}.delete", level_def.name));
            if level_def.name == model_def.name {
                root_stage = Some(stage_id);
            }
            prev_stage = Some(stage_id);
        }
        root_stage.ok_or_else(|| EngineError::internal(format!("{}: delete produced no leaf stage", model_def.name)))
    }

    fn id_subselect(&self, model_def: &ModelDef, where_: SqlExpr, limit: Option<i64>) -> SelectStmt {
        SelectStmt {
            projection: id_columns_as_exprs(model_def),
            from: FromSource::table(model_def.db_table.clone(), Some(SmolStr::from("t"))),
            joins: vec![],
            where_: Some(where_),
            group_by: vec![],
            having: None,
            order_by: vec![],
            limit,
            offset: None,
            distinct: DistinctKind::None,
            distinct_on: vec![],
            context: QueryContext::new(model_def.name.clone(), "delete"),
        }
    }

    fn id_in_subselect(&self, level_def: &ModelDef, subselect: SelectStmt) -> SqlExpr {
        let id_col = level_def.id_fields.first().map(|f| level_def.field(f).map(|fd| fd.db_column.clone()).unwrap_or_else(|| f.clone())).unwrap_or_default();
        SqlExpr::binary(entityql_ast::BinOp::In, SqlExpr::column(id_col), SqlExpr::Subquery(Box::new(Stmt::Select(subselect))))
    }
}

fn id_columns_as_exprs(model_def: &ModelDef) -> Vec<SqlExpr> {
    model_def
        .id_fields
        .iter()
        .map(|f| {
            let col = model_def.field(f).map(|fd| fd.db_column.clone()).unwrap_or_else(|| f.clone());
            SqlExpr::Selection { expr: Box::new(SqlExpr::column(col)), alias: None }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::Selection;
    use entityql_dialect::for_provider;
    use entityql_schema::{FieldDef, FieldType as FT, GeneratorKind, PolicySet, Provider, ScalarType};
    use indexmap::IndexMap;

    fn field(name: &str) -> FieldDef {
        FieldDef {
            name: name.into(), db_column: name.into(), field_type: FT::Scalar(ScalarType::String), array: false, optional: false,
            id: name == "id", unique: name == "id", updated_at: false, computed: false,
            origin_model: None, relation: None, foreign_key_for: vec![],
            default: (name == "id").then_some(FieldDefault::Generator(GeneratorKind::Cuid)),
            attributes: vec![],
        }
    }

    use entityql_schema::FieldDefault;

    fn schema() -> Schema {
        let mut fields = IndexMap::new();
        fields.insert(SmolStr::from("id"), field("id"));
        fields.insert(SmolStr::from("title"), field("title"));
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
    fn delete_emits_a_single_delete_statement() {
        let schema = schema();
        let dialect = for_provider(Provider::PostgresLike);
        let planner = DeletePlanner { schema: &schema, dialect, auth: None, operation: "delete" };
        let args = DeleteArgs { where_: crate::args::WhereNode::And(vec![]), selection: Selection::default() };
        let plan = planner.plan("Post", &args).unwrap();
        assert_eq!(plan.stages.len(), 1);
        assert_eq!(plan.root_stage, plan.stages[0].id);
        assert!(matches!(plan.stages[0].ast, Stmt::Delete(_)));
    }

    #[test]
    fn delete_many_without_limit_skips_the_subselect_rewrite() {
        let schema = schema();
        let dialect = for_provider(Provider::PostgresLike);
        let planner = DeletePlanner { schema: &schema, dialect, auth: None, operation: "deleteMany" };
        let args = DeleteManyArgs { where_: None, limit: None };
        let stages = planner.plan_delete_many("Post", &args).unwrap();
        assert_eq!(stages.len(), 1);
        let Stmt::Delete(delete) = &stages[0].ast else { panic!("expected delete") };
        assert!(!matches!(delete.where_.as_ref().unwrap(), SqlExpr::BinaryOp { op: entityql_ast::BinOp::In, .. }));
    }
}
