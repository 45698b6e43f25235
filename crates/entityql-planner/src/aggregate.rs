//! `count`/`aggregate`/`groupBy` (spec §4.2): these never need a multi-stage
//! pipeline — one `SELECT` with the filter, read policy, and the right
//! aggregate functions projected, is always enough.

use entityql_ast::{DistinctKind, FromSource, QueryContext, SelectStmt, SqlExpr, Value};
use entityql_dialect::Dialect;
use entityql_errors::EngineResult;
use entityql_schema::{PolicyOp, Schema};
use smol_str::SmolStr;

use crate::args::{AggregateArgs, AggregateFn, CountArgs, GroupByArgs};
use crate::filter::FilterCompiler;

pub struct AggregatePlanner<'a> {
    pub schema: &'a Schema,
    pub dialect: &'a dyn Dialect,
    pub auth: Option<&'a serde_json::Value>,
    pub operation: &'a str,
}

impl<'a> AggregatePlanner<'a> {
    fn compile_policy(&self, model: &str, alias: &str) -> EngineResult<SqlExpr> {
        let compiler = entityql_expr::ExprCompiler::new(self.schema, self.dialect);
        let ctx = entityql_expr::CompileCtx::new(model, alias, self.auth, self.operation);
        entityql_expr::compile_policy(&compiler, model, PolicyOp::Read, &ctx)
    }

    fn effective_where(&self, model: &str, alias: &str, where_: &Option<crate::args::WhereNode>) -> EngineResult<SqlExpr> {
        let filter = FilterCompiler::new(self.schema);
        let mut cond = match where_ {
            Some(w) => filter.compile(model, alias, w)?,
            None => SqlExpr::val(Value::Bool(true)),
        };
        cond = cond.and(self.compile_policy(model, alias)?);
        Ok(cond)
    }

    pub fn plan_count(&self, model: &str, args: &CountArgs) -> EngineResult<SelectStmt> {
        let model_def = self.schema.model(model)?;
        let alias: SmolStr = "t".into();
        let where_ = self.effective_where(model, &alias, &args.where_)?;

        let mut projection = vec![SqlExpr::call("count", vec![SqlExpr::Star]).alias("_all")];
        for field_name in &args.per_field {
            let field = model_def.field(field_name).ok_or_else(|| entityql_errors::EngineError::validation(format!("{model}: unknown field `{field_name}` in count selection")))?;
            projection.push(SqlExpr::call("count", vec![SqlExpr::column(field.db_column.clone())]).alias(format!("_count_{field_name}")));
        }

        Ok(SelectStmt {
            projection,
            from: FromSource::table(model_def.db_table.clone(), Some(alias)),
            joins: vec![],
            where_: Some(where_),
            group_by: vec![],
            having: None,
            order_by: vec![],
            limit: None,
            offset: None,
            distinct: DistinctKind::None,
            distinct_on: vec![],
            context: QueryContext::new(model_def.name.clone(), "count"),
        })
    }

    pub fn plan_aggregate(&self, model: &str, args: &AggregateArgs) -> EngineResult<SelectStmt> {
        let model_def = self.schema.model(model)?;
        let alias: SmolStr = "t".into();
        let where_ = self.effective_where(model, &alias, &args.where_)?;
        let projection = self.compile_metrics(model_def, &args.metrics)?;

        Ok(SelectStmt {
            projection,
            from: FromSource::table(model_def.db_table.clone(), Some(alias)),
            joins: vec![],
            where_: Some(where_),
            group_by: vec![],
            having: None,
            order_by: vec![],
            limit: None,
            offset: None,
            distinct: DistinctKind::None,
            distinct_on: vec![],
            context: QueryContext::new(model_def.name.clone(), "aggregate"),
        })
    }

    pub fn plan_group_by(&self, model: &str, args: &GroupByArgs) -> EngineResult<SelectStmt> {
        let model_def = self.schema.model(model)?;
        let alias: SmolStr = "t".into();
        let where_ = self.effective_where(model, &alias, &args.where_)?;

        let mut group_cols = Vec::with_capacity(args.by.len());
        let mut projection = Vec::with_capacity(args.by.len() + args.metrics.len());
        for field_name in &args.by {
            let field = model_def.field(field_name).ok_or_else(|| entityql_errors::EngineError::validation(format!("{model}: unknown field `{field_name}` in groupBy", )))?;
            let col = SqlExpr::column(field.db_column.clone());
            group_cols.push(col.clone());
            projection.push(col.alias(field_name.clone()));
        }
        projection.extend(self.compile_metrics(model_def, &args.metrics)?);

        let having = match &args.having {
            Some(h) => Some(FilterCompiler::new(self.schema).compile(model, &alias, h)?),
            None => None,
        };

        Ok(SelectStmt {
            projection,
            from: FromSource::table(model_def.db_table.clone(), Some(alias)),
            joins: vec![],
            where_: Some(where_),
            group_by: group_cols,
            having,
            order_by: vec![],
            limit: None,
            offset: None,
            distinct: DistinctKind::None,
            distinct_on: vec![],
            context: QueryContext::new(model_def.name.clone(), "groupBy"),
        })
    }

    fn compile_metrics(&self, model_def: &entityql_schema::ModelDef, metrics: &[(AggregateFn, Option<SmolStr>)]) -> EngineResult<Vec<SqlExpr>> {
        metrics
            .iter()
            .map(|(func, field_name)| {
                let (fn_name, arg, label_prefix) = match func {
                    AggregateFn::Count => ("count", None, "_count"),
                    AggregateFn::Min => ("min", field_name.clone(), "_min"),
                    AggregateFn::Max => ("max", field_name.clone(), "_max"),
                    AggregateFn::Sum => ("sum", field_name.clone(), "_sum"),
                    AggregateFn::Avg => ("avg", field_name.clone(), "_avg"),
                };
                let call_arg = match &arg {
                    Some(f) => {
                        let field = model_def
                            .field(f)
                            .ok_or_else(|| entityql_errors::EngineError::validation(format!("{}: unknown field `{f}` in aggregate", model_def.name)))?;
                        SqlExpr::column(field.db_column.clone())
                    }
                    None => SqlExpr::Star,
                };
                let label = match field_name {
                    Some(f) => format!("{label_prefix}_{f}"),
                    None => label_prefix.to_string(),
                };
                Ok(SqlExpr::call(fn_name, vec![call_arg]).alias(label))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entityql_dialect::for_provider;
    use entityql_schema::{FieldDef, FieldType as FT, ModelDef, PolicySet, Provider, ScalarType};
    use indexmap::IndexMap;

    fn field(name: &str) -> FieldDef {
        FieldDef {
            name: name.into(), db_column: name.into(), field_type: FT::Scalar(ScalarType::String), array: false, optional: false,
            id: name == "id", unique: name == "id", updated_at: false, computed: false,
            origin_model: None, relation: None, foreign_key_for: vec![], default: None, attributes: vec![],
        }
    }

    fn schema() -> Schema {
        let mut fields = IndexMap::new();
        fields.insert(SmolStr::from("id"), field("id"));
        fields.insert(SmolStr::from("price"), field("price"));
        let model = ModelDef {
            name: "Order".into(), db_table: "orders".into(), fields, id_fields: vec!["id".into()],
            unique_fields: vec![], is_delegate: false, base_model: None, discriminator_field: None,
            policies: PolicySet::default(),
        };
        let mut models = IndexMap::new();
        models.insert(SmolStr::from("Order"), model);
        Schema::build(models, IndexMap::new(), Provider::PostgresLike, None)
    }

    #[test]
    fn count_always_projects_the_total() {
        let schema = schema();
        let dialect = for_provider(Provider::PostgresLike);
        let planner = AggregatePlanner { schema: &schema, dialect, auth: None, operation: "count" };
        let select = planner.plan_count("Order", &CountArgs::default()).unwrap();
        assert_eq!(select.projection.len(), 1);
    }

    #[test]
    fn aggregate_sum_references_the_requested_field() {
        let schema = schema();
        let dialect = for_provider(Provider::PostgresLike);
        let planner = AggregatePlanner { schema: &schema, dialect, auth: None, operation: "aggregate" };
        let args = AggregateArgs { where_: None, metrics: vec![(AggregateFn::Sum, Some("price".into()))] };
        let select = planner.plan_aggregate("Order", &args).unwrap();
        assert_eq!(select.projection.len(), 1);
    }
}
