use entityql_ast::{SqlExpr, Stmt, Value};
use entityql_errors::{EngineError, EngineResult};
use entityql_schema::{FieldType, Provider};
use smol_str::SmolStr;

use crate::postgres_like::transform_iso8601;
use crate::relation::{RelationSelectionRequest, RelationSelectionResult};
use crate::Dialect;

pub struct SqliteLike;

impl Dialect for SqliteLike {
    fn provider(&self) -> Provider {
        Provider::SqliteLike
    }

    fn supports_update_with_limit(&self) -> bool {
        true
    }

    fn supports_delete_with_limit(&self) -> bool {
        true
    }

    fn supports_distinct_on(&self) -> bool {
        false
    }

    fn supports_arrays(&self) -> bool {
        false
    }

    fn build_json_object(&self, fields: Vec<(SmolStr, SqlExpr)>) -> SqlExpr {
        let mut args = Vec::with_capacity(fields.len() * 2);
        for (key, expr) in fields {
            args.push(SqlExpr::val(Value::Str(key)));
            args.push(expr);
        }
        SqlExpr::call("json_object", args)
    }

    fn build_relation_selection(&self, req: RelationSelectionRequest) -> RelationSelectionResult {
        let RelationSelectionRequest { child_alias: _, mut inner, json_fields, to_many, result_alias } = req;

        let json_obj = self.build_json_object(json_fields);
        let agg = if to_many {
            SqlExpr::call(
                "coalesce",
                vec![SqlExpr::call("json_group_array", vec![json_obj]), SqlExpr::val(Value::Json(serde_json::json!([])))],
            )
        } else {
            json_obj
        };
        inner.projection = vec![SqlExpr::Selection { expr: Box::new(agg), alias: None }];
        if !to_many {
            inner.limit = Some(1);
        }

        let value = SqlExpr::Subquery(Box::new(Stmt::Select(inner))).alias(result_alias);
        RelationSelectionResult::Inline { value }
    }

    fn build_array_length(&self, _arr: SqlExpr) -> EngineResult<SqlExpr> {
        Err(EngineError::query("SQLite-like dialect does not support array columns"))
    }

    fn build_array_literal_sql(&self, _values: Vec<SqlExpr>) -> EngineResult<SqlExpr> {
        Err(EngineError::query("SQLite-like dialect does not support array literals"))
    }

    fn transform_primitive(&self, value: Value, field_type: &FieldType, _is_array: bool) -> Value {
        transform_iso8601(value, field_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entityql_ast::{FromSource, QueryContext, SelectStmt};

    #[test]
    fn array_features_are_rejected() {
        let dialect = SqliteLike;
        assert!(dialect.build_array_length(SqlExpr::column("tags")).is_err());
        assert!(dialect.build_array_literal_sql(vec![]).is_err());
    }

    #[test]
    fn to_many_produces_inline_subquery_not_a_join() {
        let dialect = SqliteLike;
        let inner = SelectStmt::new(FromSource::table("post", Some("post".into())), QueryContext::new("Post", "findMany"));
        let result = dialect.build_relation_selection(RelationSelectionRequest {
            child_alias: "t1".into(),
            inner,
            json_fields: vec![],
            to_many: true,
            result_alias: "posts".into(),
        });
        assert!(matches!(result, RelationSelectionResult::Inline { .. }));
    }
}
