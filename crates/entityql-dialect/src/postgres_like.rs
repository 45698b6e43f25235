use entityql_ast::{BinOp, FromSource, Join, JoinKind, SqlExpr, Value};
use entityql_errors::EngineResult;
use entityql_schema::{FieldType, Provider};
use smol_str::SmolStr;

use crate::relation::{RelationSelectionRequest, RelationSelectionResult};
use crate::Dialect;

pub struct PostgresLike;

impl Dialect for PostgresLike {
    fn provider(&self) -> Provider {
        Provider::PostgresLike
    }

    fn supports_update_with_limit(&self) -> bool {
        false
    }

    fn supports_delete_with_limit(&self) -> bool {
        false
    }

    fn supports_distinct_on(&self) -> bool {
        true
    }

    fn supports_arrays(&self) -> bool {
        true
    }

    fn build_json_object(&self, fields: Vec<(SmolStr, SqlExpr)>) -> SqlExpr {
        let mut args = Vec::with_capacity(fields.len() * 2);
        for (key, expr) in fields {
            args.push(SqlExpr::val(Value::Str(key)));
            args.push(expr);
        }
        SqlExpr::call("jsonb_build_object", args)
    }

    fn build_relation_selection(&self, req: RelationSelectionRequest) -> RelationSelectionResult {
        let RelationSelectionRequest { child_alias, mut inner, json_fields, to_many, result_alias } = req;

        let json_obj = self.build_json_object(json_fields);
        let agg = if to_many {
            SqlExpr::call(
                "coalesce",
                vec![SqlExpr::call("jsonb_agg", vec![json_obj]), SqlExpr::val(Value::Json(serde_json::json!([])))],
            )
        } else {
            json_obj
        };
        inner.projection = vec![SqlExpr::Selection { expr: Box::new(agg), alias: Some("value".into()) }];
        if !to_many {
            inner.limit = Some(1);
        }

        let join = Join {
            kind: JoinKind::LeftLateral,
            source: FromSource::Subquery { stmt: Box::new(entityql_ast::Stmt::Select(inner)), alias: child_alias },
            on: Some(SqlExpr::val(Value::Bool(true))),
        };
        let value = SqlExpr::reference(join.source.alias().unwrap().to_string(), "value").alias(result_alias);
        RelationSelectionResult::Lateral { join, value }
    }

    fn build_array_length(&self, arr: SqlExpr) -> EngineResult<SqlExpr> {
        Ok(SqlExpr::call("array_length", vec![arr, SqlExpr::val(Value::Int(1))]))
    }

    fn build_array_literal_sql(&self, values: Vec<SqlExpr>) -> EngineResult<SqlExpr> {
        Ok(SqlExpr::call("array", vec![SqlExpr::ValueList(values)]))
    }

    fn transform_primitive(&self, value: Value, field_type: &FieldType, _is_array: bool) -> Value {
        transform_iso8601(value, field_type)
    }
}

/// Shared between both dialects: an ISO-8601 string destined for a
/// `DateTime` column is passed through unchanged — the driver/compiler
/// layer is responsible for binding it with the right parameter type. This
/// function exists as the single place that decision is documented (spec
/// §4.3 typing rule: "implicit ISO-8601 string → `DateTime`").
pub(crate) fn transform_iso8601(value: Value, field_type: &FieldType) -> Value {
    match (&value, field_type.as_scalar()) {
        (Value::Str(_), Some(entityql_schema::ScalarType::DateTime)) => value,
        _ => value,
    }
}

#[allow(dead_code)]
fn eq(left: SqlExpr, right: SqlExpr) -> SqlExpr {
    SqlExpr::binary(BinOp::Eq, left, right)
}

#[cfg(test)]
mod tests {
    use super::*;
    use entityql_ast::{QueryContext, SelectStmt};

    #[test]
    fn to_many_json_is_coalesced_to_empty_array() {
        let dialect = PostgresLike;
        let inner = SelectStmt::new(FromSource::table("post", Some("post".into())), QueryContext::new("Post", "findMany"));
        let result = dialect.build_relation_selection(RelationSelectionRequest {
            child_alias: "t1".into(),
            inner,
            json_fields: vec![("id".into(), SqlExpr::reference("post", "id"))],
            to_many: true,
            result_alias: "posts".into(),
        });
        match result {
            RelationSelectionResult::Lateral { join, .. } => {
                assert_eq!(join.kind, JoinKind::LeftLateral);
            }
            _ => panic!("postgres-like must produce a lateral join"),
        }
    }
}
