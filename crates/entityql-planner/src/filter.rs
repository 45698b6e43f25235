//! Compiles a [`WhereNode`] tree into a [`SqlExpr`] boolean, evaluated against one
//! model/alias pair. Mirrors the shape of the Policy Expression Compiler
//! (`entityql_expr`) but serves the public filter/combinator language from
//! spec §6.3 rather than the policy DSL.

use entityql_ast::{BinOp, DistinctKind, FromSource, QueryContext, SelectStmt, SqlExpr, Stmt, Value};
use entityql_errors::{EngineError, EngineResult};
use entityql_expr::relation_join_predicate;
use entityql_schema::{FieldType, ModelDef, Schema};
use smol_str::SmolStr;

use crate::args::{CaseMode, FieldOp, RelationQuantifier, ToOnePredicate, WhereNode};

pub struct FilterCompiler<'a> {
    pub schema: &'a Schema,
}

impl<'a> FilterCompiler<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        FilterCompiler { schema }
    }

    pub fn compile(&self, model: &str, alias: &str, node: &WhereNode) -> EngineResult<SqlExpr> {
        let model_def = self.schema.model(model)?;
        self.compile_node(model_def, alias, node)
    }

    fn compile_node(&self, model_def: &ModelDef, alias: &str, node: &WhereNode) -> EngineResult<SqlExpr> {
        match node {
            WhereNode::And(items) => {
                let compiled = items.iter().map(|n| self.compile_node(model_def, alias, n)).collect::<EngineResult<Vec<_>>>()?;
                Ok(SqlExpr::and_all(compiled).unwrap_or(SqlExpr::val(Value::Bool(true))))
            }
            WhereNode::Or(items) => {
                let compiled = items.iter().map(|n| self.compile_node(model_def, alias, n)).collect::<EngineResult<Vec<_>>>()?;
                Ok(SqlExpr::or_all(compiled).unwrap_or(SqlExpr::val(Value::Bool(false))))
            }
            WhereNode::Not(inner) => Ok(self.compile_node(model_def, alias, inner)?.not()),
            WhereNode::Field(field, op) => self.compile_field(model_def, alias, field, op),
            WhereNode::ToOne(field, pred) => self.compile_to_one(model_def, alias, field, pred),
            WhereNode::ToMany(field, quantifier, inner) => self.compile_to_many(model_def, alias, field, *quantifier, inner),
        }
    }

    fn resolve_scalar(&self, model_def: &ModelDef, field: &str) -> EngineResult<&entityql_schema::FieldDef> {
        model_def
            .field(field)
            .filter(|f| f.is_scalar())
            .ok_or_else(|| EngineError::validation(format!("{}: unknown scalar field `{field}` in where clause", model_def.name)))
    }

    fn compile_field(&self, model_def: &ModelDef, alias: &str, field: &str, op: &FieldOp) -> EngineResult<SqlExpr> {
        self.resolve_scalar(model_def, field)?;
        let field_def = model_def.field(field).unwrap();
        let column = SqlExpr::reference(alias, field_def.db_column.clone());
        Ok(match op {
            FieldOp::Equals(v) => SqlExpr::binary(BinOp::Eq, column, json_to_value(v)),
            FieldOp::Not(v) => SqlExpr::binary(BinOp::NotEq, column, json_to_value(v)),
            FieldOp::In(vs) => SqlExpr::binary(BinOp::In, column, SqlExpr::ValueList(vs.iter().map(json_to_value).collect())),
            FieldOp::NotIn(vs) => SqlExpr::binary(BinOp::NotIn, column, SqlExpr::ValueList(vs.iter().map(json_to_value).collect())),
            FieldOp::Lt(v) => SqlExpr::binary(BinOp::Lt, column, json_to_value(v)),
            FieldOp::Lte(v) => SqlExpr::binary(BinOp::LtEq, column, json_to_value(v)),
            FieldOp::Gt(v) => SqlExpr::binary(BinOp::Gt, column, json_to_value(v)),
            FieldOp::Gte(v) => SqlExpr::binary(BinOp::GtEq, column, json_to_value(v)),
            FieldOp::Contains(v, mode) => like_predicate(column, "%{}%", v, *mode),
            FieldOp::StartsWith(v, mode) => like_predicate(column, "{}%", v, *mode),
            FieldOp::EndsWith(v, mode) => like_predicate(column, "%{}", v, *mode),
        })
    }

    fn compile_to_one(&self, model_def: &ModelDef, alias: &str, field: &str, pred: &ToOnePredicate) -> EngineResult<SqlExpr> {
        let field_def = model_def
            .field(field)
            .filter(|f| f.is_relation() && !f.is_to_many())
            .ok_or_else(|| EngineError::validation(format!("{}: `{field}` is not a to-one relation", model_def.name)))?;
        let FieldType::Model(related_name) = &field_def.field_type else {
            return Err(EngineError::internal("to-one relation field without model type"));
        };
        let related_alias = format!("{alias}__{field}");
        match pred {
            ToOnePredicate::IsNull | ToOnePredicate::IsNotNull => {
                if !field_def.owns_fk() {
                    return Err(EngineError::query(format!(
                        "{}.{field}: null check on a non-owning to-one relation is not supported",
                        model_def.name
                    )));
                }
                let rel = field_def.relation.as_ref().unwrap();
                let checks: Vec<SqlExpr> = rel
                    .fields
                    .iter()
                    .map(|c| SqlExpr::binary(BinOp::Eq, SqlExpr::reference(alias, c.clone()), SqlExpr::val(Value::Null)))
                    .collect();
                let is_null = SqlExpr::and_all(checks).unwrap_or(SqlExpr::val(Value::Bool(true)));
                Ok(if matches!(pred, ToOnePredicate::IsNull) { is_null } else { is_null.not() })
            }
            ToOnePredicate::Is(inner) | ToOnePredicate::IsNot(inner) => {
                let join_pred = relation_join_predicate(self.schema, &model_def.name, alias, field, &related_alias)?;
                let related_def = self.schema.model(related_name)?;
                let inner_cond = self.compile_node(related_def, &related_alias, inner)?;
                let subquery = exists_subquery(related_def, &related_alias, join_pred.and(inner_cond));
                let negated = matches!(pred, ToOnePredicate::IsNot(_));
                Ok(SqlExpr::Exists { negated, subquery: Box::new(Stmt::Select(subquery)) })
            }
        }
    }

    fn compile_to_many(&self, model_def: &ModelDef, alias: &str, field: &str, quantifier: RelationQuantifier, inner: &WhereNode) -> EngineResult<SqlExpr> {
        let field_def = model_def
            .field(field)
            .filter(|f| f.is_to_many())
            .ok_or_else(|| EngineError::validation(format!("{}: `{field}` is not a to-many relation", model_def.name)))?;
        let FieldType::Model(related_name) = &field_def.field_type else {
            return Err(EngineError::internal("to-many relation field without model type"));
        };
        let related_alias = format!("{alias}__{field}");
        let join_pred = relation_join_predicate(self.schema, &model_def.name, alias, field, &related_alias)?;
        let related_def = self.schema.model(related_name)?;
        let inner_cond = self.compile_node(related_def, &related_alias, inner)?;

        let (where_expr, negated) = match quantifier {
            RelationQuantifier::Some => (join_pred.and(inner_cond), false),
            RelationQuantifier::None => (join_pred.and(inner_cond), true),
            RelationQuantifier::Every => (join_pred.and(inner_cond.not()), true),
        };
        let subquery = exists_subquery(related_def, &related_alias, where_expr);
        Ok(SqlExpr::Exists { negated, subquery: Box::new(Stmt::Select(subquery)) })
    }
}

fn exists_subquery(related_def: &ModelDef, related_alias: &str, where_: SqlExpr) -> SelectStmt {
    SelectStmt {
        projection: vec![SqlExpr::val(Value::Int(1))],
        from: FromSource::table(related_def.db_table.clone(), Some(SmolStr::from(related_alias))),
        joins: vec![],
        where_: Some(where_),
        group_by: vec![],
        having: None,
        order_by: vec![],
        limit: None,
        offset: None,
        distinct: DistinctKind::None,
        distinct_on: vec![],
        context: QueryContext::new(related_def.name.clone(), "filter"),
    }
}

fn like_predicate(column: SqlExpr, pattern: &str, needle: &serde_json::Value, mode: CaseMode) -> SqlExpr {
    let serde_json::Value::String(s) = needle else {
        return SqlExpr::binary(BinOp::Like, column, json_to_value(needle));
    };
    let literal = SqlExpr::val(Value::Str(pattern.replace("{}", s).into()));
    if mode == CaseMode::Insensitive {
        SqlExpr::binary(BinOp::Like, SqlExpr::call("lower", vec![column]), SqlExpr::call("lower", vec![literal]))
    } else {
        SqlExpr::binary(BinOp::Like, column, literal)
    }
}

fn json_to_value(value: &serde_json::Value) -> SqlExpr {
    match value {
        serde_json::Value::Null => SqlExpr::val(Value::Null),
        serde_json::Value::Bool(b) => SqlExpr::val(Value::Bool(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlExpr::val(Value::Int(i))
            } else {
                SqlExpr::val(Value::Float(n.as_f64().unwrap_or_default()))
            }
        }
        serde_json::Value::String(s) => SqlExpr::val(Value::Str(s.as_str().into())),
        other => SqlExpr::val(Value::Json(other.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entityql_schema::{FieldDef, FieldType as FT, PolicySet, Provider, ScalarType};
    use indexmap::IndexMap;

    fn field(name: &str, ty: FT) -> FieldDef {
        FieldDef {
            name: name.into(), db_column: name.into(), field_type: ty, array: false, optional: false,
            id: name == "id", unique: name == "id", updated_at: false, computed: false,
            origin_model: None, relation: None, foreign_key_for: vec![], default: None, attributes: vec![],
        }
    }

    fn schema() -> Schema {
        let mut fields = IndexMap::new();
        fields.insert(SmolStr::from("id"), field("id", FT::Scalar(ScalarType::Int)));
        fields.insert(SmolStr::from("title"), field("title", FT::Scalar(ScalarType::String)));
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
    fn equals_compiles_to_eq_binary_op() {
        let schema = schema();
        let compiler = FilterCompiler::new(&schema);
        let node = WhereNode::Field("title".into(), FieldOp::Equals(serde_json::json!("hello")));
        let compiled = compiler.compile("Post", "p", &node).unwrap();
        assert!(matches!(compiled, SqlExpr::BinaryOp { op: BinOp::Eq, .. }));
    }

    #[test]
    fn contains_insensitive_lowercases_both_sides() {
        let schema = schema();
        let compiler = FilterCompiler::new(&schema);
        let node = WhereNode::Field("title".into(), FieldOp::Contains(serde_json::json!("abc"), CaseMode::Insensitive));
        let compiled = compiler.compile("Post", "p", &node).unwrap();
        match compiled {
            SqlExpr::BinaryOp { op: BinOp::Like, left, right } => {
                assert!(matches!(*left, SqlExpr::Function { .. }));
                assert!(matches!(*right, SqlExpr::Function { .. }));
            }
            other => panic!("expected Like binary op, got {other:?}"),
        }
    }

    #[test]
    fn unknown_field_is_rejected() {
        let schema = schema();
        let compiler = FilterCompiler::new(&schema);
        let node = WhereNode::Field("nope".into(), FieldOp::Equals(serde_json::json!(1)));
        assert!(compiler.compile("Post", "p", &node).is_err());
    }
}
