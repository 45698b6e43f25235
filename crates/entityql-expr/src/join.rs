use entityql_ast::SqlExpr;
use entityql_errors::{EngineError, EngineResult};
use entityql_schema::{FieldType, Schema};

/// The `JOIN-KEYS` predicate from spec §4.3's `rel?[cond]` grammar: an `AND`
/// of FK-to-PK equalities between `model_alias` and `related_alias`,
/// regardless of which side owns the foreign key.
pub fn relation_join_predicate(
    schema: &Schema,
    model: &str,
    model_alias: &str,
    relation_field: &str,
    related_alias: &str,
) -> EngineResult<SqlExpr> {
    let model_def = schema.model(model)?;
    let field = model_def
        .field(relation_field)
        .ok_or_else(|| EngineError::internal(format!("{model}.{relation_field} missing")))?;
    let rel = field.relation.as_ref().ok_or_else(|| EngineError::internal(format!("{model}.{relation_field} is not a relation")))?;

    let pairs: Vec<(String, String)> = if rel.owns_fk() {
        rel.fields.iter().zip(rel.references.iter()).map(|(l, r)| (l.to_string(), r.to_string())).collect()
    } else {
        let FieldType::Model(related_name) = &field.field_type else {
            return Err(EngineError::internal("relation field without model type"));
        };
        let related_def = schema.model(related_name)?;
        let opposite = related_def
            .field(rel.opposite.as_str())
            .ok_or_else(|| EngineError::internal(format!("{related_name}.{} missing", rel.opposite)))?;
        let opp_rel = opposite.relation.as_ref().ok_or_else(|| EngineError::internal("opposite field is not a relation"))?;
        opp_rel.fields.iter().zip(opp_rel.references.iter()).map(|(l, r)| (r.to_string(), l.to_string())).collect()
    };

    let mut eqs = Vec::with_capacity(pairs.len());
    for (local_col, remote_col) in pairs {
        eqs.push(SqlExpr::binary(
            entityql_ast::BinOp::Eq,
            SqlExpr::reference(model_alias, local_col),
            SqlExpr::reference(related_alias, remote_col),
        ));
    }
    SqlExpr::and_all(eqs).ok_or_else(|| EngineError::internal(format!("{model}.{relation_field} has no join keys")))
}
