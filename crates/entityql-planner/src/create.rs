//! The create path (spec §4.1): delegate base-first recursion, generator
//! defaults, owned/non-owned relation nested writes, many-to-many join
//! inserts, and `createMany`.
//!
//! Every row this module inserts carries either a literal value or a
//! [`crate::plan::deferred_ref`] marker for columns whose value only
//! becomes known once an earlier stage has actually run (a `connect`
//! target resolved by a prior `SELECT`, or a parent row's generated id).
//! The Executor Pipeline substitutes those markers with real values before
//! handing a stage's AST to the `Compiler`.
//!
//! Delegate hierarchies share one id value (generated once, before any
//! physical row exists) across every table in the base chain, inserted
//! root-first. This only works when the id field carries a generator
//! default (`cuid()`, `uuid()`, ...); a plain auto-increment id has no
//! value to share until the database assigns one, so a delegate leaf whose
//! id isn't generator-backed is rejected up front.

use entityql_ast::{DistinctKind, FromSource, InsertStmt, OnConflict, OnConflictAction, QueryContext, SelectStmt, SqlExpr, Stmt, UpdateStmt, Value};
use entityql_dialect::Dialect;
use entityql_errors::{EngineError, EngineResult};
use entityql_rewrite::PolicyRewriter;
use entityql_schema::{FieldDefault, FieldType, ModelDef, Schema};
use indexmap::IndexMap;
use smol_str::SmolStr;

use crate::args::{CreateArgs, CreateManyArgs, DataField, IndexMapPayload, RelationWrite, WhereNode};
use crate::filter::FilterCompiler;
use crate::generators;
use crate::plan::{deferred_ref, Stage, StageBuilder, StageId};

/// One resolved FK id: either a literal value known at plan time, or a
/// still-pending stage output. `pub(crate)` so the update path can thread a
/// parent id into a nested `create` the same way this module does.
#[derive(Clone)]
pub(crate) enum IdValue {
    Literal(SqlExpr),
    Pending(StageId, SmolStr),
}

impl IdValue {
    pub(crate) fn depends_on(&self) -> Option<StageId> {
        match self {
            IdValue::Literal(_) => None,
            IdValue::Pending(stage, _) => Some(*stage),
        }
    }

    pub(crate) fn as_expr(&self) -> SqlExpr {
        match self {
            IdValue::Literal(v) => v.clone(),
            IdValue::Pending(stage, col) => deferred_ref(*stage, col.clone()),
        }
    }
}

/// What [`CreatePlanner::plan`] hands the facade: the full stage pipeline
/// plus the one stage whose `RETURNING` row is the created entity itself
/// (as opposed to a connect lookup, a join-table insert, or a base-chain
/// level belonging to some other model in the hierarchy).
pub struct CreatePlan {
    pub stages: Vec<Stage>,
    pub root_stage: StageId,
}

pub struct CreatePlanner<'a> {
    pub schema: &'a Schema,
    pub dialect: &'a dyn Dialect,
    pub auth: Option<&'a serde_json::Value>,
    pub operation: &'a str,
}

impl<'a> CreatePlanner<'a> {
    fn policy_rewriter(&self) -> PolicyRewriter<'a> {
        PolicyRewriter { schema: self.schema, dialect: self.dialect, auth: self.auth, operation: self.operation }
    }

    pub fn plan(&self, model: &str, args: &CreateArgs) -> EngineResult<CreatePlan> {
        let model_def = self.schema.model(model)?;
        if model_def.is_delegate {
            return Err(EngineError::validation(format!("{model}: cannot create a delegate base model directly")));
        }
        self.policy_rewriter().check_insert_allowed(model)?;

        let mut builder = StageBuilder::new();
        let (root_stage, _) = self.build_entity(&mut builder, model_def, &args.data, None)?;
        Ok(CreatePlan { stages: builder.finish(), root_stage })
    }

    pub fn plan_create_many(&self, model: &str, args: &CreateManyArgs) -> EngineResult<Vec<Stage>> {
        let model_def = self.schema.model(model)?;
        if model_def.is_delegate || model_def.has_base() {
            return Err(EngineError::validation(format!("{model}: `createMany` is not supported on a polymorphic model")));
        }
        self.policy_rewriter().check_insert_allowed(model)?;

        let mut rows = Vec::with_capacity(args.data.len());
        let mut columns: Vec<SmolStr> = Vec::new();
        for record in &args.data {
            let mut scalars: IndexMap<SmolStr, SqlExpr> = IndexMap::new();
            for (field_name, value) in record {
                let field = model_def
                    .field(field_name)
                    .filter(|f| f.is_scalar())
                    .ok_or_else(|| EngineError::validation(format!("{model}: `{field_name}` is not a scalar field, not allowed in createMany")))?;
                scalars.insert(field.db_column.clone(), json_to_sql(value));
            }
            self.fill_generator_defaults(model_def, &mut scalars)?;
            for col in scalars.keys() {
                if !columns.contains(col) {
                    columns.push(col.clone());
                }
            }
            rows.push(scalars);
        }
        let ordered_rows: Vec<Vec<SqlExpr>> =
            rows.into_iter().map(|mut row| columns.iter().map(|c| row.shift_remove(c).unwrap_or(SqlExpr::val(Value::Null))).collect()).collect();

        let on_conflict = args.skip_duplicates.then(|| OnConflict {
            target_columns: model_def.unique_fields.first().map(|u| u.0.clone()).unwrap_or_default(),
            action: OnConflictAction::DoNothing,
            update_assignments: vec![],
            update_where: None,
        });

        let stmt = InsertStmt {
            table: SqlExpr::table(model_def.name.clone()),
            columns,
            rows: ordered_rows,
            on_conflict,
            returning: args.return_rows.then(|| id_columns_as_exprs(model_def)),
            context: QueryContext::new(model_def.name.clone(), "createMany"),
        };
        let mut builder = StageBuilder::new();
        builder.push(Stmt::Insert(stmt), vec![], false, format!("{model}.createMany"));
        Ok(builder.finish())
    }

    /// Inserts one entity: resolves owned relations, fills generator
    /// defaults, then emits one `INSERT` per level of the delegate base
    /// chain (root first), and finally processes non-owned relation
    /// writes against the leaf row. Returns the leaf insert's stage id and
    /// its id column values.
    ///
    /// `pub(crate)` so the update path can reuse it verbatim for nested
    /// `create` actions inside an `update` payload, on the same
    /// `StageBuilder` the update's own stages are going onto.
    pub(crate) fn build_entity(
        &self,
        builder: &mut StageBuilder,
        model_def: &'a ModelDef,
        data: &IndexMapPayload,
        parent_fk: Option<(&str, IdValue)>,
    ) -> EngineResult<(StageId, Vec<(SmolStr, IdValue)>)> {
        let (mut scalars, relations) = self.split_payload(model_def, data)?;

        if let Some((field, id)) = &parent_fk {
            let rel = model_def
                .field(field)
                .and_then(|f| f.relation.as_ref())
                .ok_or_else(|| EngineError::internal(format!("{}.{field} is not a relation", model_def.name)))?;
            for local_col in &rel.fields {
                scalars.insert(local_col.clone(), id.as_expr());
            }
        }

        // Owned to-one relations: the related row (or connect target) must
        // resolve to an id *before* this row is inserted, since this row's
        // FK column needs the value.
        let mut owned_deps = Vec::new();
        for (field, write) in &relations {
            let field_def = model_def.field(field).unwrap();
            if !field_def.owns_fk() {
                continue;
            }
            let rel = field_def.relation.as_ref().unwrap();
            let resolved = self.resolve_owned_target(builder, field_def, write)?;
            if let Some(stage) = resolved.depends_on() {
                owned_deps.push(stage);
            }
            for local_col in &rel.fields {
                scalars.insert(local_col.clone(), resolved.as_expr());
            }
        }

        self.fill_generator_defaults(model_def, &mut scalars)?;

        let id_values: Vec<(SmolStr, IdValue)> = model_def
            .id_fields
            .iter()
            .map(|f| {
                let col = model_def.field(f).map(|fd| fd.db_column.clone()).unwrap_or_else(|| f.clone());
                let expr = scalars.get(&col).cloned().unwrap_or(SqlExpr::val(Value::Null));
                (col, IdValue::Literal(expr))
            })
            .collect();

        let leaf_stage = self.insert_chain(builder, model_def, &scalars, owned_deps)?;

        // Non-owned relations (to-many, or the inverse side of a one-to-one)
        // can only run once this row's id is known.
        for (field, write) in &relations {
            let field_def = model_def.field(field).unwrap();
            if field_def.owns_fk() {
                continue;
            }
            self.apply_non_owned_write(builder, model_def, &id_values, field_def, field, write, leaf_stage)?;
        }

        Ok((leaf_stage, id_values))
    }

    /// Emits one `INSERT` per level of `model_def`'s delegate base chain,
    /// root first, splitting `scalars` across levels by each column's
    /// physical owner. Returns the leaf level's stage id.
    fn insert_chain(
        &self,
        builder: &mut StageBuilder,
        model_def: &'a ModelDef,
        scalars: &IndexMap<SmolStr, SqlExpr>,
        owned_deps: Vec<StageId>,
    ) -> EngineResult<StageId> {
        let chain = self.schema.delegate_chain(&model_def.name)?;
        if chain.len() > 1 && !model_def.id_fields.iter().any(|f| self.chain_level_has_generator(&chain, f)) {
            return Err(EngineError::query(format!(
                "{}: a delegate hierarchy needs a generator default (cuid()/uuid()/...) on its id field to share one id across the base chain",
                model_def.name
            )));
        }

        let mut by_level: IndexMap<SmolStr, Vec<SmolStr>> = IndexMap::new();
        for col in scalars.keys() {
            by_level.entry(self.level_for_column(model_def, col)).or_default().push(col.clone());
        }

        let mut prev_stage: Option<StageId> = None;
        let mut leaf_stage = None;
        for level_def in chain.iter().rev() {
            let mut cols = by_level.shift_remove(&level_def.name).unwrap_or_default();
            for id_field in &level_def.id_fields {
                let id_col = level_def.field(id_field).map(|f| f.db_column.clone()).unwrap_or_else(|| id_field.clone());
                if !cols.contains(&id_col) {
                    cols.push(id_col);
                }
            }
            if let Some(disc) = &level_def.discriminator_field {
                if !cols.contains(disc) {
                    cols.push(disc.clone());
                }
            }
            let row: Vec<SqlExpr> = cols
                .iter()
                .map(|c| {
                    if Some(c) == level_def.discriminator_field.as_ref() && !scalars.contains_key(c) {
                        SqlExpr::val(Value::Str(model_def.name.clone()))
                    } else {
                        scalars.get(c).cloned().unwrap_or(SqlExpr::val(Value::Null))
                    }
                })
                .collect();
            let stmt = InsertStmt {
                table: SqlExpr::table(level_def.name.clone()),
                columns: cols,
                rows: vec![row],
                on_conflict: None,
                returning: Some(id_columns_as_exprs(level_def)),
                context: QueryContext::new(level_def.name.clone(), self.operation),
            };
            let deps = match prev_stage {
                Some(stage) => vec![stage],
                None => owned_deps.clone(),
            };
            let stage_id = builder.push(Stmt::Insert(stmt), deps, false, format!("{}.create", level_def.name));
            prev_stage = Some(stage_id);
            leaf_stage = Some(stage_id);
        }
        leaf_stage.ok_or_else(|| EngineError::internal(format!("{}: empty delegate chain", model_def.name)))
    }

    fn chain_level_has_generator(&self, chain: &[&ModelDef], id_field: &str) -> bool {
        chain.iter().any(|level| matches!(level.field(id_field).and_then(|f| f.default.as_ref()), Some(FieldDefault::Generator(_))))
    }

    /// The model that physically owns `db_column` on `leaf_def` (its own
    /// table, unless the field was copied down from a delegate base).
    fn level_for_column(&self, leaf_def: &ModelDef, db_column: &str) -> SmolStr {
        leaf_def
            .fields
            .values()
            .find(|f| f.db_column.as_str() == db_column)
            .and_then(|f| f.origin_model.clone())
            .unwrap_or_else(|| leaf_def.name.clone())
    }

    fn split_payload<'d>(&self, model_def: &ModelDef, data: &'d IndexMapPayload) -> EngineResult<(IndexMap<SmolStr, SqlExpr>, Vec<(SmolStr, &'d RelationWrite)>)> {
        let mut scalars = IndexMap::new();
        let mut relations = Vec::new();
        for (field_name, value) in data {
            let field = model_def
                .field(field_name)
                .ok_or_else(|| EngineError::validation(format!("{}: unknown field `{field_name}` in create data", model_def.name)))?;
            match value {
                DataField::Scalar(json) => {
                    if field.is_relation() {
                        return Err(EngineError::validation(format!("{}.{field_name}: relation field given a scalar value", model_def.name)));
                    }
                    scalars.insert(field.db_column.clone(), json_to_sql(json));
                }
                DataField::Relation(write) => {
                    if !field.is_relation() {
                        return Err(EngineError::validation(format!("{}.{field_name}: not a relation field", model_def.name)));
                    }
                    relations.push((field_name.clone(), write));
                }
            }
        }
        Ok((scalars, relations))
    }

    fn fill_generator_defaults(&self, model_def: &ModelDef, scalars: &mut IndexMap<SmolStr, SqlExpr>) -> EngineResult<()> {
        for field in model_def.scalar_fields() {
            if scalars.contains_key(&field.db_column) {
                continue;
            }
            match &field.default {
                Some(FieldDefault::Generator(kind)) => {
                    scalars.insert(field.db_column.clone(), SqlExpr::val(generators::generate(kind)));
                }
                Some(FieldDefault::Literal(v)) => {
                    scalars.insert(field.db_column.clone(), json_to_sql(v));
                }
                Some(FieldDefault::AuthPath(path)) => {
                    let mut cur = self.auth;
                    for seg in path {
                        cur = cur.and_then(|v| v.get(seg.as_str()));
                    }
                    scalars.insert(field.db_column.clone(), json_to_sql(cur.unwrap_or(&serde_json::Value::Null)));
                }
                None if field.updated_at => {
                    scalars.insert(field.db_column.clone(), self.dialect.current_timestamp());
                }
                None => {}
            }
        }
        Ok(())
    }

    /// Resolve an owned to-one relation write (`connect`/`create`/
    /// `connectOrCreate`) to the related row's id.
    fn resolve_owned_target(&self, builder: &mut StageBuilder, field_def: &entityql_schema::FieldDef, write: &RelationWrite) -> EngineResult<IdValue> {
        let FieldType::Model(related_name) = &field_def.field_type else {
            return Err(EngineError::internal("relation field without model type"));
        };
        let related_def = self.schema.model(related_name)?;

        if let Some(connect_where) = write.connect.first() {
            let stage = self.build_connect_select_stage(builder, related_def, connect_where)?;
            let db_col = related_id_column(related_def)?;
            return Ok(IdValue::Pending(stage, db_col));
        }
        if let Some(create_data) = write.create.first() {
            let (stage, ids) = self.build_entity(builder, related_def, create_data, None)?;
            return Ok(first_id_value(stage, ids));
        }
        if let Some((connect_where, create_data)) = write.connect_or_create.first() {
            let select_id = self.build_connect_select_stage(builder, related_def, connect_where)?;
            let (create_stage, ids) = self.build_entity(builder, related_def, create_data, None)?;
            builder.set_fallback(select_id, create_stage);
            let db_col = related_id_column(related_def)?;
            let _ = ids;
            return Ok(IdValue::Pending(select_id, db_col));
        }
        Err(EngineError::validation(format!("{}: a to-one relation needs connect, create, or connectOrCreate", related_def.name)))
    }

    fn build_connect_select_stage(&self, builder: &mut StageBuilder, related_def: &ModelDef, where_: &WhereNode) -> EngineResult<StageId> {
        let filter = FilterCompiler::new(self.schema);
        let alias: SmolStr = "t".into();
        let mut cond = filter.compile(&related_def.name, &alias, where_)?;
        cond = cond.and(self.compile_read_policy(&related_def.name, &alias)?);
        let select = SelectStmt {
            projection: id_columns_as_exprs(related_def),
            from: FromSource::table(related_def.db_table.clone(), Some(alias)),
            joins: vec![],
            where_: Some(cond),
            group_by: vec![],
            having: None,
            order_by: vec![],
            limit: Some(1),
            offset: None,
            distinct: DistinctKind::None,
            distinct_on: vec![],
            context: QueryContext::new(related_def.name.clone(), "connect"),
        };
        Ok(builder.push(Stmt::Select(select), vec![], true, format!("{}.connect", related_def.name)))
    }

    fn compile_read_policy(&self, model: &str, alias: &str) -> EngineResult<SqlExpr> {
        let compiler = entityql_expr::ExprCompiler::new(self.schema, self.dialect);
        let ctx = entityql_expr::CompileCtx::new(model, alias, self.auth, self.operation);
        entityql_expr::compile_policy(&compiler, model, entityql_schema::PolicyOp::Read, &ctx)
    }

    fn apply_non_owned_write(
        &self,
        builder: &mut StageBuilder,
        model_def: &'a ModelDef,
        self_ids: &[(SmolStr, IdValue)],
        field_def: &entityql_schema::FieldDef,
        field_name: &str,
        write: &RelationWrite,
        insert_stage: StageId,
    ) -> EngineResult<()> {
        let FieldType::Model(related_name) = &field_def.field_type else {
            return Err(EngineError::internal("relation field without model type"));
        };
        let related_def = self.schema.model(related_name)?;
        let rel = field_def.relation.as_ref().unwrap();
        let is_many_to_many = field_def.is_to_many() && !rel.owns_fk() && self.schema.join_table_for(&model_def.name, field_name).is_ok();
        let self_id = self_ids.first().cloned().map(|(col, _)| IdValue::Pending(insert_stage, col)).unwrap_or(IdValue::Pending(insert_stage, "id".into()));

        // `create` and `createMany` both insert one row per payload; the
        // planner never batches the `INSERT`s, so the two actions share one
        // loop (spec §4.1 create path step 7: "create, createMany").
        for create_data in write.create.iter().chain(write.create_many.iter()) {
            if is_many_to_many {
                let (related_stage, related_ids) = self.build_entity(builder, related_def, create_data, None)?;
                self.insert_join_row(builder, model_def, field_name, insert_stage, related_stage, related_ids)?;
            } else {
                self.build_entity(builder, related_def, create_data, Some((rel.opposite.as_str(), self_id.clone())))?;
            }
        }

        for where_ in &write.connect {
            if is_many_to_many {
                let related_stage = self.build_connect_select_stage(builder, related_def, where_)?;
                let db_col = related_id_column(related_def)?;
                self.insert_join_row(builder, model_def, field_name, insert_stage, related_stage, vec![(db_col.clone(), IdValue::Pending(related_stage, db_col))])?;
            } else {
                self.connect_via_update(builder, related_def, where_, rel.opposite.as_str(), insert_stage, self_ids)?;
            }
        }

        for (where_, create_data) in &write.connect_or_create {
            let select_id = self.build_connect_select_stage(builder, related_def, where_)?;
            if is_many_to_many {
                // Whichever of select/fallback actually produces a row, the
                // join row references it through the select stage's own
                // deferred slot — the Executor substitutes the fallback's
                // `RETURNING` there when the select comes back empty.
                let (create_stage, _) = self.build_entity(builder, related_def, create_data, None)?;
                builder.set_fallback(select_id, create_stage);
                let db_col = related_id_column(related_def)?;
                self.insert_join_row(builder, model_def, field_name, insert_stage, select_id, vec![(db_col.clone(), IdValue::Pending(select_id, db_col))])?;
            } else {
                let (create_stage, _) = self.build_entity(builder, related_def, create_data, Some((rel.opposite.as_str(), self_id.clone())))?;
                builder.set_fallback(select_id, create_stage);
            }
        }

        Ok(())
    }

    fn connect_via_update(
        &self,
        builder: &mut StageBuilder,
        related_def: &ModelDef,
        where_: &WhereNode,
        opposite_field: &str,
        insert_stage: StageId,
        self_ids: &[(SmolStr, IdValue)],
    ) -> EngineResult<()> {
        let filter = FilterCompiler::new(self.schema);
        let alias: SmolStr = "t".into();
        let mut cond = filter.compile(&related_def.name, &alias, where_)?;
        cond = cond.and(self.compile_read_policy(&related_def.name, &alias)?);
        let opposite = related_def
            .field(opposite_field)
            .and_then(|f| f.relation.as_ref())
            .ok_or_else(|| EngineError::internal(format!("{}.{opposite_field} is not a relation", related_def.name)))?;
        let self_col = self_ids.first().map(|(c, _)| c.clone()).unwrap_or_else(|| "id".into());
        let assignments = opposite.fields.iter().map(|col| (col.clone(), deferred_ref(insert_stage, self_col.clone()))).collect();
        let update = UpdateStmt {
            table: SqlExpr::table(related_def.name.clone()),
            assignments,
            from: None,
            where_: Some(cond),
            returning: None,
            limit: None,
            context: QueryContext::new(related_def.name.clone(), "connect"),
        };
        builder.push(Stmt::Update(update), vec![insert_stage], false, format!("{}.connect", related_def.name));
        Ok(())
    }

    fn insert_join_row(
        &self,
        builder: &mut StageBuilder,
        model_def: &ModelDef,
        field_name: &str,
        self_stage: StageId,
        related_stage: StageId,
        related_ids: Vec<(SmolStr, IdValue)>,
    ) -> EngineResult<()> {
        let join = self.schema.join_table_for(&model_def.name, field_name)?;
        let self_is_a = join.side_a.model == model_def.name;
        let self_col = if self_is_a { join.side_a.column.clone() } else { join.side_b.column.clone() };
        let related_col = if self_is_a { join.side_b.column.clone() } else { join.side_a.column.clone() };

        let self_id_col = model_def.id_fields.first().map(|f| model_def.field(f).map(|fd| fd.db_column.clone()).unwrap_or_else(|| f.clone())).unwrap_or_default();
        let self_expr = deferred_ref(self_stage, self_id_col);
        let related_expr = related_ids.first().map(|(_, v)| v.as_expr()).unwrap_or(deferred_ref(related_stage, "id"));

        let insert = InsertStmt {
            table: SqlExpr::table(join.table_name.clone()),
            columns: vec![self_col, related_col],
            rows: vec![vec![self_expr, related_expr]],
            on_conflict: Some(OnConflict {
                target_columns: vec!["A".into(), "B".into()],
                action: OnConflictAction::DoNothing,
                update_assignments: vec![],
                update_where: None,
            }),
            returning: None,
            context: QueryContext::new(join.table_name.clone(), "connect"),
        };
        builder.push(Stmt::Insert(insert), vec![self_stage, related_stage], false, format!("{}.{field_name}.join", model_def.name));
        Ok(())
    }
}

fn related_id_column(related_def: &ModelDef) -> EngineResult<SmolStr> {
    let id_field = related_def.id_fields.first().ok_or_else(|| EngineError::internal(format!("{}: model has no id field", related_def.name)))?;
    Ok(related_def.field(id_field).map(|f| f.db_column.clone()).unwrap_or_else(|| id_field.clone()))
}

fn first_id_value(stage: StageId, ids: Vec<(SmolStr, IdValue)>) -> IdValue {
    ids.into_iter().next().map(|(_, v)| v).unwrap_or(IdValue::Pending(stage, "id".into()))
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

fn json_to_sql(value: &serde_json::Value) -> SqlExpr {
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
    use entityql_dialect::for_provider;
    use entityql_schema::{FieldDef, FieldType as FT, PolicySet, Provider, ScalarType};

    fn field(name: &str, ty: FT, default: Option<FieldDefault>) -> FieldDef {
        FieldDef {
            name: name.into(), db_column: name.into(), field_type: ty, array: false, optional: false,
            id: name == "id", unique: name == "id", updated_at: false, computed: false,
            origin_model: None, relation: None, foreign_key_for: vec![], default, attributes: vec![],
        }
    }

    fn schema() -> Schema {
        let mut fields = IndexMap::new();
        fields.insert(SmolStr::from("id"), field("id", FT::Scalar(ScalarType::String), Some(FieldDefault::Generator(entityql_schema::GeneratorKind::Cuid))));
        fields.insert(SmolStr::from("title"), field("title", FT::Scalar(ScalarType::String), None));
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
    fn create_fills_the_generator_default_id() {
        let schema = schema();
        let dialect = for_provider(Provider::PostgresLike);
        let planner = CreatePlanner { schema: &schema, dialect, auth: None, operation: "create" };
        let mut data = IndexMap::new();
        data.insert(SmolStr::from("title"), DataField::Scalar(serde_json::json!("hello")));
        let args = CreateArgs { data, selection: crate::args::Selection::default() };
        let plan = planner.plan("Post", &args).unwrap();
        assert_eq!(plan.stages.len(), 1);
        assert_eq!(plan.root_stage, plan.stages[0].id);
        let Stmt::Insert(insert) = &plan.stages[0].ast else { panic!("expected insert") };
        assert!(insert.columns.contains(&SmolStr::from("id")));
        assert!(insert.columns.contains(&SmolStr::from("title")));
    }

    #[test]
    fn create_on_delegate_base_is_rejected() {
        let mut fields = IndexMap::new();
        fields.insert(SmolStr::from("id"), field("id", FT::Scalar(ScalarType::String), Some(FieldDefault::Generator(entityql_schema::GeneratorKind::Cuid))));
        let model = ModelDef {
            name: "Content".into(), db_table: "contents".into(), fields, id_fields: vec!["id".into()],
            unique_fields: vec![], is_delegate: true, base_model: None, discriminator_field: Some("kind".into()),
            policies: PolicySet::default(),
        };
        let mut models = IndexMap::new();
        models.insert(SmolStr::from("Content"), model);
        let schema = Schema::build(models, IndexMap::new(), Provider::PostgresLike, None);

        let dialect = for_provider(Provider::PostgresLike);
        let planner = CreatePlanner { schema: &schema, dialect, auth: None, operation: "create" };
        let args = CreateArgs { data: IndexMap::new(), selection: crate::args::Selection::default() };
        assert!(planner.plan("Content", &args).is_err());
    }
}
