//! The update path (spec §4.1): effective-filter merge, automatic
//! `updatedAt`, delegate-chain-aware scalar assignment, and every relation
//! write action named in step 7 (`create`, `createMany`, `connect`,
//! `connectOrCreate`, `disconnect`, `set`, `update`, `updateMany`, `upsert`,
//! `delete`, `deleteMany`).
//!
//! An owning to-one field only ever has one related row to act on, so only
//! `connect`/`create` are meaningful there; the other actions are rejected
//! with `EngineError::validation` rather than silently ignored.

use entityql_ast::{DistinctKind, FromSource, InsertStmt, OnConflict, OnConflictAction, QueryContext, SelectStmt, SqlExpr, Stmt, UpdateStmt, Value};
use entityql_dialect::Dialect;
use entityql_errors::{EngineError, EngineResult};
use entityql_schema::{FieldType, ModelDef, PolicyOp, Schema};
use indexmap::IndexMap;
use smol_str::SmolStr;

use crate::args::{DataField, IndexMapPayload, RelationWrite, UpdateArgs, UpdateManyArgs, WhereNode};
use crate::create::CreatePlanner;
use crate::filter::FilterCompiler;
use crate::plan::{deferred_ref, Stage, StageBuilder, StageId};

/// What [`UpdatePlanner::plan`] hands the facade: the full stage pipeline
/// plus the stage whose `RETURNING` row is this model's own updated row
/// (as opposed to a relation-write's lookup/fk-update stages).
pub struct UpdatePlan {
    pub stages: Vec<Stage>,
    pub root_stage: StageId,
}

pub struct UpdatePlanner<'a> {
    pub schema: &'a Schema,
    pub dialect: &'a dyn Dialect,
    pub auth: Option<&'a serde_json::Value>,
    pub operation: &'a str,
}

impl<'a> UpdatePlanner<'a> {
    fn create_planner(&self) -> CreatePlanner<'a> {
        CreatePlanner { schema: self.schema, dialect: self.dialect, auth: self.auth, operation: self.operation }
    }

    fn compile_policy(&self, model: &str, alias: &str, op: PolicyOp) -> EngineResult<SqlExpr> {
        let compiler = entityql_expr::ExprCompiler::new(self.schema, self.dialect);
        let ctx = entityql_expr::CompileCtx::new(model, alias, self.auth, self.operation);
        entityql_expr::compile_policy(&compiler, model, op, &ctx)
    }

    pub fn plan(&self, model: &str, args: &UpdateArgs) -> EngineResult<UpdatePlan> {
        let model_def = self.schema.model(model)?;
        let filter = FilterCompiler::new(self.schema);
        let alias: SmolStr = "t".into();
        let mut where_ = filter.compile(model, &alias, &args.where_)?;
        where_ = where_.and(self.compile_policy(model, &alias, PolicyOp::Update)?);

        let (scalars, relations) = split_update_payload(model_def, &args.data)?;
        let mut assignments: Vec<(SmolStr, SqlExpr)> = scalars.into_iter().collect();
        self.fill_updated_at(model_def, &mut assignments);

        let mut builder = StageBuilder::new();
        let leaf_stage = self.emit_chain_updates(&mut builder, model_def, &assignments, where_)?;

        for (field_name, write) in &relations {
            let field_def = model_def.field(field_name).unwrap();
            self.apply_relation_write(&mut builder, model_def, field_def, field_name, write, leaf_stage)?;
        }

        Ok(UpdatePlan { stages: builder.finish(), root_stage: leaf_stage })
    }

    pub fn plan_update_many(&self, model: &str, args: &UpdateManyArgs) -> EngineResult<Vec<Stage>> {
        let model_def = self.schema.model(model)?;
        if model_def.has_base() || model_def.is_delegate {
            return Err(EngineError::validation(format!("{model}: `updateMany` is not supported on a polymorphic model")));
        }
        let filter = FilterCompiler::new(self.schema);
        let alias: SmolStr = "t".into();
        let mut where_ = match &args.where_ {
            Some(w) => filter.compile(model, &alias, w)?,
            None => SqlExpr::val(Value::Bool(true)),
        };
        where_ = where_.and(self.compile_policy(model, &alias, PolicyOp::Update)?);

        let mut scalars: IndexMap<SmolStr, SqlExpr> = IndexMap::new();
        for (field_name, value) in &args.data {
            let field = model_def
                .field(field_name)
                .filter(|f| f.is_scalar())
                .ok_or_else(|| EngineError::validation(format!("{model}: `{field_name}` is not a scalar field")))?;
            scalars.insert(field.db_column.clone(), compile_scalar_update(&field.db_column, value));
        }
        let mut assignments: Vec<(SmolStr, SqlExpr)> = scalars.into_iter().collect();
        self.fill_updated_at(model_def, &mut assignments);

        let mut builder = StageBuilder::new();
        if let Some(limit) = args.limit {
            if self.dialect.supports_update_with_limit() {
                let update = UpdateStmt {
                    table: SqlExpr::table(model_def.name.clone()),
                    assignments,
                    from: None,
                    where_: Some(where_),
                    returning: None,
                    limit: Some(limit),
                    context: QueryContext::new(model_def.name.clone(), "updateMany"),
                };
                builder.push(Stmt::Update(update), vec![], false, format!("{model}.updateMany"));
            } else {
                let id_subselect = self.id_subselect(model_def, where_, Some(limit));
                let update = UpdateStmt {
                    table: SqlExpr::table(model_def.name.clone()),
                    assignments,
                    from: None,
                    where_: Some(self.id_in_subselect(model_def, id_subselect)),
                    returning: None,
                    limit: None,
                    context: QueryContext::new(model_def.name.clone(), "updateMany"),
                };
                builder.push(Stmt::Update(update), vec![], false, format!("{model}.updateMany"));
            }
        } else {
            let update = UpdateStmt {
                table: SqlExpr::table(model_def.name.clone()),
                assignments,
                from: None,
                where_: Some(where_),
                returning: None,
                limit: None,
                context: QueryContext::new(model_def.name.clone(), "updateMany"),
            };
            builder.push(Stmt::Update(update), vec![], false, format!("{model}.updateMany"));
        }
        Ok(builder.finish())
    }

    fn fill_updated_at(&self, model_def: &ModelDef, assignments: &mut Vec<(SmolStr, SqlExpr)>) {
        for field in model_def.scalar_fields() {
            if field.updated_at && !assignments.iter().any(|(c, _)| c == &field.db_column) {
                assignments.push((field.db_column.clone(), self.dialect.current_timestamp()));
            }
        }
    }

    /// A single unique-filter `update` only ever needs one `UPDATE` per
    /// level (no `LIMIT`, since `where_` already pins a unique row).
    /// Multi-table delegate hierarchies reuse the leaf's id via a scalar
    /// subselect so every level's `UPDATE` names its own table directly.
    fn emit_chain_updates(&self, builder: &mut StageBuilder, model_def: &'a ModelDef, assignments: &[(SmolStr, SqlExpr)], where_: SqlExpr) -> EngineResult<StageId> {
        let chain = self.schema.delegate_chain(&model_def.name)?;
        if chain.len() == 1 {
            let update = UpdateStmt {
                table: SqlExpr::table(model_def.name.clone()),
                assignments: assignments.to_vec(),
                from: None,
                where_: Some(where_),
                returning: Some(id_columns_as_exprs(model_def)),
                limit: None,
                context: QueryContext::new(model_def.name.clone(), self.operation),
            };
            return Ok(builder.push(Stmt::Update(update), vec![], false, format!("{}.update", model_def.name)));
        }

        let id_subselect = self.id_subselect(model_def, where_, None);
        let mut by_level: IndexMap<SmolStr, Vec<(SmolStr, SqlExpr)>> = IndexMap::new();
        for (col, expr) in assignments {
            let owner = model_def
                .fields
                .values()
                .find(|f| f.db_column.as_str() == col.as_str())
                .and_then(|f| f.origin_model.clone())
                .unwrap_or_else(|| model_def.name.clone());
            by_level.entry(owner).or_default().push((col.clone(), expr.clone()));
        }

        let mut leaf_stage = None;
        for level_def in &chain {
            let level_assignments = by_level.shift_remove(&level_def.name).unwrap_or_default();
            if level_assignments.is_empty() && level_def.name != model_def.name {
                continue;
            }
            let level_where = self.id_in_subselect(level_def, id_subselect.clone());
            let update = UpdateStmt {
                table: SqlExpr::table(level_def.name.clone()),
                assignments: level_assignments,
                from: None,
                where_: Some(level_where),
                returning: Some(id_columns_as_exprs(level_def)),
                limit: None,
                context: QueryContext::new(level_def.name.clone(), self.operation),
            };
            let stage_id = builder.push(Stmt::Update(update), vec![], false, format!("{}.update", level_def.name));
            if level_def.name == model_def.name {
                leaf_stage = Some(stage_id);
            }
        }
        leaf_stage.ok_or_else(|| EngineError::internal(format!("{}: update produced no leaf stage", model_def.name)))
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
            context: QueryContext::new(model_def.name.clone(), "update"),
        }
    }

    fn id_in_subselect(&self, level_def: &ModelDef, subselect: SelectStmt) -> SqlExpr {
        let id_col = level_def.id_fields.first().map(|f| level_def.field(f).map(|fd| fd.db_column.clone()).unwrap_or_else(|| f.clone())).unwrap_or_default();
        SqlExpr::binary(entityql_ast::BinOp::In, SqlExpr::column(id_col), SqlExpr::Subquery(Box::new(Stmt::Select(subselect))))
    }

    fn apply_relation_write(
        &self,
        builder: &mut StageBuilder,
        model_def: &'a ModelDef,
        field_def: &entityql_schema::FieldDef,
        field_name: &str,
        write: &RelationWrite,
        leaf_stage: StageId,
    ) -> EngineResult<()> {
        let FieldType::Model(related_name) = &field_def.field_type else {
            return Err(EngineError::internal("relation field without model type"));
        };
        let related_def = self.schema.model(related_name)?;
        let self_id_col = model_def.id_fields.first().map(|f| model_def.field(f).map(|fd| fd.db_column.clone()).unwrap_or_else(|| f.clone())).unwrap_or_default();

        if field_def.owns_fk() {
            // Owning to-one: connect/create simply reassigns this row's own
            // FK column(s); do it as a follow-up `UPDATE` keyed by the same
            // unique filter already used for the leaf update. There is only
            // ever one related row to point at, so every other action
            // (which all presuppose a collection) is rejected rather than
            // silently dropped.
            let rel = field_def.relation.as_ref().unwrap();
            if !write.disconnect.is_empty()
                || write.set.is_some()
                || !write.delete.is_empty()
                || !write.delete_many.is_empty()
                || !write.update.is_empty()
                || !write.update_many.is_empty()
                || !write.upsert.is_empty()
                || !write.create_many.is_empty()
                || !write.connect_or_create.is_empty()
            {
                return Err(EngineError::validation(format!("{}.{field_name}: only `connect`/`create` apply to an owning to-one relation update", model_def.name)));
            }
            if let Some(where_) = write.connect.first() {
                let target_stage = self.build_scalar_select(builder, related_def, where_)?;
                let assignments = rel.fields.iter().map(|c| (c.clone(), deferred_ref(target_stage, related_id_column(related_def)))).collect();
                self.push_fk_update(builder, model_def, assignments, leaf_stage, target_stage);
            }
            if let Some(data) = write.create.first() {
                let (_, ids) = self.create_planner().build_entity(builder, related_def, data, None)?;
                let assignments: Vec<(SmolStr, SqlExpr)> = rel.fields.iter().zip(ids.iter()).map(|(c, (_, id))| (c.clone(), id.as_expr())).collect();
                self.push_fk_update(builder, model_def, assignments, leaf_stage, leaf_stage);
            }
            return Ok(());
        }

        let is_many_to_many = field_def.is_to_many() && self.schema.join_table_for(&model_def.name, field_name).is_ok();
        let opposite_field = field_def.relation.as_ref().unwrap().opposite.clone();

        for where_ in &write.connect {
            if is_many_to_many {
                let target_stage = self.build_scalar_select(builder, related_def, where_)?;
                let related_expr = deferred_ref(target_stage, related_id_column(related_def));
                self.insert_join(builder, model_def, field_name, leaf_stage, target_stage, related_expr)?;
            } else {
                self.update_opposite_fk(builder, related_def, field_def, where_, leaf_stage, &self_id_col)?;
            }
        }
        for where_ in &write.disconnect {
            if is_many_to_many {
                let target_stage = self.build_scalar_select(builder, related_def, where_)?;
                self.delete_join(builder, model_def, field_name, related_def, leaf_stage, target_stage)?;
            } else {
                self.null_out_opposite_fk(builder, related_def, field_def, where_)?;
            }
        }
        if let Some(set) = &write.set {
            if is_many_to_many {
                self.delete_all_joins(builder, model_def, field_name, leaf_stage)?;
                for where_ in set {
                    let target_stage = self.build_scalar_select(builder, related_def, where_)?;
                    let related_expr = deferred_ref(target_stage, related_id_column(related_def));
                    self.insert_join(builder, model_def, field_name, leaf_stage, target_stage, related_expr)?;
                }
            }
        }
        // create and createMany both insert one row per payload (spec
        // §4.1 step 7: "create, createMany").
        for data in write.create.iter().chain(write.create_many.iter()) {
            if is_many_to_many {
                let (related_stage, related_ids) = self.create_planner().build_entity(builder, related_def, data, None)?;
                let related_expr = related_ids.first().map(|(_, id)| id.as_expr()).unwrap_or_else(|| deferred_ref(related_stage, related_id_column(related_def)));
                self.insert_join(builder, model_def, field_name, leaf_stage, related_stage, related_expr)?;
            } else {
                let parent_fk = crate::create::IdValue::Pending(leaf_stage, self_id_col.clone());
                self.create_planner().build_entity(builder, related_def, data, Some((opposite_field.as_str(), parent_fk)))?;
            }
        }
        // connectOrCreate: look the related row up; the Executor falls
        // back to the freshly built row's id if the lookup comes back
        // empty (same select/fallback shape as the create path).
        for (where_, data) in &write.connect_or_create {
            let select_id = self.build_scalar_select(builder, related_def, where_)?;
            if is_many_to_many {
                let (create_stage, related_ids) = self.create_planner().build_entity(builder, related_def, data, None)?;
                builder.set_fallback(select_id, create_stage);
                let related_expr = related_ids.first().map(|(_, id)| id.as_expr()).unwrap_or_else(|| deferred_ref(select_id, related_id_column(related_def)));
                self.insert_join(builder, model_def, field_name, leaf_stage, select_id, related_expr)?;
            } else {
                let parent_fk = crate::create::IdValue::Pending(leaf_stage, self_id_col.clone());
                let (create_stage, _) = self.create_planner().build_entity(builder, related_def, data, Some((opposite_field.as_str(), parent_fk)))?;
                builder.set_fallback(select_id, create_stage);
                self.update_opposite_fk(builder, related_def, field_def, where_, leaf_stage, &self_id_col)?;
            }
        }
        // update and updateMany compile to the same `UPDATE ... WHERE
        // <filter>` shape; the only difference is whether the caller
        // expects `where_` to pin a single row, which the planner does
        // not enforce either way.
        for (where_, data) in write.update.iter().chain(write.update_many.iter()) {
            self.update_related_scalars(builder, related_def, where_, data)?;
        }
        // upsert: apply the update unconditionally (a no-op if nothing
        // matches), and separately create+connect a new row through the
        // same select/fallback pattern as connectOrCreate.
        for (where_, update_data, create_data) in &write.upsert {
            self.update_related_scalars(builder, related_def, where_, update_data)?;
            let select_id = self.build_scalar_select(builder, related_def, where_)?;
            let parent_fk = crate::create::IdValue::Pending(leaf_stage, self_id_col.clone());
            let (create_stage, _) = self.create_planner().build_entity(builder, related_def, create_data, Some((opposite_field.as_str(), parent_fk)))?;
            builder.set_fallback(select_id, create_stage);
        }
        for where_ in &write.delete {
            let cond_stage = self.build_scalar_select(builder, related_def, where_)?;
            let delete = entityql_ast::DeleteStmt {
                table: SqlExpr::table(related_def.name.clone()),
                using: None,
                where_: Some(SqlExpr::binary(entityql_ast::BinOp::Eq, SqlExpr::column(related_id_column(related_def)), deferred_ref(cond_stage, related_id_column(related_def)))),
                returning: None,
                limit: None,
                context: QueryContext::new(related_def.name.clone(), "delete"),
            };
            builder.push(Stmt::Delete(delete), vec![cond_stage], false, format!("{}.delete", related_def.name));
        }
        // deleteMany deletes every matching row directly — unlike `delete`
        // it has no singular id to defer through, so it skips the
        // select-then-delete-by-id indirection entirely.
        for where_ in &write.delete_many {
            self.delete_related_many(builder, related_def, where_)?;
        }
        Ok(())
    }

    fn update_related_scalars(&self, builder: &mut StageBuilder, related_def: &ModelDef, where_: &WhereNode, data: &IndexMapPayload) -> EngineResult<()> {
        let filter = FilterCompiler::new(self.schema);
        let alias: SmolStr = "t".into();
        let mut cond = filter.compile(&related_def.name, &alias, where_)?;
        cond = cond.and(self.compile_policy(&related_def.name, &alias, PolicyOp::Update)?);
        let mut assignments = compile_relation_update_assignments(related_def, data)?;
        self.fill_updated_at(related_def, &mut assignments);
        let update = UpdateStmt {
            table: SqlExpr::table(related_def.name.clone()),
            assignments,
            from: None,
            where_: Some(cond),
            returning: None,
            limit: None,
            context: QueryContext::new(related_def.name.clone(), "update"),
        };
        builder.push(Stmt::Update(update), vec![], false, format!("{}.update", related_def.name));
        Ok(())
    }

    fn delete_related_many(&self, builder: &mut StageBuilder, related_def: &ModelDef, where_: &WhereNode) -> EngineResult<()> {
        let filter = FilterCompiler::new(self.schema);
        let alias: SmolStr = "t".into();
        let mut cond = filter.compile(&related_def.name, &alias, where_)?;
        cond = cond.and(self.compile_policy(&related_def.name, &alias, PolicyOp::Delete)?);
        let delete = entityql_ast::DeleteStmt {
            table: SqlExpr::table(related_def.name.clone()),
            using: None,
            where_: Some(cond),
            returning: None,
            limit: None,
            context: QueryContext::new(related_def.name.clone(), "deleteMany"),
        };
        builder.push(Stmt::Delete(delete), vec![], false, format!("{}.deleteMany", related_def.name));
        Ok(())
    }

    fn build_scalar_select(&self, builder: &mut StageBuilder, related_def: &ModelDef, where_: &WhereNode) -> EngineResult<StageId> {
        let filter = FilterCompiler::new(self.schema);
        let alias: SmolStr = "t".into();
        let mut cond = filter.compile(&related_def.name, &alias, where_)?;
        cond = cond.and(self.compile_policy(&related_def.name, &alias, PolicyOp::Read)?);
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
            context: QueryContext::new(related_def.name.clone(), "relation-lookup"),
        };
        Ok(builder.push(Stmt::Select(select), vec![], true, format!("{}.lookup", related_def.name)))
    }

    fn push_fk_update(&self, builder: &mut StageBuilder, model_def: &ModelDef, assignments: Vec<(SmolStr, SqlExpr)>, depends_on: StageId, _value_source: StageId) {
        let update = UpdateStmt {
            table: SqlExpr::table(model_def.name.clone()),
            assignments,
            from: None,
            where_: Some(SqlExpr::binary(
                entityql_ast::BinOp::Eq,
                SqlExpr::column(model_def.id_fields.first().map(|f| model_def.field(f).map(|fd| fd.db_column.clone()).unwrap_or_else(|| f.clone())).unwrap_or_default()),
                deferred_ref(depends_on, model_def.id_fields.first().cloned().unwrap_or_default()),
            )),
            returning: None,
            limit: None,
            context: QueryContext::new(model_def.name.clone(), "update"),
        };
        builder.push(Stmt::Update(update), vec![depends_on], false, format!("{}.relation-fk", model_def.name));
    }

    fn update_opposite_fk(&self, builder: &mut StageBuilder, related_def: &ModelDef, field_def: &entityql_schema::FieldDef, where_: &WhereNode, leaf_stage: StageId, self_id_col: &str) -> EngineResult<()> {
        let opposite_field = field_def.relation.as_ref().unwrap().opposite.clone();
        let filter = FilterCompiler::new(self.schema);
        let alias: SmolStr = "t".into();
        let mut cond = filter.compile(&related_def.name, &alias, where_)?;
        cond = cond.and(self.compile_policy(&related_def.name, &alias, PolicyOp::Update)?);
        let opposite = related_def.field(&opposite_field).and_then(|f| f.relation.as_ref()).ok_or_else(|| EngineError::internal("opposite relation missing"))?;
        let assignments = opposite.fields.iter().map(|c| (c.clone(), deferred_ref(leaf_stage, self_id_col.to_string()))).collect();
        let update = UpdateStmt {
            table: SqlExpr::table(related_def.name.clone()),
            assignments,
            from: None,
            where_: Some(cond),
            returning: None,
            limit: None,
            context: QueryContext::new(related_def.name.clone(), "connect"),
        };
        builder.push(Stmt::Update(update), vec![leaf_stage], false, format!("{}.connect", related_def.name));
        Ok(())
    }

    fn null_out_opposite_fk(&self, builder: &mut StageBuilder, related_def: &ModelDef, field_def: &entityql_schema::FieldDef, where_: &WhereNode) -> EngineResult<()> {
        let opposite_field = field_def.relation.as_ref().unwrap().opposite.clone();
        let filter = FilterCompiler::new(self.schema);
        let alias: SmolStr = "t".into();
        let mut cond = filter.compile(&related_def.name, &alias, where_)?;
        cond = cond.and(self.compile_policy(&related_def.name, &alias, PolicyOp::Update)?);
        let opposite = related_def.field(&opposite_field).and_then(|f| f.relation.as_ref()).ok_or_else(|| EngineError::internal("opposite relation missing"))?;
        let assignments = opposite.fields.iter().map(|c| (c.clone(), SqlExpr::val(Value::Null))).collect();
        let update = UpdateStmt {
            table: SqlExpr::table(related_def.name.clone()),
            assignments,
            from: None,
            where_: Some(cond),
            returning: None,
            limit: None,
            context: QueryContext::new(related_def.name.clone(), "disconnect"),
        };
        builder.push(Stmt::Update(update), vec![], false, format!("{}.disconnect", related_def.name));
        Ok(())
    }

    fn insert_join(&self, builder: &mut StageBuilder, model_def: &ModelDef, field_name: &str, self_stage: StageId, related_stage: StageId, related_expr: SqlExpr) -> EngineResult<()> {
        let join = self.schema.join_table_for(&model_def.name, field_name)?;
        let self_is_a = join.side_a.model == model_def.name;
        let (self_col, related_col) = if self_is_a { (join.side_a.column.clone(), join.side_b.column.clone()) } else { (join.side_b.column.clone(), join.side_a.column.clone()) };
        let self_id_col = model_def.id_fields.first().map(|f| model_def.field(f).map(|fd| fd.db_column.clone()).unwrap_or_else(|| f.clone())).unwrap_or_default();
        let insert = InsertStmt {
            table: SqlExpr::table(join.table_name.clone()),
            columns: vec![self_col, related_col],
            rows: vec![vec![deferred_ref(self_stage, self_id_col), related_expr]],
            on_conflict: Some(OnConflict { target_columns: vec!["A".into(), "B".into()], action: OnConflictAction::DoNothing, update_assignments: vec![], update_where: None }),
            returning: None,
            context: QueryContext::new(join.table_name.clone(), "connect"),
        };
        builder.push(Stmt::Insert(insert), vec![self_stage, related_stage], false, format!("{}.{field_name}.join", model_def.name));
        Ok(())
    }

    fn delete_join(&self, builder: &mut StageBuilder, model_def: &ModelDef, field_name: &str, related_def: &ModelDef, self_stage: StageId, related_stage: StageId) -> EngineResult<()> {
        let join = self.schema.join_table_for(&model_def.name, field_name)?;
        let self_is_a = join.side_a.model == model_def.name;
        let (self_col, related_col) = if self_is_a { (join.side_a.column.clone(), join.side_b.column.clone()) } else { (join.side_b.column.clone(), join.side_a.column.clone()) };
        let self_id_col = model_def.id_fields.first().map(|f| model_def.field(f).map(|fd| fd.db_column.clone()).unwrap_or_else(|| f.clone())).unwrap_or_default();
        let where_ = SqlExpr::column(self_col.clone())
            .binary_eq(deferred_ref(self_stage, self_id_col))
            .and(SqlExpr::column(related_col.clone()).binary_eq(deferred_ref(related_stage, related_id_column(related_def))));
        let delete = entityql_ast::DeleteStmt {
            table: SqlExpr::table(join.table_name.clone()),
            using: None,
            where_: Some(where_),
            returning: None,
            limit: None,
            context: QueryContext::new(join.table_name.clone(), "disconnect"),
        };
        builder.push(Stmt::Delete(delete), vec![self_stage, related_stage], false, format!("{}.{field_name}.unjoin", model_def.name));
        Ok(())
    }

    fn delete_all_joins(&self, builder: &mut StageBuilder, model_def: &ModelDef, field_name: &str, self_stage: StageId) -> EngineResult<()> {
        let join = self.schema.join_table_for(&model_def.name, field_name)?;
        let self_is_a = join.side_a.model == model_def.name;
        let self_col = if self_is_a { join.side_a.column.clone() } else { join.side_b.column.clone() };
        let self_id_col = model_def.id_fields.first().map(|f| model_def.field(f).map(|fd| fd.db_column.clone()).unwrap_or_else(|| f.clone())).unwrap_or_default();
        let delete = entityql_ast::DeleteStmt {
            table: SqlExpr::table(join.table_name.clone()),
            using: None,
            where_: Some(SqlExpr::column(self_col).binary_eq(deferred_ref(self_stage, self_id_col))),
            returning: None,
            limit: None,
            context: QueryContext::new(join.table_name.clone(), "set"),
        };
        builder.push(Stmt::Delete(delete), vec![self_stage], false, format!("{}.{field_name}.clear-joins", model_def.name));
        Ok(())
    }
}

trait BinaryEqExt {
    fn binary_eq(self, other: SqlExpr) -> SqlExpr;
}
impl BinaryEqExt for SqlExpr {
    fn binary_eq(self, other: SqlExpr) -> SqlExpr {
        SqlExpr::binary(entityql_ast::BinOp::Eq, self, other)
    }
}

fn split_update_payload<'d>(model_def: &ModelDef, data: &'d IndexMapPayload) -> EngineResult<(IndexMap<SmolStr, SqlExpr>, Vec<(SmolStr, &'d RelationWrite)>)> {
    let mut scalars = IndexMap::new();
    let mut relations = Vec::new();
    for (field_name, value) in data {
        let field = model_def
            .field(field_name)
            .ok_or_else(|| EngineError::validation(format!("{}: unknown field `{field_name}` in update data", model_def.name)))?;
        match value {
            DataField::Scalar(json) => {
                if field.is_relation() {
                    return Err(EngineError::validation(format!("{}.{field_name}: relation field given a scalar value", model_def.name)));
                }
                scalars.insert(field.db_column.clone(), compile_scalar_update(&field.db_column, json));
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

/// Compiles a nested relation `update`/`updateMany` payload the same way
/// the top-level update path does, but rejects a doubly-nested relation
/// write — the planner does not recurse a relation write inside a
/// relation write.
fn compile_relation_update_assignments(related_def: &ModelDef, data: &IndexMapPayload) -> EngineResult<Vec<(SmolStr, SqlExpr)>> {
    let mut assignments = Vec::new();
    for (field_name, value) in data {
        let field = related_def
            .field(field_name)
            .ok_or_else(|| EngineError::validation(format!("{}: unknown field `{field_name}` in nested update data", related_def.name)))?;
        match value {
            DataField::Scalar(json) => {
                if field.is_relation() {
                    return Err(EngineError::validation(format!("{}.{field_name}: relation field given a scalar value", related_def.name)));
                }
                assignments.push((field.db_column.clone(), compile_scalar_update(&field.db_column, json)));
            }
            DataField::Relation(_) => {
                return Err(EngineError::validation(format!("{}.{field_name}: nested relation writes are not supported inside a relation update", related_def.name)));
            }
        }
    }
    Ok(assignments)
}

/// Scalar update value shapes (spec §6.3): a bare literal is a `set`;
/// `{increment|decrement|multiply|divide: n}` and `{push: v}` (array
/// fields) are expressed relative to the column's own current value, so
/// the column being assigned also appears on the right-hand side.
fn compile_scalar_update(column: &str, value: &serde_json::Value) -> SqlExpr {
    if let serde_json::Value::Object(map) = value {
        if map.len() == 1 {
            if let Some(n) = map.get("increment") {
                return SqlExpr::binary(entityql_ast::BinOp::Add, SqlExpr::column(column), json_to_value(n));
            }
            if let Some(n) = map.get("decrement") {
                return SqlExpr::binary(entityql_ast::BinOp::Sub, SqlExpr::column(column), json_to_value(n));
            }
            if let Some(n) = map.get("multiply") {
                return SqlExpr::binary(entityql_ast::BinOp::Mul, SqlExpr::column(column), json_to_value(n));
            }
            if let Some(n) = map.get("divide") {
                return SqlExpr::binary(entityql_ast::BinOp::Div, SqlExpr::column(column), json_to_value(n));
            }
            if let Some(v) = map.get("push") {
                return SqlExpr::call("array_append", vec![SqlExpr::column(column), json_to_value(v)]);
            }
            if let Some(v) = map.get("set") {
                return json_to_value(v);
            }
        }
    }
    json_to_value(value)
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

fn related_id_column(related_def: &ModelDef) -> SmolStr {
    related_def.id_fields.first().map(|f| related_def.field(f).map(|fd| fd.db_column.clone()).unwrap_or_else(|| f.clone())).unwrap_or_default()
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
