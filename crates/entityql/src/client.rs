//! The public per-model client surface (spec §6.3): wires the CRUD
//! Operation Planner, the Policy/Name-Mapping Rewriters, and the Executor
//! Pipeline together behind one `Client` so a caller only ever hands in
//! normalized `entityql_planner::args` values and gets back `Row`s.

use std::sync::Arc;

use entityql_ast::{SqlExpr, Stmt};
use entityql_dialect::Dialect;
use entityql_errors::{EngineError, EngineResult};
use entityql_executor::{CancellationToken, Compiler, Driver, Executor, MutationRequest, Plugin, Row};
use entityql_planner::args::{
    AggregateArgs, CountArgs, CreateArgs, CreateManyArgs, DeleteArgs, DeleteManyArgs, FindArgs, GroupByArgs, ProjectedField, Selection,
    UpdateArgs, UpdateManyArgs, UpsertArgs,
};
use entityql_planner::{AggregatePlanner, CreatePlanner, DeletePlanner, FindPlanner, Stage, StageId, UpdatePlanner};
use entityql_rewrite::PolicyRewriter;
use entityql_schema::{ModelDef, Schema};
use smol_str::SmolStr;

use crate::config::EngineConfig;

/// The alias every top-level planner call and every read-back `SELECT`
/// binds its root table to. Nested relation/count subqueries pick their own
/// child aliases off of this one (`entityql_planner::find`).
const ROOT_ALIAS: &str = "t";

/// Wires one `Schema` to one `Driver`/`Compiler` pair and a plugin chain.
/// Cheap to construct; holds only borrows and `Arc`s, so nothing stops a
/// caller from building a fresh one per request if that's more convenient
/// than threading a long-lived value through their own code.
pub struct Client<'a> {
    schema: &'a Schema,
    dialect: &'a dyn Dialect,
    driver: Arc<dyn Driver>,
    compiler: Arc<dyn Compiler>,
    plugins: Vec<Arc<dyn Plugin>>,
    config: EngineConfig,
    auth: Option<&'a serde_json::Value>,
}

impl<'a> Client<'a> {
    pub fn new(schema: &'a Schema, driver: Arc<dyn Driver>, compiler: Arc<dyn Compiler>, config: EngineConfig) -> Self {
        Client { schema, dialect: entityql_dialect::for_provider(config.provider), driver, compiler, plugins: Vec::new(), config, auth: None }
    }

    pub fn with_plugin(mut self, plugin: Arc<dyn Plugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Binds the `auth` value every policy expression's `currentUser()`
    /// resolves against (spec §4.3). `None` models an anonymous request.
    pub fn with_auth(mut self, auth: &'a serde_json::Value) -> Self {
        self.auth = Some(auth);
        self
    }

    fn executor(&self) -> Executor<'a> {
        Executor {
            schema: self.schema,
            dialect: self.dialect,
            driver: self.driver.clone(),
            compiler: self.compiler.clone(),
            plugins: self.plugins.clone(),
            auth: self.auth,
            default_isolation: self.config.default_isolation,
        }
    }

    fn model(&self, name: &str) -> EngineResult<&'a ModelDef> {
        self.schema.model(name)
    }

    // ---- find ----------------------------------------------------------

    pub async fn find_unique(&self, model: &str, args: FindArgs, cancel: &CancellationToken) -> EngineResult<Option<Row>> {
        Ok(self.find_rows(model, "findUnique", args, cancel).await?.into_iter().next())
    }

    pub async fn find_unique_or_throw(&self, model: &str, args: FindArgs, cancel: &CancellationToken) -> EngineResult<Row> {
        self.find_unique(model, args, cancel).await?.ok_or_else(|| EngineError::not_found(model, "findUniqueOrThrow matched no row"))
    }

    pub async fn find_first(&self, model: &str, args: FindArgs, cancel: &CancellationToken) -> EngineResult<Option<Row>> {
        Ok(self.find_rows(model, "findFirst", args, cancel).await?.into_iter().next())
    }

    pub async fn find_first_or_throw(&self, model: &str, args: FindArgs, cancel: &CancellationToken) -> EngineResult<Row> {
        self.find_first(model, args, cancel).await?.ok_or_else(|| EngineError::not_found(model, "findFirstOrThrow matched no row"))
    }

    pub async fn find_many(&self, model: &str, args: FindArgs, cancel: &CancellationToken) -> EngineResult<Vec<Row>> {
        self.find_rows(model, "findMany", args, cancel).await
    }

    async fn find_rows(&self, model: &str, operation: &'static str, args: FindArgs, cancel: &CancellationToken) -> EngineResult<Vec<Row>> {
        let planner = FindPlanner { schema: self.schema, dialect: self.dialect, auth: self.auth, operation };
        let plan = planner.plan(model, ROOT_ALIAS, &args)?;
        let reverse_rows = plan.reverse_rows;
        let rows = self.executor().execute_find(model, operation, plan.select, cancel).await?;
        let mut rows = dedup_in_memory(rows, &plan.in_memory_distinct);
        // Negative `take` ran the query with sort keys flipped (see
        // `FindPlan::reverse_rows`) — flip the fetched rows back to the
        // order the caller actually asked for.
        if reverse_rows {
            rows.reverse();
        }
        Ok(rows)
    }

    // ---- create ----------------------------------------------------------

    #[tracing::instrument(skip(self, args, cancel), fields(model))]
    pub async fn create(&self, model: &str, args: CreateArgs, cancel: &CancellationToken) -> EngineResult<Row> {
        let planner = CreatePlanner { schema: self.schema, dialect: self.dialect, auth: self.auth, operation: "create" };
        let plan = planner.plan(model, &args)?;
        let rows = self.run_mutation(model, "create", plan.stages, plan.root_stage, &args.selection, cancel).await?;
        rows.into_iter().next().ok_or_else(|| EngineError::internal(format!("{model}: create produced no row")))
    }

    /// Prisma-style `createMany`: no per-row selection, just the number of
    /// rows actually inserted (which `skipDuplicates` can make smaller than
    /// `args.data.len()`). Always asks the planner for id-only `RETURNING`
    /// regardless of `args.return_rows`, since it only needs the row count.
    pub async fn create_many(&self, model: &str, mut args: CreateManyArgs, cancel: &CancellationToken) -> EngineResult<u64> {
        args.return_rows = true;
        let rows = self.run_create_many(model, args, cancel).await?;
        Ok(rows.len() as u64)
    }

    /// `createManyAndReturn`: same insert, but the caller gets the full
    /// selected rows back through a read-back pass (relation projections in
    /// `selection` are not supported here — see `scalar_projection`).
    pub async fn create_many_and_return(&self, model: &str, mut args: CreateManyArgs, selection: &Selection, cancel: &CancellationToken) -> EngineResult<Vec<Row>> {
        args.return_rows = true;
        let rows = self.run_create_many(model, args, cancel).await?;
        self.read_back_many(model, rows, selection, cancel).await
    }

    async fn run_create_many(&self, model: &str, args: CreateManyArgs, cancel: &CancellationToken) -> EngineResult<Vec<Row>> {
        let planner = CreatePlanner { schema: self.schema, dialect: self.dialect, auth: self.auth, operation: "createMany" };
        let stages = planner.plan_create_many(model, &args)?;
        self.run_bulk_stages(stages, "createMany", cancel).await
    }

    // ---- update ----------------------------------------------------------

    #[tracing::instrument(skip(self, args, cancel), fields(model))]
    pub async fn update(&self, model: &str, args: UpdateArgs, cancel: &CancellationToken) -> EngineResult<Row> {
        let planner = UpdatePlanner { schema: self.schema, dialect: self.dialect, auth: self.auth, operation: "update" };
        let plan = planner.plan(model, &args)?;
        let rows = self.run_mutation(model, "update", plan.stages, plan.root_stage, &args.selection, cancel).await?;
        rows.into_iter().next().ok_or_else(|| EngineError::not_found(model, "update matched no row"))
    }

    pub async fn update_many(&self, model: &str, args: UpdateManyArgs, cancel: &CancellationToken) -> EngineResult<u64> {
        let rows = self.run_update_many(model, args, cancel).await?;
        Ok(rows.len() as u64)
    }

    pub async fn update_many_and_return(&self, model: &str, args: UpdateManyArgs, selection: &Selection, cancel: &CancellationToken) -> EngineResult<Vec<Row>> {
        let rows = self.run_update_many(model, args, cancel).await?;
        self.read_back_many(model, rows, selection, cancel).await
    }

    async fn run_update_many(&self, model: &str, args: UpdateManyArgs, cancel: &CancellationToken) -> EngineResult<Vec<Row>> {
        let model_def = self.model(model)?;
        let planner = UpdatePlanner { schema: self.schema, dialect: self.dialect, auth: self.auth, operation: "updateMany" };
        let mut stages = planner.plan_update_many(model, &args)?;
        force_id_returning(&mut stages, model_def);
        self.run_bulk_stages(stages, "updateMany", cancel).await
    }

    /// `upsert` (spec §4.1 "Design Notes"): try the `update` first under its
    /// own unique filter; a zero-row result means nothing matched, so fall
    /// back to `create`. Two separate `Executor::execute_mutation` calls
    /// rather than one combined statement, matching the shape the planner
    /// already exposes (no `UpsertPlanner` — an update plan and a create
    /// plan composed by the caller).
    pub async fn upsert(&self, model: &str, args: UpsertArgs, cancel: &CancellationToken) -> EngineResult<Row> {
        let update_args = UpdateArgs { where_: args.where_.clone(), data: args.update, selection: args.selection.clone() };
        let update_planner = UpdatePlanner { schema: self.schema, dialect: self.dialect, auth: self.auth, operation: "upsert" };
        let update_plan = update_planner.plan(model, &update_args)?;
        let updated = self.run_mutation(model, "upsert", update_plan.stages, update_plan.root_stage, &update_args.selection, cancel).await?;
        if let Some(row) = updated.into_iter().next() {
            return Ok(row);
        }

        let create_args = CreateArgs { data: args.create, selection: update_args.selection };
        let create_planner = CreatePlanner { schema: self.schema, dialect: self.dialect, auth: self.auth, operation: "upsert" };
        let create_plan = create_planner.plan(model, &create_args)?;
        let created = self.run_mutation(model, "upsert", create_plan.stages, create_plan.root_stage, &create_args.selection, cancel).await?;
        created.into_iter().next().ok_or_else(|| EngineError::internal(format!("{model}: upsert produced no row")))
    }

    // ---- delete ----------------------------------------------------------

    #[tracing::instrument(skip(self, args, cancel), fields(model))]
    pub async fn delete(&self, model: &str, args: DeleteArgs, cancel: &CancellationToken) -> EngineResult<Row> {
        let planner = DeletePlanner { schema: self.schema, dialect: self.dialect, auth: self.auth, operation: "delete" };
        let plan = planner.plan(model, &args)?;
        let rows = self.run_mutation(model, "delete", plan.stages, plan.root_stage, &args.selection, cancel).await?;
        rows.into_iter().next().ok_or_else(|| EngineError::not_found(model, "delete matched no row"))
    }

    pub async fn delete_many(&self, model: &str, args: DeleteManyArgs, cancel: &CancellationToken) -> EngineResult<u64> {
        let model_def = self.model(model)?;
        let planner = DeletePlanner { schema: self.schema, dialect: self.dialect, auth: self.auth, operation: "deleteMany" };
        let mut stages = planner.plan_delete_many(model, &args)?;
        force_id_returning(&mut stages, model_def);
        let rows = self.run_bulk_stages(stages, "deleteMany", cancel).await?;
        Ok(rows.len() as u64)
    }

    // ---- aggregate ----------------------------------------------------------

    pub async fn count(&self, model: &str, args: CountArgs, cancel: &CancellationToken) -> EngineResult<Row> {
        let planner = AggregatePlanner { schema: self.schema, dialect: self.dialect, auth: self.auth, operation: "count" };
        let select = planner.plan_count(model, &args)?;
        let rows = self.executor().execute_aggregate(select, cancel).await?;
        rows.into_iter().next().ok_or_else(|| EngineError::internal(format!("{model}: count returned no row")))
    }

    pub async fn aggregate(&self, model: &str, args: AggregateArgs, cancel: &CancellationToken) -> EngineResult<Row> {
        let planner = AggregatePlanner { schema: self.schema, dialect: self.dialect, auth: self.auth, operation: "aggregate" };
        let select = planner.plan_aggregate(model, &args)?;
        let rows = self.executor().execute_aggregate(select, cancel).await?;
        rows.into_iter().next().ok_or_else(|| EngineError::internal(format!("{model}: aggregate returned no row")))
    }

    pub async fn group_by(&self, model: &str, args: GroupByArgs, cancel: &CancellationToken) -> EngineResult<Vec<Row>> {
        let planner = AggregatePlanner { schema: self.schema, dialect: self.dialect, auth: self.auth, operation: "groupBy" };
        let select = planner.plan_group_by(model, &args)?;
        self.executor().execute_aggregate(select, cancel).await
    }

    // ---- shared mutation plumbing ----------------------------------------------------------

    /// Runs one planned write whose root stage's `RETURNING` is already
    /// narrowed to id columns (every `*Planner::plan` does this for its
    /// root/leaf stage), then re-reads the affected rows under the read
    /// policy with the caller's selection (spec §4.4 "Returning"). Always
    /// attaching a read-back keeps this one code path correct for every
    /// mutation regardless of whether the caller's selection happens to be
    /// id-only.
    async fn run_mutation(&self, model: &str, operation: &'static str, stages: Vec<Stage>, root_stage: StageId, selection: &Selection, cancel: &CancellationToken) -> EngineResult<Vec<Row>> {
        // `build_read_back_select` binds its `FROM` to the bare model name
        // (`PolicyRewriter::build_read_back_select`), so the projection's
        // own references must use that same alias, not the planner's `t`.
        let policy = self.policy_rewriter("readBack");
        let projection = scalar_projection(self.model(model)?, &policy, model, selection)?;
        let (_, read_back) = policy.plan_read_back(model, projection)?;
        let request = MutationRequest { model: model.into(), operation: operation.into(), stages, root_stage, read_back: Some(read_back) };
        self.executor().execute_mutation(request, cancel).await
    }

    /// `updateMany`/`deleteMany`/`createMany`: one stage, no relation
    /// pipeline, id columns forced onto `RETURNING` (see
    /// `force_id_returning`) purely so the Executor's result length tells
    /// the caller how many rows were actually touched.
    async fn run_bulk_stages(&self, stages: Vec<Stage>, operation: &'static str, cancel: &CancellationToken) -> EngineResult<Vec<Row>> {
        let root_stage = stages.first().map(|s| s.id).ok_or_else(|| EngineError::internal(format!("{operation}: planner produced no stage")))?;
        let model = stages.first().and_then(|s| stage_model(&s.ast)).unwrap_or_default();
        let request = MutationRequest { model, operation: operation.into(), stages, root_stage, read_back: None };
        self.executor().execute_mutation(request, cancel).await
    }

    /// `createManyAndReturn`/`updateManyAndReturn`: the bulk stage already
    /// `RETURNING`-ed id columns; re-read those ids under the read policy
    /// with the caller's selection, the same protocol a single mutation's
    /// read-back uses.
    async fn read_back_many(&self, model: &str, id_rows: Vec<Row>, selection: &Selection, cancel: &CancellationToken) -> EngineResult<Vec<Row>> {
        if id_rows.is_empty() {
            return Ok(Vec::new());
        }
        let policy = self.policy_rewriter("readBack");
        let projection = scalar_projection(self.model(model)?, &policy, model, selection)?;
        let (_, plan) = policy.plan_read_back(model, projection)?;
        let id_columns: Vec<Vec<SqlExpr>> = id_rows
            .iter()
            .map(|row| plan.id_columns.iter().map(|c| SqlExpr::val(json_to_ast_value(row.get(c.as_str())))).collect())
            .collect();
        let select = policy.build_read_back_select(&plan, id_columns)?;
        self.executor().execute_aggregate(select, cancel).await
    }

    fn policy_rewriter(&self, operation: &'a str) -> PolicyRewriter<'a> {
        PolicyRewriter { schema: self.schema, dialect: self.dialect, auth: self.auth, operation }
    }
}

/// Narrows a mutation's `Selection` to the scalar columns `RETURNING`/a
/// read-back can project. Relation and `_count` projections inside a
/// create/update/delete selection are not built out in this pass (the same
/// limitation `entityql_planner::update`'s nested relation-write handling
/// already documents) — `PolicyRewriter::build_read_back_select` has no
/// `joins` slot of its own, so a relation subquery built the way
/// `FindPlanner` builds one would silently lose its join.
fn scalar_projection(model_def: &ModelDef, policy: &PolicyRewriter<'_>, alias: &str, selection: &Selection) -> EngineResult<Vec<SqlExpr>> {
    let scalar_column = |field: &entityql_schema::FieldDef| SqlExpr::Selection { expr: Box::new(SqlExpr::reference(alias, field.db_column.clone())), alias: Some(field.name.clone()) };

    let columns: Vec<SqlExpr> = match selection {
        Selection::AllScalars { omit } => model_def.scalar_fields().filter(|f| !omit.contains(&f.name)).map(scalar_column).collect(),
        Selection::Include { omit, relations } => {
            if !relations.is_empty() {
                return Err(EngineError::validation(format!("{}: relation projections in a mutation selection are not supported", model_def.name)));
            }
            model_def.scalar_fields().filter(|f| !omit.contains(&f.name)).map(scalar_column).collect()
        }
        Selection::Select(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    ProjectedField::Scalar(name) => {
                        let field = model_def
                            .field(name)
                            .filter(|f| f.is_scalar())
                            .ok_or_else(|| EngineError::validation(format!("{}: unknown scalar field `{name}` in selection", model_def.name)))?;
                        out.push(scalar_column(field));
                    }
                    ProjectedField::Relation(_) | ProjectedField::Count(_) => {
                        return Err(EngineError::validation(format!("{}: relation projections in a mutation selection are not supported", model_def.name)));
                    }
                }
            }
            out
        }
    };
    policy.apply_field_level_read(&model_def.name, alias, columns)
}

/// `updateMany`/`deleteMany` return only a count, so the Executor's
/// `Vec<Row>` is used purely as a length — this forces id columns onto
/// `RETURNING` when the planner left it `None` (it does, for those two
/// batch paths, since no caller selection exists to satisfy).
fn force_id_returning(stages: &mut [Stage], model_def: &ModelDef) {
    let id_columns: Vec<SqlExpr> = model_def
        .id_field_names()
        .iter()
        .map(|f| {
            let col = model_def.field(f).map(|fd| fd.db_column.clone()).unwrap_or_else(|| f.clone());
            SqlExpr::Selection { expr: Box::new(SqlExpr::column(col)), alias: None }
        })
        .collect();
    for stage in stages {
        match &mut stage.ast {
            Stmt::Insert(ins) if ins.returning.is_none() => ins.returning = Some(id_columns.clone()),
            Stmt::Update(upd) if upd.returning.is_none() => upd.returning = Some(id_columns.clone()),
            Stmt::Delete(del) if del.returning.is_none() => del.returning = Some(id_columns.clone()),
            _ => {}
        }
    }
}

fn stage_model(stmt: &Stmt) -> Option<SmolStr> {
    match stmt {
        Stmt::Insert(i) => table_name(&i.table),
        Stmt::Update(u) => table_name(&u.table),
        Stmt::Delete(d) => table_name(&d.table),
        Stmt::Select(_) => None,
    }
}

fn table_name(expr: &SqlExpr) -> Option<SmolStr> {
    match expr {
        SqlExpr::Table { name, .. } => Some(name.clone()),
        _ => None,
    }
}

/// Mirrors `entityql_executor::pipeline`'s own JSON->AST value conversion;
/// the facade needs the same mapping to turn an id-only `RETURNING` row
/// back into a literal for the read-back's `WHERE id IN (...)`.
fn json_to_ast_value(value: Option<&serde_json::Value>) -> entityql_ast::Value {
    match value {
        None | Some(serde_json::Value::Null) => entityql_ast::Value::Null,
        Some(serde_json::Value::Bool(b)) => entityql_ast::Value::Bool(*b),
        Some(serde_json::Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                entityql_ast::Value::Int(i)
            } else {
                entityql_ast::Value::Float(n.as_f64().unwrap_or_default())
            }
        }
        Some(serde_json::Value::String(s)) => entityql_ast::Value::Str(s.as_str().into()),
        Some(other) => entityql_ast::Value::Json(other.clone()),
    }
}

/// The Executor Pipeline only dedupes by stage dependency order; a dialect
/// that can't express `DISTINCT ON` hands the planner's `in_memory_distinct`
/// fields back here (spec §4.6) for a post-fetch pass.
fn dedup_in_memory(rows: Vec<Row>, distinct: &[SmolStr]) -> Vec<Row> {
    if distinct.is_empty() {
        return rows;
    }
    let mut seen = std::collections::HashSet::new();
    rows.into_iter()
        .filter(|row| {
            let key: Vec<String> = distinct.iter().map(|c| row.get(c.as_str()).map(|v| v.to_string()).unwrap_or_default()).collect();
            seen.insert(key)
        })
        .collect()
}
