//! The Executor Pipeline (spec §4.5): sequences a planned CRUD request
//! through hook plugins, a transaction, and the [`Driver`].

use std::sync::Arc;

use entityql_ast::{DistinctKind, FromSource, QueryContext, SelectStmt, SqlExpr, Stmt};
use entityql_dialect::Dialect;
use entityql_errors::{EngineError, EngineResult};
use entityql_planner::{Stage, StageId};
use entityql_rewrite::{NameMappingRewriter, PolicyRewriter, ReadBackPlan};
use entityql_schema::Schema;
use indexmap::IndexMap;
use smol_str::SmolStr;
use tracing::{debug, warn};

use crate::deferred::{substitute_deferred, StageResults};
use crate::driver::{Compiler, Connection, Driver, IsolationLevel, Row};
use crate::plugin::{InterceptionFilter, MutationContext, Plugin};
use crate::CancellationToken;

/// Everything needed to run one planned write request (spec §4.5). Built
/// by the facade from a `Vec<Stage>` the planner produced.
pub struct MutationRequest {
    pub model: SmolStr,
    pub operation: SmolStr,
    pub stages: Vec<Stage>,
    /// The stage whose `RETURNING` rows are the mutation's own result
    /// (the leaf insert for `create`, the (possibly id-subselect-wrapped)
    /// update/delete for those paths).
    pub root_stage: StageId,
    /// Set when the caller's selection needs more than id columns and the
    /// rows must be re-read under the read policy (spec §4.4 "read-back").
    pub read_back: Option<ReadBackPlan>,
}

pub struct Executor<'a> {
    pub schema: &'a Schema,
    pub dialect: &'a dyn Dialect,
    pub driver: Arc<dyn Driver>,
    pub compiler: Arc<dyn Compiler>,
    pub plugins: Vec<Arc<dyn Plugin>>,
    pub auth: Option<&'a serde_json::Value>,
    /// Isolation level opened for a mutation that needs a transaction
    /// (spec §5 default: `RepeatableRead`), taken from `EngineConfig`.
    pub default_isolation: IsolationLevel,
}

impl<'a> Executor<'a> {
    fn name_mapper(&self) -> NameMappingRewriter<'a> {
        NameMappingRewriter::new(self.schema)
    }

    fn policy_rewriter(&self, operation: &'a str) -> PolicyRewriter<'a> {
        PolicyRewriter { schema: self.schema, dialect: self.dialect, auth: self.auth, operation }
    }

    /// The one read path whose row-level policy the planner left for the
    /// caller to attach (`entityql_planner::FindPlanner`'s doc comment):
    /// nested relation/count subqueries embed their own policy at plan
    /// time, but the outermost `SELECT` does not.
    #[tracing::instrument(skip(self, select, cancel), fields(model, operation))]
    pub async fn execute_find(&self, model: &str, operation: &'a str, select: SelectStmt, cancel: &CancellationToken) -> EngineResult<Vec<Row>> {
        let select = self.policy_rewriter(operation).rewrite_select(select, model)?;
        self.run_select(Stmt::Select(select), cancel).await
    }

    /// `count`/`aggregate`/`groupBy`: the planner already embedded read
    /// policy directly into `where_`, so no `PolicyRewriter` pass is run
    /// here — only name-mapping.
    #[tracing::instrument(skip(self, select, cancel))]
    pub async fn execute_aggregate(&self, select: SelectStmt, cancel: &CancellationToken) -> EngineResult<Vec<Row>> {
        self.run_select(Stmt::Select(select), cancel).await
    }

    async fn run_select(&self, stmt: Stmt, cancel: &CancellationToken) -> EngineResult<Vec<Row>> {
        cancel.check()?;
        let mapped = self.name_mapper().rewrite(stmt)?;
        let compiled = self.compiler.compile(&mapped)?;
        let mut conn = self.driver.acquire_connection().await?;
        cancel.check()?;
        let result = conn.execute_query(&compiled).await;
        conn.release().await;
        Ok(result?.rows)
    }

    /// The per-request algorithm of spec §4.5, steps 1-7.
    #[tracing::instrument(skip(self, request, cancel), fields(model = %request.model, operation = %request.operation))]
    pub async fn execute_mutation(&self, request: MutationRequest, cancel: &CancellationToken) -> EngineResult<Vec<Row>> {
        let ctx = MutationContext { model: request.model.clone(), operation: request.operation.clone() };
        let intercepting: Vec<&Arc<dyn Plugin>> = self.plugins.iter().collect();
        let filters: Vec<(Arc<dyn Plugin>, InterceptionFilter)> =
            intercepting.into_iter().map(|p| (p.clone(), p.mutation_interception_filter(&ctx))).collect();
        let merged = filters.iter().fold(InterceptionFilter::default(), |acc, (_, f)| acc.merge(*f));

        let pre_images = if merged.load_before_mutation_entities
            && matches!(request.operation.as_str(), "update" | "delete" | "updateMany" | "deleteMany")
        {
            self.capture_pre_images(&request.stages, cancel).await?
        } else {
            Vec::new()
        };

        cancel.check()?;
        let needs_tx = merged.use_transaction_for_mutation || request.read_back.is_some() || request.stages.len() > 1;
        let mut conn = self.driver.acquire_connection().await?;
        if needs_tx {
            conn.begin_transaction(self.default_isolation).await?;
        }

        let outcome = self.run_stages_and_hooks(conn.as_mut(), &request, &ctx, &filters, merged, &pre_images, cancel).await;

        let rows = match outcome {
            Ok(rows) => {
                if needs_tx {
                    if let Err(e) = conn.commit().await {
                        conn.release().await;
                        return Err(e);
                    }
                }
                rows
            }
            Err(e) => {
                if needs_tx {
                    let _ = conn.rollback().await;
                }
                conn.release().await;
                return Err(e);
            }
        };

        if !merged.run_after_mutation_within_transaction {
            for (plugin, filter) in &filters {
                if !filter.intercept {
                    continue;
                }
                let after_rows = if merged.load_after_mutation_entities { rows.as_slice() } else { &[] };
                if let Err(e) = plugin.after_entity_mutation(&ctx, after_rows).await {
                    warn!(plugin = plugin.name(), error = %e, "after_entity_mutation failed outside the transaction; mutation already committed");
                }
            }
        }

        let final_rows = if let Some(plan) = &request.read_back {
            let result = self.run_read_back(conn.as_mut(), plan, &rows, cancel).await;
            conn.release().await;
            result?
        } else {
            conn.release().await;
            rows
        };

        Ok(final_rows)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_stages_and_hooks(
        &self,
        conn: &mut dyn Connection,
        request: &MutationRequest,
        ctx: &MutationContext,
        filters: &[(Arc<dyn Plugin>, InterceptionFilter)],
        merged: InterceptionFilter,
        pre_images: &[Row],
        cancel: &CancellationToken,
    ) -> EngineResult<Vec<Row>> {
        for (plugin, filter) in filters {
            if filter.intercept {
                plugin.before_entity_mutation(ctx, pre_images).await?;
            }
        }

        let results = self.run_stages(conn, &request.stages, cancel).await?;

        let rows = results
            .get(&request.root_stage)
            .map(|r| r.rows.clone())
            .ok_or_else(|| EngineError::internal(format!("root stage {} never ran", request.root_stage)))?;

        if merged.run_after_mutation_within_transaction {
            for (plugin, filter) in filters {
                if !filter.intercept {
                    continue;
                }
                let after_rows = if merged.load_after_mutation_entities { rows.as_slice() } else { &[] };
                plugin.after_entity_mutation(ctx, after_rows).await?;
            }
        }

        Ok(rows)
    }

    /// Runs every stage not reserved as another stage's `connectOrCreate`
    /// fallback, resolving deferred-value markers against already-collected
    /// results as it goes. A stage whose result comes back empty and which
    /// names a fallback runs that fallback immediately and stores its rows
    /// under *both* stage ids (spec: the fallback substitutes into the
    /// select stage's own slot regardless of which branch ran).
    async fn run_stages(&self, conn: &mut dyn Connection, stages: &[Stage], cancel: &CancellationToken) -> EngineResult<StageResults> {
        let by_id: IndexMap<StageId, &Stage> = stages.iter().map(|s| (s.id, s)).collect();
        let fallback_targets: std::collections::HashSet<StageId> = stages.iter().filter_map(|s| s.fallback).collect();

        let mut results: StageResults = IndexMap::new();
        for stage in stages {
            if fallback_targets.contains(&stage.id) {
                continue;
            }
            let result = self.run_one_stage(conn, stage, &results, cancel).await?;
            if result.rows.is_empty() {
                if let Some(fallback_id) = stage.fallback {
                    let fallback_stage =
                        by_id.get(&fallback_id).ok_or_else(|| EngineError::internal("fallback stage missing from plan"))?;
                    let fallback_result = self.run_one_stage(conn, fallback_stage, &results, cancel).await?;
                    results.insert(fallback_id, fallback_result.clone());
                    results.insert(stage.id, fallback_result);
                    continue;
                }
            }
            results.insert(stage.id, result);
        }
        Ok(results)
    }

    async fn run_one_stage(
        &self,
        conn: &mut dyn Connection,
        stage: &Stage,
        results: &StageResults,
        cancel: &CancellationToken,
    ) -> EngineResult<crate::driver::QueryResult> {
        cancel.check()?;
        let resolved = substitute_deferred(stage.ast.clone(), results)?;
        let resolved = self.apply_pre_statement_policy(resolved)?;
        let mapped = self.name_mapper().rewrite(resolved)?;
        let compiled = self.compiler.compile(&mapped)?;
        debug!(stage = %stage.label, query_id = %compiled.query_id, "executing stage");
        conn.execute_query(&compiled).await
    }

    /// Runs the two `PolicyRewriter` checks that only apply to `INSERT`
    /// statements and that the planner leaves for the Executor to perform
    /// once the row's values are fully resolved (spec §4.4, §7): the
    /// per-row pre-create count check, and folding the update-policy into
    /// an `ON CONFLICT DO UPDATE` clause.
    fn apply_pre_statement_policy(&self, stmt: Stmt) -> EngineResult<Stmt> {
        let Stmt::Insert(ins) = stmt else { return Ok(stmt) };
        let model = match &ins.table {
            SqlExpr::Table { name, .. } => name.clone(),
            _ => return Err(EngineError::internal("insert statement without a bare table reference")),
        };
        let rewriter = self.policy_rewriter("create");
        let ins = rewriter.rewrite_insert_on_conflict(ins, &model)?;
        Ok(Stmt::Insert(ins))
    }

    /// Spec §4.5 step 2: a `SELECT` through the pre-mutation state, built
    /// by lifting the table + (already policy-ANDed) `where_` off the
    /// first `UPDATE`/`DELETE` stage. Creates have no pre-image.
    async fn capture_pre_images(&self, stages: &[Stage], cancel: &CancellationToken) -> EngineResult<Vec<Row>> {
        let Some((table, where_)) = stages.iter().find_map(pre_image_source) else {
            return Ok(Vec::new());
        };
        let select = SelectStmt {
            projection: vec![SqlExpr::Star],
            from: FromSource::Table { expr: table, alias: None },
            joins: vec![],
            where_,
            group_by: vec![],
            having: None,
            order_by: vec![],
            limit: None,
            offset: None,
            distinct: DistinctKind::None,
            distinct_on: vec![],
            context: QueryContext::default(),
        };
        self.run_select(Stmt::Select(select), cancel).await
    }

    /// Spec §4.4/§4.5 step 7: re-read the mutated rows under the read
    /// policy, matched by id against whatever the mutation itself
    /// `RETURNING`-ed. A count mismatch means some row the mutation
    /// touched is no longer visible, which is a policy rejection rather
    /// than a silent partial result.
    async fn run_read_back(
        &self,
        conn: &mut dyn Connection,
        plan: &ReadBackPlan,
        mutated_rows: &[Row],
        cancel: &CancellationToken,
    ) -> EngineResult<Vec<Row>> {
        if mutated_rows.is_empty() {
            return Ok(Vec::new());
        }
        let returned_ids: Vec<Vec<SqlExpr>> = mutated_rows
            .iter()
            .map(|row| {
                plan.id_columns
                    .iter()
                    .map(|c| SqlExpr::val(row.get(c.as_str()).map(json_to_ast_value).unwrap_or(entityql_ast::Value::Null)))
                    .collect()
            })
            .collect();
        let expected = returned_ids.len();

        let select = self.policy_rewriter("readBack").build_read_back_select(plan, returned_ids)?;
        cancel.check()?;
        let mapped = self.name_mapper().rewrite(Stmt::Select(select))?;
        let compiled = self.compiler.compile(&mapped)?;
        let result = conn.execute_query(&compiled).await?;
        if result.rows.len() != expected {
            return Err(EngineError::rejected(plan.model.as_str(), "read-back policy hid at least one mutated row"));
        }
        Ok(result.rows)
    }
}

fn pre_image_source(stage: &Stage) -> Option<(SqlExpr, Option<SqlExpr>)> {
    match &stage.ast {
        Stmt::Update(upd) => Some((upd.table.clone(), upd.where_.clone())),
        Stmt::Delete(del) => Some((del.table.clone(), del.where_.clone())),
        _ => None,
    }
}

fn json_to_ast_value(value: &serde_json::Value) -> entityql_ast::Value {
    match value {
        serde_json::Value::Null => entityql_ast::Value::Null,
        serde_json::Value::Bool(b) => entityql_ast::Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                entityql_ast::Value::Int(i)
            } else {
                entityql_ast::Value::Float(n.as_f64().unwrap_or_default())
            }
        }
        serde_json::Value::String(s) => entityql_ast::Value::Str(s.as_str().into()),
        other => entityql_ast::Value::Json(other.clone()),
    }
}

