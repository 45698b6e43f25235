//! The Executor Pipeline (spec §4.5): the one place a rewritten statement
//! meets a transaction, a set of hook plugins, and a [`driver::Driver`].
//!
//! Everything upstream of this crate (`entityql-planner`,
//! `entityql-rewrite`) only ever produces [`entityql_ast::Stmt`] trees; this
//! crate is where those trees are finally compiled and sent somewhere.

pub mod cancel;
pub mod deferred;
pub mod driver;
pub mod pipeline;
pub mod plugin;

#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use cancel::CancellationToken;
pub use deferred::{substitute_deferred, StageResults};
pub use driver::{CompiledQuery, Compiler, Connection, Driver, IsolationLevel, QueryId, QueryResult, Row, RowBatch};
pub use pipeline::{Executor, MutationRequest};
pub use plugin::{InterceptionFilter, MutationContext, Plugin};

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use entityql_ast::{DistinctKind, FromSource, QueryContext, SqlExpr, Stmt, Value};
    use entityql_dialect::for_provider;
    use entityql_errors::EngineResult;
    use entityql_planner::{deferred_ref, Stage};
    use entityql_schema::{FieldDef, FieldType as FT, ModelDef, PolicySet, Provider, ScalarType, Schema};
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;
    use smol_str::SmolStr;

    use super::cancel::CancellationToken;
    use super::deferred::substitute_deferred;
    use super::driver::{IsolationLevel, QueryResult as DriverQueryResult, Row};
    use super::mock::{DebugCompiler, MockDriver, ScriptedResult};
    use super::pipeline::{Executor, MutationRequest};
    use super::plugin::{InterceptionFilter, MutationContext, Plugin};
    use super::StageResults;

    fn scalar_field(name: &str, id: bool) -> FieldDef {
        FieldDef {
            name: name.into(), db_column: name.into(), field_type: FT::Scalar(ScalarType::Int), array: false,
            optional: false, id, unique: id, updated_at: false, computed: false, origin_model: None,
            relation: None, foreign_key_for: vec![], default: None, attributes: vec![],
        }
    }

    fn schema() -> Schema {
        let mut fields = IndexMap::new();
        fields.insert(SmolStr::from("id"), scalar_field("id", true));
        let model = ModelDef {
            name: "Post".into(), db_table: "posts".into(), fields, id_fields: vec!["id".into()],
            unique_fields: vec![], is_delegate: false, base_model: None, discriminator_field: None,
            policies: PolicySet::default(),
        };
        let mut models = IndexMap::new();
        models.insert(SmolStr::from("Post"), model);
        Schema::build(models, IndexMap::new(), Provider::PostgresLike, None)
    }

    fn row(pairs: &[(&str, serde_json::Value)]) -> Row {
        pairs.iter().map(|(k, v)| (SmolStr::new(*k), v.clone())).collect()
    }

    #[test]
    fn interception_filter_merge_is_logical_or() {
        let a = InterceptionFilter { intercept: true, ..Default::default() };
        let b = InterceptionFilter { use_transaction_for_mutation: true, ..Default::default() };
        let merged = a.merge(b);
        assert!(merged.intercept);
        assert!(merged.use_transaction_for_mutation);
        assert!(!merged.load_before_mutation_entities);
    }

    #[test]
    fn cancellation_token_check_fails_once_cancelled() {
        let token = CancellationToken::new();
        assert!(token.check().is_ok());
        token.cancel();
        assert!(token.check().is_err());
    }

    #[test]
    fn substitute_deferred_replaces_marker_with_first_row_value() {
        let mut results: StageResults = StageResults::new();
        results.insert(0, DriverQueryResult { rows: vec![row(&[("id", serde_json::json!(7))])], num_affected_rows: 1 });

        let select = entityql_ast::SelectStmt {
            projection: vec![deferred_ref(0, "id")],
            from: FromSource::table("post", None),
            joins: vec![],
            where_: None,
            group_by: vec![],
            having: None,
            order_by: vec![],
            limit: None,
            offset: None,
            distinct: DistinctKind::None,
            distinct_on: vec![],
            context: QueryContext::default(),
        };

        let resolved = substitute_deferred(Stmt::Select(select), &results).expect("substitution should succeed");
        let Stmt::Select(resolved) = resolved else { panic!("expected select") };
        assert_eq!(resolved.projection, vec![SqlExpr::val(Value::Int(7))]);
    }

    #[test]
    fn substitute_deferred_errors_when_stage_never_ran() {
        let results: StageResults = StageResults::new();
        let mut select = entityql_ast::SelectStmt::new(FromSource::table("post", None), QueryContext::default());
        select.projection.push(deferred_ref(99, "id"));
        let err = substitute_deferred(Stmt::Select(select), &results).unwrap_err();
        assert_eq!(err.kind(), "Internal");
    }

    struct RecordingPlugin {
        before_calls: Mutex<u32>,
        after_calls: Mutex<u32>,
    }

    #[async_trait::async_trait]
    impl Plugin for RecordingPlugin {
        fn name(&self) -> &str {
            "recording"
        }

        fn mutation_interception_filter(&self, _ctx: &MutationContext) -> InterceptionFilter {
            InterceptionFilter { intercept: true, run_after_mutation_within_transaction: true, ..Default::default() }
        }

        async fn before_entity_mutation(&self, _ctx: &MutationContext, _pre_images: &[Row]) -> EngineResult<()> {
            *self.before_calls.lock().unwrap() += 1;
            Ok(())
        }

        async fn after_entity_mutation(&self, _ctx: &MutationContext, _rows: &[Row]) -> EngineResult<()> {
            *self.after_calls.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn execute_mutation_runs_hooks_and_returns_root_stage_rows() {
        let schema = schema();
        let dialect = for_provider(Provider::PostgresLike);
        let driver = Arc::new(MockDriver::new(vec![ScriptedResult::from(vec![row(&[("id", serde_json::json!(1))])])]));
        let compiler = Arc::new(DebugCompiler);
        let plugin = Arc::new(RecordingPlugin { before_calls: Mutex::new(0), after_calls: Mutex::new(0) });

        let executor = Executor {
            schema: &schema,
            dialect,
            driver: driver.clone(),
            compiler,
            plugins: vec![plugin.clone()],
            auth: None,
            default_isolation: IsolationLevel::RepeatableRead,
        };

        let insert = entityql_ast::InsertStmt {
            table: SqlExpr::table("post"),
            columns: vec!["id".into()],
            rows: vec![vec![SqlExpr::val(Value::Int(1))]],
            on_conflict: None,
            returning: Some(vec![SqlExpr::Column { name: "id".into() }]),
            context: QueryContext::new("Post", "create"),
        };
        let stage = Stage {
            id: 0,
            ast: Stmt::Insert(insert),
            depends_on: vec![],
            returning_ids_only: false,
            fallback: None,
            label: "Post.create".into(),
        };
        let request = MutationRequest {
            model: "Post".into(),
            operation: "create".into(),
            stages: vec![stage],
            root_stage: 0,
            read_back: None,
        };

        let rows = executor.execute_mutation(request, &CancellationToken::new()).await.expect("mutation should succeed");
        assert_eq!(rows.len(), 1);
        assert_eq!(*plugin.before_calls.lock().unwrap(), 1);
        assert_eq!(*plugin.after_calls.lock().unwrap(), 1);
    }
}
