//! End-to-end tests for `Client` against `MockDriver`/`DebugCompiler`
//! (spec §8). Each scenario lines up `MockDriver`'s scripted results with
//! the stages `Client` is expected to run, in order — the same style
//! `entityql-executor`'s own pipeline tests use.

use std::sync::Arc;

use entityql::{
    CancellationToken, Client, CreateArgs, DataField, DeleteArgs, EngineConfig, FieldOp, FindArgs, ProjectedField, RelationProjection, Selection,
    UpdateArgs, UpdateManyArgs, UpsertArgs, WhereNode,
};
use entityql_executor::mock::{DebugCompiler, MockDriver, ScriptedResult};
use entityql_schema::{FieldDef, FieldType as FT, ModelDef, PolicyKind, PolicyOp, PolicyRule, PolicySet, Provider, ScalarType, Schema};
use indexmap::IndexMap;
use smol_str::SmolStr;

fn scalar_field(name: &str, id: bool) -> FieldDef {
    FieldDef {
        name: name.into(),
        db_column: name.into(),
        field_type: FT::Scalar(ScalarType::Int),
        array: false,
        optional: false,
        id,
        unique: id,
        updated_at: false,
        computed: false,
        origin_model: None,
        relation: None,
        foreign_key_for: vec![],
        default: None,
        attributes: vec![],
    }
}

fn string_field(name: &str) -> FieldDef {
    FieldDef { field_type: FT::Scalar(ScalarType::String), ..scalar_field(name, false) }
}

fn allow_all() -> PolicySet {
    PolicySet::new(
        vec![PolicyRule { kind: PolicyKind::Allow, ops: vec![PolicyOp::Read, PolicyOp::Create, PolicyOp::Update, PolicyOp::Delete], expr: entityql_schema::Expr::BoolLit(true) }],
        vec![],
    )
}

fn deny_create() -> PolicySet {
    PolicySet::new(
        vec![
            PolicyRule { kind: PolicyKind::Allow, ops: vec![PolicyOp::Read, PolicyOp::Update, PolicyOp::Delete], expr: entityql_schema::Expr::BoolLit(true) },
        ],
        vec![],
    )
}

/// A single `Post { id: Int @id, title: String }` model, no relations, no
/// delegate chain — just enough to exercise the facade's wiring without
/// pulling in the planner's relation/delegate machinery.
fn post_schema(policies: PolicySet) -> Schema {
    let mut fields = IndexMap::new();
    fields.insert(SmolStr::from("id"), scalar_field("id", true));
    fields.insert(SmolStr::from("title"), string_field("title"));
    let model = ModelDef {
        name: "Post".into(),
        db_table: "posts".into(),
        fields,
        id_fields: vec!["id".into()],
        unique_fields: vec![],
        is_delegate: false,
        base_model: None,
        discriminator_field: None,
        policies,
    };
    let mut models = IndexMap::new();
    models.insert(SmolStr::from("Post"), model);
    Schema::build(models, IndexMap::new(), Provider::PostgresLike, None)
}

fn row(pairs: &[(&str, serde_json::Value)]) -> entityql::Row {
    pairs.iter().map(|(k, v)| (SmolStr::new(*k), v.clone())).collect()
}

fn client_with(schema: &Schema, script: Vec<ScriptedResult>) -> (Client<'_>, Arc<MockDriver>) {
    let driver = Arc::new(MockDriver::new(script));
    let client = Client::new(schema, driver.clone(), Arc::new(DebugCompiler), EngineConfig { provider: Provider::PostgresLike, ..EngineConfig::default() });
    (client, driver)
}

fn create_args(title: &str) -> CreateArgs {
    let mut data = indexmap::IndexMap::new();
    data.insert(SmolStr::from("title"), DataField::Scalar(serde_json::json!(title)));
    CreateArgs { data, selection: Selection::AllScalars { omit: vec![] } }
}

fn where_id(id: i64) -> WhereNode {
    WhereNode::Field("id".into(), FieldOp::Equals(serde_json::json!(id)))
}

// ---- create / round-trip (spec §8 invariant 1) ----------------------------------------------------------

#[tokio::test]
async fn create_round_trips_scalar_fields_through_read_back() {
    let schema = post_schema(allow_all());
    let (client, driver) = client_with(
        &schema,
        vec![
            ScriptedResult::from(vec![row(&[("id", serde_json::json!(1))])]),
            ScriptedResult::from(vec![row(&[("id", serde_json::json!(1)), ("title", serde_json::json!("p1"))])]),
        ],
    );

    let created = client.create("Post", create_args("p1"), &CancellationToken::new()).await.expect("create should succeed");
    assert_eq!(created.get("id"), Some(&serde_json::json!(1)));
    assert_eq!(created.get("title"), Some(&serde_json::json!("p1")));
    assert_eq!(driver.calls().len(), 2, "one insert stage, one read-back select");
}

#[tokio::test]
async fn create_is_rejected_statically_when_no_allow_rule_covers_create() {
    let schema = post_schema(deny_create());
    let (client, _driver) = client_with(&schema, vec![]);

    let err = client.create("Post", create_args("p1"), &CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.kind(), "RejectedByPolicy");
}

#[tokio::test]
async fn create_rejects_relation_projections_in_a_mutation_selection() {
    let schema = post_schema(allow_all());
    let (client, _driver) = client_with(&schema, vec![ScriptedResult::from(vec![row(&[("id", serde_json::json!(1))])])]);

    let mut args = create_args("p1");
    args.selection = Selection::Select(vec![ProjectedField::Relation(RelationProjection { field: "comments".into(), args: Box::new(FindArgs::default()) })]);

    let err = client.create("Post", args, &CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.kind(), "Validation");
}

// ---- find ----------------------------------------------------------

#[tokio::test]
async fn find_unique_or_throw_errors_when_no_row_matches() {
    let schema = post_schema(allow_all());
    let (client, _driver) = client_with(&schema, vec![ScriptedResult::from(vec![])]);

    let args = FindArgs { where_: Some(where_id(1)), ..FindArgs::default() };
    let err = client.find_unique_or_throw("Post", args, &CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.kind(), "NotFound");
}

#[tokio::test]
async fn find_many_returns_every_scripted_row() {
    let schema = post_schema(allow_all());
    let (client, driver) = client_with(
        &schema,
        vec![ScriptedResult::from(vec![
            row(&[("id", serde_json::json!(1)), ("title", serde_json::json!("p1"))]),
            row(&[("id", serde_json::json!(2)), ("title", serde_json::json!("p2"))]),
        ])],
    );

    let rows = client.find_many("Post", FindArgs::default(), &CancellationToken::new()).await.expect("findMany should succeed");
    assert_eq!(rows.len(), 2);
    assert_eq!(driver.calls().len(), 1);
}

// ---- update / delete ----------------------------------------------------------

#[tokio::test]
async fn update_returns_the_updated_row_under_the_read_policy() {
    let schema = post_schema(allow_all());
    let (client, driver) = client_with(
        &schema,
        vec![
            ScriptedResult::from(vec![row(&[("id", serde_json::json!(1))])]),
            ScriptedResult::from(vec![row(&[("id", serde_json::json!(1)), ("title", serde_json::json!("updated"))])]),
        ],
    );

    let mut data = indexmap::IndexMap::new();
    data.insert(SmolStr::from("title"), DataField::Scalar(serde_json::json!("updated")));
    let args = UpdateArgs { where_: where_id(1), data, selection: Selection::AllScalars { omit: vec![] } };

    let updated = client.update("Post", args, &CancellationToken::new()).await.expect("update should succeed");
    assert_eq!(updated.get("title"), Some(&serde_json::json!("updated")));
    assert_eq!(driver.calls().len(), 2);
}

#[tokio::test]
async fn update_reports_not_found_when_no_row_matches_the_filter() {
    let schema = post_schema(allow_all());
    let (client, _driver) = client_with(&schema, vec![ScriptedResult::from(vec![])]);

    let mut data = indexmap::IndexMap::new();
    data.insert(SmolStr::from("title"), DataField::Scalar(serde_json::json!("updated")));
    let args = UpdateArgs { where_: where_id(99), data, selection: Selection::AllScalars { omit: vec![] } };

    let err = client.update("Post", args, &CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.kind(), "NotFound");
}

#[tokio::test]
async fn delete_returns_the_deleted_row() {
    let schema = post_schema(allow_all());
    let (client, driver) = client_with(
        &schema,
        vec![
            ScriptedResult::from(vec![row(&[("id", serde_json::json!(1))])]),
            ScriptedResult::from(vec![row(&[("id", serde_json::json!(1)), ("title", serde_json::json!("p1"))])]),
        ],
    );

    let args = DeleteArgs { where_: where_id(1), selection: Selection::AllScalars { omit: vec![] } };
    let deleted = client.delete("Post", args, &CancellationToken::new()).await.expect("delete should succeed");
    assert_eq!(deleted.get("id"), Some(&serde_json::json!(1)));
    assert_eq!(driver.calls().len(), 2);
}

#[tokio::test]
async fn update_many_reports_the_number_of_rows_touched() {
    let schema = post_schema(allow_all());
    let (client, driver) = client_with(
        &schema,
        vec![ScriptedResult::from(vec![row(&[("id", serde_json::json!(1))]), row(&[("id", serde_json::json!(2))])])],
    );

    let mut data = indexmap::IndexMap::new();
    data.insert(SmolStr::from("title"), serde_json::json!("bulk"));
    let args = UpdateManyArgs { where_: None, data, limit: None };

    let count = client.update_many("Post", args, &CancellationToken::new()).await.expect("updateMany should succeed");
    assert_eq!(count, 2);
    assert_eq!(driver.calls().len(), 1, "no read-back — updateMany only reports a count");
}

// ---- upsert (spec §9 design note) ----------------------------------------------------------

#[tokio::test]
async fn upsert_falls_back_to_create_when_the_update_matches_nothing() {
    let schema = post_schema(allow_all());
    let (client, driver) = client_with(
        &schema,
        vec![
            // update attempt: zero rows updated, no read-back is attempted
            ScriptedResult::from(vec![]),
            // create attempt: insert + read-back
            ScriptedResult::from(vec![row(&[("id", serde_json::json!(1))])]),
            ScriptedResult::from(vec![row(&[("id", serde_json::json!(1)), ("title", serde_json::json!("new"))])]),
        ],
    );

    let mut update_data = indexmap::IndexMap::new();
    update_data.insert(SmolStr::from("title"), DataField::Scalar(serde_json::json!("updated")));
    let mut create_data = indexmap::IndexMap::new();
    create_data.insert(SmolStr::from("title"), DataField::Scalar(serde_json::json!("new")));

    let args = UpsertArgs { where_: where_id(1), create: create_data, update: update_data, selection: Selection::AllScalars { omit: vec![] } };
    let result = client.upsert("Post", args, &CancellationToken::new()).await.expect("upsert should succeed");
    assert_eq!(result.get("title"), Some(&serde_json::json!("new")));
    assert_eq!(driver.calls().len(), 3);
}

// ---- aggregate ----------------------------------------------------------

#[tokio::test]
async fn count_runs_a_single_query_with_no_read_back() {
    let schema = post_schema(allow_all());
    let (client, driver) = client_with(&schema, vec![ScriptedResult::from(vec![row(&[("count", serde_json::json!(3))])])]);

    let result = client.count("Post", entityql::CountArgs::default(), &CancellationToken::new()).await.expect("count should succeed");
    assert_eq!(result.get("count"), Some(&serde_json::json!(3)));
    assert_eq!(driver.calls().len(), 1);
}
