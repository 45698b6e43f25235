//! The Dialect Adapter (spec §4.6, §6.4): a narrow interface producing the
//! handful of SQL fragments that differ between the two target providers.
//! Everything else in the engine is dialect-neutral.

pub mod postgres_like;
pub mod relation;
pub mod sqlite_like;

use entityql_ast::{SqlExpr, Value};
use entityql_errors::EngineResult;
use entityql_schema::{FieldType, Provider};
use smol_str::SmolStr;

pub use relation::{RelationSelectionRequest, RelationSelectionResult};

/// Dialect-specific SQL fragment production. Stateless; one instance per
/// provider is constructed once and shared across requests (spec §5:
/// "parallel requests share the immutable schema and stateless rewriters").
pub trait Dialect: Send + Sync {
    fn provider(&self) -> Provider;

    fn supports_update_with_limit(&self) -> bool;
    fn supports_delete_with_limit(&self) -> bool;
    fn supports_distinct_on(&self) -> bool;
    fn supports_arrays(&self) -> bool;

    /// `jsonb_build_object(...)` / `json_object(...)`.
    fn build_json_object(&self, fields: Vec<(SmolStr, SqlExpr)>) -> SqlExpr;

    /// The nested-relation construction described in spec §4.1 step 8.
    fn build_relation_selection(&self, req: RelationSelectionRequest) -> RelationSelectionResult;

    /// `array_length(arr, 1)`-equivalent; SQLite-like has no array type and
    /// always rejects (spec §4.6).
    fn build_array_length(&self, arr: SqlExpr) -> EngineResult<SqlExpr>;

    /// Native array literal; SQLite-like rejects.
    fn build_array_literal_sql(&self, values: Vec<SqlExpr>) -> EngineResult<SqlExpr>;

    /// Value-level normalization performed right before an insert/update
    /// parameter is handed to the `Compiler` (e.g. ISO-8601 strings for
    /// `DateTime` columns).
    fn transform_primitive(&self, value: Value, field_type: &FieldType, is_array: bool) -> Value;

    fn current_timestamp(&self) -> SqlExpr {
        SqlExpr::call("now", vec![])
    }
}

/// Resolve the stateless adapter for a provider. The core never inspects a
/// `Dialect` beyond this trait, matching spec §4.6's "narrow interface".
pub fn for_provider(provider: Provider) -> &'static dyn Dialect {
    match provider {
        Provider::PostgresLike => &postgres_like::PostgresLike,
        Provider::SqliteLike => &sqlite_like::SqliteLike,
    }
}
