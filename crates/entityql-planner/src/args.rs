//! The normalized per-operation argument shapes from spec §6.3. Callers are
//! expected to have already stripped `undefined` values; these types are
//! plain data, no behavior.

use entityql_ast::{NullsOrder, SortDir};
use serde_json::Value as Json;
use smol_str::SmolStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseMode {
    Default,
    Insensitive,
}

/// One scalar-field condition (`equals`, `in`, `contains`, ...).
#[derive(Debug, Clone)]
pub enum FieldOp {
    Equals(Json),
    Not(Json),
    In(Vec<Json>),
    NotIn(Vec<Json>),
    Lt(Json),
    Lte(Json),
    Gt(Json),
    Gte(Json),
    Contains(Json, CaseMode),
    StartsWith(Json, CaseMode),
    EndsWith(Json, CaseMode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationQuantifier {
    Some,
    Every,
    None,
}

/// A `where` node: field conditions, logical combinators, and relation
/// filters (`some`/`every`/`none` for to-many, `is`/`isNot` for to-one).
#[derive(Debug, Clone)]
pub enum WhereNode {
    And(Vec<WhereNode>),
    Or(Vec<WhereNode>),
    Not(Box<WhereNode>),
    Field(SmolStr, FieldOp),
    ToMany(SmolStr, RelationQuantifier, Box<WhereNode>),
    /// `{relation: {is: {...}}}` / `{relation: {isNot: {...}}}` / `{relation: null}`.
    ToOne(SmolStr, ToOnePredicate),
}

#[derive(Debug, Clone)]
pub enum ToOnePredicate {
    Is(Box<WhereNode>),
    IsNot(Box<WhereNode>),
    IsNull,
    IsNotNull,
}

#[derive(Debug, Clone)]
pub struct OrderByItem {
    pub field: SmolStr,
    pub dir: SortDir,
    pub nulls: Option<NullsOrder>,
}

#[derive(Debug, Clone, Default)]
pub struct FindArgs {
    pub where_: Option<WhereNode>,
    pub order_by: Vec<OrderByItem>,
    pub skip: Option<i64>,
    pub take: Option<i64>,
    pub cursor: Option<WhereNode>,
    pub distinct: Vec<SmolStr>,
    pub selection: Selection,
}

/// `select`/`include`/`omit` are mutually exclusive between `select` and
/// `include`; `omit` may be combined with either (spec §6.3).
#[derive(Debug, Clone)]
pub enum Selection {
    /// Scalars minus `omit`, no relations.
    AllScalars { omit: Vec<SmolStr> },
    Select(Vec<ProjectedField>),
    Include { omit: Vec<SmolStr>, relations: Vec<RelationProjection> },
}

impl Default for Selection {
    fn default() -> Self {
        Selection::AllScalars { omit: Vec::new() }
    }
}

#[derive(Debug, Clone)]
pub enum ProjectedField {
    Scalar(SmolStr),
    Relation(RelationProjection),
    Count(Vec<SmolStr>),
}

#[derive(Debug, Clone)]
pub struct RelationProjection {
    pub field: SmolStr,
    pub args: Box<FindArgs>,
}

/// One `data` payload field during create/update: either a plain scalar
/// value or a relation action bag (spec §4.1 create/update paths).
#[derive(Debug, Clone)]
pub enum DataField {
    Scalar(Json),
    Relation(RelationWrite),
}

#[derive(Debug, Clone, Default)]
pub struct RelationWrite {
    pub create: Vec<IndexMapPayload>,
    pub create_many: Vec<IndexMapPayload>,
    pub connect: Vec<WhereNode>,
    pub connect_or_create: Vec<(WhereNode, IndexMapPayload)>,
    pub disconnect: Vec<WhereNode>,
    pub set: Option<Vec<WhereNode>>,
    pub update: Vec<(WhereNode, IndexMapPayload)>,
    pub update_many: Vec<(WhereNode, IndexMapPayload)>,
    pub upsert: Vec<(WhereNode, IndexMapPayload, IndexMapPayload)>,
    pub delete: Vec<WhereNode>,
    pub delete_many: Vec<WhereNode>,
}

/// An ordered `field -> DataField` payload. Order is preserved because
/// delegate-base splitting and scalar/relation separation both care about
/// declaration order for deterministic column lists.
pub type IndexMapPayload = indexmap::IndexMap<SmolStr, DataField>;

#[derive(Debug, Clone)]
pub struct CreateArgs {
    pub data: IndexMapPayload,
    pub selection: Selection,
}

#[derive(Debug, Clone)]
pub struct CreateManyArgs {
    pub data: Vec<indexmap::IndexMap<SmolStr, Json>>,
    pub skip_duplicates: bool,
    pub return_rows: bool,
}

#[derive(Debug, Clone)]
pub struct UpdateArgs {
    pub where_: WhereNode,
    pub data: IndexMapPayload,
    pub selection: Selection,
}

#[derive(Debug, Clone)]
pub struct UpdateManyArgs {
    pub where_: Option<WhereNode>,
    pub data: indexmap::IndexMap<SmolStr, Json>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct UpsertArgs {
    pub where_: WhereNode,
    pub create: IndexMapPayload,
    pub update: IndexMapPayload,
    pub selection: Selection,
}

#[derive(Debug, Clone)]
pub struct DeleteArgs {
    pub where_: WhereNode,
    pub selection: Selection,
}

#[derive(Debug, Clone)]
pub struct DeleteManyArgs {
    pub where_: Option<WhereNode>,
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct CountArgs {
    pub where_: Option<WhereNode>,
    pub per_field: Vec<SmolStr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    Count,
    Min,
    Max,
    Sum,
    Avg,
}

#[derive(Debug, Clone)]
pub struct AggregateArgs {
    pub where_: Option<WhereNode>,
    /// `(function, field)`; `Count` with no field means `COUNT(*)`.
    pub metrics: Vec<(AggregateFn, Option<SmolStr>)>,
}

#[derive(Debug, Clone)]
pub struct GroupByArgs {
    pub where_: Option<WhereNode>,
    pub by: Vec<SmolStr>,
    pub having: Option<WhereNode>,
    pub metrics: Vec<(AggregateFn, Option<SmolStr>)>,
}
