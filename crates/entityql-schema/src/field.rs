use smol_str::SmolStr;

use crate::scalar::FieldType;

/// How a relation's foreign key resolves on delete/update of the referenced row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferentialAction {
    Cascade,
    Restrict,
    SetNull,
    SetDefault,
    NoAction,
}

/// Relation-specific metadata, present only when `FieldDef::type` is `Model`.
#[derive(Debug, Clone)]
pub struct RelationInfo {
    /// Local FK columns. Non-empty only on the owning side (spec §3 invariant).
    pub fields: Vec<SmolStr>,
    /// Remote PK columns referenced by `fields`.
    pub references: Vec<SmolStr>,
    /// Name of the inverse field on the related model.
    pub opposite: SmolStr,
    pub on_delete: ReferentialAction,
    pub on_update: ReferentialAction,
}

impl RelationInfo {
    /// Spec §3: "at most one side owns the FK (`relation.fields` non-empty)".
    pub fn owns_fk(&self) -> bool {
        !self.fields.is_empty()
    }
}

/// A generator invocation used as a field default (`cuid()`, `uuid(7)`, …).
#[derive(Debug, Clone, PartialEq)]
pub enum GeneratorKind {
    Cuid,
    UuidV4,
    UuidV7,
    Nanoid(u32),
    Ulid,
    Now,
}

/// How a field's default value is produced.
#[derive(Debug, Clone)]
pub enum FieldDefault {
    Literal(serde_json::Value),
    Generator(GeneratorKind),
    /// `auth()`-member path, e.g. `auth().orgId`.
    AuthPath(Vec<SmolStr>),
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: SmolStr,
    pub db_column: SmolStr,
    pub field_type: FieldType,
    pub array: bool,
    pub optional: bool,
    pub id: bool,
    pub unique: bool,
    pub updated_at: bool,
    pub computed: bool,
    /// Set on fields copied down from a delegate base so planner code can
    /// tell "defined here" from "inherited" without re-walking the chain.
    pub origin_model: Option<SmolStr>,
    pub relation: Option<RelationInfo>,
    /// Names of relation fields this scalar backs as a foreign key.
    pub foreign_key_for: Vec<SmolStr>,
    pub default: Option<FieldDefault>,
    pub attributes: Vec<SmolStr>,
}

impl FieldDef {
    pub fn is_relation(&self) -> bool {
        self.field_type.is_relation()
    }

    pub fn is_scalar(&self) -> bool {
        !self.is_relation()
    }

    pub fn is_to_many(&self) -> bool {
        self.is_relation() && self.array
    }

    pub fn owns_fk(&self) -> bool {
        self.relation.as_ref().is_some_and(RelationInfo::owns_fk)
    }

    pub fn is_inherited(&self) -> bool {
        self.origin_model.is_some()
    }
}
