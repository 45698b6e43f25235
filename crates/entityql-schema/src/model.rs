use ahash::HashSet;
use indexmap::IndexMap;
use smol_str::SmolStr;

use crate::field::FieldDef;
use crate::policy::PolicySet;

/// A unique-key tuple declared by `@@unique`/`@unique` (including composite
/// keys); order within the tuple matters for cursor/`connect` lookups.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UniqueKey(pub Vec<SmolStr>);

#[derive(Debug, Clone)]
pub struct ModelDef {
    pub name: SmolStr,
    pub db_table: SmolStr,
    /// Insertion order is the canonical column order (spec §3).
    pub fields: IndexMap<SmolStr, FieldDef>,
    pub id_fields: Vec<SmolStr>,
    pub unique_fields: Vec<UniqueKey>,
    pub is_delegate: bool,
    pub base_model: Option<SmolStr>,
    /// Discriminator field name, present only when `is_delegate` (or when a
    /// concrete leaf belongs to a delegate hierarchy and needs to write it).
    pub discriminator_field: Option<SmolStr>,
    pub policies: PolicySet,
}

impl ModelDef {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.get(name)
    }

    pub fn scalar_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.values().filter(|f| f.is_scalar())
    }

    pub fn relation_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.values().filter(|f| f.is_relation())
    }

    pub fn id_field_names(&self) -> &[SmolStr] {
        &self.id_fields
    }

    /// Fields actually defined on this model (vs. copied down from a base
    /// for convenience lookups). Used when splitting a create payload by
    /// owner in the delegate create path (spec §4.1 step 4).
    pub fn own_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.values().filter(|f| !f.is_inherited())
    }

    pub fn has_base(&self) -> bool {
        self.base_model.is_some()
    }
}

/// A synthesized many-to-many join table descriptor (spec §3 invariant:
/// "fixed-named `A` and `B`, ordered by (owning model name, then field
/// name)"). Computed once per relation pair and memoized on `Schema`.
#[derive(Debug, Clone)]
pub struct JoinTable {
    pub table_name: SmolStr,
    /// The model/field pair that sorts first, bound to column `A`.
    pub side_a: JoinSide,
    /// The model/field pair that sorts second, bound to column `B`.
    pub side_b: JoinSide,
}

#[derive(Debug, Clone)]
pub struct JoinSide {
    pub model: SmolStr,
    pub field: SmolStr,
    pub column: SmolStr,
}

impl JoinTable {
    /// Deterministic ordering per spec §3/§8: "ordered by (owning model
    /// name, then field name)".
    pub fn order_sides(
        model_a: (SmolStr, SmolStr),
        model_b: (SmolStr, SmolStr),
    ) -> (JoinSide, JoinSide) {
        let a_key = (model_a.0.clone(), model_a.1.clone());
        let b_key = (model_b.0.clone(), model_b.1.clone());
        let (first, second) = if a_key <= b_key { (model_a, model_b) } else { (model_b, model_a) };
        (
            JoinSide { model: first.0, field: first.1, column: "A".into() },
            JoinSide { model: second.0, field: second.1, column: "B".into() },
        )
    }
}

pub type VisitedModels = HashSet<SmolStr>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_sides_sort_by_model_then_field() {
        let (a, b) = JoinTable::order_sides(
            ("Post".into(), "categories".into()),
            ("Category".into(), "posts".into()),
        );
        assert_eq!(a.model, "Category");
        assert_eq!(b.model, "Post");
        assert_eq!(a.column, "A");
        assert_eq!(b.column, "B");
    }
}
