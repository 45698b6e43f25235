use ahash::HashSet;
use entityql_errors::{EngineError, EngineResult};
use indexmap::IndexMap;
use smol_str::SmolStr;

use crate::model::{JoinTable, ModelDef, VisitedModels};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    PostgresLike,
    SqliteLike,
}

#[derive(Debug, Clone)]
pub struct EnumValue {
    pub name: SmolStr,
    /// Physical mapping via `@map`, if any distinct from `name`.
    pub db_value: SmolStr,
}

#[derive(Debug, Clone)]
pub struct EnumDef {
    pub name: SmolStr,
    pub values: Vec<EnumValue>,
}

impl EnumDef {
    pub fn physical(&self, logical: &str) -> Option<&str> {
        self.values.iter().find(|v| v.name == logical).map(|v| v.db_value.as_str())
    }

    pub fn logical(&self, physical: &str) -> Option<&str> {
        self.values.iter().find(|v| v.db_value == physical).map(|v| v.name.as_str())
    }
}

/// The process-wide, immutable-after-init schema descriptor (spec §3).
#[derive(Debug, Clone)]
pub struct Schema {
    models: IndexMap<SmolStr, ModelDef>,
    enums: IndexMap<SmolStr, EnumDef>,
    provider: Provider,
    auth_model: Option<SmolStr>,
    /// Keyed by the sorted `(model, field)` pair of either endpoint so a
    /// lookup from one side finds the same descriptor as the other.
    join_tables: IndexMap<(SmolStr, SmolStr), JoinTable>,
}

impl Schema {
    pub fn build(
        models: IndexMap<SmolStr, ModelDef>,
        enums: IndexMap<SmolStr, EnumDef>,
        provider: Provider,
        auth_model: Option<SmolStr>,
    ) -> Self {
        let mut schema = Schema { models, enums, provider, auth_model, join_tables: IndexMap::new() };
        schema.join_tables = schema.discover_join_tables();
        schema
    }

    fn discover_join_tables(&self) -> IndexMap<(SmolStr, SmolStr), JoinTable> {
        let mut out = IndexMap::new();
        for model in self.models.values() {
            for field in model.relation_fields() {
                let Some(rel) = &field.relation else { continue };
                if rel.owns_fk() || !field.array {
                    continue;
                }
                let Some(opposite_model) = self.models.get(
                    match &field.field_type {
                        crate::scalar::FieldType::Model(m) => m.as_str(),
                        _ => continue,
                    },
                ) else {
                    continue;
                };
                let Some(opposite_field) = opposite_model.field(&rel.opposite) else { continue };
                let Some(opp_rel) = &opposite_field.relation else { continue };
                if opp_rel.owns_fk() || !opposite_field.array {
                    // Not an implicit m2m (one side owns the FK, or it's a
                    // one-to-many): nothing to synthesize.
                    continue;
                }

                let key_a = (model.name.clone(), field.name.clone());
                let key_b = (opposite_model.name.clone(), opposite_field.name.clone());
                let sorted_key = if key_a <= key_b { key_a.clone() } else { key_b.clone() };
                if out.contains_key(&sorted_key) {
                    continue;
                }

                let (side_a, side_b) = JoinTable::order_sides(key_a, key_b);
                let table_name: SmolStr =
                    format!("_{}{}", side_a.model, side_b.model).into();
                out.insert(sorted_key, JoinTable { table_name, side_a, side_b });
            }
        }
        out
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn auth_model(&self) -> Option<&str> {
        self.auth_model.as_deref()
    }

    pub fn model(&self, name: &str) -> EngineResult<&ModelDef> {
        self.models
            .get(name)
            .ok_or_else(|| EngineError::internal(format!("unknown model `{name}`")))
    }

    pub fn enum_def(&self, name: &str) -> EngineResult<&EnumDef> {
        self.enums
            .get(name)
            .ok_or_else(|| EngineError::internal(format!("unknown enum `{name}`")))
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelDef> {
        self.models.values()
    }

    /// Join table for a many-to-many relation field, looked up from either
    /// endpoint.
    pub fn join_table_for(&self, model: &str, field: &str) -> EngineResult<&JoinTable> {
        let model_def = self.model(model)?;
        let rel = model_def
            .field(field)
            .and_then(|f| f.relation.as_ref())
            .ok_or_else(|| EngineError::internal(format!("{model}.{field} is not a relation field")))?;
        let key_a = (SmolStr::from(model), SmolStr::from(field));
        let key_b = {
            let opposite_model = match &model_def.field(field).unwrap().field_type {
                crate::scalar::FieldType::Model(m) => m.clone(),
                _ => return Err(EngineError::internal(format!("{model}.{field} is not a relation field"))),
            };
            (opposite_model, rel.opposite.clone())
        };
        let sorted_key = if key_a <= key_b { key_a } else { key_b };
        self.join_tables
            .get(&sorted_key)
            .ok_or_else(|| EngineError::internal(format!("no join table for {model}.{field}")))
    }

    /// Base-to-leaf walk from `model` up through `baseModel` links (spec §9:
    /// "keeps a visited set for delegate base chains"). Returns `model`
    /// itself first, then each ancestor.
    pub fn delegate_chain(&self, model: &str) -> EngineResult<Vec<&ModelDef>> {
        let mut chain = Vec::new();
        let mut visited: VisitedModels = HashSet::default();
        let mut current = model;
        loop {
            if !visited.insert(SmolStr::from(current)) {
                return Err(EngineError::internal(format!(
                    "cycle detected in delegate base chain starting at `{model}`"
                )));
            }
            let def = self.model(current)?;
            chain.push(def);
            match &def.base_model {
                Some(base) => current = base.as_str(),
                None => break,
            }
        }
        Ok(chain)
    }
}
