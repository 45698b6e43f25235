pub mod expr;
pub mod field;
pub mod model;
pub mod policy;
pub mod scalar;
pub mod schema;

pub use expr::{CollectionQuantifier, Expr};
pub use field::{FieldDef, FieldDefault, GeneratorKind, ReferentialAction, RelationInfo};
pub use model::{JoinSide, JoinTable, ModelDef, UniqueKey};
pub use policy::{FieldPolicyRule, PolicyKind, PolicyOp, PolicyRule, PolicySet};
pub use scalar::{FieldType, ScalarType};
pub use schema::{EnumDef, EnumValue, Provider, Schema};
