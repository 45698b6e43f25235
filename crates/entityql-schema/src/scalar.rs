use strum_macros::{Display, EnumString};

/// The built-in scalar types from spec §3 (`FieldDef::type`, scalar branch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
pub enum ScalarType {
    String,
    Int,
    BigInt,
    Float,
    Decimal,
    Boolean,
    DateTime,
    Bytes,
    Json,
}

/// A field's type is either a built-in scalar or a reference to a named
/// model (relation) or enum.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldType {
    Scalar(ScalarType),
    Model(smol_str::SmolStr),
    Enum(smol_str::SmolStr),
}

impl FieldType {
    pub fn as_scalar(&self) -> Option<ScalarType> {
        match self {
            FieldType::Scalar(s) => Some(*s),
            _ => None,
        }
    }

    pub fn is_relation(&self) -> bool {
        matches!(self, FieldType::Model(_))
    }

    pub fn is_enum(&self) -> bool {
        matches!(self, FieldType::Enum(_))
    }
}
