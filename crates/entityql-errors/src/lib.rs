//! The error taxonomy described in spec §7, shared by every other crate in
//! the workspace. Nothing here talks to a database; it only names the ways
//! a planned operation can fail.

use serde_json::Value as JsonValue;
use thiserror::Error;

/// A stable, matchable error kind. Every public entity-ql operation returns
/// `Result<_, EngineError>`.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Zero rows where the operation required at least one (`findUniqueOrThrow`,
    /// `findFirstOrThrow`, a `connect` that matched nothing, etc).
    #[error("{model}: record not found ({reason})")]
    NotFound { model: String, reason: String },

    /// A pre-create check, a read-back, or a write matched nothing visible
    /// under the model's compiled policy.
    #[error("{model}: rejected by policy ({reason})")]
    RejectedByPolicy { model: String, reason: String },

    /// The input shape violates the operation's contract: missing `data`,
    /// an invalid combinator, a relation field inside `createMany`, a direct
    /// `create` on a delegate base, `skipDuplicates` on a polymorphic model,
    /// an explicit `limit` reaching into a delegate base, and so on.
    #[error("{message}")]
    Validation { message: String },

    /// A dialect cannot express the requested operation, or the planner hit
    /// a semantic error building the AST (e.g. `set` on the owning side of
    /// a to-many relation).
    #[error("{message}")]
    Query { message: String },

    /// The underlying `Driver` reported an error. SQL and params are only
    /// retained when the engine's debug-capture config is enabled.
    #[error("driver error: {message}")]
    Driver {
        message: String,
        sql: Option<String>,
        params: Option<Vec<JsonValue>>,
    },

    /// An invariant of the core itself was violated. Should never trigger
    /// from valid input; surfaced unchanged rather than mapped to one of the
    /// user-facing kinds above.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl EngineError {
    pub fn not_found(model: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NotFound { model: model.into(), reason: reason.into() }
    }

    pub fn rejected(model: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::RejectedByPolicy { model: model.into(), reason: reason.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation { message: message.into() }
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::Query { message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    pub fn driver(message: impl Into<String>, sql: Option<String>, params: Option<Vec<JsonValue>>) -> Self {
        Self::Driver { message: message.into(), sql, params }
    }

    /// Stable discriminant name, independent of the `Display` message — useful
    /// for logging and for callers that want to branch without a full match.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NotFound",
            Self::RejectedByPolicy { .. } => "RejectedByPolicy",
            Self::Validation { .. } => "Validation",
            Self::Query { .. } => "Query",
            Self::Driver { .. } => "Driver",
            Self::Internal { .. } => "Internal",
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_is_stable_across_message_changes() {
        let a = EngineError::not_found("User", "no rows");
        let b = EngineError::not_found("User", "different reason entirely");
        assert_eq!(a.kind(), b.kind());
        assert_eq!(a.kind(), "NotFound");
    }

    #[test]
    fn driver_error_without_debug_capture_has_no_sql() {
        let e = EngineError::driver("connection reset", None, None);
        match e {
            EngineError::Driver { sql, params, .. } => {
                assert!(sql.is_none());
                assert!(params.is_none());
            }
            _ => panic!("wrong variant"),
        }
    }
}
