//! The two AST rewriter stages described in spec §4.2/§4.4. Both consume a
//! `Stmt` by value and return a new one; neither holds state across calls.

pub mod name_mapping;
pub mod policy;
pub mod scope;

pub use name_mapping::NameMappingRewriter;
pub use policy::{PolicyRewriter, ReadBackPlan};
pub use scope::{Scope, ScopeStack};
