//! The CRUD Operation Planner (spec §4): turns a normalized per-operation
//! argument value (`args`) into either a single `SELECT` (reads) or a
//! `Stage` pipeline (writes with nested relation actions), with every
//! policy and name-mapping rewrite already folded in at plan time where
//! the nested-subquery shape would otherwise hide it from the rewriters.

pub mod aggregate;
pub mod args;
pub mod create;
pub mod delete;
pub mod filter;
pub mod find;
pub mod generators;
pub mod plan;
pub mod update;

pub use aggregate::AggregatePlanner;
pub use create::{CreatePlan, CreatePlanner};
pub use delete::{DeletePlan, DeletePlanner};
pub use filter::FilterCompiler;
pub use find::{FindPlan, FindPlanner};
pub use plan::{as_deferred_ref, deferred_ref, PlannedQuery, Stage, StageBuilder, StageId};
pub use update::{UpdatePlan, UpdatePlanner};
