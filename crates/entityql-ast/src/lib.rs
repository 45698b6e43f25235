pub mod clause;
pub mod expr;
pub mod stmt;

pub use clause::{DistinctKind, FromSource, Join, JoinKind, NullsOrder, OnConflict, OnConflictAction, OrderByItem, SortDir};
pub use expr::{BinOp, SqlExpr, Value};
pub use stmt::{DeleteStmt, InsertStmt, QueryContext, SelectStmt, Stmt, UpdateStmt};
