//! `entityql`: the facade crate (spec §1.1, §6.3). A caller builds a
//! [`entityql_schema::Schema`], implements [`Driver`] and [`Compiler`] for
//! their database, and gets a [`Client`] that turns
//! [`entityql_planner::args`] request values into rows — the CRUD Operation
//! Planner, the Policy/Name-Mapping Rewriters, and the Executor Pipeline are
//! wired together once, inside `Client`, and never surfaced piecemeal.
//!
//! Schema loading and connection management are out of scope (spec §1); a
//! caller owns both and hands this crate a `&Schema` plus an `Arc<dyn
//! Driver>` already connected to a database.

pub mod client;
pub mod config;

pub use client::Client;
pub use config::EngineConfig;

pub use entityql_executor::{CancellationToken, CompiledQuery, Compiler, Connection, Driver, InterceptionFilter, IsolationLevel, MutationContext, Plugin, QueryId, QueryResult, Row, RowBatch};
pub use entityql_planner::args::{
    AggregateArgs, AggregateFn, CountArgs, CreateArgs, CreateManyArgs, DataField, DeleteArgs, DeleteManyArgs, FieldOp, FindArgs, GroupByArgs,
    OrderByItem, ProjectedField, RelationProjection, RelationQuantifier, RelationWrite, Selection, ToOnePredicate, UpdateArgs, UpdateManyArgs,
    UpsertArgs, WhereNode,
};
pub use entityql_schema::Schema;

pub use entityql_errors::{EngineError, EngineResult};
