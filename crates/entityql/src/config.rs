//! The handful of runtime knobs the core owns directly (spec §1.2): which
//! dialect is active, whether `Driver` errors carry the SQL/params that
//! produced them, and the default transaction isolation level.

use entityql_executor::driver::IsolationLevel;
use entityql_schema::Provider;

/// Schema loading, connection strings, and logging setup stay out of scope
/// (spec §1's exclusions) — this only holds what the engine needs to plan
/// and execute a request once a `Schema` and `Driver` already exist.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub provider: Provider,
    /// When `true`, a `Driver` error's `EngineError::Driver` variant carries
    /// the compiled SQL and params that produced it (spec §7, "Driver" row).
    pub debug_capture: bool,
    pub default_isolation: IsolationLevel,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig { provider: Provider::PostgresLike, debug_capture: false, default_isolation: IsolationLevel::RepeatableRead }
    }
}
