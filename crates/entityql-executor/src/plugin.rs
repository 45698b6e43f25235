//! The hook plugin protocol (spec §4.5, §9). A plugin observes and can
//! steer a mutation's transaction/read-back behavior without the planner
//! or rewriters knowing it exists.

use async_trait::async_trait;
use entityql_errors::EngineResult;
use smol_str::SmolStr;

use crate::driver::Row;

/// Identifies the mutation a plugin is being asked about.
#[derive(Debug, Clone)]
pub struct MutationContext {
    pub model: SmolStr,
    pub operation: SmolStr,
}

/// One plugin's verdict on a pending mutation (spec §4.5 step 1). Every
/// field defaults to `false`; [`InterceptionFilter::merge`] combines
/// several plugins' verdicts with logical OR, per field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterceptionFilter {
    pub intercept: bool,
    pub use_transaction_for_mutation: bool,
    pub load_before_mutation_entities: bool,
    pub load_after_mutation_entities: bool,
    pub run_after_mutation_within_transaction: bool,
}

impl InterceptionFilter {
    pub fn merge(self, other: InterceptionFilter) -> Self {
        InterceptionFilter {
            intercept: self.intercept || other.intercept,
            use_transaction_for_mutation: self.use_transaction_for_mutation || other.use_transaction_for_mutation,
            load_before_mutation_entities: self.load_before_mutation_entities || other.load_before_mutation_entities,
            load_after_mutation_entities: self.load_after_mutation_entities || other.load_after_mutation_entities,
            run_after_mutation_within_transaction: self.run_after_mutation_within_transaction
                || other.run_after_mutation_within_transaction,
        }
    }
}

/// A hook plugin (spec §9). Registered in a fixed order on the Executor;
/// every phase fires in that same order (spec §4.5 "Ordering guarantees").
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Used only for logging/diagnostics.
    fn name(&self) -> &str;

    /// Spec §4.5 step 1. The default expresses no interest in any
    /// mutation — a plugin only needs to override this and the phases it
    /// actually cares about.
    fn mutation_interception_filter(&self, _ctx: &MutationContext) -> InterceptionFilter {
        InterceptionFilter::default()
    }

    /// Spec §4.5 step 4, run inside the chosen transaction scope before the
    /// statement executes.
    async fn before_entity_mutation(&self, _ctx: &MutationContext, _pre_images: &[Row]) -> EngineResult<()> {
        Ok(())
    }

    /// Spec §4.5 step 6. Whether this runs inside or after the transaction
    /// is governed by `run_after_mutation_within_transaction`, not by the
    /// plugin itself.
    async fn after_entity_mutation(&self, _ctx: &MutationContext, _rows: &[Row]) -> EngineResult<()> {
        Ok(())
    }
}
