//! Cooperative cancellation (spec §4.5, §5): a request holds a token
//! threaded to the driver; checks happen before each driver call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use entityql_errors::{EngineError, EngineResult};

#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Called right before each driver call (spec §5 "Suspension points").
    pub fn check(&self) -> EngineResult<()> {
        if self.is_cancelled() {
            return Err(EngineError::query("request cancelled"));
        }
        Ok(())
    }
}
