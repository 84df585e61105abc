//! Block execution for the Meridian consensus core.
//!
//! The [`BlockExecutor`] takes a block that consensus has committed and
//! turns it into the next [`State`](meridian_types::State):
//!
//! 1. validate the block against the current state,
//! 2. execute it on the application (begin, each transaction in order, end),
//! 3. persist the raw results,
//! 4. fold them into the next state ([`update_state`]),
//! 5. commit the application while holding the mempool lock,
//! 6. persist the new state and notify the evidence pool and event bus.
//!
//! Structural and application-protocol failures halt the height. Individual
//! transaction failures are recorded in the results and never do.

mod collaborators;
mod config;
mod error;
mod executor;
pub mod metrics;

pub use collaborators::{
    ApplicationConnection, ApplicationError, DeliverTxReceiver, EventBus, EventBusError,
    EvidencePool, EvidencePoolError, ExecutorEvent, Mempool, MempoolError, NopEventBus,
    NopEvidencePool, NopMempool, SharedMempool,
};
pub use config::{ExecutorConfig, DEFAULT_MAX_EVIDENCE_PER_BLOCK};
pub use error::{BlockValidationError, EvidenceVerificationError, ExecutorError};
pub use executor::{update_state, update_validators, BlockExecutor};
