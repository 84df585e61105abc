//! Persistence for the consensus core.
//!
//! The durable key-value engine is consumed through the [`KvStore`]
//! capability. [`StateStore`] layers the chain's records on top of it:
//!
//! - the single latest `State` record,
//! - per-height validator set and consensus parameter snapshots, stored in
//!   full only at change points and otherwise as a back-pointer to the height
//!   of the last change,
//! - per-height raw execution results, written before the application
//!   commits so a crash in between can be replayed,
//! - a transaction-hash index of individual results.
//!
//! Backends: [`MemoryStore`] for tests and simulation, and `RocksDbStore`
//! behind the `rocksdb` feature.

mod error;
mod kv;
mod metrics;
#[cfg(feature = "rocksdb")]
mod rocks;
mod state_store;

pub use error::StoreError;
pub use kv::{KvStore, MemoryStore};
#[cfg(feature = "rocksdb")]
pub use rocks::{CompressionType, RocksDbConfig, RocksDbStore};
pub use state_store::{ConsensusParamsInfo, StateStore, ValidatorsInfo};
