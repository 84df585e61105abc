use meridian_types::{BlockHeight, CodecError, GenesisError};
use thiserror::Error;

/// Errors from the state store and its backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A record could not be encoded for writing.
    #[error("failed to encode {key}: {source}")]
    Codec {
        key: String,
        #[source]
        source: CodecError,
    },

    /// The underlying key-value engine failed.
    #[error("backend error: {0}")]
    Backend(String),

    #[error("no validator set stored for height {0}")]
    NoValidatorsForHeight(BlockHeight),

    #[error("no consensus params stored for height {0}")]
    NoParamsForHeight(BlockHeight),

    #[error("no execution results stored for height {0}")]
    NoAbciResponsesForHeight(BlockHeight),

    /// A persisted record failed to decode or is internally inconsistent.
    /// The process must not continue on unknown state.
    #[error("corrupted record {key}: {reason}")]
    Corrupted { key: String, reason: String },

    #[error("invalid genesis: {0}")]
    Genesis(#[from] GenesisError),
}

impl StoreError {
    /// True for errors that mean persisted state cannot be trusted.
    pub fn is_corruption(&self) -> bool {
        matches!(self, StoreError::Corrupted { .. })
    }
}
