//! Genesis document.

use crate::params::ParamsError;
use crate::{Address, ConsensusParams, Hash, PublicKey, Validator, ValidatorSet, ValidatorSetError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest chain id accepted.
pub const MAX_CHAIN_ID_LEN: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenesisError {
    #[error("genesis chain_id cannot be empty")]
    EmptyChainId,

    #[error("genesis chain_id is {len} bytes, max is {max}")]
    ChainIdTooLong { len: usize, max: usize },

    #[error("genesis validator {index} has no voting power")]
    ZeroPowerValidator { index: usize },

    #[error("invalid genesis consensus params: {0}")]
    Params(#[from] ParamsError),

    #[error("invalid genesis validators: {0}")]
    Validators(#[from] ValidatorSetError),

    #[error("malformed genesis json: {0}")]
    Json(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisValidator {
    pub public_key: PublicKey,
    pub power: i64,
    #[serde(default)]
    pub name: String,
    /// Defaults to the validator's own address.
    #[serde(default)]
    pub reward_address: Option<Address>,
}

impl GenesisValidator {
    pub fn to_validator(&self) -> Validator {
        let mut v = Validator::new(self.public_key, self.power).with_name(self.name.clone());
        if let Some(reward_address) = self.reward_address {
            v = v.with_reward_address(reward_address);
        }
        v
    }
}

/// Initial chain configuration, loaded from JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisDoc {
    /// Milliseconds since epoch.
    pub genesis_time: u64,
    pub chain_id: String,
    #[serde(default)]
    pub consensus_params: Option<ConsensusParams>,
    #[serde(default)]
    pub validators: Vec<GenesisValidator>,
    #[serde(default)]
    pub app_hash: Hash,
}

impl GenesisDoc {
    pub fn from_json(json: &str) -> Result<Self, GenesisError> {
        serde_json::from_str(json).map_err(|e| GenesisError::Json(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, GenesisError> {
        serde_json::to_string_pretty(self).map_err(|e| GenesisError::Json(e.to_string()))
    }

    /// Check the document and fill in defaults (consensus params).
    pub fn validate_and_complete(&mut self) -> Result<(), GenesisError> {
        if self.chain_id.is_empty() {
            return Err(GenesisError::EmptyChainId);
        }
        if self.chain_id.len() > MAX_CHAIN_ID_LEN {
            return Err(GenesisError::ChainIdTooLong {
                len: self.chain_id.len(),
                max: MAX_CHAIN_ID_LEN,
            });
        }

        let params = self.consensus_params.get_or_insert_with(ConsensusParams::default);
        params.validate()?;

        for (index, v) in self.validators.iter().enumerate() {
            if v.power == 0 {
                return Err(GenesisError::ZeroPowerValidator { index });
            }
        }
        Ok(())
    }

    pub fn validator_set(&self) -> Result<ValidatorSet, GenesisError> {
        let validators = self.validators.iter().map(|v| v.to_validator()).collect();
        Ok(ValidatorSet::new(validators)?)
    }
}
