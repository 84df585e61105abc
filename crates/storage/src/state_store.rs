//! Chain records on top of a [`KvStore`].

use crate::metrics;
use crate::{KvStore, StoreError};
use meridian_types::{
    AbciResponses, BlockHeight, Codec, ConsensusParams, GenesisDoc, Hash, State, TxResult,
    ValidatorSet,
};
use sbor::prelude::*;
use sbor::{BasicDecode, BasicEncode};
use std::time::Instant;
use tracing::{debug, error, info, instrument};

const STATE_KEY: &[u8] = b"stateKey";

fn validators_key(height: BlockHeight) -> Vec<u8> {
    format!("validatorsKey:{}", height.0).into_bytes()
}

fn consensus_params_key(height: BlockHeight) -> Vec<u8> {
    format!("consensusParamsKey:{}", height.0).into_bytes()
}

fn abci_responses_key(height: BlockHeight) -> Vec<u8> {
    format!("abciResponsesKey:{}", height.0).into_bytes()
}

fn tx_result_key(tx_hash: &Hash) -> Vec<u8> {
    format!("txResult:{}", tx_hash.to_hex()).into_bytes()
}

/// Validator set snapshot for one height.
///
/// `validator_set` is present only at the height where the set changed;
/// every other height stores a back-pointer to that height.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct ValidatorsInfo {
    pub validator_set: Option<ValidatorSet>,
    pub last_height_changed: BlockHeight,
}

/// Consensus params snapshot for one height. Same scheme as [`ValidatorsInfo`].
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct ConsensusParamsInfo {
    pub consensus_params: Option<ConsensusParams>,
    pub last_height_changed: BlockHeight,
}

/// Typed access to the chain's persisted records.
///
/// All records are encoded with the store's [`Codec`]. A record that is
/// present but fails to decode is reported as [`StoreError::Corrupted`].
pub struct StateStore<S: KvStore> {
    db: S,
    codec: Codec,
}

impl<S: KvStore> StateStore<S> {
    pub fn new(db: S, codec: Codec) -> Self {
        Self { db, codec }
    }

    pub fn codec(&self) -> &Codec {
        &self.codec
    }

    pub fn db(&self) -> &S {
        &self.db
    }

    // ═══════════════════════════════════════════════════════════════════════
    // State
    // ═══════════════════════════════════════════════════════════════════════

    /// Persist `state` along with the validator and param snapshots for the
    /// next height. The state record itself is written last, with a sync write.
    #[instrument(skip(self, state), fields(height = state.last_block_height.0))]
    pub fn save_state(&self, state: &State) -> Result<(), StoreError> {
        let start = Instant::now();
        let next_height = state.last_block_height.next();

        // `validators` is the set for the next block, so it is recorded
        // under `next_height`.
        self.save_validators_info(
            next_height,
            state.last_height_validators_changed,
            &state.validators,
        )?;
        self.save_consensus_params_info(
            next_height,
            state.last_height_consensus_params_changed,
            &state.consensus_params,
        )?;
        self.write(STATE_KEY, "state", state, true)?;

        metrics::record_operation("save_state", start.elapsed().as_secs_f64());
        debug!(
            next_height = next_height.0,
            app_hash = %state.app_hash,
            "Saved state"
        );
        Ok(())
    }

    /// The latest persisted state, or `None` for a fresh store.
    pub fn load_state(&self) -> Result<Option<State>, StoreError> {
        let state: Option<State> = self.read(STATE_KEY, "state")?;
        if let Some(state) = &state {
            if !state.validators.is_consistent() || !state.last_validators.is_consistent() {
                error!("Persisted state carries an inconsistent validator set");
                return Err(StoreError::Corrupted {
                    key: "state".to_string(),
                    reason: "inconsistent validator set".to_string(),
                });
            }
        }
        Ok(state)
    }

    /// The latest persisted state, or the genesis state (which is then saved).
    pub fn load_state_or_genesis(&self, genesis: &GenesisDoc) -> Result<State, StoreError> {
        if let Some(state) = self.load_state()? {
            return Ok(state);
        }
        let state = State::from_genesis(genesis)?;
        info!(
            chain_id = %state.chain_id,
            validators = state.validators.size(),
            "No persisted state, starting from genesis"
        );
        self.save_state(&state)?;
        Ok(state)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Validator sets
    // ═══════════════════════════════════════════════════════════════════════

    /// The validator set in effect at `height`.
    ///
    /// Sets reached through a back-pointer carry the proposer priorities they
    /// had at the change height.
    pub fn load_validators(&self, height: BlockHeight) -> Result<ValidatorSet, StoreError> {
        let key = validators_key(height);
        let info: ValidatorsInfo = self
            .read(&key, "validators")?
            .ok_or(StoreError::NoValidatorsForHeight(height))?;

        let set = match info.validator_set {
            Some(set) => set,
            None => {
                let changed = info.last_height_changed;
                let target: ValidatorsInfo = self
                    .read(&validators_key(changed), "validators")?
                    .ok_or_else(|| dangling(&key, changed))?;
                target
                    .validator_set
                    .ok_or_else(|| dangling(&key, changed))?
            }
        };

        if !set.is_consistent() {
            error!(height = height.0, "Persisted validator set is inconsistent");
            return Err(StoreError::Corrupted {
                key: String::from_utf8_lossy(&key).into_owned(),
                reason: "inconsistent validator set".to_string(),
            });
        }
        Ok(set)
    }

    fn save_validators_info(
        &self,
        height: BlockHeight,
        last_height_changed: BlockHeight,
        validators: &ValidatorSet,
    ) -> Result<(), StoreError> {
        let info = ValidatorsInfo {
            validator_set: (height == last_height_changed).then(|| validators.clone()),
            last_height_changed,
        };
        self.write(&validators_key(height), "validators", &info, false)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Consensus params
    // ═══════════════════════════════════════════════════════════════════════

    /// The consensus params in effect at `height`.
    pub fn load_consensus_params(&self, height: BlockHeight) -> Result<ConsensusParams, StoreError> {
        let key = consensus_params_key(height);
        let info: ConsensusParamsInfo = self
            .read(&key, "consensus params")?
            .ok_or(StoreError::NoParamsForHeight(height))?;

        match info.consensus_params {
            Some(params) => Ok(params),
            None => {
                let changed = info.last_height_changed;
                let target: ConsensusParamsInfo = self
                    .read(&consensus_params_key(changed), "consensus params")?
                    .ok_or_else(|| dangling(&key, changed))?;
                target
                    .consensus_params
                    .ok_or_else(|| dangling(&key, changed))
            }
        }
    }

    fn save_consensus_params_info(
        &self,
        height: BlockHeight,
        last_height_changed: BlockHeight,
        params: &ConsensusParams,
    ) -> Result<(), StoreError> {
        let info = ConsensusParamsInfo {
            consensus_params: (height == last_height_changed).then_some(*params),
            last_height_changed,
        };
        self.write(&consensus_params_key(height), "consensus params", &info, false)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Execution results
    // ═══════════════════════════════════════════════════════════════════════

    /// Persist the raw results of executing the block at `height`. Written
    /// with a sync write before the application commits.
    pub fn save_abci_responses(
        &self,
        height: BlockHeight,
        responses: &AbciResponses,
    ) -> Result<(), StoreError> {
        let start = Instant::now();
        self.write(&abci_responses_key(height), "abci responses", responses, true)?;
        metrics::record_operation("save_abci_responses", start.elapsed().as_secs_f64());
        Ok(())
    }

    pub fn load_abci_responses(&self, height: BlockHeight) -> Result<AbciResponses, StoreError> {
        self.read(&abci_responses_key(height), "abci responses")?
            .ok_or(StoreError::NoAbciResponsesForHeight(height))
    }

    pub fn save_tx_result(&self, result: &TxResult) -> Result<(), StoreError> {
        self.write(&tx_result_key(&result.tx.hash()), "tx result", result, false)
    }

    pub fn load_tx_result(&self, tx_hash: &Hash) -> Result<Option<TxResult>, StoreError> {
        self.read(&tx_result_key(tx_hash), "tx result")
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Encoding
    // ═══════════════════════════════════════════════════════════════════════

    fn write<T: BasicEncode + ?Sized>(
        &self,
        key: &[u8],
        what: &str,
        value: &T,
        sync: bool,
    ) -> Result<(), StoreError> {
        let bytes = self.codec.encode(value).map_err(|source| StoreError::Codec {
            key: String::from_utf8_lossy(key).into_owned(),
            source,
        })?;

        let start = Instant::now();
        let result = if sync {
            self.db.set_sync(key, &bytes)
        } else {
            self.db.set(key, &bytes)
        };
        metrics::record_write(start.elapsed().as_secs_f64());

        if let Err(e) = &result {
            error!(record = what, error = %e, "Failed to write record");
        }
        result
    }

    fn read<T: BasicDecode>(&self, key: &[u8], what: &str) -> Result<Option<T>, StoreError> {
        let start = Instant::now();
        let bytes = self.db.get(key)?;
        metrics::record_read(start.elapsed().as_secs_f64());

        let Some(bytes) = bytes else {
            return Ok(None);
        };
        match self.codec.decode(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                let key = String::from_utf8_lossy(key).into_owned();
                error!(record = what, key = %key, error = %e, "Failed to decode record");
                Err(StoreError::Corrupted {
                    key,
                    reason: e.to_string(),
                })
            }
        }
    }
}

fn dangling(key: &[u8], changed: BlockHeight) -> StoreError {
    StoreError::Corrupted {
        key: String::from_utf8_lossy(key).into_owned(),
        reason: format!("back-pointer to height {} has no snapshot", changed.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use meridian_types::test_utils::test_validator_set;
    use meridian_types::{ResponseDeliverTx, Transaction};
    use tracing_test::traced_test;

    fn store() -> StateStore<MemoryStore> {
        StateStore::new(MemoryStore::new(), Codec::new())
    }

    fn state_at(height: u64, changed: u64) -> State {
        let (validators, _) = test_validator_set(&[10, 20, 30]);
        State {
            version: Default::default(),
            chain_id: "store-test".to_string(),
            last_block_height: BlockHeight(height),
            last_block_total_tx: 0,
            last_block_id: Default::default(),
            last_block_time: 0,
            validators: validators.clone(),
            last_validators: validators,
            last_height_validators_changed: BlockHeight(changed),
            consensus_params: ConsensusParams::default(),
            last_height_consensus_params_changed: BlockHeight(changed),
            last_results_hash: Hash::ZERO,
            app_hash: Hash::ZERO,
            last_fee: 0,
            last_rewards: vec![],
        }
    }

    #[test]
    fn test_fresh_store_has_no_state() {
        assert_eq!(store().load_state().unwrap(), None);
    }

    #[test]
    fn test_state_roundtrip() {
        let store = store();
        let state = state_at(4, 5);
        store.save_state(&state).unwrap();
        assert_eq!(store.load_state().unwrap(), Some(state));
    }

    #[test]
    fn test_validators_saved_in_full_only_at_change_height() {
        let store = store();
        // Set changed at height 5 and persists unchanged through heights 6, 7.
        store.save_state(&state_at(4, 5)).unwrap();
        store.save_state(&state_at(5, 5)).unwrap();
        store.save_state(&state_at(6, 5)).unwrap();

        let raw = store.db().get(&validators_key(BlockHeight(7))).unwrap().unwrap();
        let info: ValidatorsInfo = Codec::new().decode(&raw).unwrap();
        assert_eq!(info.validator_set, None);
        assert_eq!(info.last_height_changed, BlockHeight(5));

        let expected = state_at(4, 5).validators;
        for h in 5..=7 {
            assert_eq!(store.load_validators(BlockHeight(h)).unwrap(), expected);
        }
        assert_eq!(
            store.load_consensus_params(BlockHeight(7)).unwrap(),
            ConsensusParams::default()
        );
    }

    #[test]
    fn test_missing_snapshot() {
        let store = store();
        store.save_state(&state_at(4, 5)).unwrap();
        assert!(matches!(
            store.load_validators(BlockHeight(9)),
            Err(StoreError::NoValidatorsForHeight(BlockHeight(9)))
        ));
        assert!(matches!(
            store.load_consensus_params(BlockHeight(9)),
            Err(StoreError::NoParamsForHeight(BlockHeight(9)))
        ));
    }

    #[test]
    fn test_dangling_back_pointer_is_corruption() {
        let store = store();
        // Height 8 points at height 5, which was never written.
        store.save_state(&state_at(7, 5)).unwrap();
        let err = store.load_validators(BlockHeight(8)).unwrap_err();
        assert!(err.is_corruption());
    }

    #[traced_test]
    #[test]
    fn test_undecodable_record_is_corruption() {
        let store = store();
        store.db().set(STATE_KEY, &[0xde, 0xad]).unwrap();
        assert!(store.load_state().unwrap_err().is_corruption());
        assert!(logs_contain("Failed to decode record"));
    }

    #[test]
    fn test_abci_responses_roundtrip() {
        let store = store();
        assert!(matches!(
            store.load_abci_responses(BlockHeight(3)),
            Err(StoreError::NoAbciResponsesForHeight(_))
        ));

        let mut responses = AbciResponses::new(2);
        responses.deliver_tx.push(ResponseDeliverTx::default());
        responses.deliver_tx.push(ResponseDeliverTx {
            code: 7,
            ..Default::default()
        });
        store.save_abci_responses(BlockHeight(3), &responses).unwrap();
        assert_eq!(store.load_abci_responses(BlockHeight(3)).unwrap(), responses);
    }

    #[test]
    fn test_tx_result_index() {
        let store = store();
        let tx = Transaction::new(b"transfer".to_vec());
        let result = TxResult {
            height: BlockHeight(2),
            index: 0,
            tx: tx.clone(),
            result: ResponseDeliverTx::default(),
        };
        store.save_tx_result(&result).unwrap();
        assert_eq!(store.load_tx_result(&tx.hash()).unwrap(), Some(result));
        assert_eq!(
            store.load_tx_result(&Hash::from_bytes(b"unknown")).unwrap(),
            None
        );
    }
}
