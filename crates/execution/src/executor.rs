//! Block validation, execution and state transition.

use crate::collaborators::{
    ApplicationConnection, ApplicationError, EventBus, EvidencePool, ExecutorEvent, NopEventBus,
    SharedMempool,
};
use crate::config::ExecutorConfig;
use crate::error::{BlockValidationError, EvidenceVerificationError, ExecutorError};
use crate::metrics;
use meridian_storage::{KvStore, StateStore};
use meridian_types::{
    AbciResponses, AbsentValidator, Address, Block, BlockHeight, BlockId, ByzantineValidator,
    Codec, Commit, CommitInfo, Evidence, Hash, Header, RequestBeginBlock, State, TxResult,
    Validator, ValidatorSet, ValidatorUpdate, Version,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Drives one height at a time from a proposed block to a persisted state.
///
/// Validation and state transition take the previous [`State`] by reference
/// and never modify it; a failed [`apply_block`](Self::apply_block) leaves
/// the caller's state untouched. At most one `apply_block` may be in flight
/// per chain.
///
/// Calls into the application block until it answers, so the executor must
/// not be driven from inside an async runtime worker. Use `spawn_blocking`.
pub struct BlockExecutor<S: KvStore> {
    store: StateStore<S>,
    app: Arc<dyn ApplicationConnection>,
    mempool: SharedMempool,
    evidence_pool: Arc<dyn EvidencePool>,
    event_bus: Arc<dyn EventBus>,
    config: ExecutorConfig,
}

impl<S: KvStore> BlockExecutor<S> {
    pub fn new(
        store: StateStore<S>,
        app: Arc<dyn ApplicationConnection>,
        mempool: SharedMempool,
        evidence_pool: Arc<dyn EvidencePool>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            store,
            app,
            mempool,
            evidence_pool,
            event_bus: Arc::new(NopEventBus),
            config,
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<dyn EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn store(&self) -> &StateStore<S> {
        &self.store
    }

    fn codec(&self) -> &Codec {
        self.store.codec()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Proposal
    // ═══════════════════════════════════════════════════════════════════════

    /// Build the block `proposer_address` proposes at `height` on top of
    /// `state`, filled from the mempool and the evidence pool.
    pub fn create_proposal_block(
        &self,
        state: &State,
        height: BlockHeight,
        time: u64,
        last_commit: Commit,
        proposer_address: Address,
    ) -> Block {
        let limits = state.consensus_params.block_size;
        let evidence = self
            .evidence_pool
            .pending_evidence(self.config.max_evidence_per_block);
        let txs = self
            .mempool
            .lock()
            .reap_max_bytes_max_gas(limits.max_bytes, limits.max_gas);

        debug!(
            height = height.0,
            num_txs = txs.len(),
            num_evidence = evidence.len(),
            "Created proposal block"
        );
        state.make_block(
            height,
            time,
            txs,
            last_commit,
            evidence,
            proposer_address,
            self.codec(),
        )
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Validation
    // ═══════════════════════════════════════════════════════════════════════

    /// Check that `block` is a valid successor of `state`.
    ///
    /// Structural problems (the block disagreeing with its own header) are
    /// reported first, as [`BlockValidationError::Structure`].
    pub fn validate_block(&self, state: &State, block: &Block) -> Result<(), BlockValidationError> {
        block.validate_basic(self.codec())?;

        let header = &block.header;
        if header.version != state.version {
            return Err(BlockValidationError::WrongVersion {
                expected: state.version,
                actual: header.version,
            });
        }
        if header.chain_id != state.chain_id {
            return Err(BlockValidationError::WrongChainId {
                expected: state.chain_id.clone(),
                actual: header.chain_id.clone(),
            });
        }
        let expected_height = state.last_block_height.next();
        if header.height != expected_height {
            return Err(BlockValidationError::WrongHeight {
                expected: expected_height,
                actual: header.height,
            });
        }
        if header.last_block_id != state.last_block_id {
            return Err(BlockValidationError::WrongLastBlockId {
                expected: state.last_block_id,
                actual: header.last_block_id,
            });
        }
        let expected_total = state.last_block_total_tx.saturating_add(header.num_txs);
        if header.total_txs != expected_total {
            return Err(BlockValidationError::WrongTotalTxs {
                expected: expected_total,
                actual: header.total_txs,
            });
        }

        check_state_hash("app_hash", state.app_hash, header.app_hash)?;
        check_state_hash(
            "consensus_hash",
            state.consensus_params.hash(self.codec()),
            header.consensus_hash,
        )?;
        check_state_hash(
            "last_results_hash",
            state.last_results_hash,
            header.last_results_hash,
        )?;
        check_state_hash(
            "validators_hash",
            state.validators.hash(self.codec()),
            header.validators_hash,
        )?;

        if !state.validators.has_address(&header.proposer_address) {
            return Err(BlockValidationError::UnknownProposer(
                header.proposer_address,
            ));
        }

        if header.height == BlockHeight(1) {
            if !block.last_commit.is_empty() {
                return Err(BlockValidationError::GenesisCommitNotEmpty);
            }
        } else {
            if block.last_commit.size() != state.last_validators.size() {
                return Err(BlockValidationError::WrongLastCommitSize {
                    expected: state.last_validators.size(),
                    actual: block.last_commit.size(),
                });
            }
            state
                .last_validators
                .verify_commit(
                    &state.chain_id,
                    &state.last_block_id,
                    state.last_block_height,
                    &block.last_commit,
                )
                .map_err(BlockValidationError::LastCommit)?;
        }

        for (index, evidence) in block.evidence.iter().enumerate() {
            self.verify_evidence(state, evidence.as_ref())
                .map_err(|source| BlockValidationError::Evidence { index, source })?;
        }

        Ok(())
    }

    /// Check that `evidence` is recent enough, names a validator of its
    /// height, and is valid against that validator's key.
    pub fn verify_evidence(
        &self,
        state: &State,
        evidence: &dyn Evidence,
    ) -> Result<(), EvidenceVerificationError> {
        let current = state.last_block_height;
        let max_age = state.consensus_params.evidence.max_age;
        let age = current.0.saturating_sub(evidence.height().0);
        if age > max_age {
            return Err(EvidenceVerificationError::TooOld {
                height: evidence.height(),
                current,
                max_age,
            });
        }

        let validators = self.store.load_validators(evidence.height())?;
        let address = evidence.address();
        let Some((_, validator)) = validators.get_by_address(&address) else {
            return Err(EvidenceVerificationError::NotValidator {
                address,
                height: evidence.height(),
            });
        };

        evidence.verify(&state.chain_id, &validator.public_key)?;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Apply
    // ═══════════════════════════════════════════════════════════════════════

    /// Validate, execute and commit `block`, returning the next state.
    ///
    /// Raw execution results are persisted before the application commits,
    /// so a crash in between can be recovered by replaying the same block.
    #[instrument(skip(self, state, block_id, block), fields(
        height = block.height().0,
        num_txs = block.data.txs.len(),
        block_id = %block_id,
    ))]
    pub fn apply_block(
        &self,
        state: &State,
        block_id: BlockId,
        block: &Block,
    ) -> Result<State, ExecutorError> {
        let start = Instant::now();

        if let Err(e) = self.validate_block(state, block) {
            metrics::record_invalid_block();
            warn!(error = %e, "Rejected invalid block");
            return Err(e.into());
        }

        let responses = self.exec_block_on_app(state, block)?;
        self.store.save_abci_responses(block.height(), &responses)?;

        let mut next = update_state(state, block_id, &block.header, &responses, self.codec())?;
        let updates = &responses.end_block.validator_updates;
        if !updates.is_empty() {
            metrics::record_validator_updates(updates.len(), next.validators.size());
            info!(
                updates = updates.len(),
                validators = next.validators.size(),
                "Validator set changed"
            );
        }

        let commit_info = self.commit(block)?;
        next.app_hash = commit_info.app_hash;
        next.last_fee = commit_info.fee;
        next.last_rewards = commit_info.rewards.clone();
        if let Some(results_hash) = commit_info.results_hash() {
            next.last_results_hash = results_hash;
        }

        self.store.save_state(&next)?;

        if self.config.index_tx_results {
            for (index, (tx, result)) in block
                .data
                .txs
                .iter()
                .zip(&responses.deliver_tx)
                .enumerate()
            {
                self.store.save_tx_result(&TxResult {
                    height: block.height(),
                    index: index as u32,
                    tx: tx.clone(),
                    result: result.clone(),
                })?;
            }
        }

        self.evidence_pool.update(block, &next);

        self.fire_events(block, block_id, &responses, &next);

        metrics::record_block_applied(block.height().0, start.elapsed().as_secs_f64());
        info!(
            app_hash = %next.app_hash,
            validators = next.validators.size(),
            "Applied block"
        );
        Ok(next)
    }

    /// Run `block` through the application: begin, every transaction in
    /// order, end.
    ///
    /// A non-OK begin response is fatal. Non-OK transaction results are data
    /// and are returned like any other.
    pub fn exec_block_on_app(
        &self,
        state: &State,
        block: &Block,
    ) -> Result<AbciResponses, ExecutorError> {
        let height = block.height();
        let (absent_validators, byzantine_validators) =
            self.begin_block_validator_info(state, block)?;

        let request = RequestBeginBlock {
            hash: block.hash(self.codec()),
            header: block.header.clone(),
            absent_validators,
            byzantine_validators,
        };
        let begin = self.app.begin_block(request)?;
        if !begin.is_ok() {
            return Err(ExecutorError::BeginBlockRejected {
                code: begin.code,
                log: begin.log,
            });
        }

        let receivers = block
            .data
            .txs
            .iter()
            .map(|tx| self.app.deliver_tx_async(tx))
            .collect::<Result<Vec<_>, _>>()?;
        self.app.flush()?;

        let mut responses = AbciResponses::new(receivers.len());
        for (index, receiver) in receivers.into_iter().enumerate() {
            let result = receiver
                .blocking_recv()
                .map_err(|_| ApplicationError::ResponseDropped { index })?;
            if !result.is_ok() {
                debug!(
                    height = height.0,
                    index,
                    code = result.code,
                    log = %result.log,
                    "Transaction failed"
                );
            }
            responses.deliver_tx.push(result);
        }

        responses.end_block = self.app.end_block(height)?;

        let failed = responses.failed_txs();
        metrics::record_txs_executed(responses.deliver_tx.len(), failed);
        info!(
            height = height.0,
            valid_txs = responses.deliver_tx.len() - failed,
            invalid_txs = failed,
            validator_updates = responses.end_block.validator_updates.len(),
            "Executed block"
        );
        Ok(responses)
    }

    /// Validators that did not sign the previous block, and validators named
    /// by the block's evidence.
    fn begin_block_validator_info(
        &self,
        state: &State,
        block: &Block,
    ) -> Result<(Vec<AbsentValidator>, Vec<ByzantineValidator>), ExecutorError> {
        let mut absent = Vec::new();
        if block.height() > BlockHeight(1) {
            for (index, slot) in block.last_commit.precommits.iter().enumerate() {
                if slot.is_some() {
                    continue;
                }
                if let Some(validator) = state.last_validators.get_by_index(index) {
                    absent.push(AbsentValidator {
                        index: index as u32,
                        address: validator.address,
                        voting_power: validator.voting_power,
                    });
                }
            }
        }

        let mut byzantine = Vec::with_capacity(block.evidence.len());
        for evidence in block.evidence.iter() {
            let validators = self.store.load_validators(evidence.height())?;
            byzantine.push(ByzantineValidator {
                kind: evidence.kind().to_string(),
                address: evidence.address(),
                height: evidence.height(),
                time: block.header.time,
                total_voting_power: validators.total_voting_power(),
            });
        }

        Ok((absent, byzantine))
    }

    /// Commit the application state and let the mempool catch up.
    ///
    /// The mempool is locked for the whole call so no transaction is
    /// checked against state that is about to change.
    pub fn commit(&self, block: &Block) -> Result<CommitInfo, ExecutorError> {
        let mut mempool = self.mempool.lock();

        mempool.flush_app_conn()?;

        let response = self.app.commit()?;
        let info: CommitInfo = self
            .codec()
            .decode(&response.data)
            .map_err(ExecutorError::InvalidCommitResponse)?;

        info!(
            height = block.height().0,
            num_txs = block.data.txs.len(),
            app_hash = %info.app_hash,
            fee = info.fee,
            "Committed state"
        );

        mempool.update(block.height(), &block.data.txs)?;
        Ok(info)
    }

    /// Publish the block's events. Failures are logged and otherwise ignored.
    pub fn fire_events(
        &self,
        block: &Block,
        block_id: BlockId,
        responses: &AbciResponses,
        state: &State,
    ) {
        let mut events = Vec::with_capacity(block.data.txs.len() + 3);
        events.push(ExecutorEvent::NewBlock {
            height: block.height(),
            block_id,
            app_hash: state.app_hash,
            num_txs: block.header.num_txs,
            fee: state.last_fee,
            reward: responses.end_block.reward,
        });
        events.push(ExecutorEvent::NewBlockHeader {
            header: block.header.clone(),
        });
        for (index, (tx, result)) in block.data.txs.iter().zip(&responses.deliver_tx).enumerate() {
            events.push(ExecutorEvent::Tx {
                result: TxResult {
                    height: block.height(),
                    index: index as u32,
                    tx: tx.clone(),
                    result: result.clone(),
                },
            });
        }
        if !responses.end_block.validator_updates.is_empty() {
            events.push(ExecutorEvent::ValidatorSetUpdates {
                height: block.height(),
                updates: responses.end_block.validator_updates.clone(),
            });
        }

        for event in events {
            if let Err(e) = self.event_bus.publish(event) {
                warn!(error = %e, "Failed to publish event");
            }
        }
    }
}

fn check_state_hash(
    field: &'static str,
    expected: Hash,
    actual: Hash,
) -> Result<(), BlockValidationError> {
    if expected == actual {
        Ok(())
    } else {
        Err(BlockValidationError::WrongStateHash {
            field,
            expected,
            actual,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// State transition
// ═══════════════════════════════════════════════════════════════════════════

/// Apply the application's validator changes to `validators`.
///
/// Power 0 removes, an unknown address with positive power is added, a known
/// address gets its power replaced. Anything else means the application and
/// this replica disagree about the set, and is an error.
pub fn update_validators(
    validators: &mut ValidatorSet,
    updates: &[ValidatorUpdate],
) -> Result<(), ExecutorError> {
    for update in updates {
        if update.power < 0 {
            return Err(ExecutorError::ValidatorUpdate(format!(
                "negative power {} for {}",
                update.power,
                update.public_key.address()
            )));
        }
        let address = update.public_key.address();

        match validators.get_by_address(&address) {
            None if update.power == 0 => {
                return Err(ExecutorError::ValidatorUpdate(format!(
                    "cannot remove unknown validator {}",
                    address
                )));
            }
            None => {
                let mut validator = Validator::new(update.public_key.clone(), update.power);
                if let Some(reward_address) = update.reward_address {
                    validator = validator.with_reward_address(reward_address);
                }
                if let Some(name) = &update.name {
                    validator = validator.with_name(name.clone());
                }
                let added = validators
                    .add(validator)
                    .map_err(|e| ExecutorError::ValidatorUpdate(e.to_string()))?;
                if !added {
                    return Err(ExecutorError::ValidatorUpdate(format!(
                        "failed to add validator {}",
                        address
                    )));
                }
                debug!(%address, power = update.power, "Added validator");
            }
            Some(_) if update.power == 0 => {
                if validators.remove(&address).is_none() {
                    return Err(ExecutorError::ValidatorUpdate(format!(
                        "failed to remove validator {}",
                        address
                    )));
                }
                debug!(%address, "Removed validator");
            }
            Some((_, mut validator)) => {
                validator.voting_power = update.power;
                if let Some(reward_address) = update.reward_address {
                    validator.reward_address = reward_address;
                }
                if let Some(name) = &update.name {
                    validator.name = name.clone();
                }
                let updated = validators
                    .update(validator)
                    .map_err(|e| ExecutorError::ValidatorUpdate(e.to_string()))?;
                if !updated {
                    return Err(ExecutorError::ValidatorUpdate(format!(
                        "failed to update validator {}",
                        address
                    )));
                }
                debug!(%address, power = update.power, "Updated validator power");
            }
        }
    }
    if validators.size() == 0 {
        return Err(ExecutorError::ValidatorUpdate(
            "updates would leave the validator set empty".to_string(),
        ));
    }
    Ok(())
}

/// Next state after executing the block with `header`.
///
/// Pure: `state` is not modified and equal inputs give equal outputs. The
/// returned validator set has its proposer advanced exactly once. The app
/// hash, fee and rewards are reset here and filled in once the application
/// commits.
pub fn update_state(
    state: &State,
    block_id: BlockId,
    header: &Header,
    responses: &AbciResponses,
    codec: &Codec,
) -> Result<State, ExecutorError> {
    let end_block = &responses.end_block;

    let mut next_validators = state.validators.clone();
    let mut last_height_validators_changed = state.last_height_validators_changed;
    if !end_block.validator_updates.is_empty() {
        update_validators(&mut next_validators, &end_block.validator_updates)?;
        // The new set signs from the next height on.
        last_height_validators_changed = header.height.next();
    }
    next_validators.increment_accum(1);

    let mut next_params = state.consensus_params;
    let mut last_height_params_changed = state.last_height_consensus_params_changed;
    if let Some(diff) = end_block.consensus_param_updates.as_ref() {
        if !diff.is_empty() {
            next_params = state.consensus_params.update(diff);
            next_params.validate()?;
            last_height_params_changed = header.height.next();
        }
    }

    let version = Version {
        block: state.version.block,
        app: end_block.app_version.unwrap_or(state.version.app),
    };

    Ok(State {
        version,
        chain_id: state.chain_id.clone(),
        last_block_height: header.height,
        last_block_total_tx: header.total_txs,
        last_block_id: block_id,
        last_block_time: header.time,
        validators: next_validators,
        last_validators: state.validators.clone(),
        last_height_validators_changed,
        consensus_params: next_params,
        last_height_consensus_params_changed: last_height_params_changed,
        last_results_hash: responses.results_hash(codec),
        app_hash: Hash::ZERO,
        last_fee: 0,
        last_rewards: Vec::new(),
    })
}
