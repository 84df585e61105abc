//! Scripted collaborators for driving a `BlockExecutor` in tests.

#![allow(dead_code)]

use meridian_execution::{
    ApplicationConnection, ApplicationError, BlockExecutor, DeliverTxReceiver, EventBus,
    EventBusError, EvidencePool, EvidencePoolError, ExecutorConfig, ExecutorEvent, Mempool,
    MempoolError, SharedMempool,
};
use meridian_storage::{MemoryStore, StateStore};
use meridian_types::test_utils::{test_validator_set, TEST_CHAIN_ID};
use meridian_types::{
    Block, BlockHeight, BlockId, Codec, CommitInfo, Evidence, GenesisDoc, GenesisValidator, Hash,
    KeyPair, RequestBeginBlock, ResponseBeginBlock, ResponseCommit, ResponseDeliverTx,
    ResponseEndBlock, State, Transaction,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Transactions whose bytes start with this prefix fail with code 1.
pub const FAILING_PREFIX: &[u8] = b"bad";

// ═══════════════════════════════════════════════════════════════════════════
// Application
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct AppState {
    pending: Vec<(oneshot::Sender<ResponseDeliverTx>, ResponseDeliverTx)>,
    begin_requests: Vec<RequestBeginBlock>,
    begin_code: u32,
    end_blocks: VecDeque<ResponseEndBlock>,
    block_txs: Vec<Transaction>,
    block_fee: u64,
    app_hash: Hash,
    commits: usize,
    commit_saw_mempool_locked: Vec<bool>,
    corrupt_commit: bool,
}

/// Application that accepts everything except [`FAILING_PREFIX`] txs and
/// chains its app hash over every delivered transaction.
///
/// `deliver_tx` responses are held until `flush`, then completed in order.
pub struct MockApp {
    codec: Codec,
    state: Mutex<AppState>,
    mempool: Mutex<Option<SharedMempool>>,
}

impl MockApp {
    pub fn new() -> Self {
        Self {
            codec: Codec::new(),
            state: Mutex::new(AppState::default()),
            mempool: Mutex::new(None),
        }
    }

    /// Lets `commit` observe whether the executor holds the mempool lock.
    pub fn watch_mempool(&self, mempool: SharedMempool) {
        *self.mempool.lock() = Some(mempool);
    }

    pub fn reject_begin_block(&self, code: u32) {
        self.state.lock().begin_code = code;
    }

    pub fn push_end_block(&self, response: ResponseEndBlock) {
        self.state.lock().end_blocks.push_back(response);
    }

    pub fn corrupt_next_commit(&self) {
        self.state.lock().corrupt_commit = true;
    }

    pub fn begin_requests(&self) -> Vec<RequestBeginBlock> {
        self.state.lock().begin_requests.clone()
    }

    pub fn commits(&self) -> usize {
        self.state.lock().commits
    }

    pub fn commit_saw_mempool_locked(&self) -> Vec<bool> {
        self.state.lock().commit_saw_mempool_locked.clone()
    }

    pub fn app_hash(&self) -> Hash {
        self.state.lock().app_hash
    }
}

impl ApplicationConnection for MockApp {
    fn begin_block(
        &self,
        request: RequestBeginBlock,
    ) -> Result<ResponseBeginBlock, ApplicationError> {
        let mut state = self.state.lock();
        state.begin_requests.push(request);
        state.block_txs.clear();
        state.block_fee = 0;
        Ok(ResponseBeginBlock {
            code: state.begin_code,
            log: if state.begin_code == 0 {
                String::new()
            } else {
                "begin rejected".to_string()
            },
        })
    }

    fn deliver_tx_async(&self, tx: &Transaction) -> Result<DeliverTxReceiver, ApplicationError> {
        let (sender, receiver) = oneshot::channel();
        let response = if tx.as_bytes().starts_with(FAILING_PREFIX) {
            ResponseDeliverTx {
                code: 1,
                log: "rejected".to_string(),
                ..Default::default()
            }
        } else {
            ResponseDeliverTx {
                data: tx.as_bytes().to_vec(),
                gas_used: 10,
                fee: 1,
                ..Default::default()
            }
        };

        let mut state = self.state.lock();
        if response.is_ok() {
            state.block_txs.push(tx.clone());
            state.block_fee += response.fee;
        }
        state.pending.push((sender, response));
        Ok(receiver)
    }

    fn flush(&self) -> Result<(), ApplicationError> {
        let pending = std::mem::take(&mut self.state.lock().pending);
        for (sender, response) in pending {
            sender
                .send(response)
                .map_err(|_| ApplicationError::ConnectionClosed)?;
        }
        Ok(())
    }

    fn end_block(&self, _height: BlockHeight) -> Result<ResponseEndBlock, ApplicationError> {
        Ok(self.state.lock().end_blocks.pop_front().unwrap_or_default())
    }

    fn commit(&self) -> Result<ResponseCommit, ApplicationError> {
        let locked = self
            .mempool
            .lock()
            .as_ref()
            .map(|m| m.is_locked())
            .unwrap_or(false);

        let mut state = self.state.lock();
        state.commit_saw_mempool_locked.push(locked);
        state.commits += 1;

        if std::mem::take(&mut state.corrupt_commit) {
            return Ok(ResponseCommit {
                data: vec![0xff, 0x00],
            });
        }

        let mut parts: Vec<&[u8]> = vec![state.app_hash.as_bytes().as_slice()];
        parts.extend(state.block_txs.iter().map(|tx| tx.as_bytes()));
        let app_hash = Hash::from_parts(&parts);
        state.app_hash = app_hash;

        let info = CommitInfo {
            app_hash: state.app_hash,
            results_hashes: vec![],
            fee: state.block_fee,
            rewards: vec![],
        };
        Ok(ResponseCommit {
            data: self.codec.encode(&info).unwrap(),
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Mempool, evidence pool, event bus
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Default)]
pub struct MockMempool {
    pub txs: Vec<Transaction>,
    pub updates: Vec<(BlockHeight, usize)>,
}

impl Mempool for MockMempool {
    fn reap_max_bytes_max_gas(&self, max_bytes: u64, _max_gas: i64) -> Vec<Transaction> {
        let mut total = 0u64;
        self.txs
            .iter()
            .take_while(|tx| {
                total += tx.len() as u64;
                total <= max_bytes
            })
            .cloned()
            .collect()
    }

    fn flush_app_conn(&mut self) -> Result<(), MempoolError> {
        Ok(())
    }

    fn update(&mut self, height: BlockHeight, txs: &[Transaction]) -> Result<(), MempoolError> {
        self.txs.retain(|tx| !txs.contains(tx));
        self.updates.push((height, txs.len()));
        Ok(())
    }

    fn size(&self) -> usize {
        self.txs.len()
    }
}

#[derive(Default)]
pub struct MockEvidencePool {
    pub pending: Mutex<Vec<Arc<dyn Evidence>>>,
    pub updated_heights: Mutex<Vec<BlockHeight>>,
}

impl EvidencePool for MockEvidencePool {
    fn pending_evidence(&self, max: usize) -> Vec<Arc<dyn Evidence>> {
        self.pending.lock().iter().take(max).cloned().collect()
    }

    fn add_evidence(&self, evidence: Arc<dyn Evidence>) -> Result<(), EvidencePoolError> {
        self.pending.lock().push(evidence);
        Ok(())
    }

    fn update(&self, block: &Block, _state: &State) {
        let mut pending = self.pending.lock();
        pending.retain(|ev| !block.evidence.iter().any(|included| included.equal(ev.as_ref())));
        self.updated_heights.lock().push(block.height());
    }
}

#[derive(Default)]
pub struct RecordingEventBus {
    pub events: Mutex<Vec<ExecutorEvent>>,
    pub fail: bool,
}

impl EventBus for RecordingEventBus {
    fn publish(&self, event: ExecutorEvent) -> Result<(), EventBusError> {
        if self.fail {
            return Err(EventBusError {
                kind: event.kind(),
                reason: "subscriber gone".to_string(),
            });
        }
        self.events.lock().push(event);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Harness
// ═══════════════════════════════════════════════════════════════════════════

pub struct Harness {
    pub executor: BlockExecutor<Arc<MemoryStore>>,
    pub app: Arc<MockApp>,
    pub mempool: Arc<Mutex<MockMempool>>,
    pub evidence_pool: Arc<MockEvidencePool>,
    pub events: Arc<RecordingEventBus>,
    /// Keys ordered by genesis validator set index.
    pub keys: Vec<KeyPair>,
    pub genesis: State,
    pub codec: Codec,
}

impl Harness {
    /// Four validators of power 10 on [`TEST_CHAIN_ID`].
    pub fn new() -> Self {
        Self::with_event_bus(RecordingEventBus::default())
    }

    pub fn with_event_bus(events: RecordingEventBus) -> Self {
        let codec = Codec::new();
        let (_, keys) = test_validator_set(&[10, 10, 10, 10]);
        let doc = GenesisDoc {
            genesis_time: 1_000,
            chain_id: TEST_CHAIN_ID.to_string(),
            consensus_params: None,
            validators: keys
                .iter()
                .map(|k| GenesisValidator {
                    public_key: k.public_key(),
                    power: 10,
                    name: String::new(),
                    reward_address: None,
                })
                .collect(),
            app_hash: Hash::ZERO,
        };

        let store = StateStore::new(Arc::new(MemoryStore::new()), codec);
        let genesis = store.load_state_or_genesis(&doc).unwrap();

        let app = Arc::new(MockApp::new());
        let mempool = Arc::new(Mutex::new(MockMempool::default()));
        let shared: SharedMempool = mempool.clone();
        app.watch_mempool(shared.clone());
        let evidence_pool = Arc::new(MockEvidencePool::default());
        let events = Arc::new(events);

        let executor = BlockExecutor::new(
            store,
            app.clone(),
            shared,
            evidence_pool.clone(),
            ExecutorConfig::default(),
        )
        .with_event_bus(events.clone());

        Self {
            executor,
            app,
            mempool,
            evidence_pool,
            events,
            keys,
            genesis,
            codec,
        }
    }

    pub fn add_txs(&self, txs: &[&[u8]]) {
        self.mempool
            .lock()
            .txs
            .extend(txs.iter().map(|t| Transaction::new(t.to_vec())));
    }

    /// Proposal on top of `state` by its current proposer.
    pub fn propose(&self, state: &State, last_commit: meridian_types::Commit) -> Block {
        let proposer = state.validators.get_proposer().unwrap().address;
        let height = state.last_block_height.next();
        self.executor.create_proposal_block(
            state,
            height,
            state.last_block_time + 1_000,
            last_commit,
            proposer,
        )
    }

    pub fn block_id(&self, block: &Block) -> BlockId {
        BlockId::new(block.hash(&self.codec), 1, Hash::from_bytes(b"parts"))
    }
}
