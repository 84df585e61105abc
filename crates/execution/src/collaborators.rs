//! Components the executor drives but does not own.
//!
//! Each collaborator is a trait so the node can plug in its real transport,
//! mempool and evidence pool, and tests can plug in scripted ones.

use meridian_types::{
    Block, BlockHeight, BlockId, Evidence, Hash, Header, RequestBeginBlock, ResponseBeginBlock,
    ResponseCommit, ResponseDeliverTx, ResponseEndBlock, State, Transaction, TxResult,
    ValidatorUpdate,
};
use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;

// ═══════════════════════════════════════════════════════════════════════════
// Application connection
// ═══════════════════════════════════════════════════════════════════════════

/// Failure of the channel to the application, as opposed to a non-OK
/// response code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplicationError {
    #[error("application connection closed")]
    ConnectionClosed,

    #[error("{request} request failed: {reason}")]
    Request {
        request: &'static str,
        reason: String,
    },

    #[error("deliver_tx response for tx {index} was dropped")]
    ResponseDropped { index: usize },
}

/// Completion of one `deliver_tx` submission.
pub type DeliverTxReceiver = oneshot::Receiver<ResponseDeliverTx>;

/// Request/response channel to the deterministic application.
///
/// Transactions are submitted with [`deliver_tx_async`] in block order. The
/// transport must complete the returned receivers in that same order; a
/// [`flush`] guarantees every submitted transaction has been sent.
/// Timeouts and retries are the transport's business.
///
/// [`deliver_tx_async`]: ApplicationConnection::deliver_tx_async
/// [`flush`]: ApplicationConnection::flush
pub trait ApplicationConnection: Send + Sync {
    fn begin_block(&self, request: RequestBeginBlock)
        -> Result<ResponseBeginBlock, ApplicationError>;

    fn deliver_tx_async(&self, tx: &Transaction) -> Result<DeliverTxReceiver, ApplicationError>;

    fn flush(&self) -> Result<(), ApplicationError>;

    fn end_block(&self, height: BlockHeight) -> Result<ResponseEndBlock, ApplicationError>;

    /// Commit the block's state changes. The returned blob decodes into
    /// [`CommitInfo`](meridian_types::CommitInfo).
    fn commit(&self) -> Result<ResponseCommit, ApplicationError>;
}

// ═══════════════════════════════════════════════════════════════════════════
// Mempool
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MempoolError {
    #[error("mempool application connection failed: {0}")]
    AppConn(String),

    #[error("mempool update failed: {0}")]
    Update(String),
}

/// Transaction intake.
///
/// Shared as [`SharedMempool`]; holding the mutex guard is the mempool's
/// lock. The executor holds it across the application commit and the
/// following [`update`](Mempool::update).
pub trait Mempool: Send {
    /// Transactions for a new block, bounded by total bytes and gas.
    /// `max_gas < 0` means unbounded.
    fn reap_max_bytes_max_gas(&self, max_bytes: u64, max_gas: i64) -> Vec<Transaction>;

    /// Drain pending requests on the mempool's own application connection.
    fn flush_app_conn(&mut self) -> Result<(), MempoolError>;

    /// Evict `txs`, committed at `height`, and recheck the rest.
    fn update(&mut self, height: BlockHeight, txs: &[Transaction]) -> Result<(), MempoolError>;

    fn size(&self) -> usize;
}

pub type SharedMempool = Arc<Mutex<dyn Mempool>>;

/// Mempool that holds nothing.
#[derive(Debug, Default)]
pub struct NopMempool;

impl Mempool for NopMempool {
    fn reap_max_bytes_max_gas(&self, _max_bytes: u64, _max_gas: i64) -> Vec<Transaction> {
        Vec::new()
    }

    fn flush_app_conn(&mut self) -> Result<(), MempoolError> {
        Ok(())
    }

    fn update(&mut self, _height: BlockHeight, _txs: &[Transaction]) -> Result<(), MempoolError> {
        Ok(())
    }

    fn size(&self) -> usize {
        0
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Evidence pool
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvidencePoolError {
    #[error("evidence rejected: {0}")]
    Rejected(String),
}

/// Store of verified misbehaviour waiting to be included in a block.
pub trait EvidencePool: Send + Sync {
    /// Up to `max` pieces of evidence not yet committed.
    fn pending_evidence(&self, max: usize) -> Vec<Arc<dyn Evidence>>;

    fn add_evidence(&self, evidence: Arc<dyn Evidence>) -> Result<(), EvidencePoolError>;

    /// Called once per committed block with the resulting state.
    fn update(&self, block: &Block, state: &State);
}

#[derive(Debug, Default)]
pub struct NopEvidencePool;

impl EvidencePool for NopEvidencePool {
    fn pending_evidence(&self, _max: usize) -> Vec<Arc<dyn Evidence>> {
        Vec::new()
    }

    fn add_evidence(&self, _evidence: Arc<dyn Evidence>) -> Result<(), EvidencePoolError> {
        Ok(())
    }

    fn update(&self, _block: &Block, _state: &State) {}
}

// ═══════════════════════════════════════════════════════════════════════════
// Events
// ═══════════════════════════════════════════════════════════════════════════

/// Events published after a block is committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorEvent {
    NewBlock {
        height: BlockHeight,
        block_id: BlockId,
        app_hash: Hash,
        num_txs: u64,
        fee: u64,
        reward: Option<u64>,
    },
    NewBlockHeader {
        header: Header,
    },
    Tx {
        result: TxResult,
    },
    ValidatorSetUpdates {
        height: BlockHeight,
        updates: Vec<ValidatorUpdate>,
    },
}

impl ExecutorEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutorEvent::NewBlock { .. } => "new_block",
            ExecutorEvent::NewBlockHeader { .. } => "new_block_header",
            ExecutorEvent::Tx { .. } => "tx",
            ExecutorEvent::ValidatorSetUpdates { .. } => "validator_set_updates",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to publish {kind} event: {reason}")]
pub struct EventBusError {
    pub kind: &'static str,
    pub reason: String,
}

/// Best-effort event sink. Publish failures are logged by the executor and
/// never fail a block.
pub trait EventBus: Send + Sync {
    fn publish(&self, event: ExecutorEvent) -> Result<(), EventBusError>;
}

#[derive(Debug, Default)]
pub struct NopEventBus;

impl EventBus for NopEventBus {
    fn publish(&self, _event: ExecutorEvent) -> Result<(), EventBusError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nop_mempool_through_shared_handle() {
        let mempool: SharedMempool = Arc::new(Mutex::new(NopMempool));
        let mut guard = mempool.lock();
        assert!(guard.reap_max_bytes_max_gas(1024, -1).is_empty());
        assert_eq!(guard.flush_app_conn(), Ok(()));
        assert_eq!(guard.update(BlockHeight(1), &[]), Ok(()));
        assert_eq!(guard.size(), 0);
    }

    #[test]
    fn test_event_kinds() {
        let event = ExecutorEvent::ValidatorSetUpdates {
            height: BlockHeight(3),
            updates: vec![],
        };
        assert_eq!(event.kind(), "validator_set_updates");
        assert_eq!(NopEventBus.publish(event), Ok(()));
    }
}
