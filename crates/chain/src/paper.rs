//! Deterministic in-memory chain for tests and dry runs.
//!
//! `PaperChain` implements both [`ChainReader`] and [`ChainSubmitter`]
//! against scriptable state: tests advance the height, queue deposit logs,
//! set balances, and inject failure windows (transport errors, reverts,
//! confirmation timeouts) to exercise the solver's retry and
//! partial-failure paths without a node.

use crate::{
    Amount, BlockNumber, ChainError, ChainReader, ChainSubmitter, ContractCall, DepositLog,
    TxHash, TxReceipt,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// A call recorded by [`PaperChain::submit`].
#[derive(Debug, Clone)]
pub struct SubmittedCall {
    /// Hash assigned to the submission.
    pub tx_hash: TxHash,
    /// The submitted call.
    pub call: ContractCall,
}

#[derive(Debug, Default)]
struct PaperState {
    height: BlockNumber,
    logs: BTreeMap<BlockNumber, Vec<DepositLog>>,
    balances: HashMap<String, Amount>,
    read_failures: u32,
    submit_failures: u32,
    confirm_failures: u32,
    confirm_timeouts: u32,
    next_tx: u64,
    submitted: Vec<SubmittedCall>,
}

/// In-memory chain with scriptable behavior.
#[derive(Debug, Default)]
pub struct PaperChain {
    inner: Mutex<PaperState>,
}

impl PaperChain {
    /// Creates a paper chain at height zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a paper chain at the given height.
    #[must_use]
    pub fn at_height(height: BlockNumber) -> Self {
        let chain = Self::new();
        chain.inner.lock().height = height;
        chain
    }

    /// Advances the chain by `blocks` empty blocks.
    pub fn advance(&self, blocks: BlockNumber) {
        self.inner.lock().height += blocks;
    }

    /// Returns the current height.
    #[must_use]
    pub fn height(&self) -> BlockNumber {
        self.inner.lock().height
    }

    /// Appends a deposit log in a new block and advances the height to it.
    ///
    /// The log's `block_number` is overwritten with the new height so tests
    /// don't have to track it themselves.
    pub fn append_deposit(&self, mut log: DepositLog) {
        let mut state = self.inner.lock();
        state.height += 1;
        log.block_number = state.height;
        let height = state.height;
        state.logs.entry(height).or_default().push(log);
    }

    /// Sets the balance of an address.
    pub fn set_balance(&self, address: impl Into<String>, amount: Amount) {
        self.inner.lock().balances.insert(address.into(), amount);
    }

    /// Fails the next `n` read calls with a transport error.
    pub fn fail_next_reads(&self, n: u32) {
        self.inner.lock().read_failures = n;
    }

    /// Fails the next `n` submissions with a transport error.
    pub fn fail_next_submissions(&self, n: u32) {
        self.inner.lock().submit_failures = n;
    }

    /// Fails the next `n` confirmation waits with a revert.
    pub fn fail_next_confirmations(&self, n: u32) {
        self.inner.lock().confirm_failures = n;
    }

    /// Times out the next `n` confirmation waits.
    pub fn timeout_next_confirmations(&self, n: u32) {
        self.inner.lock().confirm_timeouts = n;
    }

    /// Returns every call submitted so far.
    #[must_use]
    pub fn submitted(&self) -> Vec<SubmittedCall> {
        self.inner.lock().submitted.clone()
    }

    /// Returns the number of submitted calls.
    #[must_use]
    pub fn submitted_count(&self) -> usize {
        self.inner.lock().submitted.len()
    }
}

#[async_trait]
impl ChainReader for PaperChain {
    async fn current_height(&self) -> Result<BlockNumber, ChainError> {
        let mut state = self.inner.lock();
        if state.read_failures > 0 {
            state.read_failures -= 1;
            return Err(ChainError::Transport("paper: scripted read failure".to_string()));
        }
        Ok(state.height)
    }

    async fn deposit_logs(
        &self,
        from: BlockNumber,
        to: BlockNumber,
    ) -> Result<Vec<DepositLog>, ChainError> {
        let mut state = self.inner.lock();
        if state.read_failures > 0 {
            state.read_failures -= 1;
            return Err(ChainError::Transport("paper: scripted read failure".to_string()));
        }
        Ok(state
            .logs
            .range(from..=to)
            .flat_map(|(_, logs)| logs.iter().cloned())
            .collect())
    }

    async fn balance_of(&self, address: &str) -> Result<Amount, ChainError> {
        let mut state = self.inner.lock();
        if state.read_failures > 0 {
            state.read_failures -= 1;
            return Err(ChainError::Transport("paper: scripted read failure".to_string()));
        }
        Ok(state.balances.get(address).copied().unwrap_or(0))
    }
}

#[async_trait]
impl ChainSubmitter for PaperChain {
    async fn submit(&self, call: ContractCall) -> Result<TxHash, ChainError> {
        let mut state = self.inner.lock();
        if state.submit_failures > 0 {
            state.submit_failures -= 1;
            return Err(ChainError::Transport(
                "paper: scripted submit failure".to_string(),
            ));
        }
        state.next_tx += 1;
        let tx_hash = format!("0xtx{:08x}", state.next_tx);
        state.submitted.push(SubmittedCall {
            tx_hash: tx_hash.clone(),
            call,
        });
        Ok(tx_hash)
    }

    async fn wait_for_confirmation(
        &self,
        tx_hash: &str,
        timeout: Duration,
    ) -> Result<TxReceipt, ChainError> {
        let mut state = self.inner.lock();
        if state.confirm_timeouts > 0 {
            state.confirm_timeouts -= 1;
            return Err(ChainError::ConfirmationTimeout {
                tx_hash: tx_hash.to_string(),
                waited: timeout,
            });
        }
        if state.confirm_failures > 0 {
            state.confirm_failures -= 1;
            return Err(ChainError::TransactionFailed {
                tx_hash: tx_hash.to_string(),
                reason: "paper: scripted revert".to_string(),
            });
        }
        state.height += 1;
        Ok(TxReceipt {
            tx_hash: tx_hash.to_string(),
            block_number: state.height,
            success: true,
        })
    }
}
