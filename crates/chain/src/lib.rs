//! Chain read/write boundary for the fastfill solver.
//!
//! The solver engine never talks to an RPC endpoint directly. Everything it
//! needs from either chain goes through two traits:
//!
//! - [`ChainReader`]: current height, decoded deposit logs, balances.
//! - [`ChainSubmitter`]: transaction submission and confirmation waits.
//!
//! Concrete implementations (JSON-RPC transports, wallet signing, ABI
//! encoding of the escrow contract) live behind these traits and are out of
//! scope for the engine. [`paper::PaperChain`] provides a deterministic
//! in-memory implementation of both traits for tests and dry runs.

pub mod paper;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Chain base units. Large enough for any realistic token amount.
pub type Amount = u128;

/// Monotonic block height.
pub type BlockNumber = u64;

/// Transaction hash, hex-encoded by the transport.
pub type TxHash = String;

// =============================================================================
// Errors
// =============================================================================

/// Errors surfaced by the chain boundary.
#[derive(Debug, Clone, Error)]
pub enum ChainError {
    /// RPC or network failure. Transient: callers retry with backoff.
    #[error("chain transport error: {0}")]
    Transport(String),

    /// Transaction was submitted but rejected or reverted.
    #[error("transaction {tx_hash} failed: {reason}")]
    TransactionFailed {
        /// Hash of the failed transaction.
        tx_hash: TxHash,
        /// Failure reason reported by the chain.
        reason: String,
    },

    /// Confirmation did not arrive within the bounded wait.
    #[error("confirmation timeout for {tx_hash} after {waited:?}")]
    ConfirmationTimeout {
        /// Hash of the unconfirmed transaction.
        tx_hash: TxHash,
        /// How long the caller waited.
        waited: Duration,
    },
}

impl ChainError {
    /// Returns true for failures that warrant indefinite retry (network
    /// blips) rather than counting against a bounded attempt budget.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

// =============================================================================
// Read side
// =============================================================================

/// A decoded deposit event observed on the source chain.
///
/// Decoding the raw log into these fields is the transport's job; the
/// solver only sees the typed record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositLog {
    /// Opaque unique identifier assigned by the escrow contract.
    pub deposit_id: String,

    /// Destination-chain identity to pay out to.
    pub user: String,

    /// Locked amount on the source chain.
    pub amount: Amount,

    /// Floor the user must receive on the destination chain.
    pub min_receive: Amount,

    /// Maximum the solver may retain as its fee.
    pub fee_cap: Amount,

    /// Block the event was observed in.
    pub block_number: BlockNumber,

    /// Source-chain transaction that created the deposit.
    pub tx_hash: TxHash,
}

/// Read-only access to one chain.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Returns the current chain height.
    async fn current_height(&self) -> Result<BlockNumber, ChainError>;

    /// Returns all deposit logs in the inclusive block range, in ascending
    /// block order.
    async fn deposit_logs(
        &self,
        from: BlockNumber,
        to: BlockNumber,
    ) -> Result<Vec<DepositLog>, ChainError>;

    /// Returns the spendable balance of an address.
    async fn balance_of(&self, address: &str) -> Result<Amount, ChainError>;
}

// =============================================================================
// Write side
// =============================================================================

/// A transaction to submit: target, calldata, native value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractCall {
    /// Address the transaction is sent to.
    pub target: String,

    /// Calldata. Empty for a plain value transfer.
    pub payload: Vec<u8>,

    /// Native value attached to the call.
    pub value: Amount,
}

impl ContractCall {
    /// A plain value transfer to `user` (the payout leg).
    #[must_use]
    pub fn transfer(user: impl Into<String>, amount: Amount) -> Self {
        Self {
            target: user.into(),
            payload: Vec::new(),
            value: amount,
        }
    }

    /// An escrow claim referencing `deposit_id` (the claim leg). The actual
    /// ABI encoding happens in the transport; the identifier bytes are
    /// enough for it to build the call.
    #[must_use]
    pub fn claim(escrow: impl Into<String>, deposit_id: &str) -> Self {
        Self {
            target: escrow.into(),
            payload: deposit_id.as_bytes().to_vec(),
            value: 0,
        }
    }

    /// Returns true if this call is a plain value transfer.
    #[must_use]
    pub fn is_transfer(&self) -> bool {
        self.payload.is_empty() && self.value > 0
    }
}

/// Receipt for a confirmed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    /// Hash of the confirmed transaction.
    pub tx_hash: TxHash,

    /// Block the transaction was included in.
    pub block_number: BlockNumber,

    /// Whether the transaction succeeded on-chain.
    pub success: bool,
}

/// Write access to one chain: submit, then await inclusion.
#[async_trait]
pub trait ChainSubmitter: Send + Sync {
    /// Submits a transaction and returns its hash.
    async fn submit(&self, call: ContractCall) -> Result<TxHash, ChainError>;

    /// Waits for a submitted transaction to confirm, bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// `TransactionFailed` if the transaction reverted,
    /// `ConfirmationTimeout` if the bound elapsed first.
    async fn wait_for_confirmation(
        &self,
        tx_hash: &str,
        timeout: Duration,
    ) -> Result<TxReceipt, ChainError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_error_transient() {
        assert!(ChainError::Transport("connection reset".to_string()).is_transient());
        assert!(!ChainError::TransactionFailed {
            tx_hash: "0xabc".to_string(),
            reason: "reverted".to_string(),
        }
        .is_transient());
        assert!(!ChainError::ConfirmationTimeout {
            tx_hash: "0xabc".to_string(),
            waited: Duration::from_secs(30),
        }
        .is_transient());
    }

    #[test]
    fn test_contract_call_transfer() {
        let call = ContractCall::transfer("0xuser", 9_800_000);

        assert_eq!(call.target, "0xuser");
        assert!(call.payload.is_empty());
        assert_eq!(call.value, 9_800_000);
        assert!(call.is_transfer());
    }

    #[test]
    fn test_contract_call_claim() {
        let call = ContractCall::claim("0xescrow", "deposit-1");

        assert_eq!(call.target, "0xescrow");
        assert_eq!(call.payload, b"deposit-1");
        assert_eq!(call.value, 0);
        assert!(!call.is_transfer());
    }

    #[test]
    fn test_chain_error_display() {
        let err = ChainError::TransactionFailed {
            tx_hash: "0xdead".to_string(),
            reason: "out of gas".to_string(),
        };
        assert_eq!(err.to_string(), "transaction 0xdead failed: out of gas");
    }
}
