//! Solver error taxonomy.
//!
//! Errors local to one deposit never stop the monitor or other deposits;
//! the variants here carry enough context for the orchestrator to decide
//! between retry, skip, and operator escalation.

use crate::types::DepositId;
use fastfill_chain::{Amount, ChainError, TxHash};
use thiserror::Error;

/// Which leg of a fill a transaction error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillLeg {
    /// Destination-chain payout to the user.
    Payout,
    /// Source-chain claim against the escrow.
    Claim,
}

impl std::fmt::Display for FillLeg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Payout => write!(f, "payout"),
            Self::Claim => write!(f, "claim"),
        }
    }
}

/// Errors produced by the solver engine.
#[derive(Debug, Error)]
pub enum SolverError {
    /// Chain boundary failure. Transient transport errors are retried with
    /// backoff; the monitor loop retries them indefinitely.
    #[error(transparent)]
    Chain(#[from] ChainError),

    /// The profit policy declined the deposit. Local rejection, no chain
    /// interaction.
    #[error("deposit unprofitable: expected profit {expected_profit}")]
    Unprofitable {
        /// Expected profit that failed the policy.
        expected_profit: i128,
    },

    /// No cost estimate could be obtained; the calculator fails closed.
    #[error("cost estimate unavailable")]
    CostUnavailable,

    /// Not enough spendable inventory. Local rejection, no chain
    /// interaction.
    #[error("insufficient inventory: requested {requested}, available {available}")]
    InsufficientInventory {
        /// Amount the reservation needed.
        requested: Amount,
        /// Amount actually available.
        available: Amount,
    },

    /// A fill for this deposit id is already active or already paid out.
    #[error("duplicate deposit {deposit_id}")]
    DuplicateDeposit {
        /// The offending deposit id.
        deposit_id: DepositId,
    },

    /// A leg exhausted its retry budget.
    #[error("{leg} leg failed after {attempts} attempts: {reason}")]
    TransactionFailed {
        /// Which leg failed.
        leg: FillLeg,
        /// Attempts made before giving up.
        attempts: u32,
        /// Last failure reason.
        reason: String,
    },

    /// The payout confirmed but the claim did not: solver capital is
    /// out-of-pocket and external remediation is required.
    #[error("reconciliation required for deposit {deposit_id}: payout {payout_tx_hash} confirmed but claim failed")]
    ReconciliationRequired {
        /// The deposit whose claim failed.
        deposit_id: DepositId,
        /// The confirmed payout transaction.
        payout_tx_hash: TxHash,
    },

    /// Startup validation: spendable inventory below the configured floor.
    #[error("inventory below minimum: available {available}, required {required}")]
    BelowMinimumInventory {
        /// Spendable balance at startup.
        available: Amount,
        /// Configured floor.
        required: Amount,
    },

    /// The solver is not running (already stopped or never started).
    #[error("solver is not running")]
    NotRunning,

    /// `start` was called on a solver that is already running.
    #[error("solver is already running")]
    AlreadyRunning,
}

impl SolverError {
    /// Returns true if this error is a cheap local rejection (no chain
    /// interaction happened and none should be retried).
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Unprofitable { .. }
                | Self::CostUnavailable
                | Self::InsufficientInventory { .. }
                | Self::DuplicateDeposit { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejections_classified() {
        assert!(SolverError::Unprofitable {
            expected_profit: -50_000
        }
        .is_rejection());
        assert!(SolverError::CostUnavailable.is_rejection());
        assert!(SolverError::InsufficientInventory {
            requested: 10,
            available: 5
        }
        .is_rejection());
        assert!(SolverError::DuplicateDeposit {
            deposit_id: DepositId::from("d1")
        }
        .is_rejection());

        assert!(!SolverError::TransactionFailed {
            leg: FillLeg::Payout,
            attempts: 3,
            reason: "reverted".to_string()
        }
        .is_rejection());
        assert!(!SolverError::NotRunning.is_rejection());
    }

    #[test]
    fn test_chain_error_converts() {
        let err: SolverError = ChainError::Transport("down".to_string()).into();
        assert!(matches!(err, SolverError::Chain(_)));
    }

    #[test]
    fn test_display_messages() {
        let err = SolverError::TransactionFailed {
            leg: FillLeg::Claim,
            attempts: 3,
            reason: "reverted".to_string(),
        };
        assert_eq!(err.to_string(), "claim leg failed after 3 attempts: reverted");

        let err = SolverError::ReconciliationRequired {
            deposit_id: DepositId::from("d7"),
            payout_tx_hash: "0xpay".to_string(),
        };
        assert!(err.to_string().contains("d7"));
        assert!(err.to_string().contains("0xpay"));
    }
}
