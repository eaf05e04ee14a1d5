//! Core types for the fast-fill pipeline.
//!
//! This module defines the deposit as observed on the source chain, the
//! fill job state machine, and the events the solver publishes to
//! observers.

use chrono::{DateTime, Utc};
use fastfill_chain::{Amount, BlockNumber, DepositLog, TxHash};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Deposit Identity
// =============================================================================

/// Opaque unique identifier for a deposit, assigned by the escrow contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DepositId(String);

impl DepositId {
    /// Creates a deposit id from its contract representation.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DepositId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DepositId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// =============================================================================
// Deposit
// =============================================================================

/// A deposit event observed on the source chain. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    /// Unique identifier.
    pub id: DepositId,

    /// Destination-chain identity to pay.
    pub user: String,

    /// Locked amount on the source chain.
    pub amount: Amount,

    /// Floor the user must receive on the destination chain.
    pub min_receive: Amount,

    /// Maximum the solver may retain.
    pub fee_cap: Amount,

    /// Block the deposit was observed in (ordering key).
    pub source_block: BlockNumber,

    /// Source-chain transaction that created the deposit.
    pub source_tx_hash: TxHash,
}

impl Deposit {
    /// Builds a deposit from a decoded log, rejecting records that violate
    /// `min_receive + fee_cap <= amount`.
    ///
    /// # Errors
    ///
    /// Returns the malformed log back to the caller for logging.
    pub fn from_log(log: DepositLog) -> Result<Self, DepositLog> {
        let budget = log.min_receive.checked_add(log.fee_cap);
        match budget {
            Some(b) if b <= log.amount => Ok(Self {
                id: DepositId::new(log.deposit_id),
                user: log.user,
                amount: log.amount,
                min_receive: log.min_receive,
                fee_cap: log.fee_cap,
                source_block: log.block_number,
                source_tx_hash: log.tx_hash,
            }),
            _ => Err(log),
        }
    }
}

// =============================================================================
// Fill State Machine
// =============================================================================

/// State of a fill job. The happy path runs top to bottom; the failure
/// states are terminal exits reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FillState {
    /// Deposit observed, no resources committed yet.
    Detected,
    /// Inventory reserved for the payout.
    Reserved,
    /// Destination payout submitted, awaiting confirmation. From here the
    /// job must be driven to a terminal state.
    PayoutSubmitted,
    /// Destination payout confirmed; reservation committed.
    PayoutConfirmed,
    /// Source-chain claim submitted, awaiting confirmation.
    ClaimSubmitted,
    /// Claim confirmed. Terminal success.
    ClaimConfirmed,
    /// Reservation was denied. Terminal; no chain interaction happened.
    ReserveFailed,
    /// Payout exhausted its retries. Terminal; reservation released.
    PayoutFailed,
    /// Claim exhausted its retries after the payout confirmed. Terminal;
    /// solver capital is out-of-pocket and the job needs reconciliation.
    ClaimFailed,
}

impl FillState {
    /// Returns true for terminal states.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::ClaimConfirmed | Self::ReserveFailed | Self::PayoutFailed | Self::ClaimFailed
        )
    }

    /// Returns true for the successful terminal state.
    #[must_use]
    pub fn is_success(self) -> bool {
        self == Self::ClaimConfirmed
    }

    /// Returns true when the state leaves solver capital unrecovered.
    #[must_use]
    pub fn needs_reconciliation(self) -> bool {
        self == Self::ClaimFailed
    }

    /// Returns the display string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Detected => "detected",
            Self::Reserved => "reserved",
            Self::PayoutSubmitted => "payout_submitted",
            Self::PayoutConfirmed => "payout_confirmed",
            Self::ClaimSubmitted => "claim_submitted",
            Self::ClaimConfirmed => "claim_confirmed",
            Self::ReserveFailed => "reserve_failed",
            Self::PayoutFailed => "payout_failed",
            Self::ClaimFailed => "claim_failed",
        }
    }
}

impl std::fmt::Display for FillState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Fill Job
// =============================================================================

/// The solver's unit of work for one deposit. Owned by the executor for
/// its lifetime; observers only ever see clones or terminal results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FillJob {
    /// Unique job identifier.
    pub id: Uuid,

    /// The deposit being filled.
    pub deposit: Deposit,

    /// Current state.
    pub state: FillState,

    /// Destination inventory held against this job.
    pub reserved_amount: Amount,

    /// Destination payout transaction (once submitted).
    pub payout_tx_hash: Option<TxHash>,

    /// Source claim transaction (once submitted).
    pub claim_tx_hash: Option<TxHash>,

    /// Payout submission attempts made.
    pub payout_attempts: u32,

    /// Claim submission attempts made.
    pub claim_attempts: u32,

    /// When the job was created.
    pub created_at: DateTime<Utc>,

    /// Last error observed on this job.
    pub last_error: Option<String>,
}

impl FillJob {
    /// Creates a fresh job in the `Detected` state.
    #[must_use]
    pub fn new(deposit: Deposit) -> Self {
        Self {
            id: Uuid::new_v4(),
            deposit,
            state: FillState::Detected,
            reserved_amount: 0,
            payout_tx_hash: None,
            claim_tx_hash: None,
            payout_attempts: 0,
            claim_attempts: 0,
            created_at: Utc::now(),
            last_error: None,
        }
    }

    /// Expected solver margin once the claim lands: the fee retained after
    /// fronting `min_receive` out of the reclaimed `amount`.
    #[must_use]
    pub fn gross_margin(&self) -> Amount {
        self.deposit.amount.saturating_sub(self.deposit.min_receive)
    }
}

// =============================================================================
// Rejection Reasons
// =============================================================================

/// Why a deposit was dropped before (or instead of) execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// The profit policy declined the deposit.
    Unprofitable {
        /// Expected profit that failed the policy (may be negative).
        expected_profit: i128,
    },
    /// No cost estimate could be obtained; the calculator fails closed.
    CostUnavailable,
    /// Not enough spendable inventory for the payout.
    InsufficientInventory {
        /// Amount the fill needed.
        requested: Amount,
        /// Amount actually available.
        available: Amount,
    },
    /// A job for this deposit id already exists or already paid out.
    DuplicateDeposit,
    /// The solver is shutting down and not accepting new work.
    ShuttingDown,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unprofitable { expected_profit } => {
                write!(f, "unprofitable (expected profit {expected_profit})")
            }
            Self::CostUnavailable => write!(f, "cost estimate unavailable"),
            Self::InsufficientInventory {
                requested,
                available,
            } => write!(
                f,
                "insufficient inventory (requested {requested}, available {available})"
            ),
            Self::DuplicateDeposit => write!(f, "duplicate deposit"),
            Self::ShuttingDown => write!(f, "shutting down"),
        }
    }
}

// =============================================================================
// Solver Events
// =============================================================================

/// Events published by the orchestrator for logging and metrics observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SolverEvent {
    /// A deposit was observed on the source chain.
    DepositDetected {
        /// The deposit id.
        deposit_id: DepositId,
        /// Block it was observed in.
        source_block: BlockNumber,
    },

    /// A deposit passed the profit gate and entered execution.
    FillAccepted {
        /// The deposit id.
        deposit_id: DepositId,
        /// Profit expected at acceptance time.
        expected_profit: i128,
    },

    /// A deposit was rejected before execution.
    FillRejected {
        /// The deposit id.
        deposit_id: DepositId,
        /// Why it was rejected.
        reason: RejectReason,
    },

    /// The destination payout confirmed on-chain.
    PayoutConfirmed {
        /// The deposit id.
        deposit_id: DepositId,
        /// Payout transaction hash.
        tx_hash: TxHash,
    },

    /// The source-chain claim confirmed on-chain.
    ClaimConfirmed {
        /// The deposit id.
        deposit_id: DepositId,
        /// Claim transaction hash.
        tx_hash: TxHash,
    },

    /// A fill job reached a terminal failure state.
    JobFailed {
        /// The deposit id.
        deposit_id: DepositId,
        /// Terminal state reached.
        state: FillState,
        /// The error that ended the job.
        error: String,
    },

    /// Payout succeeded but the claim did not: capital is at risk and
    /// operator attention is required.
    ReconciliationRequired {
        /// The deposit id.
        deposit_id: DepositId,
        /// The confirmed payout the solver is out-of-pocket for.
        payout_tx_hash: TxHash,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_log() -> DepositLog {
        DepositLog {
            deposit_id: "d1".to_string(),
            user: "0xuser".to_string(),
            amount: 10_000_000,
            min_receive: 9_800_000,
            fee_cap: 200_000,
            block_number: 42,
            tx_hash: "0xdeposit".to_string(),
        }
    }

    // ==================== Deposit Tests ====================

    #[test]
    fn test_deposit_from_valid_log() {
        let deposit = Deposit::from_log(sample_log()).unwrap();

        assert_eq!(deposit.id.as_str(), "d1");
        assert_eq!(deposit.amount, 10_000_000);
        assert_eq!(deposit.min_receive, 9_800_000);
        assert_eq!(deposit.fee_cap, 200_000);
        assert_eq!(deposit.source_block, 42);
    }

    #[test]
    fn test_deposit_rejects_overcommitted_log() {
        let mut log = sample_log();
        log.fee_cap = 300_000; // min_receive + fee_cap > amount

        assert!(Deposit::from_log(log).is_err());
    }

    #[test]
    fn test_deposit_accepts_exact_budget() {
        let mut log = sample_log();
        log.fee_cap = 200_000; // min_receive + fee_cap == amount

        assert!(Deposit::from_log(log).is_ok());
    }

    #[test]
    fn test_deposit_rejects_budget_overflow() {
        let mut log = sample_log();
        log.min_receive = Amount::MAX;
        log.fee_cap = 1;

        assert!(Deposit::from_log(log).is_err());
    }

    // ==================== FillState Tests ====================

    #[test]
    fn test_fill_state_terminal() {
        assert!(FillState::ClaimConfirmed.is_terminal());
        assert!(FillState::ReserveFailed.is_terminal());
        assert!(FillState::PayoutFailed.is_terminal());
        assert!(FillState::ClaimFailed.is_terminal());
        assert!(!FillState::Detected.is_terminal());
        assert!(!FillState::PayoutSubmitted.is_terminal());
        assert!(!FillState::PayoutConfirmed.is_terminal());
    }

    #[test]
    fn test_fill_state_success() {
        assert!(FillState::ClaimConfirmed.is_success());
        assert!(!FillState::ClaimFailed.is_success());
        assert!(!FillState::PayoutConfirmed.is_success());
    }

    #[test]
    fn test_fill_state_reconciliation() {
        assert!(FillState::ClaimFailed.needs_reconciliation());
        assert!(!FillState::PayoutFailed.needs_reconciliation());
        assert!(!FillState::ClaimConfirmed.needs_reconciliation());
    }

    #[test]
    fn test_fill_state_display() {
        assert_eq!(format!("{}", FillState::PayoutConfirmed), "payout_confirmed");
        assert_eq!(format!("{}", FillState::ClaimFailed), "claim_failed");
    }

    // ==================== FillJob Tests ====================

    #[test]
    fn test_fill_job_starts_detected() {
        let deposit = Deposit::from_log(sample_log()).unwrap();
        let job = FillJob::new(deposit);

        assert_eq!(job.state, FillState::Detected);
        assert_eq!(job.reserved_amount, 0);
        assert_eq!(job.payout_attempts, 0);
        assert!(job.payout_tx_hash.is_none());
        assert!(job.last_error.is_none());
    }

    #[test]
    fn test_fill_job_gross_margin() {
        let deposit = Deposit::from_log(sample_log()).unwrap();
        let job = FillJob::new(deposit);

        assert_eq!(job.gross_margin(), 200_000);
    }

    // ==================== RejectReason Tests ====================

    #[test]
    fn test_reject_reason_display() {
        let reason = RejectReason::InsufficientInventory {
            requested: 4_000_000,
            available: 1_000_000,
        };
        assert_eq!(
            reason.to_string(),
            "insufficient inventory (requested 4000000, available 1000000)"
        );

        let reason = RejectReason::Unprofitable {
            expected_profit: -50_000,
        };
        assert_eq!(reason.to_string(), "unprofitable (expected profit -50000)");
    }

    // ==================== Serialization Tests ====================

    #[test]
    fn test_deposit_serialization() {
        let deposit = Deposit::from_log(sample_log()).unwrap();
        let json = serde_json::to_string(&deposit).unwrap();
        let back: Deposit = serde_json::from_str(&json).unwrap();
        assert_eq!(deposit, back);
    }

    #[test]
    fn test_event_serialization() {
        let event = SolverEvent::FillRejected {
            deposit_id: DepositId::from("d1"),
            reason: RejectReason::CostUnavailable,
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: SolverEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, SolverEvent::FillRejected { .. }));
    }
}
