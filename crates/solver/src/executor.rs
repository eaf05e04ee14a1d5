//! Fill execution: payout leg, then claim leg.
//!
//! The executor drives one accepted deposit through the fill state
//! machine. The payout is the commitment point: before it is submitted
//! the job can abort cleanly (reservation released, deposit retryable),
//! but once the payout confirms the reservation is committed and the job
//! must be driven forward. A claim that exhausts its retry budget after a
//! confirmed payout ends in `ClaimFailed` and lands on the
//! reconciliation queue; the solver never pays the same user twice to
//! paper over a stuck claim.
//!
//! Duplicate suppression is keyed by deposit id. Ids whose previous job
//! never reached the payout (`ReserveFailed`, `PayoutFailed`) may be
//! retried; every other known id is rejected.

use crate::error::{FillLeg, SolverError};
use crate::inventory::{InventoryLedger, Reservation};
use crate::types::{Deposit, DepositId, FillJob, FillState};
use chrono::{DateTime, Utc};
use fastfill_chain::{ChainError, ChainSubmitter, ContractCall, TxHash};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// A fill whose payout confirmed but whose claim did not. Solver capital
/// is out-of-pocket until an operator (or an external sweeper) claims the
/// escrow manually.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationItem {
    /// The deposit the solver paid out for.
    pub deposit: Deposit,

    /// The confirmed payout transaction.
    pub payout_tx_hash: TxHash,

    /// The error that ended the claim leg.
    pub error: String,

    /// When the job was flagged.
    pub flagged_at: DateTime<Utc>,
}

/// Retry and confirmation tunables for one fill leg.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorConfig {
    /// Bound on each confirmation wait.
    pub confirmation_timeout: Duration,

    /// Attempts per leg before giving up.
    pub max_attempts: u32,

    /// Backoff between attempts within a leg.
    pub retry_backoff: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            confirmation_timeout: Duration::from_secs(60),
            max_attempts: 3,
            retry_backoff: Duration::from_secs(2),
        }
    }
}

/// Executes accepted deposits against both chains.
pub struct FillExecutor {
    destination: Arc<dyn ChainSubmitter>,
    source: Arc<dyn ChainSubmitter>,
    ledger: Arc<InventoryLedger>,
    escrow_address: String,
    config: ExecutorConfig,
    jobs: Mutex<HashMap<DepositId, FillState>>,
    reconciliations: Mutex<Vec<ReconciliationItem>>,
}

impl FillExecutor {
    /// Creates an executor.
    ///
    /// `destination` carries the payout leg, `source` the claim leg
    /// against `escrow_address`.
    #[must_use]
    pub fn new(
        destination: Arc<dyn ChainSubmitter>,
        source: Arc<dyn ChainSubmitter>,
        ledger: Arc<InventoryLedger>,
        escrow_address: impl Into<String>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            destination,
            source,
            ledger,
            escrow_address: escrow_address.into(),
            config,
            jobs: Mutex::new(HashMap::new()),
            reconciliations: Mutex::new(Vec::new()),
        }
    }

    /// Drives one deposit to a terminal state.
    ///
    /// Returns the finished job. The terminal state distinguishes the
    /// outcomes: `ClaimConfirmed` (success), `PayoutFailed` (aborted
    /// cleanly, reservation released), `ClaimFailed` (capital at risk,
    /// queued for reconciliation).
    ///
    /// # Errors
    ///
    /// `DuplicateDeposit` if a job for this id is active or already paid
    /// out; `InsufficientInventory` if the reservation is denied. In both
    /// cases nothing was submitted to either chain.
    pub async fn execute(&self, deposit: Deposit) -> Result<FillJob, SolverError> {
        self.admit(&deposit.id)?;
        let mut job = FillJob::new(deposit);

        let reservation = match self.ledger.reserve(job.deposit.min_receive) {
            Ok(r) => r,
            Err(e) => {
                self.record(&job.deposit.id, FillState::ReserveFailed);
                return Err(e);
            }
        };
        job.state = FillState::Reserved;
        job.reserved_amount = reservation.amount();
        self.record(&job.deposit.id, FillState::Reserved);

        match self.payout_leg(&mut job, &reservation).await {
            Ok(()) => {}
            Err(e) => {
                self.ledger.release(&reservation);
                job.state = FillState::PayoutFailed;
                job.last_error = Some(e.to_string());
                self.record(&job.deposit.id, FillState::PayoutFailed);
                warn!(
                    deposit_id = %job.deposit.id,
                    error = %e,
                    "Payout leg failed; reservation released"
                );
                return Ok(job);
            }
        }

        // Payout confirmed: the reservation leaves the ledger for good.
        self.ledger.commit(&reservation);
        job.state = FillState::PayoutConfirmed;
        self.record(&job.deposit.id, FillState::PayoutConfirmed);

        match self.claim_leg(&mut job).await {
            Ok(()) => {
                job.state = FillState::ClaimConfirmed;
                self.record(&job.deposit.id, FillState::ClaimConfirmed);
                info!(
                    deposit_id = %job.deposit.id,
                    payout_tx = job.payout_tx_hash.as_deref().unwrap_or(""),
                    claim_tx = job.claim_tx_hash.as_deref().unwrap_or(""),
                    margin = job.gross_margin(),
                    "Fill complete"
                );
            }
            Err(e) => {
                job.state = FillState::ClaimFailed;
                job.last_error = Some(e.to_string());
                self.record(&job.deposit.id, FillState::ClaimFailed);
                let payout_tx_hash = job.payout_tx_hash.clone().unwrap_or_default();
                error!(
                    deposit_id = %job.deposit.id,
                    payout_tx = %payout_tx_hash,
                    error = %e,
                    "Claim leg failed after confirmed payout; reconciliation required"
                );
                self.reconciliations.lock().push(ReconciliationItem {
                    deposit: job.deposit.clone(),
                    payout_tx_hash,
                    error: e.to_string(),
                    flagged_at: Utc::now(),
                });
            }
        }
        Ok(job)
    }

    /// Returns the fills awaiting external reconciliation.
    #[must_use]
    pub fn pending_reconciliations(&self) -> Vec<ReconciliationItem> {
        self.reconciliations.lock().clone()
    }

    /// Returns the recorded state for a deposit id, if any.
    #[must_use]
    pub fn state_of(&self, deposit_id: &DepositId) -> Option<FillState> {
        self.jobs.lock().get(deposit_id).copied()
    }

    /// Admits a deposit id or rejects it as a duplicate. Pre-payout
    /// failures may retry; anything active or past the payout may not.
    fn admit(&self, deposit_id: &DepositId) -> Result<(), SolverError> {
        let mut jobs = self.jobs.lock();
        match jobs.get(deposit_id) {
            Some(FillState::ReserveFailed | FillState::PayoutFailed) | None => {}
            Some(_) => {
                return Err(SolverError::DuplicateDeposit {
                    deposit_id: deposit_id.clone(),
                });
            }
        }
        jobs.insert(deposit_id.clone(), FillState::Detected);
        Ok(())
    }

    fn record(&self, deposit_id: &DepositId, state: FillState) {
        self.jobs.lock().insert(deposit_id.clone(), state);
    }

    async fn payout_leg(
        &self,
        job: &mut FillJob,
        reservation: &Reservation,
    ) -> Result<(), SolverError> {
        job.state = FillState::PayoutSubmitted;
        let call = ContractCall::transfer(job.deposit.user.clone(), reservation.amount());
        let (tx_hash, attempts) = self
            .run_leg(&self.destination, call, FillLeg::Payout, &job.deposit.id)
            .await?;
        job.payout_tx_hash = Some(tx_hash);
        job.payout_attempts = attempts;
        Ok(())
    }

    async fn claim_leg(&self, job: &mut FillJob) -> Result<(), SolverError> {
        job.state = FillState::ClaimSubmitted;
        let call = ContractCall::claim(self.escrow_address.clone(), job.deposit.id.as_str());
        let (tx_hash, attempts) = self
            .run_leg(&self.source, call, FillLeg::Claim, &job.deposit.id)
            .await?;
        job.claim_tx_hash = Some(tx_hash);
        job.claim_attempts = attempts;
        Ok(())
    }

    /// Submits a call and waits for confirmation, retrying up to the
    /// attempt budget. Returns the confirmed hash and the attempts used.
    async fn run_leg(
        &self,
        chain: &Arc<dyn ChainSubmitter>,
        call: ContractCall,
        leg: FillLeg,
        deposit_id: &DepositId,
    ) -> Result<(TxHash, u32), SolverError> {
        let mut last_error = String::new();
        for attempt in 1..=self.config.max_attempts {
            match self.try_leg_once(chain, call.clone()).await {
                Ok(tx_hash) => return Ok((tx_hash, attempt)),
                Err(e) => {
                    warn!(
                        deposit_id = %deposit_id,
                        leg = %leg,
                        attempt,
                        max_attempts = self.config.max_attempts,
                        error = %e,
                        "Leg attempt failed"
                    );
                    last_error = e.to_string();
                    if attempt < self.config.max_attempts {
                        tokio::time::sleep(self.config.retry_backoff).await;
                    }
                }
            }
        }
        Err(SolverError::TransactionFailed {
            leg,
            attempts: self.config.max_attempts,
            reason: last_error,
        })
    }

    async fn try_leg_once(
        &self,
        chain: &Arc<dyn ChainSubmitter>,
        call: ContractCall,
    ) -> Result<TxHash, ChainError> {
        let tx_hash = chain.submit(call).await?;
        let receipt = chain
            .wait_for_confirmation(&tx_hash, self.config.confirmation_timeout)
            .await?;
        if !receipt.success {
            return Err(ChainError::TransactionFailed {
                tx_hash,
                reason: "reverted".to_string(),
            });
        }
        Ok(receipt.tx_hash)
    }
}
