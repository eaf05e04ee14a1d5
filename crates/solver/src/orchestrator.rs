//! Solver orchestration.
//!
//! [`Solver`] wires the monitor, profit gate, inventory ledger, and fill
//! executor together and owns their task lifecycles. Deposits flow from
//! the monitor over a bounded channel into a sequential routing loop;
//! accepted deposits fan out into concurrent fill tasks gated by a
//! semaphore. `stop` is cooperative: no new deposits are accepted, and
//! fills past the payout commitment point run to their terminal state
//! before shutdown completes.

use crate::config::SolverConfig;
use crate::error::SolverError;
use crate::executor::{ExecutorConfig, FillExecutor, ReconciliationItem};
use crate::inventory::{InventoryLedger, LedgerSnapshot};
use crate::monitor::{CheckpointStore, DepositMonitor, MemoryCheckpoint};
use crate::profit::{GasOracle, MarginPolicy, ProfitPolicy};
use crate::types::{Deposit, FillState, RejectReason, SolverEvent};
use chrono::{DateTime, Utc};
use fastfill_chain::{Amount, ChainReader, ChainSubmitter};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{info, warn};

// =============================================================================
// Chain Handles
// =============================================================================

/// The four chain endpoints the solver needs: read and write access to
/// the source chain (deposits in, claims out) and to the destination
/// chain (balance in, payouts out).
#[derive(Clone)]
pub struct ChainHandles {
    /// Source-chain reads: height, deposit logs.
    pub source_reader: Arc<dyn ChainReader>,

    /// Source-chain writes: escrow claims.
    pub source_submitter: Arc<dyn ChainSubmitter>,

    /// Destination-chain reads: solver balance.
    pub destination_reader: Arc<dyn ChainReader>,

    /// Destination-chain writes: user payouts.
    pub destination_submitter: Arc<dyn ChainSubmitter>,
}

impl ChainHandles {
    /// Builds handles from one implementation per chain. Useful when a
    /// single transport serves both the read and write side, as
    /// [`fastfill_chain::paper::PaperChain`] does.
    #[must_use]
    pub fn from_chains<S, D>(source: Arc<S>, destination: Arc<D>) -> Self
    where
        S: ChainReader + ChainSubmitter + 'static,
        D: ChainReader + ChainSubmitter + 'static,
    {
        Self {
            source_reader: Arc::clone(&source) as Arc<dyn ChainReader>,
            source_submitter: source as Arc<dyn ChainSubmitter>,
            destination_reader: Arc::clone(&destination) as Arc<dyn ChainReader>,
            destination_submitter: destination as Arc<dyn ChainSubmitter>,
        }
    }
}

// =============================================================================
// Stats
// =============================================================================

/// Cumulative counters for one solver run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SolverStats {
    /// Deposits received from the monitor.
    pub deposits_seen: u64,

    /// Deposits that passed the profit gate.
    pub fills_accepted: u64,

    /// Deposits rejected before execution.
    pub fills_rejected: u64,

    /// Fills that reached `ClaimConfirmed`.
    pub fills_completed: u64,

    /// Fills that ended in a failure state.
    pub fills_failed: u64,

    /// Fills flagged for reconciliation (subset of `fills_failed`).
    pub reconciliations: u64,

    /// Total deposit volume across completed fills.
    pub total_volume: Amount,

    /// Total margin earned across completed fills.
    pub total_profit: Amount,

    /// When the current run started.
    pub started_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Solver
// =============================================================================

struct RunningTasks {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// The fast-fill solver engine.
pub struct Solver {
    config: SolverConfig,
    handles: ChainHandles,
    gas_oracle: Arc<dyn GasOracle>,
    policy: Arc<dyn ProfitPolicy>,
    checkpoint: Arc<dyn CheckpointStore>,
    ledger: Arc<InventoryLedger>,
    executor: Arc<FillExecutor>,
    events: broadcast::Sender<SolverEvent>,
    stats: Arc<RwLock<SolverStats>>,
    running: Mutex<Option<RunningTasks>>,
}

impl Solver {
    /// Creates a solver. The profit policy defaults to a [`MarginPolicy`]
    /// built from the config floors and the checkpoint to an in-memory
    /// store; override them with the `with_*` methods before `start`.
    #[must_use]
    pub fn new(config: SolverConfig, handles: ChainHandles, gas_oracle: Arc<dyn GasOracle>) -> Self {
        let ledger = Arc::new(InventoryLedger::new());
        let executor = Arc::new(FillExecutor::new(
            Arc::clone(&handles.destination_submitter),
            Arc::clone(&handles.source_submitter),
            Arc::clone(&ledger),
            config.escrow_address.clone(),
            ExecutorConfig {
                confirmation_timeout: config.confirmation_timeout,
                max_attempts: config.max_attempts,
                retry_backoff: config.retry_backoff,
            },
        ));
        let (events, _) = broadcast::channel(256);
        let policy = Arc::new(MarginPolicy::new(config.min_profit, config.min_margin_bps));

        Self {
            config,
            handles,
            gas_oracle,
            policy,
            checkpoint: Arc::new(MemoryCheckpoint::new()),
            ledger,
            executor,
            events,
            stats: Arc::new(RwLock::new(SolverStats::default())),
            running: Mutex::new(None),
        }
    }

    /// Replaces the default in-memory checkpoint.
    #[must_use]
    pub fn with_checkpoint(mut self, checkpoint: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoint = checkpoint;
        self
    }

    /// Replaces the default margin policy.
    #[must_use]
    pub fn with_policy(mut self, policy: Arc<dyn ProfitPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Starts the solver: refreshes inventory, validates the startup
    /// floor, then spawns the monitor, routing loop, and balance refresh
    /// tasks.
    ///
    /// # Errors
    ///
    /// `AlreadyRunning` if already started; `Chain` if the initial balance
    /// read fails; `BelowMinimumInventory` if spendable inventory is under
    /// the configured floor.
    pub async fn start(&self) -> Result<(), SolverError> {
        if self.running.lock().is_some() {
            return Err(SolverError::AlreadyRunning);
        }

        let balance = self
            .handles
            .destination_reader
            .balance_of(&self.config.solver_address)
            .await?;
        self.ledger.refresh(balance);

        let available = self.ledger.available();
        if available < self.config.min_inventory {
            return Err(SolverError::BelowMinimumInventory {
                available,
                required: self.config.min_inventory,
            });
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (deposit_tx, deposit_rx) = mpsc::channel(self.config.channel_capacity);

        let monitor = DepositMonitor::new(
            Arc::clone(&self.handles.source_reader),
            Arc::clone(&self.checkpoint),
            deposit_tx,
            self.config.poll_interval,
            self.config.error_backoff,
            shutdown_rx.clone(),
        );
        let monitor_handle = tokio::spawn(monitor.run());

        let router = Router {
            executor: Arc::clone(&self.executor),
            gas_oracle: Arc::clone(&self.gas_oracle),
            policy: Arc::clone(&self.policy),
            events: self.events.clone(),
            stats: Arc::clone(&self.stats),
            fill_permits: Arc::new(Semaphore::new(self.config.max_concurrent_fills)),
            max_concurrent_fills: self.config.max_concurrent_fills,
        };
        let router_handle = tokio::spawn(router.run(deposit_rx, shutdown_rx.clone()));

        let refresh_handle = tokio::spawn(balance_refresh_loop(
            Arc::clone(&self.handles.destination_reader),
            Arc::clone(&self.ledger),
            self.config.solver_address.clone(),
            self.config.balance_refresh_interval,
            shutdown_rx,
        ));

        self.stats.write().started_at = Some(Utc::now());
        *self.running.lock() = Some(RunningTasks {
            shutdown: shutdown_tx,
            handles: vec![monitor_handle, router_handle, refresh_handle],
        });

        info!(
            available,
            min_inventory = self.config.min_inventory,
            max_concurrent_fills = self.config.max_concurrent_fills,
            "Solver started"
        );
        Ok(())
    }

    /// Stops the solver. New deposits are rejected immediately; fills
    /// already in flight run to a terminal state before this returns.
    ///
    /// # Errors
    ///
    /// `NotRunning` if the solver was never started or already stopped.
    pub async fn stop(&self) -> Result<(), SolverError> {
        let tasks = self.running.lock().take().ok_or(SolverError::NotRunning)?;

        // Receivers may already be gone if every task exited on its own.
        let _ = tasks.shutdown.send(true);
        for handle in tasks.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Solver task panicked during shutdown");
            }
        }
        info!("Solver stopped");
        Ok(())
    }

    /// Returns true while the background tasks are up.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    /// Subscribes to solver events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SolverEvent> {
        self.events.subscribe()
    }

    /// Returns a copy of the cumulative run counters.
    #[must_use]
    pub fn stats(&self) -> SolverStats {
        self.stats.read().clone()
    }

    /// Returns a point-in-time view of the inventory ledger.
    #[must_use]
    pub fn inventory(&self) -> LedgerSnapshot {
        self.ledger.snapshot()
    }

    /// Returns the fills awaiting external reconciliation.
    #[must_use]
    pub fn pending_reconciliations(&self) -> Vec<ReconciliationItem> {
        self.executor.pending_reconciliations()
    }
}

// =============================================================================
// Routing Loop
// =============================================================================

/// Shared context for the deposit routing loop and the fill tasks it
/// spawns.
struct Router {
    executor: Arc<FillExecutor>,
    gas_oracle: Arc<dyn GasOracle>,
    policy: Arc<dyn ProfitPolicy>,
    events: broadcast::Sender<SolverEvent>,
    stats: Arc<RwLock<SolverStats>>,
    fill_permits: Arc<Semaphore>,
    max_concurrent_fills: usize,
}

impl Router {
    async fn run(self, mut rx: mpsc::Receiver<Deposit>, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(deposit) => self.route(deposit).await,
                    None => break,
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        // Deposits still queued at shutdown are rejected, not silently
        // dropped.
        while let Ok(deposit) = rx.try_recv() {
            self.emit(SolverEvent::FillRejected {
                deposit_id: deposit.id,
                reason: RejectReason::ShuttingDown,
            });
            self.stats.write().fills_rejected += 1;
        }

        // Wait for in-flight fills to reach a terminal state.
        let _ = self
            .fill_permits
            .acquire_many(self.max_concurrent_fills as u32)
            .await;
    }

    /// Evaluates one deposit and, if accepted, hands it to a fill task.
    async fn route(&self, deposit: Deposit) {
        self.stats.write().deposits_seen += 1;
        self.emit(SolverEvent::DepositDetected {
            deposit_id: deposit.id.clone(),
            source_block: deposit.source_block,
        });

        let cost = match self.gas_oracle.estimate().await {
            Ok(cost) => Some(cost),
            Err(e) => {
                warn!(deposit_id = %deposit.id, error = %e, "Gas estimate failed");
                None
            }
        };
        let decision = self.policy.evaluate(&deposit, cost.as_ref());
        if !decision.accepted {
            let reason = if cost.is_none() {
                RejectReason::CostUnavailable
            } else {
                RejectReason::Unprofitable {
                    expected_profit: decision.expected_profit,
                }
            };
            info!(deposit_id = %deposit.id, reason = %reason, "Deposit rejected");
            self.emit(SolverEvent::FillRejected {
                deposit_id: deposit.id,
                reason,
            });
            self.stats.write().fills_rejected += 1;
            return;
        }

        self.emit(SolverEvent::FillAccepted {
            deposit_id: deposit.id.clone(),
            expected_profit: decision.expected_profit,
        });
        self.stats.write().fills_accepted += 1;

        let Ok(permit) = Arc::clone(&self.fill_permits).acquire_owned().await else {
            return;
        };
        let executor = Arc::clone(&self.executor);
        let events = self.events.clone();
        let stats = Arc::clone(&self.stats);
        tokio::spawn(async move {
            let deposit_id = deposit.id.clone();
            let outcome = executor.execute(deposit).await;
            finish_fill(deposit_id, outcome, &events, &stats);
            drop(permit);
        });
    }

    fn emit(&self, event: SolverEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Publishes terminal events and updates counters for one finished fill.
fn finish_fill(
    deposit_id: crate::types::DepositId,
    outcome: Result<crate::types::FillJob, SolverError>,
    events: &broadcast::Sender<SolverEvent>,
    stats: &Arc<RwLock<SolverStats>>,
) {
    match outcome {
        Ok(job) => {
            if let Some(tx_hash) = &job.payout_tx_hash {
                if matches!(job.state, FillState::ClaimConfirmed | FillState::ClaimFailed) {
                    let _ = events.send(SolverEvent::PayoutConfirmed {
                        deposit_id: job.deposit.id.clone(),
                        tx_hash: tx_hash.clone(),
                    });
                }
            }
            match job.state {
                FillState::ClaimConfirmed => {
                    if let Some(tx_hash) = &job.claim_tx_hash {
                        let _ = events.send(SolverEvent::ClaimConfirmed {
                            deposit_id: job.deposit.id.clone(),
                            tx_hash: tx_hash.clone(),
                        });
                    }
                    let mut stats = stats.write();
                    stats.fills_completed += 1;
                    stats.total_volume += job.deposit.amount;
                    stats.total_profit += job.gross_margin();
                }
                FillState::ClaimFailed => {
                    let _ = events.send(SolverEvent::ReconciliationRequired {
                        deposit_id: job.deposit.id.clone(),
                        payout_tx_hash: job.payout_tx_hash.clone().unwrap_or_default(),
                    });
                    let _ = events.send(SolverEvent::JobFailed {
                        deposit_id: job.deposit.id.clone(),
                        state: job.state,
                        error: job.last_error.clone().unwrap_or_default(),
                    });
                    let mut stats = stats.write();
                    stats.fills_failed += 1;
                    stats.reconciliations += 1;
                }
                _ => {
                    let _ = events.send(SolverEvent::JobFailed {
                        deposit_id: job.deposit.id.clone(),
                        state: job.state,
                        error: job.last_error.clone().unwrap_or_default(),
                    });
                    stats.write().fills_failed += 1;
                }
            }
        }
        Err(e) => {
            let reason = match e {
                SolverError::InsufficientInventory {
                    requested,
                    available,
                } => RejectReason::InsufficientInventory {
                    requested,
                    available,
                },
                _ => RejectReason::DuplicateDeposit,
            };
            let _ = events.send(SolverEvent::FillRejected { deposit_id, reason });
            stats.write().fills_rejected += 1;
        }
    }
}

/// Periodically resynchronizes the ledger with the on-chain balance.
async fn balance_refresh_loop(
    reader: Arc<dyn ChainReader>,
    ledger: Arc<InventoryLedger>,
    solver_address: String,
    interval: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            () = tokio::time::sleep(interval) => {
                match reader.balance_of(&solver_address).await {
                    Ok(balance) => ledger.refresh(balance),
                    Err(e) => warn!(error = %e, "Balance refresh failed"),
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
