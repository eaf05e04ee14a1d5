//! Fast-fill solver for cross-chain escrow deposits.
//!
//! A user locks funds in a source-chain escrow; the solver fronts the
//! payout on the destination chain from its own inventory, then claims
//! the locked amount (payout plus fee) back on the source chain. The
//! user gets fast liquidity; the solver earns the spread between the
//! deposit's fee cap and its own costs.
//!
//! # Architecture
//!
//! - [`monitor`]: polls the source chain for deposit events with
//!   checkpointed, in-order delivery.
//! - [`profit`]: pure accept/reject policy over deposit terms and a live
//!   cost estimate; fails closed when the estimate is unavailable.
//! - [`inventory`]: atomic reservation ledger over the solver's
//!   destination-chain balance.
//! - [`executor`]: drives each accepted deposit through payout and claim
//!   with bounded retries, and quarantines fills whose claim failed after
//!   a confirmed payout.
//! - [`orchestrator`]: wires the pipeline together, limits fill
//!   concurrency, publishes [`types::SolverEvent`]s, and owns startup and
//!   cooperative shutdown.
//!
//! Chain access is abstracted behind the traits in [`fastfill_chain`];
//! `fastfill_chain::paper::PaperChain` drives the whole engine in tests
//! without a node.
//!
//! # Example
//!
//! ```no_run
//! use fastfill_chain::paper::PaperChain;
//! use fastfill_solver::{
//!     ChainHandles, CostEstimate, FixedGasOracle, Solver, SolverConfig,
//! };
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let source = Arc::new(PaperChain::new());
//! let destination = Arc::new(PaperChain::new());
//! destination.set_balance("0xsolver", 50_000_000);
//!
//! let config = SolverConfig::default()
//!     .with_escrow_address("0xescrow")
//!     .with_solver_address("0xsolver")
//!     .with_min_profit(10_000);
//!
//! let solver = Solver::new(
//!     config,
//!     ChainHandles::from_chains(source, destination),
//!     Arc::new(FixedGasOracle::new(CostEstimate::new(40_000, 10_000))),
//! );
//! solver.start().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod inventory;
pub mod monitor;
pub mod orchestrator;
pub mod profit;
pub mod types;

pub use config::{ConfigLoader, SolverConfig};
pub use error::{FillLeg, SolverError};
pub use executor::{ExecutorConfig, FillExecutor, ReconciliationItem};
pub use inventory::{InventoryLedger, LedgerSnapshot, Reservation};
pub use monitor::{CheckpointStore, DepositMonitor, JsonFileCheckpoint, MemoryCheckpoint};
pub use orchestrator::{ChainHandles, Solver, SolverStats};
pub use profit::{CostEstimate, FixedGasOracle, GasOracle, MarginPolicy, ProfitDecision, ProfitPolicy};
pub use types::{Deposit, DepositId, FillJob, FillState, RejectReason, SolverEvent};
