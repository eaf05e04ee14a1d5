//! Source-chain deposit monitoring.
//!
//! One sequential poll loop: read the chain height, fetch deposit logs
//! for the unprocessed range, emit each deposit over a bounded channel in
//! ascending block order, then persist the processed height through a
//! [`CheckpointStore`]. A failed cycle backs off and retries without
//! advancing the checkpoint; the loop never dies on RPC errors.
//!
//! Delivery is exactly-once within a run. If the process restarts after
//! emitting but before the checkpoint write lands, the overlap is
//! re-emitted; the executor deduplicates by deposit id.

use crate::types::Deposit;
use anyhow::{Context, Result};
use fastfill_chain::{BlockNumber, ChainError, ChainReader};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

// =============================================================================
// Checkpoint Persistence
// =============================================================================

/// Durable storage for the last processed height. Without persistence a
/// restart re-fills already-handled deposits, so production deployments
/// use [`JsonFileCheckpoint`]; [`MemoryCheckpoint`] covers tests.
pub trait CheckpointStore: Send + Sync {
    /// Loads the last processed height, or `None` on first run.
    fn load(&self) -> Result<Option<BlockNumber>>;

    /// Persists the last processed height.
    fn save(&self, height: BlockNumber) -> Result<()>;
}

/// Volatile checkpoint for tests and throwaway runs.
#[derive(Debug, Default)]
pub struct MemoryCheckpoint {
    inner: Mutex<Option<BlockNumber>>,
}

impl MemoryCheckpoint {
    /// Creates an empty checkpoint.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a checkpoint already at the given height.
    #[must_use]
    pub fn at(height: BlockNumber) -> Self {
        Self {
            inner: Mutex::new(Some(height)),
        }
    }
}

impl CheckpointStore for MemoryCheckpoint {
    fn load(&self) -> Result<Option<BlockNumber>> {
        Ok(*self.inner.lock())
    }

    fn save(&self, height: BlockNumber) -> Result<()> {
        *self.inner.lock() = Some(height);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointFile {
    last_processed: BlockNumber,
}

/// File-backed checkpoint. Writes go to a sibling temp file first and
/// rename over the target so a crash mid-write cannot corrupt the
/// checkpoint.
#[derive(Debug)]
pub struct JsonFileCheckpoint {
    path: PathBuf,
}

impl JsonFileCheckpoint {
    /// Creates a checkpoint backed by the given path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the backing path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CheckpointStore for JsonFileCheckpoint {
    fn load(&self) -> Result<Option<BlockNumber>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("reading checkpoint {}", self.path.display()))?;
        let file: CheckpointFile =
            serde_json::from_str(&raw).context("parsing checkpoint file")?;
        Ok(Some(file.last_processed))
    }

    fn save(&self, height: BlockNumber) -> Result<()> {
        let raw = serde_json::to_string(&CheckpointFile {
            last_processed: height,
        })?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, raw)
            .with_context(|| format!("writing checkpoint {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path).context("renaming checkpoint into place")?;
        Ok(())
    }
}

// =============================================================================
// Deposit Monitor
// =============================================================================

/// Polls the source chain for new deposit events and emits them to the
/// orchestrator over a bounded channel.
pub struct DepositMonitor {
    reader: Arc<dyn ChainReader>,
    checkpoint: Arc<dyn CheckpointStore>,
    tx: mpsc::Sender<Deposit>,
    poll_interval: Duration,
    error_backoff: Duration,
    shutdown: watch::Receiver<bool>,
}

impl DepositMonitor {
    /// Creates a monitor. `error_backoff` should exceed `poll_interval`.
    #[must_use]
    pub fn new(
        reader: Arc<dyn ChainReader>,
        checkpoint: Arc<dyn CheckpointStore>,
        tx: mpsc::Sender<Deposit>,
        poll_interval: Duration,
        error_backoff: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            reader,
            checkpoint,
            tx,
            poll_interval,
            error_backoff,
            shutdown,
        }
    }

    /// Runs the poll loop until shutdown is signalled or the deposit
    /// channel closes. Consumes the monitor.
    pub async fn run(mut self) {
        let Some(mut last) = self.resolve_start_height().await else {
            return;
        };
        info!(start_height = last, "Deposit monitor started");

        loop {
            if *self.shutdown.borrow() {
                break;
            }
            match self.poll_cycle(last).await {
                Ok(Some(next)) => {
                    last = next;
                    if self.sleep_or_shutdown(self.poll_interval).await {
                        break;
                    }
                }
                Ok(None) => {
                    // Deposit channel closed: orchestrator is gone.
                    break;
                }
                Err(e) => {
                    warn!(error = %e, backoff = ?self.error_backoff, "Poll cycle failed; backing off");
                    if self.sleep_or_shutdown(self.error_backoff).await {
                        break;
                    }
                }
            }
        }
        info!("Deposit monitor stopped");
    }

    /// Resolves where polling begins: the persisted checkpoint, or the
    /// current chain height (no historical backlog) on first run.
    /// Returns `None` if shutdown arrives while the chain is unreachable.
    async fn resolve_start_height(&mut self) -> Option<BlockNumber> {
        match self.checkpoint.load() {
            Ok(Some(height)) => return Some(height),
            Ok(None) => {}
            Err(e) => {
                warn!(error = %e, "Checkpoint load failed; starting from current height");
            }
        }

        loop {
            if *self.shutdown.borrow() {
                return None;
            }
            match self.reader.current_height().await {
                Ok(height) => return Some(height),
                Err(e) => {
                    warn!(error = %e, "Failed to read start height; retrying");
                    if self.sleep_or_shutdown(self.error_backoff).await {
                        return None;
                    }
                }
            }
        }
    }

    /// One poll cycle. Returns the new last-processed height, or `None`
    /// if the deposit channel closed. RPC errors propagate without
    /// advancing anything.
    async fn poll_cycle(&self, last: BlockNumber) -> Result<Option<BlockNumber>, ChainError> {
        let height = self.reader.current_height().await?;
        if height <= last {
            return Ok(Some(last));
        }

        let logs = self.reader.deposit_logs(last + 1, height).await?;
        debug!(
            from = last + 1,
            to = height,
            count = logs.len(),
            "Fetched deposit logs"
        );

        for log in logs {
            match Deposit::from_log(log) {
                Ok(deposit) => {
                    info!(
                        deposit_id = %deposit.id,
                        block = deposit.source_block,
                        amount = deposit.amount,
                        "Deposit detected"
                    );
                    if self.tx.send(deposit).await.is_err() {
                        return Ok(None);
                    }
                }
                Err(log) => {
                    warn!(
                        deposit_id = %log.deposit_id,
                        amount = log.amount,
                        min_receive = log.min_receive,
                        fee_cap = log.fee_cap,
                        "Dropping malformed deposit log"
                    );
                }
            }
        }

        if let Err(e) = self.checkpoint.save(height) {
            // The in-memory cursor still advances, so no duplicates within
            // this run; a restart inside the window re-emits and the
            // executor dedups.
            warn!(error = %e, height, "Checkpoint persistence failed");
        }
        Ok(Some(height))
    }

    /// Sleeps for `duration` unless shutdown fires first. Returns true on
    /// shutdown.
    async fn sleep_or_shutdown(&mut self, duration: Duration) -> bool {
        tokio::select! {
            () = tokio::time::sleep(duration) => false,
            _ = self.shutdown.changed() => *self.shutdown.borrow(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fastfill_chain::paper::PaperChain;
    use fastfill_chain::DepositLog;

    fn sample_log(id: &str) -> DepositLog {
        DepositLog {
            deposit_id: id.to_string(),
            user: "0xuser".to_string(),
            amount: 10_000_000,
            min_receive: 9_800_000,
            fee_cap: 200_000,
            block_number: 0,
            tx_hash: format!("0xdeposit-{id}"),
        }
    }

    fn monitor_with(
        chain: Arc<PaperChain>,
        checkpoint: Arc<dyn CheckpointStore>,
        capacity: usize,
    ) -> (DepositMonitor, mpsc::Receiver<Deposit>, watch::Sender<bool>) {
        let (tx, rx) = mpsc::channel(capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let monitor = DepositMonitor::new(
            chain,
            checkpoint,
            tx,
            Duration::from_millis(5),
            Duration::from_millis(10),
            shutdown_rx,
        );
        (monitor, rx, shutdown_tx)
    }

    // ==================== Checkpoint Tests ====================

    #[test]
    fn test_memory_checkpoint_round_trip() {
        let checkpoint = MemoryCheckpoint::new();
        assert_eq!(checkpoint.load().unwrap(), None);

        checkpoint.save(42).unwrap();
        assert_eq!(checkpoint.load().unwrap(), Some(42));
    }

    #[test]
    fn test_json_file_checkpoint_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.json");

        let checkpoint = JsonFileCheckpoint::new(&path);
        assert_eq!(checkpoint.load().unwrap(), None);

        checkpoint.save(1234).unwrap();
        assert_eq!(checkpoint.load().unwrap(), Some(1234));

        // A fresh instance sees the persisted height.
        let reopened = JsonFileCheckpoint::new(&path);
        assert_eq!(reopened.load().unwrap(), Some(1234));
    }

    #[test]
    fn test_json_file_checkpoint_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = JsonFileCheckpoint::new(dir.path().join("checkpoint.json"));

        checkpoint.save(10).unwrap();
        checkpoint.save(20).unwrap();

        assert_eq!(checkpoint.load().unwrap(), Some(20));
    }

    // ==================== Poll Cycle Tests ====================

    #[tokio::test]
    async fn test_cycle_emits_new_deposits_in_order() {
        let chain = Arc::new(PaperChain::at_height(100));
        chain.append_deposit(sample_log("d1")); // block 101
        chain.append_deposit(sample_log("d2")); // block 102

        let (monitor, mut rx, _shutdown) =
            monitor_with(Arc::clone(&chain), Arc::new(MemoryCheckpoint::at(100)), 8);

        let next = monitor.poll_cycle(100).await.unwrap().unwrap();
        assert_eq!(next, 102);

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.id.as_str(), "d1");
        assert_eq!(second.id.as_str(), "d2");
        assert!(first.source_block < second.source_block);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cycle_without_new_blocks_emits_nothing() {
        let chain = Arc::new(PaperChain::at_height(100));
        let (monitor, mut rx, _shutdown) =
            monitor_with(Arc::clone(&chain), Arc::new(MemoryCheckpoint::at(100)), 8);

        let next = monitor.poll_cycle(100).await.unwrap().unwrap();

        assert_eq!(next, 100);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cycle_does_not_reemit_processed_range() {
        let chain = Arc::new(PaperChain::at_height(100));
        chain.append_deposit(sample_log("d1"));

        let (monitor, mut rx, _shutdown) =
            monitor_with(Arc::clone(&chain), Arc::new(MemoryCheckpoint::at(100)), 8);

        let next = monitor.poll_cycle(100).await.unwrap().unwrap();
        assert_eq!(rx.try_recv().unwrap().id.as_str(), "d1");

        // Second cycle from the advanced cursor: nothing new.
        let next = monitor.poll_cycle(next).await.unwrap().unwrap();
        assert_eq!(next, 101);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cycle_drops_malformed_logs() {
        let chain = Arc::new(PaperChain::at_height(100));
        let mut bad = sample_log("bad");
        bad.fee_cap = 5_000_000; // min_receive + fee_cap > amount
        chain.append_deposit(bad);
        chain.append_deposit(sample_log("good"));

        let (monitor, mut rx, _shutdown) =
            monitor_with(Arc::clone(&chain), Arc::new(MemoryCheckpoint::at(100)), 8);

        monitor.poll_cycle(100).await.unwrap();

        assert_eq!(rx.try_recv().unwrap().id.as_str(), "good");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_transient_failures_do_not_advance_or_skip() {
        // Scenario E: three failing cycles, then success.
        let chain = Arc::new(PaperChain::at_height(100));
        chain.append_deposit(sample_log("d1"));
        chain.fail_next_reads(3);

        let checkpoint = Arc::new(MemoryCheckpoint::at(100));
        let (monitor, mut rx, _shutdown) =
            monitor_with(Arc::clone(&chain), Arc::clone(&checkpoint) as _, 8);

        for _ in 0..3 {
            assert!(monitor.poll_cycle(100).await.is_err());
            assert_eq!(checkpoint.load().unwrap(), Some(100));
            assert!(rx.try_recv().is_err());
        }

        let next = monitor.poll_cycle(100).await.unwrap().unwrap();
        assert_eq!(next, 101);
        assert_eq!(checkpoint.load().unwrap(), Some(101));
        assert_eq!(rx.try_recv().unwrap().id.as_str(), "d1");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cycle_reports_channel_closed() {
        let chain = Arc::new(PaperChain::at_height(100));
        chain.append_deposit(sample_log("d1"));

        let (monitor, rx, _shutdown) =
            monitor_with(Arc::clone(&chain), Arc::new(MemoryCheckpoint::at(100)), 8);
        drop(rx);

        assert_eq!(monitor.poll_cycle(100).await.unwrap(), None);
    }

    // ==================== Run Loop Tests ====================

    #[tokio::test]
    async fn test_run_starts_from_current_height() {
        let chain = Arc::new(PaperChain::at_height(50));
        // Backlog before start: must not be emitted.
        chain.append_deposit(sample_log("old"));

        let (monitor, mut rx, shutdown) =
            monitor_with(Arc::clone(&chain), Arc::new(MemoryCheckpoint::new()), 8);
        let handle = tokio::spawn(monitor.run());

        // Give the loop a cycle, then add a new deposit.
        tokio::time::sleep(Duration::from_millis(20)).await;
        chain.append_deposit(sample_log("new"));

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.id.as_str(), "new");

        shutdown.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_resumes_from_checkpoint() {
        let chain = Arc::new(PaperChain::at_height(50));
        chain.append_deposit(sample_log("d1")); // block 51

        // Checkpoint behind the chain tip: the gap is replayed.
        let (monitor, mut rx, shutdown) =
            monitor_with(Arc::clone(&chain), Arc::new(MemoryCheckpoint::at(50)), 8);
        let handle = tokio::spawn(monitor.run());

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.id.as_str(), "d1");

        shutdown.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let chain = Arc::new(PaperChain::at_height(50));
        let (monitor, _rx, shutdown) =
            monitor_with(Arc::clone(&chain), Arc::new(MemoryCheckpoint::new()), 8);

        let handle = tokio::spawn(monitor.run());
        tokio::time::sleep(Duration::from_millis(10)).await;
        shutdown.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
