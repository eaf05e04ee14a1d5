//! Solver configuration.
//!
//! All tunables recognized by the engine live in [`SolverConfig`]:
//! polling cadence, retry budgets, confirmation bounds, inventory and
//! profit floors, and the fill concurrency limit. [`ConfigLoader`] merges
//! a TOML file with `FASTFILL_`-prefixed environment variables.

use anyhow::Result;
use fastfill_chain::Amount;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the solver engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Source-chain escrow contract the claim leg targets.
    pub escrow_address: String,

    /// The solver's destination-chain address (inventory holder).
    pub solver_address: String,

    /// Interval between monitor poll cycles.
    #[serde(with = "duration_secs")]
    pub poll_interval: Duration,

    /// Backoff after a failed poll cycle. Longer than `poll_interval`.
    #[serde(with = "duration_secs")]
    pub error_backoff: Duration,

    /// Bound on each transaction confirmation wait.
    #[serde(with = "duration_secs")]
    pub confirmation_timeout: Duration,

    /// Retry budget per fill leg (submission plus confirmation counts as
    /// one attempt).
    pub max_attempts: u32,

    /// Backoff between retry attempts within a leg.
    #[serde(with = "duration_secs")]
    pub retry_backoff: Duration,

    /// Interval between inventory balance refreshes.
    #[serde(with = "duration_secs")]
    pub balance_refresh_interval: Duration,

    /// Spendable inventory required to start.
    pub min_inventory: Amount,

    /// Flat profit floor per fill.
    pub min_profit: Amount,

    /// Basis-point profit floor relative to the deposit amount.
    pub min_margin_bps: u32,

    /// Maximum fills in flight at once.
    pub max_concurrent_fills: usize,

    /// Capacity of the monitor-to-orchestrator deposit channel.
    pub channel_capacity: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            escrow_address: String::new(),
            solver_address: String::new(),
            poll_interval: Duration::from_secs(2),
            error_backoff: Duration::from_secs(10),
            confirmation_timeout: Duration::from_secs(60),
            max_attempts: 3,
            retry_backoff: Duration::from_secs(2),
            balance_refresh_interval: Duration::from_secs(30),
            min_inventory: 0,
            min_profit: 0,
            min_margin_bps: 0,
            max_concurrent_fills: 8,
            channel_capacity: 64,
        }
    }
}

impl SolverConfig {
    /// Creates a conservative configuration: slower polling, a single fill
    /// in flight, and a meaningful profit floor.
    #[must_use]
    pub fn conservative() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            error_backoff: Duration::from_secs(30),
            max_attempts: 2,
            min_margin_bps: 10,
            max_concurrent_fills: 1,
            ..Self::default()
        }
    }

    /// Sets the escrow contract address.
    #[must_use]
    pub fn with_escrow_address(mut self, address: impl Into<String>) -> Self {
        self.escrow_address = address.into();
        self
    }

    /// Sets the solver's destination-chain address.
    #[must_use]
    pub fn with_solver_address(mut self, address: impl Into<String>) -> Self {
        self.solver_address = address.into();
        self
    }

    /// Sets the minimum inventory required to start.
    #[must_use]
    pub fn with_min_inventory(mut self, min: Amount) -> Self {
        self.min_inventory = min;
        self
    }

    /// Sets the flat profit floor.
    #[must_use]
    pub fn with_min_profit(mut self, min: Amount) -> Self {
        self.min_profit = min;
        self
    }

    /// Sets the fill concurrency limit.
    #[must_use]
    pub fn with_max_concurrent_fills(mut self, max: usize) -> Self {
        self.max_concurrent_fills = max;
        self
    }

    /// Sets the per-leg retry budget.
    #[must_use]
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }
}

/// Loads solver configuration from disk and environment.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration by merging `config/Solver.toml` with
    /// `FASTFILL_`-prefixed environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or required fields
    /// are missing.
    pub fn load() -> Result<SolverConfig> {
        Self::load_from("config/Solver.toml")
    }

    /// Loads configuration from a specific TOML path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed.
    pub fn load_from(path: &str) -> Result<SolverConfig> {
        let config: SolverConfig = Figment::new()
            .merge(figment::providers::Serialized::defaults(
                SolverConfig::default(),
            ))
            .merge(Toml::file(path))
            .merge(Env::prefixed("FASTFILL_"))
            .extract()?;

        Ok(config)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = SolverConfig::default();

        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert!(config.error_backoff > config.poll_interval);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.max_concurrent_fills, 8);
    }

    #[test]
    fn test_conservative_config() {
        let config = SolverConfig::conservative();

        assert_eq!(config.max_concurrent_fills, 1);
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.min_margin_bps, 10);
    }

    #[test]
    fn test_builder_methods() {
        let config = SolverConfig::default()
            .with_escrow_address("0xescrow")
            .with_solver_address("0xsolver")
            .with_min_inventory(1_000_000)
            .with_min_profit(10_000)
            .with_max_concurrent_fills(4)
            .with_max_attempts(5);

        assert_eq!(config.escrow_address, "0xescrow");
        assert_eq!(config.solver_address, "0xsolver");
        assert_eq!(config.min_inventory, 1_000_000);
        assert_eq!(config.min_profit, 10_000);
        assert_eq!(config.max_concurrent_fills, 4);
        assert_eq!(config.max_attempts, 5);
    }

    #[test]
    fn test_config_serde_round_trip() {
        let config = SolverConfig::conservative().with_escrow_address("0xescrow");
        let json = serde_json::to_string(&config).unwrap();
        let back: SolverConfig = serde_json::from_str(&json).unwrap();

        assert_eq!(back.escrow_address, "0xescrow");
        assert_eq!(back.poll_interval, config.poll_interval);
        assert_eq!(back.max_concurrent_fills, 1);
    }

    #[test]
    fn test_loader_reads_toml() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            "escrow_address = \"0xescrow\"\nsolver_address = \"0xsolver\"\nmin_inventory = 500\npoll_interval = 7"
        )
        .unwrap();

        let config = ConfigLoader::load_from(file.path().to_str().unwrap()).unwrap();

        assert_eq!(config.escrow_address, "0xescrow");
        assert_eq!(config.min_inventory, 500);
        assert_eq!(config.poll_interval, Duration::from_secs(7));
        // Unspecified fields fall back to defaults.
        assert_eq!(config.max_attempts, 3);
    }
}
