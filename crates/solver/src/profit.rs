//! Profitability gating.
//!
//! `evaluate` is a pure function of the deposit's terms and the current
//! cost estimate. A missing estimate always rejects: the calculator fails
//! closed rather than assuming zero cost. Policy is pluggable via
//! [`ProfitPolicy`]; the default [`MarginPolicy`] applies a flat floor and
//! a basis-point floor on top of simple positivity.

use crate::types::Deposit;
use async_trait::async_trait;
use fastfill_chain::{Amount, ChainError};
use serde::{Deserialize, Serialize};

// =============================================================================
// Cost Estimation
// =============================================================================

/// Estimated cost of completing one fill, in destination-chain units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostEstimate {
    /// Destination-chain gas for the payout.
    pub destination_gas: Amount,

    /// Solver-side overhead (claim gas, infrastructure amortization).
    pub overhead: Amount,
}

impl CostEstimate {
    /// Creates an estimate.
    #[must_use]
    pub fn new(destination_gas: Amount, overhead: Amount) -> Self {
        Self {
            destination_gas,
            overhead,
        }
    }

    /// Total cost covered by the estimate.
    #[must_use]
    pub fn total(&self) -> Amount {
        self.destination_gas.saturating_add(self.overhead)
    }
}

/// Supplies the live cost estimate ahead of each evaluation.
#[async_trait]
pub trait GasOracle: Send + Sync {
    /// Returns the current cost estimate for one fill.
    async fn estimate(&self) -> Result<CostEstimate, ChainError>;
}

/// Fixed-cost oracle for tests and paper runs.
#[derive(Debug, Clone, Copy)]
pub struct FixedGasOracle {
    estimate: CostEstimate,
}

impl FixedGasOracle {
    /// Creates an oracle that always returns the given estimate.
    #[must_use]
    pub fn new(estimate: CostEstimate) -> Self {
        Self { estimate }
    }
}

#[async_trait]
impl GasOracle for FixedGasOracle {
    async fn estimate(&self) -> Result<CostEstimate, ChainError> {
        Ok(self.estimate)
    }
}

// =============================================================================
// Decision
// =============================================================================

/// Outcome of evaluating one deposit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfitDecision {
    /// Whether the deposit should be filled.
    pub accepted: bool,

    /// Expected profit: `fee_cap - cost`. Negative when the fill would
    /// lose money.
    pub expected_profit: i128,
}

impl ProfitDecision {
    /// A rejection with the given expected profit.
    #[must_use]
    pub fn reject(expected_profit: i128) -> Self {
        Self {
            accepted: false,
            expected_profit,
        }
    }
}

// =============================================================================
// Policy
// =============================================================================

/// Pluggable accept/reject policy. Implementations must be pure: no side
/// effects, no state beyond configuration.
pub trait ProfitPolicy: Send + Sync {
    /// Evaluates a deposit against the current cost estimate.
    ///
    /// A `None` estimate means the cost could not be obtained; every
    /// policy must reject in that case.
    fn evaluate(&self, deposit: &Deposit, cost: Option<&CostEstimate>) -> ProfitDecision;
}

/// Default policy: positive expected profit, a flat floor, and a
/// basis-point floor relative to the deposit amount.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MarginPolicy {
    /// Flat minimum profit per fill. Zero disables the floor.
    pub min_profit: Amount,

    /// Minimum profit as basis points of the deposit amount. Zero
    /// disables the floor.
    pub min_margin_bps: u32,
}

impl MarginPolicy {
    /// Creates a policy with the given floors.
    #[must_use]
    pub fn new(min_profit: Amount, min_margin_bps: u32) -> Self {
        Self {
            min_profit,
            min_margin_bps,
        }
    }
}

impl ProfitPolicy for MarginPolicy {
    fn evaluate(&self, deposit: &Deposit, cost: Option<&CostEstimate>) -> ProfitDecision {
        // Fail closed: no estimate, no fill.
        let Some(cost) = cost else {
            return ProfitDecision::reject(0);
        };

        let expected_profit = deposit.fee_cap as i128 - cost.total() as i128;

        if expected_profit <= 0 {
            return ProfitDecision::reject(expected_profit);
        }
        if expected_profit < self.min_profit as i128 {
            return ProfitDecision::reject(expected_profit);
        }
        if self.min_margin_bps > 0 {
            let floor = deposit.amount as i128 * i128::from(self.min_margin_bps) / 10_000;
            if expected_profit < floor {
                return ProfitDecision::reject(expected_profit);
            }
        }

        ProfitDecision {
            accepted: true,
            expected_profit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DepositId;

    fn sample_deposit() -> Deposit {
        Deposit {
            id: DepositId::from("d1"),
            user: "0xuser".to_string(),
            amount: 10_000_000,
            min_receive: 9_800_000,
            fee_cap: 200_000,
            source_block: 42,
            source_tx_hash: "0xdeposit".to_string(),
        }
    }

    // ==================== CostEstimate Tests ====================

    #[test]
    fn test_cost_estimate_total() {
        let cost = CostEstimate::new(40_000, 10_000);
        assert_eq!(cost.total(), 50_000);
    }

    #[test]
    fn test_cost_estimate_total_saturates() {
        let cost = CostEstimate::new(Amount::MAX, 1);
        assert_eq!(cost.total(), Amount::MAX);
    }

    // ==================== MarginPolicy Tests ====================

    #[test]
    fn test_accepts_profitable_deposit() {
        // Scenario A: fee_cap 200_000, cost 50_000 -> profit 150_000.
        let policy = MarginPolicy::default();
        let cost = CostEstimate::new(40_000, 10_000);

        let decision = policy.evaluate(&sample_deposit(), Some(&cost));

        assert!(decision.accepted);
        assert_eq!(decision.expected_profit, 150_000);
    }

    #[test]
    fn test_rejects_unprofitable_deposit() {
        // Scenario B: fee_cap 200_000, cost 250_000 -> profit -50_000.
        let policy = MarginPolicy::default();
        let cost = CostEstimate::new(200_000, 50_000);

        let decision = policy.evaluate(&sample_deposit(), Some(&cost));

        assert!(!decision.accepted);
        assert_eq!(decision.expected_profit, -50_000);
    }

    #[test]
    fn test_rejects_break_even() {
        let policy = MarginPolicy::default();
        let cost = CostEstimate::new(200_000, 0);

        let decision = policy.evaluate(&sample_deposit(), Some(&cost));

        assert!(!decision.accepted);
        assert_eq!(decision.expected_profit, 0);
    }

    #[test]
    fn test_fails_closed_without_estimate() {
        let policy = MarginPolicy::default();

        let decision = policy.evaluate(&sample_deposit(), None);

        assert!(!decision.accepted);
    }

    #[test]
    fn test_flat_floor() {
        let policy = MarginPolicy::new(160_000, 0);
        let cost = CostEstimate::new(50_000, 0); // profit 150_000 < floor

        let decision = policy.evaluate(&sample_deposit(), Some(&cost));
        assert!(!decision.accepted);
        assert_eq!(decision.expected_profit, 150_000);

        let policy = MarginPolicy::new(150_000, 0); // floor met exactly
        let decision = policy.evaluate(&sample_deposit(), Some(&cost));
        assert!(decision.accepted);
    }

    #[test]
    fn test_basis_point_floor() {
        // 200 bps of 10_000_000 = 200_000; profit 150_000 falls short.
        let policy = MarginPolicy::new(0, 200);
        let cost = CostEstimate::new(50_000, 0);

        let decision = policy.evaluate(&sample_deposit(), Some(&cost));
        assert!(!decision.accepted);

        // 100 bps of 10_000_000 = 100_000; profit 150_000 clears it.
        let policy = MarginPolicy::new(0, 100);
        let decision = policy.evaluate(&sample_deposit(), Some(&cost));
        assert!(decision.accepted);
    }

    #[test]
    fn test_evaluation_is_pure() {
        let policy = MarginPolicy::default();
        let cost = CostEstimate::new(40_000, 10_000);
        let deposit = sample_deposit();

        let first = policy.evaluate(&deposit, Some(&cost));
        let second = policy.evaluate(&deposit, Some(&cost));

        assert_eq!(first, second);
    }

    // ==================== GasOracle Tests ====================

    #[tokio::test]
    async fn test_fixed_gas_oracle() {
        let oracle = FixedGasOracle::new(CostEstimate::new(40_000, 10_000));

        let estimate = oracle.estimate().await.unwrap();
        assert_eq!(estimate.total(), 50_000);
    }
}
