//! Destination-chain inventory ledger.
//!
//! The ledger is the only shared resource mutated by concurrent fill
//! jobs, so every read-then-write goes through a single mutex:
//! `reserve` is an atomic check-and-increment, and two jobs racing for
//! the last unit of inventory cannot both succeed. `release` and `commit`
//! are idempotent per reservation handle, keyed by the reservation id.

use crate::error::SolverError;
use fastfill_chain::Amount;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

/// A hold against inventory for one in-flight fill.
///
/// The handle does not release on drop: a fill past the payout
/// commitment point must keep its hold until the executor decides
/// between `release` and `commit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    id: Uuid,
    amount: Amount,
}

impl Reservation {
    /// Returns the reserved amount.
    #[must_use]
    pub fn amount(&self) -> Amount {
        self.amount
    }

    /// Returns the reservation id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }
}

/// Point-in-time view of the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    /// Last known on-chain balance.
    pub on_chain_balance: Amount,

    /// Sum of active reservations.
    pub reserved: Amount,

    /// Spendable balance: `on_chain_balance - reserved`, clamped at zero.
    pub available: Amount,

    /// True if the on-chain balance ever dropped below `reserved`.
    pub discrepancy: bool,
}

#[derive(Debug, Default)]
struct LedgerState {
    on_chain_balance: Amount,
    reservations: HashMap<Uuid, Amount>,
    discrepancy: bool,
}

impl LedgerState {
    fn reserved(&self) -> Amount {
        self.reservations.values().sum()
    }

    fn available(&self) -> Amount {
        self.on_chain_balance.saturating_sub(self.reserved())
    }
}

/// Tracks the solver's spendable destination-chain balance.
#[derive(Debug, Default)]
pub struct InventoryLedger {
    inner: Mutex<LedgerState>,
}

impl InventoryLedger {
    /// Creates an empty ledger. Call [`refresh`](Self::refresh) before the
    /// first reservation.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a ledger seeded with an on-chain balance.
    #[must_use]
    pub fn with_balance(balance: Amount) -> Self {
        let ledger = Self::new();
        ledger.inner.lock().on_chain_balance = balance;
        ledger
    }

    /// Atomically reserves `amount` against available inventory.
    ///
    /// # Errors
    ///
    /// `SolverError::InsufficientInventory` when `available < amount`.
    pub fn reserve(&self, amount: Amount) -> Result<Reservation, SolverError> {
        let mut state = self.inner.lock();
        let available = state.available();
        if available < amount {
            return Err(SolverError::InsufficientInventory {
                requested: amount,
                available,
            });
        }

        let id = Uuid::new_v4();
        state.reservations.insert(id, amount);
        debug!(reservation_id = %id, amount, remaining = state.available(), "Reserved inventory");
        Ok(Reservation { id, amount })
    }

    /// Returns a reservation's amount to the available pool. Idempotent:
    /// a second call with the same handle is a no-op.
    pub fn release(&self, reservation: &Reservation) {
        let mut state = self.inner.lock();
        if state.reservations.remove(&reservation.id).is_some() {
            debug!(
                reservation_id = %reservation.id,
                amount = reservation.amount,
                "Released reservation"
            );
        }
    }

    /// Consumes a reservation after the payout confirmed: the amount
    /// leaves both `reserved` and the in-memory balance immediately so
    /// later reservations see correct availability before the next
    /// on-chain refresh. Idempotent per handle.
    pub fn commit(&self, reservation: &Reservation) {
        let mut state = self.inner.lock();
        if state.reservations.remove(&reservation.id).is_some() {
            state.on_chain_balance = state.on_chain_balance.saturating_sub(reservation.amount);
            debug!(
                reservation_id = %reservation.id,
                amount = reservation.amount,
                balance = state.on_chain_balance,
                "Committed reservation"
            );
        }
    }

    /// Resynchronizes the on-chain balance from a fresh chain read.
    ///
    /// If the balance dropped below the reserved sum (funds spent outside
    /// this process), availability clamps to zero and the discrepancy is
    /// flagged rather than letting the ledger go negative.
    pub fn refresh(&self, balance: Amount) {
        let mut state = self.inner.lock();
        state.on_chain_balance = balance;
        let reserved = state.reserved();
        if balance < reserved {
            state.discrepancy = true;
            warn!(
                balance,
                reserved, "On-chain balance below reserved sum; clamping available to zero"
            );
        }
    }

    /// Returns the spendable balance.
    #[must_use]
    pub fn available(&self) -> Amount {
        self.inner.lock().available()
    }

    /// Returns a point-in-time view of the ledger.
    #[must_use]
    pub fn snapshot(&self) -> LedgerSnapshot {
        let state = self.inner.lock();
        let reserved = state.reserved();
        LedgerSnapshot {
            on_chain_balance: state.on_chain_balance,
            reserved,
            available: state.on_chain_balance.saturating_sub(reserved),
            discrepancy: state.discrepancy,
        }
    }

    /// Returns true if a balance refresh ever found less than the
    /// reserved sum on-chain.
    #[must_use]
    pub fn has_discrepancy(&self) -> bool {
        self.inner.lock().discrepancy
    }
}
