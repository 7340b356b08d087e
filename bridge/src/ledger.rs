//! Balance bookkeeping for the authority.
//!
//! The ledger never does I/O. `confirmed` is replaced wholesale from the
//! external source of truth; `reserved` tracks stakes of non-terminal queue
//! entries. Derived `available` can never underflow.

use thiserror::Error;

/// A reservation that would overdraw the spendable balance.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("cannot reserve {requested}: only {available} available")]
pub struct InsufficientFunds {
    pub requested: u64,
    pub available: u64,
}

/// Confirmed balance plus funds earmarked against in-flight wagers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BalanceLedger {
    confirmed: u64,
    reserved: u64,
}

impl BalanceLedger {
    pub fn new(confirmed: u64) -> Self {
        Self {
            confirmed,
            reserved: 0,
        }
    }

    pub fn confirmed(&self) -> u64 {
        self.confirmed
    }

    pub fn reserved(&self) -> u64 {
        self.reserved
    }

    /// Spendable balance: confirmed minus reserved, floored at zero.
    pub fn available(&self) -> u64 {
        self.confirmed.saturating_sub(self.reserved)
    }

    /// Earmark `amount` against an in-flight wager.
    pub fn reserve(&mut self, amount: u64) -> Result<(), InsufficientFunds> {
        let available = self.available();
        if amount > available {
            return Err(InsufficientFunds {
                requested: amount,
                available,
            });
        }
        self.reserved += amount;
        Ok(())
    }

    /// Return an earmark once its wager reaches a terminal state. Floored at
    /// zero so a double release cannot underflow.
    pub fn release(&mut self, amount: u64) {
        self.reserved = self.reserved.saturating_sub(amount);
    }

    /// Replace the confirmed balance from an authoritative refresh. Does not
    /// touch reservations.
    pub fn set_confirmed(&mut self, amount: u64) {
        self.confirmed = amount;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_reserve_and_release() {
        let mut ledger = BalanceLedger::new(1_000);
        assert_eq!(ledger.available(), 1_000);

        ledger.reserve(300).unwrap();
        ledger.reserve(300).unwrap();
        assert_eq!(ledger.reserved(), 600);
        assert_eq!(ledger.available(), 400);

        ledger.release(300);
        assert_eq!(ledger.available(), 700);
    }

    #[test]
    fn test_reserve_rejects_overdraw() {
        let mut ledger = BalanceLedger::new(100);
        ledger.reserve(80).unwrap();
        let err = ledger.reserve(21).unwrap_err();
        assert_eq!(
            err,
            InsufficientFunds {
                requested: 21,
                available: 20,
            }
        );
        // Failed reservation leaves the ledger untouched.
        assert_eq!(ledger.reserved(), 80);
    }

    #[test]
    fn test_double_release_floors_at_zero() {
        let mut ledger = BalanceLedger::new(100);
        ledger.reserve(50).unwrap();
        ledger.release(50);
        ledger.release(50);
        assert_eq!(ledger.reserved(), 0);
        assert_eq!(ledger.available(), 100);
    }

    #[test]
    fn test_set_confirmed_leaves_reservations() {
        let mut ledger = BalanceLedger::new(1_000);
        ledger.reserve(400).unwrap();

        // A losing spin settles: the refresh lowers confirmed while the
        // reservation is still outstanding.
        ledger.set_confirmed(600);
        assert_eq!(ledger.reserved(), 400);
        assert_eq!(ledger.available(), 200);

        // Refresh below the outstanding reservation: available floors at 0.
        ledger.set_confirmed(100);
        assert_eq!(ledger.available(), 0);
    }

    proptest! {
        #[test]
        fn prop_available_never_underflows(
            confirmed in 0u64..1_000_000,
            ops in prop::collection::vec((0u8..3, 0u64..10_000), 0..64),
        ) {
            let mut ledger = BalanceLedger::new(confirmed);
            for (op, amount) in ops {
                match op {
                    0 => { let _ = ledger.reserve(amount); }
                    1 => ledger.release(amount),
                    _ => ledger.set_confirmed(amount),
                }
                prop_assert_eq!(
                    ledger.available(),
                    ledger.confirmed().saturating_sub(ledger.reserved())
                );
                prop_assert!(ledger.available() <= ledger.confirmed());
            }
        }

        #[test]
        fn prop_reserve_never_exceeds_confirmed_without_refresh(
            confirmed in 0u64..1_000_000,
            amounts in prop::collection::vec(0u64..10_000, 0..64),
        ) {
            // Absent confirmed-balance refreshes, accepted reservations can
            // never sum past the confirmed balance.
            let mut ledger = BalanceLedger::new(confirmed);
            for amount in amounts {
                let _ = ledger.reserve(amount);
                prop_assert!(ledger.reserved() <= confirmed);
            }
        }
    }
}
