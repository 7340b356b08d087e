//! The authoritative spin queue.
//!
//! Submission acknowledgments are matched FIFO: the network accepts wagers in
//! the order they were sent, so an acknowledgment always belongs to the
//! oldest Pending entry without an engine id. Two wagers of identical size
//! stay distinguishable by order alone. Outcomes and failures, which may
//! arrive in any order, are matched by engine id only.

use reelhouse_types::{ClientId, EngineId, Outcome, QueueEntry, SpinRequest};

/// How many terminal entries the authority retains for snapshots before
/// compaction drops the oldest.
pub const RETAINED_TERMINAL_ENTRIES: usize = 32;

/// Result of applying an authoritative message to the queue.
#[derive(Clone, Debug, PartialEq)]
pub enum MatchResult {
    /// The message transitioned `client_id`; `stake` is the reservation to
    /// release for terminal transitions (zero for acknowledgments).
    Applied { client_id: ClientId, stake: u64 },
    /// The entry already reached a terminal state; re-delivery is a no-op
    /// and no reservation may be released again.
    AlreadyTerminal { client_id: ClientId },
    /// No entry matches; logged by the caller, resolved by a later snapshot.
    NoMatch,
}

/// Ordered collection of every wager the authority still remembers.
#[derive(Clone, Debug, Default)]
pub struct SpinQueue {
    entries: Vec<QueueEntry>,
}

impl SpinQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, client_id: ClientId) -> Option<&QueueEntry> {
        self.entries.iter().find(|e| e.client_id() == client_id)
    }

    /// Entries still holding a reservation.
    pub fn non_terminal_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_terminal()).count()
    }

    /// Sum of stakes across non-terminal entries. Mirrors the ledger's
    /// reserved amount by construction.
    pub fn reserved_total(&self) -> u64 {
        self.entries
            .iter()
            .filter(|e| !e.is_terminal())
            .fold(0u64, |acc, e| acc.saturating_add(e.stake_total()))
    }

    /// Accept a new wager as Pending.
    pub fn push(&mut self, request: SpinRequest) {
        self.entries.push(QueueEntry::new(request));
    }

    /// Match a network acceptance to the oldest Pending entry without an
    /// engine id and move it to Submitted.
    pub fn acknowledge_next(&mut self, engine_id: EngineId, now_ms: u64) -> MatchResult {
        match self
            .entries
            .iter_mut()
            .find(|e| e.awaiting_acknowledgment())
        {
            Some(entry) => {
                entry.acknowledge(engine_id, now_ms);
                MatchResult::Applied {
                    client_id: entry.client_id(),
                    stake: 0,
                }
            }
            None => MatchResult::NoMatch,
        }
    }

    /// Record a confirmed outcome, matched by engine id.
    pub fn complete(&mut self, engine_id: EngineId, outcome: Outcome, now_ms: u64) -> MatchResult {
        let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.engine_id == Some(engine_id))
        else {
            return MatchResult::NoMatch;
        };
        let client_id = entry.client_id();
        if !entry.complete(outcome, now_ms) {
            return MatchResult::AlreadyTerminal { client_id };
        }
        MatchResult::Applied {
            client_id,
            stake: entry.stake_total(),
        }
    }

    /// Record a failure for an entry the network already acknowledged.
    pub fn fail_by_engine(
        &mut self,
        engine_id: EngineId,
        message: &str,
        now_ms: u64,
    ) -> MatchResult {
        let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.engine_id == Some(engine_id))
        else {
            return MatchResult::NoMatch;
        };
        let client_id = entry.client_id();
        if !entry.fail(message, now_ms) {
            return MatchResult::AlreadyTerminal { client_id };
        }
        MatchResult::Applied {
            client_id,
            stake: entry.stake_total(),
        }
    }

    /// Record a failure for an entry the network never acknowledged
    /// (submission itself failed).
    pub fn fail_by_client(&mut self, client_id: ClientId, message: &str, now_ms: u64) -> MatchResult {
        let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.client_id() == client_id)
        else {
            return MatchResult::NoMatch;
        };
        if !entry.fail(message, now_ms) {
            return MatchResult::AlreadyTerminal { client_id };
        }
        MatchResult::Applied {
            client_id,
            stake: entry.stake_total(),
        }
    }

    /// Full authoritative dump for client reconciliation.
    pub fn snapshot(&self) -> Vec<QueueEntry> {
        self.entries.clone()
    }

    /// Drop the oldest terminal entries beyond the retention bound.
    /// Non-terminal entries are never dropped.
    pub fn compact(&mut self) {
        let mut terminal = self.entries.iter().filter(|e| e.is_terminal()).count();
        if terminal <= RETAINED_TERMINAL_ENTRIES {
            return;
        }
        self.entries.retain(|e| {
            if e.is_terminal() && terminal > RETAINED_TERMINAL_ENTRIES {
                terminal -= 1;
                false
            } else {
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelhouse_types::{
        Grid, SpinStatus, Stake, Symbol, WagerMode, WinBreakdown, WinLevel,
    };

    fn request(id: u64, stake: u64) -> SpinRequest {
        SpinRequest::new(
            ClientId(id),
            Stake::Ways { amount: stake },
            WagerMode::PrimaryToken,
            id * 10,
        )
    }

    fn outcome(winnings: u64) -> Outcome {
        Outcome {
            grid: Grid::filled(5, 3, Symbol::Lemon),
            winnings,
            win_level: WinLevel::from_payout(winnings, 100, false),
            wins: WinBreakdown::Lines(vec![]),
            bonus_spins_awarded: 0,
            jackpot_hit: false,
            jackpot_amount: 0,
        }
    }

    #[test]
    fn test_acknowledge_is_fifo_across_identical_stakes() {
        let mut queue = SpinQueue::new();
        queue.push(request(1, 100));
        queue.push(request(2, 100));
        queue.push(request(3, 100));

        // Same stake everywhere: only order can tell them apart.
        let first = queue.acknowledge_next(EngineId(10), 1_000);
        let second = queue.acknowledge_next(EngineId(11), 1_001);
        assert_eq!(
            first,
            MatchResult::Applied {
                client_id: ClientId(1),
                stake: 0,
            }
        );
        assert_eq!(
            second,
            MatchResult::Applied {
                client_id: ClientId(2),
                stake: 0,
            }
        );
        assert_eq!(queue.get(ClientId(3)).unwrap().status, SpinStatus::Pending);
    }

    #[test]
    fn test_acknowledge_skips_already_assigned() {
        let mut queue = SpinQueue::new();
        queue.push(request(1, 100));
        queue.push(request(2, 100));
        queue.acknowledge_next(EngineId(10), 1_000);

        let result = queue.acknowledge_next(EngineId(11), 1_001);
        assert_eq!(
            result,
            MatchResult::Applied {
                client_id: ClientId(2),
                stake: 0,
            }
        );
    }

    #[test]
    fn test_acknowledge_with_no_pending_is_no_match() {
        let mut queue = SpinQueue::new();
        assert_eq!(
            queue.acknowledge_next(EngineId(10), 1_000),
            MatchResult::NoMatch
        );
    }

    #[test]
    fn test_complete_matches_by_engine_id_out_of_order() {
        let mut queue = SpinQueue::new();
        queue.push(request(1, 100));
        queue.push(request(2, 200));
        queue.acknowledge_next(EngineId(10), 1_000);
        queue.acknowledge_next(EngineId(11), 1_001);

        // Confirmation order is not submission order.
        let result = queue.complete(EngineId(11), outcome(0), 2_000);
        assert_eq!(
            result,
            MatchResult::Applied {
                client_id: ClientId(2),
                stake: 200,
            }
        );
        assert_eq!(queue.get(ClientId(1)).unwrap().status, SpinStatus::Submitted);
    }

    #[test]
    fn test_complete_is_idempotent() {
        let mut queue = SpinQueue::new();
        queue.push(request(1, 100));
        queue.acknowledge_next(EngineId(10), 1_000);

        assert!(matches!(
            queue.complete(EngineId(10), outcome(50), 2_000),
            MatchResult::Applied { .. }
        ));
        // Re-delivery: same engine id, no second stake release.
        assert_eq!(
            queue.complete(EngineId(10), outcome(50), 2_100),
            MatchResult::AlreadyTerminal {
                client_id: ClientId(1),
            }
        );
        let entry = queue.get(ClientId(1)).unwrap();
        assert_eq!(entry.completed_at_ms, Some(2_000));
    }

    #[test]
    fn test_complete_unknown_engine_is_no_match() {
        let mut queue = SpinQueue::new();
        queue.push(request(1, 100));
        assert_eq!(
            queue.complete(EngineId(99), outcome(0), 2_000),
            MatchResult::NoMatch
        );
    }

    #[test]
    fn test_fail_by_client_before_acknowledgment() {
        let mut queue = SpinQueue::new();
        queue.push(request(1, 100));

        let result = queue.fail_by_client(ClientId(1), "rpc unreachable", 2_000);
        assert_eq!(
            result,
            MatchResult::Applied {
                client_id: ClientId(1),
                stake: 100,
            }
        );
        let entry = queue.get(ClientId(1)).unwrap();
        assert_eq!(entry.status, SpinStatus::Failed);
        assert!(entry.engine_id.is_none());
    }

    #[test]
    fn test_reserved_total_tracks_non_terminal() {
        let mut queue = SpinQueue::new();
        queue.push(request(1, 100));
        queue.push(request(2, 200));
        queue.push(request(3, 400));
        assert_eq!(queue.reserved_total(), 700);
        assert_eq!(queue.non_terminal_count(), 3);

        queue.acknowledge_next(EngineId(10), 1_000);
        queue.complete(EngineId(10), outcome(0), 2_000);
        assert_eq!(queue.reserved_total(), 600);
        assert_eq!(queue.non_terminal_count(), 2);
    }

    #[test]
    fn test_compact_keeps_non_terminal() {
        let mut queue = SpinQueue::new();
        for i in 0..(RETAINED_TERMINAL_ENTRIES as u64 + 10) {
            queue.push(request(i, 10));
            queue.acknowledge_next(EngineId(i), i);
            queue.complete(EngineId(i), outcome(0), i + 1);
        }
        // One in-flight entry older than every terminal one would be, plus a
        // fresh pending one.
        queue.push(request(1_000, 10));

        queue.compact();
        assert_eq!(
            queue.entries.iter().filter(|e| e.is_terminal()).count(),
            RETAINED_TERMINAL_ENTRIES
        );
        assert!(queue.get(ClientId(1_000)).is_some());
        // The oldest terminal entries went first.
        assert!(queue.get(ClientId(0)).is_none());
    }

    #[test]
    fn test_snapshot_is_full_copy() {
        let mut queue = SpinQueue::new();
        queue.push(request(1, 100));
        queue.push(request(2, 200));
        queue.acknowledge_next(EngineId(10), 1_000);

        let snapshot = queue.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].status, SpinStatus::Submitted);
        assert_eq!(snapshot[1].status, SpinStatus::Pending);
    }
}
