//! Optimistic local projection of the spin queue.
//!
//! Matching rules, in order:
//! - submission ack: oldest Pending entry without an engine id (FIFO), then
//!   the envelope's client-id echo;
//! - outcome/error: engine id, then the client-id echo — which also covers a
//!   lost submission ack, where the engine id was never learned locally.
//!
//! Outcomes may arrive in any order; once an id is known, matching is never
//! positional. Terminal entries ignore re-delivery. A snapshot from the
//! authority always wins over the local projection.
//!
//! Everything here is pure and takes `now_ms` as a parameter; the session
//! loop owns the clock.

use reelhouse_types::{ClientId, EngineId, Outcome, QueueEntry, SpinRequest};
use tracing::{debug, warn};

/// Result of applying one host message to the local queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileResult {
    /// The message transitioned this entry.
    Applied(ClientId),
    /// The entry was already terminal; idempotent no-op.
    Ignored(ClientId),
    /// No local entry matches. Not fatal: the next snapshot resolves it.
    Miss,
}

/// Bounds for the local projection.
#[derive(Clone, Copy, Debug)]
pub struct ReconcilerConfig {
    /// Queue length at which the oldest terminal entries start fading.
    pub max_entries: usize,
    /// How long a fading entry stays visible before removal.
    pub fade_delay_ms: u64,
    /// Bounded wait before a non-terminal entry is locally expired.
    pub expiry_ms: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            max_entries: 10,
            fade_delay_ms: 3_000,
            expiry_ms: 45_000,
        }
    }
}

#[derive(Clone, Debug)]
struct LocalEntry {
    entry: QueueEntry,
    fading_since_ms: Option<u64>,
}

/// The client's local queue. Always subordinate to an authority snapshot.
#[derive(Clone, Debug)]
pub struct Reconciler {
    config: ReconcilerConfig,
    entries: Vec<LocalEntry>,
}

impl Reconciler {
    pub fn new(config: ReconcilerConfig) -> Self {
        Self {
            config,
            entries: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, client_id: ClientId) -> Option<&QueueEntry> {
        self.entries
            .iter()
            .find(|e| e.entry.client_id() == client_id)
            .map(|e| &e.entry)
    }

    /// Current projection in queue order, for the view layer.
    pub fn entries(&self) -> Vec<QueueEntry> {
        self.entries.iter().map(|e| e.entry.clone()).collect()
    }

    pub fn in_flight_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| !e.entry.is_terminal())
            .count()
    }

    /// Optimistically append a new Pending entry. The caller sends the
    /// request over the channel in the same breath.
    pub fn place(&mut self, request: SpinRequest) {
        self.entries.push(LocalEntry {
            entry: QueueEntry::new(request),
            fading_since_ms: None,
        });
    }

    /// Withdraw an entry whose request never left the client (send failed
    /// synchronously). Returns whether it existed.
    pub fn remove(&mut self, client_id: ClientId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.entry.client_id() != client_id);
        self.entries.len() != before
    }

    /// Apply a submission acknowledgment.
    pub fn on_submitted(
        &mut self,
        engine_id: EngineId,
        echo: Option<ClientId>,
        now_ms: u64,
    ) -> ReconcileResult {
        // FIFO first: the ack belongs to the oldest Pending entry without an
        // engine id.
        if let Some(local) = self
            .entries
            .iter_mut()
            .find(|e| e.entry.awaiting_acknowledgment())
        {
            local.entry.acknowledge(engine_id, now_ms);
            return ReconcileResult::Applied(local.entry.client_id());
        }
        // Fallback: the authority's client-id echo.
        if let Some(client_id) = echo {
            if let Some(local) = self
                .entries
                .iter_mut()
                .find(|e| e.entry.client_id() == client_id)
            {
                if local.entry.acknowledge(engine_id, now_ms) {
                    return ReconcileResult::Applied(client_id);
                }
                return ReconcileResult::Ignored(client_id);
            }
        }
        warn!(%engine_id, "submission ack matched no local entry");
        ReconcileResult::Miss
    }

    /// Apply a confirmed outcome. The outcome is sanitized against the
    /// entry's stake before it is stored: an uncorroborated jackpot claim
    /// never reaches the view layer.
    pub fn on_outcome(
        &mut self,
        engine_id: EngineId,
        outcome: Outcome,
        echo: Option<ClientId>,
        now_ms: u64,
    ) -> ReconcileResult {
        let index = self
            .entries
            .iter()
            .position(|e| e.entry.engine_id == Some(engine_id))
            .or_else(|| {
                // The submission ack may have been lost; fall back to the
                // client-id echo.
                echo.and_then(|client_id| {
                    self.entries
                        .iter()
                        .position(|e| e.entry.client_id() == client_id)
                })
            });
        let Some(index) = index else {
            warn!(%engine_id, "outcome matched no local entry");
            return ReconcileResult::Miss;
        };
        let local = &mut self.entries[index];
        let client_id = local.entry.client_id();
        if local.entry.is_terminal() {
            debug!(%client_id, %engine_id, "ignoring re-delivered outcome");
            return ReconcileResult::Ignored(client_id);
        }
        local.entry.assign_engine_id(engine_id);
        let sanitized = outcome.sanitize(&local.entry.request.stake);
        local.entry.complete(sanitized, now_ms);
        ReconcileResult::Applied(client_id)
    }

    /// Apply a host-reported failure carrying a client-id echo.
    pub fn on_error(&mut self, message: &str, echo: Option<ClientId>, now_ms: u64) -> ReconcileResult {
        let Some(client_id) = echo else {
            // Session-level error; no entry involved.
            return ReconcileResult::Miss;
        };
        let Some(local) = self
            .entries
            .iter_mut()
            .find(|e| e.entry.client_id() == client_id)
        else {
            warn!(%client_id, "error matched no local entry");
            return ReconcileResult::Miss;
        };
        if local.entry.fail(message, now_ms) {
            ReconcileResult::Applied(client_id)
        } else {
            debug!(%client_id, "ignoring error for terminal entry");
            ReconcileResult::Ignored(client_id)
        }
    }

    /// Replace the local queue with an authoritative snapshot. For entries
    /// present in both, the snapshot wins outright — including reviving a
    /// locally-expired entry the authority is still driving. Local entries
    /// absent from the snapshot are kept: a non-terminal one may still be in
    /// flight (the authority may also have compacted its history), and
    /// terminal ones are left to pruning.
    pub fn apply_snapshot(&mut self, snapshot: Vec<QueueEntry>, _now_ms: u64) {
        let mut rebuilt: Vec<LocalEntry> = Vec::with_capacity(snapshot.len());
        for mut entry in snapshot {
            if let Some(outcome) = entry.outcome.take() {
                entry.outcome = Some(outcome.sanitize(&entry.request.stake));
            }
            let fading_since_ms = self
                .entries
                .iter()
                .find(|e| e.entry.client_id() == entry.client_id())
                .and_then(|e| e.fading_since_ms)
                .filter(|_| entry.is_terminal());
            if let Some(local) = self
                .entries
                .iter()
                .find(|e| e.entry.client_id() == entry.client_id())
            {
                if local.entry.status != entry.status {
                    debug!(
                        client_id = %entry.client_id(),
                        local = ?local.entry.status,
                        authoritative = ?entry.status,
                        "snapshot overrides local status"
                    );
                }
            }
            rebuilt.push(LocalEntry {
                entry,
                fading_since_ms,
            });
        }
        for local in self.entries.drain(..) {
            if !rebuilt
                .iter()
                .any(|e| e.entry.client_id() == local.entry.client_id())
            {
                rebuilt.push(local);
            }
        }
        self.entries = rebuilt;
    }

    /// Locally expire entries whose bounded wait has passed. Returns the
    /// expired ids. Expiry is a UI decision only: it never releases funds
    /// (the ledger lives with the authority) and a snapshot may later revive
    /// the entry with its real state.
    pub fn expire_stale(&mut self, now_ms: u64) -> Vec<ClientId> {
        let deadline = self.config.expiry_ms;
        let mut expired = Vec::new();
        for local in &mut self.entries {
            if local.entry.is_terminal() {
                continue;
            }
            if now_ms.saturating_sub(local.entry.request.created_at_ms) >= deadline
                && local.entry.expire(now_ms)
            {
                debug!(client_id = %local.entry.client_id(), "entry expired locally");
                expired.push(local.entry.client_id());
            }
        }
        expired
    }

    /// Bound queue growth: once the queue reaches `max_entries`, mark the
    /// oldest terminal entries as fading, and drop entries whose fade delay
    /// has passed. Non-terminal entries are never pruned. Returns removed
    /// ids.
    pub fn prune(&mut self, now_ms: u64) -> Vec<ClientId> {
        // Start fading the oldest terminal entries while over the bound.
        let over = self
            .entries
            .iter()
            .filter(|e| e.fading_since_ms.is_none())
            .count()
            .saturating_sub(self.config.max_entries.saturating_sub(1));
        if over > 0 {
            let mut remaining = over;
            for local in &mut self.entries {
                if remaining == 0 {
                    break;
                }
                if local.entry.is_terminal() && local.fading_since_ms.is_none() {
                    local.fading_since_ms = Some(now_ms);
                    remaining -= 1;
                }
            }
        }

        // Drop entries that finished fading.
        let fade_delay = self.config.fade_delay_ms;
        let mut removed = Vec::new();
        self.entries.retain(|local| {
            let done = local
                .fading_since_ms
                .is_some_and(|since| now_ms.saturating_sub(since) >= fade_delay);
            if done {
                removed.push(local.entry.client_id());
            }
            !done
        });
        removed
    }
}
