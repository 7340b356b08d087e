//! The sandboxed client's session loop.
//!
//! One task owns the channel end and the clock: it dispatches host frames
//! into the reconciler, publishes balances and config over watch channels,
//! fans session events out over a broadcast channel, polls snapshots on a
//! cadence, and runs expiry/pruning maintenance. After every terminal entry
//! it re-polls balance and credits unconditionally — read-repair is
//! mandatory, not best-effort, so divergence time stays bounded.

use crate::reconciler::{ReconcileResult, Reconciler, ReconcilerConfig};
use crate::{Error, Result};
use rand::Rng;
use reelhouse_types::api::{BalanceReport, GameConfig};
use reelhouse_types::{
    unix_ms, ChannelEnd, ChannelSender, ClientId, CreditBalance, EngineId, Envelope, Message,
    Outcome, QueueEntry, SpinRequest, Stake, WagerMode,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

/// Broadcast depth for session events; a lagging UI drops the oldest.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Cadences for the session loop.
#[derive(Clone, Copy, Debug)]
pub struct SessionConfig {
    /// How often to request a full authoritative snapshot.
    pub snapshot_interval: Duration,
    /// How often to run local expiry and pruning.
    pub maintenance_interval: Duration,
    pub reconciler: ReconcilerConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            snapshot_interval: Duration::from_secs(10),
            maintenance_interval: Duration::from_secs(1),
            reconciler: ReconcilerConfig::default(),
        }
    }
}

/// What happened in the session, for the view layer.
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    Submitted {
        client_id: ClientId,
        engine_id: EngineId,
    },
    /// Outcome already sanitized against the entry's stake.
    Settled {
        client_id: ClientId,
        outcome: Outcome,
    },
    SpinFailed {
        client_id: ClientId,
        message: String,
    },
    /// Local bounded-wait expiry; funds are untouched and a snapshot may
    /// still revive the entry.
    Expired { client_id: ClientId },
    /// A fault affecting the whole session, not one entry.
    SessionError { message: String },
}

struct Shared {
    sender: ChannelSender,
    reconciler: Mutex<Reconciler>,
    balance: watch::Sender<BalanceReport>,
    credits: watch::Sender<CreditBalance>,
    game_config: watch::Sender<Option<GameConfig>>,
    events: broadcast::Sender<SessionEvent>,
}

impl Shared {
    fn emit(&self, event: SessionEvent) {
        // No receivers is fine; events are best-effort UI signals.
        let _ = self.events.send(event);
    }

    /// Mandatory read-repair after a terminal entry: balance and credit
    /// truth always comes back from the authority.
    fn read_repair(&self) {
        let _ = self.sender.send(Message::GetBalance, None);
        let _ = self.sender.send(Message::GetCreditBalance, None);
    }

    fn request_snapshot(&self) {
        let _ = self.sender.send(Message::GetSpinQueue, None);
    }
}

/// Cloneable handle the view layer drives the session with.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    /// Optimistically queue a wager and send the request. The local entry
    /// appears immediately; the authority's messages move it along.
    pub fn spin(&self, stake: Stake, mode: WagerMode) -> Result<ClientId> {
        let client_id = ClientId(rand::thread_rng().gen());
        let request = SpinRequest::new(client_id, stake, mode, unix_ms());
        {
            let mut reconciler = self.shared.reconciler.lock().unwrap();
            reconciler.place(request);
        }
        if let Err(err) = self
            .shared
            .sender
            .send(Message::SpinRequest(request), None)
        {
            // The request never left; withdraw the optimistic entry.
            self.shared.reconciler.lock().unwrap().remove(client_id);
            return Err(Error::Channel(err));
        }
        debug!(%client_id, stake = stake.total(), ?mode, "spin queued");
        Ok(client_id)
    }

    pub fn balance(&self) -> BalanceReport {
        *self.shared.balance.borrow()
    }

    pub fn watch_balance(&self) -> watch::Receiver<BalanceReport> {
        self.shared.balance.subscribe()
    }

    pub fn credits(&self) -> CreditBalance {
        *self.shared.credits.borrow()
    }

    pub fn watch_credits(&self) -> watch::Receiver<CreditBalance> {
        self.shared.credits.subscribe()
    }

    pub fn game_config(&self) -> Option<GameConfig> {
        *self.shared.game_config.borrow()
    }

    /// Local queue projection, in order.
    pub fn queue(&self) -> Vec<QueueEntry> {
        self.shared.reconciler.lock().unwrap().entries()
    }

    pub fn in_flight_count(&self) -> usize {
        self.shared.reconciler.lock().unwrap().in_flight_count()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    pub fn request_snapshot(&self) {
        self.shared.request_snapshot();
    }

    pub fn request_balance(&self) {
        let _ = self.shared.sender.send(Message::GetBalance, None);
        let _ = self.shared.sender.send(Message::GetCreditBalance, None);
    }

    /// Tell the host the session is over.
    pub fn exit(&self) -> Result<()> {
        self.shared.sender.send(Message::Exit, None)?;
        Ok(())
    }
}

/// The session loop. Construct with [`Session::new`], then spawn `run`.
pub struct Session {
    channel: ChannelEnd,
    shared: Arc<Shared>,
    config: SessionConfig,
}

impl Session {
    pub fn new(channel: ChannelEnd, config: SessionConfig) -> (Self, SessionHandle) {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let shared = Arc::new(Shared {
            sender: channel.sender(),
            reconciler: Mutex::new(Reconciler::new(config.reconciler)),
            balance: watch::Sender::new(BalanceReport {
                confirmed: 0,
                available: 0,
            }),
            credits: watch::Sender::new(CreditBalance::default()),
            game_config: watch::Sender::new(None),
            events,
        });
        let handle = SessionHandle {
            shared: shared.clone(),
        };
        (
            Self {
                channel,
                shared,
                config,
            },
            handle,
        )
    }

    /// Serve the session until the host goes away.
    pub async fn run(mut self) {
        if self.shared.sender.send(Message::Init, None).is_err() {
            self.shared.emit(SessionEvent::SessionError {
                message: "host unreachable".into(),
            });
            return;
        }
        let mut snapshot_timer = tokio::time::interval(self.config.snapshot_interval);
        let mut maintenance_timer = tokio::time::interval(self.config.maintenance_interval);

        enum Tick {
            Frame(Box<Envelope>),
            HostGone,
            Snapshot,
            Maintain,
        }

        loop {
            // Select arms only classify the wakeup; the work happens below,
            // outside the borrow of the recv future.
            let tick = tokio::select! {
                maybe = self.channel.recv() => match maybe {
                    Some(envelope) => Tick::Frame(Box::new(envelope)),
                    None => Tick::HostGone,
                },
                _ = snapshot_timer.tick() => Tick::Snapshot,
                _ = maintenance_timer.tick() => Tick::Maintain,
            };
            match tick {
                Tick::Frame(envelope) => self.dispatch(*envelope),
                Tick::HostGone => {
                    warn!("host dropped its channel end");
                    self.shared.emit(SessionEvent::SessionError {
                        message: "host disconnected".into(),
                    });
                    break;
                }
                Tick::Snapshot => self.shared.request_snapshot(),
                Tick::Maintain => self.maintenance(),
            }
        }
        info!("session ended");
    }

    fn dispatch(&self, envelope: Envelope) {
        let now_ms = unix_ms();
        let echo = envelope.request_id;
        match envelope.message {
            Message::Config(config) => {
                debug!(contract_id = config.contract_id, "received machine config");
                self.shared.game_config.send_replace(Some(config));
            }
            Message::BalanceUpdate(report) => {
                self.shared.balance.send_replace(report);
            }
            Message::CreditBalance(credits) => {
                self.shared.credits.send_replace(credits);
            }
            Message::SpinSubmitted { id } => {
                let result = {
                    let mut reconciler = self.shared.reconciler.lock().unwrap();
                    reconciler.on_submitted(id, echo, now_ms)
                };
                match result {
                    ReconcileResult::Applied(client_id) => {
                        self.shared.emit(SessionEvent::Submitted {
                            client_id,
                            engine_id: id,
                        });
                    }
                    ReconcileResult::Ignored(_) => {}
                    ReconcileResult::Miss => self.shared.request_snapshot(),
                }
            }
            Message::SpinOutcome { id, outcome } => {
                let (result, stored) = {
                    let mut reconciler = self.shared.reconciler.lock().unwrap();
                    let result = reconciler.on_outcome(id, outcome, echo, now_ms);
                    let stored = match result {
                        ReconcileResult::Applied(client_id) => reconciler
                            .entry(client_id)
                            .and_then(|entry| entry.outcome.clone()),
                        _ => None,
                    };
                    (result, stored)
                };
                match (result, stored) {
                    (ReconcileResult::Applied(client_id), Some(outcome)) => {
                        self.shared.emit(SessionEvent::Settled { client_id, outcome });
                        self.shared.read_repair();
                    }
                    (ReconcileResult::Miss, _) => self.shared.request_snapshot(),
                    _ => {}
                }
            }
            Message::SpinQueue { entries } => {
                let mut reconciler = self.shared.reconciler.lock().unwrap();
                reconciler.apply_snapshot(entries, now_ms);
                let removed = reconciler.prune(now_ms);
                if !removed.is_empty() {
                    debug!(count = removed.len(), "pruned faded entries");
                }
            }
            Message::Error { message } => {
                let result = {
                    let mut reconciler = self.shared.reconciler.lock().unwrap();
                    reconciler.on_error(&message, echo, now_ms)
                };
                match result {
                    ReconcileResult::Applied(client_id) => {
                        self.shared
                            .emit(SessionEvent::SpinFailed { client_id, message });
                        self.shared.read_repair();
                    }
                    ReconcileResult::Ignored(_) => {}
                    ReconcileResult::Miss if echo.is_none() => {
                        self.shared.emit(SessionEvent::SessionError { message });
                    }
                    ReconcileResult::Miss => self.shared.request_snapshot(),
                }
            }
            other => {
                warn!(kind = other.kind(), "ignoring message with client-bound kind");
            }
        }
    }

    fn maintenance(&self) {
        let now_ms = unix_ms();
        let (expired, removed) = {
            let mut reconciler = self.shared.reconciler.lock().unwrap();
            (reconciler.expire_stale(now_ms), reconciler.prune(now_ms))
        };
        for client_id in expired {
            self.shared.emit(SessionEvent::Expired { client_id });
        }
        if !removed.is_empty() {
            debug!(count = removed.len(), "pruned faded entries");
        }
    }
}
