//! The bridge authority: accepts spin requests, drives chain submission, and
//! publishes the events both client modes consume.
//!
//! All funds movement is guarded by one lock over the ledger and the queue,
//! so the reserved amount always equals the sum of non-terminal stakes.
//! Submission sends go through a single worker so the network accepts wagers
//! in request order (the FIFO acknowledgment rule depends on it); each
//! confirmation wait then runs as its own task, because confirmations may
//! land in any order. No lock is held across an await.

use crate::adapter::{ChainAdapter, SignedWager, WalletSigner};
use crate::events::{ErrorEvent, EventBus, OutcomeEvent, SubmissionEvent, Subscription};
use crate::ledger::BalanceLedger;
use crate::queue::{MatchResult, SpinQueue};
use crate::{Error, Result};
use commonware_codec::Encode;
use reelhouse_types::api::{BalanceReport, GameConfig};
use reelhouse_types::{unix_ms, ClientId, CreditBalance, EngineId, Outcome, QueueEntry, SpinRequest};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

struct Accounts {
    ledger: BalanceLedger,
    queue: SpinQueue,
}

struct Inner {
    config: GameConfig,
    adapter: Arc<dyn ChainAdapter>,
    signer: Arc<dyn WalletSigner>,
    accounts: Mutex<Accounts>,
    submissions: EventBus<SubmissionEvent>,
    outcomes: EventBus<OutcomeEvent>,
    balances: EventBus<BalanceReport>,
    errors: EventBus<ErrorEvent>,
    closed: AtomicBool,
}

impl Inner {
    fn balance_report(accounts: &Accounts) -> BalanceReport {
        BalanceReport {
            confirmed: accounts.ledger.confirmed(),
            available: accounts.ledger.available(),
        }
    }

    /// Fail an entry the network never acknowledged.
    fn fail_client(&self, client_id: ClientId, message: &str) {
        let now_ms = unix_ms();
        let (result, report) = {
            let mut accounts = self.accounts.lock().unwrap();
            let result = accounts.queue.fail_by_client(client_id, message, now_ms);
            if let MatchResult::Applied { stake, .. } = result {
                accounts.ledger.release(stake);
                accounts.queue.compact();
            }
            (result, Self::balance_report(&accounts))
        };
        match result {
            MatchResult::Applied { .. } => {
                warn!(%client_id, message, "spin failed before acknowledgment");
                self.errors.emit(ErrorEvent {
                    client_id: Some(client_id),
                    message: message.to_owned(),
                });
                self.balances.emit(report);
            }
            MatchResult::AlreadyTerminal { .. } => {
                debug!(%client_id, "ignoring failure for terminal entry");
            }
            MatchResult::NoMatch => {
                warn!(%client_id, "failure matched no entry");
            }
        }
    }

    /// Fail an entry by its engine id.
    fn fail_engine(&self, engine_id: EngineId, message: &str) {
        let now_ms = unix_ms();
        let (result, report) = {
            let mut accounts = self.accounts.lock().unwrap();
            let result = accounts.queue.fail_by_engine(engine_id, message, now_ms);
            if let MatchResult::Applied { stake, .. } = result {
                accounts.ledger.release(stake);
                accounts.queue.compact();
            }
            (result, Self::balance_report(&accounts))
        };
        match result {
            MatchResult::Applied { client_id, .. } => {
                warn!(%client_id, %engine_id, message, "spin failed");
                self.errors.emit(ErrorEvent {
                    client_id: Some(client_id),
                    message: message.to_owned(),
                });
                self.balances.emit(report);
            }
            MatchResult::AlreadyTerminal { client_id } => {
                debug!(%client_id, %engine_id, "ignoring failure for terminal entry");
            }
            MatchResult::NoMatch => {
                warn!(%engine_id, "failure matched no entry");
            }
        }
    }

    /// Record a confirmed outcome, release its reservation, and refresh the
    /// ledger from the chain.
    async fn settle_outcome(&self, engine_id: EngineId, outcome: Outcome) {
        let now_ms = unix_ms();
        let result = {
            let mut accounts = self.accounts.lock().unwrap();
            let result = accounts.queue.complete(engine_id, outcome.clone(), now_ms);
            if let MatchResult::Applied { stake, .. } = result {
                accounts.ledger.release(stake);
                accounts.queue.compact();
            }
            result
        };
        match result {
            MatchResult::Applied { client_id, .. } => {
                info!(
                    %client_id,
                    %engine_id,
                    winnings = outcome.winnings,
                    win_level = ?outcome.win_level,
                    jackpot = outcome.jackpot_hit,
                    "spin completed"
                );
                self.outcomes.emit(OutcomeEvent {
                    client_id,
                    engine_id,
                    outcome,
                });
                // The confirmed balance comes from the chain, never derived
                // from the outcome alone.
                self.refresh_balance().await;
            }
            MatchResult::AlreadyTerminal { client_id } => {
                debug!(%client_id, %engine_id, "ignoring re-delivered outcome");
            }
            MatchResult::NoMatch => {
                warn!(%engine_id, "outcome matched no entry");
            }
        }
    }

    async fn refresh_balance(&self) {
        match self.adapter.fetch_balance().await {
            Ok(amount) => {
                let report = {
                    let mut accounts = self.accounts.lock().unwrap();
                    accounts.ledger.set_confirmed(amount);
                    Self::balance_report(&accounts)
                };
                self.balances.emit(report);
            }
            Err(err) => {
                warn!(error = %err, "balance refresh failed; clients will re-poll");
            }
        }
    }
}

/// Handle to the host authority. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<Inner>,
    submit_tx: mpsc::UnboundedSender<SpinRequest>,
}

impl Bridge {
    /// Validate the machine config, read the opening balance from the chain,
    /// and start the submission worker. Must be called within a tokio
    /// runtime.
    pub async fn connect(
        config: GameConfig,
        adapter: Arc<dyn ChainAdapter>,
        signer: Arc<dyn WalletSigner>,
    ) -> Result<Self> {
        config.validate()?;
        let confirmed = adapter.fetch_balance().await?;
        info!(
            confirmed,
            contract_id = config.contract_id,
            wallet = %signer.address(),
            "bridge connected"
        );
        let inner = Arc::new(Inner {
            config,
            adapter,
            signer,
            accounts: Mutex::new(Accounts {
                ledger: BalanceLedger::new(confirmed),
                queue: SpinQueue::new(),
            }),
            submissions: EventBus::new(),
            outcomes: EventBus::new(),
            balances: EventBus::new(),
            errors: EventBus::new(),
            closed: AtomicBool::new(false),
        });
        let (submit_tx, submit_rx) = mpsc::unbounded_channel();
        tokio::spawn(submission_worker(inner.clone(), submit_rx));
        Ok(Self { inner, submit_tx })
    }

    pub fn config(&self) -> GameConfig {
        self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Stop accepting new spins. Wagers already handed to the chain keep
    /// running to completion; there is no mid-flight cancellation.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
    }

    /// Accept a wager: validate it against the limits and the spendable
    /// balance (counting every queued spin), reserve the stake, and hand it
    /// to the submission worker.
    pub fn submit_spin(&self, request: SpinRequest) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let stake = request.stake.total();
        let limits = self.inner.config.limits;
        if stake < limits.min_stake || stake > limits.max_stake {
            return Err(Error::StakeOutOfRange {
                stake,
                min: limits.min_stake,
                max: limits.max_stake,
            });
        }

        let report = {
            let mut accounts = self.inner.accounts.lock().unwrap();
            if accounts.queue.get(request.client_id).is_some() {
                return Err(Error::DuplicateRequest(request.client_id));
            }
            let queued = accounts.queue.non_terminal_count();
            if queued >= limits.max_queued as usize {
                return Err(Error::QueueFull {
                    queued,
                    max: limits.max_queued,
                });
            }
            accounts
                .ledger
                .reserve(stake)
                .map_err(|err| Error::InsufficientFunds {
                    stake,
                    available: err.available,
                    queued,
                })?;
            accounts.queue.push(request);
            Inner::balance_report(&accounts)
        };

        info!(client_id = %request.client_id, stake, mode = ?request.mode, "spin accepted");
        self.inner.balances.emit(report);
        self.submit_tx.send(request).map_err(|_| Error::Closed)?;
        Ok(())
    }

    /// Ledger view: confirmed and spendable balance.
    pub fn balance(&self) -> BalanceReport {
        let accounts = self.inner.accounts.lock().unwrap();
        Inner::balance_report(&accounts)
    }

    /// Authoritative credit balances, fetched from the chain.
    pub async fn credits(&self) -> Result<CreditBalance> {
        Ok(self.inner.adapter.fetch_credits().await?)
    }

    /// Re-read the confirmed balance from the chain and publish it.
    pub async fn refresh_balance(&self) -> BalanceReport {
        self.inner.refresh_balance().await;
        self.balance()
    }

    /// Full authoritative queue for client reconciliation.
    pub fn snapshot(&self) -> Vec<QueueEntry> {
        self.inner.accounts.lock().unwrap().queue.snapshot()
    }

    pub fn subscribe_submissions(&self) -> Subscription<SubmissionEvent> {
        self.inner.submissions.subscribe()
    }

    pub fn subscribe_outcomes(&self) -> Subscription<OutcomeEvent> {
        self.inner.outcomes.subscribe()
    }

    pub fn subscribe_balances(&self) -> Subscription<BalanceReport> {
        self.inner.balances.subscribe()
    }

    pub fn subscribe_errors(&self) -> Subscription<ErrorEvent> {
        self.inner.errors.subscribe()
    }
}

/// Sign and submit accepted wagers strictly in acceptance order, spawning a
/// confirmation wait per acknowledged wager. Exits once every Bridge handle
/// is gone.
async fn submission_worker(inner: Arc<Inner>, mut requests: mpsc::UnboundedReceiver<SpinRequest>) {
    while let Some(request) = requests.recv().await {
        let payload = request.encode().to_vec();
        let signed = match inner.signer.sign(&payload).await {
            Ok(signature) => SignedWager {
                payload,
                signature,
                signer: inner.signer.address(),
            },
            Err(err) => {
                inner.fail_client(request.client_id, &err.to_string());
                continue;
            }
        };

        let engine_id = match inner.adapter.submit_wager(signed).await {
            Ok(id) => id,
            Err(err) => {
                inner.fail_client(request.client_id, &err.to_string());
                continue;
            }
        };

        // Sends are serialized, so this acceptance belongs to the oldest
        // Pending entry without an id.
        let acknowledged = {
            let mut accounts = inner.accounts.lock().unwrap();
            accounts.queue.acknowledge_next(engine_id, unix_ms())
        };
        match acknowledged {
            MatchResult::Applied { client_id, .. } => {
                debug!(%client_id, %engine_id, "wager accepted by network");
                inner.submissions.emit(SubmissionEvent {
                    client_id,
                    engine_id,
                });
            }
            _ => warn!(%engine_id, "acceptance matched no pending entry"),
        }

        let inner = inner.clone();
        tokio::spawn(async move {
            match inner.adapter.await_outcome(engine_id).await {
                Ok(outcome) => inner.settle_outcome(engine_id, outcome).await,
                Err(err) => inner.fail_engine(engine_id, &err.to_string()),
            }
        });
    }
    debug!("submission worker stopped");
}
