//! Bonus-spin auto-continuation.
//!
//! While bonus spins remain and auto-mode is engaged, the scheduler submits
//! exactly one spin per tick. It keeps an optimistic local counter,
//! decremented on each submission, read-repaired from the authoritative
//! counter feed: when the feed reaches zero the scheduler stops within one
//! tick even if the local copy has not. An atomic in-flight guard keeps a
//! tick from overlapping a submission a prior tick is still driving.

use crate::session::SessionHandle;
use crate::Result;
use async_trait::async_trait;
use reelhouse_types::{ClientId, CreditBalance, Stake, WagerMode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Where the scheduler's spins go. The session handle is the production
/// submitter; tests substitute their own.
#[async_trait]
pub trait SpinSubmitter: Send + Sync + 'static {
    async fn submit(&self, stake: Stake) -> Result<ClientId>;
}

#[async_trait]
impl SpinSubmitter for SessionHandle {
    async fn submit(&self, stake: Stake) -> Result<ClientId> {
        self.spin(stake, WagerMode::BonusCredit)
    }
}

/// Cadence and stake for auto-continuation.
#[derive(Clone, Copy, Debug)]
pub struct AutoPlayConfig {
    pub interval: Duration,
    pub stake: Stake,
}

struct AutoInner<S> {
    submitter: S,
    credits: watch::Receiver<CreditBalance>,
    config: AutoPlayConfig,
    engaged: AtomicBool,
    in_flight: AtomicBool,
    /// Optimistic bonus-spin counter plus the authoritative value it was
    /// last repaired from.
    counters: Mutex<(u32, u32)>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<S> AutoInner<S> {
    /// Remaining spins after read-repair against the authoritative feed.
    ///
    /// Downward corrections always apply: if the authority reports fewer
    /// spins than the optimistic copy, the authority wins. Upward
    /// corrections apply only when the feed actually rises (a retrigger
    /// awarded more spins) — a refresh that merely lags behind the spins
    /// already submitted must not re-inflate the counter.
    fn remaining(&self) -> u32 {
        let authoritative = self.credits.borrow().bonus_spins;
        let mut counters = self.counters.lock().unwrap();
        let (ref mut optimistic, ref mut last_seen) = *counters;
        if authoritative > *last_seen || authoritative < *optimistic {
            debug!(
                optimistic = *optimistic,
                authoritative, "correcting bonus-spin counter from authority"
            );
            *optimistic = authoritative;
        }
        *last_seen = authoritative;
        *optimistic
    }

    fn note_submission(&self) {
        let mut counters = self.counters.lock().unwrap();
        counters.0 = counters.0.saturating_sub(1);
    }
}

/// The auto-continuation scheduler.
pub struct AutoPlay<S> {
    inner: Arc<AutoInner<S>>,
}

impl<S: SpinSubmitter> AutoPlay<S> {
    /// `credits` is the session's authoritative credit feed (see
    /// [`SessionHandle::watch_credits`]).
    pub fn new(submitter: S, credits: watch::Receiver<CreditBalance>, config: AutoPlayConfig) -> Self {
        let bonus_spins = credits.borrow().bonus_spins;
        Self {
            inner: Arc::new(AutoInner {
                submitter,
                credits,
                config,
                engaged: AtomicBool::new(false),
                in_flight: AtomicBool::new(false),
                counters: Mutex::new((bonus_spins, bonus_spins)),
                task: Mutex::new(None),
            }),
        }
    }

    /// Engage auto-mode. Idempotent: a second start while running is a
    /// no-op.
    pub fn start(&self) {
        self.inner.engaged.store(true, Ordering::SeqCst);
        let mut task = self.inner.task.lock().unwrap();
        if let Some(handle) = task.as_ref() {
            if !handle.is_finished() {
                debug!("auto-continuation already running");
                return;
            }
        }
        info!(
            interval = ?self.inner.config.interval,
            remaining = self.inner.remaining(),
            "auto-continuation engaged"
        );
        let inner = self.inner.clone();
        *task = Some(tokio::spawn(run_ticks(inner)));
    }

    /// Disengage auto-mode and stop the tick loop. Only future submissions
    /// are prevented; anything already submitted keeps running. Call this on
    /// any user action that changes stake or mode.
    pub fn stop(&self) {
        self.inner.engaged.store(false, Ordering::SeqCst);
        if let Some(handle) = self.inner.task.lock().unwrap().take() {
            handle.abort();
        }
        debug!("auto-continuation disengaged");
    }

    pub fn is_running(&self) -> bool {
        self.inner.engaged.load(Ordering::SeqCst)
            && self
                .inner
                .task
                .lock()
                .unwrap()
                .as_ref()
                .is_some_and(|handle| !handle.is_finished())
    }
}

async fn run_ticks<S: SpinSubmitter>(inner: Arc<AutoInner<S>>) {
    let mut ticker = tokio::time::interval(inner.config.interval);
    loop {
        ticker.tick().await;
        // Re-check the precondition every tick; the authoritative counter
        // governs.
        if !inner.engaged.load(Ordering::SeqCst) {
            return;
        }
        if inner.remaining() == 0 {
            info!("bonus spins exhausted; auto-continuation stopping");
            inner.engaged.store(false, Ordering::SeqCst);
            return;
        }
        // A prior tick's submission is still being driven: skip, don't
        // overlap.
        if inner.in_flight.swap(true, Ordering::SeqCst) {
            debug!("tick skipped; submission still in flight");
            continue;
        }
        let inner = inner.clone();
        tokio::spawn(async move {
            let result = inner.submitter.submit(inner.config.stake).await;
            match result {
                Ok(client_id) => {
                    debug!(%client_id, "auto-continuation spin submitted");
                    inner.note_submission();
                }
                Err(err) => {
                    warn!(error = %err, "auto-continuation halted");
                    inner.engaged.store(false, Ordering::SeqCst);
                }
            }
            inner.in_flight.store(false, Ordering::SeqCst);
        });
    }
}
