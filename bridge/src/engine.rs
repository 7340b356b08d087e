//! Embedded-mode engine surface.
//!
//! When the game surface and the host share a context there is no channel:
//! the surface calls the engine directly and subscribes to typed events. The
//! engine also runs counted auto-spins; ticks are sequential within one task,
//! so an auto-spin can never overlap the submission of its predecessor.

use crate::authority::Bridge;
use crate::events::{ErrorEvent, OutcomeEvent, SubmissionEvent, Subscription};
use crate::{Error, Result};
use rand::Rng;
use reelhouse_types::api::{BalanceReport, GameConfig};
use reelhouse_types::{unix_ms, ClientId, CreditBalance, QueueEntry, SpinRequest, Stake, WagerMode};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Cadence of counted auto-spins.
pub const DEFAULT_AUTO_SPIN_INTERVAL: Duration = Duration::from_secs(2);

/// Everything the view layer needs to render the session.
#[derive(Clone, Debug, Serialize)]
pub struct EngineState {
    pub config: GameConfig,
    pub balance: BalanceReport,
    pub entries: Vec<QueueEntry>,
}

struct AutoSpinTask {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

struct EngineInner {
    bridge: Bridge,
    current: Mutex<(Stake, WagerMode)>,
    auto: Mutex<Option<AutoSpinTask>>,
    destroyed: AtomicBool,
}

/// Direct call surface over the bridge authority.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(bridge: Bridge) -> Self {
        let limits = bridge.config().limits;
        let stake = if bridge.config().ways_enabled {
            Stake::Ways {
                amount: limits.min_stake,
            }
        } else {
            Stake::Lines {
                lines: 1,
                per_line: limits.min_stake,
            }
        };
        Self {
            inner: Arc::new(EngineInner {
                bridge,
                current: Mutex::new((stake, WagerMode::PrimaryToken)),
                auto: Mutex::new(None),
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    /// Refresh the ledger from the chain and hand back the machine config.
    pub async fn initialize(&self) -> Result<GameConfig> {
        self.ensure_live()?;
        self.inner.bridge.refresh_balance().await;
        Ok(self.inner.bridge.config())
    }

    fn ensure_live(&self) -> Result<()> {
        if self.inner.destroyed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn fresh_client_id() -> ClientId {
        ClientId(rand::thread_rng().gen())
    }

    /// Submit one wager with the given stake and mode.
    pub fn spin(&self, stake: Stake, mode: WagerMode) -> Result<ClientId> {
        self.ensure_live()?;
        let changed = {
            let current = self.inner.current.lock().unwrap();
            current.0 != stake || current.1 != mode
        };
        if changed {
            // Changing the bet shape or mode cancels auto-continuation.
            self.stop_auto_spin();
            *self.inner.current.lock().unwrap() = (stake, mode);
        }
        let client_id = Self::fresh_client_id();
        let request = SpinRequest::new(client_id, stake, mode, unix_ms());
        self.inner.bridge.submit_spin(request)?;
        Ok(client_id)
    }

    /// Submit one wager at `stake` from the primary token balance.
    pub fn place_bet(&self, stake: Stake) -> Result<ClientId> {
        self.spin(stake, WagerMode::PrimaryToken)
    }

    pub fn get_balance(&self) -> BalanceReport {
        self.inner.bridge.balance()
    }

    pub async fn get_credits(&self) -> Result<CreditBalance> {
        self.inner.bridge.credits().await
    }

    pub fn get_state(&self) -> EngineState {
        EngineState {
            config: self.inner.bridge.config(),
            balance: self.inner.bridge.balance(),
            entries: self.inner.bridge.snapshot(),
        }
    }

    /// Start `count` auto-spins at the default cadence using the current
    /// stake and mode. No-op while a previous run is still live.
    pub fn start_auto_spin(&self, count: u32) -> Result<()> {
        self.start_auto_spin_with_interval(count, DEFAULT_AUTO_SPIN_INTERVAL)
    }

    pub fn start_auto_spin_with_interval(&self, count: u32, interval: Duration) -> Result<()> {
        self.ensure_live()?;
        let mut auto = self.inner.auto.lock().unwrap();
        if let Some(task) = auto.as_ref() {
            if !task.handle.is_finished() {
                debug!("auto-spin already running");
                return Ok(());
            }
        }

        let stop = Arc::new(AtomicBool::new(false));
        let inner = self.inner.clone();
        let stop_flag = stop.clone();
        info!(count, ?interval, "starting auto-spin");
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            for remaining in (0..count).rev() {
                ticker.tick().await;
                if stop_flag.load(Ordering::SeqCst) {
                    debug!(remaining, "auto-spin stopped");
                    return;
                }
                let (stake, mode) = *inner.current.lock().unwrap();
                let request =
                    SpinRequest::new(Self::fresh_client_id(), stake, mode, unix_ms());
                if let Err(err) = inner.bridge.submit_spin(request) {
                    warn!(error = %err, remaining, "auto-spin halted");
                    return;
                }
            }
        });
        *auto = Some(AutoSpinTask { stop, handle });
        Ok(())
    }

    /// Whether a counted auto-spin run is still live.
    pub fn is_auto_spinning(&self) -> bool {
        self.inner
            .auto
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    /// Stop auto-spinning. Only prevents future submissions; wagers already
    /// accepted keep running.
    pub fn stop_auto_spin(&self) {
        if let Some(task) = self.inner.auto.lock().unwrap().take() {
            task.stop.store(true, Ordering::SeqCst);
            task.handle.abort();
        }
    }

    /// Tear the engine down: stop timers and refuse every later call.
    /// Subscriptions close as their holders drop them.
    pub fn destroy(&self) {
        self.stop_auto_spin();
        self.inner.bridge.close();
        self.inner.destroyed.store(true, Ordering::SeqCst);
        info!("engine destroyed");
    }

    pub fn subscribe_submissions(&self) -> Subscription<SubmissionEvent> {
        self.inner.bridge.subscribe_submissions()
    }

    pub fn subscribe_outcomes(&self) -> Subscription<OutcomeEvent> {
        self.inner.bridge.subscribe_outcomes()
    }

    pub fn subscribe_balances(&self) -> Subscription<BalanceReport> {
        self.inner.bridge.subscribe_balances()
    }

    pub fn subscribe_errors(&self) -> Subscription<ErrorEvent> {
        self.inner.bridge.subscribe_errors()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{losing_outcome, winning_outcome, MockChain, MockSigner};
    use reelhouse_types::api::StakeLimits;
    use reelhouse_types::SpinStatus;
    use tokio::time::timeout;

    fn config() -> GameConfig {
        GameConfig {
            limits: StakeLimits {
                min_stake: 10,
                max_stake: 1_000,
                max_queued: 16,
            },
            rtp_basis_points: 9_650,
            ways_enabled: false,
            contract_id: 1,
        }
    }

    async fn engine_with(chain: &MockChain) -> Engine {
        let bridge = Bridge::connect(
            config(),
            Arc::new(chain.clone()),
            Arc::new(MockSigner::default()),
        )
        .await
        .unwrap();
        Engine::new(bridge)
    }

    async fn recv<T>(sub: &mut Subscription<T>) -> T {
        timeout(Duration::from_secs(5), sub.recv())
            .await
            .expect("timed out waiting for event")
            .expect("bus closed")
    }

    #[tokio::test]
    async fn test_place_bet_resolves() {
        let chain = MockChain::new(1_000);
        let engine = engine_with(&chain).await;
        engine.initialize().await.unwrap();
        let mut outcomes = engine.subscribe_outcomes();

        chain.script_outcome(winning_outcome(300));
        let client_id = engine
            .place_bet(Stake::Lines {
                lines: 10,
                per_line: 10,
            })
            .unwrap();

        let settled = recv(&mut outcomes).await;
        assert_eq!(settled.client_id, client_id);
        assert_eq!(settled.outcome.winnings, 300);

        let state = engine.get_state();
        assert_eq!(state.entries.len(), 1);
        assert_eq!(state.entries[0].status, SpinStatus::Completed);
    }

    #[tokio::test]
    async fn test_auto_spin_submits_exactly_count() {
        let chain = MockChain::new(10_000);
        let engine = engine_with(&chain).await;
        let mut outcomes = engine.subscribe_outcomes();

        for _ in 0..3 {
            chain.script_outcome(losing_outcome());
        }
        engine
            .start_auto_spin_with_interval(3, Duration::from_millis(10))
            .unwrap();

        for _ in 0..3 {
            recv(&mut outcomes).await;
        }
        // Give a would-be fourth tick time to fire if the bound were broken.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(chain.submitted().len(), 3);
        assert!(!engine.is_auto_spinning());
    }

    #[tokio::test]
    async fn test_auto_spin_start_is_idempotent() {
        let chain = MockChain::new(10_000);
        let engine = engine_with(&chain).await;
        let mut submissions = engine.subscribe_submissions();

        chain.script_outcome(losing_outcome());
        chain.script_outcome(losing_outcome());
        engine
            .start_auto_spin_with_interval(2, Duration::from_millis(20))
            .unwrap();
        // Second start while running: no extra run.
        engine
            .start_auto_spin_with_interval(2, Duration::from_millis(20))
            .unwrap();

        recv(&mut submissions).await;
        recv(&mut submissions).await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(chain.submitted().len(), 2);
    }

    #[tokio::test]
    async fn test_stop_auto_spin_prevents_future_submissions() {
        let chain = MockChain::new(100_000);
        let engine = engine_with(&chain).await;
        let mut submissions = engine.subscribe_submissions();

        engine
            .start_auto_spin_with_interval(1_000, Duration::from_millis(20))
            .unwrap();
        recv(&mut submissions).await;
        engine.stop_auto_spin();
        assert!(!engine.is_auto_spinning());

        let submitted = chain.submitted().len();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(chain.submitted().len(), submitted);
    }

    #[tokio::test]
    async fn test_auto_spin_halts_when_funds_run_out() {
        // Balance covers one minimum spin only; nothing resolves.
        let chain = MockChain::new(15);
        let engine = engine_with(&chain).await;
        let mut submissions = engine.subscribe_submissions();

        engine
            .start_auto_spin_with_interval(10, Duration::from_millis(10))
            .unwrap();
        recv(&mut submissions).await;

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(chain.submitted().len(), 1);
        assert!(!engine.is_auto_spinning());
    }

    #[tokio::test]
    async fn test_changing_stake_stops_auto_spin() {
        let chain = MockChain::new(100_000);
        let engine = engine_with(&chain).await;
        let mut submissions = engine.subscribe_submissions();

        engine
            .start_auto_spin_with_interval(1_000, Duration::from_millis(20))
            .unwrap();
        recv(&mut submissions).await;
        assert!(engine.is_auto_spinning());

        engine
            .spin(Stake::Ways { amount: 50 }, WagerMode::PrimaryToken)
            .unwrap();
        assert!(!engine.is_auto_spinning());
    }

    #[tokio::test]
    async fn test_destroy_refuses_everything() {
        let chain = MockChain::new(1_000);
        let engine = engine_with(&chain).await;
        engine.destroy();

        assert!(matches!(
            engine.place_bet(Stake::Ways { amount: 100 }).unwrap_err(),
            Error::Closed
        ));
        assert!(matches!(
            engine.start_auto_spin(5).unwrap_err(),
            Error::Closed
        ));
        assert!(matches!(
            engine.initialize().await.unwrap_err(),
            Error::Closed
        ));
    }
}
