//! Test doubles for the chain/wallet boundary.
//!
//! [`MockChain`] models the machine contract: it accepts signed wagers in
//! call order, assigns sequential engine ids, and confirms each wager either
//! from a scripted queue or when the test resolves it explicitly — which is
//! how tests drive out-of-order confirmations.

use crate::adapter::{AdapterError, ChainAdapter, SignedWager, WalletSigner};
use async_trait::async_trait;
use commonware_codec::ReadExt;
use reelhouse_types::{
    CreditBalance, EngineId, Grid, Outcome, SpinRequest, Symbol, WagerMode, WinBreakdown,
    WinLevel,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// An outcome that pays nothing.
pub fn losing_outcome() -> Outcome {
    Outcome {
        grid: Grid::filled(5, 3, Symbol::Lemon),
        winnings: 0,
        win_level: WinLevel::None,
        wins: WinBreakdown::Lines(vec![]),
        bonus_spins_awarded: 0,
        jackpot_hit: false,
        jackpot_amount: 0,
    }
}

/// An outcome paying `winnings` against a 100-unit stake.
pub fn winning_outcome(winnings: u64) -> Outcome {
    Outcome {
        grid: Grid::filled(5, 3, Symbol::Seven),
        winnings,
        win_level: WinLevel::from_payout(winnings, 100, false),
        wins: WinBreakdown::Lines(vec![]),
        bonus_spins_awarded: 0,
        jackpot_hit: false,
        jackpot_amount: 0,
    }
}

/// A losing outcome that awards `spins` bonus spins.
pub fn bonus_outcome(spins: u32) -> Outcome {
    Outcome {
        grid: Grid::filled(5, 3, Symbol::Scatter),
        winnings: 0,
        win_level: WinLevel::None,
        wins: WinBreakdown::Lines(vec![]),
        bonus_spins_awarded: spins,
        jackpot_hit: false,
        jackpot_amount: 0,
    }
}

/// A grid-backed jackpot outcome paying `amount`.
pub fn jackpot_outcome(amount: u64) -> Outcome {
    Outcome {
        grid: Grid::filled(5, 3, Symbol::Jackpot),
        winnings: amount,
        win_level: WinLevel::Jackpot,
        wins: WinBreakdown::Lines(vec![]),
        bonus_spins_awarded: 0,
        jackpot_hit: true,
        jackpot_amount: amount,
    }
}

struct ChainState {
    next_engine_id: u64,
    balance: u64,
    credits: CreditBalance,
    wagers: HashMap<EngineId, SpinRequest>,
    submitted: Vec<EngineId>,
    scripted: VecDeque<Result<Outcome, AdapterError>>,
    rejections: VecDeque<AdapterError>,
    ready: HashMap<EngineId, Result<Outcome, AdapterError>>,
    waiting: HashMap<EngineId, oneshot::Sender<Result<Outcome, AdapterError>>>,
}

impl ChainState {
    /// Apply the funds movement of a confirmed wager.
    fn settle(&mut self, id: EngineId, result: &Result<Outcome, AdapterError>) {
        let Ok(outcome) = result else {
            return; // a rejected transaction moves no funds
        };
        let Some(request) = self.wagers.get(&id) else {
            return;
        };
        let stake = request.stake.total();
        match request.mode {
            WagerMode::PrimaryToken | WagerMode::SecondaryToken => {
                self.balance = self.balance.saturating_sub(stake);
                self.balance = self.balance.saturating_add(outcome.winnings);
            }
            WagerMode::FreeCredit => {
                self.credits.credits = self.credits.credits.saturating_sub(stake);
                self.balance = self.balance.saturating_add(outcome.winnings);
            }
            WagerMode::BonusCredit => {
                self.credits.bonus_spins = self.credits.bonus_spins.saturating_sub(1);
                self.balance = self.balance.saturating_add(outcome.winnings);
            }
        }
        self.credits.bonus_spins = self
            .credits
            .bonus_spins
            .saturating_add(outcome.bonus_spins_awarded);
    }

    /// Consume a result already available for `id`, settling it.
    fn take_ready(&mut self, id: EngineId) -> Option<Result<Outcome, AdapterError>> {
        let result = self
            .ready
            .remove(&id)
            .or_else(|| self.scripted.pop_front())?;
        self.settle(id, &result);
        Some(result)
    }
}

/// In-memory machine contract.
#[derive(Clone)]
pub struct MockChain {
    state: Arc<Mutex<ChainState>>,
}

impl MockChain {
    pub fn new(balance: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(ChainState {
                next_engine_id: 1,
                balance,
                credits: CreditBalance::default(),
                wagers: HashMap::new(),
                submitted: Vec::new(),
                scripted: VecDeque::new(),
                rejections: VecDeque::new(),
                ready: HashMap::new(),
                waiting: HashMap::new(),
            })),
        }
    }

    pub fn with_credits(self, credits: CreditBalance) -> Self {
        self.state.lock().unwrap().credits = credits;
        self
    }

    /// Queue an outcome consumed by the next unresolved confirmation wait.
    pub fn script_outcome(&self, outcome: Outcome) {
        self.state.lock().unwrap().scripted.push_back(Ok(outcome));
    }

    /// Queue a confirmation failure.
    pub fn script_failure(&self, error: AdapterError) {
        self.state.lock().unwrap().scripted.push_back(Err(error));
    }

    /// Make the next `submit_wager` call fail.
    pub fn reject_next_submission(&self, error: AdapterError) {
        self.state.lock().unwrap().rejections.push_back(error);
    }

    /// Resolve a specific wager, waking its waiter if one is parked. Lets
    /// tests confirm wagers out of submission order.
    pub fn resolve(&self, id: EngineId, result: Result<Outcome, AdapterError>) {
        let mut state = self.state.lock().unwrap();
        if let Some(sender) = state.waiting.remove(&id) {
            state.settle(id, &result);
            let _ = sender.send(result);
        } else {
            state.ready.insert(id, result);
        }
    }

    /// Engine ids in submission order.
    pub fn submitted(&self) -> Vec<EngineId> {
        self.state.lock().unwrap().submitted.clone()
    }

    pub fn wager(&self, id: EngineId) -> Option<SpinRequest> {
        self.state.lock().unwrap().wagers.get(&id).copied()
    }

    pub fn balance(&self) -> u64 {
        self.state.lock().unwrap().balance
    }

    pub fn set_credits(&self, credits: CreditBalance) {
        self.state.lock().unwrap().credits = credits;
    }
}

#[async_trait]
impl ChainAdapter for MockChain {
    async fn submit_wager(&self, wager: SignedWager) -> Result<EngineId, AdapterError> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.rejections.pop_front() {
            return Err(error);
        }
        if wager.signature.is_empty() {
            return Err(AdapterError::Rejected("unsigned wager".into()));
        }
        let request = SpinRequest::read(&mut wager.payload.as_slice())
            .map_err(|_| AdapterError::Rejected("malformed wager payload".into()))?;
        let id = EngineId(state.next_engine_id);
        state.next_engine_id += 1;
        state.wagers.insert(id, request);
        state.submitted.push(id);
        Ok(id)
    }

    async fn await_outcome(&self, id: EngineId) -> Result<Outcome, AdapterError> {
        let receiver = {
            let mut state = self.state.lock().unwrap();
            if !state.wagers.contains_key(&id) {
                return Err(AdapterError::Rpc(format!("unknown wager {id}")));
            }
            if let Some(result) = state.take_ready(id) {
                return result;
            }
            let (tx, rx) = oneshot::channel();
            state.waiting.insert(id, tx);
            rx
        };
        receiver.await.unwrap_or(Err(AdapterError::Timeout))
    }

    async fn fetch_balance(&self) -> Result<u64, AdapterError> {
        Ok(self.state.lock().unwrap().balance)
    }

    async fn fetch_credits(&self) -> Result<CreditBalance, AdapterError> {
        Ok(self.state.lock().unwrap().credits)
    }
}

/// Signer with an in-memory key. Never refuses.
pub struct MockSigner {
    address: String,
}

impl MockSigner {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

impl Default for MockSigner {
    fn default() -> Self {
        Self::new("mock-wallet")
    }
}

#[async_trait]
impl WalletSigner for MockSigner {
    fn address(&self) -> String {
        self.address.clone()
    }

    async fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, AdapterError> {
        // A recognizable, deterministic pseudo-signature.
        let mut signature = vec![0x5a; 8];
        signature.extend_from_slice(&(payload.len() as u64).to_be_bytes());
        Ok(signature)
    }
}
