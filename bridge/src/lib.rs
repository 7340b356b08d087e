//! Host authority for reelhouse.
//!
//! The bridge side of the channel holds the wallet signer and the chain
//! adapter, and is the source of truth for balance and outcomes. The game
//! surface never touches funds directly: it requests spins, and everything
//! that moves money happens here.

pub mod adapter;
pub mod authority;
pub mod engine;
pub mod events;
pub mod host;
pub mod ledger;
pub mod mocks;
pub mod queue;


pub use adapter::{AdapterError, ChainAdapter, SignedWager, WalletSigner};
pub use authority::Bridge;
pub use engine::{Engine, EngineState};
pub use events::{ErrorEvent, EventBus, OutcomeEvent, SubmissionEvent, Subscription};
pub use host::BridgeHost;
pub use ledger::BalanceLedger;
pub use queue::{MatchResult, SpinQueue};

use thiserror::Error;

/// Errors the authority reports to a caller before any funds move.
#[derive(Debug, Error)]
pub enum Error {
    #[error(
        "insufficient funds: stake {stake} exceeds available {available} \
         with {queued} spins already queued"
    )]
    InsufficientFunds {
        stake: u64,
        available: u64,
        queued: usize,
    },
    #[error("stake {stake} outside limits {min}..={max}")]
    StakeOutOfRange { stake: u64, min: u64, max: u64 },
    #[error("spin queue full: {queued} spins already queued (max {max})")]
    QueueFull { queued: usize, max: u32 },
    #[error("duplicate client id {0}")]
    DuplicateRequest(reelhouse_types::ClientId),
    #[error("invalid config: {0}")]
    InvalidConfig(#[from] reelhouse_types::api::ConfigError),
    #[error("chain adapter: {0}")]
    Adapter(#[from] AdapterError),
    #[error("bridge closed")]
    Closed,
}

/// Result type for authority operations.
pub type Result<T> = std::result::Result<T, Error>;
