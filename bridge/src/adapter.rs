//! External interfaces: the chain adapter and the wallet signer.
//!
//! Key custody, transaction signing, and the RPC layer live outside this
//! workspace; the bridge only ever sees them through these traits. A real
//! deployment maps its transaction hashes into the [`EngineId`] space at this
//! boundary.

use async_trait::async_trait;
use reelhouse_types::{CreditBalance, EngineId, Outcome};
use thiserror::Error;

/// Failures at the chain/wallet boundary.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// The network rejected the transaction; terminal for that wager.
    #[error("transaction rejected: {0}")]
    Rejected(String),
    /// Transport-level RPC failure.
    #[error("rpc failure: {0}")]
    Rpc(String),
    /// The chain did not answer within the adapter's deadline.
    #[error("timed out waiting for chain")]
    Timeout,
    /// The signer refused to sign (locked account, bad payload).
    #[error("signing failed: {0}")]
    Signing(String),
}

/// A wager payload signed and ready for submission.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedWager {
    /// Encoded spin request.
    pub payload: Vec<u8>,
    pub signature: Vec<u8>,
    /// Address of the signing wallet.
    pub signer: String,
}

/// Holder of the wallet key. Only the bridge side of the channel ever holds
/// one.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    fn address(&self) -> String;

    async fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, AdapterError>;
}

/// The machine contract as seen over RPC.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// Submit a signed wager. Resolves once the network has *accepted* the
    /// transaction (not yet confirmed), yielding the authoritative id.
    async fn submit_wager(&self, wager: SignedWager) -> Result<EngineId, AdapterError>;

    /// Wait for confirmation of an accepted wager and decode its outcome.
    async fn await_outcome(&self, id: EngineId) -> Result<Outcome, AdapterError>;

    /// Authoritative token balance of the session wallet.
    async fn fetch_balance(&self) -> Result<u64, AdapterError>;

    /// Authoritative free-credit and bonus-spin balances.
    async fn fetch_credits(&self) -> Result<CreditBalance, AdapterError>;
}
