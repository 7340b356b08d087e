//! Sandboxed-mode client for reelhouse.
//!
//! This side of the channel never touches funds. It keeps an optimistic
//! local projection of the spin queue, matches host messages back to local
//! entries, corrects drift from authoritative snapshots, and runs the bonus
//! auto-continuation scheduler.

pub mod autoplay;
pub mod reconciler;
pub mod session;


pub use autoplay::{AutoPlay, AutoPlayConfig, SpinSubmitter};
pub use reconciler::{ReconcileResult, Reconciler, ReconcilerConfig};
pub use session::{Session, SessionConfig, SessionEvent, SessionHandle};

use thiserror::Error;

/// Client-side errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Channel(#[from] reelhouse_types::ChannelClosed),
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
