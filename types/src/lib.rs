//! Shared data model and wire protocol for reelhouse.
//!
//! Everything both sides of the bridge channel must agree on lives here: the
//! spin request/queue-entry state machine, outcome and grid types, the
//! namespaced message envelope, and the in-memory channel transport the
//! sandboxed game surface uses to talk to its host.

use bytes::{Buf, BufMut};
use commonware_codec::{Error, FixedSize, Read, ReadExt, Write};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod api;
pub mod channel;
pub mod codec;
pub mod outcome;
pub mod spin;

pub use api::{BalanceReport, CreditBalance, Envelope, GameConfig, Message, StakeLimits};
pub use channel::{channel_pair, ChannelClosed, ChannelEnd, ChannelSender};
pub use outcome::{Grid, LineWin, Outcome, Symbol, WaysWin, WinBreakdown, WinLevel};
pub use spin::{QueueEntry, SpinRequest, SpinStatus, Stake, WagerMode};

/// Default channel namespace. A session may override it, but both ends must
/// agree or every frame is dropped as foreign traffic.
pub const NAMESPACE: &str = "reelhouse";

/// Client-generated identifier for one wager, unique within a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{:016x}", self.0)
    }
}

impl Write for ClientId {
    fn write(&self, writer: &mut impl BufMut) {
        self.0.write(writer);
    }
}

impl Read for ClientId {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self(u64::read(reader)?))
    }
}

impl FixedSize for ClientId {
    const SIZE: usize = u64::SIZE;
}

/// Authority-assigned identifier for one wager, allocated when the chain
/// accepts the transaction. Assigned at most once per entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EngineId(pub u64);

impl fmt::Display for EngineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{:016x}", self.0)
    }
}

impl Write for EngineId {
    fn write(&self, writer: &mut impl BufMut) {
        self.0.write(writer);
    }
}

impl Read for EngineId {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self(u64::read(reader)?))
    }
}

impl FixedSize for EngineId {
    const SIZE: usize = u64::SIZE;
}

/// Milliseconds since the Unix epoch. Pure state machines take timestamps as
/// parameters; this is the single place the wall clock is read.
pub fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
