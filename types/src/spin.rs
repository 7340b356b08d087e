//! Spin requests and the queue-entry lifecycle shared by both sides of the
//! channel.
//!
//! A [`QueueEntry`] only ever moves forward:
//!
//! ```text
//! Pending -> Submitted -> Completed | Failed | Expired
//! ```
//!
//! Terminal states are final. Re-applying a message to a terminal entry is a
//! no-op, which makes message re-delivery idempotent on both sides.

use crate::codec::{read_string, string_encode_size, write_string};
use crate::outcome::Outcome;
use crate::{ClientId, EngineId};
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, FixedSize, Read, ReadExt, Write};
use serde::{Deserialize, Serialize};

/// Maximum error text carried on a failed entry.
pub const MAX_ERROR_LENGTH: usize = 256;

/// Maximum payline count a stake may name.
pub const MAX_PAYLINES: u32 = 100;

/// How a wager amount is shaped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stake {
    /// Fixed paylines: `per_line` staked on each of `lines` paylines.
    Lines { lines: u32, per_line: u64 },
    /// Ways-to-win: a single flat amount covering every way.
    Ways { amount: u64 },
}

impl Stake {
    /// Total amount this stake reserves against the balance.
    pub fn total(&self) -> u64 {
        match self {
            Stake::Lines { lines, per_line } => per_line.saturating_mul(*lines as u64),
            Stake::Ways { amount } => *amount,
        }
    }
}

impl Write for Stake {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            Stake::Lines { lines, per_line } => {
                0u8.write(writer);
                lines.write(writer);
                per_line.write(writer);
            }
            Stake::Ways { amount } => {
                1u8.write(writer);
                amount.write(writer);
            }
        }
    }
}

impl Read for Stake {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let kind = u8::read(reader)?;
        match kind {
            0 => {
                let lines = u32::read(reader)?;
                if lines > MAX_PAYLINES {
                    return Err(Error::Invalid("Stake", "too many paylines"));
                }
                let per_line = u64::read(reader)?;
                Ok(Stake::Lines { lines, per_line })
            }
            1 => Ok(Stake::Ways {
                amount: u64::read(reader)?,
            }),
            i => Err(Error::InvalidEnum(i)),
        }
    }
}

impl EncodeSize for Stake {
    fn encode_size(&self) -> usize {
        1 + match self {
            Stake::Lines { .. } => u32::SIZE + u64::SIZE,
            Stake::Ways { .. } => u64::SIZE,
        }
    }
}

/// Which balance a wager draws from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum WagerMode {
    BonusCredit = 0,
    FreeCredit = 1,
    PrimaryToken = 2,
    SecondaryToken = 3,
}

impl Write for WagerMode {
    fn write(&self, writer: &mut impl BufMut) {
        (*self as u8).write(writer);
    }
}

impl Read for WagerMode {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let value = u8::read(reader)?;
        match value {
            0 => Ok(Self::BonusCredit),
            1 => Ok(Self::FreeCredit),
            2 => Ok(Self::PrimaryToken),
            3 => Ok(Self::SecondaryToken),
            i => Err(Error::InvalidEnum(i)),
        }
    }
}

impl FixedSize for WagerMode {
    const SIZE: usize = 1;
}

/// One wager as requested by the game surface. Immutable once created.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpinRequest {
    pub client_id: ClientId,
    pub stake: Stake,
    pub mode: WagerMode,
    pub created_at_ms: u64,
}

impl SpinRequest {
    pub fn new(client_id: ClientId, stake: Stake, mode: WagerMode, now_ms: u64) -> Self {
        Self {
            client_id,
            stake,
            mode,
            created_at_ms: now_ms,
        }
    }
}

impl Write for SpinRequest {
    fn write(&self, writer: &mut impl BufMut) {
        self.client_id.write(writer);
        self.stake.write(writer);
        self.mode.write(writer);
        self.created_at_ms.write(writer);
    }
}

impl Read for SpinRequest {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            client_id: ClientId::read(reader)?,
            stake: Stake::read(reader)?,
            mode: WagerMode::read(reader)?,
            created_at_ms: u64::read(reader)?,
        })
    }
}

impl EncodeSize for SpinRequest {
    fn encode_size(&self) -> usize {
        ClientId::SIZE + self.stake.encode_size() + WagerMode::SIZE + u64::SIZE
    }
}

/// Lifecycle state of one queued wager.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SpinStatus {
    Pending = 0,
    Submitted = 1,
    Completed = 2,
    Failed = 3,
    /// Client-side inference only: no terminal message arrived within the
    /// bounded wait. The authority never produces this state.
    Expired = 4,
}

impl SpinStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Expired)
    }
}

impl Write for SpinStatus {
    fn write(&self, writer: &mut impl BufMut) {
        (*self as u8).write(writer);
    }
}

impl Read for SpinStatus {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let value = u8::read(reader)?;
        match value {
            0 => Ok(Self::Pending),
            1 => Ok(Self::Submitted),
            2 => Ok(Self::Completed),
            3 => Ok(Self::Failed),
            4 => Ok(Self::Expired),
            i => Err(Error::InvalidEnum(i)),
        }
    }
}

impl FixedSize for SpinStatus {
    const SIZE: usize = 1;
}

/// Mutable lifecycle record for one wager.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub request: SpinRequest,
    pub engine_id: Option<EngineId>,
    pub status: SpinStatus,
    pub submitted_at_ms: Option<u64>,
    pub completed_at_ms: Option<u64>,
    pub outcome: Option<Outcome>,
    pub error: Option<String>,
}

impl QueueEntry {
    pub fn new(request: SpinRequest) -> Self {
        Self {
            request,
            engine_id: None,
            status: SpinStatus::Pending,
            submitted_at_ms: None,
            completed_at_ms: None,
            outcome: None,
            error: None,
        }
    }

    pub fn client_id(&self) -> ClientId {
        self.request.client_id
    }

    /// Total amount this entry reserves while non-terminal.
    pub fn stake_total(&self) -> u64 {
        self.request.stake.total()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Pending and still waiting for the authority to assign an engine id.
    pub fn awaiting_acknowledgment(&self) -> bool {
        self.status == SpinStatus::Pending && self.engine_id.is_none()
    }

    /// Adopt an engine id learned out of band (e.g. from an outcome that
    /// arrived before the submission ack). At most once; never on a terminal
    /// entry.
    pub fn assign_engine_id(&mut self, engine_id: EngineId) -> bool {
        if self.is_terminal() || self.engine_id.is_some() {
            return false;
        }
        self.engine_id = Some(engine_id);
        true
    }

    /// Acknowledge network acceptance: assign the engine id and move to
    /// Submitted. Returns false when the message must be ignored.
    pub fn acknowledge(&mut self, engine_id: EngineId, now_ms: u64) -> bool {
        if self.status != SpinStatus::Pending || self.engine_id.is_some() {
            return false;
        }
        self.engine_id = Some(engine_id);
        self.status = SpinStatus::Submitted;
        self.submitted_at_ms = Some(now_ms);
        true
    }

    /// Record a confirmed outcome. Returns false when the entry is already
    /// terminal (idempotent re-delivery).
    pub fn complete(&mut self, outcome: Outcome, now_ms: u64) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = SpinStatus::Completed;
        self.completed_at_ms = Some(now_ms);
        self.outcome = Some(outcome);
        true
    }

    /// Record an authority-reported failure. Returns false when the entry is
    /// already terminal.
    pub fn fail(&mut self, message: &str, now_ms: u64) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = SpinStatus::Failed;
        self.completed_at_ms = Some(now_ms);
        let mut message = message.to_owned();
        message.truncate(MAX_ERROR_LENGTH);
        self.error = Some(message);
        true
    }

    /// Locally expire an entry that never resolved. Client-side only.
    pub fn expire(&mut self, now_ms: u64) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = SpinStatus::Expired;
        self.completed_at_ms = Some(now_ms);
        true
    }
}

impl Write for QueueEntry {
    fn write(&self, writer: &mut impl BufMut) {
        self.request.write(writer);
        self.engine_id.write(writer);
        self.status.write(writer);
        self.submitted_at_ms.write(writer);
        self.completed_at_ms.write(writer);
        self.outcome.write(writer);
        match &self.error {
            Some(error) => {
                true.write(writer);
                write_string(error, writer);
            }
            None => false.write(writer),
        }
    }
}

impl Read for QueueEntry {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let request = SpinRequest::read(reader)?;
        let engine_id = Option::<EngineId>::read(reader)?;
        let status = SpinStatus::read(reader)?;
        let submitted_at_ms = Option::<u64>::read(reader)?;
        let completed_at_ms = Option::<u64>::read(reader)?;
        let outcome = Option::<Outcome>::read(reader)?;
        let error = if bool::read(reader)? {
            Some(read_string(reader, MAX_ERROR_LENGTH)?)
        } else {
            None
        };
        Ok(Self {
            request,
            engine_id,
            status,
            submitted_at_ms,
            completed_at_ms,
            outcome,
            error,
        })
    }
}

impl EncodeSize for QueueEntry {
    fn encode_size(&self) -> usize {
        self.request.encode_size()
            + self.engine_id.encode_size()
            + SpinStatus::SIZE
            + self.submitted_at_ms.encode_size()
            + self.completed_at_ms.encode_size()
            + self.outcome.encode_size()
            + 1
            + self.error.as_ref().map_or(0, |e| string_encode_size(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::{Grid, Symbol, WinBreakdown, WinLevel};
    use commonware_codec::Encode;

    fn request(id: u64) -> SpinRequest {
        SpinRequest::new(
            ClientId(id),
            Stake::Lines {
                lines: 20,
                per_line: 5,
            },
            WagerMode::PrimaryToken,
            1_000,
        )
    }

    fn losing_outcome() -> Outcome {
        Outcome {
            grid: Grid::filled(5, 3, Symbol::Cherry),
            winnings: 0,
            win_level: WinLevel::None,
            wins: WinBreakdown::Lines(vec![]),
            bonus_spins_awarded: 0,
            jackpot_hit: false,
            jackpot_amount: 0,
        }
    }

    #[test]
    fn test_stake_total() {
        let lines = Stake::Lines {
            lines: 20,
            per_line: 5,
        };
        assert_eq!(lines.total(), 100);
        let ways = Stake::Ways { amount: 250 };
        assert_eq!(ways.total(), 250);
    }

    #[test]
    fn test_stake_roundtrip() {
        for stake in [
            Stake::Lines {
                lines: 1,
                per_line: 1,
            },
            Stake::Lines {
                lines: 100,
                per_line: u64::MAX,
            },
            Stake::Ways { amount: 0 },
            Stake::Ways { amount: 77 },
        ] {
            let encoded = stake.encode();
            assert_eq!(Stake::read(&mut &encoded[..]).unwrap(), stake);
        }
    }

    #[test]
    fn test_stake_rejects_excess_paylines() {
        let stake = Stake::Lines {
            lines: MAX_PAYLINES + 1,
            per_line: 1,
        };
        let encoded = stake.encode();
        assert!(Stake::read(&mut &encoded[..]).is_err());
    }

    #[test]
    fn test_wager_mode_roundtrip() {
        for mode in [
            WagerMode::BonusCredit,
            WagerMode::FreeCredit,
            WagerMode::PrimaryToken,
            WagerMode::SecondaryToken,
        ] {
            let encoded = mode.encode();
            assert_eq!(WagerMode::read(&mut &encoded[..]).unwrap(), mode);
        }
        assert!(WagerMode::read(&mut &[9u8][..]).is_err());
    }

    #[test]
    fn test_entry_happy_path() {
        let mut entry = QueueEntry::new(request(1));
        assert!(entry.awaiting_acknowledgment());

        assert!(entry.acknowledge(EngineId(7), 2_000));
        assert_eq!(entry.status, SpinStatus::Submitted);
        assert_eq!(entry.engine_id, Some(EngineId(7)));
        assert_eq!(entry.submitted_at_ms, Some(2_000));

        assert!(entry.complete(losing_outcome(), 3_000));
        assert_eq!(entry.status, SpinStatus::Completed);
        assert_eq!(entry.completed_at_ms, Some(3_000));
        assert!(entry.is_terminal());
    }

    #[test]
    fn test_engine_id_assigned_at_most_once() {
        let mut entry = QueueEntry::new(request(1));
        assert!(entry.acknowledge(EngineId(7), 2_000));
        assert!(!entry.acknowledge(EngineId(8), 2_500));
        assert_eq!(entry.engine_id, Some(EngineId(7)));
        assert!(!entry.assign_engine_id(EngineId(8)));
        assert_eq!(entry.engine_id, Some(EngineId(7)));
    }

    #[test]
    fn test_terminal_entries_ignore_redelivery() {
        let mut entry = QueueEntry::new(request(1));
        entry.acknowledge(EngineId(7), 2_000);
        assert!(entry.complete(losing_outcome(), 3_000));

        // Re-delivered outcome, late failure, late expiry: all no-ops.
        assert!(!entry.complete(losing_outcome(), 4_000));
        assert!(!entry.fail("too late", 4_000));
        assert!(!entry.expire(4_000));
        assert_eq!(entry.status, SpinStatus::Completed);
        assert_eq!(entry.completed_at_ms, Some(3_000));
        assert!(entry.error.is_none());
    }

    #[test]
    fn test_failure_without_acknowledgment() {
        // Submission can fail before the network ever assigns an id.
        let mut entry = QueueEntry::new(request(1));
        assert!(entry.fail("rpc unreachable", 2_000));
        assert_eq!(entry.status, SpinStatus::Failed);
        assert!(entry.engine_id.is_none());
        assert_eq!(entry.error.as_deref(), Some("rpc unreachable"));
    }

    #[test]
    fn test_expired_entry_is_terminal() {
        let mut entry = QueueEntry::new(request(1));
        assert!(entry.expire(9_000));
        assert!(entry.is_terminal());
        // A late authoritative outcome does not resurrect it.
        assert!(!entry.complete(losing_outcome(), 10_000));
        assert_eq!(entry.status, SpinStatus::Expired);
    }

    #[test]
    fn test_error_text_truncated() {
        let mut entry = QueueEntry::new(request(1));
        let long = "x".repeat(MAX_ERROR_LENGTH + 50);
        assert!(entry.fail(&long, 2_000));
        assert_eq!(entry.error.as_ref().unwrap().len(), MAX_ERROR_LENGTH);
    }

    #[test]
    fn test_entry_roundtrip() {
        let mut entry = QueueEntry::new(request(3));
        entry.acknowledge(EngineId(11), 2_000);
        entry.complete(losing_outcome(), 3_000);

        let encoded = entry.encode();
        assert_eq!(encoded.len(), entry.encode_size());
        let decoded = QueueEntry::read(&mut &encoded[..]).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_failed_entry_roundtrip() {
        let mut entry = QueueEntry::new(request(4));
        entry.fail("transaction rejected", 2_000);

        let encoded = entry.encode();
        assert_eq!(encoded.len(), entry.encode_size());
        let decoded = QueueEntry::read(&mut &encoded[..]).unwrap();
        assert_eq!(decoded, entry);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn rank(status: SpinStatus) -> u8 {
            match status {
                SpinStatus::Pending => 0,
                SpinStatus::Submitted => 1,
                SpinStatus::Completed | SpinStatus::Failed | SpinStatus::Expired => 2,
            }
        }

        proptest! {
            #[test]
            fn prop_status_never_regresses(
                ops in prop::collection::vec((0u8..4, 1u64..100), 0..32),
            ) {
                let mut entry = QueueEntry::new(request(1));
                let mut now_ms = 1_000;
                for (op, id) in ops {
                    let before = entry.status;
                    let before_engine = entry.engine_id;
                    now_ms += 1;
                    match op {
                        0 => { entry.acknowledge(EngineId(id), now_ms); }
                        1 => { entry.complete(losing_outcome(), now_ms); }
                        2 => { entry.fail("boom", now_ms); }
                        _ => { entry.expire(now_ms); }
                    }
                    prop_assert!(rank(entry.status) >= rank(before));
                    if let Some(engine_id) = before_engine {
                        prop_assert_eq!(entry.engine_id, Some(engine_id));
                    }
                    if before.is_terminal() {
                        // Terminal means frozen.
                        prop_assert_eq!(entry.status, before);
                    }
                }
            }
        }
    }
}
