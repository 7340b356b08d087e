//! Wire protocol between the game surface and its host.
//!
//! Every frame is an [`Envelope`]: a namespace tag (foreign traffic on a
//! shared channel is silently dropped), an optional correlation id, and one
//! exhaustively-tagged [`Message`]. The authority echoes the originating
//! client id in `request_id` on every submission/outcome/error it emits, so
//! correlation never depends solely on arrival order.

use crate::codec::{read_string, string_encode_size, write_string};
use crate::outcome::Outcome;
use crate::spin::{QueueEntry, SpinRequest, MAX_ERROR_LENGTH};
use crate::{ClientId, EngineId};
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, FixedSize, Read, ReadExt, ReadRangeExt, Write};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

/// Maximum namespace tag length.
pub const MAX_NAMESPACE_LENGTH: usize = 64;

/// Maximum entries in one queue snapshot frame.
pub const MAX_SNAPSHOT_ENTRIES: usize = 64;

/// Stake limits enforced by the authority before any funds are reserved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeLimits {
    pub min_stake: u64,
    pub max_stake: u64,
    /// Maximum non-terminal entries the authority will hold at once.
    pub max_queued: u32,
}

impl Write for StakeLimits {
    fn write(&self, writer: &mut impl BufMut) {
        self.min_stake.write(writer);
        self.max_stake.write(writer);
        self.max_queued.write(writer);
    }
}

impl Read for StakeLimits {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            min_stake: u64::read(reader)?,
            max_stake: u64::read(reader)?,
            max_queued: u32::read(reader)?,
        })
    }
}

impl FixedSize for StakeLimits {
    const SIZE: usize = u64::SIZE + u64::SIZE + u32::SIZE;
}

/// An invalid machine configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ThisError)]
pub enum ConfigError {
    #[error("min_stake must be greater than zero")]
    ZeroMinStake,
    #[error("max_stake {max_stake} below min_stake {min_stake}")]
    InvertedStakeBounds { min_stake: u64, max_stake: u64 },
    #[error("max_queued must be greater than zero")]
    ZeroQueueDepth,
    #[error("rtp {0} exceeds 10000 basis points")]
    RtpAboveUnity(u32),
}

/// Machine configuration published by the authority on `Init`/`GetConfig`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameConfig {
    pub limits: StakeLimits,
    /// Return-to-player in basis points (9650 = 96.50%).
    pub rtp_basis_points: u32,
    /// Whether this machine pays ways-to-win instead of fixed paylines.
    pub ways_enabled: bool,
    /// On-chain identity of the machine contract.
    pub contract_id: u64,
}

impl GameConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.min_stake == 0 {
            return Err(ConfigError::ZeroMinStake);
        }
        if self.limits.max_stake < self.limits.min_stake {
            return Err(ConfigError::InvertedStakeBounds {
                min_stake: self.limits.min_stake,
                max_stake: self.limits.max_stake,
            });
        }
        if self.limits.max_queued == 0 {
            return Err(ConfigError::ZeroQueueDepth);
        }
        if self.rtp_basis_points > 10_000 {
            return Err(ConfigError::RtpAboveUnity(self.rtp_basis_points));
        }
        Ok(())
    }
}

impl Write for GameConfig {
    fn write(&self, writer: &mut impl BufMut) {
        self.limits.write(writer);
        self.rtp_basis_points.write(writer);
        self.ways_enabled.write(writer);
        self.contract_id.write(writer);
    }
}

impl Read for GameConfig {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            limits: StakeLimits::read(reader)?,
            rtp_basis_points: u32::read(reader)?,
            ways_enabled: bool::read(reader)?,
            contract_id: u64::read(reader)?,
        })
    }
}

impl FixedSize for GameConfig {
    const SIZE: usize = StakeLimits::SIZE + u32::SIZE + 1 + u64::SIZE;
}

/// Confirmed and spendable balance, as the authority's ledger sees it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceReport {
    pub confirmed: u64,
    pub available: u64,
}

impl Write for BalanceReport {
    fn write(&self, writer: &mut impl BufMut) {
        self.confirmed.write(writer);
        self.available.write(writer);
    }
}

impl Read for BalanceReport {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            confirmed: u64::read(reader)?,
            available: u64::read(reader)?,
        })
    }
}

impl FixedSize for BalanceReport {
    const SIZE: usize = u64::SIZE * 2;
}

/// Free-credit and bonus-spin balances, fetched from the contract.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditBalance {
    pub credits: u64,
    pub bonus_spins: u32,
}

impl Write for CreditBalance {
    fn write(&self, writer: &mut impl BufMut) {
        self.credits.write(writer);
        self.bonus_spins.write(writer);
    }
}

impl Read for CreditBalance {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            credits: u64::read(reader)?,
            bonus_spins: u32::read(reader)?,
        })
    }
}

impl FixedSize for CreditBalance {
    const SIZE: usize = u64::SIZE + u32::SIZE;
}

/// Every message kind the channel can carry, both directions.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    // Game surface -> host (tags 0-6).
    Init,
    GetBalance,
    GetConfig,
    GetCreditBalance,
    GetSpinQueue,
    SpinRequest(SpinRequest),
    Exit,

    // Host -> game surface (tags 7-13).
    Config(GameConfig),
    /// Pushed on balance changes and sent as the `GetBalance` poll reply.
    BalanceUpdate(BalanceReport),
    CreditBalance(CreditBalance),
    /// Correlates to the oldest Pending entry without an engine id.
    SpinSubmitted { id: EngineId },
    SpinOutcome { id: EngineId, outcome: Outcome },
    SpinQueue { entries: Vec<QueueEntry> },
    Error { message: String },
}

impl Message {
    /// Short kind label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::GetBalance => "get_balance",
            Self::GetConfig => "get_config",
            Self::GetCreditBalance => "get_credit_balance",
            Self::GetSpinQueue => "get_spin_queue",
            Self::SpinRequest(_) => "spin_request",
            Self::Exit => "exit",
            Self::Config(_) => "config",
            Self::BalanceUpdate(_) => "balance_update",
            Self::CreditBalance(_) => "credit_balance",
            Self::SpinSubmitted { .. } => "spin_submitted",
            Self::SpinOutcome { .. } => "spin_outcome",
            Self::SpinQueue { .. } => "spin_queue",
            Self::Error { .. } => "error",
        }
    }
}

impl Write for Message {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            Self::Init => 0u8.write(writer),
            Self::GetBalance => 1u8.write(writer),
            Self::GetConfig => 2u8.write(writer),
            Self::GetCreditBalance => 3u8.write(writer),
            Self::GetSpinQueue => 4u8.write(writer),
            Self::SpinRequest(request) => {
                5u8.write(writer);
                request.write(writer);
            }
            Self::Exit => 6u8.write(writer),
            Self::Config(config) => {
                7u8.write(writer);
                config.write(writer);
            }
            Self::BalanceUpdate(report) => {
                8u8.write(writer);
                report.write(writer);
            }
            Self::CreditBalance(credits) => {
                9u8.write(writer);
                credits.write(writer);
            }
            Self::SpinSubmitted { id } => {
                10u8.write(writer);
                id.write(writer);
            }
            Self::SpinOutcome { id, outcome } => {
                11u8.write(writer);
                id.write(writer);
                outcome.write(writer);
            }
            Self::SpinQueue { entries } => {
                12u8.write(writer);
                entries.write(writer);
            }
            Self::Error { message } => {
                13u8.write(writer);
                write_string(message, writer);
            }
        }
    }
}

impl Read for Message {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let tag = u8::read(reader)?;
        match tag {
            0 => Ok(Self::Init),
            1 => Ok(Self::GetBalance),
            2 => Ok(Self::GetConfig),
            3 => Ok(Self::GetCreditBalance),
            4 => Ok(Self::GetSpinQueue),
            5 => Ok(Self::SpinRequest(SpinRequest::read(reader)?)),
            6 => Ok(Self::Exit),
            7 => Ok(Self::Config(GameConfig::read(reader)?)),
            8 => Ok(Self::BalanceUpdate(BalanceReport::read(reader)?)),
            9 => Ok(Self::CreditBalance(CreditBalance::read(reader)?)),
            10 => Ok(Self::SpinSubmitted {
                id: EngineId::read(reader)?,
            }),
            11 => Ok(Self::SpinOutcome {
                id: EngineId::read(reader)?,
                outcome: Outcome::read(reader)?,
            }),
            12 => Ok(Self::SpinQueue {
                entries: Vec::read_range(reader, 0..=MAX_SNAPSHOT_ENTRIES)?,
            }),
            13 => Ok(Self::Error {
                message: read_string(reader, MAX_ERROR_LENGTH)?,
            }),
            i => Err(Error::InvalidEnum(i)),
        }
    }
}

impl EncodeSize for Message {
    fn encode_size(&self) -> usize {
        1 + match self {
            Self::Init
            | Self::GetBalance
            | Self::GetConfig
            | Self::GetCreditBalance
            | Self::GetSpinQueue
            | Self::Exit => 0,
            Self::SpinRequest(request) => request.encode_size(),
            Self::Config(_) => GameConfig::SIZE,
            Self::BalanceUpdate(_) => BalanceReport::SIZE,
            Self::CreditBalance(_) => CreditBalance::SIZE,
            Self::SpinSubmitted { .. } => EngineId::SIZE,
            Self::SpinOutcome { outcome, .. } => EngineId::SIZE + outcome.encode_size(),
            Self::SpinQueue { entries } => entries.encode_size(),
            Self::Error { message } => string_encode_size(message),
        }
    }
}

/// One frame on the channel.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    /// Session/application tag; frames with a foreign namespace are dropped.
    pub namespace: String,
    /// Client id this frame correlates to, when the sender knows it.
    pub request_id: Option<ClientId>,
    pub message: Message,
}

impl Envelope {
    pub fn new(namespace: impl Into<String>, message: Message) -> Self {
        Self {
            namespace: namespace.into(),
            request_id: None,
            message,
        }
    }

    pub fn with_request_id(mut self, request_id: ClientId) -> Self {
        self.request_id = Some(request_id);
        self
    }
}

impl Write for Envelope {
    fn write(&self, writer: &mut impl BufMut) {
        write_string(&self.namespace, writer);
        self.request_id.write(writer);
        self.message.write(writer);
    }
}

impl Read for Envelope {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            namespace: read_string(reader, MAX_NAMESPACE_LENGTH)?,
            request_id: Option::<ClientId>::read(reader)?,
            message: Message::read(reader)?,
        })
    }
}

impl EncodeSize for Envelope {
    fn encode_size(&self) -> usize {
        string_encode_size(&self.namespace)
            + self.request_id.encode_size()
            + self.message.encode_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::{Grid, Symbol, WinBreakdown, WinLevel};
    use crate::spin::{Stake, WagerMode};
    use commonware_codec::Encode;

    fn config() -> GameConfig {
        GameConfig {
            limits: StakeLimits {
                min_stake: 10,
                max_stake: 10_000,
                max_queued: 8,
            },
            rtp_basis_points: 9_650,
            ways_enabled: false,
            contract_id: 0xc0ffee,
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(config().validate().is_ok());

        let mut bad = config();
        bad.limits.min_stake = 0;
        assert_eq!(bad.validate(), Err(ConfigError::ZeroMinStake));

        let mut bad = config();
        bad.limits.max_stake = 5;
        assert!(matches!(
            bad.validate(),
            Err(ConfigError::InvertedStakeBounds { .. })
        ));

        let mut bad = config();
        bad.limits.max_queued = 0;
        assert_eq!(bad.validate(), Err(ConfigError::ZeroQueueDepth));

        let mut bad = config();
        bad.rtp_basis_points = 10_001;
        assert_eq!(bad.validate(), Err(ConfigError::RtpAboveUnity(10_001)));
    }

    #[test]
    fn test_message_roundtrip_all_kinds() {
        let request = SpinRequest::new(
            ClientId(9),
            Stake::Ways { amount: 40 },
            WagerMode::PrimaryToken,
            5,
        );
        let outcome = Outcome {
            grid: Grid::filled(5, 3, Symbol::Bar),
            winnings: 0,
            win_level: WinLevel::None,
            wins: WinBreakdown::Lines(vec![]),
            bonus_spins_awarded: 0,
            jackpot_hit: false,
            jackpot_amount: 0,
        };
        let messages = [
            Message::Init,
            Message::GetBalance,
            Message::GetConfig,
            Message::GetCreditBalance,
            Message::GetSpinQueue,
            Message::SpinRequest(request),
            Message::Exit,
            Message::Config(config()),
            Message::BalanceUpdate(BalanceReport {
                confirmed: 1_000,
                available: 800,
            }),
            Message::CreditBalance(CreditBalance {
                credits: 50,
                bonus_spins: 3,
            }),
            Message::SpinSubmitted { id: EngineId(4) },
            Message::SpinOutcome {
                id: EngineId(4),
                outcome,
            },
            Message::SpinQueue { entries: vec![] },
            Message::Error {
                message: "transaction rejected".into(),
            },
        ];
        for message in messages {
            let encoded = message.encode();
            assert_eq!(encoded.len(), message.encode_size(), "{}", message.kind());
            let decoded = Message::read(&mut &encoded[..]).unwrap();
            assert_eq!(decoded, message);
        }
    }

    #[test]
    fn test_envelope_roundtrip() {
        let envelope =
            Envelope::new("reelhouse", Message::GetBalance).with_request_id(ClientId(77));
        let encoded = envelope.encode();
        assert_eq!(encoded.len(), envelope.encode_size());
        assert_eq!(Envelope::read(&mut &encoded[..]).unwrap(), envelope);
    }

    #[test]
    fn test_envelope_rejects_oversized_namespace() {
        let envelope = Envelope::new("n".repeat(MAX_NAMESPACE_LENGTH + 1), Message::Init);
        let encoded = envelope.encode();
        assert!(Envelope::read(&mut &encoded[..]).is_err());
    }

    #[test]
    fn test_snapshot_view_serializes_for_ui() {
        let request = SpinRequest::new(
            ClientId(1),
            Stake::Lines {
                lines: 5,
                per_line: 2,
            },
            WagerMode::FreeCredit,
            100,
        );
        let entry = QueueEntry::new(request);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["status"], "Pending");
        assert_eq!(json["request"]["stake"]["Lines"]["lines"], 5);
    }
}
