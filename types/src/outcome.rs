//! Spin outcomes: the final symbol grid, win breakdowns, and the
//! defense-in-depth jackpot corroboration.
//!
//! Outcomes cross a trust boundary (the game surface is sandboxed and the
//! channel may carry hostile frames), so the jackpot flag is never taken at
//! face value: [`Outcome::sanitize`] downgrades any jackpot claim the grid
//! does not independently back.

use crate::spin::Stake;
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, FixedSize, Read, ReadExt, ReadRangeExt, Write};
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

/// Maximum reel count a grid may carry.
pub const MAX_REELS: u8 = 8;

/// Maximum row count a grid may carry.
pub const MAX_ROWS: u8 = 6;

/// Maximum win entries in a single outcome.
pub const MAX_WINS: usize = 64;

/// Payout-to-stake ratio at or above which a win is Medium.
pub const MEDIUM_WIN_RATIO: u64 = 10;

/// Payout-to-stake ratio at or above which a win is Large.
pub const LARGE_WIN_RATIO: u64 = 50;

/// Reel symbols. `Jackpot` is the only symbol with protocol significance:
/// a jackpot claim requires one on every reel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Symbol {
    Jackpot = 0,
    Wild = 1,
    Scatter = 2,
    Seven = 3,
    Bar = 4,
    Bell = 5,
    Horseshoe = 6,
    Cherry = 7,
    Lemon = 8,
}

impl Write for Symbol {
    fn write(&self, writer: &mut impl BufMut) {
        (*self as u8).write(writer);
    }
}

impl Read for Symbol {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let value = u8::read(reader)?;
        match value {
            0 => Ok(Self::Jackpot),
            1 => Ok(Self::Wild),
            2 => Ok(Self::Scatter),
            3 => Ok(Self::Seven),
            4 => Ok(Self::Bar),
            5 => Ok(Self::Bell),
            6 => Ok(Self::Horseshoe),
            7 => Ok(Self::Cherry),
            8 => Ok(Self::Lemon),
            i => Err(Error::InvalidEnum(i)),
        }
    }
}

impl FixedSize for Symbol {
    const SIZE: usize = 1;
}

/// A grid shape/cell-count mismatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ThisError)]
#[error("grid of {reels}x{rows} cannot hold {cells} cells")]
pub struct InvalidGrid {
    pub reels: u8,
    pub rows: u8,
    pub cells: usize,
}

/// Final symbol layout of one spin, column-major (reel by reel).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid {
    reels: u8,
    rows: u8,
    cells: Vec<Symbol>,
}

impl Grid {
    pub fn new(reels: u8, rows: u8, cells: Vec<Symbol>) -> Result<Self, InvalidGrid> {
        if reels == 0
            || rows == 0
            || reels > MAX_REELS
            || rows > MAX_ROWS
            || cells.len() != reels as usize * rows as usize
        {
            return Err(InvalidGrid {
                reels,
                rows,
                cells: cells.len(),
            });
        }
        Ok(Self { reels, rows, cells })
    }

    /// A grid with every cell set to `symbol`.
    pub fn filled(reels: u8, rows: u8, symbol: Symbol) -> Self {
        Self {
            reels,
            rows,
            cells: vec![symbol; reels as usize * rows as usize],
        }
    }

    pub fn reels(&self) -> u8 {
        self.reels
    }

    pub fn rows(&self) -> u8 {
        self.rows
    }

    pub fn cells(&self) -> &[Symbol] {
        &self.cells
    }

    /// Symbol at (reel, row).
    pub fn at(&self, reel: u8, row: u8) -> Option<Symbol> {
        if reel >= self.reels || row >= self.rows {
            return None;
        }
        self.cells
            .get(reel as usize * self.rows as usize + row as usize)
            .copied()
    }

    pub fn symbol_count(&self, symbol: Symbol) -> usize {
        self.cells.iter().filter(|s| **s == symbol).count()
    }

    /// Whether this grid backs a jackpot claim: at least one jackpot symbol
    /// per reel.
    pub fn backs_jackpot(&self) -> bool {
        self.symbol_count(Symbol::Jackpot) >= self.reels as usize
    }
}

impl Write for Grid {
    fn write(&self, writer: &mut impl BufMut) {
        self.reels.write(writer);
        self.rows.write(writer);
        self.cells.write(writer);
    }
}

impl Read for Grid {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let reels = u8::read(reader)?;
        let rows = u8::read(reader)?;
        let max = MAX_REELS as usize * MAX_ROWS as usize;
        let cells = Vec::<Symbol>::read_range(reader, 0..=max)?;
        Grid::new(reels, rows, cells).map_err(|_| Error::Invalid("Grid", "shape mismatch"))
    }
}

impl EncodeSize for Grid {
    fn encode_size(&self) -> usize {
        1 + 1 + self.cells.encode_size()
    }
}

/// Coarse win tier, used by the UI to pick a celebration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum WinLevel {
    None = 0,
    Small = 1,
    Medium = 2,
    Large = 3,
    Jackpot = 4,
}

impl WinLevel {
    /// Derive the level from the payout-to-stake ratio. A zero stake with a
    /// positive payout (free-credit spins) counts as Large.
    pub fn from_payout(winnings: u64, stake_total: u64, jackpot: bool) -> Self {
        if jackpot {
            return Self::Jackpot;
        }
        if winnings == 0 {
            return Self::None;
        }
        if stake_total == 0 {
            return Self::Large;
        }
        if winnings >= stake_total.saturating_mul(LARGE_WIN_RATIO) {
            Self::Large
        } else if winnings >= stake_total.saturating_mul(MEDIUM_WIN_RATIO) {
            Self::Medium
        } else {
            Self::Small
        }
    }
}

impl Write for WinLevel {
    fn write(&self, writer: &mut impl BufMut) {
        (*self as u8).write(writer);
    }
}

impl Read for WinLevel {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let value = u8::read(reader)?;
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Small),
            2 => Ok(Self::Medium),
            3 => Ok(Self::Large),
            4 => Ok(Self::Jackpot),
            i => Err(Error::InvalidEnum(i)),
        }
    }
}

impl FixedSize for WinLevel {
    const SIZE: usize = 1;
}

/// A payline hit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineWin {
    pub line: u32,
    pub symbol: Symbol,
    pub count: u8,
    pub amount: u64,
}

impl Write for LineWin {
    fn write(&self, writer: &mut impl BufMut) {
        self.line.write(writer);
        self.symbol.write(writer);
        self.count.write(writer);
        self.amount.write(writer);
    }
}

impl Read for LineWin {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            line: u32::read(reader)?,
            symbol: Symbol::read(reader)?,
            count: u8::read(reader)?,
            amount: u64::read(reader)?,
        })
    }
}

impl FixedSize for LineWin {
    const SIZE: usize = u32::SIZE + Symbol::SIZE + 1 + u64::SIZE;
}

/// A ways-to-win hit: `ways` distinct paths of `count` consecutive reels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaysWin {
    pub symbol: Symbol,
    pub count: u8,
    pub ways: u32,
    pub amount: u64,
}

impl Write for WaysWin {
    fn write(&self, writer: &mut impl BufMut) {
        self.symbol.write(writer);
        self.count.write(writer);
        self.ways.write(writer);
        self.amount.write(writer);
    }
}

impl Read for WaysWin {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            symbol: Symbol::read(reader)?,
            count: u8::read(reader)?,
            ways: u32::read(reader)?,
            amount: u64::read(reader)?,
        })
    }
}

impl FixedSize for WaysWin {
    const SIZE: usize = Symbol::SIZE + 1 + u32::SIZE + u64::SIZE;
}

/// Win detail, shaped by the game variant. The two shapes are mutually
/// exclusive: a machine pays lines or ways, never both.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WinBreakdown {
    Lines(Vec<LineWin>),
    Ways(Vec<WaysWin>),
}

impl WinBreakdown {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Lines(wins) => wins.is_empty(),
            Self::Ways(wins) => wins.is_empty(),
        }
    }
}

impl Write for WinBreakdown {
    fn write(&self, writer: &mut impl BufMut) {
        match self {
            Self::Lines(wins) => {
                0u8.write(writer);
                wins.write(writer);
            }
            Self::Ways(wins) => {
                1u8.write(writer);
                wins.write(writer);
            }
        }
    }
}

impl Read for WinBreakdown {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        let kind = u8::read(reader)?;
        match kind {
            0 => Ok(Self::Lines(Vec::read_range(reader, 0..=MAX_WINS)?)),
            1 => Ok(Self::Ways(Vec::read_range(reader, 0..=MAX_WINS)?)),
            i => Err(Error::InvalidEnum(i)),
        }
    }
}

impl EncodeSize for WinBreakdown {
    fn encode_size(&self) -> usize {
        1 + match self {
            Self::Lines(wins) => wins.encode_size(),
            Self::Ways(wins) => wins.encode_size(),
        }
    }
}

/// The decoded result of one confirmed spin.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub grid: Grid,
    /// Total payout, jackpot portion included.
    pub winnings: u64,
    pub win_level: WinLevel,
    pub wins: WinBreakdown,
    pub bonus_spins_awarded: u32,
    pub jackpot_hit: bool,
    pub jackpot_amount: u64,
}

impl Outcome {
    /// Whether the jackpot flag is backed by the grid contents.
    pub fn jackpot_corroborated(&self) -> bool {
        !self.jackpot_hit || self.grid.backs_jackpot()
    }

    /// Strip any jackpot claim the grid does not corroborate, deducting the
    /// claimed jackpot portion from the winnings and re-deriving the win
    /// level. Outcomes from the channel must pass through here before the
    /// client trusts them.
    pub fn sanitize(mut self, stake: &Stake) -> Self {
        if self.jackpot_hit && !self.grid.backs_jackpot() {
            tracing::warn!(
                jackpot_amount = self.jackpot_amount,
                jackpot_symbols = self.grid.symbol_count(Symbol::Jackpot),
                reels = self.grid.reels(),
                "downgrading uncorroborated jackpot claim"
            );
            self.winnings = self.winnings.saturating_sub(self.jackpot_amount);
            self.jackpot_hit = false;
            self.jackpot_amount = 0;
            self.win_level = WinLevel::from_payout(self.winnings, stake.total(), false);
        } else if self.win_level == WinLevel::Jackpot && !self.jackpot_hit {
            self.win_level = WinLevel::from_payout(self.winnings, stake.total(), false);
        }
        self
    }
}

impl Write for Outcome {
    fn write(&self, writer: &mut impl BufMut) {
        self.grid.write(writer);
        self.winnings.write(writer);
        self.win_level.write(writer);
        self.wins.write(writer);
        self.bonus_spins_awarded.write(writer);
        self.jackpot_hit.write(writer);
        self.jackpot_amount.write(writer);
    }
}

impl Read for Outcome {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &Self::Cfg) -> Result<Self, Error> {
        Ok(Self {
            grid: Grid::read(reader)?,
            winnings: u64::read(reader)?,
            win_level: WinLevel::read(reader)?,
            wins: WinBreakdown::read(reader)?,
            bonus_spins_awarded: u32::read(reader)?,
            jackpot_hit: bool::read(reader)?,
            jackpot_amount: u64::read(reader)?,
        })
    }
}

impl EncodeSize for Outcome {
    fn encode_size(&self) -> usize {
        self.grid.encode_size()
            + u64::SIZE
            + WinLevel::SIZE
            + self.wins.encode_size()
            + u32::SIZE
            + 1
            + u64::SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use commonware_codec::Encode;

    fn stake() -> Stake {
        Stake::Lines {
            lines: 10,
            per_line: 10,
        }
    }

    fn outcome_with(grid: Grid, winnings: u64, jackpot: bool, jackpot_amount: u64) -> Outcome {
        Outcome {
            grid,
            winnings,
            win_level: WinLevel::from_payout(winnings, 100, jackpot),
            wins: WinBreakdown::Lines(vec![]),
            bonus_spins_awarded: 0,
            jackpot_hit: jackpot,
            jackpot_amount,
        }
    }

    #[test]
    fn test_grid_shape_validation() {
        assert!(Grid::new(5, 3, vec![Symbol::Bar; 15]).is_ok());
        assert!(Grid::new(5, 3, vec![Symbol::Bar; 14]).is_err());
        assert!(Grid::new(0, 3, vec![]).is_err());
        assert!(Grid::new(MAX_REELS + 1, 1, vec![Symbol::Bar; 9]).is_err());
    }

    #[test]
    fn test_grid_at_is_column_major() {
        let mut cells = vec![Symbol::Cherry; 6];
        cells[3] = Symbol::Seven; // reel 1, row 0
        let grid = Grid::new(2, 3, cells).unwrap();
        assert_eq!(grid.at(1, 0), Some(Symbol::Seven));
        assert_eq!(grid.at(0, 0), Some(Symbol::Cherry));
        assert_eq!(grid.at(2, 0), None);
    }

    #[test]
    fn test_grid_backs_jackpot_requires_one_per_reel() {
        let mut cells = vec![Symbol::Cherry; 15];
        for reel in 0..4 {
            cells[reel * 3] = Symbol::Jackpot;
        }
        let grid = Grid::new(5, 3, cells.clone()).unwrap();
        assert!(!grid.backs_jackpot()); // only 4 of 5

        cells[12] = Symbol::Jackpot;
        let grid = Grid::new(5, 3, cells).unwrap();
        assert!(grid.backs_jackpot());
    }

    #[test]
    fn test_win_level_thresholds() {
        assert_eq!(WinLevel::from_payout(0, 100, false), WinLevel::None);
        assert_eq!(WinLevel::from_payout(50, 100, false), WinLevel::Small);
        assert_eq!(WinLevel::from_payout(999, 100, false), WinLevel::Small);
        assert_eq!(WinLevel::from_payout(1_000, 100, false), WinLevel::Medium);
        assert_eq!(WinLevel::from_payout(5_000, 100, false), WinLevel::Large);
        assert_eq!(WinLevel::from_payout(0, 100, true), WinLevel::Jackpot);
        assert_eq!(WinLevel::from_payout(10, 0, false), WinLevel::Large);
    }

    #[test]
    fn test_sanitize_downgrades_unbacked_jackpot() {
        let grid = Grid::filled(5, 3, Symbol::Cherry);
        let claimed = outcome_with(grid, 10_500, true, 10_000);

        let sanitized = claimed.sanitize(&stake());
        assert!(!sanitized.jackpot_hit);
        assert_eq!(sanitized.jackpot_amount, 0);
        assert_eq!(sanitized.winnings, 500);
        assert_eq!(sanitized.win_level, WinLevel::Small);
    }

    #[test]
    fn test_sanitize_keeps_backed_jackpot() {
        let grid = Grid::filled(5, 3, Symbol::Jackpot);
        let claimed = outcome_with(grid, 10_500, true, 10_000);

        let sanitized = claimed.clone().sanitize(&stake());
        assert_eq!(sanitized, claimed);
    }

    #[test]
    fn test_sanitize_fixes_jackpot_level_without_flag() {
        let mut outcome = outcome_with(Grid::filled(5, 3, Symbol::Cherry), 200, false, 0);
        outcome.win_level = WinLevel::Jackpot;
        let sanitized = outcome.sanitize(&stake());
        assert_eq!(sanitized.win_level, WinLevel::Small);
    }

    #[test]
    fn test_outcome_roundtrip() {
        let outcome = Outcome {
            grid: Grid::filled(3, 3, Symbol::Seven),
            winnings: 900,
            win_level: WinLevel::Medium,
            wins: WinBreakdown::Lines(vec![LineWin {
                line: 2,
                symbol: Symbol::Seven,
                count: 3,
                amount: 900,
            }]),
            bonus_spins_awarded: 5,
            jackpot_hit: false,
            jackpot_amount: 0,
        };
        let encoded = outcome.encode();
        assert_eq!(encoded.len(), outcome.encode_size());
        assert_eq!(Outcome::read(&mut &encoded[..]).unwrap(), outcome);
    }

    #[test]
    fn test_ways_outcome_roundtrip() {
        let outcome = Outcome {
            grid: Grid::filled(5, 4, Symbol::Bell),
            winnings: 2_048,
            win_level: WinLevel::Medium,
            wins: WinBreakdown::Ways(vec![WaysWin {
                symbol: Symbol::Bell,
                count: 5,
                ways: 1_024,
                amount: 2_048,
            }]),
            bonus_spins_awarded: 0,
            jackpot_hit: false,
            jackpot_amount: 0,
        };
        let encoded = outcome.encode();
        assert_eq!(Outcome::read(&mut &encoded[..]).unwrap(), outcome);
    }

    #[test]
    fn test_grid_decode_rejects_shape_mismatch() {
        let grid = Grid::filled(5, 3, Symbol::Bar);
        let mut encoded = grid.encode().to_vec();
        encoded[0] = 4; // claim 4 reels but carry 15 cells
        assert!(Grid::read(&mut &encoded[..]).is_err());
    }
}
