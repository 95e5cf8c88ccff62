/*!
 # Daily schedule

 A schedule is an ordered list of time-of-day blocks, each bound to a
 recipe. Blocks whose start is after their end span midnight. When blocks
 overlap, the one declared last wins.
*/

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::recipes;
use crate::{Error, Result};

/// Minutes in a day; valid minute values are `0..MINUTES_PER_DAY`
pub const MINUTES_PER_DAY: u16 = 1440;

/// One time-of-day interval bound to a recipe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleBlock {
    /// Start, minutes since local midnight (inclusive)
    pub start: u16,
    /// End, minutes since local midnight (exclusive)
    pub end: u16,
    /// Recipe key from the catalog
    pub recipe: String,
    pub enabled: bool,
}

impl ScheduleBlock {
    pub fn new(start: u16, end: u16, recipe: impl Into<String>, enabled: bool) -> Self {
        Self {
            start,
            end,
            recipe: recipe.into(),
            enabled,
        }
    }

    /// True when the block spans midnight
    pub fn wraps(&self) -> bool {
        self.start > self.end
    }

    /// Membership test for a minute of the day
    pub fn contains(&self, minute: u16) -> bool {
        if self.wraps() {
            minute >= self.start || minute < self.end
        } else {
            self.start <= minute && minute < self.end
        }
    }

    fn validate(&self) -> Result<()> {
        if self.start >= MINUTES_PER_DAY || self.end >= MINUTES_PER_DAY {
            return Err(Error::InvalidSchedule(format!(
                "block {}-{} outside 0..={}",
                self.start,
                self.end,
                MINUTES_PER_DAY - 1
            )));
        }
        if !recipes::exists(&self.recipe) {
            return Err(Error::UnknownRecipe(self.recipe.clone()));
        }
        Ok(())
    }
}

impl FromStr for ScheduleBlock {
    type Err = Error;

    /// Parses `HH:MM-HH:MM=recipe` into an enabled block
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidSchedule(format!("expected HH:MM-HH:MM=recipe, got '{}'", s));
        let (range, recipe) = s.split_once('=').ok_or_else(invalid)?;
        let (start, end) = range.split_once('-').ok_or_else(invalid)?;
        let recipe = recipe.trim();
        if !recipes::exists(recipe) {
            return Err(Error::UnknownRecipe(recipe.to_string()));
        }
        Ok(ScheduleBlock::new(
            parse_clock(start).ok_or_else(invalid)?,
            parse_clock(end).ok_or_else(invalid)?,
            recipe,
            true,
        ))
    }
}

fn parse_clock(s: &str) -> Option<u16> {
    let (hour, minute) = s.trim().split_once(':')?;
    to_minutes(hour.parse().ok()?, minute.parse().ok()?).ok()
}

/// The persisted schedule document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub version: u8,
    pub enabled: bool,
    pub blocks: Vec<ScheduleBlock>,
}

impl Default for Schedule {
    /// Empty and disabled
    fn default() -> Self {
        Self {
            version: 1,
            enabled: false,
            blocks: Vec::new(),
        }
    }
}

impl Schedule {
    pub fn new(version: u8, blocks: Vec<ScheduleBlock>) -> Self {
        Self {
            version,
            enabled: true,
            blocks,
        }
    }

    /// The block governing `minute`, if any.
    ///
    /// Disabled schedules never match. Blocks are tested from the last one
    /// declared to the first, skipping disabled blocks.
    pub fn active_block(&self, minute: u16) -> Option<&ScheduleBlock> {
        if !self.enabled {
            return None;
        }
        self.blocks
            .iter()
            .rev()
            .filter(|block| block.enabled)
            .find(|block| block.contains(minute))
    }

    /// Checks block count, minute ranges and recipe names
    pub fn validate(&self, max_blocks: usize) -> Result<()> {
        if self.blocks.len() > max_blocks {
            return Err(Error::InvalidSchedule(format!(
                "{} blocks exceeds maximum of {}",
                self.blocks.len(),
                max_blocks
            )));
        }
        self.blocks.iter().try_for_each(ScheduleBlock::validate)
    }
}

/// A block as it travels over the air: hours, minutes and a recipe code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireBlock {
    pub start_hour: u8,
    pub start_minute: u8,
    pub end_hour: u8,
    pub end_minute: u8,
    pub recipe_code: u8,
    pub enabled: bool,
}

impl WireBlock {
    /// Encoded size in bytes
    pub const LEN: usize = 6;

    pub fn from_bytes(bytes: [u8; Self::LEN]) -> Self {
        Self {
            start_hour: bytes[0],
            start_minute: bytes[1],
            end_hour: bytes[2],
            end_minute: bytes[3],
            recipe_code: bytes[4],
            enabled: bytes[5] != 0,
        }
    }

    pub fn to_bytes(self) -> [u8; Self::LEN] {
        [
            self.start_hour,
            self.start_minute,
            self.end_hour,
            self.end_minute,
            self.recipe_code,
            self.enabled as u8,
        ]
    }

    /// Converts to a schedule block. Unknown recipe codes become `off`;
    /// out-of-range hours or minutes are rejected.
    pub fn to_block(self) -> Result<ScheduleBlock> {
        let start = to_minutes(self.start_hour, self.start_minute)?;
        let end = to_minutes(self.end_hour, self.end_minute)?;
        Ok(ScheduleBlock::new(
            start,
            end,
            recipes::name_for_code(self.recipe_code),
            self.enabled,
        ))
    }

    pub fn from_block(block: &ScheduleBlock) -> Self {
        Self {
            start_hour: (block.start / 60) as u8,
            start_minute: (block.start % 60) as u8,
            end_hour: (block.end / 60) as u8,
            end_minute: (block.end % 60) as u8,
            recipe_code: recipes::index_of(&block.recipe).unwrap_or(0),
            enabled: block.enabled,
        }
    }
}

fn to_minutes(hour: u8, minute: u8) -> Result<u16> {
    if hour >= 24 || minute >= 60 {
        return Err(Error::InvalidSchedule(format!(
            "time {:02}:{:02} out of range",
            hour, minute
        )));
    }
    Ok(hour as u16 * 60 + minute as u16)
}
