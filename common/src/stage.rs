use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString, FromRepr};

/// One of the three independently compiled, independently provable sub-circuits.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumIter,
    EnumString,
    FromRepr,
    Serialize,
    Deserialize,
)]
#[repr(u8)]
pub enum Stage {
    /// Point validation and hash-to-curve.
    #[strum(serialize = "stage1")]
    #[serde(rename = "stage1")]
    One = 1,
    /// Two-pair Miller loop.
    #[strum(serialize = "stage2")]
    #[serde(rename = "stage2")]
    Two = 2,
    /// Final exponentiation and identity check.
    #[strum(serialize = "stage3")]
    #[serde(rename = "stage3")]
    Three = 3,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::One, Stage::Two, Stage::Three];

    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn next(self) -> Option<Stage> {
        Stage::from_repr(self.index() + 1)
    }

    pub fn previous(self) -> Option<Stage> {
        self.index().checked_sub(1).and_then(Stage::from_repr)
    }

    /// Stages to operate on: either the single `only` stage or all three, in order.
    pub fn selection(only: Option<Stage>) -> Vec<Stage> {
        match only {
            Some(stage) => vec![stage],
            None => Stage::ALL.to_vec(),
        }
    }
}
