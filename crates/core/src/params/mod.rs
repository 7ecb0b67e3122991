use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{AccentLevel, AccentPattern, Result, VibeatError};

/// Beats per minute, always within [`Tempo::MIN`, `Tempo::MAX`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Tempo(u32);

impl Tempo {
    pub const MIN: u32 = 20;
    pub const MAX: u32 = 500;

    /// Builds a tempo, rejecting values outside the supported range.
    pub fn new(bpm: u32) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&bpm) {
            Ok(Self(bpm))
        } else {
            Err(VibeatError::OutOfRange {
                what: "tempo",
                value: i64::from(bpm),
                min: i64::from(Self::MIN),
                max: i64::from(Self::MAX),
            })
        }
    }

    /// Builds a tempo by clamping to the supported range. Sliders and the tap
    /// estimator produce tempos through this path.
    pub fn clamped(bpm: i64) -> Self {
        Self(bpm.clamp(i64::from(Self::MIN), i64::from(Self::MAX)) as u32)
    }

    pub fn bpm(self) -> u32 {
        self.0
    }

    pub fn seconds_per_beat(self) -> f64 {
        60.0 / f64::from(self.0)
    }
}

impl Default for Tempo {
    fn default() -> Self {
        Self(120)
    }
}

impl TryFrom<u32> for Tempo {
    type Error = VibeatError;

    fn try_from(value: u32) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Tempo> for u32 {
    fn from(value: Tempo) -> Self {
        value.0
    }
}

impl fmt::Display for Tempo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} BPM", self.0)
    }
}

/// Number of main beats per bar, always within [1, 16].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BeatCount(usize);

impl BeatCount {
    pub const MIN: usize = 1;
    pub const MAX: usize = 16;

    pub fn new(beats: usize) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&beats) {
            Ok(Self(beats))
        } else {
            Err(VibeatError::OutOfRange {
                what: "beat count",
                value: beats as i64,
                min: Self::MIN as i64,
                max: Self::MAX as i64,
            })
        }
    }

    pub fn clamped(beats: i64) -> Self {
        Self(beats.clamp(Self::MIN as i64, Self::MAX as i64) as usize)
    }

    pub fn get(self) -> usize {
        self.0
    }
}

impl Default for BeatCount {
    fn default() -> Self {
        Self(4)
    }
}

/// Note value ticked between main beats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subdivision {
    #[default]
    Quarter,
    Eighth,
    Sixteenth,
    Triplet,
}

impl Subdivision {
    pub const ALL: [Subdivision; 4] = [
        Subdivision::Quarter,
        Subdivision::Eighth,
        Subdivision::Sixteenth,
        Subdivision::Triplet,
    ];

    /// Fraction of one beat taken by a single subdivision tick.
    pub fn multiplier(self) -> f64 {
        1.0 / self.per_beat() as f64
    }

    /// Number of ticks making up one main beat.
    pub fn per_beat(self) -> u64 {
        match self {
            Subdivision::Quarter => 1,
            Subdivision::Eighth => 2,
            Subdivision::Sixteenth => 4,
            Subdivision::Triplet => 3,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Subdivision::Quarter => "Quarter",
            Subdivision::Eighth => "Eighth",
            Subdivision::Sixteenth => "Sixteenth",
            Subdivision::Triplet => "Triplet",
        }
    }
}

impl FromStr for Subdivision {
    type Err = VibeatError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|sub| sub.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| VibeatError::UnknownSubdivision(s.to_string()))
    }
}

impl fmt::Display for Subdivision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parameter record pushed from the host into the engine. The beat count is
/// the length of the accent pattern, so the two can never disagree.
#[derive(Debug, Clone, PartialEq)]
pub struct MetronomeParams {
    pub tempo: Tempo,
    pub accents: AccentPattern,
    pub subdivision: Subdivision,
}

impl MetronomeParams {
    pub fn new(tempo: Tempo, beats: BeatCount, subdivision: Subdivision) -> Self {
        Self {
            tempo,
            accents: AccentPattern::new(beats),
            subdivision,
        }
    }

    pub fn beat_count(&self) -> BeatCount {
        self.accents.beat_count()
    }

    /// Resizes the accent pattern, keeping overlapping entries in place.
    pub fn set_beat_count(&mut self, beats: BeatCount) {
        self.accents.resize(beats);
    }

    pub fn accent(&self, index: usize) -> Option<AccentLevel> {
        self.accents.level(index)
    }
}

impl Default for MetronomeParams {
    fn default() -> Self {
        Self::new(Tempo::default(), BeatCount::default(), Subdivision::Quarter)
    }
}
