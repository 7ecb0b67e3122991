use serde::{Deserialize, Serialize};

use crate::BeatCount;

/// Distance under which a stored gain is considered equal to a level. Gains
/// pass through JSON and shared links, so exact equality cannot be relied on.
pub const LEVEL_TOLERANCE: f32 = 0.001;

/// One of the four loudness tiers a main beat can carry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccentLevel {
    Mute,
    Soft,
    #[default]
    Medium,
    Strong,
}

impl AccentLevel {
    /// Levels in cycling order.
    pub const ORDER: [AccentLevel; 4] = [
        AccentLevel::Mute,
        AccentLevel::Soft,
        AccentLevel::Medium,
        AccentLevel::Strong,
    ];

    pub fn gain(self) -> f32 {
        match self {
            AccentLevel::Mute => 0.0,
            AccentLevel::Soft => 1.0 / 3.0,
            AccentLevel::Medium => 2.0 / 3.0,
            AccentLevel::Strong => 1.0,
        }
    }

    /// Maps a continuous gain back onto a level, if one lies within
    /// [`LEVEL_TOLERANCE`].
    pub fn from_gain(gain: f32) -> Option<Self> {
        Self::ORDER
            .into_iter()
            .find(|level| (level.gain() - gain).abs() < LEVEL_TOLERANCE)
    }

    /// The level closest to `gain`, however far away it is.
    pub fn nearest(gain: f32) -> Self {
        Self::ORDER
            .into_iter()
            .min_by(|a, b| {
                let da = (a.gain() - gain).abs();
                let db = (b.gain() - gain).abs();
                da.total_cmp(&db)
            })
            .unwrap_or_default()
    }

    /// The next level in the cycle, wrapping from strong back to mute.
    pub fn next(self) -> Self {
        Self::ORDER[(self.position() + 1) % Self::ORDER.len()]
    }

    /// Integer code used by shared links and presets (1 = mute .. 4 = strong).
    pub fn share_code(self) -> u8 {
        self.position() as u8 + 1
    }

    /// Inverse of [`AccentLevel::share_code`]. Unknown codes decode as mute.
    pub fn from_share_code(code: u8) -> Self {
        code.checked_sub(1)
            .and_then(|index| Self::ORDER.get(usize::from(index)).copied())
            .unwrap_or(AccentLevel::Mute)
    }

    fn position(self) -> usize {
        match self {
            AccentLevel::Mute => 0,
            AccentLevel::Soft => 1,
            AccentLevel::Medium => 2,
            AccentLevel::Strong => 3,
        }
    }
}

/// Per-beat accent levels. Its length is the bar's beat count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccentPattern {
    levels: Vec<AccentLevel>,
}

impl AccentPattern {
    /// Fresh pattern: a strong downbeat followed by medium beats.
    pub fn new(beats: BeatCount) -> Self {
        let mut levels = vec![AccentLevel::Medium; beats.get()];
        levels[0] = AccentLevel::Strong;
        Self { levels }
    }

    /// Builds a pattern from explicit levels, clamping the length to the
    /// supported beat range. An empty input yields a fresh one-beat pattern.
    pub fn from_levels(levels: impl IntoIterator<Item = AccentLevel>) -> Self {
        let mut levels: Vec<AccentLevel> = levels.into_iter().collect();
        if levels.is_empty() {
            return Self::new(BeatCount::clamped(1));
        }
        levels.truncate(BeatCount::MAX);
        Self { levels }
    }

    pub fn beat_count(&self) -> BeatCount {
        BeatCount::clamped(self.levels.len() as i64)
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Truncates or extends the pattern. Overlapping entries keep their
    /// position and level; new slots start at medium.
    pub fn resize(&mut self, beats: BeatCount) {
        self.levels.resize(beats.get(), AccentLevel::Medium);
    }

    pub fn level(&self, index: usize) -> Option<AccentLevel> {
        self.levels.get(index).copied()
    }

    pub fn set(&mut self, index: usize, level: AccentLevel) -> bool {
        match self.levels.get_mut(index) {
            Some(slot) => {
                *slot = level;
                true
            }
            None => false,
        }
    }

    /// Advances the level at `index` to the next one in the cycle and returns
    /// it. Out-of-range indices leave the pattern untouched.
    pub fn cycle(&mut self, index: usize) -> Option<AccentLevel> {
        let slot = self.levels.get_mut(index)?;
        *slot = slot.next();
        Some(*slot)
    }

    pub fn levels(&self) -> &[AccentLevel] {
        &self.levels
    }

    pub fn gains(&self) -> impl Iterator<Item = f32> + '_ {
        self.levels.iter().map(|level| level.gain())
    }
}

impl Default for AccentPattern {
    fn default() -> Self {
        Self::new(BeatCount::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beats(n: usize) -> BeatCount {
        BeatCount::new(n).unwrap()
    }

    #[test]
    fn fresh_pattern_has_strong_downbeat() {
        let pattern = AccentPattern::new(beats(4));
        assert_eq!(
            pattern.levels(),
            &[
                AccentLevel::Strong,
                AccentLevel::Medium,
                AccentLevel::Medium,
                AccentLevel::Medium
            ]
        );
    }

    #[test]
    fn cycling_four_times_is_identity() {
        for start in AccentLevel::ORDER {
            let mut level = start;
            for _ in 0..4 {
                level = level.next();
            }
            assert_eq!(level, start);
        }
        assert_eq!(AccentLevel::Strong.next(), AccentLevel::Mute);
    }

    #[test]
    fn cycle_only_touches_one_entry() {
        let mut pattern = AccentPattern::new(beats(3));
        assert_eq!(pattern.cycle(1), Some(AccentLevel::Strong));
        assert_eq!(pattern.cycle(0), Some(AccentLevel::Mute));
        assert_eq!(pattern.level(2), Some(AccentLevel::Medium));
        assert_eq!(pattern.cycle(7), None);
    }

    #[test]
    fn resize_preserves_overlap() {
        let mut pattern = AccentPattern::new(beats(4));
        pattern.set(1, AccentLevel::Mute);
        pattern.set(3, AccentLevel::Soft);

        pattern.resize(beats(2));
        assert_eq!(pattern.levels(), &[AccentLevel::Strong, AccentLevel::Mute]);

        pattern.resize(beats(5));
        assert_eq!(
            pattern.levels(),
            &[
                AccentLevel::Strong,
                AccentLevel::Mute,
                AccentLevel::Medium,
                AccentLevel::Medium,
                AccentLevel::Medium
            ]
        );
    }

    #[test]
    fn resize_never_rewrites_an_existing_downbeat() {
        let mut pattern = AccentPattern::new(beats(2));
        pattern.set(0, AccentLevel::Soft);
        pattern.resize(beats(8));
        assert_eq!(pattern.level(0), Some(AccentLevel::Soft));
    }

    #[test]
    fn gains_match_within_tolerance() {
        assert_eq!(AccentLevel::from_gain(0.6667), Some(AccentLevel::Medium));
        assert_eq!(AccentLevel::from_gain(0.333), Some(AccentLevel::Soft));
        assert_eq!(AccentLevel::from_gain(0.5), None);
        assert_eq!(AccentLevel::nearest(0.9), AccentLevel::Strong);
        assert_eq!(AccentLevel::nearest(-1.0), AccentLevel::Mute);
        assert_eq!(AccentLevel::nearest(0.4), AccentLevel::Soft);
    }

    #[test]
    fn share_codes() {
        for level in AccentLevel::ORDER {
            assert_eq!(AccentLevel::from_share_code(level.share_code()), level);
        }
        assert_eq!(AccentLevel::Mute.share_code(), 1);
        assert_eq!(AccentLevel::Strong.share_code(), 4);
        assert_eq!(AccentLevel::from_share_code(0), AccentLevel::Mute);
        assert_eq!(AccentLevel::from_share_code(9), AccentLevel::Mute);
    }
}
