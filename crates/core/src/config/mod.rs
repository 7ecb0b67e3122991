use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{Result, VibeatError};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub scheduler: SchedulerConfig,
    pub tone: ToneConfig,
}

impl AppConfig {
    /// Reads a JSON configuration file. Sections or fields that are absent
    /// keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.audio.validate()?;
        self.scheduler.validate()?;
        self.tone.validate()
    }
}

/// Audio subsystem settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub block_size: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            block_size: 256,
        }
    }
}

impl AudioConfig {
    fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(VibeatError::InvalidInput("sample rate must be positive"));
        }
        if self.block_size == 0 {
            return Err(VibeatError::InvalidInput("block size must be positive"));
        }
        Ok(())
    }
}

/// Timing of the lookahead loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How far past the audio clock events are committed, in seconds.
    pub lookahead_secs: f64,
    /// Pause between two scheduling passes, in milliseconds.
    pub rearm_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lookahead_secs: 0.1,
            rearm_interval_ms: 25,
        }
    }
}

impl SchedulerConfig {
    pub fn rearm_interval(&self) -> Duration {
        Duration::from_millis(self.rearm_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.lookahead_secs > 0.0) {
            return Err(VibeatError::InvalidInput("lookahead window must be positive"));
        }
        if self.rearm_interval_ms == 0 {
            return Err(VibeatError::InvalidInput("re-arm interval must be positive"));
        }
        // A pass has to come around before the window it filled runs dry.
        if self.rearm_interval().as_secs_f64() >= self.lookahead_secs {
            return Err(VibeatError::InvalidInput(
                "re-arm interval must be shorter than the lookahead window",
            ));
        }
        Ok(())
    }
}

/// Voicing of the click tones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToneConfig {
    pub downbeat_hz: f32,
    pub beat_hz: f32,
    pub subdivision_hz: f32,
    /// Gain of subdivision ticks relative to their main beat.
    pub subdivision_gain: f32,
    pub decay_secs: f64,
    /// Level the exponential decay ramps down to.
    pub decay_floor: f32,
}

impl Default for ToneConfig {
    fn default() -> Self {
        Self {
            downbeat_hz: 880.0,
            beat_hz: 440.0,
            subdivision_hz: 220.0,
            subdivision_gain: 0.5,
            decay_secs: 0.05,
            decay_floor: 0.000_01,
        }
    }
}

impl ToneConfig {
    fn validate(&self) -> Result<()> {
        if !(self.decay_secs > 0.0) {
            return Err(VibeatError::InvalidInput("tone decay must be positive"));
        }
        if !(self.decay_floor > 0.0) {
            return Err(VibeatError::InvalidInput("decay floor must be positive"));
        }
        Ok(())
    }
}
