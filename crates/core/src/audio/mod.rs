//! Audio clock and tone emission.
//!
//! The scheduler never plays anything "now". It hands [`Tone`]s stamped with
//! an audio-clock time to an [`AudioOutput`], which is responsible for
//! starting them on exactly that sample.

mod device;
mod render;

pub use device::SoftwareDevice;
#[cfg(feature = "cpal")]
pub use device::DeviceOutput;
pub use render::{RenderedOutput, ToneRenderer};

use crate::Result;

/// A short decaying sine click, timestamped against the audio clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tone {
    /// Audio-clock time of the attack, in seconds.
    pub start: f64,
    pub frequency: f32,
    pub gain: f32,
    /// Length of the exponential decay, in seconds.
    pub duration: f64,
}

/// Hardware-driven clock plus the tone-emission primitive the engine drives.
///
/// Implementations are moved onto the scheduling worker while playing, so
/// they must be `Send`.
pub trait AudioOutput: Send + 'static {
    /// Monotonic audio-clock time in seconds.
    fn current_time(&self) -> Result<f64>;

    /// Whether the clock is currently halted (e.g. waiting for an autoplay
    /// gesture or a device start).
    fn is_suspended(&self) -> Result<bool>;

    fn resume(&mut self) -> Result<()>;

    /// Queues a tone to start at `tone.start` on the audio clock.
    fn schedule_tone(&mut self, tone: Tone) -> Result<()>;

    /// Drops every queued tone that has not finished sounding.
    fn cancel_pending(&mut self) -> Result<()>;
}
