//! Core library for the ViBeat metronome.
//!
//! The heart of the crate is a lookahead scheduler ([`Scheduler`]) that
//! commits clicks against an audio clock a short window ahead of time, and
//! the [`Metronome`] engine that drives it from a worker thread. Around it
//! sit the accent and tap-tempo models, the settings-sharing codec, and a
//! small preset store.

pub mod accent;
pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod params;
pub mod presets;
pub mod share;
pub mod tap;
pub mod timeline;

pub use accent::{AccentLevel, AccentPattern};
pub use audio::{AudioOutput, RenderedOutput, SoftwareDevice, Tone, ToneRenderer};
#[cfg(feature = "cpal")]
pub use audio::DeviceOutput;
pub use config::{AppConfig, AudioConfig, SchedulerConfig, ToneConfig};
pub use engine::{BeatMonitor, Metronome};
pub use error::{Result, VibeatError};
pub use params::{BeatCount, MetronomeParams, Subdivision, Tempo};
pub use presets::{Preset, PresetStore};
pub use share::{EncodedSettings, MetronomeSettings};
pub use tap::TapTempo;
pub use timeline::{PlaybackClock, ScheduledEvent, Scheduler};
