//! Lookahead scheduling.
//!
//! Every pass commits all events that fall inside `[now, now + lookahead)` of
//! the *audio* clock, stamping each with its exact audio-clock time. How late
//! or early the pass itself runs only changes how many events it commits,
//! never when they sound, so timer jitter cannot turn into tempo drift.

use crate::{AccentLevel, AudioOutput, MetronomeParams, Result, SchedulerConfig, Tone, ToneConfig};

/// The scheduler's private notion of "next event" time.
///
/// Event times are derived as `anchor_time + (tick - anchor_tick) * step`
/// instead of being summed up step by step, so rounding error does not build
/// up over a long session. Changing the step re-anchors at the pending event,
/// which keeps tempo changes continuous.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PlaybackClock {
    anchor_time: f64,
    anchor_tick: u64,
    tick: u64,
    step: f64,
}

impl PlaybackClock {
    /// Restarts at `now` with a zero tick count.
    pub fn reset(&mut self, now: f64) {
        self.anchor_time = now;
        self.anchor_tick = 0;
        self.tick = 0;
    }

    /// Subdivision ticks elapsed since the last reset.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn next_event_time(&self) -> f64 {
        self.anchor_time + (self.tick - self.anchor_tick) as f64 * self.step
    }

    /// Sets the spacing of future events without moving the pending one.
    pub fn set_step(&mut self, step: f64) {
        if step != self.step {
            self.anchor_time = self.next_event_time();
            self.anchor_tick = self.tick;
            self.step = step;
        }
    }

    pub fn advance(&mut self) {
        self.tick += 1;
    }
}

/// One scheduling decision. Silent ticks are reported too, with no tone.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledEvent {
    pub time: f64,
    pub tick: u64,
    /// 1-indexed main beat the tick belongs to.
    pub beat: usize,
    /// Position inside the main beat; 0 is the main beat itself.
    pub subdivision_offset: u64,
    pub tone: Option<Tone>,
}

impl ScheduledEvent {
    pub fn is_main_beat(&self) -> bool {
        self.subdivision_offset == 0
    }
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    clock: PlaybackClock,
    lookahead: f64,
    tone: ToneConfig,
    current_beat: usize,
}

impl Scheduler {
    pub fn new(config: &SchedulerConfig, tone: &ToneConfig) -> Self {
        Self {
            clock: PlaybackClock::default(),
            lookahead: config.lookahead_secs,
            tone: tone.clone(),
            current_beat: 0,
        }
    }

    /// Resets the clock for a fresh Stopped → Playing transition.
    pub fn start(&mut self, now: f64) {
        self.clock.reset(now);
        self.current_beat = 0;
    }

    pub fn stop(&mut self) {
        self.current_beat = 0;
    }

    pub fn clock(&self) -> &PlaybackClock {
        &self.clock
    }

    /// Main beat (1-indexed) of the most recent decision, 0 before any.
    pub fn current_beat(&self) -> usize {
        self.current_beat
    }

    /// Commits every event due before `now + lookahead` to `output`.
    pub fn schedule_ahead(
        &mut self,
        now: f64,
        params: &MetronomeParams,
        output: &mut dyn AudioOutput,
    ) -> Result<Vec<ScheduledEvent>> {
        let bpm = params.tempo.bpm();
        let beats = params.beat_count().get() as u64;
        assert!(bpm > 0, "tempo must be positive before scheduling");
        assert!(beats >= 1, "beat count must be at least one");

        let mut events = Vec::new();
        while self.clock.next_event_time() < now + self.lookahead {
            let seconds_per_beat = params.tempo.seconds_per_beat();
            self.clock
                .set_step(seconds_per_beat * params.subdivision.multiplier());

            let per_beat = params.subdivision.per_beat();
            let tick = self.clock.tick();
            let main_index = ((tick / per_beat) % beats) as usize;
            let offset = tick % per_beat;
            self.current_beat = main_index + 1;

            let time = self.clock.next_event_time();
            let level = params.accent(main_index).unwrap_or(AccentLevel::Mute);
            let tone = self.voice(time, main_index, offset, level);
            if let Some(tone) = tone {
                tracing::trace!(time, beat = main_index + 1, offset, gain = tone.gain, "tone scheduled");
                output.schedule_tone(tone)?;
            }

            events.push(ScheduledEvent {
                time,
                tick,
                beat: main_index + 1,
                subdivision_offset: offset,
                tone,
            });
            self.clock.advance();
        }

        Ok(events)
    }

    /// Pitch and volume for one tick. A muted main beat silences all of its
    /// subdivisions as well.
    fn voice(&self, time: f64, main_index: usize, offset: u64, level: AccentLevel) -> Option<Tone> {
        let main_gain = level.gain();
        if main_gain <= 0.0 {
            return None;
        }

        let (gain, frequency) = if offset == 0 {
            let pitch = if main_index == 0 {
                self.tone.downbeat_hz
            } else {
                self.tone.beat_hz
            };
            (main_gain, pitch)
        } else {
            (main_gain * self.tone.subdivision_gain, self.tone.subdivision_hz)
        };

        (gain > 0.0).then_some(Tone {
            start: time,
            frequency,
            gain,
            duration: self.tone.decay_secs,
        })
    }
}
