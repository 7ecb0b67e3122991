use std::{
    f64::consts::TAU,
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use ringbuf::{
    traits::{Consumer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};

use crate::{AudioConfig, AudioOutput, Result, Tone, ToneConfig, VibeatError};

/// Tones that can wait between the scheduler and the next audio pull.
const TONE_QUEUE_CAPACITY: usize = 1024;

/// Voices sounding at once. Allocated up front so mixing never reallocates.
const MAX_VOICES: usize = 64;

#[derive(Debug, Clone)]
struct Voice {
    tone: Tone,
    start_frame: u64,
    end_frame: u64,
}

/// Sample-accurate mixer for scheduled tones.
///
/// The renderer owns the audio clock: time is the number of frames pulled so
/// far divided by the sample rate. While suspended, pulls produce silence and
/// the clock does not move.
#[derive(Debug)]
pub struct ToneRenderer {
    sample_rate: u32,
    decay_floor: f32,
    frames_rendered: u64,
    suspended: bool,
    voices: Vec<Voice>,
}

impl ToneRenderer {
    /// Creates a renderer that starts suspended, like a freshly created audio
    /// context before its first resume.
    pub fn new(audio: &AudioConfig, tone: &ToneConfig) -> Self {
        Self {
            sample_rate: audio.sample_rate.max(1),
            decay_floor: tone.decay_floor,
            frames_rendered: 0,
            suspended: true,
            voices: Vec::with_capacity(MAX_VOICES),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn current_time(&self) -> f64 {
        self.frames_rendered as f64 / f64::from(self.sample_rate)
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    pub fn resume(&mut self) {
        self.suspended = false;
    }

    pub fn suspend(&mut self) {
        self.suspended = true;
    }

    /// Queues a tone. Tones stamped in the past start on the next rendered
    /// frame instead of being dropped. Returns `false` when every voice is
    /// taken.
    pub fn schedule(&mut self, tone: Tone) -> bool {
        if self.voices.len() >= MAX_VOICES {
            return false;
        }
        let rate = f64::from(self.sample_rate);
        let start_frame = ((tone.start * rate).round().max(0.0) as u64).max(self.frames_rendered);
        let length = (tone.duration * rate).round().max(1.0) as u64;
        self.voices.push(Voice {
            tone,
            start_frame,
            end_frame: start_frame + length,
        });
        true
    }

    pub fn cancel_all(&mut self) {
        self.voices.clear();
    }

    /// Tones queued or still sounding.
    pub fn pending(&self) -> Vec<Tone> {
        self.voices.iter().map(|voice| voice.tone).collect()
    }

    /// Moves the clock forward to `frame` without producing output.
    pub fn skip_to(&mut self, frame: u64) {
        if frame > self.frames_rendered {
            self.frames_rendered = frame;
            self.voices.retain(|voice| voice.end_frame > frame);
        }
    }

    /// Fills a mono buffer and advances the clock by its length.
    pub fn render(&mut self, out: &mut [f32]) {
        self.render_interleaved(out, 1);
    }

    /// Fills an interleaved buffer, writing the same signal to every channel.
    pub fn render_interleaved(&mut self, out: &mut [f32], channels: usize) {
        if self.suspended {
            out.fill(0.0);
            return;
        }

        let channels = channels.max(1);
        for frame in out.chunks_mut(channels) {
            let value = self.sample_at(self.frames_rendered);
            frame.fill(value);
            self.frames_rendered += 1;
        }

        let now = self.frames_rendered;
        self.voices.retain(|voice| voice.end_frame > now);
    }

    fn sample_at(&self, frame: u64) -> f32 {
        let rate = f64::from(self.sample_rate);
        let mut sum = 0.0_f64;
        for voice in &self.voices {
            if frame < voice.start_frame || frame >= voice.end_frame {
                continue;
            }
            let t = (frame - voice.start_frame) as f64 / rate;
            sum += envelope(&voice.tone, self.decay_floor, t)
                * (TAU * f64::from(voice.tone.frequency) * t).sin();
        }
        sum as f32
    }
}

/// Exponential ramp from the tone's gain down to `floor` over its duration.
fn envelope(tone: &Tone, floor: f32, t: f64) -> f64 {
    let gain = f64::from(tone.gain);
    if gain <= 0.0 {
        return 0.0;
    }
    let progress = (t / tone.duration).clamp(0.0, 1.0);
    gain * (f64::from(floor) / gain).powf(progress)
}

/// State the audio thread publishes without locks.
#[derive(Debug)]
struct ClockState {
    sample_rate: u32,
    frames: AtomicU64,
    suspended: AtomicBool,
    /// Bumped by every cancel; tones queued under an older value are dropped.
    generation: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
struct QueuedTone {
    tone: Tone,
    generation: u64,
}

/// Everything the audio thread touches while mixing.
struct AudioSide {
    renderer: ToneRenderer,
    queue: HeapCons<QueuedTone>,
    generation: u64,
}

impl AudioSide {
    fn drain(&mut self, clock: &ClockState) {
        self.catch_up(clock.generation.load(Ordering::Acquire));
        while let Some(queued) = self.queue.try_pop() {
            self.catch_up(queued.generation);
            if queued.generation == self.generation {
                self.renderer.schedule(queued.tone);
            }
        }
    }

    fn catch_up(&mut self, generation: u64) {
        if generation > self.generation {
            self.renderer.cancel_all();
            self.generation = generation;
        }
    }
}

/// Shared handle to a [`ToneRenderer`]. One clone lives on the scheduling
/// worker, another on whatever pulls audio out of it.
///
/// Tones reach the audio thread through a lock-free ring, and the clock and
/// suspension flag are atomics, so the scheduling side never contends with
/// the pull. The pull itself only `try_lock`s the renderer and writes silence
/// when it is busy.
#[derive(Clone)]
pub struct RenderedOutput {
    clock: Arc<ClockState>,
    tones: Arc<Mutex<HeapProd<QueuedTone>>>,
    audio: Arc<Mutex<AudioSide>>,
}

impl RenderedOutput {
    pub fn new(renderer: ToneRenderer) -> Self {
        let (producer, consumer) = HeapRb::<QueuedTone>::new(TONE_QUEUE_CAPACITY).split();
        let clock = ClockState {
            sample_rate: renderer.sample_rate(),
            frames: AtomicU64::new(renderer.frames_rendered()),
            suspended: AtomicBool::new(renderer.is_suspended()),
            generation: AtomicU64::new(0),
        };
        Self {
            clock: Arc::new(clock),
            tones: Arc::new(Mutex::new(producer)),
            audio: Arc::new(Mutex::new(AudioSide {
                renderer,
                queue: consumer,
                generation: 0,
            })),
        }
    }

    pub fn from_config(audio: &AudioConfig, tone: &ToneConfig) -> Self {
        Self::new(ToneRenderer::new(audio, tone))
    }

    pub fn render(&self, out: &mut [f32]) {
        self.render_interleaved(out, 1);
    }

    /// Audio-thread pull. Never blocks.
    pub fn render_interleaved(&self, out: &mut [f32], channels: usize) {
        let clock = &self.clock;
        let suspended = clock.suspended.load(Ordering::Acquire);

        let Ok(mut side) = self.audio.try_lock() else {
            out.fill(0.0);
            if !suspended {
                let frames = out.len().div_ceil(channels.max(1)) as u64;
                clock.frames.fetch_add(frames, Ordering::AcqRel);
            }
            return;
        };

        if suspended {
            side.renderer.suspend();
        } else {
            side.renderer.resume();
        }
        side.renderer.skip_to(clock.frames.load(Ordering::Acquire));
        side.drain(clock);
        side.renderer.render_interleaved(out, channels);
        clock
            .frames
            .store(side.renderer.frames_rendered(), Ordering::Release);
    }

    pub fn sample_rate(&self) -> u32 {
        self.clock.sample_rate
    }

    /// Tones queued or still sounding. Holds the renderer while it runs, so
    /// the audio thread writes silence for any pull that overlaps it.
    pub fn pending(&self) -> Result<Vec<Tone>> {
        let mut side = self
            .audio
            .lock()
            .map_err(|_| VibeatError::msg("tone renderer has been poisoned"))?;
        side.drain(&self.clock);
        Ok(side.renderer.pending())
    }

    pub fn suspend(&self) {
        self.clock.suspended.store(true, Ordering::Release);
    }
}

impl AudioOutput for RenderedOutput {
    fn current_time(&self) -> Result<f64> {
        let frames = self.clock.frames.load(Ordering::Acquire);
        Ok(frames as f64 / f64::from(self.clock.sample_rate))
    }

    fn is_suspended(&self) -> Result<bool> {
        Ok(self.clock.suspended.load(Ordering::Acquire))
    }

    fn resume(&mut self) -> Result<()> {
        self.clock.suspended.store(false, Ordering::Release);
        Ok(())
    }

    fn schedule_tone(&mut self, tone: Tone) -> Result<()> {
        let generation = self.clock.generation.load(Ordering::Acquire);
        let mut tones = self
            .tones
            .lock()
            .map_err(|_| VibeatError::msg("tone queue has been poisoned"))?;
        tones
            .try_push(QueuedTone { tone, generation })
            .map_err(|_| VibeatError::Device("tone queue is full".into()))
    }

    fn cancel_pending(&mut self) -> Result<()> {
        self.clock.generation.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

impl fmt::Debug for RenderedOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderedOutput")
            .field("clock", &self.clock)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn renderer(sample_rate: u32) -> ToneRenderer {
        let audio = AudioConfig {
            sample_rate,
            ..Default::default()
        };
        let mut renderer = ToneRenderer::new(&audio, &ToneConfig::default());
        renderer.resume();
        renderer
    }

    fn click(start: f64) -> Tone {
        Tone {
            start,
            frequency: 440.0,
            gain: 1.0,
            duration: 0.05,
        }
    }

    #[test]
    fn tone_starts_on_its_sample() {
        let mut renderer = renderer(1_000);
        renderer.schedule(click(0.010));

        let mut block = vec![0.0_f32; 20];
        renderer.render(&mut block);

        assert!(block[..10].iter().all(|s| *s == 0.0));
        // Frame 10 is the attack (sin(0) == 0); the next one must sound.
        assert!(block[11].abs() > 0.1);
    }

    #[test]
    fn decays_towards_the_floor() {
        let mut renderer = renderer(48_000);
        renderer.schedule(click(0.0));

        let mut block = vec![0.0_f32; 2_400];
        renderer.render(&mut block);

        let head = block[..240].iter().fold(0.0_f32, |m, s| m.max(s.abs()));
        let tail = block[2_160..].iter().fold(0.0_f32, |m, s| m.max(s.abs()));
        assert!(head > 0.5);
        assert!(tail < 0.001);
        assert!(renderer.pending().is_empty());
    }

    #[test]
    fn suspended_clock_is_frozen_and_silent() {
        let mut renderer = renderer(1_000);
        renderer.suspend();
        renderer.schedule(click(0.0));

        let mut block = vec![1.0_f32; 64];
        renderer.render(&mut block);

        assert!(block.iter().all(|s| *s == 0.0));
        assert_eq!(renderer.current_time(), 0.0);
        assert_eq!(renderer.pending().len(), 1);
    }

    #[test]
    fn cancel_silences_queued_tones() {
        let mut renderer = renderer(1_000);
        renderer.schedule(click(0.005));
        renderer.schedule(click(0.030));
        renderer.cancel_all();

        let mut block = vec![0.0_f32; 100];
        renderer.render(&mut block);
        assert!(block.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn late_tones_start_immediately() {
        let mut renderer = renderer(1_000);
        let mut block = vec![0.0_f32; 100];
        renderer.render(&mut block);

        renderer.schedule(click(0.02));
        renderer.render(&mut block);
        assert!(block[1].abs() > 0.1);
    }

    #[test]
    fn interleaved_output_duplicates_channels() {
        let mut renderer = renderer(1_000);
        renderer.schedule(click(0.0));

        let mut block = vec![0.0_f32; 40];
        renderer.render_interleaved(&mut block, 2);

        assert_eq!(renderer.frames_rendered(), 20);
        for frame in block.chunks(2) {
            assert_eq!(frame[0], frame[1]);
        }
    }

    #[test]
    fn shared_handle_drives_the_clock() {
        let mut output = RenderedOutput::from_config(&AudioConfig::default(), &ToneConfig::default());
        assert!(output.is_suspended().unwrap());
        output.resume().unwrap();

        let mut block = vec![0.0_f32; 4_800];
        output.render(&mut block);
        assert!((output.current_time().unwrap() - 0.1).abs() < 1e-9);
    }

    fn shared_output(sample_rate: u32) -> RenderedOutput {
        let audio = AudioConfig {
            sample_rate,
            ..Default::default()
        };
        let mut output = RenderedOutput::from_config(&audio, &ToneConfig::default());
        output.resume().unwrap();
        output
    }

    #[test]
    fn busy_renderer_writes_silence_without_waiting() {
        let mut output = shared_output(1_000);
        output.schedule_tone(click(0.0)).unwrap();

        let held = output.clone();
        let guard = held.audio.lock().unwrap();
        let mut block = vec![1.0_f32; 40];
        let started = std::time::Instant::now();
        output.render_interleaved(&mut block, 2);
        let waited = started.elapsed();
        drop(guard);

        assert!(waited < std::time::Duration::from_millis(20), "pull waited {waited:?}");
        assert!(block.iter().all(|s| *s == 0.0));
        // The hardware still consumed those frames.
        assert!((output.current_time().unwrap() - 0.020).abs() < 1e-9);

        // The tone stayed queued and starts on the next pull.
        output.render_interleaved(&mut block, 2);
        assert!(block.iter().any(|s| s.abs() > 0.01));
    }

    #[test]
    fn cancel_drops_queued_tones_but_not_later_ones() {
        let mut output = shared_output(1_000);
        output.schedule_tone(click(0.005)).unwrap();
        output.cancel_pending().unwrap();
        output.schedule_tone(click(0.050)).unwrap();

        let mut block = vec![0.0_f32; 100];
        output.render(&mut block);

        assert!(block[..50].iter().all(|s| *s == 0.0));
        assert!(block[51..].iter().any(|s| s.abs() > 0.1));
    }

    #[test]
    fn suspend_freezes_the_shared_clock() {
        let output = shared_output(1_000);
        let mut block = vec![0.0_f32; 100];
        output.render(&mut block);
        output.suspend();
        output.render(&mut block);

        assert!(output.is_suspended().unwrap());
        assert!((output.current_time().unwrap() - 0.1).abs() < 1e-9);
        assert_eq!(output.sample_rate(), 1_000);
    }

    #[test]
    fn voice_count_is_bounded() {
        let mut renderer = renderer(1_000);
        for _ in 0..MAX_VOICES {
            assert!(renderer.schedule(click(0.0)));
        }
        assert!(!renderer.schedule(click(0.0)));
        assert_eq!(renderer.pending().len(), MAX_VOICES);
    }
}
