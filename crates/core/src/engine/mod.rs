use std::{
    fmt,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard,
    },
    thread::{self, JoinHandle},
};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};

use crate::{
    AccentLevel, AccentPattern, AppConfig, AudioOutput, BeatCount, MetronomeParams,
    MetronomeSettings, Result, Scheduler, SchedulerConfig, Subdivision, Tempo, ToneConfig,
    VibeatError,
};

type OutputFactory<O> = Box<dyn FnMut() -> Result<O> + Send>;

/// Pull-side view of the beat currently being scheduled, for UI threads.
///
/// Reads 1..=beat count while playing and 0 while stopped.
#[derive(Debug, Clone)]
pub struct BeatMonitor {
    beat: Arc<AtomicUsize>,
}

impl BeatMonitor {
    pub fn current_beat(&self) -> usize {
        self.beat.load(Ordering::Acquire)
    }
}

struct Worker<O> {
    stop_tx: Sender<()>,
    handle: JoinHandle<(O, Result<()>)>,
}

/// The metronome engine.
///
/// Parameters are pushed in through the setters at any time; a running
/// worker picks them up on its next pass. The audio output is created on the
/// first [`Metronome::play`] and kept until the engine is dropped. While
/// playing it lives on the worker thread, which hands it back when stopped.
pub struct Metronome<O: AudioOutput> {
    scheduler_config: SchedulerConfig,
    tone: ToneConfig,
    params: Arc<Mutex<MetronomeParams>>,
    beat: Arc<AtomicUsize>,
    factory: OutputFactory<O>,
    output: Option<O>,
    worker: Option<Worker<O>>,
}

impl<O: AudioOutput> Metronome<O> {
    /// Creates a stopped engine. `factory` runs once, on the first play.
    pub fn new(
        config: &AppConfig,
        params: MetronomeParams,
        factory: impl FnMut() -> Result<O> + Send + 'static,
    ) -> Result<Self> {
        config.scheduler.validate()?;
        Ok(Self {
            scheduler_config: config.scheduler.clone(),
            tone: config.tone.clone(),
            params: Arc::new(Mutex::new(params)),
            beat: Arc::new(AtomicUsize::new(0)),
            factory: Box::new(factory),
            output: None,
            worker: None,
        })
    }

    /// False once stopped, and also once the worker has quit on an error.
    pub fn is_playing(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    pub fn current_beat(&self) -> usize {
        self.beat.load(Ordering::Acquire)
    }

    pub fn monitor(&self) -> BeatMonitor {
        BeatMonitor {
            beat: self.beat.clone(),
        }
    }

    /// The output while stopped; `None` before the first play or while the
    /// worker holds it.
    pub fn output(&self) -> Option<&O> {
        self.output.as_ref()
    }

    /// Stopped → Playing. Does nothing when already playing.
    pub fn play(&mut self) -> Result<()> {
        if self.is_playing() {
            return Ok(());
        }
        if self.worker.is_some() {
            // The last worker quit on its own; take the output back first.
            self.stop()?;
        }

        let mut output = match self.output.take() {
            Some(output) => output,
            None => {
                tracing::debug!("creating audio output");
                (self.factory)()?
            }
        };

        let scheduler = match self.prime(&mut output) {
            Ok(scheduler) => scheduler,
            Err(err) => {
                self.output = Some(output);
                return Err(err);
            }
        };

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let rearm = self.scheduler_config.rearm_interval();
        let params = self.params.clone();
        let beat = self.beat.clone();
        let handle = thread::Builder::new()
            .name("vibeat-scheduler".into())
            .spawn(move || {
                let mut scheduler = scheduler;
                let mut output = output;
                let result = loop {
                    // The stop token doubles as the re-arm timer, so a stop
                    // request wakes the worker instead of waiting out the
                    // interval, and no pass can start once it was sent.
                    match stop_rx.recv_timeout(rearm) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break Ok(()),
                    }
                    if let Err(err) = run_pass(&mut scheduler, &mut output, &params, &beat) {
                        tracing::error!(%err, "scheduling worker stopped");
                        beat.store(0, Ordering::Release);
                        break Err(err);
                    }
                };
                (output, result)
            })?;

        self.worker = Some(Worker { stop_tx, handle });
        tracing::debug!("metronome playing");
        Ok(())
    }

    /// Playing → Stopped. Waits for the worker to exit, then drops every tone
    /// it queued that has not sounded yet.
    pub fn stop(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            self.beat.store(0, Ordering::Release);
            return Ok(());
        };

        let _ = worker.stop_tx.send(());
        let joined = worker.handle.join();
        self.beat.store(0, Ordering::Release);
        let (mut output, outcome) =
            joined.map_err(|_| VibeatError::msg("scheduling worker panicked"))?;

        let cancelled = output.cancel_pending();
        self.output = Some(output);
        tracing::debug!("metronome stopped");

        if let Err(err) = outcome {
            tracing::warn!(%err, "worker had already stopped with an error");
        }
        cancelled
    }

    pub fn toggle(&mut self) -> Result<bool> {
        if self.is_playing() {
            self.stop()?;
        } else {
            self.play()?;
        }
        Ok(self.is_playing())
    }

    pub fn params(&self) -> Result<MetronomeParams> {
        Ok(self.lock_params()?.clone())
    }

    pub fn set_params(&self, params: MetronomeParams) -> Result<()> {
        *self.lock_params()? = params;
        Ok(())
    }

    pub fn set_tempo(&self, tempo: Tempo) -> Result<()> {
        self.lock_params()?.tempo = tempo;
        Ok(())
    }

    pub fn set_beat_count(&self, beats: BeatCount) -> Result<()> {
        self.lock_params()?.set_beat_count(beats);
        Ok(())
    }

    pub fn set_subdivision(&self, subdivision: Subdivision) -> Result<()> {
        self.lock_params()?.subdivision = subdivision;
        Ok(())
    }

    pub fn set_accents(&self, accents: AccentPattern) -> Result<()> {
        self.lock_params()?.accents = accents;
        Ok(())
    }

    /// Advances the accent of one beat to the next level.
    pub fn cycle_accent(&self, index: usize) -> Result<AccentLevel> {
        self.lock_params()?
            .accents
            .cycle(index)
            .ok_or(VibeatError::InvalidInput("accent index is past the last beat"))
    }

    pub fn apply_settings(&self, settings: &MetronomeSettings) -> Result<()> {
        self.set_params(settings.to_params())
    }

    fn prime(&self, output: &mut O) -> Result<Scheduler> {
        if output.is_suspended()? {
            tracing::debug!("resuming suspended audio clock");
            output.resume()?;
        }

        let mut scheduler = Scheduler::new(&self.scheduler_config, &self.tone);
        scheduler.start(output.current_time()?);
        run_pass(&mut scheduler, output, &self.params, &self.beat)?;
        Ok(scheduler)
    }

    fn lock_params(&self) -> Result<MutexGuard<'_, MetronomeParams>> {
        self.params
            .lock()
            .map_err(|_| VibeatError::msg("metronome parameters have been poisoned"))
    }
}

fn run_pass<O: AudioOutput>(
    scheduler: &mut Scheduler,
    output: &mut O,
    params: &Mutex<MetronomeParams>,
    beat: &AtomicUsize,
) -> Result<()> {
    let now = output.current_time()?;
    let params = params
        .lock()
        .map_err(|_| VibeatError::msg("metronome parameters have been poisoned"))?;
    scheduler.schedule_ahead(now, &params, output)?;
    beat.store(scheduler.current_beat(), Ordering::Release);
    Ok(())
}

impl<O: AudioOutput> Drop for Metronome<O> {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            tracing::warn!(%err, "failed to stop metronome on teardown");
        }
    }
}

impl<O: AudioOutput> fmt::Debug for Metronome<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metronome")
            .field("playing", &self.is_playing())
            .field("current_beat", &self.current_beat())
            .field("scheduler", &self.scheduler_config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::atomic::AtomicBool, time::Duration};

    use super::*;
    use crate::{RenderedOutput, Tone};

    /// Output whose clock the test moves by hand.
    #[derive(Clone, Default)]
    struct ManualOutput {
        now: Arc<Mutex<f64>>,
        tones: Arc<Mutex<Vec<Tone>>>,
        cancelled: Arc<AtomicUsize>,
        failing: Arc<AtomicBool>,
        panicking: Arc<AtomicBool>,
    }

    impl ManualOutput {
        fn set_time(&self, now: f64) {
            *self.now.lock().unwrap() = now;
        }

        fn starts(&self) -> Vec<f64> {
            self.tones.lock().unwrap().iter().map(|t| t.start).collect()
        }
    }

    impl AudioOutput for ManualOutput {
        fn current_time(&self) -> Result<f64> {
            if self.panicking.load(Ordering::SeqCst) {
                panic!("clock went away");
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(VibeatError::Device("clock unavailable".into()));
            }
            Ok(*self.now.lock().unwrap())
        }

        fn is_suspended(&self) -> Result<bool> {
            Ok(false)
        }

        fn resume(&mut self) -> Result<()> {
            Ok(())
        }

        fn schedule_tone(&mut self, tone: Tone) -> Result<()> {
            self.tones.lock().unwrap().push(tone);
            Ok(())
        }

        fn cancel_pending(&mut self) -> Result<()> {
            self.cancelled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn renderer() -> RenderedOutput {
        let config = AppConfig::default();
        let audio = crate::AudioConfig {
            sample_rate: 1_000,
            ..config.audio
        };
        RenderedOutput::from_config(&audio, &config.tone)
    }

    fn params(bpm: u32, beats: usize, subdivision: Subdivision) -> MetronomeParams {
        MetronomeParams::new(
            Tempo::new(bpm).unwrap(),
            BeatCount::new(beats).unwrap(),
            subdivision,
        )
    }

    fn wait_for_passes() {
        thread::sleep(Duration::from_millis(150));
    }

    #[test]
    fn rapid_start_stop_emits_nothing() {
        let output = renderer();
        let shared = output.clone();
        let mut metronome =
            Metronome::new(&AppConfig::default(), MetronomeParams::default(), move || Ok(shared.clone()))
                .unwrap();

        metronome.play().unwrap();
        metronome.stop().unwrap();

        assert_eq!(metronome.current_beat(), 0);
        assert!(output.pending().unwrap().is_empty());

        let mut block = vec![0.0_f32; 1_000];
        output.render(&mut block);
        assert!(block.iter().all(|s| *s == 0.0));
    }

    #[test]
    fn play_resumes_clock_and_schedules_the_downbeat() {
        let output = renderer();
        let shared = output.clone();
        let mut metronome =
            Metronome::new(&AppConfig::default(), MetronomeParams::default(), move || Ok(shared.clone()))
                .unwrap();

        assert!(output.is_suspended().unwrap());
        metronome.play().unwrap();

        assert!(metronome.is_playing());
        assert!(!output.is_suspended().unwrap());
        assert_eq!(metronome.current_beat(), 1);
        let pending = output.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].start, 0.0);
        assert_eq!(pending[0].frequency, 880.0);

        metronome.stop().unwrap();
    }

    #[test]
    fn output_is_created_lazily_and_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let output = renderer();
        let mut metronome = Metronome::new(&AppConfig::default(), MetronomeParams::default(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(output.clone())
        })
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(metronome.output().is_none());

        metronome.play().unwrap();
        metronome.stop().unwrap();
        metronome.play().unwrap();
        metronome.stop().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(metronome.output().is_some());
    }

    #[test]
    fn failed_factory_leaves_engine_stopped() {
        let mut metronome: Metronome<RenderedOutput> =
            Metronome::new(&AppConfig::default(), MetronomeParams::default(), || {
                Err(VibeatError::Device("unplugged".into()))
            })
            .unwrap();

        assert!(metronome.play().is_err());
        assert!(!metronome.is_playing());
        assert_eq!(metronome.current_beat(), 0);
    }

    #[test]
    fn restart_uses_the_current_clock() {
        let output = renderer();
        let shared = output.clone();
        let mut metronome =
            Metronome::new(&AppConfig::default(), MetronomeParams::default(), move || Ok(shared.clone()))
                .unwrap();

        metronome.play().unwrap();
        metronome.stop().unwrap();

        let mut block = vec![0.0_f32; 500];
        output.render(&mut block);

        metronome.play().unwrap();
        let pending = output.pending().unwrap();
        metronome.stop().unwrap();

        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].start, 0.5);
    }

    #[test]
    fn worker_keeps_scheduling_as_the_clock_moves() {
        let output = ManualOutput::default();
        let shared = output.clone();
        let mut metronome = Metronome::new(
            &AppConfig::default(),
            params(120, 4, Subdivision::Eighth),
            move || Ok(shared.clone()),
        )
        .unwrap();

        metronome.play().unwrap();
        assert_eq!(output.starts(), vec![0.0]);

        output.set_time(0.3);
        wait_for_passes();
        assert_eq!(output.starts(), vec![0.0, 0.25]);
        assert_eq!(metronome.current_beat(), 1);

        output.set_time(0.5);
        wait_for_passes();
        assert_eq!(output.starts(), vec![0.0, 0.25, 0.5]);
        assert_eq!(metronome.monitor().current_beat(), 2);

        metronome.stop().unwrap();
        assert_eq!(output.cancelled.load(Ordering::SeqCst), 1);
        assert_eq!(metronome.current_beat(), 0);
    }

    #[test]
    fn parameter_changes_apply_without_restart() {
        let output = ManualOutput::default();
        let shared = output.clone();
        let mut metronome = Metronome::new(
            &AppConfig::default(),
            params(120, 4, Subdivision::Quarter),
            move || Ok(shared.clone()),
        )
        .unwrap();

        metronome.play().unwrap();
        output.set_time(0.45);
        wait_for_passes();
        assert_eq!(output.starts(), vec![0.0, 0.5]);

        // The event at 1.0 is already pending; only later spacing changes.
        metronome.set_tempo(Tempo::new(60).unwrap()).unwrap();
        output.set_time(1.95);
        wait_for_passes();
        metronome.stop().unwrap();

        assert_eq!(output.starts(), vec![0.0, 0.5, 1.0, 2.0]);
    }

    #[test]
    fn cycle_accent_wraps_and_validates_index() {
        let metronome: Metronome<ManualOutput> = Metronome::new(
            &AppConfig::default(),
            MetronomeParams::default(),
            || Ok(ManualOutput::default()),
        )
        .unwrap();

        assert_eq!(metronome.cycle_accent(0).unwrap(), AccentLevel::Mute);
        assert_eq!(metronome.cycle_accent(1).unwrap(), AccentLevel::Strong);
        assert!(metronome.cycle_accent(4).is_err());

        metronome.set_beat_count(BeatCount::new(6).unwrap()).unwrap();
        let params = metronome.params().unwrap();
        assert_eq!(params.accents.len(), 6);
        assert_eq!(params.accent(0), Some(AccentLevel::Mute));
        assert_eq!(params.accent(5), Some(AccentLevel::Medium));
    }

    #[test]
    fn toggle_and_drop_stop_the_worker() {
        let output = ManualOutput::default();
        let shared = output.clone();
        let mut metronome =
            Metronome::new(&AppConfig::default(), MetronomeParams::default(), move || Ok(shared.clone()))
                .unwrap();

        assert!(metronome.toggle().unwrap());
        assert!(!metronome.toggle().unwrap());
        assert!(metronome.toggle().unwrap());
        drop(metronome);

        assert_eq!(output.cancelled.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_worker_reads_as_stopped_and_can_restart() {
        let output = ManualOutput::default();
        let shared = output.clone();
        let mut metronome =
            Metronome::new(&AppConfig::default(), MetronomeParams::default(), move || Ok(shared.clone()))
                .unwrap();

        metronome.play().unwrap();
        assert_eq!(metronome.current_beat(), 1);

        output.failing.store(true, Ordering::SeqCst);
        wait_for_passes();
        assert!(!metronome.is_playing());
        assert_eq!(metronome.current_beat(), 0);

        output.failing.store(false, Ordering::SeqCst);
        metronome.play().unwrap();
        assert!(metronome.is_playing());
        assert_eq!(output.cancelled.load(Ordering::SeqCst), 1);
        metronome.stop().unwrap();
    }

    #[test]
    fn panicked_worker_still_clears_the_beat() {
        let output = ManualOutput::default();
        let shared = output.clone();
        let mut metronome =
            Metronome::new(&AppConfig::default(), MetronomeParams::default(), move || Ok(shared.clone()))
                .unwrap();

        metronome.play().unwrap();
        output.panicking.store(true, Ordering::SeqCst);
        wait_for_passes();

        assert!(metronome.stop().is_err());
        assert_eq!(metronome.current_beat(), 0);
        assert!(!metronome.is_playing());
    }

    #[test]
    fn rejects_invalid_scheduler_config() {
        let mut config = AppConfig::default();
        config.scheduler.rearm_interval_ms = 500;
        let result = Metronome::new(&config, MetronomeParams::default(), || Ok(ManualOutput::default()));
        assert!(result.is_err());
    }
}
