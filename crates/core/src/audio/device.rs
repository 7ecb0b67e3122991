#[cfg(feature = "cpal")]
use std::fmt;
use std::{
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};

use crate::{AudioConfig, RenderedOutput, Result, ToneConfig, VibeatError};

/// Pulls audio out of a [`RenderedOutput`] in real time and discards it.
///
/// Stands in for a sound card when none is wanted or available: the audio
/// clock still advances at the configured sample rate, so the scheduler
/// behaves exactly as it would against hardware.
#[derive(Debug)]
pub struct SoftwareDevice {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl SoftwareDevice {
    pub fn open(audio: &AudioConfig, tone: &ToneConfig) -> Result<(Self, RenderedOutput)> {
        let output = RenderedOutput::from_config(audio, tone);
        let device = Self::start(output.clone(), audio.sample_rate, audio.block_size)?;
        Ok((device, output))
    }

    pub fn start(output: RenderedOutput, sample_rate: u32, block_size: usize) -> Result<Self> {
        if sample_rate == 0 || block_size == 0 {
            return Err(VibeatError::InvalidInput(
                "software device needs a positive sample rate and block size",
            ));
        }

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let period = Duration::from_secs_f64(block_size as f64 / f64::from(sample_rate));
        let handle = thread::Builder::new()
            .name("vibeat-software-device".into())
            .spawn(move || {
                let started = Instant::now();
                let mut block = vec![0.0_f32; block_size];
                let mut pulled: u64 = 0;
                loop {
                    match stop_rx.recv_timeout(period) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }

                    // Pace against elapsed wall time rather than the number of
                    // wakeups, which drift with scheduler jitter.
                    let due = (started.elapsed().as_secs_f64() * f64::from(sample_rate)) as u64;
                    while pulled + block_size as u64 <= due {
                        output.render(&mut block);
                        pulled += block_size as u64;
                    }
                }
            })?;

        tracing::debug!(sample_rate, block_size, "software audio device started");
        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }
}

impl Drop for SoftwareDevice {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Default system output opened through `cpal`.
#[cfg(feature = "cpal")]
pub struct DeviceOutput {
    _stream: cpal::Stream,
    sample_rate: u32,
    channels: u16,
}

#[cfg(feature = "cpal")]
impl DeviceOutput {
    /// Opens the default output device and returns it together with a
    /// renderer running at the device's own sample rate.
    pub fn open(audio: &AudioConfig, tone: &ToneConfig) -> Result<(Self, RenderedOutput)> {
        use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| VibeatError::Device("no output device available".into()))?;
        let supported = device
            .default_output_config()
            .map_err(|err| VibeatError::Device(err.to_string()))?;
        if supported.sample_format() != cpal::SampleFormat::F32 {
            return Err(VibeatError::Device(format!(
                "unsupported sample format {:?}",
                supported.sample_format()
            )));
        }

        let config: cpal::StreamConfig = supported.into();
        let sample_rate = config.sample_rate.0;
        let channels = config.channels;
        let output = RenderedOutput::from_config(
            &AudioConfig {
                sample_rate,
                ..audio.clone()
            },
            tone,
        );

        let callback_output = output.clone();
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    callback_output.render_interleaved(data, usize::from(channels));
                },
                |err| tracing::warn!(%err, "output stream error"),
                None,
            )
            .map_err(|err| VibeatError::Device(err.to_string()))?;
        stream
            .play()
            .map_err(|err| VibeatError::Device(err.to_string()))?;

        tracing::info!(sample_rate, channels, "audio device opened");
        Ok((
            Self {
                _stream: stream,
                sample_rate,
                channels,
            },
            output,
        ))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

#[cfg(feature = "cpal")]
impl fmt::Debug for DeviceOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceOutput")
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .finish()
    }
}
