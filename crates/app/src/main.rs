use std::{
    fmt::Debug,
    io::BufRead,
    path::{Path, PathBuf},
    thread,
    time::{Duration, Instant},
};

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use vibeat_core::{
    share, AccentLevel, AccentPattern, AppConfig, BeatCount, Metronome, MetronomeSettings,
    PresetStore, RenderedOutput, Subdivision, TapTempo, Tempo, VibeatError,
};

fn main() -> vibeat_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };

    match cli.command {
        Commands::Play { settings, seconds } => {
            let settings = settings.resolve(&cli.store)?;
            run_play(&config, settings, seconds)
        }
        Commands::Tap => run_tap(),
        Commands::Share { settings, base } => {
            let settings = settings.resolve(&cli.store)?;
            println!("{}", share::share_url(&base, &settings)?);
            Ok(())
        }
        Commands::Decode { input } => run_decode(&input),
        Commands::Preset { action } => run_preset(&cli.store, action),
    }
}

fn run_play(config: &AppConfig, settings: MetronomeSettings, seconds: f64) -> vibeat_core::Result<()> {
    tracing::info!(
        bpm = settings.bpm,
        beats = settings.beats,
        subdivision = %settings.selected_subdivision,
        seconds,
        "starting metronome"
    );

    let (device, output) = open_device(config)?;
    tracing::debug!(?device, "audio device ready");
    let mut metronome = Metronome::new(config, settings.to_params(), move || Ok(output.clone()))?;
    let monitor = metronome.monitor();
    metronome.play()?;

    let deadline = Instant::now() + Duration::from_secs_f64(seconds.max(0.0));
    let mut last_beat = 0;
    while Instant::now() < deadline {
        let beat = monitor.current_beat();
        if beat != last_beat {
            tracing::info!(beat, "beat");
            last_beat = beat;
        }
        thread::sleep(Duration::from_millis(5));
    }

    metronome.stop()?;
    drop(device);
    Ok(())
}

#[cfg(feature = "cpal")]
fn open_device(config: &AppConfig) -> vibeat_core::Result<(Box<dyn Debug>, RenderedOutput)> {
    let (device, output) = vibeat_core::DeviceOutput::open(&config.audio, &config.tone)?;
    Ok((Box::new(device), output))
}

#[cfg(not(feature = "cpal"))]
fn open_device(config: &AppConfig) -> vibeat_core::Result<(Box<dyn Debug>, RenderedOutput)> {
    let (device, output) = vibeat_core::SoftwareDevice::open(&config.audio, &config.tone)?;
    Ok((Box::new(device), output))
}

fn run_tap() -> vibeat_core::Result<()> {
    println!("Press Enter on every beat, `r` then Enter to start over, `q` then Enter to finish.");
    let mut tap = TapTempo::new();
    let mut tempo = None;

    for line in std::io::stdin().lock().lines() {
        let line = line?;
        let command = line.trim();
        if command.eq_ignore_ascii_case("q") {
            break;
        }
        if command.eq_ignore_ascii_case("r") {
            tap.reset();
            tempo = None;
            println!("taps cleared");
            continue;
        }
        match tap.record_tap(Instant::now()) {
            Some(estimate) => {
                println!("{estimate}");
                tempo = Some(estimate);
            }
            None => println!("keep tapping..."),
        }
    }

    if let Some(tempo) = tempo {
        tracing::info!(bpm = tempo.bpm(), "tapped tempo");
    }
    Ok(())
}

fn run_decode(input: &str) -> vibeat_core::Result<()> {
    let payload = share::config_from_url(input).unwrap_or_else(|| input.to_string());
    let settings = share::decode(&payload)?;
    println!("{}", serde_json::to_string_pretty(&settings)?);
    Ok(())
}

fn run_preset(store_path: &Path, action: PresetAction) -> vibeat_core::Result<()> {
    let mut store = PresetStore::load(store_path)?;
    match action {
        PresetAction::Save { name, settings } => {
            let settings = settings.resolve(store_path)?;
            let preset = store.add(&name, &settings)?;
            println!("{}  {}", preset.id, preset.name);
            store.save()?;
        }
        PresetAction::List => {
            if store.is_empty() {
                println!("No presets saved yet.");
            }
            for preset in store.iter() {
                let settings = preset.settings();
                println!(
                    "{}  {:<20} {:>3} BPM  {:>2} beats  {}",
                    preset.id, preset.name, settings.bpm, settings.beats, settings.selected_subdivision
                );
            }
        }
        PresetAction::Delete { id } => {
            let Some(found) = store.find(&id).map(|preset| preset.id) else {
                return Err(VibeatError::msg(format!("no preset named or identified by `{id}`")));
            };
            store.remove(found);
            store.save()?;
            tracing::info!(%found, "preset deleted");
        }
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Drift-free metronome", long_about = None)]
struct Cli {
    /// JSON configuration file overriding audio, scheduler and tone defaults.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Preset store used by `--preset` and the `preset` commands.
    #[arg(long, global = true, default_value = "vibeat-presets.json")]
    store: PathBuf,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play clicks for a while, logging each beat.
    Play {
        #[command(flatten)]
        settings: SettingsArgs,
        /// How long to play, in seconds.
        #[arg(long, default_value_t = 8.0)]
        seconds: f64,
    },
    /// Estimate a tempo from taps on the Enter key.
    Tap,
    /// Print a link that carries the given settings.
    Share {
        #[command(flatten)]
        settings: SettingsArgs,
        #[arg(long, default_value = "https://vibeat.app/")]
        base: String,
    },
    /// Print the settings carried by a link or payload.
    Decode {
        /// A full share URL or just its `config` value.
        input: String,
    },
    /// Manage saved presets.
    Preset {
        #[command(subcommand)]
        action: PresetAction,
    },
}

#[derive(Subcommand, Debug)]
enum PresetAction {
    /// Save the given settings under a name.
    Save {
        name: String,
        #[command(flatten)]
        settings: SettingsArgs,
    },
    List,
    /// Delete a preset by id or name.
    Delete { id: String },
}

#[derive(Args, Debug, Clone)]
struct SettingsArgs {
    /// Tempo, clamped to 20..=500.
    #[arg(long)]
    bpm: Option<i64>,
    /// Beats per bar, clamped to 1..=16.
    #[arg(long)]
    beats: Option<i64>,
    /// Quarter, Eighth, Sixteenth or Triplet.
    #[arg(long)]
    subdivision: Option<Subdivision>,
    /// Accent codes per beat, 1 = mute .. 4 = strong (e.g. 4,3,3,3).
    #[arg(long, value_delimiter = ',')]
    accents: Option<Vec<u8>>,
    /// Start from a shared link or payload.
    #[arg(long, conflicts_with = "preset")]
    share: Option<String>,
    /// Start from a saved preset, by name or id.
    #[arg(long)]
    preset: Option<String>,
}

impl SettingsArgs {
    /// Base settings from a preset or shared link, then explicit flags on top.
    fn resolve(&self, store: &Path) -> vibeat_core::Result<MetronomeSettings> {
        let base = if let Some(key) = &self.preset {
            let store = PresetStore::load(store)?;
            store
                .find(key)
                .map(|preset| preset.settings())
                .ok_or_else(|| VibeatError::msg(format!("no preset named or identified by `{key}`")))?
        } else {
            let payload = self
                .share
                .as_deref()
                .map(|input| share::config_from_url(input).unwrap_or_else(|| input.to_string()));
            share::restore_or_default(payload.as_deref())
        };

        let mut params = base.to_params();
        if let Some(bpm) = self.bpm {
            params.tempo = Tempo::clamped(bpm);
        }
        if let Some(accents) = &self.accents {
            params.accents =
                AccentPattern::from_levels(accents.iter().map(|code| AccentLevel::from_share_code(*code)));
        }
        if let Some(beats) = self.beats {
            params.set_beat_count(BeatCount::clamped(beats));
        }
        if let Some(subdivision) = self.subdivision {
            params.subdivision = subdivision;
        }
        Ok(MetronomeSettings::from_params(&params))
    }
}
