//! Settings sharing through a `config` URL query parameter.
//!
//! Wire format: the settings as JSON with accents replaced by their integer
//! codes, zlib-compressed, then standard base64.

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE},
    Engine as _,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use yazi::{compress, decompress, CompressionLevel, Format};

use crate::{
    AccentLevel, AccentPattern, BeatCount, MetronomeParams, Result, Subdivision, Tempo,
    VibeatError,
};

/// Name of the query parameter carrying the payload.
pub const CONFIG_PARAM: &str = "config";

/// Host-side settings record. Accents are continuous gains in
/// {0, 1/3, 2/3, 1}.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetronomeSettings {
    pub bpm: u32,
    pub beats: usize,
    pub selected_subdivision: Subdivision,
    pub accents: Vec<f32>,
}

impl Default for MetronomeSettings {
    fn default() -> Self {
        Self::from_params(&MetronomeParams::default())
    }
}

impl MetronomeSettings {
    pub fn from_params(params: &MetronomeParams) -> Self {
        Self {
            bpm: params.tempo.bpm(),
            beats: params.beat_count().get(),
            selected_subdivision: params.subdivision,
            accents: params.accents.gains().collect(),
        }
    }

    /// Converts to engine parameters, clamping tempo and beat count and
    /// fitting the accent list to the beat count.
    pub fn to_params(&self) -> MetronomeParams {
        let beats = BeatCount::clamped(self.beats as i64);
        let mut accents = if self.accents.is_empty() {
            AccentPattern::new(beats)
        } else {
            AccentPattern::from_levels(self.accents.iter().map(|gain| level_for(*gain)))
        };
        accents.resize(beats);

        MetronomeParams {
            tempo: Tempo::clamped(i64::from(self.bpm)),
            accents,
            subdivision: self.selected_subdivision,
        }
    }
}

/// Snaps a stored gain onto an accent level.
fn level_for(gain: f32) -> AccentLevel {
    AccentLevel::from_gain(gain).unwrap_or_else(|| {
        tracing::debug!(gain, "accent gain is between levels, using the nearest");
        AccentLevel::nearest(gain)
    })
}

/// Settings with accents stored as share codes (1 = mute .. 4 = strong).
/// This is the JSON shape inside share links and the preset store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedSettings {
    pub bpm: u32,
    pub beats: usize,
    pub selected_subdivision: Subdivision,
    pub accents: Vec<u8>,
}

impl From<&MetronomeSettings> for EncodedSettings {
    fn from(settings: &MetronomeSettings) -> Self {
        Self {
            bpm: settings.bpm,
            beats: settings.beats,
            selected_subdivision: settings.selected_subdivision,
            accents: settings
                .accents
                .iter()
                .map(|gain| level_for(*gain).share_code())
                .collect(),
        }
    }
}

impl From<&EncodedSettings> for MetronomeSettings {
    fn from(encoded: &EncodedSettings) -> Self {
        let decoded = Self {
            bpm: encoded.bpm,
            beats: encoded.beats,
            selected_subdivision: encoded.selected_subdivision,
            accents: encoded
                .accents
                .iter()
                .map(|code| AccentLevel::from_share_code(*code).gain())
                .collect(),
        };
        // Normalise through the engine types so ranges and lengths agree.
        Self::from_params(&decoded.to_params())
    }
}

/// Serialises `settings` into a share payload.
pub fn encode(settings: &MetronomeSettings) -> Result<String> {
    let json = serde_json::to_vec(&EncodedSettings::from(settings))?;
    let packed = compress(&json, Format::Zlib, CompressionLevel::Default)
        .map_err(|err| VibeatError::Compression(format!("{err:?}")))?;
    Ok(STANDARD.encode(packed))
}

/// Parses a share payload. Payloads without a truthy `bpm` and `beats` are
/// rejected.
pub fn decode(payload: &str) -> Result<MetronomeSettings> {
    // Query-string parsers turn `+` into a space.
    let payload = payload.trim().replace(' ', "+");
    let bytes = STANDARD
        .decode(&payload)
        .or_else(|_| URL_SAFE.decode(&payload))?;

    let json = match decompress(&bytes, Format::Zlib) {
        Ok((inflated, _)) => inflated,
        // Plain base64 JSON without compression.
        Err(_) if bytes.first() == Some(&b'{') => bytes,
        Err(err) => return Err(VibeatError::Compression(format!("{err:?}"))),
    };

    let value: Value = serde_json::from_slice(&json)?;
    if !is_truthy(value.get("bpm")) {
        return Err(VibeatError::MissingField("bpm"));
    }
    if !is_truthy(value.get("beats")) {
        return Err(VibeatError::MissingField("beats"));
    }

    let wire: WireSettings = serde_json::from_value(value)?;
    let selected_subdivision = match wire.selected_subdivision {
        Some(name) => name.parse()?,
        None => Subdivision::default(),
    };
    let encoded = EncodedSettings {
        bpm: wire.bpm.round().clamp(0.0, f64::from(u32::MAX)) as u32,
        beats: wire.beats.round().clamp(0.0, BeatCount::MAX as f64) as usize,
        selected_subdivision,
        accents: wire
            .accents
            .iter()
            .map(|code| u8::try_from(*code).unwrap_or(0))
            .collect(),
    };
    Ok(MetronomeSettings::from(&encoded))
}

/// Lenient read-side shape: numbers may arrive as floats and the subdivision
/// is validated separately so the error names the bad key.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSettings {
    bpm: f64,
    beats: f64,
    #[serde(default)]
    selected_subdivision: Option<String>,
    #[serde(default)]
    accents: Vec<i64>,
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_f64().map(|n| n != 0.0).unwrap_or(false),
        Some(Value::String(text)) => !text.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

/// `<base>?config=<payload>`.
pub fn share_url(base: &str, settings: &MetronomeSettings) -> Result<String> {
    let base = base.split(['?', '#']).next().unwrap_or(base);
    Ok(format!("{base}?{CONFIG_PARAM}={}", encode(settings)?))
}

/// Pulls the `config` parameter out of a URL or bare query string.
pub fn config_from_url(url: &str) -> Option<String> {
    let query = match url.split_once('?') {
        Some((_, query)) => query,
        None => url,
    };
    let query = query.split('#').next().unwrap_or(query);

    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == CONFIG_PARAM && !value.is_empty()).then(|| unescape_payload(value))
    })
}

/// Undoes percent-escaping of the characters base64 can produce.
fn unescape_payload(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(index) = rest.find('%') {
        out.push_str(&rest[..index]);
        let escaped = rest.get(index + 1..index + 3);
        let replacement = match escaped.map(str::to_ascii_uppercase).as_deref() {
            Some("2B") => Some('+'),
            Some("2F") => Some('/'),
            Some("3D") => Some('='),
            _ => None,
        };
        match replacement {
            Some(ch) => {
                out.push(ch);
                rest = &rest[index + 3..];
            }
            None => {
                out.push('%');
                rest = &rest[index + 1..];
            }
        }
    }
    out.push_str(rest);
    out
}

/// Decodes `payload` if present, keeping the defaults when it is absent or
/// malformed. Failures are logged, never returned.
pub fn restore_or_default(payload: Option<&str>) -> MetronomeSettings {
    let Some(payload) = payload else {
        return MetronomeSettings::default();
    };
    match decode(payload) {
        Ok(settings) => settings,
        Err(err) => {
            tracing::warn!(%err, "ignoring malformed shared settings");
            MetronomeSettings::default()
        }
    }
}
