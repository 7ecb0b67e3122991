use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EncodedSettings, MetronomeSettings, Result, VibeatError};

/// A named snapshot of metronome settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub id: Uuid,
    pub name: String,
    #[serde(flatten)]
    pub settings: EncodedSettings,
}

impl Preset {
    pub fn new(name: impl Into<String>, settings: &MetronomeSettings) -> Result<Self> {
        let name = name.into().trim().to_string();
        if name.is_empty() {
            return Err(VibeatError::InvalidInput("preset name must not be blank"));
        }
        Ok(Self {
            id: Uuid::new_v4(),
            name,
            settings: EncodedSettings::from(settings),
        })
    }

    /// Settings ready to hand to the engine.
    pub fn settings(&self) -> MetronomeSettings {
        MetronomeSettings::from(&self.settings)
    }
}

/// JSON file holding the user's presets, in insertion order.
#[derive(Debug, Clone)]
pub struct PresetStore {
    path: PathBuf,
    presets: Vec<Preset>,
}

impl PresetStore {
    /// Opens the store at `path`. A missing file is an empty store.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let presets = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self { path, presets })
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.presets)?;
        std::fs::write(&self.path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn add(&mut self, name: &str, settings: &MetronomeSettings) -> Result<&Preset> {
        let preset = Preset::new(name, settings)?;
        tracing::debug!(id = %preset.id, name = %preset.name, "preset added");
        self.presets.push(preset);
        Ok(&self.presets[self.presets.len() - 1])
    }

    /// Removes the preset with `id`, returning whether one existed.
    pub fn remove(&mut self, id: Uuid) -> bool {
        let before = self.presets.len();
        self.presets.retain(|preset| preset.id != id);
        before != self.presets.len()
    }

    /// Looks a preset up by id, or failing that by exact name.
    pub fn find(&self, key: &str) -> Option<&Preset> {
        if let Ok(id) = key.parse::<Uuid>() {
            if let Some(preset) = self.presets.iter().find(|p| p.id == id) {
                return Some(preset);
            }
        }
        self.presets.iter().find(|p| p.name == key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Preset> {
        self.presets.iter()
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}
