//! Configuration management for sounity
//!
//! This crate handles loading, saving and accessing
//! engine configuration. Values come from a TOML file, overlaid with
//! `SOUNITY_*` environment variables (`SOUNITY_CACHE__MAX_ENTRIES=20`).

use log::debug;
use serde::{Deserialize, Serialize};
use sounity_core::{DistanceModel, Error, OutputCategory, PanningModel, DEFAULT_SAMPLE_RATE};
use std::fs;
use std::path::{Path, PathBuf};

/// Prefix of environment variables that override file settings
pub const ENV_PREFIX: &str = "SOUNITY";

/// Engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Sample rate of the processing context
    pub sample_rate: u32,

    /// Period of the update loop in milliseconds
    pub tick_interval_ms: u64,

    /// Gain of the listener bus (0..=1)
    pub master_volume: f32,

    /// Base directory for relative and `file://` asset URLs (empty means cwd)
    pub asset_root: String,

    /// Bounds of the asset cache
    pub cache: CacheSettings,

    /// Option values used when a `createSound` payload omits them
    pub sound_defaults: SoundDefaults,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            tick_interval_ms: 16,
            master_volume: 1.0,
            asset_root: String::new(),
            cache: CacheSettings::default(),
            sound_defaults: SoundDefaults::default(),
        }
    }
}

impl Settings {
    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), Error> {
        if self.sample_rate == 0 {
            return Err(Error::Config("sample_rate must be positive".to_string()));
        }
        if self.tick_interval_ms == 0 {
            return Err(Error::Config("tick_interval_ms must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&self.master_volume) {
            return Err(Error::Config(format!(
                "master_volume must be between 0 and 1, got {}",
                self.master_volume
            )));
        }
        if self.cache.max_entries == 0 {
            return Err(Error::Config("cache.max_entries must be positive".to_string()));
        }
        self.sound_defaults.validate()
    }
}

/// Asset cache bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub max_entries: usize,
    pub max_bytes: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_entries: 50,
            max_bytes: 100 * 1024 * 1024,
        }
    }
}

/// Default option set for new sounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundDefaults {
    pub volume: f32,
    pub output_type: OutputCategory,
    #[serde(rename = "loop")]
    pub looping: bool,
    pub pos_x: f32,
    pub pos_y: f32,
    pub pos_z: f32,
    pub rot_x: f32,
    pub rot_y: f32,
    pub rot_z: f32,
    pub panning_model: PanningModel,
    pub distance_model: DistanceModel,
    pub max_distance: f32,
    pub ref_distance: f32,
    pub rolloff_factor: f32,
    pub cone_inner_angle: f32,
    pub cone_outer_angle: f32,
    pub cone_outer_gain: f32,
}

impl Default for SoundDefaults {
    fn default() -> Self {
        Self {
            volume: 1.0,
            output_type: OutputCategory::Sfx,
            looping: false,
            pos_x: 0.0,
            pos_y: 0.0,
            pos_z: 0.0,
            rot_x: 0.0,
            rot_y: 0.0,
            rot_z: 0.0,
            panning_model: PanningModel::Hrtf,
            distance_model: DistanceModel::Inverse,
            max_distance: 500.0,
            ref_distance: 3.0,
            rolloff_factor: 1.0,
            cone_inner_angle: 360.0,
            cone_outer_angle: 0.0,
            cone_outer_gain: 0.0,
        }
    }
}

impl SoundDefaults {
    fn validate(&self) -> Result<(), Error> {
        if !(0.0..=1.0).contains(&self.volume) {
            return Err(Error::Config(format!(
                "sound_defaults.volume must be between 0 and 1, got {}",
                self.volume
            )));
        }
        if self.max_distance < 0.0 || self.ref_distance < 0.0 || self.rolloff_factor < 0.0 {
            return Err(Error::Config(
                "sound_defaults distances and rolloff must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration manager
pub struct ConfigManager {
    settings: Settings,
    config_file: PathBuf,
}

impl ConfigManager {
    /// Create a config manager backed by the user's config directory
    pub fn new() -> Result<Self, Error> {
        let mut config_dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Failed to determine config directory".to_string()))?;
        config_dir.push("sounity");

        Self::with_file(config_dir.join("config.toml"))
    }

    /// Create a ConfigManager with a custom file path
    pub fn with_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        Self::with_file_and_env(path, ENV_PREFIX)
    }

    /// Create a ConfigManager reading overrides from `<env_prefix>_*` variables
    pub fn with_file_and_env<P: AsRef<Path>>(path: P, env_prefix: &str) -> Result<Self, Error> {
        let config_file = path.as_ref().to_path_buf();
        if !config_file.exists() {
            debug!("Config file {:?} not found, using defaults", config_file);
        }
        let settings = Self::load_layered(&config_file, env_prefix)?;
        settings.validate()?;

        Ok(Self {
            settings,
            config_file,
        })
    }

    /// Load settings from the TOML file (if any) and the environment
    fn load_layered(path: &Path, env_prefix: &str) -> Result<Settings, Error> {
        let layered = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml).required(false))
            .add_source(
                config::Environment::with_prefix(env_prefix)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        layered
            .try_deserialize()
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Save settings to the config file
    pub fn save(&self) -> Result<(), Error> {
        let toml = toml::to_string_pretty(&self.settings)
            .map_err(|e| Error::Config(format!("Failed to serialize settings: {}", e)))?;

        if let Some(parent) = self.config_file.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| {
                    Error::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        fs::write(&self.config_file, toml)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

        debug!("Saved config to {:?}", self.config_file);
        Ok(())
    }

    /// Get the current settings
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Get a mutable reference to settings
    pub fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// Consume the manager, keeping only the settings
    pub fn into_settings(self) -> Settings {
        self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    // Prefix no test process sets, so the environment never leaks in
    const TEST_PREFIX: &str = "SOUNITY_SETTINGS_UNIT_TEST";

    #[test]
    fn default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.tick_interval_ms, 16);
        assert_eq!(settings.cache.max_entries, 50);
        assert_eq!(settings.cache.max_bytes, 100 * 1024 * 1024);
        assert_eq!(settings.sound_defaults.ref_distance, 3.0);
        assert_eq!(settings.sound_defaults.max_distance, 500.0);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn save_and_load() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nested").join("test_config.toml");

        let mut config = ConfigManager::with_file_and_env(&config_path, TEST_PREFIX).unwrap();
        config.settings_mut().tick_interval_ms = 20;
        config.settings_mut().cache.max_entries = 8;
        config.settings_mut().sound_defaults.output_type = OutputCategory::Music;

        config.save().unwrap();
        assert!(config_path.exists());

        let loaded = ConfigManager::with_file_and_env(&config_path, TEST_PREFIX).unwrap();
        assert_eq!(loaded.settings().tick_interval_ms, 20);
        assert_eq!(loaded.settings().cache.max_entries, 8);
        assert_eq!(loaded.settings().sound_defaults.output_type, OutputCategory::Music);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("partial.toml");
        fs::write(&config_path, "sample_rate = 44100\n\n[cache]\nmax_entries = 3\n").unwrap();

        let config = ConfigManager::with_file_and_env(&config_path, TEST_PREFIX).unwrap();
        assert_eq!(config.settings().sample_rate, 44100);
        assert_eq!(config.settings().cache.max_entries, 3);
        assert_eq!(config.settings().cache.max_bytes, 100 * 1024 * 1024);
        assert_eq!(config.settings().tick_interval_ms, 16);
    }

    #[test]
    fn file_not_found_uses_defaults() {
        let temp_dir = tempdir().unwrap();
        let nonexistent_path = temp_dir.path().join("nonexistent.toml");

        let config = ConfigManager::with_file_and_env(&nonexistent_path, TEST_PREFIX).unwrap();
        assert_eq!(config.into_settings(), Settings::default());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("invalid.toml");
        fs::write(&config_path, "tick_interval_ms = 0\n").unwrap();

        let result = ConfigManager::with_file_and_env(&config_path, TEST_PREFIX);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
