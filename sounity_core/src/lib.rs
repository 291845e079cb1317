//! Shared vocabulary for the sounity engine: the error taxonomy, audio format
//! constants and the small geometry types used by every node.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod geometry;

pub use geometry::{principal_axes_to_orientation, Orientation, Vec3};

/// Unified error type for the engine.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Sound with identifier '{0}' does not exist")]
    UnknownIdentifier(String),

    #[error("Sound with identifier '{0}' already exists")]
    DuplicateIdentifier(String),

    #[error("Filter with identifier '{0}' does not exist")]
    UnknownFilterDescriptor(String),

    #[error("There is already a filter named '{0}'")]
    DuplicateFilter(String),

    #[error("Invalid filter name '{0}'")]
    UnknownFilter(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Audio graph error: {0}")]
    Graph(String),

    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

// Basic audio format definitions
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;
pub const OUTPUT_CHANNELS: usize = 2;
/// Number of frames rendered per processing block.
pub const RENDER_QUANTUM: usize = 128;

/// Mix bus a sound is attributed to when applying master volumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputCategory {
    #[default]
    Sfx,
    Music,
}

impl std::fmt::Display for OutputCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputCategory::Sfx => write!(f, "sfx"),
            OutputCategory::Music => write!(f, "music"),
        }
    }
}

/// Upper bound of the raw category volume sent by the host.
pub const RAW_VOLUME_MAX: f32 = 10.0;

/// Per-category master volumes, already normalised to 0..=1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CategoryVolumes {
    pub sfx: f32,
    pub music: f32,
}

impl Default for CategoryVolumes {
    fn default() -> Self {
        Self { sfx: 1.0, music: 1.0 }
    }
}

impl CategoryVolumes {
    /// Build from the host's raw 0..=10 scale. Out-of-range input is clamped.
    pub fn from_raw(sfx: f32, music: f32) -> Self {
        let normalize = |raw: f32| {
            if raw.is_finite() {
                raw.clamp(0.0, RAW_VOLUME_MAX) / RAW_VOLUME_MAX
            } else {
                0.0
            }
        };
        Self {
            sfx: normalize(sfx),
            music: normalize(music),
        }
    }

    pub fn for_category(&self, category: OutputCategory) -> f32 {
        match category {
            OutputCategory::Sfx => self.sfx,
            OutputCategory::Music => self.music,
        }
    }
}

/// Algorithm used by the spatializer to place a source in the stereo field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PanningModel {
    #[serde(rename = "equalpower")]
    EqualPower,
    #[default]
    #[serde(rename = "HRTF")]
    Hrtf,
}

/// Volume reduction as a source moves away from the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceModel {
    Linear,
    #[default]
    Inverse,
    Exponential,
}
