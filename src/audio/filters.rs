//! Filter descriptors and the catalog they are registered in.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use sounity_core::{Error, Result};

use super::biquad::BiquadOptions;
use super::cache::AssetLoader;
use super::convolver::ImpulseResponse;
use super::decode::decode_audio_blocking;

/// Kind of a filter descriptor, as named on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterKind {
    #[serde(rename = "biquad", alias = "parametric")]
    Parametric,
    #[serde(rename = "convolver", alias = "convolution")]
    Convolution,
}

impl std::fmt::Display for FilterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FilterKind::Parametric => write!(f, "biquad"),
            FilterKind::Convolution => write!(f, "convolver"),
        }
    }
}

/// Options of a convolution descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvolverOptions {
    /// Impulse response asset.
    pub url: String,
    #[serde(default)]
    pub disable_normalization: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterOptions {
    Parametric(BiquadOptions),
    Convolution(ConvolverOptions),
}

/// An immutable, named recipe from which live filter stages are built.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterDescriptor {
    pub name: String,
    pub options: FilterOptions,
}

impl FilterDescriptor {
    pub fn new(name: impl Into<String>, options: FilterOptions) -> Self {
        Self {
            name: name.into(),
            options,
        }
    }

    /// Build a descriptor from an untyped options payload.
    pub fn from_parts(name: &str, kind: FilterKind, options: serde_json::Value) -> Result<Self> {
        let options = if options.is_null() {
            serde_json::Value::Object(Default::default())
        } else {
            options
        };
        let invalid = |e: serde_json::Error| {
            Error::InvalidArgument(format!("invalid {} options for filter {}: {}", kind, name, e))
        };
        let options = match kind {
            FilterKind::Parametric => {
                FilterOptions::Parametric(serde_json::from_value(options).map_err(invalid)?)
            }
            FilterKind::Convolution => {
                FilterOptions::Convolution(serde_json::from_value(options).map_err(invalid)?)
            }
        };
        Ok(Self::new(name, options))
    }

    pub fn kind(&self) -> FilterKind {
        match self.options {
            FilterOptions::Parametric(_) => FilterKind::Parametric,
            FilterOptions::Convolution(_) => FilterKind::Convolution,
        }
    }
}

/// Registry of descriptors by name. Entries are shared, never mutated.
#[derive(Debug, Default)]
pub struct FilterCatalog {
    descriptors: HashMap<String, Arc<FilterDescriptor>>,
}

impl FilterCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: FilterDescriptor) -> Result<Arc<FilterDescriptor>> {
        if self.descriptors.contains_key(&descriptor.name) {
            return Err(Error::DuplicateFilter(descriptor.name));
        }
        info!("Registered {} filter {}", descriptor.kind(), descriptor.name);
        let descriptor = Arc::new(descriptor);
        self.descriptors
            .insert(descriptor.name.clone(), Arc::clone(&descriptor));
        Ok(descriptor)
    }

    pub fn get(&self, name: &str) -> Result<Arc<FilterDescriptor>> {
        self.descriptors
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownFilterDescriptor(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.descriptors.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// Fetch and decode the impulse response of a convolution descriptor.
pub async fn load_impulse(
    loader: &AssetLoader,
    options: &ConvolverOptions,
    sample_rate: u32,
) -> Result<ImpulseResponse> {
    debug!("Loading impulse response {}", options.url);
    let bytes = loader.load(&options.url).await?;
    let decoded = decode_audio_blocking(bytes, sample_rate).await?;
    ImpulseResponse::new(decoded.channels, sample_rate, !options.disable_normalization)
}
