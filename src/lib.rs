// sounity: positional audio engine driven by host commands
// Expose public modules for use in integration tests

pub mod app;
pub mod audio;
pub mod bridge;

// Re-export commonly used types for convenience
pub use app::{Controller, EngineEvent, EngineEvents, TickReport};
pub use audio::{
    AssetCache, AssetFetcher, AssetLoader, FileFetcher, HttpFetcher, SoundOptions, SoundState,
    UrlFetcher,
};
pub use bridge::{DispatchOutcome, Engine, InboundMessage, OutboundMessage};
pub use sounity_core::{Error, Result};
