//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use settings_manager::Settings;
use sounity::{AssetFetcher, Controller, EngineEvents, Error, Result};

pub const RATE: u32 = 8000;

/// Mono 16-bit PCM WAV holding `seconds` of a constant `level`.
pub fn wav(sample_rate: u32, seconds: f32, level: f32) -> Bytes {
    let frames = (sample_rate as f32 * seconds) as u32;
    let data_len = frames * 2;
    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVEfmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    let sample = (level.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
    for _ in 0..frames {
        out.extend_from_slice(&sample.to_le_bytes());
    }
    Bytes::from(out)
}

/// Serves assets from memory and counts fetches per URL.
#[derive(Default)]
pub struct MemoryFetcher {
    assets: HashMap<String, Bytes>,
    fetches: Mutex<HashMap<String, usize>>,
}

impl MemoryFetcher {
    pub fn with(mut self, url: &str, bytes: Bytes) -> Self {
        self.assets.insert(url.to_string(), bytes);
        self
    }

    pub fn fetch_count(&self, url: &str) -> usize {
        self.fetches
            .lock()
            .unwrap()
            .get(url)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl AssetFetcher for MemoryFetcher {
    async fn fetch(&self, url: &str) -> Result<Bytes> {
        *self.fetches.lock().unwrap().entry(url.to_string()).or_default() += 1;
        // Give other loads a chance to run, like a real network round trip.
        tokio::task::yield_now().await;
        self.assets
            .get(url)
            .cloned()
            .ok_or_else(|| Error::Network(format!("no asset at {}", url)))
    }
}

/// Fetcher with a ten second tone, a short blip and a small impulse.
pub fn standard_fetcher() -> Arc<MemoryFetcher> {
    Arc::new(
        MemoryFetcher::default()
            .with("tone10.wav", wav(RATE, 10.0, 0.25))
            .with("blip.wav", wav(RATE, 0.05, 0.5))
            .with("ir/room.wav", wav(RATE, 0.02, 0.1)),
    )
}

pub fn controller_with(fetcher: Arc<MemoryFetcher>) -> (Controller, EngineEvents) {
    let settings = Settings {
        sample_rate: RATE,
        ..Default::default()
    };
    Controller::new(settings, fetcher).unwrap()
}
