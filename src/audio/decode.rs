//! Asset decoding.

use std::io::Cursor;

use bytes::Bytes;
use log::debug;
use sounity_core::{Error, Result};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};

/// De-interleaved PCM at a fixed sample rate.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn frames(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Sample of `channel` at `frame`, repeating the last channel for mono
    /// material played into a stereo graph.
    pub fn sample(&self, channel: usize, frame: usize) -> f32 {
        let channel = channel.min(self.channels.len().saturating_sub(1));
        self.channels
            .get(channel)
            .and_then(|samples| samples.get(frame))
            .copied()
            .unwrap_or(0.0)
    }
}

/// Decode an encoded asset and resample it to `target_rate`.
pub fn decode_audio(bytes: Bytes, target_rate: u32) -> Result<DecodedAudio> {
    let stream = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());
    let probed = get_probe()
        .format(
            &Hint::new(),
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| Error::Decode(format!("unrecognised container: {}", e)))?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| Error::Decode("no audio track".into()))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(target_rate);
    let mut channel_count = track.codec_params.channels.map_or(0, |c| c.count());

    let mut decoder = get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| Error::Decode(format!("unsupported codec: {}", e)))?;

    let mut interleaved: Vec<f32> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(Error::Decode(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channel_count = spec.channels.count();
                let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buffer.copy_interleaved_ref(decoded);
                interleaved.extend_from_slice(buffer.samples());
            }
            Err(SymphoniaError::DecodeError(e)) => {
                debug!("Skipping corrupt packet: {}", e);
            }
            Err(e) => return Err(Error::Decode(e.to_string())),
        }
    }

    if channel_count == 0 || interleaved.is_empty() {
        return Err(Error::Decode("asset contains no audio".into()));
    }

    let mut channels = vec![Vec::with_capacity(interleaved.len() / channel_count); channel_count];
    for frame in interleaved.chunks_exact(channel_count) {
        for (channel, sample) in channels.iter_mut().zip(frame) {
            channel.push(*sample);
        }
    }

    if sample_rate != target_rate {
        debug!("Resampling asset from {} Hz to {} Hz", sample_rate, target_rate);
        channels = channels
            .iter()
            .map(|channel| resample_linear(channel, sample_rate, target_rate))
            .collect();
    }

    Ok(DecodedAudio {
        channels,
        sample_rate: target_rate,
    })
}

/// Decode on the blocking pool so large assets do not stall the engine loop.
pub async fn decode_audio_blocking(bytes: Bytes, target_rate: u32) -> Result<DecodedAudio> {
    tokio::task::spawn_blocking(move || decode_audio(bytes, target_rate))
        .await
        .map_err(|e| Error::Decode(format!("decoder task failed: {}", e)))?
}

/// Linear-interpolation sample rate conversion.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 {
        return samples.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).round().max(1.0) as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let position = i as f64 * ratio;
            let index = (position.floor() as usize).min(last);
            let next = (index + 1).min(last);
            let fraction = (position - index as f64) as f32;
            samples[index] + (samples[next] - samples[index]) * fraction
        })
        .collect()
}
