//! Playback of the rendered stereo ring through the default output device.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use log::{error, info};
use ringbuf::HeapConsumer;
use sounity_core::{Error, Result, OUTPUT_CHANNELS};

/// The default output device and the stream configuration chosen for it.
pub struct AudioOutput {
    device: cpal::Device,
    config: cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
}

impl AudioOutput {
    /// Open the host's default output device, preferring a stereo f32
    /// configuration at `preferred_rate` and otherwise taking the device
    /// default.
    pub fn open_default(preferred_rate: u32) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Device("no output device available".into()))?;
        let name = device.name().unwrap_or_else(|_| "unknown".into());

        let supported = choose_config(&device, preferred_rate)?;
        let sample_format = supported.sample_format();
        let config: cpal::StreamConfig = supported.into();
        info!(
            "Output device {} at {} Hz, {} channels, {:?}",
            name, config.sample_rate.0, config.channels, sample_format
        );
        Ok(Self {
            device,
            config,
            sample_format,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    pub fn channels(&self) -> usize {
        self.config.channels as usize
    }

    /// Start playing frames popped from `consumer`. The stream stops when
    /// the returned handle is dropped.
    pub fn start(&self, consumer: HeapConsumer<f32>) -> Result<cpal::Stream> {
        let stream = match self.sample_format {
            cpal::SampleFormat::F32 => self.build_stream::<f32>(consumer)?,
            cpal::SampleFormat::I16 => self.build_stream::<i16>(consumer)?,
            cpal::SampleFormat::U16 => self.build_stream::<u16>(consumer)?,
            other => {
                return Err(Error::Device(format!(
                    "unsupported sample format {:?}",
                    other
                )))
            }
        };
        stream
            .play()
            .map_err(|e| Error::Device(format!("failed to start output stream: {}", e)))?;
        Ok(stream)
    }

    fn build_stream<T>(&self, mut consumer: HeapConsumer<f32>) -> Result<cpal::Stream>
    where
        T: SizedSample + FromSample<f32>,
    {
        let channels = self.channels();
        let err_fn = |err| error!("Output stream error: {}", err);
        self.device
            .build_output_stream(
                &self.config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    write_frames(data, channels, &mut consumer);
                },
                err_fn,
                None,
            )
            .map_err(|e| Error::Device(format!("failed to build output stream: {}", e)))
    }
}

fn choose_config(device: &cpal::Device, rate: u32) -> Result<cpal::SupportedStreamConfig> {
    let rate = cpal::SampleRate(rate);
    let preferred = device
        .supported_output_configs()
        .map_err(|e| Error::Device(format!("failed to query output configs: {}", e)))?
        .find(|range| {
            range.channels() as usize == OUTPUT_CHANNELS
                && range.sample_format() == cpal::SampleFormat::F32
                && range.min_sample_rate() <= rate
                && rate <= range.max_sample_rate()
        });
    match preferred {
        Some(range) => Ok(range.with_sample_rate(rate)),
        None => device
            .default_output_config()
            .map_err(|e| Error::Device(format!("default output config not supported: {}", e))),
    }
}

/// Fill `data` with interleaved frames of `channels` channels from the stereo
/// ring. Mono devices get a downmix, extra channels are silent and an
/// underrun plays silence.
pub(crate) fn write_frames<T>(data: &mut [T], channels: usize, consumer: &mut HeapConsumer<f32>)
where
    T: Sample + FromSample<f32>,
{
    let mut frame = [0.0f32; OUTPUT_CHANNELS];
    for out in data.chunks_mut(channels.max(1)) {
        if consumer.len() >= OUTPUT_CHANNELS {
            consumer.pop_slice(&mut frame);
        } else {
            frame = [0.0; OUTPUT_CHANNELS];
        }
        let [left, right] = frame;
        match out {
            [mono] => *mono = T::from_sample(0.5 * (left + right)),
            [l, r, rest @ ..] => {
                *l = T::from_sample(left);
                *r = T::from_sample(right);
                for sample in rest {
                    *sample = T::EQUILIBRIUM;
                }
            }
            [] => {}
        }
    }
}
