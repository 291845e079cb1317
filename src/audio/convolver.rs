//! Uniformly partitioned overlap-save convolution reverb.

use std::collections::VecDeque;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};
use sounity_core::{Error, Result, RENDER_QUANTUM};

const BLOCK: usize = RENDER_QUANTUM;
const FFT_SIZE: usize = BLOCK * 2;

const GAIN_CALIBRATION: f32 = 0.00125;
const GAIN_CALIBRATION_SAMPLE_RATE: f32 = 44100.0;
const MIN_POWER: f32 = 0.000125;

/// Impulse response ready to be loaded into a [`PartitionedConvolver`].
#[derive(Debug, Clone)]
pub struct ImpulseResponse {
    channels: Vec<Vec<f32>>,
}

impl ImpulseResponse {
    /// Build a response from de-interleaved channels at the context rate.
    /// With `normalize` the response is scaled to a calibrated power so that
    /// rooms of different loudness sit at similar levels.
    pub fn new(mut channels: Vec<Vec<f32>>, sample_rate: u32, normalize: bool) -> Result<Self> {
        let len = channels.iter().map(Vec::len).max().unwrap_or(0);
        if channels.is_empty() || len == 0 {
            return Err(Error::InvalidArgument("impulse response is empty".into()));
        }
        for channel in channels.iter_mut() {
            channel.resize(len, 0.0);
        }

        if normalize {
            let scale = normalization_scale(&channels, sample_rate);
            for sample in channels.iter_mut().flatten() {
                *sample *= scale;
            }
        }

        Ok(Self { channels })
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }
}

fn normalization_scale(channels: &[Vec<f32>], sample_rate: u32) -> f32 {
    let count = channels.len() * channels[0].len();
    let energy: f32 = channels.iter().flatten().map(|s| s * s).sum();
    let mut power = (energy / count as f32).sqrt();
    if !power.is_finite() || power < MIN_POWER {
        power = MIN_POWER;
    }

    let mut scale = GAIN_CALIBRATION / power;
    scale *= GAIN_CALIBRATION_SAMPLE_RATE / sample_rate as f32;
    if channels.len() == 4 {
        scale *= 0.5;
    }
    scale
}

/// One input channel convolved with one response channel, summed into an output.
#[derive(Debug, Clone, Copy)]
struct Path {
    input: usize,
    response: usize,
    output: usize,
}

fn routing(response_channels: usize) -> Vec<Path> {
    let path = |input, response, output| Path {
        input,
        response,
        output,
    };
    match response_channels {
        1 => vec![path(0, 0, 0), path(1, 0, 1)],
        4 => vec![path(0, 0, 0), path(1, 2, 0), path(0, 1, 1), path(1, 3, 1)],
        _ => vec![path(0, 0, 0), path(1, 1, 1)],
    }
}

/// Stereo convolver processing [`RENDER_QUANTUM`] frames at a time.
pub struct PartitionedConvolver {
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    /// Spectra of each response partition, per response channel.
    partitions: Vec<Vec<Vec<Complex<f32>>>>,
    paths: Vec<Path>,
    /// Most recent input spectrum first, per input channel.
    history: [VecDeque<Vec<Complex<f32>>>; 2],
    previous: [Vec<f32>; 2],
    scratch: Vec<Complex<f32>>,
    accumulators: [Vec<Complex<f32>>; 2],
}

impl PartitionedConvolver {
    pub fn new(response: &ImpulseResponse) -> Self {
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(FFT_SIZE);
        let inverse = planner.plan_fft_inverse(FFT_SIZE);

        let partitions: Vec<Vec<Vec<Complex<f32>>>> = response
            .channels()
            .iter()
            .map(|channel| {
                channel
                    .chunks(BLOCK)
                    .map(|chunk| {
                        let mut spectrum = vec![Complex::new(0.0, 0.0); FFT_SIZE];
                        for (bin, sample) in spectrum.iter_mut().zip(chunk) {
                            *bin = Complex::new(*sample, 0.0);
                        }
                        forward.process(&mut spectrum);
                        spectrum
                    })
                    .collect()
            })
            .collect();

        let partition_count = partitions.first().map_or(0, Vec::len);
        let empty_history = || {
            let mut history = VecDeque::with_capacity(partition_count + 1);
            history.resize(partition_count, vec![Complex::new(0.0, 0.0); FFT_SIZE]);
            history
        };

        Self {
            forward,
            inverse,
            partitions,
            paths: routing(response.channel_count()),
            history: [empty_history(), empty_history()],
            previous: [vec![0.0; BLOCK], vec![0.0; BLOCK]],
            scratch: vec![Complex::new(0.0, 0.0); FFT_SIZE],
            accumulators: [
                vec![Complex::new(0.0, 0.0); FFT_SIZE],
                vec![Complex::new(0.0, 0.0); FFT_SIZE],
            ],
        }
    }

    /// Number of partitions per response channel.
    pub fn partition_count(&self) -> usize {
        self.partitions.first().map_or(0, Vec::len)
    }

    /// Convolve a stereo signal in place. Buffers are processed in whole
    /// blocks; a trailing partial block is zero padded.
    pub fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        let frames = left.len().min(right.len());
        let mut offset = 0;
        while offset < frames {
            let end = (offset + BLOCK).min(frames);
            self.process_block(&mut left[offset..end], &mut right[offset..end]);
            offset = end;
        }
    }

    fn process_block(&mut self, left: &mut [f32], right: &mut [f32]) {
        let frames = left.len();

        for (channel, input) in [&*left, &*right].into_iter().enumerate() {
            let mut spectrum = self.history[channel]
                .pop_back()
                .unwrap_or_else(|| vec![Complex::new(0.0, 0.0); FFT_SIZE]);
            for (bin, sample) in spectrum.iter_mut().zip(self.previous[channel].iter()) {
                *bin = Complex::new(*sample, 0.0);
            }
            for i in 0..BLOCK {
                let sample = input.get(i).copied().unwrap_or(0.0);
                spectrum[BLOCK + i] = Complex::new(sample, 0.0);
                self.previous[channel][i] = sample;
            }
            self.forward.process(&mut spectrum);
            self.history[channel].push_front(spectrum);
        }

        for accumulator in self.accumulators.iter_mut() {
            accumulator.fill(Complex::new(0.0, 0.0));
        }
        for path in &self.paths {
            let Some(partitions) = self.partitions.get(path.response) else {
                continue;
            };
            let accumulator = &mut self.accumulators[path.output];
            for (input, partition) in self.history[path.input].iter().zip(partitions) {
                for ((acc, x), h) in accumulator.iter_mut().zip(input).zip(partition) {
                    *acc += x * h;
                }
            }
        }

        let norm = 1.0 / FFT_SIZE as f32;
        for (output, out) in [left, right].into_iter().enumerate() {
            self.scratch.copy_from_slice(&self.accumulators[output]);
            self.inverse.process(&mut self.scratch);
            for (sample, bin) in out.iter_mut().zip(&self.scratch[BLOCK..BLOCK + frames]) {
                *sample = bin.re * norm;
            }
        }
    }
}

impl std::fmt::Debug for PartitionedConvolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionedConvolver")
            .field("partitions", &self.partition_count())
            .field("response_channels", &self.partitions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn impulse(len: usize, at: usize, gain: f32) -> Vec<f32> {
        let mut ir = vec![0.0; len];
        ir[at] = gain;
        ir
    }

    fn ramp(len: usize) -> Vec<f32> {
        (0..len).map(|i| ((i % 50) as f32 / 50.0) - 0.5).collect()
    }

    fn run(convolver: &mut PartitionedConvolver, left: &[f32], right: &[f32]) -> (Vec<f32>, Vec<f32>) {
        let mut l = left.to_vec();
        let mut r = right.to_vec();
        for (lb, rb) in l.chunks_mut(BLOCK).zip(r.chunks_mut(BLOCK)) {
            convolver.process(lb, rb);
        }
        (l, r)
    }

    #[test]
    fn unit_impulse_passes_signal_through() {
        let ir = ImpulseResponse::new(vec![impulse(1, 0, 1.0)], 48000, false).unwrap();
        let mut convolver = PartitionedConvolver::new(&ir);
        let input = ramp(BLOCK * 4);
        let (l, r) = run(&mut convolver, &input, &input);
        for i in 0..input.len() {
            assert!((l[i] - input[i]).abs() < 1e-4);
            assert!((r[i] - input[i]).abs() < 1e-4);
        }
    }

    #[test]
    fn delay_across_partitions() {
        let delay = 300;
        let ir = ImpulseResponse::new(vec![impulse(400, delay, 0.5)], 48000, false).unwrap();
        let mut convolver = PartitionedConvolver::new(&ir);
        assert_eq!(convolver.partition_count(), 4);

        let input = ramp(BLOCK * 8);
        let (l, _) = run(&mut convolver, &input, &input);
        for i in 0..delay {
            assert!(l[i].abs() < 1e-4);
        }
        for i in delay..input.len() {
            assert!((l[i] - 0.5 * input[i - delay]).abs() < 1e-4, "sample {i}");
        }
    }

    #[test]
    fn stereo_response_keeps_channels_apart() {
        let ir = ImpulseResponse::new(vec![impulse(1, 0, 1.0), impulse(1, 0, 0.0)], 48000, false)
            .unwrap();
        let mut convolver = PartitionedConvolver::new(&ir);
        let input = ramp(BLOCK * 2);
        let (l, r) = run(&mut convolver, &input, &input);
        assert!(l.iter().any(|s| s.abs() > 0.1));
        assert!(r.iter().all(|s| s.abs() < 1e-4));
    }

    #[test]
    fn tail_rings_after_input_stops() {
        let ir = ImpulseResponse::new(vec![impulse(200, 150, 1.0)], 48000, false).unwrap();
        let mut convolver = PartitionedConvolver::new(&ir);
        let mut input = vec![0.0; BLOCK * 3];
        input[10] = 1.0;
        let (l, _) = run(&mut convolver, &input, &input);
        assert!((l[160] - 1.0).abs() < 1e-4);
    }

    #[test]
    fn normalization_scales_to_calibrated_power() {
        let ir = ImpulseResponse::new(vec![vec![0.5; 100]], 44100, true).unwrap();
        // power is 0.5, so the scale is 0.00125 / 0.5
        assert!((ir.channels()[0][0] - 0.5 * 0.0025).abs() < 1e-7);

        let raw = ImpulseResponse::new(vec![vec![0.5; 100]], 44100, false).unwrap();
        assert_eq!(raw.channels()[0][0], 0.5);

        let quad = ImpulseResponse::new(vec![vec![0.5; 10]; 4], 88200, true).unwrap();
        assert!((quad.channels()[0][0] - 0.5 * 0.0025 * 0.5 * 0.5).abs() < 1e-7);
    }

    #[test]
    fn silent_response_uses_power_floor() {
        let ir = ImpulseResponse::new(vec![vec![0.0; 64]], 44100, true).unwrap();
        assert!(ir.channels()[0].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn empty_response_is_rejected() {
        assert!(ImpulseResponse::new(vec![], 48000, true).is_err());
        assert!(ImpulseResponse::new(vec![vec![]], 48000, true).is_err());
    }
}
