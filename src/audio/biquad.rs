//! Parametric filter stage.
//!
//! Coefficients follow Robert Bristow-Johnson's Audio EQ Cookbook with the
//! parameter conventions of the platform biquad filter: `Q` is in dB for the
//! low/high-pass responses and linear otherwise, `gain` is in dB, `detune` in
//! cents.

use serde::{Deserialize, Serialize};

/// Frequency response of the filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BiquadType {
    #[default]
    Lowpass,
    Highpass,
    Bandpass,
    Lowshelf,
    Highshelf,
    Peaking,
    Notch,
    Allpass,
}

/// Options of a parametric filter descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BiquadOptions {
    #[serde(rename = "type")]
    pub filter_type: BiquadType,
    pub frequency: f32,
    #[serde(rename = "Q")]
    pub q: f32,
    pub gain: f32,
    pub detune: f32,
}

impl Default for BiquadOptions {
    fn default() -> Self {
        Self {
            filter_type: BiquadType::Lowpass,
            frequency: 350.0,
            q: 1.0,
            gain: 0.0,
            detune: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ChannelState {
    x1: f64,
    x2: f64,
    y1: f64,
    y2: f64,
}

/// Second-order IIR section applied independently to each channel.
#[derive(Debug, Clone)]
pub struct Biquad {
    options: BiquadOptions,
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    state: [ChannelState; 2],
}

impl Biquad {
    pub fn new(options: &BiquadOptions, sample_rate: u32) -> Self {
        let mut filter = Self {
            options: options.clone(),
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
            state: [ChannelState::default(); 2],
        };
        filter.update_coefficients(sample_rate);
        filter
    }

    pub fn options(&self) -> &BiquadOptions {
        &self.options
    }

    fn update_coefficients(&mut self, sample_rate: u32) {
        let nyquist = sample_rate as f64 / 2.0;
        let frequency = self.options.frequency as f64 * 2f64.powf(self.options.detune as f64 / 1200.0);
        let frequency = frequency.clamp(1.0, nyquist * 0.999);

        let w0 = 2.0 * std::f64::consts::PI * frequency / sample_rate as f64;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let q = (self.options.q as f64).max(1e-4);
        let a = 10f64.powf(self.options.gain as f64 / 40.0);
        let alpha_q = sin_w0 / (2.0 * q);
        let alpha_q_db = sin_w0 / (2.0 * 10f64.powf(self.options.q as f64 / 20.0));
        let alpha_s = sin_w0 / 2.0 * std::f64::consts::SQRT_2;
        let two_sqrt_a_alpha = 2.0 * a.sqrt() * alpha_s;

        let (b0, b1, b2, a0, a1, a2) = match self.options.filter_type {
            BiquadType::Lowpass => (
                (1.0 - cos_w0) / 2.0,
                1.0 - cos_w0,
                (1.0 - cos_w0) / 2.0,
                1.0 + alpha_q_db,
                -2.0 * cos_w0,
                1.0 - alpha_q_db,
            ),
            BiquadType::Highpass => (
                (1.0 + cos_w0) / 2.0,
                -(1.0 + cos_w0),
                (1.0 + cos_w0) / 2.0,
                1.0 + alpha_q_db,
                -2.0 * cos_w0,
                1.0 - alpha_q_db,
            ),
            BiquadType::Bandpass => (
                alpha_q,
                0.0,
                -alpha_q,
                1.0 + alpha_q,
                -2.0 * cos_w0,
                1.0 - alpha_q,
            ),
            BiquadType::Notch => (
                1.0,
                -2.0 * cos_w0,
                1.0,
                1.0 + alpha_q,
                -2.0 * cos_w0,
                1.0 - alpha_q,
            ),
            BiquadType::Allpass => (
                1.0 - alpha_q,
                -2.0 * cos_w0,
                1.0 + alpha_q,
                1.0 + alpha_q,
                -2.0 * cos_w0,
                1.0 - alpha_q,
            ),
            BiquadType::Peaking => (
                1.0 + alpha_q * a,
                -2.0 * cos_w0,
                1.0 - alpha_q * a,
                1.0 + alpha_q / a,
                -2.0 * cos_w0,
                1.0 - alpha_q / a,
            ),
            BiquadType::Lowshelf => (
                a * ((a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
                2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0),
                a * ((a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
                (a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
                -2.0 * ((a - 1.0) + (a + 1.0) * cos_w0),
                (a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
            ),
            BiquadType::Highshelf => (
                a * ((a + 1.0) + (a - 1.0) * cos_w0 + two_sqrt_a_alpha),
                -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0),
                a * ((a + 1.0) + (a - 1.0) * cos_w0 - two_sqrt_a_alpha),
                (a + 1.0) - (a - 1.0) * cos_w0 + two_sqrt_a_alpha,
                2.0 * ((a - 1.0) - (a + 1.0) * cos_w0),
                (a + 1.0) - (a - 1.0) * cos_w0 - two_sqrt_a_alpha,
            ),
        };

        self.b0 = b0 / a0;
        self.b1 = b1 / a0;
        self.b2 = b2 / a0;
        self.a1 = a1 / a0;
        self.a2 = a2 / a0;
    }

    /// Filter one block of a stereo signal in place.
    pub fn process(&mut self, left: &mut [f32], right: &mut [f32]) {
        self.process_channel(0, left);
        self.process_channel(1, right);
    }

    fn process_channel(&mut self, channel: usize, samples: &mut [f32]) {
        let mut s = self.state[channel];
        for sample in samples.iter_mut() {
            let x0 = *sample as f64;
            let y0 = self.b0 * x0 + self.b1 * s.x1 + self.b2 * s.x2 - self.a1 * s.y1 - self.a2 * s.y2;
            s.x2 = s.x1;
            s.x1 = x0;
            s.y2 = s.y1;
            s.y1 = y0;
            *sample = y0 as f32;
        }
        self.state[channel] = s;
    }
}
