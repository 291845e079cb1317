//! Spatializer stage: distance attenuation, cone attenuation and
//! equal-power panning of a source relative to the listener.

use super::param::AudioParam;
use sounity_core::{DistanceModel, PanningModel, Vec3};

/// Listener transform as automatable parameters. Faces -z with +y up
/// until moved.
#[derive(Debug, Clone)]
pub struct Listener {
    pub position_x: AudioParam,
    pub position_y: AudioParam,
    pub position_z: AudioParam,
    pub forward_x: AudioParam,
    pub forward_y: AudioParam,
    pub forward_z: AudioParam,
    pub up_x: AudioParam,
    pub up_y: AudioParam,
    pub up_z: AudioParam,
}

impl Default for Listener {
    fn default() -> Self {
        Self {
            position_x: AudioParam::new(0.0),
            position_y: AudioParam::new(0.0),
            position_z: AudioParam::new(0.0),
            forward_x: AudioParam::new(0.0),
            forward_y: AudioParam::new(0.0),
            forward_z: AudioParam::new(-1.0),
            up_x: AudioParam::new(0.0),
            up_y: AudioParam::new(1.0),
            up_z: AudioParam::new(0.0),
        }
    }
}

impl Listener {
    pub fn pose_at(&self, time: f64) -> ListenerPose {
        ListenerPose {
            position: Vec3::new(
                self.position_x.value_at(time),
                self.position_y.value_at(time),
                self.position_z.value_at(time),
            ),
            forward: Vec3::new(
                self.forward_x.value_at(time),
                self.forward_y.value_at(time),
                self.forward_z.value_at(time),
            ),
            up: Vec3::new(
                self.up_x.value_at(time),
                self.up_y.value_at(time),
                self.up_z.value_at(time),
            ),
        }
    }
}

/// Listener transform frozen at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ListenerPose {
    pub position: Vec3,
    pub forward: Vec3,
    pub up: Vec3,
}

/// Creation options of a spatializer stage.
#[derive(Debug, Clone, PartialEq)]
pub struct PannerOptions {
    pub panning_model: PanningModel,
    pub distance_model: DistanceModel,
    pub position: Vec3,
    pub orientation: Vec3,
    pub ref_distance: f32,
    pub max_distance: f32,
    pub rolloff_factor: f32,
    pub cone_inner_angle: f32,
    pub cone_outer_angle: f32,
    pub cone_outer_gain: f32,
}

impl Default for PannerOptions {
    fn default() -> Self {
        Self {
            panning_model: PanningModel::Hrtf,
            distance_model: DistanceModel::Inverse,
            position: Vec3::ZERO,
            orientation: Vec3::new(1.0, 0.0, 0.0),
            ref_distance: 1.0,
            max_distance: 10000.0,
            rolloff_factor: 1.0,
            cone_inner_angle: 360.0,
            cone_outer_angle: 360.0,
            cone_outer_gain: 0.0,
        }
    }
}

/// Spatializer stage state.
#[derive(Debug, Clone)]
pub struct Panner {
    pub panning_model: PanningModel,
    pub distance_model: DistanceModel,
    pub position_x: AudioParam,
    pub position_y: AudioParam,
    pub position_z: AudioParam,
    pub orientation_x: AudioParam,
    pub orientation_y: AudioParam,
    pub orientation_z: AudioParam,
    pub ref_distance: f32,
    pub max_distance: f32,
    pub rolloff_factor: f32,
    pub cone_inner_angle: f32,
    pub cone_outer_angle: f32,
    pub cone_outer_gain: f32,
}

impl Panner {
    pub fn new(options: &PannerOptions) -> Self {
        Self {
            panning_model: options.panning_model,
            distance_model: options.distance_model,
            position_x: AudioParam::new(options.position.x),
            position_y: AudioParam::new(options.position.y),
            position_z: AudioParam::new(options.position.z),
            orientation_x: AudioParam::new(options.orientation.x),
            orientation_y: AudioParam::new(options.orientation.y),
            orientation_z: AudioParam::new(options.orientation.z),
            ref_distance: options.ref_distance,
            max_distance: options.max_distance,
            rolloff_factor: options.rolloff_factor,
            cone_inner_angle: options.cone_inner_angle,
            cone_outer_angle: options.cone_outer_angle,
            cone_outer_gain: options.cone_outer_gain,
        }
    }

    pub fn position_at(&self, time: f64) -> Vec3 {
        Vec3::new(
            self.position_x.value_at(time),
            self.position_y.value_at(time),
            self.position_z.value_at(time),
        )
    }

    pub fn orientation_at(&self, time: f64) -> Vec3 {
        Vec3::new(
            self.orientation_x.value_at(time),
            self.orientation_y.value_at(time),
            self.orientation_z.value_at(time),
        )
    }

    /// Left/right gains for a source rendered at `time`.
    pub fn stereo_gains(&self, listener: &ListenerPose, time: f64) -> (f32, f32) {
        let position = self.position_at(time);
        let orientation = self.orientation_at(time);

        let distance = position.sub(listener.position).length();
        let gain = distance_gain(
            self.distance_model,
            distance,
            self.ref_distance,
            self.max_distance,
            self.rolloff_factor,
        ) * cone_gain(
            position,
            orientation,
            listener.position,
            self.cone_inner_angle,
            self.cone_outer_angle,
            self.cone_outer_gain,
        );

        // HRTF is rendered with the equal-power law
        let (left, right) = equal_power(azimuth(position, listener));
        (left * gain, right * gain)
    }

    /// Downmix the block to mono and place it in the stereo field.
    pub fn process(&self, listener: &ListenerPose, time: f64, left: &mut [f32], right: &mut [f32]) {
        let (left_gain, right_gain) = self.stereo_gains(listener, time);
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let mono = (*l + *r) * 0.5;
            *l = mono * left_gain;
            *r = mono * right_gain;
        }
    }
}

/// Attenuation for a source at `distance` from the listener.
pub fn distance_gain(
    model: DistanceModel,
    distance: f32,
    ref_distance: f32,
    max_distance: f32,
    rolloff: f32,
) -> f32 {
    match model {
        DistanceModel::Linear => {
            if max_distance <= ref_distance {
                return if distance <= ref_distance { 1.0 } else { 1.0 - rolloff.min(1.0) };
            }
            let d = distance.clamp(ref_distance, max_distance);
            1.0 - rolloff.clamp(0.0, 1.0) * (d - ref_distance) / (max_distance - ref_distance)
        }
        DistanceModel::Inverse => {
            let d = distance.max(ref_distance);
            let denominator = ref_distance + rolloff * (d - ref_distance);
            if denominator <= f32::EPSILON {
                1.0
            } else {
                ref_distance / denominator
            }
        }
        DistanceModel::Exponential => {
            if ref_distance <= f32::EPSILON {
                return 1.0;
            }
            (distance.max(ref_distance) / ref_distance).powf(-rolloff)
        }
    }
}

/// Attenuation from the source's directivity cone.
pub fn cone_gain(
    source: Vec3,
    orientation: Vec3,
    listener: Vec3,
    inner_angle: f32,
    outer_angle: f32,
    outer_gain: f32,
) -> f32 {
    if orientation.length() <= f32::EPSILON || (inner_angle >= 360.0 && outer_angle >= 360.0) {
        return 1.0;
    }

    let to_listener = listener.sub(source).normalized();
    if to_listener == Vec3::ZERO {
        return 1.0;
    }
    let cos_angle = to_listener.dot(orientation.normalized()).clamp(-1.0, 1.0);
    let angle = cos_angle.acos().to_degrees().abs();

    let inner_half = inner_angle.abs() * 0.5;
    let outer_half = outer_angle.abs() * 0.5;

    if angle <= inner_half {
        1.0
    } else if angle >= outer_half {
        outer_gain
    } else {
        let x = (angle - inner_half) / (outer_half - inner_half);
        1.0 + (outer_gain - 1.0) * x
    }
}

/// Azimuth of the source in degrees, -90 (left) ..= 90 (right).
pub fn azimuth(source: Vec3, listener: &ListenerPose) -> f32 {
    let relative = source.sub(listener.position);
    if relative.length() <= f32::EPSILON {
        return 0.0;
    }

    let forward = listener.forward.normalized();
    let right = forward.cross(listener.up).normalized();
    if right == Vec3::ZERO {
        return 0.0;
    }
    let up = right.cross(forward);

    let projected = relative.sub(up.scale(relative.dot(up))).normalized();
    if projected == Vec3::ZERO {
        return 0.0;
    }

    let mut azimuth = projected.dot(right).clamp(-1.0, 1.0).acos().to_degrees();
    if projected.dot(forward) < 0.0 {
        azimuth = 360.0 - azimuth;
    }
    // Relative to "front" instead of "right"
    azimuth = if (0.0..=270.0).contains(&azimuth) {
        90.0 - azimuth
    } else {
        450.0 - azimuth
    };

    // Fold sources behind the listener onto the frontal half plane
    if azimuth < -90.0 {
        -180.0 - azimuth
    } else if azimuth > 90.0 {
        180.0 - azimuth
    } else {
        azimuth
    }
}

/// Equal-power panning law for an azimuth in -90..=90 degrees.
pub fn equal_power(azimuth: f32) -> (f32, f32) {
    let x = (azimuth.clamp(-90.0, 90.0) + 90.0) / 180.0;
    let angle = x * std::f32::consts::FRAC_PI_2;
    (angle.cos(), angle.sin())
}

// Helper function to measure stereo channel levels
pub fn measure_stereo_levels(left: &[f32], right: &[f32]) -> (f32, f32) {
    if left.is_empty() {
        return (0.0, 0.0);
    }
    let count = left.len() as f32;
    let left_sum: f32 = left.iter().map(|s| s.abs()).sum();
    let right_sum: f32 = right.iter().map(|s| s.abs()).sum();
    (left_sum / count, right_sum / count)
}
