//! Listener transform and master category volumes.
//!
//! Same axis swap as a sound for `move_to`. `rotate` feeds
//! `(yaw, pitch, roll) = (z, x, y)` into the principal-axes transform, then
//! negates the y component of the forward vector; up is used as is.

use sounity_core::{principal_axes_to_orientation, CategoryVolumes, Orientation, Vec3};

use crate::audio::AudioContext;

#[derive(Debug, Clone, PartialEq)]
pub struct ListenerState {
    position: Vec3,
    orientation: Orientation,
    volumes: CategoryVolumes,
}

impl Default for ListenerState {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            orientation: Orientation::default(),
            volumes: CategoryVolumes::default(),
        }
    }
}

impl ListenerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn volumes(&self) -> &CategoryVolumes {
        &self.volumes
    }

    pub fn move_to(&mut self, x: f32, y: f32, z: f32) {
        self.position = Vec3::new(x, z, y);
    }

    pub fn rotate(&mut self, x: f32, y: f32, z: f32) {
        let Orientation { forward, up } = principal_axes_to_orientation(z, x, y);
        self.orientation = Orientation {
            forward: Vec3::new(forward.x, -forward.y, forward.z),
            up,
        };
    }

    /// Volumes on the host's raw 0..=10 scale.
    pub fn set_volumes(&mut self, raw_sfx: f32, raw_music: f32) {
        self.volumes = CategoryVolumes::from_raw(raw_sfx, raw_music);
    }

    /// Ramp the context listener to this state by `end_time`.
    pub fn apply(&self, ctx: &mut AudioContext, end_time: f64) {
        let now = ctx.current_time();
        let listener = ctx.listener_mut();
        let Orientation { forward, up } = self.orientation;
        let targets = [
            (&mut listener.position_x, self.position.x),
            (&mut listener.position_y, self.position.y),
            (&mut listener.position_z, self.position.z),
            (&mut listener.forward_x, forward.x),
            (&mut listener.forward_y, forward.y),
            (&mut listener.forward_z, forward.z),
            (&mut listener.up_x, up.x),
            (&mut listener.up_y, up.y),
            (&mut listener.up_z, up.z),
        ];
        for (param, target) in targets {
            param.linear_ramp_to_value_at_time(target, end_time, now);
        }
    }
}
