//! Routes inbound messages to the controller. A failing command is logged
//! and reported; it never stops the caller from dispatching the next one.

use log::{debug, error};
use sounity_core::{Error, Result};

use super::messages::{start_request, InboundMessage};
use crate::app::Controller;

#[derive(Debug)]
pub enum DispatchOutcome {
    Handled,
    /// Message type not recognised.
    Ignored,
    Failed(Error),
}

impl DispatchOutcome {
    pub fn is_handled(&self) -> bool {
        matches!(self, DispatchOutcome::Handled)
    }
}

/// Parse one JSON line and dispatch it.
pub fn dispatch_json(controller: &mut Controller, line: &str) -> DispatchOutcome {
    match serde_json::from_str::<InboundMessage>(line) {
        Ok(message) => dispatch(controller, message),
        Err(e) => {
            error!("Rejected malformed message: {}", e);
            DispatchOutcome::Failed(Error::Serialization(e.to_string()))
        }
    }
}

pub fn dispatch(controller: &mut Controller, message: InboundMessage) -> DispatchOutcome {
    if message == InboundMessage::Unknown {
        debug!("Ignoring message of unknown type");
        return DispatchOutcome::Ignored;
    }

    let kind = message.kind();
    match apply(controller, message) {
        Ok(()) => DispatchOutcome::Handled,
        Err(e) => {
            error!("Failed to handle {}: {}", kind, e);
            DispatchOutcome::Failed(e)
        }
    }
}

fn apply(controller: &mut Controller, message: InboundMessage) -> Result<()> {
    match message {
        InboundMessage::Update {
            pos_x,
            pos_y,
            pos_z,
            rot_x,
            rot_y,
            rot_z,
            sfx_volume,
            music_volume,
        } => {
            controller.move_listener(pos_x, pos_y, pos_z);
            controller.rotate_listener(rot_x, rot_y, rot_z);
            controller.set_category_volumes(sfx_volume, music_volume);
        }
        InboundMessage::CreateSound {
            identifier,
            source,
            options,
        } => controller.create_sound(&identifier, &source, &options)?,
        InboundMessage::StartSound {
            identifier,
            start_time,
            ref_distance,
            volume,
            looping,
        } => controller.start_sound(
            &identifier,
            start_request(start_time, ref_distance, volume, looping),
        )?,
        InboundMessage::StopSound { identifier } => controller.stop_sound(&identifier)?,
        InboundMessage::MoveSound { identifier, x, y, z } => {
            controller.move_sound(&identifier, x, y, z)?
        }
        InboundMessage::RotateSound { identifier, x, y, z } => {
            controller.rotate_sound(&identifier, x, y, z)?
        }
        InboundMessage::DisposeSound { identifier } => controller.dispose_sound(&identifier)?,
        InboundMessage::CreateFilter {
            filter_name,
            filter_type,
            options,
        } => controller.create_filter(&filter_name, filter_type, options)?,
        InboundMessage::AddSoundFilter {
            identifier,
            filter_name,
        } => {
            controller.add_sound_filter(&identifier, &filter_name)?;
        }
        InboundMessage::RemoveSoundFilter {
            identifier,
            filter_name,
        } => {
            controller.remove_sound_filter(&identifier, &filter_name)?;
        }
        InboundMessage::AddListenerFilter { filter_name } => {
            controller.add_listener_filter(&filter_name)?;
        }
        InboundMessage::RemoveListenerFilter { filter_name } => {
            controller.remove_listener_filter(&filter_name)?;
        }
        InboundMessage::SetSoundVolume { identifier, value } => {
            controller.set_sound_volume(&identifier, value)?
        }
        InboundMessage::SetSoundMaxDistance { identifier, value } => {
            controller.set_sound_max_distance(&identifier, value)?
        }
        InboundMessage::SetSoundRefDistance { identifier, value } => {
            controller.set_sound_ref_distance(&identifier, value)?
        }
        InboundMessage::SetLoop { identifier, value } => controller.set_loop(&identifier, value)?,
        InboundMessage::Unknown => {}
    }
    Ok(())
}
