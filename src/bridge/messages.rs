//! Wire format of the host bridge. Every message is a JSON object tagged by
//! `type`; unrecognised tags parse as [`InboundMessage::Unknown`].

use serde::{Deserialize, Serialize};

use crate::audio::{FilterKind, SoundOptions, StartRequest};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum InboundMessage {
    #[serde(rename_all = "camelCase")]
    Update {
        pos_x: f32,
        pos_y: f32,
        pos_z: f32,
        #[serde(default)]
        rot_x: f32,
        #[serde(default)]
        rot_y: f32,
        #[serde(default)]
        rot_z: f32,
        sfx_volume: f32,
        music_volume: f32,
    },
    CreateSound {
        identifier: String,
        source: String,
        #[serde(default)]
        options: SoundOptions,
    },
    #[serde(rename_all = "camelCase")]
    StartSound {
        identifier: String,
        #[serde(default)]
        start_time: Option<f64>,
        #[serde(default)]
        ref_distance: Option<f32>,
        #[serde(default)]
        volume: Option<f32>,
        #[serde(default, rename = "loop")]
        looping: Option<bool>,
    },
    StopSound {
        identifier: String,
    },
    MoveSound {
        identifier: String,
        #[serde(alias = "posX")]
        x: f32,
        #[serde(alias = "posY")]
        y: f32,
        #[serde(alias = "posZ")]
        z: f32,
    },
    RotateSound {
        identifier: String,
        #[serde(alias = "rotX")]
        x: f32,
        #[serde(alias = "rotY")]
        y: f32,
        #[serde(alias = "rotZ")]
        z: f32,
    },
    DisposeSound {
        identifier: String,
    },
    #[serde(rename_all = "camelCase")]
    CreateFilter {
        filter_name: String,
        filter_type: FilterKind,
        #[serde(default)]
        options: serde_json::Value,
    },
    #[serde(rename_all = "camelCase")]
    AddSoundFilter {
        identifier: String,
        filter_name: String,
    },
    #[serde(rename_all = "camelCase")]
    RemoveSoundFilter {
        identifier: String,
        filter_name: String,
    },
    #[serde(rename_all = "camelCase")]
    AddListenerFilter {
        filter_name: String,
    },
    #[serde(rename_all = "camelCase")]
    RemoveListenerFilter {
        filter_name: String,
    },
    SetSoundVolume {
        identifier: String,
        #[serde(alias = "volume")]
        value: f32,
    },
    SetSoundMaxDistance {
        identifier: String,
        #[serde(alias = "maxDistance")]
        value: f32,
    },
    SetSoundRefDistance {
        identifier: String,
        #[serde(alias = "refDistance")]
        value: f32,
    },
    SetLoop {
        identifier: String,
        #[serde(alias = "loop")]
        value: bool,
    },
    #[serde(other)]
    Unknown,
}

impl InboundMessage {
    /// Tag of the message, for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::Update { .. } => "update",
            InboundMessage::CreateSound { .. } => "createSound",
            InboundMessage::StartSound { .. } => "startSound",
            InboundMessage::StopSound { .. } => "stopSound",
            InboundMessage::MoveSound { .. } => "moveSound",
            InboundMessage::RotateSound { .. } => "rotateSound",
            InboundMessage::DisposeSound { .. } => "disposeSound",
            InboundMessage::CreateFilter { .. } => "createFilter",
            InboundMessage::AddSoundFilter { .. } => "addSoundFilter",
            InboundMessage::RemoveSoundFilter { .. } => "removeSoundFilter",
            InboundMessage::AddListenerFilter { .. } => "addListenerFilter",
            InboundMessage::RemoveListenerFilter { .. } => "removeListenerFilter",
            InboundMessage::SetSoundVolume { .. } => "setSoundVolume",
            InboundMessage::SetSoundMaxDistance { .. } => "setSoundMaxDistance",
            InboundMessage::SetSoundRefDistance { .. } => "setSoundRefDistance",
            InboundMessage::SetLoop { .. } => "setLoop",
            InboundMessage::Unknown => "unknown",
        }
    }
}

/// Build the start arguments carried by a `startSound` message.
pub fn start_request(
    start_time: Option<f64>,
    ref_distance: Option<f32>,
    volume: Option<f32>,
    looping: Option<bool>,
) -> StartRequest {
    StartRequest {
        offset_ms: start_time,
        ref_distance,
        volume,
        looping,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum OutboundMessage {
    Ready,
    SoundEnded { identifier: String },
}
