//! A playable, positioned sound source.
//!
//! Internal wiring once loaded:
//! `buffer source -> gain -> panner -> filter chain -> destination`.
//!
//! Axis convention: callers use a z-up world, the graph is y-up. `move_to`
//! therefore stores `(x, y, z)` as `(x, z, y)`, and `rotate` feeds
//! `(yaw, pitch, roll) = (-z, x, y)` into the principal-axes transform and
//! keeps only the forward vector as the panner orientation.

use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use settings_manager::SoundDefaults;
use sounity_core::{
    principal_axes_to_orientation, CategoryVolumes, DistanceModel, Error, OutputCategory,
    PanningModel, Result, Vec3,
};
use tokio::sync::mpsc;

use super::cache::AssetLoader;
use super::decode::{decode_audio_blocking, DecodedAudio};
use super::filter_chain::{FilterChain, FilterChainCapable};
use super::graph::{AudioContext, NodeId};
use super::spatial::PannerOptions;

/// Lifecycle of a sound node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SoundState {
    Setup,
    Ready,
    Playing,
    Finished,
    Error,
}

impl std::fmt::Display for SoundState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SoundState::Setup => "SETUP",
            SoundState::Ready => "READY",
            SoundState::Playing => "PLAYING",
            SoundState::Finished => "FINISHED",
            SoundState::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Notifications delivered to subscribers of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SoundEvent {
    Ready,
    StateChanged(SoundState),
    Ended,
}

/// Creation options as sent by the host. Omitted fields fall back to the
/// configured [`SoundDefaults`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SoundOptions {
    pub volume: Option<f32>,
    pub output_type: Option<OutputCategory>,
    #[serde(rename = "loop")]
    pub looping: Option<bool>,
    pub pos_x: Option<f32>,
    pub pos_y: Option<f32>,
    pub pos_z: Option<f32>,
    pub rot_x: Option<f32>,
    pub rot_y: Option<f32>,
    pub rot_z: Option<f32>,
    pub panning_model: Option<PanningModel>,
    pub distance_model: Option<DistanceModel>,
    pub max_distance: Option<f32>,
    pub ref_distance: Option<f32>,
    pub rolloff_factor: Option<f32>,
    pub cone_inner_angle: Option<f32>,
    pub cone_outer_angle: Option<f32>,
    pub cone_outer_gain: Option<f32>,
}

impl SoundOptions {
    pub fn resolve(&self, defaults: &SoundDefaults) -> SoundDefaults {
        SoundDefaults {
            volume: self.volume.unwrap_or(defaults.volume),
            output_type: self.output_type.unwrap_or(defaults.output_type),
            looping: self.looping.unwrap_or(defaults.looping),
            pos_x: self.pos_x.unwrap_or(defaults.pos_x),
            pos_y: self.pos_y.unwrap_or(defaults.pos_y),
            pos_z: self.pos_z.unwrap_or(defaults.pos_z),
            rot_x: self.rot_x.unwrap_or(defaults.rot_x),
            rot_y: self.rot_y.unwrap_or(defaults.rot_y),
            rot_z: self.rot_z.unwrap_or(defaults.rot_z),
            panning_model: self.panning_model.unwrap_or(defaults.panning_model),
            distance_model: self.distance_model.unwrap_or(defaults.distance_model),
            max_distance: self.max_distance.unwrap_or(defaults.max_distance),
            ref_distance: self.ref_distance.unwrap_or(defaults.ref_distance),
            rolloff_factor: self.rolloff_factor.unwrap_or(defaults.rolloff_factor),
            cone_inner_angle: self.cone_inner_angle.unwrap_or(defaults.cone_inner_angle),
            cone_outer_angle: self.cone_outer_angle.unwrap_or(defaults.cone_outer_angle),
            cone_outer_gain: self.cone_outer_gain.unwrap_or(defaults.cone_outer_gain),
        }
    }
}

/// Arguments of a start request; unset fields keep the node's values.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StartRequest {
    /// Time elapsed since the sound's canonical start, in milliseconds.
    pub offset_ms: Option<f64>,
    pub ref_distance: Option<f32>,
    pub volume: Option<f32>,
    pub looping: Option<bool>,
}

/// Call held back while the asset loads. Only the latest one survives.
#[derive(Debug, Clone, Copy, PartialEq)]
enum DeferredAction {
    Start(StartRequest),
    Stop,
}

#[derive(Debug, Clone, Copy)]
struct SoundGraph {
    source: NodeId,
    gain: NodeId,
    panner: NodeId,
}

/// Where playback of an asset of `duration` seconds should begin for a
/// late join `offset_ms` after its canonical start. `None` means the sound
/// has already finished.
pub fn playback_offset(offset_ms: f64, duration: f64, looping: bool) -> Option<f64> {
    let offset = offset_ms / 1000.0;
    if looping && duration > 0.0 && offset >= duration {
        Some(offset % duration)
    } else if offset < duration {
        Some(offset)
    } else {
        None
    }
}

fn check_volume(volume: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&volume) {
        return Err(Error::InvalidArgument(format!(
            "volume must be between 0 and 1, got {}",
            volume
        )));
    }
    Ok(())
}

fn check_distance(name: &str, distance: f32) -> Result<()> {
    if distance.is_nan() || distance < 0.0 {
        return Err(Error::InvalidArgument(format!(
            "{} must not be negative, got {}",
            name, distance
        )));
    }
    Ok(())
}

/// Fetch and decode a sound asset.
pub async fn load_asset(
    loader: &AssetLoader,
    url: &str,
    sample_rate: u32,
) -> Result<Arc<DecodedAudio>> {
    let bytes = loader.load(url).await?;
    let audio = decode_audio_blocking(bytes, sample_rate).await?;
    Ok(Arc::new(audio))
}

#[derive(Debug)]
pub struct SoundNode {
    identifier: String,
    url: String,
    instance: u64,
    state: SoundState,
    options: SoundDefaults,
    volume: f32,
    looping: bool,
    position: Vec3,
    orientation: Vec3,
    ref_distance: f32,
    max_distance: f32,
    audio: Option<Arc<DecodedAudio>>,
    graph: Option<SoundGraph>,
    chain: FilterChain,
    deferred: Option<DeferredAction>,
    stopped: bool,
    disposed: bool,
    subscribers: Vec<mpsc::UnboundedSender<SoundEvent>>,
}

impl SoundNode {
    /// Create a node in SETUP. `instance` distinguishes it from earlier
    /// nodes that used the same identifier.
    pub fn new(
        identifier: impl Into<String>,
        url: impl Into<String>,
        instance: u64,
        options: &SoundOptions,
        defaults: &SoundDefaults,
    ) -> Result<Self> {
        let options = options.resolve(defaults);
        check_volume(options.volume)?;
        check_distance("refDistance", options.ref_distance)?;
        check_distance("maxDistance", options.max_distance)?;

        let mut node = Self {
            identifier: identifier.into(),
            url: url.into(),
            instance,
            state: SoundState::Setup,
            volume: options.volume,
            looping: options.looping,
            position: Vec3::ZERO,
            orientation: Vec3::new(1.0, 0.0, 0.0),
            ref_distance: options.ref_distance,
            max_distance: options.max_distance,
            audio: None,
            graph: None,
            chain: FilterChain::new(),
            deferred: None,
            stopped: false,
            disposed: false,
            subscribers: Vec::new(),
            options,
        };
        node.move_to(node.options.pos_x, node.options.pos_y, node.options.pos_z);
        node.rotate(node.options.rot_x, node.options.rot_y, node.options.rot_z);
        Ok(node)
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn instance(&self) -> u64 {
        self.instance
    }

    pub fn state(&self) -> SoundState {
        self.state
    }

    pub fn category(&self) -> OutputCategory {
        self.options.output_type
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn looping(&self) -> bool {
        self.looping
    }

    pub fn ref_distance(&self) -> f32 {
        self.ref_distance
    }

    pub fn max_distance(&self) -> f32 {
        self.max_distance
    }

    /// Target position in graph coordinates.
    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Target panner orientation in graph coordinates.
    pub fn orientation(&self) -> Vec3 {
        self.orientation
    }

    /// Asset duration in seconds, once loaded.
    pub fn duration(&self) -> Option<f64> {
        self.audio.as_ref().map(|audio| audio.duration())
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn source_node(&self) -> Option<NodeId> {
        self.graph.map(|graph| graph.source)
    }

    pub fn gain_node(&self) -> Option<NodeId> {
        self.graph.map(|graph| graph.gain)
    }

    /// The panner: the node's raw output into its filter chain.
    pub fn output_node(&self) -> Option<NodeId> {
        self.graph.map(|graph| graph.panner)
    }

    /// `volume` scaled by the master volume of the node's category.
    pub fn effective_volume(&self, volumes: &CategoryVolumes) -> f32 {
        self.volume * volumes.for_category(self.category())
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SoundEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    fn emit(&mut self, event: SoundEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn set_state(&mut self, state: SoundState) {
        if self.state == state {
            return;
        }
        debug!("Sound {}: {} -> {}", self.identifier, self.state, state);
        self.state = state;
        if state == SoundState::Ready {
            self.emit(SoundEvent::Ready);
        }
        self.emit(SoundEvent::StateChanged(state));
        if state == SoundState::Finished {
            self.emit(SoundEvent::Ended);
        }
    }

    /// Complete SETUP with the loaded asset, then replay any deferred call.
    pub fn finish_setup(
        &mut self,
        ctx: &mut AudioContext,
        loaded: Result<Arc<DecodedAudio>>,
        volumes: &CategoryVolumes,
    ) -> Result<()> {
        if self.disposed || self.state != SoundState::Setup {
            return Ok(());
        }

        let audio = match loaded {
            Ok(audio) => audio,
            Err(e) => {
                warn!("Sound {} failed to load {}: {}", self.identifier, self.url, e);
                self.deferred = None;
                self.set_state(SoundState::Error);
                return Ok(());
            }
        };

        match self.build_graph(ctx, &audio, volumes) {
            Ok(graph) => self.graph = Some(graph),
            Err(e) => {
                warn!("Sound {} could not be wired: {}", self.identifier, e);
                self.deferred = None;
                self.set_state(SoundState::Error);
                return Ok(());
            }
        }
        info!(
            "Sound {} ready ({:.2}s from {})",
            self.identifier,
            audio.duration(),
            self.url
        );
        self.audio = Some(audio);
        self.set_state(SoundState::Ready);

        match self.deferred.take() {
            Some(DeferredAction::Start(request)) => self.start(ctx, request),
            Some(DeferredAction::Stop) => self.stop(ctx),
            None => Ok(()),
        }
    }

    fn build_graph(
        &mut self,
        ctx: &mut AudioContext,
        audio: &Arc<DecodedAudio>,
        volumes: &CategoryVolumes,
    ) -> Result<SoundGraph> {
        let options = PannerOptions {
            panning_model: self.options.panning_model,
            distance_model: self.options.distance_model,
            position: self.position,
            orientation: self.orientation,
            ref_distance: self.ref_distance,
            max_distance: self.max_distance,
            rolloff_factor: self.options.rolloff_factor,
            cone_inner_angle: self.options.cone_inner_angle,
            cone_outer_angle: self.options.cone_outer_angle,
            cone_outer_gain: self.options.cone_outer_gain,
        };

        let source = ctx.create_buffer_source(Arc::clone(audio))?;
        let nodes = ctx
            .create_gain(self.effective_volume(volumes))
            .and_then(|gain| ctx.create_panner(&options).map(|panner| (gain, panner)));
        let (gain, panner) = match nodes {
            Ok(nodes) => nodes,
            Err(e) => {
                ctx.remove_node(source);
                return Err(e);
            }
        };
        let graph = SoundGraph {
            source,
            gain,
            panner,
        };

        let wired = ctx
            .set_source_loop(source, self.looping)
            .and_then(|_| ctx.connect(source, gain))
            .and_then(|_| ctx.connect(gain, panner))
            .and_then(|_| self.chain.set_source(ctx, panner));
        if let Err(e) = wired {
            for node in [source, gain, panner] {
                ctx.remove_node(node);
            }
            return Err(e);
        }
        Ok(graph)
    }

    /// Begin playback. Deferred while in SETUP; ignored after an error.
    pub fn start(&mut self, ctx: &mut AudioContext, request: StartRequest) -> Result<()> {
        if self.disposed || self.state == SoundState::Error {
            return Ok(());
        }
        if let Some(volume) = request.volume {
            check_volume(volume)?;
        }
        if let Some(distance) = request.ref_distance {
            check_distance("refDistance", distance)?;
        }

        match self.state {
            SoundState::Setup => {
                debug!("Sound {} not loaded yet, deferring start", self.identifier);
                self.deferred = Some(DeferredAction::Start(request));
                return Ok(());
            }
            SoundState::Playing | SoundState::Finished => {
                debug!(
                    "Sound {} is {}, ignoring start",
                    self.identifier, self.state
                );
                return Ok(());
            }
            SoundState::Ready | SoundState::Error => {}
        }

        let (Some(graph), Some(duration)) = (self.graph, self.duration()) else {
            return Err(Error::InvalidState(format!(
                "sound {} has no loaded audio",
                self.identifier
            )));
        };

        // Whether a late join wraps depends on the loop flag the node already
        // has; the request's flag only applies once playback begins.
        let offset = match request.offset_ms {
            None => 0.0,
            Some(offset_ms) => match playback_offset(offset_ms, duration, self.looping) {
                Some(offset) => offset,
                None => {
                    info!(
                        "Sound {} already ended ({}ms into {:.2}s), not starting",
                        self.identifier, offset_ms, duration
                    );
                    return Ok(());
                }
            },
        };

        let looping = request.looping.unwrap_or(self.looping);
        ctx.set_source_loop(graph.source, looping)?;
        ctx.start_source(graph.source, offset)?;
        self.looping = looping;
        if let Some(volume) = request.volume {
            self.volume = volume;
        }
        if let Some(distance) = request.ref_distance {
            self.ref_distance = distance;
        }
        info!("Sound {} playing from {:.3}s", self.identifier, offset);
        self.set_state(SoundState::Playing);
        Ok(())
    }

    /// Halt playback. Deferred while in SETUP; ignored after an error.
    pub fn stop(&mut self, ctx: &mut AudioContext) -> Result<()> {
        if self.disposed || self.state == SoundState::Error {
            return Ok(());
        }
        match self.state {
            SoundState::Setup => {
                debug!("Sound {} not loaded yet, deferring stop", self.identifier);
                self.deferred = Some(DeferredAction::Stop);
                Ok(())
            }
            SoundState::Playing => {
                if let Some(graph) = self.graph {
                    ctx.stop_source(graph.source)?;
                }
                self.stopped = true;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Set the target position; the panner follows on the next ticks.
    pub fn move_to(&mut self, x: f32, y: f32, z: f32) {
        self.position = Vec3::new(x, z, y);
    }

    /// Set the target orientation from caller angles in degrees.
    pub fn rotate(&mut self, x: f32, y: f32, z: f32) {
        self.orientation = principal_axes_to_orientation(-z, x, y).forward;
    }

    pub fn set_volume(&mut self, volume: f32) -> Result<()> {
        check_volume(volume)?;
        self.volume = volume;
        Ok(())
    }

    pub fn set_max_distance(&mut self, distance: f32) -> Result<()> {
        check_distance("maxDistance", distance)?;
        self.max_distance = distance;
        Ok(())
    }

    pub fn set_ref_distance(&mut self, distance: f32) -> Result<()> {
        check_distance("refDistance", distance)?;
        self.ref_distance = distance;
        Ok(())
    }

    /// Applied to the playing source immediately.
    pub fn set_loop(&mut self, ctx: &mut AudioContext, looping: bool) -> Result<()> {
        self.looping = looping;
        if !self.accepts_graph_mutation() {
            return Ok(());
        }
        if let Some(graph) = self.graph {
            ctx.set_source_loop(graph.source, looping)?;
        }
        Ok(())
    }

    /// Tear down the node's graph and drop its audio. Safe to repeat.
    pub fn dispose(&mut self, ctx: &mut AudioContext) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        if let Some(graph) = self.graph.take() {
            if let Err(e) = ctx.stop_source(graph.source) {
                debug!("Sound {} source already idle: {}", self.identifier, e);
            }
            self.chain.disconnect(ctx);
            self.chain.clear(ctx);
            for node in [graph.source, graph.gain, graph.panner] {
                ctx.remove_node(node);
            }
        } else {
            self.chain.disconnect(ctx);
            self.chain.clear(ctx);
        }

        self.audio = None;
        self.deferred = None;
        self.subscribers.clear();
        debug!("Sound {} disposed", self.identifier);
    }
}

impl FilterChainCapable for SoundNode {
    fn chain(&self) -> &FilterChain {
        &self.chain
    }

    fn chain_mut(&mut self) -> &mut FilterChain {
        &mut self.chain
    }

    fn label(&self) -> &str {
        &self.identifier
    }

    fn accepts_graph_mutation(&self) -> bool {
        !self.disposed && !matches!(self.state, SoundState::Finished | SoundState::Error)
    }

    fn tick(
        &mut self,
        ctx: &mut AudioContext,
        end_time: f64,
        volumes: &CategoryVolumes,
    ) -> Result<()> {
        if !self.accepts_graph_mutation() {
            return Ok(());
        }
        let Some(graph) = self.graph else {
            return Ok(());
        };

        if self.state == SoundState::Playing
            && ctx.source_ended(graph.source)?
            && (self.stopped || !self.looping)
        {
            info!("Sound {} finished", self.identifier);
            self.set_state(SoundState::Finished);
            return Ok(());
        }

        let now = ctx.current_time();
        let gain = self.effective_volume(volumes);
        let panner = ctx.panner_mut(graph.panner)?;
        panner.position_x.linear_ramp_to_value_at_time(self.position.x, end_time, now);
        panner.position_y.linear_ramp_to_value_at_time(self.position.y, end_time, now);
        panner.position_z.linear_ramp_to_value_at_time(self.position.z, end_time, now);
        panner.orientation_x.linear_ramp_to_value_at_time(self.orientation.x, end_time, now);
        panner.orientation_y.linear_ramp_to_value_at_time(self.orientation.y, end_time, now);
        panner.orientation_z.linear_ramp_to_value_at_time(self.orientation.z, end_time, now);
        panner.ref_distance = self.ref_distance;
        panner.max_distance = self.max_distance;

        ctx.gain_mut(graph.gain)?
            .linear_ramp_to_value_at_time(gain, end_time, now);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::filters::{FilterDescriptor, FilterOptions};
    use crate::audio::filter_chain::{AddFilter, RemoveFilter};

    const RATE: u32 = 8000;

    fn audio(seconds: f64) -> Arc<DecodedAudio> {
        Arc::new(DecodedAudio {
            channels: vec![vec![0.5; (seconds * RATE as f64) as usize]],
            sample_rate: RATE,
        })
    }

    fn node(identifier: &str) -> SoundNode {
        SoundNode::new(
            identifier,
            "sounds/test.wav",
            1,
            &SoundOptions::default(),
            &SoundDefaults::default(),
        )
        .unwrap()
    }

    fn ready_node(ctx: &mut AudioContext, seconds: f64) -> SoundNode {
        let mut node = node("test");
        let destination = ctx.destination();
        node.connect(ctx, destination).unwrap();
        node.finish_setup(ctx, Ok(audio(seconds)), &CategoryVolumes::default())
            .unwrap();
        node
    }

    #[test]
    fn test_options_fall_back_to_defaults() {
        let options: SoundOptions =
            serde_json::from_str(r#"{"volume": 0.4, "outputType": "music", "loop": true}"#)
                .unwrap();
        let resolved = options.resolve(&SoundDefaults::default());
        assert_eq!(resolved.volume, 0.4);
        assert_eq!(resolved.output_type, OutputCategory::Music);
        assert!(resolved.looping);
        assert_eq!(resolved.ref_distance, 3.0);
        assert_eq!(resolved.max_distance, 500.0);
    }

    #[test]
    fn test_setup_to_ready() {
        let mut ctx = AudioContext::new(RATE);
        let mut node = node("a");
        let mut events = node.subscribe();
        assert_eq!(node.state(), SoundState::Setup);

        node.finish_setup(&mut ctx, Ok(audio(1.0)), &CategoryVolumes::default())
            .unwrap();
        assert_eq!(node.state(), SoundState::Ready);
        assert_eq!(events.try_recv().unwrap(), SoundEvent::Ready);
        assert_eq!(
            events.try_recv().unwrap(),
            SoundEvent::StateChanged(SoundState::Ready)
        );

        let graph = node.graph.unwrap();
        assert!(ctx.is_connected(graph.source, graph.gain));
        assert!(ctx.is_connected(graph.gain, graph.panner));
    }

    #[test]
    fn test_load_failure_enters_error() {
        let mut ctx = AudioContext::new(RATE);
        let mut node = node("a");
        node.start(&mut ctx, StartRequest::default()).unwrap();
        node.finish_setup(
            &mut ctx,
            Err(Error::Network("404".into())),
            &CategoryVolumes::default(),
        )
        .unwrap();
        assert_eq!(node.state(), SoundState::Error);
        assert_eq!(ctx.node_count(), 1);

        // Everything is a no-op now
        node.start(&mut ctx, StartRequest::default()).unwrap();
        node.stop(&mut ctx).unwrap();
        assert_eq!(node.state(), SoundState::Error);
    }

    #[test]
    fn test_wiring_failure_enters_error() {
        let mut ctx = AudioContext::new(RATE);
        let mut node = node("a");
        node.start(&mut ctx, StartRequest::default()).unwrap();
        ctx.close();

        let result = node.finish_setup(&mut ctx, Ok(audio(1.0)), &CategoryVolumes::default());
        assert!(result.is_ok());
        assert_eq!(node.state(), SoundState::Error);
        assert!(node.source_node().is_none());
    }

    #[test]
    fn test_deferred_call_is_last_write_wins() {
        let mut ctx = AudioContext::new(RATE);
        let mut node = node("a");
        node.start(&mut ctx, StartRequest::default()).unwrap();
        node.stop(&mut ctx).unwrap();
        node.finish_setup(&mut ctx, Ok(audio(1.0)), &CategoryVolumes::default())
            .unwrap();
        // The stop replaced the start
        assert_eq!(node.state(), SoundState::Ready);

        let mut node = self::node("b");
        node.stop(&mut ctx).unwrap();
        node.start(&mut ctx, StartRequest::default()).unwrap();
        node.finish_setup(&mut ctx, Ok(audio(1.0)), &CategoryVolumes::default())
            .unwrap();
        assert_eq!(node.state(), SoundState::Playing);
    }

    #[test]
    fn test_late_join_past_end_does_not_play() {
        let mut ctx = AudioContext::new(RATE);
        let mut node = ready_node(&mut ctx, 10.0);
        node.start(
            &mut ctx,
            StartRequest {
                offset_ms: Some(12000.0),
                volume: Some(0.3),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(node.state(), SoundState::Ready);
        assert_eq!(node.volume(), 1.0);
        assert!(!ctx.source(node.source_node().unwrap()).unwrap().has_started());
    }

    #[test]
    fn test_late_join_wraps_when_looping() {
        let mut ctx = AudioContext::new(RATE);
        let mut node = ready_node(&mut ctx, 10.0);
        node.set_loop(&mut ctx, true).unwrap();
        node.start(
            &mut ctx,
            StartRequest {
                offset_ms: Some(25000.0),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(node.state(), SoundState::Playing);
        let position = ctx.source(node.source_node().unwrap()).unwrap().position();
        assert!((position - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_late_join_wraps_on_current_loop_flag() {
        // A one-shot node asked to loop still counts as ended past its duration.
        let mut ctx = AudioContext::new(RATE);
        let mut node = ready_node(&mut ctx, 10.0);
        node.start(
            &mut ctx,
            StartRequest {
                offset_ms: Some(25000.0),
                looping: Some(true),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(node.state(), SoundState::Ready);
        assert!(!node.looping());

        // A looping node wraps, then takes the request's flag.
        let mut node = ready_node(&mut ctx, 10.0);
        node.set_loop(&mut ctx, true).unwrap();
        node.start(
            &mut ctx,
            StartRequest {
                offset_ms: Some(25000.0),
                looping: Some(false),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(node.state(), SoundState::Playing);
        assert!(!node.looping());
        let source = ctx.source(node.source_node().unwrap()).unwrap();
        assert!((source.position() - 5.0).abs() < 1e-6);
        assert!(!source.looping());
    }

    #[test]
    fn test_playback_offset() {
        assert_eq!(playback_offset(12000.0, 10.0, false), None);
        assert_eq!(playback_offset(25000.0, 10.0, true), Some(5.0));
        assert_eq!(playback_offset(4000.0, 10.0, false), Some(4.0));
        assert_eq!(playback_offset(4000.0, 10.0, true), Some(4.0));
    }

    #[test]
    fn test_volume_bounds() {
        let mut node = node("a");
        assert!(matches!(node.set_volume(-0.1), Err(Error::InvalidArgument(_))));
        assert!(matches!(node.set_volume(1.5), Err(Error::InvalidArgument(_))));
        node.set_volume(0.0).unwrap();
        node.set_volume(1.0).unwrap();
        assert!(node.set_max_distance(-1.0).is_err());
        assert!(node.set_ref_distance(f32::NAN).is_err());
        node.set_ref_distance(0.0).unwrap();
    }

    #[test]
    fn test_axis_swap() {
        let mut node = node("a");
        node.move_to(1.0, 2.0, 3.0);
        assert_eq!(node.position(), Vec3::new(1.0, 3.0, 2.0));
    }

    #[test]
    fn test_rotate_is_idempotent() {
        let mut node = node("a");
        node.rotate(10.0, 20.0, 30.0);
        let first = node.orientation();
        node.rotate(10.0, 20.0, 30.0);
        node.rotate(10.0, 20.0, 30.0);
        assert_eq!(node.orientation(), first);

        node.rotate(0.0, 0.0, 0.0);
        let forward = node.orientation();
        assert!(forward.z > 0.99);
    }

    #[test]
    fn test_tick_ramps_towards_targets() {
        let mut ctx = AudioContext::new(RATE);
        let mut node = ready_node(&mut ctx, 1.0);
        node.move_to(4.0, 5.0, 6.0);
        node.set_volume(0.5).unwrap();
        let volumes = CategoryVolumes::from_raw(5.0, 10.0);

        node.tick(&mut ctx, 0.016, &volumes).unwrap();
        let graph = node.graph.unwrap();
        let panner = ctx.panner_mut(graph.panner).unwrap();
        assert_eq!(panner.position_at(0.016), Vec3::new(4.0, 6.0, 5.0));
        assert_eq!(panner.position_at(0.0), Vec3::ZERO);
        let gain = ctx.gain_mut(graph.gain).unwrap();
        assert!((gain.target() - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_finishes_when_source_ends() {
        let mut ctx = AudioContext::new(RATE);
        let mut node = ready_node(&mut ctx, 0.01);
        let mut events = node.subscribe();
        node.start(&mut ctx, StartRequest::default()).unwrap();
        ctx.render(256);

        node.tick(&mut ctx, 0.1, &CategoryVolumes::default()).unwrap();
        assert_eq!(node.state(), SoundState::Finished);
        let received: Vec<SoundEvent> = std::iter::from_fn(|| events.try_recv().ok()).collect();
        assert!(received.contains(&SoundEvent::Ended));
    }

    #[test]
    fn test_stop_finishes_looping_sound() {
        let mut ctx = AudioContext::new(RATE);
        let mut node = ready_node(&mut ctx, 0.5);
        node.start(
            &mut ctx,
            StartRequest {
                looping: Some(true),
                ..Default::default()
            },
        )
        .unwrap();
        ctx.render(8000);
        node.tick(&mut ctx, 1.1, &CategoryVolumes::default()).unwrap();
        assert_eq!(node.state(), SoundState::Playing);

        node.stop(&mut ctx).unwrap();
        node.tick(&mut ctx, 1.2, &CategoryVolumes::default()).unwrap();
        assert_eq!(node.state(), SoundState::Finished);
    }

    #[test]
    fn test_finished_node_ignores_filters() {
        let mut ctx = AudioContext::new(RATE);
        let mut node = ready_node(&mut ctx, 0.01);
        node.start(&mut ctx, StartRequest::default()).unwrap();
        ctx.render(256);
        node.tick(&mut ctx, 0.1, &CategoryVolumes::default()).unwrap();

        let descriptor = FilterDescriptor::new("lp", FilterOptions::Parametric(Default::default()));
        assert_eq!(
            node.add_filter(&mut ctx, &descriptor).unwrap(),
            AddFilter::Ignored
        );
        assert_eq!(
            node.remove_filter(&mut ctx, "lp").unwrap(),
            RemoveFilter::Ignored
        );
    }

    #[test]
    fn test_filter_added_during_setup_is_kept() {
        let mut ctx = AudioContext::new(RATE);
        let destination = ctx.destination();
        let mut node = node("a");
        node.connect(&mut ctx, destination).unwrap();
        let descriptor = FilterDescriptor::new("lp", FilterOptions::Parametric(Default::default()));
        assert_eq!(
            node.add_filter(&mut ctx, &descriptor).unwrap(),
            AddFilter::Spliced
        );

        node.finish_setup(&mut ctx, Ok(audio(1.0)), &CategoryVolumes::default())
            .unwrap();
        let stage = node.chain().stage_nodes()[0];
        assert!(ctx.is_connected(node.output_node().unwrap(), stage));
        assert!(ctx.is_connected(stage, destination));
    }

    #[test]
    fn test_dispose_is_idempotent() {
        let mut ctx = AudioContext::new(RATE);
        let mut node = ready_node(&mut ctx, 1.0);
        let descriptor = FilterDescriptor::new("lp", FilterOptions::Parametric(Default::default()));
        node.add_filter(&mut ctx, &descriptor).unwrap();
        node.start(&mut ctx, StartRequest::default()).unwrap();
        let mut events = node.subscribe();

        node.dispose(&mut ctx);
        assert_eq!(ctx.node_count(), 1);
        assert_eq!(ctx.edge_count(), 0);
        assert!(node.duration().is_none());

        node.dispose(&mut ctx);
        assert_eq!(ctx.node_count(), 1);
        assert!(events.try_recv().is_err());
    }
}
