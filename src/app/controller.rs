//! Owner of the processing context, the sound registry, the filter catalog
//! and the listener. All graph mutation happens here, on one task; asset
//! work runs in spawned tasks that report back as [`EngineEvent`]s.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};
use settings_manager::Settings;
use sounity_core::{Error, Result};
use tokio::sync::mpsc;

use super::listener::ListenerState;
use crate::audio::convolver::ImpulseResponse;
use crate::audio::decode::DecodedAudio;
use crate::audio::filters::load_impulse;
use crate::audio::sound_node::load_asset;
use crate::audio::{
    AddCompletion, AddFilter, AssetCache, AssetFetcher, AssetLoader, AudioContext,
    ConvolverOptions, FilterCatalog, FilterChainCapable, FilterDescriptor, FilterKind,
    OutputNode, RemoveFilter, SoundNode, SoundOptions, SoundState, StartRequest,
};

/// Node an impulse response was loaded for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterTarget {
    Sound { identifier: String, instance: u64 },
    Listener,
}

/// Completion of asset work started by the controller.
#[derive(Debug)]
pub enum EngineEvent {
    SoundLoaded {
        identifier: String,
        instance: u64,
        result: Result<Arc<DecodedAudio>>,
    },
    FilterLoaded {
        target: FilterTarget,
        name: String,
        result: Result<ImpulseResponse>,
    },
}

pub type EngineEvents = mpsc::UnboundedReceiver<EngineEvent>;

/// What happened during one tick.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Sounds that reached FINISHED during this tick.
    pub ended: Vec<String>,
    /// Nodes whose tick failed; the others were still ticked.
    pub failures: Vec<(String, Error)>,
}

fn lookup<'a>(sounds: &'a mut HashMap<String, SoundNode>, identifier: &str) -> Result<&'a mut SoundNode> {
    sounds
        .get_mut(identifier)
        .ok_or_else(|| Error::UnknownIdentifier(identifier.to_string()))
}

fn collect_errors(completion: AddCompletion, errors: &mut Vec<Error>) {
    errors.extend(completion.result.err());
    errors.extend(completion.queued_removals.into_iter().filter_map(|r| r.err()));
}

pub struct Controller {
    settings: Settings,
    ctx: AudioContext,
    loader: AssetLoader,
    catalog: FilterCatalog,
    sounds: HashMap<String, SoundNode>,
    output: OutputNode,
    listener: ListenerState,
    events: mpsc::UnboundedSender<EngineEvent>,
    in_flight: usize,
    next_instance: u64,
    disposed: bool,
}

impl Controller {
    /// Build the controller and the receiver its asset completions arrive on.
    pub fn new(settings: Settings, fetcher: Arc<dyn AssetFetcher>) -> Result<(Self, EngineEvents)> {
        settings.validate()?;
        let mut ctx = AudioContext::new(settings.sample_rate);
        let output = OutputNode::new(&mut ctx, settings.master_volume)?;
        let cache = AssetCache::new(settings.cache.max_entries, settings.cache.max_bytes);
        let (events, rx) = mpsc::unbounded_channel();

        info!(
            "Controller ready at {} Hz, tick every {}ms",
            settings.sample_rate, settings.tick_interval_ms
        );
        let controller = Self {
            ctx,
            loader: AssetLoader::new(cache, fetcher),
            catalog: FilterCatalog::new(),
            sounds: HashMap::new(),
            output,
            listener: ListenerState::new(),
            events,
            in_flight: 0,
            next_instance: 1,
            disposed: false,
            settings,
        };
        Ok((controller, rx))
    }

    fn ensure_active(&self) -> Result<()> {
        if self.disposed {
            return Err(Error::InvalidState("controller has been disposed".into()));
        }
        Ok(())
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn context(&self) -> &AudioContext {
        &self.ctx
    }

    pub fn loader(&self) -> &AssetLoader {
        &self.loader
    }

    pub fn catalog(&self) -> &FilterCatalog {
        &self.catalog
    }

    pub fn listener(&self) -> &ListenerState {
        &self.listener
    }

    pub fn output(&self) -> &OutputNode {
        &self.output
    }

    pub fn sound(&self, identifier: &str) -> Option<&SoundNode> {
        self.sounds.get(identifier)
    }

    pub fn sound_count(&self) -> usize {
        self.sounds.len()
    }

    /// Asset loads not yet applied.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn create_sound(&mut self, identifier: &str, url: &str, options: &SoundOptions) -> Result<()> {
        self.ensure_active()?;
        if self.sounds.contains_key(identifier) {
            return Err(Error::DuplicateIdentifier(identifier.to_string()));
        }

        let instance = self.next_instance;
        let mut node = SoundNode::new(identifier, url, instance, options, &self.settings.sound_defaults)?;
        if let Some(input) = self.output.input() {
            node.connect(&mut self.ctx, input)?;
        }
        self.next_instance += 1;
        self.sounds.insert(identifier.to_string(), node);
        self.spawn_sound_load(identifier, instance, url);
        info!("Created sound {} from {}", identifier, url);
        Ok(())
    }

    fn spawn_sound_load(&mut self, identifier: &str, instance: u64, url: &str) {
        let loader = self.loader.clone();
        let events = self.events.clone();
        let sample_rate = self.ctx.sample_rate();
        let identifier = identifier.to_string();
        let url = url.to_string();
        self.in_flight += 1;
        tokio::spawn(async move {
            let result = load_asset(&loader, &url, sample_rate).await;
            let _ = events.send(EngineEvent::SoundLoaded {
                identifier,
                instance,
                result,
            });
        });
    }

    fn spawn_filter_load(&mut self, target: FilterTarget, name: &str, options: ConvolverOptions) {
        let loader = self.loader.clone();
        let events = self.events.clone();
        let sample_rate = self.ctx.sample_rate();
        let name = name.to_string();
        self.in_flight += 1;
        tokio::spawn(async move {
            let result = load_impulse(&loader, &options, sample_rate).await;
            let _ = events.send(EngineEvent::FilterLoaded { target, name, result });
        });
    }

    /// Apply a completed load. Returns the errors it produced, which are
    /// also logged.
    pub fn handle_event(&mut self, event: EngineEvent) -> Vec<Error> {
        self.in_flight = self.in_flight.saturating_sub(1);
        let mut errors = Vec::new();
        if self.disposed {
            return errors;
        }

        match event {
            EngineEvent::SoundLoaded {
                identifier,
                instance,
                result,
            } => {
                let volumes = *self.listener.volumes();
                match self.sounds.get_mut(&identifier) {
                    Some(node) if node.instance() == instance => {
                        if let Err(e) = node.finish_setup(&mut self.ctx, result, &volumes) {
                            errors.push(e);
                        }
                    }
                    _ => debug!("Discarding asset for stale sound {}", identifier),
                }
            }
            EngineEvent::FilterLoaded {
                target,
                name,
                result,
            } => match target {
                FilterTarget::Listener => {
                    let completion = self.output.complete_filter(&mut self.ctx, &name, result);
                    collect_errors(completion, &mut errors);
                }
                FilterTarget::Sound {
                    identifier,
                    instance,
                } => match self.sounds.get_mut(&identifier) {
                    Some(node) if node.instance() == instance => {
                        let completion = node.complete_filter(&mut self.ctx, &name, result);
                        collect_errors(completion, &mut errors);
                    }
                    _ => debug!(
                        "Discarding impulse {} for stale sound {}",
                        name, identifier
                    ),
                },
            },
        }

        for e in &errors {
            warn!("Asset completion failed: {}", e);
        }
        errors
    }

    /// Wait for and apply every outstanding asset load.
    pub async fn settle(&mut self, events: &mut EngineEvents) -> Vec<Error> {
        let mut errors = Vec::new();
        while self.in_flight > 0 {
            match events.recv().await {
                Some(event) => errors.extend(self.handle_event(event)),
                None => break,
            }
        }
        errors
    }

    pub fn start_sound(&mut self, identifier: &str, request: StartRequest) -> Result<()> {
        lookup(&mut self.sounds, identifier)?.start(&mut self.ctx, request)
    }

    pub fn stop_sound(&mut self, identifier: &str) -> Result<()> {
        lookup(&mut self.sounds, identifier)?.stop(&mut self.ctx)
    }

    pub fn move_sound(&mut self, identifier: &str, x: f32, y: f32, z: f32) -> Result<()> {
        lookup(&mut self.sounds, identifier)?.move_to(x, y, z);
        Ok(())
    }

    pub fn rotate_sound(&mut self, identifier: &str, x: f32, y: f32, z: f32) -> Result<()> {
        lookup(&mut self.sounds, identifier)?.rotate(x, y, z);
        Ok(())
    }

    pub fn dispose_sound(&mut self, identifier: &str) -> Result<()> {
        let mut node = self
            .sounds
            .remove(identifier)
            .ok_or_else(|| Error::UnknownIdentifier(identifier.to_string()))?;
        node.dispose(&mut self.ctx);
        info!("Disposed sound {}", identifier);
        Ok(())
    }

    pub fn set_sound_volume(&mut self, identifier: &str, volume: f32) -> Result<()> {
        lookup(&mut self.sounds, identifier)?.set_volume(volume)
    }

    pub fn set_sound_max_distance(&mut self, identifier: &str, distance: f32) -> Result<()> {
        lookup(&mut self.sounds, identifier)?.set_max_distance(distance)
    }

    pub fn set_sound_ref_distance(&mut self, identifier: &str, distance: f32) -> Result<()> {
        lookup(&mut self.sounds, identifier)?.set_ref_distance(distance)
    }

    pub fn set_loop(&mut self, identifier: &str, looping: bool) -> Result<()> {
        lookup(&mut self.sounds, identifier)?.set_loop(&mut self.ctx, looping)
    }

    pub fn create_filter(&mut self, name: &str, kind: FilterKind, options: serde_json::Value) -> Result<()> {
        if self.catalog.contains(name) {
            return Err(Error::DuplicateFilter(name.to_string()));
        }
        let descriptor = FilterDescriptor::from_parts(name, kind, options)?;
        self.catalog.register(descriptor)?;
        Ok(())
    }

    pub fn add_sound_filter(&mut self, identifier: &str, name: &str) -> Result<AddFilter> {
        let node = lookup(&mut self.sounds, identifier)?;
        let descriptor = self.catalog.get(name)?;
        let outcome = node.add_filter(&mut self.ctx, &descriptor)?;
        if let AddFilter::Pending(options) = &outcome {
            let target = FilterTarget::Sound {
                identifier: identifier.to_string(),
                instance: node.instance(),
            };
            self.spawn_filter_load(target, name, options.clone());
        }
        Ok(outcome)
    }

    pub fn remove_sound_filter(&mut self, identifier: &str, name: &str) -> Result<RemoveFilter> {
        lookup(&mut self.sounds, identifier)?.remove_filter(&mut self.ctx, name)
    }

    pub fn add_listener_filter(&mut self, name: &str) -> Result<AddFilter> {
        let descriptor = self.catalog.get(name)?;
        let outcome = self.output.add_filter(&mut self.ctx, &descriptor)?;
        if let AddFilter::Pending(options) = &outcome {
            self.spawn_filter_load(FilterTarget::Listener, name, options.clone());
        }
        Ok(outcome)
    }

    pub fn remove_listener_filter(&mut self, name: &str) -> Result<RemoveFilter> {
        self.output.remove_filter(&mut self.ctx, name)
    }

    pub fn move_listener(&mut self, x: f32, y: f32, z: f32) {
        self.listener.move_to(x, y, z);
    }

    pub fn rotate_listener(&mut self, x: f32, y: f32, z: f32) {
        self.listener.rotate(x, y, z);
    }

    /// Category volumes on the host's raw 0..=10 scale.
    pub fn set_category_volumes(&mut self, raw_sfx: f32, raw_music: f32) {
        self.listener.set_volumes(raw_sfx, raw_music);
    }

    /// Advance every node so its parameters arrive at their targets
    /// `delta` seconds from now.
    pub fn tick(&mut self, delta: f64) -> TickReport {
        let mut report = TickReport::default();
        if self.disposed {
            return report;
        }

        let end_time = self.ctx.current_time() + delta;
        self.listener.apply(&mut self.ctx, end_time);
        let volumes = *self.listener.volumes();

        for (identifier, node) in self.sounds.iter_mut() {
            if node.state() == SoundState::Setup {
                continue;
            }
            let before = node.state();
            if let Err(e) = node.tick(&mut self.ctx, end_time, &volumes) {
                warn!("Tick failed for sound {}: {}", identifier, e);
                report.failures.push((identifier.clone(), e));
                continue;
            }
            if before != SoundState::Finished && node.state() == SoundState::Finished {
                report.ended.push(identifier.clone());
            }
        }

        if let Err(e) = self.output.tick(&mut self.ctx, end_time, &volumes) {
            warn!("Tick failed for the output bus: {}", e);
            report.failures.push((self.output.label().to_string(), e));
        }
        report
    }

    /// Render `frames` frames of interleaved stereo output.
    pub fn render(&mut self, frames: usize) -> Vec<f32> {
        self.ctx.render(frames)
    }

    /// Dispose every node and close the context. Safe to repeat.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        for (_, mut node) in self.sounds.drain() {
            node.dispose(&mut self.ctx);
        }
        self.output.dispose(&mut self.ctx);
        self.ctx.close();
        info!("Controller disposed");
    }
}
