//! Processing context: a graph of audio nodes rendered in fixed quanta.
//!
//! Nodes live in an arena keyed by [`NodeId`]; connections are directed
//! edges. Rendering pulls one [`RENDER_QUANTUM`] at a time through every
//! node in topological order and returns the destination's output as
//! interleaved stereo. The context clock only advances by rendering.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use log::{debug, trace};
use sounity_core::{Error, Result, OUTPUT_CHANNELS, RENDER_QUANTUM};

use super::biquad::{Biquad, BiquadOptions};
use super::convolver::{ImpulseResponse, PartitionedConvolver};
use super::decode::DecodedAudio;
use super::param::AudioParam;
use super::spatial::{Listener, Panner, PannerOptions};

/// Handle to a node inside an [`AudioContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Playback {
    Idle,
    Playing,
    Ended,
}

/// One-shot player of a decoded buffer.
#[derive(Debug)]
pub struct BufferSource {
    buffer: Arc<DecodedAudio>,
    looping: bool,
    playback: Playback,
    position: usize,
}

impl BufferSource {
    fn new(buffer: Arc<DecodedAudio>) -> Self {
        Self {
            buffer,
            looping: false,
            playback: Playback::Idle,
            position: 0,
        }
    }

    pub fn looping(&self) -> bool {
        self.looping
    }

    pub fn has_started(&self) -> bool {
        self.playback != Playback::Idle
    }

    pub fn has_ended(&self) -> bool {
        self.playback == Playback::Ended
    }

    /// Playback position in seconds.
    pub fn position(&self) -> f64 {
        self.position as f64 / self.buffer.sample_rate.max(1) as f64
    }

    fn render(&mut self, block: &mut Block) {
        if self.playback != Playback::Playing {
            return;
        }
        let frames = self.buffer.frames();
        for i in 0..RENDER_QUANTUM {
            if self.position >= frames {
                if self.looping && frames > 0 {
                    self.position %= frames;
                } else {
                    self.playback = Playback::Ended;
                    return;
                }
            }
            block.left[i] = self.buffer.sample(0, self.position);
            block.right[i] = self.buffer.sample(1, self.position);
            self.position += 1;
        }
    }
}

#[derive(Debug)]
enum NodeKind {
    Source(BufferSource),
    Gain(AudioParam),
    Panner(Box<Panner>),
    Biquad(Box<Biquad>),
    Convolver(Box<PartitionedConvolver>),
    Destination,
}

impl NodeKind {
    fn label(&self) -> &'static str {
        match self {
            NodeKind::Source(_) => "buffer source",
            NodeKind::Gain(_) => "gain",
            NodeKind::Panner(_) => "panner",
            NodeKind::Biquad(_) => "biquad",
            NodeKind::Convolver(_) => "convolver",
            NodeKind::Destination => "destination",
        }
    }
}

#[derive(Clone)]
struct Block {
    left: [f32; RENDER_QUANTUM],
    right: [f32; RENDER_QUANTUM],
}

impl Block {
    fn silent() -> Self {
        Self {
            left: [0.0; RENDER_QUANTUM],
            right: [0.0; RENDER_QUANTUM],
        }
    }

    fn mix(&mut self, other: &Block) {
        for (a, b) in self.left.iter_mut().zip(other.left.iter()) {
            *a += b;
        }
        for (a, b) in self.right.iter_mut().zip(other.right.iter()) {
            *a += b;
        }
    }
}

/// Render plan: every node in dependency order with its inputs.
type Schedule = Vec<(NodeId, Vec<NodeId>)>;

/// The processing context.
#[derive(Debug)]
pub struct AudioContext {
    sample_rate: u32,
    frames_rendered: u64,
    next_id: u64,
    nodes: HashMap<NodeId, NodeKind>,
    edges: BTreeSet<(NodeId, NodeId)>,
    destination: NodeId,
    listener: Listener,
    schedule: Option<Schedule>,
    closed: bool,
}

impl AudioContext {
    pub fn new(sample_rate: u32) -> Self {
        let destination = NodeId(0);
        let mut nodes = HashMap::new();
        nodes.insert(destination, NodeKind::Destination);
        Self {
            sample_rate,
            frames_rendered: 0,
            next_id: 1,
            nodes,
            edges: BTreeSet::new(),
            destination,
            listener: Listener::default(),
            schedule: None,
            closed: false,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Context time in seconds.
    pub fn current_time(&self) -> f64 {
        self.frames_rendered as f64 / self.sample_rate as f64
    }

    pub fn destination(&self) -> NodeId {
        self.destination
    }

    pub fn listener(&self) -> &Listener {
        &self.listener
    }

    pub fn listener_mut(&mut self) -> &mut Listener {
        &mut self.listener
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::InvalidState("audio context is closed".into()));
        }
        Ok(())
    }

    fn add_node(&mut self, kind: NodeKind) -> Result<NodeId> {
        self.ensure_open()?;
        let id = NodeId(self.next_id);
        self.next_id += 1;
        trace!("Created {} {}", kind.label(), id);
        self.nodes.insert(id, kind);
        self.schedule = None;
        Ok(id)
    }

    pub fn create_buffer_source(&mut self, buffer: Arc<DecodedAudio>) -> Result<NodeId> {
        self.add_node(NodeKind::Source(BufferSource::new(buffer)))
    }

    pub fn create_gain(&mut self, gain: f32) -> Result<NodeId> {
        self.add_node(NodeKind::Gain(AudioParam::new(gain)))
    }

    pub fn create_panner(&mut self, options: &PannerOptions) -> Result<NodeId> {
        self.add_node(NodeKind::Panner(Box::new(Panner::new(options))))
    }

    pub fn create_biquad(&mut self, options: &BiquadOptions) -> Result<NodeId> {
        let sample_rate = self.sample_rate;
        self.add_node(NodeKind::Biquad(Box::new(Biquad::new(options, sample_rate))))
    }

    pub fn create_convolver(&mut self, response: &ImpulseResponse) -> Result<NodeId> {
        self.add_node(NodeKind::Convolver(Box::new(PartitionedConvolver::new(
            response,
        ))))
    }

    fn node(&self, id: NodeId) -> Result<&NodeKind> {
        self.nodes
            .get(&id)
            .ok_or_else(|| Error::Graph(format!("{} does not exist", id)))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut NodeKind> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| Error::Graph(format!("{} does not exist", id)))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Route the output of `from` into `to`. Connecting twice is a no-op.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        self.ensure_open()?;
        self.node(from)?;
        if from == self.destination {
            return Err(Error::Graph("destination has no output".into()));
        }
        if matches!(self.node(to)?, NodeKind::Source(_)) {
            return Err(Error::Graph(format!("{} accepts no input", to)));
        }
        if from == to || self.reaches(to, from) {
            return Err(Error::Graph(format!(
                "connecting {} to {} would create a cycle",
                from, to
            )));
        }
        if self.edges.insert((from, to)) {
            trace!("Connected {} -> {}", from, to);
            self.schedule = None;
        }
        Ok(())
    }

    /// Remove the connection `from -> to`. Returns whether it existed.
    pub fn disconnect(&mut self, from: NodeId, to: NodeId) -> bool {
        let removed = self.edges.remove(&(from, to));
        if removed {
            trace!("Disconnected {} -> {}", from, to);
            self.schedule = None;
        }
        removed
    }

    /// Remove `id` and all of its connections.
    pub fn remove_node(&mut self, id: NodeId) -> bool {
        if id == self.destination {
            return false;
        }
        let before = self.edges.len();
        self.edges.retain(|(from, to)| *from != id && *to != id);
        let removed = self.nodes.remove(&id).is_some();
        if removed || before != self.edges.len() {
            self.schedule = None;
        }
        removed
    }

    pub fn is_connected(&self, from: NodeId, to: NodeId) -> bool {
        self.edges.contains(&(from, to))
    }

    pub fn inputs(&self, id: NodeId) -> Vec<NodeId> {
        self.edges
            .iter()
            .filter(|(_, to)| *to == id)
            .map(|(from, _)| *from)
            .collect()
    }

    pub fn outputs(&self, id: NodeId) -> Vec<NodeId> {
        self.edges
            .range((id, NodeId(0))..=(id, NodeId(u64::MAX)))
            .map(|(_, to)| *to)
            .collect()
    }

    fn reaches(&self, from: NodeId, target: NodeId) -> bool {
        let mut stack = vec![from];
        let mut seen = BTreeSet::new();
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if seen.insert(id) {
                stack.extend(self.outputs(id));
            }
        }
        false
    }

    pub fn gain_mut(&mut self, id: NodeId) -> Result<&mut AudioParam> {
        match self.node_mut(id)? {
            NodeKind::Gain(gain) => Ok(gain),
            other => Err(Error::Graph(format!("{} is a {}, not a gain", id, other.label()))),
        }
    }

    pub fn panner_mut(&mut self, id: NodeId) -> Result<&mut Panner> {
        match self.node_mut(id)? {
            NodeKind::Panner(panner) => Ok(panner.as_mut()),
            other => Err(Error::Graph(format!("{} is a {}, not a panner", id, other.label()))),
        }
    }

    pub fn source(&self, id: NodeId) -> Result<&BufferSource> {
        match self.node(id)? {
            NodeKind::Source(source) => Ok(source),
            other => Err(Error::Graph(format!("{} is a {}, not a source", id, other.label()))),
        }
    }

    fn source_mut(&mut self, id: NodeId) -> Result<&mut BufferSource> {
        match self.node_mut(id)? {
            NodeKind::Source(source) => Ok(source),
            other => Err(Error::Graph(format!("{} is a {}, not a source", id, other.label()))),
        }
    }

    /// Begin playback `offset` seconds into the buffer. A source plays once.
    pub fn start_source(&mut self, id: NodeId, offset: f64) -> Result<()> {
        self.ensure_open()?;
        let source = self.source_mut(id)?;
        if source.has_started() {
            return Err(Error::InvalidState(format!("{} was already started", id)));
        }
        let rate = source.buffer.sample_rate as f64;
        source.position = (offset.max(0.0) * rate) as usize;
        source.playback = Playback::Playing;
        debug!("Started {} at {:.3}s", id, offset);
        Ok(())
    }

    /// Halt playback. Stopping an ended source is allowed.
    pub fn stop_source(&mut self, id: NodeId) -> Result<()> {
        let source = self.source_mut(id)?;
        match source.playback {
            Playback::Idle => Err(Error::InvalidState(format!("{} was never started", id))),
            Playback::Playing => {
                source.playback = Playback::Ended;
                Ok(())
            }
            Playback::Ended => Ok(()),
        }
    }

    pub fn set_source_loop(&mut self, id: NodeId, looping: bool) -> Result<()> {
        self.source_mut(id)?.looping = looping;
        Ok(())
    }

    pub fn source_ended(&self, id: NodeId) -> Result<bool> {
        Ok(self.source(id)?.has_ended())
    }

    /// Release every node. Further mutation fails and rendering yields nothing.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        debug!(
            "Closing audio context ({} nodes, {} connections)",
            self.nodes.len(),
            self.edges.len()
        );
        self.closed = true;
        self.edges.clear();
        let destination = self.destination;
        self.nodes.retain(|id, _| *id == destination);
        self.schedule = None;
    }

    fn build_schedule(&self) -> Schedule {
        let mut pending: HashMap<NodeId, usize> = self.nodes.keys().map(|id| (*id, 0)).collect();
        for (_, to) in &self.edges {
            if let Some(count) = pending.get_mut(to) {
                *count += 1;
            }
        }

        let mut ready: Vec<NodeId> = pending
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| *id)
            .collect();
        ready.sort();
        let mut queue: VecDeque<NodeId> = ready.into();

        let mut schedule = Vec::with_capacity(self.nodes.len());
        while let Some(id) = queue.pop_front() {
            for to in self.outputs(id) {
                if let Some(count) = pending.get_mut(&to) {
                    *count -= 1;
                    if *count == 0 {
                        queue.push_back(to);
                    }
                }
            }
            schedule.push((id, self.inputs(id)));
        }
        schedule
    }

    fn render_quantum(&mut self) -> Block {
        let schedule = match self.schedule.take() {
            Some(schedule) => schedule,
            None => self.build_schedule(),
        };

        let time = self.current_time();
        let pose = self.listener.pose_at(time);
        let sample_rate = self.sample_rate as f64;
        let mut outputs: HashMap<NodeId, Block> = HashMap::with_capacity(schedule.len());
        let mut result = Block::silent();

        for (id, inputs) in &schedule {
            let mut block = Block::silent();
            for input in inputs {
                if let Some(output) = outputs.get(input) {
                    block.mix(output);
                }
            }

            let Some(node) = self.nodes.get_mut(id) else {
                continue;
            };
            match node {
                NodeKind::Source(source) => source.render(&mut block),
                NodeKind::Gain(gain) => {
                    for i in 0..RENDER_QUANTUM {
                        let g = gain.value_at(time + i as f64 / sample_rate);
                        block.left[i] *= g;
                        block.right[i] *= g;
                    }
                }
                NodeKind::Panner(panner) => {
                    panner.process(&pose, time, &mut block.left, &mut block.right)
                }
                NodeKind::Biquad(biquad) => biquad.process(&mut block.left, &mut block.right),
                NodeKind::Convolver(convolver) => {
                    convolver.process(&mut block.left, &mut block.right)
                }
                NodeKind::Destination => {
                    result = block;
                    continue;
                }
            }
            outputs.insert(*id, block);
        }

        self.schedule = Some(schedule);
        self.frames_rendered += RENDER_QUANTUM as u64;
        result
    }

    /// Render at least `frames` frames (rounded up to whole quanta) and
    /// return them as interleaved stereo.
    pub fn render(&mut self, frames: usize) -> Vec<f32> {
        if self.closed {
            return Vec::new();
        }
        let quanta = frames.div_ceil(RENDER_QUANTUM);
        let mut out = Vec::with_capacity(quanta * RENDER_QUANTUM * OUTPUT_CHANNELS);
        for _ in 0..quanta {
            let block = self.render_quantum();
            for (l, r) in block.left.iter().zip(block.right.iter()) {
                out.push(*l);
                out.push(*r);
            }
        }
        out
    }
}
