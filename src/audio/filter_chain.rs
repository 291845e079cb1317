//! Ordered chain of named filter stages between a node's raw output and its
//! destination, and the capability trait shared by the nodes that own one.
//!
//! Wiring is always `source -> stage 1 -> ... -> stage n -> destination`,
//! with missing ends simply left unconnected. Every operation leaves the
//! chain in that shape before it returns.

use std::collections::HashMap;

use log::{debug, info, warn};
use sounity_core::{CategoryVolumes, Error, Result};

use super::convolver::ImpulseResponse;
use super::filters::{ConvolverOptions, FilterDescriptor, FilterOptions};
use super::graph::{AudioContext, NodeId};

/// Per-name operation state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterOp {
    /// Construction in flight; removals issued meanwhile wait for it.
    Adding { queued_removals: usize },
    Active,
}

#[derive(Debug, Clone)]
struct FilterStage {
    name: String,
    node: NodeId,
}

/// Outcome of an add request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddFilter {
    /// Built and wired in immediately.
    Spliced,
    /// Waiting for its impulse response; finish with
    /// [`FilterChainCapable::complete_filter`].
    Pending(ConvolverOptions),
    /// The node no longer mutates its graph.
    Ignored,
}

/// Outcome of a remove request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveFilter {
    Removed,
    /// Deferred until the in-flight add of the same name resolves.
    Queued,
    Ignored,
}

/// Result of resolving an in-flight add, including the removals that were
/// waiting on it, in the order they were issued.
#[derive(Debug)]
pub struct AddCompletion {
    pub result: Result<()>,
    pub queued_removals: Vec<Result<()>>,
}

#[derive(Debug, Default)]
pub struct FilterChain {
    source: Option<NodeId>,
    destination: Option<NodeId>,
    stages: Vec<FilterStage>,
    ops: HashMap<String, FilterOp>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(&self) -> Option<NodeId> {
        self.source
    }

    pub fn destination(&self) -> Option<NodeId> {
        self.destination
    }

    /// Last node of the chain: the final stage, or the raw output.
    pub fn tail(&self) -> Option<NodeId> {
        self.stages.last().map(|stage| stage.node).or(self.source)
    }

    fn head(&self) -> Option<NodeId> {
        self.stages.first().map(|stage| stage.node).or(self.destination)
    }

    /// Active stage names in signal order.
    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|stage| stage.name.as_str()).collect()
    }

    pub fn stage_nodes(&self) -> Vec<NodeId> {
        self.stages.iter().map(|stage| stage.node).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn is_active(&self, name: &str) -> bool {
        self.ops.get(name) == Some(&FilterOp::Active)
    }

    pub fn is_adding(&self, name: &str) -> bool {
        matches!(self.ops.get(name), Some(FilterOp::Adding { .. }))
    }

    pub fn has_pending(&self) -> bool {
        self.ops
            .values()
            .any(|op| matches!(op, FilterOp::Adding { .. }))
    }

    /// Attach the node's raw output in front of the first stage.
    pub fn set_source(&mut self, ctx: &mut AudioContext, source: NodeId) -> Result<()> {
        let head = self.head();
        if let (Some(old), Some(head)) = (self.source, head) {
            ctx.disconnect(old, head);
        }
        self.source = Some(source);
        if let Some(head) = head {
            ctx.connect(source, head)?;
        }
        Ok(())
    }

    /// Attach the tail to `destination`, leaving any previous one first.
    pub fn connect(&mut self, ctx: &mut AudioContext, destination: NodeId) -> Result<()> {
        if self.destination.is_some() {
            self.disconnect(ctx);
        }
        if let Some(tail) = self.tail() {
            ctx.connect(tail, destination)?;
        }
        self.destination = Some(destination);
        Ok(())
    }

    pub fn disconnect(&mut self, ctx: &mut AudioContext) {
        if let (Some(tail), Some(destination)) = (self.tail(), self.destination) {
            ctx.disconnect(tail, destination);
        }
        self.destination = None;
    }

    /// Reserve `name` for an add. Fails if it is active or already in flight.
    pub fn begin_add(&mut self, name: &str) -> Result<()> {
        if self.ops.contains_key(name) {
            return Err(Error::DuplicateFilter(name.to_string()));
        }
        self.ops.insert(
            name.to_string(),
            FilterOp::Adding { queued_removals: 0 },
        );
        Ok(())
    }

    /// Resolve the in-flight add of `name` with the constructed stage, then
    /// run the removals that were waiting on it.
    pub fn finish_add(
        &mut self,
        ctx: &mut AudioContext,
        name: &str,
        built: Result<NodeId>,
    ) -> AddCompletion {
        let queued = match self.ops.get(name) {
            Some(FilterOp::Adding { queued_removals }) => *queued_removals,
            _ => {
                if let Ok(node) = built {
                    ctx.remove_node(node);
                }
                return AddCompletion {
                    result: Err(Error::InvalidState(format!(
                        "no add in flight for filter {}",
                        name
                    ))),
                    queued_removals: Vec::new(),
                };
            }
        };

        let result = built.and_then(|node| self.splice_in(ctx, name, node));
        match &result {
            Ok(()) => {
                self.ops.insert(name.to_string(), FilterOp::Active);
                info!("Spliced filter {} into chain", name);
            }
            Err(e) => {
                self.ops.remove(name);
                warn!("Filter {} could not be added: {}", name, e);
            }
        }

        let queued_removals = (0..queued).map(|_| self.remove_active(ctx, name)).collect();
        AddCompletion {
            result,
            queued_removals,
        }
    }

    fn splice_in(&mut self, ctx: &mut AudioContext, name: &str, node: NodeId) -> Result<()> {
        let tail = self.tail();
        if let (Some(tail), Some(destination)) = (tail, self.destination) {
            ctx.disconnect(tail, destination);
        }

        let wired = tail
            .map_or(Ok(()), |tail| ctx.connect(tail, node))
            .and_then(|_| {
                self.destination
                    .map_or(Ok(()), |destination| ctx.connect(node, destination))
            });
        if let Err(e) = wired {
            ctx.remove_node(node);
            if let (Some(tail), Some(destination)) = (tail, self.destination) {
                let _ = ctx.connect(tail, destination);
            }
            return Err(e);
        }

        self.stages.push(FilterStage {
            name: name.to_string(),
            node,
        });
        Ok(())
    }

    /// Remove `name`, or queue the removal behind its in-flight add.
    pub fn remove(&mut self, ctx: &mut AudioContext, name: &str) -> Result<RemoveFilter> {
        match self.ops.get_mut(name) {
            Some(FilterOp::Adding { queued_removals }) => {
                *queued_removals += 1;
                debug!("Removal of filter {} waits for its add", name);
                Ok(RemoveFilter::Queued)
            }
            Some(FilterOp::Active) => self.remove_active(ctx, name).map(|_| RemoveFilter::Removed),
            None => Err(Error::UnknownFilter(name.to_string())),
        }
    }

    fn remove_active(&mut self, ctx: &mut AudioContext, name: &str) -> Result<()> {
        let index = self
            .stages
            .iter()
            .position(|stage| stage.name == name)
            .ok_or_else(|| Error::UnknownFilter(name.to_string()))?;

        let node = self.stages[index].node;
        let previous = if index == 0 {
            self.source
        } else {
            Some(self.stages[index - 1].node)
        };
        let next = self
            .stages
            .get(index + 1)
            .map(|stage| stage.node)
            .or(self.destination);

        self.stages.remove(index);
        self.ops.remove(name);
        ctx.remove_node(node);
        if let (Some(previous), Some(next)) = (previous, next) {
            ctx.connect(previous, next)?;
        }
        info!("Removed filter {} from chain", name);
        Ok(())
    }

    /// Drop every stage and forget in-flight adds. The raw output is
    /// reattached to the destination.
    pub fn clear(&mut self, ctx: &mut AudioContext) {
        for stage in self.stages.drain(..) {
            ctx.remove_node(stage.node);
        }
        self.ops.clear();
        if let (Some(source), Some(destination)) = (self.source, self.destination) {
            let _ = ctx.connect(source, destination);
        }
    }
}

/// A graph object that owns a [`FilterChain`].
pub trait FilterChainCapable {
    fn chain(&self) -> &FilterChain;

    fn chain_mut(&mut self) -> &mut FilterChain;

    /// Name used in log lines.
    fn label(&self) -> &str;

    /// Whether the node may still change the graph.
    fn accepts_graph_mutation(&self) -> bool {
        true
    }

    /// Ramp parameters so they reach their targets at `end_time`.
    fn tick(
        &mut self,
        ctx: &mut AudioContext,
        end_time: f64,
        volumes: &CategoryVolumes,
    ) -> Result<()>;

    fn connect(&mut self, ctx: &mut AudioContext, destination: NodeId) -> Result<()> {
        self.chain_mut().connect(ctx, destination)
    }

    fn disconnect(&mut self, ctx: &mut AudioContext) {
        self.chain_mut().disconnect(ctx)
    }

    /// Instantiate `descriptor` as a new last stage.
    fn add_filter(
        &mut self,
        ctx: &mut AudioContext,
        descriptor: &FilterDescriptor,
    ) -> Result<AddFilter> {
        if !self.accepts_graph_mutation() {
            debug!("{} ignores filter {}", self.label(), descriptor.name);
            return Ok(AddFilter::Ignored);
        }
        self.chain_mut().begin_add(&descriptor.name)?;
        match &descriptor.options {
            FilterOptions::Parametric(options) => {
                let built = ctx.create_biquad(options);
                self.chain_mut()
                    .finish_add(ctx, &descriptor.name, built)
                    .result
                    .map(|_| AddFilter::Spliced)
            }
            FilterOptions::Convolution(options) => Ok(AddFilter::Pending(options.clone())),
        }
    }

    /// Resolve a pending convolution add with its loaded impulse response.
    fn complete_filter(
        &mut self,
        ctx: &mut AudioContext,
        name: &str,
        impulse: Result<ImpulseResponse>,
    ) -> AddCompletion {
        let built = if self.accepts_graph_mutation() {
            impulse.and_then(|response| ctx.create_convolver(&response))
        } else {
            Err(Error::InvalidState(format!(
                "{} no longer accepts filters",
                self.label()
            )))
        };
        self.chain_mut().finish_add(ctx, name, built)
    }

    fn remove_filter(&mut self, ctx: &mut AudioContext, name: &str) -> Result<RemoveFilter> {
        if !self.accepts_graph_mutation() {
            debug!("{} ignores removal of filter {}", self.label(), name);
            return Ok(RemoveFilter::Ignored);
        }
        self.chain_mut().remove(ctx, name)
    }
}
