//! Master bus: every sound feeds its input gain, listener filters sit in its
//! chain, and the chain ends at the context destination.

use log::debug;
use sounity_core::{CategoryVolumes, Result};

use super::filter_chain::{FilterChain, FilterChainCapable};
use super::graph::{AudioContext, NodeId};

#[derive(Debug)]
pub struct OutputNode {
    input: Option<NodeId>,
    master_volume: f32,
    chain: FilterChain,
}

impl OutputNode {
    /// Create the bus input and wire it to the context destination.
    pub fn new(ctx: &mut AudioContext, master_volume: f32) -> Result<Self> {
        let input = ctx.create_gain(master_volume)?;
        let mut chain = FilterChain::new();
        chain.set_source(ctx, input)?;
        let mut node = Self {
            input: Some(input),
            master_volume,
            chain,
        };
        let destination = ctx.destination();
        node.connect(ctx, destination)?;
        Ok(node)
    }

    /// Node that sounds connect to. `None` once disposed.
    pub fn input(&self) -> Option<NodeId> {
        self.input
    }

    pub fn master_volume(&self) -> f32 {
        self.master_volume
    }

    pub fn dispose(&mut self, ctx: &mut AudioContext) {
        let Some(input) = self.input.take() else {
            return;
        };
        self.chain.disconnect(ctx);
        self.chain.clear(ctx);
        ctx.remove_node(input);
        debug!("Output bus disposed");
    }
}

impl FilterChainCapable for OutputNode {
    fn chain(&self) -> &FilterChain {
        &self.chain
    }

    fn chain_mut(&mut self) -> &mut FilterChain {
        &mut self.chain
    }

    fn label(&self) -> &str {
        "listener"
    }

    fn accepts_graph_mutation(&self) -> bool {
        self.input.is_some()
    }

    fn tick(
        &mut self,
        ctx: &mut AudioContext,
        end_time: f64,
        _volumes: &CategoryVolumes,
    ) -> Result<()> {
        let Some(input) = self.input else {
            return Ok(());
        };
        let now = ctx.current_time();
        ctx.gain_mut(input)?
            .linear_ramp_to_value_at_time(self.master_volume, end_time, now);
        Ok(())
    }
}
