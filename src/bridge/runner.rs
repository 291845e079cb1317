//! The engine loop. One task owns the [`Controller`] and interleaves host
//! commands, asset completions and the periodic tick. Rendered audio goes
//! into a ring buffer that the output side drains at its own pace.

use std::time::Duration;

use log::{debug, info, warn};
use ringbuf::HeapProducer;
use sounity_core::{Error, OUTPUT_CHANNELS, RENDER_QUANTUM};
use tokio::sync::mpsc;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::dispatcher::{dispatch_json, DispatchOutcome};
use super::messages::OutboundMessage;
use crate::app::{Controller, EngineEvents, TickReport};

/// How long shutdown waits for asset loads still in flight.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

pub struct Engine {
    controller: Controller,
    events: EngineEvents,
    outbound: mpsc::UnboundedSender<OutboundMessage>,
    output: HeapProducer<f32>,
    tick_interval: Duration,
    last_tick: Option<Instant>,
    frames_owed: f64,
}

impl Engine {
    pub fn new(
        controller: Controller,
        events: EngineEvents,
        outbound: mpsc::UnboundedSender<OutboundMessage>,
        output: HeapProducer<f32>,
    ) -> Self {
        let tick_interval = Duration::from_millis(controller.settings().tick_interval_ms);
        Self {
            controller,
            events,
            outbound,
            output,
            tick_interval,
            last_tick: None,
            frames_owed: 0.0,
        }
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut Controller {
        &mut self.controller
    }

    fn notify(&self, message: OutboundMessage) {
        if self.outbound.send(message).is_err() {
            debug!("Host bridge closed, dropping notification");
        }
    }

    /// Dispatch one raw command line.
    pub fn handle_line(&mut self, line: &str) -> DispatchOutcome {
        dispatch_json(&mut self.controller, line)
    }

    /// Apply every asset completion that is still pending.
    pub async fn settle(&mut self) -> Vec<Error> {
        self.controller.settle(&mut self.events).await
    }

    /// Run one update: ramp all nodes over the next tick period, report
    /// finished sounds, and render the audio owed for `elapsed`.
    pub fn tick(&mut self, elapsed: Duration) -> TickReport {
        let report = self.controller.tick(self.tick_interval.as_secs_f64());
        for identifier in &report.ended {
            self.notify(OutboundMessage::SoundEnded {
                identifier: identifier.clone(),
            });
        }

        // A late tick renders at most two periods; the rest is dropped.
        let elapsed = elapsed.min(self.tick_interval * 2);
        let sample_rate = self.controller.context().sample_rate() as f64;
        self.frames_owed += elapsed.as_secs_f64() * sample_rate;
        let quanta = (self.frames_owed / RENDER_QUANTUM as f64).floor() as usize;
        if quanta > 0 {
            let frames = quanta * RENDER_QUANTUM;
            self.frames_owed -= frames as f64;
            let samples = self.controller.render(frames);
            // Whole frames only.
            let room = self.output.free_len() / OUTPUT_CHANNELS * OUTPUT_CHANNELS;
            let written = self.output.push_slice(&samples[..samples.len().min(room)]);
            if written < samples.len() {
                debug!("Output ring full, dropped {} samples", samples.len() - written);
            }
        }
        report
    }

    /// Drive the engine until the command channel closes, then shut down.
    pub async fn run(mut self, mut commands: mpsc::Receiver<String>) {
        self.notify(OutboundMessage::Ready);
        info!("Engine running");

        let mut ticker = time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                line = commands.recv() => match line {
                    Some(line) => {
                        self.handle_line(&line);
                    }
                    None => break,
                },
                Some(event) = self.events.recv() => {
                    self.controller.handle_event(event);
                }
                now = ticker.tick() => {
                    let elapsed = self
                        .last_tick
                        .map_or(self.tick_interval, |last| now.duration_since(last));
                    self.last_tick = Some(now);
                    self.tick(elapsed);
                }
            }
        }

        self.shutdown().await;
    }

    async fn shutdown(&mut self) {
        info!("Command stream closed, shutting down");
        if time::timeout(SHUTDOWN_GRACE, self.settle()).await.is_err() {
            warn!(
                "Abandoning {} asset loads still in flight",
                self.controller.in_flight()
            );
        }
        self.controller.dispose();
    }
}
