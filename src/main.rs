//! sounity host bridge: newline-delimited JSON commands on stdin, JSON
//! notifications on stdout, logs on stderr.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, error, info, warn};
use ringbuf::{HeapConsumer, HeapRb};
use settings_manager::ConfigManager;
use sounity::audio::{AudioOutput, FileFetcher, HttpFetcher, UrlFetcher};
use sounity::{Controller, Engine, OutboundMessage};
use sounity_core::OUTPUT_CHANNELS;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

/// sounity - positional audio engine for game hosts
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Settings file (defaults to the user config directory)
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Base directory for relative asset URLs
    #[clap(short, long)]
    asset_root: Option<String>,

    /// Enable debug logging
    #[clap(short, long)]
    debug: bool,

    /// Render without an output device
    #[clap(long)]
    headless: bool,
}

/// Seconds of rendered audio the output ring can hold.
const OUTPUT_BUFFER_SECS: usize = 1;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.debug {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
        debug!("Debug logging enabled");
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    info!("Starting sounity");

    let config = match &args.config {
        Some(path) => ConfigManager::with_file(path),
        None => ConfigManager::new(),
    }
    .context("Failed to load config")?;
    let mut settings = config.into_settings();
    if let Some(root) = args.asset_root {
        settings.asset_root = root;
    }

    let device = if args.headless {
        info!("Running headless");
        None
    } else {
        match AudioOutput::open_default(settings.sample_rate) {
            Ok(device) => Some(device),
            Err(e) => {
                warn!("{}, running headless", e);
                None
            }
        }
    };
    if let Some(device) = &device {
        settings.sample_rate = device.sample_rate();
    }

    let fetcher = Arc::new(UrlFetcher::new(
        FileFetcher::new(&settings.asset_root),
        HttpFetcher::new()?,
    ));
    let sample_rate = settings.sample_rate as usize;
    let (controller, events) = Controller::new(settings, fetcher)?;

    let (producer, consumer) =
        HeapRb::<f32>::new(sample_rate * OUTPUT_CHANNELS * OUTPUT_BUFFER_SECS).split();
    // The stream plays until this handle is dropped at the end of main.
    let _stream = match &device {
        Some(device) => Some(device.start(consumer).context("Failed to start audio output")?),
        None => {
            tokio::spawn(drain_output(consumer));
            None
        }
    };

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_outbound(outbound_rx));

    let (command_tx, command_rx) = mpsc::channel::<String>(100);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => {
                    if command_tx.send(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read command: {}", e);
                    break;
                }
            }
        }
    });

    let engine = Engine::new(controller, events, outbound_tx, producer);
    engine.run(command_rx).await;

    // The engine dropped its sender, so the writer finishes once flushed.
    writer.await.context("Notification writer panicked")??;

    info!("Exiting sounity");
    Ok(())
}

async fn write_outbound(mut messages: mpsc::UnboundedReceiver<OutboundMessage>) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    while let Some(message) = messages.recv().await {
        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');
        stdout.write_all(&line).await?;
        stdout.flush().await?;
    }
    Ok(())
}

/// Headless output: consumes rendered frames in real time and reports the
/// peak level.
async fn drain_output(mut consumer: HeapConsumer<f32>) {
    let mut block = vec![0.0f32; 4096];
    let mut interval = tokio::time::interval(Duration::from_millis(50));
    loop {
        interval.tick().await;
        let mut total = 0;
        let mut peak = 0.0f32;
        loop {
            let read = consumer.pop_slice(&mut block);
            if read == 0 {
                break;
            }
            total += read;
            peak = block[..read].iter().fold(peak, |peak, s| peak.max(s.abs()));
        }
        if total > 0 {
            debug!("Drained {} samples, peak {:.3}", total, peak);
        }
    }
}
