//! Vigil console host entry point.
//!
//! Wires the external collaborators around the core client: microphone
//! acquisition (cpal, on a dedicated thread — `cpal::Stream` is `!Send`),
//! the evidence segmenter, and console rendering with WAV replay export.

mod mic;
mod render;
mod segments;
mod settings;

use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use vigil_core::{ChannelMode, ClientConfig, VigilClient};

#[derive(Debug, Parser)]
#[command(name = "vigil", about = "Real-time medical-alert streaming client")]
struct Cli {
    /// WebSocket endpoint of the remote inference service.
    #[arg(long)]
    endpoint: Option<String>,

    /// API key, appended when dialing.
    #[arg(long)]
    api_key: Option<String>,

    /// Channel mode: free-text | tool-call | duplex-socket.
    #[arg(long)]
    mode: Option<String>,

    /// Preferred input device name (default: system default).
    #[arg(long)]
    input_device: Option<String>,

    /// Directory for exported replay artifacts (default: current dir).
    #[arg(long)]
    replay_dir: Option<PathBuf>,

    /// Settings file path (default: platform config dir).
    #[arg(long)]
    settings: Option<PathBuf>,
}

fn parse_mode(raw: &str) -> Result<ChannelMode> {
    match raw {
        "free-text" => Ok(ChannelMode::FreeText),
        "tool-call" => Ok(ChannelMode::ToolCall),
        "duplex-socket" => Ok(ChannelMode::DuplexSocket),
        other => bail!("unknown channel mode '{other}' (expected free-text | tool-call | duplex-socket)"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("VIGIL_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings_path = cli
        .settings
        .clone()
        .unwrap_or_else(settings::default_settings_path);
    let stored = settings::load_settings(&settings_path);

    let endpoint = cli.endpoint.unwrap_or(stored.endpoint);
    let api_key = cli.api_key.or(stored.api_key);
    let mode = parse_mode(&cli.mode.unwrap_or(stored.mode))?;
    let input_device = cli.input_device.or(stored.preferred_input_device);
    let replay_dir = match cli.replay_dir.or(stored.replay_dir) {
        Some(dir) => dir,
        None => std::env::current_dir().context("resolving current directory")?,
    };

    // Probe the device rate first so the client resamples from the right
    // rate; acquisition failure surfaces once, here, and the host decides.
    let capture_rate =
        mic::probe_input_rate(input_device.as_deref()).context("probing input device")?;

    let config = ClientConfig {
        endpoint,
        api_key,
        mode,
        capture_sample_rate: capture_rate,
        ..ClientConfig::default()
    };
    info!(endpoint = %config.endpoint, ?mode, capture_rate, "vigil starting");

    let client = Arc::new(VigilClient::new(config));
    let feed = client.audio_feed().expect("fresh client owns its feed");
    let (segment_tx, segment_rx) = segments::create_segment_ring();
    let running = Arc::new(AtomicBool::new(true));

    // Microphone thread: open the stream and keep it alive until shutdown.
    let (open_tx, open_rx) = std::sync::mpsc::channel();
    {
        let running = Arc::clone(&running);
        let device = input_device.clone();
        std::thread::spawn(move || {
            match mic::MicCapture::open(device.as_deref(), feed, segment_tx, Arc::clone(&running))
            {
                Ok(capture) => {
                    let _ = open_tx.send(Ok(capture.sample_rate));
                    while running.load(Ordering::Relaxed) {
                        std::thread::sleep(Duration::from_millis(100));
                    }
                    // Stream drops here, releasing the device on this thread.
                    drop(capture);
                }
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                }
            }
        });
    }
    open_rx
        .recv()
        .context("microphone thread died before reporting")?
        .context("opening microphone")?;

    segments::spawn_segmenter(
        Arc::clone(&client),
        segment_rx,
        capture_rate,
        Arc::clone(&running),
    );
    render::spawn_alert_printer(client.subscribe_alerts());
    render::spawn_connection_printer(client.subscribe_connection());
    render::spawn_replay_exporter(client.subscribe_replays(), replay_dir, capture_rate);

    // The console host runs without a camera; a video-capable host passes
    // its own VideoSource here.
    client.start(None).await?;
    info!("vigil running — Ctrl+C to stop");

    tokio::signal::ctrl_c().await.context("waiting for Ctrl+C")?;
    info!("shutting down");
    running.store(false, Ordering::SeqCst);
    client.stop().await?;

    let snapshot = client.diagnostics_snapshot();
    info!(
        alerts = snapshot.alerts_emitted,
        parse_failures = snapshot.parse_failures,
        audio_sent = snapshot.audio_frames_sent,
        audio_dropped = snapshot.audio_frames_dropped,
        replays = snapshot.replays_produced,
        "session diagnostics"
    );
    Ok(())
}
