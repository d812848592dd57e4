use anyhow::{anyhow, bail};
use clap::{Parser, Subcommand};
use tracing::warn;

use s2s_console::api::ConsoleApi;
use s2s_console::config::{ConsoleConfig, sample_chat_history};
use s2s_console::core::audio::{AudioCapture, AudioPlayer, PlaybackHandle};
use s2s_console::core::events::PROTOCOL_SAMPLE_RATE;
use s2s_console::core::{S2sSession, SessionNotice};

/// s2s-console - operator test harness for the S2S voice service
#[derive(Parser, Debug)]
#[command(name = "s2s-console")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Streaming backend WebSocket URL (overrides S2S_WS_URL)
    #[arg(long = "ws-url", value_name = "URL")]
    ws_url: Option<String>,

    /// REST API base URL (overrides S2S_API_URL)
    #[arg(long = "api-url", value_name = "URL")]
    api_url: Option<String>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Open a live session: test exchange, microphone capture and playback
    Connect {
        /// Optional user text message to send in the exchange
        #[arg(short = 'm', long = "message")]
        message: Option<String>,

        /// Voice id override
        #[arg(long = "voice")]
        voice: Option<String>,

        /// Load stored configuration for this device id via the REST API
        #[arg(long = "device")]
        device: Option<String>,

        /// Replay the sample chat history before opening the audio stream
        #[arg(long = "with-history")]
        with_history: bool,

        /// Skip microphone capture (playback and transcript only)
        #[arg(long = "no-mic")]
        no_mic: bool,
    },

    /// List devices registered with the REST API
    Devices,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();
    let mut config = ConsoleConfig::from_env();
    if let Some(ws_url) = cli.ws_url {
        config.ws_url = ws_url;
    }
    if let Some(api_url) = cli.api_url {
        config.api_url = api_url;
    }

    match cli.command.unwrap_or(Commands::Connect {
        message: None,
        voice: None,
        device: None,
        with_history: false,
        no_mic: false,
    }) {
        Commands::Connect {
            message,
            voice,
            device,
            with_history,
            no_mic,
        } => run_session(config, message, voice, device, with_history, no_mic).await,
        Commands::Devices => list_devices(config).await,
    }
}

async fn run_session(
    mut config: ConsoleConfig,
    message: Option<String>,
    voice: Option<String>,
    device: Option<String>,
    with_history: bool,
    no_mic: bool,
) -> anyhow::Result<()> {
    if let Some(device_id) = device {
        let mut api = login(&config).await?;
        let device = api.get_device_config(&device_id).await?;
        device.apply_to(&mut config.exchange);
        println!(
            "Loaded configuration for device {} ({})",
            device.device_id,
            device.device_name.as_deref().unwrap_or("unnamed")
        );
    }
    if let Some(voice) = voice {
        config.exchange.voice_id = voice;
    }
    if with_history {
        config.exchange.chat_history = sample_chat_history();
    }

    // A missing output device degrades to a silent session rather than
    // refusing to run; useful on headless hosts.
    let mut player = match AudioPlayer::new() {
        Ok(player) => Some(player),
        Err(e) => {
            warn!("audio output unavailable: {e}");
            None
        }
    };
    let playback = player
        .as_ref()
        .map(AudioPlayer::handle)
        .unwrap_or_else(|| PlaybackHandle::detached(PROTOCOL_SAMPLE_RATE));
    if let Some(player) = player.as_mut() {
        player.start().map_err(|e| anyhow!("{e}"))?;
    }

    let (session, mut notices) = S2sSession::new(config.exchange.clone(), playback);
    session.connect(&config.ws_url, config.credentials()).await?;
    session.start_test_exchange(message.as_deref()).await?;

    let mut capture = if no_mic {
        None
    } else {
        let feed = session.capture_feed().await?;
        match AudioCapture::start(feed) {
            Ok(capture) => Some(capture),
            Err(e) => {
                warn!("microphone unavailable: {e}");
                None
            }
        }
    };
    println!("Session running. Press Ctrl-C to hang up.");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            notice = notices.recv() => match notice {
                Some(SessionNotice::Alert(text)) => println!("! {text}"),
                Some(SessionNotice::AuthSucceeded) => println!("Device authenticated."),
                Some(SessionNotice::AuthFailed(reason)) => println!("Device auth failed: {reason}"),
                Some(SessionNotice::TranscriptUpdated { content_id }) => {
                    if let Some((_, entry)) = session
                        .transcript_snapshot()
                        .into_iter()
                        .find(|(id, _)| *id == content_id)
                    {
                        let role = entry
                            .role
                            .map(|r| r.to_string())
                            .unwrap_or_else(|| "?".to_string());
                        println!("[{role}] {}", entry.content);
                    }
                }
                Some(SessionNotice::UsageUpdated(totals)) => {
                    println!(
                        "usage: {} in / {} out / {} total (${:.5})",
                        totals.input_tokens,
                        totals.output_tokens,
                        totals.total_tokens,
                        totals.cost_estimate
                    );
                }
                Some(SessionNotice::Disconnected) | None => break,
            },
        }
    }

    if let Some(capture) = capture.as_mut() {
        capture.stop();
    }
    if let Err(e) = session.end_audio_input().await {
        warn!("could not close audio stream: {e}");
    }
    session.disconnect().await;
    if let Some(player) = player.as_mut() {
        player.stop();
    }
    println!("Session closed.");
    Ok(())
}

async fn list_devices(config: ConsoleConfig) -> anyhow::Result<()> {
    let mut api = login(&config).await?;
    let devices = api.list_devices().await?;
    if devices.is_empty() {
        println!("No devices registered.");
        return Ok(());
    }
    for device in devices {
        println!(
            "{}  {}  voice={}",
            device.device_id,
            device.device_name.as_deref().unwrap_or("-"),
            device.voice_id.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

async fn login(config: &ConsoleConfig) -> anyhow::Result<ConsoleApi> {
    let (Some(username), Some(password)) = (&config.username, &config.password) else {
        bail!("S2S_USERNAME and S2S_PASSWORD must be set for REST API access");
    };
    let mut api = ConsoleApi::new(&config.api_url);
    api.login(username, password).await?;
    Ok(api)
}
