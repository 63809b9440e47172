use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use rtc_audio_channel::core::signaling::DEFAULT_MAX_ENVELOPE_BYTES;
use rtc_audio_channel::{
    AudioChannel, ChannelConfig, Dispatcher, FunctionReply, LengthCheck, SignalEvent,
    WebSocketChannel,
};

/// Real-time audio channel tooling
#[derive(Parser, Debug)]
#[command(name = "rtc-channel")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Decode a signaling envelope and print its events as JSON lines
    Decode {
        /// Envelope bytes as hex
        #[arg(conflicts_with = "file", required_unless_present = "file")]
        hex: Option<String>,

        /// Read raw envelope bytes from a file instead
        #[arg(short = 'f', long = "file")]
        file: Option<PathBuf>,

        /// Reject envelopes whose declared length disagrees with their size
        #[arg(long)]
        strict: bool,
    },

    /// Encode a function-call reply envelope and print it as hex
    Reply {
        /// Call identifier from the tool call
        call_id: String,
        /// Reply content
        content: String,
    },

    /// Load and validate the configuration
    CheckConfig,

    /// Connect to the websocket fallback endpoint and log incoming events
    Listen,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Initialize crypto provider for wss:// connections
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Decode { hex, file, strict } => {
            let raw = match (hex, file) {
                (_, Some(path)) => std::fs::read(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
                (Some(encoded), None) => {
                    hex::decode(encoded.trim()).context("Envelope is not valid hex")?
                }
                (None, None) => anyhow::bail!("Provide envelope hex or --file"),
            };
            let check = if strict {
                LengthCheck::Strict
            } else {
                LengthCheck::Envelope
            };
            let dispatcher = Dispatcher::new(check, DEFAULT_MAX_ENVELOPE_BYTES);
            let events = dispatcher.decode(&raw, true)?;
            for event in &events {
                println!("{}", event_json(event)?);
            }
        }
        Commands::Reply { call_id, content } => {
            let framed = FunctionReply::new(call_id, content).encode()?;
            println!("{}", hex::encode(framed));
        }
        Commands::CheckConfig => {
            let config = load_config(cli.config)?;
            config.validate()?;
            println!("{:#?}", config);
            println!("Configuration is valid");
        }
        Commands::Listen => {
            let config = load_config(cli.config)?;
            let fallback = config.validate_fallback()?.clone();
            listen(WebSocketChannel::new(fallback)).await?;
        }
    }

    Ok(())
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<ChannelConfig> {
    let config = match path {
        Some(path) => {
            println!("Loading configuration from {}", path.display());
            ChannelConfig::from_file(&path)?
        }
        None => ChannelConfig::from_env()?,
    };
    Ok(config)
}

fn event_json(event: &SignalEvent) -> anyhow::Result<String> {
    let value = match event {
        SignalEvent::Subtitle(subtitle) => {
            serde_json::json!({ "subtitle": subtitle })
        }
        SignalEvent::FunctionCall(call) => serde_json::json!({ "function_call": call }),
        SignalEvent::Message(message) => serde_json::json!({ "message": message }),
    };
    Ok(serde_json::to_string(&value)?)
}

async fn listen(channel: WebSocketChannel) -> anyhow::Result<()> {
    channel.on_incoming_audio(Arc::new(|audio| {
        Box::pin(async move {
            tracing::debug!("Received {} bytes of audio", audio.data.len());
        })
    }));
    channel.on_incoming_signal(Arc::new(|event| {
        Box::pin(async move {
            match event_json(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!("Failed to format event: {}", e),
            }
        })
    }));
    channel.on_channel_closed(Arc::new(|| {
        Box::pin(async {
            info!("Channel closed");
        })
    }));

    channel.open_channel().await?;
    info!(
        "Listening on {} (server sample rate {:?}); press Ctrl-C to stop",
        channel.config().url,
        channel.server_sample_rate()
    );

    tokio::signal::ctrl_c().await?;
    channel.close_channel().await;
    Ok(())
}
