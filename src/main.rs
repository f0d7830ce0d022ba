use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::anyhow;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use waav_voice_client::{
    AudioCapture, ChannelCapture, ClientConfig, CpalCapture, FrameFeeder, InputMode, InputPipeline,
    SessionController, SessionEvent, Transcriber, TransportKind, WhisperTranscriber,
    create_transport,
};

/// WaaV Voice Client - Conversational voice chat against OpenAI models
#[derive(Parser, Debug)]
#[command(name = "waav-voice-client")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Completion transport (http or realtime)
    #[arg(short = 't', long = "transport", value_name = "TRANSPORT")]
    transport: Option<String>,

    /// Input mode (stt or audio)
    #[arg(short = 'm', long = "mode", value_name = "MODE")]
    mode: Option<String>,

    /// Skip the microphone and read utterances from stdin only
    #[arg(long = "text-only")]
    text_only: bool,
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

    let mut config = if let Some(config_path) = &cli.config {
        println!("Loading configuration from {}", config_path.display());
        ClientConfig::from_file(config_path)?
    } else {
        ClientConfig::from_env()?
    };

    if let Some(transport) = &cli.transport {
        config.transport = TransportKind::parse(transport)
            .ok_or_else(|| anyhow!("Unknown transport '{}'", transport))?;
    }
    if let Some(mode) = &cli.mode {
        config.input_mode =
            InputMode::parse(mode).ok_or_else(|| anyhow!("Unknown input mode '{}'", mode))?;
    }
    config.validate()?;

    let transport = create_transport(&config)?;

    let pipeline = match config.input_mode {
        InputMode::AudioForwarding => InputPipeline::AudioForwarding,
        InputMode::SpeechToText if cli.text_only => InputPipeline::text_only(),
        InputMode::SpeechToText => {
            let transcriber: Arc<dyn Transcriber> =
                Arc::new(WhisperTranscriber::new(config.transcription_config())?);
            InputPipeline::SpeechToText {
                transcriber: Some(transcriber),
            }
        }
    };

    // The feeder must outlive the session or the frame stream reads as a lost device.
    let (capture, _feeder): (Box<dyn AudioCapture>, Option<FrameFeeder>) = if cli.text_only {
        let (capture, feeder) = ChannelCapture::new();
        (Box::new(capture) as Box<dyn AudioCapture>, Some(feeder))
    } else {
        (Box::new(CpalCapture::new(config.capture.clone())), None)
    };

    let (mut session, mut events) =
        SessionController::new(config.session_config(), pipeline, transport, capture)?;

    info!(
        "Starting session: transport={}, mode={}",
        config.transport, config.input_mode
    );
    session.connect().await?;
    println!("Connected. Speak, or type a message and press Enter. Ctrl+C to quit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut printed = 0usize;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, disconnecting");
                break;
            }
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(text)) => {
                        if let Err(e) = session.submit_text(text) {
                            warn!("Input rejected: {}", e);
                        }
                    }
                    Ok(None) => stdin_open = false,
                    Err(e) => {
                        warn!("Failed to read stdin: {}", e);
                        stdin_open = false;
                    }
                }
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    SessionEvent::Message(update) if update.message.is_user => {
                        println!("you> {}", update.message.text);
                        printed = 0;
                    }
                    SessionEvent::Message(update) => {
                        let text = &update.message.text;
                        if printed == 0 {
                            print!("assistant> ");
                        }
                        if let Some(fresh) = text.get(printed..) {
                            print!("{}", fresh);
                        }
                        printed = text.len();
                        if update.message.complete {
                            println!();
                            printed = 0;
                        }
                        let _ = std::io::stdout().flush();
                    }
                    SessionEvent::UtteranceDropped { .. } => {
                        println!("(still answering, input dropped)");
                    }
                    SessionEvent::Retrying { attempt, delay_ms, reason, .. } => {
                        println!("(retry {} in {} ms: {})", attempt, delay_ms, reason);
                    }
                    SessionEvent::TurnFailed { reason, .. } => {
                        println!("(turn failed: {})", reason);
                        printed = 0;
                    }
                    SessionEvent::Error(reason) => {
                        eprintln!("Session error: {}", reason);
                        break;
                    }
                    SessionEvent::StateChanged(_) | SessionEvent::ConnectionChanged(_) => {}
                }
            }
        }
    }

    session.disconnect().await;
    println!("Disconnected.");
    Ok(())
}
