//! medivoice: voice narration and dictation service.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use medivoice::announcement::Section;
use medivoice::api::{self, ApiState};
use medivoice::config::Config;
use medivoice::output::{PlaybackState, SpeakOutcome};
use medivoice::{language, voice, SpeakOptions, VoiceService};

#[derive(Parser, Debug)]
#[command(name = "medivoice", about = "Voice narration and dictation service")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the voice service and HTTP API until Ctrl-C (default)
    Serve,
    /// Narrate text once and exit
    Say {
        /// Language display name, e.g. "hindi"
        #[arg(short, long)]
        language: Option<String>,
        /// Medicine-label section to announce first, e.g. "dosage"
        #[arg(short, long)]
        section: Option<String>,
        text: String,
    },
    /// List the synthesis voices and the voice each language resolves to
    Voices,
    /// List supported languages
    Languages,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("debug,whisper_rs=info,hyper=info")
    } else {
        EnvFilter::new("info,whisper_rs=warn,hyper=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::load(args.config.as_deref());

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Say {
            language,
            section,
            text,
        } => say(config, language, section, text).await,
        Command::Voices => list_voices(config).await,
        Command::Languages => {
            for profile in language::profiles() {
                println!("{:<10} {}", profile.display_name, profile.locale_code);
            }
            Ok(())
        }
    }
}

async fn serve(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    info!("medivoice starting");

    let (service, handle) = VoiceService::from_config(&config).await;
    let service_task = tokio::spawn(service.run());

    if config.api.enabled {
        let state = ApiState {
            voice: handle.clone(),
            default_language: config.language.default.clone(),
        };
        api::start_api(state, config.api.port).await;
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    handle.shutdown().await;
    service_task.await?;
    Ok(())
}

async fn say(
    mut config: Config,
    language: Option<String>,
    section: Option<String>,
    text: String,
) -> Result<(), Box<dyn std::error::Error>> {
    // One-shot narration never listens.
    config.recognition.enabled = false;
    let language = language.unwrap_or_else(|| config.language.default.clone());

    let mut options = SpeakOptions::default();
    if let Some(section) = section {
        let section: Section = serde_json::from_value(serde_json::Value::String(section))?;
        options = options.with_section(section);
    }

    let (service, handle) = VoiceService::from_config(&config).await;
    let service_task = tokio::spawn(service.run());
    let mut status = handle.watch_status();

    match handle.request_speak("cli", text, &language, options).await {
        Ok(SpeakOutcome::Started { .. }) => {
            status
                .wait_for(|s| s.playback == PlaybackState::Idle)
                .await?;
            if let Some(error) = handle.status().last_error {
                warn!("Narration ended with error: {error}");
            }
        }
        Ok(outcome) => info!("Nothing to narrate ({outcome:?})"),
        Err(e) => warn!("Narration failed: {e}"),
    }

    handle.shutdown().await;
    service_task.await?;
    Ok(())
}

async fn list_voices(mut config: Config) -> Result<(), Box<dyn std::error::Error>> {
    config.recognition.enabled = false;
    let (service, handle) = VoiceService::from_config(&config).await;
    let service_task = tokio::spawn(service.run());

    let voices = handle.voices().await?;
    for v in &voices {
        println!("{:<32} {}", v.name, v.locale_code);
    }
    println!();
    for profile in language::profiles() {
        let resolved = voice::resolve(profile.locale_code, &voices)
            .map_or("(engine default)", |v| v.name.as_str());
        println!("{:<10} {:<6} → {resolved}", profile.display_name, profile.locale_code);
    }

    handle.shutdown().await;
    service_task.await?;
    Ok(())
}
