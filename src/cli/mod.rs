//! Command-line interface for livecoach.
//!
//! Provides commands for running a live transcription session, listing
//! capture devices, and inspecting past sessions.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use tracing::info;

use crate::adapters::{
    GeminiClient, GeminiCoachAnalyzer, GeminiSummarizer, GeminiTranscriber,
};
use crate::config;
use crate::core::bus::{EventBus, EventKind};
use crate::core::coaching::CoachingEngine;
use crate::core::ledger::{self, SessionPaths};
use crate::core::runner::{RunnerOptions, SessionRunner};
use crate::domain::{session_stamp, MeetingPrepContext, SessionStatus};
use crate::ingest::watcher::{max_chunk_index, StabilityConfig};
use crate::ingest::{CaptureConfig, CaptureHandle, DeviceKind};

/// livecoach - Live meeting transcription and coaching pipeline
#[derive(Parser, Debug)]
#[command(name = "livecoach")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Record and transcribe a session
    Run {
        /// Session name (resumes if the directory already exists;
        /// defaults to a timestamp)
        #[arg(short, long)]
        session: Option<String>,

        /// Audio device index, or "0,1" to mix two devices
        #[arg(short, long, default_value = "0")]
        device: String,

        /// Chunk duration in seconds (ignored when resuming)
        #[arg(long)]
        chunk_seconds: Option<u32>,

        /// Seconds between summary refreshes
        #[arg(long)]
        summary_interval: Option<u32>,

        /// Sessions directory override
        #[arg(long, env = "LIVECOACH_SESSIONS")]
        out_dir: Option<PathBuf>,

        /// Transcription model override
        #[arg(long)]
        model: Option<String>,

        /// Summarization/coaching model override
        #[arg(long)]
        summary_model: Option<String>,

        /// Keep processed chunk files
        #[arg(long)]
        keep_audio: bool,

        /// Language hint for transcription
        #[arg(short, long)]
        language: Option<String>,

        /// Disable speaker diarization
        #[arg(long)]
        no_diarize: bool,

        /// Disable the coaching engine for this session
        #[arg(long)]
        no_coaching: bool,

        /// Meeting prep JSON to load for coaching
        #[arg(long)]
        prep: Option<PathBuf>,
    },

    /// List available capture devices
    Devices,

    /// List recorded sessions
    Sessions {
        /// Maximum number of sessions to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                session,
                device,
                chunk_seconds,
                summary_interval,
                out_dir,
                model,
                summary_model,
                keep_audio,
                language,
                no_diarize,
                no_coaching,
                prep,
            } => {
                run_session(RunArgs {
                    session,
                    device,
                    chunk_seconds,
                    summary_interval,
                    out_dir,
                    model,
                    summary_model,
                    keep_audio,
                    language,
                    diarize: !no_diarize,
                    coaching: !no_coaching,
                    prep,
                })
                .await
            }
            Commands::Devices => list_devices().await,
            Commands::Sessions { limit } => list_sessions(limit).await,
            Commands::Config => show_config(),
        }
    }
}

struct RunArgs {
    session: Option<String>,
    device: String,
    chunk_seconds: Option<u32>,
    summary_interval: Option<u32>,
    out_dir: Option<PathBuf>,
    model: Option<String>,
    summary_model: Option<String>,
    keep_audio: bool,
    language: Option<String>,
    diarize: bool,
    coaching: bool,
    prep: Option<PathBuf>,
}

async fn run_session(args: RunArgs) -> Result<()> {
    let config = config::config()?;

    let sessions_root = args.out_dir.unwrap_or_else(|| config.sessions.clone());
    let session_name = args
        .session
        .unwrap_or_else(|| session_stamp(Local::now()));
    let session_dir = sessions_root.join(&session_name);
    let paths = SessionPaths::resolve(&session_dir);
    paths.init_dirs()?;

    let chunk_seconds = args.chunk_seconds.unwrap_or(config.pipeline.chunk_seconds);
    let mut ledger = ledger::resume_or_new(&paths, chunk_seconds)?;

    // Prep from the flag wins over any previously saved document
    let prep: Option<MeetingPrepContext> = match &args.prep {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read prep file: {}", path.display()))?;
            let prep: MeetingPrepContext = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse prep file: {}", path.display()))?;
            ledger::save_prep(&paths, &prep).await?;
            Some(prep)
        }
        None => ledger::load_prep(&paths).await?,
    };

    if prep.is_some() && ledger.status == SessionStatus::Created {
        ledger.status = SessionStatus::Prepared;
    }
    ledger::save_ledger(&paths, &ledger)?;

    let mut coaching_config = config.coaching.clone();
    if !args.coaching {
        coaching_config.enabled = false;
    }
    if let Some(model) = args.summary_model {
        coaching_config.model = model;
    }

    let transcribe_model = args
        .model
        .unwrap_or_else(|| config.pipeline.transcribe_model.clone());
    let client = GeminiClient::from_env(&transcribe_model, &coaching_config.model)?;
    let transcriber = Arc::new(GeminiTranscriber::new(client.clone()));
    let summarizer = Arc::new(GeminiSummarizer::new(client.clone()));
    let analyzer = Arc::new(GeminiCoachAnalyzer::new(client));
    let coaching = CoachingEngine::new(coaching_config, analyzer);

    let bus = EventBus::new();
    bus.subscribe_fn(Some(EventKind::ChunkTranscribed), |event| {
        if let Some(text) = event.data.get("text").and_then(|v| v.as_str()) {
            if !text.trim().is_empty() {
                println!("{}", text);
            }
        }
    });
    bus.subscribe_fn(Some(EventKind::CoachingAlert), |event| {
        let content = event.data.get("content").and_then(|v| v.as_str());
        let suggestion = event.data.get("suggestion").and_then(|v| v.as_str());
        if let Some(content) = content {
            eprintln!(">>> COACH: {}", content);
            if let Some(suggestion) = suggestion {
                eprintln!("    {}", suggestion);
            }
        }
    });

    // Start numbering past anything a previous run left behind
    let start_index = max_chunk_index(&paths.chunks_dir)?
        .max(ledger.last_processed_index)
        + 1;

    let mut capture_config = CaptureConfig::new(
        &args.device,
        ledger.chunk_seconds,
        paths.chunks_dir.join("out%05d.wav"),
    );
    capture_config.segment_start_number = start_index as u64;
    capture_config.log_path = Some(paths.capture_log.clone());
    let capture = CaptureHandle::spawn(&capture_config)?;

    let options = RunnerOptions {
        summary_interval_secs: args
            .summary_interval
            .unwrap_or(config.pipeline.summary_interval_secs),
        keep_audio: args.keep_audio || config.pipeline.keep_audio,
        language: args.language,
        diarize: args.diarize,
        poll_interval: config.pipeline.poll_interval,
        stability: StabilityConfig {
            timeout: config.pipeline.stability_timeout,
            ..StabilityConfig::default()
        },
    };

    let runner = SessionRunner::new(
        session_name.clone(),
        paths.clone(),
        ledger,
        options,
        transcriber,
        summarizer,
        coaching,
        prep,
        bus,
    );

    info!(session = %session_name, dir = %session_dir.display(), "Recording started");
    println!("Recording session {} (Ctrl-C to stop)", session_name);

    let handle = runner.spawn(Some(capture));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    println!("\nStopping, draining remaining chunks...");

    let reason = handle.stop().await?;
    println!("Session stopped ({})", reason.as_str());
    println!("Transcript: {}", paths.transcript_txt.display());
    println!("Summary:    {}", paths.summary_md.display());

    Ok(())
}

async fn list_devices() -> Result<()> {
    let devices = crate::ingest::capture::list_devices().await?;

    println!("Audio devices:");
    for device in devices.iter().filter(|d| d.kind == DeviceKind::Audio) {
        println!("  [{}] {}", device.index, device.name);
    }
    println!("\nVideo devices:");
    for device in devices.iter().filter(|d| d.kind == DeviceKind::Video) {
        println!("  [{}] {}", device.index, device.name);
    }
    Ok(())
}

async fn list_sessions(limit: usize) -> Result<()> {
    let sessions_dir = config::sessions_dir()?;
    let entries = match std::fs::read_dir(&sessions_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            println!("No sessions yet ({})", sessions_dir.display());
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().into_string().ok())
        .collect();
    names.sort();
    names.reverse();

    for name in names.iter().take(limit) {
        let paths = SessionPaths::resolve(sessions_dir.join(name));
        match ledger::load_ledger(&paths)? {
            Some(ledger) => println!(
                "{}  [{}]  chunks processed: {}, summarized through: {}",
                name,
                ledger.status.as_str(),
                ledger.last_processed_index,
                ledger.last_summarized_index
            ),
            None => println!("{}  (no ledger)", name),
        }
    }
    Ok(())
}

fn show_config() -> Result<()> {
    let config = config::config()?;

    println!("Sessions dir: {}", config.sessions.display());
    match &config.config_file {
        Some(path) => println!("Config file:  {}", path.display()),
        None => println!("Config file:  (none found)"),
    }
    println!("Chunk seconds:    {}", config.pipeline.chunk_seconds);
    println!("Summary interval: {}s", config.pipeline.summary_interval_secs);
    println!("Transcribe model: {}", config.pipeline.transcribe_model);
    println!(
        "Coaching:         {} (model {})",
        if config.coaching.enabled { "enabled" } else { "disabled" },
        config.coaching.model
    );
    Ok(())
}
