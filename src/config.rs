//! Configuration for livecoach.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (LIVECOACH_SESSIONS)
//! 2. Config file (.livecoach/config.yaml)
//! 3. Defaults (~/.livecoach/sessions)
//!
//! Config file discovery searches the current directory and its parents
//! for .livecoach/config.yaml; relative paths in the file are resolved
//! against the project root (the parent of .livecoach/).

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::coaching::{CoachingConfig, PaceConfig};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<std::result::Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub pipeline: Option<PipelineConfig>,
    #[serde(default)]
    pub coaching: Option<CoachingFileConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Sessions directory (relative to the project root)
    pub sessions: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub chunk_seconds: Option<u32>,
    pub summary_interval_secs: Option<u32>,
    pub poll_interval_ms: Option<u64>,
    pub stability_timeout_secs: Option<u64>,
    pub keep_audio: Option<bool>,
    pub transcribe_model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoachingFileConfig {
    pub enabled: Option<bool>,
    pub model: Option<String>,
    pub max_alerts_per_chunk: Option<usize>,
    pub alert_cooldown_secs: Option<u64>,
    pub window_size: Option<usize>,
    pub pace_enabled: Option<bool>,
}

/// Pipeline defaults after merging config sources
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub chunk_seconds: u32,
    pub summary_interval_secs: u32,
    pub poll_interval: Duration,
    pub stability_timeout: Duration,
    pub keep_audio: bool,
    pub transcribe_model: String,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            chunk_seconds: 30,
            summary_interval_secs: 60,
            poll_interval: Duration::from_secs(2),
            stability_timeout: Duration::from_secs(30),
            keep_audio: false,
            transcribe_model: "gemini-3-pro-preview".to_string(),
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to the sessions directory
    pub sessions: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub pipeline: PipelineSettings,
    pub coaching: CoachingConfig,
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".livecoach").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

fn merge_pipeline(file: Option<&PipelineConfig>) -> PipelineSettings {
    let mut settings = PipelineSettings::default();
    let Some(file) = file else { return settings };

    if let Some(v) = file.chunk_seconds {
        settings.chunk_seconds = v;
    }
    if let Some(v) = file.summary_interval_secs {
        settings.summary_interval_secs = v;
    }
    if let Some(v) = file.poll_interval_ms {
        settings.poll_interval = Duration::from_millis(v);
    }
    if let Some(v) = file.stability_timeout_secs {
        settings.stability_timeout = Duration::from_secs(v);
    }
    if let Some(v) = file.keep_audio {
        settings.keep_audio = v;
    }
    if let Some(v) = &file.transcribe_model {
        settings.transcribe_model = v.clone();
    }
    settings
}

fn merge_coaching(file: Option<&CoachingFileConfig>) -> CoachingConfig {
    let mut config = CoachingConfig::default();
    let Some(file) = file else { return config };

    if let Some(v) = file.enabled {
        config.enabled = v;
    }
    if let Some(v) = &file.model {
        config.model = v.clone();
    }
    if let Some(v) = file.max_alerts_per_chunk {
        config.max_alerts_per_chunk = v;
    }
    if let Some(v) = file.alert_cooldown_secs {
        config.alert_cooldown = Duration::from_secs(v);
    }
    if let Some(v) = file.window_size {
        config.window_size = v;
    }
    config.pace = PaceConfig {
        enabled: file.pace_enabled.unwrap_or(false),
        ..PaceConfig::default()
    };
    config
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_sessions = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".livecoach")
        .join("sessions");

    let config_file = find_config_file();

    let (sessions, pipeline, coaching) = if let Some(ref config_path) = config_file {
        let config = load_config_file(config_path)?;

        // Project root is the parent of .livecoach/
        let base_dir = config_path
            .parent()
            .and_then(|p| p.parent())
            .unwrap_or(Path::new("."));

        let sessions = if let Ok(env_sessions) = std::env::var("LIVECOACH_SESSIONS") {
            PathBuf::from(env_sessions)
        } else if let Some(ref sessions_path) = config.paths.sessions {
            resolve_path(base_dir, sessions_path)
        } else {
            default_sessions.clone()
        };

        let pipeline = merge_pipeline(config.pipeline.as_ref());
        let coaching = merge_coaching(config.coaching.as_ref());

        (sessions, pipeline, coaching)
    } else {
        let sessions = std::env::var("LIVECOACH_SESSIONS")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_sessions.clone());

        (sessions, PipelineSettings::default(), CoachingConfig::default())
    };

    Ok(ResolvedConfig {
        sessions,
        config_file,
        pipeline,
        coaching,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

/// Get the sessions directory.
pub fn sessions_dir() -> Result<PathBuf> {
    Ok(config()?.sessions.clone())
}
