//! Capture process boundary.
//!
//! The pipeline treats audio capture as an external collaborator: an
//! ffmpeg segmenter that writes fixed-duration, monotonically numbered
//! WAV files into the session's chunks directory. This module builds the
//! segmenter command, spawns and supervises the child, and parses the
//! device list for the CLI.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Kind of capture device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Audio,
    Video,
}

/// An input device reported by the capture backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureDevice {
    pub index: u32,
    pub name: String,
    pub kind: DeviceKind,
}

/// Parse ffmpeg's AVFoundation device listing.
///
/// ffmpeg prints the table to stderr and exits non-zero because of the
/// dummy input; the caller passes the combined output here.
pub fn parse_device_list(output: &str) -> Vec<CaptureDevice> {
    let mut devices = Vec::new();
    let mut kind: Option<DeviceKind> = None;

    for raw_line in output.lines() {
        let line = raw_line.trim();
        if line.contains("AVFoundation video devices") {
            kind = Some(DeviceKind::Video);
            continue;
        }
        if line.contains("AVFoundation audio devices") {
            kind = Some(DeviceKind::Audio);
            continue;
        }

        let Some(current_kind) = kind else { continue };
        let Some(rest) = line
            .strip_prefix("[AVFoundation indev @ ")
            .and_then(|r| r.split_once("] ").map(|(_, tail)| tail))
        else {
            continue;
        };

        // Remaining shape: "[<index>] <name>"
        let Some((index_part, name)) = rest
            .strip_prefix('[')
            .and_then(|r| r.split_once("] "))
        else {
            continue;
        };
        let Ok(index) = index_part.parse::<u32>() else {
            continue;
        };

        devices.push(CaptureDevice {
            index,
            name: name.to_string(),
            kind: current_kind,
        });
    }

    devices
}

/// List available capture devices by probing ffmpeg.
pub async fn list_devices() -> Result<Vec<CaptureDevice>> {
    let output = Command::new("ffmpeg")
        .args(["-hide_banner", "-f", "avfoundation", "-list_devices", "true", "-i", ""])
        .output()
        .await
        .context("Failed to run ffmpeg for device listing")?;

    let combined = format!(
        "{}\n{}",
        String::from_utf8_lossy(&output.stderr),
        String::from_utf8_lossy(&output.stdout)
    );

    let devices = parse_device_list(&combined);
    if devices.is_empty() {
        anyhow::bail!(
            "Failed to parse capture devices from ffmpeg output. \
             Try: ffmpeg -f avfoundation -list_devices true -i \"\""
        );
    }
    Ok(devices)
}

/// Configuration for the segmenting capture process
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Audio device index, e.g. "0", or "0,1" to mix two devices
    pub device: String,

    /// Duration of each segment file in seconds
    pub chunk_seconds: u32,

    /// Output pattern, e.g. `<session>/chunks/out%05d.wav`
    pub output_pattern: PathBuf,

    pub sample_rate_hz: u32,
    pub channels: u32,

    /// First segment number, derived from prior session progress
    pub segment_start_number: u64,

    /// Where to append the capture process's stderr
    pub log_path: Option<PathBuf>,
}

impl CaptureConfig {
    pub fn new(device: impl Into<String>, chunk_seconds: u32, output_pattern: PathBuf) -> Self {
        Self {
            device: device.into(),
            chunk_seconds,
            output_pattern,
            sample_rate_hz: 16_000,
            channels: 1,
            segment_start_number: 0,
            log_path: None,
        }
    }

    fn device_indices(&self) -> Result<Vec<u32>> {
        let indices: Vec<u32> = self
            .device
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| {
                p.parse()
                    .with_context(|| format!("Invalid device value: {:?}", self.device))
            })
            .collect::<Result<_>>()?;

        if indices.is_empty() {
            anyhow::bail!("No audio device indices provided");
        }
        Ok(indices)
    }
}

/// Build the ffmpeg segmenter argument list.
pub fn build_segment_command(config: &CaptureConfig) -> Result<Vec<String>> {
    if config.chunk_seconds == 0 {
        anyhow::bail!("chunk_seconds must be > 0");
    }

    let indices = config.device_indices()?;
    let mut cmd: Vec<String> = vec![
        "-hide_banner".into(),
        "-loglevel".into(),
        "error".into(),
    ];

    if indices.len() == 1 {
        cmd.extend([
            "-f".into(),
            "avfoundation".into(),
            "-thread_queue_size".into(),
            "4096".into(),
            "-i".into(),
            format!(":{}", indices[0]),
        ]);
    } else {
        for idx in &indices {
            cmd.extend([
                "-f".into(),
                "avfoundation".into(),
                "-thread_queue_size".into(),
                "4096".into(),
                "-i".into(),
                format!(":{}", idx),
            ]);
        }
        let inputs: String = (0..indices.len()).map(|i| format!("[{}:a]", i)).collect();
        cmd.extend([
            "-filter_complex".into(),
            format!(
                "{}amix=inputs={}:duration=longest:dropout_transition=2[a]",
                inputs,
                indices.len()
            ),
            "-map".into(),
            "[a]".into(),
        ]);
    }

    cmd.extend([
        "-ac".into(),
        config.channels.to_string(),
        "-ar".into(),
        config.sample_rate_hz.to_string(),
        "-c:a".into(),
        "pcm_s16le".into(),
        "-f".into(),
        "segment".into(),
        "-segment_start_number".into(),
        config.segment_start_number.to_string(),
        "-segment_time".into(),
        config.chunk_seconds.to_string(),
        "-reset_timestamps".into(),
        "1".into(),
        config.output_pattern.to_string_lossy().into_owned(),
    ]);

    Ok(cmd)
}

/// Handle to a running capture process
pub struct CaptureHandle {
    child: Child,
}

impl CaptureHandle {
    /// Spawn the ffmpeg segmenter for a session.
    pub fn spawn(config: &CaptureConfig) -> Result<Self> {
        if let Some(parent) = config.output_pattern.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create chunks dir: {}", parent.display()))?;
        }

        let args = build_segment_command(config)?;

        let stderr = match &config.log_path {
            Some(path) => {
                let file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("Failed to open capture log: {}", path.display()))?;
                Stdio::from(file)
            }
            None => Stdio::null(),
        };

        let child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(stderr)
            .spawn()
            .context("Failed to spawn capture process")?;

        debug!(device = %config.device, start = config.segment_start_number, "Capture started");

        Ok(Self { child })
    }

    /// Non-blocking exit check, used by the processing loop to detect a
    /// capture process dying mid-session.
    pub fn try_exited(&mut self) -> Result<Option<ExitStatus>> {
        self.child
            .try_wait()
            .context("Failed to poll capture process")
    }

    /// Ask the capture process to finish its current segment and exit.
    ///
    /// SIGINT lets ffmpeg flush the in-flight segment; SIGKILL is the
    /// fallback when it does not exit within the grace period.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(pid) = self.child.id() {
            // Safety: sending a signal to our own child process
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGINT);
            }
        }

        match timeout(Duration::from_secs(5), self.child.wait()).await {
            Ok(status) => {
                let status = status.context("Failed to wait for capture process")?;
                debug!(%status, "Capture stopped");
            }
            Err(_) => {
                warn!("Capture did not exit after SIGINT, killing");
                self.child
                    .kill()
                    .await
                    .context("Failed to kill capture process")?;
            }
        }

        Ok(())
    }
}
