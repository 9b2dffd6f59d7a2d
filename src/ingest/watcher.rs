//! Audio chunk watcher.
//!
//! The capture process writes monotonically numbered segment files
//! (`out00000.wav`, `out00001.wav`, ...) into the session's chunks
//! directory, and the newest one may still be mid-write. Discovery
//! therefore never hands out the single highest-indexed candidate except
//! in drain mode, and every chunk gets a size/mtime stability check
//! before the pipeline touches it.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use thiserror::Error;
use tokio::time::{sleep, Instant};

/// Errors that can occur while watching for chunks
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("Timed out waiting for file to stabilize: {0}")]
    StabilityTimeout(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A numbered chunk file discovered on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFile {
    pub index: u64,
    pub path: PathBuf,
}

/// Timing parameters for the stability check
#[derive(Debug, Clone)]
pub struct StabilityConfig {
    /// How long size/mtime must stay unchanged before a file counts as stable
    pub stable_for: Duration,

    /// Interval between stat polls
    pub poll_interval: Duration,

    /// Overall budget before giving up on the file
    pub timeout: Duration,
}

impl Default for StabilityConfig {
    fn default() -> Self {
        Self {
            stable_for: Duration::from_millis(750),
            poll_interval: Duration::from_millis(200),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Parse the chunk index out of an `out<digits>.wav` file name.
pub fn parse_chunk_index(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    let digits = name.strip_prefix("out")?.strip_suffix(".wav")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn scan_chunks(chunks_dir: &Path, after_index: i64) -> Result<Vec<ChunkFile>, WatcherError> {
    let entries = match std::fs::read_dir(chunks_dir) {
        Ok(entries) => entries,
        // A missing directory means no candidates, not an error
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut candidates = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let Some(index) = parse_chunk_index(&path) else {
            continue;
        };
        if (index as i64) <= after_index {
            continue;
        }
        candidates.push(ChunkFile { index, path });
    }

    Ok(candidates)
}

/// Find the earliest chunk past `after_index` that is judged complete.
///
/// A chunk is complete when it is not the single highest-indexed
/// candidate on disk; with fewer than two candidates there is no way to
/// tell, so this returns `None` rather than guessing. Use
/// [`find_next_chunk`] at shutdown when capture has definitively stopped.
pub fn find_next_completed_chunk(
    chunks_dir: &Path,
    after_index: i64,
) -> Result<Option<ChunkFile>, WatcherError> {
    let candidates = scan_chunks(chunks_dir, after_index)?;

    if candidates.len() < 2 {
        return Ok(None);
    }

    let newest = candidates.iter().map(|c| c.index).max().unwrap_or(0);

    Ok(candidates
        .into_iter()
        .filter(|c| c.index != newest)
        .min_by_key(|c| c.index))
}

/// Drain mode: the lowest-indexed unprocessed chunk, newest included.
pub fn find_next_chunk(
    chunks_dir: &Path,
    after_index: i64,
) -> Result<Option<ChunkFile>, WatcherError> {
    let candidates = scan_chunks(chunks_dir, after_index)?;
    Ok(candidates.into_iter().min_by_key(|c| c.index))
}

/// Highest chunk index present in the directory, or -1 when empty.
pub fn max_chunk_index(chunks_dir: &Path) -> Result<i64, WatcherError> {
    let candidates = scan_chunks(chunks_dir, -1)?;
    Ok(candidates
        .iter()
        .map(|c| c.index as i64)
        .max()
        .unwrap_or(-1))
}

type FileSignature = (u64, Option<SystemTime>);

fn stat_signature(path: &Path) -> std::io::Result<Option<FileSignature>> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(Some((meta.len(), meta.modified().ok()))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Poll a file's size/mtime until they hold still for the quiet period.
///
/// Guards against the completeness heuristic being briefly wrong (e.g.
/// filesystem flush delay). A file that never settles within the budget
/// surfaces as [`WatcherError::StabilityTimeout`], which the pipeline
/// treats as retryable.
pub async fn wait_for_file_stable(
    path: &Path,
    config: &StabilityConfig,
) -> Result<(), WatcherError> {
    let start = Instant::now();
    let mut last_change = start;
    let mut last_sig: Option<FileSignature> = None;

    loop {
        let now = Instant::now();
        if now.duration_since(start) > config.timeout {
            return Err(WatcherError::StabilityTimeout(path.to_path_buf()));
        }

        match stat_signature(path)? {
            None => {
                // File vanished (or not yet visible): reset and keep waiting
                last_sig = None;
                last_change = now;
            }
            Some(sig) => {
                if last_sig.as_ref() != Some(&sig) {
                    last_sig = Some(sig);
                    last_change = now;
                } else if now.duration_since(last_change) >= config.stable_for {
                    return Ok(());
                }
            }
        }

        sleep(config.poll_interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"x").unwrap();
    }

    #[test]
    fn test_parse_chunk_index() {
        assert_eq!(parse_chunk_index(Path::new("out00003.wav")), Some(3));
        assert_eq!(parse_chunk_index(Path::new("out0.wav")), Some(0));
        assert_eq!(parse_chunk_index(Path::new("out.wav")), None);
        assert_eq!(parse_chunk_index(Path::new("outabc.wav")), None);
        assert_eq!(parse_chunk_index(Path::new("segment1.wav")), None);
        assert_eq!(parse_chunk_index(Path::new("out00001.mp3")), None);
    }

    #[test]
    fn test_completed_skips_newest() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "out00000.wav");
        touch(temp.path(), "out00001.wav");
        touch(temp.path(), "out00002.wav");

        let chunk = find_next_completed_chunk(temp.path(), -1).unwrap().unwrap();
        assert_eq!(chunk.index, 0);

        // After processing 0 and 1, only the newest remains: nothing to do
        let chunk = find_next_completed_chunk(temp.path(), 1).unwrap();
        assert!(chunk.is_none());
    }

    #[test]
    fn test_completed_needs_two_candidates() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "out00000.wav");

        assert!(find_next_completed_chunk(temp.path(), -1).unwrap().is_none());
    }

    #[test]
    fn test_drain_returns_newest_too() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "out00005.wav");

        let chunk = find_next_chunk(temp.path(), -1).unwrap().unwrap();
        assert_eq!(chunk.index, 5);

        assert!(find_next_chunk(temp.path(), 5).unwrap().is_none());
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nope");

        assert!(find_next_completed_chunk(&missing, -1).unwrap().is_none());
        assert!(find_next_chunk(&missing, -1).unwrap().is_none());
        assert_eq!(max_chunk_index(&missing).unwrap(), -1);
    }

    #[test]
    fn test_foreign_files_ignored() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "notes.txt");
        touch(temp.path(), "out00000.wav");
        touch(temp.path(), "out00001.wav");
        touch(temp.path(), "outfinal.wav");

        let chunk = find_next_completed_chunk(temp.path(), -1).unwrap().unwrap();
        assert_eq!(chunk.index, 0);
        assert_eq!(max_chunk_index(temp.path()).unwrap(), 1);
    }

    #[test]
    fn test_gap_in_indices_does_not_block() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "out00000.wav");
        touch(temp.path(), "out00003.wav");
        touch(temp.path(), "out00004.wav");

        let chunk = find_next_completed_chunk(temp.path(), 0).unwrap().unwrap();
        assert_eq!(chunk.index, 3);
    }

    #[tokio::test]
    async fn test_stable_file_passes() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("out00000.wav");
        std::fs::write(&path, b"audio").unwrap();

        let config = StabilityConfig {
            stable_for: Duration::from_millis(50),
            poll_interval: Duration::from_millis(10),
            timeout: Duration::from_secs(2),
        };

        wait_for_file_stable(&path, &config).await.unwrap();
    }

    #[tokio::test]
    async fn test_growing_file_times_out() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("out00000.wav");
        std::fs::write(&path, b"a").unwrap();

        let writer_path = path.clone();
        let writer = tokio::spawn(async move {
            let mut contents = Vec::new();
            for _ in 0..60 {
                contents.push(b'a');
                let _ = std::fs::write(&writer_path, &contents);
                sleep(Duration::from_millis(20)).await;
            }
        });

        let config = StabilityConfig {
            stable_for: Duration::from_millis(200),
            poll_interval: Duration::from_millis(20),
            timeout: Duration::from_millis(400),
        };

        let result = wait_for_file_stable(&path, &config).await;
        writer.abort();

        assert!(matches!(result, Err(WatcherError::StabilityTimeout(_))));
    }
}
