//! Chunk ingestion: discovery of capture output and the capture process
//! boundary itself.

pub mod capture;
pub mod watcher;

pub use capture::{CaptureConfig, CaptureDevice, CaptureHandle, DeviceKind};
pub use watcher::{
    find_next_chunk, find_next_completed_chunk, max_chunk_index, parse_chunk_index,
    wait_for_file_stable, ChunkFile, StabilityConfig, WatcherError,
};
