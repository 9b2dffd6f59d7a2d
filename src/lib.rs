//! livecoach - Live meeting transcription and coaching pipeline
//!
//! Tails an audio capture process that writes fixed-duration WAV chunks,
//! transcribes each completed chunk, maintains a rolling summary, and
//! raises rate-limited coaching alerts against a meeting-prep context.
//!
//! # Architecture
//!
//! The pipeline is built around a durable per-session ledger:
//! - Two watermarks record processing and summarization progress
//! - Every state change is persisted before the watermark advances
//! - A crashed session resumes exactly where it left off
//!
//! # Modules
//!
//! - `ingest`: chunk discovery, stability checking, capture process
//! - `core`: session ledger, event bus, coaching engine, processing loop
//! - `adapters`: Gemini-backed transcription, summarization, coaching
//! - `domain`: data structures (transcripts, alerts, meeting prep)
//! - `cli`: command-line interface
//!
//! # Usage
//!
//! ```bash
//! # List capture devices
//! livecoach devices
//!
//! # Record a session, mixing mic and loopback audio
//! livecoach run --device 0,1 --prep meeting.json
//!
//! # Resume an interrupted session
//! livecoach run --session 2026-08-23_141502
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod ingest;
