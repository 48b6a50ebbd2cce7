#![deny(unreachable_patterns)]
//! External media tooling behind async Rust APIs.
//!
//! This crate wraps the binaries and services the pipeline shells out to:
//! - yt-dlp download and `-J` metadata probing
//! - FFmpeg processing (aspect-ratio fix, loudness normalization) with
//!   progress parsing from `-progress pipe:2` and cancellation
//! - the whisper CLI for transcription
//! - Ollama / OpenAI-compatible HTTP endpoints for transcript analysis
//! - the on-disk video library

pub mod analyze;
pub mod download;
pub mod error;
pub mod ffmpeg;
pub mod library;
pub mod transcribe;

pub use analyze::{AnalysisReport, HttpAnalyzer};
pub use download::{check_url, download_video, fetch_info};
pub use error::{MediaError, MediaResult};
pub use ffmpeg::{
    fix_aspect_ratio, normalize_audio, probe_video, process_video, FfmpegCommand, FfmpegProgress,
    FfmpegRunner, ProbeInfo,
};
pub use library::{Library, LibraryEntry};
pub use transcribe::transcribe;
