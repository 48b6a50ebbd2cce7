//! Worker configuration.

use std::path::PathBuf;

use vidq_models::Quality;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Directory for in-flight downloads and transcripts.
    pub work_dir: PathBuf,
    /// Root of the video library.
    pub library_dir: PathBuf,
    /// Default download quality when a task does not choose one.
    pub default_quality: Quality,
    /// Ollama endpoint for local analysis.
    pub ollama_url: String,
    /// OpenAI-compatible endpoint for hosted analysis.
    pub openai_url: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/tmp/vidq"),
            library_dir: PathBuf::from("/tmp/vidq/library"),
            default_quality: Quality::Best,
            ollama_url: "http://localhost:11434".to_string(),
            openai_url: "https://api.openai.com".to_string(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            work_dir: std::env::var("VIDQ_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            library_dir: std::env::var("VIDQ_LIBRARY_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.library_dir),
            default_quality: std::env::var("VIDQ_DEFAULT_QUALITY")
                .ok()
                .and_then(|s| Quality::parse(&s))
                .unwrap_or(defaults.default_quality),
            ollama_url: std::env::var("VIDQ_OLLAMA_URL").unwrap_or(defaults.ollama_url),
            openai_url: std::env::var("VIDQ_OPENAI_URL").unwrap_or(defaults.openai_url),
        }
    }
}
