//! Pipeline task vocabulary.
//!
//! Each task is a closed variant with its own strongly typed options, so
//! the dispatch table in the worker can match exhaustively instead of
//! shape-checking an untyped options bag at runtime.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Download quality selection, mapped to a yt-dlp format string by the
/// downloader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    /// Best available video+audio
    #[default]
    Best,
    /// Up to 2160p
    P2160,
    /// Up to 1080p
    P1080,
    /// Up to 720p
    P720,
    /// Up to 480p
    P480,
}

impl Quality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quality::Best => "best",
            Quality::P2160 => "2160p",
            Quality::P1080 => "1080p",
            Quality::P720 => "720p",
            Quality::P480 => "480p",
        }
    }

    /// Parse a user-supplied quality string. Accepts both the serialized
    /// tags and the common height spellings, so CLI flags and environment
    /// variables share one vocabulary.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "best" => Some(Quality::Best),
            "p2160" | "2160p" | "4k" => Some(Quality::P2160),
            "p1080" | "1080p" => Some(Quality::P1080),
            "p720" | "720p" => Some(Quality::P720),
            "p480" | "480p" => Some(Quality::P480),
            _ => None,
        }
    }
}

/// Whisper model size for transcription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptionModel {
    Tiny,
    #[default]
    Base,
    Small,
    Medium,
    Large,
}

impl TranscriptionModel {
    /// Model name as the whisper CLI expects it.
    pub fn as_str(&self) -> &'static str {
        match self {
            TranscriptionModel::Tiny => "tiny",
            TranscriptionModel::Base => "base",
            TranscriptionModel::Small => "small",
            TranscriptionModel::Medium => "medium",
            TranscriptionModel::Large => "large",
        }
    }
}

/// AI backend used for transcript analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisProvider {
    /// Local Ollama instance (`/api/generate`)
    #[default]
    Ollama,
    /// Any OpenAI-compatible chat-completions endpoint
    OpenAi,
}

impl AnalysisProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisProvider::Ollama => "ollama",
            AnalysisProvider::OpenAi => "openai",
        }
    }
}

/// One step of a job's pipeline.
///
/// Tasks are defined when the job is created and never mutated afterward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TaskKind {
    /// Probe video metadata (title, uploader, duration, thumbnail)
    GetInfo,
    /// Download the source video
    Download {
        #[serde(default)]
        quality: Quality,
        /// Browser to borrow cookies from (`--cookies-from-browser`)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        browser: Option<String>,
    },
    /// Import the downloaded file into the local library
    Import,
    /// Re-encode to a clean 16:9 frame
    FixAspectRatio,
    /// Two-pass loudness normalization
    NormalizeAudio,
    /// Combined processing pass
    ProcessVideo {
        #[serde(default = "default_true")]
        fix_aspect: bool,
        #[serde(default = "default_true")]
        normalize_audio: bool,
    },
    /// Speech-to-text over the working file
    Transcribe {
        #[serde(default)]
        model: TranscriptionModel,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
    },
    /// AI analysis over the transcript
    Analyze {
        #[serde(default)]
        provider: AnalysisProvider,
        model: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_key: Option<String>,
    },
}

fn default_true() -> bool {
    true
}

impl TaskKind {
    /// The kebab-case tag, used in phase strings and progress events.
    pub fn label(&self) -> &'static str {
        match self {
            TaskKind::GetInfo => "get-info",
            TaskKind::Download { .. } => "download",
            TaskKind::Import => "import",
            TaskKind::FixAspectRatio => "fix-aspect-ratio",
            TaskKind::NormalizeAudio => "normalize-audio",
            TaskKind::ProcessVideo { .. } => "process-video",
            TaskKind::Transcribe { .. } => "transcribe",
            TaskKind::Analyze { .. } => "analyze",
        }
    }

    /// Tasks that read `job.url` rather than the shared context.
    pub fn requires_url(&self) -> bool {
        matches!(self, TaskKind::GetInfo | TaskKind::Download { .. })
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}
