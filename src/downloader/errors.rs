// Error types for the transcode pipeline

use thiserror::Error;

use super::models::MediaKind;

/// Every failure the pipeline can report.
///
/// Cloneable so a failure can travel inside an `error` event.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    /// Caller input rejected before anything was started
    #[error("Argument validation failed: {}", .0.join(", "))]
    Validation(Vec<String>),

    /// Descriptor carries neither a format id nor a url
    #[error("Malformed descriptor: {0}")]
    MalformedDescriptor(String),

    /// Extractor exited non-zero or printed nothing
    #[error("Extraction failed: {message}")]
    ExtractionFailure {
        message: String,
        hint: Option<String>,
    },

    /// Selector found nothing for the requested tier
    #[error("No {kind} format matches '{wanted}'. Use list_formats() to inspect the available formats")]
    NoMatchingFormat { kind: MediaKind, wanted: String },

    /// Transcoder could not be started
    #[error("Failed to start transcoder: {0}")]
    ProcessSpawnFailure(String),

    /// Transcoder ran and exited unsuccessfully
    #[error("Transcoder failed{}: {message}", .code.map(|c| format!(" with exit code {}", c)).unwrap_or_default())]
    TranscodeRuntimeFailure { code: Option<i32>, message: String },

    /// Required external binary is missing
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Proxy restart or egress verification failed
    #[error("Anonymization setup failed: {0}")]
    Anonymization(String),

    /// Plain network failure outside the proxy path
    #[error("Network error: {0}")]
    Network(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Caller cancelled or dropped its event receiver while the transcoder ran
    #[error("Transcode cancelled by the caller")]
    Cancelled,

    /// Runner asked to move between states that are not connected
    #[error("Invalid pipeline transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
}

impl PipelineError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(vec![message.into()])
    }

    /// Hint to show alongside the message, if one is known
    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::ExtractionFailure { hint, .. } => hint.as_deref(),
            Self::NoMatchingFormat { .. } => Some("Inspect the full bucket listing with list_formats()"),
            Self::ToolNotFound(_) => Some("Install yt-dlp and ffmpeg or point the config at them"),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(e: reqwest::Error) -> Self {
        Self::Network(e.to_string())
    }
}

impl From<toml::de::Error> for PipelineError {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(e.to_string())
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
