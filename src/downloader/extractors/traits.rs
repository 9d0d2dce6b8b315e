// InfoExtractor trait and common types

use async_trait::async_trait;
use std::path::PathBuf;

use crate::downloader::config::{PipelineConfig, DEFAULT_USER_AGENT};
use crate::downloader::errors::PipelineError;
use crate::downloader::models::VideoMetadata;

/// Per-call extraction settings
#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    /// SOCKS/HTTP proxy the extractor should route through
    pub proxy: Option<String>,
    pub timeout_seconds: u64,
    pub user_agent: String,
    /// Transcoder location handed to the extractor
    pub ffmpeg_location: Option<PathBuf>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            timeout_seconds: 60,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            ffmpeg_location: None,
        }
    }
}

impl ExtractorConfig {
    pub fn from_pipeline(config: &PipelineConfig) -> Self {
        Self {
            proxy: None,
            timeout_seconds: config.extraction_timeout_secs,
            user_agent: config.user_agent.clone(),
            ffmpeg_location: None,
        }
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_ffmpeg_location(mut self, path: Option<PathBuf>) -> Self {
        self.ffmpeg_location = path;
        self
    }
}

/// One parsed extractor document
#[derive(Debug, Clone)]
pub struct ExtractionDocument {
    pub metadata: VideoMetadata,
    /// Raw `formats` entries, validated later by the normalizer
    pub formats: Vec<serde_json::Value>,
}

/// Source of stream descriptors for a media URL
#[async_trait]
pub trait InfoExtractor: Send + Sync {
    /// Name of the extractor (for logging)
    fn name(&self) -> &'static str;

    async fn extract(
        &self,
        url: &str,
        config: &ExtractorConfig,
    ) -> Result<ExtractionDocument, PipelineError>;
}
