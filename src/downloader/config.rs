// Pipeline configuration
//
// Defaults work out of the box; a TOML document or environment variables
// can override any field.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use super::errors::{PipelineError, PipelineResult};

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36";

/// Anonymizing proxy settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AnonymizerConfig {
    /// Restart the proxy service before every anonymized extraction
    pub restart_service: bool,
    /// Service name handed to the service manager
    pub service_name: String,
    /// Local SOCKS endpoint (host:port)
    pub socks_endpoint: String,
    /// Endpoint returning the caller's IP as plain text
    pub ip_check_url: String,
    /// IP checks are retried this many times before giving up
    pub retries: u32,
    pub retry_delay_ms: u64,
    pub request_timeout_secs: u64,
}

impl Default for AnonymizerConfig {
    fn default() -> Self {
        Self {
            restart_service: true,
            service_name: "tor".to_string(),
            socks_endpoint: "127.0.0.1:9050".to_string(),
            ip_check_url: "https://checkip.amazonaws.com".to_string(),
            retries: 3,
            retry_delay_ms: 1000,
            request_timeout_secs: 10,
        }
    }
}

impl AnonymizerConfig {
    /// Proxy URL for HTTP clients and the extractor (remote DNS)
    pub fn proxy_url(&self) -> String {
        format!("socks5h://{}", self.socks_endpoint)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Explicit extractor binary; discovered when unset
    pub extractor_path: Option<PathBuf>,
    /// Explicit transcoder binary; discovered when unset
    pub ffmpeg_path: Option<PathBuf>,
    /// Extra directories scanned for binaries before PATH
    pub search_dirs: Vec<PathBuf>,
    pub extraction_timeout_secs: u64,
    pub user_agent: String,
    /// Prefix of every generated filename
    pub filename_prefix: String,
    /// Used when a persist request names no directory
    pub output_dir: PathBuf,
    pub anonymizer: AnonymizerConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            extractor_path: None,
            ffmpeg_path: None,
            search_dirs: Vec::new(),
            extraction_timeout_secs: 60,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            filename_prefix: "yt-dlx".to_string(),
            output_dir: dirs::download_dir().unwrap_or_else(|| PathBuf::from(".")),
            anonymizer: AnonymizerConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse a TOML document; absent keys keep their defaults
    pub fn from_toml_str(text: &str) -> PipelineResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.check()?;
        Ok(config)
    }

    /// Defaults overlaid with `YTT_*` environment variables
    pub fn from_env() -> PipelineResult<Self> {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    /// Overlay values from a variable lookup (`std::env::var` in production)
    pub fn with_env_overrides<F>(mut self, lookup: F) -> PipelineResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("YTT_EXTRACTOR") {
            self.extractor_path = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("YTT_FFMPEG") {
            self.ffmpeg_path = Some(PathBuf::from(path));
        }
        if let Some(dir) = lookup("YTT_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Some(endpoint) = lookup("YTT_SOCKS_PROXY") {
            self.anonymizer.socks_endpoint = endpoint;
        }
        self.check()?;
        Ok(self)
    }

    pub fn with_extractor_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.extractor_path = Some(path.into());
        self
    }

    pub fn with_ffmpeg_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffmpeg_path = Some(path.into());
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.extraction_timeout_secs = seconds;
        self
    }

    pub fn with_anonymizer(mut self, anonymizer: AnonymizerConfig) -> Self {
        self.anonymizer = anonymizer;
        self
    }

    fn check(&self) -> PipelineResult<()> {
        if self.extraction_timeout_secs == 0 {
            return Err(PipelineError::Config(
                "extraction_timeout_secs must be positive".to_string(),
            ));
        }
        if !self.anonymizer.socks_endpoint.contains(':') {
            return Err(PipelineError::Config(format!(
                "socks_endpoint '{}' must be host:port",
                self.anonymizer.socks_endpoint
            )));
        }
        if self.filename_prefix.is_empty() {
            return Err(PipelineError::Config("filename_prefix must not be empty".to_string()));
        }
        Ok(())
    }
}
