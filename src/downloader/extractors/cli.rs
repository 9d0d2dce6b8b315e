// CLI InfoExtractor - runs the yt-dlp binary and parses its JSON dump

use async_trait::async_trait;
use std::path::PathBuf;

use super::diagnostics::{diagnose_error, summarize_error};
use super::traits::{ExtractionDocument, ExtractorConfig, InfoExtractor};
use crate::downloader::errors::PipelineError;
use crate::downloader::models::VideoMetadata;
use crate::downloader::utils::run_output_with_timeout;

pub struct CliInfoExtractor {
    ytdlp_path: PathBuf,
}

impl CliInfoExtractor {
    pub fn new(ytdlp_path: impl Into<PathBuf>) -> Self {
        Self {
            ytdlp_path: ytdlp_path.into(),
        }
    }

    /// Fixed flag set: no cache, no download, geo bypass, fixed user agent
    pub fn build_args(url: &str, config: &ExtractorConfig) -> Vec<String> {
        let mut args = vec![
            "--dump-single-json".to_string(),
            "--no-cache-dir".to_string(),
            "--skip-download".to_string(),
            "--no-playlist".to_string(),
            "--no-warnings".to_string(),
            "--no-check-certificate".to_string(),
            "--prefer-insecure".to_string(),
            "--geo-bypass".to_string(),
            "--socket-timeout".to_string(),
            config.timeout_seconds.to_string(),
            "--user-agent".to_string(),
            config.user_agent.clone(),
        ];

        if let Some(proxy) = &config.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }

        if let Some(ffmpeg) = &config.ffmpeg_location {
            args.push("--ffmpeg-location".to_string());
            args.push(ffmpeg.to_string_lossy().to_string());
        }

        args.push(url.to_string());
        args
    }

    /// Parse the single-JSON dump
    pub fn parse_document(stdout: &[u8]) -> Result<ExtractionDocument, PipelineError> {
        let text = String::from_utf8_lossy(stdout);
        if text.trim().is_empty() {
            return Err(PipelineError::ExtractionFailure {
                message: "extractor produced no output".to_string(),
                hint: None,
            });
        }

        let json: serde_json::Value =
            serde_json::from_str(&text).map_err(|e| PipelineError::ExtractionFailure {
                message: format!("Invalid JSON: {}", e),
                hint: None,
            })?;

        let formats = json["formats"]
            .as_array()
            .cloned()
            .ok_or_else(|| PipelineError::ExtractionFailure {
                message: "No formats array in JSON".to_string(),
                hint: None,
            })?;

        Ok(ExtractionDocument {
            metadata: Self::parse_metadata(&json),
            formats,
        })
    }

    fn parse_metadata(json: &serde_json::Value) -> VideoMetadata {
        let text = |key: &str| json[key].as_str().map(str::to_string);
        let count = |key: &str| json[key].as_u64();

        VideoMetadata {
            id: text("id").unwrap_or_default(),
            title: text("title").unwrap_or_else(|| "Unknown".to_string()),
            channel: text("channel"),
            uploader: text("uploader"),
            duration: json["duration"].as_f64(),
            duration_string: text("duration_string"),
            view_count: count("view_count"),
            like_count: count("like_count"),
            comment_count: count("comment_count"),
            upload_date: json["upload_date"].as_str().and_then(parse_upload_date),
            thumbnail: text("thumbnail"),
            webpage_url: text("webpage_url"),
        }
    }
}

impl CliInfoExtractor {
    /// Build the failure for an unsuccessful run from its stderr
    fn failure_from_stderr(stderr: &str, status: &str, proxied: bool) -> PipelineError {
        let reason = diagnose_error(stderr);
        let summary = summarize_error(stderr);
        PipelineError::ExtractionFailure {
            message: if summary.is_empty() {
                format!("extractor exited with {}", status)
            } else {
                summary
            },
            hint: Some(reason.hint(proxied)),
        }
    }
}

/// Parse `YYYYMMDD`
pub fn parse_upload_date(raw: &str) -> Option<time::Date> {
    let format = time::format_description::parse("[year][month][day]").ok()?;
    time::Date::parse(raw.trim(), &format).ok()
}

#[async_trait]
impl InfoExtractor for CliInfoExtractor {
    fn name(&self) -> &'static str {
        "cli-yt-dlp"
    }

    async fn extract(
        &self,
        url: &str,
        config: &ExtractorConfig,
    ) -> Result<ExtractionDocument, PipelineError> {
        let program = self.ytdlp_path.to_string_lossy().to_string();
        let args = Self::build_args(url, config);
        tracing::info!(target: "transcoder::extract", url, proxied = config.proxy.is_some(), "extracting");

        let output = run_output_with_timeout(&program, &args, config.timeout_seconds)
            .await
            .map_err(|e| PipelineError::ExtractionFailure {
                message: e.to_string(),
                hint: None,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(target: "transcoder::extract", code = ?output.status.code(), "extractor failed");
            return Err(Self::failure_from_stderr(
                &stderr,
                &output.status.to_string(),
                config.proxy.is_some(),
            ));
        }

        let document = Self::parse_document(&output.stdout)?;
        tracing::debug!(
            target: "transcoder::extract",
            title = %document.metadata.title,
            formats = document.formats.len(),
            "extraction complete"
        );
        Ok(document)
    }
}
