// Common data models for the transcode pipeline

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use super::errors::{PipelineError, PipelineResult};

/// Resolutions accepted for custom video requests
pub const VIDEO_RESOLUTIONS: &[&str] = &[
    "144p", "240p", "360p", "480p", "720p", "1080p", "1440p", "2160p", "3072p", "4320p", "6480p",
    "8640p", "12000p",
];

/// Named tiers accepted for custom audio requests
pub const AUDIO_TIERS: &[&str] = &["ultralow", "low", "medium", "high"];

/// What the caller wants out of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    Audio,
    Video,
    AudioVideo,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => write!(f, "Audio"),
            Self::Video => write!(f, "Video"),
            Self::AudioVideo => write!(f, "AudioVideo"),
        }
    }
}

/// Kind a descriptor is bucketed under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    Audio,
    Video,
    Manifest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QualityTier {
    Low,
    High,
}

/// Bucket variant: dynamic-range-compressed audio or high-dynamic-range video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Variant {
    None,
    Drc,
    Hdr,
}

/// Identifies one of the ten quality buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketKey {
    pub kind: StreamKind,
    pub tier: QualityTier,
    pub variant: Variant,
}

impl BucketKey {
    pub const fn new(kind: StreamKind, tier: QualityTier, variant: Variant) -> Self {
        Self { kind, tier, variant }
    }

    /// All ten buckets in listing order
    pub const ALL: [BucketKey; 10] = [
        BucketKey::new(StreamKind::Audio, QualityTier::Low, Variant::None),
        BucketKey::new(StreamKind::Audio, QualityTier::High, Variant::None),
        BucketKey::new(StreamKind::Audio, QualityTier::Low, Variant::Drc),
        BucketKey::new(StreamKind::Audio, QualityTier::High, Variant::Drc),
        BucketKey::new(StreamKind::Video, QualityTier::Low, Variant::None),
        BucketKey::new(StreamKind::Video, QualityTier::High, Variant::None),
        BucketKey::new(StreamKind::Video, QualityTier::Low, Variant::Hdr),
        BucketKey::new(StreamKind::Video, QualityTier::High, Variant::Hdr),
        BucketKey::new(StreamKind::Manifest, QualityTier::Low, Variant::None),
        BucketKey::new(StreamKind::Manifest, QualityTier::High, Variant::None),
    ];

    /// Position in `ALL`; `None` for combinations that have no bucket
    /// (DRC video, HDR audio, variant manifests)
    pub const fn index(&self) -> Option<usize> {
        let kind = match self.kind {
            StreamKind::Audio => 0,
            StreamKind::Video => 4,
            StreamKind::Manifest => 8,
        };
        let variant = match (self.kind, self.variant) {
            (_, Variant::None) => 0,
            (StreamKind::Audio, Variant::Drc) | (StreamKind::Video, Variant::Hdr) => 2,
            _ => return None,
        };
        let tier = match self.tier {
            QualityTier::Low => 0,
            QualityTier::High => 1,
        };
        Some(kind + variant + tier)
    }

    /// Bucket name as reported to callers (e.g. "AudioLowDRC")
    pub fn name(&self) -> String {
        let kind = match self.kind {
            StreamKind::Audio => "Audio",
            StreamKind::Video => "Video",
            StreamKind::Manifest => "Manifest",
        };
        let tier = match self.tier {
            QualityTier::Low => "Low",
            QualityTier::High => "High",
        };
        let variant = match self.variant {
            Variant::None => "",
            Variant::Drc => "DRC",
            Variant::Hdr => "HDR",
        };
        format!("{}{}{}", kind, tier, variant)
    }
}

/// One format entry exactly as the extractor reports it
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawDescriptor {
    pub format_id: Option<String>,
    pub format_note: Option<String>,
    pub format: Option<String>,
    pub protocol: Option<String>,
    pub ext: Option<String>,
    pub resolution: Option<String>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub tbr: Option<f64>,
    pub vbr: Option<f64>,
    pub abr: Option<f64>,
    pub filesize: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
    pub dynamic_range: Option<String>,
    pub url: Option<String>,
    pub manifest_url: Option<String>,
}

/// Canonical descriptor produced by the normalizer.
///
/// Numeric fields stay `None` when the extractor did not report them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    /// Position in the extractor's format list
    pub index: usize,
    pub format_id: String,
    pub format_note: String,
    pub format: String,
    pub protocol: String,
    pub ext: String,
    pub resolution: String,
    pub video_codec: String,
    pub audio_codec: String,
    pub bitrate_total: Option<f64>,
    pub bitrate_video: Option<f64>,
    pub bitrate_audio: Option<f64>,
    pub file_size_bytes: Option<u64>,
    /// Human readable `file_size_bytes`
    pub file_size_label: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
    pub dynamic_range: Option<String>,
    pub url: String,
    pub manifest_url: Option<String>,
}

impl Descriptor {
    pub fn has_video(&self) -> bool {
        self.video_codec != "none"
    }

    pub fn has_audio(&self) -> bool {
        self.audio_codec != "none"
    }

    /// Size in bytes, falling back to total bitrate when the size is unknown
    pub fn ranking_key(&self) -> Option<f64> {
        self.file_size_bytes.map(|s| s as f64).or(self.bitrate_total)
    }

    /// Segmented or adaptive transport (HLS / DASH)
    pub fn is_segmented(&self) -> bool {
        let p = self.protocol.to_lowercase();
        p.starts_with("m3u8") || p.contains("dash") || p.contains("f4m") || p.contains("ism")
    }

    pub fn is_manifest_backed(&self) -> bool {
        self.is_segmented() && self.manifest_url.is_some()
    }

    /// URL the transcoder should read from
    pub fn input_url(&self) -> &str {
        match (&self.manifest_url, self.is_segmented()) {
            (Some(manifest), true) => manifest,
            _ => &self.url,
        }
    }
}

/// Video metadata reported alongside the formats
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub id: String,
    pub title: String,
    pub channel: Option<String>,
    pub uploader: Option<String>,
    pub duration: Option<f64>,
    pub duration_string: Option<String>,
    pub view_count: Option<u64>,
    pub like_count: Option<u64>,
    pub comment_count: Option<u64>,
    pub upload_date: Option<time::Date>,
    pub thumbnail: Option<String>,
    pub webpage_url: Option<String>,
}

/// How the caller picks a quality
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tier {
    Highest,
    Lowest,
    /// Resolution for video ("720p") or named tier for audio ("medium")
    Custom(String),
}

impl Tier {
    pub fn label(&self) -> &str {
        match self {
            Self::Highest => "Highest",
            Self::Lowest => "Lowest",
            Self::Custom(_) => "Custom",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputMode {
    /// Write the result to a file
    #[default]
    Persist,
    /// Hand the live output pipe to the caller
    Stream,
    /// Report metadata and the planned filename only
    MetadataOnly,
}

/// Output container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Container {
    Mkv,
    Mka,
    Mp4,
    Mp3,
}

impl Container {
    pub fn default_for(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Audio => Self::Mka,
            MediaKind::Video | MediaKind::AudioVideo => Self::Mkv,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mkv => "mkv",
            Self::Mka => "mka",
            Self::Mp4 => "mp4",
            Self::Mp3 => "mp3",
        }
    }

    /// Value for ffmpeg's `-f`
    pub fn muxer(&self) -> &'static str {
        match self {
            Self::Mkv | Self::Mka => "matroska",
            Self::Mp4 => "mp4",
            Self::Mp3 => "mp3",
        }
    }

    pub fn holds_video(&self) -> bool {
        matches!(self, Self::Mkv | Self::Mp4)
    }

    /// Whether a stream of this codec can be copied in without re-encoding
    pub fn accepts_codec(&self, codec: &str) -> bool {
        let c = codec.to_lowercase();
        match self {
            Self::Mkv | Self::Mka => true,
            Self::Mp4 => ["avc1", "avc", "h264", "hev1", "hvc1", "av01", "mp4a", "aac"]
                .iter()
                .any(|p| c.starts_with(p)),
            Self::Mp3 => c.starts_with("mp3"),
        }
    }

    /// Encoder used when the video stream must be re-encoded
    pub fn video_encoder(&self) -> &'static str {
        "libx264"
    }

    /// Encoder used when the audio stream must be re-encoded
    pub fn audio_encoder(&self) -> &'static str {
        match self {
            Self::Mp3 => "libmp3lame",
            Self::Mka | Self::Mkv => "libopus",
            Self::Mp4 => "aac",
        }
    }
}

/// One caller request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeRequest {
    /// Media URL handed to the extractor
    pub query: String,
    pub media_kind: MediaKind,
    pub tier: Tier,
    pub filter: Option<String>,
    pub output_mode: OutputMode,
    /// Destination directory, persist mode only
    pub output_dir: Option<PathBuf>,
    pub container: Option<Container>,
    /// Route extraction through the anonymizing proxy
    pub anonymize: bool,
}

impl TranscodeRequest {
    pub fn new(query: impl Into<String>, media_kind: MediaKind, tier: Tier) -> Self {
        Self {
            query: query.into(),
            media_kind,
            tier,
            filter: None,
            output_mode: OutputMode::Persist,
            output_dir: None,
            container: None,
            anonymize: false,
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_output_mode(mut self, mode: OutputMode) -> Self {
        self.output_mode = mode;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn with_container(mut self, container: Container) -> Self {
        self.container = Some(container);
        self
    }

    pub fn with_anonymization(mut self, enabled: bool) -> Self {
        self.anonymize = enabled;
        self
    }

    pub fn container(&self) -> Container {
        self.container
            .unwrap_or_else(|| Container::default_for(self.media_kind))
    }

    /// Check the request shape; every problem is reported at once
    pub fn validate(&self) -> PipelineResult<()> {
        let mut problems = Vec::new();

        if self.query.trim().chars().count() < 2 {
            problems.push("query: must contain at least 2 characters".to_string());
        }

        if self.output_mode == OutputMode::MetadataOnly {
            if self.filter.is_some() {
                problems.push("filter: cannot be used when metadata is requested".to_string());
            }
            if self.output_dir.is_some() {
                problems.push("output: cannot be used when metadata is requested".to_string());
            }
        }

        if self.output_mode == OutputMode::Stream && self.output_dir.is_some() {
            problems.push("output: cannot be used together with stream".to_string());
        }

        if let Tier::Custom(wanted) = &self.tier {
            match self.media_kind {
                MediaKind::Audio if !AUDIO_TIERS.contains(&wanted.as_str()) => problems.push(format!(
                    "resolution: '{}' is not one of {}",
                    wanted,
                    AUDIO_TIERS.join(", ")
                )),
                MediaKind::Video | MediaKind::AudioVideo
                    if !VIDEO_RESOLUTIONS.contains(&wanted.as_str()) =>
                {
                    problems.push(format!(
                        "resolution: '{}' is not one of {}",
                        wanted,
                        VIDEO_RESOLUTIONS.join(", ")
                    ))
                }
                _ => {}
            }
        }

        if let Some(container) = self.container {
            if self.media_kind != MediaKind::Audio && !container.holds_video() {
                problems.push(format!(
                    "container: {} cannot hold a video stream",
                    container.extension()
                ));
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::Validation(problems))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(protocol: &str, manifest: Option<&str>) -> Descriptor {
        Descriptor {
            index: 0,
            format_id: "96".into(),
            format_note: "720p".into(),
            format: "96 - 1280x720".into(),
            protocol: protocol.into(),
            ext: "mp4".into(),
            resolution: "1280x720".into(),
            video_codec: "avc1.4d401f".into(),
            audio_codec: "none".into(),
            bitrate_total: Some(2500.0),
            bitrate_video: Some(2400.0),
            bitrate_audio: None,
            file_size_bytes: None,
            file_size_label: None,
            width: Some(1280),
            height: Some(720),
            fps: Some(30.0),
            dynamic_range: Some("SDR".into()),
            url: "https://media.example/segment.m3u8".into(),
            manifest_url: manifest.map(str::to_string),
        }
    }

    #[test]
    fn test_bucket_names() {
        let names: Vec<String> = BucketKey::ALL.iter().map(|k| k.name()).collect();
        assert_eq!(names[0], "AudioLow");
        assert_eq!(names[3], "AudioHighDRC");
        assert_eq!(names[6], "VideoLowHDR");
        assert_eq!(names[9], "ManifestHigh");
    }

    #[test]
    fn test_ranking_key_falls_back_to_bitrate() {
        let mut d = descriptor("https", None);
        assert_eq!(d.ranking_key(), Some(2500.0));
        d.file_size_bytes = Some(10);
        assert_eq!(d.ranking_key(), Some(10.0));
        d.file_size_bytes = None;
        d.bitrate_total = None;
        assert_eq!(d.ranking_key(), None);
    }

    #[test]
    fn test_manifest_input_url() {
        let direct = descriptor("https", None);
        assert_eq!(direct.input_url(), "https://media.example/segment.m3u8");
        assert!(!direct.is_manifest_backed());

        let hls = descriptor("m3u8_native", Some("https://media.example/master.m3u8"));
        assert!(hls.is_manifest_backed());
        assert_eq!(hls.input_url(), "https://media.example/master.m3u8");
    }

    #[test]
    fn test_container_codec_acceptance() {
        assert!(Container::Mkv.accepts_codec("vp9"));
        assert!(Container::Mp4.accepts_codec("avc1.64001F"));
        assert!(!Container::Mp4.accepts_codec("opus"));
        assert!(!Container::Mp3.accepts_codec("mp4a.40.2"));
    }

    #[test]
    fn test_validate_collects_all_problems() {
        let req = TranscodeRequest::new("x", MediaKind::Video, Tier::Custom("721p".into()))
            .with_output_mode(OutputMode::MetadataOnly)
            .with_filter("grayscale");

        match req.validate() {
            Err(PipelineError::Validation(problems)) => assert_eq!(problems.len(), 3),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_accepts_audio_tier() {
        let req = TranscodeRequest::new(
            "https://youtu.be/abc",
            MediaKind::Audio,
            Tier::Custom("medium".into()),
        );
        assert!(req.validate().is_ok());
        assert_eq!(req.container(), Container::Mka);
    }

    #[test]
    fn test_validate_rejects_audio_container_for_video() {
        let req = TranscodeRequest::new("https://youtu.be/abc", MediaKind::Video, Tier::Highest)
            .with_container(Container::Mp3);
        assert!(req.validate().is_err());
    }
}
