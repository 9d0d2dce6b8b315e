// Normalizer - raw extractor format entries into canonical descriptors

use serde_json::Value;

use super::errors::{PipelineError, PipelineResult};
use super::models::{Descriptor, RawDescriptor};
use super::utils::format_size;

/// Format notes the extractor uses for non-media or untyped entries
const SENTINEL_NOTES: &[&str] = &["storyboard", "Default"];

/// Normalize one `formats` entry.
///
/// `Ok(None)` means the entry is a sentinel and is dropped silently.
pub fn normalize_descriptor(index: usize, entry: &Value) -> PipelineResult<Option<Descriptor>> {
    if !entry.is_object() {
        return Err(PipelineError::MalformedDescriptor(format!(
            "entry {} is not an object",
            index
        )));
    }

    let raw: RawDescriptor = serde_json::from_value(entry.clone())
        .map_err(|e| PipelineError::MalformedDescriptor(format!("entry {}: {}", index, e)))?;

    if raw.format_id.is_none() && raw.url.is_none() {
        return Err(PipelineError::MalformedDescriptor(format!(
            "entry {} has neither format_id nor url",
            index
        )));
    }

    if let Some(note) = raw.format_note.as_deref() {
        if SENTINEL_NOTES.contains(&note) {
            return Ok(None);
        }
    }

    Ok(Some(from_raw(index, raw)))
}

fn from_raw(index: usize, raw: RawDescriptor) -> Descriptor {
    let resolution = raw.resolution.unwrap_or_else(|| match (raw.width, raw.height) {
        (Some(w), Some(h)) => format!("{}x{}", w, h),
        _ => "audio only".to_string(),
    });

    Descriptor {
        index,
        format_id: raw.format_id.unwrap_or_default(),
        format_note: raw.format_note.unwrap_or_default(),
        format: raw.format.unwrap_or_default(),
        protocol: raw.protocol.unwrap_or_else(|| "https".to_string()),
        ext: raw.ext.unwrap_or_default(),
        resolution,
        video_codec: raw.vcodec.unwrap_or_else(|| "none".to_string()),
        audio_codec: raw.acodec.unwrap_or_else(|| "none".to_string()),
        bitrate_total: raw.tbr,
        bitrate_video: raw.vbr,
        bitrate_audio: raw.abr,
        file_size_label: raw.filesize.map(format_size),
        file_size_bytes: raw.filesize,
        width: raw.width,
        height: raw.height,
        fps: raw.fps,
        dynamic_range: raw.dynamic_range,
        url: raw.url.unwrap_or_default(),
        manifest_url: raw.manifest_url,
    }
}

/// Normalize a whole `formats` array, keeping extraction order.
///
/// Malformed entries are logged and skipped; one bad entry does not sink the
/// rest of the listing.
pub fn normalize_all(entries: &[Value]) -> Vec<Descriptor> {
    let mut descriptors = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        match normalize_descriptor(index, entry) {
            Ok(Some(descriptor)) => descriptors.push(descriptor),
            Ok(None) => {}
            Err(e) => tracing::warn!(target: "transcoder::normalize", index, error = %e, "skipping descriptor"),
        }
    }
    tracing::debug!(
        target: "transcoder::normalize",
        received = entries.len(),
        kept = descriptors.len(),
        "normalized formats"
    );
    descriptors
}
