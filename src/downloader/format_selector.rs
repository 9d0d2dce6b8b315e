// FormatSelector - resolves a request's tier into concrete descriptors
//
// Highest/Lowest go straight to the classifier's best pointers. Custom tiers
// match a format note (or a manifest resolution) inside the high buckets.
// A miss is always NoMatchingFormat; another tier is never substituted.

use serde::Serialize;

use super::classifier::{Bucket, EngineOutput};
use super::errors::{PipelineError, PipelineResult};
use super::models::{Descriptor, MediaKind, QualityTier, StreamKind, Tier, Variant};

/// Which transcoder input a candidate feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Role {
    Audio,
    Video,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub role: Role,
    pub descriptor: Descriptor,
    /// Manifest URL for segmented streams, direct media URL otherwise
    pub input_url: String,
}

impl Candidate {
    fn new(role: Role, descriptor: &Descriptor) -> Self {
        Self {
            role,
            input_url: descriptor.input_url().to_string(),
            descriptor: descriptor.clone(),
        }
    }
}

/// Ordered candidates for one request; video (if any) comes first
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Selection {
    pub candidates: Vec<Candidate>,
    /// Custom quality label, used in the output filename
    pub quality: Option<String>,
}

impl Selection {
    pub fn get(&self, role: Role) -> Option<&Candidate> {
        self.candidates.iter().find(|c| c.role == role)
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

pub struct FormatSelector;

impl FormatSelector {
    pub fn select(kind: MediaKind, tier: &Tier, engine: &EngineOutput) -> PipelineResult<Selection> {
        let candidates = match kind {
            MediaKind::Audio => vec![Candidate::new(Role::Audio, Self::audio(tier, engine)?)],
            MediaKind::Video => vec![Candidate::new(Role::Video, Self::video(tier, engine)?)],
            MediaKind::AudioVideo => {
                let video = Self::combined_video(tier, engine)?;
                let audio = Self::combined_audio(tier, engine)?;
                vec![Candidate::new(Role::Video, video), Candidate::new(Role::Audio, audio)]
            }
        };

        let quality = match tier {
            Tier::Custom(label) => Some(label.clone()),
            Tier::Highest | Tier::Lowest => None,
        };

        for c in &candidates {
            tracing::debug!(
                target: "transcoder::select",
                role = ?c.role,
                format_id = %c.descriptor.format_id,
                note = %c.descriptor.format_note,
                manifest = c.descriptor.is_manifest_backed(),
                "selected"
            );
        }
        Ok(Selection { candidates, quality })
    }

    fn audio<'a>(tier: &Tier, engine: &'a EngineOutput) -> PipelineResult<&'a Descriptor> {
        let set = &engine.buckets;
        let found = match tier {
            Tier::Highest => set.audio_high_best.as_ref(),
            Tier::Lowest => set.audio_low_best.as_ref(),
            Tier::Custom(wanted) => {
                let plain = set.get(StreamKind::Audio, QualityTier::High, Variant::None);
                let drc = set.get(StreamKind::Audio, QualityTier::High, Variant::Drc);
                Self::match_note(plain, wanted, audio_note_matches)
                    .or_else(|| Self::match_note(drc, wanted, audio_note_matches))
            }
        };
        found.ok_or_else(|| Self::no_match(MediaKind::Audio, tier))
    }

    fn video<'a>(tier: &Tier, engine: &'a EngineOutput) -> PipelineResult<&'a Descriptor> {
        let set = &engine.buckets;
        let found = match tier {
            Tier::Highest => set.video_high_best.as_ref(),
            Tier::Lowest => set.video_low_best.as_ref(),
            Tier::Custom(wanted) => {
                let plain = set.get(StreamKind::Video, QualityTier::High, Variant::None);
                let hdr = set.get(StreamKind::Video, QualityTier::High, Variant::Hdr);
                Self::match_note(plain, wanted, video_note_matches)
                    .or_else(|| Self::match_note(hdr, wanted, video_note_matches))
            }
        };
        found.ok_or_else(|| Self::no_match(MediaKind::Video, tier))
    }

    /// Video side of a combined request: a manifest at the wanted height
    /// when one exists, a plain video stream otherwise
    fn combined_video<'a>(tier: &Tier, engine: &'a EngineOutput) -> PipelineResult<&'a Descriptor> {
        let Tier::Custom(wanted) = tier else {
            return Self::video(tier, engine)
                .map_err(|_| Self::no_match(MediaKind::AudioVideo, tier));
        };

        let manifests = engine
            .buckets
            .get(StreamKind::Manifest, QualityTier::High, Variant::None)
            .map(|b| b.members.as_slice())
            .unwrap_or_default();
        let height = wanted.trim_end_matches('p');
        manifests
            .iter()
            .find(|d| {
                d.height.map(|h| h.to_string()).as_deref() == Some(height)
                    || d.resolution.ends_with(&format!("x{}", height))
            })
            .map(Ok)
            .unwrap_or_else(|| Self::video(tier, engine))
            .map_err(|_| Self::no_match(MediaKind::AudioVideo, tier))
    }

    /// Audio side of a combined request; a custom tier names a video
    /// resolution, so the best audio is used
    fn combined_audio<'a>(tier: &Tier, engine: &'a EngineOutput) -> PipelineResult<&'a Descriptor> {
        let set = &engine.buckets;
        let found = match tier {
            Tier::Lowest => set.audio_low_best.as_ref(),
            Tier::Highest | Tier::Custom(_) => set.audio_high_best.as_ref(),
        };
        found.ok_or_else(|| Self::no_match(MediaKind::AudioVideo, tier))
    }

    /// Exact note first, then a note that names the same tier with extras
    fn match_note<'a>(
        bucket: Option<&'a Bucket>,
        wanted: &str,
        accepts: fn(&str, &str) -> bool,
    ) -> Option<&'a Descriptor> {
        let bucket = bucket?;
        bucket
            .members
            .iter()
            .find(|d| d.format_note == wanted)
            .or_else(|| bucket.members.iter().find(|d| accepts(&d.format_note, wanted)))
    }

    fn no_match(kind: MediaKind, tier: &Tier) -> PipelineError {
        let wanted = match tier {
            Tier::Custom(label) => label.clone(),
            other => other.label().to_string(),
        };
        PipelineError::NoMatchingFormat { kind, wanted }
    }
}

/// "low" matches "low" and "low, DRC" but never "ultralow"
fn audio_note_matches(note: &str, wanted: &str) -> bool {
    note.split(',').any(|token| token.trim() == wanted)
}

/// "720p" matches "720p", "720p60" and "720p HDR" but never "1720p" or "720";
/// only the first comma-separated token is considered
fn video_note_matches(note: &str, wanted: &str) -> bool {
    let head = note.split(',').next().unwrap_or_default().trim();
    match head.strip_prefix(wanted) {
        Some(rest) => rest.is_empty() || rest.starts_with(|c: char| c.is_ascii_digit() || c.is_whitespace()),
        None => false,
    }
}
