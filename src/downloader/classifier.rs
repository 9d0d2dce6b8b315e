// Bucket classifier
//
// Splits normalized descriptors into the ten quality buckets and picks the
// best representative of each. Pure: same input in the same order always
// gives the same buckets.

use serde::Serialize;

use super::models::{BucketKey, Descriptor, QualityTier, StreamKind, VideoMetadata, Variant};

/// Marker in an audio format note for dynamic-range-compressed streams
const DRC_MARKER: &str = "DRC";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bucket {
    pub key: BucketKey,
    pub name: String,
    /// One entry per group (format note, or resolution for manifests),
    /// ordered by the group's first appearance
    pub members: Vec<Descriptor>,
    /// Index into `members`
    pub best: Option<usize>,
}

impl Bucket {
    pub fn best(&self) -> Option<&Descriptor> {
        self.best.and_then(|i| self.members.get(i))
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// All ten buckets plus the variant-agnostic best pointers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketSet {
    /// In `BucketKey::ALL` order
    pub buckets: Vec<Bucket>,
    pub audio_low_best: Option<Descriptor>,
    pub audio_high_best: Option<Descriptor>,
    pub video_low_best: Option<Descriptor>,
    pub video_high_best: Option<Descriptor>,
}

impl BucketSet {
    pub fn bucket(&self, key: BucketKey) -> Option<&Bucket> {
        key.index().and_then(|i| self.buckets.get(i))
    }

    pub fn get(&self, kind: StreamKind, tier: QualityTier, variant: Variant) -> Option<&Bucket> {
        self.bucket(BucketKey::new(kind, tier, variant))
    }
}

/// Result of one extraction and classification pass
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineOutput {
    #[serde(flatten)]
    pub buckets: BucketSet,
    /// Client IP the extraction was made from, forwarded to the transcoder
    pub ip_address: Option<String>,
    pub metadata: VideoMetadata,
}

impl EngineOutput {
    pub fn new(descriptors: &[Descriptor], metadata: VideoMetadata, ip_address: Option<String>) -> Self {
        Self {
            buckets: classify(descriptors),
            ip_address,
            metadata,
        }
    }
}

/// Whether `candidate` should replace `current` as the pick for `tier`.
///
/// A known key beats an unknown one; on a tie the incumbent (earlier in
/// extraction order) stays.
fn outranks(candidate: Option<f64>, current: Option<f64>, tier: QualityTier) -> bool {
    match (candidate, current) {
        (Some(c), Some(cur)) => match tier {
            QualityTier::Low => c < cur,
            QualityTier::High => c > cur,
        },
        (Some(_), None) => true,
        (None, _) => false,
    }
}

fn manifest_key(d: &Descriptor) -> Option<f64> {
    d.bitrate_video.or(d.bitrate_total)
}

/// Per-group extreme tracker keeping groups in first-seen order
struct Grouped<'a> {
    tier: QualityTier,
    groups: Vec<(&'a str, &'a Descriptor)>,
}

impl<'a> Grouped<'a> {
    fn new(tier: QualityTier) -> Self {
        Self {
            tier,
            groups: Vec::new(),
        }
    }

    fn offer(&mut self, group: &'a str, d: &'a Descriptor, key: fn(&Descriptor) -> Option<f64>) {
        match self.groups.iter_mut().find(|(g, _)| *g == group) {
            Some(slot) => {
                if outranks(key(d), key(slot.1), self.tier) {
                    slot.1 = d;
                }
            }
            None => self.groups.push((group, d)),
        }
    }

    fn into_bucket(self, key: BucketKey, rank: fn(&Descriptor) -> Option<f64>) -> Bucket {
        let members: Vec<Descriptor> = self.groups.into_iter().map(|(_, d)| d.clone()).collect();
        let best = pick(members.iter(), rank, self.tier);
        Bucket {
            key,
            name: key.name(),
            members,
            best,
        }
    }
}

/// Position of the extreme element, first one on ties
fn pick<'a, I>(items: I, key: fn(&Descriptor) -> Option<f64>, tier: QualityTier) -> Option<usize>
where
    I: Iterator<Item = &'a Descriptor>,
{
    let mut best: Option<(usize, Option<f64>)> = None;
    for (i, d) in items.enumerate() {
        let k = key(d);
        let replace = match best {
            None => true,
            Some((_, cur)) => outranks(k, cur, tier),
        };
        if replace {
            best = Some((i, k));
        }
    }
    best.map(|(i, _)| i)
}

fn audio_variant(d: &Descriptor) -> Variant {
    if d.format_note.contains(DRC_MARKER) {
        Variant::Drc
    } else {
        Variant::None
    }
}

fn video_variant(d: &Descriptor) -> Variant {
    let hdr_range = d
        .dynamic_range
        .as_deref()
        .map(|r| !r.eq_ignore_ascii_case("SDR"))
        .unwrap_or(false);
    if hdr_range || d.format_note.contains("HDR") {
        Variant::Hdr
    } else {
        Variant::None
    }
}

/// Partition descriptors into the ten buckets
pub fn classify(descriptors: &[Descriptor]) -> BucketSet {
    let rank: fn(&Descriptor) -> Option<f64> = Descriptor::ranking_key;

    let mut grouped: Vec<(BucketKey, Grouped)> = BucketKey::ALL
        .iter()
        .map(|k| (*k, Grouped::new(k.tier)))
        .collect();

    for d in descriptors {
        let (kind, variant) = if d.has_video() {
            (StreamKind::Video, video_variant(d))
        } else if d.has_audio() {
            (StreamKind::Audio, audio_variant(d))
        } else {
            continue;
        };

        for (key, group) in grouped.iter_mut() {
            if key.kind == kind && key.variant == variant {
                group.offer(&d.format_note, d, rank);
            }
            if key.kind == StreamKind::Manifest && d.is_manifest_backed() {
                group.offer(&d.resolution, d, manifest_key);
            }
        }
    }

    let buckets: Vec<Bucket> = grouped
        .into_iter()
        .map(|(key, group)| match key.kind {
            StreamKind::Manifest => group.into_bucket(key, manifest_key),
            StreamKind::Audio | StreamKind::Video => group.into_bucket(key, rank),
        })
        .collect();

    let audio: Vec<&Descriptor> = descriptors.iter().filter(|d| !d.has_video() && d.has_audio()).collect();
    let video: Vec<&Descriptor> = descriptors.iter().filter(|d| d.has_video()).collect();
    let best_of = |items: &[&Descriptor], tier| {
        pick(items.iter().copied(), rank, tier).map(|i| items[i].clone())
    };

    let set = BucketSet {
        audio_low_best: best_of(&audio[..], QualityTier::Low),
        audio_high_best: best_of(&audio[..], QualityTier::High),
        video_low_best: best_of(&video[..], QualityTier::Low),
        video_high_best: best_of(&video[..], QualityTier::High),
        buckets,
    };

    tracing::debug!(
        target: "transcoder::classify",
        descriptors = descriptors.len(),
        audio = audio.len(),
        video = video.len(),
        "classified formats"
    );
    set
}
