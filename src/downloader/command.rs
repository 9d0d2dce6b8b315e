// Command builder - assembles the transcoder invocation
//
// Pure assembly: nothing here touches the filesystem or spawns anything.

use serde::Serialize;
use std::path::{Path, PathBuf};

use super::format_selector::{Role, Selection};
use super::models::{Container, MediaKind, OutputMode, Tier};
use super::utils::sanitize_title;

/// Audio filter names and their filter-graph expressions
const AUDIO_FILTERS: &[(&str, &str)] = &[
    ("bassboost", "bass=g=10,dynaudnorm=f=150"),
    ("echo", "aecho=0.8:0.9:1000:0.3"),
    ("flanger", "flanger"),
    ("nightcore", "aresample=48000,asetrate=48000*1.25"),
    ("panning", "apulsator=hz=0.08"),
    ("phaser", "aphaser=in_gain=0.4"),
    ("reverse", "areverse"),
    ("slow", "atempo=0.8"),
    ("speed", "atempo=2"),
    ("subboost", "asubboost"),
    ("superslow", "atempo=0.5"),
    ("superspeed", "atempo=3"),
    ("surround", "surround"),
    ("vaporwave", "aresample=48000,asetrate=48000*0.8"),
    ("vibrato", "vibrato=f=6.5"),
];

/// Video filter names and their filter-graph expressions
const VIDEO_FILTERS: &[(&str, &str)] = &[
    ("grayscale", "colorchannelmixer=.3:.4:.3:0:.3:.4:.3:0:.3:.4:.3"),
    ("invert", "negate"),
    ("rotate90", "rotate=PI/2"),
    ("rotate180", "rotate=PI"),
    ("rotate270", "rotate=3*PI/2"),
    ("flipHorizontal", "hflip"),
    ("flipVertical", "vflip"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FilterTarget {
    Audio,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Filter {
    pub name: String,
    pub expression: &'static str,
    pub target: FilterTarget,
}

/// Look a filter name up for the given media kind.
///
/// Unknown names and filters for a stream the output does not carry are a
/// no-op (`None`).
pub fn resolve_filter(kind: MediaKind, name: Option<&str>) -> Option<Filter> {
    let name = name?.trim();
    if name.is_empty() {
        return None;
    }

    let lookup = |table: &[(&str, &'static str)]| {
        table
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, expr)| *expr)
    };

    let found = match kind {
        MediaKind::Audio => lookup(AUDIO_FILTERS).map(|e| (e, FilterTarget::Audio)),
        MediaKind::Video => lookup(VIDEO_FILTERS).map(|e| (e, FilterTarget::Video)),
        MediaKind::AudioVideo => lookup(AUDIO_FILTERS)
            .map(|e| (e, FilterTarget::Audio))
            .or_else(|| lookup(VIDEO_FILTERS).map(|e| (e, FilterTarget::Video))),
    };

    match found {
        Some((expression, target)) => Some(Filter {
            name: name.to_string(),
            expression,
            target,
        }),
        None => {
            tracing::warn!(target: "transcoder::command", filter = name, kind = %kind, "ignoring unknown filter");
            None
        }
    }
}

/// Output filename: `<prefix>_<Kind><Tier>_[<quality>_][<filter>_]<title>.<ext>`
pub fn output_filename(
    prefix: &str,
    kind: MediaKind,
    tier: &Tier,
    quality: Option<&str>,
    filter: Option<&Filter>,
    title: &str,
    container: Container,
) -> String {
    let mut name = format!("{}_{}{}_", prefix, kind, tier.label());
    if let Some(q) = quality {
        name.push_str(q);
        name.push('_');
    }
    if let Some(f) = filter {
        name.push_str(&f.name);
        name.push('_');
    }
    name.push_str(&sanitize_title(title));
    name.push('.');
    name.push_str(container.extension());
    name
}

/// Inputs for one build
pub struct CommandSpec<'a> {
    pub program: &'a Path,
    pub media_kind: MediaKind,
    pub tier: &'a Tier,
    pub selection: &'a Selection,
    pub filter: Option<&'a str>,
    pub container: Container,
    pub output_mode: OutputMode,
    pub output_dir: &'a Path,
    pub filename_prefix: &'a str,
    pub title: &'a str,
    /// Client IP forwarded to the media host
    pub ip_address: Option<&'a str>,
}

/// A fully assembled transcoder invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscodeCommand {
    pub program: String,
    pub args: Vec<String>,
    pub filename: String,
    /// Destination file; `None` when the output goes to stdout
    pub output_path: Option<PathBuf>,
    pub filter: Option<Filter>,
}

impl TranscodeCommand {
    pub fn is_stream(&self) -> bool {
        self.output_path.is_none()
    }

    /// The exact command line, for the `start` event
    pub fn invocation(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(quote)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn quote(arg: &str) -> String {
    if !arg.is_empty() && !arg.chars().any(|c| c.is_whitespace() || c == '"' || c == '\'') {
        return arg.to_string();
    }
    format!("\"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\"").replace('\r', "\\r").replace('\n', "\\n"))
}

pub struct CommandBuilder;

impl CommandBuilder {
    pub fn build(spec: &CommandSpec<'_>) -> TranscodeCommand {
        let filter = resolve_filter(spec.media_kind, spec.filter);
        let filename = output_filename(
            spec.filename_prefix,
            spec.media_kind,
            spec.tier,
            spec.selection.quality.as_deref(),
            filter.as_ref(),
            spec.title,
            spec.container,
        );

        let mut args: Vec<String> = vec!["-hide_banner".into(), "-y".into()];

        for candidate in &spec.selection.candidates {
            if let Some(ip) = spec.ip_address {
                args.push("-headers".into());
                args.push(format!("X-Forwarded-For: {}\r\n", ip));
            }
            args.push("-i".into());
            args.push(candidate.input_url.clone());
        }

        for (input, candidate) in spec.selection.candidates.iter().enumerate() {
            let stream = match candidate.role {
                Role::Video => "v",
                Role::Audio => "a",
            };
            args.push("-map".into());
            args.push(format!("{}:{}:0", input, stream));
        }

        if let Some(video) = spec.selection.get(Role::Video) {
            let filtered = Self::push_filter(&mut args, filter.as_ref(), FilterTarget::Video);
            let copy = !filtered && spec.container.accepts_codec(&video.descriptor.video_codec);
            let codec = if copy { "copy" } else { spec.container.video_encoder() };
            args.push("-c:v".into());
            args.push(codec.into());
        }

        if let Some(audio) = spec.selection.get(Role::Audio) {
            let filtered = Self::push_filter(&mut args, filter.as_ref(), FilterTarget::Audio);
            let copy = !filtered && spec.container.accepts_codec(&audio.descriptor.audio_codec);
            let codec = if copy { "copy" } else { spec.container.audio_encoder() };
            args.push("-c:a".into());
            args.push(codec.into());
        }

        args.push("-f".into());
        args.push(spec.container.muxer().into());

        let output_path = match spec.output_mode {
            OutputMode::Stream => {
                args.push("pipe:1".into());
                None
            }
            OutputMode::Persist | OutputMode::MetadataOnly => {
                let path = spec.output_dir.join(&filename);
                args.push(path.to_string_lossy().to_string());
                Some(path)
            }
        };

        let command = TranscodeCommand {
            program: spec.program.to_string_lossy().to_string(),
            args,
            filename,
            output_path,
            filter,
        };
        tracing::debug!(target: "transcoder::command", invocation = %command.invocation(), "built command");
        command
    }

    /// Adds `-af`/`-vf` when the filter targets this stream
    fn push_filter(args: &mut Vec<String>, filter: Option<&Filter>, target: FilterTarget) -> bool {
        match filter {
            Some(f) if f.target == target => {
                args.push(match target {
                    FilterTarget::Audio => "-af".into(),
                    FilterTarget::Video => "-vf".into(),
                });
                args.push(f.expression.to_string());
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::format_selector::Candidate;
    use crate::downloader::models::Descriptor;

    fn descriptor(vcodec: &str, acodec: &str, url: &str) -> Descriptor {
        Descriptor {
            index: 0,
            format_id: "1".into(),
            format_note: "720p".into(),
            format: String::new(),
            protocol: "https".into(),
            ext: "webm".into(),
            resolution: "1280x720".into(),
            video_codec: vcodec.into(),
            audio_codec: acodec.into(),
            bitrate_total: None,
            bitrate_video: None,
            bitrate_audio: None,
            file_size_bytes: None,
            file_size_label: None,
            width: None,
            height: None,
            fps: None,
            dynamic_range: None,
            url: url.into(),
            manifest_url: None,
        }
    }

    fn selection(quality: Option<&str>) -> Selection {
        Selection {
            candidates: vec![
                Candidate {
                    role: Role::Video,
                    descriptor: descriptor("vp9", "none", "https://media.example/v"),
                    input_url: "https://media.example/v".into(),
                },
                Candidate {
                    role: Role::Audio,
                    descriptor: descriptor("none", "opus", "https://media.example/a"),
                    input_url: "https://media.example/a".into(),
                },
            ],
            quality: quality.map(str::to_string),
        }
    }

    fn command_spec<'a>(sel: &'a Selection, tier: &'a Tier, filter: Option<&'a str>, mode: OutputMode) -> CommandSpec<'a> {
        CommandSpec {
            program: Path::new("ffmpeg"),
            media_kind: MediaKind::AudioVideo,
            tier,
            selection: sel,
            filter,
            container: Container::Mkv,
            output_mode: mode,
            output_dir: Path::new("/tmp/out"),
            filename_prefix: "yt-dlx",
            title: "My Clip: Live!",
            ip_address: Some("203.0.113.7"),
        }
    }

    #[test]
    fn test_filter_lookup() {
        let f = resolve_filter(MediaKind::Audio, Some("nightcore")).unwrap();
        assert_eq!(f.expression, "aresample=48000,asetrate=48000*1.25");
        assert_eq!(f.target, FilterTarget::Audio);
        assert_eq!(
            resolve_filter(MediaKind::Video, Some("rotate90")).unwrap().expression,
            "rotate=PI/2"
        );
        assert!(resolve_filter(MediaKind::Audio, Some("grayscale")).is_none());
        assert!(resolve_filter(MediaKind::Video, Some("wobble")).is_none());
        assert!(resolve_filter(MediaKind::Video, None).is_none());
    }

    #[test]
    fn test_filename_shape() {
        let tier = Tier::Custom("720p".into());
        let filter = resolve_filter(MediaKind::Video, Some("grayscale"));
        let name = output_filename(
            "yt-dlx",
            MediaKind::AudioVideo,
            &tier,
            Some("720p"),
            filter.as_ref(),
            "My Clip: Live!",
            Container::Mkv,
        );
        assert_eq!(name, "yt-dlx_AudioVideoCustom_720p_grayscale_My_Clip_Live_.mkv");

        let plain = output_filename("yt-dlx", MediaKind::Audio, &Tier::Highest, None, None, "t", Container::Mka);
        assert_eq!(plain, "yt-dlx_AudioHighest_t.mka");
    }

    #[test]
    fn test_header_precedes_each_input() {
        let sel = selection(Some("720p"));
        let tier = Tier::Custom("720p".into());
        let cmd = CommandBuilder::build(&command_spec(&sel, &tier, None, OutputMode::Persist));

        let inputs: Vec<usize> = cmd.args.iter().enumerate().filter(|(_, a)| *a == "-i").map(|(i, _)| i).collect();
        assert_eq!(inputs.len(), 2);
        for i in inputs {
            assert_eq!(cmd.args[i - 2], "-headers");
            assert_eq!(cmd.args[i - 1], "X-Forwarded-For: 203.0.113.7\r\n");
        }
    }

    #[test]
    fn test_copy_without_filter() {
        let sel = selection(None);
        let cmd = CommandBuilder::build(&command_spec(&sel, &Tier::Highest, None, OutputMode::Persist));
        let joined = cmd.args.join(" ");
        assert!(joined.contains("-map 0:v:0 -map 1:a:0"));
        assert!(joined.contains("-c:v copy"));
        assert!(joined.contains("-c:a copy"));
        assert!(joined.ends_with("-f matroska /tmp/out/yt-dlx_AudioVideoHighest_My_Clip_Live_.mkv"));
        assert_eq!(cmd.output_path, Some(PathBuf::from("/tmp/out/yt-dlx_AudioVideoHighest_My_Clip_Live_.mkv")));
    }

    #[test]
    fn test_filter_forces_reencode_of_its_stream() {
        let sel = selection(None);
        let cmd = CommandBuilder::build(&command_spec(&sel, &Tier::Highest, Some("echo"), OutputMode::Persist));
        let joined = cmd.args.join(" ");
        assert!(joined.contains("-af aecho=0.8:0.9:1000:0.3 -c:a libopus"));
        assert!(joined.contains("-c:v copy"));
        assert!(cmd.filename.contains("_echo_"));
    }

    #[test]
    fn test_incompatible_container_reencodes() {
        let sel = selection(None);
        let mut s = command_spec(&sel, &Tier::Highest, None, OutputMode::Persist);
        s.container = Container::Mp4;
        let cmd = CommandBuilder::build(&s);
        let joined = cmd.args.join(" ");
        assert!(joined.contains("-c:v libx264"));
        assert!(joined.contains("-c:a aac"));
        assert!(cmd.filename.ends_with(".mp4"));
    }

    #[test]
    fn test_stream_mode_writes_to_stdout() {
        let sel = selection(None);
        let cmd = CommandBuilder::build(&command_spec(&sel, &Tier::Highest, None, OutputMode::Stream));
        assert!(cmd.is_stream());
        assert_eq!(cmd.args.last().unwrap(), "pipe:1");
    }

    #[test]
    fn test_invocation_quotes_header() {
        let sel = selection(None);
        let cmd = CommandBuilder::build(&command_spec(&sel, &Tier::Highest, None, OutputMode::Stream));
        let line = cmd.invocation();
        assert!(line.starts_with("ffmpeg -hide_banner -y -headers \"X-Forwarded-For: 203.0.113.7\\r\\n\" -i"));
    }
}
