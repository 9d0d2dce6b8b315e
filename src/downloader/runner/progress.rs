// Transcoder progress parsing
//
// ffmpeg rewrites its stats line with `\r`, so the stream is split on both
// `\r` and `\n` before parsing.

use regex::Regex;
use serde::Serialize;
use std::time::Instant;

/// Smallest percent used as the ETA divisor
const PERCENT_EPSILON: f64 = 0.01;

/// Raw fields of one stats line
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RawProgress {
    pub frame: Option<u64>,
    pub fps: Option<f64>,
    pub size: Option<String>,
    /// `time=` exactly as printed (e.g. "00:01:02.50" or "N/A")
    pub timemark: String,
    pub time_seconds: Option<f64>,
    pub bitrate: Option<String>,
    pub speed: Option<String>,
    /// Explicit percentage, when the line carries one
    pub percent: Option<f64>,
}

/// One `progress` event payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSample {
    /// Always within [0, 100]
    pub percent: f64,
    pub timemark: String,
    /// Seconds since the transcoder was started
    pub elapsed_secs: f64,
    pub eta_secs: f64,
    pub raw: RawProgress,
}

/// Parse one stats line; `None` for lines that are not progress at all
pub fn parse_line(line: &str) -> Option<RawProgress> {
    lazy_static::lazy_static! {
        static ref TIME_RE: Regex = Regex::new(r"time=\s*(\S+)").unwrap();
        static ref FRAME_RE: Regex = Regex::new(r"frame=\s*(\d+)").unwrap();
        static ref FPS_RE: Regex = Regex::new(r"fps=\s*([\d.]+)").unwrap();
        static ref SIZE_RE: Regex = Regex::new(r"size=\s*(\S+)").unwrap();
        static ref BITRATE_RE: Regex = Regex::new(r"bitrate=\s*(\S+)").unwrap();
        static ref SPEED_RE: Regex = Regex::new(r"speed=\s*(\S+)").unwrap();
        static ref PERCENT_RE: Regex = Regex::new(r"percent=\s*(\S+)").unwrap();
    }

    let timemark = capture(&TIME_RE, line)?;

    Some(RawProgress {
        frame: capture(&FRAME_RE, line).and_then(|v| v.parse().ok()),
        fps: capture(&FPS_RE, line).and_then(|v| v.parse().ok()),
        size: capture(&SIZE_RE, line),
        time_seconds: parse_timemark(&timemark),
        timemark,
        bitrate: capture(&BITRATE_RE, line),
        speed: capture(&SPEED_RE, line),
        percent: capture(&PERCENT_RE, line).and_then(|v| v.trim_end_matches('%').parse().ok()),
    })
}

fn capture(re: &Regex, line: &str) -> Option<String> {
    re.captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// `[-]HH:MM:SS.ss` into seconds
pub fn parse_timemark(mark: &str) -> Option<f64> {
    let (negative, body) = match mark.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, mark),
    };
    let mut parts = body.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    let total = hours * 3600.0 + minutes * 60.0 + seconds;
    Some(if negative { -total } else { total })
}

/// Clamp to [0, 100]; NaN becomes 0
pub fn clamp_percent(percent: f64) -> f64 {
    if percent.is_nan() {
        0.0
    } else {
        percent.clamp(0.0, 100.0)
    }
}

/// Remaining seconds, assuming the rate so far holds
pub fn estimate_eta(elapsed_secs: f64, percent: f64) -> f64 {
    let p = clamp_percent(percent);
    elapsed_secs / p.max(PERCENT_EPSILON) * (100.0 - p)
}

/// Per-invocation progress state
pub struct ProgressTracker {
    started: Instant,
    /// Media duration in seconds, when known
    duration: Option<f64>,
}

impl ProgressTracker {
    pub fn new(started: Instant, duration: Option<f64>) -> Self {
        Self { started, duration }
    }

    pub fn sample(&self, line: &str) -> Option<ProgressSample> {
        self.sample_at(line, self.started.elapsed().as_secs_f64())
    }

    fn sample_at(&self, line: &str, elapsed_secs: f64) -> Option<ProgressSample> {
        let raw = parse_line(line)?;
        let percent = match (raw.percent, raw.time_seconds, self.duration) {
            (Some(p), _, _) => p,
            (None, Some(t), Some(d)) if d > 0.0 => t / d * 100.0,
            _ => 0.0,
        };
        let percent = clamp_percent(percent);
        Some(ProgressSample {
            percent,
            timemark: raw.timemark.clone(),
            elapsed_secs,
            eta_secs: estimate_eta(elapsed_secs, percent),
            raw,
        })
    }
}

/// Splits a byte stream into lines on `\r` or `\n`
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\r' || byte == b'\n' {
                if !self.pending.is_empty() {
                    lines.push(String::from_utf8_lossy(&self.pending).to_string());
                    self.pending.clear();
                }
            } else {
                self.pending.push(byte);
            }
        }
        lines
    }

    /// Whatever is left after the stream closed
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            let line = String::from_utf8_lossy(&self.pending).to_string();
            self.pending.clear();
            Some(line)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const LINE: &str = "frame=  100 fps=25.0 q=28.0 size=    1024kB time=00:00:30.00 bitrate=1500.0kbits/s speed=1.5x";

    #[test]
    fn test_parse_stats_line() {
        let raw = parse_line(LINE).unwrap();
        assert_eq!(raw.frame, Some(100));
        assert_eq!(raw.fps, Some(25.0));
        assert_eq!(raw.size.as_deref(), Some("1024kB"));
        assert_eq!(raw.timemark, "00:00:30.00");
        assert_eq!(raw.time_seconds, Some(30.0));
        assert_eq!(raw.speed.as_deref(), Some("1.5x"));
        assert!(parse_line("Input #0, matroska,webm, from 'x':").is_none());
    }

    #[test]
    fn test_percent_from_duration() {
        let tracker = ProgressTracker::new(Instant::now(), Some(120.0));
        let sample = tracker.sample_at(LINE, 10.0).unwrap();
        assert!((sample.percent - 25.0).abs() < 1e-9);
        assert!((sample.eta_secs - 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_unparseable_time_is_zero_percent() {
        let tracker = ProgressTracker::new(Instant::now(), Some(120.0));
        let sample = tracker.sample_at("size=N/A time=N/A bitrate=N/A speed=N/A", 2.0).unwrap();
        assert_eq!(sample.percent, 0.0);
        assert!(sample.eta_secs.is_finite());
    }

    #[test]
    fn test_negative_and_overflowing_time_clamped() {
        let tracker = ProgressTracker::new(Instant::now(), Some(10.0));
        assert_eq!(tracker.sample_at("time=-00:00:00.05", 1.0).unwrap().percent, 0.0);
        assert_eq!(tracker.sample_at("time=00:00:11.00", 1.0).unwrap().percent, 100.0);
        assert_eq!(tracker.sample_at("time=00:00:11.00", 1.0).unwrap().eta_secs, 0.0);
    }

    #[test]
    fn test_unknown_duration() {
        let tracker = ProgressTracker::new(Instant::now(), None);
        assert_eq!(tracker.sample_at(LINE, 3.0).unwrap().percent, 0.0);
    }

    #[test]
    fn test_splitter_handles_carriage_returns() {
        let mut splitter = LineSplitter::default();
        let mut lines = splitter.push(b"first\nframe=1 time=00:00:01.00\rframe=2 ti");
        lines.extend(splitter.push(b"me=00:00:02.00\r\n"));
        assert_eq!(
            lines,
            vec!["first", "frame=1 time=00:00:01.00", "frame=2 time=00:00:02.00"]
        );
        assert_eq!(splitter.push(b"tail"), Vec::<String>::new());
        assert_eq!(splitter.finish().as_deref(), Some("tail"));
        assert_eq!(splitter.finish(), None);
    }

    proptest! {
        #[test]
        fn prop_percent_always_in_range(p in proptest::num::f64::ANY) {
            let clamped = clamp_percent(p);
            prop_assert!((0.0..=100.0).contains(&clamped));
        }

        #[test]
        fn prop_sample_percent_in_range(secs in -10_000i64..10_000, duration in proptest::option::of(0.0f64..5_000.0)) {
            let tracker = ProgressTracker::new(Instant::now(), duration);
            let sign = if secs < 0 { "-" } else { "" };
            let s = secs.unsigned_abs();
            let line = format!("time={}{:02}:{:02}:{:02}.00", sign, s / 3600, (s / 60) % 60, s % 60);
            let sample = tracker.sample_at(&line, 5.0).unwrap();
            prop_assert!((0.0..=100.0).contains(&sample.percent));
            prop_assert!(sample.eta_secs >= 0.0);
        }
    }
}
