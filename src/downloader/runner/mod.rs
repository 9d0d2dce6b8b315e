// Pipeline runner - lifecycle of one transcoder invocation
//
// Idle -> Validated -> MetadataOnly
//                   -> Launching -> Running -> Completed | Failed
//
// Every failure is reported once through the event sink; nothing is retried
// here. A caller cancel while the transcoder runs kills it and ends in Failed.

mod progress;

pub use progress::{
    clamp_percent, estimate_eta, parse_line, parse_timemark, LineSplitter, ProgressSample,
    ProgressTracker, RawProgress,
};

use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::process::Stdio;
use std::time::Instant;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command as TokioCommand};

use super::command::TranscodeCommand;
use super::errors::{PipelineError, PipelineResult};
use super::events::{EventSink, MetadataReport, PipelineEvent};
use super::format_selector::Selection;

/// Stderr lines kept for the failure message
const STDERR_TAIL: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineState {
    Idle,
    Validated,
    MetadataOnly,
    Launching,
    Running,
    Completed,
    Failed,
}

impl PipelineState {
    pub fn can_transition(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Idle, Validated)
                | (Idle, Failed)
                | (Validated, MetadataOnly)
                | (Validated, Launching)
                | (Validated, Failed)
                | (Launching, Running)
                | (Launching, Failed)
                | (Running, Completed)
                | (Running, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::MetadataOnly | Self::Completed | Self::Failed)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One invocation. Owns its process and its progress state; nothing is
/// shared with other runners.
pub struct PipelineRunner {
    state: PipelineState,
    sink: EventSink,
    started: Option<Instant>,
}

impl PipelineRunner {
    pub fn new(sink: EventSink) -> Self {
        Self {
            state: PipelineState::Idle,
            sink,
            started: None,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Monotonic launch time, once the transcoder is running
    pub fn started(&self) -> Option<Instant> {
        self.started
    }

    fn transition(&mut self, next: PipelineState) -> PipelineResult<()> {
        if !self.state.can_transition(next) {
            return Err(PipelineError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        tracing::debug!(target: "transcoder::runner", id = %self.sink.id(), from = %self.state, to = %next, "transition");
        self.state = next;
        Ok(())
    }

    /// Report a failure and move to `Failed`. Terminal runners stay put.
    pub fn fail(&mut self, error: PipelineError) {
        if self.state.is_terminal() {
            tracing::warn!(target: "transcoder::runner", state = %self.state, error = %error, "failure after terminal state");
            return;
        }
        self.state = PipelineState::Failed;
        self.sink.emit(PipelineEvent::Error(error));
    }

    /// Confirm the request produced something to work with
    pub fn validate(&mut self, selection: &Selection) -> PipelineResult<()> {
        if selection.is_empty() {
            let error = PipelineError::validation("selection: no candidates to transcode");
            self.fail(error.clone());
            return Err(error);
        }
        self.transition(PipelineState::Validated)
    }

    /// Dry run: report what would be produced and stop
    pub fn finish_metadata(&mut self, report: MetadataReport) -> PipelineResult<()> {
        self.transition(PipelineState::MetadataOnly)?;
        self.sink.emit(PipelineEvent::Metadata(Box::new(report)));
        Ok(())
    }

    /// Launch the transcoder and drive it to completion.
    ///
    /// `duration` (seconds) turns `time=` marks into percentages.
    pub async fn run(&mut self, command: TranscodeCommand, duration: Option<f64>) -> PipelineState {
        if let Err(e) = self.transition(PipelineState::Launching) {
            self.fail(e);
            return self.state;
        }

        if let Some(dir) = command.output_path.as_deref().and_then(|p| p.parent()) {
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                self.fail(PipelineError::Io(format!("{}: {}", dir.display(), e)));
                return self.state;
            }
        }

        let mut cancellation = self.sink.cancellation();
        if cancellation.is_cancelled() {
            self.fail(PipelineError::Cancelled);
            return self.state;
        }

        let mut child = match Self::spawn(&command) {
            Ok(child) => child,
            Err(e) => {
                self.fail(e);
                return self.state;
            }
        };

        let started = Instant::now();
        self.started = Some(started);
        if let Err(e) = self.transition(PipelineState::Running) {
            self.fail(e);
            return self.state;
        }
        self.sink.emit(PipelineEvent::Start(command.invocation()));

        if command.is_stream() {
            match child.stdout.take() {
                Some(stdout) => self.sink.emit(PipelineEvent::Ready {
                    filename: command.filename.clone(),
                    stdout,
                }),
                None => {
                    self.kill(&mut child).await;
                    self.fail(PipelineError::Io("transcoder stdout was not captured".to_string()));
                    return self.state;
                }
            }
        }

        let tracker = ProgressTracker::new(started, duration);
        let tail = tokio::select! {
            tail = self.pump_progress(&mut child, tracker) => Some(tail),
            _ = cancellation.cancelled() => None,
        };
        let Some(tail) = tail else {
            return self.abort(&mut child).await;
        };

        let status = tokio::select! {
            status = child.wait() => Some(status),
            _ = cancellation.cancelled() => None,
        };
        let Some(status) = status else {
            return self.abort(&mut child).await;
        };
        let status = match status {
            Ok(status) => status,
            Err(e) => {
                self.fail(PipelineError::Io(format!("waiting for transcoder: {}", e)));
                return self.state;
            }
        };

        if status.success() {
            tracing::info!(
                target: "transcoder::runner",
                id = %self.sink.id(),
                filename = %command.filename,
                secs = started.elapsed().as_secs_f64(),
                "transcode complete"
            );
            if let Err(e) = self.transition(PipelineState::Completed) {
                self.fail(e);
                return self.state;
            }
            self.sink.emit(PipelineEvent::End(command.filename));
        } else {
            let message = if tail.is_empty() {
                format!("transcoder exited with {} and produced no output", status)
            } else {
                Vec::from(tail).join("\n")
            };
            self.fail(PipelineError::TranscodeRuntimeFailure {
                code: status.code(),
                message,
            });
        }
        self.state
    }

    async fn kill(&self, child: &mut Child) {
        if let Err(e) = child.kill().await {
            tracing::debug!(target: "transcoder::runner", id = %self.sink.id(), error = %e, "kill failed");
        }
    }

    async fn abort(&mut self, child: &mut Child) -> PipelineState {
        self.kill(child).await;
        tracing::info!(target: "transcoder::runner", id = %self.sink.id(), "transcode cancelled");
        self.fail(PipelineError::Cancelled);
        self.state
    }

    fn spawn(command: &TranscodeCommand) -> PipelineResult<Child> {
        tracing::debug!(target: "transcoder::runner", program = %command.program, args = ?command.args, "spawning transcoder");
        let stdout = if command.is_stream() {
            Stdio::piped()
        } else {
            Stdio::null()
        };
        TokioCommand::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PipelineError::ProcessSpawnFailure(format!("{}: {}", command.program, e)))
    }

    /// Read stderr to EOF, emitting one progress event per stats line.
    /// Returns the last non-progress lines for error reporting.
    async fn pump_progress(&self, child: &mut Child, tracker: ProgressTracker) -> VecDeque<String> {
        let mut tail = VecDeque::with_capacity(STDERR_TAIL);
        let Some(mut stderr) = child.stderr.take() else {
            return tail;
        };

        let mut splitter = LineSplitter::default();
        let mut buf = [0u8; 4096];
        loop {
            let n = match stderr.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    tracing::warn!(target: "transcoder::runner", error = %e, "stderr read failed");
                    break;
                }
            };
            for line in splitter.push(&buf[..n]) {
                self.handle_line(line, &tracker, &mut tail);
            }
        }
        if let Some(line) = splitter.finish() {
            self.handle_line(line, &tracker, &mut tail);
        }
        tail
    }

    fn handle_line(&self, line: String, tracker: &ProgressTracker, tail: &mut VecDeque<String>) {
        if let Some(sample) = tracker.sample(&line) {
            self.sink.emit(PipelineEvent::Progress(sample));
            return;
        }
        if line.trim().is_empty() {
            return;
        }
        if tail.len() == STDERR_TAIL {
            tail.pop_front();
        }
        tail.push_back(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::events::{channel, PipelineEvents};
    use crate::downloader::format_selector::{Candidate, Role};
    use crate::downloader::models::{Descriptor, VideoMetadata};
    use std::path::PathBuf;
    use std::time::Duration;

    fn sh(script: &str, output_path: Option<PathBuf>) -> TranscodeCommand {
        TranscodeCommand {
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
            filename: "yt-dlx_AudioHighest_clip.mka".into(),
            output_path,
            filter: None,
        }
    }

    fn selection() -> Selection {
        let descriptor = Descriptor {
            index: 0,
            format_id: "251".into(),
            format_note: "medium".into(),
            format: String::new(),
            protocol: "https".into(),
            ext: "webm".into(),
            resolution: "audio only".into(),
            video_codec: "none".into(),
            audio_codec: "opus".into(),
            bitrate_total: None,
            bitrate_video: None,
            bitrate_audio: None,
            file_size_bytes: None,
            file_size_label: None,
            width: None,
            height: None,
            fps: None,
            dynamic_range: None,
            url: "https://media.example/a".into(),
            manifest_url: None,
        };
        Selection {
            candidates: vec![Candidate {
                role: Role::Audio,
                input_url: descriptor.url.clone(),
                descriptor,
            }],
            quality: None,
        }
    }

    fn names(events: &[PipelineEvent]) -> Vec<&'static str> {
        events.iter().map(PipelineEvent::name).collect()
    }

    async fn drain(runner: PipelineRunner, events: PipelineEvents) -> Vec<PipelineEvent> {
        drop(runner);
        events.collect().await
    }

    #[test]
    fn test_transition_table() {
        use PipelineState::*;
        assert!(Idle.can_transition(Validated));
        assert!(Validated.can_transition(MetadataOnly));
        assert!(Running.can_transition(Failed));
        assert!(!Idle.can_transition(Running));
        assert!(!Completed.can_transition(Failed));
        assert!(!MetadataOnly.can_transition(Launching));
    }

    #[tokio::test]
    async fn test_metadata_only_emits_single_event() {
        let (sink, events) = channel();
        let mut runner = PipelineRunner::new(sink);
        runner.validate(&selection()).unwrap();
        runner
            .finish_metadata(MetadataReport {
                metadata: VideoMetadata::default(),
                ip_address: None,
                selected: selection().candidates,
                filename: "f.mka".into(),
            })
            .unwrap();
        assert_eq!(runner.state(), PipelineState::MetadataOnly);
        assert!(runner.state().is_terminal());

        let all = drain(runner, events).await;
        assert_eq!(names(&all), vec!["metadata"]);
    }

    #[tokio::test]
    async fn test_empty_selection_fails_validation() {
        let (sink, events) = channel();
        let mut runner = PipelineRunner::new(sink);
        let empty = Selection {
            candidates: Vec::new(),
            quality: None,
        };
        assert!(runner.validate(&empty).is_err());
        assert_eq!(runner.state(), PipelineState::Failed);
        assert_eq!(names(&drain(runner, events).await), vec!["error"]);
    }

    #[tokio::test]
    async fn test_run_requires_validation() {
        let (sink, events) = channel();
        let mut runner = PipelineRunner::new(sink);
        let state = runner.run(sh("exit 0", None), None).await;
        assert_eq!(state, PipelineState::Failed);
        let all = drain(runner, events).await;
        assert!(matches!(
            &all[..],
            [PipelineEvent::Error(PipelineError::InvalidTransition { .. })]
        ));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let (sink, events) = channel();
        let mut runner = PipelineRunner::new(sink);
        runner.validate(&selection()).unwrap();
        let mut command = sh("", None);
        command.program = "definitely-not-a-real-transcoder".into();
        assert_eq!(runner.run(command, None).await, PipelineState::Failed);

        let all = drain(runner, events).await;
        assert_eq!(names(&all), vec!["error"]);
        assert!(matches!(all[0], PipelineEvent::Error(PipelineError::ProcessSpawnFailure(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_code_one_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, events) = channel();
        let mut runner = PipelineRunner::new(sink);
        runner.validate(&selection()).unwrap();
        let state = runner
            .run(sh("exit 1", Some(dir.path().join("out.mka"))), Some(60.0))
            .await;
        assert_eq!(state, PipelineState::Failed);

        let all = drain(runner, events).await;
        assert_eq!(names(&all), vec!["start", "error"]);
        match &all[1] {
            PipelineEvent::Error(PipelineError::TranscodeRuntimeFailure { code, message }) => {
                assert_eq!(*code, Some(1));
                assert!(message.contains("produced no output"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failure_carries_stderr() {
        let (sink, events) = channel();
        let mut runner = PipelineRunner::new(sink);
        runner.validate(&selection()).unwrap();
        runner
            .run(sh("echo 'Server returned 403 Forbidden' >&2; exit 8", None), None)
            .await;

        let all = drain(runner, events).await;
        match all.last() {
            Some(PipelineEvent::Error(PipelineError::TranscodeRuntimeFailure { code, message })) => {
                assert_eq!(*code, Some(8));
                assert!(message.contains("403 Forbidden"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_persist_reports_progress_then_end() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("nested").join("out.mka");
        let script = "printf 'frame=1 time=00:00:30.00 speed=1x\\rframe=2 time=00:01:00.00 speed=1x\\n' >&2; exit 0";

        let (sink, events) = channel();
        let mut runner = PipelineRunner::new(sink);
        runner.validate(&selection()).unwrap();
        let state = runner.run(sh(script, Some(output)), Some(60.0)).await;
        assert_eq!(state, PipelineState::Completed);
        assert!(runner.started().is_some());
        assert!(dir.path().join("nested").is_dir());

        let all = drain(runner, events).await;
        assert_eq!(names(&all), vec!["start", "progress", "progress", "end"]);
        match (&all[1], &all[2]) {
            (PipelineEvent::Progress(a), PipelineEvent::Progress(b)) => {
                assert!((a.percent - 50.0).abs() < 1e-9);
                assert_eq!(b.percent, 100.0);
                assert_eq!(b.eta_secs, 0.0);
            }
            other => panic!("unexpected events {:?}", other),
        }
        assert!(matches!(&all[3], PipelineEvent::End(name) if name == "yt-dlx_AudioHighest_clip.mka"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stream_ready_precedes_progress() {
        let script = "printf 'time=00:00:01.00\\n' >&2; printf 'payload'; exit 0";

        let (sink, mut events) = channel();
        let mut runner = PipelineRunner::new(sink);
        runner.validate(&selection()).unwrap();
        // the runner (and its sink) must be gone before the channel closes
        let task = tokio::spawn(async move { runner.run(sh(script, None), Some(2.0)).await });

        let mut seen = Vec::new();
        let mut payload = Vec::new();
        while let Some(event) = events.next().await {
            seen.push(event.name());
            if let PipelineEvent::Ready { filename, mut stdout } = event {
                assert_eq!(filename, "yt-dlx_AudioHighest_clip.mka");
                stdout.read_to_end(&mut payload).await.unwrap();
            }
        }
        let state = task.await.unwrap();

        assert_eq!(state, PipelineState::Completed);
        assert_eq!(seen, vec!["start", "ready", "progress", "end"]);
        assert_eq!(payload, b"payload");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_kills_running_transcoder() {
        let (sink, mut events) = channel();
        let mut runner = PipelineRunner::new(sink);
        runner.validate(&selection()).unwrap();
        let task = tokio::spawn(async move { runner.run(sh("sleep 5", None), None).await });

        assert!(matches!(events.next().await, Some(PipelineEvent::Start(_))));
        let cancelled_at = Instant::now();
        events.cancel();
        let rest = events.collect().await;

        assert_eq!(task.await.unwrap(), PipelineState::Failed);
        assert!(cancelled_at.elapsed() < Duration::from_secs(4));
        assert!(matches!(&rest[..], [PipelineEvent::Error(PipelineError::Cancelled)]));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dropped_receiver_stops_transcoder() {
        let (sink, mut events) = channel();
        let mut runner = PipelineRunner::new(sink);
        runner.validate(&selection()).unwrap();
        let task = tokio::spawn(async move { runner.run(sh("sleep 5", None), None).await });

        assert!(matches!(events.next().await, Some(PipelineEvent::Start(_))));
        drop(events);

        let state = tokio::time::timeout(Duration::from_secs(4), task).await.unwrap().unwrap();
        assert_eq!(state, PipelineState::Failed);
    }

    #[tokio::test]
    async fn test_cancel_before_launch_spawns_nothing() {
        let (sink, events) = channel();
        let mut runner = PipelineRunner::new(sink);
        runner.validate(&selection()).unwrap();
        events.cancel();

        let mut command = sh("", None);
        command.program = "definitely-not-a-real-transcoder".into();
        assert_eq!(runner.run(command, None).await, PipelineState::Failed);
        assert!(matches!(
            &drain(runner, events).await[..],
            [PipelineEvent::Error(PipelineError::Cancelled)]
        ));
    }
}
