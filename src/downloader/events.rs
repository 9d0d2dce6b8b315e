// Caller-facing events
//
// Every entry point hands back a `PipelineEvents` receiver at once and does
// its work in the background. Each invocation owns its own channel, so events
// are correlated by the handle that received them. The handle also carries the
// cancel switch: `cancel()` or dropping it stops a running transcoder.

use serde::Serialize;
use tokio::process::ChildStdout;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use super::classifier::EngineOutput;
use super::errors::PipelineError;
use super::format_selector::Candidate;
use super::models::VideoMetadata;
use super::runner::ProgressSample;

/// Payload of the `metadata` event in metadata-only mode
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetadataReport {
    pub metadata: VideoMetadata,
    pub ip_address: Option<String>,
    pub selected: Vec<Candidate>,
    /// Filename the transcode would have produced
    pub filename: String,
}

#[derive(Debug)]
pub enum PipelineEvent {
    /// Full bucket listing (format listing only)
    Data(Box<EngineOutput>),
    Metadata(Box<MetadataReport>),
    /// Exact transcoder command line
    Start(String),
    /// Stream mode: the live output pipe, handed over before any progress
    Ready { filename: String, stdout: ChildStdout },
    Progress(ProgressSample),
    /// Final filename
    End(String),
    Error(PipelineError),
}

impl PipelineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Data(_) => "data",
            Self::Metadata(_) => "metadata",
            Self::Start(_) => "start",
            Self::Ready { .. } => "ready",
            Self::Progress(_) => "progress",
            Self::End(_) => "end",
            Self::Error(_) => "error",
        }
    }

    /// Whether no further events follow this one
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Data(_) | Self::Metadata(_) | Self::End(_) | Self::Error(_)
        )
    }
}

/// Sending half, owned by the background task
#[derive(Debug, Clone)]
pub struct EventSink {
    id: Uuid,
    tx: mpsc::UnboundedSender<PipelineEvent>,
    cancel: watch::Receiver<bool>,
}

impl EventSink {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cancellation(&self) -> Cancellation {
        Cancellation(self.cancel.clone())
    }

    /// Deliver one event. A caller that dropped its receiver is not an error.
    pub fn emit(&self, event: PipelineEvent) {
        match &event {
            PipelineEvent::Progress(_) => {}
            PipelineEvent::Error(e) => {
                tracing::warn!(target: "transcoder::events", id = %self.id, error = %e, "error")
            }
            other => tracing::debug!(target: "transcoder::events", id = %self.id, event = other.name(), "emit"),
        }
        if self.tx.send(event).is_err() {
            tracing::debug!(target: "transcoder::events", id = %self.id, "receiver dropped");
        }
    }
}

/// Caller-side cancel signal as seen by the background task
#[derive(Debug, Clone)]
pub struct Cancellation(watch::Receiver<bool>);

impl Cancellation {
    /// Cancelled explicitly, or the caller's handle is gone
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow() || self.0.has_changed().is_err()
    }

    /// Resolves once the caller cancels or drops its handle
    pub async fn cancelled(&mut self) {
        loop {
            let cancelled = *self.0.borrow_and_update();
            if cancelled || self.0.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Receiving half returned to the caller
#[derive(Debug)]
pub struct PipelineEvents {
    id: Uuid,
    rx: mpsc::UnboundedReceiver<PipelineEvent>,
    cancel: watch::Sender<bool>,
}

impl PipelineEvents {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Ask the pipeline to stop. A running transcoder is killed and the
    /// invocation ends with a single `Cancelled` error; keep reading to see it.
    pub fn cancel(&self) {
        tracing::debug!(target: "transcoder::events", id = %self.id, "cancel requested");
        self.cancel.send_replace(true);
    }

    /// Next event; `None` once the pipeline has finished
    pub async fn next(&mut self) -> Option<PipelineEvent> {
        self.rx.recv().await
    }

    /// Drain every remaining event
    pub async fn collect(mut self) -> Vec<PipelineEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            events.push(event);
        }
        events
    }
}

/// New sink/receiver pair sharing a fresh invocation id
pub fn channel() -> (EventSink, PipelineEvents) {
    let id = Uuid::new_v4();
    let (tx, rx) = mpsc::unbounded_channel();
    let (cancel_tx, cancel_rx) = watch::channel(false);
    (
        EventSink {
            id,
            tx,
            cancel: cancel_rx,
        },
        PipelineEvents {
            id,
            rx,
            cancel: cancel_tx,
        },
    )
}
