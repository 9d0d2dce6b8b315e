pub mod downloader;

pub use downloader::{
    MediaKind, Orchestrator, OutputMode, PipelineConfig, PipelineError, PipelineEvent,
    PipelineEvents, Tier, TranscodeRequest,
};
