// Downloader module - format classification and transcode pipeline

pub mod classifier;
pub mod command;
pub mod config;
pub mod errors;
pub mod events;
pub mod extractors;
pub mod format_selector;
pub mod models;
pub mod network;
pub mod normalizer;
pub mod orchestrator;
pub mod runner;
pub mod tools;
pub mod utils;

pub use classifier::{classify, Bucket, BucketSet, EngineOutput};
pub use command::{CommandBuilder, TranscodeCommand};
pub use config::{AnonymizerConfig, PipelineConfig};
pub use errors::{PipelineError, PipelineResult};
pub use events::{Cancellation, MetadataReport, PipelineEvent, PipelineEvents};
pub use format_selector::{Candidate, FormatSelector, Role, Selection};
pub use models::{Container, Descriptor, MediaKind, OutputMode, Tier, TranscodeRequest, VideoMetadata};
pub use network::{EgressIdentity, EgressResolver, NetworkHelper};
pub use orchestrator::Orchestrator;
pub use runner::{PipelineState, ProgressSample};
