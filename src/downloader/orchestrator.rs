// Orchestrator - one parameterised pipeline behind every entry point
//
// extraction -> normalizer -> classifier -> selector -> command -> runner
//
// `launch` and `list_formats` return their event receiver at once and do all
// the work on a background task; failures only ever arrive as `error` events.

use std::path::PathBuf;
use std::sync::Arc;

use super::classifier::EngineOutput;
use super::command::{CommandBuilder, CommandSpec};
use super::config::PipelineConfig;
use super::errors::{PipelineError, PipelineResult};
use super::events::{channel, EventSink, MetadataReport, PipelineEvent, PipelineEvents};
use super::extractors::{CliInfoExtractor, ExtractorConfig, InfoExtractor};
use super::format_selector::FormatSelector;
use super::models::{OutputMode, TranscodeRequest};
use super::network::{EgressResolver, NetworkHelper};
use super::normalizer::normalize_all;
use super::runner::PipelineRunner;
use super::tools::{ToolManager, ToolPaths, ToolType};

struct Inner {
    config: PipelineConfig,
    extractor: Box<dyn InfoExtractor>,
    resolver: Box<dyn EgressResolver>,
    ffmpeg: Option<PathBuf>,
}

#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Production wiring: yt-dlp subprocess extractor and the proxy helper.
    /// Binaries not named in the config are looked up in `search_dirs`, or
    /// through the process-wide discovery when none are configured.
    pub fn new(config: PipelineConfig) -> PipelineResult<Self> {
        let discovered;
        let tools = if config.search_dirs.is_empty() {
            ToolPaths::cached()
        } else {
            discovered = ToolManager::new(config.search_dirs.clone()).discover();
            &discovered
        };
        let extractor_path = match &config.extractor_path {
            Some(path) => path.clone(),
            None => tools.require(ToolType::YtDlp)?.to_path_buf(),
        };
        let ffmpeg = config
            .ffmpeg_path
            .clone()
            .or_else(|| tools.get(ToolType::Ffmpeg).map(|p| p.to_path_buf()));
        if ffmpeg.is_none() {
            tracing::warn!(target: "transcoder::orchestrator", "ffmpeg not found; only metadata requests will succeed");
        }

        let resolver = NetworkHelper::new(config.anonymizer.clone());
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                extractor: Box::new(CliInfoExtractor::new(extractor_path)),
                resolver: Box::new(resolver),
                ffmpeg,
            }),
        })
    }

    pub fn with_collaborators(
        config: PipelineConfig,
        extractor: Box<dyn InfoExtractor>,
        resolver: Box<dyn EgressResolver>,
    ) -> Self {
        let ffmpeg = config.ffmpeg_path.clone();
        Self {
            inner: Arc::new(Inner {
                config,
                extractor,
                resolver,
                ffmpeg,
            }),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    /// Start one request. Must be called inside a tokio runtime.
    pub fn launch(&self, request: TranscodeRequest) -> PipelineEvents {
        let (sink, events) = channel();
        tracing::info!(
            target: "transcoder::orchestrator",
            id = %sink.id(),
            query = %request.query,
            kind = %request.media_kind,
            tier = request.tier.label(),
            mode = ?request.output_mode,
            "launch"
        );

        if let Err(e) = request.validate() {
            sink.emit(PipelineEvent::Error(e));
            return events;
        }

        let this = self.clone();
        tokio::spawn(async move { this.transcode(request, sink).await });
        events
    }

    /// Emit one `data` event with every bucket, then finish
    pub fn list_formats(&self, query: impl Into<String>, anonymize: bool) -> PipelineEvents {
        let (sink, events) = channel();
        let query = query.into();
        if query.trim().chars().count() < 2 {
            sink.emit(PipelineEvent::Error(PipelineError::validation(
                "query: must contain at least 2 characters",
            )));
            return events;
        }

        let this = self.clone();
        tokio::spawn(async move {
            match this.engine(&query, anonymize).await {
                Ok(engine) => sink.emit(PipelineEvent::Data(Box::new(engine))),
                Err(e) => sink.emit(PipelineEvent::Error(e)),
            }
        });
        events
    }

    /// Pre-flight, extraction and classification for one query
    pub async fn engine(&self, query: &str, anonymize: bool) -> PipelineResult<EngineOutput> {
        let inner = &self.inner;
        let identity = inner.resolver.resolve(anonymize).await?;

        let extractor_config = ExtractorConfig::from_pipeline(&inner.config)
            .with_proxy(identity.proxy.clone())
            .with_ffmpeg_location(inner.ffmpeg.clone());
        tracing::debug!(target: "transcoder::orchestrator", extractor = inner.extractor.name(), "extracting");
        let document = inner.extractor.extract(query, &extractor_config).await?;

        let descriptors = normalize_all(&document.formats);
        Ok(EngineOutput::new(
            &descriptors,
            document.metadata,
            identity.ip_address().map(str::to_string),
        ))
    }

    async fn transcode(&self, request: TranscodeRequest, sink: EventSink) {
        let mut runner = PipelineRunner::new(sink);

        let engine = match self.engine(&request.query, request.anonymize).await {
            Ok(engine) => engine,
            Err(e) => return runner.fail(e),
        };

        let selection = match FormatSelector::select(request.media_kind, &request.tier, &engine) {
            Ok(selection) => selection,
            Err(e) => return runner.fail(e),
        };
        if runner.validate(&selection).is_err() {
            return;
        }

        let config = &self.inner.config;
        let output_dir = request
            .output_dir
            .clone()
            .unwrap_or_else(|| config.output_dir.clone());
        let program = self
            .inner
            .ffmpeg
            .clone()
            .unwrap_or_else(|| PathBuf::from(ToolType::Ffmpeg.as_str()));

        let command = CommandBuilder::build(&CommandSpec {
            program: &program,
            media_kind: request.media_kind,
            tier: &request.tier,
            selection: &selection,
            filter: request.filter.as_deref(),
            container: request.container(),
            output_mode: request.output_mode,
            output_dir: &output_dir,
            filename_prefix: &config.filename_prefix,
            title: &engine.metadata.title,
            ip_address: engine.ip_address.as_deref(),
        });

        if request.output_mode == OutputMode::MetadataOnly {
            let report = MetadataReport {
                metadata: engine.metadata,
                ip_address: engine.ip_address,
                selected: selection.candidates,
                filename: command.filename,
            };
            if let Err(e) = runner.finish_metadata(report) {
                runner.fail(e);
            }
            return;
        }

        if self.inner.ffmpeg.is_none() {
            return runner.fail(PipelineError::ToolNotFound(ToolType::Ffmpeg.as_str().to_string()));
        }

        runner.run(command, engine.metadata.duration).await;
    }
}
