// Discovery of the external binaries the pipeline drives

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Command;

use super::errors::{PipelineError, PipelineResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ToolType {
    YtDlp,
    Ffmpeg,
    Ffprobe,
}

impl ToolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolType::YtDlp => "yt-dlp",
            ToolType::Ffmpeg => "ffmpeg",
            ToolType::Ffprobe => "ffprobe",
        }
    }

    /// File names tried in each directory
    fn candidates(&self) -> Vec<String> {
        let base = self.as_str();
        let mut names = vec![base.to_string()];
        if cfg!(windows) {
            names.push(format!("{}.exe", base));
        } else if cfg!(target_os = "linux") {
            names.push(format!("{}.bin", base));
        }
        if *self == ToolType::YtDlp {
            names.push("yt-dlx".to_string());
        }
        names
    }
}

/// Resolved binary locations; treated as read-only once built
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolPaths {
    pub ytdlp: Option<PathBuf>,
    pub ffmpeg: Option<PathBuf>,
    pub ffprobe: Option<PathBuf>,
}

impl ToolPaths {
    pub fn get(&self, tool: ToolType) -> Option<&Path> {
        match tool {
            ToolType::YtDlp => self.ytdlp.as_deref(),
            ToolType::Ffmpeg => self.ffmpeg.as_deref(),
            ToolType::Ffprobe => self.ffprobe.as_deref(),
        }
    }

    pub fn require(&self, tool: ToolType) -> PipelineResult<&Path> {
        self.get(tool)
            .ok_or_else(|| PipelineError::ToolNotFound(tool.as_str().to_string()))
    }

    /// Discovery over the default locations, done once per process
    pub fn cached() -> &'static ToolPaths {
        lazy_static::lazy_static! {
            static ref DEFAULT_TOOLS: ToolPaths = ToolManager::new(Vec::new()).discover();
        }
        &DEFAULT_TOOLS
    }
}

pub struct ToolManager {
    search_dirs: Vec<PathBuf>,
}

impl ToolManager {
    /// `extra_dirs` are scanned before the common install locations
    pub fn new(extra_dirs: Vec<PathBuf>) -> Self {
        let mut search_dirs = extra_dirs;
        if let Ok(cwd) = std::env::current_dir() {
            search_dirs.push(cwd.join("package"));
        }
        search_dirs.extend(
            ["/opt/homebrew/bin", "/usr/local/bin", "/usr/bin"]
                .iter()
                .map(PathBuf::from),
        );
        Self { search_dirs }
    }

    pub fn discover(&self) -> ToolPaths {
        let paths = ToolPaths {
            ytdlp: self.locate(ToolType::YtDlp),
            ffmpeg: self.locate(ToolType::Ffmpeg),
            ffprobe: self.locate(ToolType::Ffprobe),
        };
        for tool in [ToolType::YtDlp, ToolType::Ffmpeg, ToolType::Ffprobe] {
            match paths.get(tool) {
                Some(path) => tracing::debug!(target: "transcoder::tools", tool = tool.as_str(), path = %path.display(), "located"),
                None => tracing::warn!(target: "transcoder::tools", tool = tool.as_str(), "not found"),
            }
        }
        paths
    }

    pub fn locate(&self, tool: ToolType) -> Option<PathBuf> {
        // 1. Configured and common directories
        for dir in &self.search_dirs {
            for name in tool.candidates() {
                let path = dir.join(&name);
                if path.is_file() {
                    return Some(path);
                }
            }
        }

        // 2. PATH
        let finder = if cfg!(windows) { "where" } else { "which" };
        if let Ok(output) = Command::new(finder).arg(tool.as_str()).output() {
            if output.status.success() {
                let found = String::from_utf8_lossy(&output.stdout);
                if let Some(first) = found.lines().map(str::trim).find(|l| !l.is_empty()) {
                    return Some(PathBuf::from(first));
                }
            }
        }

        None
    }
}
