// InfoExtractor module - metadata and format extraction
//
// The extractor runs as a subprocess and prints one JSON document with a
// `formats` array and the video metadata.

mod cli;
mod diagnostics;
mod traits;

pub use cli::{parse_upload_date, CliInfoExtractor};
pub use diagnostics::{diagnose_error, summarize_error, FailureReason};
pub use traits::{ExtractionDocument, ExtractorConfig, InfoExtractor};
