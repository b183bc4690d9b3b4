//! The conversion capability shared by every strategy.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::formats::SpreadsheetFormat;

/// Errors a single strategy (or validation ahead of it) can produce.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("Invalid upload: {0}")]
    Validation(String),

    #[error("Converter not available: {0}")]
    ConverterUnavailable(String),

    #[error("Converter exited with {status}: {stderr}")]
    ConverterExecution { status: String, stderr: String },

    #[error("Converted output not found: {0}")]
    OutputNotFound(String),

    #[error("Remote conversion failed: {0}")]
    RemoteService(String),

    #[error("Library conversion failed: {0}")]
    LibraryConversion(String),

    #[error("IO error: {0}")]
    Filesystem(#[from] std::io::Error),
}

impl ConversionError {
    /// Stable identifier reported to clients and used as a metrics label.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::ConverterUnavailable(_) => "converter_unavailable",
            Self::ConverterExecution { .. } => "converter_execution_error",
            Self::OutputNotFound(_) => "output_not_found",
            Self::RemoteService(_) => "remote_service_error",
            Self::LibraryConversion(_) => "library_conversion_error",
            Self::Filesystem(_) => "filesystem_error",
        }
    }

    /// Whether the orchestrator may move on to the next strategy.
    pub fn allows_fallback(&self) -> bool {
        !matches!(self, Self::Validation(_))
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    /// Headless office suite binary.
    Office,
    /// Hosted conversion API.
    Remote,
    /// In-process spreadsheet library.
    Library,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Office => "office",
            Self::Remote => "remote",
            Self::Library => "library",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One conversion request, alive only for the duration of a request.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub id: String,
    pub input_path: PathBuf,
    pub source_format: SpreadsheetFormat,
    pub target_format: SpreadsheetFormat,
    /// Directory owned exclusively by this job.
    pub work_dir: PathBuf,
}

impl ConversionJob {
    /// Directory strategies write their output into. Kept apart from the
    /// input so a same-format conversion never overwrites its source.
    pub fn output_dir(&self) -> PathBuf {
        self.work_dir.join("out")
    }

    /// Where a strategy is expected to leave the converted file.
    pub fn expected_output_path(&self) -> PathBuf {
        let stem = self
            .input_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("converted");
        self.output_dir()
            .join(format!("{}.{}", stem, self.target_format.extension()))
    }

    pub fn input_file_name(&self) -> &str {
        self.input_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
    }

    pub fn is_inside_work_dir(&self, path: &Path) -> bool {
        path.starts_with(&self.work_dir)
    }
}

/// Convert the job's input into the job's target format.
///
/// A strategy leaves its result somewhere inside the job's output directory.
/// Locating it, and waiting for writers that outlive the strategy call, is
/// driven by the orchestrator through [`ConversionStrategy::find_output`].
#[async_trait]
pub trait ConversionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Whether the output may still be written after `convert` returns, so
    /// the orchestrator must wait for it to appear and settle.
    fn needs_output_grace(&self) -> bool {
        false
    }

    async fn convert(&self, job: &ConversionJob) -> Result<(), ConversionError>;

    /// Path of the produced file, if it is there yet.
    async fn find_output(&self, job: &ConversionJob) -> Option<PathBuf> {
        let expected = job.expected_output_path();
        match tokio::fs::try_exists(&expected).await {
            Ok(true) => Some(expected),
            _ => None,
        }
    }
}
