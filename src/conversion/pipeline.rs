//! Request orchestration: validate, convert with the first strategy that
//! works, publish the result and clean up after the request.
//!
//! ```text
//! Received -> Validated -> Converting -> AwaitingOutput -> Finalizing -> Responded
//!                              ^               |
//!                              +-- next strategy (on failure)
//! any non-terminal state -> Errored
//! ```

use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info, warn};

use super::formats::SpreadsheetFormat;
use super::strategy::{ConversionError, ConversionJob, ConversionStrategy, StrategyKind};
use super::upload::{
    remove_dir_if_exists, remove_if_exists, UploadError, UploadStore, UploadValidator, UploadedFile,
};
use crate::server::metrics;

/// Prefix of every published file name.
pub const OUTPUT_FILE_PREFIX: &str = "converted-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Received,
    Validated,
    Converting,
    AwaitingOutput,
    Finalizing,
    Responded,
    Errored,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// How long to wait for an external writer to finish the output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputWait {
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl Default for OutputWait {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            max_attempts: 20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub default_target: SpreadsheetFormat,
    pub allowed_targets: Vec<SpreadsheetFormat>,
    pub output_dir: PathBuf,
    /// URL prefix the output directory is served under.
    pub public_prefix: String,
    pub output_wait: OutputWait,
}

/// A converted file, ready to be downloaded.
#[derive(Debug, Clone, Serialize)]
pub struct ConvertedFile {
    pub file_name: String,
    pub download_url: String,
    #[serde(skip)]
    pub strategy: StrategyKind,
}

/// One strategy's failure, with paths already stripped from the message.
#[derive(Debug, Clone)]
pub struct StrategyFailure {
    pub strategy: StrategyKind,
    pub category: &'static str,
    pub message: String,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Rejected(String),

    #[error("Unsupported target format: {0}")]
    UnsupportedTarget(SpreadsheetFormat),

    #[error("Conversion failed: {}", summarize(.0))]
    AllStrategiesFailed(Vec<StrategyFailure>),

    #[error("Failed to publish converted file")]
    Finalize(#[source] std::io::Error),
}

fn summarize(failures: &[StrategyFailure]) -> String {
    if failures.is_empty() {
        return "no conversion strategies configured".to_string();
    }
    failures
        .iter()
        .map(|f| format!("{}: {}", f.strategy, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl PipelineError {
    /// Client error, as opposed to a failure of the service.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Rejected(_) | Self::UnsupportedTarget(_))
    }

    pub fn category(&self) -> &'static str {
        match self {
            Self::Rejected(_) | Self::UnsupportedTarget(_) => "validation_error",
            Self::AllStrategiesFailed(failures) if failures.len() == 1 => failures[0].category,
            Self::AllStrategiesFailed(_) => "conversion_failed",
            Self::Finalize(_) => "filesystem_error",
        }
    }

    /// Human readable detail that is safe to hand to a client.
    pub fn details(&self) -> String {
        match self {
            Self::AllStrategiesFailed(failures) => summarize(failures),
            other => other.to_string(),
        }
    }
}

/// Hands out strictly increasing nanosecond stamps, so two requests
/// finishing within the same clock tick still get distinct names.
#[derive(Debug, Default)]
pub struct OutputStamp {
    last: AtomicU64,
}

impl OutputStamp {
    pub fn next(&self) -> u64 {
        let now = Utc::now().timestamp_nanos_opt().unwrap_or_default().max(0) as u64;
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, candidate, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return candidate,
                Err(actual) => prev = actual,
            }
        }
    }
}

pub struct ConversionPipeline {
    strategies: Vec<Arc<dyn ConversionStrategy>>,
    validator: UploadValidator,
    store: Arc<UploadStore>,
    config: PipelineConfig,
    stamp: OutputStamp,
}

impl ConversionPipeline {
    pub fn new(
        strategies: Vec<Arc<dyn ConversionStrategy>>,
        validator: UploadValidator,
        store: Arc<UploadStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            strategies,
            validator,
            store,
            config,
            stamp: OutputStamp::default(),
        }
    }

    /// Creates the upload and output directories.
    pub async fn init(&self) -> Result<(), UploadError> {
        self.store.init().await?;
        fs::create_dir_all(&self.config.output_dir).await?;
        Ok(())
    }

    pub fn store(&self) -> &Arc<UploadStore> {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn strategy_kinds(&self) -> Vec<StrategyKind> {
        self.strategies.iter().map(|s| s.kind()).collect()
    }

    /// Runs a stored upload through the pipeline. The job directory holding
    /// the upload is gone once this returns, whatever the outcome.
    pub async fn run(
        &self,
        job_id: &str,
        upload: UploadedFile,
        target: Option<SpreadsheetFormat>,
    ) -> Result<ConvertedFile, PipelineError> {
        let mut state = JobState::Received;
        let result = self.process(job_id, &upload, target, &mut state).await;

        if let Err(e) = remove_if_exists(&upload.path).await {
            warn!("Job {}: failed to remove input file: {}", job_id, e);
        }
        if let Err(e) = remove_dir_if_exists(&self.store.job_dir(job_id)).await {
            warn!("Job {}: failed to remove job directory: {}", job_id, e);
        }

        match &result {
            Ok(converted) => {
                transition(job_id, &mut state, JobState::Responded);
                info!(
                    "Job {}: {} converted by {} into {}",
                    job_id, upload.original_name, converted.strategy, converted.file_name
                );
            }
            Err(e) => {
                transition(job_id, &mut state, JobState::Errored);
                if e.is_client_error() {
                    metrics::record_upload_rejected("validation");
                    info!("Job {}: rejected {}: {}", job_id, upload.original_name, e);
                } else {
                    warn!("Job {}: {}", job_id, e);
                }
            }
        }

        result
    }

    async fn process(
        &self,
        job_id: &str,
        upload: &UploadedFile,
        target: Option<SpreadsheetFormat>,
        state: &mut JobState,
    ) -> Result<ConvertedFile, PipelineError> {
        let source_format = self
            .validator
            .validate(upload)
            .map_err(|e| PipelineError::Rejected(e.to_string()))?;

        let target_format = target.unwrap_or(self.config.default_target);
        if !self.config.allowed_targets.contains(&target_format) {
            return Err(PipelineError::UnsupportedTarget(target_format));
        }
        transition(job_id, state, JobState::Validated);

        let job = ConversionJob {
            id: job_id.to_string(),
            input_path: upload.path.clone(),
            source_format,
            target_format,
            work_dir: self.store.job_dir(job_id),
        };

        let mut failures = Vec::new();
        for strategy in &self.strategies {
            transition(job_id, state, JobState::Converting);
            let started = Instant::now();

            match self.attempt(strategy.as_ref(), &job, state).await {
                Ok(output) => {
                    metrics::record_conversion(
                        strategy.kind().as_str(),
                        "success",
                        started.elapsed(),
                    );
                    transition(job_id, state, JobState::Finalizing);
                    return self
                        .publish(&output, target_format, strategy.kind())
                        .await
                        .map_err(PipelineError::Finalize);
                }
                Err(e) => {
                    metrics::record_conversion(
                        strategy.kind().as_str(),
                        e.category(),
                        started.elapsed(),
                    );
                    warn!("Job {}: {} strategy failed: {}", job_id, strategy.kind(), e);

                    // Whatever the failed strategy left behind must not be
                    // mistaken for the next strategy's output
                    if let Err(e) = remove_dir_if_exists(&job.output_dir()).await {
                        warn!("Job {}: failed to clear partial output: {}", job_id, e);
                    }

                    let allows_fallback = e.allows_fallback();
                    failures.push(StrategyFailure {
                        strategy: strategy.kind(),
                        category: e.category(),
                        message: redact_paths(
                            &e.to_string(),
                            &[job.work_dir.as_path(), self.store.upload_dir()],
                        ),
                    });
                    if !allows_fallback {
                        break;
                    }
                }
            }
        }

        Err(PipelineError::AllStrategiesFailed(failures))
    }

    async fn attempt(
        &self,
        strategy: &dyn ConversionStrategy,
        job: &ConversionJob,
        state: &mut JobState,
    ) -> Result<PathBuf, ConversionError> {
        strategy.convert(job).await?;
        transition(&job.id, state, JobState::AwaitingOutput);
        wait_for_output(strategy, job, self.config.output_wait).await
    }

    /// Moves the output under its public, collision-free name.
    async fn publish(
        &self,
        output: &Path,
        target_format: SpreadsheetFormat,
        strategy: StrategyKind,
    ) -> std::io::Result<ConvertedFile> {
        let file_name = format!(
            "{}{}.{}",
            OUTPUT_FILE_PREFIX,
            self.stamp.next(),
            target_format.extension()
        );
        let destination = self.config.output_dir.join(&file_name);

        move_file(output, &destination).await?;

        Ok(ConvertedFile {
            download_url: format!(
                "{}/{}",
                self.config.public_prefix.trim_end_matches('/'),
                file_name
            ),
            file_name,
            strategy,
        })
    }
}

/// Renames `source` to `destination`, copying when a rename is not possible.
/// A failed copy leaves nothing behind at `destination`.
async fn move_file(source: &Path, destination: &Path) -> std::io::Result<()> {
    // Upload and output directories may sit on different filesystems
    if fs::rename(source, destination).await.is_ok() {
        return Ok(());
    }

    if let Err(e) = fs::copy(source, destination).await {
        if let Err(cleanup) = remove_if_exists(destination).await {
            warn!("Failed to remove partial copy {:?}: {}", destination, cleanup);
        }
        return Err(e);
    }

    // The job directory goes away with the request anyway
    if let Err(e) = remove_if_exists(source).await {
        warn!("Failed to remove moved file {:?}: {}", source, e);
    }
    Ok(())
}

fn transition(job_id: &str, state: &mut JobState, next: JobState) {
    debug!("Job {}: {} -> {}", job_id, state, next);
    *state = next;
}

/// Polls until the strategy's output exists, is non-empty and, for
/// strategies whose writer may outlive them, has stopped growing.
pub async fn wait_for_output(
    strategy: &dyn ConversionStrategy,
    job: &ConversionJob,
    wait: OutputWait,
) -> Result<PathBuf, ConversionError> {
    let needs_grace = strategy.needs_output_grace();
    let attempts = if needs_grace { wait.max_attempts.max(1) } else { 1 };
    let mut last_seen: Option<(PathBuf, u64)> = None;

    for attempt in 0..attempts {
        if attempt > 0 {
            tokio::time::sleep(wait.poll_interval).await;
        }

        let Some(path) = strategy.find_output(job).await else {
            continue;
        };
        if !job.is_inside_work_dir(&path) {
            return Err(ConversionError::OutputNotFound(
                "strategy reported an output outside the job directory".to_string(),
            ));
        }

        let size = match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => continue,
        };
        if size == 0 {
            continue;
        }
        if !needs_grace {
            return Ok(path);
        }

        let current = (path, size);
        if last_seen.as_ref() == Some(&current) {
            return Ok(current.0);
        }
        last_seen = Some(current);
    }

    if let Some((path, _)) = last_seen {
        warn!(
            "Job {}: output still changing after {} checks, using it anyway",
            job.id, attempts
        );
        return Ok(path);
    }

    Err(ConversionError::OutputNotFound(format!(
        "no .{} file produced for {} after {} checks",
        job.target_format.extension(),
        job.input_file_name(),
        attempts
    )))
}

/// Removes directory prefixes from `text` so internal paths never reach
/// clients.
fn redact_paths(text: &str, dirs: &[&Path]) -> String {
    let mut redacted = text.to_string();
    for dir in dirs {
        let dir = dir.to_string_lossy();
        if dir.is_empty() {
            continue;
        }
        redacted = redacted
            .replace(&format!("{}/", dir), "")
            .replace(&format!("{}\\", dir), "")
            .replace(dir.as_ref(), "");
    }
    redacted
}
