//! Spreadsheet conversion through a headless office suite (LibreOffice).

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, warn};
use url::Url;

use super::strategy::{ConversionError, ConversionJob, ConversionStrategy, StrategyKind};

/// Where office suites usually end up. Bare names are looked up in `PATH`.
pub const DEFAULT_OFFICE_SEARCH_PATHS: &[&str] = &[
    "/usr/bin/soffice",
    "/usr/bin/libreoffice",
    "/usr/local/bin/soffice",
    "/usr/lib/libreoffice/program/soffice",
    "/opt/libreoffice/program/soffice",
    "/snap/bin/libreoffice",
    "/Applications/LibreOffice.app/Contents/MacOS/soffice",
    "C:\\Program Files\\LibreOffice\\program\\soffice.exe",
    "C:\\Program Files (x86)\\LibreOffice\\program\\soffice.exe",
    "soffice",
    "libreoffice",
];

pub fn default_search_paths() -> Vec<PathBuf> {
    DEFAULT_OFFICE_SEARCH_PATHS.iter().map(PathBuf::from).collect()
}

/// Returns the first search path that points at an existing file.
pub fn locate_office_binary(search_paths: &[PathBuf]) -> Option<PathBuf> {
    search_paths.iter().find_map(|candidate| {
        if candidate.components().count() > 1 || candidate.is_absolute() {
            candidate.is_file().then(|| candidate.clone())
        } else {
            find_in_path(candidate)
        }
    })
}

fn find_in_path(name: &Path) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

pub struct OfficeStrategy {
    search_paths: Vec<PathBuf>,
}

impl OfficeStrategy {
    pub fn new(search_paths: Vec<PathBuf>) -> Self {
        Self { search_paths }
    }

    /// Resolved converter binary, probed on every call so an install made
    /// while the server runs is picked up.
    pub fn locate(&self) -> Option<PathBuf> {
        locate_office_binary(&self.search_paths)
    }
}

#[async_trait]
impl ConversionStrategy for OfficeStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Office
    }

    fn needs_output_grace(&self) -> bool {
        true
    }

    async fn convert(&self, job: &ConversionJob) -> Result<(), ConversionError> {
        let binary = self.locate().ok_or_else(|| {
            ConversionError::ConverterUnavailable(format!(
                "no office binary found in {} search paths",
                self.search_paths.len()
            ))
        })?;

        let out_dir = job.output_dir();
        fs::create_dir_all(&out_dir).await?;

        // A private profile per job lets several instances run side by side
        let profile_url = profile_url(&job.work_dir.join("profile"))?;

        debug!("Job {}: running {:?}", job.id, binary);
        let output = Command::new(&binary)
            .arg(format!("-env:UserInstallation={}", profile_url))
            .args(["--headless", "--norestore", "--convert-to"])
            .arg(job.target_format.office_filter())
            .arg("--outdir")
            .arg(&out_dir)
            .arg(&job.input_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                ConversionError::ConverterUnavailable(format!(
                    "failed to start {}: {}",
                    binary_name(&binary),
                    e
                ))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            debug!("Job {}: converter stdout: {}", job.id, stdout.trim());
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ConversionError::ConverterExecution {
                status: output.status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(())
    }

    async fn find_output(&self, job: &ConversionJob) -> Option<PathBuf> {
        let expected = job.expected_output_path();
        if let Ok(true) = fs::try_exists(&expected).await {
            return Some(expected);
        }

        // The office suite picks output names on its own; only this job
        // writes into its output directory, so any match belongs to it.
        match scan_for_extension(&job.output_dir(), job.target_format.extension()).await {
            Ok(found) => {
                if let Some(path) = &found {
                    debug!("Job {}: using output {:?} found by scan", job.id, path);
                }
                found
            }
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Job {}: failed to scan output directory: {}", job.id, e);
                }
                None
            }
        }
    }
}

/// `file://` URL of a profile directory, as the office suite expects it.
fn profile_url(dir: &Path) -> Result<String, ConversionError> {
    let dir = std::path::absolute(dir)?;
    Url::from_directory_path(&dir)
        .map(String::from)
        .map_err(|_| {
            ConversionError::ConverterUnavailable(format!(
                "cannot express profile directory {} as a URL",
                dir.display()
            ))
        })
}

fn binary_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "office binary".to_string())
}

/// First file (by name) in `dir` with the given extension.
async fn scan_for_extension(dir: &Path, extension: &str) -> std::io::Result<Option<PathBuf>> {
    let mut matches = Vec::new();
    let mut entries = fs::read_dir(dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let matches_ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case(extension))
            .unwrap_or(false);
        if matches_ext && entry.file_type().await?.is_file() {
            matches.push(path);
        }
    }

    matches.sort();
    Ok(matches.into_iter().next())
}
