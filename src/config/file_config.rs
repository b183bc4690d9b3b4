use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub upload_dir: Option<String>,
    pub output_dir: Option<String>,
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,
    pub frontend_dir_path: Option<String>,
    pub max_upload_bytes: Option<u64>,
    pub output_retention_hours: Option<u64>,
    pub prune_interval_minutes: Option<u64>,

    // Conversion settings
    pub target_format: Option<String>,
    pub target_formats: Option<Vec<String>>,
    pub allowed_formats: Option<Vec<String>>,
    pub strategies: Option<Vec<String>>,

    // Per-strategy sections
    pub office: Option<OfficeConfig>,
    pub remote: Option<RemoteConfig>,
    pub output_wait: Option<OutputWaitConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct OfficeConfig {
    /// Candidate office binaries, probed in order. Bare names are looked up in PATH.
    pub search_paths: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct RemoteConfig {
    pub url: Option<String>,
    pub secret: Option<String>,
    pub timeout_sec: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct OutputWaitConfig {
    pub poll_interval_ms: Option<u64>,
    pub max_attempts: Option<u32>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
