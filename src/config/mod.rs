mod file_config;

pub use file_config::{FileConfig, OfficeConfig, OutputWaitConfig, RemoteConfig};

use crate::conversion::{
    default_search_paths, ConversionPipeline, ConversionStrategy, LibraryStrategy,
    OfficeStrategy, OutputWait, PipelineConfig, RemoteStrategy, SpreadsheetFormat,
    StrategyKind, UploadStore, UploadValidator, DEFAULT_REMOTE_BASE_URL,
};
use crate::server::{RequestsLoggingLevel, ServerConfig};
use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_METRICS_PORT: u16 = 9091;
pub const DEFAULT_UPLOAD_DIR: &str = "uploads";
pub const DEFAULT_OUTPUT_DIR: &str = "converted";
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 50 * 1024 * 1024;
pub const DEFAULT_REMOTE_TIMEOUT_SEC: u64 = 120;
pub const DEFAULT_OUTPUT_POLL_INTERVAL_MS: u64 = 250;
pub const DEFAULT_OUTPUT_POLL_ATTEMPTS: u32 = 20;
pub const DEFAULT_PRUNE_INTERVAL_MINUTES: u64 = 60;

pub const DEFAULT_STRATEGIES: [StrategyKind; 3] =
    [StrategyKind::Office, StrategyKind::Remote, StrategyKind::Library];
pub const DEFAULT_ALLOWED_FORMATS: [SpreadsheetFormat; 3] =
    [SpreadsheetFormat::Xls, SpreadsheetFormat::Xlsx, SpreadsheetFormat::Ods];
pub const DEFAULT_TARGET_FORMATS: [SpreadsheetFormat; 3] =
    [SpreadsheetFormat::Xlsx, SpreadsheetFormat::Ods, SpreadsheetFormat::Xls];

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
/// Empty lists mean "use the built-in default".
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub upload_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub frontend_dir_path: Option<String>,
    pub target_format: SpreadsheetFormat,
    pub target_formats: Vec<SpreadsheetFormat>,
    pub allowed_formats: Vec<SpreadsheetFormat>,
    pub strategies: Vec<StrategyKind>,
    pub office_paths: Vec<PathBuf>,
    pub remote_url: Option<String>,
    pub remote_secret: Option<String>,
    pub remote_timeout_sec: u64,
    pub max_upload_bytes: u64,
    pub output_poll_interval_ms: u64,
    pub output_poll_attempts: u32,
    pub output_retention_hours: u64,
    pub prune_interval_minutes: u64,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            upload_dir: None,
            output_dir: None,
            port: DEFAULT_PORT,
            metrics_port: DEFAULT_METRICS_PORT,
            logging_level: RequestsLoggingLevel::default(),
            frontend_dir_path: None,
            target_format: SpreadsheetFormat::Xlsx,
            target_formats: Vec::new(),
            allowed_formats: Vec::new(),
            strategies: Vec::new(),
            office_paths: Vec::new(),
            remote_url: None,
            remote_secret: None,
            remote_timeout_sec: DEFAULT_REMOTE_TIMEOUT_SEC,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            output_poll_interval_ms: DEFAULT_OUTPUT_POLL_INTERVAL_MS,
            output_poll_attempts: DEFAULT_OUTPUT_POLL_ATTEMPTS,
            output_retention_hours: 0,
            prune_interval_minutes: DEFAULT_PRUNE_INTERVAL_MINUTES,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub frontend_dir_path: Option<String>,
    pub max_upload_bytes: u64,

    // Conversion settings
    pub target_format: SpreadsheetFormat,
    pub target_formats: Vec<SpreadsheetFormat>,
    pub allowed_formats: Vec<SpreadsheetFormat>,
    pub strategies: Vec<StrategyKind>,
    pub output_wait: OutputWait,

    // Feature configs (with defaults)
    pub office: OfficeSettings,
    pub remote: RemoteSettings,
    pub retention: Option<RetentionSettings>,
}

#[derive(Debug, Clone)]
pub struct OfficeSettings {
    pub search_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct RemoteSettings {
    pub base_url: String,
    pub secret: Option<String>,
    pub timeout_sec: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionSettings {
    pub max_age: Duration,
    pub interval: Duration,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let upload_dir = file
            .upload_dir
            .map(PathBuf::from)
            .or_else(|| cli.upload_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOAD_DIR));
        let upload_dir = std::path::absolute(&upload_dir)
            .with_context(|| format!("Error resolving upload_dir {:?}", upload_dir))?;
        let output_dir = file
            .output_dir
            .map(PathBuf::from)
            .or_else(|| cli.output_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));
        let output_dir = std::path::absolute(&output_dir)
            .with_context(|| format!("Error resolving output_dir {:?}", output_dir))?;

        // Work directories hold raw uploads and must never be downloadable
        if upload_dir == output_dir || upload_dir.starts_with(&output_dir) {
            bail!(
                "upload_dir {:?} must not be inside output_dir {:?}",
                upload_dir,
                output_dir
            );
        }

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let frontend_dir_path = file
            .frontend_dir_path
            .or_else(|| cli.frontend_dir_path.clone());

        let max_upload_bytes = file.max_upload_bytes.unwrap_or(cli.max_upload_bytes);
        if max_upload_bytes == 0 {
            bail!("max_upload_bytes must be greater than zero");
        }

        let target_format = match file.target_format {
            Some(s) => parse_value::<SpreadsheetFormat>(&s, "target format")?,
            None => cli.target_format,
        };
        let target_formats = match file.target_formats {
            Some(values) => parse_values::<SpreadsheetFormat>(&values, "target format")?,
            None => or_default(&cli.target_formats, &DEFAULT_TARGET_FORMATS),
        };
        if !target_formats.contains(&target_format) {
            bail!(
                "Default target format {} is not among the allowed target formats",
                target_format
            );
        }

        let allowed_formats = match file.allowed_formats {
            Some(values) => parse_values::<SpreadsheetFormat>(&values, "upload format")?,
            None => or_default(&cli.allowed_formats, &DEFAULT_ALLOWED_FORMATS),
        };
        if allowed_formats.is_empty() {
            bail!("At least one upload format must be allowed");
        }

        let strategies = match file.strategies {
            Some(values) => parse_values::<StrategyKind>(&values, "strategy")?,
            None => or_default(&cli.strategies, &DEFAULT_STRATEGIES),
        };
        if strategies.is_empty() {
            bail!("At least one conversion strategy must be configured");
        }
        for (i, kind) in strategies.iter().enumerate() {
            if strategies[..i].contains(kind) {
                bail!("Strategy {} is listed more than once", kind);
            }
        }

        let wait_file = file.output_wait.unwrap_or_default();
        let output_wait = OutputWait {
            poll_interval: Duration::from_millis(
                wait_file
                    .poll_interval_ms
                    .unwrap_or(cli.output_poll_interval_ms),
            ),
            max_attempts: wait_file.max_attempts.unwrap_or(cli.output_poll_attempts),
        };
        if output_wait.max_attempts == 0 {
            bail!("output_wait.max_attempts must be at least 1");
        }

        let office_file = file.office.unwrap_or_default();
        let office = OfficeSettings {
            search_paths: match office_file.search_paths {
                Some(paths) => paths.into_iter().map(PathBuf::from).collect(),
                None if cli.office_paths.is_empty() => default_search_paths(),
                None => cli.office_paths.clone(),
            },
        };

        let remote_file = file.remote.unwrap_or_default();
        let remote = RemoteSettings {
            base_url: remote_file
                .url
                .or_else(|| cli.remote_url.clone())
                .unwrap_or_else(|| DEFAULT_REMOTE_BASE_URL.to_string()),
            secret: remote_file
                .secret
                .or_else(|| cli.remote_secret.clone())
                .filter(|s| !s.is_empty()),
            timeout_sec: remote_file.timeout_sec.unwrap_or(cli.remote_timeout_sec),
        };

        let output_retention_hours = file
            .output_retention_hours
            .unwrap_or(cli.output_retention_hours);
        let prune_interval_minutes = file
            .prune_interval_minutes
            .unwrap_or(cli.prune_interval_minutes);
        let retention = if output_retention_hours > 0 {
            if prune_interval_minutes == 0 {
                bail!("prune_interval_minutes must be greater than zero when retention is enabled");
            }
            Some(RetentionSettings {
                max_age: Duration::from_secs(output_retention_hours * 60 * 60),
                interval: Duration::from_secs(prune_interval_minutes * 60),
            })
        } else {
            None
        };

        // Misconfigurations that only make a strategy report itself unavailable
        if strategies.contains(&StrategyKind::Remote) && remote.secret.is_none() {
            warn!("Remote strategy enabled without a secret, it will be skipped");
        }
        if strategies.contains(&StrategyKind::Library) && target_format != SpreadsheetFormat::Xlsx
        {
            warn!(
                "Library strategy only writes xlsx, it will be skipped for {} conversions",
                target_format
            );
        }

        Ok(Self {
            upload_dir,
            output_dir,
            port,
            metrics_port,
            logging_level,
            frontend_dir_path,
            max_upload_bytes,
            target_format,
            target_formats,
            allowed_formats,
            strategies,
            output_wait,
            office,
            remote,
            retention,
        })
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            requests_logging_level: self.logging_level.clone(),
            port: self.port,
            metrics_port: self.metrics_port,
            frontend_dir_path: self.frontend_dir_path.clone(),
            output_dir: self.output_dir.clone(),
            max_upload_bytes: self.max_upload_bytes,
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            default_target: self.target_format,
            allowed_targets: self.target_formats.clone(),
            output_dir: self.output_dir.clone(),
            public_prefix: "/downloads".to_string(),
            output_wait: self.output_wait,
        }
    }

    pub fn office_locator(&self) -> OfficeStrategy {
        OfficeStrategy::new(self.office.search_paths.clone())
    }

    /// Instantiates the configured strategies, in order.
    pub fn build_strategies(&self) -> Result<Vec<Arc<dyn ConversionStrategy>>> {
        let mut strategies: Vec<Arc<dyn ConversionStrategy>> = Vec::new();
        for kind in &self.strategies {
            let strategy: Arc<dyn ConversionStrategy> = match kind {
                StrategyKind::Office => Arc::new(self.office_locator()),
                StrategyKind::Remote => Arc::new(
                    RemoteStrategy::new(
                        &self.remote.base_url,
                        self.remote.secret.clone(),
                        self.remote.timeout_sec,
                    )
                    .context("Failed to build remote conversion client")?,
                ),
                StrategyKind::Library => Arc::new(LibraryStrategy),
            };
            strategies.push(strategy);
        }
        Ok(strategies)
    }

    pub fn build_pipeline(&self) -> Result<ConversionPipeline> {
        Ok(ConversionPipeline::new(
            self.build_strategies()?,
            UploadValidator::new(self.allowed_formats.clone()),
            Arc::new(UploadStore::new(&self.upload_dir, self.max_upload_bytes)),
            self.pipeline_config(),
        ))
    }
}

fn or_default<T: Clone>(values: &[T], defaults: &[T]) -> Vec<T> {
    if values.is_empty() {
        defaults.to_vec()
    } else {
        values.to_vec()
    }
}

fn parse_value<T: ValueEnum>(s: &str, what: &str) -> Result<T> {
    match T::from_str(s.trim(), true) {
        Ok(value) => Ok(value),
        Err(_) => bail!("Unknown {}: {}", what, s),
    }
}

fn parse_values<T: ValueEnum>(values: &[String], what: &str) -> Result<Vec<T>> {
    values.iter().map(|s| parse_value(s, what)).collect()
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_logging_level() {
        assert!(matches!(
            parse_logging_level("none"),
            Some(RequestsLoggingLevel::None)
        ));
        assert!(matches!(
            parse_logging_level("headers"),
            Some(RequestsLoggingLevel::Headers)
        ));
        // Case insensitive
        assert!(matches!(
            parse_logging_level("PATH"),
            Some(RequestsLoggingLevel::Path)
        ));
        assert!(parse_logging_level("invalid").is_none());
    }

    #[test]
    fn test_resolve_defaults() {
        let config = AppConfig::resolve(&CliConfig::default(), None).unwrap();

        let cwd = std::env::current_dir().unwrap();
        assert_eq!(config.upload_dir, cwd.join(DEFAULT_UPLOAD_DIR));
        assert_eq!(config.output_dir, cwd.join(DEFAULT_OUTPUT_DIR));
        assert!(config.upload_dir.is_absolute());
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.target_format, SpreadsheetFormat::Xlsx);
        assert_eq!(config.strategies, DEFAULT_STRATEGIES.to_vec());
        assert_eq!(config.allowed_formats, DEFAULT_ALLOWED_FORMATS.to_vec());
        assert_eq!(config.office.search_paths, default_search_paths());
        assert_eq!(config.remote.base_url, DEFAULT_REMOTE_BASE_URL);
        assert!(config.remote.secret.is_none());
        assert_eq!(config.output_wait.max_attempts, DEFAULT_OUTPUT_POLL_ATTEMPTS);
        assert!(config.retention.is_none());
    }

    #[test]
    fn test_resolve_cli_only() {
        let cli = CliConfig {
            upload_dir: Some(PathBuf::from("/srv/uploads")),
            output_dir: Some(PathBuf::from("/srv/converted")),
            port: 8080,
            metrics_port: 9100,
            logging_level: RequestsLoggingLevel::Headers,
            strategies: vec![StrategyKind::Library],
            remote_secret: Some("s3cret".to_string()),
            output_retention_hours: 24,
            prune_interval_minutes: 30,
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli, None).unwrap();

        assert_eq!(config.upload_dir, PathBuf::from("/srv/uploads"));
        assert_eq!(config.output_dir, PathBuf::from("/srv/converted"));
        assert_eq!(config.port, 8080);
        assert_eq!(config.metrics_port, 9100);
        assert_eq!(config.logging_level, RequestsLoggingLevel::Headers);
        assert_eq!(config.strategies, vec![StrategyKind::Library]);
        assert_eq!(config.remote.secret.as_deref(), Some("s3cret"));
        assert_eq!(
            config.retention,
            Some(RetentionSettings {
                max_age: Duration::from_secs(24 * 3600),
                interval: Duration::from_secs(30 * 60),
            })
        );
    }

    #[test]
    fn test_resolve_makes_directories_absolute() {
        let file_config = FileConfig {
            upload_dir: Some("data/uploads".to_string()),
            output_dir: Some("data/converted".to_string()),
            ..Default::default()
        };

        let config = AppConfig::resolve(&CliConfig::default(), Some(file_config)).unwrap();

        let cwd = std::env::current_dir().unwrap();
        assert_eq!(config.upload_dir, cwd.join("data/uploads"));
        assert_eq!(config.output_dir, cwd.join("data/converted"));
    }

    #[test]
    fn test_resolve_toml_overrides_cli() {
        let cli = CliConfig {
            upload_dir: Some(PathBuf::from("/cli/uploads")),
            port: 3001,
            metrics_port: 9091,
            logging_level: RequestsLoggingLevel::Path,
            strategies: vec![StrategyKind::Office],
            remote_secret: Some("from-env".to_string()),
            ..Default::default()
        };

        let file_config = FileConfig {
            upload_dir: Some("/toml/uploads".to_string()),
            port: Some(4000),
            logging_level: Some("body".to_string()),
            strategies: Some(vec!["remote".to_string(), "LIBRARY".to_string()]),
            target_format: Some("ods".to_string()),
            remote: Some(RemoteConfig {
                url: Some("http://convert.internal".to_string()),
                ..Default::default()
            }),
            output_wait: Some(OutputWaitConfig {
                poll_interval_ms: Some(50),
                max_attempts: None,
            }),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli, Some(file_config)).unwrap();

        // TOML values should override CLI
        assert_eq!(config.upload_dir, PathBuf::from("/toml/uploads"));
        assert_eq!(config.port, 4000);
        assert_eq!(config.logging_level, RequestsLoggingLevel::Body);
        assert_eq!(
            config.strategies,
            vec![StrategyKind::Remote, StrategyKind::Library]
        );
        assert_eq!(config.target_format, SpreadsheetFormat::Ods);
        assert_eq!(config.remote.base_url, "http://convert.internal");
        assert_eq!(config.output_wait.poll_interval, Duration::from_millis(50));
        // CLI value used when TOML doesn't specify
        assert_eq!(config.metrics_port, 9091);
        assert_eq!(config.remote.secret.as_deref(), Some("from-env"));
        assert_eq!(config.output_wait.max_attempts, DEFAULT_OUTPUT_POLL_ATTEMPTS);
    }

    #[test]
    fn test_resolve_rejects_empty_strategy_list() {
        let file_config = FileConfig {
            strategies: Some(vec![]),
            ..Default::default()
        };
        let err = AppConfig::resolve(&CliConfig::default(), Some(file_config)).unwrap_err();
        assert!(err.to_string().contains("At least one conversion strategy"));
    }

    #[test]
    fn test_resolve_rejects_unknown_strategy() {
        let file_config = FileConfig {
            strategies: Some(vec!["office".to_string(), "magic".to_string()]),
            ..Default::default()
        };
        let err = AppConfig::resolve(&CliConfig::default(), Some(file_config)).unwrap_err();
        assert!(err.to_string().contains("Unknown strategy: magic"));
    }

    #[test]
    fn test_resolve_rejects_duplicate_strategy() {
        let cli = CliConfig {
            strategies: vec![StrategyKind::Office, StrategyKind::Office],
            ..Default::default()
        };
        let err = AppConfig::resolve(&cli, None).unwrap_err();
        assert!(err.to_string().contains("listed more than once"));
    }

    #[test]
    fn test_resolve_rejects_target_outside_allowed_targets() {
        let cli = CliConfig {
            target_format: SpreadsheetFormat::Xlsb,
            ..Default::default()
        };
        let err = AppConfig::resolve(&cli, None).unwrap_err();
        assert!(err.to_string().contains("not among the allowed target formats"));
    }

    #[test]
    fn test_resolve_rejects_upload_dir_inside_output_dir() {
        let cli = CliConfig {
            upload_dir: Some(PathBuf::from("/srv/converted/uploads")),
            output_dir: Some(PathBuf::from("/srv/converted")),
            ..Default::default()
        };
        let err = AppConfig::resolve(&cli, None).unwrap_err();
        assert!(err.to_string().contains("must not be inside output_dir"));
    }

    #[test]
    fn test_resolve_rejects_zero_poll_attempts() {
        let cli = CliConfig {
            output_poll_attempts: 0,
            ..Default::default()
        };
        assert!(AppConfig::resolve(&cli, None).is_err());
    }

    #[test]
    fn test_resolve_rejects_zero_prune_interval() {
        let cli = CliConfig {
            output_retention_hours: 12,
            prune_interval_minutes: 0,
            ..Default::default()
        };
        let err = AppConfig::resolve(&cli, None).unwrap_err();
        assert!(err.to_string().contains("prune_interval_minutes"));
    }

    #[test]
    fn test_empty_secret_counts_as_missing() {
        let cli = CliConfig {
            remote_secret: Some(String::new()),
            ..Default::default()
        };
        let config = AppConfig::resolve(&cli, None).unwrap();
        assert!(config.remote.secret.is_none());
    }

    #[test]
    fn test_build_strategies_keeps_order() {
        let cli = CliConfig {
            strategies: vec![StrategyKind::Library, StrategyKind::Office],
            ..Default::default()
        };
        let config = AppConfig::resolve(&cli, None).unwrap();

        let kinds: Vec<_> = config
            .build_strategies()
            .unwrap()
            .iter()
            .map(|s| s.kind())
            .collect();
        assert_eq!(kinds, vec![StrategyKind::Library, StrategyKind::Office]);
    }

    #[test]
    fn test_server_and_pipeline_config() {
        let cli = CliConfig {
            output_dir: Some(PathBuf::from("/srv/converted")),
            max_upload_bytes: 1024,
            ..Default::default()
        };
        let config = AppConfig::resolve(&cli, None).unwrap();

        let server = config.server_config();
        assert_eq!(server.output_dir, PathBuf::from("/srv/converted"));
        assert_eq!(server.max_upload_bytes, 1024);

        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.default_target, SpreadsheetFormat::Xlsx);
        assert_eq!(pipeline.public_prefix, "/downloads");
        assert_eq!(pipeline.allowed_targets, DEFAULT_TARGET_FORMATS.to_vec());
    }
}
