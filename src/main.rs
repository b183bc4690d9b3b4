use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sheetbridge::config::{
    AppConfig, CliConfig, FileConfig, DEFAULT_MAX_UPLOAD_BYTES, DEFAULT_METRICS_PORT,
    DEFAULT_OUTPUT_POLL_ATTEMPTS, DEFAULT_OUTPUT_POLL_INTERVAL_MS, DEFAULT_PORT,
    DEFAULT_PRUNE_INTERVAL_MINUTES, DEFAULT_REMOTE_TIMEOUT_SEC,
};
use sheetbridge::conversion::spawn_retention_sweep;
use sheetbridge::server::{metrics, run_server};
use sheetbridge::{RequestsLoggingLevel, SpreadsheetFormat, StrategyKind};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
#[command(version, about = "Spreadsheet conversion HTTP service")]
struct CliArgs {
    /// Path to a TOML config file. Values in it override the CLI.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory for per-request upload work directories.
    #[clap(long, value_parser = parse_path)]
    pub upload_dir: Option<PathBuf>,

    /// Directory converted files are written to and served from.
    #[clap(long, value_parser = parse_path)]
    pub output_dir: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Path to the frontend directory to be statically served instead of the built-in form.
    #[clap(long)]
    pub frontend_dir_path: Option<String>,

    /// Target format used when a request doesn't name one.
    #[clap(long, value_enum, default_value = "xlsx")]
    pub target_format: SpreadsheetFormat,

    /// Target formats a request may ask for.
    #[clap(long, value_enum, value_delimiter = ',')]
    pub target_formats: Vec<SpreadsheetFormat>,

    /// Upload formats accepted.
    #[clap(long, value_enum, value_delimiter = ',')]
    pub allowed_formats: Vec<SpreadsheetFormat>,

    /// Conversion strategies, tried in order.
    #[clap(long, value_enum, value_delimiter = ',')]
    pub strategies: Vec<StrategyKind>,

    /// Office binary candidates, probed in order.
    #[clap(long = "office-path")]
    pub office_paths: Vec<PathBuf>,

    /// Base URL of the remote conversion API.
    #[clap(long)]
    pub remote_url: Option<String>,

    /// Secret for the remote conversion API.
    #[clap(long, env = "CONVERTAPI_SECRET", hide_env_values = true)]
    pub remote_secret: Option<String>,

    /// Timeout in seconds for remote conversion requests.
    #[clap(long, default_value_t = DEFAULT_REMOTE_TIMEOUT_SEC)]
    pub remote_timeout_sec: u64,

    /// Maximum accepted upload size in bytes.
    #[clap(long, default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: u64,

    /// Delay between checks for a strategy's output file.
    #[clap(long, default_value_t = DEFAULT_OUTPUT_POLL_INTERVAL_MS)]
    pub output_poll_interval_ms: u64,

    /// Number of checks for a strategy's output file before giving up.
    #[clap(long, default_value_t = DEFAULT_OUTPUT_POLL_ATTEMPTS)]
    pub output_poll_attempts: u32,

    /// Hours to keep converted files. Set to 0 to keep them forever.
    #[clap(long, default_value_t = 0)]
    pub output_retention_hours: u64,

    /// Interval in minutes between retention sweeps. Only used if output_retention_hours > 0.
    #[clap(long, default_value_t = DEFAULT_PRUNE_INTERVAL_MINUTES)]
    pub prune_interval_minutes: u64,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            upload_dir: self.upload_dir.clone(),
            output_dir: self.output_dir.clone(),
            port: self.port,
            metrics_port: self.metrics_port,
            logging_level: self.logging_level.clone(),
            frontend_dir_path: self.frontend_dir_path.clone(),
            target_format: self.target_format,
            target_formats: self.target_formats.clone(),
            allowed_formats: self.allowed_formats.clone(),
            strategies: self.strategies.clone(),
            office_paths: self.office_paths.clone(),
            remote_url: self.remote_url.clone(),
            remote_secret: self.remote_secret.clone(),
            remote_timeout_sec: self.remote_timeout_sec,
            max_upload_bytes: self.max_upload_bytes,
            output_poll_interval_ms: self.output_poll_interval_ms,
            output_poll_attempts: self.output_poll_attempts,
            output_retention_hours: self.output_retention_hours,
            prune_interval_minutes: self.prune_interval_minutes,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    info!("Initializing metrics...");
    metrics::init_metrics();

    let pipeline = Arc::new(config.build_pipeline()?);
    pipeline.init().await.with_context(|| {
        format!(
            "Failed to create directories {:?} and {:?}",
            config.upload_dir, config.output_dir
        )
    })?;

    let office_locator = Arc::new(config.office_locator());
    match office_locator.locate() {
        Some(path) => info!("Office converter found at {:?}", path),
        None => info!("No office converter found"),
    }
    info!(
        "Conversion strategies: {}",
        config
            .strategies
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    if let Some(retention) = &config.retention {
        spawn_retention_sweep(
            config.output_dir.clone(),
            retention.max_age,
            retention.interval,
        );
    }

    info!("Ready to serve at port {}!", config.port);
    info!("Metrics available at port {}!", config.metrics_port);
    run_server(config.server_config(), pipeline, office_locator).await
}
