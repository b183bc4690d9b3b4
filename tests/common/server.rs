//! Test server lifecycle management
//!
//! This module manages spawning and shutting down test HTTP servers.
//! Each test gets an isolated server with its own upload and output directories.

use super::constants::*;
use sheetbridge::config::{AppConfig, CliConfig};
use sheetbridge::server::{make_app, RequestsLoggingLevel};
use sheetbridge::{SpreadsheetFormat, StrategyKind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Settings a test can change before spawning a server.
pub struct TestServerBuilder {
    strategies: Vec<StrategyKind>,
    office_paths: Vec<PathBuf>,
    remote_url: Option<String>,
    remote_secret: Option<String>,
    target_formats: Vec<SpreadsheetFormat>,
    max_upload_bytes: u64,
}

impl TestServerBuilder {
    pub fn strategies(mut self, strategies: &[StrategyKind]) -> Self {
        self.strategies = strategies.to_vec();
        self
    }

    /// Office binary candidates. Without this the office strategy finds nothing.
    pub fn office_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.office_paths = paths;
        self
    }

    pub fn remote(mut self, base_url: String, secret: &str) -> Self {
        self.remote_url = Some(base_url);
        self.remote_secret = Some(secret.to_string());
        self
    }

    pub fn target_formats(mut self, formats: &[SpreadsheetFormat]) -> Self {
        self.target_formats = formats.to_vec();
        self
    }

    pub fn max_upload_bytes(mut self, max_upload_bytes: u64) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self
    }

    /// Spawns the server on a random port
    ///
    /// # Panics
    ///
    /// Panics if the configuration is invalid, binding fails, or the server
    /// doesn't become ready within timeout.
    pub async fn spawn(self) -> TestServer {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let upload_dir = temp_dir.path().join("uploads");
        let output_dir = temp_dir.path().join("converted");

        let office_paths = if self.office_paths.is_empty() {
            vec![temp_dir.path().join("no-office-installed")]
        } else {
            self.office_paths
        };

        let cli = CliConfig {
            upload_dir: Some(upload_dir.clone()),
            output_dir: Some(output_dir.clone()),
            logging_level: RequestsLoggingLevel::None,
            strategies: self.strategies,
            office_paths,
            remote_url: self.remote_url,
            remote_secret: self.remote_secret,
            target_formats: self.target_formats,
            max_upload_bytes: self.max_upload_bytes,
            output_poll_interval_ms: OUTPUT_POLL_INTERVAL_MS,
            output_poll_attempts: OUTPUT_POLL_ATTEMPTS,
            ..Default::default()
        };
        let config = AppConfig::resolve(&cli, None).expect("Invalid test configuration");

        let pipeline = Arc::new(config.build_pipeline().expect("Failed to build pipeline"));
        pipeline.init().await.expect("Failed to create directories");

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let app = make_app(
            config.server_config(),
            pipeline,
            Arc::new(config.office_locator()),
        )
        .expect("Failed to build app");

        // Spawn server in background task with graceful shutdown
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        let server = TestServer {
            base_url,
            port,
            upload_dir,
            output_dir,
            _temp_dir: temp_dir,
            _shutdown_tx: Some(shutdown_tx),
        };

        server.wait_for_ready().await;

        server
    }
}

/// Test server instance with isolated directories
///
/// When dropped, the server gracefully shuts down and temp resources are cleaned up.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// The port the server is listening on
    #[allow(dead_code)]
    pub port: u16,

    /// Root of the per-request work directories
    pub upload_dir: PathBuf,

    /// Where converted files land
    pub output_dir: PathBuf,

    // Private fields - keep resources alive until drop
    _temp_dir: TempDir,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    pub fn builder() -> TestServerBuilder {
        TestServerBuilder {
            strategies: vec![StrategyKind::Office, StrategyKind::Library],
            office_paths: Vec::new(),
            remote_url: None,
            remote_secret: None,
            target_formats: Vec::new(),
            max_upload_bytes: TEST_MAX_UPLOAD_BYTES,
        }
    }

    /// Spawns a server with the office and library strategies and no office binary
    pub async fn spawn() -> Self {
        Self::builder().spawn().await
    }

    /// Number of entries left in the upload directory
    pub fn leftover_uploads(&self) -> usize {
        std::fs::read_dir(&self.upload_dir)
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    /// Names of the files in the output directory
    pub fn converted_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(&self.output_dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().to_string())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Waits for the server to become ready by polling the /health endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/health", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        // Send shutdown signal
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
        // TempDir will be cleaned up automatically
    }
}
