use super::RequestsLoggingLevel;
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub requests_logging_level: RequestsLoggingLevel,
    pub port: u16,
    pub metrics_port: u16,
    pub frontend_dir_path: Option<String>,
    /// Directory served under `/downloads`.
    pub output_dir: PathBuf,
    pub max_upload_bytes: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            requests_logging_level: RequestsLoggingLevel::Path,
            port: 3000,
            metrics_port: 9091,
            frontend_dir_path: None,
            output_dir: PathBuf::from("converted"),
            max_upload_bytes: 50 * 1024 * 1024,
        }
    }
}
