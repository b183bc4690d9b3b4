//! sheetbridge library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod config;
pub mod conversion;
pub mod server;

// Re-export commonly used types for convenience
pub use config::{AppConfig, CliConfig, FileConfig};
pub use conversion::{ConversionPipeline, ConversionStrategy, SpreadsheetFormat, StrategyKind};
pub use server::{run_server, RequestsLoggingLevel, ServerConfig};
