//! Spreadsheet conversion: upload handling, conversion strategies and the
//! pipeline that ties them together.

mod formats;
mod library;
mod office;
mod pipeline;
mod remote;
mod retention;
mod strategy;
mod upload;

pub use formats::{is_spreadsheet_mime, SpreadsheetFormat};
pub use library::{copy_workbook, LibraryStrategy, WorkbookStats};
pub use office::{
    default_search_paths, locate_office_binary, OfficeStrategy, DEFAULT_OFFICE_SEARCH_PATHS,
};
pub use pipeline::{
    ConversionPipeline, ConvertedFile, JobState, OutputWait, PipelineConfig, PipelineError,
    StrategyFailure, OUTPUT_FILE_PREFIX,
};
pub use remote::{RemoteStrategy, DEFAULT_REMOTE_BASE_URL};
pub use retention::{prune_converted_files, spawn_retention_sweep};
pub use strategy::{ConversionError, ConversionJob, ConversionStrategy, StrategyKind};
pub use upload::{
    remove_dir_if_exists, remove_if_exists, PendingUpload, UploadError, UploadStore,
    UploadValidator, UploadedFile,
};
