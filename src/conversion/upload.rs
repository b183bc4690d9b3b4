//! Upload storage and validation.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::formats::{
    is_spreadsheet_mime, SpreadsheetFormat, SPREADSHEET_CONTAINER_MIME_TYPES,
};
use super::strategy::ConversionError;

/// Errors that can occur while storing an upload.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid filename: {0}")]
    InvalidFilename(String),

    #[error("File too large: more than {0} bytes")]
    FileTooLarge(u64),
}

/// A file received from a client and stored in its job directory.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub original_name: String,
    pub stored_name: String,
    pub declared_mime: Option<String>,
    pub sniffed_mime: Option<String>,
    pub path: PathBuf,
    pub size: u64,
}

impl UploadedFile {
    /// Format named by the stored file's extension.
    pub fn format(&self) -> Option<SpreadsheetFormat> {
        SpreadsheetFormat::from_path(Path::new(&self.stored_name))
    }
}

/// Stores uploads in per-job directories under a common root.
pub struct UploadStore {
    upload_dir: PathBuf,
    max_file_size: u64,
}

impl UploadStore {
    pub fn new(upload_dir: impl Into<PathBuf>, max_file_size: u64) -> Self {
        Self {
            upload_dir: upload_dir.into(),
            max_file_size,
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Creates the upload root.
    pub async fn init(&self) -> Result<(), UploadError> {
        fs::create_dir_all(&self.upload_dir).await?;
        Ok(())
    }

    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.upload_dir.join(job_id)
    }

    /// Starts writing an upload into the job directory.
    pub async fn begin(
        &self,
        job_id: &str,
        filename: &str,
        declared_mime: Option<String>,
    ) -> Result<PendingUpload, UploadError> {
        let stored_name = sanitize_filename(filename)?;
        let job_dir = self.job_dir(job_id);
        fs::create_dir_all(&job_dir).await?;

        let path = job_dir.join(&stored_name);
        let file = fs::File::create(&path).await?;

        Ok(PendingUpload {
            file,
            path,
            written: 0,
            max_file_size: self.max_file_size,
            original_name: filename.to_string(),
            stored_name,
            declared_mime,
        })
    }

    /// Removes the job directory with everything in it.
    pub async fn discard(&self, job_id: &str) -> Result<(), UploadError> {
        remove_dir_if_exists(&self.job_dir(job_id)).await?;
        Ok(())
    }
}

/// An upload being streamed to disk.
#[derive(Debug)]
pub struct PendingUpload {
    file: fs::File,
    path: PathBuf,
    written: u64,
    max_file_size: u64,
    original_name: String,
    stored_name: String,
    declared_mime: Option<String>,
}

impl PendingUpload {
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), UploadError> {
        self.written += chunk.len() as u64;
        if self.written > self.max_file_size {
            return Err(UploadError::FileTooLarge(self.max_file_size));
        }
        self.file.write_all(chunk).await?;
        Ok(())
    }

    pub async fn finish(mut self) -> Result<UploadedFile, UploadError> {
        self.file.flush().await?;
        drop(self.file);

        let sniffed_mime = infer::get_from_path(&self.path)?.map(|kind| kind.mime_type().to_string());

        Ok(UploadedFile {
            original_name: self.original_name,
            stored_name: self.stored_name,
            declared_mime: self.declared_mime,
            sniffed_mime,
            path: self.path,
            size: self.written,
        })
    }
}

/// Accepts only allow-listed spreadsheet uploads.
#[derive(Debug, Clone)]
pub struct UploadValidator {
    allowed: Vec<SpreadsheetFormat>,
}

impl UploadValidator {
    pub fn new(allowed: Vec<SpreadsheetFormat>) -> Self {
        Self { allowed }
    }

    pub fn validate(&self, upload: &UploadedFile) -> Result<SpreadsheetFormat, ConversionError> {
        let format = upload
            .format()
            .filter(|f| self.allowed.contains(f))
            .ok_or_else(|| {
                ConversionError::Validation(format!(
                    "file type not allowed, expected one of: {}",
                    self.allowed_list()
                ))
            })?;

        if let Some(mime) = &upload.declared_mime {
            if mime != "application/octet-stream" && !is_spreadsheet_mime(mime) {
                return Err(ConversionError::Validation(format!(
                    "content type {} is not a spreadsheet",
                    mime
                )));
            }
        }

        if let Some(mime) = &upload.sniffed_mime {
            if !is_spreadsheet_mime(mime)
                && !SPREADSHEET_CONTAINER_MIME_TYPES.contains(&mime.as_str())
            {
                return Err(ConversionError::Validation(format!(
                    "file content looks like {}, not a spreadsheet",
                    mime
                )));
            }
        }

        if upload.size == 0 {
            return Err(ConversionError::Validation("file is empty".to_string()));
        }

        Ok(format)
    }

    fn allowed_list(&self) -> String {
        self.allowed
            .iter()
            .map(|f| format!(".{}", f.extension()))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Deletes a file, treating a missing file as already deleted.
pub async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Deletes a directory tree, treating a missing directory as already deleted.
pub async fn remove_dir_if_exists(path: &Path) -> std::io::Result<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Longest file name most filesystems accept, in bytes.
const MAX_FILENAME_BYTES: usize = 255;

/// Sanitize a filename to prevent path traversal attacks.
fn sanitize_filename(filename: &str) -> Result<String, UploadError> {
    // Clients on Windows may send backslash separated paths
    let last_component = filename.rsplit(['/', '\\']).next().unwrap_or(filename);

    let name = Path::new(last_component)
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| UploadError::InvalidFilename(filename.to_string()))?;

    // Null bytes and hidden files are never allowed
    if name.contains('\0') || name.starts_with('.') {
        return Err(UploadError::InvalidFilename(filename.to_string()));
    }

    let sanitized: String = name
        .chars()
        .map(|c| match c {
            ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            _ => c,
        })
        .collect();

    if sanitized.trim().is_empty() || sanitized.len() > MAX_FILENAME_BYTES {
        return Err(UploadError::InvalidFilename(filename.to_string()));
    }

    Ok(sanitized)
}
