//! Shared constants for end-to-end tests
//!
//! This module contains all constants used across the test suite.
//! When test data changes (file names, secrets, limits, etc.),
//! update only this file.

// ============================================================================
// Test Uploads
// ============================================================================

/// Legacy workbook name; its content is opaque to content sniffing
pub const LEGACY_UPLOAD_NAME: &str = "report.xls";

/// Bytes uploaded as a legacy workbook
pub const LEGACY_UPLOAD_BYTES: &[u8] = b"legacy workbook contents";

/// Name used for real xlsx uploads built with rust_xlsxwriter
pub const XLSX_UPLOAD_NAME: &str = "quarterly.xlsx";

/// Sheet written into generated xlsx uploads
pub const XLSX_SHEET_NAME: &str = "Totals";

/// A file type the service must refuse
pub const TEXT_UPLOAD_NAME: &str = "notes.txt";

/// Pattern every successful download URL must match
pub const DOWNLOAD_URL_PATTERN: &str = r"^/downloads/converted-\d+\.xlsx$";

// ============================================================================
// Remote API
// ============================================================================

/// Secret the mock conversion API expects
pub const REMOTE_SECRET: &str = "test-secret";

/// Bytes the mock conversion API returns
pub const REMOTE_CONVERTED_BYTES: &[u8] = b"converted by remote api";

// ============================================================================
// Timeouts and limits
// ============================================================================

/// Maximum time to wait for server to become ready
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Timeout for individual HTTP requests
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Interval between readiness checks
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 50;

/// Output polling in tests, kept short so missing outputs fail fast
pub const OUTPUT_POLL_INTERVAL_MS: u64 = 20;
pub const OUTPUT_POLL_ATTEMPTS: u32 = 5;

/// Upload limit used by test servers unless overridden
pub const TEST_MAX_UPLOAD_BYTES: u64 = 1024 * 1024;
