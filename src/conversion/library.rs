//! Best-effort in-process conversion, used when nothing better is available.
//!
//! Cell values are copied sheet by sheet with `calamine` and written back
//! out with `rust_xlsxwriter`. Styles, formulas, charts and merged cells are
//! not carried over.

use async_trait::async_trait;
use calamine::{open_workbook_auto, Data, Reader};
use rust_xlsxwriter::{Format, Workbook};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

use super::formats::SpreadsheetFormat;
use super::strategy::{ConversionError, ConversionJob, ConversionStrategy, StrategyKind};

const MAX_SHEET_NAME_CHARS: usize = 31;
const DATE_TIME_FORMAT: &str = "yyyy-mm-dd hh:mm:ss";

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkbookStats {
    pub sheets: usize,
    pub cells: usize,
}

pub struct LibraryStrategy;

#[async_trait]
impl ConversionStrategy for LibraryStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Library
    }

    async fn convert(&self, job: &ConversionJob) -> Result<(), ConversionError> {
        if job.target_format != SpreadsheetFormat::Xlsx {
            return Err(ConversionError::ConverterUnavailable(format!(
                "library strategy only writes xlsx, not {}",
                job.target_format
            )));
        }

        tokio::fs::create_dir_all(job.output_dir()).await?;

        let input = job.input_path.clone();
        let output = job.expected_output_path();
        let stats = tokio::task::spawn_blocking(move || copy_workbook(&input, &output))
            .await
            .map_err(|e| ConversionError::LibraryConversion(format!("task failed: {}", e)))??;

        debug!(
            "Job {}: copied {} cells across {} sheets",
            job.id, stats.cells, stats.sheets
        );
        Ok(())
    }
}

/// Re-serializes every sheet of `input` as an xlsx workbook at `output`.
pub fn copy_workbook(input: &Path, output: &Path) -> Result<WorkbookStats, ConversionError> {
    let mut source = open_workbook_auto(input)
        .map_err(|e| ConversionError::LibraryConversion(format!("cannot open workbook: {}", e)))?;

    let mut workbook = Workbook::new();
    let date_format = Format::new().set_num_format(DATE_TIME_FORMAT);
    let mut stats = WorkbookStats::default();
    let mut taken_names = HashSet::new();

    for sheet_name in source.sheet_names() {
        let range = source.worksheet_range(&sheet_name).map_err(|e| {
            ConversionError::LibraryConversion(format!("cannot read sheet {}: {}", sheet_name, e))
        })?;

        let worksheet = workbook.add_worksheet();
        worksheet
            .set_name(unique_sheet_name(&sheet_name, &mut taken_names))
            .map_err(library_error)?;
        stats.sheets += 1;

        let (start_row, start_col) = range.start().unwrap_or((0, 0));
        for (rel_row, rel_col, cell) in range.cells() {
            let row = start_row + rel_row as u32;
            let col = u16::try_from(start_col as usize + rel_col).map_err(|_| {
                ConversionError::LibraryConversion(format!(
                    "sheet {} has more columns than xlsx supports",
                    sheet_name
                ))
            })?;

            let written = match cell {
                Data::Empty => false,
                Data::String(s) => {
                    worksheet.write_string(row, col, s).map_err(library_error)?;
                    true
                }
                Data::Float(f) => {
                    worksheet.write_number(row, col, *f).map_err(library_error)?;
                    true
                }
                Data::Int(i) => {
                    worksheet
                        .write_number(row, col, *i as f64)
                        .map_err(library_error)?;
                    true
                }
                Data::Bool(b) => {
                    worksheet.write_boolean(row, col, *b).map_err(library_error)?;
                    true
                }
                Data::DateTime(dt) => {
                    worksheet
                        .write_number_with_format(row, col, dt.as_f64(), &date_format)
                        .map_err(library_error)?;
                    true
                }
                Data::DateTimeIso(s) | Data::DurationIso(s) => {
                    worksheet.write_string(row, col, s).map_err(library_error)?;
                    true
                }
                Data::Error(e) => {
                    worksheet
                        .write_string(row, col, e.to_string())
                        .map_err(library_error)?;
                    true
                }
            };
            if written {
                stats.cells += 1;
            }
        }
    }

    // An xlsx file needs at least one sheet
    if stats.sheets == 0 {
        workbook.add_worksheet();
    }

    workbook.save(output).map_err(library_error)?;
    Ok(stats)
}

fn library_error(e: rust_xlsxwriter::XlsxError) -> ConversionError {
    ConversionError::LibraryConversion(e.to_string())
}

fn sanitize_sheet_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '[' | ']' | ':' | '*' | '?' | '/' | '\\' => '_',
            _ => c,
        })
        .take(MAX_SHEET_NAME_CHARS)
        .collect();
    let cleaned = cleaned.trim_matches('\'').to_string();
    if cleaned.trim().is_empty() {
        "Sheet".to_string()
    } else {
        cleaned
    }
}

/// Sanitized sheet name that no earlier sheet uses. Sheet names are
/// compared case-insensitively, so `taken` holds lowercased names.
fn unique_sheet_name(name: &str, taken: &mut HashSet<String>) -> String {
    let base = sanitize_sheet_name(name);
    let mut candidate = base.clone();
    let mut n = 2;
    while taken.contains(&candidate.to_lowercase()) {
        let suffix = format!(" ({})", n);
        let keep = MAX_SHEET_NAME_CHARS - suffix.chars().count();
        candidate = format!("{}{}", base.chars().take(keep).collect::<String>(), suffix);
        n += 1;
    }
    taken.insert(candidate.to_lowercase());
    candidate
}
