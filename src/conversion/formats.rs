//! Spreadsheet formats understood by the conversion pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// MIME types that identify a spreadsheet when declared by a client.
pub const SPREADSHEET_MIME_TYPES: &[&str] = &[
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.ms-excel.sheet.binary.macroenabled.12",
    "application/vnd.oasis.opendocument.spreadsheet",
    "application/xls",
    "application/xlsx",
    "application/x-excel",
];

/// Sniffed MIME types of the containers spreadsheets are stored in.
/// xlsx/ods are zip archives and xls is an OLE compound file, so content
/// sniffing may only get this far.
pub const SPREADSHEET_CONTAINER_MIME_TYPES: &[&str] =
    &["application/zip", "application/x-ole-storage", "application/x-cfb"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SpreadsheetFormat {
    Xls,
    Xlsx,
    Xlsb,
    Ods,
}

impl SpreadsheetFormat {
    pub const ALL: [SpreadsheetFormat; 4] = [Self::Xls, Self::Xlsx, Self::Xlsb, Self::Ods];

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Xls => "xls",
            Self::Xlsx => "xlsx",
            Self::Xlsb => "xlsb",
            Self::Ods => "ods",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Xls => "application/vnd.ms-excel",
            Self::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            Self::Xlsb => "application/vnd.ms-excel.sheet.binary.macroenabled.12",
            Self::Ods => "application/vnd.oasis.opendocument.spreadsheet",
        }
    }

    /// Value passed to `soffice --convert-to`, including the export filter.
    pub fn office_filter(&self) -> &'static str {
        match self {
            Self::Xls => "xls:MS Excel 97",
            Self::Xlsx => "xlsx:Calc MS Excel 2007 XML",
            Self::Xlsb => "xlsb:Calc MS Excel 2007 Binary",
            Self::Ods => "ods:calc8",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        let ext = ext.trim_start_matches('.').to_lowercase();
        Self::ALL.into_iter().find(|f| f.extension() == ext)
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }
}

impl fmt::Display for SpreadsheetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

pub fn is_spreadsheet_mime(mime: &str) -> bool {
    let mime = mime.to_lowercase();
    SPREADSHEET_MIME_TYPES.contains(&mime.as_str())
}
