//! Test fixtures: fake office binaries, real workbooks and a mock
//! conversion API.

use super::constants::*;
use anyhow::Result;
use axum::{extract::Multipart, http::HeaderMap, http::StatusCode, routing::post, Json, Router};
use base64::Engine;
use rust_xlsxwriter::Workbook;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tokio::net::TcpListener;

/// Copies its input to `<outdir>/<stem>.<ext>`, the way soffice names its output.
const FAKE_SOFFICE_SCRIPT: &str = r#"#!/bin/sh
outdir=""
target=""
input=""
while [ $# -gt 0 ]; do
  case "$1" in
    --outdir) outdir="$2"; shift 2 ;;
    --convert-to) target="${2%%:*}"; shift 2 ;;
    -*) shift ;;
    *) input="$1"; shift ;;
  esac
done
name=$(basename "$input")
cp "$input" "$outdir/${name%.*}.$target"
"#;

const FAILING_SOFFICE_SCRIPT: &str = r#"#!/bin/sh
echo "Error: source file could not be loaded" >&2
exit 1
"#;

#[cfg(unix)]
fn write_script(dir: &Path, name: &str, content: &str) -> Result<PathBuf> {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, content)?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
    Ok(path)
}

/// Writes an executable stand-in for soffice that succeeds.
#[cfg(unix)]
pub fn write_fake_soffice(dir: &Path) -> Result<PathBuf> {
    write_script(dir, "soffice", FAKE_SOFFICE_SCRIPT)
}

/// Writes a stand-in for soffice that takes `delay_secs` before producing output.
#[cfg(unix)]
pub fn write_slow_soffice(dir: &Path, delay_secs: u32) -> Result<PathBuf> {
    let script = FAKE_SOFFICE_SCRIPT.replacen(
        "#!/bin/sh\n",
        &format!("#!/bin/sh\nsleep {}\n", delay_secs),
        1,
    );
    write_script(dir, "soffice-slow", &script)
}

/// Writes an executable stand-in for soffice that always fails.
#[cfg(unix)]
pub fn write_failing_soffice(dir: &Path) -> Result<PathBuf> {
    write_script(dir, "soffice-broken", FAILING_SOFFICE_SCRIPT)
}

/// Builds a real xlsx workbook with a header row and two data rows.
pub fn xlsx_workbook_bytes() -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name(XLSX_SHEET_NAME)?;
    sheet.write_string(0, 0, "region")?;
    sheet.write_string(0, 1, "total")?;
    sheet.write_string(1, 0, "north")?;
    sheet.write_number(1, 1, 1250.5)?;
    sheet.write_string(2, 0, "south")?;
    sheet.write_number(2, 1, 980.0)?;
    Ok(workbook.save_to_buffer()?)
}

async fn mock_convert(headers: HeaderMap, mut multipart: Multipart) -> (StatusCode, Json<Value>) {
    let authorized = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {}", REMOTE_SECRET))
        .unwrap_or(false);
    if !authorized {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "Code": 4013, "Message": "Invalid secret" })),
        );
    }

    let mut received_file = false;
    while let Ok(Some(field)) = multipart.next_field().await {
        let is_file = field.name() == Some("File");
        if field.bytes().await.is_ok() && is_file {
            received_file = true;
        }
    }
    if !received_file {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "Code": 4000, "Message": "File is missing" })),
        );
    }

    let data = base64::engine::general_purpose::STANDARD.encode(REMOTE_CONVERTED_BYTES);
    (
        StatusCode::OK,
        Json(json!({ "Files": [{ "FileName": "report.xlsx", "FileData": data }] })),
    )
}

/// Serves a ConvertAPI-compatible endpoint on a random port and returns its base URL.
pub async fn spawn_mock_convert_api() -> Result<String> {
    let router = Router::new().route("/convert/{from}/to/{to}", post(mock_convert));
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok(format!("http://{}", addr))
}
