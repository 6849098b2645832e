//! Format probe: classify an input path by magic bytes and extension

use crate::error::{EngineError, Result};
use serde::Serialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;

const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];
const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

/// Input formats the engine can stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FileFormat {
    /// OOXML spreadsheet package
    Xlsx,
    /// Delimited text (comma, semicolon or tab separated)
    Delimited,
    /// Line-delimited JSON (one array or object per line)
    JsonLines,
    /// A ZIP container that is not an OOXML spreadsheet
    ArchiveUnknown,
    /// Could not classify
    Unknown,
}

impl FileFormat {
    /// MIME hint for the detected format
    pub fn mime_hint(&self) -> &'static str {
        match self {
            FileFormat::Xlsx => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            FileFormat::Delimited => "text/csv",
            FileFormat::JsonLines => "application/x-ndjson",
            FileFormat::ArchiveUnknown => "application/zip",
            FileFormat::Unknown => "application/octet-stream",
        }
    }
}

/// Result of probing a path
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub format: FileFormat,
    pub mime_hint: &'static str,
    /// Classification confidence in [0, 1]
    pub confidence: f64,
    /// Detected text encoding, when meaningful
    pub encoding: Option<&'static str>,
}

impl ProbeReport {
    fn new(format: FileFormat, confidence: f64, encoding: Option<&'static str>) -> Self {
        ProbeReport {
            format,
            mime_hint: format.mime_hint(),
            confidence,
            encoding,
        }
    }
}

/// Classify a file by its first bytes and lower-cased extension.
///
/// Fails only when the path is missing, unreadable or zero-byte; a content
/// mismatch reports [`FileFormat::Unknown`] instead.
///
/// # Examples
///
/// ```no_run
/// use sheetstream::probe::{probe, FileFormat};
///
/// let report = probe("data.xlsx")?;
/// assert_eq!(report.format, FileFormat::Xlsx);
/// # Ok::<(), sheetstream::EngineError>(())
/// ```
pub fn probe<P: AsRef<Path>>(path: P) -> Result<ProbeReport> {
    let path = path.as_ref();
    let mut file = File::open(path)
        .map_err(|e| EngineError::FileUnreadable(format!("{}: {}", path.display(), e)))?;

    let mut head = [0u8; 8];
    let mut filled = 0;
    while filled < head.len() {
        let n = file
            .read(&mut head[filled..])
            .map_err(|e| EngineError::FileUnreadable(format!("{}: {}", path.display(), e)))?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    if filled == 0 {
        return Err(EngineError::FileUnreadable(format!(
            "{}: zero-byte file",
            path.display()
        )));
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    if head[..filled.min(4)] == ZIP_MAGIC {
        return Ok(probe_archive(path));
    }

    match ext.as_str() {
        "csv" | "tsv" | "txt" => {
            let (valid, bom) = sample_is_utf8(path, &head[..filled]);
            if valid {
                let encoding = if bom { "utf-8-bom" } else { "utf-8" };
                return Ok(ProbeReport::new(
                    FileFormat::Delimited,
                    0.9,
                    Some(encoding),
                ));
            }
        }
        "json" | "jsonl" | "ndjson" => {
            let first = head[..filled]
                .iter()
                .copied()
                .find(|b| !b.is_ascii_whitespace());
            if matches!(first, Some(b'[') | Some(b'{')) {
                return Ok(ProbeReport::new(FileFormat::JsonLines, 0.9, Some("utf-8")));
            }
        }
        _ => {}
    }

    Ok(ProbeReport::new(FileFormat::Unknown, 0.0, None))
}

/// Confirm an archive candidate by looking for the OOXML package members
fn probe_archive(path: &Path) -> ProbeReport {
    let confirmed = File::open(path)
        .ok()
        .and_then(|f| zip::ZipArchive::new(f).ok())
        .map(|mut archive| {
            archive.by_name("[Content_Types].xml").is_ok()
                && archive.by_name("xl/workbook.xml").is_ok()
        })
        .unwrap_or(false);

    if confirmed {
        ProbeReport::new(FileFormat::Xlsx, 1.0, None)
    } else {
        ProbeReport::new(FileFormat::ArchiveUnknown, 0.5, None)
    }
}

/// Check a leading sample of the file for valid UTF-8 (BOM allowed).
///
/// A multi-byte sequence cut at the sample boundary is not held against the
/// file.
fn sample_is_utf8(path: &Path, head: &[u8]) -> (bool, bool) {
    let mut sample = Vec::with_capacity(8192);
    sample.extend_from_slice(head);
    if let Ok(mut file) = File::open(path) {
        let mut buf = vec![0u8; 8192];
        if let Ok(n) = file.read(&mut buf) {
            sample.clear();
            sample.extend_from_slice(&buf[..n]);
        }
    }

    let bom = sample.starts_with(&UTF8_BOM);
    let body = if bom { &sample[3..] } else { &sample[..] };
    match std::str::from_utf8(body) {
        Ok(_) => (true, bom),
        Err(e) => {
            // Only a clean cut at the very end of the sample is tolerated
            let valid = e.error_len().is_none();
            (valid, bom)
        }
    }
}
