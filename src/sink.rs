//! Row sink facade: format dispatch, header handling and poisoning

use crate::csv_writer::CsvSink;
use crate::error::{EngineError, Result};
use crate::jsonl::JsonlWriter;
use crate::settings::Settings;
use crate::types::CellValue;
use crate::xlsx_writer::XlsxSink;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

/// Output formats a sink can serialize
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkFormat {
    Xlsx,
    Delimited,
    JsonLines,
}

enum SinkBackend {
    Xlsx(XlsxSink),
    Delimited(CsvSink),
    JsonLines(JsonlWriter),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SinkState {
    Ready,
    Poisoned,
    Finished,
}

/// Accepts rows one at a time and serializes them to the output format
/// chosen from the path's extension.
///
/// A failed write poisons the sink: subsequent calls other than
/// [`finish`](RowSink::finish) fail immediately, and `finish` on a poisoned
/// sink deletes the partial file and returns the original error. Dropping an
/// unfinished sink also removes the partial file.
///
/// # Examples
///
/// ```no_run
/// use sheetstream::sink::RowSink;
/// use sheetstream::settings::Settings;
/// use sheetstream::types::CellValue;
///
/// let mut sink = RowSink::create("out.xlsx", &Settings::default())?;
/// sink.write_header(["name", "age"])?;
/// sink.write_row(&[CellValue::Str("Alice".into()), CellValue::Int(30)])?;
/// sink.finish()?;
/// # Ok::<(), sheetstream::EngineError>(())
/// ```
pub struct RowSink {
    backend: SinkBackend,
    format: SinkFormat,
    path: PathBuf,
    state: SinkState,
    poison: Option<EngineError>,
    header_written: bool,
    rows_written: u64,
}

impl RowSink {
    /// Open the output file, picking the format from the extension
    pub fn create<P: AsRef<Path>>(path: P, settings: &Settings) -> Result<Self> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        let format = match ext.as_str() {
            "xlsx" => SinkFormat::Xlsx,
            "csv" | "txt" | "tsv" => SinkFormat::Delimited,
            "json" | "jsonl" | "ndjson" => SinkFormat::JsonLines,
            other => {
                return Err(EngineError::FormatUnknown(format!(
                    "cannot infer output format from extension '{}'",
                    other
                )))
            }
        };
        let mut sink = Self::create_with_format(path, format, settings)?;
        if ext == "tsv" {
            sink = sink.delimiter(b'\t');
        }
        Ok(sink)
    }

    /// Open the output file with an explicit format, ignoring the extension
    pub fn create_with_format<P: AsRef<Path>>(
        path: P,
        format: SinkFormat,
        settings: &Settings,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let backend = match format {
            SinkFormat::Xlsx => SinkBackend::Xlsx(XlsxSink::create(&path)?),
            SinkFormat::Delimited => {
                SinkBackend::Delimited(CsvSink::create(&path, settings.write_buffer_bytes)?)
            }
            SinkFormat::JsonLines => {
                SinkBackend::JsonLines(JsonlWriter::create(&path, settings.write_buffer_bytes)?)
            }
        };

        Ok(RowSink {
            backend,
            format,
            path,
            state: SinkState::Ready,
            poison: None,
            header_written: false,
            rows_written: 0,
        })
    }

    /// The output format in effect
    pub fn format(&self) -> SinkFormat {
        self.format
    }

    /// Reconfigure the delimited backend's delimiter; ignored elsewhere
    pub fn delimiter(mut self, delimiter: u8) -> Self {
        if let SinkBackend::Delimited(sink) = &mut self.backend {
            sink.set_delimiter(delimiter);
        }
        self
    }

    /// Emit a UTF-8 BOM (delimited output only)
    pub fn with_bom(mut self, bom: bool) -> Self {
        if let SinkBackend::Delimited(sink) = &mut self.backend {
            sink.set_bom(bom);
        }
        self
    }

    /// Per-column date-time format override (delimited output only)
    pub fn datetime_format(mut self, column: usize, format: &str) -> Self {
        if let SinkBackend::Delimited(sink) = &mut self.backend {
            sink.set_datetime_format(column, format);
        }
        self
    }

    /// Write the header row. At most once, and before any data row.
    pub fn write_header<I, S>(&mut self, names: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.ensure_writable()?;
        if self.header_written {
            return Err(EngineError::SinkWrite(
                "header may be written at most once".to_string(),
            ));
        }
        if self.rows_written > 0 {
            return Err(EngineError::SinkWrite(
                "header must precede data rows".to_string(),
            ));
        }

        let cells: Vec<CellValue> = names
            .into_iter()
            .map(|s| CellValue::Str(s.as_ref().to_string()))
            .collect();
        match self.backend_write(&cells) {
            Ok(()) => {
                self.header_written = true;
                Ok(())
            }
            Err(e) => Err(self.poison(e)),
        }
    }

    /// Append one logical row
    pub fn write_row(&mut self, cells: &[CellValue]) -> Result<()> {
        self.ensure_writable()?;
        match self.backend_write(cells) {
            Ok(()) => {
                self.rows_written += 1;
                Ok(())
            }
            Err(e) => Err(self.poison(e)),
        }
    }

    /// Convenience loop over in-memory rows
    pub fn write_rows<I>(&mut self, rows: I) -> Result<()>
    where
        I: IntoIterator<Item = Vec<CellValue>>,
    {
        for row in rows {
            self.write_row(&row)?;
        }
        Ok(())
    }

    /// Drain a cursor-style source of named records in a single pass.
    ///
    /// The first record's keys become the header; later records are
    /// projected onto those keys. At most one record plus the write buffer
    /// is resident at a time.
    pub fn write_from<I>(&mut self, cursor: I) -> Result<u64>
    where
        I: IntoIterator<Item = IndexMap<String, CellValue>>,
    {
        let mut keys: Option<Vec<String>> = None;
        let mut count = 0u64;

        for mut record in cursor {
            let keys = keys.get_or_insert_with(|| {
                let first: Vec<String> = record.keys().cloned().collect();
                first
            });
            if !self.header_written && count == 0 {
                let names: Vec<&str> = keys.iter().map(|k| k.as_str()).collect();
                self.write_header(names)?;
            }
            let cells: Vec<CellValue> = keys
                .iter()
                .map(|key| record.swap_remove(key).unwrap_or(CellValue::Null))
                .collect();
            self.write_row(&cells)?;
            count += 1;
        }

        Ok(count)
    }

    /// Flush buffered bytes to the output
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_writable()?;
        let result = match &mut self.backend {
            SinkBackend::Xlsx(sink) => sink.flush(),
            SinkBackend::Delimited(sink) => sink.flush(),
            SinkBackend::JsonLines(sink) => sink.flush(),
        };
        result.map_err(|e| self.poison(e))
    }

    /// Rows written so far (the header is not a data row)
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Finalize the output. Idempotent after success. On a poisoned sink,
    /// deletes the partial file and returns the original write error.
    pub fn finish(&mut self) -> Result<()> {
        match self.state {
            SinkState::Finished => Ok(()),
            SinkState::Poisoned => {
                self.abandon_backend();
                let _ = std::fs::remove_file(&self.path);
                self.state = SinkState::Finished;
                Err(self.poison.take().unwrap_or_else(|| {
                    EngineError::SinkWrite("sink poisoned by an earlier write error".to_string())
                }))
            }
            SinkState::Ready => {
                let result = match &mut self.backend {
                    SinkBackend::Xlsx(sink) => sink.finish(),
                    SinkBackend::Delimited(sink) => sink.finish(),
                    SinkBackend::JsonLines(sink) => sink.finish(),
                };
                match result {
                    Ok(()) => {
                        self.state = SinkState::Finished;
                        Ok(())
                    }
                    Err(e) => {
                        let err = self.poison(e);
                        self.abandon_backend();
                        let _ = std::fs::remove_file(&self.path);
                        self.state = SinkState::Finished;
                        Err(err)
                    }
                }
            }
        }
    }

    /// Close without finalizing: buffered bytes are discarded and the
    /// partial output file is removed. Idempotent.
    pub fn close(&mut self) {
        if self.state == SinkState::Finished {
            return;
        }
        self.abandon_backend();
        let _ = std::fs::remove_file(&self.path);
        self.state = SinkState::Finished;
    }

    fn backend_write(&mut self, cells: &[CellValue]) -> Result<()> {
        match &mut self.backend {
            SinkBackend::Xlsx(sink) => sink.write_row(cells),
            SinkBackend::Delimited(sink) => sink.write_row(cells),
            SinkBackend::JsonLines(sink) => sink.write_row(cells),
        }
    }

    fn ensure_writable(&self) -> Result<()> {
        match self.state {
            SinkState::Ready => Ok(()),
            SinkState::Poisoned => Err(EngineError::SinkWrite(
                "sink is poisoned; call finish to clean up".to_string(),
            )),
            SinkState::Finished => Err(EngineError::SinkWrite(
                "sink already finished".to_string(),
            )),
        }
    }

    fn poison(&mut self, err: EngineError) -> EngineError {
        let message = err.to_string();
        self.state = SinkState::Poisoned;
        self.poison = Some(err);
        EngineError::SinkWrite(message)
    }

    fn abandon_backend(&mut self) {
        match &mut self.backend {
            SinkBackend::Xlsx(sink) => sink.abandon(),
            SinkBackend::Delimited(sink) => sink.abandon(),
            SinkBackend::JsonLines(sink) => sink.abandon(),
        }
    }
}

impl Drop for RowSink {
    fn drop(&mut self) {
        if self.state != SinkState::Finished {
            self.close();
        }
    }
}
