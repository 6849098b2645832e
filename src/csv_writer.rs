//! Delimited-text row sink with a bounded write buffer

use crate::csv::CsvEncoder;
use crate::error::{EngineError, Result};
use crate::types::{CellValue, DateTimeKind};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Streaming writer for delimited text.
///
/// Rows are formatted immediately into a byte buffer that is flushed past
/// its capacity or on an explicit flush, so memory use is independent of row
/// count.
///
/// # Examples
///
/// ```no_run
/// use sheetstream::csv_writer::CsvSink;
/// use sheetstream::types::CellValue;
///
/// let mut sink = CsvSink::create("out.csv", 8 * 1024)?;
/// sink.write_row(&[CellValue::Str("Alice".into()), CellValue::Int(30)])?;
/// sink.finish()?;
/// # Ok::<(), sheetstream::EngineError>(())
/// ```
pub struct CsvSink {
    writer: Option<BufWriter<File>>,
    buffer: Vec<u8>,
    buffer_capacity: usize,
    delimiter: u8,
    quote_char: u8,
    line_ending: &'static [u8],
    write_bom: bool,
    bom_written: bool,
    /// Per-column (0-based) chrono format overrides for date-time cells
    datetime_formats: HashMap<usize, String>,
    rows_written: u64,
    field_scratch: Vec<String>,
}

impl CsvSink {
    /// Create the output file with the given write-buffer capacity
    pub fn create<P: AsRef<Path>>(path: P, buffer_capacity: usize) -> Result<Self> {
        let file = File::create(path.as_ref())
            .map_err(|e| EngineError::SinkWrite(format!("create: {}", e)))?;
        Ok(CsvSink {
            writer: Some(BufWriter::new(file)),
            buffer: Vec::with_capacity(buffer_capacity),
            buffer_capacity,
            delimiter: b',',
            quote_char: b'"',
            line_ending: b"\n",
            write_bom: false,
            bom_written: false,
            datetime_formats: HashMap::new(),
            rows_written: 0,
            field_scratch: Vec::new(),
        })
    }

    /// Set a custom delimiter (builder pattern)
    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// In-place variant of [`delimiter`](CsvSink::delimiter)
    pub fn set_delimiter(&mut self, delimiter: u8) {
        self.delimiter = delimiter;
    }

    /// In-place variant of [`with_bom`](CsvSink::with_bom)
    pub fn set_bom(&mut self, bom: bool) {
        self.write_bom = bom;
    }

    /// In-place variant of [`datetime_format`](CsvSink::datetime_format)
    pub fn set_datetime_format(&mut self, column: usize, format: &str) {
        self.datetime_formats.insert(column, format.to_string());
    }

    /// Set a custom quote character (builder pattern)
    pub fn quote_char(mut self, quote: u8) -> Self {
        self.quote_char = quote;
        self
    }

    /// Use CRLF line termination instead of LF
    pub fn crlf(mut self, crlf: bool) -> Self {
        self.line_ending = if crlf { b"\r\n" } else { b"\n" };
        self
    }

    /// Emit a UTF-8 BOM before the first row
    pub fn with_bom(mut self, bom: bool) -> Self {
        self.write_bom = bom;
        self
    }

    /// Override the date-time format for one 0-based column
    pub fn datetime_format(mut self, column: usize, format: &str) -> Self {
        self.datetime_formats.insert(column, format.to_string());
        self
    }

    /// Append one logical row
    pub fn write_row(&mut self, cells: &[CellValue]) -> Result<()> {
        if self.writer.is_none() {
            return Err(EngineError::SinkWrite("sink already finished".to_string()));
        }

        if self.write_bom && !self.bom_written {
            self.buffer.extend_from_slice(UTF8_BOM);
            self.bom_written = true;
        }

        self.field_scratch.clear();
        for (col, cell) in cells.iter().enumerate() {
            self.field_scratch.push(self.format_cell(col, cell));
        }

        let encoder = CsvEncoder::new(self.delimiter, self.quote_char);
        let refs: Vec<&str> = self.field_scratch.iter().map(|s| s.as_str()).collect();
        encoder.encode_row(&refs, &mut self.buffer);
        self.buffer.extend_from_slice(self.line_ending);
        self.rows_written += 1;

        if self.buffer.len() >= self.buffer_capacity {
            self.flush()?;
        }
        Ok(())
    }

    fn format_cell(&self, col: usize, cell: &CellValue) -> String {
        match cell {
            CellValue::Null => String::new(),
            CellValue::DateTime { when, kind } => match self.datetime_formats.get(&col) {
                Some(format) => when.format(format).to_string(),
                None => match kind {
                    DateTimeKind::Date => when.format("%Y-%m-%d").to_string(),
                    DateTimeKind::Time => when.format("%H:%M:%S").to_string(),
                    DateTimeKind::DateTime => when.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                },
            },
            other => other.as_string(),
        }
    }

    /// Flush buffered bytes through to the file
    pub fn flush(&mut self) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        if !self.buffer.is_empty() {
            writer
                .write_all(&self.buffer)
                .map_err(|e| EngineError::SinkWrite(e.to_string()))?;
            self.buffer.clear();
        }
        writer
            .flush()
            .map_err(|e| EngineError::SinkWrite(e.to_string()))
    }

    /// Rows appended so far
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Flush and close. Idempotent after success.
    pub fn finish(&mut self) -> Result<()> {
        if self.writer.is_none() {
            return Ok(());
        }
        self.flush()?;
        self.writer = None;
        Ok(())
    }

    /// Drop the writer without flushing (the facade removes the file)
    pub fn abandon(&mut self) {
        self.writer = None;
        self.buffer.clear();
    }
}
