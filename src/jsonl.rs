//! JSON-lines row source and sink (one JSON array or object per line)

use crate::error::{EngineError, Result};
use crate::types::{CellValue, Row};
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

/// Streaming reader for line-delimited JSON.
///
/// Array lines become positional cells. Object lines are projected onto the
/// configured column order; without one, the first object's keys fix the
/// order for the rest of the stream.
pub struct JsonlReadSource {
    reader: Option<BufReader<File>>,
    line_buffer: String,
    line_number: u32,
    columns: Vec<String>,
}

impl JsonlReadSource {
    /// Open a JSON-lines file
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| EngineError::FileUnreadable(format!("{}: {}", path.display(), e)))?;
        Ok(JsonlReadSource {
            reader: Some(BufReader::new(file)),
            line_buffer: String::with_capacity(1024),
            line_number: 0,
            columns: Vec::new(),
        })
    }

    /// Fix the key order used to project object lines onto cells
    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = columns;
        self
    }

    /// The column order in effect (empty until an object line is seen)
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Read the next line as a row, or `None` at end of stream
    pub fn next_row(&mut self) -> Result<Option<Row>> {
        loop {
            let Some(reader) = self.reader.as_mut() else {
                return Ok(None);
            };
            self.line_buffer.clear();
            let n = reader.read_line(&mut self.line_buffer)?;
            if n == 0 {
                return Ok(None);
            }
            self.line_number += 1;

            let trimmed = self.line_buffer.trim();
            if trimmed.is_empty() {
                continue;
            }

            let value: Value = serde_json::from_str(trimmed).map_err(|e| {
                EngineError::CorruptContainer(format!("line {}: {}", self.line_number, e))
            })?;

            let cells = match value {
                Value::Array(items) => items.into_iter().map(json_to_cell).collect(),
                Value::Object(map) => {
                    if self.columns.is_empty() {
                        self.columns = map.keys().cloned().collect();
                    }
                    self.columns
                        .iter()
                        .map(|key| map.get(key).cloned().map(json_to_cell).unwrap_or(CellValue::Null))
                        .collect()
                }
                other => vec![json_to_cell(other)],
            };

            return Ok(Some(Row::new(self.line_number, cells)));
        }
    }

    /// Shrink scratch buffers back to their baseline capacity
    pub fn shrink_buffers(&mut self) {
        self.line_buffer.shrink_to(1024);
    }

    /// Release the underlying file handle; safe to call more than once
    pub fn close(&mut self) {
        self.reader = None;
    }
}

fn json_to_cell(value: Value) -> CellValue {
    match value {
        Value::Null => CellValue::Null,
        Value::Bool(b) => CellValue::Bool(b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                CellValue::Int(i)
            } else {
                CellValue::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => CellValue::Str(s),
        // Nested structure flattens to its serialized text
        other => CellValue::Str(other.to_string()),
    }
}

fn cell_to_json(cell: &CellValue) -> Value {
    match cell {
        CellValue::Null => Value::Null,
        CellValue::Bool(b) => Value::Bool(*b),
        CellValue::Int(i) => Value::from(*i),
        CellValue::Float(f) => {
            serde_json::Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null)
        }
        CellValue::Percent(p) => {
            serde_json::Number::from_f64(*p).map(Value::Number).unwrap_or(Value::Null)
        }
        CellValue::Str(s) => Value::String(s.clone()),
        CellValue::DateTime { .. } | CellValue::Currency { .. } | CellValue::CellError(_) => {
            Value::String(cell.as_string())
        }
    }
}

/// Streaming writer emitting one JSON array per row
pub struct JsonlWriter {
    writer: Option<BufWriter<File>>,
    buffer: Vec<u8>,
    buffer_capacity: usize,
    rows_written: u64,
}

impl JsonlWriter {
    /// Create the output file
    pub fn create<P: AsRef<Path>>(path: P, buffer_capacity: usize) -> Result<Self> {
        let file = File::create(path.as_ref())
            .map_err(|e| EngineError::SinkWrite(format!("create: {}", e)))?;
        Ok(JsonlWriter {
            writer: Some(BufWriter::new(file)),
            buffer: Vec::with_capacity(buffer_capacity),
            buffer_capacity,
            rows_written: 0,
        })
    }

    /// Append one row as a JSON array line
    pub fn write_row(&mut self, cells: &[CellValue]) -> Result<()> {
        let values: Vec<Value> = cells.iter().map(cell_to_json).collect();
        let line = serde_json::to_string(&values)
            .map_err(|e| EngineError::SinkWrite(format!("encode: {}", e)))?;
        self.buffer.extend_from_slice(line.as_bytes());
        self.buffer.push(b'\n');
        self.rows_written += 1;
        if self.buffer.len() >= self.buffer_capacity {
            self.flush()?;
        }
        Ok(())
    }

    /// Flush buffered bytes to the file
    pub fn flush(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            if !self.buffer.is_empty() {
                writer
                    .write_all(&self.buffer)
                    .map_err(|e| EngineError::SinkWrite(e.to_string()))?;
                self.buffer.clear();
            }
            writer
                .flush()
                .map_err(|e| EngineError::SinkWrite(e.to_string()))?;
        }
        Ok(())
    }

    /// Rows written so far
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Flush and close the output file
    pub fn finish(&mut self) -> Result<()> {
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
