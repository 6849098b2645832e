//! Delimited-text row source with streaming reads

use crate::csv::{CsvParser, RecordBuilder};
use crate::error::{EngineError, Result};
use crate::types::{CellValue, Row};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

const UTF8_BOM: &str = "\u{feff}";

/// Streaming reader for delimited-text files.
///
/// Reads one logical record at a time; a quoted field may span physical
/// lines. The delimiter is auto-detected from the first non-empty line
/// (comma, semicolon or tab, whichever appears most often) unless overridden.
///
/// # Examples
///
/// ```no_run
/// use sheetstream::csv_reader::CsvReadSource;
///
/// let mut source = CsvReadSource::open("data.csv")?;
/// while let Some(row) = source.next_row()? {
///     println!("{}: {:?}", row.number, row.to_strings());
/// }
/// # Ok::<(), sheetstream::EngineError>(())
/// ```
pub struct CsvReadSource {
    reader: Option<BufReader<File>>,
    parser: CsvParser,
    delimiter: u8,
    record: RecordBuilder,
    /// Raw lines consumed during delimiter detection, replayed first
    pending: VecDeque<String>,
    line_buffer: String,
    /// Physical lines consumed so far (1-based numbering)
    lines_consumed: u32,
}

impl CsvReadSource {
    /// Open a delimited-text file and detect its delimiter
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| EngineError::FileUnreadable(format!("{}: {}", path.display(), e)))?;
        let mut reader = BufReader::new(file);

        // Pull lines up to the first non-empty one; they are replayed to the
        // record loop so physical numbering is preserved.
        let mut pending = VecDeque::new();
        let mut delimiter = b',';
        let mut buffer = String::new();
        loop {
            buffer.clear();
            let n = reader.read_line(&mut buffer)?;
            if n == 0 {
                break;
            }
            let mut line = buffer.clone();
            if pending.is_empty() {
                if let Some(stripped) = line.strip_prefix(UTF8_BOM) {
                    line = stripped.to_string();
                }
            }
            let is_blank = line.trim_end_matches(['\r', '\n']).is_empty();
            pending.push_back(line.clone());
            if !is_blank {
                delimiter = detect_delimiter(&line);
                break;
            }
        }

        Ok(CsvReadSource {
            reader: Some(reader),
            parser: CsvParser::new(delimiter, b'"'),
            delimiter,
            record: RecordBuilder::new(),
            pending,
            line_buffer: String::with_capacity(1024),
            lines_consumed: 0,
        })
    }

    /// Override the detected delimiter (builder pattern)
    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.parser = CsvParser::new(delimiter, b'"');
        self.delimiter = delimiter;
        self
    }

    /// The delimiter currently in effect
    pub fn active_delimiter(&self) -> u8 {
        self.delimiter
    }

    /// Read the next logical record, or `None` at end of stream
    pub fn next_row(&mut self) -> Result<Option<Row>> {
        let mut start_line: Option<u32> = None;

        loop {
            let line = match self.pending.pop_front() {
                Some(line) => Some(line),
                None => match self.reader.as_mut() {
                    Some(reader) => {
                        self.line_buffer.clear();
                        let n = reader.read_line(&mut self.line_buffer)?;
                        if n == 0 {
                            None
                        } else {
                            Some(self.line_buffer.clone())
                        }
                    }
                    None => None,
                },
            };

            let Some(raw) = line else {
                // EOF with a dangling unterminated quote still yields a row
                if let Some(number) = start_line {
                    let fields = self.record.finish();
                    return Ok(Some(self.materialize(number, fields)));
                }
                return Ok(None);
            };

            self.lines_consumed += 1;
            let number = *start_line.get_or_insert(self.lines_consumed);

            let trimmed = raw.trim_end_matches(['\r', '\n']);
            if self.parser.feed_line(trimmed, &mut self.record) {
                let fields = self.record.finish();
                return Ok(Some(self.materialize(number, fields)));
            }
        }
    }

    fn materialize(&self, number: u32, fields: Vec<String>) -> Row {
        let cells = fields.into_iter().map(CellValue::Str).collect();
        Row::new(number, cells)
    }

    /// Shrink scratch buffers back to their baseline capacity
    pub fn shrink_buffers(&mut self) {
        self.line_buffer.shrink_to(1024);
    }

    /// Release the underlying file handle; safe to call more than once
    pub fn close(&mut self) {
        self.reader = None;
        self.pending.clear();
    }
}

/// Pick the delimiter that appears most often in the first non-empty line;
/// comma wins ties
fn detect_delimiter(line: &str) -> u8 {
    let candidates = [b',', b';', b'\t'];
    let mut best = b',';
    let mut best_count = 0usize;
    for &candidate in &candidates {
        let count = line.bytes().filter(|&b| b == candidate).count();
        if count > best_count {
            best = candidate;
            best_count = count;
        }
    }
    best
}
