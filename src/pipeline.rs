//! Pipeline: window, header, filters, transforms, projection and chunking
//! over a row source

use crate::error::{EngineError, Result};
use crate::memory::{MemoryCheck, MemoryGovernor, RunStats};
use crate::probe::FileFormat;
use crate::range::{parse_cell_ref, Range};
use crate::settings::Settings;
use crate::sink::RowSink;
use crate::source::{RowSource, RowWindow, SheetRef};
use crate::types::{parse_iso_datetime, CellValue, Row};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};

/// Row predicate; dropping a row does not reorder the remainder
pub type RowFilter = Box<dyn FnMut(&Row) -> bool>;
/// Row rewriter applied after the filter chain
pub type RowTransform = Box<dyn FnMut(Row) -> Row>;

/// Streaming read pipeline over one input file.
///
/// Configuration is builder-style and fixed once iteration starts. Per-row
/// execution order: range crop, window skip, type inference, filters,
/// transforms, yield. The header (when declared) is the first non-skipped
/// row and is never counted as a data row.
///
/// # Examples
///
/// ```no_run
/// use sheetstream::pipeline::Pipeline;
///
/// let mut pipeline = Pipeline::open("people.csv")?.has_header(true);
/// let records = pipeline.to_records()?;
/// for record in &records {
///     println!("{:?}", record.get("name"));
/// }
/// # Ok::<(), sheetstream::EngineError>(())
/// ```
pub struct Pipeline {
    path: PathBuf,
    source: RowSource,
    settings: Settings,
    governor: MemoryGovernor,
    stats: RunStats,

    sheet: Option<SheetRef>,
    range: Option<Range>,
    start_row: u32,
    start_col: u32,
    offset: u32,
    limit: Option<u64>,
    with_header: bool,
    column_mapping: Option<IndexMap<String, String>>,
    filters: Vec<RowFilter>,
    transforms: Vec<RowTransform>,

    header: Option<Vec<String>>,
    infer_types: bool,
    check_interval: u64,
    started: bool,
    done: bool,
    yielded: u64,
}

impl Pipeline {
    /// Open a pipeline with default settings
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::with_settings(path, Settings::default())
    }

    /// Open a pipeline with explicit settings
    pub fn with_settings<P: AsRef<Path>>(path: P, settings: Settings) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let source = RowSource::open(&path, &settings)?;
        let governor = MemoryGovernor::new(&settings);

        let estimated = MemoryGovernor::estimate_rows(&path, source.format());
        let infer_types = estimated <= settings.no_infer_threshold;
        let check_interval = MemoryGovernor::check_interval(estimated);

        Ok(Pipeline {
            path,
            source,
            settings,
            governor,
            stats: RunStats::new(),
            sheet: None,
            range: None,
            start_row: 1,
            start_col: 1,
            offset: 0,
            limit: None,
            with_header: false,
            column_mapping: None,
            filters: Vec::new(),
            transforms: Vec::new(),
            header: None,
            infer_types,
            check_interval,
            started: false,
            done: false,
            yielded: 0,
        })
    }

    /// Select the sheet to read (OOXML only; the default is the first
    /// visible sheet)
    pub fn sheet<S: Into<SheetRef>>(mut self, sheet: S) -> Self {
        self.sheet = Some(sheet.into());
        self
    }

    /// Restrict reading to a rectangular range like `B2:D4`
    pub fn range(mut self, expr: &str) -> Result<Self> {
        self.range = Some(Range::parse(expr)?);
        Ok(self)
    }

    /// Earliest absolute row to consider (1-based)
    pub fn start_row(mut self, row: u32) -> Self {
        self.start_row = row.max(1);
        self
    }

    /// Earliest absolute column to consider (1-based)
    pub fn start_col(mut self, col: u32) -> Self {
        self.start_col = col.max(1);
        self
    }

    /// Drop the first `n` rows after the start row
    pub fn offset(mut self, n: u32) -> Self {
        self.offset = n;
        self
    }

    /// Stop after yielding `m` data rows
    pub fn limit(mut self, m: u64) -> Self {
        self.limit = Some(m);
        self
    }

    /// Consume the first non-skipped row as the header
    pub fn has_header(mut self, has: bool) -> Self {
        self.with_header = has;
        self
    }

    /// Rewrite header names (and record keys) through this map
    pub fn column_mapping(mut self, mapping: IndexMap<String, String>) -> Self {
        self.column_mapping = Some(mapping);
        self
    }

    /// Append a filter; filters run in registration order
    pub fn filter<F>(mut self, f: F) -> Self
    where
        F: FnMut(&Row) -> bool + 'static,
    {
        self.filters.push(Box::new(f));
        self
    }

    /// Append a transform; transforms run after filters, in order
    pub fn transform<F>(mut self, f: F) -> Self
    where
        F: FnMut(Row) -> Row + 'static,
    {
        self.transforms.push(Box::new(f));
        self
    }

    /// Force type inference on or off (the governor's row estimate otherwise
    /// disables it for very large inputs)
    pub fn infer_types(mut self, infer: bool) -> Self {
        self.infer_types = infer;
        self
    }

    /// The header row captured during iteration, after mapping
    pub fn header(&self) -> Option<&[String]> {
        self.header.as_deref()
    }

    /// Per-run statistics (warnings, counters)
    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// The probed input format
    pub fn format(&self) -> FileFormat {
        self.source.format()
    }

    fn prepare(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.started = true;

        if let Some(sheet) = self.sheet.take() {
            self.source.select(sheet)?;
        }

        // Push the absolute row span down so skipped rows never decode cells
        let first_row = match self.range {
            Some(range) => range.start_row.max(self.start_row.saturating_add(self.offset)),
            None => self.start_row.saturating_add(self.offset),
        };
        let last_row = self.range.map(|r| r.end_row).unwrap_or(u32::MAX);
        self.source.set_window(RowWindow {
            first_row,
            last_row,
        });

        Ok(())
    }

    /// Pull the next data row, or `None` when the stream or the limit ends
    pub fn next_row(&mut self) -> Result<Option<Row>> {
        self.prepare()?;

        if self.done {
            return Ok(None);
        }
        if let Some(limit) = self.limit {
            if self.yielded >= limit {
                self.done = true;
                return Ok(None);
            }
        }

        loop {
            let Some(raw) = self.source.next_row()? else {
                self.done = true;
                return Ok(None);
            };
            self.stats.rows_read += 1;
            for warning in self.source.drain_warnings() {
                self.stats.push_warning(warning);
            }
            self.poll_governor()?;

            let mut row = self.crop(raw);

            if self.with_header && self.header.is_none() {
                let mut names = row.to_strings();
                if let Some(mapping) = &self.column_mapping {
                    for name in names.iter_mut() {
                        if let Some(mapped) = mapping.get(name.as_str()) {
                            *name = mapped.clone();
                        }
                    }
                }
                self.header = Some(names);
                continue;
            }

            if self.infer_types {
                for cell in row.cells.iter_mut() {
                    if let CellValue::Str(s) = cell {
                        *cell = infer_cell(s);
                    }
                }
            }

            if !self.filters.iter_mut().all(|f| f(&row)) {
                continue;
            }
            for transform in self.transforms.iter_mut() {
                row = transform(row);
            }

            self.yielded += 1;
            self.stats.rows_yielded += 1;
            return Ok(Some(row));
        }
    }

    /// Crop a raw row to the active column span, padding with nulls inside
    /// an explicit range
    fn crop(&self, raw: Row) -> Row {
        let (first_col, width) = match self.range {
            Some(range) => {
                let first = range.start_col.max(self.start_col);
                let width = (range.end_col + 1).saturating_sub(first) as usize;
                (first, Some(width))
            }
            None => (self.start_col, None),
        };

        if first_col <= 1 && width.is_none() {
            return raw;
        }

        let skip = (first_col - 1) as usize;
        let mut cells: Vec<CellValue> = raw.cells.into_iter().skip(skip).collect();
        if let Some(width) = width {
            cells.truncate(width);
            while cells.len() < width {
                cells.push(CellValue::Null);
            }
        }
        Row::new(raw.number, cells)
    }

    fn poll_governor(&mut self) -> Result<()> {
        if self.check_interval == 0 || self.stats.rows_read % self.check_interval != 0 {
            return Ok(());
        }
        if self.governor.check() == MemoryCheck::NeedsCleanup {
            self.reclaim();
            if self.governor.still_over_limit() {
                return Err(EngineError::MemoryLimit(format!(
                    "usage above {} bytes after reclamation",
                    self.governor.limit()
                )));
            }
        }
        Ok(())
    }

    /// Shed engine-owned pools and scratch capacity
    fn reclaim(&mut self) {
        self.source.reclaim();
        self.governor.note_reclaim();
        self.stats.reclaims += 1;
    }

    /// First data row, if any
    pub fn first(&mut self) -> Result<Option<Row>> {
        self.next_row()
    }

    /// The n-th data row (1-based) of the yielded sequence
    pub fn row(&mut self, n: u64) -> Result<Option<Row>> {
        if n == 0 {
            return Ok(None);
        }
        let mut remaining = n;
        while let Some(row) = self.next_row()? {
            remaining -= 1;
            if remaining == 0 {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    /// All values of one column, addressed by 0-based index or header name
    pub fn column(&mut self, key: &str) -> Result<Vec<CellValue>> {
        let mut values = Vec::new();
        let mut index: Option<usize> = key.parse().ok();
        while let Some(row) = self.next_row()? {
            if index.is_none() {
                index = self
                    .header
                    .as_ref()
                    .and_then(|h| h.iter().position(|name| name == key));
            }
            let Some(i) = index else {
                return Ok(values);
            };
            values.push(row.get(i).cloned().unwrap_or(CellValue::Null));
        }
        Ok(values)
    }

    /// One cell addressed like `B2`: row 2 of the yielded sequence,
    /// column B of the cropped row
    pub fn cell(&mut self, reference: &str) -> Result<Option<CellValue>> {
        let Some((col, row_n)) = parse_cell_ref(reference) else {
            return Err(EngineError::InvalidRange(reference.to_string()));
        };
        match self.row(row_n as u64)? {
            Some(row) => Ok(row.get((col - 1) as usize).cloned()),
            None => Ok(None),
        }
    }

    /// Count the remaining data rows (drains the stream)
    pub fn count(&mut self) -> Result<u64> {
        let mut count = 0;
        while self.next_row()?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    /// Materialize every remaining row. This is the explicit non-streaming
    /// path; memory grows with the row count.
    pub fn to_rows(&mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row()? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Materialize rows as header-keyed records. Columns beyond the header
    /// get synthetic `col<N>` keys.
    pub fn to_records(&mut self) -> Result<Vec<IndexMap<String, CellValue>>> {
        let mut records = Vec::new();
        while let Some(row) = self.next_row()? {
            let mut record = IndexMap::with_capacity(row.len());
            for (i, cell) in row.cells.iter().enumerate() {
                let key = self
                    .header
                    .as_ref()
                    .and_then(|h| h.get(i).cloned())
                    .unwrap_or_else(|| format!("col{}", i + 1));
                record.insert(key, cell.clone());
            }
            records.push(record);
        }
        Ok(records)
    }

    /// Deliver rows in batches of up to `size`. The batch slice is engine
    /// storage: callbacks must not retain it past the call.
    pub fn chunk<F>(&mut self, size: usize, mut callback: F) -> Result<u64>
    where
        F: FnMut(&[Row], usize) -> Result<()>,
    {
        let size = size.max(1);
        let mut batch: Vec<Row> = Vec::with_capacity(size);
        let mut batch_index = 0usize;
        let mut total = 0u64;

        while let Some(row) = self.next_row()? {
            batch.push(row);
            if batch.len() == size {
                callback(&batch, batch_index)?;
                total += batch.len() as u64;
                batch.clear();
                batch_index += 1;
            }
        }
        if !batch.is_empty() {
            callback(&batch, batch_index)?;
            total += batch.len() as u64;
        }
        Ok(total)
    }

    /// Stream every remaining row into a sink (the convert path). Writes
    /// the captured header first when one was declared.
    pub fn write_to(&mut self, sink: &mut RowSink) -> Result<u64> {
        let mut wrote_header = false;
        let mut count = 0u64;

        while let Some(row) = self.next_row()? {
            if self.with_header && !wrote_header {
                if let Some(header) = self.header.clone() {
                    sink.write_header(header)?;
                }
                wrote_header = true;
            }
            sink.write_row(&row.cells)?;
            self.stats.rows_written += 1;
            count += 1;
        }
        // Header-only inputs still carry their header across
        if self.with_header && !wrote_header {
            if let Some(header) = self.header.clone() {
                sink.write_header(header)?;
            }
        }
        Ok(count)
    }

    /// The input path this pipeline reads
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the source promptly. Idempotent.
    pub fn close(&mut self) {
        self.done = true;
        self.source.close();
    }

    /// The effective settings
    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}

/// Infer a typed value from raw text (delimited and JSON-lines sources).
///
/// Integer when the text has no decimal point or exponent and fits 64 bits;
/// float otherwise (including oversized integer literals); ISO-8601 text
/// becomes a date-time.
fn infer_cell(text: &str) -> CellValue {
    if text.is_empty() {
        return CellValue::Null;
    }
    match text {
        "true" | "TRUE" | "True" => return CellValue::Bool(true),
        "false" | "FALSE" | "False" => return CellValue::Bool(false),
        _ => {}
    }

    let integral = !text.contains('.') && !text.contains('e') && !text.contains('E');
    if integral {
        if let Ok(i) = text.parse::<i64>() {
            return CellValue::Int(i);
        }
    }
    if let Some(value) = parse_iso_datetime(text) {
        return value;
    }
    // Float path is gated on plain numeric characters so "inf"/"nan" text
    // stays textual
    let numeric_chars = text
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'e' | b'E'));
    if numeric_chars {
        if let Ok(f) = text.parse::<f64>() {
            return CellValue::Float(f);
        }
    }

    CellValue::Str(text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn csv_fixture(content: &str) -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.csv");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(content.as_bytes())
            .unwrap();
        (dir, path)
    }

    #[test]
    fn test_header_and_records() {
        let (_dir, path) = csv_fixture("name,age\nAlice,30\nBob,25\n");
        let mut pipeline = Pipeline::open(&path).unwrap().has_header(true);
        let records = pipeline.to_records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["name"], CellValue::Str("Alice".to_string()));
        assert_eq!(records[0]["age"], CellValue::Int(30));
        assert_eq!(records[1]["age"], CellValue::Int(25));
        assert_eq!(pipeline.stats().rows_yielded, 2);
    }

    #[test]
    fn test_offset_and_limit() {
        let (_dir, path) = csv_fixture("r1\nr2\nr3\nr4\nr5\nr6\n");
        let mut pipeline = Pipeline::open(&path).unwrap().offset(2).limit(3);
        let rows = pipeline.to_rows().unwrap();
        assert_eq!(
            rows.iter().map(|r| r.number).collect::<Vec<_>>(),
            vec![3, 4, 5]
        );
    }

    #[test]
    fn test_window_is_absolute_and_deterministic() {
        // The window skips by logical row number, so re-running the same
        // configuration over the same input yields the identical subsequence
        let (_dir, path) = csv_fixture("1\n2\n3\n4\n5\n6\n7\n8\n");
        let run = |path: &Path| -> Vec<(u32, String)> {
            let mut p = Pipeline::open(path).unwrap().offset(2).limit(3);
            p.to_rows()
                .unwrap()
                .iter()
                .map(|r| (r.number, r.to_strings().join(",")))
                .collect()
        };
        let once = run(&path);
        let twice = run(&path);
        assert_eq!(once, twice);
        assert_eq!(
            once.iter().map(|(n, _)| *n).collect::<Vec<_>>(),
            vec![3, 4, 5]
        );
    }

    #[test]
    fn test_window_composition_is_idempotent() {
        // Wrapping the engine around itself: re-applying the same
        // {offset, limit} window to an already-windowed output must yield
        // the identical subsequence, because skipping is keyed on absolute
        // logical row numbers rather than a running position counter
        let (_dir, path) = csv_fixture("1\n2\n3\n4\n5\n6\n7\n8\n");
        let (offset, limit) = (2u32, 3usize);

        let once = {
            let mut p = Pipeline::open(&path)
                .unwrap()
                .offset(offset)
                .limit(limit as u64);
            p.to_rows().unwrap()
        };
        assert_eq!(once.iter().map(|r| r.number).collect::<Vec<_>>(), vec![3, 4, 5]);

        // Second application of the identical window over the first pass's
        // output, using the same resolved span the engine pushes down
        let window = RowWindow {
            first_row: 1 + offset,
            last_row: u32::MAX,
        };
        let twice: Vec<Row> = once
            .iter()
            .filter(|row| window.contains(row.number))
            .take(limit)
            .cloned()
            .collect();
        assert_eq!(twice, once);
    }

    #[test]
    fn test_filters_then_transforms() {
        let (_dir, path) = csv_fixture("1\n2\n3\n4\n5\n6\n");
        let mut pipeline = Pipeline::open(&path)
            .unwrap()
            .filter(|row| row.get(0).and_then(|c| c.as_i64()).unwrap_or(0) % 2 == 0)
            .transform(|mut row| {
                let doubled = row.get(0).and_then(|c| c.as_i64()).unwrap_or(0) * 2;
                row.cells[0] = CellValue::Int(doubled);
                row
            });
        let rows = pipeline.to_rows().unwrap();
        let values: Vec<i64> = rows
            .iter()
            .map(|r| r.get(0).unwrap().as_i64().unwrap())
            .collect();
        assert_eq!(values, vec![4, 8, 12]);
    }

    #[test]
    fn test_filter_sees_cropped_columns() {
        let (_dir, path) = csv_fixture("a,1,x\nb,2,y\nc,3,z\n");
        // Crop to columns 2..3 first; the filter addresses column 0 of the
        // cropped row
        let mut pipeline = Pipeline::open(&path)
            .unwrap()
            .range("B1:C3")
            .unwrap()
            .filter(|row| row.get(0).and_then(|c| c.as_i64()).unwrap_or(0) >= 2);
        let rows = pipeline.to_rows().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].to_strings(), vec!["2", "y"]);
    }

    #[test]
    fn test_range_crop_pads_missing() {
        let (_dir, path) = csv_fixture("1,2\n3,4,5,6\n7\n");
        let mut pipeline = Pipeline::open(&path).unwrap().range("B1:D3").unwrap();
        let rows = pipeline.to_rows().unwrap();
        assert_eq!(rows[0].cells.len(), 3);
        assert_eq!(rows[0].cells[0], CellValue::Int(2));
        assert_eq!(rows[0].cells[1], CellValue::Null);
        assert_eq!(rows[1].to_strings(), vec!["4", "5", "6"]);
        assert_eq!(rows[2].cells, vec![CellValue::Null; 3]);
    }

    #[test]
    fn test_column_mapping_renames_header() {
        let (_dir, path) = csv_fixture("nm,ag\nAlice,30\n");
        let mut mapping = IndexMap::new();
        mapping.insert("nm".to_string(), "name".to_string());
        mapping.insert("ag".to_string(), "age".to_string());

        let mut pipeline = Pipeline::open(&path)
            .unwrap()
            .has_header(true)
            .column_mapping(mapping);
        let records = pipeline.to_records().unwrap();
        assert_eq!(pipeline.header().unwrap(), ["name", "age"]);
        assert!(records[0].contains_key("name"));
    }

    #[test]
    fn test_chunking_counts_and_batches() {
        let mut content = String::new();
        for i in 0..1050 {
            content.push_str(&format!("{}\n", i));
        }
        let (_dir, path) = csv_fixture(&content);

        let mut pipeline = Pipeline::open(&path).unwrap();
        let mut batches = Vec::new();
        let total = pipeline
            .chunk(500, |batch, index| {
                batches.push((index, batch.len()));
                Ok(())
            })
            .unwrap();
        assert_eq!(total, 1050);
        assert_eq!(batches, vec![(0, 500), (1, 500), (2, 50)]);
    }

    #[test]
    fn test_chunk_callback_error_propagates() {
        let (_dir, path) = csv_fixture("1\n2\n3\n");
        let mut pipeline = Pipeline::open(&path).unwrap();
        let result = pipeline.chunk(2, |_, _| {
            Err(EngineError::callback(std::io::Error::other("boom")))
        });
        assert!(matches!(result, Err(EngineError::Callback(_))));
    }

    #[test]
    fn test_accessors() {
        let (_dir, path) = csv_fixture("a,b\nc,d\ne,f\n");
        assert_eq!(
            Pipeline::open(&path).unwrap().first().unwrap().unwrap().to_strings(),
            vec!["a", "b"]
        );
        assert_eq!(
            Pipeline::open(&path).unwrap().row(2).unwrap().unwrap().to_strings(),
            vec!["c", "d"]
        );
        assert_eq!(
            Pipeline::open(&path)
                .unwrap()
                .cell("B3")
                .unwrap()
                .unwrap()
                .as_string(),
            "f"
        );
        assert_eq!(Pipeline::open(&path).unwrap().count().unwrap(), 3);
    }

    #[test]
    fn test_column_by_name_and_index() {
        let (_dir, path) = csv_fixture("name,age\nAlice,30\nBob,25\n");
        let ages = Pipeline::open(&path)
            .unwrap()
            .has_header(true)
            .column("age")
            .unwrap();
        assert_eq!(ages, vec![CellValue::Int(30), CellValue::Int(25)]);

        let names = Pipeline::open(&path)
            .unwrap()
            .has_header(true)
            .column("0")
            .unwrap();
        assert_eq!(names.len(), 2);
    }

    #[test]
    fn test_inference_toggle() {
        let (_dir, path) = csv_fixture("1,x\n");
        let mut pipeline = Pipeline::open(&path).unwrap().infer_types(false);
        let rows = pipeline.to_rows().unwrap();
        assert_eq!(rows[0].cells[0], CellValue::Str("1".to_string()));
    }

    #[test]
    fn test_infer_cell_rules() {
        assert_eq!(infer_cell(""), CellValue::Null);
        assert_eq!(infer_cell("true"), CellValue::Bool(true));
        assert_eq!(infer_cell("42"), CellValue::Int(42));
        assert_eq!(infer_cell("-17"), CellValue::Int(-17));
        assert_eq!(infer_cell("2.5"), CellValue::Float(2.5));
        assert_eq!(infer_cell("1e3"), CellValue::Float(1000.0));
        assert_eq!(infer_cell("hello"), CellValue::Str("hello".to_string()));
        assert_eq!(infer_cell("2023-10-18").as_string(), "2023-10-18");
        // Larger than i64: degrades to float
        assert_eq!(
            infer_cell("99999999999999999999"),
            CellValue::Float(1e20)
        );
        assert_eq!(infer_cell("inf"), CellValue::Str("inf".to_string()));
    }

    #[test]
    fn test_convert_to_sink() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("in.csv");
        std::fs::write(&input, "name,age\nAlice,30\nBob,25\n").unwrap();
        let output = dir.path().join("out.csv");

        let mut pipeline = Pipeline::open(&input).unwrap().has_header(true);
        let mut sink = RowSink::create(&output, &Settings::default()).unwrap();
        let count = pipeline.write_to(&mut sink).unwrap();
        sink.finish().unwrap();

        assert_eq!(count, 2);
        let content = std::fs::read_to_string(&output).unwrap();
        assert_eq!(content, "name,age\nAlice,30\nBob,25\n");
    }
}
