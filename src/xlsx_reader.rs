//! OOXML read backend: workbook metadata, styles and the sheet-part
//! pull parser
//!
//! Decoding runs on a background thread that owns its own archive handles
//! and feeds rows through a bounded channel, so the caller sees a plain
//! `next_row` pull while the decoder and the shared-string loader each keep
//! a single forward pass over their parts.

use crate::error::{EngineError, Result};
use crate::memory::Warning;
use crate::range::parse_cell_ref;
use crate::settings::Settings;
use crate::shared_strings::SharedStringCache;
use crate::source::{RowWindow, SheetDescriptor, SheetRef};
use crate::types::{parse_iso_datetime, serial_to_datetime, CellValue, Row};
use quick_xml::events::{BytesStart, Event};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;

enum SheetMessage {
    Row(Row),
    Warning(Warning),
    Fatal(EngineError),
}

struct Traversal {
    rx: Receiver<SheetMessage>,
    handle: JoinHandle<()>,
}

/// Streaming reader over one OOXML workbook.
///
/// Workbook, relationship and styles parts are decoded at open; sheet data
/// streams on demand. Single-consumer and non-restartable per sheet
/// selection.
pub struct XlsxReadSource {
    path: PathBuf,
    sheets: Vec<SheetDescriptor>,
    selected: usize,
    epoch_1904: bool,
    date_styles: Vec<bool>,
    sst_capacity: usize,
    channel_depth: usize,
    window: RowWindow,
    traversal: Option<Traversal>,
    finished: bool,
    warnings: Vec<Warning>,
    /// Reclamation requests observed by the decoder thread between rows
    shed_requests: Arc<AtomicU64>,
}

impl XlsxReadSource {
    /// Open a workbook and resolve its sheet descriptors
    pub fn open<P: AsRef<Path>>(path: P, settings: &Settings) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)
            .map_err(|e| EngineError::FileUnreadable(format!("{}: {}", path.display(), e)))?;
        let mut archive = zip::ZipArchive::new(file)
            .map_err(|e| EngineError::CorruptContainer(format!("{}: {}", path.display(), e)))?;

        let workbook_xml = read_part(&mut archive, "xl/workbook.xml")?
            .ok_or_else(|| EngineError::CorruptContainer("missing xl/workbook.xml".to_string()))?;
        let rels_xml = read_part(&mut archive, "xl/_rels/workbook.xml.rels")?.ok_or_else(|| {
            EngineError::CorruptContainer("missing xl/_rels/workbook.xml.rels".to_string())
        })?;
        let styles_xml = read_part(&mut archive, "xl/styles.xml")?;

        let workbook = parse_workbook(&workbook_xml)?;
        let rel_targets = parse_relationships(&rels_xml)?;
        let date_styles = match styles_xml {
            Some(bytes) => parse_date_styles(&bytes)?,
            None => Vec::new(),
        };

        let mut sheets = Vec::with_capacity(workbook.sheets.len());
        for (index, raw) in workbook.sheets.into_iter().enumerate() {
            let target = rel_targets
                .iter()
                .find(|(rid, _)| *rid == raw.rel_id)
                .map(|(_, target)| resolve_target(target))
                .ok_or_else(|| {
                    EngineError::CorruptContainer(format!(
                        "sheet '{}' has no relationship target for {}",
                        raw.name, raw.rel_id
                    ))
                })?;
            sheets.push(SheetDescriptor {
                name: raw.name,
                index,
                rel_id: raw.rel_id,
                target,
                visible: raw.visible,
                active: index == workbook.active_tab,
            });
        }

        if sheets.is_empty() {
            return Err(EngineError::CorruptContainer(
                "workbook declares no sheets".to_string(),
            ));
        }

        // Default selection: first visible sheet
        let selected = sheets.iter().position(|s| s.visible).unwrap_or(0);

        Ok(XlsxReadSource {
            path,
            sheets,
            selected,
            epoch_1904: workbook.epoch_1904,
            date_styles,
            sst_capacity: settings.sst_capacity,
            channel_depth: settings.channel_depth,
            window: RowWindow::unbounded(),
            traversal: None,
            finished: false,
            warnings: Vec::new(),
            shed_requests: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Ordered sheet descriptors as declared by the workbook
    pub fn sheets(&self) -> &[SheetDescriptor] {
        &self.sheets
    }

    /// Select the sheet to traverse. Takes effect at the next `next_row`;
    /// an in-flight traversal is closed.
    pub fn select(&mut self, sheet: SheetRef) -> Result<()> {
        let found = match &sheet {
            SheetRef::Name(name) => self.sheets.iter().position(|s| &s.name == name),
            SheetRef::Index(index) => {
                if *index < self.sheets.len() {
                    Some(*index)
                } else {
                    None
                }
            }
        };

        match found {
            Some(index) => {
                self.stop_traversal();
                self.finished = false;
                self.selected = index;
                Ok(())
            }
            None => {
                let requested = match sheet {
                    SheetRef::Name(name) => name,
                    SheetRef::Index(index) => index.to_string(),
                };
                Err(EngineError::SheetNotFound {
                    sheet: requested,
                    available: self
                        .sheets
                        .iter()
                        .map(|s| s.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                })
            }
        }
    }

    /// Restrict decoding to an absolute row span; out-of-window rows are
    /// skipped right after their `<row>` start tag
    pub fn set_window(&mut self, window: RowWindow) {
        self.window = window;
    }

    /// Pull the next logical row from the selected sheet
    pub fn next_row(&mut self) -> Result<Option<Row>> {
        if self.finished {
            return Ok(None);
        }
        if self.traversal.is_none() {
            self.start_traversal()?;
        }

        loop {
            let message = match self.traversal.as_ref() {
                Some(traversal) => traversal.rx.recv(),
                None => return Ok(None),
            };
            match message {
                Ok(SheetMessage::Row(row)) => return Ok(Some(row)),
                Ok(SheetMessage::Warning(warning)) => {
                    self.warnings.push(warning);
                }
                Ok(SheetMessage::Fatal(err)) => {
                    self.finished = true;
                    self.stop_traversal();
                    return Err(err);
                }
                Err(_) => {
                    self.finished = true;
                    self.stop_traversal();
                    return Ok(None);
                }
            }
        }
    }

    /// Drain cell-level warnings recorded since the last call
    pub fn drain_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    /// Ask the decoder to evict half of its shared-string pool at the next
    /// row boundary
    pub fn reclaim(&mut self) {
        self.shed_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Stop decoding and release file handles. Idempotent.
    pub fn close(&mut self) {
        self.finished = true;
        self.stop_traversal();
    }

    fn stop_traversal(&mut self) {
        if let Some(traversal) = self.traversal.take() {
            // Dropping the receiver unblocks the decoder's next send; join
            // guarantees the archive handles are gone before we return
            drop(traversal.rx);
            let _ = traversal.handle.join();
        }
    }

    fn start_traversal(&mut self) -> Result<()> {
        let (tx, rx) = sync_channel(self.channel_depth.max(1));
        let job = TraversalJob {
            path: self.path.clone(),
            sheet_part: self.sheets[self.selected].target.clone(),
            window: self.window,
            epoch_1904: self.epoch_1904,
            date_styles: self.date_styles.clone(),
            sst_capacity: self.sst_capacity,
            shed_requests: Arc::clone(&self.shed_requests),
        };
        let handle = std::thread::spawn(move || job.run(tx));
        self.traversal = Some(Traversal { rx, handle });
        Ok(())
    }
}

impl Drop for XlsxReadSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Everything the decoder thread owns
struct TraversalJob {
    path: PathBuf,
    sheet_part: String,
    window: RowWindow,
    epoch_1904: bool,
    date_styles: Vec<bool>,
    sst_capacity: usize,
    shed_requests: Arc<AtomicU64>,
}

impl TraversalJob {
    fn run(self, tx: SyncSender<SheetMessage>) {
        if let Err(err) = self.decode(&tx) {
            let _ = tx.send(SheetMessage::Fatal(err));
        }
    }

    fn decode(&self, tx: &SyncSender<SheetMessage>) -> Result<()> {
        let sheet_file = File::open(&self.path)
            .map_err(|e| EngineError::FileUnreadable(format!("{}: {}", self.path.display(), e)))?;
        let mut sheet_archive = zip::ZipArchive::new(sheet_file)
            .map_err(|e| EngineError::CorruptContainer(e.to_string()))?;

        // The shared-string loader pulls over its own archive handle so both
        // parts stream forward concurrently
        let sst_file = File::open(&self.path)
            .map_err(|e| EngineError::FileUnreadable(format!("{}: {}", self.path.display(), e)))?;
        let mut sst_archive = zip::ZipArchive::new(sst_file)
            .map_err(|e| EngineError::CorruptContainer(e.to_string()))?;
        let mut sst = match sst_archive.by_name("xl/sharedStrings.xml") {
            Ok(entry) => Some(SharedStringCache::new(
                BufReader::with_capacity(32 * 1024, entry),
                self.sst_capacity,
            )?),
            Err(_) => None,
        };

        let sheet_entry = sheet_archive.by_name(&self.sheet_part).map_err(|_| {
            EngineError::CorruptContainer(format!("missing sheet part {}", self.sheet_part))
        })?;
        let mut reader =
            quick_xml::Reader::from_reader(BufReader::with_capacity(64 * 1024, sheet_entry));
        reader.config_mut().trim_text(false);

        self.run_state_machine(&mut reader, &mut sst, tx)
    }

    /// The sheet-data state machine: seek `sheetData`, then rows, cells and
    /// cell payloads. Returns early when the consumer hangs up or the window
    /// is exhausted.
    fn run_state_machine<R: BufRead, S: BufRead>(
        &self,
        reader: &mut quick_xml::Reader<R>,
        sst: &mut Option<SharedStringCache<S>>,
        tx: &SyncSender<SheetMessage>,
    ) -> Result<()> {
        let mut buf = Vec::with_capacity(4096);
        let mut in_sheet_data = false;
        let mut last_row_number: u32 = 0;
        let mut sheds_seen = 0u64;

        loop {
            // Honor reclamation requests at row granularity
            let shed_now = self.shed_requests.load(Ordering::Relaxed);
            if shed_now > sheds_seen {
                sheds_seen = shed_now;
                if let Some(cache) = sst.as_mut() {
                    cache.evict_half();
                }
                buf.shrink_to(4096);
            }

            buf.clear();
            match reader
                .read_event_into(&mut buf)
                .map_err(|e| EngineError::XmlMalformed(format!("{}: {}", self.sheet_part, e)))?
            {
                Event::Start(ref e) if e.local_name().as_ref() == b"sheetData" => {
                    in_sheet_data = true;
                }
                Event::End(ref e) if e.local_name().as_ref() == b"sheetData" => {
                    return Ok(());
                }
                Event::Start(ref e) if in_sheet_data && e.local_name().as_ref() == b"row" => {
                    let row_number = row_number_attr(e)?.unwrap_or(last_row_number + 1);
                    last_row_number = row_number;

                    if row_number > self.window.last_row {
                        // Everything beyond the window can be dropped wholesale
                        return Ok(());
                    }
                    if row_number < self.window.first_row {
                        skip_row(reader, &self.sheet_part)?;
                        continue;
                    }

                    let row = self.decode_row(reader, row_number, sst, tx)?;
                    if tx.send(SheetMessage::Row(row)).is_err() {
                        return Ok(());
                    }
                }
                Event::Empty(ref e) if in_sheet_data && e.local_name().as_ref() == b"row" => {
                    let row_number = row_number_attr(e)?.unwrap_or(last_row_number + 1);
                    last_row_number = row_number;
                    if row_number > self.window.last_row {
                        return Ok(());
                    }
                    if !self.window.contains(row_number) {
                        continue;
                    }
                    if tx
                        .send(SheetMessage::Row(Row::new(row_number, Vec::new())))
                        .is_err()
                    {
                        return Ok(());
                    }
                }
                Event::Eof => return Ok(()),
                _ => {}
            }
        }
    }

    /// Decode the cells of one `<row>`; the opening tag has been consumed
    fn decode_row<R: BufRead, S: BufRead>(
        &self,
        reader: &mut quick_xml::Reader<R>,
        row_number: u32,
        sst: &mut Option<SharedStringCache<S>>,
        tx: &SyncSender<SheetMessage>,
    ) -> Result<Row> {
        let mut buf = Vec::with_capacity(1024);
        let mut cells: Vec<CellValue> = Vec::new();
        let mut scratch = CellScratch::default();
        let mut in_cell = false;

        loop {
            buf.clear();
            match reader
                .read_event_into(&mut buf)
                .map_err(|e| EngineError::XmlMalformed(format!("{}: {}", self.sheet_part, e)))?
            {
                Event::Start(ref e) => match e.local_name().as_ref() {
                    b"c" => {
                        scratch.reset();
                        scratch.read_attrs(e)?;
                        in_cell = true;
                    }
                    b"v" if in_cell => scratch.mode = ScratchMode::Value,
                    b"t" if in_cell && scratch.in_inline => {
                        scratch.mode = ScratchMode::Inline;
                        scratch.has_inline = true;
                    }
                    b"is" if in_cell => scratch.in_inline = true,
                    b"f" if in_cell => scratch.mode = ScratchMode::Formula,
                    _ => {}
                },
                Event::Empty(ref e) => {
                    if e.local_name().as_ref() == b"c" {
                        scratch.reset();
                        scratch.read_attrs(e)?;
                        // A bare <c/> carries no payload: a null placeholder
                        self.place_cell(&mut cells, &scratch, row_number, sst, tx);
                    }
                }
                Event::Text(t) => match scratch.mode {
                    ScratchMode::Value => {
                        let piece = t.unescape().map_err(|e| {
                            EngineError::XmlMalformed(format!("{}: {}", self.sheet_part, e))
                        })?;
                        scratch.value.push_str(&piece);
                        scratch.has_value = true;
                    }
                    ScratchMode::Inline => {
                        let piece = t.unescape().map_err(|e| {
                            EngineError::XmlMalformed(format!("{}: {}", self.sheet_part, e))
                        })?;
                        scratch.inline.push_str(&piece);
                        scratch.has_inline = true;
                    }
                    // Formula text is captured and dropped; the cached
                    // result arrives in the following <v>
                    ScratchMode::Formula | ScratchMode::None => {}
                },
                Event::End(ref e) => match e.local_name().as_ref() {
                    b"v" | b"f" => scratch.mode = ScratchMode::None,
                    b"t" if scratch.in_inline => scratch.mode = ScratchMode::None,
                    b"is" => scratch.in_inline = false,
                    b"c" => {
                        self.place_cell(&mut cells, &scratch, row_number, sst, tx);
                        in_cell = false;
                    }
                    b"row" => return Ok(Row::new(row_number, cells)),
                    _ => {}
                },
                Event::Eof => {
                    return Err(EngineError::XmlMalformed(format!(
                        "{}: unexpected end of stream inside row {}",
                        self.sheet_part, row_number
                    )))
                }
                _ => {}
            }
        }
    }

    /// Resolve the scratch cell and append it at its column, materializing
    /// interior gaps as nulls
    fn place_cell<S: BufRead>(
        &self,
        cells: &mut Vec<CellValue>,
        scratch: &CellScratch,
        row_number: u32,
        sst: &mut Option<SharedStringCache<S>>,
        tx: &SyncSender<SheetMessage>,
    ) {
        let col_index = scratch.column.unwrap_or(cells.len() as u32 + 1);
        while (cells.len() as u32) < col_index.saturating_sub(1) {
            cells.push(CellValue::Null);
        }

        let (value, warning) = self.resolve_cell(scratch, row_number, col_index, sst);
        if let Some(warning) = warning {
            let _ = tx.send(SheetMessage::Warning(warning));
        }
        cells.push(value);
    }

    /// Apply the cell resolution rules to the accumulated scratch state
    fn resolve_cell<S: BufRead>(
        &self,
        scratch: &CellScratch,
        row: u32,
        col: u32,
        sst: &mut Option<SharedStringCache<S>>,
    ) -> (CellValue, Option<Warning>) {
        let warn = |message: String| {
            Some(Warning {
                row,
                column: Some(col),
                message,
            })
        };

        match scratch.cell_type.as_deref() {
            Some("s") => {
                let Ok(index) = scratch.value.trim().parse::<usize>() else {
                    return (
                        CellValue::Null,
                        warn(format!("shared string index '{}' is not a number", scratch.value)),
                    );
                };
                match sst.as_mut() {
                    Some(cache) => match cache.get(index) {
                        Ok(Some(text)) => (CellValue::Str(text), None),
                        Ok(None) => (
                            CellValue::Null,
                            warn(format!("shared string {} evicted before use", index)),
                        ),
                        Err(e) => (CellValue::Null, warn(e.to_string())),
                    },
                    None => (
                        CellValue::Null,
                        warn("shared string reference without a shared-strings part".to_string()),
                    ),
                }
            }
            Some("inlineStr") => {
                if scratch.has_inline {
                    (CellValue::Str(scratch.inline.clone()), None)
                } else {
                    (CellValue::Null, None)
                }
            }
            Some("b") => match scratch.value.trim() {
                "1" => (CellValue::Bool(true), None),
                "0" => (CellValue::Bool(false), None),
                other => (
                    CellValue::Null,
                    warn(format!("boolean cell with value '{}'", other)),
                ),
            },
            Some("e") => (CellValue::CellError(scratch.value.clone()), None),
            Some("str") => (CellValue::Str(scratch.value.clone()), None),
            Some("d") => match parse_iso_datetime(&scratch.value) {
                Some(value) => (value, None),
                None => (
                    CellValue::Null,
                    warn(format!("unparseable ISO date '{}'", scratch.value)),
                ),
            },
            // Absent t (or explicit t="n"): numeric, possibly a styled date
            None | Some("n") => self.resolve_numeric(scratch, row, col),
            Some(other) => (
                CellValue::Null,
                Some(Warning {
                    row,
                    column: Some(col),
                    message: format!("unknown cell type '{}'", other),
                }),
            ),
        }
    }

    fn resolve_numeric(&self, scratch: &CellScratch, row: u32, col: u32) -> (CellValue, Option<Warning>) {
        let text = scratch.value.trim();
        if !scratch.has_value || text.is_empty() {
            return (CellValue::Null, None);
        }

        // Style is consulted only for numeric text
        let is_date_style = scratch
            .style
            .map(|s| self.date_styles.get(s).copied().unwrap_or(false))
            .unwrap_or(false);

        if is_date_style {
            if let Ok(serial) = text.parse::<f64>() {
                if let Some(value) = serial_to_datetime(serial, self.epoch_1904) {
                    return (value, None);
                }
                return (
                    CellValue::Null,
                    Some(Warning {
                        row,
                        column: Some(col),
                        message: format!("serial date {} out of range", serial),
                    }),
                );
            }
        }

        let looks_integral =
            !text.contains('.') && !text.contains('e') && !text.contains('E');
        if looks_integral {
            if let Ok(i) = text.parse::<i64>() {
                return (CellValue::Int(i), None);
            }
        }
        match text.parse::<f64>() {
            Ok(f) => (CellValue::Float(f), None),
            // Numeric cell with non-numeric text: pass it through as a string
            Err(_) => (CellValue::Str(scratch.value.clone()), None),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ScratchMode {
    #[default]
    None,
    Value,
    Inline,
    Formula,
}

/// Per-cell accumulation between `<c>` and `</c>`
#[derive(Debug, Default)]
struct CellScratch {
    /// 1-based column from the `r` attribute
    column: Option<u32>,
    cell_type: Option<String>,
    style: Option<usize>,
    value: String,
    has_value: bool,
    inline: String,
    has_inline: bool,
    in_inline: bool,
    mode: ScratchMode,
}

impl CellScratch {
    fn reset(&mut self) {
        self.column = None;
        self.cell_type = None;
        self.style = None;
        self.value.clear();
        self.has_value = false;
        self.inline.clear();
        self.has_inline = false;
        self.in_inline = false;
        self.mode = ScratchMode::None;
    }

    fn read_attrs(&mut self, e: &BytesStart<'_>) -> Result<()> {
        for attr in e.attributes() {
            let attr = attr.map_err(|e| EngineError::XmlMalformed(e.to_string()))?;
            let value = attr
                .unescape_value()
                .map_err(|e| EngineError::XmlMalformed(e.to_string()))?;
            match attr.key.as_ref() {
                b"r" => {
                    self.column = parse_cell_ref(&value).map(|(col, _)| col);
                }
                b"t" => self.cell_type = Some(value.into_owned()),
                b"s" => self.style = value.parse().ok(),
                _ => {}
            }
        }
        Ok(())
    }
}

/// Extract the `r` attribute of a `<row>` start tag
fn row_number_attr(e: &BytesStart<'_>) -> Result<Option<u32>> {
    for attr in e.attributes() {
        let attr = attr.map_err(|e| EngineError::XmlMalformed(e.to_string()))?;
        if attr.key.as_ref() == b"r" {
            let value = attr
                .unescape_value()
                .map_err(|e| EngineError::XmlMalformed(e.to_string()))?;
            return Ok(value.parse().ok());
        }
    }
    Ok(None)
}

/// Advance past the current row without decoding its cells
fn skip_row<R: BufRead>(reader: &mut quick_xml::Reader<R>, part: &str) -> Result<()> {
    let mut buf = Vec::with_capacity(256);
    loop {
        buf.clear();
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| EngineError::XmlMalformed(format!("{}: {}", part, e)))?
        {
            Event::End(ref e) if e.local_name().as_ref() == b"row" => return Ok(()),
            Event::Eof => {
                return Err(EngineError::XmlMalformed(format!(
                    "{}: unexpected end of stream while skipping a row",
                    part
                )))
            }
            _ => {}
        }
    }
}

fn read_part<R: Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
) -> Result<Option<Vec<u8>>> {
    match archive.by_name(name) {
        Ok(mut entry) => {
            let mut bytes = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut bytes)
                .map_err(|e| EngineError::CorruptContainer(format!("{}: {}", name, e)))?;
            Ok(Some(bytes))
        }
        Err(_) => Ok(None),
    }
}

struct RawSheet {
    name: String,
    rel_id: String,
    visible: bool,
}

struct WorkbookMeta {
    sheets: Vec<RawSheet>,
    epoch_1904: bool,
    active_tab: usize,
}

fn parse_workbook(bytes: &[u8]) -> Result<WorkbookMeta> {
    let mut reader = quick_xml::Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut sheets = Vec::new();
    let mut epoch_1904 = false;
    let mut active_tab = 0usize;
    let mut buf = Vec::with_capacity(1024);

    loop {
        buf.clear();
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| EngineError::XmlMalformed(format!("workbook.xml: {}", e)))?
        {
            Event::Start(ref e) | Event::Empty(ref e) => match e.local_name().as_ref() {
                b"sheet" => {
                    let mut name = String::new();
                    let mut rel_id = String::new();
                    let mut visible = true;
                    for attr in e.attributes() {
                        let attr =
                            attr.map_err(|e| EngineError::XmlMalformed(e.to_string()))?;
                        let value = attr
                            .unescape_value()
                            .map_err(|e| EngineError::XmlMalformed(e.to_string()))?;
                        match attr.key.as_ref() {
                            b"name" => name = value.into_owned(),
                            b"r:id" => rel_id = value.into_owned(),
                            b"state" => visible = value == "visible",
                            _ => {}
                        }
                    }
                    sheets.push(RawSheet {
                        name,
                        rel_id,
                        visible,
                    });
                }
                b"workbookPr" => {
                    for attr in e.attributes() {
                        let attr =
                            attr.map_err(|e| EngineError::XmlMalformed(e.to_string()))?;
                        if attr.key.as_ref() == b"date1904" {
                            let value = attr
                                .unescape_value()
                                .map_err(|e| EngineError::XmlMalformed(e.to_string()))?;
                            epoch_1904 = value == "1" || value == "true";
                        }
                    }
                }
                b"workbookView" => {
                    for attr in e.attributes() {
                        let attr =
                            attr.map_err(|e| EngineError::XmlMalformed(e.to_string()))?;
                        if attr.key.as_ref() == b"activeTab" {
                            let value = attr
                                .unescape_value()
                                .map_err(|e| EngineError::XmlMalformed(e.to_string()))?;
                            active_tab = value.parse().unwrap_or(0);
                        }
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(WorkbookMeta {
        sheets,
        epoch_1904,
        active_tab,
    })
}

fn parse_relationships(bytes: &[u8]) -> Result<Vec<(String, String)>> {
    let mut reader = quick_xml::Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut rels = Vec::new();
    let mut buf = Vec::with_capacity(1024);
    loop {
        buf.clear();
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| EngineError::XmlMalformed(format!("workbook.xml.rels: {}", e)))?
        {
            Event::Start(ref e) | Event::Empty(ref e)
                if e.local_name().as_ref() == b"Relationship" =>
            {
                let mut id = String::new();
                let mut target = String::new();
                for attr in e.attributes() {
                    let attr = attr.map_err(|e| EngineError::XmlMalformed(e.to_string()))?;
                    let value = attr
                        .unescape_value()
                        .map_err(|e| EngineError::XmlMalformed(e.to_string()))?;
                    match attr.key.as_ref() {
                        b"Id" => id = value.into_owned(),
                        b"Target" => target = value.into_owned(),
                        _ => {}
                    }
                }
                rels.push((id, target));
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(rels)
}

/// Resolve a workbook-relative relationship target to a package path
fn resolve_target(target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        absolute.to_string()
    } else {
        format!("xl/{}", target)
    }
}

// Builtin number formats that render as dates or times
fn is_builtin_date_format(id: u32) -> bool {
    matches!(id, 14..=22 | 45..=47)
}

/// Date detection for custom format codes: any `y`, `m`, `d`, `h` or `s`
/// letter counts unless it sits inside a quoted literal
fn is_date_format_code(code: &str) -> bool {
    let mut in_quotes = false;
    let mut chars = code.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '\\' if !in_quotes => {
                chars.next();
            }
            c if !in_quotes => {
                if matches!(c.to_ascii_lowercase(), 'y' | 'm' | 'd' | 'h' | 's') {
                    return true;
                }
            }
            _ => {}
        }
    }
    false
}

/// Build the style-index → is-date table from `xl/styles.xml`
fn parse_date_styles(bytes: &[u8]) -> Result<Vec<bool>> {
    let mut reader = quick_xml::Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut custom_formats: Vec<(u32, bool)> = Vec::new();
    let mut date_styles = Vec::new();
    let mut in_cell_xfs = false;
    let mut buf = Vec::with_capacity(1024);

    loop {
        buf.clear();
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| EngineError::XmlMalformed(format!("styles.xml: {}", e)))?
        {
            Event::Start(ref e) | Event::Empty(ref e) => match e.local_name().as_ref() {
                b"numFmt" => {
                    let mut id = None;
                    let mut is_date = false;
                    for attr in e.attributes() {
                        let attr = attr.map_err(|e| EngineError::XmlMalformed(e.to_string()))?;
                        let value = attr
                            .unescape_value()
                            .map_err(|e| EngineError::XmlMalformed(e.to_string()))?;
                        match attr.key.as_ref() {
                            b"numFmtId" => id = value.parse().ok(),
                            b"formatCode" => is_date = is_date_format_code(&value),
                            _ => {}
                        }
                    }
                    if let Some(id) = id {
                        custom_formats.push((id, is_date));
                    }
                }
                b"cellXfs" => in_cell_xfs = true,
                b"xf" if in_cell_xfs => {
                    let mut fmt_id = 0u32;
                    for attr in e.attributes() {
                        let attr = attr.map_err(|e| EngineError::XmlMalformed(e.to_string()))?;
                        if attr.key.as_ref() == b"numFmtId" {
                            let value = attr
                                .unescape_value()
                                .map_err(|e| EngineError::XmlMalformed(e.to_string()))?;
                            fmt_id = value.parse().unwrap_or(0);
                        }
                    }
                    let is_date = is_builtin_date_format(fmt_id)
                        || custom_formats
                            .iter()
                            .find(|(id, _)| *id == fmt_id)
                            .map(|(_, is_date)| *is_date)
                            .unwrap_or(false);
                    date_styles.push(is_date);
                }
                _ => {}
            },
            Event::End(ref e) if e.local_name().as_ref() == b"cellXfs" => in_cell_xfs = false,
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(date_styles)
}
