//! OOXML row sink: streams `<row>` fragments into a minimal package

use crate::error::{EngineError, Result};
use crate::range::col_to_letters;
use crate::types::CellValue;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const SHEET_XML_HEADER: &str = concat!(
    "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n",
    "<worksheet xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\" ",
    "xmlns:r=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships\">",
    "<sheetData>"
);

const CONTENT_TYPES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types">
<Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/>
<Default Extension="xml" ContentType="application/xml"/>
<Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>
<Override PartName="/xl/worksheets/sheet1.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>
</Types>"#;

const ROOT_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/>
</Relationships>"#;

const WORKBOOK_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships">
<sheets>
<sheet name="Sheet1" sheetId="1" r:id="rId1"/>
</sheets>
</workbook>"#;

const WORKBOOK_RELS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">
<Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet1.xml"/>
</Relationships>"#;

// Cached column letters cover the typical sheet width
const COL_CACHE_LEN: u32 = 64;

/// Streaming OOXML writer for a single-sheet workbook.
///
/// The package scaffolding is written when the sink is created; rows append
/// as serialized `<row>` fragments. Strings are emitted inline
/// (`t="inlineStr"`), so no shared-strings part is kept and memory stays flat
/// regardless of row count. No styles part is written.
pub struct XlsxSink {
    zip: Option<ZipWriter<BufWriter<File>>>,
    row_cursor: u32,
    xml_buffer: Vec<u8>,
    col_cache: Vec<String>,
    flush_interval: u32,
    rows_written: u64,
}

impl XlsxSink {
    /// Create the output package and open the sheet part for row streaming
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path.as_ref())
            .map_err(|e| EngineError::SinkWrite(format!("create: {}", e)))?;
        let mut zip = ZipWriter::new(BufWriter::with_capacity(64 * 1024, file));

        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .large_file(true);

        for (name, body) in [
            ("[Content_Types].xml", CONTENT_TYPES_XML),
            ("_rels/.rels", ROOT_RELS_XML),
            ("xl/workbook.xml", WORKBOOK_XML),
            ("xl/_rels/workbook.xml.rels", WORKBOOK_RELS_XML),
        ] {
            zip.start_file(name, options)
                .map_err(|e| EngineError::SinkWrite(format!("{}: {}", name, e)))?;
            zip.write_all(body.as_bytes())
                .map_err(|e| EngineError::SinkWrite(format!("{}: {}", name, e)))?;
        }

        zip.start_file("xl/worksheets/sheet1.xml", options)
            .map_err(|e| EngineError::SinkWrite(format!("sheet part: {}", e)))?;
        zip.write_all(SHEET_XML_HEADER.as_bytes())
            .map_err(|e| EngineError::SinkWrite(format!("sheet part: {}", e)))?;

        let col_cache = (1..=COL_CACHE_LEN).map(col_to_letters).collect();

        Ok(XlsxSink {
            zip: Some(zip),
            row_cursor: 0,
            xml_buffer: Vec::with_capacity(8192),
            col_cache,
            flush_interval: 1000,
            rows_written: 0,
        })
    }

    /// Append one logical row.
    ///
    /// Null cells are omitted; the `r` attribute on the following cells keeps
    /// their column positions.
    pub fn write_row(&mut self, cells: &[CellValue]) -> Result<()> {
        if self.zip.is_none() {
            return Err(EngineError::SinkWrite("sink already finished".to_string()));
        }

        self.row_cursor += 1;
        let row_num = self.row_cursor;
        let mut itoa_buf = itoa::Buffer::new();

        self.xml_buffer.clear();
        self.xml_buffer.extend_from_slice(b"<row r=\"");
        self.xml_buffer
            .extend_from_slice(itoa_buf.format(row_num).as_bytes());
        self.xml_buffer.extend_from_slice(b"\">");

        for (col_idx, cell) in cells.iter().enumerate() {
            if cell.is_null() {
                continue;
            }

            self.xml_buffer.extend_from_slice(b"<c r=\"");
            if (col_idx as u32) < COL_CACHE_LEN {
                self.xml_buffer
                    .extend_from_slice(self.col_cache[col_idx].as_bytes());
            } else {
                self.xml_buffer
                    .extend_from_slice(col_to_letters(col_idx as u32 + 1).as_bytes());
            }
            self.xml_buffer
                .extend_from_slice(itoa_buf.format(row_num).as_bytes());
            self.xml_buffer.extend_from_slice(b"\"");

            match cell {
                CellValue::Null => unreachable!(),
                CellValue::Int(i) => {
                    self.xml_buffer.extend_from_slice(b"><v>");
                    self.xml_buffer
                        .extend_from_slice(itoa_buf.format(*i).as_bytes());
                    self.xml_buffer.extend_from_slice(b"</v></c>");
                }
                CellValue::Float(f) => {
                    self.xml_buffer.extend_from_slice(b"><v>");
                    self.xml_buffer.extend_from_slice(f.to_string().as_bytes());
                    self.xml_buffer.extend_from_slice(b"</v></c>");
                }
                CellValue::Percent(p) => {
                    self.xml_buffer.extend_from_slice(b"><v>");
                    self.xml_buffer.extend_from_slice(p.to_string().as_bytes());
                    self.xml_buffer.extend_from_slice(b"</v></c>");
                }
                CellValue::Bool(b) => {
                    self.xml_buffer.extend_from_slice(b" t=\"b\"><v>");
                    self.xml_buffer
                        .extend_from_slice(if *b { b"1" } else { b"0" });
                    self.xml_buffer.extend_from_slice(b"</v></c>");
                }
                CellValue::Str(s) => {
                    self.write_inline_string(s);
                }
                // Date-times, currency and error cells travel as their
                // display text; type inference restores them on read
                other => {
                    let text = other.as_string();
                    self.write_inline_string(&text);
                }
            }
        }

        self.xml_buffer.extend_from_slice(b"</row>");
        let Some(zip) = self.zip.as_mut() else {
            return Err(EngineError::SinkWrite("sink already finished".to_string()));
        };
        zip.write_all(&self.xml_buffer)
            .map_err(|e| EngineError::SinkWrite(e.to_string()))?;

        self.rows_written += 1;
        if self.rows_written % self.flush_interval as u64 == 0 {
            zip.flush()
                .map_err(|e| EngineError::SinkWrite(e.to_string()))?;
        }

        Ok(())
    }

    fn write_inline_string(&mut self, text: &str) {
        self.xml_buffer
            .extend_from_slice(b" t=\"inlineStr\"><is><t xml:space=\"preserve\">");
        escape_into(text, &mut self.xml_buffer);
        self.xml_buffer.extend_from_slice(b"</t></is></c>");
    }

    /// Flush pending bytes through the compressor
    pub fn flush(&mut self) -> Result<()> {
        if let Some(zip) = self.zip.as_mut() {
            zip.flush()
                .map_err(|e| EngineError::SinkWrite(e.to_string()))?;
        }
        Ok(())
    }

    /// Rows appended so far
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    /// Close the sheet part and finalize the package. Idempotent after
    /// success.
    pub fn finish(&mut self) -> Result<()> {
        let Some(mut zip) = self.zip.take() else {
            return Ok(());
        };
        zip.write_all(b"</sheetData></worksheet>")
            .map_err(|e| EngineError::SinkWrite(e.to_string()))?;
        let mut inner = zip
            .finish()
            .map_err(|e| EngineError::SinkWrite(e.to_string()))?;
        inner
            .flush()
            .map_err(|e| EngineError::SinkWrite(e.to_string()))?;
        Ok(())
    }

    /// Drop the writer without finalizing (the facade removes the file)
    pub fn abandon(&mut self) {
        self.zip = None;
    }
}

/// Minimal XML text escaping into a byte buffer
fn escape_into(text: &str, buffer: &mut Vec<u8>) {
    for ch in text.chars() {
        match ch {
            '&' => buffer.extend_from_slice(b"&amp;"),
            '<' => buffer.extend_from_slice(b"&lt;"),
            '>' => buffer.extend_from_slice(b"&gt;"),
            '"' => buffer.extend_from_slice(b"&quot;"),
            c if (c as u32) < 0x20 && c != '\t' && c != '\n' && c != '\r' => {}
            c => {
                let mut utf8 = [0u8; 4];
                buffer.extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_package_parts_present() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.xlsx");
        {
            let mut sink = XlsxSink::create(&path).unwrap();
            sink.write_row(&[CellValue::Str("hi".to_string()), CellValue::Int(1)])
                .unwrap();
            sink.finish().unwrap();
        }

        let file = File::open(&path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        for part in [
            "[Content_Types].xml",
            "_rels/.rels",
            "xl/workbook.xml",
            "xl/_rels/workbook.xml.rels",
            "xl/worksheets/sheet1.xml",
        ] {
            assert!(archive.by_name(part).is_ok(), "{part} missing");
        }
    }

    #[test]
    fn test_sheet_xml_shape() {
        use std::io::Read;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.xlsx");
        {
            let mut sink = XlsxSink::create(&path).unwrap();
            sink.write_row(&[
                CellValue::Str("a<b".to_string()),
                CellValue::Null,
                CellValue::Int(7),
                CellValue::Bool(true),
            ])
            .unwrap();
            sink.finish().unwrap();
        }

        let file = File::open(&path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        let mut sheet = String::new();
        archive
            .by_name("xl/worksheets/sheet1.xml")
            .unwrap()
            .read_to_string(&mut sheet)
            .unwrap();

        assert!(sheet.contains("<row r=\"1\">"));
        // The escaped inline string
        assert!(sheet.contains("a&lt;b"));
        // Null cell omitted; the integer keeps its column via r="C1"
        assert!(!sheet.contains("r=\"B1\""));
        assert!(sheet.contains("<c r=\"C1\"><v>7</v></c>"));
        assert!(sheet.contains("<c r=\"D1\" t=\"b\"><v>1</v></c>"));
    }

    #[test]
    fn test_finish_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.xlsx");
        let mut sink = XlsxSink::create(&path).unwrap();
        sink.write_row(&[CellValue::Int(1)]).unwrap();
        sink.finish().unwrap();
        sink.finish().unwrap();
    }

    #[test]
    fn test_write_after_finish_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.xlsx");
        let mut sink = XlsxSink::create(&path).unwrap();
        sink.finish().unwrap();
        assert!(sink.write_row(&[CellValue::Int(1)]).is_err());
    }
}
